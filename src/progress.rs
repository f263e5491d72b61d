//! Per-operation progress ticker for slow calls (the planner).

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::SharedDB;

/// Progress shown while the ticker runs never reaches 100; only
/// [`ProgressTicker::finish`] does.
const TICK_CAP: i64 = 95;

/// Bumps a progress record on an interval until stopped. Dropping the ticker
/// stops it too, so an early `?` return can't leave it running.
pub struct ProgressTicker {
    db: SharedDB,
    id: String,
    handle: Option<JoinHandle<()>>,
}

impl ProgressTicker {
    pub fn start(db: SharedDB, id: String, every: Duration, step: i64) -> Self {
        let bg_db = db.clone();
        let bg_id = id.clone();
        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(every);
            ticks.tick().await;
            loop {
                ticks.tick().await;
                let db = bg_db.clone();
                let id = bg_id.clone();
                let r = tokio::task::spawn_blocking(move || db.bump_progress(&id, step, TICK_CAP)).await;
                if let Ok(Err(e)) = r {
                    debug!(progress_id = %bg_id, error = %e, "progress bump failed");
                }
            }
        });
        Self { db, id, handle: Some(handle) }
    }

    /// Stop ticking without touching the record.
    pub fn stop(&mut self) {
        if let Some(h) = self.handle.take() {
            h.abort();
        }
    }

    /// Stop ticking and mark the record done.
    pub async fn finish(self) {
        self.end(None).await;
    }

    /// Stop ticking and mark the record done with an error, so pollers see
    /// an end state.
    pub async fn fail(self, error: &str) {
        self.end(Some(error.to_string())).await;
    }

    async fn end(mut self, error: Option<String>) {
        self.stop();
        let db = self.db.clone();
        let id = self.id.clone();
        let r = tokio::task::spawn_blocking(move || match error {
            None => db.finish_progress(&id),
            Some(msg) => db.fail_progress(&id, &msg),
        })
        .await;
        if let Ok(Err(e)) = r {
            debug!(progress_id = %self.id, error = %e, "progress update failed");
        }
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.stop();
    }
}
