pub mod access;
pub mod aggregate;
pub mod analytics;
pub mod api;
pub mod dates;
pub mod db;
pub mod engine;
pub mod error;
pub mod planner;
pub mod progress;
pub mod retry;
pub mod schedule;

use std::sync::Arc;

pub type SharedDB = Arc<db::RegimenDB>;

/// Run a blocking DB operation on tokio's blocking thread pool.
///
/// All synchronous RegimenDB calls in async context MUST go through this
/// to avoid starving tokio worker threads.
pub async fn db_call<F, T>(db: &SharedDB, f: F) -> Result<T, error::RegimenError>
where
    F: FnOnce(&db::RegimenDB) -> T + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| error::RegimenError::Internal(e.to_string()))
}

#[derive(Clone)]
pub struct AppState {
    pub db: SharedDB,
    pub api_key: Option<String>,
    pub planner: Option<planner::PlannerConfig>,
    pub analytics: Arc<dyn analytics::AnalyticsSink>,
    pub access: Arc<dyn access::AccessPolicy>,
    pub retry: retry::RetryPolicy,
    pub started_at: std::time::Instant,
}

impl AppState {
    /// State with the store-backed access policy, log analytics and no
    /// planner. Callers override fields as needed.
    pub fn new(db: SharedDB) -> Self {
        Self {
            access: Arc::new(access::StoreAccess::new(db.clone())),
            db,
            api_key: None,
            planner: None,
            analytics: Arc::new(analytics::LogSink),
            retry: retry::RetryPolicy::default(),
            started_at: std::time::Instant::now(),
        }
    }
}
