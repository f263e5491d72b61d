//! Usage counters. Recording is fire-and-forget: a sink failure never fails
//! the operation that produced the event.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    TasksCreated,
    TasksProlonged,
    TasksCopied,
    TasksStolen,
    TasksRescheduled,
    TasksDeleted,
    TasksCompleted,
    TasksCanceled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub user_id: String,
    pub counter: Counter,
    pub count: usize,
}

impl Event {
    pub fn new(user_id: &str, counter: Counter, count: usize) -> Self {
        Self { user_id: user_id.to_string(), counter, count }
    }
}

pub trait AnalyticsSink: Send + Sync {
    fn record(&self, events: Vec<Event>);
}

/// Writes counters to the log. Used when no collector is configured.
#[derive(Debug, Default)]
pub struct LogSink;

impl AnalyticsSink for LogSink {
    fn record(&self, events: Vec<Event>) {
        for e in events.iter().filter(|e| e.count > 0) {
            info!(user_id = %e.user_id, counter = ?e.counter, count = e.count, "analytics");
        }
    }
}

/// POSTs each batch as a JSON array on a spawned task.
#[derive(Clone)]
pub struct HttpSink {
    url: String,
    client: reqwest::Client,
}

impl HttpSink {
    /// Returns `None` if `REGIMEN_ANALYTICS_URL` is not set.
    pub fn from_env() -> Option<Self> {
        Self::new(std::env::var("REGIMEN_ANALYTICS_URL").ok()?)
    }

    pub fn new(url: impl Into<String>) -> Option<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .ok()?;
        Some(Self { url: url.into(), client })
    }
}

impl AnalyticsSink for HttpSink {
    fn record(&self, events: Vec<Event>) {
        let events: Vec<Event> = events.into_iter().filter(|e| e.count > 0).collect();
        if events.is_empty() {
            return;
        }
        // outside a runtime (sync callers, tests) there's nowhere to spawn
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(n = events.len(), "no runtime, analytics dropped");
            return;
        };
        let sink = self.clone();
        handle.spawn(async move {
            match sink.client.post(&sink.url).json(&events).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    warn!(status = %resp.status(), "analytics collector rejected batch");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "analytics post failed"),
            }
        });
    }
}

/// Pick the HTTP collector when configured, else the log sink.
pub fn sink_from_env() -> std::sync::Arc<dyn AnalyticsSink> {
    match HttpSink::from_env() {
        Some(s) => {
            info!(url = %s.url, "analytics collector enabled");
            std::sync::Arc::new(s)
        }
        None => std::sync::Arc::new(LogSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_serialize_snake_case() {
        let e = Event::new("u1", Counter::TasksRescheduled, 3);
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["counter"], "tasks_rescheduled");
        assert_eq!(v["count"], 3);
    }

    #[test]
    fn log_sink_accepts_empty_batches() {
        LogSink.record(Vec::new());
        LogSink.record(vec![Event::new("u1", Counter::TasksDeleted, 0)]);
    }

    /// Local collector that forwards every posted batch to the returned channel.
    async fn collector() -> (String, tokio::sync::mpsc::UnboundedReceiver<serde_json::Value>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let app = axum::Router::new().route(
            "/events",
            axum::routing::post(move |axum::Json(batch): axum::Json<serde_json::Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(batch);
                    axum::http::StatusCode::NO_CONTENT
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}/events"), rx)
    }

    #[tokio::test]
    async fn http_sink_posts_only_nonzero_counters() {
        let (url, mut rx) = collector().await;
        let sink = HttpSink::new(url).unwrap();
        sink.record(vec![
            Event::new("u1", Counter::TasksCreated, 9),
            Event::new("u1", Counter::TasksDeleted, 0),
        ]);
        let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            batch,
            serde_json::json!([{"user_id": "u1", "counter": "tasks_created", "count": 9}])
        );

        // all-zero batches never reach the collector
        sink.record(vec![Event::new("u1", Counter::TasksDeleted, 0)]);
        assert!(tokio::time::timeout(Duration::from_millis(200), rx.recv()).await.is_err());
    }

    #[test]
    fn http_sink_outside_runtime_drops_batch() {
        let sink = HttpSink::new("http://127.0.0.1:9/events").unwrap();
        sink.record(vec![Event::new("u1", Counter::TasksCreated, 1)]);
    }
}
