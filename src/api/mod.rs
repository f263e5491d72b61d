use axum::extract::State;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use subtle::ConstantTimeEq;
use tower_http::limit::RequestBodyLimitLayer;

use crate::analytics::Event;
use crate::error::RegimenError;
use crate::AppState;

mod admin;
mod routines;
mod tasks;
mod users;

use admin::*;
use routines::*;
use tasks::*;
use users::*;

/// Run a blocking closure on the spawn_blocking pool and map JoinError.
async fn blocking<T, F>(f: F) -> Result<T, RegimenError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RegimenError::Internal(e.to_string()))
}

/// Decode a JSON body. Malformed input is a 400 like every other validation
/// failure (axum's `Json` extractor would answer 415/422).
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, RegimenError> {
    serde_json::from_slice(body).map_err(|e| RegimenError::Validation(format!("invalid body: {e}")))
}

fn record(state: &AppState, events: &mut Vec<Event>) {
    let events = std::mem::take(events);
    if !events.is_empty() {
        state.analytics.record(events);
    }
}

/// Auth middleware: checks Bearer token if REGIMEN_API_KEY is configured.
async fn require_auth(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, RegimenError> {
    let Some(ref expected) = state.api_key else {
        return Ok(next.run(req).await);
    };

    let unauthorized = || RegimenError::Unauthorized;

    let header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or_else(unauthorized)?;

    // constant-time comparison to prevent timing attacks
    if token.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(next.run(req).await)
    } else {
        Err(unauthorized())
    }
}

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats));

    let protected = Router::new()
        .route("/users", post(upsert_user))
        .route("/users/{id}", get(get_user))
        .route("/purchases", post(record_purchase))
        .route("/routines", post(create_routine).get(list_routines))
        .route("/routines/prolong", post(prolong_routine))
        .route("/routines/clone", post(clone_routine))
        .route("/routines/{id}", get(get_routine))
        .route("/routines/{id}/tasks", get(routine_tasks))
        .route("/schedule", get(due_schedule))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/status", post(change_status))
        .route("/tasks/delete", post(delete_tasks))
        .route("/tasks/reschedule", post(reschedule_task))
        .route("/admin/reconcile", post(do_reconcile))
        .route("/admin/expire", post(do_expire))
        .route("/progress/{id}", get(get_progress))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    public
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .with_state(state)
}

/// GET /health: liveness plus when maintenance last ran.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let db = state.db.clone();
    let last_maintenance = blocking(move || db.get_meta("last_maintenance_ms"))
        .await
        .ok()
        .flatten()
        .and_then(|v| v.parse::<i64>().ok());
    Json(serde_json::json!({
        "name": "regimen",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "planner_enabled": state.planner.is_some(),
        "last_maintenance_ms": last_maintenance,
    }))
}

/// GET /stats: row counts.
async fn stats(State(state): State<AppState>) -> Result<Json<crate::db::Stats>, RegimenError> {
    let db = state.db.clone();
    let s = blocking(move || db.stats()).await??;
    Ok(Json(s))
}
