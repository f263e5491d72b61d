//! Task instance handlers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;

use super::{blocking, parse_body, record};
use crate::db;
use crate::engine;
use crate::error::RegimenError;
use crate::retry::with_retry;
use crate::AppState;

pub(super) async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<db::TaskInstance>, RegimenError> {
    let db = state.db.clone();
    blocking(move || db.get_task(&id))
        .await??
        .ok_or(RegimenError::NotFound)
        .map(Json)
}

/// POST /tasks/status
pub(super) async fn change_status(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<engine::StatusOutcome>, RegimenError> {
    let req: engine::ChangeStatus = parse_body(&body)?;
    let db = state.db.clone();
    let mut out = with_retry(&state.retry, "change_status", move || {
        engine::change_status(&db, req.clone())
    })
    .await?;
    record(&state, &mut out.events);
    Ok(Json(out))
}

/// POST /tasks/delete
pub(super) async fn delete_tasks(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<engine::DeleteOutcome>, RegimenError> {
    let req: engine::DeleteTasks = parse_body(&body)?;
    let db = state.db.clone();
    let mut out = with_retry(&state.retry, "delete_tasks", move || {
        engine::delete_tasks(&db, req.clone())
    })
    .await?;
    record(&state, &mut out.events);
    Ok(Json(out))
}

/// POST /tasks/reschedule
pub(super) async fn reschedule_task(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<engine::RescheduleOutcome>, RegimenError> {
    let req: engine::RescheduleTask = parse_body(&body)?;
    let db = state.db.clone();
    let mut out = with_retry(&state.retry, "reschedule_task", move || {
        engine::reschedule_task(&db, req.clone())
    })
    .await?;
    record(&state, &mut out.events);
    Ok(Json(out))
}
