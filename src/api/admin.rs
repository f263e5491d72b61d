//! Admin and maintenance handlers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use super::{blocking, parse_body};
use crate::error::RegimenError;
use crate::{db, engine, AppState};

#[derive(Deserialize, Default)]
pub(super) struct ReconcileBody {
    /// Only these routines; every live routine when absent.
    #[serde(default)]
    routine_ids: Option<Vec<String>>,
}

/// POST /admin/reconcile: rebuild rollups and schedules from task rows.
pub(super) async fn do_reconcile(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<engine::ReconcileReport>, RegimenError> {
    let parsed: ReconcileBody = if body.is_empty() { ReconcileBody::default() } else { parse_body(&body)? };
    let db = state.db.clone();
    let report = blocking(move || match parsed.routine_ids {
        Some(ids) => engine::reconcile_routines(&db, &ids),
        None => engine::reconcile_all(&db),
    })
    .await??;
    Ok(Json(report))
}

/// POST /admin/expire: age out overdue tasks now instead of waiting for the
/// background loop.
pub(super) async fn do_expire(
    State(state): State<AppState>,
) -> Result<Json<engine::ExpireReport>, RegimenError> {
    let db = state.db.clone();
    let report = blocking(move || engine::expire_overdue(&db, db::now())).await??;
    Ok(Json(report))
}

pub(super) async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<db::Progress>, RegimenError> {
    let db = state.db.clone();
    blocking(move || db.get_progress(&id))
        .await??
        .ok_or(RegimenError::NotFound)
        .map(Json)
}
