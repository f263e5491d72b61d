//! Profile and purchase handlers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::{blocking, parse_body};
use crate::db::{self, UserInput};
use crate::error::RegimenError;
use crate::AppState;

pub(super) async fn upsert_user(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<db::UserProfile>, RegimenError> {
    let input: UserInput = parse_body(&body)?;
    let db = state.db.clone();
    let profile = blocking(move || db.upsert_user(input)).await??;
    Ok(Json(profile))
}

pub(super) async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<db::UserProfile>, RegimenError> {
    let db = state.db.clone();
    blocking(move || db.get_user(&id))
        .await??
        .ok_or(RegimenError::NotFound)
        .map(Json)
}

#[derive(Deserialize)]
struct PurchaseBody {
    buyer_id: String,
    seller_id: String,
    part: String,
}

pub(super) async fn record_purchase(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<db::Purchase>), RegimenError> {
    let p: PurchaseBody = parse_body(&body)?;
    let db = state.db.clone();
    let purchase = blocking(move || db.insert_purchase(&p.buyer_id, &p.seller_id, &p.part)).await??;
    Ok((StatusCode::CREATED, Json(purchase)))
}
