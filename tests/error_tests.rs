use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::NaiveDate;
use http_body_util::BodyExt;
use regimen::error::RegimenError;

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[test]
fn status_codes_are_correct() {
    assert_eq!(RegimenError::NotFound.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(RegimenError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(RegimenError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(RegimenError::InvalidStatus("x".into()).status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(RegimenError::InvalidTimeZone("x".into()).status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(RegimenError::InvalidDate("x".into()).status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(RegimenError::declined("no").status_code(), StatusCode::OK);
    assert_eq!(RegimenError::PlannerNotConfigured.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(RegimenError::Upstream("bad".into()).status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(RegimenError::UpstreamTransport("down".into()).status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        RegimenError::Internal("oops".into()).status_code(),
        StatusCode::INTERNAL_SERVER_ERROR,
    );
}

#[test]
fn only_transient_failures_retry() {
    assert!(RegimenError::Pool("timed out".into()).is_retryable());
    assert!(RegimenError::UpstreamTransport("reset".into()).is_retryable());
    let busy = rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
        None,
    );
    assert!(RegimenError::Database(busy).is_retryable());

    assert!(!RegimenError::declined("cooldown").is_retryable());
    assert!(!RegimenError::Validation("bad".into()).is_retryable());
    assert!(!RegimenError::Upstream("400".into()).is_retryable());
    assert!(!RegimenError::Database(rusqlite::Error::QueryReturnedNoRows).is_retryable());
}

#[tokio::test]
async fn declined_body_carries_retry_date() {
    let d = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
    let resp = RegimenError::declined_until("already scheduled", d).into_response();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["error"], "already scheduled");
    assert_eq!(j["retry_after"], "2024-01-08");

    let j = body_json(RegimenError::declined("nothing to do").into_response()).await;
    assert!(j.get("retry_after").is_none());
}

#[tokio::test]
async fn internal_details_are_not_leaked() {
    let resp = RegimenError::Internal("secret path /var/db".into()).into_response();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let j = body_json(resp).await;
    assert_eq!(j["error"], "unexpected error, try again");

    let j = body_json(RegimenError::Validation("bad tag".into()).into_response()).await;
    assert!(j["error"].as_str().unwrap().contains("bad tag"));
}
