use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;

#[derive(Debug, thiserror::Error)]
pub enum RegimenError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid time zone: {0}")]
    InvalidTimeZone(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    /// Expected, user-facing refusal. Rendered as a 200 with an `error` field.
    #[error("{message}")]
    Declined {
        message: String,
        retry_after: Option<NaiveDate>,
    },

    #[error("planner not configured (set REGIMEN_PLANNER_URL)")]
    PlannerNotConfigured,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream unreachable: {0}")]
    UpstreamTransport(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("pool error: {0}")]
    Pool(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RegimenError {
    pub fn declined(message: impl Into<String>) -> Self {
        Self::Declined { message: message.into(), retry_after: None }
    }

    pub fn declined_until(message: impl Into<String>, retry_after: NaiveDate) -> Self {
        Self::Declined { message: message.into(), retry_after: Some(retry_after) }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Declined { .. } => StatusCode::OK,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::PlannerNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) | Self::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) | Self::Pool(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Transient infrastructure failures worth another attempt. Validation,
    /// business rules and logic errors fail fast.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Pool(_) | Self::UpstreamTransport(_) => true,
            Self::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Pool(_) | Self::Internal(_))
    }
}

impl axum::response::IntoResponse for RegimenError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = match &self {
            Self::Declined { message, retry_after } => match retry_after {
                Some(d) => serde_json::json!({ "error": message, "retry_after": d }),
                None => serde_json::json!({ "error": message }),
            },
            e if e.is_infrastructure() => {
                tracing::error!(error = %e, "request failed");
                serde_json::json!({ "error": "unexpected error, try again" })
            }
            e => serde_json::json!({ "error": e.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
