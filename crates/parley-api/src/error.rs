//! Request error type. Handlers return `Result<T, ApiError>`; the
//! `IntoResponse` impl turns it into a JSON `{"error": ...}` body.
//!
//! Storage and internal failures are logged in full and reported to the
//! client with a generic message.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use parley_db::StoreError;

use crate::media::MediaError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad input. The message is shown to the caller as is.
    #[error("{0}")]
    Validation(String),

    #[error("reply target does not exist in this room")]
    InvalidReplyTarget,

    #[error("unauthorized")]
    Unauthorized,

    #[error("not a member of this room")]
    NotMember,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("storage timed out")]
    Timeout,

    #[error("storage: {0}")]
    Storage(StoreError),

    #[error("internal: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidReplyTarget => Self::InvalidReplyTarget,
            StoreError::MessageNotFound => Self::NotFound("message"),
            StoreError::RoomNotFound => Self::NotFound("room"),
            StoreError::DeadlineExceeded => Self::Timeout,
            other => Self::Storage(other),
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::TooLarge => Self::PayloadTooLarge,
            MediaError::UnsupportedType(mime) => {
                Self::Validation(format!("unsupported media type: {mime}"))
            }
            MediaError::Empty => Self::validation("empty upload"),
            MediaError::Io(e) => Self::Internal(format!("media store: {e}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) | Self::InvalidReplyTarget => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotMember | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self {
            Self::Storage(e) => {
                error!(error = %e, "storage error");
                "internal server error".to_owned()
            }
            Self::Internal(m) => {
                error!(message = %m, "internal server error");
                "internal server error".to_owned()
            }
            Self::Timeout => {
                error!("storage call timed out");
                self.to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
