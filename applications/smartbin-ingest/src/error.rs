use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Why a raw broker payload could not be turned into a reading.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("envelope has no string at downlink_queued.frm_payload")]
    MissingFrmPayload,
    #[error("frm_payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("frm_payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("frm_payload is not valid JSON: {0}")]
    InnerJson(#[source] serde_json::Error),
    #[error("frm_payload decoded to JSON that is not an object")]
    InnerNotObject,
}

/// Why a decoded reading was refused.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing bin_id")]
    MissingBinId,
    #[error("bin_id is empty")]
    EmptyBinId,
    #[error("bin_id must be text or a number, got {0}")]
    InvalidBinId(serde_json::Value),
    #[error("{field} is not a number: {value}")]
    NotANumber {
        field: &'static str,
        value: serde_json::Value,
    },
    #[error("{field}={value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

impl ValidationError {
    /// The property the rejection is about, for structured logging.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingBinId
            | ValidationError::EmptyBinId
            | ValidationError::InvalidBinId(_) => "bin_id",
            ValidationError::NotANumber { field, .. } | ValidationError::OutOfRange { field, .. } => {
                field
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("DB error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request body: {0}")]
    InvalidBody(#[from] JsonRejection),
}

impl AppError {
    /// Decode and validation failures mean the message itself was bad; it is
    /// dropped and the caller moves on.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AppError::Decode(_) | AppError::Validation(_) | AppError::InvalidBody(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Decode(_) | AppError::Validation(_) | AppError::Persistence(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            // Keep axum's status: 400 for bad syntax, 415 for a wrong content type,
            // 422 for JSON that is not an object.
            AppError::InvalidBody(e) => (e.status(), e.body_text()),
            AppError::Db(e) => {
                tracing::error!(error = %e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": error_message }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
