use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use tileworks_media::{MediaError, PoolError};

/// Failure of one `/generate-images` request.
#[derive(Debug)]
pub enum GenerateError {
    BadRequest(String),
    UnknownPreset(String),
    UndecodableImage(String),
    Worker(String),
}

impl From<MediaError> for GenerateError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::UnknownPreset(name) => GenerateError::UnknownPreset(name),
            MediaError::Decode(msg) => GenerateError::UndecodableImage(msg),
            other => GenerateError::Worker(other.to_string()),
        }
    }
}

impl From<PoolError> for GenerateError {
    fn from(err: PoolError) -> Self {
        GenerateError::Worker(err.to_string())
    }
}

impl IntoResponse for GenerateError {
    fn into_response(self) -> Response {
        match self {
            GenerateError::BadRequest(msg) => json_error(StatusCode::BAD_REQUEST, "bad_request", msg),
            GenerateError::UnknownPreset(name) => json_error(
                StatusCode::BAD_REQUEST,
                "unknown_preset",
                format!("unknown preset: {name}"),
            ),
            GenerateError::UndecodableImage(msg) => {
                json_error(StatusCode::UNPROCESSABLE_ENTITY, "undecodable_image", msg)
            }
            GenerateError::Worker(msg) => {
                tracing::error!(error = %msg, "variant worker failed");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "worker_error", msg)
            }
        }
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
