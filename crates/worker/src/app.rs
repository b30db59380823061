use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{debug, instrument};

use tileworks_infra::variants::wire::{GenerateRequest, GenerateResponse, encode_response};
use tileworks_media::{PresetTable, WorkerPool};

use crate::errors::GenerateError;

/// Largest accepted request body (base64 inflates uploads by a third).
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct WorkerState {
    pool: WorkerPool,
    presets: Arc<PresetTable>,
    quality: u8,
}

impl WorkerState {
    pub fn new(pool: WorkerPool, presets: Arc<PresetTable>, quality: u8) -> Self {
        Self {
            pool,
            presets,
            quality,
        }
    }
}

pub fn build_app(state: WorkerState) -> Router {
    Router::new()
        .route("/generate-images", post(generate_images))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// Generate every requested target in parallel on the worker pool.
#[instrument(skip_all)]
async fn generate_images(
    State(state): State<WorkerState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, GenerateError> {
    if request.targets.is_empty() {
        return Err(GenerateError::BadRequest("targets must not be empty".into()));
    }
    for target in &request.targets {
        state.presets.get(target)?;
    }

    let image: Arc<[u8]> = request
        .image()
        .map_err(|e| GenerateError::BadRequest(format!("data is not valid base64: {e}")))?
        .into();

    let pending: Vec<_> = request
        .targets
        .iter()
        .map(|target| {
            state
                .pool
                .generate(Arc::clone(&state.presets), Arc::clone(&image), target.as_str(), state.quality)
        })
        .collect();

    let mut variants = Vec::with_capacity(pending.len());
    for job in pending {
        variants.push(job.wait().await??);
    }

    debug!(bytes = image.len(), targets = ?request.targets, "variants generated");
    Ok(Json(encode_response(&variants)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app() -> Router {
        build_app(WorkerState::new(
            WorkerPool::new(1).unwrap(),
            Arc::new(PresetTable::standard()),
            82,
        ))
    }

    async fn post_json(body: Value) -> (StatusCode, Value) {
        let response = app()
            .oneshot(
                Request::post("/generate-images")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_is_ok() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn bad_base64_is_rejected() {
        let (status, body) = post_json(json!({"data": "***", "targets": ["products"]})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");
    }

    #[tokio::test]
    async fn unknown_preset_is_rejected() {
        let (status, body) = post_json(json!({"data": "AAAA", "targets": ["banner"]})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unknown_preset");
    }

    #[tokio::test]
    async fn undecodable_image_is_unprocessable() {
        // "bm90IGFuIGltYWdl" is base64 for "not an image".
        let (status, body) = post_json(json!({"data": "bm90IGFuIGltYWdl", "targets": ["slides"]})).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "undecodable_image");
    }

    #[tokio::test]
    async fn empty_targets_are_rejected() {
        let (status, _) = post_json(json!({"data": "AAAA", "targets": []})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
