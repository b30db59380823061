//! Variant sources: where catalog operations get resized images from.
//!
//! - [`HttpVariantClient`]: calls the variant worker service and waits.
//! - [`LocalVariantSource`]: generates in-process on a [`WorkerPool`].
//!
//! Callers wrap each call in [`guarded`] so failures are logged the same way
//! everywhere before they abort the surrounding operation.
//!
//! [`WorkerPool`]: tileworks_media::WorkerPool

use std::future::Future;

use async_trait::async_trait;
use tracing::{error, warn};

use tileworks_media::Variant;

pub mod http;
pub mod local;
pub mod wire;

pub use http::HttpVariantClient;
pub use local::LocalVariantSource;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VariantSourceError {
    /// Connection refused, unreachable host or timeout.
    #[error("variant service unavailable: {0}")]
    Unavailable(String),

    #[error("variant service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response did not contain a decodable variant for every target.
    #[error("malformed variant response: {0}")]
    Malformed(String),

    #[error("variant generation failed: {0}")]
    Generation(String),

    #[error("invalid variant source configuration: {0}")]
    Configuration(String),
}

impl VariantSourceError {
    /// Failures of the service rather than of the image.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VariantSourceError::Unavailable(_) | VariantSourceError::Status { .. }
        )
    }
}

/// Produces one variant per requested preset, or fails as a whole.
#[async_trait]
pub trait VariantSource: Send + Sync {
    async fn generate(&self, image: &[u8], targets: &[&str]) -> Result<Vec<Variant>, VariantSourceError>;
}

/// Await `call`, logging a failure under `operation`.
///
/// The error is returned unchanged; nothing is swallowed.
pub async fn guarded<T, F>(operation: &'static str, call: F) -> Result<T, VariantSourceError>
where
    F: Future<Output = Result<T, VariantSourceError>>,
{
    let result = call.await;
    if let Err(err) = &result {
        if err.is_transient() {
            warn!(operation, error = %err, "variant service unreachable");
        } else {
            error!(operation, error = %err, "variant generation failed");
        }
    }
    result
}
