//! HTTP client for the variant worker service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tracing::{debug, instrument};

use tileworks_media::Variant;

use super::wire::{GENERATE_PATH, GenerateRequest, GenerateResponse, decode_response};
use super::{VariantSource, VariantSourceError};

/// Calls `POST {base}/generate-images` and waits for all variants.
#[derive(Debug, Clone)]
pub struct HttpVariantClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpVariantClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, VariantSourceError> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)
            .and_then(|url| url.join(GENERATE_PATH))
            .map_err(|e| VariantSourceError::Configuration(format!("{base_url:?}: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VariantSourceError::Configuration(e.to_string()))?;

        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl VariantSource for HttpVariantClient {
    #[instrument(skip(self, image), fields(endpoint = %self.endpoint, bytes = image.len()))]
    async fn generate(&self, image: &[u8], targets: &[&str]) -> Result<Vec<Variant>, VariantSourceError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&GenerateRequest::new(image, targets))
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VariantSourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|e| VariantSourceError::Malformed(e.to_string()))?;
        let variants = decode_response(payload, targets)?;
        debug!(count = variants.len(), "variants received");
        Ok(variants)
    }
}

fn classify(err: reqwest::Error) -> VariantSourceError {
    if err.is_decode() {
        VariantSourceError::Malformed(err.to_string())
    } else {
        VariantSourceError::Unavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_joined_onto_base_url() {
        let client = HttpVariantClient::new("http://worker:8090", Duration::from_secs(1)).unwrap();
        assert_eq!(client.endpoint().as_str(), "http://worker:8090/generate-images");

        let nested = HttpVariantClient::new("http://gw/media/", Duration::from_secs(1)).unwrap();
        assert_eq!(nested.endpoint().as_str(), "http://gw/media/generate-images");
    }

    #[test]
    fn invalid_base_url_is_a_configuration_error() {
        assert!(matches!(
            HttpVariantClient::new("not a url", Duration::from_secs(1)),
            Err(VariantSourceError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_service_is_transient() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let client = HttpVariantClient::new("http://127.0.0.1:9/", Duration::from_secs(2)).unwrap();
        let err = client.generate(b"img", &["products"]).await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }
}
