//! JSON contract of `POST /generate-images`.
//!
//! Request: `{"data": "<base64 image>", "targets": ["products", "details"]}`.
//! Response: `{"products": "<base64 jpeg>", "details": "<base64 jpeg>"}`,
//! exactly one entry per requested target.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use tileworks_media::Variant;

use super::VariantSourceError;

pub const GENERATE_PATH: &str = "generate-images";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub data: String,
    pub targets: Vec<String>,
}

/// Preset name -> base64 variant bytes.
pub type GenerateResponse = BTreeMap<String, String>;

impl GenerateRequest {
    pub fn new(image: &[u8], targets: &[&str]) -> Self {
        Self {
            data: STANDARD.encode(image),
            targets: targets.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn image(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.data)
    }
}

pub fn encode_response(variants: &[Variant]) -> GenerateResponse {
    variants
        .iter()
        .map(|v| (v.preset_name.clone(), STANDARD.encode(&v.bytes)))
        .collect()
}

/// Decode a response, in `targets` order. Every target must be present.
pub fn decode_response(
    mut response: GenerateResponse,
    targets: &[&str],
) -> Result<Vec<Variant>, VariantSourceError> {
    targets
        .iter()
        .map(|target| {
            let encoded = response.remove(*target).ok_or_else(|| {
                VariantSourceError::Malformed(format!("missing variant for {target}"))
            })?;
            let bytes = STANDARD.decode(encoded).map_err(|e| {
                VariantSourceError::Malformed(format!("variant {target} is not base64: {e}"))
            })?;
            Ok(Variant {
                preset_name: target.to_string(),
                bytes,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_contract_shape() {
        let req = GenerateRequest::new(b"\x89PNG", &["products", "details"]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["data"], "iVBORw==");
        assert_eq!(json["targets"], serde_json::json!(["products", "details"]));
        assert_eq!(req.image().unwrap(), b"\x89PNG");
    }

    #[test]
    fn decode_requires_every_target() {
        let variants = vec![Variant {
            preset_name: "products".into(),
            bytes: vec![1, 2, 3],
        }];
        let response = encode_response(&variants);

        assert_eq!(decode_response(response.clone(), &["products"]).unwrap(), variants);
        assert!(matches!(
            decode_response(response, &["products", "details"]),
            Err(VariantSourceError::Malformed(msg)) if msg.contains("details")
        ));
    }

    #[test]
    fn decode_rejects_bad_base64() {
        let mut response = GenerateResponse::new();
        response.insert("slides".into(), "***".into());
        assert!(matches!(
            decode_response(response, &["slides"]),
            Err(VariantSourceError::Malformed(_))
        ));
    }
}
