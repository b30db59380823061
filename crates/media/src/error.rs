//! Media error model.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The preset name is not in the table.
    #[error("unknown preset: {0}")]
    UnknownPreset(String),

    /// A preset definition is unusable (no dimensions, zero size, duplicate name).
    #[error("invalid preset {name}: {reason}")]
    InvalidPreset { name: String, reason: String },

    /// The preset table source could not be parsed.
    #[error("preset table parse error: {0}")]
    PresetTable(String),

    /// The input bytes are not a decodable image.
    #[error("image decode error: {0}")]
    Decode(String),

    #[error("image encode error: {0}")]
    Encode(String),
}

impl MediaError {
    pub fn invalid_preset(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPreset {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
