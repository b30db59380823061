//! Variant presets.
//!
//! A preset names a target box and how an image is fitted into it. The table
//! is read-only once built; callers share it behind an `Arc`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::MediaError;

/// How an image is placed into the target box.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    /// Shrink until the image fits inside the box. Aspect ratio is kept and
    /// nothing is cropped.
    Fit,
    /// Scale and crop (centered) so the image fills the box exactly.
    Cover,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    /// Target width; `None` keeps the source width.
    pub width: Option<u32>,
    /// Target height; `None` keeps the source height.
    pub height: Option<u32>,
    pub fit: FitMode,
}

impl Preset {
    pub fn new(name: impl Into<String>, width: Option<u32>, height: Option<u32>, fit: FitMode) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            fit,
        }
    }

    fn validate(&self) -> Result<(), MediaError> {
        if self.name.trim().is_empty() {
            return Err(MediaError::invalid_preset(&self.name, "empty name"));
        }
        match (self.width, self.height) {
            (None, None) => Err(MediaError::invalid_preset(
                &self.name,
                "at least one of width/height is required",
            )),
            (Some(0), _) | (_, Some(0)) => {
                Err(MediaError::invalid_preset(&self.name, "dimensions must be positive"))
            }
            _ => Ok(()),
        }
    }
}

/// Lookup table from preset name to preset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetTable {
    presets: BTreeMap<String, Preset>,
}

impl PresetTable {
    /// Build a table, rejecting invalid or duplicate presets.
    pub fn new(presets: impl IntoIterator<Item = Preset>) -> Result<Self, MediaError> {
        let mut map = BTreeMap::new();
        for preset in presets {
            preset.validate()?;
            if map.contains_key(&preset.name) {
                return Err(MediaError::invalid_preset(&preset.name, "duplicate name"));
            }
            map.insert(preset.name.clone(), preset);
        }
        Ok(Self { presets: map })
    }

    /// The storefront presets: catalog cards, collection banners, zoomable
    /// detail images and home-page slides.
    pub fn standard() -> Self {
        let presets = [
            Preset::new("products", Some(640), Some(400), FitMode::Cover),
            Preset::new("collections", Some(960), Some(480), FitMode::Cover),
            Preset::new("details", Some(2400), None, FitMode::Fit),
            Preset::new("slides", Some(1100), Some(825), FitMode::Cover),
        ];
        Self {
            presets: presets.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }

    /// Parse a JSON array of presets, e.g.
    /// `[{"name":"thumb","width":200,"height":200,"fit":"cover"}]`.
    pub fn from_json(raw: &str) -> Result<Self, MediaError> {
        let presets: Vec<Preset> =
            serde_json::from_str(raw).map_err(|e| MediaError::PresetTable(e.to_string()))?;
        Self::new(presets)
    }

    pub fn get(&self, name: &str) -> Result<&Preset, MediaError> {
        self.presets
            .get(name)
            .ok_or_else(|| MediaError::UnknownPreset(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.presets.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }
}

impl Default for PresetTable {
    fn default() -> Self {
        Self::standard()
    }
}
