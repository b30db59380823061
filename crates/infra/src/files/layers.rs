//! Logical layer names and their directories.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::FileStoreError;

pub const ORIGINAL_PRODUCT: &str = "original_product";
pub const PRODUCTS: &str = "products";
pub const DETAILS: &str = "details";
pub const ORIGINAL_COLLECTION: &str = "original_collection";
pub const COLLECTIONS: &str = "collections";
pub const ORIGINAL_SLIDE: &str = "original_slide";
pub const SLIDES: &str = "slides";

/// Maps layer names to directories below a common root.
///
/// Variant layers are named after the preset that produces them, so a
/// generated variant is stored with `save_by_layer(name, bytes, preset)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerTable {
    root: PathBuf,
    layers: BTreeMap<String, PathBuf>,
}

impl LayerTable {
    /// A table with no layers.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            layers: BTreeMap::new(),
        }
    }

    /// The storefront layout.
    pub fn standard(root: impl Into<PathBuf>) -> Self {
        Self::new(root)
            .with_layer(ORIGINAL_PRODUCT, "base/products")
            .with_layer(PRODUCTS, "products/catalog")
            .with_layer(DETAILS, "products/details")
            .with_layer(ORIGINAL_COLLECTION, "base/collections")
            .with_layer(COLLECTIONS, "collections/catalog")
            .with_layer(ORIGINAL_SLIDE, "base/slides")
            .with_layer(SLIDES, "slides")
    }

    pub fn with_layer(mut self, name: impl Into<String>, relative: impl AsRef<Path>) -> Self {
        self.layers
            .insert(name.into(), self.root.join(relative.as_ref()));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, layer: &str) -> Result<&Path, FileStoreError> {
        self.layers
            .get(layer)
            .map(PathBuf::as_path)
            .ok_or_else(|| FileStoreError::UnknownLayer(layer.to_string()))
    }

    /// Path of `name` inside `layer`.
    ///
    /// Only the final component of `name` is used, so a name can never point
    /// outside its layer directory.
    pub fn resolve(&self, name: &str, layer: &str) -> Result<PathBuf, FileStoreError> {
        let dir = self.dir(layer)?;
        let file = Path::new(name)
            .file_name()
            .ok_or_else(|| FileStoreError::InvalidName(name.to_string()))?;
        Ok(dir.join(file))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }
}
