//! Catalog products and collections.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::handbook::HandbookKey;
use crate::id::{CollectionId, ProductId};
use crate::measure::Measure;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileSize {
    pub length: Measure,
    pub width: Measure,
    pub height: Measure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileColor {
    pub color_name: String,
    pub feature_name: String,
}

/// Packaging of a product: weight and covered area of one box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxSpec {
    pub weight: Measure,
    pub area: Measure,
}

/// Everything stored on a catalog row apart from its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAttributes {
    pub name: String,
    pub size: TileSize,
    pub color: TileColor,
    pub category: String,
    pub surface: Option<String>,
    pub producer: String,
    pub boxing: BoxSpec,
    pub boxes_count: u32,
}

impl ProductAttributes {
    /// Check the values a storage layer would otherwise reject with a less
    /// helpful message.
    pub fn validate(&self) -> DomainResult<()> {
        require_text("name", &self.name)?;
        require_text("color_name", &self.color.color_name)?;
        require_text("feature_name", &self.color.feature_name)?;
        require_text("category", &self.category)?;
        require_text("producer", &self.producer)?;
        if let Some(surface) = &self.surface {
            require_text("surface", surface)?;
        }

        for (field, value) in [
            ("length", self.size.length),
            ("width", self.size.width),
            ("box_weight", self.boxing.weight),
            ("box_area", self.boxing.area),
        ] {
            if value.is_zero() {
                return Err(DomainError::validation(format!("{field} must be positive")));
            }
        }

        if self.boxes_count == 0 {
            return Err(DomainError::validation("boxes_count must be at least 1"));
        }
        Ok(())
    }

    /// Handbook rows this product references, in insertion order.
    pub fn handbook_keys(&self) -> Vec<HandbookKey> {
        let mut keys = vec![
            HandbookKey::Size {
                length: self.size.length,
                width: self.size.width,
                height: self.size.height,
            },
            HandbookKey::Color {
                color_name: self.color.color_name.clone(),
                feature_name: self.color.feature_name.clone(),
            },
            HandbookKey::Producer {
                name: self.producer.clone(),
            },
            HandbookKey::category(self.category.clone()),
            HandbookKey::Box {
                weight: self.boxing.weight,
                area: self.boxing.area,
            },
        ];
        if let Some(surface) = &self.surface {
            keys.push(HandbookKey::Surface {
                name: surface.clone(),
            });
        }
        keys
    }
}

fn require_text(field: &str, value: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_file_safe(field: &str, value: &str) -> DomainResult<()> {
    if value.contains(['/', '\\', '\0']) {
        return Err(DomainError::validation(format!(
            "{field} must not contain '/', '\\' or NUL"
        )));
    }
    if matches!(value.trim(), "." | "..") {
        return Err(DomainError::validation(format!("{field} must not be {value:?}")));
    }
    Ok(())
}

/// A persisted catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    #[serde(flatten)]
    pub attributes: ProductAttributes,
}

/// Partial update of a product.
///
/// Composite handbook keys (size, color, box) may be changed one column at a
/// time; the missing columns come from the current row via
/// [`ProductUpdate::resolve_against`].
///
/// `surface` is the one nullable column: `None` keeps it, `Some(None)` clears
/// it. In JSON an absent field keeps it and `null` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub length: Option<Measure>,
    pub width: Option<Measure>,
    pub height: Option<Measure>,
    pub color_name: Option<String>,
    pub feature_name: Option<String>,
    pub category: Option<String>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub surface: Option<Option<String>>,
    pub producer: Option<String>,
    pub box_weight: Option<Measure>,
    pub box_area: Option<Measure>,
    pub boxes_count: Option<u32>,
}

impl ProductUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ProductUpdate::default()
    }

    /// Produce the complete new attribute set.
    ///
    /// Every composite key in the result is whole: a half-specified color or
    /// box takes its other half from `current`.
    pub fn resolve_against(&self, current: &ProductAttributes) -> ProductAttributes {
        fn pick<T: Clone>(new: &Option<T>, old: &T) -> T {
            new.clone().unwrap_or_else(|| old.clone())
        }

        ProductAttributes {
            name: pick(&self.name, &current.name),
            size: TileSize {
                length: pick(&self.length, &current.size.length),
                width: pick(&self.width, &current.size.width),
                height: pick(&self.height, &current.size.height),
            },
            color: TileColor {
                color_name: pick(&self.color_name, &current.color.color_name),
                feature_name: pick(&self.feature_name, &current.color.feature_name),
            },
            category: pick(&self.category, &current.category),
            surface: pick(&self.surface, &current.surface),
            producer: pick(&self.producer, &current.producer),
            boxing: BoxSpec {
                weight: pick(&self.box_weight, &current.boxing.weight),
                area: pick(&self.box_area, &current.boxing.area),
            },
            boxes_count: pick(&self.boxes_count, &current.boxes_count),
        }
    }
}

/// A present field, including an explicit `null`, becomes `Some`.
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Which products a delete applies to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProductFilter {
    All,
    ById(ProductId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCollection {
    pub name: String,
    pub category: String,
}

impl NewCollection {
    /// Name and category end up in a file name, so neither may contain a path
    /// separator or NUL, nor be `.` or `..`.
    pub fn validate(&self) -> DomainResult<()> {
        for (field, value) in [("name", &self.name), ("category", &self.category)] {
            require_text(field, value)?;
            require_file_safe(field, value)?;
        }
        Ok(())
    }

    /// File name of the collection image.
    pub fn image_name(&self) -> String {
        format!("{}-{}", self.name, self.category)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub name: String,
    pub category: String,
    pub image_path: String,
}
