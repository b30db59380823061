//! Handbook (lookup table) keys.
//!
//! Every catalog product references a set of small lookup tables: sizes,
//! colors, surfaces, producers, categories and box specs. Rows are identified
//! by their full natural key, so a `HandbookKey` is both the row's identity and
//! its content.

use serde::{Deserialize, Serialize};

use crate::measure::Measure;

/// Which handbook table a key belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandbookKind {
    Size,
    Color,
    Surface,
    Producer,
    Category,
    Box,
}

impl HandbookKind {
    pub const ALL: [HandbookKind; 6] = [
        HandbookKind::Size,
        HandbookKind::Color,
        HandbookKind::Surface,
        HandbookKind::Producer,
        HandbookKind::Category,
        HandbookKind::Box,
    ];

    /// Storage table name.
    pub fn table(self) -> &'static str {
        match self {
            HandbookKind::Size => "tile_sizes",
            HandbookKind::Color => "tile_colors",
            HandbookKind::Surface => "tile_surfaces",
            HandbookKind::Producer => "producers",
            HandbookKind::Category => "categories",
            HandbookKind::Box => "boxes",
        }
    }

    /// Key columns, in the order `HandbookKey::values` yields them.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            HandbookKind::Size => &["length", "width", "height"],
            HandbookKind::Color => &["color_name", "feature_name"],
            HandbookKind::Surface | HandbookKind::Producer | HandbookKind::Category => &["name"],
            HandbookKind::Box => &["weight", "area"],
        }
    }
}

impl core::fmt::Display for HandbookKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.table())
    }
}

/// A single key column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandbookValue {
    Text(String),
    Measure(Measure),
}

/// Natural key of one handbook row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandbookKey {
    Size {
        length: Measure,
        width: Measure,
        height: Measure,
    },
    Color {
        color_name: String,
        feature_name: String,
    },
    Surface {
        name: String,
    },
    Producer {
        name: String,
    },
    Category {
        name: String,
    },
    Box {
        weight: Measure,
        area: Measure,
    },
}

impl HandbookKey {
    pub fn kind(&self) -> HandbookKind {
        match self {
            HandbookKey::Size { .. } => HandbookKind::Size,
            HandbookKey::Color { .. } => HandbookKind::Color,
            HandbookKey::Surface { .. } => HandbookKind::Surface,
            HandbookKey::Producer { .. } => HandbookKind::Producer,
            HandbookKey::Category { .. } => HandbookKind::Category,
            HandbookKey::Box { .. } => HandbookKind::Box,
        }
    }

    /// Column values matching `self.kind().columns()`.
    pub fn values(&self) -> Vec<HandbookValue> {
        match self {
            HandbookKey::Size {
                length,
                width,
                height,
            } => vec![
                HandbookValue::Measure(*length),
                HandbookValue::Measure(*width),
                HandbookValue::Measure(*height),
            ],
            HandbookKey::Color {
                color_name,
                feature_name,
            } => vec![
                HandbookValue::Text(color_name.clone()),
                HandbookValue::Text(feature_name.clone()),
            ],
            HandbookKey::Surface { name }
            | HandbookKey::Producer { name }
            | HandbookKey::Category { name } => vec![HandbookValue::Text(name.clone())],
            HandbookKey::Box { weight, area } => {
                vec![HandbookValue::Measure(*weight), HandbookValue::Measure(*area)]
            }
        }
    }

    pub fn category(name: impl Into<String>) -> Self {
        HandbookKey::Category { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_line_up_with_columns_for_every_kind() {
        let keys = [
            HandbookKey::Size {
                length: Measure::whole(60),
                width: Measure::whole(60),
                height: Measure::whole(1),
            },
            HandbookKey::Color {
                color_name: "grey".into(),
                feature_name: "matte".into(),
            },
            HandbookKey::Surface { name: "glossy".into() },
            HandbookKey::Producer { name: "Kerama".into() },
            HandbookKey::category("porcelain"),
            HandbookKey::Box {
                weight: Measure::whole(25),
                area: Measure::whole(1),
            },
        ];

        for key in &keys {
            assert_eq!(key.values().len(), key.kind().columns().len(), "{key:?}");
        }
        let kinds: Vec<_> = keys.iter().map(HandbookKey::kind).collect();
        assert_eq!(kinds, HandbookKind::ALL.to_vec());
    }
}
