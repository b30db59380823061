//! Catalog domain building blocks.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! identifiers, fixed-point measures, handbook keys and the product/collection
//! attribute sets the orchestration layer writes.

pub mod catalog;
pub mod error;
pub mod handbook;
pub mod id;
pub mod measure;

pub use catalog::{
    BoxSpec, Collection, NewCollection, Product, ProductAttributes, ProductFilter, ProductUpdate,
    TileColor, TileSize,
};
pub use error::{DomainError, DomainResult};
pub use handbook::{HandbookKey, HandbookKind, HandbookValue};
pub use id::{CollectionId, ProductId};
pub use measure::Measure;
