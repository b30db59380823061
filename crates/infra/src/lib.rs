//! Infrastructure layer: storage, queue, variant sources and the catalog
//! operations built on them.

pub mod config;
pub mod dispatcher;
pub mod files;
pub mod queue;
pub mod services;
pub mod uow;
pub mod variants;
