//! Variant worker service: HTTP endpoint plus the queue dispatcher.

pub mod app;
pub mod errors;
