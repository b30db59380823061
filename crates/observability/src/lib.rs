//! Process-wide tracing setup shared by the tileworks binaries.

pub mod tracing;

pub use self::tracing::{LogFormat, init, init_with};
