//! Image variant generation and the thread pool it runs on.
//!
//! - [`preset`]: the named target boxes every uploaded image is resized into
//! - [`generator`]: pure bytes-in/bytes-out resizing
//! - [`pool`]: fixed-size CPU pool that runs generation off the async runtime

pub mod error;
pub mod generator;
pub mod pool;
pub mod preset;

pub use error::MediaError;
pub use generator::{DEFAULT_QUALITY, Variant, generate_variant};
pub use pool::{PendingJob, PoolError, WorkerPool};
pub use preset::{FitMode, Preset, PresetTable};
