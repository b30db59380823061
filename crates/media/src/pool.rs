//! Fixed-size CPU pool for variant generation.
//!
//! Resizing is CPU-bound and must not run on the async runtime. Jobs are
//! executed on a dedicated rayon pool and their results are handed back to
//! async callers through a oneshot channel.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::error::MediaError;
use crate::generator::{Variant, generate_variant};
use crate::preset::PresetTable;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("failed to build worker pool: {0}")]
    Build(String),

    /// The job panicked; the pool itself keeps running.
    #[error("worker panicked: {0}")]
    Panicked(String),

    /// The job was dropped before producing a result.
    #[error("worker pool closed before the job finished")]
    Closed,
}

/// Cloneable handle to a fixed-size pool of worker threads.
///
/// The threads stop once every handle is dropped and queued jobs have run.
#[derive(Clone)]
pub struct WorkerPool {
    threads: Arc<rayon::ThreadPool>,
    size: usize,
    in_flight: Arc<AtomicUsize>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl WorkerPool {
    /// Start `size` worker threads (at least one).
    pub fn new(size: usize) -> Result<Self, PoolError> {
        let size = size.max(1);
        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|i| format!("variant-worker-{i}"))
            .build()
            .map_err(|e| PoolError::Build(e.to_string()))?;
        debug!(size, "variant worker pool started");

        Ok(Self {
            threads: Arc::new(threads),
            size,
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs submitted but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Queue `job` on the pool without waiting for it.
    pub fn submit<F, T>(&self, job: F) -> PendingJob<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.fetch_add(1, Ordering::SeqCst);

        self.threads.spawn(move || {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(job)).map_err(|payload| {
                let message = panic_message(payload.as_ref());
                error!(error = %message, "variant worker job panicked");
                message
            });
            in_flight.fetch_sub(1, Ordering::SeqCst);
            // The caller may have stopped waiting; the result is discarded then.
            let _ = tx.send(outcome);
        });

        PendingJob { rx }
    }

    /// Run `job` on the pool and wait for its result.
    pub async fn run<F, T>(&self, job: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit(job).wait().await
    }

    /// Submit one variant generation.
    pub fn generate(
        &self,
        presets: Arc<PresetTable>,
        image: Arc<[u8]>,
        preset_name: impl Into<String>,
        quality: u8,
    ) -> PendingJob<Result<Variant, MediaError>> {
        let preset_name = preset_name.into();
        self.submit(move || generate_variant(&presets, &image, &preset_name, quality))
    }
}

/// Result of a submitted job.
#[derive(Debug)]
pub struct PendingJob<T> {
    rx: oneshot::Receiver<Result<T, String>>,
}

impl<T> PendingJob<T> {
    pub async fn wait(self) -> Result<T, PoolError> {
        match self.rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(PoolError::Panicked(message)),
            Err(_) => Err(PoolError::Closed),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
