//! Bounded variant-task queue.
//!
//! Producers (catalog operations) put [`Task`]s; the dispatcher in the worker
//! process gets them. The queue is the only structure shared between
//! processes, so the production implementation lives in Redis. An in-process
//! implementation with the same semantics backs tests and single-process runs.
//!
//! Queue clients are constructed explicitly at startup and passed to the code
//! that needs them; there is no global handle.
//!
//! ## Semantics
//!
//! - `put` waits up to the configured put timeout while the queue is full and
//!   then fails with [`QueueError::Full`]. Tasks are never silently dropped.
//! - `get` waits up to the given timeout and returns `Ok(None)` when nothing
//!   arrived. An empty queue is not an error.
//! - Delivery order is FIFO on a best-effort basis; duplicates are not removed.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::InMemoryTaskQueue;
#[cfg(feature = "redis")]
pub use self::redis::RedisTaskQueue;

/// One pending variant generation.
///
/// On the wire a task is the JSON array
/// `[input_reference, target_preset, quality, retry_count]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TaskTuple", into = "TaskTuple")]
pub struct Task {
    /// Path of the original upload the variant is generated from.
    pub input_reference: String,
    pub target_preset: String,
    pub quality: u8,
    pub retry_count: u32,
}

type TaskTuple = (String, String, u8, u32);

impl From<TaskTuple> for Task {
    fn from((input_reference, target_preset, quality, retry_count): TaskTuple) -> Self {
        Self {
            input_reference,
            target_preset,
            quality,
            retry_count,
        }
    }
}

impl From<Task> for TaskTuple {
    fn from(task: Task) -> Self {
        (
            task.input_reference,
            task.target_preset,
            task.quality,
            task.retry_count,
        )
    }
}

impl Task {
    pub fn new(input_reference: impl Into<String>, target_preset: impl Into<String>, quality: u8) -> Self {
        Self {
            input_reference: input_reference.into(),
            target_preset: target_preset.into(),
            quality,
            retry_count: 0,
        }
    }

    /// The task to enqueue after a failed attempt.
    pub fn retried(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    pub fn to_json(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, QueueError> {
        serde_json::from_str(raw).map_err(|e| QueueError::Deserialization(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue stayed at capacity for the whole put timeout.
    #[error("task queue is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("task queue is closed")]
    Closed,

    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue command error: {0}")]
    Command(String),

    #[error("task serialization error: {0}")]
    Serialization(String),

    #[error("task deserialization error: {0}")]
    Deserialization(String),

    /// A payload was removed from the queue but is not a task. It cannot be
    /// put back, so the consumer must dead-letter it.
    #[error("undecodable task payload {payload:?}: {reason}")]
    Undecodable { payload: String, reason: String },
}

/// Cross-process FIFO of variant tasks.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue, waiting while the queue is full up to the put timeout.
    async fn put(&self, task: Task) -> Result<(), QueueError>;

    /// Dequeue the next task, or `None` after `timeout`.
    ///
    /// A dequeued payload that does not decode is reported as
    /// [`QueueError::Undecodable`]; it is no longer in the queue.
    async fn get(&self, timeout: Duration) -> Result<Option<Task>, QueueError>;

    /// Approximate number of queued tasks.
    async fn len(&self) -> Result<usize, QueueError>;
}

/// Ask the worker to produce `targets` for an original already on disk.
///
/// This is the asynchronous alternative to calling the variant service and
/// waiting. The catalog operation does not learn when (or whether) the
/// variants appear; a `Full` queue is reported to the caller.
pub async fn enqueue_variants<Q>(
    queue: &Q,
    original: &Path,
    targets: &[&str],
    quality: u8,
) -> Result<usize, QueueError>
where
    Q: TaskQueue + ?Sized,
{
    let input = original.to_string_lossy();
    for target in targets {
        queue.put(Task::new(input.as_ref(), *target, quality)).await?;
    }
    debug!(input = %input, targets = ?targets, "variant tasks enqueued");
    Ok(targets.len())
}
