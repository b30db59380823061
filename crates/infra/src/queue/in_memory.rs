//! In-process task queue.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use super::{QueueError, Task, TaskQueue};

/// Bounded in-process queue backed by a tokio channel.
///
/// Only shares tasks between tasks of one process; use the Redis queue for
/// cross-process delivery.
#[derive(Debug)]
pub struct InMemoryTaskQueue {
    tx: mpsc::Sender<Task>,
    rx: Mutex<mpsc::Receiver<Task>>,
    capacity: usize,
    put_timeout: Duration,
}

impl InMemoryTaskQueue {
    pub fn new(capacity: usize, put_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
            put_timeout,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn put(&self, task: Task) -> Result<(), QueueError> {
        self.tx
            .send_timeout(task, self.put_timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => QueueError::Full {
                    capacity: self.capacity,
                },
                mpsc::error::SendTimeoutError::Closed(_) => QueueError::Closed,
            })
    }

    async fn get(&self, timeout: Duration) -> Result<Option<Task>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut rx = match tokio::time::timeout_at(deadline, self.rx.lock()).await {
            Ok(rx) => rx,
            Err(_) => return Ok(None),
        };
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(task)) => Ok(Some(task)),
            Ok(None) => Err(QueueError::Closed),
            Err(_) => Ok(None),
        }
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.capacity - self.tx.capacity())
    }
}
