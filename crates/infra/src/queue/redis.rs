//! Redis list-backed task queue (cross-process).
//!
//! ## Layout
//!
//! - **List key**: `tileworks:variant-tasks` by default; tasks are `RPUSH`ed
//!   and `BLPOP`ed, giving FIFO order across any number of producers and
//!   consumers.
//! - **Capacity**: enforced by a Lua script that checks `LLEN` and pushes in
//!   one atomic step, so concurrent producers cannot overshoot the bound.
//!
//! The `redis` client used here is synchronous; every command runs inside
//! `spawn_blocking` so the async runtime is never blocked on a socket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{instrument, warn};

use super::{QueueError, Task, TaskQueue};
use crate::config::{DEFAULT_QUEUE_CAPACITY, DEFAULT_QUEUE_KEY};

/// Pause between push attempts while the list is at capacity.
const FULL_BACKOFF: Duration = Duration::from_millis(50);

const BOUNDED_PUSH: &str = r#"
if redis.call('LLEN', KEYS[1]) < tonumber(ARGV[2]) then
  redis.call('RPUSH', KEYS[1], ARGV[1])
  return 1
end
return 0
"#;

#[derive(Debug, Clone)]
pub struct RedisTaskQueue {
    client: Arc<redis::Client>,
    key: String,
    capacity: usize,
    put_timeout: Duration,
}

impl RedisTaskQueue {
    /// Create a queue client.
    ///
    /// * `redis_url` - e.g. `redis://localhost:6379`
    /// * `key` - list key (default: `tileworks:variant-tasks`)
    /// * `capacity` - maximum queued tasks (default: 100)
    pub fn new(
        redis_url: impl AsRef<str>,
        key: Option<String>,
        capacity: Option<usize>,
        put_timeout: Duration,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            key: key.unwrap_or_else(|| DEFAULT_QUEUE_KEY.to_string()),
            capacity: capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY).max(1),
            put_timeout,
        })
    }

    pub fn from_config(config: &crate::config::QueueConfig) -> Result<Self, QueueError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| QueueError::Connection("no queue URL configured".to_string()))?;
        Self::new(
            url,
            Some(config.key.clone()),
            Some(config.capacity),
            config.put_timeout,
        )
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Run a blocking closure against a fresh connection.
    async fn with_connection<T, F>(&self, op: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(&mut redis::Connection, &str) -> Result<T, QueueError> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        let key = self.key.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = client
                .get_connection()
                .map_err(|e| QueueError::Connection(e.to_string()))?;
            op(&mut conn, &key)
        })
        .await
        .map_err(|e| QueueError::Command(format!("queue worker task failed: {e}")))?
    }

    async fn try_push(&self, payload: String) -> Result<bool, QueueError> {
        let capacity = self.capacity;
        self.with_connection(move |conn, key| {
            let pushed: i64 = redis::Script::new(BOUNDED_PUSH)
                .key(key)
                .arg(payload)
                .arg(capacity)
                .invoke(conn)
                .map_err(|e| QueueError::Command(e.to_string()))?;
            Ok(pushed == 1)
        })
        .await
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    #[instrument(skip(self, task), fields(key = %self.key, preset = %task.target_preset), err)]
    async fn put(&self, task: Task) -> Result<(), QueueError> {
        let payload = task.to_json()?;
        let deadline = tokio::time::Instant::now() + self.put_timeout;

        loop {
            if self.try_push(payload.clone()).await? {
                return Ok(());
            }
            if tokio::time::Instant::now() + FULL_BACKOFF > deadline {
                warn!(key = %self.key, capacity = self.capacity, "task queue full");
                return Err(QueueError::Full {
                    capacity: self.capacity,
                });
            }
            tokio::time::sleep(FULL_BACKOFF).await;
        }
    }

    async fn get(&self, timeout: Duration) -> Result<Option<Task>, QueueError> {
        // BLPOP accepts fractional seconds; 0 would block forever.
        let seconds = timeout.as_secs_f64().max(0.01);
        let popped = self
            .with_connection(move |conn, key| {
                let reply: Option<(String, String)> = redis::cmd("BLPOP")
                    .arg(key)
                    .arg(seconds)
                    .query(conn)
                    .map_err(|e| QueueError::Command(e.to_string()))?;
                Ok(reply)
            })
            .await?;

        popped.map(|(_key, payload)| decode_popped(payload)).transpose()
    }

    async fn len(&self) -> Result<usize, QueueError> {
        self.with_connection(|conn, key| {
            let len: usize = redis::cmd("LLEN")
                .arg(key)
                .query(conn)
                .map_err(|e| QueueError::Command(e.to_string()))?;
            Ok(len)
        })
        .await
    }
}

/// Decode a payload `BLPOP` already removed from the list.
fn decode_popped(payload: String) -> Result<Task, QueueError> {
    Task::from_json(&payload).map_err(|err| QueueError::Undecodable {
        payload,
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_urls() {
        let err = RedisTaskQueue::new("not a url", None, None, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, QueueError::Connection(_)));
    }

    #[test]
    fn defaults_key_and_capacity() {
        let queue =
            RedisTaskQueue::new("redis://127.0.0.1:6379", None, None, Duration::from_millis(10))
                .unwrap();
        assert_eq!(queue.key(), DEFAULT_QUEUE_KEY);
        assert_eq!(queue.capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn popped_garbage_keeps_its_payload() {
        let task = decode_popped(r#"["a.jpg","details",90,1]"#.to_string()).unwrap();
        assert_eq!(task.retry_count, 1);

        match decode_popped("garbage".to_string()) {
            Err(QueueError::Undecodable { payload, .. }) => assert_eq!(payload, "garbage"),
            other => panic!("expected Undecodable, got {other:?}"),
        }
    }
}
