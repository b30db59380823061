//! Dispatcher loop: pulls variant tasks off the queue and runs them.
//!
//! Each task moves `Pending -> Running -> {Completed | Requeued | DeadLettered}`.
//! A failed task is put back with `retry_count + 1` until it has been retried
//! `max_retries` times; after that it is logged at `error` and dropped. A
//! payload that was dequeued but does not decode is dead-lettered the same
//! way, without ever reaching the handler.
//!
//! Queue reads are awaited to completion (bounded by the poll timeout) rather
//! than raced against shutdown, since an abandoned blocking read would lose
//! the task it popped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tileworks_media::{MediaError, PoolError};

use crate::config::QueueConfig;
use crate::files::FileStoreError;
use crate::queue::{QueueError, Task, TaskQueue};

pub mod handler;

pub use handler::VariantTaskHandler;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Name for logging
    pub name: String,
    pub max_retries: u32,
    /// How long one queue read waits before the loop checks for shutdown
    pub poll_timeout: Duration,
    /// Maximum concurrently running tasks
    pub max_in_flight: usize,
    /// How long shutdown waits for running tasks before aborting them
    pub drain_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "variant-dispatcher".to_string(),
            max_retries: 3,
            poll_timeout: Duration::from_secs(1),
            max_in_flight: 8,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl DispatcherConfig {
    pub fn from_queue_config(queue: &QueueConfig) -> Self {
        Self {
            max_retries: queue.max_retries,
            poll_timeout: queue.poll_timeout,
            max_in_flight: queue.max_in_flight,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

/// Dispatcher runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatcherStats {
    pub tasks_processed: u64,
    pub tasks_completed: u64,
    pub tasks_requeued: u64,
    pub tasks_dead_lettered: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

#[derive(Debug)]
struct Counters {
    processed: AtomicU64,
    completed: AtomicU64,
    requeued: AtomicU64,
    dead_lettered: AtomicU64,
    running: AtomicUsize,
    started: Instant,
}

impl Counters {
    fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            running: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            tasks_processed: self.processed.load(Ordering::Relaxed),
            tasks_completed: self.completed.load(Ordering::Relaxed),
            tasks_requeued: self.requeued.load(Ordering::Relaxed),
            tasks_dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            current_running: self.running.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

/// Decrements the running count even if the handler panics.
struct Running<'a>(&'a AtomicUsize);

impl<'a> Running<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Where a task ended up after one attempt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Requeued,
    DeadLettered,
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task input unusable: {0}")]
    Input(String),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Files(#[from] FileStoreError),
}

/// Executes one task attempt.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, task: &Task) -> Result<(), TaskError>;
}

/// Handle to a spawned dispatcher.
#[derive(Debug)]
pub struct DispatcherHandle {
    shutdown: CancellationToken,
    join: JoinHandle<DispatcherStats>,
    counters: Arc<Counters>,
}

impl DispatcherHandle {
    pub fn stats(&self) -> DispatcherStats {
        self.counters.snapshot()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop polling, drain running tasks and return the final statistics.
    pub async fn shutdown(self) -> DispatcherStats {
        self.shutdown.cancel();
        match self.join.await {
            Ok(stats) => stats,
            Err(err) => {
                error!(error = %err, "dispatcher task failed");
                self.counters.snapshot()
            }
        }
    }
}

pub struct Dispatcher<Q: TaskQueue + ?Sized, H: TaskHandler> {
    queue: Arc<Q>,
    handler: Arc<H>,
    config: DispatcherConfig,
    counters: Arc<Counters>,
}

impl<Q, H> Dispatcher<Q, H>
where
    Q: TaskQueue + ?Sized + 'static,
    H: TaskHandler,
{
    pub fn new(queue: Arc<Q>, handler: Arc<H>, config: DispatcherConfig) -> Self {
        Self {
            queue,
            handler,
            config,
            counters: Arc::new(Counters::new()),
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        self.counters.snapshot()
    }

    /// Run the loop on the current runtime until cancelled.
    pub fn spawn(self) -> DispatcherHandle {
        let shutdown = CancellationToken::new();
        let counters = Arc::clone(&self.counters);
        let join = tokio::spawn(self.run(shutdown.clone()));
        DispatcherHandle {
            shutdown,
            join,
            counters,
        }
    }

    /// Poll, run and settle tasks until `shutdown` is cancelled, then drain.
    pub async fn run(self, shutdown: CancellationToken) -> DispatcherStats {
        let name = self.config.name.clone();
        let permits = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let mut running = JoinSet::new();

        info!(
            dispatcher = %name,
            max_in_flight = self.config.max_in_flight,
            max_retries = self.config.max_retries,
            "dispatcher started"
        );

        loop {
            while let Some(joined) = running.try_join_next() {
                log_join(&name, joined);
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            if shutdown.is_cancelled() {
                break;
            }

            let task = match self.queue.get(self.config.poll_timeout).await {
                Ok(Some(task)) => task,
                Ok(None) => continue,
                Err(QueueError::Undecodable { payload, reason }) => {
                    self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
                    error!(
                        dispatcher = %name,
                        payload = %payload,
                        error = %reason,
                        "undecodable task dead-lettered"
                    );
                    continue;
                }
                Err(err) => {
                    warn!(dispatcher = %name, error = %err, "queue read failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_timeout) => continue,
                    }
                }
            };

            debug!(
                dispatcher = %name,
                input = %task.input_reference,
                preset = %task.target_preset,
                retry = task.retry_count,
                "task picked up"
            );

            let queue = Arc::clone(&self.queue);
            let handler = Arc::clone(&self.handler);
            let counters = Arc::clone(&self.counters);
            let max_retries = self.config.max_retries;
            running.spawn(async move {
                let _permit = permit;
                process(queue.as_ref(), handler.as_ref(), &counters, task, max_retries).await
            });
        }

        info!(dispatcher = %name, in_flight = running.len(), "dispatcher stopping, draining");
        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            while let Some(joined) = running.join_next().await {
                log_join(&name, joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                dispatcher = %name,
                remaining = running.len(),
                "drain timeout elapsed, aborting running tasks"
            );
            running.abort_all();
            while running.join_next().await.is_some() {}
        }

        let stats = self.counters.snapshot();
        info!(dispatcher = %name, stats = ?stats, "dispatcher stopped");
        stats
    }
}

/// One attempt of `task`, including the requeue or dead-letter decision.
async fn process<Q, H>(
    queue: &Q,
    handler: &H,
    counters: &Counters,
    task: Task,
    max_retries: u32,
) -> TaskOutcome
where
    Q: TaskQueue + ?Sized,
    H: TaskHandler,
{
    counters.processed.fetch_add(1, Ordering::Relaxed);
    let result = {
        let _running = Running::enter(&counters.running);
        handler.handle(&task).await
    };

    let err = match result {
        Ok(()) => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            debug!(input = %task.input_reference, preset = %task.target_preset, "task completed");
            return TaskOutcome::Completed;
        }
        Err(err) => err,
    };

    if task.retry_count < max_retries {
        let next = task.retried();
        match queue.put(next).await {
            Ok(()) => {
                counters.requeued.fetch_add(1, Ordering::Relaxed);
                warn!(
                    input = %task.input_reference,
                    preset = %task.target_preset,
                    retry = task.retry_count + 1,
                    max_retries,
                    error = %err,
                    "task failed, requeued"
                );
                return TaskOutcome::Requeued;
            }
            Err(put_err) => {
                error!(
                    input = %task.input_reference,
                    preset = %task.target_preset,
                    error = %put_err,
                    "requeue failed"
                );
            }
        }
    }

    counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
    error!(
        input = %task.input_reference,
        preset = %task.target_preset,
        retry_count = task.retry_count,
        error = %err,
        "task dead-lettered"
    );
    TaskOutcome::DeadLettered
}

fn log_join(name: &str, joined: Result<TaskOutcome, JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            error!(dispatcher = %name, error = %err, "task handler panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryTaskQueue;
    use std::sync::atomic::AtomicU32;

    struct AlwaysFails {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TaskHandler for AlwaysFails {
        async fn handle(&self, _task: &Task) -> Result<(), TaskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(TaskError::Input("boom".into()))
        }
    }

    struct Succeeds;

    #[async_trait]
    impl TaskHandler for Succeeds {
        async fn handle(&self, _task: &Task) -> Result<(), TaskError> {
            Ok(())
        }
    }

    fn config() -> DispatcherConfig {
        DispatcherConfig::default()
            .with_max_retries(3)
            .with_poll_timeout(Duration::from_millis(20))
            .with_max_in_flight(2)
            .with_drain_timeout(Duration::from_secs(5))
    }

    async fn wait_for(handle: &DispatcherHandle, done: impl Fn(&DispatcherStats) -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !done(&handle.stats()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn always_failing_task_is_retried_then_dead_lettered_once() {
        let queue = Arc::new(InMemoryTaskQueue::new(10, Duration::from_millis(100)));
        let handler = Arc::new(AlwaysFails {
            calls: AtomicU32::new(0),
        });
        queue.put(Task::new("/tmp/1-0", "products", 82)).await.unwrap();

        let handle = Dispatcher::new(Arc::clone(&queue), Arc::clone(&handler), config()).spawn();
        wait_for(&handle, |s| s.tasks_dead_lettered == 1).await;
        let stats = handle.shutdown().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
        assert_eq!(stats.tasks_processed, 4);
        assert_eq!(stats.tasks_requeued, 3);
        assert_eq!(stats.tasks_dead_lettered, 1);
        assert_eq!(stats.tasks_completed, 0);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn successful_tasks_complete() {
        let queue = Arc::new(InMemoryTaskQueue::new(10, Duration::from_millis(100)));
        for preset in ["products", "details", "slides"] {
            queue.put(Task::new("/tmp/1-0", preset, 82)).await.unwrap();
        }

        let handle = Dispatcher::new(queue, Arc::new(Succeeds), config()).spawn();
        wait_for(&handle, |s| s.tasks_completed == 3).await;
        let stats = handle.shutdown().await;

        assert_eq!(stats.tasks_processed, 3);
        assert_eq!(stats.tasks_requeued, 0);
        assert_eq!(stats.current_running, 0);
    }

    /// Hands out one payload that does not decode, then one real task.
    struct GarbageThenTask {
        reads: AtomicU32,
    }

    #[async_trait]
    impl TaskQueue for GarbageThenTask {
        async fn put(&self, _task: Task) -> Result<(), QueueError> {
            Ok(())
        }

        async fn get(&self, _timeout: Duration) -> Result<Option<Task>, QueueError> {
            match self.reads.fetch_add(1, Ordering::SeqCst) {
                0 => Err(QueueError::Undecodable {
                    payload: "garbage".into(),
                    reason: "expected value at line 1 column 1".into(),
                }),
                1 => Ok(Some(Task::new("/tmp/1-0", "products", 82))),
                _ => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(None)
                }
            }
        }

        async fn len(&self) -> Result<usize, QueueError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn undecodable_payload_is_dead_lettered_without_pausing() {
        let queue = Arc::new(GarbageThenTask {
            reads: AtomicU32::new(0),
        });
        // A pause after the bad payload would delay the next task by 30s.
        let config = config().with_poll_timeout(Duration::from_secs(30));

        let handle = Dispatcher::new(queue, Arc::new(Succeeds), config).spawn();
        tokio::time::timeout(
            Duration::from_secs(5),
            wait_for(&handle, |s| s.tasks_completed == 1),
        )
        .await
        .unwrap();
        let stats = handle.shutdown().await;

        assert_eq!(stats.tasks_dead_lettered, 1);
        assert_eq!(stats.tasks_processed, 1);
        assert_eq!(stats.tasks_requeued, 0);
    }

    #[tokio::test]
    async fn requeue_into_a_full_queue_dead_letters() {
        let queue = InMemoryTaskQueue::new(1, Duration::from_millis(10));
        queue.put(Task::new("/tmp/blocker", "slides", 82)).await.unwrap();
        let counters = Counters::new();
        let handler = AlwaysFails {
            calls: AtomicU32::new(0),
        };

        let outcome = process(&queue, &handler, &counters, Task::new("/tmp/1-0", "products", 82), 3).await;

        assert_eq!(outcome, TaskOutcome::DeadLettered);
        assert_eq!(counters.snapshot().tasks_dead_lettered, 1);
    }

    #[tokio::test]
    async fn idle_dispatcher_shuts_down_promptly() {
        let queue = Arc::new(InMemoryTaskQueue::new(10, Duration::from_millis(100)));
        let handle = Dispatcher::new(queue, Arc::new(Succeeds), config()).spawn();

        let stats = tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
            .await
            .unwrap();
        assert_eq!(stats, DispatcherStats {
            uptime_secs: stats.uptime_secs,
            ..DispatcherStats::default()
        });
    }
}
