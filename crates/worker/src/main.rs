use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use tileworks_infra::config::PipelineConfig;
use tileworks_infra::dispatcher::{Dispatcher, DispatcherConfig, DispatcherHandle, VariantTaskHandler};
use tileworks_infra::files::{FileStore, LayerTable};
use tileworks_infra::queue::RedisTaskQueue;
use tileworks_media::WorkerPool;
use tileworks_worker::app::{WorkerState, build_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tileworks_observability::init();

    let config = PipelineConfig::from_env().context("reading configuration")?;
    let pool = WorkerPool::new(config.workers).context("starting worker pool")?;
    let presets = Arc::new(config.presets.clone());

    let dispatcher = start_dispatcher(&config, &pool, &presets)?;
    let app = build_app(WorkerState::new(pool, presets, config.quality));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    info!(addr = %listener.local_addr()?, workers = config.workers, "variant worker listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;

    if let Some(dispatcher) = dispatcher {
        let stats = dispatcher.shutdown().await;
        info!(stats = ?stats, "dispatcher drained");
    }
    info!("variant worker stopped");
    Ok(())
}

fn start_dispatcher(
    config: &PipelineConfig,
    pool: &WorkerPool,
    presets: &Arc<tileworks_media::PresetTable>,
) -> anyhow::Result<Option<DispatcherHandle>> {
    if config.queue.url.is_none() {
        info!("TILEWORKS_QUEUE_URL not set, queue consumer disabled");
        return Ok(None);
    }

    let queue = Arc::new(RedisTaskQueue::from_config(&config.queue).context("connecting to task queue")?);
    let files = FileStore::new(LayerTable::standard(&config.image_root));
    let handler = Arc::new(VariantTaskHandler::new(pool.clone(), Arc::clone(presets), files));
    let dispatcher = Dispatcher::new(queue, handler, DispatcherConfig::from_queue_config(&config.queue));

    info!(key = %config.queue.key, "queue consumer started");
    Ok(Some(dispatcher.spawn()))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
