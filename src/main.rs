use std::sync::Arc;

use dotenvy::dotenv;
use log::info;

use ticketserver::analysis;
use ticketserver::config::AppConfig;
use ticketserver::queue::WorkerPool;
use ticketserver::shared::state::AppState;
use ticketserver::storage::memory::MemoryStorage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = AppConfig::from_env();
    info!(
        "ticketserver starting (redis: {}, model: {}, workers: {})",
        config.redis_url, config.llm.model, config.workers.concurrency
    );

    // The relational backend is wired in by the embedding service; standalone
    // runs get the in-memory one.
    let storage = Arc::new(MemoryStorage::new());
    let state = Arc::new(AppState::new(config, storage)?);

    match state.queue().len().await {
        Ok(depth) => info!("queue depth at startup: {depth}"),
        Err(err) => info!("queue not reachable yet: {err}"),
    }

    WorkerPool::start(Arc::clone(&state), analysis::handle);

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    WorkerPool::stop(&state);

    // Let loops notice the flag after their current blocking wait.
    let grace = state.config.workers.pop_timeout_secs + 1;
    tokio::time::sleep(std::time::Duration::from_secs(grace)).await;
    Ok(())
}
