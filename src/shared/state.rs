use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::queue::TicketQueue;
use crate::storage::Storage;

/// Process-wide pipeline context, constructed once at startup and passed by
/// handle everywhere. Owns the redis client, the shared HTTP client, the
/// storage backend, and the worker-pool running flag. There is no
/// module-level mutable state anywhere in the pipeline.
pub struct AppState {
    pub config: AppConfig,
    pub redis: Arc<redis::Client>,
    pub storage: Arc<dyn Storage>,
    pub http: reqwest::Client,
    pub workers_running: AtomicBool,
}

impl AppState {
    pub fn new(config: AppConfig, storage: Arc<dyn Storage>) -> Result<Self, redis::RedisError> {
        let redis = Arc::new(redis::Client::open(config.redis_url.as_str())?);
        Ok(Self {
            config,
            redis,
            storage,
            http: reqwest::Client::new(),
            workers_running: AtomicBool::new(false),
        })
    }

    /// Producer-side queue handle. Workers open their own connections; this
    /// one is safe to share with the ingestion layer.
    pub fn queue(&self) -> TicketQueue {
        TicketQueue::new(Arc::clone(&self.redis))
    }
}
