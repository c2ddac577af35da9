use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use redis::AsyncCommands;
use thiserror::Error;

use crate::shared::models::UnifiedTicket;
use crate::shared::state::AppState;

/// The single named queue every channel feeds into.
pub const QUEUE_KEY: &str = "queue:ticket-analysis";

/// Pause before reconnecting after a transport-level failure.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("queue payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Producer handle over the redis list. LPUSH at the head, BRPOP at the
/// tail: FIFO with at-least-once delivery.
#[derive(Clone)]
pub struct TicketQueue {
    client: Arc<redis::Client>,
}

impl TicketQueue {
    pub fn new(client: Arc<redis::Client>) -> Self {
        Self { client }
    }

    pub async fn enqueue(&self, ticket: &UnifiedTicket) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(ticket)?;
        let _: i64 = conn.lpush(QUEUE_KEY, payload).await?;
        Ok(())
    }

    /// Atomic as a single pipelined push; either the whole batch lands or
    /// the call errors.
    pub async fn enqueue_batch(&self, tickets: &[UnifiedTicket]) -> Result<(), QueueError> {
        if tickets.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for ticket in tickets {
            pipe.lpush(QUEUE_KEY, serde_json::to_string(ticket)?).ignore();
        }
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    /// Queue depth probe for the ingestion layer.
    pub async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: usize = conn.llen(QUEUE_KEY).await?;
        Ok(len)
    }

    /// Blocking pop with a bounded timeout; `Ok(None)` means the wait
    /// elapsed. Opens a dedicated connection, since BRPOP occupies it for
    /// the whole wait.
    pub async fn dequeue_blocking(
        &self,
        timeout_secs: u64,
    ) -> Result<Option<UnifiedTicket>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        Self::pop_blocking(&mut conn, timeout_secs as f64).await
    }

    /// Worker-side pop over a connection the caller owns.
    pub(crate) async fn pop_blocking(
        conn: &mut redis::aio::MultiplexedConnection,
        timeout: f64,
    ) -> Result<Option<UnifiedTicket>, QueueError> {
        let popped: Option<(String, String)> = conn.brpop(QUEUE_KEY, timeout).await?;
        match popped {
            None => Ok(None),
            Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
        }
    }
}

/// Fixed-size pool of consumer loops. Singleton per process: `start` is a
/// logged no-op while the running flag is set.
pub struct WorkerPool;

impl WorkerPool {
    /// Spawns exactly `config.workers.concurrency` loops, each with its own
    /// redis connection (BRPOP occupies the connection it runs on).
    pub fn start<H, Fut>(state: Arc<AppState>, handler: H)
    where
        H: Fn(Arc<AppState>, UnifiedTicket) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if state
            .workers_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("[Queue] workers already running, skipping duplicate start");
            return;
        }

        let concurrency = state.config.workers.concurrency;
        info!("[Queue] starting {concurrency} analysis workers on \"{QUEUE_KEY}\"");
        for id in 0..concurrency {
            let state = Arc::clone(&state);
            let handler = handler.clone();
            tokio::spawn(worker_loop(id, state, handler));
        }
    }

    /// Cooperative shutdown: loops exit after their current blocking wait.
    /// In-flight handler invocations finish.
    pub fn stop(state: &AppState) {
        state.workers_running.store(false, Ordering::SeqCst);
        info!("[Queue] stop signalled");
    }
}

async fn worker_loop<H, Fut>(id: usize, state: Arc<AppState>, handler: H)
where
    H: Fn(Arc<AppState>, UnifiedTicket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let timeout = state.config.workers.pop_timeout_secs as f64;

    'reconnect: while state.workers_running.load(Ordering::SeqCst) {
        let mut conn = match state.redis.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(err) => {
                error!("[Worker-{id}] redis connect failed: {err}");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };
        info!("[Worker-{id}] listening");

        while state.workers_running.load(Ordering::SeqCst) {
            let ticket = match TicketQueue::pop_blocking(&mut conn, timeout).await {
                // Timeout: loop again so the running flag gets re-checked.
                Ok(None) => continue,
                Ok(Some(ticket)) => ticket,
                Err(QueueError::Payload(err)) => {
                    // A payload that cannot deserialize can never succeed;
                    // requeueing it would loop forever.
                    error!("[Worker-{id}] dropping undecodable payload: {err}");
                    continue;
                }
                Err(QueueError::Redis(err)) => {
                    error!("[Worker-{id}] BRPOP error: {err}");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue 'reconnect;
                }
            };

            if let Err(err) = handler(Arc::clone(&state), ticket.clone()).await {
                handle_failure(id, &state, ticket, err).await;
            }
        }
    }
    info!("[Worker-{id}] stopped");
}

/// Single-retry policy: first failure re-queues with the retry flag set, the
/// second is terminal and surfaces via logging only.
async fn handle_failure(id: usize, state: &AppState, mut ticket: UnifiedTicket, err: anyhow::Error) {
    let guid = ticket.guid_for_log().to_string();
    if ticket.was_retried() {
        error!("[Worker-{id}] ticket \"{guid}\" failed after retry, dropping: {err:#}");
        return;
    }

    error!("[Worker-{id}] handler error for ticket \"{guid}\": {err:#}");
    ticket.mark_retried();
    match state.queue().enqueue(&ticket).await {
        Ok(()) => info!("[Worker-{id}] ticket \"{guid}\" re-queued for retry"),
        Err(requeue_err) => {
            error!("[Worker-{id}] re-queue of \"{guid}\" failed, dropping: {requeue_err}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::storage::memory::MemoryStorage;

    async fn test_state() -> Option<Arc<AppState>> {
        let state = AppState::new(AppConfig::from_env(), Arc::new(MemoryStorage::new())).ok()?;
        // Probe; skip when no redis is around.
        state.redis.get_multiplexed_async_connection().await.ok()?;
        Some(Arc::new(state))
    }

    fn ticket(guid: &str) -> UnifiedTicket {
        UnifiedTicket {
            text: "test".to_string(),
            source: crate::shared::models::TicketSource::Chat,
            company_id: 1,
            guid: Some(guid.to_string()),
            segment: None,
            language: None,
            gender: None,
            birth_date: None,
            country: None,
            city: None,
            street: None,
            house: None,
            contact: None,
            status: None,
            images: Vec::new(),
            meta: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn batch_enqueue_is_counted_and_fifo() {
        let Some(state) = test_state().await else {
            println!("skipping - redis not available");
            return;
        };
        let queue = state.queue();

        // Drain anything a previous run left behind.
        let mut conn = state.redis.get_multiplexed_async_connection().await.unwrap();
        let _: i64 = conn.del(QUEUE_KEY).await.unwrap();

        let before = queue.len().await.unwrap();
        assert_eq!(before, 0);

        queue
            .enqueue_batch(&[ticket("q-1"), ticket("q-2")])
            .await
            .unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);

        let popped: Option<(String, String)> = conn.brpop(QUEUE_KEY, 1.0).await.unwrap();
        let (_, payload) = popped.unwrap();
        let first: UnifiedTicket = serde_json::from_str(&payload).unwrap();
        assert_eq!(first.guid.as_deref(), Some("q-1"));

        let _: i64 = conn.del(QUEUE_KEY).await.unwrap();
    }
}
