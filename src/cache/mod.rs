use log::debug;
use redis::AsyncCommands;
use serde_json::Value;

const STATS_PREFIX: &str = "cache:stats";
const STATS_TTL_SECS: u64 = 60;

/// Caches a computed stats payload for the excluded dashboard layer.
pub async fn put_stats(
    client: &redis::Client,
    key_suffix: &str,
    value: &Value,
) -> Result<(), redis::RedisError> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    let payload = value.to_string();
    let _: () = conn
        .set_ex(format!("{STATS_PREFIX}:{key_suffix}"), payload, STATS_TTL_SECS)
        .await?;
    Ok(())
}

pub async fn get_stats(
    client: &redis::Client,
    key_suffix: &str,
) -> Result<Option<Value>, redis::RedisError> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    let raw: Option<String> = conn.get(format!("{STATS_PREFIX}:{key_suffix}")).await?;
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

/// Drops every cached stats entry. Runs unconditionally at the end of each
/// pipeline pass; stale dashboards are the only consequence of a failure
/// here, so callers log and move on.
pub async fn invalidate_stats(client: &redis::Client) -> Result<(), redis::RedisError> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    let keys: Vec<String> = conn.keys(format!("{STATS_PREFIX}:*")).await?;
    if !keys.is_empty() {
        debug!("[Cache] invalidating {} stats entries", keys.len());
        let _: usize = conn.del(keys).await?;
    }
    Ok(())
}
