//! Version-history cache. Redis when `REDIS_URL` is configured, otherwise a
//! per-process map. Cache failures are logged and treated as misses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::questionnaire::dto::VersionHistoryItem;

pub const HISTORY_TTL: Duration = Duration::from_secs(300);

type LocalEntries = HashMap<String, (Instant, Vec<VersionHistoryItem>)>;

#[derive(Clone)]
enum Backend {
    Redis(redis::Client),
    Local(Arc<RwLock<LocalEntries>>),
}

#[derive(Clone)]
pub struct HistoryCache {
    backend: Backend,
}

impl HistoryCache {
    pub fn redis(client: redis::Client) -> Self {
        Self {
            backend: Backend::Redis(client),
        }
    }

    pub fn local() -> Self {
        Self {
            backend: Backend::Local(Arc::new(RwLock::new(HashMap::new()))),
        }
    }

    /// `version_history_{entity}_{name}`
    pub fn key(entity: &str, name: &str) -> String {
        format!("version_history_{entity}_{name}")
    }

    pub async fn get(&self, key: &str) -> Option<Vec<VersionHistoryItem>> {
        match &self.backend {
            Backend::Local(entries) => {
                let entries = entries.read().await;
                entries
                    .get(key)
                    .filter(|(stored_at, _)| stored_at.elapsed() < HISTORY_TTL)
                    .map(|(_, items)| items.clone())
            }
            Backend::Redis(client) => match redis_get(client, key).await {
                Ok(Some(raw)) => match serde_json::from_str(&raw) {
                    Ok(items) => Some(items),
                    Err(e) => {
                        warn!("Discarding unreadable cache entry {key}: {e}");
                        None
                    }
                },
                Ok(None) => None,
                Err(e) => {
                    warn!("Redis GET {key} failed: {e}");
                    None
                }
            },
        }
    }

    pub async fn set(&self, key: &str, items: &[VersionHistoryItem]) {
        match &self.backend {
            Backend::Local(entries) => {
                let mut entries = entries.write().await;
                entries.insert(key.to_string(), (Instant::now(), items.to_vec()));
            }
            Backend::Redis(client) => {
                let raw = match serde_json::to_string(items) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!("Could not serialize history for {key}: {e}");
                        return;
                    }
                };
                if let Err(e) = redis_set(client, key, &raw).await {
                    warn!("Redis SET {key} failed: {e}");
                }
            }
        }
    }

    pub async fn invalidate(&self, key: &str) {
        debug!("Invalidating {key}");
        match &self.backend {
            Backend::Local(entries) => {
                entries.write().await.remove(key);
            }
            Backend::Redis(client) => {
                if let Err(e) = redis_del(client, key).await {
                    warn!("Redis DEL {key} failed: {e}");
                }
            }
        }
    }
}

async fn redis_get(client: &redis::Client, key: &str) -> redis::RedisResult<Option<String>> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    redis::cmd("GET").arg(key).query_async(&mut conn).await
}

async fn redis_set(client: &redis::Client, key: &str, value: &str) -> redis::RedisResult<()> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    redis::cmd("SET")
        .arg(key)
        .arg(value)
        .arg("EX")
        .arg(HISTORY_TTL.as_secs())
        .query_async(&mut conn)
        .await
}

async fn redis_del(client: &redis::Client, key: &str) -> redis::RedisResult<()> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    redis::cmd("DEL").arg(key).query_async(&mut conn).await
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn item(version: i32) -> VersionHistoryItem {
        VersionHistoryItem {
            version,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            is_deleted: false,
        }
    }

    #[test]
    fn test_key_format() {
        assert_eq!(HistoryCache::key("question", "q1"), "version_history_question_q1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_entries_expire() {
        let cache = HistoryCache::local();
        cache.set("k", &[item(2), item(1)]).await;
        assert_eq!(cache.get("k").await.map(|v| v.len()), Some(2));

        tokio::time::advance(HISTORY_TTL + Duration::from_secs(1)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry() {
        let cache = HistoryCache::local();
        cache.set("k", &[item(1)]).await;
        cache.invalidate("k").await;
        assert!(cache.get("k").await.is_none());
    }
}
