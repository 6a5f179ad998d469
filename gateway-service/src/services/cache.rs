use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::CacheConfig;
use crate::models::Decision;

/// Stored in place of a decision for credentials that were explicitly denied.
pub const NEGATIVE_SENTINEL: &str = "unauthorized";

const SCAN_BATCH_SIZE: usize = 500;

/// A value held by the decision cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedDecision {
    Allow(Decision),
    Deny,
}

impl CachedDecision {
    pub fn encode(&self) -> Result<String, anyhow::Error> {
        match self {
            CachedDecision::Allow(decision) => Ok(serde_json::to_string(decision)?),
            CachedDecision::Deny => Ok(NEGATIVE_SENTINEL.to_string()),
        }
    }

    /// Values that are neither the sentinel nor a decision are treated as a miss.
    pub fn decode(key: &str, raw: &str) -> Option<Self> {
        if raw == NEGATIVE_SENTINEL {
            return Some(CachedDecision::Deny);
        }
        match serde_json::from_str::<Decision>(raw) {
            Ok(decision) => Some(CachedDecision::Allow(decision)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Ignoring unreadable cache entry");
                None
            }
        }
    }
}

/// Cache key for a (user, raw credential) pair. All keys of one account share
/// the `<user_id>:` prefix so they can be flushed together.
pub fn cache_key(user_id: &str, raw_credential: &str) -> String {
    format!("{}:{}", user_id, raw_credential)
}

/// Escape glob metacharacters so a SCAN MATCH pattern matches `prefix` literally.
pub fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
pub trait DecisionCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedDecision>, anyhow::Error>;
    async fn set(
        &self,
        key: &str,
        value: &CachedDecision,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error>;
    /// Delete every key starting with `prefix`, returning how many were removed.
    async fn flush_prefix(&self, prefix: &str) -> Result<u64, anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
    async fn disconnect(&self);
}

#[derive(Clone)]
pub struct RedisDecisionCache {
    manager: Arc<RwLock<Option<ConnectionManager>>>,
}

impl RedisDecisionCache {
    pub async fn connect(config: &CacheConfig) -> Result<Self, anyhow::Error> {
        tracing::info!(
            host = %config.host,
            port = config.port,
            db = config.db,
            "Connecting to decision cache"
        );
        let client = Client::open(config.connection_url())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get decision cache connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to decision cache: {}", e)
        })?;

        tracing::info!("Successfully connected to decision cache");

        Ok(Self {
            manager: Arc::new(RwLock::new(Some(manager))),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, anyhow::Error> {
        let conn = self.manager.read().await.clone();
        conn.ok_or_else(|| anyhow::anyhow!("Decision cache is disconnected"))
    }
}

#[async_trait]
impl DecisionCache for RedisDecisionCache {
    async fn get(&self, key: &str) -> Result<Option<CachedDecision>, anyhow::Error> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read decision cache: {}", e))?;

        Ok(raw.and_then(|raw| CachedDecision::decode(key, &raw)))
    }

    async fn set(
        &self,
        key: &str,
        value: &CachedDecision,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let encoded = value.encode()?;
        let mut conn = self.connection().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(encoded)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write decision cache: {}", e))
    }

    async fn flush_prefix(&self, prefix: &str) -> Result<u64, anyhow::Error> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", escape_glob(prefix));

        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH_SIZE)
                .query_async(&mut conn)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to scan decision cache: {}", e))?;

            if !keys.is_empty() {
                let removed: u64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to flush decision cache: {}", e))?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::debug!(prefix = %prefix, deleted, "Flushed decision cache prefix");
        Ok(deleted)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Decision cache health check failed: {}", e))
    }

    async fn disconnect(&self) {
        if self.manager.write().await.take().is_some() {
            tracing::info!("Disconnected from decision cache");
        }
    }
}

/// In-process cache used by tests. Stores encoded values exactly as Redis
/// would so the decode path is exercised.
pub struct InMemoryDecisionCache {
    entries: std::sync::Mutex<HashMap<String, (String, u64)>>,
    unavailable: AtomicBool,
    fail_writes: AtomicBool,
}

impl Default for InMemoryDecisionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDecisionCache {
    pub fn new() -> Self {
        Self {
            entries: std::sync::Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Simulate an unreachable backend.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Reject `set` while reads keep working.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), (value.to_string(), 0));
        }
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).map(|(value, _)| value.clone()))
    }

    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).map(|(_, ttl)| *ttl))
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn check_available(&self) -> Result<(), anyhow::Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Decision cache is unavailable"));
        }
        Ok(())
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, u64)>>, anyhow::Error> {
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock cache mutex poisoned: {}", e))
    }
}

#[async_trait]
impl DecisionCache for InMemoryDecisionCache {
    async fn get(&self, key: &str) -> Result<Option<CachedDecision>, anyhow::Error> {
        self.check_available()?;
        let raw = self.lock()?.get(key).map(|(value, _)| value.clone());
        Ok(raw.and_then(|raw| CachedDecision::decode(key, &raw)))
    }

    async fn set(
        &self,
        key: &str,
        value: &CachedDecision,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        self.check_available()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Decision cache rejected write"));
        }
        let encoded = value.encode()?;
        self.lock()?.insert(key.to_string(), (encoded, ttl_seconds));
        Ok(())
    }

    async fn flush_prefix(&self, prefix: &str) -> Result<u64, anyhow::Error> {
        self.check_available()?;
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.check_available()
    }

    async fn disconnect(&self) {
        self.set_unavailable(true);
    }
}
