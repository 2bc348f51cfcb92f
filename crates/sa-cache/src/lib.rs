//! Two-tier cache store: distributed Redis primary + on-disk fallback
//! (`SPEC_FULL.md` §4.2, component C2).

mod disk;
mod lock;

pub use disk::DiskTier;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use sa_core::models::CacheMetadata;
use sa_core::traits::CacheStore;
use sa_core::{Error, Result};
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

const NAMESPACE: &str = "safetyamp";
const PAUSE_KEY: &str = "safetyamp:sync:paused";
const PAUSE_METADATA_KEY: &str = "safetyamp:sync:paused:metadata";

fn data_key(name: &str, sub_key: Option<&str>) -> String {
    match sub_key {
        Some(sub) => format!("{NAMESPACE}:{name}:{sub}"),
        None => format!("{NAMESPACE}:{name}"),
    }
}

fn metadata_key(name: &str, sub_key: Option<&str>) -> String {
    format!("{}:metadata", data_key(name, sub_key))
}

/// Tiered cache: Redis is consulted first; disk is the fallback on a miss or
/// a connectivity timeout. Every `save` fans out to both tiers.
pub struct TieredCacheStore {
    redis: Mutex<ConnectionManager>,
    disk: DiskTier,
}

impl TieredCacheStore {
    pub async fn connect(redis_url: &str, disk_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| Error::cache(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::cache(e.to_string()))?;
        Ok(Self {
            redis: Mutex::new(manager),
            disk: DiskTier::new(disk_dir),
        })
    }

    fn record_gauges(&self, name: &str, metadata: &CacheMetadata) {
        metrics::gauge!("safetyamp_cache_items_total", "cache" => name.to_string())
            .set(metadata.item_count as f64);
        metrics::gauge!("safetyamp_cache_last_updated_ts", "cache" => name.to_string())
            .set(metadata.last_updated_ts);
        metrics::gauge!("safetyamp_cache_ttl_seconds", "cache" => name.to_string())
            .set(metadata.ttl_s as f64);
    }

    /// Stampede-protected pull-through refresh (`SPEC_FULL.md` §4.2).
    ///
    /// The lock holder runs `loader` and populates the cache; non-holders
    /// spin with jittered sleep until either the value appears or their
    /// deadline (`min(30s, ttl_s/4)`) elapses, at which point they return
    /// whatever is currently cached (possibly `None`).
    pub async fn load_or_populate<F, Fut>(
        &self,
        name: &str,
        sub_key: Option<&str>,
        loader: F,
        ttl_s: u64,
        with_lock: bool,
    ) -> Result<Option<Value>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if let Some(existing) = self.get(name, sub_key).await? {
            return Ok(Some(existing));
        }

        if !with_lock {
            let value = loader().await?;
            self.save(name, value.clone(), ttl_s, "loader", sub_key).await?;
            return Ok(Some(value));
        }

        let cache_key = data_key(name, sub_key);
        let ttl_ms = lock::lock_ttl_ms(ttl_s);
        let guard = {
            let mut conn = self.redis.lock().await;
            lock::try_acquire(&mut conn, &cache_key, ttl_ms).await?
        };

        match guard {
            Some(guard) => {
                let result = loader().await;
                let value = match result {
                    Ok(value) => {
                        self.save(name, value.clone(), ttl_s, "loader", sub_key).await?;
                        Some(value)
                    }
                    Err(e) => {
                        tracing::warn!(cache = name, error = %e, "loader failed while holding populate lock");
                        None
                    }
                };
                let mut conn = self.redis.lock().await;
                guard.release(&mut conn).await?;
                Ok(value)
            }
            None => {
                let deadline = Duration::from_secs_f64((ttl_s as f64 / 4.0).min(30.0));
                let started = Instant::now();
                loop {
                    if let Some(value) = self.get(name, sub_key).await? {
                        return Ok(Some(value));
                    }
                    if started.elapsed() >= deadline {
                        return self.get(name, sub_key).await;
                    }
                    sleep(lock::jittered_spin_delay()).await;
                }
            }
        }
    }
}

#[async_trait]
impl CacheStore for TieredCacheStore {
    async fn get(&self, name: &str, sub_key: Option<&str>) -> Result<Option<Value>> {
        let key = data_key(name, sub_key);
        let primary: Result<Option<String>> = {
            let mut conn = self.redis.lock().await;
            tokio::time::timeout(Duration::from_secs(2), conn.get(&key))
                .await
                .map_err(|_| Error::cache("redis get timed out"))
                .and_then(|inner| inner.map_err(|e| Error::cache(e.to_string())))
        };
        match primary {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => tracing::warn!(cache = name, error = %e, "primary cache value unparsable"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(cache = name, error = %e, "primary cache miss/timeout, falling back to disk"),
        }
        self.disk.read(name, sub_key).await
    }

    async fn save(
        &self,
        name: &str,
        data: Value,
        ttl_s: u64,
        source: &str,
        sub_key: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().timestamp() as f64;
        let item_count = match &data {
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            _ => 1,
        };
        let prior = self.metadata(name, sub_key).await.ok().flatten();
        let metadata = CacheMetadata {
            created_ts: prior.as_ref().map(|m| m.created_ts).unwrap_or(now),
            last_updated_ts: now,
            item_count,
            ttl_s,
            source: source.to_string(),
            last_refresh: Some(now),
        };

        let key = data_key(name, sub_key);
        let meta_key = metadata_key(name, sub_key);
        let raw = serde_json::to_string(&data)?;
        let meta_raw = serde_json::to_string(&metadata)?;
        {
            let mut conn = self.redis.lock().await;
            let _: Result<()> = redis::pipe()
                .set_ex(&key, &raw, ttl_s.max(1))
                .set_ex(&meta_key, &meta_raw, ttl_s.max(1))
                .query_async(&mut *conn)
                .await
                .map_err(|e| Error::cache(e.to_string()));
        }
        self.disk.write(name, sub_key, &data, &metadata).await?;
        self.record_gauges(name, &metadata);
        Ok(())
    }

    async fn metadata(&self, name: &str, sub_key: Option<&str>) -> Result<Option<CacheMetadata>> {
        let key = metadata_key(name, sub_key);
        let primary: Option<String> = {
            let mut conn = self.redis.lock().await;
            conn.get(&key).await.unwrap_or(None)
        };
        if let Some(raw) = primary {
            if let Ok(meta) = serde_json::from_str(&raw) {
                return Ok(Some(meta));
            }
        }
        self.disk.read_metadata(name, sub_key).await
    }

    /// Invariant (iii): data present without a metadata twin means "expired".
    async fn is_valid(&self, name: &str, max_age_h: f64, sub_key: Option<&str>) -> Result<bool> {
        match self.metadata(name, sub_key).await? {
            Some(meta) => {
                let age_h = (Utc::now().timestamp() as f64 - meta.last_updated_ts) / 3600.0;
                Ok(age_h <= max_age_h)
            }
            None => Ok(false),
        }
    }

    async fn invalidate(&self, name: &str, sub_key: Option<&str>) -> Result<()> {
        let key = data_key(name, sub_key);
        let meta_key = metadata_key(name, sub_key);
        {
            let mut conn = self.redis.lock().await;
            let _: Result<()> = conn
                .del::<_, ()>((key, meta_key))
                .await
                .map_err(|e| Error::cache(e.to_string()));
        }
        self.disk.invalidate(name, sub_key).await
    }

    async fn should_refresh(&self, name: &str, refresh_interval_h: f64) -> Result<bool> {
        match self.metadata(name, None).await? {
            Some(CacheMetadata {
                last_refresh: Some(stamp),
                ..
            }) => {
                let elapsed_h = (Utc::now().timestamp() as f64 - stamp) / 3600.0;
                Ok(elapsed_h >= refresh_interval_h)
            }
            _ => Ok(true),
        }
    }

    async fn get_pause_flag(&self) -> Result<bool> {
        let mut conn = self.redis.lock().await;
        let raw: Option<String> = conn.get(PAUSE_KEY).await.unwrap_or(None);
        Ok(raw.as_deref() == Some("1"))
    }

    async fn set_pause_flag(&self, paused: bool, paused_by: Option<&str>) -> Result<()> {
        let metadata = serde_json::json!({
            "paused_by": paused_by,
            "paused_at": Utc::now().to_rfc3339(),
        });
        let mut conn = self.redis.lock().await;
        let _: Result<()> = conn
            .set::<_, _, ()>(PAUSE_KEY, if paused { "1" } else { "0" })
            .await
            .map_err(|e| Error::cache(e.to_string()));
        let _: Result<()> = conn
            .set::<_, _, ()>(PAUSE_METADATA_KEY, metadata.to_string())
            .await
            .map_err(|e| Error::cache(e.to_string()));
        Ok(())
    }

    async fn pause_metadata(&self) -> Result<Option<Value>> {
        let mut conn = self.redis.lock().await;
        let raw: Option<String> = conn.get(PAUSE_METADATA_KEY).await.unwrap_or(None);
        Ok(raw.and_then(|r| serde_json::from_str(&r).ok()))
    }
}

/// Shared handle type used by every crate that needs the cache.
pub type SharedCacheStore = Arc<TieredCacheStore>;
