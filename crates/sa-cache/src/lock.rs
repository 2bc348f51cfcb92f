//! Distributed lock used for stampede protection (`SPEC_FULL.md` §4.2).
//!
//! `SET NX PX` with a per-holder random token; release is a Lua script that
//! only deletes the key if the stored token still matches the caller's —
//! never an unconditional `DEL`, so a slow holder can't clobber a newer
//! holder's lock after its own TTL has already expired.

use redis::aio::ConnectionManager;
use sa_core::{Error, Result};
use uuid::Uuid;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

pub struct LockGuard {
    key: String,
    token: String,
}

/// Attempt to acquire `<cache_key>:lock`. Returns `None` if another holder
/// already owns it.
pub async fn try_acquire(
    conn: &mut ConnectionManager,
    cache_key: &str,
    ttl_ms: u64,
) -> Result<Option<LockGuard>> {
    let key = format!("{cache_key}:lock");
    let token = Uuid::new_v4().to_string();
    let acquired: bool = redis::cmd("SET")
        .arg(&key)
        .arg(&token)
        .arg("NX")
        .arg("PX")
        .arg(ttl_ms)
        .query_async::<_, Option<String>>(conn)
        .await
        .map(|v| v.is_some())
        .map_err(|e| Error::cache(e.to_string()))?;
    if acquired {
        Ok(Some(LockGuard { key, token }))
    } else {
        Ok(None)
    }
}

impl LockGuard {
    pub async fn release(&self, conn: &mut ConnectionManager) -> Result<()> {
        let script = redis::Script::new(RELEASE_SCRIPT);
        let _: i64 = script
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(conn)
            .await
            .map_err(|e| Error::cache(e.to_string()))?;
        Ok(())
    }
}

/// `clamp(ttl_s * 1000, 5_000, 30_000)`.
pub fn lock_ttl_ms(ttl_s: u64) -> u64 {
    (ttl_s.saturating_mul(1000)).clamp(5_000, 30_000)
}

/// Jittered spin sleep for non-lock-holders: uniform 100-500ms, capped by
/// `min(30s, ttl_s/4)` total wait (enforced by the caller's loop deadline).
pub fn jittered_spin_delay() -> std::time::Duration {
    use rand::Rng;
    let millis = rand::thread_rng().gen_range(100..=500);
    std::time::Duration::from_millis(millis)
}
