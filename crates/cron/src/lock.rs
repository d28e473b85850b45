//! Mutual exclusion across instances through a shared store.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    redis::{Script, aio::ConnectionManager},
    tokio::{sync::Mutex, time::Instant},
};

use crate::Result;

/// Poll interval of [`Locker::acquire`] while waiting for a held lock.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Proof of lock ownership; required to release.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lock key for a cron. Per-instance crons get the instance id appended.
#[must_use]
pub fn lock_key(job: &str, cross_instance: bool, instance_id: &str) -> String {
    if cross_instance {
        format!("lock:{job}_lock")
    } else {
        format!("lock:{job}_lock:{instance_id}")
    }
}

#[async_trait]
pub trait Locker: Send + Sync {
    /// Take the lock if nobody holds it. The lock expires after `ttl`
    /// whether or not it is released.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>>;

    /// Release the lock if `token` still owns it. Releasing a lock that
    /// expired or was taken over is a no-op.
    async fn release(&self, key: &str, token: &LockToken) -> Result<()>;

    /// Keep trying for up to `retry`. A zero `retry` makes a single attempt.
    async fn acquire(&self, key: &str, ttl: Duration, retry: Duration) -> Result<Option<LockToken>> {
        let deadline = Instant::now() + retry;
        loop {
            if let Some(token) = self.try_acquire(key, ttl).await? {
                return Ok(Some(token));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(RETRY_INTERVAL.min(deadline - now)).await;
        }
    }
}

/// Process-local locks. Clones share the same lock table.
#[derive(Clone, Default)]
pub struct MemoryLocker {
    locks: Arc<Mutex<HashMap<String, (LockToken, Instant)>>>,
}

impl MemoryLocker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held by anyone.
    pub async fn is_held(&self, key: &str) -> bool {
        self.locks
            .lock()
            .await
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at > Instant::now())
    }
}

#[async_trait]
impl Locker for MemoryLocker {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>> {
        let mut locks = self.locks.lock().await;
        let now = Instant::now();
        if locks
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at > now)
        {
            return Ok(None);
        }
        let token = LockToken::generate();
        locks.insert(key.to_string(), (token.clone(), now + ttl));
        Ok(Some(token))
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<()> {
        let mut locks = self.locks.lock().await;
        if locks.get(key).is_some_and(|(owner, _)| owner == token) {
            locks.remove(key);
        }
        Ok(())
    }
}

/// Locks stored in Redis with `SET NX PX`.
pub struct RedisLocker {
    conn: ConnectionManager,
    release: Script,
}

impl RedisLocker {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            release: Script::new(
                r#"
                if redis.call('GET', KEYS[1]) == ARGV[1] then
                    return redis.call('DEL', KEYS[1])
                end
                return 0
                "#,
            ),
        }
    }
}

#[async_trait]
impl Locker for RedisLocker {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>> {
        let mut conn = self.conn.clone();
        let token = LockToken::generate();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(set.map(|_| token))
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .release
            .key(key)
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}
