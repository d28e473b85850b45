//! Redis-backed fair queue.
//!
//! Key layout for a queue named `throttled`:
//!
//! - `tasks:{throttled}:queued`  zset of owners holding queued tasks, scored by active count
//! - `tasks:{throttled}:active`  hash of owner → active task count
//! - `tasks:{throttled}:paused`  set of paused owners
//! - `tasks:{throttled}:<owner>/1` and `/0`  high and default priority task lists
//!
//! The `{name}` hash tag keeps every key of a queue in one cluster slot, and
//! each script is handed every key it touches through `KEYS`.

use {
    async_trait::async_trait,
    redis::{AsyncCommands, Pipeline, Script, aio::ConnectionManager},
};

use crate::{
    Error, Result,
    queue::{FairQueue, OwnerId, Priority, Task},
};

mod scripts {
    use redis::Script;

    /// KEYS: queued, active, lane. ARGV: owner, task.
    pub fn push() -> Script {
        Script::new(
            r#"
            redis.call('RPUSH', KEYS[3], ARGV[2])
            local active = tonumber(redis.call('HGET', KEYS[2], ARGV[1]) or '0')
            redis.call('ZADD', KEYS[1], 'NX', active, ARGV[1])
            return 1
            "#,
        )
    }

    /// KEYS: queued, paused. Owners with queued work that are not paused,
    /// fewest active first.
    pub fn candidates() -> Script {
        Script::new(
            r#"
            local ready = {}
            for _, owner in ipairs(redis.call('ZRANGE', KEYS[1], 0, -1)) do
                if redis.call('SISMEMBER', KEYS[2], owner) == 0 then
                    table.insert(ready, owner)
                end
            end
            return ready
            "#,
        )
    }

    /// KEYS: queued, active, paused, high lane, default lane. ARGV: owner.
    pub fn take() -> Script {
        Script::new(
            r#"
            if redis.call('SISMEMBER', KEYS[3], ARGV[1]) == 1 then
                return false
            end
            local task = redis.call('LPOP', KEYS[4])
            if not task then
                task = redis.call('LPOP', KEYS[5])
            end
            if not task then
                redis.call('ZREM', KEYS[1], ARGV[1])
                return false
            end
            redis.call('HINCRBY', KEYS[2], ARGV[1], 1)
            if redis.call('LLEN', KEYS[4]) + redis.call('LLEN', KEYS[5]) == 0 then
                redis.call('ZREM', KEYS[1], ARGV[1])
            else
                redis.call('ZINCRBY', KEYS[1], 1, ARGV[1])
            end
            return task
            "#,
        )
    }

    /// KEYS: queued, active. ARGV: owner.
    pub fn done() -> Script {
        Script::new(
            r#"
            local active = redis.call('HINCRBY', KEYS[2], ARGV[1], -1)
            if active <= 0 then
                redis.call('HDEL', KEYS[2], ARGV[1])
            end
            if redis.call('ZSCORE', KEYS[1], ARGV[1]) then
                redis.call('ZADD', KEYS[1], 'XX', math.max(active, 0), ARGV[1])
            end
            return 1
            "#,
        )
    }
}

/// Key names of one queue.
#[derive(Debug, Clone)]
struct Keys {
    name: String,
}

impl Keys {
    fn key(&self, suffix: &str) -> String {
        format!("tasks:{{{}}}:{suffix}", self.name)
    }

    fn queued(&self) -> String {
        self.key("queued")
    }

    fn active(&self) -> String {
        self.key("active")
    }

    fn paused(&self) -> String {
        self.key("paused")
    }

    fn lane(&self, owner: OwnerId, priority: Priority) -> String {
        let lane = match priority {
            Priority::High => 1,
            Priority::Default => 0,
        };
        self.key(&format!("{owner}/{lane}"))
    }

    /// Keys handed to the take script for `owner`, in `KEYS` order.
    fn take(&self, owner: OwnerId) -> [String; 5] {
        [
            self.queued(),
            self.active(),
            self.paused(),
            self.lane(owner, Priority::High),
            self.lane(owner, Priority::Default),
        ]
    }

    /// Both lane lengths of every owner, in one round trip.
    fn size_pipe(&self, owners: &[OwnerId]) -> Pipeline {
        let mut pipe = redis::pipe();
        for &owner in owners {
            pipe.cmd("LLEN").arg(self.lane(owner, Priority::High));
            pipe.cmd("LLEN").arg(self.lane(owner, Priority::Default));
        }
        pipe
    }
}

pub struct RedisFairQueue {
    keys: Keys,
    conn: ConnectionManager,
    push: Script,
    candidates: Script,
    take: Script,
    done: Script,
}

impl RedisFairQueue {
    pub fn new(name: impl Into<String>, conn: ConnectionManager) -> Self {
        Self {
            keys: Keys { name: name.into() },
            conn,
            push: scripts::push(),
            candidates: scripts::candidates(),
            take: scripts::take(),
            done: scripts::done(),
        }
    }

    fn parse_owners(&self, raw: Vec<String>) -> Result<Vec<OwnerId>> {
        raw.into_iter()
            .map(|s| {
                s.parse::<OwnerId>()
                    .map_err(|e| Error::malformed(&self.keys.name, format!("owner id {s:?}: {e}")))
            })
            .collect()
    }

    async fn take_from(&self, owner: OwnerId) -> Result<Option<Task>> {
        let mut conn = self.conn.clone();
        let mut invocation = self.take.prepare_invoke();
        for key in self.keys.take(owner) {
            invocation.key(key);
        }
        let raw: Option<String> = invocation.arg(owner).invoke_async(&mut conn).await?;
        raw.map(|body| serde_json::from_str(&body).map_err(Error::from))
            .transpose()
    }
}

#[async_trait]
impl FairQueue for RedisFairQueue {
    fn name(&self) -> &str {
        &self.keys.name
    }

    async fn push(&self, task: &Task, priority: Priority) -> Result<()> {
        let mut conn = self.conn.clone();
        let body = serde_json::to_string(task)?;
        let _: i64 = self
            .push
            .key(self.keys.queued())
            .key(self.keys.active())
            .key(self.keys.lane(task.owner_id, priority))
            .arg(task.owner_id)
            .arg(body)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Task>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = self
            .candidates
            .key(self.keys.queued())
            .key(self.keys.paused())
            .invoke_async(&mut conn)
            .await?;

        // A candidate may be drained, paused or popped by another consumer
        // in between; the take script re-checks and we move on.
        for owner in self.parse_owners(raw)? {
            if let Some(task) = self.take_from(owner).await? {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    async fn done(&self, owner: OwnerId) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .done
            .key(self.keys.queued())
            .key(self.keys.active())
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn pause(&self, owner: OwnerId) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.sadd(self.keys.paused(), owner).await?;
        Ok(())
    }

    async fn resume(&self, owner: OwnerId) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.srem(self.keys.paused(), owner).await?;
        Ok(())
    }

    async fn paused(&self) -> Result<Vec<OwnerId>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.smembers(self.keys.paused()).await?;
        let mut owners = self.parse_owners(raw)?;
        owners.sort_unstable();
        Ok(owners)
    }

    async fn owners(&self) -> Result<Vec<OwnerId>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.zrange(self.keys.queued(), 0, -1).await?;
        let mut owners = self.parse_owners(raw)?;
        owners.sort_unstable();
        Ok(owners)
    }

    async fn size(&self) -> Result<usize> {
        let owners = self.owners().await?;
        if owners.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let lengths: Vec<usize> = self.keys.size_pipe(&owners).query_async(&mut conn).await?;
        Ok(lengths.into_iter().sum())
    }
}
