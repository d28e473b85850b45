//! Shared handles every cron runs against.

use std::sync::Arc;

use {
    redis::aio::ConnectionManager,
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
    taskhub_config::{DatabaseConfig, TaskhubConfig},
    taskhub_queue::Queues,
    tracing::{info, warn},
};

use crate::{
    Result,
    lock::{Locker, MemoryLocker, RedisLocker},
    stats::{MemoryStats, RedisStats, StatsStore},
};

pub struct Runtime {
    pub config: TaskhubConfig,
    /// Identifies this process for per-instance locks and metric labels.
    pub instance_id: String,
    pub db: SqlitePool,
    pub queues: Queues,
    pub locker: Arc<dyn Locker>,
    pub stats: Arc<dyn StatsStore>,
}

/// Connect to the primary database and run migrations.
pub async fn open_pool(config: &DatabaseConfig) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;
    crate::run_migrations(&pool).await?;
    Ok(pool)
}

impl Runtime {
    /// Build the runtime from config. Without a `redis_url` the locks, stats
    /// and queues are process-local.
    pub async fn connect(config: TaskhubConfig) -> Result<Arc<Self>> {
        let db = open_pool(&config.database).await?;

        let rt = match config.redis_url.clone() {
            Some(url) => {
                let client = redis::Client::open(url.as_str())?;
                let conn = ConnectionManager::new(client).await?;
                info!("connected to redis");
                Self {
                    instance_id: config.resolved_instance_id(),
                    config,
                    db,
                    queues: Queues::redis(conn.clone()),
                    locker: Arc::new(RedisLocker::new(conn.clone())),
                    stats: Arc::new(RedisStats::new(conn)),
                }
            },
            None => {
                warn!("no redis_url configured, running in single-node mode");
                Self::in_memory(config, db)
            },
        };

        info!(instance_id = %rt.instance_id, "runtime ready");
        Ok(Arc::new(rt))
    }

    /// Runtime over `db` with process-local locks, stats and queues.
    #[must_use]
    pub fn in_memory(config: TaskhubConfig, db: SqlitePool) -> Self {
        Self {
            instance_id: config.resolved_instance_id(),
            config,
            db,
            queues: Queues::memory(),
            locker: Arc::new(MemoryLocker::new()),
            stats: Arc::new(MemoryStats::new()),
        }
    }

    #[must_use]
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    #[must_use]
    pub fn with_locker(mut self, locker: Arc<dyn Locker>) -> Self {
        self.locker = locker;
        self
    }

    #[must_use]
    pub fn with_stats(mut self, stats: Arc<dyn StatsStore>) -> Self {
        self.stats = stats;
        self
    }

    #[must_use]
    pub fn with_queues(mut self, queues: Queues) -> Self {
        self.queues = queues;
        self
    }
}
