//! Config schema types (database, shared store, metrics, crons).

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskhubConfig {
    /// Identifier of this process within the fleet. Scopes the locks of
    /// per-instance crons. Defaults to the host name.
    pub instance_id: Option<String>,
    pub database: DatabaseConfig,
    /// Shared store for locks, stats and queues. When unset everything runs
    /// against process-local backends (single-node mode).
    pub redis_url: Option<String>,
    pub metrics: MetricsConfig,
    pub crons: CronsConfig,
}

impl TaskhubConfig {
    /// The configured instance id, else the host name, else `"taskhub"`.
    #[must_use]
    pub fn resolved_instance_id(&self) -> String {
        if let Some(id) = self.instance_id.as_ref().filter(|id| !id.trim().is_empty()) {
            return id.clone();
        }
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "taskhub".into())
    }
}

/// Primary datastore settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://taskhub.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Labels attached to every exported metric.
    pub global_labels: HashMap<String, String>,
}

/// Scheduler settings shared by all crons plus per-cron tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CronsConfig {
    /// Names of registered crons that should not be started.
    pub disabled: Vec<String>,
    /// Default execution timeout for a single cron run.
    pub timeout_secs: u64,
    pub fires: FiresCronConfig,
    pub throttle: ThrottleCronConfig,
    pub queue_stats: QueueStatsCronConfig,
}

impl Default for CronsConfig {
    fn default() -> Self {
        Self {
            disabled: Vec::new(),
            timeout_secs: 300,
            fires: FiresCronConfig::default(),
            throttle: ThrottleCronConfig::default(),
            queue_stats: QueueStatsCronConfig::default(),
        }
    }
}

impl CronsConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.iter().any(|d| d == name)
    }
}

/// Contact fires drain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FiresCronConfig {
    pub interval_secs: u64,
    /// Rows fetched per page.
    pub fetch_size: usize,
    /// Fires per queued bulk task.
    pub batch_size: usize,
    /// Stop fetching new pages after this long. Must be below `interval_secs`.
    pub time_limit_secs: u64,
}

impl Default for FiresCronConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            fetch_size: 5000,
            batch_size: 100,
            time_limit_secs: 25,
        }
    }
}

/// Outbox-size throttling of the throttled queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleCronConfig {
    pub interval_secs: u64,
    /// Owners with at least this many outgoing messages pending are paused.
    pub outbox_threshold: i64,
}

impl Default for ThrottleCronConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            outbox_threshold: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStatsCronConfig {
    pub interval_secs: u64,
}

impl Default for QueueStatsCronConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}
