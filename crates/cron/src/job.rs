//! What a cron runs and how it is configured.

use std::{future::Future, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    tokio_util::sync::CancellationToken,
};

use crate::{runtime::Runtime, schedule::Cadence};

/// Default execution deadline of a cron.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Free-form results of one run, recorded as the cron's `last_result`.
pub type RunResults = serde_json::Map<String, serde_json::Value>;

/// Build a [`RunResults`] from key/value pairs.
pub fn results<const N: usize>(pairs: [(&str, serde_json::Value); N]) -> RunResults {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Handed to every run.
#[derive(Clone)]
pub struct JobContext {
    pub rt: Arc<Runtime>,
    /// Cancelled when the run passes its deadline. Jobs should check it
    /// between units of work; they are never aborted.
    pub cancel: CancellationToken,
    pub started_at: DateTime<Utc>,
}

#[async_trait]
pub trait CronJob: Send + Sync {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<RunResults>;
}

struct FnJob<F>(F);

#[async_trait]
impl<F, Fut> CronJob for FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<RunResults>> + Send,
{
    async fn run(&self, ctx: JobContext) -> anyhow::Result<RunResults> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a [`CronJob`].
pub fn job_fn<F, Fut>(f: F) -> Arc<dyn CronJob>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<RunResults>> + Send + 'static,
{
    Arc::new(FnJob(f))
}

/// A registered cron.
#[derive(Clone)]
pub struct CronDef {
    pub cadence: Cadence,
    /// Run on every instance (lock per instance) instead of once across the
    /// fleet.
    pub all_instances: bool,
    pub timeout: Duration,
    pub job: Arc<dyn CronJob>,
}

impl CronDef {
    pub fn new(cadence: Cadence, job: Arc<dyn CronJob>) -> Self {
        Self {
            cadence,
            all_instances: false,
            timeout: DEFAULT_TIMEOUT,
            job,
        }
    }

    #[must_use]
    pub fn all_instances(mut self) -> Self {
        self.all_instances = true;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether one lock is shared by the whole fleet.
    #[must_use]
    pub fn cross_instance(&self) -> bool {
        !self.all_instances
    }
}

impl std::fmt::Debug for CronDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronDef")
            .field("cadence", &self.cadence)
            .field("all_instances", &self.all_instances)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
