//! Pauses orgs on the throttled queue while their outbox is backed up.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    serde_json::json,
    taskhub_config::ThrottleCronConfig,
    tracing::{debug, info},
};

use crate::{
    job::{CronDef, CronJob, JobContext, RunResults, results},
    models,
    schedule::Cadence,
};

pub const NAME: &str = "throttle_queue";

pub struct ThrottleQueue {
    outbox_threshold: i64,
}

impl ThrottleQueue {
    #[must_use]
    pub fn new(config: &ThrottleCronConfig) -> Self {
        Self {
            outbox_threshold: config.outbox_threshold,
        }
    }

    #[must_use]
    pub fn def(config: &ThrottleCronConfig) -> CronDef {
        CronDef::new(
            Cadence::every(Duration::from_secs(config.interval_secs)),
            Arc::new(Self::new(config)),
        )
    }
}

#[async_trait]
impl CronJob for ThrottleQueue {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<RunResults> {
        let queue = &ctx.rt.queues.throttled;
        let mut paused = 0;
        let mut resumed = 0;

        for owner in queue.owners().await? {
            let outbox = models::outbox_count(&ctx.rt.db, owner).await?;
            if outbox >= self.outbox_threshold {
                queue.pause(owner).await?;
                info!(org_id = owner, outbox, "pausing org with backed up outbox");
                paused += 1;
            } else {
                queue.resume(owner).await?;
                debug!(org_id = owner, outbox, "org outbox below threshold");
                resumed += 1;
            }
        }

        Ok(results([("paused", json!(paused)), ("resumed", json!(resumed))]))
    }
}
