//! Reports queue sizes as gauges from every instance.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    serde_json::json,
    taskhub_config::QueueStatsCronConfig,
    taskhub_metrics::{gauge, labels, queue as queue_metrics},
    taskhub_queue::QueueKind,
};

use crate::{
    job::{CronDef, CronJob, JobContext, RunResults},
    schedule::Cadence,
};

pub const NAME: &str = "queue_stats";

pub struct QueueStats;

impl QueueStats {
    #[must_use]
    pub fn def(config: &QueueStatsCronConfig) -> CronDef {
        CronDef::new(
            Cadence::every(Duration::from_secs(config.interval_secs)),
            Arc::new(Self),
        )
        .all_instances()
    }
}

#[async_trait]
impl CronJob for QueueStats {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<RunResults> {
        let rt = &ctx.rt;
        let mut results = RunResults::new();

        for kind in QueueKind::ALL {
            let queue = rt.queues.get(kind);
            let size = queue.size().await?;
            gauge!(
                queue_metrics::SIZE,
                labels::QUEUE => kind.as_str(),
                labels::INSTANCE => rt.instance_id.clone()
            )
            .set(size as f64);
            results.insert(format!("{kind}_size"), json!(size));
        }

        let paused = rt.queues.throttled.paused().await?.len();
        gauge!(
            queue_metrics::PAUSED_OWNERS,
            labels::QUEUE => QueueKind::Throttled.as_str(),
            labels::INSTANCE => rt.instance_id.clone()
        )
        .set(paused as f64);
        results.insert("throttled_paused".into(), json!(paused));

        Ok(results)
    }
}
