//! Turns due contact fires into bulk tasks.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    chrono::Utc,
    serde_json::json,
    taskhub_config::FiresCronConfig,
    taskhub_metrics::{counter, fires as fire_metrics, labels},
    taskhub_queue::{
        Priority, QueueKind, Queues,
        tasks::{BulkCampaignTrigger, BulkSessionExpire, BulkWaitExpire, BulkWaitTimeout, FireRef},
    },
    tokio::time::Instant,
    tracing::{debug, info},
};

use crate::{
    job::{CronDef, CronJob, JobContext, RunResults, results},
    models::{self, ContactFire, FireType},
    schedule::Cadence,
};

pub const NAME: &str = "fire_contacts";

/// Fires of one org that go into the same kind of task.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Group {
    WaitExpirations,
    WaitTimeouts,
    SessionExpirations,
    CampaignEvent(String),
}

impl Group {
    fn of(fire: &ContactFire) -> Self {
        match fire.fire_type {
            FireType::WaitExpiration => Self::WaitExpirations,
            FireType::WaitTimeout => Self::WaitTimeouts,
            FireType::SessionExpiration => Self::SessionExpirations,
            FireType::Campaign => Self::CampaignEvent(fire.scope.clone()),
        }
    }

    fn fire_type(&self) -> FireType {
        match self {
            Self::WaitExpirations => FireType::WaitExpiration,
            Self::WaitTimeouts => FireType::WaitTimeout,
            Self::SessionExpirations => FireType::SessionExpiration,
            Self::CampaignEvent(_) => FireType::Campaign,
        }
    }
}

#[derive(Debug, Default)]
struct Counts {
    wait_expires: usize,
    wait_timeouts: usize,
    session_expires: usize,
    campaign_events: usize,
}

impl Counts {
    fn add(&mut self, fire_type: FireType, n: usize) {
        match fire_type {
            FireType::WaitExpiration => self.wait_expires += n,
            FireType::WaitTimeout => self.wait_timeouts += n,
            FireType::SessionExpiration => self.session_expires += n,
            FireType::Campaign => self.campaign_events += n,
        }
    }

    fn into_results(self) -> RunResults {
        results([
            ("wait_expires", json!(self.wait_expires)),
            ("wait_timeouts", json!(self.wait_timeouts)),
            ("session_expires", json!(self.session_expires)),
            ("campaign_events", json!(self.campaign_events)),
        ])
    }
}

/// Drains due fires page by page until none are left or the time budget is
/// spent, so a large backlog never holds the lock past the next tick.
pub struct FireContacts {
    fetch_size: usize,
    batch_size: usize,
    time_limit: Duration,
}

impl FireContacts {
    #[must_use]
    pub fn new(config: &FiresCronConfig) -> Self {
        Self {
            fetch_size: config.fetch_size.max(1),
            batch_size: config.batch_size.max(1),
            time_limit: Duration::from_secs(config.time_limit_secs),
        }
    }

    #[must_use]
    pub fn def(config: &FiresCronConfig) -> CronDef {
        CronDef::new(
            Cadence::every(Duration::from_secs(config.interval_secs)),
            Arc::new(Self::new(config)),
        )
    }
}

#[async_trait]
impl CronJob for FireContacts {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<RunResults> {
        let rt = &ctx.rt;
        let start = Instant::now();
        let mut counts = Counts::default();

        loop {
            let fires = models::load_due_fires(&rt.db, Utc::now(), self.fetch_size).await?;
            if fires.is_empty() {
                break;
            }
            debug!(count = fires.len(), "loaded due fires");

            let mut groups: BTreeMap<(i64, Group), Vec<ContactFire>> = BTreeMap::new();
            for fire in fires {
                groups
                    .entry((fire.org_id, Group::of(&fire)))
                    .or_default()
                    .push(fire);
            }

            for ((org_id, group), fires) in &groups {
                for batch in fires.chunks(self.batch_size) {
                    dispatch(&rt.queues, *org_id, group, batch).await?;

                    let ids: Vec<i64> = batch.iter().map(|f| f.id).collect();
                    models::delete_fires(&rt.db, &ids).await?;

                    let fire_type = group.fire_type();
                    counts.add(fire_type, batch.len());
                    counter!(fire_metrics::DRAINED_TOTAL, labels::FIRE_TYPE => fire_type.code())
                        .increment(batch.len() as u64);
                }
            }

            if start.elapsed() >= self.time_limit {
                info!(elapsed = ?start.elapsed(), "fire time budget spent, yielding");
                break;
            }
            if ctx.cancel.is_cancelled() {
                break;
            }
        }

        Ok(counts.into_results())
    }
}

async fn dispatch(
    queues: &Queues,
    org_id: i64,
    group: &Group,
    batch: &[ContactFire],
) -> taskhub_queue::Result<()> {
    let fires: Vec<FireRef> = batch
        .iter()
        .map(|f| FireRef {
            fire_id: f.id,
            contact_id: f.contact_id,
            session_uuid: f.session_uuid.clone(),
        })
        .collect();

    match group {
        Group::WaitExpirations => {
            queues
                .push(QueueKind::Throttled, org_id, &BulkWaitExpire { fires }, Priority::High)
                .await
        },
        Group::WaitTimeouts => {
            queues
                .push(QueueKind::Throttled, org_id, &BulkWaitTimeout { fires }, Priority::High)
                .await
        },
        Group::SessionExpirations => {
            queues
                .push(QueueKind::Batch, org_id, &BulkSessionExpire { fires }, Priority::Default)
                .await
        },
        Group::CampaignEvent(event) => {
            let task = BulkCampaignTrigger {
                event: event.clone(),
                fires,
            };
            queues
                .push(QueueKind::Throttled, org_id, &task, Priority::Default)
                .await
        },
    }
}
