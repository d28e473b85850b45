//! The crons every taskhub process runs.

pub mod fires;
pub mod queue_stats;
pub mod throttle;

use taskhub_config::TaskhubConfig;

use crate::{Result, registry::CronRegistry};

/// Register the built-in crons with their configured cadences and limits.
pub fn register_default_crons(registry: &mut CronRegistry, config: &TaskhubConfig) -> Result<()> {
    let crons = &config.crons;
    let timeout = crons.timeout();

    registry.register(
        fires::NAME,
        fires::FireContacts::def(&crons.fires).with_timeout(timeout),
    )?;
    registry.register(
        throttle::NAME,
        throttle::ThrottleQueue::def(&crons.throttle).with_timeout(timeout),
    )?;
    registry.register(
        queue_stats::NAME,
        queue_stats::QueueStats::def(&crons.queue_stats).with_timeout(timeout),
    )?;
    Ok(())
}
