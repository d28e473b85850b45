//! Distributed cron scheduling for taskhub.
//!
//! Every process registers the same set of named crons and runs one driver
//! task per cron. A lock in the shared store makes sure only one instance
//! (or one run per instance, for per-instance crons) executes each tick, and
//! every execution is recorded into rolling per-cron stats.

pub mod crons;
pub mod driver;
pub mod error;
pub mod job;
pub mod lock;
pub mod models;
pub mod registry;
pub mod runtime;
pub mod schedule;
pub mod stats;

pub use {
    crons::register_default_crons,
    driver::{CycleOutcome, RunOutcome, run_cycle, spawn_driver},
    error::{Error, Result},
    job::{CronDef, CronJob, JobContext, RunResults, job_fn},
    lock::{LockToken, Locker, MemoryLocker, RedisLocker, lock_key},
    registry::CronRegistry,
    runtime::{Runtime, open_pool},
    schedule::{Cadence, next_fire},
    stats::{ExecutionRecord, JobStats, MemoryStats, RedisStats, StatsStore},
};

/// Run database migrations for the scheduler tables.
///
/// Creates `contact_fires` and `msgs`. Called by [`runtime::open_pool`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
