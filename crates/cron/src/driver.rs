//! The per-cron loop: wait, lock, run, record, release.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use {
    chrono::Utc,
    futures::FutureExt,
    serde_json::json,
    taskhub_metrics::{counter, cron as cron_metrics, labels},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    job::{CronDef, JobContext, RunResults, results},
    lock::lock_key,
    runtime::Runtime,
    stats::{ExecutionRecord, record_execution},
};

/// Added to a cron's timeout to get its lock TTL, so the lock outlives a
/// run that ends right at its deadline.
pub const LOCK_TTL_MARGIN: Duration = Duration::from_secs(30);

/// Runs longer than this are logged as errors.
pub const OVERRUN_THRESHOLD: Duration = Duration::from_secs(60);

/// How one attempted cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The lock was held elsewhere (or could not be checked).
    Skipped,
    Ran { outcome: RunOutcome },
}

/// How one run of a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunResults),
    Failed(String),
    Panicked(String),
    TimedOut,
}

impl RunOutcome {
    /// The results recorded as the cron's `last_result`.
    #[must_use]
    pub fn results(&self) -> RunResults {
        match self {
            Self::Completed(results) => results.clone(),
            Self::Failed(message) => results([("error", json!(message))]),
            Self::Panicked(message) => results([("panic", json!(message))]),
            Self::TimedOut => results([("error", json!("timed out"))]),
        }
    }
}

/// Drive cron `name` until `shutdown` is cancelled.
///
/// The first cycle runs immediately. Each following wake is computed from
/// the start of the previous cycle, whether it ran or was skipped. A run in
/// progress is never interrupted by shutdown.
pub async fn spawn_driver(
    name: String,
    def: CronDef,
    rt: Arc<Runtime>,
    shutdown: CancellationToken,
) {
    let key = lock_key(&name, def.cross_instance(), &rt.instance_id);
    let mut wait = Duration::ZERO;

    info!(cron = %name, cadence = %def.cadence, lock = %key, "cron started");

    loop {
        let last_fire = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(wait) => Utc::now(),
        };
        run_cycle(&name, &def, &rt, &key).await;

        let next = def.cadence.next(last_fire);
        wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(cron = %name, ?wait, "next cron cycle");
    }

    info!(cron = %name, "cron exiting");
}

/// One cycle: take the lock without retrying, run, record, release.
pub async fn run_cycle(name: &str, def: &CronDef, rt: &Arc<Runtime>, key: &str) -> CycleOutcome {
    let ttl = def.timeout + LOCK_TTL_MARGIN;
    let token = match rt.locker.acquire(key, ttl, Duration::ZERO).await {
        Ok(Some(token)) => token,
        Ok(None) => {
            debug!(cron = %name, lock = %key, "lock already held, skipping");
            counter!(cron_metrics::SKIPPED_TOTAL, labels::CRON => name.to_string()).increment(1);
            return CycleOutcome::Skipped;
        },
        Err(e) => {
            error!(cron = %name, lock = %key, error = %e, "error acquiring cron lock");
            counter!(cron_metrics::SKIPPED_TOTAL, labels::CRON => name.to_string()).increment(1);
            return CycleOutcome::Skipped;
        },
    };

    counter!(cron_metrics::EXECUTIONS_TOTAL, labels::CRON => name.to_string()).increment(1);
    let started_at = Utc::now();
    let outcome = fire(name, def, rt, started_at).await;
    let ended_at = Utc::now();

    match &outcome {
        RunOutcome::Completed(_) => {},
        RunOutcome::Failed(message) => {
            error!(cron = %name, error = %message, "error while running cron");
            counter!(cron_metrics::ERRORS_TOTAL, labels::CRON => name.to_string()).increment(1);
        },
        RunOutcome::Panicked(message) => {
            error!(cron = %name, panic = %message, "panic while running cron");
            counter!(cron_metrics::PANICS_TOTAL, labels::CRON => name.to_string()).increment(1);
        },
        RunOutcome::TimedOut => {
            error!(cron = %name, timeout = ?def.timeout, "cron timed out");
            counter!(cron_metrics::ERRORS_TOTAL, labels::CRON => name.to_string()).increment(1);
        },
    }

    let record = ExecutionRecord {
        job: name.to_string(),
        started_at,
        ended_at,
        results: outcome.results(),
    };
    let elapsed = record.duration();
    if elapsed > OVERRUN_THRESHOLD {
        error!(cron = %name, ?elapsed, "cron took longer than a minute");
        counter!(cron_metrics::OVERRUNS_TOTAL, labels::CRON => name.to_string()).increment(1);
    }
    record_execution(rt.stats.as_ref(), &record).await;

    if let Err(e) = rt.locker.release(key, &token).await {
        warn!(cron = %name, lock = %key, error = %e, "error releasing cron lock");
    }

    debug!(cron = %name, ?elapsed, "cron completed");
    CycleOutcome::Ran { outcome }
}

/// Run the job, containing panics and cancelling its token at the deadline.
async fn fire(
    name: &str,
    def: &CronDef,
    rt: &Arc<Runtime>,
    started_at: chrono::DateTime<Utc>,
) -> RunOutcome {
    let cancel = CancellationToken::new();
    let ctx = JobContext {
        rt: Arc::clone(rt),
        cancel: cancel.clone(),
        started_at,
    };

    let run = AssertUnwindSafe(def.job.run(ctx)).catch_unwind();
    tokio::pin!(run);

    let mut timed_out = false;
    let result = match tokio::time::timeout(def.timeout, &mut run).await {
        Ok(result) => result,
        Err(_) => {
            warn!(cron = %name, timeout = ?def.timeout, "cron deadline passed, cancelling");
            timed_out = true;
            cancel.cancel();
            run.await
        },
    };

    match result {
        Err(payload) => RunOutcome::Panicked(panic_message(payload.as_ref())),
        Ok(_) if timed_out => RunOutcome::TimedOut,
        Ok(Ok(results)) => RunOutcome::Completed(results),
        Ok(Err(e)) => RunOutcome::Failed(format!("{e:#}")),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Route panics through tracing with a backtrace of the panicking task.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        error!(%location, %backtrace, "panic: {}", panic_message(info.payload()));
    }));
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use {
        super::*,
        crate::{
            job::{CronJob, job_fn},
            lock::{Locker, MemoryLocker},
            runtime::tests::memory_pool,
            schedule::Cadence,
            stats::{MemoryStats, StatsStore},
        },
        taskhub_config::TaskhubConfig,
    };

    async fn runtime() -> (Arc<Runtime>, MemoryLocker, Arc<MemoryStats>) {
        let locker = MemoryLocker::new();
        let stats = Arc::new(MemoryStats::new());
        let rt = Runtime::in_memory(TaskhubConfig::default(), memory_pool().await)
            .with_instance_id("test")
            .with_locker(Arc::new(locker.clone()))
            .with_stats(Arc::clone(&stats) as Arc<dyn StatsStore>);
        (Arc::new(rt), locker, stats)
    }

    fn boom() -> RunResults {
        panic!("boom")
    }

    fn every_second(job: Arc<dyn CronJob>) -> CronDef {
        CronDef::new(Cadence::every(Duration::from_secs(1)), job)
    }

    #[tokio::test]
    async fn completed_run_records_results_and_releases() {
        let (rt, locker, stats) = runtime().await;
        let def = every_second(job_fn(|_| async { Ok(results([("foo", json!(123))])) }));

        let outcome = run_cycle("sweep", &def, &rt, "lock:sweep_lock").await;
        assert_eq!(outcome, CycleOutcome::Ran {
            outcome: RunOutcome::Completed(results([("foo", json!(123))]))
        });
        assert!(!locker.is_held("lock:sweep_lock").await);

        let got = stats.read("sweep").await.unwrap().unwrap();
        assert_eq!(got.call_count, 1);
        assert_eq!(got.last_result, Some(json!({"foo": 123})));
    }

    #[tokio::test]
    async fn held_lock_skips_without_running() {
        let (rt, locker, stats) = runtime().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let def = every_second(job_fn(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok(RunResults::new()) }
        }));

        let _held = locker
            .try_acquire("lock:sweep_lock", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        let outcome = run_cycle("sweep", &def, &rt, "lock:sweep_lock").await;

        assert_eq!(outcome, CycleOutcome::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(stats.read("sweep").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn business_error_is_recorded() {
        let (rt, _, stats) = runtime().await;
        let def = every_second(job_fn(|_| async { Err(anyhow::anyhow!("db unavailable")) }));

        let outcome = run_cycle("sweep", &def, &rt, "lock:sweep_lock").await;
        assert_eq!(outcome, CycleOutcome::Ran {
            outcome: RunOutcome::Failed("db unavailable".into())
        });
        let got = stats.read("sweep").await.unwrap().unwrap();
        assert_eq!(got.last_result, Some(json!({"error": "db unavailable"})));
    }

    #[tokio::test]
    async fn panic_is_contained_and_recorded() {
        let (rt, locker, stats) = runtime().await;
        let def = every_second(job_fn(|_| async { Ok(boom()) }));

        let outcome = run_cycle("sweep", &def, &rt, "lock:sweep_lock").await;
        assert_eq!(outcome, CycleOutcome::Ran {
            outcome: RunOutcome::Panicked("boom".into())
        });
        assert!(!locker.is_held("lock:sweep_lock").await);
        let got = stats.read("sweep").await.unwrap().unwrap();
        assert_eq!(got.call_count, 1);
        assert_eq!(got.last_result, Some(json!({"panic": "boom"})));
    }

    #[tokio::test]
    async fn deadline_cancels_and_waits_for_the_job() {
        let (rt, locker, stats) = runtime().await;
        let def = every_second(job_fn(|ctx: JobContext| async move {
            ctx.cancel.cancelled().await;
            Ok(results([("partial", json!(true))]))
        }))
        .with_timeout(Duration::from_millis(50));

        let outcome = run_cycle("sweep", &def, &rt, "lock:sweep_lock").await;
        assert_eq!(outcome, CycleOutcome::Ran {
            outcome: RunOutcome::TimedOut
        });
        assert!(!locker.is_held("lock:sweep_lock").await);
        let got = stats.read("sweep").await.unwrap().unwrap();
        assert_eq!(got.last_result, Some(json!({"error": "timed out"})));
    }

    #[tokio::test]
    async fn shutdown_stops_a_sleeping_driver() {
        let (rt, _, _) = runtime().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let def = CronDef::new(
            Cadence::every(Duration::from_secs(3600)),
            job_fn(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Ok(RunResults::new()) }
            }),
        );

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(spawn_driver("hourly".into(), def, rt, shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("driver did not stop")
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_never_fires() {
        let (rt, _, stats) = runtime().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let def = every_second(job_fn(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok(RunResults::new()) }
        }));

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        spawn_driver("sweep".into(), def, rt, shutdown).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(stats.read("sweep").await.unwrap().is_none());
    }

    #[test]
    fn panic_messages() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let s: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(s.as_ref()), "owned");
        let s: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(s.as_ref()), "unknown panic");
    }
}
