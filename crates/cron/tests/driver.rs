#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end driver behaviour with real (short) timers.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use {
    serde_json::json,
    taskhub_config::{DatabaseConfig, TaskhubConfig},
    taskhub_cron::{
        Cadence, CronDef, CronJob, CronRegistry, MemoryLocker, MemoryStats, RunResults, Runtime,
        StatsStore, job_fn, open_pool,
    },
    tokio_util::{sync::CancellationToken, task::TaskTracker},
};

const CRON: &str = "test_cron";
const CADENCE: Duration = Duration::from_millis(250);

/// Counts runs and notices overlapping ones.
#[derive(Default)]
struct Probe {
    fires: AtomicUsize,
    running: AtomicBool,
    overlaps: AtomicUsize,
}

impl Probe {
    fn fires(&self) -> usize {
        self.fires.load(Ordering::SeqCst)
    }

    fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

/// A job that sleeps `delay(n)` on its n-th call (0-based).
fn probe_job(
    probe: Arc<Probe>,
    delay: impl Fn(usize) -> Duration + Send + Sync + 'static,
) -> Arc<dyn CronJob> {
    let delay = Arc::new(delay);
    job_fn(move |_| {
        let probe = Arc::clone(&probe);
        let delay = Arc::clone(&delay);
        async move {
            let n = probe.fires.fetch_add(1, Ordering::SeqCst);
            if probe.running.swap(true, Ordering::SeqCst) {
                probe.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep((*delay)(n)).await;
            probe.running.store(false, Ordering::SeqCst);

            let mut results = RunResults::new();
            results.insert("foo".into(), json!(123));
            Ok(results)
        }
    })
}

async fn runtime(instance: &str, locker: &MemoryLocker, stats: &Arc<MemoryStats>) -> Arc<Runtime> {
    let db = open_pool(&DatabaseConfig {
        url: "sqlite::memory:".into(),
        max_connections: 1,
    })
    .await
    .unwrap();
    Arc::new(
        Runtime::in_memory(TaskhubConfig::default(), db)
            .with_instance_id(instance)
            .with_locker(Arc::new(locker.clone()))
            .with_stats(Arc::clone(stats) as Arc<dyn StatsStore>),
    )
}

/// Start `CRON` on every runtime, let it run for `window`, then shut down and
/// wait for the drivers to exit.
async fn run_for(instances: Vec<(Arc<Runtime>, CronDef)>, window: Duration) {
    let tracker = TaskTracker::new();
    let shutdown = CancellationToken::new();
    for (rt, def) in instances {
        let mut registry = CronRegistry::new();
        registry.register(CRON, def).unwrap();
        assert_eq!(registry.start_all(&rt, &tracker, &shutdown), 1);
    }

    tokio::time::sleep(window).await;
    shutdown.cancel();
    tracker.close();
    tracker.wait().await;
}

#[tokio::test]
async fn fires_on_every_tick() {
    let locker = MemoryLocker::new();
    let stats = Arc::new(MemoryStats::new());
    let rt = runtime("a", &locker, &stats).await;
    let probe = Arc::new(Probe::default());
    let def = CronDef::new(
        Cadence::every(CADENCE),
        probe_job(Arc::clone(&probe), |_| Duration::from_millis(100)),
    );

    run_for(vec![(rt, def)], Duration::from_millis(875)).await;

    // ticks at 0, 250, 500 and 750 ms
    assert_eq!(probe.fires(), 4);
    assert_eq!(probe.overlaps(), 0);

    let got = stats.read(CRON).await.unwrap().unwrap();
    assert_eq!(got.call_count, 4);
    assert_eq!(got.last_result, Some(json!({"foo": 123})));
    assert!(!locker.is_held("lock:test_cron_lock").await);
}

#[tokio::test]
async fn overrun_fires_again_without_piling_up() {
    let locker = MemoryLocker::new();
    let stats = Arc::new(MemoryStats::new());
    let rt = runtime("a", &locker, &stats).await;
    let probe = Arc::new(Probe::default());
    let def = CronDef::new(
        Cadence::every(CADENCE),
        probe_job(Arc::clone(&probe), |n| {
            Duration::from_millis(if n == 1 { 400 } else { 100 })
        }),
    );

    run_for(vec![(rt, def)], Duration::from_millis(800)).await;

    // 0 ms, 250 ms (runs until 650 ms), immediately again at 650 ms, next at 900 ms
    assert_eq!(probe.fires(), 3);
    assert_eq!(probe.overlaps(), 0);
    assert_eq!(stats.read(CRON).await.unwrap().unwrap().call_count, 3);
}

#[tokio::test]
async fn shared_lock_runs_once_per_tick_across_instances() {
    let locker = MemoryLocker::new();
    let stats = Arc::new(MemoryStats::new());
    let probe = Arc::new(Probe::default());
    let job = probe_job(Arc::clone(&probe), |_| Duration::from_millis(100));

    let a = runtime("a", &locker, &stats).await;
    let b = runtime("b", &locker, &stats).await;
    run_for(
        vec![
            (a, CronDef::new(Cadence::every(CADENCE), Arc::clone(&job))),
            (b, CronDef::new(Cadence::every(CADENCE), job)),
        ],
        Duration::from_millis(875),
    )
    .await;

    assert_eq!(probe.fires(), 4);
    assert_eq!(probe.overlaps(), 0);
    assert_eq!(stats.read(CRON).await.unwrap().unwrap().call_count, 4);
}

#[tokio::test]
async fn per_instance_lock_runs_on_every_instance() {
    let locker = MemoryLocker::new();
    let stats = Arc::new(MemoryStats::new());
    let probe_a = Arc::new(Probe::default());
    let probe_b = Arc::new(Probe::default());

    let a = runtime("a", &locker, &stats).await;
    let b = runtime("b", &locker, &stats).await;
    run_for(
        vec![
            (
                a,
                CronDef::new(
                    Cadence::every(CADENCE),
                    probe_job(Arc::clone(&probe_a), |_| Duration::from_millis(100)),
                )
                .all_instances(),
            ),
            (
                b,
                CronDef::new(
                    Cadence::every(CADENCE),
                    probe_job(Arc::clone(&probe_b), |_| Duration::from_millis(100)),
                )
                .all_instances(),
            ),
        ],
        Duration::from_millis(875),
    )
    .await;

    assert_eq!(probe_a.fires() + probe_b.fires(), 8);
    assert_eq!(probe_a.overlaps() + probe_b.overlaps(), 0);
    assert_eq!(stats.read(CRON).await.unwrap().unwrap().call_count, 8);
}

#[tokio::test]
async fn panicking_job_keeps_being_scheduled() {
    let locker = MemoryLocker::new();
    let stats = Arc::new(MemoryStats::new());
    let rt = runtime("a", &locker, &stats).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let def = CronDef::new(
        Cadence::every(Duration::from_millis(100)),
        job_fn(move |_| {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                assert_ne!(n, 0, "first run blows up");
                Ok(RunResults::new())
            }
        }),
    );

    run_for(vec![(rt, def)], Duration::from_millis(450)).await;

    let calls = calls.load(Ordering::SeqCst);
    assert!(calls >= 3, "driver stopped after the panic ({calls} calls)");
    let got = stats.read(CRON).await.unwrap().unwrap();
    assert_eq!(usize::try_from(got.call_count).unwrap(), calls);
    assert_eq!(got.last_result, Some(json!({})));
    assert!(!locker.is_held("lock:test_cron_lock").await);
}

#[tokio::test]
async fn shutdown_waits_for_the_run_in_flight() {
    let locker = MemoryLocker::new();
    let stats = Arc::new(MemoryStats::new());
    let rt = runtime("a", &locker, &stats).await;
    let probe = Arc::new(Probe::default());
    let def = CronDef::new(
        Cadence::every(Duration::from_secs(60)),
        probe_job(Arc::clone(&probe), |_| Duration::from_millis(300)),
    );

    let started = Instant::now();
    run_for(vec![(rt, def)], Duration::from_millis(100)).await;

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(probe.fires(), 1);
    // the interrupted run still got recorded and released its lock
    assert_eq!(stats.read(CRON).await.unwrap().unwrap().call_count, 1);
    assert!(!locker.is_held("lock:test_cron_lock").await);
}
