//! Rolling per-cron execution stats.
//!
//! Five hashes keyed by cron name, each expiring 48 hours after the last
//! write to it:
//!
//! - `cron_stats:last_start`   RFC 3339 start time of the last run
//! - `cron_stats:last_time`    duration of the last run in seconds
//! - `cron_stats:last_result`  JSON results of the last run
//! - `cron_stats:call_count`   number of runs
//! - `cron_stats:total_time`   summed run time in seconds

use std::{collections::HashMap, time::Duration};

use {
    async_trait::async_trait,
    chrono::{DateTime, SecondsFormat, Utc},
    redis::aio::ConnectionManager,
    serde::Serialize,
    taskhub_metrics::{counter, cron as cron_metrics, gauge, histogram, labels},
    tokio::{sync::Mutex, time::Instant},
    tracing::warn,
};

use crate::{Error, Result, job::RunResults};

pub const STATS_TTL: Duration = Duration::from_secs(48 * 60 * 60);

pub const LAST_START: &str = "cron_stats:last_start";
pub const LAST_TIME: &str = "cron_stats:last_time";
pub const LAST_RESULT: &str = "cron_stats:last_result";
pub const CALL_COUNT: &str = "cron_stats:call_count";
pub const TOTAL_TIME: &str = "cron_stats:total_time";

const ALL_KEYS: [&str; 5] = [LAST_START, LAST_TIME, LAST_RESULT, CALL_COUNT, TOTAL_TIME];

/// One finished run of a cron.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub job: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub results: RunResults,
}

impl ExecutionRecord {
    #[must_use]
    pub fn duration(&self) -> Duration {
        (self.ended_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// What the stats store holds for one cron.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStats {
    pub last_start: Option<DateTime<Utc>>,
    pub last_time: Option<f64>,
    pub last_result: Option<serde_json::Value>,
    pub call_count: i64,
    pub total_time: f64,
}

impl JobStats {
    /// Decode the raw hash fields, in [`ALL_KEYS`] order.
    fn from_fields(fields: [Option<String>; 5]) -> Result<Option<Self>> {
        if fields.iter().all(Option::is_none) {
            return Ok(None);
        }
        let [last_start, last_time, last_result, call_count, total_time] = fields;

        let last_start = last_start
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .map_err(|e| Error::external("invalid last_start", e))?;
        let last_time = last_time
            .map(|s| s.parse::<f64>())
            .transpose()
            .map_err(|e| Error::external("invalid last_time", e))?;
        let last_result = last_result
            .map(|s| serde_json::from_str(&s))
            .transpose()?;
        let call_count = call_count
            .map(|s| s.parse::<i64>())
            .transpose()
            .map_err(|e| Error::external("invalid call_count", e))?
            .unwrap_or(0);
        let total_time = total_time
            .map(|s| s.parse::<f64>())
            .transpose()
            .map_err(|e| Error::external("invalid total_time", e))?
            .unwrap_or(0.0);

        Ok(Some(Self {
            last_start,
            last_time,
            last_result,
            call_count,
            total_time,
        }))
    }
}

#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn write(&self, record: &ExecutionRecord) -> Result<()>;

    /// Stats of `job`, or `None` if it never ran or its stats expired.
    async fn read(&self, job: &str) -> Result<Option<JobStats>>;
}

/// Record a finished run. Store failures are logged, never returned.
pub async fn record_execution(store: &dyn StatsStore, record: &ExecutionRecord) {
    let secs = record.duration().as_secs_f64();
    gauge!(cron_metrics::DURATION_SECONDS, labels::CRON => record.job.clone()).set(secs);
    histogram!(cron_metrics::RUN_SECONDS, labels::CRON => record.job.clone()).record(secs);

    if let Err(e) = store.write(record).await {
        warn!(cron = %record.job, error = %e, "error writing cron results");
        counter!(cron_metrics::STATS_WRITE_ERRORS_TOTAL, labels::CRON => record.job.clone())
            .increment(1);
    }
}

fn start_field(record: &ExecutionRecord) -> String {
    record
        .started_at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The whole write of one record: update the five hashes, then refresh the
/// expiry of each.
fn write_pipe(record: &ExecutionRecord) -> Result<redis::Pipeline> {
    let secs = record.duration().as_secs_f64();
    let result = serde_json::to_string(&record.results)?;
    let job = record.job.as_str();

    let mut pipe = redis::pipe();
    pipe.cmd("HSET")
        .arg(LAST_START)
        .arg(job)
        .arg(start_field(record))
        .ignore();
    pipe.cmd("HSET").arg(LAST_TIME).arg(job).arg(secs).ignore();
    pipe.cmd("HSET").arg(LAST_RESULT).arg(job).arg(result).ignore();
    pipe.cmd("HINCRBY").arg(CALL_COUNT).arg(job).arg(1).ignore();
    pipe.cmd("HINCRBYFLOAT")
        .arg(TOTAL_TIME)
        .arg(job)
        .arg(secs)
        .ignore();
    for key in ALL_KEYS {
        pipe.cmd("EXPIRE").arg(key).arg(STATS_TTL.as_secs()).ignore();
    }
    Ok(pipe)
}

/// Stats in Redis, written in one pipelined round trip.
pub struct RedisStats {
    conn: ConnectionManager,
}

impl RedisStats {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl StatsStore for RedisStats {
    async fn write(&self, record: &ExecutionRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        write_pipe(record)?.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn read(&self, job: &str) -> Result<Option<JobStats>> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for key in ALL_KEYS {
            pipe.cmd("HGET").arg(key).arg(job);
        }
        let (a, b, c, d, e): (
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
        ) = pipe.query_async(&mut conn).await?;
        JobStats::from_fields([a, b, c, d, e])
    }
}

#[derive(Default)]
struct StatsHash {
    fields: HashMap<String, String>,
    expires_at: Option<Instant>,
}

impl StatsHash {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Stats in process memory with the same layout and expiry as [`RedisStats`].
pub struct MemoryStats {
    hashes: Mutex<HashMap<&'static str, StatsHash>>,
    ttl: Duration,
}

impl Default for MemoryStats {
    fn default() -> Self {
        Self::with_ttl(STATS_TTL)
    }
}

impl MemoryStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            hashes: Mutex::new(HashMap::new()),
            ttl,
        }
    }
}

#[async_trait]
impl StatsStore for MemoryStats {
    async fn write(&self, record: &ExecutionRecord) -> Result<()> {
        let secs = record.duration().as_secs_f64();
        let result = serde_json::to_string(&record.results)?;
        let job = record.job.clone();
        let now = Instant::now();

        let mut hashes = self.hashes.lock().await;
        for key in ALL_KEYS {
            let hash = hashes.entry(key).or_default();
            if hash.is_expired(now) {
                *hash = StatsHash::default();
            }
            let fields = &mut hash.fields;
            match key {
                LAST_START => {
                    fields.insert(job.clone(), start_field(record));
                },
                LAST_TIME => {
                    fields.insert(job.clone(), secs.to_string());
                },
                LAST_RESULT => {
                    fields.insert(job.clone(), result.clone());
                },
                CALL_COUNT => {
                    let count = fields
                        .get(&job)
                        .and_then(|v| v.parse::<i64>().ok())
                        .unwrap_or(0);
                    fields.insert(job.clone(), (count + 1).to_string());
                },
                _ => {
                    let total = fields
                        .get(&job)
                        .and_then(|v| v.parse::<f64>().ok())
                        .unwrap_or(0.0);
                    fields.insert(job.clone(), (total + secs).to_string());
                },
            }
            hash.expires_at = Some(now + self.ttl);
        }
        Ok(())
    }

    async fn read(&self, job: &str) -> Result<Option<JobStats>> {
        let now = Instant::now();
        let hashes = self.hashes.lock().await;
        let field = |key: &str| {
            hashes
                .get(key)
                .filter(|hash| !hash.is_expired(now))
                .and_then(|hash| hash.fields.get(job).cloned())
        };
        JobStats::from_fields(ALL_KEYS.map(field))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chrono::TimeDelta, serde_json::json};

    fn record(job: &str, millis: i64, results: serde_json::Value) -> ExecutionRecord {
        let started_at = Utc::now();
        ExecutionRecord {
            job: job.into(),
            started_at,
            ended_at: started_at + TimeDelta::milliseconds(millis),
            results: results.as_object().cloned().unwrap(),
        }
    }

    fn commands(pipe: &redis::Pipeline) -> Vec<Vec<String>> {
        pipe.cmd_iter()
            .map(|cmd| {
                cmd.args_iter()
                    .map(|arg| {
                        if let redis::Arg::Simple(bytes) = arg {
                            String::from_utf8_lossy(bytes).into_owned()
                        } else {
                            String::new()
                        }
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn redis_write_updates_five_hashes_then_expires_each() {
        let r = record("sweep", 250, json!({"foo": 123}));
        let cmds = commands(&write_pipe(&r).unwrap());
        assert_eq!(cmds.len(), 10);

        let heads: Vec<(&str, &str)> = cmds
            .iter()
            .map(|c| (c[0].as_str(), c[1].as_str()))
            .collect();
        assert_eq!(heads, vec![
            ("HSET", LAST_START),
            ("HSET", LAST_TIME),
            ("HSET", LAST_RESULT),
            ("HINCRBY", CALL_COUNT),
            ("HINCRBYFLOAT", TOTAL_TIME),
            ("EXPIRE", LAST_START),
            ("EXPIRE", LAST_TIME),
            ("EXPIRE", LAST_RESULT),
            ("EXPIRE", CALL_COUNT),
            ("EXPIRE", TOTAL_TIME),
        ]);

        assert!(cmds[..5].iter().all(|c| c[2] == "sweep"));
        assert_eq!(cmds[0][3], start_field(&r));
        assert_eq!(cmds[2][3], r#"{"foo":123}"#);
        assert_eq!(cmds[3][3], "1");
        assert!(cmds[5..].iter().all(|c| c.len() == 3 && c[2] == "172800"));
    }

    #[test]
    fn duration_never_negative() {
        let mut r = record("a", 10, json!({}));
        assert_eq!(r.duration(), Duration::from_millis(10));
        r.ended_at = r.started_at - TimeDelta::seconds(1);
        assert_eq!(r.duration(), Duration::ZERO);
    }

    #[tokio::test]
    async fn counts_and_totals_accumulate() {
        let stats = MemoryStats::new();
        record_execution(&stats, &record("sweep", 500, json!({"foo": 1}))).await;
        let last = record("sweep", 250, json!({"foo": 123}));
        record_execution(&stats, &last).await;

        let got = stats.read("sweep").await.unwrap().unwrap();
        assert_eq!(got.call_count, 2);
        assert!((got.total_time - 0.75).abs() < 1e-9);
        assert_eq!(got.last_time, Some(0.25));
        assert_eq!(got.last_result, Some(json!({"foo": 123})));
        assert_eq!(
            got.last_start.unwrap().timestamp_millis(),
            last.started_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn jobs_are_independent() {
        let stats = MemoryStats::new();
        stats.write(&record("a", 1, json!({}))).await.unwrap();
        assert!(stats.read("b").await.unwrap().is_none());
        assert_eq!(stats.read("a").await.unwrap().unwrap().call_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_expire_after_ttl() {
        let stats = MemoryStats::with_ttl(Duration::from_secs(60));
        stats.write(&record("a", 1, json!({}))).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        stats.write(&record("a", 1, json!({}))).await.unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;
        // expiry was refreshed by the second write
        assert_eq!(stats.read("a").await.unwrap().unwrap().call_count, 2);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(stats.read("a").await.unwrap().is_none());

        stats.write(&record("a", 1, json!({}))).await.unwrap();
        assert_eq!(stats.read("a").await.unwrap().unwrap().call_count, 1);
    }

    struct FailingStats;

    #[async_trait]
    impl StatsStore for FailingStats {
        async fn write(&self, _: &ExecutionRecord) -> Result<()> {
            Err(Error::message("store unreachable"))
        }

        async fn read(&self, _: &str) -> Result<Option<JobStats>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn write_failures_are_swallowed() {
        record_execution(&FailingStats, &record("a", 1, json!({}))).await;
    }

    #[test]
    fn malformed_fields_are_errors() {
        let fields = [None, None, None, Some("many".to_string()), None];
        assert!(JobStats::from_fields(fields).is_err());
    }
}
