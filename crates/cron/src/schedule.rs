//! Next-fire computation for cron cadences.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use {
    chrono::{DateTime, TimeDelta, Timelike, Utc},
    cron::Schedule,
};

use crate::Result;

const MINUTE: Duration = Duration::from_secs(60);

/// Used when a cron expression has no occurrence after the last fire.
const EXPR_EXHAUSTED_FALLBACK: Duration = Duration::from_secs(24 * 60 * 60);

/// Compute the next fire time after `last` for a fixed `interval`.
///
/// - `1s <= interval < 60s`: aligned so the seconds-within-minute land on a
///   multiple of `interval`.
/// - `interval == 60s`: one second past the next top of the minute, so a
///   per-minute job fires after the minute has turned everywhere.
/// - anything else: `last + interval`.
#[must_use]
pub fn next_fire(last: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    if interval >= Duration::from_secs(1) && interval < MINUTE {
        let into_minute = Duration::from_secs(u64::from(last.second()));
        let rem = into_minute.as_nanos() % interval.as_nanos();
        let offset = interval - Duration::from_nanos(u64::try_from(rem).unwrap_or_default());
        return add(last, offset);
    }
    if interval == MINUTE {
        let offset = 60 - u64::from(last.second()) + 1;
        return add(last, Duration::from_secs(offset));
    }
    add(last, interval)
}

fn add(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

type CadenceFn = dyn Fn(DateTime<Utc>) -> DateTime<Utc> + Send + Sync;

/// When a cron fires next, given when it last fired.
#[derive(Clone)]
pub enum Cadence {
    /// Fixed interval, see [`next_fire`].
    Every(Duration),
    /// Cron expression (5, 6 or 7 fields).
    Expr { source: String, schedule: Schedule },
    /// Arbitrary pure function.
    Custom(Arc<CadenceFn>),
}

impl Cadence {
    #[must_use]
    pub fn every(interval: Duration) -> Self {
        Self::Every(interval)
    }

    /// Parse a cron expression. Five-field expressions get a `0` seconds
    /// field and a `*` year field.
    pub fn expr(expr: &str) -> Result<Self> {
        let schedule = Schedule::from_str(expr)
            .or_else(|_| Schedule::from_str(&format!("0 {expr} *")))?;
        Ok(Self::Expr {
            source: expr.to_string(),
            schedule,
        })
    }

    pub fn custom(f: impl Fn(DateTime<Utc>) -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    #[must_use]
    pub fn next(&self, last: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Every(interval) => next_fire(last, *interval),
            Self::Expr { schedule, .. } => schedule
                .after(&last)
                .next()
                .unwrap_or_else(|| add(last, EXPR_EXHAUSTED_FALLBACK)),
            Self::Custom(f) => f(last),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Every(interval) => write!(f, "every {interval:?}"),
            Self::Expr { source, .. } => write!(f, "cron \"{source}\""),
            Self::Custom(_) => write!(f, "custom"),
        }
    }
}

impl fmt::Debug for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cadence({self})")
    }
}
