//! Metric name and label definitions.
//!
//! All metric names used by taskhub live here so that dashboards have a single
//! place to look up what is exported.

/// Scheduled (cron) job metrics
pub mod cron {
    /// Number of crons registered with the scheduler
    pub const REGISTERED: &str = "taskhub_cron_registered";
    /// Duration of the last execution of a cron in seconds
    pub const DURATION_SECONDS: &str = "taskhub_cron_duration_seconds";
    /// Distribution of cron execution times in seconds
    pub const RUN_SECONDS: &str = "taskhub_cron_run_seconds";
    /// Total cron executions (lock acquired and job invoked)
    pub const EXECUTIONS_TOTAL: &str = "taskhub_cron_executions_total";
    /// Cycles skipped because the lock was held elsewhere
    pub const SKIPPED_TOTAL: &str = "taskhub_cron_skipped_total";
    /// Executions that returned an error or timed out
    pub const ERRORS_TOTAL: &str = "taskhub_cron_errors_total";
    /// Executions that panicked
    pub const PANICS_TOTAL: &str = "taskhub_cron_panics_total";
    /// Executions that exceeded the one minute overrun threshold
    pub const OVERRUNS_TOTAL: &str = "taskhub_cron_overruns_total";
    /// Failed writes to the execution stats store
    pub const STATS_WRITE_ERRORS_TOTAL: &str = "taskhub_cron_stats_write_errors_total";
}

/// Task queue metrics
pub mod queue {
    /// Tasks pushed onto a queue
    pub const TASKS_QUEUED_TOTAL: &str = "taskhub_queue_tasks_queued_total";
    /// Number of tasks waiting in a queue
    pub const SIZE: &str = "taskhub_queue_size";
    /// Number of owners currently paused on a queue
    pub const PAUSED_OWNERS: &str = "taskhub_queue_paused_owners";
}

/// Contact fire metrics
pub mod fires {
    /// Contact fires converted into bulk tasks, by fire type
    pub const DRAINED_TOTAL: &str = "taskhub_fires_drained_total";
}

/// Common label keys
pub mod labels {
    pub const CRON: &str = "cron";
    pub const QUEUE: &str = "queue";
    pub const TASK_TYPE: &str = "task_type";
    pub const FIRE_TYPE: &str = "fire_type";
    pub const INSTANCE: &str = "instance";
}

/// Histogram bucket boundaries, in seconds
pub mod buckets {
    /// Cron runs: most finish well under a second, the fire drain may use
    /// its whole budget, and nothing outlives the five minute timeout.
    pub const CRON_RUN: &[f64] = &[
        0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 60.0, 120.0, 300.0,
    ];
}
