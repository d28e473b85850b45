//! Semantic validation of a loaded configuration.

use crate::schema::TaskhubConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "crons.fires.time_limit_secs"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.severity, self.path, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    fn error(&mut self, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path: path.into(),
            message: message.into(),
        });
    }

    fn warning(&mut self, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Check the values that would otherwise break the scheduler at runtime.
#[must_use]
pub fn validate(config: &TaskhubConfig) -> ValidationResult {
    let mut result = ValidationResult::default();
    let crons = &config.crons;

    if config.database.url.trim().is_empty() {
        result.error("database.url", "must not be empty");
    }
    if config.database.max_connections == 0 {
        result.error("database.max_connections", "must be at least 1");
    }
    if config.redis_url.is_none() {
        result.warning(
            "redis_url",
            "not set: locks, stats and queues are process-local (single-node mode)",
        );
    }

    if crons.timeout_secs == 0 {
        result.error("crons.timeout_secs", "must be greater than 0");
    }

    for (path, secs) in [
        ("crons.fires.interval_secs", crons.fires.interval_secs),
        ("crons.throttle.interval_secs", crons.throttle.interval_secs),
        ("crons.queue_stats.interval_secs", crons.queue_stats.interval_secs),
    ] {
        if secs == 0 {
            result.error(path, "must be greater than 0");
        }
    }

    if crons.fires.fetch_size == 0 {
        result.error("crons.fires.fetch_size", "must be greater than 0");
    }
    if crons.fires.batch_size == 0 {
        result.error("crons.fires.batch_size", "must be greater than 0");
    }
    if crons.fires.time_limit_secs >= crons.fires.interval_secs {
        result.error(
            "crons.fires.time_limit_secs",
            format!(
                "must be below crons.fires.interval_secs ({})",
                crons.fires.interval_secs
            ),
        );
    }

    result
}
