//! Installs the process-wide recorder for a taskhub instance.

use {anyhow::Result, tracing::info};

use crate::labels;

/// Renders what this instance has recorded so far.
#[derive(Clone, Default)]
pub struct MetricsHandle {
    #[cfg(feature = "prometheus")]
    prometheus: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl MetricsHandle {
    /// Prometheus text exposition, or an empty string when nothing is
    /// being exported.
    #[must_use]
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        if let Some(handle) = &self.prometheus {
            return handle.render();
        }
        String::new()
    }

    #[must_use]
    pub fn is_exporting(&self) -> bool {
        #[cfg(feature = "prometheus")]
        {
            self.prometheus.is_some()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            false
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    pub enabled: bool,
    /// Stamped on every series as `instance`, so per-instance crons can be
    /// told apart once scraped.
    pub instance_id: String,
    /// Extra labels for every series. An explicit `instance` wins over
    /// `instance_id`.
    pub global_labels: Vec<(String, String)>,
}

impl MetricsRecorderConfig {
    /// Labels applied to every series, sorted by key.
    #[must_use]
    pub fn resolved_labels(&self) -> Vec<(String, String)> {
        let mut resolved: Vec<(String, String)> = self
            .global_labels
            .iter()
            .filter(|(key, _)| !key.trim().is_empty())
            .cloned()
            .collect();
        let has_instance = resolved.iter().any(|(key, _)| key == labels::INSTANCE);
        if !has_instance && !self.instance_id.is_empty() {
            resolved.push((labels::INSTANCE.to_string(), self.instance_id.clone()));
        }
        resolved.sort_by(|a, b| a.0.cmp(&b.0));
        resolved.dedup_by(|a, b| a.0 == b.0);
        resolved
    }
}

/// Install the recorder. Call once, before the first cron is started.
///
/// When disabled, or built without `prometheus`, the `metrics` macros stay
/// on the facade's no-op recorder and [`MetricsHandle::render`] is empty.
///
/// # Errors
///
/// Fails if the bucket layout is rejected or a recorder is already installed.
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<MetricsHandle> {
    if !config.enabled {
        info!("metrics disabled");
        return Ok(MetricsHandle::default());
    }

    #[cfg(feature = "prometheus")]
    {
        let labels = config.resolved_labels();
        let handle = install_prometheus(&labels)?;
        info!(labels = ?labels, "prometheus recorder installed");
        Ok(MetricsHandle {
            prometheus: Some(handle),
        })
    }

    #[cfg(not(feature = "prometheus"))]
    {
        info!(instance = %config.instance_id, "built without prometheus, metrics are dropped");
        Ok(MetricsHandle::default())
    }
}

#[cfg(feature = "prometheus")]
fn install_prometheus(
    labels: &[(String, String)],
) -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    use {
        crate::{buckets, cron},
        metrics_exporter_prometheus::{Matcher, PrometheusBuilder},
    };

    let mut builder = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(cron::RUN_SECONDS.to_string()), buckets::CRON_RUN)?;
    for (key, value) in labels {
        builder = builder.add_global_label(key, value);
    }

    // No HTTP listener; the handle renders on demand.
    Ok(builder.install_recorder()?)
}
