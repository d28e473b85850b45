use {
    anyhow::{Result, bail},
    taskhub_config::{Severity, TaskhubConfig, validate},
    taskhub_cron::{CronRegistry, Runtime, register_default_crons},
    taskhub_metrics::{MetricsRecorderConfig, init_metrics},
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::{debug, error, info, warn},
};

/// Start every enabled cron and block until SIGINT/SIGTERM, then wait for the
/// drivers (and any run in flight) to finish.
pub async fn run(config: TaskhubConfig) -> Result<()> {
    let result = validate(&config);
    for d in &result.diagnostics {
        match d.severity {
            Severity::Error => error!(path = %d.path, "{}", d.message),
            Severity::Warning => warn!(path = %d.path, "{}", d.message),
        }
    }
    if result.has_errors() {
        bail!("invalid configuration, see errors above");
    }

    let metrics = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        instance_id: config.resolved_instance_id(),
        global_labels: config
            .metrics
            .global_labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    })?;

    let mut registry = CronRegistry::new();
    register_default_crons(&mut registry, &config)?;
    let rt = Runtime::connect(config).await?;

    let tracker = TaskTracker::new();
    let shutdown = CancellationToken::new();
    registry.start_all(&rt, &tracker, &shutdown);
    tracker.close();

    wait_for_signal().await?;
    info!("shutting down, waiting for running crons");
    shutdown.cancel();
    tracker.wait().await;

    debug!(metrics = %metrics.render(), "final metrics");
    info!("taskhub stopped");
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = term.recv() => {},
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}

/// Print the registered crons with their cadence and lock scope.
pub fn list(config: &TaskhubConfig) -> Result<()> {
    let mut registry = CronRegistry::new();
    register_default_crons(&mut registry, config)?;

    for (name, def) in registry.iter() {
        let scope = if def.all_instances {
            "per-instance"
        } else {
            "fleet"
        };
        let state = if config.crons.is_disabled(name) {
            "  (disabled)"
        } else {
            ""
        };
        println!(
            "{name:<16} {:<16} {scope:<13} timeout {:?}{state}",
            def.cadence.to_string(),
            def.timeout
        );
    }
    Ok(())
}

/// Print what the stats store holds for `name`.
pub async fn stats(config: TaskhubConfig, name: &str) -> Result<()> {
    if config.redis_url.is_none() {
        eprintln!("redis_url is not set: stats only live inside a running process");
    }
    let rt = Runtime::connect(config).await?;
    match rt.stats.read(name).await? {
        Some(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
        None => println!("no stats recorded for {name}"),
    }
    Ok(())
}
