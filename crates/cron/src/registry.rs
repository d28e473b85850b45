//! Named crons known to this process.

use std::{collections::BTreeMap, sync::Arc};

use {
    taskhub_metrics::{cron as cron_metrics, gauge},
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::info,
};

use crate::{Error, Result, driver::spawn_driver, job::CronDef, runtime::Runtime};

#[derive(Debug, Default)]
pub struct CronRegistry {
    crons: BTreeMap<String, CronDef>,
}

impl CronRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cron. Names are unique.
    pub fn register(&mut self, name: impl Into<String>, def: CronDef) -> Result<()> {
        let name = name.into();
        if self.crons.contains_key(&name) {
            return Err(Error::duplicate_cron(name));
        }
        self.crons.insert(name, def);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.crons.keys().map(String::as_str)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CronDef> {
        self.crons.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CronDef)> {
        self.crons.iter().map(|(name, def)| (name.as_str(), def))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.crons.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.crons.is_empty()
    }

    /// Spawn one driver per enabled cron onto `tracker` and return the
    /// number started. Drivers stop when `shutdown` is cancelled; wait on
    /// the tracker to see them finish.
    pub fn start_all(
        &self,
        rt: &Arc<Runtime>,
        tracker: &TaskTracker,
        shutdown: &CancellationToken,
    ) -> usize {
        let mut started = 0;
        for (name, def) in &self.crons {
            if rt.config.crons.is_disabled(name) {
                info!(cron = %name, "cron disabled by config");
                continue;
            }
            tracker.spawn(spawn_driver(
                name.clone(),
                def.clone(),
                Arc::clone(rt),
                shutdown.clone(),
            ));
            started += 1;
        }

        gauge!(cron_metrics::REGISTERED).set(started as f64);
        info!(started, registered = self.len(), "crons started");
        started
    }
}
