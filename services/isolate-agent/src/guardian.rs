//! Periodic reconciliation of the module set.
//!
//! Complements the event-driven [`Agent`](crate::Agent): a module that
//! never produced a transition event (one that failed to start at all, for
//! instance) is still noticed here on the next sweep.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use orbit_events::ModuleRef;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::modules::ModuleRuntime;
use crate::status::StatusReporter;

/// Guardian configuration.
#[derive(Debug, Clone)]
pub struct GuardianConfig {
    pub interval: Duration,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
        }
    }
}

/// Outcome of a single sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Mandatory modules that are not installed.
    pub missing: Vec<String>,
    pub restarted: Vec<String>,
    pub failed: Vec<String>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.failed.is_empty()
    }
}

pub struct Guardian {
    runtime: Arc<dyn ModuleRuntime>,
    modules: Vec<ModuleRef>,
    config: GuardianConfig,
    reporter: Option<Arc<StatusReporter>>,
    /// Mandatory modules whose failure has already been reported.
    reported: Mutex<HashSet<String>>,
}

impl Guardian {
    pub fn new(
        runtime: Arc<dyn ModuleRuntime>,
        modules: Vec<ModuleRef>,
        config: GuardianConfig,
    ) -> Self {
        Self {
            runtime,
            modules,
            config,
            reporter: None,
            reported: Mutex::new(HashSet::new()),
        }
    }

    /// Reports mandatory module failures as FAILURE status events.
    pub fn with_reporter(mut self, reporter: Arc<StatusReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Runs sweeps at the configured interval until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            modules = self.modules.len(),
            interval_ms = self.config.interval.as_millis() as u64,
            "Starting guardian"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    if !report.is_clean() {
                        debug!(?report, "Guardian sweep found problems");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Guardian shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for module in &self.modules {
            let name = module.name.as_str();
            match self.runtime.module_state(name).await {
                None if module.optional => {
                    debug!(module_id = %name, "Optional module not installed");
                }
                None => {
                    warn!(module_id = %name, location = %module.location, "Missing module");
                    report.missing.push(name.to_string());
                }
                Some(state) if state.is_active() => {
                    self.reported.lock().await.remove(name);
                }
                Some(state) => match self.runtime.start_module(name).await {
                    Ok(()) => {
                        info!(module_id = %name, from = ?state, "Guardian started module");
                        self.reported.lock().await.remove(name);
                        report.restarted.push(name.to_string());
                    }
                    Err(e) if module.optional => {
                        warn!(module_id = %name, error = %e, "Optional module failed to start");
                    }
                    Err(e) => {
                        error!(module_id = %name, error = %e, "Mandatory module failed to start");
                        self.report_failure(name, &e.to_string()).await;
                        report.failed.push(name.to_string());
                    }
                },
            }
        }

        report
    }

    async fn report_failure(&self, module: &str, reason: &str) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        if !self.reported.lock().await.insert(module.to_string()) {
            return;
        }

        let detail = format!("module {module} cannot start: {reason}");
        if let Err(e) = reporter.failure(detail).await {
            warn!(module_id = %module, error = %e, "Failed to report module failure");
        }
    }
}
