//! Isolate host.
//!
//! Wires the Agent, the Guardian and the status reporter of one isolate,
//! answers the isolate-stop signal, and runs the stop sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use orbit_events::{names, ModuleRef, Signal, SignalBus, SignalListener};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::agent::{Agent, AgentConfig};
use crate::guardian::{Guardian, GuardianConfig};
use crate::modules::{ModuleEvent, ModuleRuntime};
use crate::status::StatusReporter;

/// Settings for an [`IsolateHost`].
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub modules: Vec<ModuleRef>,
    pub agent: AgentConfig,
    pub guardian: GuardianConfig,
    /// Bound on every status report.
    pub report_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            agent: AgentConfig::default(),
            guardian: GuardianConfig::default(),
            report_timeout: Duration::from_secs(5),
        }
    }
}

pub struct IsolateHost {
    isolate: String,
    runtime: Arc<dyn ModuleRuntime>,
    agent: Arc<Agent>,
    reporter: Arc<StatusReporter>,
    guardian_stop: watch::Sender<bool>,
    guardian_task: Mutex<Option<JoinHandle<()>>>,
    agent_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    stopping: AtomicBool,
}

impl IsolateHost {
    /// Boots the managed modules and starts the Agent and Guardian.
    pub async fn start(
        bus: Arc<dyn SignalBus>,
        runtime: Arc<dyn ModuleRuntime>,
        events: mpsc::UnboundedReceiver<ModuleEvent>,
        config: HostConfig,
    ) -> Arc<Self> {
        let isolate = bus.local_isolate().to_string();
        let reporter = Arc::new(StatusReporter::new(Arc::clone(&bus), config.report_timeout));
        info!(isolate_id = %isolate, modules = config.modules.len(), "Starting isolate");

        boot_modules(runtime.as_ref(), &config.modules, &reporter).await;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (guardian_stop, guardian_rx) = watch::channel(false);

        let agent = Agent::new(Arc::clone(&runtime), config.modules.clone(), config.agent);
        let agent_task = tokio::spawn(Arc::clone(&agent).run(events, shutdown_rx));

        let guardian = Arc::new(
            Guardian::new(Arc::clone(&runtime), config.modules, config.guardian)
                .with_reporter(Arc::clone(&reporter)),
        );
        let guardian_task = tokio::spawn(guardian.run(guardian_rx));

        let host = Arc::new(Self {
            isolate,
            runtime,
            agent,
            reporter,
            guardian_stop,
            guardian_task: Mutex::new(Some(guardian_task)),
            agent_task: Mutex::new(Some(agent_task)),
            shutdown,
            stopping: AtomicBool::new(false),
        });

        bus.register_listener(
            names::ISOLATE_STOP,
            Arc::new(StopListener {
                host: Arc::downgrade(&host),
            }),
        )
        .await;

        host
    }

    pub fn isolate(&self) -> &str {
        &self.isolate
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Becomes true once the stop sequence has completed.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Runs the stop sequence. Returns false if a stop is already under way.
    pub async fn stop(&self) -> bool {
        if self.stopping.swap(true, Ordering::SeqCst) {
            warn!(isolate_id = %self.isolate, "Stop already in progress");
            return false;
        }
        info!(isolate_id = %self.isolate, "Stopping isolate");

        if let Err(e) = self.reporter.stopping().await {
            warn!(isolate_id = %self.isolate, error = %e, "Failed to report stopping state");
        }

        self.agent.enter_critical_section();

        let _ = self.guardian_stop.send(true);
        if let Some(task) = self.guardian_task.lock().await.take() {
            if let Err(e) = task.await {
                error!(isolate_id = %self.isolate, error = %e, "Guardian task failed");
            }
        }

        if let Err(e) = self.runtime.stop_all().await {
            error!(isolate_id = %self.isolate, error = %e, "Failed to stop modules");
        }

        if let Err(e) = self.reporter.stopped().await {
            warn!(isolate_id = %self.isolate, error = %e, "Failed to report stopped state");
        }

        let _ = self.shutdown.send(true);
        if let Some(task) = self.agent_task.lock().await.take() {
            if let Err(e) = task.await {
                error!(isolate_id = %self.isolate, error = %e, "Agent task failed");
            }
        }

        info!(isolate_id = %self.isolate, "Isolate stopped");
        true
    }
}

async fn boot_modules(runtime: &dyn ModuleRuntime, modules: &[ModuleRef], reporter: &StatusReporter) {
    let total = modules.len().max(1) as f64;

    for (i, module) in modules.iter().enumerate() {
        let name = module.name.as_str();

        if runtime.module_state(name).await.is_none() {
            if let Err(e) = runtime.install_module(name, &module.location).await {
                if module.optional {
                    warn!(module_id = %name, error = %e, "Optional module not installed");
                } else {
                    error!(module_id = %name, error = %e, "Failed to install module");
                }
                continue;
            }
        }

        // Failures are left to the guardian.
        if let Err(e) = runtime.start_module(name).await {
            warn!(module_id = %name, error = %e, "Module did not start at boot");
        }

        if let Err(e) = reporter.alive((i + 1) as f64 / total).await {
            warn!(error = %e, "Failed to report boot progress");
        }
    }

    if modules.is_empty() {
        if let Err(e) = reporter.alive(1.0).await {
            warn!(error = %e, "Failed to report boot progress");
        }
    }
}

struct StopListener {
    host: Weak<IsolateHost>,
}

#[async_trait]
impl SignalListener for StopListener {
    async fn handle_signal(&self, signal: &Signal) -> Option<serde_json::Value> {
        match self.host.upgrade() {
            Some(host) => {
                info!(sender = %signal.sender, "Stop requested");
                tokio::spawn(async move {
                    host.stop().await;
                });
            }
            None => warn!(sender = %signal.sender, "Stop requested after host shutdown"),
        }
        None
    }
}
