//! Module watchdog.
//!
//! The Agent reacts to module lifecycle events. A stopped or unresolved
//! module gets a restart scheduled after a fixed delay; a start or update
//! event for the same module inside that window cancels it, so the
//! stop/start pair of a hot update never looks like a crash. Uninstalled
//! modules are reinstalled from their original location right away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use orbit_events::ModuleRef;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::modules::{ModuleEvent, ModuleRuntime};

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Debounce window before a stopped module is restarted.
    pub restart_delay: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_millis(1500),
        }
    }
}

/// One-way latch held while the isolate is being torn down.
#[derive(Debug, Default)]
pub struct CriticalSection {
    entered: AtomicBool,
}

impl CriticalSection {
    /// Returns false if the section was already entered.
    pub fn try_enter(&self) -> bool {
        self.entered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }
}

struct PendingRestart {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Keeps the managed modules of an isolate running.
pub struct Agent {
    runtime: Arc<dyn ModuleRuntime>,
    managed: HashMap<String, ModuleRef>,
    config: AgentConfig,
    timers: Mutex<HashMap<String, PendingRestart>>,
    generation: AtomicU64,
    critical: CriticalSection,
}

impl Agent {
    pub fn new(
        runtime: Arc<dyn ModuleRuntime>,
        modules: impl IntoIterator<Item = ModuleRef>,
        config: AgentConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            managed: modules
                .into_iter()
                .map(|m| (m.name.clone(), m))
                .collect(),
            config,
            timers: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            critical: CriticalSection::default(),
        })
    }

    pub fn is_managed(&self, module: &str) -> bool {
        self.managed.contains_key(module)
    }

    /// Consumes module events until the channel closes or shutdown is signalled.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ModuleEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(modules = self.managed.len(), "Starting module agent");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.cancel_all();
        info!("Module agent shutting down");
    }

    pub async fn handle_event(self: &Arc<Self>, event: ModuleEvent) {
        let module = event.module().to_string();
        if !self.is_managed(&module) {
            trace!(module_id = %module, "Ignoring event for unmanaged module");
            return;
        }

        if self.critical.is_entered() {
            debug!(module_id = %module, ?event, "Dropping module event in critical section");
            return;
        }

        match event {
            ModuleEvent::Stopped(_) | ModuleEvent::Unresolved(_) => self.schedule_restart(&module),
            ModuleEvent::Started(_) | ModuleEvent::Updated(_) => {
                if self.cancel(&module) {
                    debug!(module_id = %module, "Module came back, restart cancelled");
                }
            }
            ModuleEvent::Uninstalled(_) => {
                self.cancel(&module);
                self.reinstall(&module).await;
            }
        }
    }

    /// Enters the critical section and cancels every pending restart.
    ///
    /// Re-entering is an anomaly: it is logged and otherwise ignored.
    pub fn enter_critical_section(&self) -> bool {
        if !self.critical.try_enter() {
            error!("Critical section entered twice");
            return false;
        }
        self.cancel_all();
        info!("Entered critical section, module restarts disabled");
        true
    }

    pub fn in_critical_section(&self) -> bool {
        self.critical.is_entered()
    }

    /// Modules with a restart timer still pending, sorted by name.
    pub fn pending_restarts(&self) -> Vec<String> {
        let mut pending: Vec<String> = self.timers().keys().cloned().collect();
        pending.sort();
        pending
    }

    fn schedule_restart(self: &Arc<Self>, module: &str) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let agent = Arc::clone(self);
        let name = module.to_string();
        let delay = self.config.restart_delay;

        let mut timers = self.timers();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            agent.restart_fired(&name, generation).await;
        });

        if let Some(previous) = timers.insert(module.to_string(), PendingRestart { generation, handle }) {
            previous.handle.abort();
        }
        debug!(module_id = %module, delay_ms = delay.as_millis() as u64, "Restart scheduled");
    }

    fn cancel(&self, module: &str) -> bool {
        match self.timers().remove(module) {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    fn cancel_all(&self) {
        for (_, pending) in self.timers().drain() {
            pending.handle.abort();
        }
    }

    async fn restart_fired(&self, module: &str, generation: u64) {
        {
            let mut timers = self.timers();
            match timers.get(module) {
                Some(pending) if pending.generation == generation => {
                    timers.remove(module);
                }
                // Cancelled or superseded after the timer woke up.
                _ => return,
            }
        }

        if self.critical.is_entered() {
            return;
        }
        self.restart(module).await;
    }

    /// Restarts a module unless it is already active.
    async fn restart(&self, module: &str) {
        match self.runtime.module_state(module).await {
            Some(state) if state.is_active() => {
                debug!(module_id = %module, "Module already active, skipping restart");
            }
            Some(_) => match self.runtime.start_module(module).await {
                Ok(()) => info!(module_id = %module, "Module restarted"),
                Err(e) => error!(module_id = %module, error = %e, "Failed to restart module"),
            },
            None => warn!(module_id = %module, "Module vanished before restart"),
        }
    }

    async fn reinstall(&self, module: &str) {
        let Some(reference) = self.managed.get(module) else {
            return;
        };

        if let Err(e) = self
            .runtime
            .install_module(&reference.name, &reference.location)
            .await
        {
            error!(module_id = %module, location = %reference.location, error = %e, "Failed to reinstall module");
            return;
        }

        match self.runtime.start_module(module).await {
            Ok(()) => info!(module_id = %module, location = %reference.location, "Module reinstalled"),
            Err(e) => error!(module_id = %module, error = %e, "Failed to start reinstalled module"),
        }
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<String, PendingRestart>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
