//! Monitor coordinator.
//!
//! The cluster-level control loop. It filters isolate status reports by
//! stamp, applies the isolate failure policy, starts isolates through the
//! forker when forkers register, and drives the two-phase platform stop:
//! stop signals first, then forced stops for whatever did not report a
//! clean stop before the timeout.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use orbit_events::{
    names, ForkerRecord, IsolateState, IsolateStatusEvent, SignalBus, SignalGroup,
};
use orbit_forker::{Forker, StartResult};
use orbit_id::ForkerId;
use serde_json::Value;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::directory::{IsolateCondition, IsolateDirectory};
use crate::error::MonitorError;
use crate::forkers::{ForkerEvent, ForkerEventKind, ForkerRegistry};

const DOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ============================================================================
// Configuration
// ============================================================================

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Bus name of the isolate hosting this monitor.
    pub monitor_isolate: String,

    /// Bus name of the isolate hosting the node's forker.
    pub forker_isolate: String,

    /// How long the platform stop waits for clean stops before forcing.
    pub stop_timeout: Duration,

    /// How long a failed isolate may take to go down before its restart
    /// is abandoned.
    pub restart_timeout: Duration,

    /// Bound on every signal this monitor sends.
    pub signal_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            monitor_isolate: "monitor".to_string(),
            forker_isolate: "forker".to_string(),
            stop_timeout: Duration::from_millis(1000),
            restart_timeout: Duration::from_secs(5),
            signal_timeout: Duration::from_secs(5),
        }
    }
}

/// Stops the forker at the end of a platform stop, in place of a stop signal.
#[async_trait]
pub trait ForkerStopHandler: Send + Sync {
    async fn stop_forker(&self);
}

// ============================================================================
// Outcomes
// ============================================================================

/// What became of a status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    Accepted,
    /// Stamp not newer than the last accepted one; dropped.
    Obsolete,
    /// No status at all: contact with the isolate was lost.
    ContactLost,
}

/// Result of a platform stop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every isolate reported a clean stop before the timeout.
    pub graceful: bool,

    /// Isolates stopped through the forker, sorted by name.
    pub forced: Vec<String>,
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct MonitorCoordinator {
    config: MonitorConfig,
    bus: Arc<dyn SignalBus>,
    forker: Arc<dyn Forker>,
    forker_stop: Option<Arc<dyn ForkerStopHandler>>,
    directory: RwLock<IsolateDirectory>,
    forkers: RwLock<ForkerRegistry>,
    last_stamps: Mutex<HashMap<String, i64>>,
    pending_stop: Mutex<HashSet<String>>,
    /// Released once `pending_stop` empties during a platform stop.
    stop_barrier: Semaphore,
    running: AtomicBool,
    stop_in_progress: AtomicBool,
}

impl MonitorCoordinator {
    pub fn new(
        config: MonitorConfig,
        bus: Arc<dyn SignalBus>,
        forker: Arc<dyn Forker>,
        directory: IsolateDirectory,
    ) -> Self {
        Self {
            config,
            bus,
            forker,
            forker_stop: None,
            directory: RwLock::new(directory),
            forkers: RwLock::new(ForkerRegistry::new()),
            last_stamps: Mutex::new(HashMap::new()),
            pending_stop: Mutex::new(HashSet::new()),
            stop_barrier: Semaphore::new(0),
            running: AtomicBool::new(true),
            stop_in_progress: AtomicBool::new(false),
        }
    }

    pub fn with_forker_stop_handler(mut self, handler: Arc<dyn ForkerStopHandler>) -> Self {
        self.forker_stop = Some(handler);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn directory(&self) -> tokio::sync::RwLockReadGuard<'_, IsolateDirectory> {
        self.directory.read().await
    }

    /// Isolates still expected to report a clean stop, sorted by name.
    pub fn pending_stop(&self) -> Vec<String> {
        let mut pending: Vec<String> = self.pending().iter().cloned().collect();
        pending.sort();
        pending
    }

    // ------------------------------------------------------------------------
    // Isolate status
    // ------------------------------------------------------------------------

    /// Handles a status report from `source`; `None` means contact was lost.
    pub async fn handle_isolate_status(
        self: &Arc<Self>,
        source: &str,
        status: Option<IsolateStatusEvent>,
    ) -> StatusOutcome {
        let Some(event) = status else {
            self.on_isolate_failure(source, "contact lost").await;
            return StatusOutcome::ContactLost;
        };

        if !self.accept_stamp(&event.isolate_id, event.stamp) {
            debug!(
                isolate_id = %event.isolate_id,
                stamp = event.stamp,
                "Dropping obsolete status"
            );
            return StatusOutcome::Obsolete;
        }

        match event.state {
            IsolateState::Failure => {
                let reason = event.detail.as_deref().unwrap_or("failure reported");
                self.on_isolate_failure(&event.isolate_id, reason).await;
            }
            IsolateState::RuntimeStopping | IsolateState::RuntimeStopped => {
                self.on_clean_stop(&event.isolate_id).await;
            }
            IsolateState::Alive => {
                debug!(
                    isolate_id = %event.isolate_id,
                    progress = event.progress,
                    "Isolate alive"
                );
                self.directory
                    .write()
                    .await
                    .set_condition(&event.isolate_id, IsolateCondition::Running);
            }
        }

        StatusOutcome::Accepted
    }

    /// Stores `stamp` if it is newer than the last one seen for `isolate`.
    fn accept_stamp(&self, isolate: &str, stamp: i64) -> bool {
        let mut stamps = self.stamps();
        match stamps.get(isolate) {
            Some(&last) if stamp <= last => false,
            _ => {
                stamps.insert(isolate.to_string(), stamp);
                true
            }
        }
    }

    async fn on_clean_stop(&self, isolate: &str) {
        info!(isolate_id = %isolate, "Isolate stopping cleanly");

        // Under the directory lock, so a platform stop building its
        // pending set either sees the isolate stopped or gets it removed.
        let released = {
            let mut directory = self.directory.write().await;
            directory.set_condition(isolate, IsolateCondition::Stopped);
            let mut pending = self.pending();
            pending.remove(isolate) && pending.is_empty()
        };
        if released && self.stop_in_progress.load(Ordering::SeqCst) {
            debug!("Every isolate stopped, releasing stop barrier");
            self.stop_barrier.add_permits(1);
        }
    }

    /// Failure policy: mark the isolate lost, tell everyone, and while the
    /// platform is running, take the old process down and launch a fresh one.
    async fn on_isolate_failure(self: &Arc<Self>, isolate: &str, reason: &str) {
        warn!(isolate_id = %isolate, reason = %reason, "Isolate failure");

        let (known, restartable) = {
            let mut directory = self.directory.write().await;
            let known = directory.set_condition(isolate, IsolateCondition::Lost);
            let restartable = known
                && !directory.is_forker(isolate)
                && isolate != self.config.monitor_isolate
                && isolate != self.config.forker_isolate;
            (known, restartable)
        };

        self.broadcast(names::ISOLATE_LOST, Value::from(isolate), SignalGroup::All)
            .await;

        if !known {
            debug!(isolate_id = %isolate, "Failed isolate is not managed here");
            return;
        }
        if !restartable || !self.is_running() {
            return;
        }

        if !self.ensure_down(isolate).await {
            error!(
                isolate_id = %isolate,
                timeout_ms = self.config.restart_timeout.as_millis() as u64,
                "Failed isolate did not go down, not restarting"
            );
            return;
        }

        let respawned = self.directory.write().await.respawn(isolate);
        let Some(descriptor) = respawned else {
            return;
        };
        info!(isolate_id = %isolate, uid = %descriptor.uid, "Restarting failed isolate");

        match self.launch(isolate).await {
            Some(StartResult::Success) => self.mark(isolate, IsolateCondition::Running).await,
            Some(StartResult::AlreadyRunning) => {
                error!(isolate_id = %isolate, "Failed isolate still running after stop, restart failed")
            }
            _ => warn!(isolate_id = %isolate, "Restart of failed isolate refused"),
        }
    }

    /// Asks the forker to stop `isolate` and waits, up to the restart
    /// timeout, until it holds no live process for it.
    async fn ensure_down(&self, isolate: &str) -> bool {
        self.forker.stop_isolate(isolate).await;

        let down = async {
            loop {
                let status = self.forker.ping(isolate).await;
                if !status.is_running() {
                    debug!(isolate_id = %isolate, %status, "Failed isolate is down");
                    return;
                }
                tokio::time::sleep(DOWN_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(self.config.restart_timeout, down)
            .await
            .is_ok()
    }

    /// Records an isolate lost according to a peer monitor.
    pub async fn note_isolate_lost(&self, isolate: &str) {
        if self
            .directory
            .write()
            .await
            .set_condition(isolate, IsolateCondition::Lost)
        {
            info!(isolate_id = %isolate, "Isolate reported lost by a peer");
        }
    }

    // ------------------------------------------------------------------------
    // Forkers
    // ------------------------------------------------------------------------

    pub async fn register_forker(
        self: &Arc<Self>,
        record: ForkerRecord,
    ) -> Option<JoinHandle<Vec<(String, bool)>>> {
        let event = self.forkers.write().await.register(record)?;
        self.handle_forker_event(event).await
    }

    pub async fn unregister_forker(self: &Arc<Self>, forker_id: &ForkerId) {
        let event = self.forkers.write().await.unregister(forker_id);
        if let Some(event) = event {
            self.handle_forker_event(event).await;
        }
    }

    /// Starts the isolates of a newly registered forker's node in the
    /// background (the returned task yields each start outcome), or
    /// declares the isolates of a departed forker's node lost.
    pub async fn handle_forker_event(
        self: &Arc<Self>,
        event: ForkerEvent,
    ) -> Option<JoinHandle<Vec<(String, bool)>>> {
        match event.kind {
            ForkerEventKind::Registered => {
                info!(forker_id = %event.forker_id, node = %event.node, "Forker registered");
                let coordinator = Arc::clone(self);
                Some(tokio::spawn(async move {
                    let isolates = coordinator.startable_on(&event.node).await;
                    let mut outcomes = Vec::with_capacity(isolates.len());
                    for isolate in isolates {
                        let started = coordinator.start_isolate(&isolate).await;
                        outcomes.push((isolate, started));
                    }
                    outcomes
                }))
            }
            ForkerEventKind::Unregistered => {
                warn!(forker_id = %event.forker_id, node = %event.node, "Forker unregistered");
                let hosted = self.directory.read().await.on_node(&event.node);
                for isolate in hosted {
                    self.directory
                        .write()
                        .await
                        .set_condition(&isolate, IsolateCondition::Lost);
                    self.broadcast(names::ISOLATE_LOST, Value::from(isolate.as_str()), SignalGroup::All)
                        .await;
                }
                None
            }
        }
    }

    async fn startable_on(&self, node: &str) -> Vec<String> {
        let directory = self.directory.read().await;
        directory
            .on_node(node)
            .into_iter()
            .filter(|name| *name != self.config.monitor_isolate && !directory.is_forker(name))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Start / stop
    // ------------------------------------------------------------------------

    /// Starts an isolate through the forker. True for SUCCESS and
    /// ALREADY_RUNNING only.
    pub async fn start_isolate(&self, isolate: &str) -> bool {
        match self.launch(isolate).await {
            Some(result) if result.is_success() => {
                self.mark(isolate, IsolateCondition::Running).await;
                true
            }
            _ => false,
        }
    }

    /// Hands the isolate's descriptor to the forker. `None` when refused
    /// before reaching it.
    async fn launch(&self, isolate: &str) -> Option<StartResult> {
        if !self.is_running() {
            warn!(isolate_id = %isolate, "Platform stopping, not starting isolate");
            return None;
        }

        let Some(descriptor) = self.directory.read().await.get(isolate).cloned() else {
            warn!(isolate_id = %isolate, "Cannot start unknown isolate");
            return None;
        };
        if descriptor.node.is_none() {
            warn!(isolate_id = %isolate, "Isolate has no node assigned");
            return None;
        }

        let result = self.forker.start_isolate(&descriptor).await;
        if result.is_success() {
            info!(isolate_id = %isolate, uid = %descriptor.uid, %result, "Isolate started");
        } else {
            warn!(isolate_id = %isolate, %result, "Failed to start isolate");
        }
        Some(result)
    }

    async fn mark(&self, isolate: &str, condition: IsolateCondition) {
        self.directory.write().await.set_condition(isolate, condition);
    }

    /// Stops the whole platform.
    ///
    /// Returns once the stop signals are out; the returned task waits for
    /// clean stops (bounded by `stop_timeout`), forces the rest, then stops
    /// the forker and finally this monitor's own isolate.
    pub async fn stop_platform(self: &Arc<Self>) -> Result<JoinHandle<ShutdownReport>, MonitorError> {
        if self.stop_in_progress.swap(true, Ordering::SeqCst) {
            error!("Platform stop requested while one is in progress");
            return Err(MonitorError::StopInProgress);
        }

        self.running.store(false, Ordering::SeqCst);
        self.forker.set_platform_stopping().await;

        // Only running isolates can answer with a clean stop.
        let targets: Vec<String> = {
            let directory = self.directory.read().await;
            let targets: Vec<String> = directory
                .names()
                .into_iter()
                .filter(|name| {
                    directory.condition(name) == Some(IsolateCondition::Running)
                        && *name != self.config.monitor_isolate
                        && *name != self.config.forker_isolate
                        && !directory.is_forker(name)
                })
                .collect();
            *self.pending() = targets.iter().cloned().collect();
            targets
        };
        info!(isolates = targets.len(), "Stopping platform");

        self.broadcast(names::MONITOR_STOP_PLATFORM, Value::Null, SignalGroup::Monitors)
            .await;
        self.send_stops(&targets).await;

        let coordinator = Arc::clone(self);
        Ok(tokio::spawn(async move {
            coordinator.finish_stop(!targets.is_empty()).await
        }))
    }

    async fn send_stops(&self, targets: &[String]) {
        let mut sends = JoinSet::new();
        for target in targets {
            let bus = Arc::clone(&self.bus);
            let target = target.clone();
            let timeout = self.config.signal_timeout;
            sends.spawn(async move {
                let sent = tokio::time::timeout(
                    timeout,
                    bus.fire(names::ISOLATE_STOP, Value::Null, &target),
                )
                .await;
                (target, sent)
            });
        }

        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((target, Ok(Ok(_)))) => debug!(isolate_id = %target, "Stop signal sent"),
                Ok((target, Ok(Err(e)))) => {
                    warn!(isolate_id = %target, error = %e, "Failed to send stop signal")
                }
                Ok((target, Err(_))) => warn!(isolate_id = %target, "Stop signal timed out"),
                Err(e) => error!(error = %e, "Stop signal task failed"),
            }
        }
    }

    async fn finish_stop(&self, wait: bool) -> ShutdownReport {
        let graceful = if wait {
            match tokio::time::timeout(self.config.stop_timeout, self.stop_barrier.acquire()).await {
                Ok(Ok(permit)) => {
                    permit.forget();
                    true
                }
                Ok(Err(_)) => false,
                Err(_) => {
                    info!(
                        timeout_ms = self.config.stop_timeout.as_millis() as u64,
                        "Clean stop timed out, forcing remaining isolates"
                    );
                    false
                }
            }
        } else {
            true
        };

        let mut forced: Vec<String> = self.pending().drain().collect();
        forced.sort();
        for isolate in &forced {
            warn!(isolate_id = %isolate, "Forcing isolate stop");
            self.forker.stop_isolate(isolate).await;
        }

        match &self.forker_stop {
            Some(handler) => handler.stop_forker().await,
            None => {
                self.fire(names::ISOLATE_STOP, &self.config.forker_isolate)
                    .await
            }
        }

        // Last to go.
        self.fire(names::ISOLATE_STOP, &self.config.monitor_isolate)
            .await;

        info!(graceful, forced = forced.len(), "Platform stopped");
        ShutdownReport { graceful, forced }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn fire(&self, name: &str, target: &str) {
        let sent = tokio::time::timeout(
            self.config.signal_timeout,
            self.bus.fire(name, Value::Null, target),
        )
        .await;
        match sent {
            Ok(Ok(_)) => debug!(signal = name, target = %target, "Signal sent"),
            Ok(Err(e)) => warn!(signal = name, target = %target, error = %e, "Failed to send signal"),
            Err(_) => warn!(signal = name, target = %target, "Signal timed out"),
        }
    }

    async fn broadcast(&self, name: &str, content: Value, group: SignalGroup) {
        let sent = tokio::time::timeout(
            self.config.signal_timeout,
            self.bus.fire_group(name, content, group),
        )
        .await;
        match sent {
            Ok(Ok(results)) => debug!(signal = name, %group, reached = results.reached(), "Signal broadcast"),
            Ok(Err(e)) => warn!(signal = name, %group, error = %e, "Failed to broadcast signal"),
            Err(_) => warn!(signal = name, %group, "Broadcast timed out"),
        }
    }

    fn stamps(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        self.last_stamps.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pending(&self) -> MutexGuard<'_, HashSet<String>> {
        self.pending_stop.lock().unwrap_or_else(|e| e.into_inner())
    }
}
