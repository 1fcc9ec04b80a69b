//! OS process forker.
//!
//! Every launched isolate gets a watcher task that owns the child process.
//! The watcher waits for the child to exit, or for a stop request, in which
//! case it sends SIGTERM to the isolate's process group and escalates to a
//! kill once the grace period runs out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use orbit_events::{ForkerRecord, IsolateDescriptor};
use orbit_id::{ForkerId, IsolateUid};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::codes::{PingStatus, StartResult};
use crate::error::ForkerError;
use crate::forker::Forker;
use crate::runner::{IsolateRunner, LaunchContext};

/// Configuration for the process forker.
#[derive(Debug, Clone)]
pub struct ProcessForkerConfig {
    /// Time between SIGTERM and a forced kill.
    pub stop_grace: Duration,
    /// How long a process may outlive SIGTERM before pings report it stuck.
    /// Shorter than `stop_grace`, or the kill comes first.
    pub stuck_after: Duration,
    pub launch: LaunchContext,
}

impl Default for ProcessForkerConfig {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_millis(3000),
            stuck_after: Duration::from_millis(1000),
            launch: LaunchContext::default(),
        }
    }
}

/// Reported once for every launched process when it exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolateExit {
    pub isolate: String,
    pub uid: IsolateUid,
    /// Exit code, `None` when killed by a signal or lost.
    pub code: Option<i32>,
    /// Whether the exit followed a stop request.
    pub requested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessState {
    Running,
    Exited { code: Option<i32> },
    /// Waiting on the child failed; its fate is unknown.
    Lost,
}

struct ProcessEntry {
    uid: IsolateUid,
    pid: Option<u32>,
    state: ProcessState,
    stop_tx: Option<oneshot::Sender<()>>,
    stop_requested_at: Option<Instant>,
    watcher: JoinHandle<()>,
}

type ProcessTable = Arc<RwLock<HashMap<String, ProcessEntry>>>;

/// Launches isolates as child processes of the current process.
pub struct ProcessForker {
    forker_id: ForkerId,
    node: String,
    config: ProcessForkerConfig,
    runners: HashMap<String, Arc<dyn IsolateRunner>>,
    processes: ProcessTable,
    stopping: AtomicBool,
    exits: Option<mpsc::UnboundedSender<IsolateExit>>,
}

impl ProcessForker {
    pub fn new(node: impl Into<String>, config: ProcessForkerConfig) -> Self {
        Self {
            forker_id: ForkerId::new(),
            node: node.into(),
            config,
            runners: HashMap::new(),
            processes: Arc::new(RwLock::new(HashMap::new())),
            stopping: AtomicBool::new(false),
            exits: None,
        }
    }

    /// Registers the runner for its isolate kind, replacing any previous one.
    pub fn with_runner(mut self, runner: impl IsolateRunner + 'static) -> Self {
        self.runners
            .insert(runner.kind().to_string(), Arc::new(runner));
        self
    }

    /// Sends an [`IsolateExit`] on `tx` whenever a launched process exits.
    pub fn with_exit_sender(mut self, tx: mpsc::UnboundedSender<IsolateExit>) -> Self {
        self.exits = Some(tx);
        self
    }

    pub fn forker_id(&self) -> &ForkerId {
        &self.forker_id
    }

    /// Registration record for this forker, hosted by `isolate`.
    pub fn record(&self, host: impl Into<String>, isolate: impl Into<String>) -> ForkerRecord {
        ForkerRecord {
            forker_id: self.forker_id,
            node: self.node.clone(),
            host: host.into(),
            isolate: isolate.into(),
        }
    }

    pub fn is_platform_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Names of isolates whose process is still running.
    pub async fn running(&self) -> Vec<String> {
        let processes = self.processes.read().await;
        let mut names: Vec<String> = processes
            .iter()
            .filter(|(_, entry)| entry.state == ProcessState::Running)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Requests termination of every running isolate.
    pub async fn stop_all(&self) {
        for name in self.running().await {
            self.stop_isolate(&name).await;
        }
    }

    fn launch(
        &self,
        runner: &dyn IsolateRunner,
        descriptor: &IsolateDescriptor,
    ) -> Result<Child, ForkerError> {
        let mut cmd = runner.command(descriptor, &self.config.launch)?;
        Ok(cmd.spawn()?)
    }
}

#[async_trait]
impl Forker for ProcessForker {
    async fn start_isolate(&self, descriptor: &IsolateDescriptor) -> StartResult {
        let isolate = descriptor.name.as_str();

        if self.is_platform_stopping() {
            warn!(isolate, "Refusing launch: {}", ForkerError::PlatformStopping);
            return StartResult::RequestError;
        }

        let Some(runner) = self.runners.get(&descriptor.kind) else {
            warn!(
                isolate,
                "Refusing launch: {}",
                ForkerError::UnknownKind(descriptor.kind.clone())
            );
            return StartResult::UnknownKind;
        };

        // Held across the spawn so two concurrent requests cannot both launch.
        let mut processes = self.processes.write().await;
        if let Some(entry) = processes.get(isolate) {
            if entry.state == ProcessState::Running {
                debug!(isolate, pid = ?entry.pid, "Isolate already running");
                return StartResult::AlreadyRunning;
            }
        }

        let child = match self.launch(runner.as_ref(), descriptor) {
            Ok(child) => child,
            Err(e) => {
                error!(isolate, kind = %descriptor.kind, error = %e, "Failed to launch isolate");
                return StartResult::RunnerException;
            }
        };

        let pid = child.id();
        let (stop_tx, stop_rx) = oneshot::channel();
        let watcher = tokio::spawn(watch_process(
            child,
            descriptor.name.clone(),
            descriptor.uid,
            stop_rx,
            self.config.stop_grace,
            Arc::clone(&self.processes),
            self.exits.clone(),
        ));

        processes.insert(
            descriptor.name.clone(),
            ProcessEntry {
                uid: descriptor.uid,
                pid,
                state: ProcessState::Running,
                stop_tx: Some(stop_tx),
                stop_requested_at: None,
                watcher,
            },
        );

        info!(
            isolate,
            uid = %descriptor.uid,
            kind = %descriptor.kind,
            pid = ?pid,
            "Isolate launched"
        );
        StartResult::Success
    }

    async fn stop_isolate(&self, isolate: &str) {
        let mut processes = self.processes.write().await;
        let Some(entry) = processes.get_mut(isolate) else {
            debug!(isolate, "Stop requested for unknown isolate");
            return;
        };

        if entry.state != ProcessState::Running {
            debug!(isolate, "Stop requested for exited isolate");
            return;
        }

        match entry.stop_tx.take() {
            Some(tx) => {
                entry.stop_requested_at = Some(Instant::now());
                if tx.send(()).is_err() {
                    warn!(isolate, "Watcher gone before stop request");
                } else {
                    info!(isolate, pid = ?entry.pid, "Stopping isolate");
                }
            }
            None => debug!(isolate, "Stop already requested"),
        }
    }

    async fn ping(&self, isolate: &str) -> PingStatus {
        let processes = self.processes.read().await;
        let Some(entry) = processes.get(isolate) else {
            return PingStatus::NoProcessRef;
        };

        match entry.state {
            ProcessState::Exited { .. } => PingStatus::Dead,
            ProcessState::Lost => PingStatus::NoWatcher,
            ProcessState::Running if entry.watcher.is_finished() => PingStatus::NoWatcher,
            ProcessState::Running => {
                let overdue = entry
                    .stop_requested_at
                    .is_some_and(|at| at.elapsed() > self.config.stuck_after);
                if overdue {
                    PingStatus::Stuck
                } else {
                    PingStatus::Alive
                }
            }
        }
    }

    fn is_on_node(&self, forker_id: &ForkerId, node: &str) -> bool {
        *forker_id == self.forker_id && node == self.node
    }

    async fn set_platform_stopping(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            info!(node = %self.node, "Platform stopping, launches disabled");
        }
    }

    fn node_name(&self) -> &str {
        &self.node
    }
}

async fn watch_process(
    mut child: Child,
    isolate: String,
    uid: IsolateUid,
    mut stop_rx: oneshot::Receiver<()>,
    grace: Duration,
    processes: ProcessTable,
    exits: Option<mpsc::UnboundedSender<IsolateExit>>,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        Ok(()) = &mut stop_rx => None,
    };

    let requested = exited.is_none();
    let status = match exited {
        Some(status) => status,
        None => terminate(&mut child, grace, &isolate).await,
    };

    let state = match &status {
        Ok(status) => ProcessState::Exited {
            code: status.code(),
        },
        Err(e) => {
            error!(isolate = %isolate, error = %e, "Lost track of isolate process");
            ProcessState::Lost
        }
    };

    {
        let mut processes = processes.write().await;
        if let Some(entry) = processes.get_mut(&isolate) {
            if entry.uid == uid {
                entry.state = state;
                entry.stop_tx = None;
            }
        }
    }

    let code = match state {
        ProcessState::Exited { code } => code,
        _ => None,
    };
    if requested {
        info!(isolate = %isolate, code = ?code, "Isolate stopped");
    } else {
        warn!(isolate = %isolate, code = ?code, "Isolate exited unexpectedly");
    }

    if let Some(tx) = exits {
        let _ = tx.send(IsolateExit {
            isolate,
            uid,
            code,
            requested,
        });
    }
}

async fn terminate(
    child: &mut Child,
    grace: Duration,
    isolate: &str,
) -> std::io::Result<std::process::ExitStatus> {
    signal_group(child, Signal::Term);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(isolate, grace_ms = grace.as_millis() as u64, "Isolate ignored SIGTERM, killing");
            signal_group(child, Signal::Kill);
            if let Err(e) = child.start_kill() {
                debug!(isolate, error = %e, "Kill after group signal failed");
            }
            child.wait().await
        }
    }
}

#[derive(Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(child: &mut Child, signal: Signal) {
    let Some(pid) = child.id() else {
        return;
    };
    let sig = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // The runner puts every isolate in its own session, so pid == pgid.
    unsafe {
        libc::kill(-(pid as i32), sig);
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _signal: Signal) {
    let _ = child.start_kill();
}
