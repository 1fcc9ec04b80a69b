//! Module runtime interface and mock implementation.
//!
//! The module runtime is the container that loads, starts and stops the
//! modules hosted by an isolate. The Agent and the Guardian only see it
//! through [`ModuleRuntime`] and the [`ModuleEvent`] stream it emits.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Observed state of an installed module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleState {
    Installed,
    Resolved,
    Starting,
    Active,
    Stopping,
}

impl ModuleState {
    pub fn is_active(&self) -> bool {
        matches!(self, ModuleState::Active)
    }
}

/// Lifecycle transition reported by the module runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleEvent {
    Started(String),
    Updated(String),
    Stopped(String),
    Unresolved(String),
    Uninstalled(String),
}

impl ModuleEvent {
    pub fn module(&self) -> &str {
        match self {
            ModuleEvent::Started(m)
            | ModuleEvent::Updated(m)
            | ModuleEvent::Stopped(m)
            | ModuleEvent::Unresolved(m)
            | ModuleEvent::Uninstalled(m) => m,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModuleError {
    #[error("module not installed: {0}")]
    NotFound(String),

    #[error("module {module} failed to start: {reason}")]
    StartFailed { module: String, reason: String },

    #[error("module {module} failed to stop: {reason}")]
    StopFailed { module: String, reason: String },

    #[error("cannot install {module} from {location}: {reason}")]
    InstallFailed {
        module: String,
        location: String,
        reason: String,
    },
}

/// Module container of an isolate.
///
/// Modules are addressed by symbolic name. Lookups must be safe while
/// another task starts or stops a module.
#[async_trait]
pub trait ModuleRuntime: Send + Sync {
    /// Current state, `None` when the module is not installed.
    async fn module_state(&self, module: &str) -> Option<ModuleState>;

    async fn start_module(&self, module: &str) -> Result<(), ModuleError>;

    async fn stop_module(&self, module: &str) -> Result<(), ModuleError>;

    /// Installs a module from `location`; a no-op if already installed.
    async fn install_module(&self, module: &str, location: &str) -> Result<(), ModuleError>;

    /// Stops every module, in reverse start order.
    async fn stop_all(&self) -> Result<(), ModuleError>;
}

#[derive(Debug)]
struct MockModule {
    state: ModuleState,
    location: String,
}

#[derive(Debug, Default)]
struct MockState {
    modules: HashMap<String, MockModule>,
    started_order: Vec<String>,
    start_calls: HashMap<String, usize>,
    install_calls: HashMap<String, usize>,
    failing_starts: Vec<String>,
    failing_installs: Vec<String>,
}

/// In-memory module runtime for development and testing.
///
/// Emits [`ModuleEvent`]s for the transitions it performs when an event
/// sender is attached.
#[derive(Default)]
pub struct MockModuleRuntime {
    state: Mutex<MockState>,
    events: Option<mpsc::UnboundedSender<ModuleEvent>>,
}

impl MockModuleRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ModuleEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Pre-installs a module in the given state.
    pub fn with_module(self, module: &str, state: ModuleState) -> Self {
        self.set_state(module, state);
        self
    }

    /// Forces a module state without emitting an event.
    pub fn set_state(&self, module: &str, state: ModuleState) {
        let mut inner = self.lock();
        inner
            .modules
            .entry(module.to_string())
            .and_modify(|m| m.state = state)
            .or_insert_with(|| MockModule {
                state,
                location: format!("mock://{module}"),
            });
    }

    /// Removes a module, as an external uninstall would.
    pub fn uninstall(&self, module: &str) {
        let removed = self.lock().modules.remove(module).is_some();
        if removed {
            self.emit(ModuleEvent::Uninstalled(module.to_string()));
        }
    }

    /// Makes every later start of `module` fail.
    pub fn fail_starts(&self, module: &str) {
        self.lock().failing_starts.push(module.to_string());
    }

    /// Makes every later install of `module` fail.
    pub fn fail_installs(&self, module: &str) {
        self.lock().failing_installs.push(module.to_string());
    }

    pub fn start_calls(&self, module: &str) -> usize {
        self.lock().start_calls.get(module).copied().unwrap_or(0)
    }

    pub fn install_calls(&self, module: &str) -> usize {
        self.lock().install_calls.get(module).copied().unwrap_or(0)
    }

    pub fn location(&self, module: &str) -> Option<String> {
        self.lock().modules.get(module).map(|m| m.location.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the state from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ModuleEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl ModuleRuntime for MockModuleRuntime {
    async fn module_state(&self, module: &str) -> Option<ModuleState> {
        self.lock().modules.get(module).map(|m| m.state)
    }

    async fn start_module(&self, module: &str) -> Result<(), ModuleError> {
        {
            let mut inner = self.lock();
            *inner.start_calls.entry(module.to_string()).or_default() += 1;

            if inner.failing_starts.iter().any(|m| m == module) {
                return Err(ModuleError::StartFailed {
                    module: module.to_string(),
                    reason: "mock runtime configured to fail".to_string(),
                });
            }

            let entry = inner
                .modules
                .get_mut(module)
                .ok_or_else(|| ModuleError::NotFound(module.to_string()))?;
            if entry.state.is_active() {
                return Ok(());
            }
            entry.state = ModuleState::Active;
            inner.started_order.retain(|m| m != module);
            inner.started_order.push(module.to_string());
        }

        info!(module_id = %module, "[MOCK] Module started");
        self.emit(ModuleEvent::Started(module.to_string()));
        Ok(())
    }

    async fn stop_module(&self, module: &str) -> Result<(), ModuleError> {
        {
            let mut inner = self.lock();
            let entry = inner
                .modules
                .get_mut(module)
                .ok_or_else(|| ModuleError::NotFound(module.to_string()))?;
            if !entry.state.is_active() {
                return Ok(());
            }
            entry.state = ModuleState::Resolved;
            inner.started_order.retain(|m| m != module);
        }

        debug!(module_id = %module, "[MOCK] Module stopped");
        self.emit(ModuleEvent::Stopped(module.to_string()));
        Ok(())
    }

    async fn install_module(&self, module: &str, location: &str) -> Result<(), ModuleError> {
        let mut inner = self.lock();
        *inner.install_calls.entry(module.to_string()).or_default() += 1;

        if inner.failing_installs.iter().any(|m| m == module) {
            return Err(ModuleError::InstallFailed {
                module: module.to_string(),
                location: location.to_string(),
                reason: "mock runtime configured to fail".to_string(),
            });
        }

        inner
            .modules
            .entry(module.to_string())
            .or_insert_with(|| MockModule {
                state: ModuleState::Installed,
                location: location.to_string(),
            });
        debug!(module_id = %module, location = %location, "[MOCK] Module installed");
        Ok(())
    }

    async fn stop_all(&self) -> Result<(), ModuleError> {
        let order = self.lock().started_order.clone();
        for module in order.iter().rev() {
            self.stop_module(module).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_emits_event_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runtime = MockModuleRuntime::new()
            .with_events(tx)
            .with_module("web", ModuleState::Resolved);

        runtime.start_module("web").await.unwrap();
        runtime.start_module("web").await.unwrap();

        assert_eq!(runtime.module_state("web").await, Some(ModuleState::Active));
        assert_eq!(runtime.start_calls("web"), 2);
        assert_eq!(rx.try_recv().unwrap(), ModuleEvent::Started("web".to_string()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_unknown_module() {
        let runtime = MockModuleRuntime::new();
        let err = runtime.start_module("ghost").await.unwrap_err();
        assert_eq!(err, ModuleError::NotFound("ghost".to_string()));
    }

    #[tokio::test]
    async fn test_stop_all_reverses_start_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runtime = MockModuleRuntime::new()
            .with_events(tx)
            .with_module("a", ModuleState::Installed)
            .with_module("b", ModuleState::Installed);

        runtime.start_module("a").await.unwrap();
        runtime.start_module("b").await.unwrap();
        runtime.stop_all().await.unwrap();

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            events,
            vec![
                ModuleEvent::Started("a".to_string()),
                ModuleEvent::Started("b".to_string()),
                ModuleEvent::Stopped("b".to_string()),
                ModuleEvent::Stopped("a".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_install_keeps_existing_module() {
        let runtime = MockModuleRuntime::new().with_module("a", ModuleState::Active);
        runtime.install_module("a", "file:///a.so").await.unwrap();

        assert_eq!(runtime.module_state("a").await, Some(ModuleState::Active));
        assert_eq!(runtime.location("a").as_deref(), Some("mock://a"));
        assert_eq!(runtime.install_calls("a"), 1);
    }
}
