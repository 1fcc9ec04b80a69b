//! Configuration for the monitor process.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use orbit_forker::{LaunchContext, ProcessForkerConfig};

use crate::coordinator::MonitorConfig;

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub node_name: String,

    /// Bus name of the monitor's own isolate.
    pub monitor_isolate: String,

    /// Bus name of the node forker.
    pub forker_isolate: String,

    /// Clean-stop window of a platform stop.
    pub stop_timeout_ms: u64,

    /// Working directory handed to launched isolates.
    pub home: PathBuf,

    /// Installation directory handed to launched isolates.
    pub base: PathBuf,

    /// Time between SIGTERM and a forced kill.
    pub stop_grace_ms: u64,

    /// Time after SIGTERM from which pings report an isolate stuck.
    pub stuck_after_ms: u64,

    /// How long a failed isolate may take to go down before its restart.
    pub restart_timeout_ms: u64,

    /// Bound on every forker request and signal.
    pub request_timeout_ms: u64,

    /// Program launched for `native` isolates.
    pub runner_program: PathBuf,

    pub broker_url: Option<String>,

    /// JSON platform description: isolate templates, capabilities and
    /// the component tree to place.
    pub platform_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let node_name =
            std::env::var("ORBIT_NODE_NAME").unwrap_or_else(|_| "localhost".to_string());

        let monitor_isolate =
            std::env::var("ORBIT_MONITOR_ISOLATE").unwrap_or_else(|_| "monitor".to_string());

        let forker_isolate = std::env::var("ORBIT_FORKER_ISOLATE")
            .unwrap_or_else(|_| format!("forker-{node_name}"));

        let home = std::env::var("ORBIT_HOME").unwrap_or_else(|_| ".".to_string());
        let base = std::env::var("ORBIT_BASE").unwrap_or_else(|_| home.clone());

        let runner_program =
            std::env::var("ORBIT_RUNNER_PROGRAM").unwrap_or_else(|_| "orbit-isolate".to_string());

        Ok(Self {
            node_name,
            monitor_isolate,
            forker_isolate,
            stop_timeout_ms: env_u64("ORBIT_STOP_TIMEOUT_MS", 1000)?,
            home: home.into(),
            base: base.into(),
            stop_grace_ms: env_u64("ORBIT_STOP_GRACE_MS", 3000)?,
            stuck_after_ms: env_u64("ORBIT_STUCK_AFTER_MS", 1000)?,
            restart_timeout_ms: env_u64("ORBIT_RESTART_TIMEOUT_MS", 5000)?,
            request_timeout_ms: env_u64("ORBIT_REQUEST_TIMEOUT_MS", 5000)?,
            runner_program: runner_program.into(),
            broker_url: std::env::var("ORBIT_BROKER_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            platform_file: std::env::var("ORBIT_PLATFORM_FILE").ok().map(PathBuf::from),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn monitor(&self) -> MonitorConfig {
        MonitorConfig {
            monitor_isolate: self.monitor_isolate.clone(),
            forker_isolate: self.forker_isolate.clone(),
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            restart_timeout: Duration::from_millis(self.restart_timeout_ms),
            signal_timeout: self.request_timeout(),
        }
    }

    pub fn forker(&self) -> ProcessForkerConfig {
        ProcessForkerConfig {
            stop_grace: Duration::from_millis(self.stop_grace_ms),
            stuck_after: Duration::from_millis(self.stuck_after_ms),
            launch: LaunchContext {
                node: self.node_name.clone(),
                home: self.home.clone(),
                base: self.base.clone(),
                broker_url: self.broker_url.clone(),
            },
        }
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid {key}: {raw}")),
        Err(_) => Ok(default),
    }
}
