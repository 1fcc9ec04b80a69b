//! Configuration for the isolate process.

use anyhow::{Context, Result};
use orbit_id::IsolateUid;

use crate::agent::AgentConfig;
use crate::guardian::GuardianConfig;

/// Isolate configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Launch identity, set by the forker.
    pub isolate_uid: IsolateUid,

    /// Isolate name (bus address).
    pub isolate_name: String,

    pub node_name: String,

    /// Configuration broker URL; without one the isolate hosts no modules.
    pub broker_url: Option<String>,

    /// Debounce window before a stopped module is restarted.
    pub restart_delay_ms: u64,

    /// Guardian sweep interval.
    pub guardian_interval_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let isolate_uid = match std::env::var("ORBIT_ISOLATE_UID") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("invalid ORBIT_ISOLATE_UID: {raw}"))?,
            Err(_) => IsolateUid::new(),
        };

        let isolate_name = std::env::var("ORBIT_ISOLATE_NAME")
            .unwrap_or_else(|_| format!("isolate-{}", isolate_uid.ulid()));

        let node_name =
            std::env::var("ORBIT_NODE_NAME").unwrap_or_else(|_| "localhost".to_string());

        let broker_url = std::env::var("ORBIT_BROKER_URL")
            .ok()
            .filter(|url| !url.is_empty());

        Ok(Self {
            isolate_uid,
            isolate_name,
            node_name,
            broker_url,
            restart_delay_ms: env_u64("ORBIT_RESTART_DELAY_MS", 1500)?,
            guardian_interval_ms: env_u64("ORBIT_GUARDIAN_INTERVAL_MS", 1000)?,
        })
    }

    pub fn agent(&self) -> AgentConfig {
        AgentConfig {
            restart_delay: std::time::Duration::from_millis(self.restart_delay_ms),
        }
    }

    pub fn guardian(&self) -> GuardianConfig {
        GuardianConfig {
            interval: std::time::Duration::from_millis(self.guardian_interval_ms),
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
