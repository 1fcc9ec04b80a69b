//! Signal envelope and group addressing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A signal as delivered to listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Signal name (e.g. `/orbit/isolate/status`).
    pub name: String,

    /// Name of the isolate that fired the signal.
    pub sender: String,

    /// When the signal was fired.
    pub sent_at: DateTime<Utc>,

    /// Signal-specific payload; `Null` for bare signals.
    pub content: serde_json::Value,
}

impl Signal {
    pub fn new(name: impl Into<String>, sender: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            sender: sender.into(),
            sent_at: Utc::now(),
            content,
        }
    }

    /// Deserializes the payload.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.content.clone())
    }
}

/// Named groups of isolates a signal can be addressed to.
///
/// Group sends never loop back to the sender, except `Current` which
/// addresses only the sender itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalGroup {
    /// Every connected isolate.
    All,
    /// Monitor isolates.
    Monitors,
    /// Forker isolates.
    Forkers,
    /// The sending isolate.
    Current,
    /// Isolates on the sender's node.
    Local,
}

impl std::fmt::Display for SignalGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalGroup::All => "all",
            SignalGroup::Monitors => "monitors",
            SignalGroup::Forkers => "forkers",
            SignalGroup::Current => "current",
            SignalGroup::Local => "local",
        };
        write!(f, "{}", s)
    }
}
