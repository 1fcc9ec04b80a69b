//! Isolate health reports.

use serde::{Deserialize, Serialize};

/// State carried by an [`IsolateStatusEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolateState {
    /// The isolate is up and loading or running its modules.
    Alive,
    /// The isolate hit a failure it cannot recover from by itself.
    Failure,
    /// The module runtime is shutting down.
    RuntimeStopping,
    /// The module runtime has stopped; the process is about to exit.
    RuntimeStopped,
}

impl IsolateState {
    /// Whether the state belongs to a clean stop sequence.
    pub fn is_clean_stop(&self) -> bool {
        matches!(self, IsolateState::RuntimeStopping | IsolateState::RuntimeStopped)
    }
}

impl std::fmt::Display for IsolateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IsolateState::Alive => "alive",
            IsolateState::Failure => "failure",
            IsolateState::RuntimeStopping => "runtime_stopping",
            IsolateState::RuntimeStopped => "runtime_stopped",
        };
        write!(f, "{}", s)
    }
}

/// Health report produced by an isolate.
///
/// `stamp` increases strictly with every report an isolate emits; monitors
/// use it to drop duplicates and out-of-order deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolateStatusEvent {
    /// Isolate name.
    pub isolate_id: String,

    /// Sequence stamp.
    pub stamp: i64,

    pub state: IsolateState,

    /// Loading progress in `[0, 1]`, meaningful for `Alive`.
    #[serde(default)]
    pub progress: f64,

    /// Free-form detail (failing module, error message).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl IsolateStatusEvent {
    pub fn new(isolate_id: impl Into<String>, stamp: i64, state: IsolateState) -> Self {
        Self {
            isolate_id: isolate_id.into(),
            stamp,
            state,
            progress: 0.0,
            detail: None,
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = progress.clamp(0.0, 1.0);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&IsolateState::RuntimeStopping).unwrap(),
            "\"runtime_stopping\""
        );
        assert!(IsolateState::RuntimeStopped.is_clean_stop());
        assert!(!IsolateState::Failure.is_clean_stop());
    }

    #[test]
    fn test_event_without_detail_omits_field() {
        let event = IsolateStatusEvent::new("iso-a", 3, IsolateState::Alive).with_progress(2.0);
        assert_eq!(event.progress, 1.0);

        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("detail").is_none());
        assert_eq!(json["stamp"], 3);

        let parsed: IsolateStatusEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }
}
