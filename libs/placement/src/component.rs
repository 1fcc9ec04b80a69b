//! Components and their lifecycle state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lifecycle of a component, from placement to instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    /// Not placed yet.
    Waiting,
    /// Assigned to an isolate.
    Resolved,
    /// The hosting isolate is instantiating it.
    Instantiating,
    /// Running.
    Complete,
    /// Removed from the deployment; ignored by aggregation.
    Removed,
}

impl ComponentState {
    /// Position in the lifecycle; `None` for `Removed`.
    fn rank(self) -> Option<u8> {
        match self {
            ComponentState::Waiting => Some(0),
            ComponentState::Resolved => Some(1),
            ComponentState::Instantiating => Some(2),
            ComponentState::Complete => Some(3),
            ComponentState::Removed => None,
        }
    }

    /// The least advanced of two states.
    ///
    /// `Waiting` always wins, `Removed` never does.
    pub fn lowest(a: Self, b: Self) -> Self {
        if a == ComponentState::Waiting || b == ComponentState::Waiting {
            return ComponentState::Waiting;
        }
        match (a.rank(), b.rank()) {
            (None, _) => b,
            (_, None) => a,
            (Some(ra), Some(rb)) => {
                if ra <= rb {
                    a
                } else {
                    b
                }
            }
        }
    }
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComponentState::Waiting => "waiting",
            ComponentState::Resolved => "resolved",
            ComponentState::Instantiating => "instantiating",
            ComponentState::Complete => "complete",
            ComponentState::Removed => "removed",
        };
        write!(f, "{}", s)
    }
}

/// A component to be placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Namespaced name (`root.child.component`), set when the component is
    /// attached to a tree.
    pub name: String,

    /// Name inside the parent set.
    pub local_name: String,

    /// Component kind, matched against isolate capabilities.
    pub kind: String,

    /// Isolate the component is pinned to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolate: Option<String>,

    /// Dependency name → selection filter.
    #[serde(default)]
    pub field_filters: BTreeMap<String, String>,

    /// Namespaced name of the owning set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,

    pub state: ComponentState,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            local_name: name.clone(),
            name,
            kind: kind.into(),
            isolate: None,
            field_filters: BTreeMap::new(),
            parent_name: None,
            state: ComponentState::Waiting,
        }
    }

    /// Pins the component to an isolate.
    pub fn pinned_to(mut self, isolate: impl Into<String>) -> Self {
        self.isolate = Some(isolate.into());
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, filter: impl Into<String>) -> Self {
        self.field_filters.insert(field.into(), filter.into());
        self
    }

    /// Pinned isolate; an empty pin counts as unconstrained.
    pub fn pinned_isolate(&self) -> Option<&str> {
        self.isolate.as_deref().filter(|s| !s.is_empty())
    }

    /// Whether `isolate` may host this component given its `kinds`.
    pub fn can_run_on<F>(&self, isolate: &str, hosts_kind: F) -> bool
    where
        F: Fn(&str) -> bool,
    {
        hosts_kind(&self.kind) && self.pinned_isolate().is_none_or(|pin| pin == isolate)
    }

    pub(crate) fn attach(&mut self, parent: &str) {
        self.name = format!("{}.{}", parent, self.local_name);
        self.parent_name = Some(parent.to_string());
    }
}
