//! Isolate and forker records exchanged between monitors and forkers.

use std::collections::BTreeMap;

use orbit_id::{ForkerId, IsolateUid};
use serde::{Deserialize, Serialize};

/// Kind of the isolates that host a forker.
pub const FORKER_KIND: &str = "forker";

/// A module an isolate must keep active.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleRef {
    /// Symbolic name (unique inside an isolate).
    pub name: String,

    /// Where the module is installed from.
    pub location: String,

    /// Optional modules may be missing or fail without affecting health.
    #[serde(default)]
    pub optional: bool,
}

impl ModuleRef {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Everything a forker needs to launch an isolate.
///
/// A descriptor is not modified once handed to a forker; a respawn builds a
/// new descriptor with a fresh `uid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolateDescriptor {
    /// Launch identity; descriptors written without one get a fresh uid.
    #[serde(default = "IsolateUid::new")]
    pub uid: IsolateUid,

    /// Isolate name, used as its address on the signal bus.
    pub name: String,

    /// Node the isolate must run on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,

    /// Runtime flavor, selects the forker's runner.
    pub kind: String,

    #[serde(default)]
    pub modules: Vec<ModuleRef>,

    /// Namespaced names of the components placed on this isolate.
    #[serde(default)]
    pub components: Vec<String>,

    /// Extra process arguments, passed through untouched.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra process environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl IsolateDescriptor {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            uid: IsolateUid::new(),
            name: name.into(),
            node: None,
            kind: kind.into(),
            modules: Vec::new(),
            components: Vec::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            port: None,
        }
    }

    pub fn on_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_module(mut self, module: ModuleRef) -> Self {
        self.modules.push(module);
        self
    }

    /// Same isolate, new launch.
    pub fn respawn(&self) -> Self {
        Self {
            uid: IsolateUid::new(),
            ..self.clone()
        }
    }

    pub fn is_forker(&self) -> bool {
        self.kind == FORKER_KIND
    }
}

/// A forker known to the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkerRecord {
    pub forker_id: ForkerId,

    /// Node the forker launches isolates on.
    pub node: String,

    /// Host the forker is reachable at.
    pub host: String,

    /// Name of the isolate hosting the forker, for signal addressing.
    pub isolate: String,
}
