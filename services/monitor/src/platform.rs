//! Platform description file.
//!
//! Names the isolates a monitor may launch (as descriptor templates), the
//! component kinds each of them hosts, and the component tree to place. The
//! directory is built from the placement, so every isolate is launched with
//! the components the resolver assigned to it.

use std::collections::BTreeMap;

use orbit_events::IsolateDescriptor;
use orbit_placement::{ComponentSetNode, ComponentSpec, IsolateCapabilities};
use serde::Deserialize;

use crate::directory::{plan_platform, IsolateDirectory};
use crate::error::MonitorError;

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformFile {
    /// Isolate templates.
    pub isolates: Vec<IsolateDescriptor>,

    /// Component kinds per isolate, in placement order.
    #[serde(default)]
    pub capabilities: Vec<CapabilityEntry>,

    #[serde(default)]
    pub components: ComponentSetFile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CapabilityEntry {
    pub isolate: String,
    pub kinds: Vec<String>,
}

/// A component set as written in the file. Names are local; namespaces are
/// computed when the tree is built.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentSetFile {
    #[serde(default = "root_name")]
    pub name: String,

    #[serde(default)]
    pub components: Vec<ComponentFile>,

    #[serde(default)]
    pub children: Vec<ComponentSetFile>,
}

impl Default for ComponentSetFile {
    fn default() -> Self {
        Self {
            name: root_name(),
            components: Vec::new(),
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComponentFile {
    pub name: String,
    pub kind: String,

    /// Isolate the component is pinned to.
    #[serde(default)]
    pub isolate: Option<String>,

    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

fn root_name() -> String {
    "root".to_string()
}

impl ComponentSetFile {
    pub fn to_tree(&self) -> ComponentSetNode {
        let mut node = ComponentSetNode::new(&self.name);
        for component in &self.components {
            let mut spec = ComponentSpec::new(&component.name, &component.kind);
            if let Some(isolate) = &component.isolate {
                spec = spec.pinned_to(isolate);
            }
            for (field, filter) in &component.filters {
                spec = spec.with_filter(field, filter);
            }
            node.add_component(spec);
        }
        for child in &self.children {
            node.add_child(child.to_tree());
        }
        node
    }
}

impl PlatformFile {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn capabilities(&self) -> IsolateCapabilities {
        let mut capabilities = IsolateCapabilities::new();
        for entry in &self.capabilities {
            capabilities.insert(entry.isolate.clone(), entry.kinds.iter().cloned());
        }
        capabilities
    }

    /// Places the component tree and builds the directory. Templates
    /// without a node run on `default_node`.
    pub fn plan(&self, default_node: &str) -> Result<IsolateDirectory, MonitorError> {
        let templates: Vec<IsolateDescriptor> = self
            .isolates
            .iter()
            .cloned()
            .map(|mut template| {
                if template.node.is_none() {
                    template.node = Some(default_node.to_string());
                }
                template
            })
            .collect();

        let mut tree = self.components.to_tree();
        plan_platform(&mut tree, &self.capabilities(), &templates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const PLATFORM: &str = r#"{
        "isolates": [
            { "name": "web", "kind": "native" },
            { "name": "jobs", "kind": "native", "node": "node-b" },
            { "name": "forker-a", "kind": "forker" }
        ],
        "capabilities": [
            { "isolate": "web", "kinds": ["http"] },
            { "isolate": "jobs", "kinds": ["http", "worker"] }
        ],
        "components": {
            "name": "shop",
            "components": [{ "name": "front", "kind": "http" }],
            "children": [
                {
                    "name": "billing",
                    "components": [
                        { "name": "invoices", "kind": "worker" },
                        { "name": "api", "kind": "http", "isolate": "jobs" }
                    ]
                }
            ]
        }
    }"#;

    #[test]
    fn test_plan_places_components_on_templates() {
        let platform = PlatformFile::from_json(PLATFORM).unwrap();
        let directory = platform.plan("node-a").unwrap();

        assert_eq!(directory.len(), 3);
        let web = directory.get("web").unwrap();
        assert_eq!(web.node.as_deref(), Some("node-a"));
        assert_eq!(web.components, vec!["shop.front".to_string()]);

        let jobs = directory.get("jobs").unwrap();
        assert_eq!(jobs.node.as_deref(), Some("node-b"));
        assert_eq!(
            jobs.components,
            vec!["shop.billing.invoices".to_string(), "shop.billing.api".to_string()]
        );
        assert!(directory.is_forker("forker-a"));
    }

    #[test]
    fn test_plan_reports_unresolved_components() {
        let mut platform = PlatformFile::from_json(PLATFORM).unwrap();
        platform.capabilities.pop();

        match platform.plan("node-a") {
            Err(MonitorError::Placement(failure)) => {
                assert_eq!(failure.set, "shop.billing");
                let names: Vec<&str> =
                    failure.unresolved.iter().map(|c| c.name.as_str()).collect();
                assert_eq!(names, vec!["shop.billing.invoices", "shop.billing.api"]);
            }
            other => panic!("expected placement failure, got {other:?}"),
        }
    }

    #[rstest]
    #[case(r#"{ "isolates": [] }"#, 0)]
    #[case(r#"{ "isolates": [{ "name": "solo", "kind": "native" }] }"#, 1)]
    fn test_minimal_platform(#[case] raw: &str, #[case] isolates: usize) {
        let directory = PlatformFile::from_json(raw).unwrap().plan("node-a").unwrap();
        assert_eq!(directory.len(), isolates);
    }

    #[test]
    fn test_malformed_platform_rejected() {
        assert!(PlatformFile::from_json(r#"{ "components": {} }"#).is_err());
    }
}
