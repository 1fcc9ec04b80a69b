//! Isolates known to the monitor, and how they are derived from a placement.

use std::collections::BTreeMap;

use orbit_events::IsolateDescriptor;
use orbit_placement::{resolve, ComponentSetNode, IsolateCapabilities, ResolutionMap};
use tracing::{debug, info};

use crate::error::MonitorError;

/// Last known condition of an isolate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolateCondition {
    /// Described but never launched.
    Planned,
    Running,
    Stopped,
    Lost,
}

#[derive(Debug, Clone)]
struct IsolateEntry {
    descriptor: IsolateDescriptor,
    condition: IsolateCondition,
}

/// Descriptors of every isolate this monitor is responsible for, by name.
#[derive(Debug, Clone, Default)]
pub struct IsolateDirectory {
    isolates: BTreeMap<String, IsolateEntry>,
}

impl IsolateDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an isolate. A replaced isolate keeps its condition.
    pub fn insert(&mut self, descriptor: IsolateDescriptor) {
        let condition = self
            .isolates
            .get(&descriptor.name)
            .map(|e| e.condition)
            .unwrap_or(IsolateCondition::Planned);
        self.isolates.insert(
            descriptor.name.clone(),
            IsolateEntry {
                descriptor,
                condition,
            },
        );
    }

    pub fn remove(&mut self, name: &str) -> Option<IsolateDescriptor> {
        self.isolates.remove(name).map(|e| e.descriptor)
    }

    pub fn get(&self, name: &str) -> Option<&IsolateDescriptor> {
        self.isolates.get(name).map(|e| &e.descriptor)
    }

    pub fn condition(&self, name: &str) -> Option<IsolateCondition> {
        self.isolates.get(name).map(|e| e.condition)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.isolates.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.isolates.keys().cloned().collect()
    }

    /// Isolates assigned to `node`, in name order.
    pub fn on_node(&self, node: &str) -> Vec<String> {
        self.isolates
            .iter()
            .filter(|(_, e)| e.descriptor.node.as_deref() == Some(node))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn is_forker(&self, name: &str) -> bool {
        self.get(name).is_some_and(IsolateDescriptor::is_forker)
    }

    /// Returns false for an unknown isolate.
    pub fn set_condition(&mut self, name: &str, condition: IsolateCondition) -> bool {
        match self.isolates.get_mut(name) {
            Some(entry) => {
                entry.condition = condition;
                true
            }
            None => false,
        }
    }

    /// Gives an isolate a fresh launch identity and returns the new descriptor.
    pub fn respawn(&mut self, name: &str) -> Option<IsolateDescriptor> {
        let entry = self.isolates.get_mut(name)?;
        entry.descriptor = entry.descriptor.respawn();
        Some(entry.descriptor.clone())
    }

    pub fn len(&self) -> usize {
        self.isolates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.isolates.is_empty()
    }
}

/// Turns a resolution into launch descriptors.
///
/// Every isolate in `resolution` must have a template (matched by name);
/// the template is copied and given the namespaced names of its components.
pub fn plan_isolates(
    resolution: &ResolutionMap,
    templates: &[IsolateDescriptor],
) -> Result<Vec<IsolateDescriptor>, MonitorError> {
    resolution
        .iter()
        .map(|(isolate, components)| {
            let template = templates
                .iter()
                .find(|t| t.name == isolate)
                .ok_or_else(|| MonitorError::MissingTemplate(isolate.to_string()))?;

            let mut descriptor = template.clone();
            for component in components {
                if !descriptor.components.contains(&component.name) {
                    descriptor.components.push(component.name.clone());
                }
            }
            debug!(
                isolate = %isolate,
                components = descriptor.components.len(),
                "Isolate planned"
            );
            Ok(descriptor)
        })
        .collect()
}

/// Resolves `root` against `capabilities` and builds the directory.
///
/// Templates that received no component are kept as well: an isolate may
/// host modules without hosting placed components.
pub fn plan_platform(
    root: &mut ComponentSetNode,
    capabilities: &IsolateCapabilities,
    templates: &[IsolateDescriptor],
) -> Result<IsolateDirectory, MonitorError> {
    let mut resolution = ResolutionMap::new();
    resolve(root, capabilities, &mut resolution)?;

    let mut directory = IsolateDirectory::new();
    for template in templates {
        directory.insert(template.clone());
    }
    for descriptor in plan_isolates(&resolution, templates)? {
        directory.insert(descriptor);
    }

    info!(
        isolates = directory.len(),
        components = resolution.total(),
        "Platform planned"
    );
    Ok(directory)
}
