//! Placement resolver.
//!
//! Bin-packs a component tree onto isolates: every component goes to the
//! first isolate, in capability order, that hosts its kind and satisfies its
//! pin.

use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, warn};

use crate::component::{ComponentSpec, ComponentState};
use crate::tree::ComponentSetNode;

/// Component kinds each isolate can host, in caller-defined order.
#[derive(Debug, Clone, Default)]
pub struct IsolateCapabilities {
    entries: Vec<(String, HashSet<String>)>,
}

impl IsolateCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds kinds to an isolate, keeping the isolate's original position.
    pub fn insert<I, S>(&mut self, isolate: impl Into<String>, kinds: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let isolate = isolate.into();
        let kinds = kinds.into_iter().map(Into::into);
        match self.entries.iter_mut().find(|(name, _)| *name == isolate) {
            Some((_, existing)) => existing.extend(kinds),
            None => self.entries.push((isolate, kinds.collect())),
        }
    }

    pub fn with<I, S>(mut self, isolate: impl Into<String>, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(isolate, kinds);
        self
    }

    pub fn contains_isolate(&self, isolate: &str) -> bool {
        self.entries.iter().any(|(name, _)| name == isolate)
    }

    pub fn hosts(&self, isolate: &str, kind: &str) -> bool {
        self.entries
            .iter()
            .any(|(name, kinds)| name == isolate && kinds.contains(kind))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HashSet<String>)> {
        self.entries.iter().map(|(name, kinds)| (name.as_str(), kinds))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Isolate → components assigned to it, accumulated over resolution passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionMap {
    entries: Vec<(String, Vec<ComponentSpec>)>,
}

impl ResolutionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds components to an isolate, skipping those already listed there.
    pub fn merge<I>(&mut self, isolate: &str, components: I)
    where
        I: IntoIterator<Item = ComponentSpec>,
    {
        let pos = match self.entries.iter().position(|(name, _)| name == isolate) {
            Some(pos) => pos,
            None => {
                self.entries.push((isolate.to_string(), Vec::new()));
                self.entries.len() - 1
            }
        };

        let list = &mut self.entries[pos].1;
        for component in components {
            if !list.iter().any(|c| c.name == component.name) {
                list.push(component);
            }
        }
    }

    pub fn components_for(&self, isolate: &str) -> &[ComponentSpec] {
        self.entries
            .iter()
            .find(|(name, _)| name == isolate)
            .map(|(_, list)| list.as_slice())
            .unwrap_or(&[])
    }

    /// Isolate a component was assigned to.
    pub fn isolate_of(&self, component: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, list)| list.iter().any(|c| c.name == component))
            .map(|(name, _)| name.as_str())
    }

    pub fn isolates(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ComponentSpec])> {
        self.entries
            .iter()
            .map(|(name, list)| (name.as_str(), list.as_slice()))
    }

    /// Number of component assignments.
    pub fn total(&self) -> usize {
        self.entries.iter().map(|(_, list)| list.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// A component left without an isolate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedComponent {
    pub name: String,
    pub kind: String,
    pub pinned: Option<String>,
}

impl std::fmt::Display for UnresolvedComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.pinned {
            Some(isolate) => write!(f, "{} ({} pinned to {})", self.name, self.kind, isolate),
            None => write!(f, "{} ({})", self.name, self.kind),
        }
    }
}

/// Placement could not assign every component of a set.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot place {} component(s) of {set}: {}", .unresolved.len(), list(.unresolved))]
pub struct PlacementFailure {
    /// Namespaced name of the set that failed.
    pub set: String,
    pub unresolved: Vec<UnresolvedComponent>,
}

fn list(unresolved: &[UnresolvedComponent]) -> String {
    unresolved
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl PlacementFailure {
    /// Components pinned to an isolate the capability map does not know.
    pub fn pinned_to_unknown<'a>(
        &'a self,
        capabilities: &'a IsolateCapabilities,
    ) -> impl Iterator<Item = &'a UnresolvedComponent> {
        self.unresolved.iter().filter(|c| {
            c.pinned
                .as_deref()
                .is_some_and(|isolate| !capabilities.contains_isolate(isolate))
        })
    }
}

/// Assigns every component of `node` to an isolate.
///
/// Children are resolved first; the first failing subtree aborts the whole
/// resolution. Components already present in `into` and removed components
/// are not placed again. Assigned components are marked
/// [`ComponentState::Resolved`] in the tree.
pub fn resolve(
    node: &mut ComponentSetNode,
    capabilities: &IsolateCapabilities,
    into: &mut ResolutionMap,
) -> Result<(), PlacementFailure> {
    for child in &mut node.children {
        resolve(child, capabilities, into)?;
    }

    let mut unresolved: Vec<usize> = node
        .components
        .iter()
        .enumerate()
        .filter(|(_, c)| c.state != ComponentState::Removed && into.isolate_of(&c.name).is_none())
        .map(|(i, _)| i)
        .collect();

    for (isolate, kinds) in capabilities.iter() {
        if unresolved.is_empty() {
            break;
        }

        let (matched, rest): (Vec<usize>, Vec<usize>) = unresolved
            .into_iter()
            .partition(|&i| node.components[i].can_run_on(isolate, |k| kinds.contains(k)));
        unresolved = rest;

        if matched.is_empty() {
            continue;
        }

        let placed: Vec<ComponentSpec> = matched
            .into_iter()
            .map(|i| {
                let component = &mut node.components[i];
                component.state = ComponentState::Resolved;
                component.clone()
            })
            .collect();

        debug!(
            set = %node.name(),
            isolate = %isolate,
            count = placed.len(),
            "Placed components"
        );
        into.merge(isolate, placed);
    }

    if unresolved.is_empty() {
        return Ok(());
    }

    let failure = PlacementFailure {
        set: node.name().to_string(),
        unresolved: unresolved
            .into_iter()
            .map(|i| {
                let c = &node.components[i];
                UnresolvedComponent {
                    name: c.name.clone(),
                    kind: c.kind.clone(),
                    pinned: c.pinned_isolate().map(str::to_string),
                }
            })
            .collect(),
    };
    warn!(set = %failure.set, error = %failure, "Placement failed");
    Err(failure)
}
