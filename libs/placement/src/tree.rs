//! Component set trees.

use serde::{Deserialize, Serialize};

use crate::component::{ComponentSpec, ComponentState};

/// A named set of components plus nested child sets.
///
/// A node owns its children. `parent` is `None` exactly for the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSetNode {
    local_name: String,
    name: String,
    parent: Option<String>,
    pub(crate) components: Vec<ComponentSpec>,
    pub(crate) children: Vec<ComponentSetNode>,
}

impl ComponentSetNode {
    /// Creates a root set.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            local_name: name.clone(),
            name,
            parent: None,
            components: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Namespaced name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Namespaced name of the parent set.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn components(&self) -> &[ComponentSpec] {
        &self.components
    }

    pub fn children(&self) -> &[ComponentSetNode] {
        &self.children
    }

    /// Adds a component, namespacing it under this set.
    pub fn add_component(&mut self, mut component: ComponentSpec) -> &mut Self {
        component.attach(&self.name);
        self.components.push(component);
        self
    }

    /// Adds a child set; the whole subtree is renamed under this set.
    pub fn add_child(&mut self, mut child: ComponentSetNode) -> &mut Self {
        child.reparent(Some(&self.name));
        self.children.push(child);
        self
    }

    /// Builder-style [`add_component`](Self::add_component).
    pub fn with_component(mut self, component: ComponentSpec) -> Self {
        self.add_component(component);
        self
    }

    /// Builder-style [`add_child`](Self::add_child).
    pub fn with_child(mut self, child: ComponentSetNode) -> Self {
        self.add_child(child);
        self
    }

    /// Renames this set and recomputes every descendant name.
    pub fn rename(&mut self, local_name: impl Into<String>) {
        self.local_name = local_name.into();
        let parent = self.parent.clone();
        self.reparent(parent.as_deref());
    }

    fn reparent(&mut self, parent: Option<&str>) {
        self.parent = parent.map(str::to_string);
        self.name = match parent {
            Some(parent) => format!("{}.{}", parent, self.local_name),
            None => self.local_name.clone(),
        };

        for component in &mut self.components {
            component.attach(&self.name);
        }

        let name = self.name.clone();
        for child in &mut self.children {
            child.reparent(Some(&name));
        }
    }

    /// All components of the subtree, depth-first, children first.
    pub fn components_recursive(&self) -> Vec<&ComponentSpec> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a ComponentSpec>) {
        for child in &self.children {
            child.collect(out);
        }
        out.extend(self.components.iter());
    }

    /// Finds a component anywhere in the subtree by namespaced name.
    pub fn find_component(&self, name: &str) -> Option<&ComponentSpec> {
        self.components
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.children.iter().find_map(|c| c.find_component(name)))
    }

    pub fn find_component_mut(&mut self, name: &str) -> Option<&mut ComponentSpec> {
        if let Some(pos) = self.components.iter().position(|c| c.name == name) {
            return self.components.get_mut(pos);
        }
        self.children
            .iter_mut()
            .find_map(|c| c.find_component_mut(name))
    }

    /// Updates a component's state. Returns false if it is not in the subtree.
    pub fn set_component_state(&mut self, name: &str, state: ComponentState) -> bool {
        match self.find_component_mut(name) {
            Some(component) => {
                component.state = state;
                true
            }
            None => false,
        }
    }

    /// The least advanced state in the subtree.
    ///
    /// Removed components are ignored; an empty subtree counts as complete.
    /// Returns as soon as a waiting component is found.
    pub fn aggregate_state(&self) -> ComponentState {
        let mut state = ComponentState::Complete;

        for component in &self.components {
            if component.state == ComponentState::Waiting {
                return ComponentState::Waiting;
            }
            state = ComponentState::lowest(state, component.state);
        }

        for child in &self.children {
            let child_state = child.aggregate_state();
            if child_state == ComponentState::Waiting {
                return ComponentState::Waiting;
            }
            state = ComponentState::lowest(state, child_state);
        }

        state
    }
}
