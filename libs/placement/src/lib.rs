//! Placement of component trees onto isolates.
//!
//! A deployment is described as a tree of *component sets*: each node owns
//! a set of components and nested child sets. Every isolate advertises the
//! component kinds it can host; the resolver assigns each component to
//! exactly one isolate.
//!
//! # Invariants
//!
//! - A component's namespaced name is prefixed by the names of all its
//!   ancestors, recomputed top-down whenever a subtree is renamed or moved
//! - Resolution is depth-first, children before their parent, and fails as
//!   soon as one subtree cannot be fully placed
//! - Merging into a [`ResolutionMap`] never duplicates a component

mod component;
mod resolver;
mod tree;

pub use component::{ComponentSpec, ComponentState};
pub use resolver::{
    resolve, IsolateCapabilities, PlacementFailure, ResolutionMap, UnresolvedComponent,
};
pub use tree::ComponentSetNode;
