//! Forker registrations.

use std::collections::HashMap;

use orbit_events::ForkerRecord;
use orbit_id::ForkerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkerEventKind {
    Registered,
    Unregistered,
}

/// A forker joined or left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkerEvent {
    pub kind: ForkerEventKind,
    pub forker_id: ForkerId,
    pub node: String,
}

/// Registered forkers by id.
#[derive(Debug, Default)]
pub struct ForkerRegistry {
    forkers: HashMap<ForkerId, ForkerRecord>,
}

impl ForkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` if the same record was already registered.
    pub fn register(&mut self, record: ForkerRecord) -> Option<ForkerEvent> {
        if self.forkers.get(&record.forker_id) == Some(&record) {
            return None;
        }
        let event = ForkerEvent {
            kind: ForkerEventKind::Registered,
            forker_id: record.forker_id,
            node: record.node.clone(),
        };
        self.forkers.insert(record.forker_id, record);
        Some(event)
    }

    pub fn unregister(&mut self, forker_id: &ForkerId) -> Option<ForkerEvent> {
        self.forkers.remove(forker_id).map(|record| ForkerEvent {
            kind: ForkerEventKind::Unregistered,
            forker_id: record.forker_id,
            node: record.node,
        })
    }

    pub fn get(&self, forker_id: &ForkerId) -> Option<&ForkerRecord> {
        self.forkers.get(forker_id)
    }

    pub fn for_node(&self, node: &str) -> Option<&ForkerRecord> {
        self.forkers.values().find(|r| r.node == node)
    }

    pub fn len(&self) -> usize {
        self.forkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forkers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(node: &str) -> ForkerRecord {
        ForkerRecord {
            forker_id: ForkerId::new(),
            node: node.to_string(),
            host: "localhost".to_string(),
            isolate: format!("forker-{node}"),
        }
    }

    #[test]
    fn test_register_and_unregister() {
        let mut registry = ForkerRegistry::new();
        let rec = record("node-a");
        let id = rec.forker_id;

        let event = registry.register(rec.clone()).unwrap();
        assert_eq!(event.kind, ForkerEventKind::Registered);
        assert_eq!(event.node, "node-a");
        assert!(registry.register(rec).is_none());
        assert_eq!(registry.for_node("node-a").unwrap().forker_id, id);

        let event = registry.unregister(&id).unwrap();
        assert_eq!(event.kind, ForkerEventKind::Unregistered);
        assert!(registry.unregister(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_moved_forker_is_registered_again() {
        let mut registry = ForkerRegistry::new();
        let rec = record("node-a");
        registry.register(rec.clone());

        let moved = ForkerRecord {
            host: "10.0.0.2".to_string(),
            ..rec
        };
        assert!(registry.register(moved).is_some());
        assert_eq!(registry.len(), 1);
    }
}
