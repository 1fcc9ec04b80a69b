//! Resolver behavior over whole component trees.

use orbit_placement::{
    resolve, ComponentSetNode, ComponentSpec, ComponentState, IsolateCapabilities, ResolutionMap,
};
use proptest::prelude::*;

const KINDS: [&str; 3] = ["t1", "t2", "t3"];
const ISOLATES: [&str; 3] = ["iso1", "iso2", "iso3"];

#[test]
fn test_pinned_isolate_wins_over_earlier_capable_isolate() {
    let mut tree = ComponentSetNode::new("root").with_child(
        ComponentSetNode::new("A")
            .with_component(ComponentSpec::new("X", "t1"))
            .with_child(
                ComponentSetNode::new("B").with_component(ComponentSpec::new("Y", "t2").pinned_to("iso2")),
            ),
    );
    let caps = IsolateCapabilities::new()
        .with("iso1", ["t1", "t2"])
        .with("iso2", ["t2"]);
    let mut map = ResolutionMap::new();

    resolve(&mut tree, &caps, &mut map).unwrap();

    assert_eq!(map.isolate_of("root.A.X"), Some("iso1"));
    assert_eq!(map.isolate_of("root.A.B.Y"), Some("iso2"));
    assert_eq!(map.total(), 2);
    assert_eq!(tree.aggregate_state(), ComponentState::Resolved);
}

#[test]
fn test_second_pass_adds_new_components_only() {
    let mut tree = ComponentSetNode::new("root").with_component(ComponentSpec::new("a", "t1"));
    let caps = IsolateCapabilities::new().with("iso1", ["t1"]);
    let mut map = ResolutionMap::new();
    resolve(&mut tree, &caps, &mut map).unwrap();

    tree.add_component(ComponentSpec::new("b", "t1"));
    let caps = IsolateCapabilities::new().with("iso2", ["t1"]).with("iso1", ["t1"]);
    resolve(&mut tree, &caps, &mut map).unwrap();

    assert_eq!(map.isolate_of("root.a"), Some("iso1"));
    assert_eq!(map.isolate_of("root.b"), Some("iso2"));
    assert_eq!(map.total(), 2);
}

/// (kind, pin, set) per component; pin and set index into fixed tables.
fn component_strategy() -> impl Strategy<Value = (usize, Option<usize>, usize)> {
    (0..KINDS.len(), prop::option::of(0..ISOLATES.len()), 0..3usize)
}

fn capability_strategy() -> impl Strategy<Value = Vec<Vec<bool>>> {
    prop::collection::vec(prop::collection::vec(any::<bool>(), KINDS.len()), ISOLATES.len())
}

fn build(components: &[(usize, Option<usize>, usize)]) -> ComponentSetNode {
    let mut sets: Vec<ComponentSetNode> = (0..3).map(|i| ComponentSetNode::new(format!("s{i}"))).collect();
    for (n, (kind, pin, set)) in components.iter().enumerate() {
        let mut spec = ComponentSpec::new(format!("c{n}"), KINDS[*kind]);
        if let Some(pin) = pin {
            spec = spec.pinned_to(ISOLATES[*pin]);
        }
        sets[*set].add_component(spec);
    }
    let mut root = ComponentSetNode::new("root");
    for set in sets {
        root.add_child(set);
    }
    root
}

fn capabilities(matrix: &[Vec<bool>]) -> IsolateCapabilities {
    let mut caps = IsolateCapabilities::new();
    for (i, row) in matrix.iter().enumerate() {
        let kinds: Vec<&str> = KINDS
            .iter()
            .zip(row)
            .filter(|(_, hosted)| **hosted)
            .map(|(k, _)| *k)
            .collect();
        caps.insert(ISOLATES[i], kinds);
    }
    caps
}

fn placeable(components: &[(usize, Option<usize>, usize)], caps: &IsolateCapabilities) -> bool {
    components.iter().all(|(kind, pin, _)| match pin {
        Some(pin) => caps.hosts(ISOLATES[*pin], KINDS[*kind]),
        None => ISOLATES.iter().any(|iso| caps.hosts(iso, KINDS[*kind])),
    })
}

proptest! {
    #[test]
    fn every_placeable_component_lands_on_exactly_one_isolate(
        components in prop::collection::vec(component_strategy(), 0..12),
        matrix in capability_strategy(),
    ) {
        let caps = capabilities(&matrix);
        prop_assume!(placeable(&components, &caps));

        let mut tree = build(&components);
        let mut map = ResolutionMap::new();
        prop_assert!(resolve(&mut tree, &caps, &mut map).is_ok());

        for component in tree.components_recursive() {
            let hosts: Vec<_> = map
                .iter()
                .filter(|(_, list)| list.iter().any(|c| c.name == component.name))
                .map(|(iso, _)| iso)
                .collect();
            prop_assert_eq!(hosts.len(), 1);
            prop_assert!(caps.hosts(hosts[0], &component.kind));
            if let Some(pin) = component.pinned_isolate() {
                prop_assert_eq!(hosts[0], pin);
            }
        }
        prop_assert_eq!(map.total(), components.len());
    }

    #[test]
    fn repeated_resolution_never_duplicates(
        components in prop::collection::vec(component_strategy(), 0..12),
        first in capability_strategy(),
        second in capability_strategy(),
    ) {
        let mut tree = build(&components);
        let mut map = ResolutionMap::new();
        let _ = resolve(&mut tree, &capabilities(&first), &mut map);
        let _ = resolve(&mut tree, &capabilities(&second), &mut map);

        for (_, list) in map.iter() {
            let mut names: Vec<_> = list.iter().map(|c| c.name.as_str()).collect();
            let before = names.len();
            names.sort_unstable();
            names.dedup();
            prop_assert_eq!(before, names.len());
        }
        prop_assert!(map.total() <= components.len());
    }

    #[test]
    fn waiting_component_dominates_aggregate(
        states in prop::collection::vec(0..5u8, 1..10),
    ) {
        let all = [
            ComponentState::Waiting,
            ComponentState::Resolved,
            ComponentState::Instantiating,
            ComponentState::Complete,
            ComponentState::Removed,
        ];
        let mut tree = ComponentSetNode::new("root");
        for (i, s) in states.iter().enumerate() {
            let mut spec = ComponentSpec::new(format!("c{i}"), "t1");
            spec.state = all[*s as usize];
            tree.add_component(spec);
        }

        let aggregate = tree.aggregate_state();
        if states.contains(&0) {
            prop_assert_eq!(aggregate, ComponentState::Waiting);
        } else if states.contains(&1) {
            prop_assert_eq!(aggregate, ComponentState::Resolved);
        } else if states.contains(&2) {
            prop_assert_eq!(aggregate, ComponentState::Instantiating);
        } else {
            prop_assert_eq!(aggregate, ComponentState::Complete);
        }
    }
}
