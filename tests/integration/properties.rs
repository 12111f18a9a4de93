//! Property-based universal invariants

use proptest::prelude::*;
use provenant::{
    format_address, parse, resolve, Entity, EntityStore, PathStep, Value, VersionId,
};

fn arb_field_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,8}"
}

fn arb_primitive() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::I64),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
    ]
}

/// A small person-shaped record with arbitrary payload
fn arb_person() -> impl Strategy<Value = Entity> {
    (arb_field_name(), arb_primitive(), any::<i64>()).prop_map(|(extra, value, age)| {
        Entity::new("Person")
            .with_field("age", age)
            .with_field(extra, value)
    })
}

/// A two-level record tree
fn arb_tree() -> impl Strategy<Value = Entity> {
    (arb_person(), proptest::collection::vec(arb_person(), 0..4)).prop_map(|(lead, members)| {
        Entity::new("Team")
            .with_field("lead", lead)
            .with_field("members", members)
    })
}

fn arb_path() -> impl Strategy<Value = Vec<PathStep>> {
    proptest::collection::vec(
        prop_oneof![
            arb_field_name().prop_map(PathStep::Field),
            (0usize..100).prop_map(PathStep::Index),
        ],
        0..5,
    )
}

proptest! {
    // Identity freshness: retrieval rotates instance ids and nothing else.
    #[test]
    fn identity_freshness(root in arb_tree()) {
        let store = EntityStore::new();
        let mut root = root;
        store.register_root(&mut root).unwrap();

        let retrieved = store.get_graph(root.version_id()).unwrap();
        let mut stored_pairs = Vec::new();
        root.visit(&mut |e| stored_pairs.push((e.version_id(), e.instance_id())));
        let mut fresh_pairs = Vec::new();
        retrieved.visit(&mut |e| fresh_pairs.push((e.version_id(), e.instance_id())));

        prop_assert_eq!(stored_pairs.len(), fresh_pairs.len());
        for ((stored_v, stored_i), (fresh_v, fresh_i)) in
            stored_pairs.iter().zip(fresh_pairs.iter())
        {
            prop_assert_eq!(stored_v, fresh_v);
            prop_assert_ne!(stored_i, fresh_i);
        }
    }

    // Version monotonicity: rotation chains the previous version in.
    #[test]
    fn version_monotonicity(root in arb_tree(), new_age in any::<i64>()) {
        let store = EntityStore::new();
        let mut root = root;
        store.register_root(&mut root).unwrap();
        let old_version = root.version_id();

        let lead_age = root
            .get_field("lead").unwrap()
            .as_entity().unwrap()
            .get_field("age").unwrap()
            .as_i64();
        prop_assume!(lead_age != Some(new_age));

        root.get_field_mut("lead").unwrap()
            .as_entity_mut().unwrap()
            .set_field("age", new_age);
        prop_assert!(store.version(&mut root, false).unwrap());

        prop_assert_eq!(root.meta().previous_version_id, Some(old_version));
        prop_assert!(root.meta().prior_version_ids.contains(&old_version));
        let lead = root.get_field("lead").unwrap().as_entity().unwrap();
        prop_assert!(lead.meta().previous_version_id.is_some());
        let lead_prev = lead.meta().previous_version_id.unwrap();
        prop_assert!(lead.meta().prior_version_ids.contains(&lead_prev));
    }

    // Lineage consistency: roots listed in rotation order.
    #[test]
    fn lineage_consistency(ages in proptest::collection::vec(any::<i64>(), 1..5)) {
        let store = EntityStore::new();
        let mut record = Entity::new("Person").with_field("age", i64::MIN);
        store.register_root(&mut record).unwrap();
        let mut expected = vec![record.version_id()];

        let mut previous_age = i64::MIN;
        for age in ages {
            if age == previous_age {
                continue;
            }
            previous_age = age;
            record.set_field("age", age);
            prop_assert!(store.version(&mut record, false).unwrap());
            expected.push(record.version_id());
        }
        prop_assert_eq!(
            store.list_lineage(record.lineage_id()).unwrap(),
            expected
        );
    }

    // Root coherence: every reachable record names the root's version.
    #[test]
    fn root_coherence(root in arb_tree()) {
        let store = EntityStore::new();
        let mut root = root;
        store.register_root(&mut root).unwrap();
        let root_version = root.version_id();

        let retrieved = store.get_graph(root_version).unwrap();
        retrieved.visit(&mut |e| {
            assert_eq!(e.root_version_id(), Some(root_version));
        });
    }

    // Address roundtrip: parse(format(v, path)) == (v, path).
    #[test]
    fn address_roundtrip(path in arb_path()) {
        let version = VersionId::new();
        let formatted = format_address(version, &path);
        let (parsed_version, parsed_path) = parse(&formatted).unwrap();
        prop_assert_eq!(parsed_version, version);
        prop_assert_eq!(parsed_path, path);
    }

    // Address resolution: every reachable sub-record resolves by version.
    #[test]
    fn address_resolution(root in arb_tree()) {
        let store = EntityStore::new();
        let mut root = root;
        store.register_root(&mut root).unwrap();

        let mut versions = Vec::new();
        root.visit(&mut |e| versions.push(e.version_id()));
        for version in versions {
            let value = resolve(&store, &format!("@{}", version)).unwrap();
            let record = value.as_entity().unwrap();
            prop_assert_eq!(record.version_id(), version);
        }
    }

    // Idempotent re-version: no change means no new version.
    #[test]
    fn idempotent_reversion(root in arb_tree()) {
        let store = EntityStore::new();
        let mut root = root;
        store.register_root(&mut root).unwrap();
        let version = root.version_id();

        prop_assert!(!store.version(&mut root, false).unwrap());
        prop_assert_eq!(root.version_id(), version);
        prop_assert_eq!(
            store.list_lineage(root.lineage_id()).unwrap(),
            vec![version]
        );
    }
}
