//! Core user journeys, end to end

use provenant::{
    resolve, CallableRegistry, Entity, EntityStore, EventBus, FunctionError, FunctionSpec,
    Kwargs, ReturnSpec, SourceRef, Value, ValueKind,
};
use std::sync::Arc;

fn person(name: &str, age: i64) -> Entity {
    Entity::new("Person")
        .with_field("name", name)
        .with_field("age", age)
}

fn harness() -> (Arc<EventBus>, Arc<EntityStore>, Arc<CallableRegistry>) {
    crate::common::init_tracing();
    let bus = Arc::new(EventBus::new());
    let store = Arc::new(EntityStore::with_bus(bus.clone()));
    let registry = Arc::new(CallableRegistry::new(store.clone(), bus.clone()));
    (bus, store, registry)
}

// Scenario: promote a record and address into it.
#[test]
fn promote_and_address() {
    let (_, store, _) = harness();
    let mut alice = person("Alice", 30);
    store.mark_as_root(&mut alice).unwrap();

    let graph = store.stored_graph(alice.version_id()).unwrap();
    assert_eq!(graph.node_count(), 1);

    let whole = resolve(&store, &format!("@{}", alice.version_id())).unwrap();
    let record = whole.as_entity().unwrap();
    assert_eq!(record.get_field("name").unwrap().as_str(), Some("Alice"));

    let age = resolve(&store, &format!("@{}.age", alice.version_id())).unwrap();
    assert_eq!(age.as_i64(), Some(30));
}

// Scenario: mutate in memory, version, and read both versions back.
#[test]
fn mutation_versioning() {
    let (_, store, _) = harness();
    let mut alice = person("Alice", 30);
    store.mark_as_root(&mut alice).unwrap();
    let old_id = alice.version_id();

    alice.set_field("age", 31i64);
    assert!(store.version(&mut alice, false).unwrap());
    let new_id = alice.version_id();

    assert_ne!(new_id, old_id);
    assert_eq!(alice.meta().previous_version_id, Some(old_id));
    assert_eq!(
        store.list_lineage(alice.lineage_id()).unwrap(),
        vec![old_id, new_id]
    );
    assert_eq!(
        resolve(&store, &format!("@{}.age", new_id)).unwrap().as_i64(),
        Some(31)
    );
    assert_eq!(
        resolve(&store, &format!("@{}.age", old_id)).unwrap().as_i64(),
        Some(30)
    );
}

// Scenario: a registered function over a single entity, with isolation.
#[test]
fn registered_function_single_entity() {
    let (_, store, registry) = harness();
    registry
        .register(
            FunctionSpec::builder("bump")
                .entity_param("p", "Person")
                .returns(ReturnSpec::entity("Person"))
                .sync(|input| {
                    let p = input.entity("p")?;
                    let name = p.get_field("name").and_then(Value::as_str).unwrap_or("");
                    let age = p.get_field("age").and_then(Value::as_i64).unwrap_or(0);
                    Ok(Value::from(person(name, age + 1)))
                }),
        )
        .unwrap();

    let mut alice = person("Alice", 31);
    store.mark_as_root(&mut alice).unwrap();
    let alice_version = alice.version_id();

    let bumped = registry
        .execute("bump", Kwargs::new().with("p", alice))
        .unwrap()
        .into_single()
        .unwrap();

    assert_ne!(bumped.version_id(), alice_version);
    assert_eq!(bumped.meta().derived_from_function.as_deref(), Some("bump"));
    assert_eq!(bumped.get_field("age").unwrap().as_i64(), Some(32));

    // Isolation: the caller's stored version is unchanged.
    let stored = store.get_graph(alice_version).unwrap();
    assert_eq!(stored.get_field("age").unwrap().as_i64(), Some(31));
}

// Scenario: multi-entity unpack with sibling provenance.
#[test]
fn multi_entity_unpack() {
    let (_, _, registry) = harness();
    registry
        .register(
            FunctionSpec::builder("split")
                .entity_param("p", "Person")
                .returns(ReturnSpec::tuple(2))
                .sync(|input| {
                    let p = input.entity("p")?;
                    let name = p.get_field("name").and_then(Value::as_str).unwrap_or("");
                    Ok(Value::Tuple(vec![
                        Value::from(person(&format!("{}-left", name), 1)),
                        Value::from(person(&format!("{}-right", name), 2)),
                    ]))
                }),
        )
        .unwrap();

    let outcome = registry
        .execute("split", Kwargs::new().with("p", person("Pat", 40)))
        .unwrap();
    assert_eq!(outcome.records.len(), 2);
    let b = &outcome.records[0];
    let c = &outcome.records[1];

    assert_eq!(b.meta().output_index, Some(0));
    assert_eq!(c.meta().output_index, Some(1));
    assert!(b.meta().sibling_output_version_ids.contains(&c.version_id()));
    assert!(c.meta().sibling_output_version_ids.contains(&b.version_id()));
    assert_eq!(
        b.meta().derived_from_execution_id,
        c.meta().derived_from_execution_id
    );
}

// Scenario: borrowing field values through addresses.
#[test]
fn borrowing_via_address() {
    let (_, store, registry) = harness();
    let mut alice = person("Alice", 30);
    store.mark_as_root(&mut alice).unwrap();
    alice.set_field("age", 31i64);
    store.version(&mut alice, false).unwrap();
    let x = alice.version_id();

    registry
        .register(
            FunctionSpec::builder("greet")
                .primitive_param("name", ValueKind::String)
                .primitive_param("age", ValueKind::Int)
                .returns(ReturnSpec::entity("Greeting"))
                .sync(|input| {
                    Ok(Value::from(
                        Entity::new("Greeting")
                            .with_field("name", input.str("name")?)
                            .with_field("age", input.int("age")?)
                            .with_field(
                                "text",
                                format!("hello {} ({})", input.str("name")?, input.int("age")?),
                            ),
                    ))
                }),
        )
        .unwrap();

    let greeting = registry
        .execute(
            "greet",
            Kwargs::new()
                .with("name", format!("@{}.name", x))
                .with("age", format!("@{}.age", x)),
        )
        .unwrap()
        .into_single()
        .unwrap();

    assert_eq!(
        greeting.meta().attribute_source.get("name"),
        Some(&SourceRef::Version(x))
    );
    assert_eq!(
        greeting.meta().attribute_source.get("age"),
        Some(&SourceRef::Version(x))
    );
    assert_eq!(greeting.get_field("age").unwrap().as_i64(), Some(31));
}

// Scenario: nested executions form one event tree.
#[test]
fn event_hierarchy() {
    let (bus, store, registry) = harness();
    registry
        .register(
            FunctionSpec::builder("validate")
                .entity_param("p", "Person")
                .returns(ReturnSpec::primitive(ValueKind::Bool))
                .sync(|input| {
                    let age = input
                        .entity("p")?
                        .get_field("age")
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    Ok(Value::Bool(age >= 0))
                }),
        )
        .unwrap();

    let inner = registry.clone();
    registry
        .register(
            FunctionSpec::builder("bump")
                .entity_param("p", "Person")
                .returns(ReturnSpec::entity("Person"))
                .sync(move |mut input| {
                    let p = input.take_entity("p")?;
                    inner
                        .execute("validate", Kwargs::new().with("p", p.clone()))
                        .map_err(|e| FunctionError::new(e.to_string()))?;
                    let age = p.get_field("age").and_then(Value::as_i64).unwrap_or(0);
                    Ok(Value::from(person("bumped", age + 1)))
                }),
        )
        .unwrap();

    let seen = Arc::new(parking_lot_recorder::Recorder::default());
    let sink = seen.clone();
    bus.subscribe(move |e| sink.push(e.clone()));

    let mut a = person("a", 7);
    store.mark_as_root(&mut a).unwrap();
    registry.execute("bump", Kwargs::new().with("p", a)).unwrap();
    bus.flush_blocking();

    let events = seen.events();
    let bump_start = events
        .iter()
        .find(|e| {
            e.event_type == "function.executing"
                && e.metadata.get("function").map(String::as_str) == Some("bump")
        })
        .expect("bump start");
    let validate_start = events
        .iter()
        .find(|e| {
            e.event_type == "function.executing"
                && e.metadata.get("function").map(String::as_str) == Some("validate")
        })
        .expect("validate start");

    // The tree is rooted at bump's start event.
    assert!(bump_start.parent_id.is_none());
    assert_eq!(bump_start.root_id, bump_start.id);
    assert_eq!(validate_start.parent_id, Some(bump_start.id));
    assert_eq!(validate_start.root_id, bump_start.id);

    // Everything emitted by the run shares that root.
    let tree: Vec<_> = events.iter().filter(|e| e.root_id == bump_start.id).collect();
    assert!(tree.len() >= 4);
    for event in &tree {
        if let Some(parent_id) = event.parent_id {
            let parent_pos = events.iter().position(|p| p.id == parent_id);
            let own_pos = events.iter().position(|p| p.id == event.id);
            assert!(parent_pos.unwrap() < own_pos.unwrap(), "parent dispatched first");
        }
    }
}

// Scenario: config records collapse leftover primitives.
#[test]
fn config_record_collapse() {
    let (_, store, registry) = harness();
    registry
        .register(
            FunctionSpec::builder("resize")
                .entity_param("p", "Person")
                .config_param("cfg")
                .returns(ReturnSpec::entity("Person"))
                .sync(|input| {
                    let delta = input
                        .config()
                        .and_then(|c| c.get_field("delta"))
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    let p = input.entity("p")?;
                    let age = p.get_field("age").and_then(Value::as_i64).unwrap_or(0);
                    Ok(Value::from(person("resized", age + delta)))
                }),
        )
        .unwrap();

    let outcome = registry
        .execute(
            "resize",
            Kwargs::new().with("p", person("a", 10)).with("delta", 5i64),
        )
        .unwrap();
    let out = outcome.records[0].clone();
    assert_eq!(out.get_field("age").unwrap().as_i64(), Some(15));

    // The config record was registered as its own root.
    let configs = store.find_by_type("Config");
    assert_eq!(configs.len(), 1);
    let config = store.get_graph(configs[0]).unwrap();
    assert_eq!(config.get_field("delta").unwrap().as_i64(), Some(5));
}

// Scenario: wrap-by-default for list returns, force_unpack opts out.
#[test]
fn container_wrapping_defaults() {
    let (_, _, registry) = harness();
    registry
        .register(
            FunctionSpec::builder("fan_wrapped")
                .returns(ReturnSpec::list())
                .sync(|_| {
                    Ok(Value::List(vec![
                        Value::from(person("a", 1)),
                        Value::from(person("b", 2)),
                    ]))
                }),
        )
        .unwrap();
    registry
        .register(
            FunctionSpec::builder("fan_split")
                .returns(ReturnSpec::list())
                .force_unpack()
                .sync(|_| {
                    Ok(Value::List(vec![
                        Value::from(person("a", 1)),
                        Value::from(person("b", 2)),
                    ]))
                }),
        )
        .unwrap();

    let wrapped = registry.execute("fan_wrapped", Kwargs::new()).unwrap();
    assert_eq!(wrapped.records.len(), 1);
    assert_eq!(wrapped.records[0].type_name(), "FanWrappedOutput");

    let split = registry.execute("fan_split", Kwargs::new()).unwrap();
    assert_eq!(split.records.len(), 2);
}

// Scenario: detach a nested record, then attach it elsewhere.
#[test]
fn detach_and_attach() {
    let (_, store, _) = harness();
    let lead = person("lead", 9);
    let lead_vid = lead.version_id();
    let mut team = Entity::new("Team")
        .with_field("name", "core")
        .with_field("lead", lead);
    store.mark_as_root(&mut team).unwrap();

    let freed = store.detach(&mut team, lead_vid).unwrap();
    assert!(freed.is_root());
    assert_ne!(freed.lineage_id(), team.lineage_id());
    assert!(store.stored_graph(lead_vid).is_ok());

    let mut other = Entity::new("Team").with_field("name", "platform");
    store.mark_as_root(&mut other).unwrap();
    assert!(store.attach(&mut other, "lead", freed).unwrap());
    let attached = other.get_field("lead").unwrap().as_entity().unwrap();
    assert_eq!(attached.version_id(), lead_vid);
    assert_eq!(attached.lineage_id(), other.lineage_id());
}

mod parking_lot_recorder {
    use provenant::Event;

    /// Order-preserving event recorder for subscriptions
    #[derive(Default)]
    pub struct Recorder {
        events: parking_lot::Mutex<Vec<Event>>,
    }

    impl Recorder {
        pub fn push(&self, event: Event) {
            self.events.lock().push(event);
        }

        pub fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }
    }
}
