//! Cross-crate event behaviour

use provenant::{
    decorate_async, decorate_sync, context, Entity, EntityStore, Event, EventBus,
    EventBusConfig, EventPhase, OperationSpec, Value,
};
use std::sync::Arc;
use std::time::Duration;

fn recording_bus() -> (Arc<EventBus>, Arc<Recorder>) {
    let bus = Arc::new(EventBus::new());
    let recorder = Arc::new(Recorder::default());
    let sink = recorder.clone();
    bus.subscribe(move |e| sink.push(e.clone()));
    (bus, recorder)
}

#[derive(Default)]
struct Recorder {
    events: parking_lot::Mutex<Vec<Event>>,
}

impl Recorder {
    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

// Event pairing: start and completion share lineage and parent.
#[test]
fn event_pairing() {
    let (bus, recorder) = recording_bus();
    decorate_sync(
        &bus,
        OperationSpec::new(Event::new("op.executing", EventPhase::Started)),
        || Ok(1),
    )
    .unwrap();
    bus.flush_blocking();

    let events = recorder.events();
    assert_eq!(events.len(), 2);
    let (start, done) = (&events[0], &events[1]);
    assert_eq!(done.lineage_id, start.lineage_id);
    assert_eq!(done.parent_id, start.parent_id);
    assert_eq!(done.phase, EventPhase::Completed);
    assert!(done.duration_ms.is_some());
}

// Hierarchy: every parented event's parent was emitted earlier with the
// same root.
#[tokio::test]
async fn hierarchy_invariant() {
    let (bus, recorder) = recording_bus();
    decorate_async(
        &bus,
        OperationSpec::new(Event::new("outer.executing", EventPhase::Started)),
        async {
            decorate_async(
                &bus,
                OperationSpec::new(Event::new("middle.executing", EventPhase::Started)),
                async {
                    decorate_sync(
                        &bus,
                        OperationSpec::new(Event::new("inner.executing", EventPhase::Started)),
                        || Ok(()),
                    )
                },
            )
            .await
        },
    )
    .await
    .unwrap();
    bus.flush().await;

    let events = recorder.events();
    for (position, event) in events.iter().enumerate() {
        if let Some(parent_id) = event.parent_id {
            let parent_position = events
                .iter()
                .position(|p| p.id == parent_id)
                .expect("parent was emitted");
            assert!(parent_position < position);
            assert_eq!(events[parent_position].root_id, event.root_id);
        }
    }
    // Three levels deep, one shared root.
    let inner = events
        .iter()
        .find(|e| e.event_type == "inner.executing")
        .unwrap();
    let outer = events
        .iter()
        .find(|e| e.event_type == "outer.executing")
        .unwrap();
    assert_eq!(inner.root_id, outer.id);
}

// Store notifications parent under the ambient operation.
#[test]
fn store_events_nest_under_operations() {
    let bus = Arc::new(EventBus::new());
    let recorder = Arc::new(Recorder::default());
    let sink = recorder.clone();
    bus.subscribe(move |e| sink.push(e.clone()));
    let store = Arc::new(EntityStore::with_bus(bus.clone()));

    decorate_sync(
        &bus,
        OperationSpec::new(Event::new("ingest.executing", EventPhase::Started)),
        || {
            let mut record = Entity::new("Person").with_field("name", "a");
            store.register_root(&mut record)?;
            Ok(record.version_id())
        },
    )
    .unwrap();
    bus.flush_blocking();

    let events = recorder.events();
    let operation = events
        .iter()
        .find(|e| e.event_type == "ingest.executing")
        .unwrap();
    let registered = events
        .iter()
        .find(|e| e.event_type == "entity.registered")
        .unwrap();
    assert_eq!(registered.parent_id, Some(operation.id));
    assert_eq!(registered.root_id, operation.id);
}

// emit_sync dispatches without any caller-side runtime.
#[test]
fn emit_sync_from_plain_thread() {
    let (bus, recorder) = recording_bus();
    let handle = {
        let bus = bus.clone();
        std::thread::spawn(move || {
            bus.emit_sync(Event::new("thread.tick", EventPhase::Progress));
            bus.flush_blocking();
        })
    };
    handle.join().unwrap();
    assert_eq!(recorder.events().len(), 1);
    assert_eq!(recorder.events()[0].event_type, "thread.tick");
}

// Completion tracking synthesises a parent completion.
#[test]
fn completion_tracking() {
    let (bus, recorder) = recording_bus();
    let parent = Event::new("batch.executing", EventPhase::Started);
    bus.expect_children(&parent, 2, Some(Duration::from_secs(5)));
    bus.emit(parent.clone());
    bus.emit(Event::new("item.executed", EventPhase::Completed).with_parent(&parent));
    bus.emit(Event::new("item.executed", EventPhase::Completed).with_parent(&parent));
    bus.flush_blocking();

    let events = recorder.events();
    let completion = events
        .iter()
        .find(|e| e.event_type == "batch.completed")
        .expect("synthesised completion");
    assert_eq!(completion.phase, EventPhase::Completed);
    assert_eq!(completion.lineage_id, parent.lineage_id);
}

// History ring keeps only the most recent events.
#[test]
fn bounded_history() {
    let bus = EventBus::with_config(EventBusConfig {
        history_capacity: 3,
        ..EventBusConfig::default()
    });
    for i in 0..10i64 {
        bus.emit(
            Event::new("tick", EventPhase::Progress).with_metadata("n", i.to_string()),
        );
    }
    bus.flush_blocking();
    let history = bus.history(None);
    assert_eq!(history.len(), 3);
    assert_eq!(history.last().unwrap().metadata["n"], "9");
}

// Events carry identifiers, never payloads: a subscriber dereferences.
#[test]
fn subscriber_dereferences_ids() {
    let bus = Arc::new(EventBus::new());
    let store = Arc::new(EntityStore::with_bus(bus.clone()));
    let seen_age = Arc::new(parking_lot::Mutex::new(None::<Value>));

    let deref_store = store.clone();
    let sink = seen_age.clone();
    bus.subscribe_types(["entity.registered"], move |event| {
        if let Some(version) = event.subject_version_id {
            if let Ok(record) = deref_store.get_record(version) {
                *sink.lock() = record.get_field("age").cloned();
            }
        }
    });

    let mut person = Entity::new("Person").with_field("age", 41i64);
    store.register_root(&mut person).unwrap();
    bus.flush_blocking();
    assert_eq!(seen_age.lock().clone().and_then(|v| v.as_i64()), Some(41));
}

// The context stack does not leak between separate operations.
#[test]
fn context_unwinds_cleanly() {
    let (bus, _) = recording_bus();
    assert!(context::current_parent().is_none());
    let _: Result<(), provenant::Error> = decorate_sync(
        &bus,
        OperationSpec::new(Event::new("fails.executing", EventPhase::Started)),
        || Err(provenant::Error::NotFound("x".to_string())),
    );
    assert!(context::current_parent().is_none());
    assert_eq!(context::depth(), 0);
}
