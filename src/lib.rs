//! # Provenant
//!
//! A content-addressable entity framework with reactive event coordination:
//! immutable typed records (entities) flow through registered pure
//! functions, every record carries identity, lineage and provenance, and
//! every state transition emits hierarchically-linked events.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use provenant::{
//!     CallableRegistry, Entity, EntityStore, EventBus, FunctionSpec, Kwargs,
//!     ReturnSpec, Value,
//! };
//!
//! fn main() -> provenant::Result<()> {
//!     let bus = Arc::new(EventBus::new());
//!     let store = Arc::new(EntityStore::with_bus(bus.clone()));
//!     let registry = CallableRegistry::new(store.clone(), bus.clone());
//!
//!     // Create a record and promote it to a root.
//!     let mut alice = Entity::new("Person")
//!         .with_field("name", "Alice")
//!         .with_field("age", 30i64);
//!     store.mark_as_root(&mut alice)?;
//!
//!     // Address anything in the store.
//!     let age = provenant::resolve(&store, &format!("@{}.age", alice.version_id()))?;
//!     assert_eq!(age.as_i64(), Some(30));
//!
//!     // Register and invoke a typed function.
//!     registry.register(
//!         FunctionSpec::builder("bump")
//!             .entity_param("p", "Person")
//!             .returns(ReturnSpec::entity("Person"))
//!             .sync(|input| {
//!                 let p = input.entity("p")?;
//!                 let age = p.get_field("age").and_then(Value::as_i64).unwrap_or(0);
//!                 Ok(Value::from(
//!                     Entity::new("Person").with_field("age", age + 1),
//!                 ))
//!             }),
//!     )?;
//!     let older = registry
//!         .execute("bump", Kwargs::new().with("p", alice))?
//!         .into_single()?;
//!     assert_eq!(older.get_field("age").and_then(Value::as_i64), Some(31));
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! | Crate               | Responsibility                                   |
//! |---------------------|--------------------------------------------------|
//! | `provenant-core`    | ids, values, entities, schemas, graphs, events   |
//! | `provenant-events`  | event bus, context stack, emit decorator         |
//! | `provenant-store`   | five-index store, addressing, persistence        |
//! | `provenant-registry`| signatures, strategies, semantics, execution     |
//!
//! The facade re-exports the public surface; the internal crates are not
//! semver-stable on their own.

pub use provenant_core::{
    diff_graphs, format_path, ContainerKind, Entity, EntityGraph, EntityMeta, EntitySchema,
    Error, Event, EventId, EventPhase, ExecutionId, FieldSchema, FunctionError, GraphDiff,
    GraphEdge, GraphNode, InstanceId, LineageId, Ownership, PathStep, Result, SourceRef, Value,
    ValueKind, VersionId, CONFIG_TYPE_NAME,
};

pub use provenant_events::{
    context, decorate_async, decorate_async_with, decorate_sync, decorate_sync_with, default_bus,
    BusStats, EventBus, EventBusConfig, OperationSpec, SubscriptionFilter, SubscriptionId,
};

pub use provenant_store::{
    classify_arg, classify_kwargs, format_address, is_address, parse, resolve, resolve_record,
    ArgKind, EntityStore, JsonDirBackend, KwargsPattern, MemoryBackend, PersistenceBackend,
    StoreStats, ENTITY_ATTACHED, ENTITY_DETACHED, ENTITY_PROMOTED, ENTITY_REGISTERED,
    ENTITY_VERSIONED,
};

pub use provenant_registry::{
    CallableRegistry, Confidence, ExecutionInput, ExecutionOutcome, ExecutionStrategy, FnResult,
    FunctionBody, FunctionMetadata, FunctionSignature, FunctionSpec, Kwargs, ParamKind,
    ParamSpec, ReturnPattern, ReturnSpec, SemanticKind, SemanticResult, SignatureArtifacts,
    EXECUTION_TYPE_NAME, FUNCTION_EXECUTED, FUNCTION_EXECUTING, FUNCTION_FAILED,
    OUTCOME_FAILURE, OUTCOME_SUCCESS,
};
