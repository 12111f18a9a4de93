//! Core types for the provenant entity framework
//!
//! This crate defines the foundational types used throughout the system:
//! - Identifier newtypes: VersionId, InstanceId, LineageId, ExecutionId,
//!   EventId, plus navigation PathSteps
//! - Value: unified enum for entity payload fields
//! - Entity: typed record with identity, lineage and provenance
//! - EntitySchema: declared shape of an entity type
//! - EntityGraph: rooted DAG built from nested entities, with diffing
//! - Event: lightweight notification model with phases and hierarchy
//! - Error: unified error hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entity;
pub mod error;
pub mod event;
pub mod graph;
pub mod schema;
pub mod types;
pub mod value;

pub use entity::{Entity, EntityMeta, SourceRef};
pub use error::{Error, FunctionError, Result};
pub use event::{Event, EventPhase};
pub use graph::{
    diff_graphs, ContainerKind, EntityGraph, GraphDiff, GraphEdge, GraphNode, Ownership,
};
pub use schema::{EntitySchema, FieldSchema, CONFIG_TYPE_NAME};
pub use types::{
    format_path, EventId, ExecutionId, InstanceId, LineageId, PathStep, VersionId,
};
pub use value::{Value, ValueKind};
