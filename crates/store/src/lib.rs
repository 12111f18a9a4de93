//! Entity store, addressing and persistence for the provenant framework
//!
//! This crate provides:
//! - EntityStore: five indices over immutable graph versions, with
//!   register / version / retrieve / promote / detach / attach operations
//! - address: the `@uuid[.path]` resolver and kwargs classification
//! - persist: the optional persistence interface with in-memory and
//!   JSON-directory backends

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod persist;
pub mod store;

pub use address::{
    classify_arg, classify_kwargs, format_address, is_address, parse, resolve, resolve_record,
    ArgKind, KwargsPattern,
};
pub use persist::{JsonDirBackend, MemoryBackend, PersistenceBackend};
pub use store::{
    EntityStore, StoreStats, ENTITY_ATTACHED, ENTITY_DETACHED, ENTITY_PROMOTED,
    ENTITY_REGISTERED, ENTITY_VERSIONED,
};
