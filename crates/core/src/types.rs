//! Identifier types for the entity framework
//!
//! This module defines the UUID-backed identifiers used throughout the
//! system:
//! - VersionId: identity of one immutable incarnation of an entity
//! - InstanceId: identity of one in-process materialisation of an entity
//! - LineageId: identity shared by all versions of one logical entity
//! - ExecutionId: identity of one registered-function invocation
//! - EventId: identity of one emitted event
//!
//! All identifiers are v4 UUIDs. They are cheap to copy, hashable, and
//! serializable, and every one of them renders as the plain UUID string.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier (UUID v4)
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from the textual UUID representation
            ///
            /// Returns `None` if the string is not a valid RFC-4122 UUID.
            pub fn parse(s: &str) -> Option<Self> {
                Uuid::parse_str(s).ok().map(Self)
            }

            /// Get the underlying UUID
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id! {
    /// Identity of one immutable version of an entity
    ///
    /// A fresh VersionId is allocated on creation and on every identifier
    /// rotation. Two entities are identity-equal iff their VersionIds match.
    VersionId
}

uuid_id! {
    /// Identity of one in-memory materialisation of an entity
    ///
    /// Rotates whenever an entity is copied into fresh process memory,
    /// including on every retrieval from the store.
    InstanceId
}

uuid_id! {
    /// Identity shared across all versions of one logical entity
    ///
    /// Changes only when an entity is detached from its graph and begins a
    /// new life as an independent root.
    LineageId
}

uuid_id! {
    /// Identity of one registered-function invocation
    ExecutionId
}

uuid_id! {
    /// Identity of one emitted event
    EventId
}

/// One navigation step inside an entity's payload
///
/// Paths are used both by the graph (the canonical route from a root to a
/// node) and by the address resolver (`@uuid.field.0.name`). A step is
/// either a field/map-key access or a positional index into a list or tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathStep {
    /// Access a named field of an entity, or a key of a map
    Field(String),
    /// Access a position of a list or tuple
    Index(usize),
}

impl PathStep {
    /// Create a field step
    pub fn field(name: impl Into<String>) -> Self {
        PathStep::Field(name.into())
    }

    /// Create an index step
    pub fn index(i: usize) -> Self {
        PathStep::Index(i)
    }
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStep::Field(name) => write!(f, "{}", name),
            PathStep::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Render a path as its dotted textual form (`items.0.name`)
pub fn format_path(steps: &[PathStep]) -> String {
    steps
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(".")
}
