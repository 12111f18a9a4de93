//! Event model
//!
//! Events are short-lived immutable messages describing state transitions.
//! They NEVER carry entity payloads, only identifiers: any subscriber that
//! needs the data dereferences the ids against the store.
//!
//! ## Pairing and hierarchy
//!
//! A decorated operation emits a start event and later a completion (or
//! failure) event; the pair shares `lineage_id`. Each event may name a
//! parent event, forming a tree: `root_id` identifies the tree, and
//! `root_id == id` exactly when the event has no parent.

use crate::types::{EventId, LineageId, VersionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle phase of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventPhase {
    /// Announced but not yet started
    Pending,
    /// Operation has begun
    Started,
    /// Intermediate progress report
    Progress,
    /// Final phase entered, not yet complete
    Completing,
    /// Operation finished successfully
    Completed,
    /// Operation failed
    Failed,
    /// Operation was cancelled
    Cancelled,
}

impl EventPhase {
    /// Check whether this phase ends an operation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventPhase::Completed | EventPhase::Failed | EventPhase::Cancelled
        )
    }
}

/// A lightweight notification describing one state transition
///
/// ## Invariants
///
/// - paired start/completion events of one operation share `lineage_id`
/// - when `parent_id` is set, the parent was emitted earlier
/// - `root_id == id` iff `parent_id.is_none()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event identity
    pub id: EventId,
    /// Dotted-name type, e.g. `function.executing`, `entity.versioned`
    pub event_type: String,
    /// Lifecycle phase
    pub phase: EventPhase,
    /// UTC wall-clock time of emission
    pub timestamp: DateTime<Utc>,
    /// Type name of the primary subject, if any
    pub subject_type_name: Option<String>,
    /// Version of the primary subject, if any
    pub subject_version_id: Option<VersionId>,
    /// Type name of the triggering party, if any
    pub actor_type_name: Option<String>,
    /// Version of the triggering party, if any
    pub actor_version_id: Option<VersionId>,
    /// Additional related records by role name
    pub context_version_ids: BTreeMap<String, VersionId>,
    /// Shared across paired start/end/fail events of one operation
    pub lineage_id: LineageId,
    /// Parent event, or None for a root event
    pub parent_id: Option<EventId>,
    /// Root of this event's tree
    pub root_id: EventId,
    /// Ids of emitted child events, filled in by the bus as they arrive
    pub children_ids: Vec<EventId>,
    /// Children still expected to complete, when tracked
    pub pending_children_count: Option<usize>,
    /// Wall-clock duration, populated on completion/failure
    pub duration_ms: Option<u64>,
    /// Free-form string metadata (function name, strategy tag, counts)
    pub metadata: BTreeMap<String, String>,
}

impl Event {
    /// Create a root event with a fresh lineage
    pub fn new(event_type: impl Into<String>, phase: EventPhase) -> Self {
        let id = EventId::new();
        Event {
            id,
            event_type: event_type.into(),
            phase,
            timestamp: Utc::now(),
            subject_type_name: None,
            subject_version_id: None,
            actor_type_name: None,
            actor_version_id: None,
            context_version_ids: BTreeMap::new(),
            lineage_id: LineageId::new(),
            parent_id: None,
            root_id: id,
            children_ids: Vec::new(),
            pending_children_count: None,
            duration_ms: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Set the primary subject, consuming and returning the event
    pub fn with_subject(
        mut self,
        type_name: impl Into<String>,
        version_id: VersionId,
    ) -> Self {
        self.subject_type_name = Some(type_name.into());
        self.subject_version_id = Some(version_id);
        self
    }

    /// Set the triggering party, consuming and returning the event
    pub fn with_actor(mut self, type_name: impl Into<String>, version_id: VersionId) -> Self {
        self.actor_type_name = Some(type_name.into());
        self.actor_version_id = Some(version_id);
        self
    }

    /// Add a related record under a role name
    pub fn with_context(mut self, role: impl Into<String>, version_id: VersionId) -> Self {
        self.context_version_ids.insert(role.into(), version_id);
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Link this event under a parent
    ///
    /// Adopts the parent's `root_id` and inherits its `lineage_id`; the
    /// parent must already have been emitted for the hierarchy invariant
    /// to hold.
    pub fn with_parent(mut self, parent: &Event) -> Self {
        self.parent_id = Some(parent.id);
        self.root_id = parent.root_id;
        self.lineage_id = parent.lineage_id;
        self
    }

    /// Build the follow-up event of the same operation
    ///
    /// The follow-up shares this event's lineage, parent linkage, tree
    /// root, subject and actor; it gets a fresh id and timestamp. The
    /// completion of a root operation therefore stays inside the tree its
    /// start event founded.
    pub fn follow_up(&self, event_type: impl Into<String>, phase: EventPhase) -> Event {
        Event {
            id: EventId::new(),
            event_type: event_type.into(),
            phase,
            timestamp: Utc::now(),
            subject_type_name: self.subject_type_name.clone(),
            subject_version_id: self.subject_version_id,
            actor_type_name: self.actor_type_name.clone(),
            actor_version_id: self.actor_version_id,
            context_version_ids: self.context_version_ids.clone(),
            lineage_id: self.lineage_id,
            parent_id: self.parent_id,
            root_id: self.root_id,
            children_ids: Vec::new(),
            pending_children_count: None,
            duration_ms: None,
            metadata: self.metadata.clone(),
        }
    }

    /// Check whether this event's phase ends its operation
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Check whether this event is the root of its tree
    pub fn is_tree_root(&self) -> bool {
        self.parent_id.is_none()
    }
}
