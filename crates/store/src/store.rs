//! Entity store
//!
//! Process-wide state holding the complete current and historical state of
//! every registered graph, behind five indices:
//!
//! | index             | key -> value                                   |
//! |-------------------|------------------------------------------------|
//! | `graphs`          | root version -> stored graph at that version   |
//! | `lineages`        | lineage -> ordered root versions, newest last  |
//! | `instances`       | instance -> entity (live-memory reverse lookup)|
//! | `version_to_root` | version -> most recent root containing it      |
//! | `by_type`         | type name -> roots of that type                |
//!
//! Nothing is ever deleted; every retrieval materialises a fresh copy with
//! new instance ids, so readers never observe each other.
//!
//! One coarse lock guards all five indices: store operations are fast, and
//! registered-function execution never runs under the lock. Internal index
//! checks that fail poison the store into a degraded read-only mode.

use crate::persist::PersistenceBackend;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use provenant_core::{
    diff_graphs, Entity, EntityGraph, Error, Event, EventPhase, InstanceId, LineageId, Result,
    Value, VersionId,
};
use provenant_events::{context, EventBus};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Event type emitted when a root graph is registered
pub const ENTITY_REGISTERED: &str = "entity.registered";
/// Event type emitted when a graph gains a new version
pub const ENTITY_VERSIONED: &str = "entity.versioned";
/// Event type emitted when a record is promoted to a root
pub const ENTITY_PROMOTED: &str = "entity.promoted";
/// Event type emitted when a record is detached from its graph
pub const ENTITY_DETACHED: &str = "entity.detached";
/// Event type emitted when a root is attached under a new parent
pub const ENTITY_ATTACHED: &str = "entity.attached";

/// Per-index entry counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Stored graphs
    pub graphs: usize,
    /// Known lineages
    pub lineages: usize,
    /// Indexed instances
    pub instances: usize,
    /// Version-to-root mappings
    pub versions: usize,
    /// Distinct root types
    pub types: usize,
    /// Whether the store has degraded to read-only
    pub degraded: bool,
}

#[derive(Default)]
struct StoreInner {
    graphs: HashMap<VersionId, EntityGraph>,
    lineages: HashMap<LineageId, Vec<VersionId>>,
    instances: HashMap<InstanceId, Entity>,
    version_to_root: HashMap<VersionId, VersionId>,
    by_type: HashMap<String, HashSet<VersionId>>,
    poisoned: bool,
}

impl StoreInner {
    /// Index one built graph under its root
    fn index_graph(&mut self, graph: EntityGraph) {
        let root_vid = graph.root_version_id();
        for node in graph.nodes() {
            self.version_to_root.insert(node.version_id, root_vid);
            if let Some(entity) = graph.entity_at(node.version_id) {
                self.instances.insert(node.instance_id, entity.clone());
            }
        }
        self.by_type
            .entry(graph.root_entity().type_name().to_string())
            .or_default()
            .insert(root_vid);
        self.graphs.insert(root_vid, graph);
    }
}

/// Versioned, provenance-tracked entity store
///
/// Construct one per process (or per test) and share it behind an `Arc`.
/// When an event bus is injected, every mutation emits a notification
/// event carrying identifiers only, parented from the ambient operation
/// context.
pub struct EntityStore {
    inner: RwLock<StoreInner>,
    bus: Option<Arc<EventBus>>,
    persistence: RwLock<Option<Box<dyn PersistenceBackend>>>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    /// Create an empty store without event emission
    pub fn new() -> Self {
        EntityStore {
            inner: RwLock::new(StoreInner::default()),
            bus: None,
            persistence: RwLock::new(None),
        }
    }

    /// Create an empty store that notifies the given bus
    pub fn with_bus(bus: Arc<EventBus>) -> Self {
        EntityStore {
            inner: RwLock::new(StoreInner::default()),
            bus: Some(bus),
            persistence: RwLock::new(None),
        }
    }

    // =========================================================================
    // Registration and versioning
    // =========================================================================

    /// Register a record (and everything nested in it) as a new root graph
    ///
    /// Sets the root linkage on every node, appends the root to its
    /// lineage, and fills all five indices. Fails with
    /// [`Error::AlreadyRegistered`] when a graph at this exact version
    /// already exists.
    pub fn register_root(&self, entity: &mut Entity) -> Result<VersionId> {
        let root_vid = entity.version_id();
        let root_instance = entity.instance_id();
        let lineage = entity.lineage_id();

        entity.visit_mut(&mut |e| e.set_root(root_vid, root_instance));
        let graph = EntityGraph::build(entity)?;
        let node_count = graph.node_count();

        {
            let mut inner = self.inner.write();
            check_writable(&inner)?;
            if inner.graphs.contains_key(&root_vid) {
                return Err(Error::AlreadyRegistered(root_vid));
            }
            inner.lineages.entry(lineage).or_default().push(root_vid);
            inner.index_graph(graph);
        }

        debug!(root = %root_vid, nodes = node_count, "registered root graph");
        self.notify(
            Event::new(ENTITY_REGISTERED, EventPhase::Completed)
                .with_subject(entity.type_name(), root_vid)
                .with_metadata("nodes", node_count.to_string()),
        );
        Ok(root_vid)
    }

    /// Version a root record against its stored lineage
    ///
    /// Builds a graph from the record's current in-memory state, diffs it
    /// against the lineage's latest stored graph, rotates the version of
    /// every changed node, propagates the new root version throughout, and
    /// re-indexes. Returns `false` (a no-op) when nothing changed and
    /// `force` is off.
    pub fn version(&self, entity: &mut Entity, force: bool) -> Result<bool> {
        if !entity.is_root() {
            return Err(Error::InvariantViolation(
                "version() requires a root record".to_string(),
            ));
        }
        let lineage = entity.lineage_id();
        let new_graph = EntityGraph::build(entity)?;

        // One write lock spans lookup, diff and re-index so concurrent
        // version() calls on the same lineage serialise.
        let mut inner = self.inner.write();
        check_writable(&inner)?;
        let previous_root = *inner
            .lineages
            .get(&lineage)
            .and_then(|roots| roots.last())
            .ok_or_else(|| Error::NotFound(format!("lineage {}", lineage)))?;
        let Some(old_graph) = inner.graphs.get(&previous_root) else {
            inner.poisoned = true;
            return Err(Error::StoreInconsistency(format!(
                "lineage {} names root {} but no graph is stored there",
                lineage, previous_root
            )));
        };
        let diff = diff_graphs(&new_graph, old_graph);

        if diff.is_empty() && !force {
            debug!(root = %previous_root, "version(): no changes");
            return Ok(false);
        }

        let mut changed = diff.changed.clone();
        if force {
            changed.insert(entity.version_id());
        }

        // Rotate every changed node, then point the whole graph at the new
        // root version. Reference duplicates of the same node must adopt
        // the same rotated identity, so the first occurrence decides.
        let mut rotation: HashMap<VersionId, (VersionId, DateTime<Utc>)> = HashMap::new();
        entity.visit_mut(&mut |e| {
            let old = e.version_id();
            if !changed.contains(&old) {
                return;
            }
            match rotation.get(&old) {
                Some((new_vid, forked_at)) => {
                    let meta = e.meta_mut();
                    meta.version_id = *new_vid;
                    meta.previous_version_id = Some(old);
                    meta.prior_version_ids.push(old);
                    meta.forked_at = Some(*forked_at);
                }
                None => {
                    e.update_identifiers(None);
                    let forked_at = e.meta().forked_at.unwrap_or_else(Utc::now);
                    rotation.insert(old, (e.version_id(), forked_at));
                }
            }
        });
        let new_root_vid = entity.version_id();
        let root_instance = entity.instance_id();
        entity.visit_mut(&mut |e| e.set_root(new_root_vid, root_instance));

        let reindexed = EntityGraph::build(entity)?;
        if inner.graphs.contains_key(&new_root_vid) {
            return Err(Error::AlreadyRegistered(new_root_vid));
        }
        inner.lineages.entry(lineage).or_default().push(new_root_vid);
        inner.index_graph(reindexed);
        drop(inner);

        info!(
            lineage = %lineage,
            previous = %previous_root,
            root = %new_root_vid,
            rotated = changed.len(),
            "versioned graph"
        );
        self.notify(
            Event::new(ENTITY_VERSIONED, EventPhase::Completed)
                .with_subject(entity.type_name(), new_root_vid)
                .with_context("previous_root", previous_root)
                .with_metadata("rotated", changed.len().to_string())
                .with_metadata("added", diff.added.len().to_string())
                .with_metadata("removed", diff.removed.len().to_string()),
        );
        Ok(true)
    }

    // =========================================================================
    // Retrieval
    // =========================================================================

    /// Retrieve the root record of a stored graph
    ///
    /// Returns a deep clone with fresh instance ids throughout; structural
    /// fidelity (nesting, references, provenance) is preserved.
    pub fn get_graph(&self, root_version_id: VersionId) -> Result<Entity> {
        let inner = self.inner.read();
        let graph = inner
            .graphs
            .get(&root_version_id)
            .ok_or_else(|| Error::NotFound(format!("graph {}", root_version_id)))?;
        Ok(materialise(graph.root_entity()))
    }

    /// Retrieve any record by version
    ///
    /// Locates the enclosing graph through `version_to_root`, materialises
    /// it, and walks to the requested node.
    pub fn get_record(&self, version_id: VersionId) -> Result<Entity> {
        let looked = {
            let inner = self.inner.read();
            let Some(root_vid) = inner.version_to_root.get(&version_id).copied() else {
                return Err(Error::NotFound(format!("record {}", version_id)));
            };
            match inner.graphs.get(&root_vid) {
                Some(graph) => match graph.node(version_id) {
                    Some(node) => Ok((materialise(graph.root_entity()), node.path.clone())),
                    None => Err(format!(
                        "graph {} does not contain indexed version {}",
                        root_vid, version_id
                    )),
                },
                None => Err(format!(
                    "version {} maps to root {} but no graph is stored there",
                    version_id, root_vid
                )),
            }
        };
        let (fresh, path) = match looked {
            Ok(found) => found,
            Err(message) => {
                self.poison();
                return Err(Error::StoreInconsistency(message));
            }
        };
        let record = provenant_core::graph::entity_at_path(&fresh, &path).ok_or_else(|| {
            Error::StoreInconsistency(format!(
                "stored path for {} no longer walks to an entity",
                version_id
            ))
        })?;
        Ok(record.clone())
    }

    // =========================================================================
    // Promotion, detachment, attachment
    // =========================================================================

    /// Promote a free-standing record to a root (mark-as-root)
    ///
    /// A record currently embedded in another registered graph cannot be
    /// promoted directly; detach it from its root first.
    pub fn mark_as_root(&self, entity: &mut Entity) -> Result<VersionId> {
        if let Some(current_root) = entity.root_version_id() {
            if current_root != entity.version_id() {
                return Err(Error::InvariantViolation(format!(
                    "record {} belongs to root {}; detach it before promoting",
                    entity.version_id(),
                    current_root
                )));
            }
        }
        let root_vid = self.register_root(entity)?;
        self.notify(
            Event::new(ENTITY_PROMOTED, EventPhase::Completed)
                .with_subject(entity.type_name(), root_vid),
        );
        Ok(root_vid)
    }

    /// Detach a nested record from its root graph
    ///
    /// Removes every occurrence of the record from the root's payload,
    /// gives the detached record a fresh lineage and its own root status,
    /// registers it as a new root, and versions the former root graph.
    /// Returns the detached record.
    pub fn detach(&self, root: &mut Entity, child: VersionId) -> Result<Entity> {
        if root.version_id() == child {
            return Err(Error::InvariantViolation(
                "cannot detach a root from itself".to_string(),
            ));
        }
        let mut detached = remove_occurrences(root, child)
            .ok_or_else(|| Error::NotFound(format!("record {} under root {}", child, root.version_id())))?;

        let former_root = root.version_id();
        detached.meta_mut().lineage_id = LineageId::new();
        let child_instance = detached.instance_id();
        detached.set_root(child, child_instance);

        self.register_root(&mut detached)?;
        self.version(root, false)?;

        self.notify(
            Event::new(ENTITY_DETACHED, EventPhase::Completed)
                .with_subject(detached.type_name(), detached.version_id())
                .with_context("former_root", former_root),
        );
        Ok(detached)
    }

    /// Attach a currently-root record under a parent root's field
    ///
    /// The child adopts the parent's lineage and root linkage; the parent
    /// graph is then versioned. Fails with [`Error::InvariantViolation`]
    /// when the attachment would place a record inside its own ancestry.
    pub fn attach(&self, parent: &mut Entity, field: &str, mut child: Entity) -> Result<bool> {
        if !child.is_root() {
            return Err(Error::InvariantViolation(format!(
                "attach() requires a root record, got {}",
                child.version_id()
            )));
        }
        if child.version_id() == parent.version_id() {
            return Err(Error::InvariantViolation(
                "cannot attach a record to itself".to_string(),
            ));
        }
        let child_graph = EntityGraph::build(&child)?;
        if child_graph.contains(parent.version_id()) {
            return Err(Error::InvariantViolation(format!(
                "cannot attach {}: parent {} lies inside it",
                child.version_id(),
                parent.version_id()
            )));
        }

        let child_vid = child.version_id();
        child.meta_mut().lineage_id = parent.lineage_id();
        parent.set_field(field, Value::from(child));
        let versioned = self.version(parent, false)?;

        self.notify(
            Event::new(ENTITY_ATTACHED, EventPhase::Completed)
                .with_subject(parent.type_name(), parent.version_id())
                .with_context("attached", child_vid),
        );
        Ok(versioned)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Root versions recorded for a lineage, oldest first
    pub fn list_lineage(&self, lineage_id: LineageId) -> Result<Vec<VersionId>> {
        self.inner
            .read()
            .lineages
            .get(&lineage_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("lineage {}", lineage_id)))
    }

    /// The lineage's most recent root version
    pub fn latest_root(&self, lineage_id: LineageId) -> Option<VersionId> {
        self.inner
            .read()
            .lineages
            .get(&lineage_id)
            .and_then(|roots| roots.last().copied())
    }

    /// Roots of a given entity type
    pub fn find_by_type(&self, type_name: &str) -> Vec<VersionId> {
        self.inner
            .read()
            .by_type
            .get(type_name)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// A clone of the stored graph at a root version
    pub fn stored_graph(&self, root_version_id: VersionId) -> Result<EntityGraph> {
        self.inner
            .read()
            .graphs
            .get(&root_version_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("graph {}", root_version_id)))
    }

    /// Check whether any stored graph contains this version
    pub fn contains_version(&self, version_id: VersionId) -> bool {
        self.inner.read().version_to_root.contains_key(&version_id)
    }

    /// Look up the live-memory copy indexed under an instance id
    pub fn instance(&self, instance_id: InstanceId) -> Option<Entity> {
        self.inner.read().instances.get(&instance_id).cloned()
    }

    /// Number of stored graphs
    pub fn len(&self) -> usize {
        self.inner.read().graphs.len()
    }

    /// Check whether the store holds no graphs
    pub fn is_empty(&self) -> bool {
        self.inner.read().graphs.is_empty()
    }

    /// Per-index entry counts
    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.read();
        StoreStats {
            graphs: inner.graphs.len(),
            lineages: inner.lineages.len(),
            instances: inner.instances.len(),
            versions: inner.version_to_root.len(),
            types: inner.by_type.len(),
            degraded: inner.poisoned,
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Install a persistence backend
    ///
    /// The store never persists implicitly; callers drive
    /// [`persist_root`](Self::persist_root) and
    /// [`load_root`](Self::load_root) explicitly.
    pub fn install_persistence(&self, backend: Box<dyn PersistenceBackend>) {
        *self.persistence.write() = Some(backend);
    }

    /// Save one stored graph through the installed backend
    pub fn persist_root(&self, root_version_id: VersionId) -> Result<()> {
        let graph = self.stored_graph(root_version_id)?;
        let persistence = self.persistence.read();
        let backend = persistence
            .as_ref()
            .ok_or_else(|| Error::Persistence("no backend installed".to_string()))?;
        backend.save(&graph)
    }

    /// Load a graph through the installed backend and index it
    ///
    /// Returns a fresh copy of the loaded root. Loading a graph that is
    /// already present is a no-op re-read.
    pub fn load_root(&self, root_version_id: VersionId) -> Result<Entity> {
        let loaded = {
            let persistence = self.persistence.read();
            let backend = persistence
                .as_ref()
                .ok_or_else(|| Error::Persistence("no backend installed".to_string()))?;
            backend.load(root_version_id)?
        };
        {
            let mut inner = self.inner.write();
            check_writable(&inner)?;
            if !inner.graphs.contains_key(&root_version_id) {
                let lineage = loaded.root_entity().lineage_id();
                inner.lineages.entry(lineage).or_default().push(root_version_id);
                inner.index_graph(loaded);
            }
        }
        self.get_graph(root_version_id)
    }

    /// Roots available from the installed backend
    pub fn persisted_roots(&self) -> Result<Vec<VersionId>> {
        let persistence = self.persistence.read();
        let backend = persistence
            .as_ref()
            .ok_or_else(|| Error::Persistence("no backend installed".to_string()))?;
        backend.list_roots()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn poison(&self) {
        warn!("entity store degrading to read-only after an internal inconsistency");
        self.inner.write().poisoned = true;
    }

    fn notify(&self, event: Event) {
        if let Some(bus) = &self.bus {
            let event = match context::current_parent() {
                Some(parent) => event.with_parent(&parent),
                None => event,
            };
            bus.emit(event);
        }
    }
}

fn check_writable(inner: &StoreInner) -> Result<()> {
    if inner.poisoned {
        return Err(Error::InvariantViolation(
            "store is in degraded read-only mode".to_string(),
        ));
    }
    Ok(())
}

/// Deep clone with fresh instance ids and rewired root-instance linkage
fn materialise(stored: &Entity) -> Entity {
    let mut copy = stored.fresh_copy();
    let root_instance = copy.instance_id();
    copy.visit_mut(&mut |e| e.meta_mut().root_instance_id = Some(root_instance));
    copy
}

/// Remove every occurrence of a version from an entity's payload
///
/// Direct fields and tuple slots are replaced by `Null` (their shape is
/// part of the parent's schema); list elements and map entries are removed
/// outright. Returns the first removed entity.
fn remove_occurrences(entity: &mut Entity, target: VersionId) -> Option<Entity> {
    let mut removed: Option<Entity> = None;
    let field_names: Vec<String> = entity.field_names().iter().map(|s| s.to_string()).collect();
    for name in field_names {
        if let Some(value) = entity.get_field_mut(&name) {
            remove_in_value(value, target, &mut removed);
        }
    }
    removed
}

fn value_is_target(value: &Value, target: VersionId) -> bool {
    matches!(value, Value::Entity(e) if e.version_id() == target)
}

fn remove_in_value(value: &mut Value, target: VersionId, removed: &mut Option<Entity>) {
    match value {
        Value::Entity(e) => {
            if e.version_id() == target {
                let taken = std::mem::replace(value, Value::Null);
                if removed.is_none() {
                    if let Value::Entity(e) = taken {
                        *removed = Some(*e);
                    }
                }
            } else {
                let names: Vec<String> =
                    e.field_names().iter().map(|s| s.to_string()).collect();
                for name in names {
                    if let Some(inner) = e.get_field_mut(&name) {
                        remove_in_value(inner, target, removed);
                    }
                }
            }
        }
        Value::List(items) => {
            let mut i = 0;
            while i < items.len() {
                if value_is_target(&items[i], target) {
                    if let Value::Entity(e) = items.remove(i) {
                        if removed.is_none() {
                            *removed = Some(*e);
                        }
                    }
                } else {
                    remove_in_value(&mut items[i], target, removed);
                    i += 1;
                }
            }
        }
        Value::Tuple(items) => {
            for item in items.iter_mut() {
                remove_in_value(item, target, removed);
            }
        }
        Value::Map(map) => {
            let doomed: Vec<String> = map
                .iter()
                .filter(|(_, v)| value_is_target(v, target))
                .map(|(k, _)| k.clone())
                .collect();
            for key in doomed {
                if let Some(Value::Entity(e)) = map.remove(&key) {
                    if removed.is_none() {
                        *removed = Some(*e);
                    }
                }
            }
            for item in map.values_mut() {
                remove_in_value(item, target, removed);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(name: &str, age: i64) -> Entity {
        Entity::new("Person")
            .with_field("name", name)
            .with_field("age", age)
    }

    #[test]
    fn test_register_root_fills_indices() {
        let store = EntityStore::new();
        let mut team = Entity::new("Team").with_field("lead", person("a", 1));
        let root_vid = store.register_root(&mut team).unwrap();

        assert_eq!(root_vid, team.version_id());
        assert!(team.is_root());
        let lead = team.get_field("lead").unwrap().as_entity().unwrap();
        assert_eq!(lead.root_version_id(), Some(root_vid));

        let stats = store.stats();
        assert_eq!(stats.graphs, 1);
        assert_eq!(stats.lineages, 1);
        assert_eq!(stats.versions, 2);
        assert_eq!(stats.instances, 2);
        assert_eq!(stats.types, 1);
        assert_eq!(store.find_by_type("Team"), vec![root_vid]);
        assert!(store.contains_version(lead.version_id()));
    }

    #[test]
    fn test_register_twice_fails() {
        let store = EntityStore::new();
        let mut a = person("a", 1);
        store.register_root(&mut a).unwrap();
        let mut same = a.clone();
        assert!(matches!(
            store.register_root(&mut same),
            Err(Error::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_version_rotates_and_extends_lineage() {
        let store = EntityStore::new();
        let mut a = person("alice", 30);
        let v0 = store.register_root(&mut a).unwrap();

        a.set_field("age", 31i64);
        assert!(store.version(&mut a, false).unwrap());
        let v1 = a.version_id();
        assert_ne!(v0, v1);
        assert_eq!(a.meta().previous_version_id, Some(v0));
        assert_eq!(store.list_lineage(a.lineage_id()).unwrap(), vec![v0, v1]);

        // Both versions remain retrievable.
        assert_eq!(
            store
                .get_graph(v0)
                .unwrap()
                .get_field("age")
                .unwrap()
                .as_i64(),
            Some(30)
        );
        assert_eq!(
            store
                .get_graph(v1)
                .unwrap()
                .get_field("age")
                .unwrap()
                .as_i64(),
            Some(31)
        );
    }

    #[test]
    fn test_version_no_change_is_noop() {
        let store = EntityStore::new();
        let mut a = person("a", 1);
        let v0 = store.register_root(&mut a).unwrap();
        assert!(!store.version(&mut a, false).unwrap());
        assert_eq!(a.version_id(), v0);
        assert_eq!(store.list_lineage(a.lineage_id()).unwrap(), vec![v0]);
    }

    #[test]
    fn test_version_force_rotates_anyway() {
        let store = EntityStore::new();
        let mut a = person("a", 1);
        let v0 = store.register_root(&mut a).unwrap();
        assert!(store.version(&mut a, true).unwrap());
        assert_ne!(a.version_id(), v0);
    }

    #[test]
    fn test_version_rotates_only_changed_subtree() {
        let store = EntityStore::new();
        let lead = person("lead", 1);
        let intern = person("intern", 2);
        let intern_vid = intern.version_id();
        let mut team = Entity::new("Team")
            .with_field("lead", lead)
            .with_field("intern", intern);
        store.register_root(&mut team).unwrap();
        let lead_vid = team
            .get_field("lead")
            .unwrap()
            .as_entity()
            .unwrap()
            .version_id();

        team.get_field_mut("lead")
            .unwrap()
            .as_entity_mut()
            .unwrap()
            .set_field("age", 99i64);
        assert!(store.version(&mut team, false).unwrap());

        let new_lead = team.get_field("lead").unwrap().as_entity().unwrap();
        let same_intern = team.get_field("intern").unwrap().as_entity().unwrap();
        assert_ne!(new_lead.version_id(), lead_vid);
        assert_eq!(same_intern.version_id(), intern_vid);
        // Every node points at the new root regardless.
        assert_eq!(same_intern.root_version_id(), Some(team.version_id()));
    }

    #[test]
    fn test_version_keeps_reference_duplicates_aligned() {
        let store = EntityStore::new();
        let shared = person("shared", 1);
        let mut pair = Entity::new("Pair")
            .with_field("first", shared.clone())
            .with_field("second", shared);
        store.register_root(&mut pair).unwrap();

        for field in ["first", "second"] {
            pair.get_field_mut(field)
                .unwrap()
                .as_entity_mut()
                .unwrap()
                .set_field("age", 2i64);
        }
        assert!(store.version(&mut pair, false).unwrap());

        let first = pair.get_field("first").unwrap().as_entity().unwrap();
        let second = pair.get_field("second").unwrap().as_entity().unwrap();
        assert_eq!(first.version_id(), second.version_id());
        assert_eq!(
            first.meta().previous_version_id,
            second.meta().previous_version_id
        );
    }

    #[test]
    fn test_get_graph_returns_fresh_instances() {
        let store = EntityStore::new();
        let mut team = Entity::new("Team").with_field("lead", person("a", 1));
        let root_vid = store.register_root(&mut team).unwrap();

        let first = store.get_graph(root_vid).unwrap();
        let second = store.get_graph(root_vid).unwrap();
        assert_eq!(first.version_id(), second.version_id());
        assert_ne!(first.instance_id(), second.instance_id());
        assert_eq!(
            first.meta().root_instance_id,
            Some(first.instance_id())
        );

        let c1 = first.get_field("lead").unwrap().as_entity().unwrap();
        let c2 = second.get_field("lead").unwrap().as_entity().unwrap();
        assert_eq!(c1.version_id(), c2.version_id());
        assert_ne!(c1.instance_id(), c2.instance_id());
    }

    #[test]
    fn test_get_record_walks_to_nested_node() {
        let store = EntityStore::new();
        let lead = person("lead", 5);
        let lead_vid = lead.version_id();
        let mut team = Entity::new("Team").with_field("lead", lead);
        store.register_root(&mut team).unwrap();

        let found = store.get_record(lead_vid).unwrap();
        assert_eq!(found.version_id(), lead_vid);
        assert_eq!(found.get_field("age").unwrap().as_i64(), Some(5));
        assert_eq!(found.root_version_id(), Some(team.version_id()));
    }

    #[test]
    fn test_get_record_unknown_version() {
        let store = EntityStore::new();
        assert!(matches!(
            store.get_record(VersionId::new()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_mark_as_root_rejects_embedded_record() {
        let store = EntityStore::new();
        let lead = person("lead", 1);
        let lead_vid = lead.version_id();
        let mut team = Entity::new("Team").with_field("lead", lead);
        store.register_root(&mut team).unwrap();

        let mut embedded = store.get_record(lead_vid).unwrap();
        assert!(matches!(
            store.mark_as_root(&mut embedded),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_detach_promotes_child_and_versions_root() {
        let store = EntityStore::new();
        let lead = person("lead", 1);
        let lead_vid = lead.version_id();
        let mut team = Entity::new("Team").with_field("lead", lead);
        let old_root = store.register_root(&mut team).unwrap();
        let old_lineage = team.lineage_id();

        let detached = store.detach(&mut team, lead_vid).unwrap();
        assert_eq!(detached.version_id(), lead_vid);
        assert!(detached.is_root());
        assert_ne!(detached.lineage_id(), old_lineage);
        // Former root lost the child and gained a version.
        assert_ne!(team.version_id(), old_root);
        assert_eq!(team.get_field("lead"), Some(&Value::Null));
        // Detached record is addressable as its own graph.
        assert!(store.get_graph(lead_vid).is_ok());
    }

    #[test]
    fn test_detach_unknown_child() {
        let store = EntityStore::new();
        let mut team = Entity::new("Team").with_field("lead", person("a", 1));
        store.register_root(&mut team).unwrap();
        assert!(matches!(
            store.detach(&mut team, VersionId::new()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_attach_adopts_lineage_and_versions_parent() {
        let store = EntityStore::new();
        let mut parent = Entity::new("Team").with_field("name", "core");
        let parent_v0 = store.register_root(&mut parent).unwrap();
        let mut child = person("newcomer", 1);
        store.register_root(&mut child).unwrap();

        let child_for_attach = store.get_graph(child.version_id()).unwrap();
        assert!(store.attach(&mut parent, "hire", child_for_attach).unwrap());

        assert_ne!(parent.version_id(), parent_v0);
        let attached = parent.get_field("hire").unwrap().as_entity().unwrap();
        assert_eq!(attached.lineage_id(), parent.lineage_id());
        assert_eq!(attached.root_version_id(), Some(parent.version_id()));
    }

    #[test]
    fn test_attach_rejects_self_and_cycles() {
        let store = EntityStore::new();
        let mut parent = Entity::new("Team").with_field("name", "core");
        store.register_root(&mut parent).unwrap();

        let self_copy = parent.clone();
        assert!(matches!(
            store.attach(&mut parent, "loop", self_copy),
            Err(Error::InvariantViolation(_))
        ));

        // A child whose subtree contains the parent is an ancestry cycle.
        let mut trojan = Entity::new("Wrapper").with_field("inner", parent.clone());
        trojan.set_root(trojan.version_id(), trojan.instance_id());
        assert!(matches!(
            store.attach(&mut parent, "wrap", trojan),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_store_events_emitted() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(move |e| sink.lock().push(e.event_type.clone()));

        let store = EntityStore::with_bus(bus.clone());
        let mut a = person("a", 1);
        store.register_root(&mut a).unwrap();
        a.set_field("age", 2i64);
        store.version(&mut a, false).unwrap();
        bus.flush_blocking();

        let types = seen.lock();
        assert_eq!(
            *types,
            vec![
                ENTITY_REGISTERED.to_string(),
                ENTITY_VERSIONED.to_string()
            ]
        );
    }

    #[test]
    fn test_instance_index_round_trip() {
        let store = EntityStore::new();
        let mut a = person("a", 1);
        store.register_root(&mut a).unwrap();
        let stored = store.stored_graph(a.version_id()).unwrap();
        let instance_id = stored.root_entity().instance_id();
        let via_instance = store.instance(instance_id).unwrap();
        assert_eq!(via_instance.version_id(), a.version_id());
    }
}
