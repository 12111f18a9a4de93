//! Entity: immutable typed record with identity, lineage and provenance
//!
//! ## Identity model
//!
//! Every entity carries three identifiers with distinct rotation rules:
//!
//! - `version_id` rotates on every modification (a new version)
//! - `instance_id` rotates on every materialisation into fresh memory
//! - `lineage_id` rotates only on detachment from a graph
//!
//! plus the root linkage (`root_version_id`, `root_instance_id`), the
//! version chain (`previous_version_id`, `prior_version_ids`), and the
//! provenance fields describing which function execution produced the
//! entity and where each payload field's value came from.
//!
//! ## The single mutation path
//!
//! `update_identifiers` is the only way a version rotates: the old
//! `version_id` becomes `previous_version_id` and is appended to
//! `prior_version_ids`. The store drives this during versioning; nothing
//! else rotates versions.

use crate::error::{Error, Result};
use crate::types::{ExecutionId, InstanceId, LineageId, PathStep, VersionId};
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a payload field's current value came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceRef {
    /// Derived from the entity (or execution record) with this version
    Version(VersionId),
    /// Produced directly by a registered function's body
    Function,
}

/// Identity, lineage and provenance metadata of an entity
///
/// ## Invariants
///
/// - a root entity satisfies `root_version_id == Some(version_id)`
/// - `previous_version_id.is_none()` iff `prior_version_ids.is_empty()`
/// - `sibling_output_version_ids` is symmetric across sibling outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMeta {
    /// Globally unique identity of this version
    pub version_id: VersionId,
    /// Identity of this in-memory materialisation
    pub instance_id: InstanceId,
    /// Identity shared by all versions of this logical entity
    pub lineage_id: LineageId,
    /// Version of the root of the graph this entity belongs to
    pub root_version_id: Option<VersionId>,
    /// Instance of that root in current memory
    pub root_instance_id: Option<InstanceId>,
    /// Immediately preceding version, if any
    pub previous_version_id: Option<VersionId>,
    /// Every prior version in order, oldest first
    pub prior_version_ids: Vec<VersionId>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent version fork
    pub forked_at: Option<DateTime<Utc>>,
    /// Per-field provenance: field name to the source it was derived from
    pub attribute_source: BTreeMap<String, SourceRef>,
    /// Name of the registered function that produced this entity
    pub derived_from_function: Option<String>,
    /// Execution that produced this entity
    pub derived_from_execution_id: Option<ExecutionId>,
    /// Versions of peer outputs of the same execution
    pub sibling_output_version_ids: Vec<VersionId>,
    /// Position among peer outputs
    pub output_index: Option<usize>,
}

impl EntityMeta {
    fn fresh() -> Self {
        EntityMeta {
            version_id: VersionId::new(),
            instance_id: InstanceId::new(),
            lineage_id: LineageId::new(),
            root_version_id: None,
            root_instance_id: None,
            previous_version_id: None,
            prior_version_ids: Vec::new(),
            created_at: Utc::now(),
            forked_at: None,
            attribute_source: BTreeMap::new(),
            derived_from_function: None,
            derived_from_execution_id: None,
            sibling_output_version_ids: Vec::new(),
            output_index: None,
        }
    }
}

/// A typed record with identity, lineage and provenance
///
/// The payload is a field bag (`name -> Value`); nested entities inside the
/// payload form the structural graph. The `type_name` discriminates entity
/// types for the store's type index and for schema checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    type_name: String,
    fields: BTreeMap<String, Value>,
    meta: EntityMeta,
}

impl Entity {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Create a new entity with fresh identifiers and an empty payload
    pub fn new(type_name: impl Into<String>) -> Self {
        Entity {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
            meta: EntityMeta::fresh(),
        }
    }

    /// Create a new entity with the given payload
    pub fn with_fields(type_name: impl Into<String>, fields: BTreeMap<String, Value>) -> Self {
        Entity {
            type_name: type_name.into(),
            fields,
            meta: EntityMeta::fresh(),
        }
    }

    /// Add a payload field, consuming and returning the entity
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    // =========================================================================
    // Identity accessors
    // =========================================================================

    /// Type name of this entity
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Version identity
    pub fn version_id(&self) -> VersionId {
        self.meta.version_id
    }

    /// In-memory instance identity
    pub fn instance_id(&self) -> InstanceId {
        self.meta.instance_id
    }

    /// Lineage identity
    pub fn lineage_id(&self) -> LineageId {
        self.meta.lineage_id
    }

    /// Version of the root of the containing graph, if any
    pub fn root_version_id(&self) -> Option<VersionId> {
        self.meta.root_version_id
    }

    /// Check whether this entity is the root of its own graph
    pub fn is_root(&self) -> bool {
        self.meta.root_version_id == Some(self.meta.version_id)
    }

    /// Identity equality: two entities are the same version
    pub fn identity_eq(&self, other: &Entity) -> bool {
        self.meta.version_id == other.meta.version_id
    }

    /// Full metadata view
    pub fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    /// Mutable metadata view
    ///
    /// The store and registry adjust lineage/provenance fields through this;
    /// ordinary callers should not need it.
    pub fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    // =========================================================================
    // Payload access
    // =========================================================================

    /// Borrow a payload field
    pub fn get_field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Mutably borrow a payload field
    pub fn get_field_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.get_mut(name)
    }

    /// Set a payload field
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Remove a payload field, returning its value
    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Iterate over payload fields in name order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Mutably iterate over payload fields
    pub fn fields_mut(&mut self) -> impl Iterator<Item = (&String, &mut Value)> {
        self.fields.iter_mut()
    }

    /// Payload field names in order
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    /// Walk a navigation path into the payload
    ///
    /// An empty path yields an error; use the entity itself for that case.
    pub fn get_path(&self, steps: &[PathStep]) -> Result<&Value> {
        let (first, rest) = steps.split_first().ok_or_else(|| Error::PathError {
            step: String::new(),
            reason: "empty path".to_string(),
        })?;
        let mut current = match first {
            PathStep::Field(name) => self.get_field(name).ok_or_else(|| Error::PathError {
                step: name.clone(),
                reason: format!("no field `{}` on {}", name, self.type_name),
            })?,
            PathStep::Index(i) => {
                return Err(Error::PathError {
                    step: i.to_string(),
                    reason: "cannot index an entity".to_string(),
                })
            }
        };
        for step in rest {
            current = current.step(step).ok_or_else(|| Error::PathError {
                step: step.to_string(),
                reason: "cannot walk step".to_string(),
            })?;
        }
        Ok(current)
    }

    // =========================================================================
    // Identity operations
    // =========================================================================

    /// Rotate the version identity
    ///
    /// The old `version_id` becomes `previous_version_id` and is appended to
    /// `prior_version_ids`; `forked_at` is refreshed. When `new_root` is
    /// given, the root linkage is overwritten as well.
    pub fn update_identifiers(&mut self, new_root: Option<VersionId>) {
        let old = self.meta.version_id;
        self.meta.version_id = VersionId::new();
        self.meta.previous_version_id = Some(old);
        self.meta.prior_version_ids.push(old);
        self.meta.forked_at = Some(Utc::now());
        if let Some(root) = new_root {
            self.meta.root_version_id = Some(root);
        }
    }

    /// Deep copy with fresh instance identity
    ///
    /// Every persistent identifier (version, lineage, provenance) is
    /// preserved; `instance_id` rotates on this entity and every nested
    /// entity, so the copy is a distinct in-memory materialisation.
    pub fn fresh_copy(&self) -> Entity {
        let mut copy = self.clone();
        copy.refresh_instances();
        copy
    }

    /// Rotate `instance_id` on this entity and all nested entities in place
    pub fn refresh_instances(&mut self) {
        self.meta.instance_id = InstanceId::new();
        for value in self.fields.values_mut() {
            refresh_value_instances(value);
        }
    }

    /// Point the root linkage of this entity (only) at the given root
    pub fn set_root(&mut self, root_version: VersionId, root_instance: InstanceId) {
        self.meta.root_version_id = Some(root_version);
        self.meta.root_instance_id = Some(root_instance);
    }

    /// Apply a closure to this entity and every nested entity, depth-first
    pub fn visit(&self, f: &mut impl FnMut(&Entity)) {
        f(self);
        for value in self.fields.values() {
            visit_value(value, f);
        }
    }

    /// Mutably apply a closure to this entity and every nested entity
    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut Entity)) {
        f(self);
        for value in self.fields.values_mut() {
            visit_value_entities(value, f);
        }
    }

    // =========================================================================
    // Provenance
    // =========================================================================

    /// Copy a field value from another entity, recording provenance
    ///
    /// The destination field receives a clone of `src`'s field value and
    /// `attribute_source` records the source entity's version.
    pub fn borrow_field_from(
        &mut self,
        src: &Entity,
        src_field: &str,
        dst_field: impl Into<String>,
    ) -> Result<()> {
        let value = src
            .get_field(src_field)
            .ok_or_else(|| Error::PathError {
                step: src_field.to_string(),
                reason: format!("no field `{}` on {}", src_field, src.type_name),
            })?
            .clone();
        let dst_field = dst_field.into();
        self.meta
            .attribute_source
            .insert(dst_field.clone(), SourceRef::Version(src.version_id()));
        self.fields.insert(dst_field, value);
        Ok(())
    }

    /// Record the provenance of a single field
    pub fn set_attribute_source(&mut self, field: impl Into<String>, source: SourceRef) {
        self.meta.attribute_source.insert(field.into(), source);
    }

    /// Stamp execution provenance onto this entity
    ///
    /// Sets `derived_from_function` and `derived_from_execution_id`, and
    /// points every payload field's `attribute_source` at the execution
    /// record, leaving pre-recorded per-field sources (borrowed values)
    /// untouched.
    pub fn stamp_execution(
        &mut self,
        function: impl Into<String>,
        execution_id: ExecutionId,
        execution_version: VersionId,
    ) {
        self.meta.derived_from_function = Some(function.into());
        self.meta.derived_from_execution_id = Some(execution_id);
        let names: Vec<String> = self.fields.keys().cloned().collect();
        for name in names {
            self.meta
                .attribute_source
                .entry(name)
                .or_insert(SourceRef::Version(execution_version));
        }
    }
}

fn refresh_value_instances(value: &mut Value) {
    match value {
        Value::Entity(e) => e.refresh_instances(),
        Value::List(xs) | Value::Tuple(xs) => {
            for x in xs {
                refresh_value_instances(x);
            }
        }
        Value::Map(m) => {
            for v in m.values_mut() {
                refresh_value_instances(v);
            }
        }
        _ => {}
    }
}

fn visit_value(value: &Value, f: &mut impl FnMut(&Entity)) {
    match value {
        Value::Entity(e) => e.visit(f),
        Value::List(xs) | Value::Tuple(xs) => {
            for x in xs {
                visit_value(x, f);
            }
        }
        Value::Map(m) => {
            for v in m.values() {
                visit_value(v, f);
            }
        }
        _ => {}
    }
}

fn visit_value_entities(value: &mut Value, f: &mut impl FnMut(&mut Entity)) {
    match value {
        Value::Entity(e) => e.visit_mut(f),
        Value::List(xs) | Value::Tuple(xs) => {
            for x in xs {
                visit_value_entities(x, f);
            }
        }
        Value::Map(m) => {
            for v in m.values_mut() {
                visit_value_entities(v, f);
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
    fn test_new_entity_has_fresh_identity() {
        let e = person("alice", 30);
        assert_eq!(e.type_name(), "Person");
        assert!(e.meta().previous_version_id.is_none());
        assert!(e.meta().prior_version_ids.is_empty());
        assert!(e.root_version_id().is_none());
        assert!(!e.is_root());
    }

    #[test]
    fn test_identity_eq_is_version_equality() {
        let a = person("a", 1);
        let mut b = a.clone();
        assert!(a.identity_eq(&b));
        b.update_identifiers(None);
        assert!(!a.identity_eq(&b));
    }

    #[test]
    fn test_update_identifiers_chains_versions() {
        let mut e = person("a", 1);
        let v0 = e.version_id();
        e.update_identifiers(None);
        let v1 = e.version_id();
        assert_ne!(v0, v1);
        assert_eq!(e.meta().previous_version_id, Some(v0));
        assert_eq!(e.meta().prior_version_ids, vec![v0]);
        assert!(e.meta().forked_at.is_some());

        e.update_identifiers(None);
        assert_eq!(e.meta().previous_version_id, Some(v1));
        assert_eq!(e.meta().prior_version_ids, vec![v0, v1]);
    }

    #[test]
    fn test_update_identifiers_overwrites_root() {
        let mut e = person("a", 1);
        let root = VersionId::new();
        e.update_identifiers(Some(root));
        assert_eq!(e.root_version_id(), Some(root));
    }

    #[test]
    fn test_fresh_copy_preserves_persistent_ids() {
        let parent = Entity::new("Team")
            .with_field("lead", person("a", 1))
            .with_field("size", 2i64);
        let copy = parent.fresh_copy();

        assert_eq!(copy.version_id(), parent.version_id());
        assert_eq!(copy.lineage_id(), parent.lineage_id());
        assert_ne!(copy.instance_id(), parent.instance_id());

        let orig_child = parent.get_field("lead").unwrap().as_entity().unwrap();
        let copy_child = copy.get_field("lead").unwrap().as_entity().unwrap();
        assert_eq!(copy_child.version_id(), orig_child.version_id());
        assert_ne!(copy_child.instance_id(), orig_child.instance_id());
    }

    #[test]
    fn test_get_path_walks_fields_and_indices() {
        let team = Entity::new("Team")
            .with_field("members", vec![person("a", 1), person("b", 2)])
            .with_field("name", "core");

        let steps = vec![
            PathStep::field("members"),
            PathStep::index(1),
            PathStep::field("name"),
        ];
        assert_eq!(team.get_path(&steps).unwrap().as_str(), Some("b"));
    }

    #[test]
    fn test_get_path_errors() {
        let e = person("a", 1);
        assert!(matches!(
            e.get_path(&[PathStep::field("missing")]),
            Err(Error::PathError { .. })
        ));
        assert!(matches!(
            e.get_path(&[PathStep::index(0)]),
            Err(Error::PathError { .. })
        ));
        assert!(matches!(e.get_path(&[]), Err(Error::PathError { .. })));
    }

    #[test]
    fn test_borrow_field_from_records_provenance() {
        let src = person("alice", 30);
        let mut dst = Entity::new("Greeting");
        dst.borrow_field_from(&src, "name", "addressee").unwrap();

        assert_eq!(
            dst.get_field("addressee").unwrap().as_str(),
            Some("alice")
        );
        assert_eq!(
            dst.meta().attribute_source.get("addressee"),
            Some(&SourceRef::Version(src.version_id()))
        );
    }

    #[test]
    fn test_borrow_field_from_missing_field() {
        let src = person("a", 1);
        let mut dst = Entity::new("Greeting");
        assert!(dst.borrow_field_from(&src, "nope", "x").is_err());
    }

    #[test]
    fn test_stamp_execution_keeps_existing_sources() {
        let src = person("a", 1);
        let mut out = Entity::new("Greeting").with_field("text", "hi");
        out.borrow_field_from(&src, "name", "addressee").unwrap();

        let exec_id = ExecutionId::new();
        let exec_version = VersionId::new();
        out.stamp_execution("greet", exec_id, exec_version);

        assert_eq!(out.meta().derived_from_function.as_deref(), Some("greet"));
        assert_eq!(out.meta().derived_from_execution_id, Some(exec_id));
        // borrowed field keeps its original source
        assert_eq!(
            out.meta().attribute_source.get("addressee"),
            Some(&SourceRef::Version(src.version_id()))
        );
        // other fields point at the execution
        assert_eq!(
            out.meta().attribute_source.get("text"),
            Some(&SourceRef::Version(exec_version))
        );
    }

    #[test]
    fn test_visit_mut_reaches_nested_entities() {
        let mut team = Entity::new("Team")
            .with_field("lead", person("a", 1))
            .with_field("members", vec![person("b", 2)]);
        let mut count = 0;
        team.visit_mut(&mut |_| count += 1);
        assert_eq!(count, 3);
    }

    #[test]
    fn test_entity_serde_roundtrip() {
        let team = Entity::new("Team").with_field("lead", person("a", 1));
        let json = serde_json::to_string(&team).unwrap();
        let restored: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(team, restored);
    }
}
