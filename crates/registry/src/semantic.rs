//! Semantic analysis and unpacking of function output
//!
//! After a registered function returns, each produced record is classified
//! against the prepared inputs:
//!
//! - **mutation**: the function returned one of its own (isolated) input
//!   copies, identified by instance; the original's lineage is versioned.
//! - **detachment**: the returned version is one of an input's current or
//!   prior versions, but the instance is new; the record starts a new
//!   lineage as its own root.
//! - **creation**: the default; the record registers as a new root.
//!
//! Multi-value returns are split or wrapped by return pattern: tuples
//! always split into siblings (with `output_index` and symmetric
//! `sibling_output_version_ids`); list, dict and nested returns wrap into
//! a single container record unless registration opted into unpacking;
//! primitives wrap into the output schema's `value` field.

use crate::signature::{
    ReturnPattern, ReturnSpec, SignatureArtifacts, WRAPPED_DICT_FIELD, WRAPPED_LIST_FIELD,
    WRAPPED_VALUE_FIELD,
};
use crate::strategy::PreparedInputs;
use provenant_core::{
    Entity, Error, ExecutionId, Result, SourceRef, Value, VersionId,
};
use provenant_store::EntityStore;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// How an output relates to the invocation's inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticKind {
    /// A brand-new record
    Creation,
    /// An input returned mutated in place
    Mutation,
    /// An input's sub-record returned as an independent record
    Detachment,
}

/// How certain the classification is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Decided on object identity
    High,
    /// Decided on version comparison alone
    Medium,
}

/// Classification of one output record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemanticResult {
    /// The classification
    pub kind: SemanticKind,
    /// How it was decided
    pub confidence: Confidence,
}

impl SemanticResult {
    /// Short tag used in events and execution records
    pub fn tag(&self) -> &'static str {
        match self.kind {
            SemanticKind::Creation => "creation",
            SemanticKind::Mutation => "mutation",
            SemanticKind::Detachment => "detachment",
        }
    }
}

/// Classify one output record against the prepared inputs
///
/// Identity says mutation outright. Failing that, a version the inputs
/// already knew (their own, a prior, or a nested sub-record's) says the
/// function handed back existing state: a registered root is a mutation of
/// that lineage, anything else is a sub-record detaching. Version-based
/// decisions carry medium confidence.
pub fn classify_output(
    store: &EntityStore,
    output: &Entity,
    prepared: &PreparedInputs,
) -> SemanticResult {
    if let Some(caller) = prepared.identity_map.get(&output.instance_id()) {
        // A mutation only makes sense against a lineage the store knows;
        // mutating a record that was never registered produces new state.
        let kind = if store.contains_version(caller.version_id) {
            SemanticKind::Mutation
        } else {
            SemanticKind::Creation
        };
        return SemanticResult {
            kind,
            confidence: Confidence::High,
        };
    }
    let mut input_versions: HashSet<VersionId> = prepared
        .input_version_ids
        .iter()
        .copied()
        .collect();
    for entity in prepared.entities.values().chain(prepared.config.iter()) {
        input_versions.extend(entity.meta().prior_version_ids.iter().copied());
        entity.visit(&mut |e| {
            input_versions.insert(e.version_id());
        });
    }
    if input_versions.contains(&output.version_id()) {
        let kind = if store.stored_graph(output.version_id()).is_ok() {
            SemanticKind::Mutation
        } else {
            SemanticKind::Detachment
        };
        return SemanticResult {
            kind,
            confidence: Confidence::Medium,
        };
    }
    SemanticResult {
        kind: SemanticKind::Creation,
        confidence: Confidence::High,
    }
}

/// One registered output with its classification
#[derive(Debug)]
pub struct ProcessedOutput {
    /// The output record, as registered or versioned
    pub record: Entity,
    /// Its semantic classification
    pub semantic: SemanticResult,
}

/// Unpack a return value into records per the declared pattern
pub fn unpack(
    function: &str,
    returns: &ReturnSpec,
    artifacts: &SignatureArtifacts,
    value: Value,
) -> Result<Vec<Entity>> {
    match returns.pattern {
        ReturnPattern::SingleRecord => {
            let entity = expect_entity(function, value)?;
            check_output_type(function, returns, &entity)?;
            Ok(vec![entity])
        }
        ReturnPattern::TupleRecords(arity) => {
            let items = match value {
                Value::Tuple(items) => items,
                other => return Err(not_a(function, "tuple of entities", &other)),
            };
            if items.len() != arity {
                return Err(Error::TypeMismatch {
                    name: function.to_string(),
                    expected: format!("tuple of {} entities", arity),
                    actual: format!("tuple of {}", items.len()),
                });
            }
            let mut outputs = Vec::with_capacity(items.len());
            for item in items {
                outputs.push(expect_entity(function, item)?);
            }
            link_siblings(&mut outputs);
            Ok(outputs)
        }
        ReturnPattern::ListRecords => {
            let items = match value {
                Value::List(items) => items,
                other => return Err(not_a(function, "list of entities", &other)),
            };
            if artifacts.supports_unpacking {
                let mut outputs = Vec::with_capacity(items.len());
                for item in items {
                    outputs.push(expect_entity(function, item)?);
                }
                link_siblings(&mut outputs);
                Ok(outputs)
            } else {
                wrap(artifacts, WRAPPED_LIST_FIELD, Value::List(items))
            }
        }
        ReturnPattern::DictRecords => {
            let entries = match value {
                Value::Map(entries) => entries,
                other => return Err(not_a(function, "map of entities", &other)),
            };
            if artifacts.supports_unpacking {
                let mut outputs = Vec::with_capacity(entries.len());
                for (_, item) in entries {
                    outputs.push(expect_entity(function, item)?);
                }
                link_siblings(&mut outputs);
                Ok(outputs)
            } else {
                wrap(artifacts, WRAPPED_DICT_FIELD, Value::Map(entries))
            }
        }
        ReturnPattern::Nested => {
            if artifacts.supports_unpacking {
                let mut outputs = Vec::new();
                flatten_entities(value, &mut outputs);
                if outputs.is_empty() {
                    return Err(Error::TypeMismatch {
                        name: function.to_string(),
                        expected: "nested containers of entities".to_string(),
                        actual: "no entities".to_string(),
                    });
                }
                link_siblings(&mut outputs);
                Ok(outputs)
            } else {
                wrap(artifacts, WRAPPED_VALUE_FIELD, value)
            }
        }
        ReturnPattern::Primitive => {
            if value.contains_entities() {
                return Err(not_a(function, "primitive", &value));
            }
            wrap(artifacts, WRAPPED_VALUE_FIELD, value)
        }
    }
}

/// Register (or version) every output and stamp its provenance
///
/// Creation outputs register as new roots; mutation outputs version their
/// original lineage; detachment outputs begin a fresh lineage. Fields that
/// borrowed values through addresses keep their borrow source; fields a
/// mutation left untouched keep deriving from the previous version; every
/// other field derives from the execution record.
#[allow(clippy::too_many_arguments)]
pub fn process_outputs(
    store: &EntityStore,
    function: &str,
    execution_id: ExecutionId,
    execution_version: VersionId,
    prepared: &PreparedInputs,
    mut outputs: Vec<Entity>,
) -> Result<Vec<ProcessedOutput>> {
    let mut processed = Vec::with_capacity(outputs.len());
    for output in outputs.iter_mut() {
        let semantic = classify_output(store, output, prepared);
        debug!(
            function,
            output = %output.version_id(),
            semantic = semantic.tag(),
            "classified output"
        );

        for (param, source) in &prepared.borrowed_sources {
            if output.get_field(param).is_some() {
                output.set_attribute_source(param.clone(), SourceRef::Version(*source));
            }
        }

        match semantic.kind {
            SemanticKind::Mutation => {
                stamp_mutation(
                    store,
                    function,
                    execution_id,
                    execution_version,
                    output,
                )?;
                store.version(output, false)?;
            }
            SemanticKind::Detachment => {
                let meta = output.meta_mut();
                meta.lineage_id = provenant_core::LineageId::new();
                output.stamp_execution(function, execution_id, execution_version);
                let vid = output.version_id();
                let instance = output.instance_id();
                output.set_root(vid, instance);
                store.register_root(output)?;
            }
            SemanticKind::Creation => {
                output.stamp_execution(function, execution_id, execution_version);
                store.register_root(output)?;
            }
        }
        processed.push(ProcessedOutput {
            record: output.clone(),
            semantic,
        });
    }
    Ok(processed)
}

/// Point only the fields a mutation actually changed at the execution
fn stamp_mutation(
    store: &EntityStore,
    function: &str,
    execution_id: ExecutionId,
    execution_version: VersionId,
    output: &mut Entity,
) -> Result<()> {
    let original = store.get_record(output.version_id())?;
    let changed: Vec<String> = output
        .fields()
        .filter(|(name, value)| original.get_field(name) != Some(value))
        .map(|(name, _)| name.to_string())
        .collect();
    let meta = output.meta_mut();
    meta.derived_from_function = Some(function.to_string());
    meta.derived_from_execution_id = Some(execution_id);
    for field in changed {
        meta.attribute_source
            .insert(field, SourceRef::Version(execution_version));
    }
    Ok(())
}

/// Stamp sibling linkage across multi-value outputs
fn link_siblings(outputs: &mut [Entity]) {
    if outputs.len() < 2 {
        if let Some(only) = outputs.first_mut() {
            only.meta_mut().output_index = Some(0);
        }
        return;
    }
    let versions: Vec<VersionId> = outputs.iter().map(|e| e.version_id()).collect();
    for (i, output) in outputs.iter_mut().enumerate() {
        let meta = output.meta_mut();
        meta.output_index = Some(i);
        meta.sibling_output_version_ids = versions
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, v)| *v)
            .collect();
    }
}

fn wrap(artifacts: &SignatureArtifacts, field: &str, value: Value) -> Result<Vec<Entity>> {
    let fields: BTreeMap<String, Value> = [(field.to_string(), value)].into_iter().collect();
    Ok(vec![artifacts.output_schema.instantiate(fields)?])
}

fn flatten_entities(value: Value, out: &mut Vec<Entity>) {
    match value {
        Value::Entity(e) => out.push(*e),
        Value::List(items) | Value::Tuple(items) => {
            for item in items {
                flatten_entities(item, out);
            }
        }
        Value::Map(entries) => {
            for (_, item) in entries {
                flatten_entities(item, out);
            }
        }
        _ => {}
    }
}

fn expect_entity(function: &str, value: Value) -> Result<Entity> {
    match value {
        Value::Entity(e) => Ok(*e),
        other => Err(not_a(function, "entity", &other)),
    }
}

fn not_a(function: &str, expected: &str, actual: &Value) -> Error {
    Error::TypeMismatch {
        name: function.to_string(),
        expected: expected.to_string(),
        actual: actual.kind().to_string(),
    }
}

fn check_output_type(function: &str, returns: &ReturnSpec, entity: &Entity) -> Result<()> {
    if let Some(required) = &returns.entity_type {
        if entity.type_name() != required {
            return Err(Error::TypeMismatch {
                name: function.to_string(),
                expected: required.clone(),
                actual: entity.type_name().to_string(),
            });
        }
    }
    Ok(())
}
