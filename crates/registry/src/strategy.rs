//! Input pattern classification and preparation
//!
//! Given a call's kwargs, choose an execution strategy, then materialise
//! the isolated inputs the function will actually see:
//!
//! - every entity argument is deep-copied with fresh instance ids, so
//!   mutation inside the function cannot touch caller state;
//! - every address argument is resolved and folded into the composed input
//!   record, with the borrow source recorded in `attribute_source`;
//! - leftover primitive kwargs collapse into a Config record when the
//!   function declares one;
//! - the composed input record (the invocation's single anchor) is
//!   instantiated from the function's input schema and registered. Entity
//!   parameters appear in it as address strings, so no version is ever
//!   indexed under two roots.
//!
//! The preparer also returns the object-identity map (prepared instance to
//! caller identity) that the semantic analyser uses for mutation
//! detection.

use crate::kwargs::Kwargs;
use crate::signature::{FunctionSignature, ParamKind, SignatureArtifacts};
use provenant_core::{
    Entity, Error, InstanceId, Result, SourceRef, Value, VersionId, CONFIG_TYPE_NAME,
};
use provenant_store::{address, classify_kwargs, ArgKind, EntityStore, KwargsPattern};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

/// How an invocation's inputs are prepared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Function takes zero parameters
    NoInputs,
    /// Exactly one entity parameter, nothing else to fold in
    SingleRecordDirect,
    /// One entity parameter plus primitives collapsed into a Config record
    SingleRecordWithConfig,
    /// More than one entity parameter
    MultiRecordComposite,
    /// Addresses present, no direct entities
    PureBorrowing,
    /// No entities at all
    PrimitivesOnly,
    /// Entities and addresses both present
    Mixed,
}

impl ExecutionStrategy {
    /// Short tag used in events and execution records
    pub fn tag(&self) -> &'static str {
        match self {
            ExecutionStrategy::NoInputs => "no_inputs",
            ExecutionStrategy::SingleRecordDirect => "single_record_direct",
            ExecutionStrategy::SingleRecordWithConfig => "single_record_with_config",
            ExecutionStrategy::MultiRecordComposite => "multi_record_composite",
            ExecutionStrategy::PureBorrowing => "pure_borrowing",
            ExecutionStrategy::PrimitivesOnly => "primitives_only",
            ExecutionStrategy::Mixed => "mixed",
        }
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Caller-side identity of a prepared record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerRecord {
    /// Version of the caller's record at preparation time
    pub version_id: VersionId,
    /// Instance of the caller's record, when one existed in memory
    pub instance_id: InstanceId,
}

/// Everything the preparer hands to the invoker
pub struct PreparedInputs {
    /// Chosen strategy
    pub strategy: ExecutionStrategy,
    /// Classified kwargs pattern
    pub pattern: KwargsPattern,
    /// The registered composed input record
    pub input_record: Entity,
    /// Prepared, isolated entity arguments by parameter name
    pub entities: BTreeMap<String, Entity>,
    /// Resolved primitive arguments by parameter name
    pub values: BTreeMap<String, Value>,
    /// The registered Config record, when one was materialised
    pub config: Option<Entity>,
    /// Prepared instance -> caller identity, for mutation detection
    pub identity_map: HashMap<InstanceId, CallerRecord>,
    /// Borrow provenance: parameter name -> source version
    pub borrowed_sources: BTreeMap<String, VersionId>,
    /// Versions of the caller records this invocation consumed
    pub input_version_ids: Vec<VersionId>,
    /// Version of the Config record, when one was materialised
    pub config_version_id: Option<VersionId>,
}

/// What a registered function's body receives
///
/// Prepared entities are owned by the input and handed out by value;
/// everything the function mutates is its own isolated copy.
pub struct ExecutionInput {
    record: Entity,
    entities: BTreeMap<String, Entity>,
    values: BTreeMap<String, Value>,
    config: Option<Entity>,
}

impl ExecutionInput {
    /// The prepared entities are cloned in, not moved: the preparer's
    /// copies stay behind for the semantic analyser's version comparison.
    pub(crate) fn new(prepared: &PreparedInputs) -> Self {
        ExecutionInput {
            record: prepared.input_record.clone(),
            entities: prepared.entities.clone(),
            values: prepared.values.clone(),
            config: prepared.config.clone(),
        }
    }

    /// The composed input record anchoring this invocation
    pub fn record(&self) -> &Entity {
        &self.record
    }

    /// Borrow a prepared entity argument
    pub fn entity(&self, name: &str) -> Result<&Entity> {
        self.entities.get(name).ok_or_else(|| Error::TypeMismatch {
            name: name.to_string(),
            expected: "entity argument".to_string(),
            actual: "absent".to_string(),
        })
    }

    /// Take ownership of a prepared entity argument
    pub fn take_entity(&mut self, name: &str) -> Result<Entity> {
        self.entities.remove(name).ok_or_else(|| Error::TypeMismatch {
            name: name.to_string(),
            expected: "entity argument".to_string(),
            actual: "absent".to_string(),
        })
    }

    /// Borrow a primitive argument
    pub fn value(&self, name: &str) -> Result<&Value> {
        self.values.get(name).ok_or_else(|| Error::TypeMismatch {
            name: name.to_string(),
            expected: "primitive argument".to_string(),
            actual: "absent".to_string(),
        })
    }

    /// An integer argument
    pub fn int(&self, name: &str) -> Result<i64> {
        self.value(name)?.as_i64().ok_or_else(|| Error::TypeMismatch {
            name: name.to_string(),
            expected: "int".to_string(),
            actual: "other".to_string(),
        })
    }

    /// A string argument
    pub fn str(&self, name: &str) -> Result<&str> {
        self.value(name)?.as_str().ok_or_else(|| Error::TypeMismatch {
            name: name.to_string(),
            expected: "string".to_string(),
            actual: "other".to_string(),
        })
    }

    /// The Config record, when the function declared one
    pub fn config(&self) -> Option<&Entity> {
        self.config.as_ref()
    }
}

/// Choose the execution strategy for a classified call
pub fn choose_strategy(
    signature: &FunctionSignature,
    pattern: KwargsPattern,
) -> ExecutionStrategy {
    if signature.params.is_empty() {
        return ExecutionStrategy::NoInputs;
    }
    match pattern {
        KwargsPattern::Mixed => ExecutionStrategy::Mixed,
        KwargsPattern::Borrowing => ExecutionStrategy::PureBorrowing,
        _ => {
            let entity_params = signature.entity_params().len();
            if entity_params == 0 {
                ExecutionStrategy::PrimitivesOnly
            } else if entity_params > 1 {
                ExecutionStrategy::MultiRecordComposite
            } else if signature.config_param().is_some() {
                ExecutionStrategy::SingleRecordWithConfig
            } else {
                ExecutionStrategy::SingleRecordDirect
            }
        }
    }
}

/// Classify, isolate, resolve and compose one invocation's inputs
pub fn prepare(
    store: &EntityStore,
    name: &str,
    signature: &FunctionSignature,
    artifacts: &SignatureArtifacts,
    kwargs: Kwargs,
) -> Result<PreparedInputs> {
    let (pattern, kinds) = classify_kwargs(kwargs.as_map());
    let strategy = choose_strategy(signature, pattern);
    debug!(function = name, strategy = %strategy, "preparing inputs");

    let mut kwargs = kwargs.into_map();
    let mut entities = BTreeMap::new();
    let mut values = BTreeMap::new();
    let mut identity_map = HashMap::new();
    let mut borrowed_sources = BTreeMap::new();
    let mut input_version_ids = Vec::new();
    let mut input_fields: BTreeMap<String, Value> = BTreeMap::new();

    for param in &signature.params {
        match &param.kind {
            ParamKind::Entity { type_name } => {
                let value = kwargs.remove(&param.name).ok_or_else(|| missing(&param.name))?;
                let (prepared, caller) = isolate_entity(store, &param.name, value)?;
                if prepared.type_name() != type_name {
                    return Err(Error::TypeMismatch {
                        name: param.name.clone(),
                        expected: type_name.clone(),
                        actual: prepared.type_name().to_string(),
                    });
                }
                input_version_ids.push(caller.version_id);
                identity_map.insert(prepared.instance_id(), caller);
                input_fields.insert(
                    param.name.clone(),
                    Value::String(address::format_address(prepared.version_id(), &[])),
                );
                entities.insert(param.name.clone(), prepared);
            }
            ParamKind::Primitive(kind) => {
                let raw = kwargs.remove(&param.name).ok_or_else(|| missing(&param.name))?;
                let resolved = match kinds.get(&param.name) {
                    Some(ArgKind::Address) => {
                        let addr = raw.as_str().unwrap_or_default().to_string();
                        let (source, _) = address::parse(&addr)?;
                        borrowed_sources.insert(param.name.clone(), source);
                        address::resolve(store, &addr)?
                    }
                    _ => raw,
                };
                if !kind.accepts(&resolved) {
                    return Err(Error::TypeMismatch {
                        name: param.name.clone(),
                        expected: kind.to_string(),
                        actual: resolved.kind().to_string(),
                    });
                }
                input_fields.insert(param.name.clone(), resolved.clone());
                values.insert(param.name.clone(), resolved);
            }
            ParamKind::Config => {
                // Filled from leftover kwargs after every declared
                // parameter has claimed its own.
            }
        }
    }

    // Whatever remains belongs to the Config record, when one is declared.
    let mut config = None;
    let mut config_version_id = None;
    if let Some(config_param) = signature.config_param() {
        let mut config_entity = Entity::new(CONFIG_TYPE_NAME);
        for (key, value) in std::mem::take(&mut kwargs) {
            if !value.is_primitive() {
                return Err(Error::TypeMismatch {
                    name: key,
                    expected: "primitive config value".to_string(),
                    actual: value.kind().to_string(),
                });
            }
            config_entity.set_field(key, value);
        }
        store.register_root(&mut config_entity)?;
        config_version_id = Some(config_entity.version_id());
        input_fields.insert(
            config_param.name.clone(),
            Value::String(address::format_address(config_entity.version_id(), &[])),
        );
        entities.insert(config_param.name.clone(), config_entity.fresh_copy());
        config = Some(config_entity);
    } else if let Some(unexpected) = kwargs.keys().next() {
        return Err(Error::TypeMismatch {
            name: unexpected.clone(),
            expected: "declared parameter".to_string(),
            actual: "undeclared argument".to_string(),
        });
    }

    // Compose and register the invocation's anchor record.
    let mut input_record = artifacts.input_schema.instantiate(input_fields)?;
    for (param, source) in &borrowed_sources {
        input_record.set_attribute_source(param.clone(), SourceRef::Version(*source));
    }
    for param in signature.entity_params() {
        if let Some(caller_vid) = entities
            .get(&param.name)
            .map(|prepared| prepared.version_id())
        {
            input_record.set_attribute_source(param.name.clone(), SourceRef::Version(caller_vid));
        }
    }
    store.register_root(&mut input_record)?;

    Ok(PreparedInputs {
        strategy,
        pattern,
        input_record,
        entities,
        values,
        config,
        identity_map,
        borrowed_sources,
        input_version_ids,
        config_version_id,
    })
}

/// Deep-copy an entity argument (or resolve an address to one)
fn isolate_entity(
    store: &EntityStore,
    param: &str,
    value: Value,
) -> Result<(Entity, CallerRecord)> {
    match value {
        Value::Entity(caller) => {
            let caller_identity = CallerRecord {
                version_id: caller.version_id(),
                instance_id: caller.instance_id(),
            };
            Ok((caller.fresh_copy(), caller_identity))
        }
        Value::String(ref s) if address::is_address(s) => {
            let record = address::resolve_record(store, s)?;
            let caller_identity = CallerRecord {
                version_id: record.version_id(),
                instance_id: record.instance_id(),
            };
            Ok((record, caller_identity))
        }
        other => Err(Error::TypeMismatch {
            name: param.to_string(),
            expected: "entity or address".to_string(),
            actual: other.kind().to_string(),
        }),
    }
}

fn missing(param: &str) -> Error {
    Error::TypeMismatch {
        name: param.to_string(),
        expected: "argument".to_string(),
        actual: "missing".to_string(),
    }
}
