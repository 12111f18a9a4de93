//! Function signatures and the signature analyser
//!
//! Rust has no runtime annotation reflection, so a function's signature is
//! declared once at registration. The analyser validates the declaration
//! and synthesises the cached artifacts the rest of the pipeline works
//! from:
//!
//! - the **input schema**: one field per parameter. Primitive parameters
//!   are typed as declared; entity and config parameters appear in the
//!   composed input record as address strings (the record itself never
//!   embeds another graph's entities), so their schema kind is `String`.
//! - the **output schema**: wraps container and primitive returns; a
//!   primitive return becomes a record with a single `value` field.
//! - the **unpacking flag**: tuples always unpack; list, dict and nested
//!   returns unpack only when registration opted in.

use provenant_core::{EntitySchema, Error, Result, ValueKind};

/// What a declared parameter accepts
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    /// An entity of the given type
    Entity {
        /// Required entity type name
        type_name: String,
    },
    /// A configuration record collapsed from leftover primitive kwargs
    Config,
    /// A primitive value of the given kind
    Primitive(ValueKind),
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    /// Parameter name
    pub name: String,
    /// What the parameter accepts
    pub kind: ParamKind,
}

impl ParamSpec {
    /// Declare an entity parameter
    pub fn entity(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        ParamSpec {
            name: name.into(),
            kind: ParamKind::Entity {
                type_name: type_name.into(),
            },
        }
    }

    /// Declare a configuration parameter
    pub fn config(name: impl Into<String>) -> Self {
        ParamSpec {
            name: name.into(),
            kind: ParamKind::Config,
        }
    }

    /// Declare a primitive parameter
    pub fn primitive(name: impl Into<String>, kind: ValueKind) -> Self {
        ParamSpec {
            name: name.into(),
            kind: ParamKind::Primitive(kind),
        }
    }

    /// Check whether this is an entity parameter
    pub fn is_entity(&self) -> bool {
        matches!(self.kind, ParamKind::Entity { .. })
    }

    /// Check whether this is a configuration parameter
    pub fn is_config(&self) -> bool {
        matches!(self.kind, ParamKind::Config)
    }
}

/// The closed set of return shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnPattern {
    /// One entity
    SingleRecord,
    /// A fixed-arity tuple of entities
    TupleRecords(usize),
    /// A homogeneous list of entities
    ListRecords,
    /// A map of name to entity
    DictRecords,
    /// Containers of containers of entities
    Nested,
    /// A non-entity value
    Primitive,
}

/// Declared return type of a function
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnSpec {
    /// Shape of the return value
    pub pattern: ReturnPattern,
    /// Entity type the return produces, when uniform and declared
    pub entity_type: Option<String>,
    /// Kind of a primitive return
    pub primitive_kind: Option<ValueKind>,
}

impl ReturnSpec {
    /// One entity of the given type
    pub fn entity(type_name: impl Into<String>) -> Self {
        ReturnSpec {
            pattern: ReturnPattern::SingleRecord,
            entity_type: Some(type_name.into()),
            primitive_kind: None,
        }
    }

    /// A tuple of `arity` entities
    pub fn tuple(arity: usize) -> Self {
        ReturnSpec {
            pattern: ReturnPattern::TupleRecords(arity),
            entity_type: None,
            primitive_kind: None,
        }
    }

    /// A homogeneous list of entities
    pub fn list() -> Self {
        ReturnSpec {
            pattern: ReturnPattern::ListRecords,
            entity_type: None,
            primitive_kind: None,
        }
    }

    /// A map of name to entity
    pub fn dict() -> Self {
        ReturnSpec {
            pattern: ReturnPattern::DictRecords,
            entity_type: None,
            primitive_kind: None,
        }
    }

    /// Containers of containers of entities
    pub fn nested() -> Self {
        ReturnSpec {
            pattern: ReturnPattern::Nested,
            entity_type: None,
            primitive_kind: None,
        }
    }

    /// A primitive value of the given kind
    pub fn primitive(kind: ValueKind) -> Self {
        ReturnSpec {
            pattern: ReturnPattern::Primitive,
            entity_type: None,
            primitive_kind: Some(kind),
        }
    }

    /// Constrain the entity type of the elements, consuming the spec
    pub fn of_type(mut self, type_name: impl Into<String>) -> Self {
        self.entity_type = Some(type_name.into());
        self
    }
}

/// A function's declared parameters and return
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    /// Declared parameters in order
    pub params: Vec<ParamSpec>,
    /// Declared return
    pub returns: ReturnSpec,
}

impl FunctionSignature {
    /// The entity parameters, in declaration order
    pub fn entity_params(&self) -> Vec<&ParamSpec> {
        self.params.iter().filter(|p| p.is_entity()).collect()
    }

    /// The configuration parameter, if declared
    pub fn config_param(&self) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.is_config())
    }

    /// Look up a parameter by name
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// Artifacts the analyser synthesises once per registered function
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureArtifacts {
    /// Schema of the composed input record
    pub input_schema: EntitySchema,
    /// Schema wrapping container and primitive returns
    pub output_schema: EntitySchema,
    /// Whether outputs split into sibling records
    pub supports_unpacking: bool,
}

/// Field name wrapping a list return
pub const WRAPPED_LIST_FIELD: &str = "items";
/// Field name wrapping a dict return
pub const WRAPPED_DICT_FIELD: &str = "entries";
/// Field name wrapping a nested or primitive return
pub const WRAPPED_VALUE_FIELD: &str = "value";

/// Validate a signature and synthesise its cached artifacts
pub fn analyse(
    name: &str,
    signature: &FunctionSignature,
    force_unpack: bool,
) -> Result<SignatureArtifacts> {
    validate(name, signature)?;

    let mut input_schema = EntitySchema::new(format!("{}Input", pascal_case(name)));
    for param in &signature.params {
        let kind = match &param.kind {
            // Entity and config parameters are referenced by address from
            // the composed input record.
            ParamKind::Entity { .. } | ParamKind::Config => ValueKind::String,
            ParamKind::Primitive(kind) => kind.clone(),
        };
        input_schema = input_schema.with_field(&param.name, kind);
    }

    let output_type = signature
        .returns
        .entity_type
        .clone()
        .unwrap_or_else(|| format!("{}Output", pascal_case(name)));
    let output_schema = match signature.returns.pattern {
        ReturnPattern::SingleRecord | ReturnPattern::TupleRecords(_) => {
            EntitySchema::new(output_type)
        }
        ReturnPattern::ListRecords => EntitySchema::new(format!("{}Output", pascal_case(name)))
            .with_field(WRAPPED_LIST_FIELD, ValueKind::List),
        ReturnPattern::DictRecords => EntitySchema::new(format!("{}Output", pascal_case(name)))
            .with_field(WRAPPED_DICT_FIELD, ValueKind::Map),
        ReturnPattern::Nested => EntitySchema::new(format!("{}Output", pascal_case(name)))
            .with_field(WRAPPED_VALUE_FIELD, ValueKind::Any),
        ReturnPattern::Primitive => EntitySchema::new(format!("{}Output", pascal_case(name)))
            .with_field(
                WRAPPED_VALUE_FIELD,
                signature
                    .returns
                    .primitive_kind
                    .clone()
                    .unwrap_or(ValueKind::Any),
            ),
    };

    let supports_unpacking = match signature.returns.pattern {
        ReturnPattern::TupleRecords(_) => true,
        ReturnPattern::ListRecords | ReturnPattern::DictRecords | ReturnPattern::Nested => {
            force_unpack
        }
        _ => false,
    };

    Ok(SignatureArtifacts {
        input_schema,
        output_schema,
        supports_unpacking,
    })
}

fn validate(name: &str, signature: &FunctionSignature) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvariantViolation(
            "function name must not be empty".to_string(),
        ));
    }
    let mut seen = std::collections::HashSet::new();
    let mut configs = 0;
    for param in &signature.params {
        if param.name.is_empty() {
            return Err(Error::InvariantViolation(format!(
                "function `{}` declares an unnamed parameter",
                name
            )));
        }
        if !seen.insert(&param.name) {
            return Err(Error::InvariantViolation(format!(
                "function `{}` declares parameter `{}` twice",
                name, param.name
            )));
        }
        if param.is_config() {
            configs += 1;
        }
    }
    if configs > 1 {
        return Err(Error::InvariantViolation(format!(
            "function `{}` declares more than one config parameter",
            name
        )));
    }
    if let ReturnPattern::TupleRecords(0) = signature.returns.pattern {
        return Err(Error::InvariantViolation(format!(
            "function `{}` declares an empty tuple return",
            name
        )));
    }
    Ok(())
}

/// `fetch_user` -> `FetchUser`
fn pascal_case(name: &str) -> String {
    name.split(|c: char| c == '_' || c == '-' || c == '.')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
