//! Entity schemas
//!
//! Dynamic class generation from the source model is replaced by a typed
//! schema declared once at registration: an `EntitySchema` names the fields
//! an entity type exposes and the kind each field must satisfy. The
//! registry synthesises input/output schemas from function signatures and
//! instantiates entities against them, so declared-field access is checked
//! rather than assumed.

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::value::{Value, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved type name for configuration records
///
/// A config record is an ordinary entity whose payload is a bag of
/// primitives, materialised by the registry when a function declares a
/// config parameter.
pub const CONFIG_TYPE_NAME: &str = "Config";

/// One declared field of an entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name
    pub name: String,
    /// Kind the field's value must satisfy
    pub kind: ValueKind,
}

impl FieldSchema {
    /// Create a field schema
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        FieldSchema {
            name: name.into(),
            kind,
        }
    }
}

/// Declared shape of an entity type
///
/// Synthesised once per registered function (input and output classes) and
/// cached in the registry's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Entity type name
    pub type_name: String,
    /// Declared fields in declaration order
    pub fields: Vec<FieldSchema>,
}

impl EntitySchema {
    /// Create a schema with no fields
    pub fn new(type_name: impl Into<String>) -> Self {
        EntitySchema {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a declared field, consuming and returning the schema
    pub fn with_field(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.fields.push(FieldSchema::new(name, kind));
        self
    }

    /// Look up a declared field
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate a payload against this schema
    ///
    /// Every declared field must be present (or `Null`) and satisfy its
    /// kind. Extra fields are rejected.
    pub fn check(&self, fields: &BTreeMap<String, Value>) -> Result<()> {
        for declared in &self.fields {
            let value = fields.get(&declared.name).unwrap_or(&Value::Null);
            if !declared.kind.accepts(value) {
                return Err(Error::TypeMismatch {
                    name: declared.name.clone(),
                    expected: declared.kind.to_string(),
                    actual: value.kind().to_string(),
                });
            }
        }
        for name in fields.keys() {
            if self.field(name).is_none() {
                return Err(Error::TypeMismatch {
                    name: name.clone(),
                    expected: "declared field".to_string(),
                    actual: "undeclared field".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Instantiate an entity of this schema's type from a payload
    ///
    /// Validates the payload first; missing declared fields are filled with
    /// `Null` so declared-field access always succeeds.
    pub fn instantiate(&self, mut fields: BTreeMap<String, Value>) -> Result<Entity> {
        self.check(&fields)?;
        for declared in &self.fields {
            fields
                .entry(declared.name.clone())
                .or_insert(Value::Null);
        }
        Ok(Entity::with_fields(self.type_name.clone(), fields))
    }
}
