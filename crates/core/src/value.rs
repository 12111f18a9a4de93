//! Value types for entity payloads
//!
//! This module defines:
//! - Value: unified enum for every payload field of an entity
//! - ValueKind: the closed set of value categories, used by schemas
//!
//! A `Value` may contain nested entities (directly, or inside lists, tuples
//! and maps); those occurrences are what the graph builder turns into
//! structural edges. Set-valued containment from other object models is
//! expressed as `List`; owned values carry no hashable entity set.

use crate::entity::Entity;
use crate::types::PathStep;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Unified value type for entity payload fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    I64(i64),
    /// 64-bit floating point
    F64(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Ordered, growable sequence of values
    List(Vec<Value>),
    /// Fixed-arity sequence of values
    Tuple(Vec<Value>),
    /// Map of string keys to values
    Map(BTreeMap<String, Value>),
    /// A nested entity
    Entity(Box<Entity>),
}

/// The closed set of value categories
///
/// Schemas describe fields with a ValueKind; the registry uses kinds to
/// check that call arguments satisfy a function's declared parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    /// Any value is accepted
    Any,
    /// Boolean
    Bool,
    /// 64-bit signed integer
    Int,
    /// 64-bit floating point
    Float,
    /// UTF-8 string
    String,
    /// Raw bytes
    Bytes,
    /// List of values
    List,
    /// Tuple of values
    Tuple,
    /// String-keyed map
    Map,
    /// Nested entity, optionally constrained to a type name
    Entity {
        /// Required entity type name, or None for any entity
        type_name: Option<String>,
    },
}

impl Value {
    /// Get the kind of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Any,
            Value::Bool(_) => ValueKind::Bool,
            Value::I64(_) => ValueKind::Int,
            Value::F64(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::List(_) => ValueKind::List,
            Value::Tuple(_) => ValueKind::Tuple,
            Value::Map(_) => ValueKind::Map,
            Value::Entity(e) => ValueKind::Entity {
                type_name: Some(e.type_name().to_string()),
            },
        }
    }

    /// Check if this value is (or contains nothing but) a primitive
    ///
    /// Entities are not primitives; containers are primitive iff every
    /// element is.
    pub fn is_primitive(&self) -> bool {
        match self {
            Value::Entity(_) => false,
            Value::List(xs) | Value::Tuple(xs) => xs.iter().all(Value::is_primitive),
            Value::Map(m) => m.values().all(Value::is_primitive),
            _ => true,
        }
    }

    /// Check if this value is a nested entity
    pub fn is_entity(&self) -> bool {
        matches!(self, Value::Entity(_))
    }

    /// Check if any entity occurs anywhere inside this value
    pub fn contains_entities(&self) -> bool {
        match self {
            Value::Entity(_) => true,
            Value::List(xs) | Value::Tuple(xs) => xs.iter().any(Value::contains_entities),
            Value::Map(m) => m.values().any(Value::contains_entities),
            _ => false,
        }
    }

    /// Borrow the nested entity, if this value is one
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Value::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Mutably borrow the nested entity, if this value is one
    pub fn as_entity_mut(&mut self) -> Option<&mut Entity> {
        match self {
            Value::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the string, if this value is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the integer, if this value is one
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the float, if this value is one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the boolean, if this value is one
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Walk one navigation step into this value
    ///
    /// `Field` steps enter entity fields and map keys; `Index` steps enter
    /// lists and tuples. Returns `None` when the step cannot be walked.
    pub fn step(&self, step: &PathStep) -> Option<&Value> {
        match (self, step) {
            (Value::Entity(e), PathStep::Field(name)) => e.get_field(name),
            (Value::Map(m), PathStep::Field(key)) => m.get(key),
            (Value::List(xs), PathStep::Index(i)) | (Value::Tuple(xs), PathStep::Index(i)) => {
                xs.get(*i)
            }
            _ => None,
        }
    }
}

impl ValueKind {
    /// Check whether a value satisfies this kind
    ///
    /// `Null` satisfies every kind (absent optional values); `Any` accepts
    /// every value. An `Entity` kind with a type name requires an exact
    /// type-name match.
    pub fn accepts(&self, value: &Value) -> bool {
        if matches!(value, Value::Null) || matches!(self, ValueKind::Any) {
            return true;
        }
        match (self, value) {
            (ValueKind::Bool, Value::Bool(_)) => true,
            (ValueKind::Int, Value::I64(_)) => true,
            (ValueKind::Float, Value::F64(_)) => true,
            (ValueKind::String, Value::String(_)) => true,
            (ValueKind::Bytes, Value::Bytes(_)) => true,
            (ValueKind::List, Value::List(_)) => true,
            (ValueKind::Tuple, Value::Tuple(_)) => true,
            (ValueKind::Map, Value::Map(_)) => true,
            (ValueKind::Entity { type_name }, Value::Entity(e)) => match type_name {
                Some(required) => e.type_name() == required,
                None => true,
            },
            _ => false,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Any => write!(f, "any"),
            ValueKind::Bool => write!(f, "bool"),
            ValueKind::Int => write!(f, "int"),
            ValueKind::Float => write!(f, "float"),
            ValueKind::String => write!(f, "string"),
            ValueKind::Bytes => write!(f, "bytes"),
            ValueKind::List => write!(f, "list"),
            ValueKind::Tuple => write!(f, "tuple"),
            ValueKind::Map => write!(f, "map"),
            ValueKind::Entity { type_name: Some(t) } => write!(f, "entity<{}>", t),
            ValueKind::Entity { type_name: None } => write!(f, "entity"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::I64(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::I64(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::F64(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Entity> for Value {
    fn from(e: Entity) -> Self {
        Value::Entity(Box::new(e))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(xs: Vec<T>) -> Self {
        Value::List(xs.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;

    fn person(name: &str) -> Entity {
        Entity::new("Person").with_field("name", name)
    }

    #[test]
    fn test_value_kinds() {
        assert_eq!(Value::Bool(true).kind(), ValueKind::Bool);
        assert_eq!(Value::I64(1).kind(), ValueKind::Int);
        assert_eq!(Value::from("x").kind(), ValueKind::String);
        assert_eq!(
            Value::from(person("a")).kind(),
            ValueKind::Entity {
                type_name: Some("Person".to_string())
            }
        );
    }

    #[test]
    fn test_is_primitive() {
        assert!(Value::I64(1).is_primitive());
        assert!(Value::List(vec![Value::I64(1), Value::from("x")]).is_primitive());
        assert!(!Value::from(person("a")).is_primitive());
        assert!(!Value::List(vec![Value::from(person("a"))]).is_primitive());
    }

    #[test]
    fn test_contains_entities_nested() {
        let inner = Value::Map(
            [("p".to_string(), Value::from(person("a")))]
                .into_iter()
                .collect(),
        );
        let outer = Value::List(vec![Value::Null, inner]);
        assert!(outer.contains_entities());
        assert!(!Value::List(vec![Value::I64(1)]).contains_entities());
    }

    #[test]
    fn test_step_into_entity_field() {
        let v = Value::from(person("alice"));
        let name = v.step(&PathStep::field("name")).unwrap();
        assert_eq!(name.as_str(), Some("alice"));
    }

    #[test]
    fn test_step_into_list_and_map() {
        let v = Value::List(vec![Value::I64(7)]);
        assert_eq!(v.step(&PathStep::index(0)).unwrap().as_i64(), Some(7));
        assert!(v.step(&PathStep::index(1)).is_none());

        let m = Value::Map([("k".to_string(), Value::Bool(true))].into_iter().collect());
        assert_eq!(m.step(&PathStep::field("k")).unwrap().as_bool(), Some(true));
        assert!(m.step(&PathStep::field("missing")).is_none());
    }

    #[test]
    fn test_kind_accepts() {
        assert!(ValueKind::Int.accepts(&Value::I64(1)));
        assert!(!ValueKind::Int.accepts(&Value::from("x")));
        assert!(ValueKind::Any.accepts(&Value::from("x")));
        assert!(ValueKind::Int.accepts(&Value::Null));
        let k = ValueKind::Entity {
            type_name: Some("Person".to_string()),
        };
        assert!(k.accepts(&Value::from(person("a"))));
        assert!(!k.accepts(&Value::from(Entity::new("Order"))));
    }

    #[test]
    fn test_value_serde_roundtrip() {
        let v = Value::Tuple(vec![Value::I64(1), Value::from("two"), Value::Null]);
        let json = serde_json::to_string(&v).unwrap();
        let restored: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v, restored);
    }
}
