//! String addressing
//!
//! An address names an entity, or a value nested inside one:
//!
//! ```text
//! @<uuid>                   the whole record
//! @<uuid>.age               a field of the record
//! @<uuid>.items.0.name      a field of an entity inside a list field
//! @<uuid>.items[0]["a.b"]   bracket navigators; quoted keys may hold dots
//! ```
//!
//! One unified parser accepts all forms: `@` followed by a textual UUID,
//! then navigation: dot-separated identifiers walk fields and map keys,
//! unsigned integers walk list and tuple positions, and bracket groups
//! (`[0]`, `[key]`, `["quoted key"]`) do the same with keys that plain
//! segments cannot spell.

use crate::store::EntityStore;
use provenant_core::{Entity, Error, PathStep, Result, Value, VersionId};
use std::collections::BTreeMap;

/// Check whether a string satisfies the address grammar
pub fn is_address(s: &str) -> bool {
    parse(s).is_ok()
}

/// Parse an address into its version id and navigation steps
///
/// Fails with [`Error::MalformedAddress`] when the string does not start
/// with `@`, the UUID is invalid, or the path cannot be tokenised.
pub fn parse(addr: &str) -> Result<(VersionId, Vec<PathStep>)> {
    let malformed = || Error::MalformedAddress(addr.to_string());
    let body = addr.strip_prefix('@').ok_or_else(malformed)?;

    let (uuid_text, path_text) = match body.split_once('.') {
        Some((uuid, rest)) => (uuid, Some(rest)),
        None => (body, None),
    };
    let version_id = VersionId::parse(uuid_text).ok_or_else(malformed)?;

    let steps = match path_text {
        Some(path_text) => parse_steps(path_text).ok_or_else(malformed)?,
        None => Vec::new(),
    };
    Ok((version_id, steps))
}

/// Tokenise a navigation path
///
/// Accepts dot-separated segments (`items.0.name`) and bracket groups
/// (`items[0]`, `map["a.b"]`, possibly chained: `grid[1][2]`).
fn parse_steps(path: &str) -> Option<Vec<PathStep>> {
    let mut steps = Vec::new();
    let mut rest = path;
    let mut expect_segment = true;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            if expect_segment {
                return None;
            }
            rest = after;
            expect_segment = true;
            continue;
        }
        if let Some(after) = rest.strip_prefix('[') {
            let (step, remaining) = parse_bracket(after)?;
            steps.push(step);
            rest = remaining;
            expect_segment = false;
            continue;
        }
        if !expect_segment {
            return None;
        }
        let end = rest.find(['.', '[']).unwrap_or(rest.len());
        let token = &rest[..end];
        if token.is_empty() {
            return None;
        }
        steps.push(token_step(token));
        rest = &rest[end..];
        expect_segment = false;
    }

    if expect_segment {
        // trailing '.' (an empty path_text also lands here)
        return None;
    }
    Some(steps)
}

/// Parse one bracket group, the leading `[` already consumed
fn parse_bracket(rest: &str) -> Option<(PathStep, &str)> {
    if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.find('"')?;
        let key = &quoted[..end];
        let after = quoted[end + 1..].strip_prefix(']')?;
        return Some((PathStep::field(key), after));
    }
    let end = rest.find(']')?;
    let inner = &rest[..end];
    if inner.is_empty() {
        return None;
    }
    Some((token_step(inner), &rest[end + 1..]))
}

fn token_step(token: &str) -> PathStep {
    match token.parse::<usize>() {
        Ok(index) => PathStep::index(index),
        Err(_) => PathStep::field(token),
    }
}

/// Render an address from a version id and navigation steps
///
/// Field names a plain segment cannot spell (empty, leading digit, or
/// holding anything beyond `[A-Za-z0-9_]`) render as quoted bracket keys
/// so the address re-parses to the same steps.
pub fn format_address(version_id: VersionId, steps: &[PathStep]) -> String {
    let mut out = format!("@{}", version_id);
    for step in steps {
        match step {
            PathStep::Index(i) => {
                out.push('.');
                out.push_str(&i.to_string());
            }
            PathStep::Field(name) if plain_segment(name) => {
                out.push('.');
                out.push_str(name);
            }
            PathStep::Field(name) => {
                out.push_str(&format!("[\"{}\"]", name));
            }
        }
    }
    out
}

fn plain_segment(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Resolve an address against a store
///
/// An entity-only address yields the whole record (as a `Value::Entity`);
/// an address with a path yields the value at that path. Fails with
/// [`Error::NotFound`] for an unknown version and [`Error::PathError`]
/// when a step cannot be walked.
pub fn resolve(store: &EntityStore, addr: &str) -> Result<Value> {
    let (version_id, steps) = parse(addr)?;
    let record = store.get_record(version_id)?;
    if steps.is_empty() {
        return Ok(Value::from(record));
    }
    record.get_path(&steps).cloned()
}

/// Resolve an entity-only address to the record itself
///
/// Fails with [`Error::PathError`] when the address carries a path that
/// does not land on an entity.
pub fn resolve_record(store: &EntityStore, addr: &str) -> Result<Entity> {
    match resolve(store, addr)? {
        Value::Entity(e) => Ok(*e),
        other => Err(Error::PathError {
            step: addr.to_string(),
            reason: format!("address resolves to {}, not an entity", other.kind()),
        }),
    }
}

// =============================================================================
// Kwargs classification
// =============================================================================

/// How one call argument classifies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Already an entity
    DirectRecord,
    /// A string satisfying the address grammar
    Address,
    /// Anything else
    Primitive,
}

/// The overall shape of a call's arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KwargsPattern {
    /// No arguments
    Empty,
    /// Entities only
    PureRecords,
    /// Primitives only
    PurePrimitives,
    /// Addresses present, no direct entities
    Borrowing,
    /// Entities and primitives, no addresses
    Composite,
    /// Entities and addresses both present
    Mixed,
}

/// Classify one argument value
pub fn classify_arg(value: &Value) -> ArgKind {
    match value {
        Value::Entity(_) => ArgKind::DirectRecord,
        Value::String(s) if is_address(s) => ArgKind::Address,
        _ => ArgKind::Primitive,
    }
}

/// Classify a full argument map
pub fn classify_kwargs(
    kwargs: &BTreeMap<String, Value>,
) -> (KwargsPattern, BTreeMap<String, ArgKind>) {
    let kinds: BTreeMap<String, ArgKind> = kwargs
        .iter()
        .map(|(name, value)| (name.clone(), classify_arg(value)))
        .collect();

    let records = kinds.values().any(|k| *k == ArgKind::DirectRecord);
    let addresses = kinds.values().any(|k| *k == ArgKind::Address);
    let primitives = kinds.values().any(|k| *k == ArgKind::Primitive);

    let pattern = if kinds.is_empty() {
        KwargsPattern::Empty
    } else if records && addresses {
        KwargsPattern::Mixed
    } else if addresses {
        KwargsPattern::Borrowing
    } else if records && primitives {
        KwargsPattern::Composite
    } else if records {
        KwargsPattern::PureRecords
    } else {
        KwargsPattern::PurePrimitives
    };

    (pattern, kinds)
}
