//! Graph diffing
//!
//! Given a freshly built graph and the previously stored graph of the same
//! lineage, compute which nodes require a new version:
//!
//! 1. Version-id symmetric difference locates added and removed entities;
//!    every surviving ancestor of an added or removed entity changed.
//! 2. Surviving entities are compared leaves-first: payload fields and
//!    reference edges differ when any scalar differs or any nested entity
//!    occurrence points at a different version. A difference marks the
//!    node and all of its ancestors.

use super::EntityGraph;
use crate::entity::Entity;
use crate::types::VersionId;
use crate::value::Value;
use std::collections::HashSet;

/// Outcome of diffing two graphs of the same lineage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphDiff {
    /// Versions present only in the new graph
    pub added: HashSet<VersionId>,
    /// Versions present only in the old graph
    pub removed: HashSet<VersionId>,
    /// Surviving versions (in the new graph) that require rotation
    pub changed: HashSet<VersionId>,
}

impl GraphDiff {
    /// Check whether the graphs are identical
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Diff a new graph against the previously stored graph
pub fn diff_graphs(new_graph: &EntityGraph, old_graph: &EntityGraph) -> GraphDiff {
    let new_ids: HashSet<VersionId> = new_graph.version_ids().collect();
    let old_ids: HashSet<VersionId> = old_graph.version_ids().collect();

    let added: HashSet<VersionId> = new_ids.difference(&old_ids).copied().collect();
    let removed: HashSet<VersionId> = old_ids.difference(&new_ids).copied().collect();
    let mut changed: HashSet<VersionId> = HashSet::new();

    // Ancestors of additions changed: their payload now mentions a version
    // the stored graph has never seen.
    for vid in &added {
        if let Some(node) = new_graph.node(*vid) {
            mark_surviving_ancestors(&node.ancestry, &added, &mut changed);
        }
    }
    // Ancestors of removals changed likewise, located through the old
    // graph's ancestry and mapped onto the survivors.
    for vid in &removed {
        if let Some(node) = old_graph.node(*vid) {
            for ancestor in node.ancestry.iter().skip(1) {
                if new_ids.contains(ancestor) {
                    changed.insert(*ancestor);
                }
            }
        }
    }

    // Survivors, leaves first.
    let mut survivors: Vec<VersionId> = new_ids.intersection(&old_ids).copied().collect();
    survivors.sort_by_key(|vid| {
        std::cmp::Reverse(new_graph.node(*vid).map(|n| n.path.len()).unwrap_or(0))
    });

    for vid in survivors {
        if changed.contains(&vid) {
            continue;
        }
        let (new_entity, old_entity) = match (new_graph.entity_at(vid), old_graph.entity_at(vid)) {
            (Some(n), Some(o)) => (n, o),
            _ => continue,
        };
        if !local_fields_equal(new_entity, old_entity) {
            changed.insert(vid);
            if let Some(node) = new_graph.node(vid) {
                mark_surviving_ancestors(&node.ancestry, &added, &mut changed);
            }
        }
    }

    GraphDiff {
        added,
        removed,
        changed,
    }
}

fn mark_surviving_ancestors(
    ancestry: &[VersionId],
    added: &HashSet<VersionId>,
    changed: &mut HashSet<VersionId>,
) {
    // ancestry[0] is the node itself; additions are already fresh versions
    // and need no rotation.
    for ancestor in ancestry.iter().skip(1) {
        if !added.contains(ancestor) {
            changed.insert(*ancestor);
        }
    }
}

/// Compare two entities' local payloads
///
/// Nested entity occurrences compare by version id only; their contents
/// are compared at their own nodes.
fn local_fields_equal(a: &Entity, b: &Entity) -> bool {
    if a.type_name() != b.type_name() {
        return false;
    }
    let a_fields: Vec<&str> = a.field_names();
    let b_fields: Vec<&str> = b.field_names();
    if a_fields != b_fields {
        return false;
    }
    a.fields()
        .zip(b.fields())
        .all(|((_, av), (_, bv))| shallow_value_eq(av, bv))
}

fn shallow_value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Entity(x), Value::Entity(y)) => x.version_id() == y.version_id(),
        (Value::List(xs), Value::List(ys)) | (Value::Tuple(xs), Value::Tuple(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| shallow_value_eq(x, y))
        }
        (Value::Map(xs), Value::Map(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys)
                    .all(|((xk, xv), (yk, yv))| xk == yk && shallow_value_eq(xv, yv))
        }
        _ => a == b,
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
    fn test_identical_graphs_diff_empty() {
        let team = Entity::new("Team").with_field("lead", person("a", 1));
        let old = EntityGraph::build(&team).unwrap();
        let new = EntityGraph::build(&team).unwrap();
        assert!(diff_graphs(&new, &old).is_empty());
    }

    #[test]
    fn test_scalar_change_marks_node_and_ancestors() {
        let lead = person("a", 1);
        let lead_vid = lead.version_id();
        let mut team = Entity::new("Team").with_field("lead", lead);
        let team_vid = team.version_id();
        let old = EntityGraph::build(&team).unwrap();

        team.get_field_mut("lead")
            .unwrap()
            .as_entity_mut()
            .unwrap()
            .set_field("age", 2i64);
        let new = EntityGraph::build(&team).unwrap();

        let diff = diff_graphs(&new, &old);
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
        assert!(diff.changed.contains(&lead_vid));
        assert!(diff.changed.contains(&team_vid));
    }

    #[test]
    fn test_added_child_marks_ancestors_only() {
        let mut team = Entity::new("Team").with_field("lead", person("a", 1));
        let team_vid = team.version_id();
        let old = EntityGraph::build(&team).unwrap();

        let newcomer = person("b", 2);
        let newcomer_vid = newcomer.version_id();
        team.set_field("deputy", newcomer);
        let new = EntityGraph::build(&team).unwrap();

        let diff = diff_graphs(&new, &old);
        assert_eq!(diff.added, [newcomer_vid].into_iter().collect());
        assert!(diff.changed.contains(&team_vid));
        assert!(!diff.changed.contains(&newcomer_vid));
    }

    #[test]
    fn test_removed_child_marks_surviving_ancestors() {
        let gone = person("gone", 1);
        let gone_vid = gone.version_id();
        let mut team = Entity::new("Team")
            .with_field("lead", person("a", 1))
            .with_field("temp", gone);
        let team_vid = team.version_id();
        let old = EntityGraph::build(&team).unwrap();

        team.remove_field("temp");
        let new = EntityGraph::build(&team).unwrap();

        let diff = diff_graphs(&new, &old);
        assert_eq!(diff.removed, [gone_vid].into_iter().collect());
        assert!(diff.changed.contains(&team_vid));
    }

    #[test]
    fn test_root_only_change() {
        let mut team = Entity::new("Team")
            .with_field("name", "core")
            .with_field("lead", person("a", 1));
        let lead_vid = team
            .get_field("lead")
            .unwrap()
            .as_entity()
            .unwrap()
            .version_id();
        let old = EntityGraph::build(&team).unwrap();

        team.set_field("name", "platform");
        let new = EntityGraph::build(&team).unwrap();

        let diff = diff_graphs(&new, &old);
        assert!(diff.changed.contains(&team.version_id()));
        assert!(!diff.changed.contains(&lead_vid));
        assert_eq!(diff.changed.len(), 1);
    }

    #[test]
    fn test_reference_retarget_is_a_change() {
        // Swapping which version a field mentions, without any scalar
        // change, still changes the parent.
        let a = person("a", 1);
        let b = person("b", 2);
        let mut holder = Entity::new("Holder").with_field("current", a);
        let old = EntityGraph::build(&holder).unwrap();

        holder.set_field("current", b);
        let new = EntityGraph::build(&holder).unwrap();

        let diff = diff_graphs(&new, &old);
        assert!(diff.changed.contains(&holder.version_id()));
    }
}
