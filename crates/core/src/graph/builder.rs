//! Graph construction
//!
//! Single-pass breadth-first traversal over the entities nested in a root's
//! payload. BFS discovers every entity at its minimal depth first, so the
//! first edge reaching a node is its canonical hierarchical edge; every
//! later occurrence (redundant containment, shared sub-entity, or a copy
//! closing a cycle) is classified as a reference edge and not explored
//! further.

use super::{entity_at_path, ContainerKind, EntityGraph, GraphEdge, GraphNode, Ownership};
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::types::{InstanceId, PathStep, VersionId};
use crate::value::Value;
use std::collections::{HashMap, VecDeque};

/// One containment occurrence discovered under a parent entity
struct ChildOccurrence {
    field: String,
    container: ContainerKind,
    /// Steps from the parent entity to the child (starts with the field)
    steps: Vec<PathStep>,
    version_id: VersionId,
    instance_id: InstanceId,
    type_name: String,
}

impl EntityGraph {
    /// Build the graph rooted at the given entity
    ///
    /// The graph owns a clone of the root; the caller's entity is not
    /// touched.
    pub fn build(root: &Entity) -> Result<EntityGraph> {
        let root = root.clone();
        let root_vid = root.version_id();

        let mut nodes: HashMap<VersionId, GraphNode> = HashMap::new();
        let mut edges: Vec<GraphEdge> = Vec::new();

        nodes.insert(
            root_vid,
            GraphNode {
                version_id: root_vid,
                instance_id: root.instance_id(),
                type_name: root.type_name().to_string(),
                parent: None,
                depth: 0,
                ancestry: vec![root_vid],
                path: Vec::new(),
            },
        );

        let mut queue: VecDeque<VersionId> = VecDeque::new();
        queue.push_back(root_vid);

        while let Some(current) = queue.pop_front() {
            let (cur_path, cur_depth, cur_ancestry) = {
                let node = nodes.get(&current).ok_or_else(|| {
                    Error::StoreInconsistency("builder queue references unknown node".to_string())
                })?;
                (node.path.clone(), node.depth, node.ancestry.clone())
            };
            let entity = entity_at_path(&root, &cur_path).ok_or_else(|| {
                Error::StoreInconsistency("builder path no longer walks to a node".to_string())
            })?;

            for occ in collect_children(entity) {
                if nodes.contains_key(&occ.version_id) {
                    // Redundant or cycle-closing occurrence. BFS discovery
                    // order is non-decreasing in depth, so the earlier edge
                    // is already the shortest route.
                    edges.push(GraphEdge {
                        parent: current,
                        child: occ.version_id,
                        field: occ.field,
                        container: occ.container,
                        ownership: Ownership::Reference,
                    });
                    continue;
                }

                let mut path = cur_path.clone();
                path.extend(occ.steps.iter().cloned());
                let mut ancestry = Vec::with_capacity(cur_ancestry.len() + 1);
                ancestry.push(occ.version_id);
                ancestry.extend(cur_ancestry.iter().copied());

                nodes.insert(
                    occ.version_id,
                    GraphNode {
                        version_id: occ.version_id,
                        instance_id: occ.instance_id,
                        type_name: occ.type_name,
                        parent: Some(current),
                        depth: cur_depth + 1,
                        ancestry,
                        path,
                    },
                );
                edges.push(GraphEdge {
                    parent: current,
                    child: occ.version_id,
                    field: occ.field,
                    container: occ.container,
                    ownership: Ownership::Hierarchical,
                });
                queue.push_back(occ.version_id);
            }
        }

        Ok(EntityGraph::from_parts(root, nodes, edges))
    }
}

/// Enumerate the entity occurrences directly contained by one entity
///
/// Fields iterate in name order; lists and tuples in position order; maps
/// in key order. Classification records the innermost container shape.
fn collect_children(entity: &Entity) -> Vec<ChildOccurrence> {
    let mut out = Vec::new();
    for (field, value) in entity.fields() {
        collect_in_value(
            field,
            value,
            vec![PathStep::field(field)],
            ContainerKind::Direct,
            &mut out,
        );
    }
    out
}

fn collect_in_value(
    field: &str,
    value: &Value,
    steps: Vec<PathStep>,
    container: ContainerKind,
    out: &mut Vec<ChildOccurrence>,
) {
    match value {
        Value::Entity(child) => {
            out.push(ChildOccurrence {
                field: field.to_string(),
                container,
                steps,
                version_id: child.version_id(),
                instance_id: child.instance_id(),
                type_name: child.type_name().to_string(),
            });
        }
        Value::List(items) => {
            for (i, item) in items.iter().enumerate() {
                let mut steps = steps.clone();
                steps.push(PathStep::index(i));
                collect_in_value(field, item, steps, ContainerKind::List { index: i }, out);
            }
        }
        Value::Tuple(items) => {
            for (i, item) in items.iter().enumerate() {
                let mut steps = steps.clone();
                steps.push(PathStep::index(i));
                collect_in_value(field, item, steps, ContainerKind::Tuple { index: i }, out);
            }
        }
        Value::Map(map) => {
            for (key, item) in map {
                let mut steps = steps.clone();
                steps.push(PathStep::field(key));
                collect_in_value(
                    field,
                    item,
                    steps,
                    ContainerKind::Dict { key: key.clone() },
                    out,
                );
            }
        }
        _ => {}
    }
}
