//! Entity graphs
//!
//! A rooted DAG built from one entity and the entities nested inside its
//! payload. Each containment occurrence becomes an edge; the canonical
//! ownership route from the root to each node is the hierarchical tree,
//! and every redundant or cycle-closing occurrence is a reference edge.
//!
//! The graph is the unit the store registers, versions, and diffs.

mod builder;
mod differ;

pub use differ::{diff_graphs, GraphDiff};

use crate::entity::Entity;
use crate::types::{InstanceId, PathStep, VersionId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a parent's field contains a child entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerKind {
    /// `parent.field` holds the child directly
    Direct,
    /// `parent.field[index]` holds the child in a list
    List {
        /// Position in the list
        index: usize,
    },
    /// `parent.field[key]` holds the child in a map
    Dict {
        /// Map key
        key: String,
    },
    /// `parent.field[index]` holds the child in a tuple
    Tuple {
        /// Position in the tuple
        index: usize,
    },
}

/// Whether an edge is the canonical ownership route or a redundant mention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ownership {
    /// Canonical ownership edge; hierarchical edges form a tree
    Hierarchical,
    /// Redundant or cycle-closing occurrence
    Reference,
}

/// One containment occurrence between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Version of the containing entity
    pub parent: VersionId,
    /// Version of the contained entity
    pub child: VersionId,
    /// Field of the parent the child occurs under
    pub field: String,
    /// Container shape of the occurrence
    pub container: ContainerKind,
    /// Canonical or reference
    pub ownership: Ownership,
}

/// Per-node bookkeeping of a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Version of the entity at this node
    pub version_id: VersionId,
    /// Instance of the entity at this node
    pub instance_id: InstanceId,
    /// Entity type name
    pub type_name: String,
    /// Canonical parent, or None for the root
    pub parent: Option<VersionId>,
    /// Distance from the root along hierarchical edges
    pub depth: usize,
    /// Version ids from this node up to the root (self first)
    pub ancestry: Vec<VersionId>,
    /// Navigation path from the root to this node
    pub path: Vec<PathStep>,
}

/// A rooted DAG of entities
///
/// Owns a clone of the root entity (and therefore of the whole nested
/// payload) plus the node/edge bookkeeping computed by the builder.
///
/// ## Invariants
///
/// - exactly one root; every node is reachable from it via hierarchical
///   edges
/// - hierarchical edges form a tree (no cycles)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityGraph {
    root_version_id: VersionId,
    root: Entity,
    nodes: HashMap<VersionId, GraphNode>,
    edges: Vec<GraphEdge>,
}

impl EntityGraph {
    pub(crate) fn from_parts(
        root: Entity,
        nodes: HashMap<VersionId, GraphNode>,
        edges: Vec<GraphEdge>,
    ) -> Self {
        EntityGraph {
            root_version_id: root.version_id(),
            root,
            nodes,
            edges,
        }
    }

    /// Version of the root entity
    pub fn root_version_id(&self) -> VersionId {
        self.root_version_id
    }

    /// Borrow the root entity
    pub fn root_entity(&self) -> &Entity {
        &self.root
    }

    /// Consume the graph, returning the root entity
    pub fn into_root(self) -> Entity {
        self.root
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Check whether a version occurs in this graph
    pub fn contains(&self, version_id: VersionId) -> bool {
        self.nodes.contains_key(&version_id)
    }

    /// Look up a node's bookkeeping
    pub fn node(&self, version_id: VersionId) -> Option<&GraphNode> {
        self.nodes.get(&version_id)
    }

    /// Iterate over all nodes
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    /// All version ids in this graph
    pub fn version_ids(&self) -> impl Iterator<Item = VersionId> + '_ {
        self.nodes.keys().copied()
    }

    /// All edges, hierarchical and reference
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Only the canonical ownership edges
    pub fn hierarchical_edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.edges
            .iter()
            .filter(|e| e.ownership == Ownership::Hierarchical)
    }

    /// Only the reference edges
    pub fn reference_edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.edges
            .iter()
            .filter(|e| e.ownership == Ownership::Reference)
    }

    /// Borrow the entity at a node by walking its canonical path
    pub fn entity_at(&self, version_id: VersionId) -> Option<&Entity> {
        let node = self.nodes.get(&version_id)?;
        entity_at_path(&self.root, &node.path)
    }
}

/// Walk a canonical path from a root entity down to a nested entity
pub fn entity_at_path<'a>(root: &'a Entity, path: &[PathStep]) -> Option<&'a Entity> {
    if path.is_empty() {
        return Some(root);
    }
    let (first, rest) = path.split_first()?;
    let mut current = match first {
        PathStep::Field(name) => root.get_field(name)?,
        PathStep::Index(_) => return None,
    };
    for step in rest {
        current = current.step(step)?;
    }
    current.as_entity()
}
