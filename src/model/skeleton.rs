//! Skeleton topology: named nodes, directed edges, and symmetry pairs.
//!
//! A node's position in the node sequence is load-bearing: it is the index
//! into every dependent instance's point array. Nodes are therefore never
//! removed in place; reindexing goes through
//! [`Labels::remap_skeleton`](crate::model::Labels::remap_skeleton), which
//! produces a new skeleton and remaps dependent instances in one step.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::PoselabError;

/// A named body part at a stable index within a skeleton.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Name of the body part, unique within its skeleton.
    pub name: String,
}

impl Node {
    /// Creates a new node with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A directed connection between two nodes, stored as node indices.
///
/// Directionality matters: `(a, b)` and `(b, a)` are distinct edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Index of the source node.
    pub source: usize,
    /// Index of the destination node.
    pub destination: usize,
}

impl Edge {
    /// Creates a new edge between two node indices.
    pub fn new(source: usize, destination: usize) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Returns the edge with source and destination swapped.
    pub fn reversed(&self) -> Self {
        Self {
            source: self.destination,
            destination: self.source,
        }
    }
}

/// An unordered pair of node indices related by left/right symmetry.
///
/// The pair is stored with the smaller index first so that `(a, b)` and
/// `(b, a)` compare equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymmetryPair {
    first: usize,
    second: usize,
}

impl SymmetryPair {
    /// Creates a normalized symmetry pair.
    pub fn new(a: usize, b: usize) -> Self {
        if a <= b {
            Self {
                first: a,
                second: b,
            }
        } else {
            Self {
                first: b,
                second: a,
            }
        }
    }

    /// The smaller node index of the pair.
    pub fn first(&self) -> usize {
        self.first
    }

    /// The larger node index of the pair.
    pub fn second(&self) -> usize {
        self.second
    }

    /// Returns true if the pair involves the given node index.
    pub fn contains(&self, node: usize) -> bool {
        self.first == node || self.second == node
    }
}

/// A named topology of body-part nodes, edges and symmetry pairs.
///
/// Construction enforces the skeleton contract: node names are unique, edge
/// and symmetry endpoints must name existing nodes, no self-loops, no
/// duplicate directed edges, and a node belongs to at most one symmetry pair.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    /// Name of the skeleton.
    pub name: String,
    nodes: Vec<Node>,
    edges: BTreeSet<Edge>,
    symmetries: BTreeSet<SymmetryPair>,
}

impl Skeleton {
    /// Creates an empty skeleton with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: BTreeSet::new(),
            symmetries: BTreeSet::new(),
        }
    }

    /// Creates a skeleton with the given node names.
    pub fn with_nodes<I, S>(name: impl Into<String>, node_names: I) -> Result<Self, PoselabError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut skeleton = Self::new(name);
        for node_name in node_names {
            skeleton.add_node(node_name)?;
        }
        Ok(skeleton)
    }

    /// Appends a node, returning its index in the node sequence.
    ///
    /// Fails with [`PoselabError::DuplicateNode`] if the name is taken.
    pub fn add_node(&mut self, name: impl Into<String>) -> Result<usize, PoselabError> {
        let name = name.into();
        if self.node_index(&name).is_some() {
            return Err(PoselabError::DuplicateNode {
                skeleton: self.name.clone(),
                name,
            });
        }
        self.nodes.push(Node::new(name));
        Ok(self.nodes.len() - 1)
    }

    /// Adds a directed edge between two named nodes.
    ///
    /// Fails with [`PoselabError::UnknownNode`] if either endpoint is absent,
    /// [`PoselabError::SelfLoopEdge`] for an edge from a node to itself, or
    /// [`PoselabError::DuplicateEdge`] if the ordered pair already exists.
    /// The reversed pair is a distinct edge and is accepted here; validation
    /// flags it as a warning.
    pub fn add_edge(&mut self, source: &str, destination: &str) -> Result<(), PoselabError> {
        let src = self.require_node(source)?;
        let dst = self.require_node(destination)?;
        if src == dst {
            return Err(PoselabError::SelfLoopEdge {
                skeleton: self.name.clone(),
                name: source.to_string(),
            });
        }
        let edge = Edge::new(src, dst);
        if !self.edges.insert(edge) {
            return Err(PoselabError::DuplicateEdge {
                skeleton: self.name.clone(),
                from_node: source.to_string(),
                to_node: destination.to_string(),
            });
        }
        Ok(())
    }

    /// Declares two named nodes as a left/right symmetry pair.
    ///
    /// Fails if either node is absent or already has a symmetry partner.
    pub fn add_symmetry(&mut self, a: &str, b: &str) -> Result<(), PoselabError> {
        let first = self.require_node(a)?;
        let second = self.require_node(b)?;
        if first == second {
            return Err(PoselabError::SelfLoopEdge {
                skeleton: self.name.clone(),
                name: a.to_string(),
            });
        }
        for (index, name) in [(first, a), (second, b)] {
            if self.symmetries.iter().any(|pair| pair.contains(index)) {
                return Err(PoselabError::DuplicateSymmetry {
                    skeleton: self.name.clone(),
                    name: name.to_string(),
                });
            }
        }
        self.symmetries.insert(SymmetryPair::new(first, second));
        Ok(())
    }

    /// Number of nodes; also the required point count of dependent instances.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The ordered node sequence.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Node names in sequence order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    /// Looks up the index of a node by name.
    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// The edge set, in deterministic order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    /// The symmetry pairs, in deterministic order.
    pub fn symmetries(&self) -> impl Iterator<Item = &SymmetryPair> {
        self.symmetries.iter()
    }

    /// Structural equality: same node sequence (names, order), edge set and
    /// symmetry set. The skeleton name is not part of the structure; this is
    /// the comparison merge and decode use to collapse repeated declarations
    /// into one shared entity.
    pub fn matches_structure(&self, other: &Skeleton) -> bool {
        self.nodes == other.nodes
            && self.edges == other.edges
            && self.symmetries == other.symmetries
    }

    fn require_node(&self, name: &str) -> Result<usize, PoselabError> {
        self.node_index(name)
            .ok_or_else(|| PoselabError::UnknownNode {
                skeleton: self.name.clone(),
                name: name.to_string(),
            })
    }

    /// Restores a skeleton from raw parts without re-running the construction
    /// contract. Used by codecs after their own checks; validation still
    /// verifies endpoint ranges.
    pub(crate) fn from_parts(
        name: String,
        nodes: Vec<Node>,
        edges: BTreeSet<Edge>,
        symmetries: BTreeSet<SymmetryPair>,
    ) -> Self {
        Self {
            name,
            nodes,
            edges,
            symmetries,
        }
    }
}
