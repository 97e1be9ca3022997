//! Program graphs as produced by an external graph builder.
//!
//! A [`Graph`] is a list of nodes (instructions, variables, constants) and a
//! list of typed, directed, optionally positioned edges between them. Node
//! indices inside a graph are local; the batch assembler rebases them.
//!
//! ```rust
//! use ggnn_core::{Edge, EdgeType, Graph, Node};
//!
//! let mut g = Graph::new();
//! let a = g.add_node(Node::new(4));
//! let b = g.add_node(Node::new(7));
//! g.add_edge(Edge::new(a, b, EdgeType::Control));
//! g.add_edge(Edge::new(a, b, EdgeType::Data).with_position(1));
//!
//! assert_eq!(g.num_nodes(), 2);
//! assert_eq!(g.num_edges_of(EdgeType::Data), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Relation carried by an edge.
///
/// The engine keeps one learned transform per edge type, selected by
/// [`EdgeType::index`], so the set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    /// Control flow between instructions.
    Control,
    /// Data flow between instructions, variables and constants.
    Data,
    /// Call edges between call sites and callee entry/exit.
    Call,
}

impl EdgeType {
    /// Number of edge types.
    pub const COUNT: usize = 3;

    /// All edge types, in table order.
    pub const ALL: [EdgeType; Self::COUNT] = [EdgeType::Control, EdgeType::Data, EdgeType::Call];

    /// Position of this type in per-type tables.
    pub fn index(self) -> usize {
        match self {
            EdgeType::Control => 0,
            EdgeType::Data => 1,
            EdgeType::Call => 2,
        }
    }

    /// Lowercase name, also used for parameter paths.
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeType::Control => "control",
            EdgeType::Data => "data",
            EdgeType::Call => "call",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of program element a node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Instruction,
    Variable,
    Constant,
}

/// A graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Vocabulary id used for the initial embedding.
    pub vocab_id: u32,
    /// Optional node-type tag.
    #[serde(default)]
    pub node_type: Option<NodeType>,
    /// Selector flag marking the node a node-level query is rooted at.
    #[serde(default)]
    pub selected: bool,
}

impl Node {
    /// Create an untyped, unselected node.
    pub fn new(vocab_id: u32) -> Self {
        Self {
            vocab_id,
            node_type: None,
            selected: false,
        }
    }

    pub fn with_type(mut self, node_type: NodeType) -> Self {
        self.node_type = Some(node_type);
        self
    }

    pub fn with_selected(mut self, selected: bool) -> Self {
        self.selected = selected;
        self
    }
}

/// A directed, typed edge between two nodes of the same graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node (graph-local index).
    pub source: u32,
    /// Destination node (graph-local index).
    pub target: u32,
    pub edge_type: EdgeType,
    /// Operand/argument position for order-sensitive relations.
    #[serde(default)]
    pub position: Option<u32>,
}

impl Edge {
    pub fn new(source: u32, target: u32, edge_type: EdgeType) -> Self {
        Self {
            source,
            target,
            edge_type,
            position: None,
        }
    }

    pub fn with_position(mut self, position: u32) -> Self {
        self.position = Some(position);
        self
    }
}

/// An immutable-by-convention program graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a graph from node and edge lists.
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    /// Add a node, returning its local index.
    pub fn add_node(&mut self, node: Node) -> u32 {
        let idx = self.nodes.len() as u32;
        self.nodes.push(node);
        idx
    }

    /// Add an edge. Endpoints are validated at batch assembly.
    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Number of edges of one type.
    pub fn num_edges_of(&self, edge_type: EdgeType) -> usize {
        self.edges.iter().filter(|e| e.edge_type == edge_type).count()
    }
}

/// A ground-truth value for one graph or one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    /// Class index for classification tasks.
    Class(u32),
    /// Target vector for regression tasks.
    Values(Vec<f32>),
}

impl Label {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Label::Class(_) => "class",
            Label::Values(_) => "values",
        }
    }

    pub(crate) fn width(&self) -> usize {
        match self {
            Label::Class(_) => 1,
            Label::Values(v) => v.len(),
        }
    }
}

/// Labels a graph carries for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskLabel {
    /// One label for the whole graph.
    Graph(Label),
    /// One label per node, in node order.
    Nodes(Vec<Label>),
}

/// Per-graph labels keyed by task name.
pub type GraphLabels = BTreeMap<String, TaskLabel>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_type_table_order() {
        for (i, t) in EdgeType::ALL.iter().enumerate() {
            assert_eq!(t.index(), i);
        }
    }

    #[test]
    fn edge_type_serializes_lowercase() {
        let json = serde_json::to_string(&EdgeType::Control).unwrap();
        assert_eq!(json, "\"control\"");
        let back: EdgeType = serde_json::from_str("\"call\"").unwrap();
        assert_eq!(back, EdgeType::Call);
    }

    #[test]
    fn builder_assigns_local_indices() {
        let mut g = Graph::new();
        assert_eq!(g.add_node(Node::new(1)), 0);
        assert_eq!(g.add_node(Node::new(2).with_type(NodeType::Variable)), 1);
        g.add_edge(Edge::new(0, 1, EdgeType::Data).with_position(3));
        assert_eq!(g.num_edges(), 1);
        assert_eq!(g.edges[0].position, Some(3));
        assert_eq!(g.num_edges_of(EdgeType::Call), 0);
    }

    #[test]
    fn graph_deserializes_with_defaults() {
        let g: Graph = serde_json::from_str(
            r#"{"nodes":[{"vocab_id":3}],"edges":[{"source":0,"target":0,"edge_type":"control"}]}"#,
        )
        .unwrap();
        assert_eq!(g.nodes[0], Node::new(3));
        assert_eq!(g.edges[0].position, None);
    }
}
