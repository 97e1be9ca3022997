use crate::graph::EdgeType;
use thiserror::Error;

/// Data-contract violations in graphs, batches and labels.
///
/// Every variant carries enough context (graph, edge or node index) for a
/// caller to drop the offending example and continue.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShapeError {
    /// Label records do not line up with the graphs they describe.
    #[error("label count mismatch: {graphs} graphs but {labels} label records")]
    LabelCountMismatch { graphs: usize, labels: usize },

    /// An edge endpoint lies outside the node range it indexes into.
    ///
    /// `graph` is `None` when the edge came from an already flattened batch.
    #[error(
        "{edge_type} edge {edge}{} references node {node}, but only {num_nodes} nodes exist",
        on_graph(" of", .graph)
    )]
    EdgeOutOfRange {
        graph: Option<usize>,
        edge_type: EdgeType,
        edge: usize,
        node: u32,
        num_nodes: usize,
    },

    /// A graph has no nodes; readout needs at least one node per graph.
    #[error("graph {graph} has no nodes")]
    EmptyGraph { graph: usize },

    /// A node's segment id points past the number of graphs in the batch.
    #[error("node {node} has segment id {segment}, but the batch holds {num_graphs} graphs")]
    SegmentOutOfRange {
        node: usize,
        segment: u32,
        num_graphs: usize,
    },

    /// A stored node count disagrees with the segment ids it summarizes.
    #[error("graph {graph} should hold {expected} nodes, but the stored count is {got}")]
    NodeCountMismatch { graph: usize, expected: usize, got: usize },

    /// A node index does not fit the `u32` used for edge endpoints.
    #[error("node index {index} exceeds the u32 range of edge endpoints")]
    NodeIndexOverflow { index: usize },

    /// Two parallel arrays of a batch have different lengths.
    #[error("{what}: expected length {expected}, got {got}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// A task's labels are absent for some graph, or for the whole batch.
    #[error("no labels for task '{task}'{}", on_graph(" on", .graph))]
    MissingLabels { task: String, graph: Option<usize> },

    /// A task's labels disagree in kind, level, width or range.
    #[error("labels for task '{task}' do not fit: {reason}")]
    LabelMismatch { task: String, reason: String },
}

fn on_graph(prep: &str, graph: &Option<usize>) -> String {
    graph.map(|g| format!("{prep} graph {g}")).unwrap_or_default()
}

/// Result type alias for ggnn-core.
pub type Result<T> = std::result::Result<T, ShapeError>;
