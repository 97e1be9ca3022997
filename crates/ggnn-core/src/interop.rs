//! Conversion from `petgraph` directed graphs.
//!
//! Graph builders that already hold a `petgraph::graph::DiGraph` of program
//! elements can hand it over without rebuilding node and edge lists by hand.
//! Node indices are preserved, so labels built against the petgraph indices
//! stay aligned.

use crate::error::{Result, ShapeError};
use crate::graph::{Edge, EdgeType, Graph, Node};
use petgraph::graph::DiGraph;
use petgraph::visit::EdgeRef;

/// Edge weight for petgraph program graphs: relation plus optional position.
pub type EdgeAttr = (EdgeType, Option<u32>);

/// Fails with [`ShapeError::NodeIndexOverflow`] when a node index does not
/// fit a `u32` endpoint.
impl TryFrom<&DiGraph<Node, EdgeAttr>> for Graph {
    type Error = ShapeError;

    fn try_from(g: &DiGraph<Node, EdgeAttr>) -> Result<Self> {
        let nodes = g.node_weights().copied().collect();
        let edges = g
            .edge_references()
            .map(|e| {
                let (edge_type, position) = *e.weight();
                Ok(Edge {
                    source: endpoint(e.source().index())?,
                    target: endpoint(e.target().index())?,
                    edge_type,
                    position,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Graph::from_parts(nodes, edges))
    }
}

fn endpoint(index: usize) -> Result<u32> {
    u32::try_from(index).map_err(|_| ShapeError::NodeIndexOverflow { index })
}
