#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]

//! Program-graph data model and ragged batching for gated graph networks.
//!
//! This crate is tensor-free: it validates and flattens graphs so that the
//! message-passing engine (`ggnn-nn`) can treat a whole batch as one graph.
//!
//! - [`Graph`], [`Node`], [`Edge`], [`EdgeType`] - program graphs as built
//!   from compiler IR by an external collaborator
//! - [`Label`], [`TaskLabel`], [`GraphLabels`] - per-graph or per-node ground truth
//! - [`BatchAssembler`] - packs graphs and labels into a [`GraphBatch`]
//! - [`ShapeError`] - every data-contract violation, with graph/edge/node context
//!
//! # Example
//!
//! ```rust
//! use ggnn_core::{BatchAssembler, Edge, EdgeType, Graph, GraphLabels, Label, Node, TaskLabel};
//!
//! let mut a = Graph::new();
//! let x = a.add_node(Node::new(1));
//! let y = a.add_node(Node::new(2));
//! a.add_edge(Edge::new(x, y, EdgeType::Control));
//!
//! let mut b = Graph::new();
//! b.add_node(Node::new(3));
//!
//! let label = |c| GraphLabels::from([("main".to_string(), TaskLabel::Graph(Label::Class(c)))]);
//! let batch = BatchAssembler::new().assemble(&[a, b], &[label(0), label(1)])?;
//!
//! assert_eq!(batch.num_nodes(), 3);
//! assert_eq!(batch.segment_ids(), &[0, 0, 1]);
//! # Ok::<(), ggnn_core::ShapeError>(())
//! ```

mod batch;
mod error;
mod graph;

#[cfg(feature = "petgraph")]
pub mod interop;

pub use batch::{BatchAssembler, BatchLabels, EdgeList, GraphBatch, LabelColumn, LabelData, LabelLevel};
pub use error::{Result, ShapeError};
pub use graph::{Edge, EdgeType, Graph, GraphLabels, Label, Node, NodeType, TaskLabel};
