#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]

//! Batched Gated Graph Neural Network engine on candle.
//!
//! `ggnn-nn` consumes a [`ggnn_core::GraphBatch`], runs K synchronous
//! message-passing rounds with a GRU node update, and reduces the final
//! states into node- or graph-level predictions, a combined multi-task loss
//! and evaluation metrics.
//!
//! # Modules
//!
//! - [`config`]: static model configuration (serde, builder methods)
//! - [`embedding`]: node, selector and edge position embeddings
//! - [`transform`]: one linear map per edge type and direction
//! - [`messaging`]: one message-passing round and the gated update
//! - [`stack`]: K rounds, optional residual and weight sharing
//! - [`readout`]: gated readout heads, primary and auxiliary
//! - [`loss`]: cross-entropy / squared error and weighted combination
//! - [`metrics`]: accuracy, per-class and weighted scores, regression errors
//! - [`model`]: [`GgnnModel`], the single forward-and-score entry point
//!
//! # Example
//!
//! ```rust
//! use candle_core::{DType, Device};
//! use candle_nn::{VarBuilder, VarMap};
//! use ggnn_core::{BatchAssembler, Edge, EdgeType, Graph, GraphLabels, Label, Node, TaskLabel};
//! use ggnn_nn::{GgnnConfig, GgnnModel, ReadoutConfig, TaskKind};
//!
//! let mut g = Graph::new();
//! let a = g.add_node(Node::new(3));
//! let b = g.add_node(Node::new(7));
//! g.add_edge(Edge::new(a, b, EdgeType::Control));
//! let labels = GraphLabels::from([("main".to_string(), TaskLabel::Graph(Label::Class(1)))]);
//! let batch = BatchAssembler::new().assemble(&[g], &[labels])?;
//!
//! let config = GgnnConfig::default()
//!     .with_vocab(16, 8)
//!     .with_rounds(2)
//!     .with_readout(ReadoutConfig::graph(TaskKind::Classification, 2));
//! let varmap = VarMap::new();
//! let model = GgnnModel::new(config, VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu))?;
//!
//! let scored = model.score(&batch)?;
//! assert_eq!(scored.predictions["main"].dims(), &[1, 2]);
//! assert!(scored.metrics["loss"].is_finite());
//! # Ok::<(), ggnn_nn::Error>(())
//! ```

pub mod config;
pub mod embedding;
pub mod error;
pub mod loss;
pub mod messaging;
pub mod metrics;
pub mod model;
pub mod numeric;
pub mod readout;
pub mod stack;
pub mod tensors;
pub mod transform;

pub use config::{
    Aggregation, AuxHeadConfig, GgnnConfig, OovPolicy, PositionCombine, PositionConfig, PositionInit,
    ReadoutConfig, ReadoutInput, ReadoutLevel, ResidualPolicy, TaskKind, PRIMARY_TASK,
};
pub use error::{Error, Result};
pub use loss::{head_loss, LossBreakdown, LossCombiner};
pub use messaging::{GateActivations, GatedUpdate, MessagingLayer};
pub use metrics::MetricsComputer;
pub use model::{GgnnModel, ModelOutput, ScoredOutput};
pub use readout::{AuxReadoutHead, HeadOutput, ReadoutHead};
pub use stack::{GgnnStack, StackOutput};
pub use tensors::{BatchTensors, Segments};
pub use transform::{Direction, EdgeSlot, LinearTransformBank};
