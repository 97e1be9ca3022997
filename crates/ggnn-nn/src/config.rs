//! Model configuration.
//!
//! Every option is static for the lifetime of a model and validated once by
//! [`GgnnConfig::validate`] (called from `GgnnModel::new`). Configs are plain
//! serde types, so they can live in JSON next to a training run:
//!
//! ```json
//! {
//!   "vocab_size": 8568,
//!   "embedding_dim": 32,
//!   "rounds": 4,
//!   "edge_types": ["control", "data", "call"],
//!   "position": { "max_positions": 64, "init": "sinusoidal", "combine": "gated" },
//!   "readout": { "level": "graph", "aggregation": "sum", "task": "classification", "num_outputs": 5 },
//!   "aux_heads": {
//!     "reachable": {
//!       "readout": { "level": "node", "task": "classification", "num_outputs": 2 },
//!       "weight": 0.2
//!     }
//!   }
//! }
//! ```

use crate::error::{Error, Result};
use ggnn_core::{EdgeType, LabelLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Task name under which the primary head's labels are stored.
pub const PRIMARY_TASK: &str = "main";

/// What to do with ids outside an embedding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OovPolicy {
    /// Map to one reserved "unknown" row appended to the table.
    Reserved,
    /// Fail the batch with a lookup error.
    Error,
}

/// How the position table is initialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionInit {
    /// Trainable table.
    Learned,
    /// Fixed sin/cos table, not trained.
    Sinusoidal,
}

/// How an edge's position embedding combines with its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionCombine {
    /// `msg + p`
    Additive,
    /// `msg * p`
    Multiplicative,
    /// `msg * 2 * sigmoid(W p)`, identity at initialisation when `W p = 0`.
    Gated,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// Number of distinct positions (excluding the reserved row).
    pub max_positions: usize,
    pub init: PositionInit,
    pub combine: PositionCombine,
    pub oov: OovPolicy,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            max_positions: 64,
            init: PositionInit::Sinusoidal,
            combine: PositionCombine::Gated,
            oov: OovPolicy::Reserved,
        }
    }
}

/// Reduction over a set of vectors (incoming messages, or a graph's nodes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Mean,
}

/// State carried from one round to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidualPolicy {
    /// `h' = update(h)`
    None,
    /// `h' = update(h) + h`
    Add,
}

/// Whether a head predicts per node or per graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadoutLevel {
    Node,
    Graph,
}

impl ReadoutLevel {
    /// Label level a head of this level is scored against.
    pub fn label_level(self) -> LabelLevel {
        match self {
            ReadoutLevel::Node => LabelLevel::Node,
            ReadoutLevel::Graph => LabelLevel::Graph,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Logits scored with cross-entropy.
    Classification,
    /// Values scored with squared error.
    Regression,
}

/// Which node states a head reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadoutInput {
    /// Gate and transform see the final state.
    Final,
    /// Gate sees `[h_0 || h_K]`, transform sees `h_K`.
    InitialAndFinal,
    /// Gate and transform see `[h_0 || h_1 || ... || h_K]`.
    AllRounds,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadoutConfig {
    pub level: ReadoutLevel,
    /// Segment reduction for graph-level heads; ignored at node level.
    pub aggregation: Aggregation,
    pub task: TaskKind,
    pub num_outputs: usize,
    /// Weight each node's output by a learned sigmoid relevance score.
    pub gated: bool,
    pub input: ReadoutInput,
    /// Dropout on per-node outputs, training mode only.
    pub dropout: f32,
}

impl Default for ReadoutConfig {
    fn default() -> Self {
        Self {
            level: ReadoutLevel::Graph,
            aggregation: Aggregation::Sum,
            task: TaskKind::Classification,
            num_outputs: 2,
            gated: true,
            input: ReadoutInput::InitialAndFinal,
            dropout: 0.0,
        }
    }
}

impl ReadoutConfig {
    pub fn graph(task: TaskKind, num_outputs: usize) -> Self {
        Self {
            level: ReadoutLevel::Graph,
            task,
            num_outputs,
            ..Default::default()
        }
    }

    pub fn node(task: TaskKind, num_outputs: usize) -> Self {
        Self {
            level: ReadoutLevel::Node,
            task,
            num_outputs,
            ..Default::default()
        }
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_input(mut self, input: ReadoutInput) -> Self {
        self.input = input;
        self
    }

    pub fn with_gated(mut self, gated: bool) -> Self {
        self.gated = gated;
        self
    }

    pub fn with_dropout(mut self, p: f32) -> Self {
        self.dropout = p;
        self
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.num_outputs == 0 {
            return Err(Error::config(format!("head '{name}': num_outputs must be > 0")));
        }
        if self.task == TaskKind::Classification && self.num_outputs < 2 {
            return Err(Error::config(format!(
                "head '{name}': classification needs at least 2 classes, got {}",
                self.num_outputs
            )));
        }
        check_dropout(&format!("head '{name}' dropout"), self.dropout)
    }
}

/// An auxiliary head and its loss weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuxHeadConfig {
    pub readout: ReadoutConfig,
    pub weight: f32,
}

/// Full engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GgnnConfig {
    /// Number of known vocabulary ids.
    pub vocab_size: usize,
    /// Width of node embeddings.
    pub embedding_dim: usize,
    pub oov: OovPolicy,
    /// Append a fixed 2-wide selector embedding `[[0, s], [s, 0]]` to every node.
    pub selector_scale: Option<f32>,
    /// Message-passing rounds (K).
    pub rounds: usize,
    /// Unroll one layer K times instead of K distinct layers.
    pub share_weights: bool,
    /// Edge types with a learned transform; other types are ignored.
    pub edge_types: Vec<EdgeType>,
    /// Also pass messages against edge direction, with separate transforms.
    pub backward_edges: bool,
    pub edge_bias: bool,
    pub message_aggregation: Aggregation,
    pub position: Option<PositionConfig>,
    pub residual: ResidualPolicy,
    /// Dropout on node states between rounds, training mode only.
    pub state_dropout: f32,
    /// Fail with a numeric-instability error on NaN/Inf instead of propagating.
    pub check_numerics: bool,
    pub readout: ReadoutConfig,
    pub aux_heads: BTreeMap<String, AuxHeadConfig>,
}

impl Default for GgnnConfig {
    fn default() -> Self {
        Self {
            vocab_size: 1024,
            embedding_dim: 32,
            oov: OovPolicy::Reserved,
            selector_scale: None,
            rounds: 6,
            share_weights: false,
            edge_types: EdgeType::ALL.to_vec(),
            backward_edges: false,
            edge_bias: true,
            message_aggregation: Aggregation::Sum,
            position: None,
            residual: ResidualPolicy::None,
            state_dropout: 0.0,
            check_numerics: true,
            readout: ReadoutConfig::default(),
            aux_heads: BTreeMap::new(),
        }
    }
}

impl GgnnConfig {
    pub fn with_vocab(mut self, vocab_size: usize, embedding_dim: usize) -> Self {
        self.vocab_size = vocab_size;
        self.embedding_dim = embedding_dim;
        self
    }

    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds;
        self
    }

    pub fn with_oov(mut self, oov: OovPolicy) -> Self {
        self.oov = oov;
        self
    }

    pub fn with_selector(mut self, scale: f32) -> Self {
        self.selector_scale = Some(scale);
        self
    }

    pub fn with_share_weights(mut self, share: bool) -> Self {
        self.share_weights = share;
        self
    }

    pub fn with_edge_types(mut self, edge_types: impl IntoIterator<Item = EdgeType>) -> Self {
        self.edge_types = edge_types.into_iter().collect();
        self
    }

    pub fn with_backward_edges(mut self, backward: bool) -> Self {
        self.backward_edges = backward;
        self
    }

    pub fn with_edge_bias(mut self, bias: bool) -> Self {
        self.edge_bias = bias;
        self
    }

    pub fn with_message_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.message_aggregation = aggregation;
        self
    }

    pub fn with_position(mut self, position: PositionConfig) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_residual(mut self, residual: ResidualPolicy) -> Self {
        self.residual = residual;
        self
    }

    pub fn with_state_dropout(mut self, p: f32) -> Self {
        self.state_dropout = p;
        self
    }

    pub fn with_numeric_checks(mut self, enabled: bool) -> Self {
        self.check_numerics = enabled;
        self
    }

    pub fn with_readout(mut self, readout: ReadoutConfig) -> Self {
        self.readout = readout;
        self
    }

    pub fn with_aux_head(mut self, name: impl Into<String>, readout: ReadoutConfig, weight: f32) -> Self {
        self.aux_heads.insert(name.into(), AuxHeadConfig { readout, weight });
        self
    }

    /// Width of node states: embedding width plus the selector columns.
    pub fn hidden_dim(&self) -> usize {
        self.embedding_dim + if self.selector_scale.is_some() { 2 } else { 0 }
    }

    /// Whether any head reads intermediate rounds.
    pub fn needs_history(&self) -> bool {
        std::iter::once(&self.readout)
            .chain(self.aux_heads.values().map(|h| &h.readout))
            .any(|r| r.input == ReadoutInput::AllRounds)
    }

    /// Check the configuration, returning [`Error::Config`] on the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.rounds == 0 {
            return Err(Error::config("rounds must be at least 1"));
        }
        if self.vocab_size == 0 {
            return Err(Error::config("vocab_size must be > 0"));
        }
        if self.embedding_dim == 0 {
            return Err(Error::config("embedding_dim must be > 0"));
        }
        if self.edge_types.is_empty() {
            return Err(Error::config("at least one edge type must carry messages"));
        }
        for (i, t) in self.edge_types.iter().enumerate() {
            if self.edge_types[..i].contains(t) {
                return Err(Error::config(format!("edge type '{t}' listed twice")));
            }
        }
        if let Some(scale) = self.selector_scale {
            if !scale.is_finite() {
                return Err(Error::config("selector_scale must be finite"));
            }
        }
        if let Some(position) = &self.position {
            if position.max_positions == 0 {
                return Err(Error::config("position.max_positions must be > 0"));
            }
        }
        check_dropout("state_dropout", self.state_dropout)?;

        self.readout.validate(PRIMARY_TASK)?;
        for (name, head) in &self.aux_heads {
            if name.is_empty() || name == PRIMARY_TASK {
                return Err(Error::config(format!(
                    "auxiliary head name '{name}' is empty or reserved"
                )));
            }
            if !head.weight.is_finite() || head.weight < 0.0 {
                return Err(Error::config(format!(
                    "auxiliary head '{name}' has invalid loss weight {}",
                    head.weight
                )));
            }
            head.readout.validate(name)?;
        }
        Ok(())
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("cannot parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::config(format!("cannot serialize config: {e}")))
    }
}

fn check_dropout(what: &str, p: f32) -> Result<()> {
    if (0.0..1.0).contains(&p) {
        Ok(())
    } else {
        Err(Error::config(format!("{what} must be in [0, 1), got {p}")))
    }
}
