//! Prediction heads over node states.
//!
//! Every head computes a per-node output
//!
//! ```text
//! o_v = σ(g(x_gate[v])) * f(x[v])
//! ```
//!
//! where `g` is a width-1 relevance score (skipped when the head is not
//! gated) and `f` a linear map to `num_outputs`. Node-level heads return
//! `o` directly; graph-level heads reduce it per graph with a segment sum or
//! mean. Which states `x_gate` and `x` are depends on [`ReadoutInput`].

use crate::config::{AuxHeadConfig, ReadoutConfig, ReadoutInput, ReadoutLevel, TaskKind};
use crate::error::{Error, Result};
use crate::numeric::NumericGuard;
use crate::stack::StackOutput;
use crate::tensors::Segments;
use candle_core::{Tensor, D};
use candle_nn::ops::{sigmoid, softmax_last_dim};
use candle_nn::{linear, Dropout, Linear, Module, VarBuilder};

/// Predictions of one head for one batch.
#[derive(Debug, Clone)]
pub struct HeadOutput {
    pub name: String,
    pub level: ReadoutLevel,
    pub task: TaskKind,
    /// `(rows, num_outputs)`: class logits or regression values.
    pub logits: Tensor,
}

impl HeadOutput {
    pub fn rows(&self) -> usize {
        self.logits.dims().first().copied().unwrap_or(0)
    }

    /// Softmax over classes for classification, the raw values for regression.
    pub fn probabilities(&self) -> Result<Tensor> {
        match self.task {
            TaskKind::Classification => Ok(softmax_last_dim(&self.logits)?),
            TaskKind::Regression => Ok(self.logits.clone()),
        }
    }

    /// Arg-max class per row.
    pub fn predicted_classes(&self) -> Result<Vec<u32>> {
        if self.task != TaskKind::Classification {
            return Err(Error::config(format!(
                "head '{}' is a regression head and has no classes",
                self.name
            )));
        }
        Ok(self.logits.argmax(D::Minus1)?.to_vec1::<u32>()?)
    }
}

/// Gated linear readout.
#[derive(Debug, Clone)]
pub struct ReadoutHead {
    gate: Option<Linear>,
    transform: Linear,
    dropout: Dropout,
    config: ReadoutConfig,
    guard: NumericGuard,
}

impl ReadoutHead {
    /// Head over `hidden`-wide states produced by `rounds` rounds.
    ///
    /// # Arguments
    /// - `config`: Level, task, input, aggregation, gating and dropout of the head
    /// - `hidden`: Node state dimension
    /// - `rounds`: Number of message-passing rounds; sets the input width
    ///   for [`ReadoutInput::AllRounds`]
    /// - `check_numerics`: Whether gate scores are checked for NaN/Inf
    /// - `vb`: Variable builder for `gate` and `transform`
    pub fn new(
        config: ReadoutConfig,
        hidden: usize,
        rounds: usize,
        check_numerics: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let (gate_in, transform_in) = match config.input {
            ReadoutInput::Final => (hidden, hidden),
            ReadoutInput::InitialAndFinal => (2 * hidden, hidden),
            ReadoutInput::AllRounds => ((rounds + 1) * hidden, (rounds + 1) * hidden),
        };
        let gate = if config.gated {
            Some(linear(gate_in, 1, vb.pp("gate"))?)
        } else {
            None
        };
        Ok(Self {
            gate,
            transform: linear(transform_in, config.num_outputs, vb.pp("transform"))?,
            dropout: Dropout::new(config.dropout),
            config,
            guard: NumericGuard::new(check_numerics),
        })
    }

    pub fn config(&self) -> &ReadoutConfig {
        &self.config
    }

    /// Per-node outputs `(N, num_outputs)` before any segment reduction.
    pub fn node_outputs(&self, states: &StackOutput, train: bool) -> Result<Tensor> {
        let (gate_input, input) = match self.config.input {
            ReadoutInput::Final => (states.final_state.clone(), states.final_state.clone()),
            ReadoutInput::InitialAndFinal => (states.initial_and_final()?, states.final_state.clone()),
            ReadoutInput::AllRounds => {
                let all = states.all_rounds()?;
                (all.clone(), all)
            }
        };
        let mut out = self.transform.forward(&input)?;
        if let Some(gate) = &self.gate {
            let score = sigmoid(&gate.forward(&gate_input)?)?;
            self.guard.check(&score, "readout gate", None)?;
            out = out.broadcast_mul(&score)?;
        }
        Ok(self.dropout.forward(&out, train)?)
    }

    /// Node-level `(N, C)` or graph-level `(G, C)` predictions.
    pub fn forward_t(&self, states: &StackOutput, segments: &Segments, train: bool) -> Result<Tensor> {
        let nodes = self.node_outputs(states, train)?;
        match self.config.level {
            ReadoutLevel::Node => Ok(nodes),
            ReadoutLevel::Graph => segments.reduce(&nodes, self.config.aggregation),
        }
    }

    /// Run the head and label its output with `name`.
    pub fn output(
        &self,
        name: &str,
        states: &StackOutput,
        segments: &Segments,
        train: bool,
    ) -> Result<HeadOutput> {
        Ok(HeadOutput {
            name: name.to_string(),
            level: self.config.level,
            task: self.config.task,
            logits: self.forward_t(states, segments, train)?,
        })
    }
}

/// A named head whose loss enters the total with a fixed weight.
#[derive(Debug, Clone)]
pub struct AuxReadoutHead {
    pub name: String,
    pub head: ReadoutHead,
    pub weight: f32,
}

impl AuxReadoutHead {
    /// Create an auxiliary head.
    ///
    /// # Arguments
    /// - `name`: Head name, also the label task it is scored against
    /// - `config`: Readout configuration and loss weight
    /// - `hidden`, `rounds`, `check_numerics`: As in [`ReadoutHead::new`]
    /// - `vb`: Variable builder for the head's parameters
    pub fn new(
        name: impl Into<String>,
        config: &AuxHeadConfig,
        hidden: usize,
        rounds: usize,
        check_numerics: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            head: ReadoutHead::new(config.readout, hidden, rounds, check_numerics, vb)?,
            weight: config.weight,
        })
    }

    pub fn output(&self, states: &StackOutput, segments: &Segments, train: bool) -> Result<HeadOutput> {
        self.head.output(&self.name, states, segments, train)
    }
}
