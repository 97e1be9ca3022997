//! One synchronous message-passing round with a gated (GRU) node update.
//!
//! For every enabled edge slot:
//!
//! ```text
//! msg_e   = W_slot h[src(e)]            (optionally combined with pos(e))
//! m_v     = Σ_{e: dst(e) = v} msg_e     (sum over all slots; zero if no edges)
//! ```
//!
//! then node-wise, as in Li et al., "Gated Graph Sequence Neural Networks"
//! (ICLR 2016):
//!
//! ```text
//! z  = σ(W_z m + U_z h)
//! r  = σ(W_r m + U_r h)
//! ĥ  = tanh(W_n m + U_n (r ⊙ h))
//! h' = (1 - z) ⊙ h + z ⊙ ĥ
//! ```
//!
//! Aggregation is a scatter-add, so the result does not depend on edge order
//! beyond floating-point rounding.

use crate::config::{Aggregation, GgnnConfig, PositionCombine};
use crate::error::Result;
use crate::numeric::NumericGuard;
use crate::tensors::BatchTensors;
use crate::transform::{EdgeSlot, LinearTransformBank};
use candle_core::Tensor;
use candle_nn::ops::sigmoid;
use candle_nn::{linear, Linear, Module, VarBuilder};

/// Gate values of one update step, each `(N, hidden)`.
#[derive(Debug, Clone)]
pub struct GateActivations {
    pub update: Tensor,
    pub reset: Tensor,
    pub candidate: Tensor,
}

/// Node-wise GRU cell.
#[derive(Debug, Clone)]
pub struct GatedUpdate {
    /// `[W_z; W_r; W_n]` applied to the incoming message.
    message_proj: Linear,
    /// `[U_z; U_r]` applied to the previous state.
    state_proj: Linear,
    /// `U_n` applied to the reset-gated state.
    candidate_proj: Linear,
    hidden: usize,
}

impl GatedUpdate {
    /// Create a GRU cell.
    ///
    /// # Arguments
    /// - `hidden`: Width of node states and incoming messages
    /// - `vb`: Variable builder; weights live under `message`, `state` and `candidate`
    pub fn new(hidden: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            message_proj: linear(hidden, 3 * hidden, vb.pp("message"))?,
            state_proj: linear(hidden, 2 * hidden, vb.pp("state"))?,
            candidate_proj: linear(hidden, hidden, vb.pp("candidate"))?,
            hidden,
        })
    }

    pub fn hidden(&self) -> usize {
        self.hidden
    }

    /// New states from previous states `h` and incoming messages `m`.
    pub fn step(&self, h: &Tensor, m: &Tensor) -> Result<Tensor> {
        Ok(self.step_with_gates(h, m)?.0)
    }

    /// Like [`step`](Self::step), also returning the gate activations.
    pub fn step_with_gates(&self, h: &Tensor, m: &Tensor) -> Result<(Tensor, GateActivations)> {
        let d = self.hidden;
        let xm = self.message_proj.forward(m)?;
        let xh = self.state_proj.forward(h)?;

        let update = sigmoid(&(xm.narrow(1, 0, d)? + xh.narrow(1, 0, d)?)?)?;
        let reset = sigmoid(&(xm.narrow(1, d, d)? + xh.narrow(1, d, d)?)?)?;
        let gated_state = (&reset * h)?;
        let candidate = (xm.narrow(1, 2 * d, d)? + self.candidate_proj.forward(&gated_state)?)?.tanh()?;

        // (1 - z) h + z ĥ  ==  h + z (ĥ - h)
        let next = (h + (&update * (&candidate - h)?)?)?;
        Ok((
            next,
            GateActivations {
                update,
                reset,
                candidate,
            },
        ))
    }
}

/// How position vectors enter the messages of a layer.
#[derive(Debug, Clone)]
enum PositionMixer {
    Additive,
    Multiplicative,
    Gated(Linear),
}

impl PositionMixer {
    fn apply(&self, msg: Tensor, pos: &Tensor) -> Result<Tensor> {
        let out = match self {
            PositionMixer::Additive => (msg + pos)?,
            PositionMixer::Multiplicative => (msg * pos)?,
            PositionMixer::Gated(w) => {
                let gate = sigmoid(&w.forward(pos)?)?.affine(2.0, 0.0)?;
                (msg * gate)?
            }
        };
        Ok(out)
    }
}

/// A single message-passing round.
#[derive(Debug, Clone)]
pub struct MessagingLayer {
    transforms: LinearTransformBank,
    mixer: Option<PositionMixer>,
    aggregation: Aggregation,
    update: GatedUpdate,
    guard: NumericGuard,
}

impl MessagingLayer {
    /// Create one message-passing round.
    ///
    /// # Arguments
    /// - `config`: Model configuration (hidden width, edge bias, position
    ///   combine, message aggregation, numeric checks)
    /// - `slots`: Edge slots that carry messages
    /// - `vb`: Variable builder for the edge transforms, position gate and update
    pub fn new(config: &GgnnConfig, slots: &[EdgeSlot], vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_dim();
        let transforms = LinearTransformBank::new(slots, hidden, config.edge_bias, vb.pp("transforms"))?;
        let mixer = match config.position.map(|p| p.combine) {
            None => None,
            Some(PositionCombine::Additive) => Some(PositionMixer::Additive),
            Some(PositionCombine::Multiplicative) => Some(PositionMixer::Multiplicative),
            Some(PositionCombine::Gated) => Some(PositionMixer::Gated(linear(
                hidden,
                hidden,
                vb.pp("position_gate"),
            )?)),
        };
        Ok(Self {
            transforms,
            mixer,
            aggregation: config.message_aggregation,
            update: GatedUpdate::new(hidden, vb.pp("update"))?,
            guard: NumericGuard::new(config.check_numerics),
        })
    }

    pub fn transforms(&self) -> &LinearTransformBank {
        &self.transforms
    }

    pub fn update(&self) -> &GatedUpdate {
        &self.update
    }

    /// Aggregated incoming message per node, `(N, hidden)`.
    pub fn aggregate(&self, state: &Tensor, batch: &BatchTensors, round: usize) -> Result<Tensor> {
        let mut incoming = state.zeros_like()?;
        for edges in &batch.edges {
            let Some(mut msg) = self.transforms.message(edges.slot, state, &edges.sources)? else {
                continue;
            };
            if let (Some(mixer), Some(pos)) = (&self.mixer, &edges.positions) {
                msg = mixer.apply(msg, pos)?;
            }
            incoming = incoming.index_add(&edges.targets, &msg, 0)?;
        }
        if let (Aggregation::Mean, Some(inv)) = (self.aggregation, &batch.inverse_in_degree) {
            incoming = incoming.broadcast_mul(inv)?;
        }
        self.guard.check(&incoming, "messages", Some(round))?;
        Ok(incoming)
    }

    /// Next node states.
    pub fn forward(&self, state: &Tensor, batch: &BatchTensors, round: usize) -> Result<Tensor> {
        Ok(self.forward_with_gates(state, batch, round)?.0)
    }

    /// Next node states plus the gate activations that produced them.
    pub fn forward_with_gates(
        &self,
        state: &Tensor,
        batch: &BatchTensors,
        round: usize,
    ) -> Result<(Tensor, GateActivations)> {
        let incoming = self.aggregate(state, batch, round)?;
        let (next, gates) = self.update.step_with_gates(state, &incoming)?;
        self.guard.check(&gates.update, "update gate", Some(round))?;
        self.guard.check(&gates.reset, "reset gate", Some(round))?;
        self.guard.check(&gates.candidate, "candidate state", Some(round))?;
        tracing::trace!(round, edges = batch.edges.len(), "message-passing round done");
        Ok((next, gates))
    }
}
