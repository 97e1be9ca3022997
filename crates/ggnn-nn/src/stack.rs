//! K message-passing rounds.

use crate::config::{GgnnConfig, ResidualPolicy};
use crate::error::{Error, Result};
use crate::messaging::MessagingLayer;
use crate::tensors::BatchTensors;
use crate::transform::EdgeSlot;
use candle_core::Tensor;
use candle_nn::{Dropout, VarBuilder};

/// Node states produced by a [`GgnnStack`].
#[derive(Debug, Clone)]
pub struct StackOutput {
    /// Round-0 states (the embeddings).
    pub initial: Tensor,
    /// States after round K.
    pub final_state: Tensor,
    /// States after rounds `1..=K`, kept only when a head reads all rounds.
    pub history: Option<Vec<Tensor>>,
}

impl StackOutput {
    /// `[h_0 || h_1 || ... || h_K]`, `(N, (K + 1) * hidden)`.
    pub fn all_rounds(&self) -> Result<Tensor> {
        let history = self
            .history
            .as_ref()
            .ok_or_else(|| Error::config("per-round history was not retained by the stack"))?;
        let mut states = Vec::with_capacity(history.len() + 1);
        states.push(&self.initial);
        states.extend(history.iter());
        Ok(Tensor::cat(&states, 1)?)
    }

    /// `[h_0 || h_K]`, `(N, 2 * hidden)`.
    pub fn initial_and_final(&self) -> Result<Tensor> {
        Ok(Tensor::cat(&[&self.initial, &self.final_state], 1)?)
    }
}

/// Sequential composition of messaging layers.
///
/// With `share_weights` a single layer is unrolled for every round (the
/// original GGNN formulation); otherwise each round owns its parameters,
/// stored under `layer_{k}`.
#[derive(Debug, Clone)]
pub struct GgnnStack {
    layers: Vec<MessagingLayer>,
    rounds: usize,
    residual: ResidualPolicy,
    retain_history: bool,
    state_dropout: Dropout,
}

impl GgnnStack {
    /// Create the K message-passing rounds.
    ///
    /// With `config.share_weights` a single layer is built and reused by
    /// every round; otherwise round `k` gets its own layer under `layer_k`.
    ///
    /// # Arguments
    /// - `config`: Model configuration; `rounds` must be at least 1
    /// - `slots`: Edge slots that carry messages
    /// - `vb`: Variable builder for the layers
    ///
    /// # Example
    ///
    /// ```rust
    /// use candle_core::{DType, Device};
    /// use candle_nn::{VarBuilder, VarMap};
    /// use ggnn_nn::{EdgeSlot, GgnnConfig, GgnnStack};
    ///
    /// let config = GgnnConfig::default().with_rounds(5).with_share_weights(true);
    /// let slots = EdgeSlot::enabled(&config);
    /// let varmap = VarMap::new();
    /// let stack = GgnnStack::new(&config, &slots, VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu))?;
    /// assert_eq!(stack.num_layers(), 1);
    /// # Ok::<(), ggnn_nn::Error>(())
    /// ```
    pub fn new(config: &GgnnConfig, slots: &[EdgeSlot], vb: VarBuilder) -> Result<Self> {
        if config.rounds == 0 {
            return Err(Error::config("rounds must be at least 1"));
        }
        let layers = if config.share_weights {
            vec![MessagingLayer::new(config, slots, vb.pp("layer"))?]
        } else {
            (0..config.rounds)
                .map(|k| MessagingLayer::new(config, slots, vb.pp(format!("layer_{k}"))))
                .collect::<Result<Vec<_>>>()?
        };
        Ok(Self {
            layers,
            rounds: config.rounds,
            residual: config.residual,
            retain_history: config.needs_history(),
            state_dropout: Dropout::new(config.state_dropout),
        })
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Layer used in `round` (0-based).
    pub fn layer(&self, round: usize) -> &MessagingLayer {
        &self.layers[round % self.layers.len()]
    }

    /// Inference-mode forward pass.
    pub fn forward(&self, initial: &Tensor, batch: &BatchTensors) -> Result<StackOutput> {
        self.forward_t(initial, batch, false)
    }

    /// Run all rounds from `initial`. Dropout between rounds applies only
    /// when `train` is set.
    pub fn forward_t(&self, initial: &Tensor, batch: &BatchTensors, train: bool) -> Result<StackOutput> {
        let mut state = initial.clone();
        let mut history = self.retain_history.then(|| Vec::with_capacity(self.rounds));

        for round in 0..self.rounds {
            let input = self.state_dropout.forward(&state, train)?;
            let updated = self.layer(round).forward(&input, batch, round)?;
            state = match self.residual {
                ResidualPolicy::None => updated,
                ResidualPolicy::Add => (updated + &state)?,
            };
            if let Some(history) = history.as_mut() {
                history.push(state.clone());
            }
            tracing::trace!(round, residual = ?self.residual, "round complete");
        }

        Ok(StackOutput {
            initial: initial.clone(),
            final_state: state,
            history,
        })
    }
}
