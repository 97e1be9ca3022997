//! Embeddings, message passing, readout, loss and metrics behind one call.

use crate::config::{GgnnConfig, PRIMARY_TASK};
use crate::embedding::{NodeEmbeddingTable, PositionEmbeddingTable, SelectorEmbedding};
use crate::error::{Error, Result};
use crate::loss::{head_loss, LossBreakdown, LossCombiner};
use crate::metrics::MetricsComputer;
use crate::readout::{AuxReadoutHead, HeadOutput, ReadoutHead};
use crate::stack::{GgnnStack, StackOutput};
use crate::tensors::BatchTensors;
use crate::transform::EdgeSlot;
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use ggnn_core::GraphBatch;
use std::collections::BTreeMap;

/// Head outputs and node states of one forward pass.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub primary: HeadOutput,
    pub auxiliary: BTreeMap<String, HeadOutput>,
    pub stack: StackOutput,
}

impl ModelOutput {
    /// Head name -> prediction tensor, primary head under `"main"`.
    pub fn predictions(&self) -> BTreeMap<String, Tensor> {
        std::iter::once(&self.primary)
            .chain(self.auxiliary.values())
            .map(|h| (h.name.clone(), h.logits.clone()))
            .collect()
    }
}

/// What the training loop consumes for one labelled batch.
#[derive(Debug, Clone)]
pub struct ScoredOutput {
    pub predictions: BTreeMap<String, Tensor>,
    pub loss: LossBreakdown,
    pub metrics: BTreeMap<String, f64>,
}

/// Gated graph neural network over program graph batches.
///
/// Parameters live in the caller's `VarMap`. The model only reads them, so
/// an optimizer may step that `VarMap` between calls.
///
/// ```no_run
/// use candle_core::{DType, Device};
/// use candle_nn::{VarBuilder, VarMap};
/// use ggnn_nn::{GgnnConfig, GgnnModel};
///
/// let varmap = VarMap::new();
/// let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
/// let model = GgnnModel::new(GgnnConfig::default().with_rounds(4), vb)?;
/// # let batch: ggnn_core::GraphBatch = unimplemented!();
/// let scored = model.score_t(&batch, true)?;
/// scored.loss.total.backward()?;
/// # Ok::<(), ggnn_nn::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct GgnnModel {
    config: GgnnConfig,
    slots: Vec<EdgeSlot>,
    embeddings: NodeEmbeddingTable,
    selector: Option<SelectorEmbedding>,
    positions: Option<PositionEmbeddingTable>,
    stack: GgnnStack,
    readout: ReadoutHead,
    aux_heads: Vec<AuxReadoutHead>,
    losses: LossCombiner,
    metrics: MetricsComputer,
    device: Device,
}

impl GgnnModel {
    /// Validate `config` and create every parameter under `vb`.
    pub fn new(config: GgnnConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let embeddings = NodeEmbeddingTable::new(
            config.vocab_size,
            config.embedding_dim,
            config.oov,
            vb.pp("embeddings"),
        )?;
        Self::build(config, embeddings, vb)
    }

    /// Like [`new`](Self::new), with a fixed `(rows, embedding_dim)` node
    /// embedding matrix that is never trained.
    pub fn with_pretrained_embeddings(config: GgnnConfig, weights: Tensor, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let embeddings = NodeEmbeddingTable::from_pretrained(weights.to_dtype(vb.dtype())?, config.oov)?;
        if embeddings.dim() != config.embedding_dim {
            return Err(Error::config(format!(
                "pretrained embeddings are {} wide, config expects {}",
                embeddings.dim(),
                config.embedding_dim
            )));
        }
        if embeddings.vocab_size() != config.vocab_size {
            return Err(Error::config(format!(
                "pretrained embeddings cover {} ids, config expects {}",
                embeddings.vocab_size(),
                config.vocab_size
            )));
        }
        Self::build(config, embeddings, vb)
    }

    fn build(config: GgnnConfig, embeddings: NodeEmbeddingTable, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_dim();
        let slots = EdgeSlot::enabled(&config);
        let device = vb.device().clone();

        let selector = config
            .selector_scale
            .map(|s| SelectorEmbedding::new(s, vb.dtype(), &device))
            .transpose()?;
        let positions = config
            .position
            .as_ref()
            .map(|p| PositionEmbeddingTable::new(p, hidden, vb.pp("positions")))
            .transpose()?;
        let stack = GgnnStack::new(&config, &slots, vb.pp("stack"))?;
        let readout = ReadoutHead::new(
            config.readout,
            hidden,
            config.rounds,
            config.check_numerics,
            vb.pp("readout"),
        )?;
        let aux_vb = vb.pp("aux");
        let aux_heads = config
            .aux_heads
            .iter()
            .map(|(name, head)| {
                AuxReadoutHead::new(
                    name.clone(),
                    head,
                    hidden,
                    config.rounds,
                    config.check_numerics,
                    aux_vb.pp(name),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let losses = LossCombiner::from_config(&config)?;

        tracing::info!(
            rounds = config.rounds,
            hidden,
            slots = slots.len(),
            shared = config.share_weights,
            aux_heads = aux_heads.len(),
            "built GGNN model"
        );

        Ok(Self {
            config,
            slots,
            embeddings,
            selector,
            positions,
            stack,
            readout,
            aux_heads,
            losses,
            metrics: MetricsComputer::new(),
            device,
        })
    }

    pub fn config(&self) -> &GgnnConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Edge slots that carry messages.
    pub fn slots(&self) -> &[EdgeSlot] {
        &self.slots
    }

    pub fn embeddings(&self) -> &NodeEmbeddingTable {
        &self.embeddings
    }

    pub fn stack(&self) -> &GgnnStack {
        &self.stack
    }

    /// Round-0 node states `(N, hidden)`.
    pub fn initial_states(&self, batch: &GraphBatch) -> Result<Tensor> {
        let embedded = self.embeddings.lookup(batch.vocab_ids())?;
        match &self.selector {
            None => Ok(embedded),
            Some(selector) => {
                let selected = selector.lookup(batch.selectors())?;
                Ok(Tensor::cat(&[&embedded, &selected], 1)?)
            }
        }
    }

    /// Inference-mode forward pass.
    pub fn forward(&self, batch: &GraphBatch) -> Result<ModelOutput> {
        self.forward_t(batch, false)
    }

    /// Predictions of every head. Dropout is active only when `train` is set.
    pub fn forward_t(&self, batch: &GraphBatch, train: bool) -> Result<ModelOutput> {
        let tensors = BatchTensors::new(
            batch,
            &self.slots,
            self.positions.as_ref(),
            self.config.message_aggregation,
            &self.device,
        )?;
        tracing::debug!(
            graphs = batch.num_graphs(),
            nodes = batch.num_nodes(),
            edges = ?tensors.edge_counts().iter().map(|(s, n)| format!("{s}={n}")).collect::<Vec<_>>(),
            train,
            "forward pass"
        );

        let initial = self.initial_states(batch)?;
        let stack = self.stack.forward_t(&initial, &tensors, train)?;
        let primary = self.readout.output(PRIMARY_TASK, &stack, &tensors.segments, train)?;
        let auxiliary = self
            .aux_heads
            .iter()
            .map(|head| {
                head.output(&stack, &tensors.segments, train)
                    .map(|out| (head.name.clone(), out))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(ModelOutput {
            primary,
            auxiliary,
            stack,
        })
    }

    /// Inference-mode [`score_t`](Self::score_t).
    pub fn score(&self, batch: &GraphBatch) -> Result<ScoredOutput> {
        self.score_t(batch, false)
    }

    /// Predictions, combined loss and metrics for a labelled batch.
    ///
    /// Labels of the primary head are read from task `"main"`, those of an
    /// auxiliary head from the task with the head's name.
    pub fn score_t(&self, batch: &GraphBatch, train: bool) -> Result<ScoredOutput> {
        let output = self.forward_t(batch, train)?;
        let labels = batch.labels();

        let main_labels = labels.require(PRIMARY_TASK)?;
        let main_loss = head_loss(&output.primary, main_labels)?;
        let mut metrics = self.metrics.compute(&output.primary, main_labels)?;

        let mut aux_losses = BTreeMap::new();
        for (name, head) in &output.auxiliary {
            let column = labels.require(name)?;
            aux_losses.insert(name.clone(), head_loss(head, column)?);
            metrics.extend(self.metrics.compute(head, column)?);
        }

        let loss = self.losses.combine(PRIMARY_TASK, &main_loss, &aux_losses)?;
        for (name, value) in &loss.components {
            metrics.insert(format!("{name}/loss"), *value);
        }
        let total = loss.total_value()?;
        metrics.insert("loss".to_string(), total);
        tracing::debug!(loss = total, heads = loss.components.len(), "scored batch");

        Ok(ScoredOutput {
            predictions: output.predictions(),
            loss,
            metrics,
        })
    }
}
