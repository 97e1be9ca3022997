//! Initial node states and edge position vectors.
//!
//! - [`NodeEmbeddingTable`]: vocabulary id -> initial node state
//! - [`SelectorEmbedding`]: fixed two-row table marking query-root nodes
//! - [`PositionEmbeddingTable`]: edge position -> vector combined with messages
//!
//! Out-of-range ids are handled per [`OovPolicy`]: with `Reserved` each table
//! has one extra trailing row that every unknown id maps to; with `Error` the
//! lookup fails and names the offending node or edge.
//!
//! Tables are only read during a forward pass. Trainable tables are
//! variables of the caller's `VarMap`; fixed ones (sinusoidal positions,
//! selectors, pretrained node vectors) are plain tensors.

use crate::config::{OovPolicy, PositionConfig, PositionInit};
use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{embedding, Embedding, Module, VarBuilder};

fn table_rows(size: usize, oov: OovPolicy) -> usize {
    match oov {
        OovPolicy::Reserved => size + 1,
        OovPolicy::Error => size,
    }
}

fn resolve_ids(
    table: &'static str,
    site: &'static str,
    ids: &[u32],
    size: usize,
    oov: OovPolicy,
) -> Result<Vec<u32>> {
    ids.iter()
        .enumerate()
        .map(|(index, &id)| {
            if (id as usize) < size {
                Ok(id)
            } else {
                match oov {
                    OovPolicy::Reserved => Ok(size as u32),
                    OovPolicy::Error => Err(Error::Lookup {
                        table,
                        id,
                        site,
                        index,
                        limit: size,
                    }),
                }
            }
        })
        .collect()
}

/// Vocabulary embedding producing round-0 node states.
#[derive(Debug, Clone)]
pub struct NodeEmbeddingTable {
    embeddings: Embedding,
    vocab_size: usize,
    oov: OovPolicy,
}

impl NodeEmbeddingTable {
    /// Create a trainable table of `vocab_size` ids (plus a reserved row
    /// under [`OovPolicy::Reserved`]).
    pub fn new(vocab_size: usize, dim: usize, oov: OovPolicy, vb: VarBuilder) -> Result<Self> {
        let embeddings = embedding(table_rows(vocab_size, oov), dim, vb)?;
        Ok(Self {
            embeddings,
            vocab_size,
            oov,
        })
    }

    /// Wrap a fixed, pretrained `(rows, dim)` matrix.
    ///
    /// The matrix is not registered as a variable, so an optimizer over the
    /// model's `VarMap` leaves it untouched. Under [`OovPolicy::Reserved`] the
    /// last row is the unknown vector.
    pub fn from_pretrained(weights: Tensor, oov: OovPolicy) -> Result<Self> {
        let (rows, dim) = weights.dims2()?;
        let vocab_size = match oov {
            OovPolicy::Reserved => rows.checked_sub(1),
            OovPolicy::Error => Some(rows),
        };
        let vocab_size = vocab_size
            .filter(|&v| v > 0)
            .ok_or_else(|| Error::config(format!("pretrained table with {rows} rows is too small")))?;
        Ok(Self {
            embeddings: Embedding::new(weights, dim),
            vocab_size,
            oov,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn dim(&self) -> usize {
        self.embeddings.hidden_size()
    }

    pub fn weights(&self) -> &Tensor {
        self.embeddings.embeddings()
    }

    /// Map raw ids to table rows, applying the OOV policy.
    pub fn resolve(&self, ids: &[u32]) -> Result<Vec<u32>> {
        resolve_ids("vocabulary", "node", ids, self.vocab_size, self.oov)
    }

    /// `(ids.len(), dim)` embeddings.
    pub fn lookup(&self, ids: &[u32]) -> Result<Tensor> {
        let rows = self.resolve(ids)?;
        let n = rows.len();
        let rows = Tensor::from_vec(rows, n, self.weights().device())?;
        Ok(self.embeddings.forward(&rows)?)
    }
}

/// Fixed `[[0, s], [s, 0]]` table: unselected nodes get row 0, selected row 1.
#[derive(Debug, Clone)]
pub struct SelectorEmbedding {
    table: Tensor,
}

impl SelectorEmbedding {
    pub const DIM: usize = 2;

    pub fn new(scale: f32, dtype: DType, device: &Device) -> Result<Self> {
        let table = Tensor::from_vec(vec![0.0, scale, scale, 0.0], (2, 2), device)?.to_dtype(dtype)?;
        Ok(Self { table })
    }

    /// `(selectors.len(), 2)` selector vectors.
    pub fn lookup(&self, selectors: &[bool]) -> Result<Tensor> {
        let rows: Vec<u32> = selectors.iter().map(|&s| u32::from(s)).collect();
        let n = rows.len();
        let rows = Tensor::from_vec(rows, n, self.table.device())?;
        Ok(self.table.index_select(&rows, 0)?)
    }
}

/// Edge position embeddings.
#[derive(Debug, Clone)]
pub struct PositionEmbeddingTable {
    table: Tensor,
    max_positions: usize,
    oov: OovPolicy,
}

impl PositionEmbeddingTable {
    pub fn new(config: &PositionConfig, dim: usize, vb: VarBuilder) -> Result<Self> {
        let rows = table_rows(config.max_positions, config.oov);
        let table = match config.init {
            PositionInit::Learned => embedding(rows, dim, vb)?.embeddings().clone(),
            PositionInit::Sinusoidal => sinusoidal_table(rows, dim, vb.device())?.to_dtype(vb.dtype())?,
        };
        Ok(Self {
            table,
            max_positions: config.max_positions,
            oov: config.oov,
        })
    }

    pub fn max_positions(&self) -> usize {
        self.max_positions
    }

    pub fn table(&self) -> &Tensor {
        &self.table
    }

    pub fn resolve(&self, positions: &[u32]) -> Result<Vec<u32>> {
        resolve_ids("position", "edge", positions, self.max_positions, self.oov)
    }

    /// `(positions.len(), dim)` position vectors.
    pub fn lookup(&self, positions: &[u32]) -> Result<Tensor> {
        let rows = self.resolve(positions)?;
        let n = rows.len();
        let rows = Tensor::from_vec(rows, n, self.table.device())?;
        Ok(self.table.index_select(&rows, 0)?)
    }
}

/// Transformer-style table: `pe[p, 2i] = sin(p / 10000^(2i/d))`,
/// `pe[p, 2i+1] = cos(p / 10000^(2i/d))`.
fn sinusoidal_table(rows: usize, dim: usize, device: &Device) -> Result<Tensor> {
    let mut data = Vec::with_capacity(rows * dim);
    for p in 0..rows {
        for j in 0..dim {
            let pair = (j / 2) as f64;
            let angle = p as f64 / 10_000f64.powf(2.0 * pair / dim as f64);
            let v = if j % 2 == 0 { angle.sin() } else { angle.cos() };
            data.push(v as f32);
        }
    }
    Ok(Tensor::from_vec(data, (rows, dim), device)?)
}
