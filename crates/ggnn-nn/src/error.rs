//! Error types for ggnn-nn.

use ggnn_core::ShapeError;
use thiserror::Error;

/// Errors surfaced by the message-passing engine.
///
/// None of these are retried internally; the training loop decides whether
/// to drop the offending batch or abort.
#[derive(Debug, Error)]
pub enum Error {
    /// Batch, label or graph shapes violate the data contract.
    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),

    /// Invalid static configuration, detected at model construction.
    #[error("invalid config: {0}")]
    Config(String),

    /// An id fell outside an embedding table with no reserved fallback.
    #[error("{table} id {id} at {site} {index} is out of range (table size {limit})")]
    Lookup {
        table: &'static str,
        id: u32,
        site: &'static str,
        index: usize,
        limit: usize,
    },

    /// NaN or infinity appeared during the forward computation.
    #[error("non-finite values in {stage}{} at row {row}", in_round(.round))]
    NumericInstability {
        stage: &'static str,
        round: Option<usize>,
        row: usize,
    },

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

fn in_round(round: &Option<usize>) -> String {
    round.map(|r| format!(" (round {r})")).unwrap_or_default()
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn is_shape(&self) -> bool {
        matches!(self, Error::Shape(_))
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    pub fn is_lookup(&self) -> bool {
        matches!(self, Error::Lookup { .. })
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Error::NumericInstability { .. })
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
