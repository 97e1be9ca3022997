//! Device-side view of a [`GraphBatch`].
//!
//! Built once per forward pass and shared by every round: index tensors for
//! each non-empty edge slot, the resolved position vectors, the inverse
//! in-degree used by mean message aggregation, and the graph segments used
//! by readout.

use crate::config::Aggregation;
use crate::embedding::PositionEmbeddingTable;
use crate::error::{Error, Result};
use crate::transform::{Direction, EdgeSlot};
use candle_core::{Device, Tensor};
use ggnn_core::{GraphBatch, ShapeError};

/// Edges of one slot, ready for gather/scatter.
#[derive(Debug, Clone)]
pub struct EdgeTensors {
    pub slot: EdgeSlot,
    /// Node each message is read from, `(E,)` u32.
    pub sources: Tensor,
    /// Node each message is delivered to, `(E,)` u32.
    pub targets: Tensor,
    /// Position vectors `(E, hidden)` when position embeddings are enabled.
    pub positions: Option<Tensor>,
    pub len: usize,
}

/// Graph membership of every node.
#[derive(Debug, Clone)]
pub struct Segments {
    ids: Tensor,
    counts: Vec<usize>,
    counts_tensor: Tensor,
}

impl Segments {
    /// Segments from per-node graph ids. Every graph must own a node.
    pub fn new(segment_ids: &[u32], num_graphs: usize, device: &Device) -> Result<Self> {
        let mut counts = vec![0usize; num_graphs];
        for (node, &s) in segment_ids.iter().enumerate() {
            match counts.get_mut(s as usize) {
                Some(c) => *c += 1,
                None => {
                    return Err(ShapeError::SegmentOutOfRange {
                        node,
                        segment: s,
                        num_graphs,
                    }
                    .into())
                }
            }
        }
        if let Some(graph) = counts.iter().position(|&c| c == 0) {
            return Err(ShapeError::EmptyGraph { graph }.into());
        }
        let ids = Tensor::from_slice(segment_ids, segment_ids.len(), device)?;
        let as_f32: Vec<f32> = counts.iter().map(|&c| c as f32).collect();
        let counts_tensor = Tensor::from_vec(as_f32, (num_graphs, 1), device)?;
        Ok(Self {
            ids,
            counts,
            counts_tensor,
        })
    }

    pub fn from_batch(batch: &GraphBatch, device: &Device) -> Result<Self> {
        Self::new(batch.segment_ids(), batch.num_graphs(), device)
    }

    pub fn num_graphs(&self) -> usize {
        self.counts.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn ids(&self) -> &Tensor {
        &self.ids
    }

    /// Per-graph sum of node rows: `(N, C) -> (G, C)`.
    pub fn sum(&self, x: &Tensor) -> Result<Tensor> {
        let (n, c) = x.dims2()?;
        if n != self.num_nodes() {
            return Err(ShapeError::LengthMismatch {
                what: "node rows for segment reduction",
                expected: self.num_nodes(),
                got: n,
            }
            .into());
        }
        let zeros = Tensor::zeros((self.num_graphs(), c), x.dtype(), x.device())?;
        Ok(zeros.index_add(&self.ids, x, 0)?)
    }

    /// Per-graph mean of node rows.
    pub fn mean(&self, x: &Tensor) -> Result<Tensor> {
        let counts = self.counts_tensor.to_dtype(x.dtype())?;
        Ok(self.sum(x)?.broadcast_div(&counts)?)
    }

    pub fn reduce(&self, x: &Tensor, aggregation: Aggregation) -> Result<Tensor> {
        match aggregation {
            Aggregation::Sum => self.sum(x),
            Aggregation::Mean => self.mean(x),
        }
    }
}

/// Everything a forward pass needs from the batch, on one device.
#[derive(Debug, Clone)]
pub struct BatchTensors {
    pub edges: Vec<EdgeTensors>,
    pub segments: Segments,
    /// `1 / max(in_degree, 1)` per node, `(N, 1)`, for mean aggregation.
    pub inverse_in_degree: Option<Tensor>,
    pub num_nodes: usize,
}

impl BatchTensors {
    /// Upload `batch` for the given slots. Slots without edges are dropped,
    /// so they contribute exactly nothing to any round.
    pub fn new(
        batch: &GraphBatch,
        slots: &[EdgeSlot],
        positions: Option<&PositionEmbeddingTable>,
        aggregation: Aggregation,
        device: &Device,
    ) -> Result<Self> {
        let num_nodes = batch.num_nodes();
        let mut edges = Vec::with_capacity(slots.len());
        let mut in_degree = vec![0u32; num_nodes];

        for &slot in slots {
            let list = batch.edges(slot.edge_type);
            if list.is_empty() {
                continue;
            }
            let (sources, targets) = match slot.direction {
                Direction::Forward => (&list.sources, &list.targets),
                Direction::Backward => (&list.targets, &list.sources),
            };
            for (edge, (&s, &t)) in sources.iter().zip(targets).enumerate() {
                if s as usize >= num_nodes {
                    return Err(out_of_range(slot, edge, s, num_nodes));
                }
                match in_degree.get_mut(t as usize) {
                    Some(d) => *d += 1,
                    None => return Err(out_of_range(slot, edge, t, num_nodes)),
                }
            }
            let positions = positions.map(|table| table.lookup(&list.positions)).transpose()?;
            edges.push(EdgeTensors {
                slot,
                sources: Tensor::from_slice(sources, list.len(), device)?,
                targets: Tensor::from_slice(targets, list.len(), device)?,
                positions,
                len: list.len(),
            });
        }

        let inverse_in_degree = match aggregation {
            Aggregation::Sum => None,
            Aggregation::Mean => {
                let inv: Vec<f32> = in_degree.iter().map(|&d| 1.0 / d.max(1) as f32).collect();
                Some(Tensor::from_vec(inv, (num_nodes, 1), device)?)
            }
        };

        Ok(Self {
            edges,
            segments: Segments::from_batch(batch, device)?,
            inverse_in_degree,
            num_nodes,
        })
    }

    /// Number of edges per slot that will carry messages.
    pub fn edge_counts(&self) -> Vec<(EdgeSlot, usize)> {
        self.edges.iter().map(|e| (e.slot, e.len)).collect()
    }
}

fn out_of_range(slot: EdgeSlot, edge: usize, node: u32, num_nodes: usize) -> Error {
    ShapeError::EdgeOutOfRange {
        graph: None,
        edge_type: slot.edge_type,
        edge,
        node,
        num_nodes,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ggnn_core::{BatchAssembler, Edge, EdgeType, Graph, Node};

    fn two_graphs() -> GraphBatch {
        let mut a = Graph::new();
        for i in 0..3 {
            a.add_node(Node::new(i));
        }
        a.add_edge(Edge::new(0, 2, EdgeType::Control));
        a.add_edge(Edge::new(1, 2, EdgeType::Data));
        let mut b = Graph::new();
        b.add_node(Node::new(0));
        BatchAssembler::new().assemble_unlabeled(&[a, b]).unwrap()
    }

    #[test]
    fn drops_empty_slots_and_reverses_backward_edges() {
        let batch = two_graphs();
        let slots = [
            EdgeSlot::forward(EdgeType::Control),
            EdgeSlot::forward(EdgeType::Call),
            EdgeSlot::backward(EdgeType::Control),
        ];
        let t = BatchTensors::new(&batch, &slots, None, Aggregation::Sum, &Device::Cpu).unwrap();
        assert_eq!(t.edge_counts(), vec![(slots[0], 1), (slots[2], 1)]);
        assert_eq!(t.edges[1].sources.to_vec1::<u32>().unwrap(), vec![2]);
        assert_eq!(t.edges[1].targets.to_vec1::<u32>().unwrap(), vec![0]);
        assert!(t.inverse_in_degree.is_none());
    }

    #[test]
    fn inverse_in_degree_counts_all_slots() {
        let batch = two_graphs();
        let slots = [EdgeSlot::forward(EdgeType::Control), EdgeSlot::forward(EdgeType::Data)];
        let t = BatchTensors::new(&batch, &slots, None, Aggregation::Mean, &Device::Cpu).unwrap();
        let inv = t.inverse_in_degree.unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(inv, vec![1.0, 1.0, 0.5, 1.0]);
    }

    #[test]
    fn segment_sum_and_mean() {
        let device = Device::Cpu;
        let seg = Segments::new(&[0, 1, 0], 2, &device).unwrap();
        let x = Tensor::new(&[[1f32, 2.], [10., 20.], [3., 4.]], &device).unwrap();
        assert_eq!(seg.sum(&x).unwrap().to_vec2::<f32>().unwrap(), vec![vec![4., 6.], vec![10., 20.]]);
        assert_eq!(seg.mean(&x).unwrap().to_vec2::<f32>().unwrap(), vec![vec![2., 3.], vec![10., 20.]]);
    }

    #[test]
    fn segment_without_nodes_is_a_shape_error() {
        let err = Segments::new(&[0, 0], 2, &Device::Cpu).unwrap_err();
        assert!(err.is_shape());
    }
}
