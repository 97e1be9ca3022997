//! Per-relation message transforms.
//!
//! Every edge type (and, with backward edges enabled, every reversed edge
//! type) owns an independent `Linear(hidden -> hidden)`. Dispatch is a table
//! lookup keyed by [`EdgeSlot::index`], the same idea as one weight matrix
//! per relation in R-GCN.

use crate::config::GgnnConfig;
use crate::error::Result;
use candle_core::Tensor;
use candle_nn::{linear, linear_no_bias, Linear, Module, VarBuilder};
use ggnn_core::EdgeType;
use std::fmt;

/// Direction messages travel along an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Source to target.
    Forward,
    /// Target to source.
    Backward,
}

/// A relation as seen by the engine: edge type plus direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeSlot {
    pub edge_type: EdgeType,
    pub direction: Direction,
}

impl EdgeSlot {
    pub const COUNT: usize = EdgeType::COUNT * 2;

    pub fn forward(edge_type: EdgeType) -> Self {
        Self {
            edge_type,
            direction: Direction::Forward,
        }
    }

    pub fn backward(edge_type: EdgeType) -> Self {
        Self {
            edge_type,
            direction: Direction::Backward,
        }
    }

    pub fn index(self) -> usize {
        match self.direction {
            Direction::Forward => self.edge_type.index(),
            Direction::Backward => EdgeType::COUNT + self.edge_type.index(),
        }
    }

    /// Slots that carry messages under `config`, forward slots first.
    pub fn enabled(config: &GgnnConfig) -> Vec<EdgeSlot> {
        let mut slots: Vec<EdgeSlot> = config.edge_types.iter().copied().map(Self::forward).collect();
        if config.backward_edges {
            slots.extend(config.edge_types.iter().copied().map(Self::backward));
        }
        slots
    }
}

impl fmt::Display for EdgeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Forward => write!(f, "{}", self.edge_type),
            Direction::Backward => write!(f, "{}_rev", self.edge_type),
        }
    }
}

/// One learned linear map per enabled [`EdgeSlot`].
#[derive(Debug, Clone)]
pub struct LinearTransformBank {
    transforms: [Option<Linear>; EdgeSlot::COUNT],
}

impl LinearTransformBank {
    /// Create transforms for `slots`, stored under `vb.pp(<slot name>)`.
    ///
    /// # Arguments
    /// - `slots`: Edge slots that get a transform; any other slot has none
    /// - `hidden`: Node state dimension, both input and output of each map
    /// - `bias`: Whether each transform has a bias term
    /// - `vb`: Variable builder for parameter initialization
    pub fn new(slots: &[EdgeSlot], hidden: usize, bias: bool, vb: VarBuilder) -> Result<Self> {
        let mut transforms: [Option<Linear>; EdgeSlot::COUNT] = Default::default();
        for &slot in slots {
            let vb = vb.pp(slot.to_string());
            let w = if bias {
                linear(hidden, hidden, vb)?
            } else {
                linear_no_bias(hidden, hidden, vb)?
            };
            transforms[slot.index()] = Some(w);
        }
        Ok(Self { transforms })
    }

    pub fn get(&self, slot: EdgeSlot) -> Option<&Linear> {
        self.transforms[slot.index()].as_ref()
    }

    pub fn contains(&self, slot: EdgeSlot) -> bool {
        self.get(slot).is_some()
    }

    /// Messages `W_slot h[source]` for every edge, `(E, hidden)`.
    ///
    /// Returns `None` when the slot has no transform.
    pub fn message(&self, slot: EdgeSlot, states: &Tensor, sources: &Tensor) -> Result<Option<Tensor>> {
        let Some(w) = self.get(slot) else {
            return Ok(None);
        };
        let gathered = states.index_select(sources, 0)?;
        Ok(Some(w.forward(&gathered)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn slot_indices_are_distinct() {
        let mut seen = [false; EdgeSlot::COUNT];
        for t in EdgeType::ALL {
            for slot in [EdgeSlot::forward(t), EdgeSlot::backward(t)] {
                assert!(!seen[slot.index()]);
                seen[slot.index()] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn enabled_slots_follow_config() {
        let config = GgnnConfig::default().with_edge_types([EdgeType::Data]);
        assert_eq!(EdgeSlot::enabled(&config), vec![EdgeSlot::forward(EdgeType::Data)]);
        let config = config.with_backward_edges(true);
        assert_eq!(
            EdgeSlot::enabled(&config),
            vec![EdgeSlot::forward(EdgeType::Data), EdgeSlot::backward(EdgeType::Data)]
        );
    }

    #[test]
    fn message_gathers_then_transforms() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let slots = [EdgeSlot::forward(EdgeType::Control)];
        let bank = LinearTransformBank::new(&slots, 4, false, vb).unwrap();

        let states = Tensor::randn(0f32, 1f32, (3, 4), &device).unwrap();
        let sources = Tensor::new(&[2u32, 2, 0], &device).unwrap();
        let msg = bank.message(slots[0], &states, &sources).unwrap().unwrap();
        assert_eq!(msg.dims(), &[3, 4]);

        let rows = msg.to_vec2::<f32>().unwrap();
        assert_eq!(rows[0], rows[1]);

        let direct = bank
            .get(slots[0])
            .unwrap()
            .forward(&states.get(0).unwrap().unsqueeze(0).unwrap())
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        for (a, b) in rows[2].iter().zip(&direct[0]) {
            assert!((a - b).abs() < 1e-5);
        }

        let call = EdgeSlot::forward(EdgeType::Call);
        assert!(bank.message(call, &states, &sources).unwrap().is_none());
    }
}
