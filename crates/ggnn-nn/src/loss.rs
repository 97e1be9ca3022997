//! Supervised losses per head and their weighted combination.

use crate::config::{GgnnConfig, TaskKind};
use crate::error::{Error, Result};
use crate::numeric::ensure_finite;
use crate::readout::HeadOutput;
use candle_core::{DType, Tensor};
use candle_nn::loss;
use ggnn_core::{LabelColumn, LabelData, ShapeError};
use std::collections::BTreeMap;

fn mismatch(output: &HeadOutput, reason: String) -> Error {
    ShapeError::LabelMismatch {
        task: output.name.clone(),
        reason,
    }
    .into()
}

/// Check that `labels` can score `output`: same level, one row per
/// prediction, a label kind matching the task, and widths or class ids that
/// fit the head.
pub(crate) fn check_labels(output: &HeadOutput, labels: &LabelColumn) -> Result<()> {
    let level = output.level.label_level();
    if labels.level != level {
        return Err(mismatch(
            output,
            format!("head predicts at {level:?} level but labels are at {:?} level", labels.level),
        ));
    }
    let (rows, width) = output.logits.dims2()?;
    if labels.data.rows() != rows {
        return Err(mismatch(
            output,
            format!("{rows} predictions but {} label rows", labels.data.rows()),
        ));
    }
    match (output.task, &labels.data) {
        (TaskKind::Classification, LabelData::Classes(classes)) => {
            if let Some((row, &c)) = classes.iter().enumerate().find(|&(_, &c)| c as usize >= width) {
                return Err(mismatch(output, format!("row {row} has class {c}, head has {width} classes")));
            }
        }
        (TaskKind::Regression, LabelData::Values { width: w, .. }) => {
            if *w != width {
                return Err(mismatch(output, format!("head predicts {width} values, labels carry {w}")));
            }
        }
        (TaskKind::Classification, LabelData::Values { .. }) => {
            return Err(mismatch(output, "classification head given regression values".to_string()));
        }
        (TaskKind::Regression, LabelData::Classes(_)) => {
            return Err(mismatch(output, "regression head given class labels".to_string()));
        }
    }
    Ok(())
}

/// Scalar loss of one head: mean cross-entropy or mean squared error.
pub fn head_loss(output: &HeadOutput, labels: &LabelColumn) -> Result<Tensor> {
    check_labels(output, labels)?;
    let device = output.logits.device();
    let value = match &labels.data {
        LabelData::Classes(classes) => {
            let targets = Tensor::from_slice(classes, classes.len(), device)?;
            loss::cross_entropy(&output.logits, &targets)?
        }
        LabelData::Values { values, width } => {
            let targets = Tensor::from_slice(values, (values.len() / width, *width), device)?
                .to_dtype(output.logits.dtype())?;
            loss::mse(&output.logits, &targets)?
        }
    };
    Ok(value)
}

/// Total loss plus the unweighted value of every component.
#[derive(Debug, Clone)]
pub struct LossBreakdown {
    /// Scalar to differentiate.
    pub total: Tensor,
    /// Head name -> unweighted loss.
    pub components: BTreeMap<String, f64>,
}

impl LossBreakdown {
    pub fn total_value(&self) -> Result<f64> {
        scalar(&self.total)
    }
}

/// `total = main + Σ weight_i * aux_i` with static weights.
#[derive(Debug, Clone, Default)]
pub struct LossCombiner {
    weights: BTreeMap<String, f32>,
}

impl LossCombiner {
    /// Fails with [`Error::Config`] on a negative or non-finite weight.
    pub fn new<S: Into<String>>(weights: impl IntoIterator<Item = (S, f32)>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for (name, weight) in weights {
            let name = name.into();
            if !weight.is_finite() || weight < 0.0 {
                return Err(Error::config(format!("loss weight for '{name}' must be >= 0, got {weight}")));
            }
            map.insert(name, weight);
        }
        Ok(Self { weights: map })
    }

    /// Weights of the auxiliary heads in `config`.
    pub fn from_config(config: &GgnnConfig) -> Result<Self> {
        Self::new(config.aux_heads.iter().map(|(name, head)| (name.clone(), head.weight)))
    }

    pub fn weight(&self, name: &str) -> Option<f32> {
        self.weights.get(name).copied()
    }

    /// Combine the primary loss with auxiliary losses keyed by head name.
    ///
    /// Every auxiliary loss must have a registered weight. A non-finite total
    /// is reported as [`Error::NumericInstability`].
    pub fn combine(&self, main_name: &str, main: &Tensor, aux: &BTreeMap<String, Tensor>) -> Result<LossBreakdown> {
        let mut components = BTreeMap::new();
        components.insert(main_name.to_string(), scalar(main)?);

        let mut total = main.clone();
        for (name, value) in aux {
            let weight = self
                .weight(name)
                .ok_or_else(|| Error::config(format!("no loss weight registered for head '{name}'")))?;
            components.insert(name.clone(), scalar(value)?);
            total = (total + value.affine(f64::from(weight), 0.0)?)?;
        }

        ensure_finite(&total, "loss", None)?;
        Ok(LossBreakdown { total, components })
    }
}

fn scalar(t: &Tensor) -> Result<f64> {
    Ok(f64::from(t.to_dtype(DType::F32)?.to_scalar::<f32>()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReadoutLevel;
    use candle_core::Device;
    use ggnn_core::LabelLevel;

    fn head(task: TaskKind, logits: Tensor) -> HeadOutput {
        HeadOutput {
            name: "main".into(),
            level: ReadoutLevel::Graph,
            task,
            logits,
        }
    }

    fn graph_column(data: LabelData) -> LabelColumn {
        LabelColumn {
            level: LabelLevel::Graph,
            data,
        }
    }

    #[test]
    fn cross_entropy_of_uniform_logits_is_log_c() {
        let logits = Tensor::zeros((2, 4), DType::F32, &Device::Cpu).unwrap();
        let out = head(TaskKind::Classification, logits);
        let l = head_loss(&out, &graph_column(LabelData::Classes(vec![0, 3]))).unwrap();
        let v = l.to_scalar::<f32>().unwrap();
        assert!((v - 4f32.ln()).abs() < 1e-5, "{v}");
    }

    #[test]
    fn mse_of_regression_head() {
        let logits = Tensor::new(&[[1f32], [3.]], &Device::Cpu).unwrap();
        let out = head(TaskKind::Regression, logits);
        let labels = graph_column(LabelData::Values {
            values: vec![0.0, 1.0],
            width: 1,
        });
        let v = head_loss(&out, &labels).unwrap().to_scalar::<f32>().unwrap();
        assert!((v - 2.5).abs() < 1e-6);
    }

    #[test]
    fn mismatched_labels_are_shape_errors() {
        let logits = Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap();
        let out = head(TaskKind::Classification, logits);

        let out_of_range = graph_column(LabelData::Classes(vec![0, 3]));
        let too_few = graph_column(LabelData::Classes(vec![0]));
        let wrong_kind = graph_column(LabelData::Values {
            values: vec![0.0; 6],
            width: 3,
        });
        let wrong_level = LabelColumn {
            level: LabelLevel::Node,
            data: LabelData::Classes(vec![0, 1]),
        };
        for labels in [out_of_range, too_few, wrong_kind, wrong_level] {
            assert!(head_loss(&out, &labels).unwrap_err().is_shape());
        }
    }

    #[test]
    fn combine_weights_aux_losses() {
        let device = Device::Cpu;
        let combiner = LossCombiner::new([("aux", 0.5f32)]).unwrap();
        let main = Tensor::new(2f32, &device).unwrap();
        let aux = BTreeMap::from([("aux".to_string(), Tensor::new(4f32, &device).unwrap())]);
        let breakdown = combiner.combine("main", &main, &aux).unwrap();
        assert!((breakdown.total_value().unwrap() - 4.0).abs() < 1e-6);
        assert_eq!(breakdown.components["aux"], 4.0);
        assert_eq!(breakdown.components["main"], 2.0);
    }

    #[test]
    fn negative_weight_is_a_config_error() {
        assert!(LossCombiner::new([("aux", -1.0f32)]).unwrap_err().is_config());
        assert!(LossCombiner::new([("aux", f32::NAN)]).unwrap_err().is_config());
    }

    #[test]
    fn non_finite_total_is_reported() {
        let device = Device::Cpu;
        let combiner = LossCombiner::default();
        let main = Tensor::new(f32::INFINITY, &device).unwrap();
        let err = combiner.combine("main", &main, &BTreeMap::new()).unwrap_err();
        assert!(err.is_numeric());
    }

    #[test]
    fn unregistered_aux_loss_is_rejected() {
        let device = Device::Cpu;
        let combiner = LossCombiner::default();
        let main = Tensor::new(1f32, &device).unwrap();
        let aux = BTreeMap::from([("other".to_string(), Tensor::new(1f32, &device).unwrap())]);
        assert!(combiner.combine("main", &main, &aux).unwrap_err().is_config());
    }
}
