//! Evaluation statistics from predictions and labels.
//!
//! Classification heads report accuracy, per-class precision / recall / f1 /
//! support, and support-weighted averages of the per-class scores.
//! Regression heads report mean squared and mean absolute error. Metric names
//! are `"<head>/<metric>"`, per-class ones `"<head>/class_<c>/<metric>"`.

use crate::error::Result;
use crate::loss::check_labels;
use crate::readout::HeadOutput;
use candle_core::DType;
use ggnn_core::{LabelColumn, LabelData};
use std::collections::BTreeMap;

/// Per-class counts of a confusion matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ClassCounts {
    true_positive: usize,
    false_positive: usize,
    false_negative: usize,
}

impl ClassCounts {
    fn support(&self) -> usize {
        self.true_positive + self.false_negative
    }

    fn precision(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_positive)
    }

    fn recall(&self) -> f64 {
        ratio(self.true_positive, self.support())
    }

    fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Stateless metrics evaluator. Calling it twice on the same inputs gives
/// the same numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsComputer;

impl MetricsComputer {
    pub fn new() -> Self {
        Self
    }

    /// Metrics of one head against its labels.
    pub fn compute(&self, output: &HeadOutput, labels: &LabelColumn) -> Result<BTreeMap<String, f64>> {
        check_labels(output, labels)?;
        let mut metrics = BTreeMap::new();
        match &labels.data {
            LabelData::Classes(targets) => {
                let predicted = output.predicted_classes()?;
                let num_classes = output.logits.dims2()?.1;
                classification(&output.name, &predicted, targets, num_classes, &mut metrics);
            }
            LabelData::Values { values, .. } => {
                let predicted = output.logits.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()?;
                regression(&output.name, &predicted, values, &mut metrics);
            }
        }
        Ok(metrics)
    }
}

fn classification(
    name: &str,
    predicted: &[u32],
    targets: &[u32],
    num_classes: usize,
    metrics: &mut BTreeMap<String, f64>,
) {
    let mut counts = vec![ClassCounts::default(); num_classes];
    let mut correct = 0usize;
    for (&p, &t) in predicted.iter().zip(targets) {
        if p == t {
            correct += 1;
            counts[t as usize].true_positive += 1;
        } else {
            counts[p as usize].false_positive += 1;
            counts[t as usize].false_negative += 1;
        }
    }

    metrics.insert(format!("{name}/accuracy"), ratio(correct, targets.len()));

    let total_support: usize = counts.iter().map(ClassCounts::support).sum();
    let (mut precision, mut recall, mut f1) = (0.0, 0.0, 0.0);
    for (class, c) in counts.iter().enumerate() {
        let support = c.support();
        metrics.insert(format!("{name}/class_{class}/precision"), c.precision());
        metrics.insert(format!("{name}/class_{class}/recall"), c.recall());
        metrics.insert(format!("{name}/class_{class}/f1"), c.f1());
        metrics.insert(format!("{name}/class_{class}/support"), support as f64);

        let w = ratio(support, total_support);
        precision += w * c.precision();
        recall += w * c.recall();
        f1 += w * c.f1();
    }
    metrics.insert(format!("{name}/precision"), precision);
    metrics.insert(format!("{name}/recall"), recall);
    metrics.insert(format!("{name}/f1"), f1);
}

fn regression(name: &str, predicted: &[f32], targets: &[f32], metrics: &mut BTreeMap<String, f64>) {
    let n = targets.len().max(1) as f64;
    let (mut se, mut ae) = (0.0f64, 0.0f64);
    for (&p, &t) in predicted.iter().zip(targets) {
        let d = f64::from(p) - f64::from(t);
        se += d * d;
        ae += d.abs();
    }
    metrics.insert(format!("{name}/mse"), se / n);
    metrics.insert(format!("{name}/mae"), ae / n);
}
