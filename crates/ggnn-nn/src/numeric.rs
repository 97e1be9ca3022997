//! Detection of NaN/Inf in intermediate tensors.
//!
//! Checks copy the tensor to host memory, so they are switchable through
//! `GgnnConfig::check_numerics`. Nothing is clipped or repaired here.

use crate::error::{Error, Result};
use candle_core::{DType, Tensor};

/// Switchable finite-value check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumericGuard {
    enabled: bool,
}

impl NumericGuard {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fail with [`Error::NumericInstability`] if `t` holds a non-finite value.
    pub fn check(&self, t: &Tensor, stage: &'static str, round: Option<usize>) -> Result<()> {
        if self.enabled {
            ensure_finite(t, stage, round)
        } else {
            Ok(())
        }
    }
}

/// Unconditional finite-value check; reports the first offending row.
pub fn ensure_finite(t: &Tensor, stage: &'static str, round: Option<usize>) -> Result<()> {
    let count = t.elem_count();
    if count == 0 {
        return Ok(());
    }
    let values = t.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()?;
    if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
        let width = if t.rank() >= 2 { count / t.dim(0)? } else { 1 };
        let row = pos / width;
        tracing::warn!(stage, ?round, row, "non-finite values detected");
        return Err(Error::NumericInstability { stage, round, row });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn finite_tensor_passes() {
        let t = Tensor::new(&[[1f32, 2.], [3., 4.]], &Device::Cpu).unwrap();
        assert!(ensure_finite(&t, "test", None).is_ok());
    }

    #[test]
    fn reports_row_of_first_nan() {
        let t = Tensor::new(&[[1f32, 2.], [3., f32::NAN], [f32::INFINITY, 0.]], &Device::Cpu).unwrap();
        match ensure_finite(&t, "gates", Some(3)) {
            Err(Error::NumericInstability { stage, round, row }) => {
                assert_eq!(stage, "gates");
                assert_eq!(round, Some(3));
                assert_eq!(row, 1);
            }
            other => panic!("expected numeric instability, got {other:?}"),
        }
    }

    #[test]
    fn disabled_guard_ignores_nan() {
        let t = Tensor::new(&[f32::NAN], &Device::Cpu).unwrap();
        assert!(NumericGuard::new(false).check(&t, "x", None).is_ok());
        assert!(NumericGuard::new(true).check(&t, "x", None).unwrap_err().is_numeric());
    }
}
