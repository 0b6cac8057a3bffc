//! # Scores
//!
//! The forward recurrence is written once against [`Score`] and runs over two
//! number types: plain `f64` and 0-d candle [`Tensor`]s. The tensor version
//! stays attached to the autodiff graph of whatever produced its inputs, so
//! calling `backward()` on the resulting loss yields gradients for the
//! emission scorer and the transition tables.

use candle_core::{DType, Tensor};

use crate::error::{CrfError, Result};

/// Scalar operations needed by the CRF recurrences.
pub trait Score: Clone + Sized {
    /// `self + other`.
    fn plus(&self, other: &Self) -> Result<Self>;

    /// `self - other`.
    fn minus(&self, other: &Self) -> Result<Self>;

    /// Maximum of a non-empty slice.
    fn max_of(values: &[Self]) -> Result<Self>;

    /// `log(Σ exp(x_i))` of a non-empty slice, computed after subtracting
    /// the maximum so that no term overflows.
    fn log_sum_exp(values: &[Self]) -> Result<Self>;

    /// The plain numeric value, detached from any graph.
    fn value(&self) -> Result<f64>;
}

impl Score for f64 {
    #[inline]
    fn plus(&self, other: &Self) -> Result<Self> {
        Ok(self + other)
    }

    #[inline]
    fn minus(&self, other: &Self) -> Result<Self> {
        Ok(self - other)
    }

    fn max_of(values: &[Self]) -> Result<Self> {
        if values.is_empty() {
            return Err(CrfError::EmptySequence);
        }
        Ok(values.iter().copied().fold(f64::NEG_INFINITY, f64::max))
    }

    fn log_sum_exp(values: &[Self]) -> Result<Self> {
        let max = Self::max_of(values)?;
        if max == f64::NEG_INFINITY {
            return Ok(f64::NEG_INFINITY);
        }
        let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
        Ok(max + sum.ln())
    }

    #[inline]
    fn value(&self) -> Result<f64> {
        Ok(*self)
    }
}

impl Score for Tensor {
    fn plus(&self, other: &Self) -> Result<Self> {
        Ok(self.add(other)?)
    }

    fn minus(&self, other: &Self) -> Result<Self> {
        Ok(self.sub(other)?)
    }

    fn max_of(values: &[Self]) -> Result<Self> {
        Ok(stack_scalars(values)?.max(0)?)
    }

    fn log_sum_exp(values: &[Self]) -> Result<Self> {
        let stacked = stack_scalars(values)?;
        let max = stacked.max_keepdim(0)?;
        let sum = stacked.broadcast_sub(&max)?.exp()?.sum_keepdim(0)?;
        Ok(sum.log()?.add(&max)?.squeeze(0)?)
    }

    fn value(&self) -> Result<f64> {
        Ok(self.to_dtype(DType::F64)?.to_scalar::<f64>()?)
    }
}

fn stack_scalars(values: &[Tensor]) -> Result<Tensor> {
    if values.is_empty() {
        return Err(CrfError::EmptySequence);
    }
    Ok(Tensor::stack(values, 0)?)
}

/// Index and value of the maximum, keeping the lowest index on ties.
///
/// Returns `None` for an empty slice.
pub fn argmax(values: &[f64]) -> Option<(usize, f64)> {
    let mut iter = values.iter().copied().enumerate();
    let first = iter.next()?;
    Some(iter.fold(first, |best, (i, v)| if v > best.1 { (i, v) } else { best }))
}
