//! Mean absolute error (MAE) metric.

pub use super::*;

/// Computing the mean absolute error (MAE) between the inputs:
///
/// `mean(abs(value - target))`
#[derive(Clone, Copy, Debug, Default)]
pub struct MeanAbsoluteError;

impl MeanAbsoluteError {
    #[inline]
    pub fn init() -> Self {
        Self
    }
}

impl<B: Backend> Metric<B> for MeanAbsoluteError {
    #[inline]
    fn evaluate<const D: usize>(
        &self,
        value: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> Tensor<B, 1> {
        value.sub(target).abs().mean()
    }
}
