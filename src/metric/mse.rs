//! Mean square error (MSE) metric.

pub use super::*;

/// Computing the mean square error (MSE) between the inputs:
///
/// `mean((value - target) ^ 2)`
#[derive(Clone, Copy, Debug, Default)]
pub struct MeanSquareError;

impl MeanSquareError {
    #[inline]
    pub fn init() -> Self {
        Self
    }
}

impl<B: Backend> Metric<B> for MeanSquareError {
    #[inline]
    fn evaluate<const D: usize>(
        &self,
        value: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> Tensor<B, 1> {
        value.sub(target).powf_scalar(2.0).mean()
    }
}
