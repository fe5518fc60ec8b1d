//! ## Notice
//!
//! The module was adapted from the [source code of Burn v0.14.0](
//! https://github.com/tracel-ai/burn/blob/v0.14.0/crates/burn-core/src/optim/adam.rs).
//!
//! Differences between the original module and this adaptation include:
//! 1. Improved accessibility: All structs and properties being public, so
//!    that redistribution can migrate the momenta between workers.
//! 2. Plain backend tensors: The gradients come from the rasterization
//!    kernel's backward pass, not from an autodiff graph.
//!
//! ## License
//!
//! MIT License
//!
//! Copyright (c) 2022 Nathaniel Simard & Burn Framework Contributors

pub use burn::{
    config::Config,
    record::Record,
    tensor::{backend::Backend, Tensor},
};

/// Adam optimizer as described in the paper:
/// ["Adam: A Method for Stochastic Optimization"](https://arxiv.org/pdf/1412.6980.pdf).
#[derive(Clone, Debug)]
pub struct Adam<B: Backend, const D: usize> {
    pub config: AdamConfig,
    pub record: AdamRecord<B, D>,
}

#[derive(Config, Copy, Debug, PartialEq)]
pub struct AdamConfig {
    /// The coefficient used for computing running average of gradient.
    #[config(default = "0.9")]
    pub beta_1: f64,

    /// The coefficient used for computing running average of squared gradient.
    #[config(default = "0.999")]
    pub beta_2: f64,

    /// A value added to the denominator to improve numerical stability.
    #[config(default = "1e-8")]
    pub epsilon: f64,

    /// L2 penalty.
    pub weight_decay: Option<f64>,
}

pub type AdamRecord<B, const D: usize> = Option<AdamState<B, D>>;

#[derive(Clone, Debug, Record)]
pub struct AdamState<B: Backend, const D: usize> {
    pub moment_1: Tensor<B, D>,
    pub moment_2: Tensor<B, D>,
    pub time: i32,
}

impl AdamConfig {
    /// ## Returns
    ///
    /// An optimizer that can be used to optimize a value.
    pub fn init<B: Backend, const D: usize>(self) -> Adam<B, D> {
        Adam {
            config: self,
            record: None,
        }
    }
}

impl<B: Backend, const D: usize> Adam<B, D> {
    /// ## Arguments
    ///
    /// * `learning_rate` - The number to multiply the gradient by.
    /// * `value` - The value to optimize.
    /// * `grad` - The gradient of the value.
    ///
    /// ## Returns
    ///
    /// The optimized value.
    pub fn update(
        &mut self,
        learning_rate: f64,
        value: Tensor<B, D>,
        mut grad: Tensor<B, D>,
    ) -> Tensor<B, D> {
        if let Some(weight_decay) = self.config.weight_decay {
            grad = grad + value.to_owned() * weight_decay;
        }

        let mut moment_1 = grad.to_owned() * (1.0 - self.config.beta_1);
        let mut moment_2 = grad.powf_scalar(2.0) * (1.0 - self.config.beta_2);
        let mut time = 1;

        if let Some(record) = &self.record {
            moment_1 = moment_1 + record.moment_1.to_owned() * self.config.beta_1;
            moment_2 = moment_2 + record.moment_2.to_owned() * self.config.beta_2;
            time += record.time;
        }

        self.record = Some(AdamState {
            moment_1: moment_1.to_owned(),
            moment_2: moment_2.to_owned(),
            time,
        });

        let moment_1_corrected = moment_1 / (1.0 - self.config.beta_1.powi(time));
        let moment_2_corrected = moment_2 / (1.0 - self.config.beta_2.powi(time));
        let grad_corrected =
            moment_1_corrected / (moment_2_corrected.sqrt() + self.config.epsilon);

        value - grad_corrected * learning_rate
    }

    pub fn to_device(
        mut self,
        device: &B::Device,
    ) -> Self {
        self.record = self.record.map(|mut record| {
            record.moment_1 = record.moment_1.to_device(device);
            record.moment_2 = record.moment_2.to_device(device);
            record
        });

        self
    }

    #[inline]
    pub fn load_record(
        &mut self,
        record: AdamRecord<B, D>,
    ) -> &mut Self {
        self.record = record;
        self
    }

    #[inline]
    pub fn into_record(self) -> AdamRecord<B, D> {
        self.record
    }
}

impl<B: Backend, const D: usize> Default for Adam<B, D> {
    #[inline]
    fn default() -> Self {
        AdamConfig::default().init()
    }
}

impl Default for AdamConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn first_update_follows_gradient_sign() {
        let device = Default::default();

        let learning_rate = 0.01;
        let mut optimizer = AdamConfig::new()
            .with_epsilon(1e-8)
            .init::<NdArray, 1>();

        let value =
            Tensor::<NdArray, 1>::from_floats([1.0, -2.0, 0.5], &device);
        let grad = Tensor::from_floats([4.0, -2.0, 0.0], &device);

        let output = optimizer
            .update(learning_rate, value, grad)
            .into_data();

        // On the first step, the bias-corrected update is `sign(grad) * lr`.
        let target = burn::tensor::TensorData::from([
            1.0 - 0.01_f32,
            -2.0 + 0.01,
            0.5,
        ]);
        output.assert_approx_eq(&target, 5);

        let record = optimizer.record.as_ref().unwrap();
        assert_eq!(record.time, 1);
    }

    #[test]
    fn without_nans() {
        let device = Default::default();

        let mut optimizer = AdamConfig::new()
            .with_weight_decay(Some(0.5))
            .init::<NdArray, 2>();

        let mut value =
            Tensor::<NdArray, 2>::from_floats([[0.1, -0.4], [0.0, 2.0]], &device);
        let grad = Tensor::from_floats([[1.0, 0.0], [-3.0, 0.25]], &device);

        for _ in 0..3 {
            value = optimizer.update(0.01, value, grad.to_owned());
        }

        let target = true;
        let output = value.is_nan().bool_not().all().into_scalar();
        assert_eq!(output, target);
    }
}
