pub use burn::tensor::{backend::Backend, Bool, Int, Tensor};

use std::fmt;

/// One worker's shard of the trainable gaussian set.
///
/// Under the tile-sharded scheme the "shard" is the full replicated set;
/// under the point-sharded scheme it holds this worker's owned rows only,
/// contiguous in the global index ordering.
#[derive(Clone)]
pub struct GaussianShard<B: Backend> {
    /// `[P, 16, 3]`
    pub colors_sh: Tensor<B, 3>,

    /// `[P, 1]`
    pub opacities: Tensor<B, 2>,

    /// `[P, 3]`
    pub positions: Tensor<B, 2>,

    /// `[P, 4]` (x, y, z, w)
    pub rotations: Tensor<B, 2>,

    /// `[P, 3]`
    pub scalings: Tensor<B, 2>,
}

impl<B: Backend> GaussianShard<B> {
    pub fn zeros(
        point_count: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            colors_sh: Tensor::zeros([point_count, 16, 3], device),
            opacities: Tensor::zeros([point_count, 1], device),
            positions: Tensor::zeros([point_count, 3], device),
            rotations: Tensor::zeros([point_count, 4], device),
            scalings: Tensor::zeros([point_count, 3], device),
        }
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.positions.dims()[0]
    }

    #[inline]
    pub fn device(&self) -> B::Device {
        self.positions.device()
    }
}

/// Per-parameter gradients produced by the rasterizer's backward pass for the
/// gaussians this worker touched. Untouched rows are zero.
#[derive(Clone)]
pub struct ShardGradients<B: Backend> {
    /// `[P, 16, 3]`
    pub colors_sh: Tensor<B, 3>,

    /// `[P, 1]`
    pub opacities: Tensor<B, 2>,

    /// `[P, 3]`
    pub positions: Tensor<B, 2>,

    /// `[P, 4]`
    pub rotations: Tensor<B, 2>,

    /// `[P, 3]`
    pub scalings: Tensor<B, 2>,
}

impl<B: Backend> ShardGradients<B> {
    pub fn zeros_like(shard: &GaussianShard<B>) -> Self {
        let device = shard.device();
        let point_count = shard.point_count();

        Self {
            colors_sh: Tensor::zeros([point_count, 16, 3], &device),
            opacities: Tensor::zeros([point_count, 1], &device),
            positions: Tensor::zeros([point_count, 3], &device),
            rotations: Tensor::zeros([point_count, 4], &device),
            scalings: Tensor::zeros([point_count, 3], &device),
        }
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.positions.dims()[0]
    }

    #[inline]
    pub fn device(&self) -> B::Device {
        self.positions.device()
    }
}

/// Accumulated densification statistics.
///
/// The densify/prune heuristics consuming them live outside this crate; the
/// record is crate-owned data because refinement bookkeeping realigns it and
/// redistribution migrates it.
#[derive(Clone, Debug)]
pub struct DensificationRecord<B: Backend> {
    /// `[P]`
    pub positions_2d_grad_norm_sum: Tensor<B, 1>,

    /// `[P] (1 ~ )`
    pub time: Tensor<B, 1>,
}

impl<B: Backend> DensificationRecord<B> {
    pub fn new(
        point_count: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            positions_2d_grad_norm_sum: Tensor::zeros([point_count], device),
            time: Tensor::ones([point_count], device),
        }
    }

    /// Accumulating this iteration's positional gradient norms on the touched
    /// gaussians.
    pub fn accumulate(
        &mut self,
        positions_grad: &Tensor<B, 2>,
        touched: &Tensor<B, 1, Bool>,
    ) -> &mut Self {
        let norm = positions_grad
            .to_owned()
            .powf_scalar(2.0)
            .sum_dim(1)
            .sqrt()
            .squeeze::<1>(1);

        self.positions_2d_grad_norm_sum =
            self.positions_2d_grad_norm_sum.to_owned().mask_where(
                touched.to_owned(),
                self.positions_2d_grad_norm_sum.to_owned().add(norm),
            );
        self.time = self
            .time
            .to_owned()
            .mask_where(touched.to_owned(), self.time.to_owned().add_scalar(1.0));

        self
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.time.dims()[0]
    }
}

impl<B: Backend> fmt::Debug for GaussianShard<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct(&format!("GaussianShard<{}>", B::name()))
            .field("point_count", &self.point_count())
            .finish()
    }
}

impl<B: Backend> fmt::Debug for ShardGradients<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct(&format!("ShardGradients<{}>", B::name()))
            .field("point_count", &self.point_count())
            .finish()
    }
}
