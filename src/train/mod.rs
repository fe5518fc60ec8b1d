pub mod config;

pub use crate::camera::Camera;
pub use crate::error::Error;
pub use crate::metric::{MeanAbsoluteError, Metric, Psnr};
pub use crate::optimize::{Adam, AdamConfig, LearningRate, LearningRateConfig};
pub use crate::redistribute::{
    RedistributionAssignment, RedistributionPlan, Redistributor,
};
pub use crate::session::{TrainingSession, TrainingSessionConfig};
pub use crate::shard::{DensificationRecord, GaussianShard, ShardGradients};
pub use crate::stats::{gather_render_stats, RenderStats};
pub use crate::strategy::{
    DivisionStrategy, PartitionScheme, StrategyOutcome, Workload,
};
pub use crate::sync::{
    reduce_image, sync_gradients, Communicator, SingleProcess,
};
pub use burn::tensor::{backend::Backend, Bool, Int, Tensor};
pub use config::*;

use crate::function::{from_host_f32, to_host_i64};
use crate::report;
use burn::tensor::ElementConversion;
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path};

/// Train or test invocation of the rasterization kernel.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RenderMode {
    Train,
    Test,
}

/// The configuration record handed to the rasterization kernel per call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KernelDescriptor {
    pub mode: RenderMode,
    pub world_size: usize,
    pub local_rank: usize,
    pub iteration: u64,

    /// Global tile boundaries, exactly as the kernel parses them.
    pub global_strategy: String,

    pub avoid_pixel_all2all: bool,
}

/// What the kernel returns per call.
#[derive(Clone, Debug)]
pub struct RenderOutput<B: Backend> {
    /// `[I_y, I_x, 3]`, this worker's partial (or full) image.
    pub colors_rgb_2d: Tensor<B, 3>,

    pub stats: RenderStats,

    /// Point-sharded scheme: local gaussians this worker computes.
    pub compute_mask: Option<Vec<bool>>,

    /// Point-sharded scheme: inter-worker traffic sizes, `[W][W]`.
    pub i2j_send_size: Option<Vec<Vec<u64>>>,

    /// Point-sharded scheme: `[P, W]`, which local gaussians this worker sent
    /// to which peer.
    pub point_sends: Option<Tensor<B, 2, Int>>,
}

/// The differentiable rasterization kernel, an external collaborator.
pub trait SplatRenderer<B: Backend> {
    /// Rasterizing the shard under the given partition descriptor.
    fn render(
        &mut self,
        shard: &GaussianShard<B>,
        camera: &Camera,
        descriptor: &KernelDescriptor,
    ) -> Result<RenderOutput<B>, Error>;

    /// Turning the pixel-loss gradient into per-parameter shard gradients for
    /// the gaussians this worker touched.
    fn backward(
        &mut self,
        colors_rgb_2d_grad: Tensor<B, 3>,
    ) -> Result<ShardGradients<B>, Error>;
}

/// The outcome of one training iteration, identical on every worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub iteration: u64,
    pub loss: f32,
    pub boundaries: Vec<u64>,
    pub touched_count: u64,
    pub point_count: u64,
}

/// The outcome of one ownership rebalance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RebalanceSummary {
    pub count_before: u64,
    pub count_after: u64,
    pub boundaries: Vec<u64>,
}

/// The outcome of one evaluation rendering.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub psnr: f32,
}

pub struct DistributedTrainer<B: Backend, R: SplatRenderer<B>> {
    pub config: DistributedTrainerConfig,
    pub iteration: u64,
    pub refinement_count: u64,
    pub session: TrainingSession,
    pub renderer: R,
    pub shard: GaussianShard<B>,
    pub densification: DensificationRecord<B>,

    /// `[P, W]`, per-gaussian send telemetry (point-sharded scheme).
    pub send_counts: Tensor<B, 2, Int>,

    pub learning_rate_colors_sh: LearningRate,
    pub learning_rate_opacities: LearningRate,
    pub learning_rate_positions: LearningRate,
    pub learning_rate_rotations: LearningRate,
    pub learning_rate_scalings: LearningRate,
    pub metric_optimization: MeanAbsoluteError,
    pub metric_evaluation: Psnr<B>,
    pub optimizer_colors_sh: Adam<B, 3>,
    pub optimizer_opacities: Adam<B, 2>,
    pub optimizer_positions: Adam<B, 2>,
    pub optimizer_rotations: Adam<B, 2>,
    pub optimizer_scalings: Adam<B, 2>,
    pub redistributor: Redistributor,
}

impl<B: Backend, R: SplatRenderer<B>> DistributedTrainer<B, R> {
    /// Running one training iteration for `camera` against its ground-truth
    /// image `[I_y, I_x, 3]`.
    pub fn step(
        &mut self,
        camera: &Camera,
        colors_rgb_2d_target: Tensor<B, 3>,
    ) -> Result<StepSummary, Error> {
        self.iteration += 1;
        let iteration = self.iteration;
        let scheme = self.session.config.partition;

        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(
            target: "gausplat::distributor::train",
            "DistributedTrainer::step > {iteration}",
        );

        // Workload division

        let mut strategy = self.session.start_strategy(camera, iteration)?;
        let descriptor = KernelDescriptor {
            mode: RenderMode::Train,
            world_size: self.session.world_size(),
            local_rank: self.session.rank(),
            iteration,
            global_strategy: strategy.division().to_global_string(),
            avoid_pixel_all2all: strategy.is_avoid_pixel_all2all(),
        };

        if self.session.config.synchronize_for_timing {
            self.session.communicator.barrier()?;
        }

        // Forward

        let output =
            self.renderer.render(&self.shard, camera, &descriptor)?;
        if let Some(mask) = output.compute_mask {
            strategy.set_compute_mask(mask);
        }

        // Image reconciliation and loss

        let communicator = self.session.communicator.as_ref();
        let colors_rgb_2d = if strategy.is_avoid_pixel_all2all() {
            output.colors_rgb_2d
        } else {
            reduce_image(communicator, output.colors_rgb_2d)?
        };

        let loss = self.metric_optimization.evaluate(
            colors_rgb_2d.to_owned(),
            colors_rgb_2d_target.to_owned(),
        );
        let colors_rgb_2d_grad = self.loss_gradient(
            &strategy,
            camera,
            colors_rgb_2d,
            colors_rgb_2d_target,
        );

        // Backward

        let gradients = self.renderer.backward(colors_rgb_2d_grad)?;

        if self.session.config.synchronize_for_timing {
            communicator.barrier()?;
        }

        // Statistics, gathered so every worker folds the same outcome

        let per_worker = gather_render_stats(communicator, output.stats)?;
        strategy.update_stats(StrategyOutcome {
            per_worker,
            i2j_send_size: output.i2j_send_size,
        })?;
        let boundaries = strategy.division().boundaries.to_owned();
        self.session.finish_strategy(strategy)?;

        // Gradient reconciliation. Under the point-sharded scheme the owned
        // gradients are already local; only the touched mask is computed.

        let (gradients, touched) = match scheme {
            PartitionScheme::TileSharded => sync_gradients(
                communicator,
                &self.session.config.sync,
                gradients,
            )?,
            PartitionScheme::PointSharded => sync_gradients(
                &SingleProcess,
                &self.session.config.sync,
                gradients,
            )?,
        };
        let touched_count: i64 =
            touched.to_owned().int().sum().into_scalar().elem();

        // Telemetry

        if let Some(point_sends) = output.point_sends {
            self.send_counts = self.send_counts.to_owned().add(point_sends);
        }

        // Densification accumulators

        self.densification.accumulate(&gradients.positions, &touched);

        // Parameter update

        self.optimize(gradients);

        Ok(StepSummary {
            iteration,
            loss: loss.into_scalar().elem(),
            boundaries,
            touched_count: touched_count as u64,
            point_count: self.shard.point_count() as u64,
        })
    }

    /// The pixel-loss gradient: `d mean(|value - target|) / d value`, masked
    /// to this worker's pixels when the loss is computed locally.
    fn loss_gradient(
        &self,
        strategy: &DivisionStrategy,
        camera: &Camera,
        value: Tensor<B, 3>,
        target: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        let dims = value.dims();
        let count = (dims[0] * dims[1] * dims[2]) as f64;
        let mut grad = value.sub(target).sign().div_scalar(count);

        if strategy.is_avoid_pixel_all2all() {
            let grid = self.session.config.grid.grid(camera);
            let mask =
                strategy.division().pixel_mask(&grid, self.session.rank());
            let mask = from_host_f32::<B, 3>(
                mask,
                [dims[0], dims[1], 1],
                &grad.device(),
            );
            grad = grad.mul(mask);
        }

        grad
    }

    pub fn optimize(
        &mut self,
        gradients: ShardGradients<B>,
    ) -> &mut Self {
        let shard = self.shard.to_owned();

        self.shard.colors_sh = self.optimizer_colors_sh.update(
            *self.learning_rate_colors_sh,
            shard.colors_sh,
            gradients.colors_sh,
        );
        self.shard.opacities = self.optimizer_opacities.update(
            *self.learning_rate_opacities,
            shard.opacities,
            gradients.opacities,
        );
        self.shard.positions = self.optimizer_positions.update(
            *self.learning_rate_positions,
            shard.positions,
            gradients.positions,
        );
        self.shard.rotations = self.optimizer_rotations.update(
            *self.learning_rate_rotations,
            shard.rotations,
            gradients.rotations,
        );
        self.shard.scalings = self.optimizer_scalings.update(
            *self.learning_rate_scalings,
            shard.scalings,
            gradients.scalings,
        );

        // Scheduling the learning rates

        self.learning_rate_positions.update();

        self
    }

    /// Realigning records after an external densify/prune pass replaced the
    /// gaussian set.
    ///
    /// `retained` maps surviving rows to their previous indices; rows
    /// appended after them start with fresh state. The pass counter advances,
    /// so a following [`rebalance`](DistributedTrainer::rebalance) can fire.
    pub fn apply_refinement(
        &mut self,
        shard: GaussianShard<B>,
        retained: Tensor<B, 1, Int>,
    ) -> &mut Self {
        let device = shard.device();
        let point_count = shard.point_count();
        let retained_count = retained.dims()[0];
        let appended_count = point_count.saturating_sub(retained_count);
        let world_size = self.session.world_size();

        // Realigning the optimizer records

        let mut update_optimizer = |optimizer: &mut Adam<B, 2>| {
            let Some(record) = &mut optimizer.record else {
                return;
            };
            let feature_count = record.moment_1.dims()[1];

            record.moment_1 = Tensor::cat(
                vec![
                    record.moment_1.to_owned().select(0, retained.to_owned()),
                    Tensor::zeros([appended_count, feature_count], &device),
                ],
                0,
            );
            record.moment_2 = Tensor::cat(
                vec![
                    record.moment_2.to_owned().select(0, retained.to_owned()),
                    Tensor::zeros([appended_count, feature_count], &device),
                ],
                0,
            );
        };

        update_optimizer(&mut self.optimizer_opacities);
        update_optimizer(&mut self.optimizer_positions);
        update_optimizer(&mut self.optimizer_rotations);
        update_optimizer(&mut self.optimizer_scalings);

        if let Some(record) = &mut self.optimizer_colors_sh.record {
            let dims = record.moment_1.dims();
            record.moment_1 = Tensor::cat(
                vec![
                    record.moment_1.to_owned().select(0, retained.to_owned()),
                    Tensor::zeros([appended_count, dims[1], dims[2]], &device),
                ],
                0,
            );
            record.moment_2 = Tensor::cat(
                vec![
                    record.moment_2.to_owned().select(0, retained.to_owned()),
                    Tensor::zeros([appended_count, dims[1], dims[2]], &device),
                ],
                0,
            );
        }

        // Realigning the telemetry, resetting the accumulators

        self.send_counts = Tensor::cat(
            vec![
                self.send_counts.to_owned().select(0, retained),
                Tensor::zeros([appended_count, world_size], &device),
            ],
            0,
        );
        self.densification = DensificationRecord::new(point_count, &device);

        self.shard = shard;
        self.refinement_count += 1;

        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(
            target: "gausplat::distributor::train",
            "DistributedTrainer::apply_refinement > point_count ({point_count})",
        );

        self
    }

    /// Rebalancing gaussian ownership across the group, if the configured
    /// refinement frequency is due.
    ///
    /// Runs as its own whole-group phase; every migrated row keeps its state
    /// bit for bit, only its owning worker changes.
    pub fn rebalance(&mut self) -> Result<Option<RebalanceSummary>, Error> {
        if !self.redistributor.is_due(self.refinement_count) {
            return Ok(None);
        }

        let communicator = self.session.communicator.as_ref();
        let count_before = self.shard.point_count();
        let world_size = self.session.world_size();

        // Negotiating the plan

        let costs = match self.redistributor.config.assignment {
            RedistributionAssignment::BySendCost => {
                let sends = to_host_i64(self.send_counts.to_owned());
                (0..count_before)
                    .map(|point| {
                        1.0 + sends[point * world_size..][..world_size]
                            .iter()
                            .sum::<i64>() as f64
                    })
                    .collect()
            }
            _ => vec![1.0; count_before],
        };
        let plan = RedistributionPlan::negotiate(
            communicator,
            self.redistributor.config.assignment,
            &costs,
        )?;

        // Migrating every row-aligned field

        let shard = self.shard.to_owned();
        self.shard = GaussianShard {
            colors_sh: plan
                .migrate_tensor_3d(communicator, shard.colors_sh)?,
            opacities: plan
                .migrate_tensor_2d(communicator, shard.opacities)?,
            positions: plan
                .migrate_tensor_2d(communicator, shard.positions)?,
            rotations: plan
                .migrate_tensor_2d(communicator, shard.rotations)?,
            scalings: plan
                .migrate_tensor_2d(communicator, shard.scalings)?,
        };

        migrate_record_2d(&plan, communicator, &mut self.optimizer_opacities)?;
        migrate_record_2d(&plan, communicator, &mut self.optimizer_positions)?;
        migrate_record_2d(&plan, communicator, &mut self.optimizer_rotations)?;
        migrate_record_2d(&plan, communicator, &mut self.optimizer_scalings)?;
        migrate_record_3d(&plan, communicator, &mut self.optimizer_colors_sh)?;

        self.densification = DensificationRecord {
            positions_2d_grad_norm_sum: plan.migrate_tensor_1d(
                communicator,
                self.densification.positions_2d_grad_norm_sum.to_owned(),
            )?,
            time: plan.migrate_tensor_1d(
                communicator,
                self.densification.time.to_owned(),
            )?,
        };
        self.send_counts = plan
            .migrate_tensor_int_2d(communicator, self.send_counts.to_owned())?;

        communicator.barrier()?;

        log::info!(
            target: "gausplat::distributor::train",
            "redistribute > point_count ({count_before}) -> ({})",
            plan.count_after(),
        );

        Ok(Some(RebalanceSummary {
            count_before: count_before as u64,
            count_after: plan.count_after() as u64,
            boundaries: plan.boundaries.to_owned(),
        }))
    }

    /// Rendering `camera` under an evenly split strategy, always exchanging
    /// the partial images, and scoring the result against the target.
    pub fn evaluate(
        &mut self,
        camera: &Camera,
        colors_rgb_2d_target: Tensor<B, 3>,
    ) -> Result<EvaluationSummary, Error> {
        let strategy = self.session.evaluation_strategy(camera);
        let descriptor = KernelDescriptor {
            mode: RenderMode::Test,
            world_size: self.session.world_size(),
            local_rank: self.session.rank(),
            iteration: self.iteration,
            global_strategy: strategy.division().to_global_string(),
            avoid_pixel_all2all: false,
        };

        let output =
            self.renderer.render(&self.shard, camera, &descriptor)?;
        let colors_rgb_2d = reduce_image(
            self.session.communicator.as_ref(),
            output.colors_rgb_2d,
        )?
        .clamp(0.0, 1.0);

        let psnr = self
            .metric_evaluation
            .evaluate(colors_rgb_2d, colors_rgb_2d_target.clamp(0.0, 1.0))
            .into_scalar()
            .elem();

        Ok(EvaluationSummary { psnr })
    }

    /// Writing this worker's diagnostic reports at end of run.
    pub fn write_reports(
        &self,
        directory: &Path,
    ) -> Result<(), Error> {
        report::write_strategy_history(&self.session, directory)?;

        if self.session.config.partition == PartitionScheme::PointSharded {
            let world_size = self.session.world_size();
            let sends = to_host_i64(self.send_counts.to_owned());
            let rows = sends
                .chunks(world_size.max(1))
                .map(<[i64]>::to_vec)
                .collect::<Vec<_>>();
            report::write_send_counts(
                world_size,
                self.session.rank(),
                &rows,
                directory,
            )?;
        }

        Ok(())
    }
}

fn migrate_record_2d<B: Backend>(
    plan: &RedistributionPlan,
    communicator: &dyn Communicator,
    optimizer: &mut Adam<B, 2>,
) -> Result<(), Error> {
    if let Some(record) = &mut optimizer.record {
        record.moment_1 = plan
            .migrate_tensor_2d(communicator, record.moment_1.to_owned())?;
        record.moment_2 = plan
            .migrate_tensor_2d(communicator, record.moment_2.to_owned())?;
    }
    Ok(())
}

fn migrate_record_3d<B: Backend>(
    plan: &RedistributionPlan,
    communicator: &dyn Communicator,
    optimizer: &mut Adam<B, 3>,
) -> Result<(), Error> {
    if let Some(record) = &mut optimizer.record {
        record.moment_1 = plan
            .migrate_tensor_3d(communicator, record.moment_1.to_owned())?;
        record.moment_2 = plan
            .migrate_tensor_3d(communicator, record.moment_2.to_owned())?;
    }
    Ok(())
}

impl<B: Backend, R: SplatRenderer<B>> fmt::Debug for DistributedTrainer<B, R> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("DistributedTrainer")
            .field("config", &self.config)
            .field("iteration", &self.iteration)
            .field("refinement_count", &self.refinement_count)
            .field("session", &self.session)
            .field("shard", &self.shard)
            .field("optimizer", &format!("Adam<{}>", B::name()))
            .finish()
    }
}
