pub use super::*;
pub use burn::config::Config;

#[derive(Config, Debug)]
pub struct DistributedTrainerConfig {
    #[config(default = "Default::default()")]
    pub session: TrainingSessionConfig,

    #[config(default = "AdamConfig::new().with_epsilon(1e-15)")]
    pub optimizer_adam: AdamConfig,

    #[config(default = "2.5e-3.into()")]
    pub learning_rate_colors_sh: LearningRateConfig,

    #[config(default = "2.5e-2.into()")]
    pub learning_rate_opacities: LearningRateConfig,

    #[config(
        default = "LearningRateConfig::new(1.6e-4).with_end(1.6e-6).with_count(30000)"
    )]
    pub learning_rate_positions: LearningRateConfig,

    #[config(default = "1e-3.into()")]
    pub learning_rate_rotations: LearningRateConfig,

    #[config(default = "5e-3.into()")]
    pub learning_rate_scalings: LearningRateConfig,
}

impl DistributedTrainerConfig {
    pub fn init<B: Backend, R: SplatRenderer<B>>(
        &self,
        communicator: Box<dyn Communicator>,
        renderer: R,
        shard: GaussianShard<B>,
    ) -> Result<DistributedTrainer<B, R>, Error> {
        let redistributor = self.session.redistribution.to_owned().init();
        let session =
            TrainingSession::new(self.session.to_owned(), communicator)?;
        let device = shard.device();
        let point_count = shard.point_count();
        let world_size = session.world_size();

        Ok(DistributedTrainer {
            config: self.to_owned(),
            iteration: 0,
            refinement_count: 0,
            densification: DensificationRecord::new(point_count, &device),
            learning_rate_colors_sh: self.learning_rate_colors_sh.init(),
            learning_rate_opacities: self.learning_rate_opacities.init(),
            learning_rate_positions: self.learning_rate_positions.init(),
            learning_rate_rotations: self.learning_rate_rotations.init(),
            learning_rate_scalings: self.learning_rate_scalings.init(),
            metric_optimization: MeanAbsoluteError::init(),
            metric_evaluation: Psnr::init(&device),
            optimizer_colors_sh: self.optimizer_adam.init(),
            optimizer_opacities: self.optimizer_adam.init(),
            optimizer_positions: self.optimizer_adam.init(),
            optimizer_rotations: self.optimizer_adam.init(),
            optimizer_scalings: self.optimizer_adam.init(),
            redistributor,
            renderer,
            send_counts: Tensor::zeros([point_count, world_size], &device),
            session,
            shard,
        })
    }
}

impl Default for DistributedTrainerConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
