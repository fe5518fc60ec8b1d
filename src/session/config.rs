pub use crate::camera::TileGridOptions;
pub use crate::error::Error;
pub use crate::redistribute::RedistributorConfig;
pub use crate::strategy::{PartitionScheme, StrategyConfig};
pub use crate::sync::SyncConfig;
pub use burn::config::Config;

#[derive(Config, Debug)]
pub struct TrainingSessionConfig {
    #[config(default = "PartitionScheme::TileSharded")]
    pub partition: PartitionScheme,

    #[config(default = "Default::default()")]
    pub strategy: StrategyConfig,

    #[config(default = "Default::default()")]
    pub grid: TileGridOptions,

    /// Score the loss per worker on its own pixels, skipping the pixel
    /// exchange. Tile-sharded scheme only.
    #[config(default = "false")]
    pub distribute_loss: bool,

    #[config(default = "Default::default()")]
    pub sync: SyncConfig,

    #[config(default = "Default::default()")]
    pub redistribution: RedistributorConfig,

    /// Insert whole-group barriers at phase boundaries so per-phase timings
    /// are comparable across workers.
    #[config(default = "false")]
    pub synchronize_for_timing: bool,
}

impl TrainingSessionConfig {
    /// Validating flag combinations eagerly, before any worker starts.
    pub fn check(&self) -> Result<&Self, Error> {
        self.strategy.check()?;
        self.grid.check()?;
        self.sync.check()?;
        self.redistribution.check()?;

        if self.redistribution.is_enabled()
            && self.partition != PartitionScheme::PointSharded
        {
            return Err(Error::RedistributionRequiresPointSharding);
        }
        if self.distribute_loss
            && self.partition != PartitionScheme::TileSharded
        {
            return Err(Error::DistributedLossRequiresTileSharding);
        }

        Ok(self)
    }
}

impl Default for TrainingSessionConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
