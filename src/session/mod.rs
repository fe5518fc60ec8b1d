pub mod config;

pub use crate::camera::Camera;
pub use crate::error::Error;
pub use crate::strategy::{
    AdjustmentMode, DivisionStrategy, StrategyHistory, TileDivision, Workload,
};
pub use crate::sync::Communicator;
pub use config::*;

use dashmap::DashMap;
use std::fmt;

/// The explicit per-run context: configuration, the worker group, and the
/// lazily populated camera-to-history registry. There are no ambient globals;
/// every component receives the session it belongs to.
pub struct TrainingSession {
    pub config: TrainingSessionConfig,
    pub communicator: Box<dyn Communicator>,
    pub histories: DashMap<u32, StrategyHistory>,
}

impl TrainingSessionConfig {
    pub fn init(
        self,
        communicator: Box<dyn Communicator>,
    ) -> Result<TrainingSession, Error> {
        TrainingSession::new(self, communicator)
    }
}

impl TrainingSession {
    pub fn new(
        config: TrainingSessionConfig,
        communicator: Box<dyn Communicator>,
    ) -> Result<Self, Error> {
        config.check()?;

        let world_size = communicator.world_size();
        if world_size == 0 {
            return Err(Error::ZeroWorldSize);
        }
        if communicator.rank() >= world_size {
            return Err(Error::RankOutOfRange {
                rank: communicator.rank(),
                world_size,
            });
        }

        let mut config = config;
        if world_size == 1
            && config.strategy.mode != AdjustmentMode::SingleWorker
        {
            log::info!(
                target: "gausplat::distributor::session",
                "single worker group, adjustment mode replaced with SingleWorker",
            );
            config.strategy.mode = AdjustmentMode::SingleWorker;
        }

        Ok(Self {
            config,
            communicator,
            histories: DashMap::new(),
        })
    }

    #[inline]
    pub fn world_size(&self) -> usize {
        self.communicator.world_size()
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.communicator.rank()
    }

    /// Starting a strategy for this camera, creating its history on first
    /// encounter. The registry is never shrunk during a run.
    pub fn start_strategy(
        &self,
        camera: &Camera,
        iteration: u64,
    ) -> Result<DivisionStrategy, Error> {
        let mut history =
            self.histories.entry(camera.camera_id).or_insert_with(|| {
                StrategyHistory::new(
                    camera.camera_id,
                    self.config.grid.grid(camera),
                    self.world_size(),
                    self.config.partition,
                    self.config.distribute_loss,
                    self.config.strategy.to_owned(),
                )
            });

        history.start_strategy(iteration)
    }

    /// Returning a finished strategy to its camera's history.
    pub fn finish_strategy(
        &self,
        strategy: DivisionStrategy,
    ) -> Result<(), Error> {
        let mut history = self
            .histories
            .get_mut(&strategy.camera_id)
            .ok_or(Error::NoOpenStrategy(strategy.camera_id))?;
        history.finish_strategy(strategy)?;
        Ok(())
    }

    /// A throwaway evenly split strategy for evaluation rendering.
    ///
    /// Partial images are always exchanged during evaluation, so the pixel
    /// all-to-all is never skipped here.
    pub fn evaluation_strategy(
        &self,
        camera: &Camera,
    ) -> DivisionStrategy {
        let grid = self.config.grid.grid(camera);
        let division =
            TileDivision::even(grid.tile_count(), self.world_size());
        let workload = match self.config.partition {
            PartitionScheme::TileSharded => Workload::Tiles(division),
            PartitionScheme::PointSharded => Workload::Points {
                division,
                compute_mask: None,
            },
        };

        DivisionStrategy {
            camera_id: camera.camera_id,
            iteration: 0,
            workload,
            avoid_pixel_all2all: false,
            outcome: None,
        }
    }
}

impl fmt::Debug for TrainingSession {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TrainingSession")
            .field("config", &self.config)
            .field("world_size", &self.world_size())
            .field("rank", &self.rank())
            .field("histories.len()", &self.histories.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SingleProcess;

    fn camera() -> Camera {
        Camera {
            camera_id: 11,
            image_height: 160,
            image_width: 160,
        }
    }

    #[test]
    fn single_worker_mode_is_substituted() {
        let session = TrainingSessionConfig::default()
            .init(Box::new(SingleProcess))
            .unwrap();

        assert_eq!(session.config.strategy.mode, AdjustmentMode::SingleWorker);
    }

    #[test]
    fn registry_is_lazily_populated() {
        let session = TrainingSessionConfig::default()
            .init(Box::new(SingleProcess))
            .unwrap();
        assert!(session.histories.is_empty());

        let strategy = session.start_strategy(&camera(), 1).unwrap();
        assert_eq!(session.histories.len(), 1);

        session.finish_strategy(strategy).unwrap();
        assert_eq!(session.histories.len(), 1);
    }

    #[test]
    fn finish_unknown_camera_fails() {
        let session = TrainingSessionConfig::default()
            .init(Box::new(SingleProcess))
            .unwrap();

        let other = TrainingSessionConfig::default()
            .init(Box::new(SingleProcess))
            .unwrap();
        let strategy = other.start_strategy(&camera(), 1).unwrap();
        drop(other);

        let output = session.finish_strategy(strategy);
        assert!(matches!(output, Err(Error::NoOpenStrategy(11))));
    }

    #[test]
    fn invalid_config_fails_eagerly() {
        let config = TrainingSessionConfig::new().with_distribute_loss(true);
        let config = config.with_partition(PartitionScheme::PointSharded);

        let output = config.init(Box::new(SingleProcess));
        assert!(matches!(
            output,
            Err(Error::DistributedLossRequiresTileSharding)
        ));
    }

    #[test]
    fn evaluation_strategy_always_exchanges_pixels() {
        let session = TrainingSessionConfig::new()
            .with_distribute_loss(true)
            .init(Box::new(SingleProcess))
            .unwrap();

        let strategy = session.evaluation_strategy(&camera());
        assert!(!strategy.is_avoid_pixel_all2all());
        assert_eq!(strategy.division().boundaries, vec![0, 100]);
    }
}
