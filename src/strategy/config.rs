pub use crate::error::Error;
pub use burn::config::Config;

use serde::{Deserialize, Serialize};

/// How the gaussian set is placed across the worker group.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PartitionScheme {
    /// Every worker holds the full gaussian set and renders a disjoint tile
    /// range.
    TileSharded,

    /// Every worker owns a disjoint shard of the gaussian set.
    PointSharded,
}

/// How the next division is constructed for a camera.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AdjustmentMode {
    /// One worker, one partition covering everything; statistics are ignored.
    SingleWorker,

    /// Equal contiguous tile blocks, no adaptation.
    Even,

    /// Balance on contribution counts from the previous visit to the camera.
    CountHeuristic,

    /// Balance on measured forward plus backward wall-clock.
    TimeHeuristic,

    /// An externally supplied global strategy string, taken verbatim.
    Fixed(String),
}

#[derive(Config, Debug, PartialEq)]
pub struct StrategyConfig {
    #[config(default = "AdjustmentMode::CountHeuristic")]
    pub mode: AdjustmentMode,

    /// Iterations during which strategies stay evenly split, so early and
    /// unstable statistics cannot steer the division.
    #[config(default = "250")]
    pub warm_up_iterations: u64,

    /// Momentum of the per-tile cost estimate.
    #[config(default = "0.5")]
    pub heuristic_decay: f64,
}

impl StrategyConfig {
    pub fn check(&self) -> Result<&Self, Error> {
        if !(0.0..=1.0).contains(&self.heuristic_decay) {
            return Err(Error::InvalidHeuristicDecay(self.heuristic_decay));
        }
        Ok(self)
    }
}

impl Default for StrategyConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
