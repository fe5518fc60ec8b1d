pub use crate::error::Error;
pub use crate::sync::Communicator;

use serde::{Deserialize, Serialize};

/// Counters reported by the rasterization kernel for one worker and one
/// iteration. Pure data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderStats {
    /// Gaussians rasterized by this worker.
    pub n_render: u64,

    /// Gaussians considered during tile culling.
    pub n_consider: u64,

    /// Gaussians contributing to at least one pixel.
    pub n_contrib: u64,

    /// Forward wall-clock, in milliseconds.
    pub time_forward: f64,

    /// Backward wall-clock, in milliseconds.
    pub time_backward: f64,
}

impl RenderStats {
    pub const ENCODED_LEN: usize = 5;

    #[inline]
    pub fn contribution_cost(&self) -> f64 {
        self.n_contrib as f64
    }

    #[inline]
    pub fn time_cost(&self) -> f64 {
        self.time_forward + self.time_backward
    }

    pub fn encode(&self) -> [f64; Self::ENCODED_LEN] {
        [
            self.n_render as f64,
            self.n_consider as f64,
            self.n_contrib as f64,
            self.time_forward,
            self.time_backward,
        ]
    }

    pub fn decode(values: &[f64]) -> Self {
        let at = |index: usize| values.get(index).copied().unwrap_or_default();

        Self {
            n_render: at(0) as u64,
            n_consider: at(1) as u64,
            n_contrib: at(2) as u64,
            time_forward: at(3),
            time_backward: at(4),
        }
    }
}

/// All-gathering one worker's counters so that every worker folds identical
/// statistics into its strategy histories.
pub fn gather_render_stats(
    communicator: &dyn Communicator,
    local: RenderStats,
) -> Result<Vec<RenderStats>, Error> {
    let gathered = communicator.all_gather_f64(&local.encode())?;

    Ok(gathered
        .iter()
        .map(|values| RenderStats::decode(values))
        .collect())
}
