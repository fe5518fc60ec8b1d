pub use super::*;
pub use crate::camera::TileGrid;
pub use crate::stats::RenderStats;

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Contiguous per-worker tile ranges over the row-major tile ordering.
///
/// `boundaries` holds `world_size + 1` non-decreasing tile indices from `0` to
/// the tile count; worker `w` owns tiles `boundaries[w] .. boundaries[w + 1]`.
/// Equal adjacent boundaries express a legal empty partition.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TileDivision {
    pub boundaries: Vec<u64>,
}

impl TileDivision {
    /// Cutting the tile ordering into `world_size` equal contiguous blocks.
    pub fn even(
        tile_count: u64,
        world_size: usize,
    ) -> Self {
        let world_size = world_size.max(1) as u64;
        let boundaries = (0..=world_size)
            .map(|worker| tile_count * worker / world_size)
            .collect();

        Self { boundaries }
    }

    /// Cutting the tile ordering so that each worker's predicted cost stays
    /// close to `total / world_size`, by greedy prefix-sum search.
    ///
    /// A zero-cost estimate falls back to the even split.
    pub fn by_cost(
        costs: &[f64],
        world_size: usize,
    ) -> Self {
        let total = costs.iter().sum::<f64>();
        if total <= 0.0 || world_size < 2 {
            return Self::even(costs.len() as u64, world_size);
        }

        let mut boundaries = Vec::with_capacity(world_size + 1);
        boundaries.push(0);

        let mut prefix = 0.0;
        let mut index = 0;
        for worker in 1..world_size {
            let target = total * worker as f64 / world_size as f64;
            while index < costs.len()
                && (prefix - target).abs()
                    >= (prefix + costs[index] - target).abs()
            {
                prefix += costs[index];
                index += 1;
            }
            boundaries.push(index as u64);
        }
        boundaries.push(costs.len() as u64);

        Self { boundaries }
    }

    /// Parsing a global strategy string, validating it against the grid.
    pub fn parse(
        encoded: &str,
        tile_count: u64,
        world_size: usize,
    ) -> Result<Self, Error> {
        let boundaries = encoded
            .split(',')
            .map(|part| part.trim().parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| Error::InvalidStrategyString(encoded.into()))?;

        let division = Self { boundaries };
        division
            .check(tile_count, world_size)
            .map_err(|_| Error::InvalidStrategyString(encoded.into()))?;

        Ok(division)
    }

    pub fn check(
        &self,
        tile_count: u64,
        world_size: usize,
    ) -> Result<&Self, Error> {
        let ok = self.boundaries.len() == world_size + 1
            && self.boundaries.first() == Some(&0)
            && self.boundaries.last() == Some(&tile_count)
            && self.boundaries.windows(2).all(|pair| pair[0] <= pair[1]);
        if !ok {
            return Err(Error::InvalidStrategyString(self.to_global_string()));
        }

        Ok(self)
    }

    /// The exact form the rasterization kernel consumes: the boundary list
    /// joined with commas.
    pub fn to_global_string(&self) -> String {
        self.boundaries
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    #[inline]
    pub fn world_size(&self) -> usize {
        self.boundaries.len().saturating_sub(1)
    }

    pub fn range(
        &self,
        rank: usize,
    ) -> Range<u64> {
        let start = self.boundaries.get(rank).copied().unwrap_or_default();
        let end = self.boundaries.get(rank + 1).copied().unwrap_or(start);
        start..end
    }

    /// Per-pixel ownership of this worker, row-major `[I_y * I_x]`,
    /// `1.0` on pixels inside the worker's tiles.
    pub fn pixel_mask(
        &self,
        grid: &TileGrid,
        rank: usize,
    ) -> Vec<f32> {
        let mut mask =
            vec![0.0; grid.image_height as usize * grid.image_width as usize];

        for tile in self.range(rank) {
            let tile_x = (tile % grid.tile_count_x as u64) as u32;
            let tile_y = (tile / grid.tile_count_x as u64) as u32;
            let x_start = tile_x * grid.tile_width;
            let x_end = (x_start + grid.tile_width).min(grid.image_width);
            let y_start = tile_y * grid.tile_height;
            let y_end = (y_start + grid.tile_height).min(grid.image_height);

            for y in y_start..y_end {
                for x in x_start..x_end {
                    mask[(y * grid.image_width + x) as usize] = 1.0;
                }
            }
        }

        mask
    }
}

/// The unit of work assigned to each worker for one camera and one iteration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Workload {
    /// Replicated gaussians: disjoint tile ranges per worker.
    Tiles(TileDivision),

    /// Sharded gaussians: tile ranges for pixels, plus the kernel-reported
    /// mask of local gaussians this worker computes.
    Points {
        division: TileDivision,
        compute_mask: Option<Vec<bool>>,
    },
}

impl Workload {
    #[inline]
    pub fn division(&self) -> &TileDivision {
        match self {
            Self::Tiles(division) => division,
            Self::Points { division, .. } => division,
        }
    }

    #[inline]
    pub fn world_size(&self) -> usize {
        self.division().world_size()
    }
}

/// The recorded outcome of one finished strategy. It is gathered across the
/// group beforehand, so it is identical on every worker.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyOutcome {
    /// One entry per worker, in rank order.
    pub per_worker: Vec<RenderStats>,

    /// Inter-worker traffic sizes, point-sharded scheme only.
    pub i2j_send_size: Option<Vec<Vec<u64>>>,
}

/// One camera's workload assignment for one iteration.
///
/// Created by the camera's history, consumed once by the forward pass,
/// updated with statistics once, then returned to the history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DivisionStrategy {
    pub camera_id: u32,
    pub iteration: u64,
    pub workload: Workload,

    /// Whether the cross-worker pixel exchange can be skipped: the partitions
    /// are disjoint in image space and the loss is computed locally.
    pub avoid_pixel_all2all: bool,

    pub outcome: Option<StrategyOutcome>,
}

impl DivisionStrategy {
    #[inline]
    pub fn division(&self) -> &TileDivision {
        self.workload.division()
    }

    #[inline]
    pub fn is_avoid_pixel_all2all(&self) -> bool {
        self.avoid_pixel_all2all
    }

    /// Recording the gathered outcome.
    ///
    /// Recording twice is a caller error. With a single worker there is
    /// nothing to adjust and the call is a no-op.
    pub fn update_stats(
        &mut self,
        outcome: StrategyOutcome,
    ) -> Result<&mut Self, Error> {
        let world_size = self.workload.world_size();
        if world_size == 1 {
            return Ok(self);
        }

        if outcome.per_worker.len() != world_size {
            return Err(Error::MismatchedWorkerCount {
                expected: world_size,
                found: outcome.per_worker.len(),
            });
        }
        if self.outcome.is_some() {
            return Err(Error::StatsAlreadyRecorded);
        }

        self.outcome = Some(outcome);
        Ok(self)
    }

    /// Adopting the kernel-reported compute mask, point-sharded scheme only.
    pub fn set_compute_mask(
        &mut self,
        mask: Vec<bool>,
    ) -> &mut Self {
        if let Workload::Points { compute_mask, .. } = &mut self.workload {
            *compute_mask = Some(mask);
        }
        self
    }
}
