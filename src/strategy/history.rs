pub use super::*;
pub use crate::camera::TileGrid;

use serde::{Deserialize, Serialize};

/// One closed strategy and its recorded outcome, lossless.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub iteration: u64,
    pub boundaries: Vec<u64>,
    pub outcome: Option<StrategyOutcome>,
}

/// Per-camera owner of past strategies and constructor of the next one.
///
/// State machine: idle, then open after [`start_strategy`], then idle again
/// after [`finish_strategy`]. At most one strategy is open at a time.
///
/// [`start_strategy`]: StrategyHistory::start_strategy
/// [`finish_strategy`]: StrategyHistory::finish_strategy
#[derive(Clone, Debug)]
pub struct StrategyHistory {
    pub camera_id: u32,
    pub config: StrategyConfig,
    pub grid: TileGrid,
    pub scheme: PartitionScheme,
    pub distribute_loss: bool,
    pub world_size: usize,
    pub entries: Vec<HistoryEntry>,

    /// Decayed per-tile cost estimate driving the heuristic modes.
    pub tile_costs: Option<Vec<f64>>,

    pub open_iteration: Option<u64>,
}

impl StrategyHistory {
    pub fn new(
        camera_id: u32,
        grid: TileGrid,
        world_size: usize,
        scheme: PartitionScheme,
        distribute_loss: bool,
        config: StrategyConfig,
    ) -> Self {
        Self {
            camera_id,
            config,
            grid,
            scheme,
            distribute_loss,
            world_size,
            entries: vec![],
            tile_costs: None,
            open_iteration: None,
        }
    }

    /// Instantiating a new strategy for the next iteration touching this
    /// camera. Starting while another strategy is open is a caller error.
    pub fn start_strategy(
        &mut self,
        iteration: u64,
    ) -> Result<DivisionStrategy, Error> {
        if self.open_iteration.is_some() {
            return Err(Error::StrategyAlreadyOpen(self.camera_id));
        }

        let tile_count = self.grid.tile_count();
        let division = match &self.config.mode {
            AdjustmentMode::SingleWorker => TileDivision::even(tile_count, 1),
            AdjustmentMode::Even => {
                TileDivision::even(tile_count, self.world_size)
            }
            AdjustmentMode::Fixed(encoded) => {
                TileDivision::parse(encoded, tile_count, self.world_size)?
            }
            AdjustmentMode::CountHeuristic | AdjustmentMode::TimeHeuristic => {
                match &self.tile_costs {
                    Some(costs)
                        if iteration > self.config.warm_up_iterations =>
                    {
                        TileDivision::by_cost(costs, self.world_size)
                    }
                    _ => TileDivision::even(tile_count, self.world_size),
                }
            }
        };

        let workload = match self.scheme {
            PartitionScheme::TileSharded => Workload::Tiles(division),
            PartitionScheme::PointSharded => Workload::Points {
                division,
                compute_mask: None,
            },
        };
        let avoid_pixel_all2all =
            self.distribute_loss && matches!(workload, Workload::Tiles(_));

        self.open_iteration = Some(iteration);

        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(
            target: "gausplat::distributor::strategy",
            "StrategyHistory::start_strategy > camera {} iteration {}",
            self.camera_id, iteration,
        );

        Ok(DivisionStrategy {
            camera_id: self.camera_id,
            iteration,
            workload,
            avoid_pixel_all2all,
            outcome: None,
        })
    }

    /// Closing the open strategy and folding its outcome into the history.
    /// Finishing with no open strategy is a caller error.
    pub fn finish_strategy(
        &mut self,
        strategy: DivisionStrategy,
    ) -> Result<&mut Self, Error> {
        let open = self
            .open_iteration
            .ok_or(Error::NoOpenStrategy(self.camera_id))?;
        if open != strategy.iteration || strategy.camera_id != self.camera_id {
            return Err(Error::MismatchedStrategy {
                camera_id: self.camera_id,
                open,
                finished: strategy.iteration,
            });
        }

        if let Some(outcome) = &strategy.outcome {
            self.fold_outcome(strategy.division(), outcome);
        }

        self.entries.push(HistoryEntry {
            iteration: strategy.iteration,
            boundaries: strategy.division().boundaries.to_owned(),
            outcome: strategy.outcome,
        });
        self.open_iteration = None;

        Ok(self)
    }

    /// The full recorded history, lossless with respect to what was recorded.
    #[inline]
    pub fn to_report(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Blending the observed per-tile costs into the running estimate:
    /// a worker's aggregate cost is spread uniformly over the tiles it owned.
    fn fold_outcome(
        &mut self,
        division: &TileDivision,
        outcome: &StrategyOutcome,
    ) {
        let cost_of = match self.config.mode {
            AdjustmentMode::CountHeuristic => RenderStats::contribution_cost,
            AdjustmentMode::TimeHeuristic => RenderStats::time_cost,
            _ => return,
        };

        let tile_count = self.grid.tile_count() as usize;
        let mut observed = vec![0.0; tile_count];
        for (rank, stats) in outcome.per_worker.iter().enumerate() {
            let range = division.range(rank);
            let len = range.end.saturating_sub(range.start);
            if len == 0 {
                continue;
            }
            let per_tile = cost_of(stats) / len as f64;
            for tile in range {
                observed[tile as usize] = per_tile;
            }
        }

        let decay = self.config.heuristic_decay;
        self.tile_costs = Some(match self.tile_costs.take() {
            Some(previous) => previous
                .iter()
                .zip(&observed)
                .map(|(old, new)| decay * old + (1.0 - decay) * new)
                .collect(),
            None => observed,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Camera, TileGridOptions};

    fn grid_10x10() -> TileGrid {
        TileGridOptions::default().grid(&Camera {
            camera_id: 0,
            image_height: 160,
            image_width: 160,
        })
    }

    fn history(
        mode: AdjustmentMode,
        world_size: usize,
    ) -> StrategyHistory {
        StrategyHistory::new(
            7,
            grid_10x10(),
            world_size,
            PartitionScheme::TileSharded,
            false,
            StrategyConfig::new()
                .with_mode(mode)
                .with_warm_up_iterations(0)
                .with_heuristic_decay(0.0),
        )
    }

    fn outcome_with_contribs(contribs: &[u64]) -> StrategyOutcome {
        StrategyOutcome {
            per_worker: contribs
                .iter()
                .map(|n_contrib| RenderStats {
                    n_contrib: *n_contrib,
                    ..Default::default()
                })
                .collect(),
            i2j_send_size: None,
        }
    }

    #[test]
    fn start_finish_cycle() {
        let mut history = history(AdjustmentMode::Even, 4);

        let strategy = history.start_strategy(1).unwrap();
        assert_eq!(strategy.division().boundaries, vec![0, 25, 50, 75, 100]);

        history.finish_strategy(strategy).unwrap();
        assert_eq!(history.entries.len(), 1);
        assert_eq!(history.open_iteration, None);
    }

    #[test]
    fn finish_without_start_fails() {
        let mut history = history(AdjustmentMode::Even, 2);
        let mut other = history.to_owned();

        let strategy = other.start_strategy(1).unwrap();
        let output = history.finish_strategy(strategy);
        assert!(matches!(output, Err(Error::NoOpenStrategy(7))));
    }

    #[test]
    fn start_while_open_fails() {
        let mut history = history(AdjustmentMode::Even, 2);

        history.start_strategy(1).unwrap();
        let output = history.start_strategy(2);
        assert!(matches!(output, Err(Error::StrategyAlreadyOpen(7))));
    }

    #[test]
    fn finish_mismatched_iteration_fails() {
        let mut history = history(AdjustmentMode::Even, 2);

        let mut strategy = history.start_strategy(1).unwrap();
        strategy.iteration = 9;
        let output = history.finish_strategy(strategy);
        assert!(matches!(output, Err(Error::MismatchedStrategy { .. })));
    }

    #[test]
    fn single_worker_covers_everything() {
        let mut history = history(AdjustmentMode::SingleWorker, 1);

        let strategy = history.start_strategy(1).unwrap();
        assert_eq!(strategy.division().boundaries, vec![0, 100]);
    }

    #[test]
    fn fixed_mode_is_verbatim() {
        let mut history = history(AdjustmentMode::Fixed("0,10,100".into()), 2);

        let strategy = history.start_strategy(1).unwrap();
        assert_eq!(strategy.division().to_global_string(), "0,10,100");
    }

    #[test]
    fn fixed_mode_malformed_fails_at_first_use() {
        let mut history = history(AdjustmentMode::Fixed("0,10,99".into()), 2);

        let output = history.start_strategy(1);
        assert!(matches!(output, Err(Error::InvalidStrategyString(_))));
    }

    #[test]
    fn warm_up_stays_even() {
        let mut history = StrategyHistory::new(
            0,
            grid_10x10(),
            2,
            PartitionScheme::TileSharded,
            false,
            StrategyConfig::new()
                .with_mode(AdjustmentMode::CountHeuristic)
                .with_warm_up_iterations(5)
                .with_heuristic_decay(0.0),
        );

        for iteration in 1..=5 {
            let mut strategy = history.start_strategy(iteration).unwrap();
            assert_eq!(strategy.division().boundaries, vec![0, 50, 100]);
            strategy.update_stats(outcome_with_contribs(&[90, 10])).unwrap();
            history.finish_strategy(strategy).unwrap();
        }

        // Past the warm-up window, the recorded skew finally steers the cut.
        let strategy = history.start_strategy(6).unwrap();
        assert_ne!(strategy.division().boundaries, vec![0, 50, 100]);
    }

    #[test]
    fn heuristic_converges_on_skewed_costs() {
        // True per-tile costs: a heavy band in the last quarter of the grid.
        let true_costs: Vec<f64> = (0..100)
            .map(|tile| if tile >= 75 { 9.0 } else { 1.0 })
            .collect();
        let world_size = 4;

        let max_cost = |division: &TileDivision| {
            (0..world_size)
                .map(|rank| {
                    division
                        .range(rank)
                        .map(|tile| true_costs[tile as usize])
                        .sum::<f64>()
                })
                .fold(0.0, f64::max)
        };

        let mut history = StrategyHistory::new(
            0,
            grid_10x10(),
            world_size,
            PartitionScheme::TileSharded,
            false,
            StrategyConfig::new()
                .with_mode(AdjustmentMode::CountHeuristic)
                .with_warm_up_iterations(0)
                .with_heuristic_decay(0.5),
        );

        let even_max =
            max_cost(&TileDivision::even(100, world_size));

        let mut last_max = f64::INFINITY;
        for iteration in 1..=10 {
            let mut strategy = history.start_strategy(iteration).unwrap();
            let division = strategy.division().to_owned();

            // The kernel would report each worker's true aggregate cost.
            let contribs: Vec<u64> = (0..world_size)
                .map(|rank| max_cost_range(&division, rank, &true_costs))
                .collect();
            strategy.update_stats(outcome_with_contribs(&contribs)).unwrap();
            history.finish_strategy(strategy).unwrap();

            last_max = max_cost(&division);
        }

        assert!(
            last_max < even_max,
            "last_max {last_max} even_max {even_max}"
        );
    }

    fn max_cost_range(
        division: &TileDivision,
        rank: usize,
        costs: &[f64],
    ) -> u64 {
        division
            .range(rank)
            .map(|tile| costs[tile as usize])
            .sum::<f64>() as u64
    }

    #[test]
    fn report_round_trip() {
        let mut history = history(AdjustmentMode::Even, 2);

        let mut strategy = history.start_strategy(1).unwrap();
        strategy.update_stats(outcome_with_contribs(&[3, 4])).unwrap();
        history.finish_strategy(strategy).unwrap();

        let encoded = serde_json::to_string(history.to_report()).unwrap();
        let decoded: Vec<HistoryEntry> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, history.entries);
    }
}
