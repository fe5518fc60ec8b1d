pub mod config;

pub use crate::error::Error;
pub use crate::range::RangeOptions;
pub use crate::strategy::TileDivision;
pub use crate::sync::Communicator;
pub use burn::tensor::{backend::Backend, Int, Tensor};
pub use config::*;

use crate::function::{from_host_f32, from_host_i64, to_host_f32, to_host_i64};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use std::ops::Range;

/// A negotiated reassignment of gaussian ownership.
///
/// Every worker derives the plan from the same gathered inputs, so the plan
/// is identical across the group without being broadcast.
#[derive(Clone, Debug, PartialEq)]
pub struct RedistributionPlan {
    pub world_size: usize,
    pub rank: usize,

    /// Start of this worker's global index range before migration.
    pub offset_before: u64,
    pub count_before: usize,

    /// Global ownership boundaries after migration, `world_size + 1` entries.
    pub boundaries: Vec<u64>,

    /// Local row ranges to send, one contiguous range per destination.
    pub send_ranges: Vec<Range<usize>>,
}

impl RedistributionPlan {
    /// Negotiating new ownership from per-gaussian costs.
    ///
    /// Workers exchange shard sizes (and costs, when weighting by telemetry),
    /// then cut the global ordering with the same search the tile heuristic
    /// uses.
    pub fn negotiate(
        communicator: &dyn Communicator,
        assignment: RedistributionAssignment,
        local_costs: &[f64],
    ) -> Result<Self, Error> {
        let world_size = communicator.world_size();
        let rank = communicator.rank();
        let count_before = local_costs.len();

        let counts = communicator.all_gather_f64(&[count_before as f64])?;
        let counts = counts
            .iter()
            .map(|values| values.first().copied().unwrap_or_default() as u64)
            .collect::<Vec<_>>();
        let offset_before = counts[..rank].iter().sum::<u64>();
        let total = counts.iter().sum::<u64>();

        let boundaries = match assignment {
            RedistributionAssignment::BySendCost => {
                let gathered = communicator.all_gather_f64(local_costs)?;
                let global = gathered.into_iter().flatten().collect::<Vec<_>>();
                TileDivision::by_cost(&global, world_size).boundaries
            }
            _ => (0..=world_size as u64)
                .map(|worker| total * worker / world_size as u64)
                .collect(),
        };

        let end_before = offset_before + count_before as u64;
        let send_ranges = (0..world_size)
            .map(|destination| {
                let begin = boundaries[destination]
                    .clamp(offset_before, end_before);
                let end = boundaries[destination + 1]
                    .clamp(offset_before, end_before);
                (begin - offset_before) as usize..(end - offset_before) as usize
            })
            .collect();

        Ok(Self {
            world_size,
            rank,
            offset_before,
            count_before,
            boundaries,
            send_ranges,
        })
    }

    /// Rows this worker owns after migration.
    #[inline]
    pub fn count_after(&self) -> usize {
        (self.boundaries[self.rank + 1] - self.boundaries[self.rank]) as usize
    }

    /// Migrating one field of `width` floats per row.
    ///
    /// Rows travel as raw little-endian bytes, so every value lands
    /// bit-identical; receivers merge in rank order, which restores the
    /// global index ordering.
    pub fn migrate_f32(
        &self,
        communicator: &dyn Communicator,
        values: &[f32],
        width: usize,
    ) -> Result<Vec<f32>, Error> {
        let sends = self
            .send_ranges
            .par_iter()
            .map(|range| {
                let slice = &values[range.start * width..range.end * width];
                let mut bytes = Vec::with_capacity(slice.len() * 4);
                for value in slice {
                    bytes.extend_from_slice(&value.to_le_bytes());
                }
                bytes
            })
            .collect();

        let received = communicator.all_to_all_bytes(sends)?;

        let mut merged = Vec::with_capacity(self.count_after() * width);
        for bytes in &received {
            for chunk in bytes.chunks_exact(4) {
                merged.push(f32::from_le_bytes([
                    chunk[0], chunk[1], chunk[2], chunk[3],
                ]));
            }
        }
        Ok(merged)
    }

    /// Migrating one field of `width` ints per row, bit-identical.
    pub fn migrate_i64(
        &self,
        communicator: &dyn Communicator,
        values: &[i64],
        width: usize,
    ) -> Result<Vec<i64>, Error> {
        let sends = self
            .send_ranges
            .par_iter()
            .map(|range| {
                let slice = &values[range.start * width..range.end * width];
                let mut bytes = Vec::with_capacity(slice.len() * 8);
                for value in slice {
                    bytes.extend_from_slice(&value.to_le_bytes());
                }
                bytes
            })
            .collect();

        let received = communicator.all_to_all_bytes(sends)?;

        let mut merged = Vec::with_capacity(self.count_after() * width);
        for bytes in &received {
            for chunk in bytes.chunks_exact(8) {
                merged.push(i64::from_le_bytes([
                    chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5],
                    chunk[6], chunk[7],
                ]));
            }
        }
        Ok(merged)
    }

    pub fn migrate_tensor_1d<B: Backend>(
        &self,
        communicator: &dyn Communicator,
        tensor: Tensor<B, 1>,
    ) -> Result<Tensor<B, 1>, Error> {
        let device = tensor.device();
        let merged =
            self.migrate_f32(communicator, &to_host_f32(tensor), 1)?;
        Ok(from_host_f32(merged, [self.count_after()], &device))
    }

    pub fn migrate_tensor_2d<B: Backend>(
        &self,
        communicator: &dyn Communicator,
        tensor: Tensor<B, 2>,
    ) -> Result<Tensor<B, 2>, Error> {
        let device = tensor.device();
        let width = tensor.dims()[1];
        let merged =
            self.migrate_f32(communicator, &to_host_f32(tensor), width)?;
        Ok(from_host_f32(merged, [self.count_after(), width], &device))
    }

    pub fn migrate_tensor_3d<B: Backend>(
        &self,
        communicator: &dyn Communicator,
        tensor: Tensor<B, 3>,
    ) -> Result<Tensor<B, 3>, Error> {
        let device = tensor.device();
        let dims = tensor.dims();
        let width = dims[1] * dims[2];
        let merged =
            self.migrate_f32(communicator, &to_host_f32(tensor), width)?;
        Ok(from_host_f32(
            merged,
            [self.count_after(), dims[1], dims[2]],
            &device,
        ))
    }

    pub fn migrate_tensor_int_2d<B: Backend>(
        &self,
        communicator: &dyn Communicator,
        tensor: Tensor<B, 2, Int>,
    ) -> Result<Tensor<B, 2, Int>, Error> {
        let device = tensor.device();
        let width = tensor.dims()[1];
        let merged =
            self.migrate_i64(communicator, &to_host_i64(tensor), width)?;
        Ok(from_host_i64(merged, [self.count_after(), width], &device))
    }
}

/// Rebalancing gaussian ownership after the gaussian set changes size.
#[derive(Clone, Debug)]
pub struct Redistributor {
    pub config: RedistributorConfig,
}

impl RedistributorConfig {
    #[inline]
    pub fn init(self) -> Redistributor {
        Redistributor { config: self }
    }
}

impl Redistributor {
    /// Whether the given refinement pass triggers a rebalance.
    pub fn is_due(
        &self,
        refinement_count: u64,
    ) -> bool {
        self.config.is_enabled()
            && RangeOptions::default_with_step(self.config.frequency)
                .has(refinement_count)
    }
}

impl Default for Redistributor {
    #[inline]
    fn default() -> Self {
        RedistributorConfig::default().init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{SingleProcess, ThreadGroup};

    fn run_group<T: Send>(
        world_size: usize,
        worker: impl Fn(ThreadGroup) -> T + Send + Sync,
    ) -> Vec<T> {
        let mut group = ThreadGroup::connect(world_size).unwrap();
        let worker = &worker;

        std::thread::scope(|scope| {
            group
                .drain(..)
                .map(|communicator| scope.spawn(move || worker(communicator)))
                .collect::<Vec<_>>()
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect()
        })
    }

    #[test]
    fn negotiate_by_count_balances_counts() {
        let outputs = run_group(2, |communicator| {
            let count = if communicator.rank() == 0 { 3 } else { 1 };
            RedistributionPlan::negotiate(
                &communicator,
                RedistributionAssignment::ByCount,
                &vec![1.0; count],
            )
            .unwrap()
        });

        for plan in &outputs {
            assert_eq!(plan.boundaries, vec![0, 2, 4]);
        }
        assert_eq!(outputs[0].send_ranges, vec![0..2, 2..3]);
        assert_eq!(outputs[1].send_ranges, vec![0..0, 0..1]);
        assert_eq!(outputs[0].count_after(), 2);
        assert_eq!(outputs[1].count_after(), 2);
    }

    #[test]
    fn negotiate_by_send_cost_moves_the_heavy_tail() {
        let outputs = run_group(2, |communicator| {
            let costs = match communicator.rank() {
                0 => vec![1.0, 1.0, 1.0],
                _ => vec![5.0],
            };
            RedistributionPlan::negotiate(
                &communicator,
                RedistributionAssignment::BySendCost,
                &costs,
            )
            .unwrap()
        });

        for plan in &outputs {
            assert_eq!(plan.boundaries, vec![0, 3, 4]);
        }
    }

    #[test]
    fn migrate_preserves_bits_count_and_order() {
        let outputs = run_group(2, |communicator| {
            let rank = communicator.rank();
            let count = if rank == 0 { 3 } else { 1 };
            let offset = if rank == 0 { 0 } else { 3 };

            // Odd bit patterns survive byte-exact migration.
            let values = (0..count * 2)
                .map(|index| {
                    f32::from_bits(
                        0x3f80_0001_u32
                            .wrapping_add((offset * 2 + index) as u32 * 77),
                    )
                })
                .collect::<Vec<_>>();

            let plan = RedistributionPlan::negotiate(
                &communicator,
                RedistributionAssignment::ByCount,
                &vec![1.0; count],
            )
            .unwrap();
            let merged = plan.migrate_f32(&communicator, &values, 2).unwrap();
            (plan.count_after(), merged)
        });

        // The global row ordering is preserved across the new boundaries.
        let global = (0..4 * 2)
            .map(|index| {
                f32::from_bits(0x3f80_0001_u32.wrapping_add(index as u32 * 77))
            })
            .collect::<Vec<_>>();
        let total = outputs[0].0 + outputs[1].0;
        assert_eq!(total, 4);

        let rejoined = outputs
            .iter()
            .flat_map(|(_, merged)| merged.iter())
            .copied()
            .collect::<Vec<_>>();
        assert_eq!(
            rejoined.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            global.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
        );
    }

    #[test]
    fn migrate_i64_round_trip() {
        let plan = RedistributionPlan::negotiate(
            &SingleProcess,
            RedistributionAssignment::ByCount,
            &[1.0, 1.0],
        )
        .unwrap();

        let values = vec![i64::MIN, -1, 0, i64::MAX];
        let output = plan.migrate_i64(&SingleProcess, &values, 2).unwrap();
        assert_eq!(output, values);
    }

    #[test]
    fn migrate_tensor_2d_round_trip() {
        use crate::function::{from_host_f32, to_host_f32};
        use burn::backend::NdArray;

        let device = Default::default();
        let plan = RedistributionPlan::negotiate(
            &SingleProcess,
            RedistributionAssignment::ByCount,
            &[1.0; 3],
        )
        .unwrap();

        let tensor = from_host_f32::<NdArray, 2>(
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            [3, 2],
            &device,
        );
        let output = plan
            .migrate_tensor_2d(&SingleProcess, tensor.to_owned())
            .unwrap();
        assert_eq!(to_host_f32(output), to_host_f32(tensor));
    }

    #[test]
    fn is_due_honors_frequency() {
        let redistributor = RedistributorConfig::new()
            .with_assignment(RedistributionAssignment::ByCount)
            .with_frequency(3)
            .init();

        assert!(!redistributor.is_due(1));
        assert!(!redistributor.is_due(2));
        assert!(redistributor.is_due(3));
        assert!(redistributor.is_due(6));

        let disabled = Redistributor::default();
        assert!(!disabled.is_due(3));
    }
}
