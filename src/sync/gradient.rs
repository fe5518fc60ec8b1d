pub use super::communicator::{Communicator, SingleProcess};
pub use crate::error::Error;
pub use crate::shard::ShardGradients;
pub use burn::{
    config::Config,
    tensor::{backend::Backend, Bool, Tensor},
};

use crate::function::{from_host_f32, to_host_f32};
use rayon::iter::{
    IndexedParallelIterator, IntoParallelIterator, IntoParallelRefIterator,
    ParallelIterator,
};
use rayon::slice::ParallelSliceMut;

#[derive(Config, Copy, Debug, PartialEq)]
pub struct SyncConfig {
    /// Above this touched-gaussian proportion, the dense path is cheaper than
    /// packing rows.
    #[config(default = "0.2")]
    pub sparse_density_threshold: f64,
}

impl SyncConfig {
    pub fn check(&self) -> Result<&Self, Error> {
        if !(0.0..=1.0).contains(&self.sparse_density_threshold) {
            return Err(Error::InvalidSparseDensityThreshold(
                self.sparse_density_threshold,
            ));
        }
        Ok(self)
    }
}

impl Default for SyncConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// One gradient field on the host: `width` values per gaussian, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct RowBuffer {
    pub values: Vec<f32>,
    pub width: usize,
}

impl RowBuffer {
    #[inline]
    pub fn row_count(&self) -> usize {
        self.values.len() / self.width.max(1)
    }

    #[inline]
    fn row(
        &self,
        index: usize,
    ) -> &[f32] {
        &self.values[index * self.width..(index + 1) * self.width]
    }
}

/// Summing every touched row across the group, over all fields at once.
///
/// ## Returns
///
/// The union mask of rows touched on any worker, as `0.0`/`1.0` values.
///
/// ## Details
///
/// While the union stays under `sparse_density_threshold`, only the union
/// rows travel; above it the full buffers do. Both paths accumulate in rank
/// order, so they produce bit-identical sums.
pub fn reduce_rows(
    communicator: &dyn Communicator,
    config: &SyncConfig,
    fields: &mut [RowBuffer],
    row_count: usize,
) -> Result<Vec<f32>, Error> {
    // Union of touched rows

    let mut mask = (0..row_count)
        .into_par_iter()
        .map(|row| {
            let touched = fields.iter().any(|field| {
                field.row(row).iter().any(|value| *value != 0.0)
            });
            touched as u8 as f32
        })
        .collect::<Vec<_>>();
    communicator.all_reduce_f32(&mut mask)?;
    mask.iter_mut().for_each(|value| *value = (*value > 0.0) as u8 as f32);

    if communicator.world_size() == 1 {
        return Ok(mask);
    }

    let touched = mask
        .iter()
        .enumerate()
        .filter(|(_, value)| **value > 0.0)
        .map(|(row, _)| row)
        .collect::<Vec<_>>();
    let density = touched.len() as f64 / row_count.max(1) as f64;

    if density <= config.sparse_density_threshold {
        // Sparse path: pack the union rows, reduce, scatter back. Rows
        // outside the union are zero on every worker, so scattering into
        // zeroed buffers loses nothing.
        for field in fields.iter_mut() {
            let width = field.width;
            let mut packed = vec![0.0; touched.len() * width];
            packed
                .par_chunks_mut(width)
                .zip(touched.par_iter())
                .for_each(|(packed_row, row)| {
                    packed_row.copy_from_slice(field.row(*row));
                });

            communicator.all_reduce_f32(&mut packed)?;

            field.values.iter_mut().for_each(|value| *value = 0.0);
            for (packed_row, row) in packed.chunks(width).zip(&touched) {
                field.values[row * width..(row + 1) * width]
                    .copy_from_slice(packed_row);
            }
        }
    } else {
        for field in fields.iter_mut() {
            communicator.all_reduce_f32(&mut field.values)?;
        }
    }

    Ok(mask)
}

/// Summing each touched gaussian's gradient across the group.
///
/// ## Returns
///
/// The reduced gradients, identical on every worker, plus the union mask of
/// gaussians touched anywhere.
pub fn sync_gradients<B: Backend>(
    communicator: &dyn Communicator,
    config: &SyncConfig,
    gradients: ShardGradients<B>,
) -> Result<(ShardGradients<B>, Tensor<B, 1, Bool>), Error> {
    let device = gradients.device();
    let point_count = gradients.point_count();

    let mut fields = vec![
        RowBuffer {
            values: to_host_f32(gradients.colors_sh),
            width: 48,
        },
        RowBuffer {
            values: to_host_f32(gradients.opacities),
            width: 1,
        },
        RowBuffer {
            values: to_host_f32(gradients.positions),
            width: 3,
        },
        RowBuffer {
            values: to_host_f32(gradients.rotations),
            width: 4,
        },
        RowBuffer {
            values: to_host_f32(gradients.scalings),
            width: 3,
        },
    ];

    let mask = reduce_rows(communicator, config, &mut fields, point_count)?;

    #[cfg(all(debug_assertions, not(test)))]
    log::debug!(
        target: "gausplat::distributor::sync",
        "sync_gradients > touched ({}) of ({point_count})",
        mask.iter().filter(|value| **value > 0.0).count(),
    );

    let mut fields = fields.into_iter();
    let mut take = |dims: [usize; 2]| {
        let field = fields.next().unwrap_or(RowBuffer {
            values: vec![],
            width: 0,
        });
        from_host_f32::<B, 2>(field.values, dims, &device)
    };

    let colors_sh = {
        let field = take([point_count, 48]);
        field.reshape([point_count, 16, 3])
    };
    let gradients = ShardGradients {
        colors_sh,
        opacities: take([point_count, 1]),
        positions: take([point_count, 3]),
        rotations: take([point_count, 4]),
        scalings: take([point_count, 3]),
    };

    let touched =
        from_host_f32::<B, 1>(mask, [point_count], &device).greater_elem(0.5);

    Ok((gradients, touched))
}
