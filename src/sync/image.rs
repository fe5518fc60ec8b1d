pub use super::communicator::Communicator;
pub use crate::error::Error;
pub use burn::tensor::{backend::Backend, Tensor};

use crate::function::{from_host_f32, to_host_f32};

/// Summing partial per-worker images so every worker observes the same final
/// image before loss computation.
///
/// Callers skip this entirely when the strategy guarantees disjoint,
/// locally-scored partitions.
pub fn reduce_image<B: Backend>(
    communicator: &dyn Communicator,
    colors_rgb_2d: Tensor<B, 3>,
) -> Result<Tensor<B, 3>, Error> {
    if communicator.world_size() == 1 {
        return Ok(colors_rgb_2d);
    }

    let device = colors_rgb_2d.device();
    let dims = colors_rgb_2d.dims();

    let mut buffer = to_host_f32(colors_rgb_2d);
    communicator.all_reduce_f32(&mut buffer)?;

    Ok(from_host_f32(buffer, dims, &device))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{from_host_f32, to_host_f32};
    use crate::sync::ThreadGroup;
    use burn::backend::NdArray;

    #[test]
    fn partial_images_sum_to_the_same_image() {
        let mut group = ThreadGroup::connect(2).unwrap();

        let outputs: Vec<_> = std::thread::scope(|scope| {
            group
                .drain(..)
                .map(|communicator| {
                    scope.spawn(move || {
                        let device = Default::default();
                        let value = (communicator.rank() + 1) as f32;
                        let partial = from_host_f32::<NdArray, 3>(
                            vec![value; 2 * 2 * 3],
                            [2, 2, 3],
                            &device,
                        );
                        let image =
                            reduce_image(&communicator, partial).unwrap();
                        to_host_f32(image)
                    })
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect()
        });

        let target = vec![3.0; 2 * 2 * 3];
        for output in outputs {
            assert_eq!(output, target);
        }
    }

    #[test]
    fn single_worker_is_identity() {
        use crate::sync::SingleProcess;

        let device = Default::default();
        let partial = from_host_f32::<NdArray, 3>(
            vec![0.25; 12],
            [2, 2, 3],
            &device,
        );
        let image = reduce_image(&SingleProcess, partial).unwrap();
        assert_eq!(to_host_f32(image), vec![0.25; 12]);
    }
}
