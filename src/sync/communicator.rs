pub use crate::error::Error;

use std::sync::{Arc, Barrier, Mutex};

/// Blocking collective operations over a group of workers.
///
/// Every operation is a synchronization point: a call returns only after all
/// workers of the group have reached the same call. Workers must issue their
/// collectives in the same order; there is no asynchronous variant and no
/// partial-failure recovery.
pub trait Communicator: Send + Sync {
    fn world_size(&self) -> usize;

    fn rank(&self) -> usize;

    /// Blocking until every worker arrives.
    fn barrier(&self) -> Result<(), Error>;

    /// Element-wise sum over all workers, written back into `buffer`.
    ///
    /// The sum is accumulated in rank order on every worker, so the result is
    /// identical everywhere, bit for bit.
    fn all_reduce_f32(
        &self,
        buffer: &mut [f32],
    ) -> Result<(), Error>;

    /// Every worker's `local` buffer, in rank order.
    fn all_gather_f64(
        &self,
        local: &[f64],
    ) -> Result<Vec<Vec<f64>>, Error>;

    /// Personalized exchange: `sends[j]` is delivered to worker `j`, which
    /// receives it at index `self.rank()` of its own result.
    fn all_to_all_bytes(
        &self,
        sends: Vec<Vec<u8>>,
    ) -> Result<Vec<Vec<u8>>, Error>;
}

/// The whole group is this process: every collective is local.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    #[inline]
    fn world_size(&self) -> usize {
        1
    }

    #[inline]
    fn rank(&self) -> usize {
        0
    }

    fn barrier(&self) -> Result<(), Error> {
        Ok(())
    }

    fn all_reduce_f32(
        &self,
        _buffer: &mut [f32],
    ) -> Result<(), Error> {
        Ok(())
    }

    fn all_gather_f64(
        &self,
        local: &[f64],
    ) -> Result<Vec<Vec<f64>>, Error> {
        Ok(vec![local.to_vec()])
    }

    fn all_to_all_bytes(
        &self,
        sends: Vec<Vec<u8>>,
    ) -> Result<Vec<Vec<u8>>, Error> {
        if sends.len() != 1 {
            return Err(Error::MismatchedWorkerCount {
                expected: 1,
                found: sends.len(),
            });
        }
        Ok(sends)
    }
}

/// One worker of an in-process group, one thread per rank.
///
/// A panicking peer poisons the shared state, so every other worker observes
/// a group failure instead of hanging on a slot that will never be filled.
#[derive(Clone)]
pub struct ThreadGroup {
    rank: usize,
    shared: Arc<ThreadGroupShared>,
}

struct ThreadGroupShared {
    world_size: usize,
    barrier: Barrier,
    reduce_slots: Mutex<Vec<Option<Vec<f32>>>>,
    gather_slots: Mutex<Vec<Option<Vec<f64>>>>,
    exchange_slots: Mutex<Vec<Vec<Option<Vec<u8>>>>>,
}

impl ThreadGroup {
    /// Connecting a full group; hand one handle to each worker thread.
    pub fn connect(world_size: usize) -> Result<Vec<Self>, Error> {
        if world_size == 0 {
            return Err(Error::ZeroWorldSize);
        }

        let shared = Arc::new(ThreadGroupShared {
            world_size,
            barrier: Barrier::new(world_size),
            reduce_slots: Mutex::new(vec![None; world_size]),
            gather_slots: Mutex::new(vec![None; world_size]),
            exchange_slots: Mutex::new(vec![vec![None; world_size]; world_size]),
        });

        Ok((0..world_size)
            .map(|rank| Self {
                rank,
                shared: shared.to_owned(),
            })
            .collect())
    }
}

impl Communicator for ThreadGroup {
    #[inline]
    fn world_size(&self) -> usize {
        self.shared.world_size
    }

    #[inline]
    fn rank(&self) -> usize {
        self.rank
    }

    fn barrier(&self) -> Result<(), Error> {
        self.shared.barrier.wait();
        Ok(())
    }

    fn all_reduce_f32(
        &self,
        buffer: &mut [f32],
    ) -> Result<(), Error> {
        {
            let mut slots = self
                .shared
                .reduce_slots
                .lock()
                .map_err(|_| Error::PoisonedWorkerGroup)?;
            slots[self.rank] = Some(buffer.to_vec());
        }
        self.shared.barrier.wait();

        {
            let slots = self
                .shared
                .reduce_slots
                .lock()
                .map_err(|_| Error::PoisonedWorkerGroup)?;

            buffer.fill(0.0);
            for slot in slots.iter() {
                let values =
                    slot.as_ref().ok_or(Error::PoisonedWorkerGroup)?;
                if values.len() != buffer.len() {
                    return Err(Error::MismatchedBufferLength {
                        expected: buffer.len(),
                        found: values.len(),
                    });
                }
                for (accumulated, value) in buffer.iter_mut().zip(values) {
                    *accumulated += value;
                }
            }
        }
        self.shared.barrier.wait();

        if self.rank == 0 {
            let mut slots = self
                .shared
                .reduce_slots
                .lock()
                .map_err(|_| Error::PoisonedWorkerGroup)?;
            slots.iter_mut().for_each(|slot| *slot = None);
        }
        self.shared.barrier.wait();

        Ok(())
    }

    fn all_gather_f64(
        &self,
        local: &[f64],
    ) -> Result<Vec<Vec<f64>>, Error> {
        {
            let mut slots = self
                .shared
                .gather_slots
                .lock()
                .map_err(|_| Error::PoisonedWorkerGroup)?;
            slots[self.rank] = Some(local.to_vec());
        }
        self.shared.barrier.wait();

        let gathered = {
            let slots = self
                .shared
                .gather_slots
                .lock()
                .map_err(|_| Error::PoisonedWorkerGroup)?;
            slots
                .iter()
                .map(|slot| {
                    slot.to_owned().ok_or(Error::PoisonedWorkerGroup)
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        self.shared.barrier.wait();

        if self.rank == 0 {
            let mut slots = self
                .shared
                .gather_slots
                .lock()
                .map_err(|_| Error::PoisonedWorkerGroup)?;
            slots.iter_mut().for_each(|slot| *slot = None);
        }
        self.shared.barrier.wait();

        Ok(gathered)
    }

    fn all_to_all_bytes(
        &self,
        sends: Vec<Vec<u8>>,
    ) -> Result<Vec<Vec<u8>>, Error> {
        if sends.len() != self.shared.world_size {
            return Err(Error::MismatchedWorkerCount {
                expected: self.shared.world_size,
                found: sends.len(),
            });
        }

        {
            let mut slots = self
                .shared
                .exchange_slots
                .lock()
                .map_err(|_| Error::PoisonedWorkerGroup)?;
            slots[self.rank] = sends.into_iter().map(Some).collect();
        }
        self.shared.barrier.wait();

        let received = {
            let mut slots = self
                .shared
                .exchange_slots
                .lock()
                .map_err(|_| Error::PoisonedWorkerGroup)?;
            (0..self.shared.world_size)
                .map(|source| {
                    slots[source][self.rank]
                        .take()
                        .ok_or(Error::PoisonedWorkerGroup)
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        self.shared.barrier.wait();

        Ok(received)
    }
}

impl std::fmt::Debug for ThreadGroup {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ThreadGroup")
            .field("rank", &self.rank)
            .field("world_size", &self.shared.world_size)
            .finish()
    }
}
