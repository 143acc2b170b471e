//! MPI communicator.
//!
//! Owns the MPI universe, so MPI is finalized when the communicator is
//! dropped. Create exactly one per program.

use mpi::collective::SystemOperation;
use mpi::datatype::PartitionMut;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::Count;

use crate::error::HymlsError;

pub struct MpiComm {
    world: SimpleCommunicator,
    rank: usize,
    size: usize,
    _universe: Universe,
}

impl MpiComm {
    /// Initialize MPI. Fails if it was already initialized.
    pub fn new() -> Result<Self, HymlsError> {
        let universe = mpi::initialize().ok_or_else(|| HymlsError::Comm("MPI is already initialized".into()))?;
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        Ok(MpiComm { world, rank, size, _universe: universe })
    }

    fn check_root(&self, root: usize) -> Result<(), HymlsError> {
        if root >= self.size {
            return Err(HymlsError::Comm(format!("root {root} out of range for {} processes", self.size)));
        }
        Ok(())
    }
}

impl super::Comm for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.world.barrier();
    }

    fn gather(&self, local: &[f64], root: usize) -> Result<Vec<f64>, HymlsError> {
        self.check_root(root)?;
        let root_proc = self.world.process_at_rank(root as i32);
        let n = local.len() as Count;
        if self.rank != root {
            root_proc.gather_into(&n);
            root_proc.gather_varcount_into(local);
            return Ok(Vec::new());
        }
        let mut counts = vec![0 as Count; self.size];
        root_proc.gather_into_root(&n, &mut counts[..]);
        let displs: Vec<Count> = counts
            .iter()
            .scan(0, |acc, &c| {
                let d = *acc;
                *acc += c;
                Some(d)
            })
            .collect();
        let total = counts.iter().sum::<Count>() as usize;
        let mut buf = vec![0.0; total];
        {
            let mut partition = PartitionMut::new(&mut buf[..], counts, &displs[..]);
            root_proc.gather_varcount_into_root(local, &mut partition);
        }
        Ok(buf)
    }

    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<(), HymlsError> {
        self.check_root(root)?;
        self.world.process_at_rank(root as i32).broadcast_into(buf);
        Ok(())
    }

    fn all_reduce(&self, x: f64) -> f64 {
        let mut y = x;
        self.world.all_reduce_into(&x, &mut y, &SystemOperation::sum());
        y
    }

    fn all_reduce_in_place(&self, buf: &mut [f64]) {
        let local = buf.to_vec();
        self.world.all_reduce_into(&local[..], buf, &SystemOperation::sum());
    }
}
