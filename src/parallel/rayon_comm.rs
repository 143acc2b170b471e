// Shared-memory communicator: one process, rayon threads inside it.

use rayon::prelude::*;

use crate::error::HymlsError;

pub struct RayonComm {
    threads: usize,
}

impl RayonComm {
    /// Size the global rayon pool to the machine; an already built pool is kept.
    pub fn new() -> Self {
        let threads = num_cpus::get();
        rayon::ThreadPoolBuilder::new().num_threads(threads).build_global().ok();
        RayonComm { threads }
    }

    pub fn num_threads(&self) -> usize {
        self.threads
    }
}

impl Default for RayonComm {
    fn default() -> Self {
        Self::new()
    }
}

impl super::Comm for RayonComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) {
        rayon::scope(|_| {});
    }
    fn gather(&self, local: &[f64], root: usize) -> Result<Vec<f64>, HymlsError> {
        if root != 0 {
            return Err(HymlsError::Comm(format!("root {root} out of range for a shared-memory communicator")));
        }
        Ok(local.to_vec())
    }
    fn broadcast(&self, _buf: &mut [f64], _root: usize) -> Result<(), HymlsError> {
        Ok(())
    }
    fn all_reduce(&self, x: f64) -> f64 {
        x
    }
    fn dot(&self, a: &[f64], b: &[f64]) -> f64 {
        a.par_iter().zip(b.par_iter()).map(|(x, y)| x * y).sum()
    }
}
