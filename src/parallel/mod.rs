//! Process-level communication.
//!
//! Every process owns a contiguous block of rows. The few collectives the
//! preconditioner needs (gathering the border rows onto one process,
//! broadcasting small dense results, global sums) go through [`Comm`], so
//! the serial, shared-memory and MPI back ends are interchangeable.

use crate::error::HymlsError;

pub trait Comm {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self);
    /// Concatenation of every process's `local` (in rank order) on `root`;
    /// other processes get an empty vector.
    fn gather(&self, local: &[f64], root: usize) -> Result<Vec<f64>, HymlsError>;
    /// Overwrite `buf` on every process with its contents on `root`.
    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<(), HymlsError>;
    /// Global sum.
    fn all_reduce(&self, x: f64) -> f64;
    fn dot(&self, a: &[f64], b: &[f64]) -> f64 {
        let local = a.iter().zip(b).map(|(&x, &y)| x * y).sum::<f64>();
        self.all_reduce(local)
    }
    /// Entrywise global sum.
    fn all_reduce_in_place(&self, buf: &mut [f64]) {
        for x in buf.iter_mut() {
            *x = self.all_reduce(*x);
        }
    }
    /// Concatenation of every process's `local` on every process. `total`
    /// is the global length.
    fn all_gather(&self, local: &[f64], total: usize) -> Result<Vec<f64>, HymlsError> {
        let mut buf = self.gather(local, 0)?;
        if self.rank() == 0 && buf.len() != total {
            return Err(HymlsError::Comm(format!("gathered {} values, expected {total}", buf.len())));
        }
        buf.resize(total, 0.0);
        self.broadcast(&mut buf, 0)?;
        Ok(buf)
    }
}

/// Single process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl Comm for SerialComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) {}
    fn gather(&self, local: &[f64], root: usize) -> Result<Vec<f64>, HymlsError> {
        if root != 0 {
            return Err(HymlsError::Comm(format!("root {root} out of range for a serial communicator")));
        }
        Ok(local.to_vec())
    }
    fn broadcast(&self, _buf: &mut [f64], root: usize) -> Result<(), HymlsError> {
        if root != 0 {
            return Err(HymlsError::Comm(format!("root {root} out of range for a serial communicator")));
        }
        Ok(())
    }
    fn all_reduce(&self, x: f64) -> f64 {
        x
    }
}

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

#[cfg(feature = "rayon")]
pub mod rayon_comm;
#[cfg(feature = "rayon")]
pub use rayon_comm::RayonComm;
