//! hymls: hierarchical multi-level Schur-complement preconditioner over Faer
//!
//! This crate provides a recursive domain-decomposition preconditioner for
//! sparse linear systems on structured grids (Laplace, convection-diffusion,
//! Stokes/Navier-Stokes Jacobians), together with the bordered and projected
//! operators it is used with and a restarted GMRES to drive it.

pub mod parallel;

pub mod config;
pub mod core;
pub mod error;
pub mod matrix;
pub mod operator;
pub mod partition;
pub mod preconditioner;
pub mod solver;
pub mod transform;
pub mod utils;

// Re-exports for convenience
pub use config::*;
pub use crate::core::*;
pub use error::*;
pub use matrix::*;
pub use operator::*;
pub use partition::*;
pub use preconditioner::*;
pub use solver::*;
pub use transform::*;
pub use utils::*;

// Re-export SolveStats at the crate root for convenience
pub use utils::convergence::SolveStats;
