//! Configuration of the preconditioner hierarchy.

pub mod options;
pub use options::{
    DirectSolverOptions, HymlsParams, PartitionerKind, PreconditionerOptions, ProblemOptions,
    SubdomainSolverKind,
};
