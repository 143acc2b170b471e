//! Direct and Krylov solver interfaces.
//!
//! Direct solvers factor the interior block of every subdomain and the
//! reduced system at the coarsest level. The Krylov solver wraps a
//! preconditioner for end-to-end solves.

use faer::MatMut;

use crate::config::{DirectSolverOptions, SubdomainSolverKind};
use crate::core::traits::Operator;
use crate::error::HymlsError;
use crate::matrix::CsrMatrix;
use crate::preconditioner::InversePreconditioner;
use crate::utils::convergence::SolveStats;

/// Factor-once, solve-many direct solver.
pub trait DirectSolver: Send + Sync {
    /// Symbolic analysis of the sparsity pattern; may be a no-op.
    fn analyze(&mut self, a: &CsrMatrix) -> Result<(), HymlsError>;
    /// Numeric factorization. Runs `analyze` first when the pattern changed.
    fn factorize(&mut self, a: &CsrMatrix) -> Result<(), HymlsError>;
    /// `B ← A⁻¹ B`
    fn solve_in_place(&self, rhs: MatMut<'_, f64>) -> Result<(), HymlsError>;
    /// `B ← A⁻ᵀ B`
    fn solve_transpose_in_place(&self, rhs: MatMut<'_, f64>) -> Result<(), HymlsError>;
    /// Order of the factored matrix.
    fn dim(&self) -> usize;
    /// Estimated flops of the last factorization.
    fn factor_flops(&self) -> f64;
    /// Estimated flops of one solve with `nrhs` right-hand sides.
    fn solve_flops(&self, nrhs: usize) -> f64;
    fn label(&self) -> &'static str;
}

/// Construct an unfactored solver of the requested kind.
pub fn new_direct_solver(kind: SubdomainSolverKind, opts: &DirectSolverOptions) -> Box<dyn DirectSolver> {
    match kind {
        SubdomainSolverKind::DenseLu => Box::new(DenseLu::new()),
        SubdomainSolverKind::SparseLu => Box::new(SparseLu::new(opts.clone())),
    }
}

/// Common interface for iterative solvers over an operator and an optional preconditioner.
pub trait LinearSolver {
    /// Solve `A x = b`; `x` holds the initial guess on entry.
    fn solve(
        &mut self,
        a: &dyn Operator,
        pc: Option<&dyn InversePreconditioner>,
        b: &[f64],
        x: &mut [f64],
    ) -> Result<SolveStats<f64>, HymlsError>;
}

pub mod direct_lu;
pub use direct_lu::DenseLu;

pub mod sparse_lu;
pub use sparse_lu::SparseLu;

pub mod ordering;

pub mod gmres;
pub use gmres::{GmresSolver, Preconditioning};
