//! Preconditioners.
//!
//! [`InversePreconditioner`] is the runtime capability the Krylov solver
//! consumes: set up once, then apply `M⁻¹` many times. The recursive
//! domain-decomposition [`Preconditioner`] is the main implementation;
//! [`Ilu0`] and [`Jacobi`] are cheap alternatives selected through
//! [`build_preconditioner`].

use std::sync::Arc;

use faer::{Mat, MatMut, MatRef};

use crate::config::HymlsParams;
use crate::error::{HymlsError, check_dim};
use crate::matrix::CsrMatrix;

pub mod hymls;
pub mod ilu;
pub mod jacobi;
pub mod matrix_block;
pub mod schur_complement;
pub mod schur_preconditioner;

pub use hymls::Preconditioner;
pub use ilu::Ilu0;
pub use jacobi::Jacobi;
pub use matrix_block::{BlockState, MatrixBlock};
pub use schur_complement::SchurComplement;
pub use schur_preconditioner::SchurPreconditioner;

/// An approximation `M⁻¹ ≈ A⁻¹` with a two-phase setup.
pub trait InversePreconditioner {
    /// Structural setup (partitioning, symbolic analysis). Repeated calls are no-ops.
    fn initialize(&mut self) -> Result<(), HymlsError>;
    /// Numerical setup; runs `initialize` first if needed.
    fn compute(&mut self) -> Result<(), HymlsError>;
    /// `Y = M⁻¹ X`
    fn apply_inverse(&self, x: MatRef<'_, f64>, y: MatMut<'_, f64>) -> Result<(), HymlsError>;
    fn is_initialized(&self) -> bool;
    fn is_computed(&self) -> bool;
    /// Condition estimate, or −1 when not available.
    fn condest(&self) -> f64 {
        -1.0
    }
    fn label(&self) -> String;
    fn nrows(&self) -> usize;
}

/// Preconditioner selected at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcKind {
    /// Recursive Schur-complement domain decomposition.
    Hymls,
    /// Incomplete LU with the pattern of `A`.
    Ilu0,
    /// Inverse of the diagonal.
    Jacobi,
}

/// Construct (but do not compute) a preconditioner for `a`.
pub fn build_preconditioner(
    kind: PcKind,
    a: Arc<CsrMatrix>,
    params: &HymlsParams,
) -> Result<Box<dyn InversePreconditioner>, HymlsError> {
    Ok(match kind {
        PcKind::Hymls => Box::new(Preconditioner::new(a, params.clone())?),
        PcKind::Ilu0 => Box::new(Ilu0::new(a)),
        PcKind::Jacobi => Box::new(Jacobi::new(a)),
    })
}

/// Low-rank border `[A V; W' C]` of a square operator.
#[derive(Debug, Clone)]
pub struct Border {
    pub v: Mat<f64>,
    pub w: Mat<f64>,
    pub c: Mat<f64>,
}

impl Border {
    /// `W` defaults to `V`, `C` to zero.
    pub fn new(v: Mat<f64>, w: Option<Mat<f64>>, c: Option<Mat<f64>>) -> Result<Self, HymlsError> {
        let k = v.ncols();
        let w = w.unwrap_or_else(|| v.clone());
        let c = c.unwrap_or_else(|| Mat::zeros(k, k));
        check_dim("border (rows of W)", v.nrows(), w.nrows())?;
        check_dim("border (columns of W)", k, w.ncols())?;
        check_dim("border (rows of C)", k, c.nrows())?;
        check_dim("border (columns of C)", k, c.ncols())?;
        Ok(Self { v, w, c })
    }

    /// Number of border vectors.
    pub fn width(&self) -> usize {
        self.v.ncols()
    }

    pub fn nrows(&self) -> usize {
        self.v.nrows()
    }

    /// The border restricted to rows `idx`, sharing `C`.
    pub fn restrict(&self, idx: &[usize]) -> Self {
        use crate::core::wrappers::gather_rows;
        Self {
            v: gather_rows(self.v.as_ref(), idx),
            w: gather_rows(self.w.as_ref(), idx),
            c: self.c.clone(),
        }
    }
}
