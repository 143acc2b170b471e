//! Dense LU for small subdomain blocks.
//!
//! Partial pivoting is tried first. When it leaves a (numerically) zero
//! pivot the factorization is repeated with full pivoting, and only a zero
//! pivot there is reported as singular.

use faer::linalg::solvers::{FullPivLu, PartialPivLu, SolveCore};
use faer::{Conj, MatMut, MatRef};

use crate::error::{HymlsError, check_dim};
use crate::matrix::CsrMatrix;
use crate::solver::DirectSolver;

enum Factor {
    Partial(PartialPivLu<f64>),
    Full(FullPivLu<f64>),
}

/// LU solver on a dense copy of the matrix.
#[derive(Default)]
pub struct DenseLu {
    factor: Option<Factor>,
    n: usize,
}

fn min_pivot(u: MatRef<'_, f64>) -> (f64, f64) {
    let k = u.nrows().min(u.ncols());
    let diag = (0..k).map(|i| u[(i, i)].abs());
    diag.fold((f64::INFINITY, 0.0f64), |(lo, hi), d| (lo.min(d), hi.max(d)))
}

impl DenseLu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factor a dense matrix directly.
    pub fn factorize_dense(&mut self, a: MatRef<'_, f64>) -> Result<(), HymlsError> {
        check_dim("dense LU (square)", a.nrows(), a.ncols())?;
        self.n = a.nrows();
        if self.n == 0 {
            self.factor = None;
            return Ok(());
        }
        let partial = PartialPivLu::new(a);
        let (lo, hi) = min_pivot(partial.U());
        if lo > hi * f64::EPSILON * self.n as f64 {
            self.factor = Some(Factor::Partial(partial));
            return Ok(());
        }
        log::debug!("dense LU: tiny pivot {lo:e} with partial pivoting, retrying with full pivoting");
        let full = FullPivLu::new(a);
        let (lo, _) = min_pivot(full.U());
        if lo == 0.0 {
            self.factor = None;
            return Err(HymlsError::Factorization {
                context: format!("dense LU of order {}", self.n),
                detail: "matrix is singular".into(),
            });
        }
        self.factor = Some(Factor::Full(full));
        Ok(())
    }

    fn factor(&self) -> Result<&Factor, HymlsError> {
        self.factor
            .as_ref()
            .ok_or(HymlsError::State { component: "DenseLu::solve", expected: "factorize" })
    }
}

impl DirectSolver for DenseLu {
    fn analyze(&mut self, a: &CsrMatrix) -> Result<(), HymlsError> {
        check_dim("dense LU (square)", a.nrows(), a.ncols())
    }

    fn factorize(&mut self, a: &CsrMatrix) -> Result<(), HymlsError> {
        self.factorize_dense(a.to_dense().as_ref())
    }

    fn solve_in_place(&self, rhs: MatMut<'_, f64>) -> Result<(), HymlsError> {
        check_dim("dense LU solve (rows)", self.n, rhs.nrows())?;
        if self.n == 0 {
            return Ok(());
        }
        match self.factor()? {
            Factor::Partial(lu) => lu.solve_in_place_with_conj(Conj::No, rhs),
            Factor::Full(lu) => lu.solve_in_place_with_conj(Conj::No, rhs),
        }
        Ok(())
    }

    fn solve_transpose_in_place(&self, rhs: MatMut<'_, f64>) -> Result<(), HymlsError> {
        check_dim("dense LU transpose solve (rows)", self.n, rhs.nrows())?;
        if self.n == 0 {
            return Ok(());
        }
        match self.factor()? {
            Factor::Partial(lu) => lu.solve_transpose_in_place_with_conj(Conj::No, rhs),
            Factor::Full(lu) => lu.solve_transpose_in_place_with_conj(Conj::No, rhs),
        }
        Ok(())
    }

    fn dim(&self) -> usize {
        self.n
    }

    fn factor_flops(&self) -> f64 {
        let n = self.n as f64;
        2.0 * n * n * n / 3.0
    }

    fn solve_flops(&self, nrhs: usize) -> f64 {
        let n = self.n as f64;
        2.0 * n * n * nrhs as f64
    }

    fn label(&self) -> &'static str {
        "dense LU"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;

    #[test]
    fn dense_lu_solves_small_system() {
        // [[2,1,1],[1,3,2],[1,0,0]] x = [4,5,6] has x = [6,15,-23]
        let a = CsrMatrix::from_triplets(
            3,
            3,
            vec![(0, 0, 2.0), (0, 1, 1.0), (0, 2, 1.0), (1, 0, 1.0), (1, 1, 3.0), (1, 2, 2.0), (2, 0, 1.0)],
        );
        let mut lu = DenseLu::new();
        lu.factorize(&a).unwrap();
        let mut x = Mat::from_fn(3, 1, |i, _| [4.0, 5.0, 6.0][i]);
        lu.solve_in_place(x.as_mut()).unwrap();
        let expected = [6.0, 15.0, -23.0];
        for i in 0..3 {
            assert!((x[(i, 0)] - expected[i]).abs() < 1e-10, "x[{i}] = {}", x[(i, 0)]);
        }
    }

    #[test]
    fn transpose_solve_inverts_the_transpose() {
        let a = Mat::from_fn(4, 4, |i, j| if i == j { 4.0 } else { (i as f64) - (j as f64) * 0.5 });
        let mut lu = DenseLu::new();
        lu.factorize_dense(a.as_ref()).unwrap();
        let b = Mat::from_fn(4, 1, |i, _| 1.0 + i as f64);
        let mut x = b.clone();
        lu.solve_transpose_in_place(x.as_mut()).unwrap();
        let r = a.transpose() * x.as_ref() - b.as_ref();
        assert!(r.norm_max() < 1e-12);
    }

    #[test]
    fn singular_matrix_is_reported() {
        let a = Mat::from_fn(2, 2, |_, _| 1.0);
        let err = DenseLu::new().factorize_dense(a.as_ref()).unwrap_err();
        assert!(matches!(err, HymlsError::Factorization { .. }));
        let unfactored = DenseLu { factor: None, n: 2 };
        let mut x = Mat::<f64>::zeros(2, 1);
        assert!(matches!(unfactored.solve_in_place(x.as_mut()), Err(HymlsError::State { .. })));
    }
}
