//! Sparse LU for the coarsest level and for large subdomains.
//!
//! The solver optionally reorders the matrix with reverse Cuthill–McKee and
//! equilibrates rows and columns before handing it to faer's supernodal LU.
//! The symbolic analysis is kept and reused as long as the pattern of the
//! matrix does not change.

use std::panic::AssertUnwindSafe;

use faer::linalg::solvers::SolveCore;
use faer::sparse::linalg::solvers::{Lu, SymbolicLu};
use faer::{Conj, Mat, MatMut};

use crate::config::DirectSolverOptions;
use crate::error::{HymlsError, check_dim};
use crate::matrix::CsrMatrix;
use crate::solver::DirectSolver;
use crate::solver::ordering::reverse_cuthill_mckee;

/// Sparse LU with reusable symbolic analysis.
pub struct SparseLu {
    opts: DirectSolverOptions,
    n: usize,
    /// `perm[new] = old`; identity when no custom ordering is used.
    perm: Vec<usize>,
    row_scale: Vec<f64>,
    col_scale: Vec<f64>,
    pattern: Option<(Vec<usize>, Vec<usize>)>,
    symbolic: Option<SymbolicLu<usize>>,
    lu: Option<Lu<usize, f64>>,
    nnz: usize,
}

fn factor_error(context: &str, e: impl std::fmt::Debug) -> HymlsError {
    HymlsError::Factorization { context: context.into(), detail: format!("{e:?}") }
}

/// Row scaling `1/max_j |a_ij|`, then column scaling of the row-scaled matrix.
fn equilibrate(a: &CsrMatrix) -> (Vec<f64>, Vec<f64>) {
    let inv = |m: f64| if m > 0.0 { 1.0 / m } else { 1.0 };
    let r: Vec<f64> = (0..a.nrows())
        .map(|i| inv(a.row(i).1.iter().fold(0.0f64, |m, v| m.max(v.abs()))))
        .collect();
    let mut cmax = vec![0.0f64; a.ncols()];
    for (i, ri) in r.iter().enumerate() {
        let (cols, vals) = a.row(i);
        for (&j, v) in cols.iter().zip(vals) {
            cmax[j] = cmax[j].max((ri * v).abs());
        }
    }
    (r, cmax.into_iter().map(inv).collect())
}

impl SparseLu {
    pub fn new(opts: DirectSolverOptions) -> Self {
        Self {
            opts,
            n: 0,
            perm: Vec::new(),
            row_scale: Vec::new(),
            col_scale: Vec::new(),
            pattern: None,
            symbolic: None,
            lu: None,
            nnz: 0,
        }
    }

    fn pattern_changed(&self, a: &CsrMatrix) -> bool {
        match &self.pattern {
            Some((rp, ci)) => rp.as_slice() != a.row_ptr() || ci.as_slice() != a.col_idx(),
            None => true,
        }
    }

    /// Scaled and permuted copy of `a`, the matrix that is actually factored.
    fn prepare(&mut self, a: &CsrMatrix) -> CsrMatrix {
        let scaled = if self.opts.custom_scaling {
            let (r, c) = equilibrate(a);
            let s = a.scale(&r, &c);
            self.row_scale = r;
            self.col_scale = c;
            s
        } else {
            self.row_scale = vec![1.0; a.nrows()];
            self.col_scale = vec![1.0; a.ncols()];
            a.clone()
        };
        if self.opts.custom_ordering { scaled.permute(&self.perm) } else { scaled }
    }

    fn lu(&self) -> Result<&Lu<usize, f64>, HymlsError> {
        self.lu.as_ref().ok_or(HymlsError::State { component: "SparseLu::solve", expected: "factorize" })
    }

    /// `b̂[new] = s[old] · b[old]`
    fn forward(&self, rhs: &MatMut<'_, f64>, scale: &[f64]) -> Mat<f64> {
        Mat::from_fn(self.n, rhs.ncols(), |i, j| {
            let old = self.perm[i];
            scale[old] * rhs[(old, j)]
        })
    }

    /// `x[old] = s[old] · ŷ[new]`
    fn backward(&self, y: &Mat<f64>, scale: &[f64], mut rhs: MatMut<'_, f64>) {
        for j in 0..y.ncols() {
            for (i, &old) in self.perm.iter().enumerate() {
                rhs[(old, j)] = scale[old] * y[(i, j)];
            }
        }
    }
}

impl DirectSolver for SparseLu {
    fn analyze(&mut self, a: &CsrMatrix) -> Result<(), HymlsError> {
        check_dim("sparse LU (square)", a.nrows(), a.ncols())?;
        self.n = a.nrows();
        self.perm = if self.opts.custom_ordering {
            reverse_cuthill_mckee(&a.adjacency())
        } else {
            (0..self.n).collect()
        };
        self.lu = None;
        if self.n == 0 {
            self.symbolic = None;
            self.pattern = Some((a.row_ptr().to_vec(), a.col_idx().to_vec()));
            return Ok(());
        }
        let permuted = if self.opts.custom_ordering { a.permute(&self.perm) } else { a.clone() };
        let csc = permuted.to_col_major()?;
        let symbolic = SymbolicLu::try_new(csc.symbolic()).map_err(|e| factor_error("sparse LU analysis", e))?;
        self.symbolic = Some(symbolic);
        self.pattern = Some((a.row_ptr().to_vec(), a.col_idx().to_vec()));
        if self.opts.output_level >= 2 {
            log::info!("sparse LU: analyzed pattern of order {} with {} entries", self.n, a.nnz());
        }
        Ok(())
    }

    fn factorize(&mut self, a: &CsrMatrix) -> Result<(), HymlsError> {
        if self.pattern_changed(a) {
            self.analyze(a)?;
        }
        self.nnz = a.nnz();
        if self.n == 0 {
            return Ok(());
        }
        self.lu = None;
        let prepared = self.prepare(a);
        let csc = prepared.to_col_major()?;
        let symbolic = self
            .symbolic
            .clone()
            .ok_or(HymlsError::State { component: "SparseLu::factorize", expected: "analyze" })?;
        let context = format!("sparse LU of order {}", self.n);
        // faer asserts on a zero pivot instead of reporting it
        let lu = std::panic::catch_unwind(AssertUnwindSafe(|| Lu::try_new_with_symbolic(symbolic, csc.as_ref())))
            .map_err(|_| factor_error(&context, "numerically singular matrix"))?
            .map_err(|e| factor_error(&context, e))?;
        // a zero pivot that slipped through shows up as a non-finite solution
        let mut ones = Mat::from_fn(self.n, 1, |_, _| 1.0);
        lu.solve_in_place_with_conj(Conj::No, ones.as_mut());
        if !(0..self.n).all(|i| ones[(i, 0)].is_finite()) {
            return Err(factor_error(&context, "non-finite factors"));
        }
        self.lu = Some(lu);
        if self.opts.output_level >= 1 {
            log::info!(
                "sparse LU: factored order {} ({} nnz, ordering={}, scaling={})",
                self.n,
                self.nnz,
                self.opts.custom_ordering,
                self.opts.custom_scaling
            );
        }
        Ok(())
    }

    fn solve_in_place(&self, rhs: MatMut<'_, f64>) -> Result<(), HymlsError> {
        check_dim("sparse LU solve (rows)", self.n, rhs.nrows())?;
        if self.n == 0 {
            return Ok(());
        }
        let lu = self.lu()?;
        let mut y = self.forward(&rhs, &self.row_scale);
        lu.solve_in_place_with_conj(Conj::No, y.as_mut());
        self.backward(&y, &self.col_scale, rhs);
        Ok(())
    }

    fn solve_transpose_in_place(&self, rhs: MatMut<'_, f64>) -> Result<(), HymlsError> {
        check_dim("sparse LU transpose solve (rows)", self.n, rhs.nrows())?;
        if self.n == 0 {
            return Ok(());
        }
        let lu = self.lu()?;
        let mut y = self.forward(&rhs, &self.col_scale);
        lu.solve_transpose_in_place_with_conj(Conj::No, y.as_mut());
        self.backward(&y, &self.row_scale, rhs);
        Ok(())
    }

    fn dim(&self) -> usize {
        self.n
    }

    fn factor_flops(&self) -> f64 {
        // rough estimate from the fill of a banded factorization
        let n = self.n.max(1) as f64;
        let per_row = self.nnz as f64 / n;
        2.0 * n * per_row * per_row
    }

    fn solve_flops(&self, nrhs: usize) -> f64 {
        4.0 * self.nnz as f64 * nrhs as f64
    }

    fn label(&self) -> &'static str {
        "sparse LU"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::gallery::{convection_diffusion_2d, laplace_2d};

    fn check_solves(opts: DirectSolverOptions, a: &CsrMatrix) {
        let n = a.nrows();
        let mut lu = SparseLu::new(opts);
        lu.factorize(a).unwrap();
        let b = Mat::from_fn(n, 2, |i, j| ((i + 3 * j) as f64).cos());

        let mut x = b.clone();
        lu.solve_in_place(x.as_mut()).unwrap();
        let r = a.mul_dense(x.as_ref()) - b.as_ref();
        assert!(r.norm_max() < 1e-10, "residual {}", r.norm_max());

        let mut xt = b.clone();
        lu.solve_transpose_in_place(xt.as_mut()).unwrap();
        let rt = a.transpose_mul_dense(xt.as_ref()) - b.as_ref();
        assert!(rt.norm_max() < 1e-10, "transpose residual {}", rt.norm_max());
    }

    #[test]
    fn plain_sparse_lu() {
        check_solves(DirectSolverOptions::default(), &convection_diffusion_2d(6, 5, 2.0));
    }

    #[test]
    fn ordering_and_scaling_give_the_same_solution() {
        let opts = DirectSolverOptions { custom_ordering: true, custom_scaling: true, output_level: 1 };
        let a = convection_diffusion_2d(7, 4, 5.0).scale(&[3.0; 28], &[1.0; 28]);
        check_solves(opts, &a);
    }

    #[test]
    fn refactor_reuses_the_symbolic_analysis() {
        let a = laplace_2d(4, 4);
        let mut lu = SparseLu::new(DirectSolverOptions::default());
        lu.factorize(&a).unwrap();
        assert!(!lu.pattern_changed(&a));
        let doubled = a.scale(&[2.0; 16], &[1.0; 16]);
        lu.factorize(&doubled).unwrap();
        let mut x = Mat::from_fn(16, 1, |_, _| 2.0);
        lu.solve_in_place(x.as_mut()).unwrap();
        let ax = a.mul_dense(x.as_ref());
        assert!((ax[(5, 0)] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn singular_matrix_is_a_factorization_error() {
        let a = CsrMatrix::from_triplets(
            3,
            3,
            vec![(0, 0, 1.0), (0, 1, 1.0), (0, 2, 0.5), (1, 0, 1.0), (1, 1, 1.0), (1, 2, 0.5), (2, 2, 1.0)],
        );
        let mut lu = SparseLu::new(DirectSolverOptions::default());
        assert!(matches!(lu.factorize(&a), Err(HymlsError::Factorization { .. })));
        let mut x = Mat::zeros(3, 1);
        assert!(matches!(lu.solve_in_place(x.as_mut()), Err(HymlsError::State { .. })));
    }
}
