//! Generalized Minimal Residual (GMRES) solver with fixed restart (Saad §6.4)
//!
//! Restarted GMRES over any [`Operator`], with left, right or no
//! preconditioning through an [`InversePreconditioner`]. The Arnoldi step
//! uses classical Gram–Schmidt with one reorthogonalization pass, the
//! Hessenberg least-squares problem is updated with Givens rotations, and a
//! happy breakdown ends the cycle early.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd Edition. SIAM. §6.4

use crate::core::traits::Operator;
use crate::core::wrappers::{dot, norm2};
use crate::error::{HymlsError, check_dim};
use crate::matrix::dense_utils::{view, view_mut};
use crate::preconditioner::InversePreconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::{Convergence, SolveStats};

/// Preconditioning mode for GMRES (none, left, or right)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Preconditioning {
    None,
    Left,
    Right,
}

/// GMRES solver struct with restart and preconditioning options.
pub struct GmresSolver {
    /// Number of Arnoldi vectors before restart
    pub restart: usize,
    /// Convergence criteria (tolerance and max iterations)
    pub conv: Convergence<f64>,
    /// Preconditioning mode
    pub preconditioning: Preconditioning,
}

fn apply_op(a: &dyn Operator, x: &[f64]) -> Result<Vec<f64>, HymlsError> {
    let mut y = vec![0.0; a.nrows()];
    a.apply(view(x, x.len(), 1)?, view_mut(&mut y, a.nrows(), 1)?)?;
    Ok(y)
}

fn apply_pc(pc: &dyn InversePreconditioner, x: &[f64]) -> Result<Vec<f64>, HymlsError> {
    let mut y = vec![0.0; x.len()];
    pc.apply_inverse(view(x, x.len(), 1)?, view_mut(&mut y, x.len(), 1)?)?;
    Ok(y)
}

impl GmresSolver {
    /// Create a new GMRES solver with restart, tolerance, and max iterations.
    /// Right preconditioning is the default.
    pub fn new(restart: usize, tol: f64, max_iters: usize) -> Self {
        Self {
            restart: restart.max(1),
            conv: Convergence { tol, max_iters },
            preconditioning: Preconditioning::Right,
        }
    }

    /// Set the preconditioning mode (left, right, or none).
    pub fn with_preconditioning(mut self, mode: Preconditioning) -> Self {
        self.preconditioning = mode;
        self
    }

    /// `b - A x`, preconditioned from the left when requested.
    fn residual(
        &self,
        a: &dyn Operator,
        pc: Option<&dyn InversePreconditioner>,
        b: &[f64],
        x: &[f64],
    ) -> Result<Vec<f64>, HymlsError> {
        let ax = apply_op(a, x)?;
        let r: Vec<f64> = b.iter().zip(&ax).map(|(bi, axi)| bi - axi).collect();
        match (self.preconditioning, pc) {
            (Preconditioning::Left, Some(pc)) => apply_pc(pc, &r),
            _ => Ok(r),
        }
    }

    /// Orthogonalize `w` against `v_basis` twice, recording the coefficients in column `j` of `h`.
    fn orthogonalize(w: &mut [f64], v_basis: &[Vec<f64>], h: &mut [Vec<f64>], j: usize) {
        for pass in 0..2 {
            for (i, vi) in v_basis.iter().enumerate().take(j + 1) {
                let hij = dot(w, vi);
                h[i][j] = if pass == 0 { hij } else { h[i][j] + hij };
                for (wk, vik) in w.iter_mut().zip(vi) {
                    *wk -= hij * vik;
                }
            }
        }
        h[j + 1][j] = norm2(w);
    }

    /// Apply Givens rotations to Hessenberg matrix and update g vector.
    fn apply_givens_and_update_g(h: &mut [Vec<f64>], g: &mut [f64], cs: &mut [f64], sn: &mut [f64], j: usize) {
        for i in 0..j {
            let temp = cs[i] * h[i][j] + sn[i] * h[i + 1][j];
            h[i + 1][j] = -sn[i] * h[i][j] + cs[i] * h[i + 1][j];
            h[i][j] = temp;
        }
        let h_kk = h[j][j];
        let h_k1k = h[j + 1][j];
        let r = h_kk.hypot(h_k1k);
        if r == 0.0 {
            cs[j] = 1.0;
            sn[j] = 0.0;
        } else {
            cs[j] = h_kk / r;
            sn[j] = h_k1k / r;
        }
        h[j][j] = cs[j] * h_kk + sn[j] * h_k1k;
        h[j + 1][j] = 0.0;
        let temp = cs[j] * g[j] + sn[j] * g[j + 1];
        g[j + 1] = -sn[j] * g[j] + cs[j] * g[j + 1];
        g[j] = temp;
    }

    /// Solve upper-triangular system Hy = g for y, with zero-pivot protection.
    fn back_substitution(h: &[Vec<f64>], g: &[f64], m: usize) -> Vec<f64> {
        let mut y = vec![0.0; m];
        for i in (0..m).rev() {
            let mut s = g[i];
            for k in (i + 1)..m {
                s -= h[i][k] * y[k];
            }
            y[i] = if h[i][i] != 0.0 { s / h[i][i] } else { 0.0 };
        }
        y
    }
}

impl LinearSolver for GmresSolver {
    fn solve(
        &mut self,
        a: &dyn Operator,
        pc: Option<&dyn InversePreconditioner>,
        b: &[f64],
        x: &mut [f64],
    ) -> Result<SolveStats<f64>, HymlsError> {
        let n = b.len();
        check_dim("GMRES (rhs length)", a.nrows(), n)?;
        check_dim("GMRES (solution length)", a.ncols(), x.len())?;
        let right_pc = match (self.preconditioning, pc) {
            (Preconditioning::Right, Some(pc)) => Some(pc),
            _ => None,
        };
        let left_pc = match (self.preconditioning, pc) {
            (Preconditioning::Left, Some(pc)) => Some(pc),
            _ => None,
        };

        let mut r = self.residual(a, pc, b, x)?;
        let mut beta = norm2(&r);
        let res0 = beta;
        let mut stats = SolveStats { iterations: 0, final_residual: beta, converged: beta == 0.0 };
        if stats.converged {
            return Ok(stats);
        }
        let m_max = self.restart;
        let mut iteration = 0;
        while iteration < self.conv.max_iters {
            let mut v_basis: Vec<Vec<f64>> = Vec::with_capacity(m_max + 1);
            let mut z_basis: Vec<Vec<f64>> = Vec::with_capacity(m_max);
            v_basis.push(r.iter().map(|ri| ri / beta).collect());
            let mut h = vec![vec![0.0; m_max]; m_max + 1];
            let mut g = vec![0.0; m_max + 1];
            g[0] = beta;
            let mut cs = vec![0.0; m_max];
            let mut sn = vec![0.0; m_max];
            let mut m = 0;
            for j in 0..m_max {
                iteration += 1;
                let mut w = match right_pc {
                    Some(pc) => {
                        let z = apply_pc(pc, &v_basis[j])?;
                        let w = apply_op(a, &z)?;
                        z_basis.push(z);
                        w
                    }
                    None => apply_op(a, &v_basis[j])?,
                };
                if let Some(pc) = left_pc {
                    w = apply_pc(pc, &w)?;
                }
                Self::orthogonalize(&mut w, &v_basis, &mut h, j);
                let h_next = h[j + 1][j];
                Self::apply_givens_and_update_g(&mut h, &mut g, &mut cs, &mut sn, j);
                m = j + 1;
                let (stop, _) = self.conv.check(g[j + 1].abs(), res0, iteration);
                let breakdown = h_next <= f64::EPSILON * beta;
                if stop || breakdown {
                    break;
                }
                v_basis.push(w.iter().map(|wi| wi / h_next).collect());
            }
            let y = Self::back_substitution(&h, &g, m);
            let basis = if right_pc.is_some() { &z_basis } else { &v_basis };
            for (yj, bj) in y.iter().zip(basis) {
                for (xi, bji) in x.iter_mut().zip(bj) {
                    *xi += yj * bji;
                }
            }
            r = self.residual(a, pc, b, x)?;
            beta = norm2(&r);
            let (stop, s) = self.conv.check(beta, res0, iteration);
            stats = s;
            log::debug!("GMRES restart after {iteration} iterations, residual {beta:e}");
            if stop || beta == 0.0 {
                break;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::CsrMatrix;
    use crate::preconditioner::Jacobi;

    /// 4x4 nonsymmetric, well-conditioned system
    fn small_system() -> (CsrMatrix, Vec<f64>, Vec<f64>) {
        let a = CsrMatrix::from_triplets(
            4,
            4,
            vec![
                (0, 0, 4.0),
                (0, 1, 1.0),
                (1, 0, 1.0),
                (1, 1, 3.0),
                (1, 2, 1.0),
                (2, 1, 1.0),
                (2, 2, 2.0),
                (2, 3, 1.0),
                (3, 2, 1.0),
                (3, 3, 3.0),
                (3, 0, 0.5),
            ],
        );
        let x_true = vec![1.0, 2.0, 3.0, 4.0];
        let mut b = vec![0.0; 4];
        a.spmv(&x_true, &mut b);
        (a, x_true, b)
    }

    #[test]
    fn gmres_solves_well_conditioned_nonsym() {
        let (a, x_true, b) = small_system();
        let mut x = vec![0.0; 4];
        let mut solver = GmresSolver::new(4, 1e-10, 100).with_preconditioning(Preconditioning::None);
        let stats = solver.solve(&a, None, &b, &mut x).unwrap();
        for (xi, ei) in x.iter().zip(&x_true) {
            assert!((xi - ei).abs() < 1e-8, "xi = {xi}, expected = {ei}");
        }
        assert!(stats.converged, "GMRES did not converge");
    }

    #[test]
    fn gmres_with_jacobi_left_and_right() {
        let (a, x_true, b) = small_system();
        let mut pc = Jacobi::new(std::sync::Arc::new(a.clone()));
        crate::preconditioner::InversePreconditioner::compute(&mut pc).unwrap();
        for mode in [Preconditioning::Left, Preconditioning::Right] {
            let mut x = vec![0.0; 4];
            let mut solver = GmresSolver::new(2, 1e-12, 200).with_preconditioning(mode);
            let stats = solver.solve(&a, Some(&pc), &b, &mut x).unwrap();
            assert!(stats.converged, "{mode:?} GMRES did not converge");
            for (xi, ei) in x.iter().zip(&x_true) {
                assert!((xi - ei).abs() < 1e-8, "{mode:?}: xi = {xi}, expected = {ei}");
            }
        }
    }

    #[test]
    fn stats_report_the_true_residual_when_stopping_early() {
        let (a, _, b) = small_system();
        let mut x = vec![0.0; 4];
        let mut solver = GmresSolver::new(2, 1e-14, 2).with_preconditioning(Preconditioning::None);
        let stats = solver.solve(&a, None, &b, &mut x).unwrap();
        assert!(!stats.converged);
        assert_eq!(stats.iterations, 2);
        let mut ax = vec![0.0; 4];
        a.spmv(&x, &mut ax);
        let r: f64 = ax.iter().zip(&b).map(|(p, q)| (p - q) * (p - q)).sum::<f64>().sqrt();
        assert!((stats.final_residual - r).abs() < 1e-12);
    }
}
