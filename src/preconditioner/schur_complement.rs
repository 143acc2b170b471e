//! `S = A22 − A21 A11⁻¹ A12` on the separators of one level.
//!
//! As an [`Operator`] the complement is applied without forming it;
//! [`SchurComplement::construct`] assembles it explicitly, one subdomain at
//! a time, for the factorization or reduction at the next level.

use faer::reborrow::ReborrowMut;
use faer::{Mat, MatMut, MatRef};

use crate::core::traits::Operator;
use crate::error::{HymlsError, check_dim};
use crate::matrix::CsrMatrix;
use crate::preconditioner::matrix_block::{BlockState, MatrixBlock};
use crate::utils::counters::PhaseCounter;

pub struct SchurComplement<'a> {
    a11: &'a MatrixBlock,
    a12: &'a MatrixBlock,
    a21: &'a MatrixBlock,
    a22: &'a MatrixBlock,
    apply_counter: PhaseCounter,
}

impl<'a> SchurComplement<'a> {
    /// `a11` must have its subdomain solvers computed.
    pub fn new(
        a11: &'a MatrixBlock,
        a12: &'a MatrixBlock,
        a21: &'a MatrixBlock,
        a22: &'a MatrixBlock,
    ) -> Result<Self, HymlsError> {
        if a11.state() < BlockState::SubdomainSolversComputed {
            return Err(HymlsError::State { component: "SchurComplement", expected: "compute_subdomain_solvers" });
        }
        check_dim("Schur complement (A12 columns vs A22)", a22.block().ncols(), a12.block().ncols())?;
        check_dim("Schur complement (A21 rows vs A22)", a22.block().nrows(), a21.block().nrows())?;
        Ok(Self { a11, a12, a21, a22, apply_counter: PhaseCounter::default() })
    }

    /// Number of applications so far.
    pub fn num_apply(&self) -> usize {
        self.apply_counter.count()
    }

    /// Explicit `S` in separator numbering.
    ///
    /// Per subdomain `s`, `A11(s)⁻¹ A12(s)` is computed densely on the
    /// separators `s` touches, so the fill of `S` is exactly the union of
    /// the dense separator blocks of the subdomains.
    pub fn construct(&self) -> Result<CsrMatrix, HymlsError> {
        let map = self.a11.map();
        let a22 = self.a22.block();
        let n = a22.nrows();
        let mut entries: Vec<(usize, usize, f64)> = (0..n)
            .flat_map(|i| {
                let (cols, vals) = a22.row(i);
                cols.iter().zip(vals).map(move |(&j, &v)| (i, j, v))
            })
            .collect();
        for s in 0..map.num_subdomains() {
            let seps = map.separators_of(s);
            let Some(solver) = self.a11.solver(s) else { continue };
            if seps.is_empty() {
                continue;
            }
            let rows: Vec<usize> = map.interior_range(s).collect();
            let mut x = self.a12.block().extract_dense(&rows, seps);
            solver.solve_in_place(x.as_mut())?;
            let a21s = self.a21.block().extract(seps, &rows);
            let prod = a21s.mul_dense(x.as_ref());
            for (q, &jq) in seps.iter().enumerate() {
                for (p, &ip) in seps.iter().enumerate() {
                    let v = prod[(p, q)];
                    if v != 0.0 {
                        entries.push((ip, jq, -v));
                    }
                }
            }
        }
        let s = CsrMatrix::from_triplets(n, n, entries);
        log::debug!("Schur complement on level {}: {n} rows, {} entries", map.level(), s.nnz());
        Ok(s)
    }
}

impl Operator for SchurComplement<'_> {
    fn nrows(&self) -> usize {
        self.a22.block().nrows()
    }

    fn ncols(&self) -> usize {
        self.a22.block().ncols()
    }

    fn apply(&self, x: MatRef<'_, f64>, mut y: MatMut<'_, f64>) -> Result<(), HymlsError> {
        let _t = self.apply_counter.start();
        let nint = self.a11.block().nrows();
        let mut t = Mat::zeros(nint, x.ncols());
        self.a12.apply(x, t.as_mut())?;
        let mut z = Mat::zeros(nint, x.ncols());
        self.a11.apply_inverse(t.as_ref(), z.as_mut())?;
        let mut u = Mat::zeros(self.nrows(), x.ncols());
        self.a21.apply(z.as_ref(), u.as_mut())?;
        self.a22.apply(x, y.rb_mut())?;
        for j in 0..y.ncols() {
            for i in 0..y.nrows() {
                y[(i, j)] -= u[(i, j)];
            }
        }
        Ok(())
    }

    fn label(&self) -> String {
        format!("Schur complement (level {})", self.a11.map().level())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::{DirectSolverOptions, HymlsParams, SubdomainSolverKind};
    use crate::matrix::gallery::convection_diffusion_2d;
    use crate::partition::{HierarchicalMap, Role};

    #[test]
    fn explicit_matches_operator() {
        let params = HymlsParams::for_grid_2d(12, 12, 1).with_separator_length(4);
        let a = convection_diffusion_2d(12, 12, 2.0);
        let map = Arc::new(HierarchicalMap::new(&a, &params).unwrap());
        let block = |r, c| {
            let mut b = MatrixBlock::new(map.clone(), r, c);
            b.compute(&a).unwrap();
            b
        };
        let mut a11 = block(Role::Interior, Role::Interior);
        a11.initialize_subdomain_solvers(SubdomainSolverKind::DenseLu, &DirectSolverOptions::default(), 1).unwrap();
        a11.compute_subdomain_solvers().unwrap();
        let (a12, a21, a22) = (
            block(Role::Interior, Role::Separator),
            block(Role::Separator, Role::Interior),
            block(Role::Separator, Role::Separator),
        );
        let schur = SchurComplement::new(&a11, &a12, &a21, &a22).unwrap();
        let s = schur.construct().unwrap();
        let n = schur.nrows();
        let x = Mat::from_fn(n, 2, |i, j| ((3 * i + j) as f64).cos());
        let mut y = Mat::zeros(n, 2);
        schur.apply(x.as_ref(), y.as_mut()).unwrap();
        assert!((s.mul_dense(x.as_ref()) - y).norm_max() < 1e-12);
        assert_eq!(schur.num_apply(), 1);
    }
}
