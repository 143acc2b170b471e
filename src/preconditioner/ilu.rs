//! ILU(0) factorization with zero fill (Saad §10.3).
//!
//! The factors share the sparsity pattern of `A`: `L` (unit diagonal) is
//! stored below the diagonal and `U` on and above it, in one value array.

use std::sync::Arc;

use faer::{MatMut, MatRef};

use crate::error::{HymlsError, check_dim};
use crate::matrix::CsrMatrix;
use crate::preconditioner::InversePreconditioner;

pub struct Ilu0 {
    a: Arc<CsrMatrix>,
    diag: Vec<usize>,
    lu: Vec<f64>,
    initialized: bool,
    computed: bool,
}

impl Ilu0 {
    pub fn new(a: Arc<CsrMatrix>) -> Self {
        Self { a, diag: Vec::new(), lu: Vec::new(), initialized: false, computed: false }
    }

    fn solve_column(&self, b: &mut [f64]) {
        let (ptr, idx) = (self.a.row_ptr(), self.a.col_idx());
        for i in 0..b.len() {
            let mut s = b[i];
            for k in ptr[i]..self.diag[i] {
                s -= self.lu[k] * b[idx[k]];
            }
            b[i] = s;
        }
        for i in (0..b.len()).rev() {
            let mut s = b[i];
            for k in self.diag[i] + 1..ptr[i + 1] {
                s -= self.lu[k] * b[idx[k]];
            }
            b[i] = s / self.lu[self.diag[i]];
        }
    }
}

impl InversePreconditioner for Ilu0 {
    fn initialize(&mut self) -> Result<(), HymlsError> {
        if self.initialized {
            return Ok(());
        }
        let a = &self.a;
        check_dim("ILU(0) (square)", a.nrows(), a.ncols())?;
        let (ptr, idx) = (a.row_ptr(), a.col_idx());
        self.diag = (0..a.nrows())
            .map(|i| {
                (ptr[i]..ptr[i + 1]).find(|&k| idx[k] == i).ok_or_else(|| HymlsError::Factorization {
                    context: "ILU(0)".into(),
                    detail: format!("row {i} has no diagonal entry"),
                })
            })
            .collect::<Result<_, _>>()?;
        self.initialized = true;
        Ok(())
    }

    fn compute(&mut self) -> Result<(), HymlsError> {
        self.initialize()?;
        let a = Arc::clone(&self.a);
        let (ptr, idx) = (a.row_ptr(), a.col_idx());
        let n = a.nrows();
        let mut lu = a.values().to_vec();
        let mut pos: Vec<Option<usize>> = vec![None; n];
        for i in 0..n {
            for k in ptr[i]..ptr[i + 1] {
                pos[idx[k]] = Some(k);
            }
            for k in ptr[i]..self.diag[i] {
                let p = idx[k];
                let pivot = lu[self.diag[p]];
                if pivot == 0.0 {
                    return Err(HymlsError::Factorization { context: "ILU(0)".into(), detail: format!("zero pivot in row {p}") });
                }
                lu[k] /= pivot;
                let lik = lu[k];
                for kk in self.diag[p] + 1..ptr[p + 1] {
                    if let Some(slot) = pos[idx[kk]] {
                        lu[slot] -= lik * lu[kk];
                    }
                }
            }
            for k in ptr[i]..ptr[i + 1] {
                pos[idx[k]] = None;
            }
            if lu[self.diag[i]] == 0.0 {
                return Err(HymlsError::Factorization { context: "ILU(0)".into(), detail: format!("zero pivot in row {i}") });
            }
        }
        self.lu = lu;
        self.computed = true;
        Ok(())
    }

    fn apply_inverse(&self, x: MatRef<'_, f64>, mut y: MatMut<'_, f64>) -> Result<(), HymlsError> {
        if !self.computed {
            return Err(HymlsError::State { component: "Ilu0::apply_inverse", expected: "compute" });
        }
        check_dim("ILU(0) apply (x rows)", self.a.nrows(), x.nrows())?;
        check_dim("ILU(0) apply (y rows)", self.a.nrows(), y.nrows())?;
        let mut b = vec![0.0; x.nrows()];
        for j in 0..x.ncols() {
            for (i, bi) in b.iter_mut().enumerate() {
                *bi = x[(i, j)];
            }
            self.solve_column(&mut b);
            for (i, bi) in b.iter().enumerate() {
                y[(i, j)] = *bi;
            }
        }
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn is_computed(&self) -> bool {
        self.computed
    }

    fn label(&self) -> String {
        format!("ILU(0) ({} rows, {} entries)", self.a.nrows(), self.a.nnz())
    }

    fn nrows(&self) -> usize {
        self.a.nrows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::gallery::laplace_2d;
    use faer::Mat;

    #[test]
    fn exact_for_tridiagonal() {
        let a = CsrMatrix::from_triplets(
            3,
            3,
            vec![(0, 0, 4.0), (0, 1, -1.0), (1, 0, -1.0), (1, 1, 4.0), (1, 2, -1.0), (2, 1, -1.0), (2, 2, 4.0)],
        );
        let a = Arc::new(a);
        let mut pc = Ilu0::new(a.clone());
        pc.compute().unwrap();
        let b = Mat::from_fn(3, 1, |i, _| i as f64 + 1.0);
        let mut x = Mat::zeros(3, 1);
        pc.apply_inverse(b.as_ref(), x.as_mut()).unwrap();
        let r = a.mul_dense(x.as_ref()) - b.as_ref();
        assert!(r.norm_max() < 1e-14);
    }

    #[test]
    fn approximates_the_laplacian() {
        let a = Arc::new(laplace_2d(8, 8));
        let mut pc = Ilu0::new(a.clone());
        pc.compute().unwrap();
        let b = Mat::from_fn(64, 1, |_, _| 1.0);
        let mut x = Mat::zeros(64, 1);
        pc.apply_inverse(b.as_ref(), x.as_mut()).unwrap();
        let r = a.mul_dense(x.as_ref()) - b.as_ref();
        assert!(r.norm_l2() < b.norm_l2());
    }
}
