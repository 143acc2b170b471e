//! Jacobi preconditioner: `M⁻¹ = D⁻¹`.

use std::sync::Arc;

use faer::{MatMut, MatRef};

use crate::error::{HymlsError, check_dim};
use crate::matrix::CsrMatrix;
use crate::preconditioner::InversePreconditioner;

pub struct Jacobi {
    a: Arc<CsrMatrix>,
    pub(crate) inv_diag: Vec<f64>,
    computed: bool,
}

impl Jacobi {
    /// new with empty state; call `compute` before applying.
    pub fn new(a: Arc<CsrMatrix>) -> Self {
        Self { a, inv_diag: Vec::new(), computed: false }
    }
}

impl InversePreconditioner for Jacobi {
    fn initialize(&mut self) -> Result<(), HymlsError> {
        check_dim("Jacobi (square)", self.a.nrows(), self.a.ncols())
    }

    fn compute(&mut self) -> Result<(), HymlsError> {
        self.initialize()?;
        // zero diagonal entries pass the residual through unscaled
        self.inv_diag = self.a.diagonal().into_iter().map(|d| if d != 0.0 { 1.0 / d } else { 1.0 }).collect();
        self.computed = true;
        Ok(())
    }

    fn apply_inverse(&self, x: MatRef<'_, f64>, mut y: MatMut<'_, f64>) -> Result<(), HymlsError> {
        if !self.computed {
            return Err(HymlsError::State { component: "Jacobi::apply_inverse", expected: "compute" });
        }
        check_dim("Jacobi apply (x rows)", self.inv_diag.len(), x.nrows())?;
        check_dim("Jacobi apply (y rows)", self.inv_diag.len(), y.nrows())?;
        for j in 0..x.ncols() {
            for (i, d) in self.inv_diag.iter().enumerate() {
                y[(i, j)] = d * x[(i, j)];
            }
        }
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn is_computed(&self) -> bool {
        self.computed
    }

    fn label(&self) -> String {
        format!("Jacobi ({} rows)", self.a.nrows())
    }

    fn nrows(&self) -> usize {
        self.a.nrows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;

    #[test]
    fn scales_by_the_inverse_diagonal() {
        let a = CsrMatrix::from_triplets(2, 2, vec![(0, 0, 4.0), (0, 1, 1.0), (1, 1, 0.5)]);
        let mut pc = Jacobi::new(Arc::new(a));
        let x = Mat::from_fn(2, 1, |_, _| 2.0);
        let mut y = Mat::zeros(2, 1);
        assert!(pc.apply_inverse(x.as_ref(), y.as_mut()).is_err());
        pc.compute().unwrap();
        pc.apply_inverse(x.as_ref(), y.as_mut()).unwrap();
        assert_eq!(y[(0, 0)], 0.5);
        assert_eq!(y[(1, 0)], 4.0);
    }
}
