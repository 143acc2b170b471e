//! `V'AV` and the complement projection `(I − V BV') A (I − V BV')`.

use std::sync::OnceLock;

use faer::{Mat, MatMut, MatRef};

use crate::core::traits::Operator;
use crate::error::{HymlsError, check_dim};
use crate::matrix::dense_utils::{apply_orth, mat_mul};
use crate::preconditioner::InversePreconditioner;
use crate::solver::{DenseLu, DirectSolver};

pub struct ProjectedOperator {
    a: Box<dyn Operator>,
    v: Mat<f64>,
    bv: Option<Mat<f64>>,
    use_vorth: bool,
    left_precond: Option<Box<dyn InversePreconditioner>>,
    /// LU of `V'P⁻¹AV`, built on the first inverse application.
    gram: OnceLock<DenseLu>,
}

impl ProjectedOperator {
    /// `use_vorth == false` gives the `k × k` operator `V'AV`; otherwise the
    /// `n × n` operator acting in the complement of `V`. `bv` defaults to `V`.
    pub fn new(a: Box<dyn Operator>, v: Mat<f64>, bv: Option<Mat<f64>>, use_vorth: bool) -> Result<Self, HymlsError> {
        check_dim("projected operator (square)", a.nrows(), a.ncols())?;
        check_dim("projected operator (rows of V)", a.nrows(), v.nrows())?;
        if let Some(bv) = &bv {
            check_dim("projected operator (rows of BV)", v.nrows(), bv.nrows())?;
            check_dim("projected operator (columns of BV)", v.ncols(), bv.ncols())?;
        }
        Ok(Self { a, v, bv, use_vorth, left_precond: None, gram: OnceLock::new() })
    }

    /// Apply `P⁻¹` after `A` in every application. `p` must be computed.
    pub fn set_left_precond(&mut self, p: Box<dyn InversePreconditioner>) -> Result<(), HymlsError> {
        check_dim("projected operator (preconditioner rows)", self.a.nrows(), p.nrows())?;
        self.left_precond = Some(p);
        self.gram = OnceLock::new();
        Ok(())
    }

    pub fn set_use_transpose(&mut self, _on: bool) -> Result<(), HymlsError> {
        Err(HymlsError::Unsupported("transposed projected operator"))
    }

    /// `P⁻¹ A X` for `n`-row `X`.
    fn apply_pa(&self, x: MatRef<'_, f64>) -> Result<Mat<f64>, HymlsError> {
        let mut ax = Mat::zeros(self.a.nrows(), x.ncols());
        self.a.apply(x, ax.as_mut())?;
        match &self.left_precond {
            Some(p) => {
                let mut pax = Mat::zeros(p.nrows(), x.ncols());
                p.apply_inverse(ax.as_ref(), pax.as_mut())?;
                Ok(pax)
            }
            None => Ok(ax),
        }
    }

    fn project(&self, w: MatRef<'_, f64>) -> Result<Mat<f64>, HymlsError> {
        apply_orth(self.v.as_ref(), w, self.bv.as_ref().map(|b| b.as_ref()), false)
    }

    fn gram_lu(&self) -> Result<&DenseLu, HymlsError> {
        if let Some(lu) = self.gram.get() {
            return Ok(lu);
        }
        let pav = self.apply_pa(self.v.as_ref())?;
        let h = mat_mul(self.v.as_ref(), pav.as_ref())?;
        let mut lu = DenseLu::new();
        lu.factorize_dense(h.as_ref())?;
        Ok(self.gram.get_or_init(|| lu))
    }

    /// `Y = (V'P⁻¹AV)⁻¹ X`. Not available for the complement variant.
    pub fn apply_inverse(&self, x: MatRef<'_, f64>, mut y: MatMut<'_, f64>) -> Result<(), HymlsError> {
        if self.use_vorth {
            return Err(HymlsError::Unsupported("inverse of the complement-projected operator"));
        }
        check_dim("projected inverse (x rows)", self.v.ncols(), x.nrows())?;
        check_dim("projected inverse (y rows)", self.v.ncols(), y.nrows())?;
        let lu = self.gram_lu()?;
        y.copy_from(x);
        lu.solve_in_place(y)
    }
}

impl Operator for ProjectedOperator {
    fn nrows(&self) -> usize {
        if self.use_vorth { self.v.nrows() } else { self.v.ncols() }
    }

    fn ncols(&self) -> usize {
        Operator::nrows(self)
    }

    fn apply(&self, x: MatRef<'_, f64>, mut y: MatMut<'_, f64>) -> Result<(), HymlsError> {
        check_dim("projected apply (x rows)", Operator::nrows(self), x.nrows())?;
        check_dim("projected apply (y rows)", Operator::nrows(self), y.nrows())?;
        if self.use_vorth {
            let px = self.project(x)?;
            let papx = self.apply_pa(px.as_ref())?;
            y.copy_from(self.project(papx.as_ref())?);
        } else {
            let vx = self.v.as_ref() * x;
            let pavx = self.apply_pa(vx.as_ref())?;
            y.copy_from(mat_mul(self.v.as_ref(), pavx.as_ref())?);
        }
        Ok(())
    }

    fn label(&self) -> String {
        let kind = if self.use_vorth { "(I-VV')A(I-VV')" } else { "V'AV" };
        format!("projected operator {kind} of {}", self.a.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::CsrMatrix;
    use crate::matrix::dense_utils::orthogonalize;
    use crate::matrix::gallery::laplace_2d;
    use crate::preconditioner::Jacobi;
    use std::sync::Arc;

    fn jacobi(a: &CsrMatrix) -> Box<Jacobi> {
        let mut p = Jacobi::new(Arc::new(a.clone()));
        p.compute().unwrap();
        Box::new(p)
    }

    fn basis() -> Mat<f64> {
        let mut v = Mat::from_fn(16, 2, |i, j| if j == 0 { 1.0 } else { i as f64 });
        orthogonalize(&mut v).unwrap();
        v
    }

    #[test]
    fn small_operator_and_its_inverse() {
        let a = laplace_2d(4, 4);
        let v = basis();
        let h = v.transpose() * a.to_dense() * v.as_ref();
        let op = ProjectedOperator::new(Box::new(a), v, None, false).unwrap();
        let x = Mat::from_fn(2, 1, |i, _| 1.0 + i as f64);
        let mut y = Mat::zeros(2, 1);
        op.apply(x.as_ref(), y.as_mut()).unwrap();
        assert!((&h * x.as_ref() - y.as_ref()).norm_max() < 1e-12);
        let mut z = Mat::zeros(2, 1);
        op.apply_inverse(y.as_ref(), z.as_mut()).unwrap();
        assert!((z - x).norm_max() < 1e-12);
    }

    #[test]
    fn complement_variant_stays_orthogonal_to_v() {
        let a = laplace_2d(4, 4);
        let v = basis();
        let mut op = ProjectedOperator::new(Box::new(a), v.clone(), None, true).unwrap();
        op.set_left_precond(jacobi(&CsrMatrix::identity(16))).unwrap();
        let x = Mat::from_fn(16, 1, |i, _| (i as f64).sin());
        let mut y = Mat::zeros(16, 1);
        op.apply(x.as_ref(), y.as_mut()).unwrap();
        assert!((v.transpose() * y.as_ref()).norm_max() < 1e-12);
        assert!(op.apply_inverse(y.as_ref(), x.clone().as_mut()).is_err());
        assert!(op.set_use_transpose(true).is_err());
    }

    #[test]
    fn left_preconditioner_applies_its_inverse() {
        let a = laplace_2d(4, 4);
        let scaled = a.scale(&[2.0; 16], &[1.0; 16]);
        let v = basis();
        let h = v.transpose() * a.to_dense() * v.as_ref();
        let mut op = ProjectedOperator::new(Box::new(a), v, None, false).unwrap();
        // D = 8 I, so P⁻¹A = A / 8
        op.set_left_precond(jacobi(&scaled)).unwrap();
        let x = Mat::from_fn(2, 1, |i, _| 1.0 - 2.0 * i as f64);
        let mut y = Mat::zeros(2, 1);
        op.apply(x.as_ref(), y.as_mut()).unwrap();
        let hx = &h * x.as_ref();
        let expected = Mat::from_fn(2, 1, |i, j| 0.125 * hx[(i, j)]);
        assert!((expected - y.as_ref()).norm_max() < 1e-12);
        let mut z = Mat::zeros(2, 1);
        op.apply_inverse(y.as_ref(), z.as_mut()).unwrap();
        assert!((z - x).norm_max() < 1e-12);
    }
}
