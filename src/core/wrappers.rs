//! Operator implementations for faer dense matrices and vector reductions.
//!
//! Dot products and norms use rayon when the `rayon` feature is enabled and
//! fall back to serial folds otherwise.

use faer::{Mat, MatMut, MatRef};

use crate::core::traits::Operator;
use crate::error::{HymlsError, check_dim};

impl Operator for Mat<f64> {
    fn nrows(&self) -> usize {
        Mat::nrows(self)
    }
    fn ncols(&self) -> usize {
        Mat::ncols(self)
    }
    fn apply(&self, x: MatRef<'_, f64>, mut y: MatMut<'_, f64>) -> Result<(), HymlsError> {
        check_dim("dense apply (x rows)", Mat::ncols(self), x.nrows())?;
        check_dim("dense apply (y rows)", Mat::nrows(self), y.nrows())?;
        check_dim("dense apply (columns)", x.ncols(), y.ncols())?;
        y.copy_from(self.as_ref() * x);
        Ok(())
    }
    fn label(&self) -> String {
        format!("dense {}x{}", Mat::nrows(self), Mat::ncols(self))
    }
}

/// Computes `x' y`.
pub fn dot(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len(), "vectors must have the same length");
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        x.par_iter().zip(y.par_iter()).map(|(a, b)| a * b).sum()
    }
    #[cfg(not(feature = "rayon"))]
    {
        x.iter().zip(y).map(|(a, b)| a * b).sum()
    }
}

/// Computes `‖x‖₂`.
pub fn norm2(x: &[f64]) -> f64 {
    dot(x, x).sqrt()
}

/// Column `j` of a multivector copied into a vector.
pub fn column(x: MatRef<'_, f64>, j: usize) -> Vec<f64> {
    (0..x.nrows()).map(|i| x[(i, j)]).collect()
}

/// Euclidean norm of every column.
pub fn column_norms(x: MatRef<'_, f64>) -> Vec<f64> {
    (0..x.ncols()).map(|j| x.col(j).norm_l2()).collect()
}

/// Gather rows `idx` of `x` into a new multivector.
pub fn gather_rows(x: MatRef<'_, f64>, idx: &[usize]) -> Mat<f64> {
    Mat::from_fn(idx.len(), x.ncols(), |i, j| x[(idx[i], j)])
}

/// Scatter the rows of `src` into rows `idx` of `dst`.
pub fn scatter_rows(src: MatRef<'_, f64>, idx: &[usize], mut dst: MatMut<'_, f64>) {
    for j in 0..src.ncols() {
        for (i, &g) in idx.iter().enumerate() {
            dst[(g, j)] = src[(i, j)];
        }
    }
}

/// `Y += alpha X`
pub fn axpy(alpha: f64, x: MatRef<'_, f64>, mut y: MatMut<'_, f64>) {
    debug_assert_eq!((x.nrows(), x.ncols()), (y.nrows(), y.ncols()));
    for j in 0..x.ncols() {
        for i in 0..x.nrows() {
            y[(i, j)] += alpha * x[(i, j)];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_operator_matches_product() {
        let a = Mat::from_fn(3, 2, |i, j| (i + 2 * j) as f64);
        let x = Mat::from_fn(2, 1, |i, _| 1.0 + i as f64);
        let mut y = Mat::zeros(3, 1);
        a.apply(x.as_ref(), y.as_mut()).unwrap();
        assert_eq!(y[(0, 0)], 4.0);
        assert_eq!(y[(2, 0)], 8.0);
    }

    #[test]
    fn gather_then_scatter_restores_rows() {
        let x = Mat::from_fn(5, 2, |i, j| (10 * j + i) as f64);
        let idx = [4, 1, 3];
        let g = gather_rows(x.as_ref(), &idx);
        let mut y = Mat::zeros(5, 2);
        scatter_rows(g.as_ref(), &idx, y.as_mut());
        assert_eq!(y[(4, 1)], 14.0);
        assert_eq!(y[(0, 0)], 0.0);
        assert_eq!(norm2(&[3.0, 4.0]), 5.0);
    }
}
