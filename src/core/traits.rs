//! Core operator traits for hymls.
//!
//! Multivectors are faer column-major matrices: one column per vector, one
//! row per unknown. Operators read from a `MatRef` and write into a `MatMut`
//! of matching shape.

use faer::{Mat, MatMut, MatRef};

use crate::error::HymlsError;

/// Linear operator: Y ← A X.
pub trait Operator {
    /// Length of the range vectors.
    fn nrows(&self) -> usize;
    /// Length of the domain vectors.
    fn ncols(&self) -> usize;
    /// Compute `y = A x` column by column.
    fn apply(&self, x: MatRef<'_, f64>, y: MatMut<'_, f64>) -> Result<(), HymlsError>;
    /// Short description used in logs.
    fn label(&self) -> String {
        format!("operator {}x{}", self.nrows(), self.ncols())
    }
}

/// Row-oriented matrix access, as needed by direct solvers and diagnostics.
pub trait RowMatrix: Operator {
    /// Rows stored on this process.
    fn num_my_rows(&self) -> usize;
    /// Global number of columns.
    fn num_global_cols(&self) -> usize;
    /// Number of stored entries in local row `row`.
    fn num_my_row_entries(&self, row: usize) -> Result<usize, HymlsError>;
    /// Largest `num_my_row_entries` over all local rows.
    fn max_num_entries(&self) -> usize {
        (0..self.num_my_rows())
            .filter_map(|i| self.num_my_row_entries(i).ok())
            .max()
            .unwrap_or(0)
    }
    /// Copy row `row` into `values`/`indices`, returning the entry count.
    fn extract_my_row_copy(
        &self,
        row: usize,
        values: &mut Vec<f64>,
        indices: &mut Vec<usize>,
    ) -> Result<usize, HymlsError>;
    /// `y = A x` or `y = A' x`.
    fn multiply(&self, transpose: bool, x: MatRef<'_, f64>, y: MatMut<'_, f64>) -> Result<(), HymlsError>;
    /// Diagonal entries of the local rows.
    fn extract_diagonal_copy(&self) -> Result<Vec<f64>, HymlsError> {
        let mut vals = Vec::new();
        let mut idx = Vec::new();
        let mut diag = vec![0.0; self.num_my_rows()];
        for (i, d) in diag.iter_mut().enumerate() {
            self.extract_my_row_copy(i, &mut vals, &mut idx)?;
            *d = idx.iter().zip(&vals).find(|(j, _)| **j == i).map(|(_, v)| *v).unwrap_or(0.0);
        }
        Ok(diag)
    }
    /// max_i Σ_j |a_ij|
    fn norm_inf(&self) -> Result<f64, HymlsError> {
        let mut vals = Vec::new();
        let mut idx = Vec::new();
        let mut norm = 0.0f64;
        for i in 0..self.num_my_rows() {
            self.extract_my_row_copy(i, &mut vals, &mut idx)?;
            norm = norm.max(vals.iter().map(|v| v.abs()).sum());
        }
        Ok(norm)
    }
    /// max_j Σ_i |a_ij|
    fn norm_one(&self) -> Result<f64, HymlsError> {
        let mut vals = Vec::new();
        let mut idx = Vec::new();
        let mut colsum = vec![0.0; self.num_global_cols()];
        for i in 0..self.num_my_rows() {
            self.extract_my_row_copy(i, &mut vals, &mut idx)?;
            for (&j, v) in idx.iter().zip(&vals) {
                colsum[j] += v.abs();
            }
        }
        Ok(colsum.into_iter().fold(0.0, f64::max))
    }
}

/// Operator with an optional low-rank border:
/// `[A V; W' C] [x; s] = [y; t]`.
pub trait BorderedOperator {
    /// Attach a border. `w` defaults to `v` and `c` to zero; passing `None`
    /// for `v` removes the border.
    fn set_border(&mut self, v: Option<Mat<f64>>, w: Option<Mat<f64>>, c: Option<Mat<f64>>) -> Result<(), HymlsError>;
    /// True once a border has been attached.
    fn has_border(&self) -> bool;
    /// `[y; t] = [A V; W' C] [x; s]`
    fn apply_bordered(
        &self,
        x: MatRef<'_, f64>,
        s: MatRef<'_, f64>,
        y: MatMut<'_, f64>,
        t: MatMut<'_, f64>,
    ) -> Result<(), HymlsError>;
    /// `[x; s] = [A V; W' C] \ [y; t]`
    fn apply_inverse_bordered(
        &self,
        y: MatRef<'_, f64>,
        t: MatRef<'_, f64>,
        x: MatMut<'_, f64>,
        s: MatMut<'_, f64>,
    ) -> Result<(), HymlsError>;
}
