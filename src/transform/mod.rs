//! Orthogonal transforms that compress separator groups.
//!
//! A transform acts on one group at a time: given the group's slice of the
//! test vector `t`, it maps `t` onto a multiple of the first unit vector, so
//! the first member of the group (the V-sum node) carries the whole test
//! vector and the remaining members are orthogonal to it. The per-group
//! reflectors of one level are independent and are assembled into a single
//! block-diagonal sparse `T`.

pub mod householder;
pub mod restricted_ot;

pub use householder::Householder;
pub use restricted_ot::RestrictedOT;

use faer::{Mat, MatMut, MatRef};

use crate::error::{HymlsError, check_dim};
use crate::matrix::CsrMatrix;

/// Small dense orthogonal transform of one separator group.
pub trait OrthogonalTransform: Send + Sync {
    /// `X ← H X`, with `X.nrows() == t.len()`.
    fn apply(&self, x: MatMut<'_, f64>, t: &[f64]) -> Result<(), HymlsError>;

    /// `X ← X H'`, with `X.ncols() == t.len()`.
    fn apply_r(&self, x: MatMut<'_, f64>, t: &[f64]) -> Result<(), HymlsError>;

    /// Entries of `H` placed at rows/columns `indices`, as `(row, col, value)`.
    fn construct(&self, indices: &[usize], t: &[f64]) -> Result<Vec<(usize, usize, f64)>, HymlsError>;

    /// `T'AT` as a new matrix.
    fn apply_sparse(&self, t: &CsrMatrix, a: &CsrMatrix) -> Result<CsrMatrix, HymlsError> {
        let at = a.matmul(t)?;
        t.transpose().matmul(&at)
    }

    /// `T'AT` written into the pattern of `tat`, one row at a time.
    ///
    /// Entries of the product that are not stored in `tat` give a
    /// [`HymlsError::Pattern`] unless they are exactly zero.
    fn apply_sparse_in_place(&self, tat: &mut CsrMatrix, t: &CsrMatrix, a: &CsrMatrix) -> Result<(), HymlsError> {
        check_dim("in-place T'AT (rows of A)", t.nrows(), a.nrows())?;
        check_dim("in-place T'AT (columns of A)", t.nrows(), a.ncols())?;
        check_dim("in-place T'AT (rows)", t.ncols(), tat.nrows())?;
        check_dim("in-place T'AT (cols)", t.ncols(), tat.ncols())?;
        let tt = t.transpose();
        let n = t.ncols();
        // row i of T'A, then of T'AT, in dense work arrays with touched lists
        let (mut ta, mut tat_row) = (vec![0.0; n], vec![0.0; n]);
        let (mut ta_idx, mut out_idx) = (Vec::new(), Vec::new());
        let (mut in_ta, mut in_out) = (vec![false; n], vec![false; n]);
        for i in 0..n {
            let (tcols, tvals) = tt.row(i);
            for (&k, &tk) in tcols.iter().zip(tvals) {
                let (cols, vals) = a.row(k);
                for (&j, &v) in cols.iter().zip(vals) {
                    if !in_ta[j] {
                        in_ta[j] = true;
                        ta_idx.push(j);
                    }
                    ta[j] += tk * v;
                }
            }
            for &j in &ta_idx {
                let (cols, vals) = t.row(j);
                for (&l, &v) in cols.iter().zip(vals) {
                    if !in_out[l] {
                        in_out[l] = true;
                        out_idx.push(l);
                    }
                    tat_row[l] += ta[j] * v;
                }
                ta[j] = 0.0;
                in_ta[j] = false;
            }
            ta_idx.clear();
            tat.row_values_mut(i).fill(0.0);
            for &l in &out_idx {
                let v = std::mem::take(&mut tat_row[l]);
                in_out[l] = false;
                match tat.get_mut(i, l) {
                    Some(slot) => *slot = v,
                    None if v == 0.0 => {}
                    None => return Err(HymlsError::Pattern { row: i, col: l }),
                }
            }
            out_idx.clear();
        }
        Ok(())
    }

    /// `T V` for a multivector.
    fn apply_vec(&self, t: &CsrMatrix, v: MatRef<'_, f64>) -> Result<Mat<f64>, HymlsError> {
        check_dim("transform apply (rows)", t.ncols(), v.nrows())?;
        Ok(t.mul_dense(v))
    }

    /// `T⁻¹ V = T' V` for a multivector.
    fn apply_inverse_vec(&self, t: &CsrMatrix, v: MatRef<'_, f64>) -> Result<Mat<f64>, HymlsError> {
        check_dim("transform inverse apply (rows)", t.nrows(), v.nrows())?;
        Ok(t.transpose_mul_dense(v))
    }
}

/// Assemble an `n × n` transform from per-group entries; indices that no
/// group covers get a unit diagonal.
pub fn assemble_transform(n: usize, mut entries: Vec<(usize, usize, f64)>) -> CsrMatrix {
    let mut covered = vec![false; n];
    for &(i, j, _) in &entries {
        covered[i] = true;
        covered[j] = true;
    }
    entries.extend(covered.iter().enumerate().filter(|(_, c)| !**c).map(|(i, _)| (i, i, 1.0)));
    CsrMatrix::from_triplets(n, n, entries)
}

/// Per-cell rotation of the two velocity unknowns of a B-grid discretization,
/// `[u'; v'] = [1 1; 1 -1] [u; v] / √2`.
///
/// The rotated velocities couple to at most two pressures each, which turns
/// the gradient of a B-grid Stokes matrix into that of an F-matrix. The
/// rotation is symmetric and orthogonal.
pub fn bgrid_rotation(n: usize, dof: usize, pressure_variable: usize) -> Result<CsrMatrix, HymlsError> {
    let velocities: Vec<usize> = (0..dof).filter(|&v| v != pressure_variable).take(2).collect();
    if velocities.len() < 2 || n % dof != 0 {
        return Err(crate::config_error!(
            "B-grid transform needs two velocity unknowns per cell (dof={dof}, n={n})"
        ));
    }
    let s = std::f64::consts::FRAC_1_SQRT_2;
    let (u, v) = (velocities[0], velocities[1]);
    let mut entries = Vec::with_capacity(n + 2 * (n / dof));
    for cell in 0..n / dof {
        let (iu, iv) = (cell * dof + u, cell * dof + v);
        entries.extend([(iu, iu, s), (iu, iv, s), (iv, iu, s), (iv, iv, -s)]);
    }
    Ok(assemble_transform(n, entries))
}
