//! Dense linear-algebra helpers for small blocks and tall multivectors.
//!
//! Everything here works on faer dense types. The `view`/`view_mut`
//! adaptors borrow an existing column-major buffer; they never copy.

use std::panic::Location;

use faer::linalg::solvers::{FullPivLu, Solve};
use faer::{Mat, MatMut, MatRef, Side};

use crate::error::{HymlsError, check_dim};

/// Eigenvalues `real + i·imag` and the right eigenvectors (columns),
/// split into real and imaginary parts.
#[derive(Debug, Clone)]
pub struct EigenPairs {
    pub real: Vec<f64>,
    pub imag: Vec<f64>,
    pub vectors_re: Mat<f64>,
    pub vectors_im: Mat<f64>,
}

fn evd_error(context: &str, e: impl std::fmt::Debug) -> HymlsError {
    HymlsError::Factorization { context: context.into(), detail: format!("{e:?}") }
}

/// All eigenpairs of a general square matrix.
pub fn eig(a: MatRef<'_, f64>) -> Result<EigenPairs, HymlsError> {
    check_dim("eig (square)", a.nrows(), a.ncols())?;
    let evd = a.eigen().map_err(|e| evd_error("eigen-decomposition", e))?;
    let s = evd.S().column_vector();
    let u = evd.U();
    let n = a.nrows();
    Ok(EigenPairs {
        real: (0..n).map(|i| s[i].re).collect(),
        imag: (0..n).map(|i| s[i].im).collect(),
        vectors_re: Mat::from_fn(n, n, |i, j| u[(i, j)].re),
        vectors_im: Mat::from_fn(n, n, |i, j| u[(i, j)].im),
    })
}

/// Eigenpairs of the pencil `(A, B)`, i.e. of `B⁻¹A`. `B` must be nonsingular.
pub fn eig_generalized(a: MatRef<'_, f64>, b: MatRef<'_, f64>) -> Result<EigenPairs, HymlsError> {
    check_dim("generalized eig (rows)", a.nrows(), b.nrows())?;
    check_dim("generalized eig (cols)", a.ncols(), b.ncols())?;
    let lu = FullPivLu::new(b);
    let u = lu.U();
    if (0..u.nrows()).any(|i| u[(i, i)] == 0.0) {
        return Err(HymlsError::Factorization {
            context: "generalized eig".into(),
            detail: "B is singular".into(),
        });
    }
    let binv_a = lu.solve(a);
    eig(binv_a.as_ref())
}

/// Eigenvalues (ascending) and orthonormal eigenvectors of a symmetric matrix.
pub fn sym_eig(a: MatRef<'_, f64>) -> Result<(Vec<f64>, Mat<f64>), HymlsError> {
    check_dim("symmetric eig (square)", a.nrows(), a.ncols())?;
    let evd = a.self_adjoint_eigen(Side::Lower).map_err(|e| evd_error("symmetric eigen-decomposition", e))?;
    let s = evd.S().column_vector();
    Ok(((0..a.nrows()).map(|i| s[i]).collect(), evd.U().to_owned()))
}

/// `V' W` as a dense matrix. `V` and `W` need the same number of rows.
pub fn mat_mul(v: MatRef<'_, f64>, w: MatRef<'_, f64>) -> Result<Mat<f64>, HymlsError> {
    check_dim("mat_mul (rows of V and W)", v.nrows(), w.nrows())?;
    Ok(v.transpose() * w)
}

/// `C = a V'W + b C`; `C` is resized (and its old content treated as zero) when its shape is wrong.
pub fn mat_mul_scaled(
    a: f64,
    v: MatRef<'_, f64>,
    w: MatRef<'_, f64>,
    b: f64,
    c: &mut Mat<f64>,
) -> Result<(), HymlsError> {
    check_dim("mat_mul_scaled (rows of V and W)", v.nrows(), w.nrows())?;
    if c.nrows() != v.ncols() || c.ncols() != w.ncols() {
        *c = Mat::zeros(v.ncols(), w.ncols());
    }
    let vw = v.transpose() * w;
    let (m, n) = (c.nrows(), c.ncols());
    for j in 0..n {
        for i in 0..m {
            c[(i, j)] = a * vw[(i, j)] + b * c[(i, j)];
        }
    }
    Ok(())
}

/// `Z = (I - V BV') W`, or `(I - BV V') W` when `reverse` is set. `BV` defaults to `V`.
pub fn apply_orth(
    v: MatRef<'_, f64>,
    w: MatRef<'_, f64>,
    bv: Option<MatRef<'_, f64>>,
    reverse: bool,
) -> Result<Mat<f64>, HymlsError> {
    check_dim("apply_orth (rows of V and W)", v.nrows(), w.nrows())?;
    let bv = bv.unwrap_or(v);
    check_dim("apply_orth (shape of BV)", v.nrows(), bv.nrows())?;
    check_dim("apply_orth (columns of BV)", v.ncols(), bv.ncols())?;
    let (left, right) = if reverse { (bv, v) } else { (v, bv) };
    let coeff = right.transpose() * w;
    Ok(w.to_owned() - left * coeff.as_ref())
}

/// Deviation of `X'Y` from zero (or from the identity when `is_basis`).
///
/// Logs a warning that names the caller when the deviation exceeds `tol`.
#[track_caller]
pub fn check_orthogonal(x: MatRef<'_, f64>, y: MatRef<'_, f64>, is_basis: bool, tol: f64) -> Result<f64, HymlsError> {
    let mut xy = mat_mul(x, y)?;
    if is_basis {
        check_dim("check_orthogonal (basis)", xy.nrows(), xy.ncols())?;
        for i in 0..xy.nrows() {
            xy[(i, i)] -= 1.0;
        }
    }
    let err = xy.norm_max();
    if err > tol {
        let loc = Location::caller();
        log::warn!("{}:{}: orthogonality deviation {err:e} exceeds {tol:e}", loc.file(), loc.line());
    }
    Ok(err)
}

/// Replace the columns of `a` by an orthonormal basis of their span (thin QR).
pub fn orthogonalize(a: &mut Mat<f64>) -> Result<(), HymlsError> {
    if a.ncols() > a.nrows() {
        return Err(HymlsError::DimensionMismatch {
            context: "orthogonalize (more columns than rows)",
            expected: a.nrows(),
            found: a.ncols(),
        });
    }
    let q = a.qr().compute_thin_Q();
    *a = q;
    Ok(())
}

/// Read-only dense view of a column-major buffer.
pub fn view(buf: &[f64], nrows: usize, ncols: usize) -> Result<MatRef<'_, f64>, HymlsError> {
    check_dim("dense view (buffer length)", nrows * ncols, buf.len())?;
    Ok(MatRef::from_column_major_slice(buf, nrows, ncols))
}

/// Mutable dense view of a column-major buffer.
pub fn view_mut(buf: &mut [f64], nrows: usize, ncols: usize) -> Result<MatMut<'_, f64>, HymlsError> {
    check_dim("dense view (buffer length)", nrows * ncols, buf.len())?;
    Ok(MatMut::from_column_major_slice_mut(buf, nrows, ncols))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn sym_eig_of_diagonal() {
        let a = Mat::from_fn(3, 3, |i, j| if i == j { (3 - i) as f64 } else { 0.0 });
        let (vals, vecs) = sym_eig(a.as_ref()).unwrap();
        assert_abs_diff_eq!(vals[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(vals[2], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(vecs[(2, 0)].abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn eig_of_rotation_is_complex() {
        let a = Mat::from_fn(2, 2, |i, j| match (i, j) {
            (0, 1) => -1.0,
            (1, 0) => 1.0,
            _ => 0.0,
        });
        let e = eig(a.as_ref()).unwrap();
        let mut im = e.imag.clone();
        im.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_abs_diff_eq!(im[0], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(im[1], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(e.real[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn generalized_eig_of_diagonal_pencil() {
        let a = Mat::from_fn(2, 2, |i, j| if i == j { [2.0, 6.0][i] } else { 0.0 });
        let b = Mat::from_fn(2, 2, |i, j| if i == j { [1.0, 2.0][i] } else { 0.0 });
        let mut re = eig_generalized(a.as_ref(), b.as_ref()).unwrap().real;
        re.sort_by(|x, y| x.partial_cmp(y).unwrap());
        assert_abs_diff_eq!(re[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(re[1], 3.0, epsilon = 1e-12);
        let singular = Mat::<f64>::zeros(2, 2);
        assert!(eig_generalized(a.as_ref(), singular.as_ref()).is_err());
    }

    #[test]
    fn apply_orth_removes_span() {
        let mut v = Mat::from_fn(5, 2, |i, j| ((i + 1) * (j + 2)) as f64 + (i * j) as f64);
        orthogonalize(&mut v).unwrap();
        let w = Mat::from_fn(5, 3, |i, j| (i as f64 - j as f64).sin());
        let z = apply_orth(v.as_ref(), w.as_ref(), None, false).unwrap();
        let err = check_orthogonal(v.as_ref(), z.as_ref(), false, 1e-10).unwrap();
        assert!(err < 1e-12);
        let basis_err = check_orthogonal(v.as_ref(), v.as_ref(), true, 1e-10).unwrap();
        assert!(basis_err < 1e-12);
    }

    #[test]
    fn mat_mul_scaled_accumulates() {
        let v = Mat::from_fn(4, 2, |i, j| (i + j) as f64);
        let mut c = Mat::from_fn(2, 2, |_, _| 1.0);
        mat_mul_scaled(2.0, v.as_ref(), v.as_ref(), 0.5, &mut c).unwrap();
        let vv = mat_mul(v.as_ref(), v.as_ref()).unwrap();
        assert_abs_diff_eq!(c[(0, 1)], 2.0 * vv[(0, 1)] + 0.5, epsilon = 1e-12);
    }

    #[test]
    fn views_alias_the_buffer() {
        let mut buf = vec![0.0; 6];
        {
            let mut m = view_mut(&mut buf, 3, 2).unwrap();
            m[(1, 1)] = 7.0;
        }
        assert_eq!(buf[4], 7.0);
        assert!(view(&buf, 4, 2).is_err());
    }
}
