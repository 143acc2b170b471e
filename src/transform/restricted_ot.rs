//! Symmetric application of a group transform inside a larger dense matrix.

use faer::MatMut;
use faer::reborrow::ReborrowMut;

use super::{Householder, OrthogonalTransform};
use crate::error::HymlsError;

/// Applies `H` to rows `idx..idx+n` and `H'` to columns `idx..idx+n` of a
/// dense matrix, leaving everything else untouched.
#[derive(Debug, Clone, Default)]
pub struct RestrictedOT<T: OrthogonalTransform = Householder> {
    transform: T,
}

impl<T: OrthogonalTransform> RestrictedOT<T> {
    pub fn new(transform: T) -> Self {
        Self { transform }
    }

    /// `X[idx.., :] ← H X[idx.., :]`, then `X[:, idx..] ← X[:, idx..] H'`.
    pub fn apply(&self, mut x: MatMut<'_, f64>, idx: usize, t: &[f64]) -> Result<(), HymlsError> {
        let n = t.len();
        if n == 0 {
            return Ok(());
        }
        if idx + n > x.nrows().min(x.ncols()) {
            return Err(HymlsError::DimensionMismatch {
                context: "restricted transform (block end)",
                expected: x.nrows().min(x.ncols()),
                found: idx + n,
            });
        }
        self.transform.apply(x.rb_mut().subrows_mut(idx, n), t)?;
        self.transform.apply_r(x.rb_mut().subcols_mut(idx, n), t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;

    #[test]
    fn restricted_matches_blockwise_application() {
        let x0 = Mat::from_fn(7, 7, |i, j| ((i * 7 + j) as f64).sin());
        let t = [1.0, 1.0, 1.0];
        let mut restricted = x0.clone();
        RestrictedOT::<Householder>::default().apply(restricted.as_mut(), 2, &t).unwrap();

        let mut direct = x0.clone();
        Householder.apply(direct.as_mut().subrows_mut(2, 3), &t).unwrap();
        Householder.apply_r(direct.as_mut().subcols_mut(2, 3), &t).unwrap();
        for i in 0..7 {
            for j in 0..7 {
                assert_eq!(restricted[(i, j)].to_bits(), direct[(i, j)].to_bits());
            }
        }
        assert_eq!(restricted[(0, 0)], x0[(0, 0)]);
    }

    #[test]
    fn empty_group_is_a_no_op() {
        let mut x = Mat::from_fn(3, 3, |i, j| (i + j) as f64);
        RestrictedOT::new(Householder).apply(x.as_mut(), 5, &[]).unwrap();
        assert_eq!(x[(2, 2)], 4.0);
        assert!(RestrictedOT::new(Householder).apply(x.as_mut(), 2, &[1.0, 1.0]).is_err());
    }
}
