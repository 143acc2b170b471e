//! Householder reflectors `H = I − 2vv'/(v'v)`.

use faer::MatMut;

use super::OrthogonalTransform;
use crate::error::{HymlsError, check_dim};

/// Reflector that maps a test vector `t` onto `−sign(t₁)‖t‖e₁`.
///
/// `v = t + sign(t₁)‖t‖e₁` with `sign(0) = 1`. For the all-ones vector of
/// length n this is `v = (1 + √n, 1, …, 1)`. A zero test vector gives the
/// identity. `H` is symmetric, so `H' = H`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Householder;

/// `(v, 2 / v'v)`, or `None` when `t` is zero.
fn reflector(t: &[f64]) -> Option<(Vec<f64>, f64)> {
    let norm = t.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm == 0.0 || t.is_empty() {
        return None;
    }
    let mut v = t.to_vec();
    v[0] += if t[0] < 0.0 { -norm } else { norm };
    let vtv: f64 = v.iter().map(|x| x * x).sum();
    Some((v, 2.0 / vtv))
}

impl OrthogonalTransform for Householder {
    fn apply(&self, mut x: MatMut<'_, f64>, t: &[f64]) -> Result<(), HymlsError> {
        check_dim("Householder apply (rows)", t.len(), x.nrows())?;
        let Some((v, beta)) = reflector(t) else { return Ok(()) };
        for j in 0..x.ncols() {
            let w: f64 = (0..v.len()).map(|i| v[i] * x[(i, j)]).sum();
            let w = beta * w;
            for (i, vi) in v.iter().enumerate() {
                x[(i, j)] -= w * vi;
            }
        }
        Ok(())
    }

    fn apply_r(&self, mut x: MatMut<'_, f64>, t: &[f64]) -> Result<(), HymlsError> {
        check_dim("Householder apply_r (cols)", t.len(), x.ncols())?;
        let Some((v, beta)) = reflector(t) else { return Ok(()) };
        for i in 0..x.nrows() {
            let w: f64 = (0..v.len()).map(|j| x[(i, j)] * v[j]).sum();
            let w = beta * w;
            for (j, vj) in v.iter().enumerate() {
                x[(i, j)] -= w * vj;
            }
        }
        Ok(())
    }

    fn construct(&self, indices: &[usize], t: &[f64]) -> Result<Vec<(usize, usize, f64)>, HymlsError> {
        check_dim("Householder construct", indices.len(), t.len())?;
        let n = indices.len();
        let Some((v, beta)) = reflector(t) else {
            return Ok(indices.iter().map(|&g| (g, g, 1.0)).collect());
        };
        let mut entries = Vec::with_capacity(n * n);
        for a in 0..n {
            for b in 0..n {
                let delta = if a == b { 1.0 } else { 0.0 };
                let h = delta - beta * v[a] * v[b];
                if h != 0.0 {
                    entries.push((indices[a], indices[b], h));
                }
            }
        }
        Ok(entries)
    }
}
