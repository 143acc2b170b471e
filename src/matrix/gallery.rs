//! Model problems on structured grids, used by the tests and benchmarks.
//!
//! Unknowns are numbered with the variable fastest, then x, y and z:
//! `row = var + dof * (x + nx * (y + ny * z))`.

use crate::matrix::sparse::CsrMatrix;

/// Row index of variable `var` at grid point `(x, y, z)`.
pub fn grid_index(nx: usize, ny: usize, dof: usize, x: usize, y: usize, z: usize, var: usize) -> usize {
    var + dof * (x + nx * (y + ny * z))
}

/// 5-point Laplacian on an `nx × ny` grid with Dirichlet boundaries.
pub fn laplace_2d(nx: usize, ny: usize) -> CsrMatrix {
    laplace_3d(nx, ny, 1)
}

/// 7-point Laplacian (5-point when `nz == 1`) with Dirichlet boundaries.
pub fn laplace_3d(nx: usize, ny: usize, nz: usize) -> CsrMatrix {
    let n = nx * ny * nz;
    let diag = if nz > 1 { 6.0 } else { 4.0 };
    let mut entries = Vec::with_capacity(7 * n);
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let i = grid_index(nx, ny, 1, x, y, z, 0);
                entries.push((i, i, diag));
                for (dx, dy, dz) in NEIGHBORS {
                    if let Some(j) = shifted(nx, ny, nz, x, y, z, dx, dy, dz) {
                        entries.push((i, j, -1.0));
                    }
                }
            }
        }
    }
    CsrMatrix::from_triplets(n, n, entries)
}

/// Upwinded convection-diffusion `-Δu + c·∇u` with constant wind `(peclet, peclet)`.
pub fn convection_diffusion_2d(nx: usize, ny: usize, peclet: f64) -> CsrMatrix {
    let n = nx * ny;
    let mut entries = Vec::with_capacity(5 * n);
    for y in 0..ny {
        for x in 0..nx {
            let i = grid_index(nx, ny, 1, x, y, 0, 0);
            entries.push((i, i, 4.0 + 2.0 * peclet));
            for (dx, dy, _) in &NEIGHBORS[..4] {
                if let Some(j) = shifted(nx, ny, 1, x, y, 0, *dx, *dy, 0) {
                    let upwind = if *dx < 0 || *dy < 0 { peclet } else { 0.0 };
                    entries.push((i, j, -1.0 - upwind));
                }
            }
        }
    }
    CsrMatrix::from_triplets(n, n, entries)
}

/// Stabilized Stokes-like saddle point on a B-grid: velocities `(u, v)` at the
/// grid points, one pressure per cell, three unknowns per point with the
/// pressure last (`pvar = 2`).
///
/// The velocity block is a shifted Laplacian per component, the gradient of an
/// interior velocity point touches the four surrounding cells, and the pressure
/// block is `-eps·I`.
pub fn bgrid_stokes_2d(nx: usize, ny: usize, shift: f64, eps: f64) -> CsrMatrix {
    const DOF: usize = 3;
    let n = nx * ny * DOF;
    let idx = |x: usize, y: usize, var: usize| grid_index(nx, ny, DOF, x, y, 0, var);
    let mut entries = Vec::with_capacity(16 * n);
    for y in 0..ny {
        for x in 0..nx {
            for var in 0..2 {
                let i = idx(x, y, var);
                entries.push((i, i, 4.0 + shift));
                for (dx, dy, _) in &NEIGHBORS[..4] {
                    if let Some(j) = shifted(nx, ny, 1, x, y, 0, *dx, *dy, 0) {
                        entries.push((i, DOF * j + var, -1.0));
                    }
                }
            }
            let p = idx(x, y, 2);
            entries.push((p, p, -eps));
        }
    }
    // Gradient couplings for velocity points with all four surrounding cells.
    for y in 1..ny {
        for x in 1..nx {
            let cells = [
                (idx(x, y, 2), 1.0, 1.0),
                (idx(x, y - 1, 2), 1.0, -1.0),
                (idx(x - 1, y, 2), -1.0, 1.0),
                (idx(x - 1, y - 1, 2), -1.0, -1.0),
            ];
            for (p, gx, gy) in cells {
                let (u, v) = (idx(x, y, 0), idx(x, y, 1));
                entries.push((u, p, gx));
                entries.push((p, u, gx));
                entries.push((v, p, gy));
                entries.push((p, v, gy));
            }
        }
    }
    CsrMatrix::from_triplets(n, n, entries)
}

const NEIGHBORS: [(isize, isize, isize); 6] = [(-1, 0, 0), (1, 0, 0), (0, -1, 0), (0, 1, 0), (0, 0, -1), (0, 0, 1)];

#[allow(clippy::too_many_arguments)]
fn shifted(
    nx: usize,
    ny: usize,
    nz: usize,
    x: usize,
    y: usize,
    z: usize,
    dx: isize,
    dy: isize,
    dz: isize,
) -> Option<usize> {
    let xx = x.checked_add_signed(dx).filter(|&v| v < nx)?;
    let yy = y.checked_add_signed(dy).filter(|&v| v < ny)?;
    let zz = z.checked_add_signed(dz).filter(|&v| v < nz)?;
    Some(grid_index(nx, ny, 1, xx, yy, zz, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn laplace_rows_sum_to_boundary_deficit() {
        let a = laplace_2d(4, 3);
        assert_eq!(a.nrows(), 12);
        // corner: 4 - 2 neighbors
        let (_, v) = a.row(0);
        assert_eq!(v.iter().sum::<f64>(), 2.0);
        // interior point (1,1)
        let (c, v) = a.row(grid_index(4, 3, 1, 1, 1, 0, 0));
        assert_eq!(c.len(), 5);
        assert_eq!(v.iter().sum::<f64>(), 0.0);
    }

    #[test]
    fn bgrid_pattern_is_symmetric() {
        let a = bgrid_stokes_2d(4, 4, 0.1, 1e-2);
        let t = a.transpose();
        assert!(a.same_pattern(&t));
    }
}
