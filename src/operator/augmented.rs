//! `[A V; W' C]` presented as a row matrix.
//!
//! The border is never merged into the sparse structure: ordinary rows
//! report the entries of `A` followed by one entry per border vector, and
//! the `k` dense rows at the end, owned by the last process, report all of
//! `W'` (gathered once at construction) followed by `C`. The layout is
//! meant for a handful of border vectors.
//!
//! Each process holds a contiguous block of rows of `A` with global column
//! indices. Products gather the whole of `x` first; transposed products
//! sum the partial results over all processes and keep the local block.

use std::sync::Arc;

use faer::reborrow::ReborrowMut;
use faer::{Mat, MatMut, MatRef};

use crate::core::traits::{Operator, RowMatrix};
use crate::error::{HymlsError, check_dim};
use crate::matrix::CsrMatrix;
use crate::parallel::{Comm, SerialComm};

pub struct AugmentedMatrix {
    a: Arc<CsrMatrix>,
    v: Mat<f64>,
    w: Mat<f64>,
    /// `W` on all rows; filled only on the owner of the dense rows.
    w_loc: Mat<f64>,
    c: Mat<f64>,
    comm: Box<dyn Comm>,
    num_global_rows_a: usize,
    /// Global index of the first local row.
    offset: usize,
}

impl AugmentedMatrix {
    /// Single-process bordered matrix. `C` defaults to zero.
    pub fn new(a: Arc<CsrMatrix>, v: Mat<f64>, w: Mat<f64>, c: Option<Mat<f64>>) -> Result<Self, HymlsError> {
        Self::with_comm(a, v, w, c, Box::new(SerialComm))
    }

    /// Bordered matrix over the local rows of `a`, `v` and `w`.
    pub fn with_comm(
        a: Arc<CsrMatrix>,
        v: Mat<f64>,
        w: Mat<f64>,
        c: Option<Mat<f64>>,
        comm: Box<dyn Comm>,
    ) -> Result<Self, HymlsError> {
        let k = v.ncols();
        check_dim("augmented matrix (rows of V)", a.nrows(), v.nrows())?;
        check_dim("augmented matrix (rows of W)", a.nrows(), w.nrows())?;
        check_dim("augmented matrix (columns of W)", k, w.ncols())?;
        let c = c.unwrap_or_else(|| Mat::zeros(k, k));
        check_dim("augmented matrix (rows of C)", k, c.nrows())?;
        check_dim("augmented matrix (columns of C)", k, c.ncols())?;
        let counts = comm.all_gather(&[a.nrows() as f64], comm.size())?;
        let num_global_rows_a = counts.iter().sum::<f64>().round() as usize;
        let offset = counts[..comm.rank()].iter().sum::<f64>().round() as usize;
        check_dim("augmented matrix (columns of A)", num_global_rows_a, a.ncols())?;
        let owner = comm.size() - 1;
        let mut columns = Vec::with_capacity(k);
        for j in 0..k {
            let local: Vec<f64> = (0..w.nrows()).map(|i| w[(i, j)]).collect();
            columns.push(comm.gather(&local, owner)?);
        }
        let w_loc = if comm.rank() == owner {
            Mat::from_fn(num_global_rows_a, k, |i, j| columns[j][i])
        } else {
            Mat::zeros(0, k)
        };
        Ok(Self { a, v, w, w_loc, c, comm, num_global_rows_a, offset })
    }

    pub fn num_border_vectors(&self) -> usize {
        self.v.ncols()
    }

    fn owns_dense_rows(&self) -> bool {
        self.comm.rank() + 1 == self.comm.size()
    }

    /// Rows of `A` on this process.
    fn n(&self) -> usize {
        self.a.nrows()
    }

    /// `nnz(A) + 2kn + k²`
    pub fn num_global_nonzeros(&self) -> usize {
        let k = self.num_border_vectors();
        let nnz = self.comm.all_reduce(self.a.nnz() as f64).round() as usize;
        nnz + 2 * k * self.num_global_rows_a + k * k
    }

    /// Split `x` into its local upper part and the border part, which is
    /// broadcast from the owner.
    fn split(&self, x: MatRef<'_, f64>) -> Result<(Mat<f64>, Mat<f64>), HymlsError> {
        let (n, k) = (self.n(), self.num_border_vectors());
        let upper = x.subrows(0, n).to_owned();
        let mut lower = if self.owns_dense_rows() { x.subrows(n, k).to_owned() } else { Mat::zeros(k, x.ncols()) };
        let owner = self.comm.size() - 1;
        for j in 0..lower.ncols() {
            let mut col: Vec<f64> = (0..k).map(|i| lower[(i, j)]).collect();
            self.comm.broadcast(&mut col, owner)?;
            for (i, v) in col.into_iter().enumerate() {
                lower[(i, j)] = v;
            }
        }
        Ok((upper, lower))
    }

    /// All rows of the distributed `x`.
    fn import(&self, upper: MatRef<'_, f64>) -> Result<Mat<f64>, HymlsError> {
        let ng = self.num_global_rows_a;
        let mut full = Mat::zeros(ng, upper.ncols());
        for j in 0..upper.ncols() {
            let local: Vec<f64> = (0..upper.nrows()).map(|i| upper[(i, j)]).collect();
            for (i, v) in self.comm.all_gather(&local, ng)?.into_iter().enumerate() {
                full[(i, j)] = v;
            }
        }
        Ok(full)
    }

    /// Sum of the global-length partial results, restricted to the local rows.
    fn export(&self, partial: Mat<f64>) -> Mat<f64> {
        let mut out = Mat::zeros(self.n(), partial.ncols());
        for j in 0..partial.ncols() {
            let mut col: Vec<f64> = (0..partial.nrows()).map(|i| partial[(i, j)]).collect();
            self.comm.all_reduce_in_place(&mut col);
            for i in 0..self.n() {
                out[(i, j)] = col[self.offset + i];
            }
        }
        out
    }

    /// Entries of a scaling vector that belong to the dense rows, broadcast from the owner.
    fn border_part(&self, x: &[f64]) -> Result<Vec<f64>, HymlsError> {
        let (n, k) = (self.n(), self.num_border_vectors());
        let mut lower = if self.owns_dense_rows() { x[n..n + k].to_vec() } else { vec![0.0; k] };
        self.comm.broadcast(&mut lower, self.comm.size() - 1)?;
        Ok(lower)
    }

    /// `Z'X` summed over all processes.
    fn reduced_product(&self, z: MatRef<'_, f64>, x: MatRef<'_, f64>) -> Mat<f64> {
        let local = z.transpose() * x;
        Mat::from_fn(local.nrows(), local.ncols(), |i, j| self.comm.all_reduce(local[(i, j)]))
    }

    /// Reciprocal absolute row sums of the augmented matrix.
    pub fn inv_row_sums(&self) -> Result<Vec<f64>, HymlsError> {
        let mut vals = Vec::new();
        let mut idx = Vec::new();
        (0..self.num_my_rows())
            .map(|i| {
                self.extract_my_row_copy(i, &mut vals, &mut idx)?;
                let s: f64 = vals.iter().map(|v| v.abs()).sum();
                Ok(if s == 0.0 { 1.0 } else { 1.0 / s })
            })
            .collect()
    }

    /// Reciprocal absolute column sums of the augmented matrix, for the local rows.
    pub fn inv_col_sums(&self) -> Result<Vec<f64>, HymlsError> {
        let (n, k) = (self.n(), self.num_border_vectors());
        let mut a_sums = vec![0.0; self.num_global_rows_a];
        for i in 0..n {
            let (cols, vals) = self.a.row(i);
            for (&j, v) in cols.iter().zip(vals) {
                a_sums[j] += v.abs();
            }
        }
        self.comm.all_reduce_in_place(&mut a_sums);
        let mut sums = a_sums[self.offset..self.offset + n].to_vec();
        let mut border = vec![0.0; k];
        for q in 0..k {
            for i in 0..n {
                sums[i] += self.w[(i, q)].abs();
                border[q] += self.v[(i, q)].abs();
            }
        }
        self.comm.all_reduce_in_place(&mut border);
        if self.owns_dense_rows() {
            for q in 0..k {
                sums.push(border[q] + (0..k).map(|r| self.c[(r, q)].abs()).sum::<f64>());
            }
        }
        Ok(sums.into_iter().map(|s| if s == 0.0 { 1.0 } else { 1.0 / s }).collect())
    }

    /// `diag(x) [A V; W' C]`
    pub fn left_scale(&mut self, x: &[f64]) -> Result<(), HymlsError> {
        let (n, k) = (self.n(), self.num_border_vectors());
        check_dim("augmented left scale", self.num_my_rows(), x.len())?;
        let lower = self.border_part(x)?;
        let ones = vec![1.0; self.a.ncols()];
        self.a = Arc::new(self.a.scale(&x[..n], &ones));
        for q in 0..k {
            for i in 0..n {
                self.v[(i, q)] *= x[i];
                self.w[(i, q)] *= lower[q];
            }
            for i in 0..self.w_loc.nrows() {
                self.w_loc[(i, q)] *= lower[q];
            }
            for r in 0..k {
                self.c[(q, r)] *= lower[q];
            }
        }
        Ok(())
    }

    /// `[A V; W' C] diag(x)`
    pub fn right_scale(&mut self, x: &[f64]) -> Result<(), HymlsError> {
        let (n, k) = (self.n(), self.num_border_vectors());
        check_dim("augmented right scale", self.num_my_rows(), x.len())?;
        let lower = self.border_part(x)?;
        let full = self.comm.all_gather(&x[..n], self.num_global_rows_a)?;
        let ones = vec![1.0; n];
        self.a = Arc::new(self.a.scale(&ones, &full));
        for q in 0..k {
            for i in 0..n {
                self.v[(i, q)] *= lower[q];
                self.w[(i, q)] *= x[i];
            }
            for r in 0..k {
                self.c[(r, q)] *= lower[q];
            }
        }
        // the owner's copy of W is gathered again from the scaled pieces
        let owner = self.comm.size() - 1;
        for q in 0..k {
            let local: Vec<f64> = (0..n).map(|i| self.w[(i, q)]).collect();
            let col = self.comm.gather(&local, owner)?;
            for (i, v) in col.into_iter().enumerate() {
                self.w_loc[(i, q)] = v;
            }
        }
        Ok(())
    }

    /// The whole bordered matrix as one sparse matrix (single process only).
    ///
    /// Exact zeros of the border are not stored.
    pub fn to_csr(&self) -> Result<CsrMatrix, HymlsError> {
        if self.comm.size() != 1 {
            return Err(HymlsError::Unsupported("assembling a distributed augmented matrix"));
        }
        let (n, k) = (self.n(), self.num_border_vectors());
        let mut entries = Vec::with_capacity(self.a.nnz() + 2 * n * k + k * k);
        for i in 0..n {
            let (cols, vals) = self.a.row(i);
            entries.extend(cols.iter().zip(vals).map(|(&j, &v)| (i, j, v)));
        }
        for q in 0..k {
            for i in 0..n {
                if self.v[(i, q)] != 0.0 {
                    entries.push((i, n + q, self.v[(i, q)]));
                }
                if self.w[(i, q)] != 0.0 {
                    entries.push((n + q, i, self.w[(i, q)]));
                }
            }
            for r in 0..k {
                if self.c[(q, r)] != 0.0 {
                    entries.push((n + q, n + r, self.c[(q, r)]));
                }
            }
        }
        Ok(CsrMatrix::from_triplets(n + k, n + k, entries))
    }

    /// Direct solves go through [`to_csr`](Self::to_csr) and a sparse solver.
    pub fn solve(&self, _x: MatRef<'_, f64>, _y: MatMut<'_, f64>) -> Result<(), HymlsError> {
        Err(HymlsError::Unsupported("AugmentedMatrix::solve"))
    }

    pub fn apply_inverse(&self, _x: MatRef<'_, f64>, _y: MatMut<'_, f64>) -> Result<(), HymlsError> {
        Err(HymlsError::Unsupported("AugmentedMatrix::apply_inverse"))
    }
}

impl Operator for AugmentedMatrix {
    fn nrows(&self) -> usize {
        self.num_my_rows()
    }

    fn ncols(&self) -> usize {
        self.num_my_rows()
    }

    fn apply(&self, x: MatRef<'_, f64>, y: MatMut<'_, f64>) -> Result<(), HymlsError> {
        self.multiply(false, x, y)
    }

    fn label(&self) -> String {
        format!("augmented matrix ({} + {} rows)", self.num_global_rows_a, self.num_border_vectors())
    }
}

impl RowMatrix for AugmentedMatrix {
    fn num_my_rows(&self) -> usize {
        self.n() + if self.owns_dense_rows() { self.num_border_vectors() } else { 0 }
    }

    fn num_global_cols(&self) -> usize {
        self.num_global_rows_a + self.num_border_vectors()
    }

    fn num_my_row_entries(&self, row: usize) -> Result<usize, HymlsError> {
        if row < self.n() {
            Ok(self.a.row(row).0.len() + self.num_border_vectors())
        } else if row < self.num_my_rows() {
            Ok(self.num_global_cols())
        } else {
            Err(HymlsError::DimensionMismatch { context: "augmented row index", expected: self.num_my_rows(), found: row })
        }
    }

    fn extract_my_row_copy(
        &self,
        row: usize,
        values: &mut Vec<f64>,
        indices: &mut Vec<usize>,
    ) -> Result<usize, HymlsError> {
        values.clear();
        indices.clear();
        let (n, k, ng) = (self.n(), self.num_border_vectors(), self.num_global_rows_a);
        if row < n {
            let (cols, vals) = self.a.row(row);
            indices.extend_from_slice(cols);
            values.extend_from_slice(vals);
            for q in 0..k {
                indices.push(ng + q);
                values.push(self.v[(row, q)]);
            }
        } else {
            self.num_my_row_entries(row)?;
            let r = row - n;
            for i in 0..ng {
                indices.push(i);
                values.push(self.w_loc[(i, r)]);
            }
            for q in 0..k {
                indices.push(ng + q);
                values.push(self.c[(r, q)]);
            }
        }
        Ok(values.len())
    }

    fn multiply(&self, transpose: bool, x: MatRef<'_, f64>, mut y: MatMut<'_, f64>) -> Result<(), HymlsError> {
        let (n, k) = (self.n(), self.num_border_vectors());
        check_dim("augmented multiply (x rows)", self.num_my_rows(), x.nrows())?;
        check_dim("augmented multiply (y rows)", self.num_my_rows(), y.nrows())?;
        check_dim("augmented multiply (columns)", x.ncols(), y.ncols())?;
        let (upper, lower) = self.split(x)?;
        let (top, left, bottom, corner) = if transpose {
            let partial = self.a.transpose_mul_dense(upper.as_ref());
            (self.export(partial), &self.w, &self.v, self.c.transpose().to_owned())
        } else {
            let full = self.import(upper.as_ref())?;
            (self.a.mul_dense(full.as_ref()), &self.v, &self.w, self.c.clone())
        };
        let top = top + left * lower.as_ref();
        y.rb_mut().subrows_mut(0, n).copy_from(top.as_ref());
        let low = self.reduced_product(bottom.as_ref(), upper.as_ref()) + corner * lower.as_ref();
        if self.owns_dense_rows() {
            y.rb_mut().subrows_mut(n, k).copy_from(low.as_ref());
        }
        Ok(())
    }

    fn extract_diagonal_copy(&self) -> Result<Vec<f64>, HymlsError> {
        let mut d = self.a.diagonal();
        if self.owns_dense_rows() {
            d.extend((0..self.num_border_vectors()).map(|q| self.c[(q, q)]));
        }
        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::gallery::laplace_2d;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn random(rng: &mut StdRng, r: usize, c: usize) -> Mat<f64> {
        Mat::from_fn(r, c, |_, _| rng.gen_range(-1.0..1.0))
    }

    #[test]
    fn entry_counts_and_row_copy() {
        let a = Arc::new(laplace_2d(3, 3));
        let mut rng = StdRng::seed_from_u64(3);
        let v = random(&mut rng, 9, 2);
        let w = random(&mut rng, 9, 2);
        let aug = AugmentedMatrix::new(a.clone(), v.clone(), w.clone(), None).unwrap();
        assert_eq!(aug.num_my_rows(), 11);
        assert_eq!(aug.num_my_row_entries(0).unwrap(), a.row(0).0.len() + 2);
        assert_eq!(aug.num_my_row_entries(10).unwrap(), 11);
        assert_eq!(aug.num_global_nonzeros(), a.nnz() + 2 * 2 * 9 + 4);
        let (mut vals, mut idx) = (Vec::new(), Vec::new());
        aug.extract_my_row_copy(9, &mut vals, &mut idx).unwrap();
        assert_eq!(vals[4], w[(4, 0)]);
        assert_eq!(idx[10], 10);
        assert_eq!(vals[10], 0.0);
    }

    #[test]
    fn transpose_matches_assembled_matrix() {
        let a = Arc::new(laplace_2d(3, 2));
        let mut rng = StdRng::seed_from_u64(5);
        let (v, w, c) = (random(&mut rng, 6, 1), random(&mut rng, 6, 1), random(&mut rng, 1, 1));
        let aug = AugmentedMatrix::new(a, v, w, Some(c)).unwrap();
        let full = aug.to_csr().unwrap();
        let x = random(&mut rng, 7, 2);
        let mut y = Mat::zeros(7, 2);
        aug.multiply(true, x.as_ref(), y.as_mut()).unwrap();
        assert!((full.transpose_mul_dense(x.as_ref()) - y).norm_max() < 1e-13);
    }

    #[test]
    fn scaling_matches_assembled_matrix() {
        let a = Arc::new(laplace_2d(2, 2));
        let mut rng = StdRng::seed_from_u64(8);
        let (v, w) = (random(&mut rng, 4, 1), random(&mut rng, 4, 1));
        let mut aug = AugmentedMatrix::new(a, v, w, None).unwrap();
        let r = aug.inv_row_sums().unwrap();
        let c = aug.inv_col_sums().unwrap();
        let expected = aug.to_csr().unwrap().scale(&r, &c).to_dense();
        aug.left_scale(&r).unwrap();
        aug.right_scale(&c).unwrap();
        assert!((aug.to_csr().unwrap().to_dense() - expected).norm_max() < 1e-14);
        assert!(aug.apply_inverse(Mat::zeros(5, 1).as_ref(), Mat::zeros(5, 1).as_mut()).is_err());
    }
}
