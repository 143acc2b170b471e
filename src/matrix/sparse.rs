// Compressed sparse row storage on top of faer's SparseRowMat.

use faer::sparse::{SparseColMat, SparseRowMat, SparseRowMatRef, SymbolicSparseRowMat};
use faer::{Mat, MatMut, MatRef};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::core::traits::{Operator, RowMatrix};
use crate::error::{HymlsError, check_dim};

/// Real CSR matrix with sorted, duplicate-free column indices in every row.
#[derive(Clone, Debug)]
pub struct CsrMatrix {
    inner: SparseRowMat<usize, f64>,
}

impl CsrMatrix {
    /// Build a CSR from raw row-ptr, col-idx, and values.
    ///
    /// Column indices must be sorted and unique within each row.
    pub fn from_csr(
        nrows: usize,
        ncols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<f64>,
    ) -> Self {
        let symbolic = SymbolicSparseRowMat::new_checked(nrows, ncols, row_ptr, None, col_idx);
        let inner = SparseRowMat::new(symbolic, values);
        Self { inner }
    }

    /// Assemble from `(row, col, value)` entries; duplicates are summed.
    pub fn from_triplets(nrows: usize, ncols: usize, mut entries: Vec<(usize, usize, f64)>) -> Self {
        entries.sort_unstable_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        let mut row_ptr = vec![0usize; nrows + 1];
        let mut col_idx = Vec::with_capacity(entries.len());
        let mut values: Vec<f64> = Vec::with_capacity(entries.len());
        let mut last: Option<(usize, usize)> = None;
        for (i, j, v) in entries {
            debug_assert!(i < nrows && j < ncols, "entry ({i}, {j}) outside {nrows}x{ncols}");
            if last == Some((i, j)) {
                if let Some(x) = values.last_mut() {
                    *x += v;
                }
                continue;
            }
            col_idx.push(j);
            values.push(v);
            row_ptr[i + 1] += 1;
            last = Some((i, j));
        }
        for i in 0..nrows {
            row_ptr[i + 1] += row_ptr[i];
        }
        Self::from_csr(nrows, ncols, row_ptr, col_idx, values)
    }

    /// Assemble from per-row `(col, value)` lists in any order; duplicates are summed.
    pub fn from_rows(ncols: usize, rows: Vec<Vec<(usize, f64)>>) -> Self {
        let nrows = rows.len();
        let entries = rows
            .into_iter()
            .enumerate()
            .flat_map(|(i, r)| r.into_iter().map(move |(j, v)| (i, j, v)))
            .collect();
        Self::from_triplets(nrows, ncols, entries)
    }

    pub fn identity(n: usize) -> Self {
        Self::from_csr(n, n, (0..=n).collect(), (0..n).collect(), vec![1.0; n])
    }

    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self::from_csr(nrows, ncols, vec![0; nrows + 1], Vec::new(), Vec::new())
    }

    /// Copy the nonzeros of a dense matrix.
    pub fn from_dense(a: MatRef<'_, f64>) -> Self {
        let rows = (0..a.nrows())
            .map(|i| (0..a.ncols()).filter(|&j| a[(i, j)] != 0.0).map(|j| (j, a[(i, j)])).collect())
            .collect();
        Self::from_rows(a.ncols(), rows)
    }

    pub fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.inner.ncols()
    }

    pub fn nnz(&self) -> usize {
        self.inner.val().len()
    }

    /// Borrow the faer representation.
    pub fn as_faer(&self) -> SparseRowMatRef<'_, usize, f64> {
        self.inner.as_ref()
    }

    pub fn row_ptr(&self) -> &[usize] {
        self.inner.symbolic().row_ptr()
    }

    pub fn col_idx(&self) -> &[usize] {
        self.inner.symbolic().col_idx()
    }

    pub fn values(&self) -> &[f64] {
        self.inner.val()
    }

    /// Column indices and values of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let range = self.inner.symbolic().row_range(i);
        (&self.col_idx()[range.clone()], &self.values()[range])
    }

    /// Mutable values of row `i`; the pattern stays fixed.
    pub fn row_values_mut(&mut self, i: usize) -> &mut [f64] {
        self.inner.val_of_row_mut(i)
    }

    /// Entry `(i, j)`, zero when it is not stored.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (cols, vals) = self.row(i);
        cols.binary_search(&j).map(|k| vals[k]).unwrap_or(0.0)
    }

    /// Mutable reference to a stored entry.
    pub fn get_mut(&mut self, i: usize, j: usize) -> Option<&mut f64> {
        let range = self.inner.symbolic().row_range(i);
        let pos = self.col_idx()[range.clone()].binary_search(&j).ok()?;
        self.inner.val_of_row_mut(i).get_mut(pos)
    }

    fn row_dot(&self, i: usize, x: MatRef<'_, f64>, col: usize) -> f64 {
        let (cols, vals) = self.row(i);
        cols.iter().zip(vals).map(|(&j, &v)| v * x[(j, col)]).sum()
    }

    /// Compute y = A * x. `x.len() == ncols()`, `y.len() == nrows()`.
    pub fn spmv(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.ncols());
        assert_eq!(y.len(), self.nrows());
        #[cfg(feature = "rayon")]
        {
            y.par_iter_mut().enumerate().for_each(|(i, yi)| {
                let (cols, vals) = self.row(i);
                *yi = cols.iter().zip(vals).map(|(&j, &v)| v * x[j]).sum();
            });
        }
        #[cfg(not(feature = "rayon"))]
        {
            for (i, yi) in y.iter_mut().enumerate() {
                let (cols, vals) = self.row(i);
                *yi = cols.iter().zip(vals).map(|(&j, &v)| v * x[j]).sum();
            }
        }
    }

    /// `A x` for a multivector, allocating the result.
    pub fn mul_dense(&self, x: MatRef<'_, f64>) -> Mat<f64> {
        let mut y = Mat::zeros(self.nrows(), x.ncols());
        for col in 0..x.ncols() {
            #[cfg(feature = "rayon")]
            let out: Vec<f64> = (0..self.nrows()).into_par_iter().map(|i| self.row_dot(i, x, col)).collect();
            #[cfg(not(feature = "rayon"))]
            let out: Vec<f64> = (0..self.nrows()).map(|i| self.row_dot(i, x, col)).collect();
            for (i, v) in out.into_iter().enumerate() {
                y[(i, col)] = v;
            }
        }
        y
    }

    /// `A' x` for a multivector, allocating the result.
    pub fn transpose_mul_dense(&self, x: MatRef<'_, f64>) -> Mat<f64> {
        let mut y = Mat::zeros(self.ncols(), x.ncols());
        for i in 0..self.nrows() {
            let (cols, vals) = self.row(i);
            for col in 0..x.ncols() {
                let xi = x[(i, col)];
                if xi == 0.0 {
                    continue;
                }
                for (&j, &v) in cols.iter().zip(vals) {
                    y[(j, col)] += v * xi;
                }
            }
        }
        y
    }

    pub fn transpose(&self) -> CsrMatrix {
        let mut counts = vec![0usize; self.ncols() + 1];
        for &j in self.col_idx() {
            counts[j + 1] += 1;
        }
        for j in 0..self.ncols() {
            counts[j + 1] += counts[j];
        }
        let row_ptr = counts.clone();
        let mut next = counts;
        let mut col_idx = vec![0usize; self.nnz()];
        let mut values = vec![0.0; self.nnz()];
        for i in 0..self.nrows() {
            let (cols, vals) = self.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                let p = next[j];
                col_idx[p] = i;
                values[p] = v;
                next[j] += 1;
            }
        }
        Self::from_csr(self.ncols(), self.nrows(), row_ptr, col_idx, values)
    }

    /// Sparse product `self * other` (row-wise Gustavson accumulation).
    pub fn matmul(&self, other: &CsrMatrix) -> Result<CsrMatrix, HymlsError> {
        check_dim("sparse matmul", self.ncols(), other.nrows())?;
        let n = other.ncols();
        let product_row = |i: usize, acc: &mut Vec<f64>, mark: &mut Vec<bool>| -> Vec<(usize, f64)> {
            let mut touched = Vec::new();
            let (cols, vals) = self.row(i);
            for (&k, &a) in cols.iter().zip(vals) {
                let (ocols, ovals) = other.row(k);
                for (&j, &b) in ocols.iter().zip(ovals) {
                    if !mark[j] {
                        mark[j] = true;
                        touched.push(j);
                    }
                    acc[j] += a * b;
                }
            }
            touched.sort_unstable();
            touched
                .into_iter()
                .map(|j| {
                    let v = acc[j];
                    acc[j] = 0.0;
                    mark[j] = false;
                    (j, v)
                })
                .collect()
        };
        #[cfg(feature = "rayon")]
        let rows: Vec<Vec<(usize, f64)>> = (0..self.nrows())
            .into_par_iter()
            .map_init(|| (vec![0.0; n], vec![false; n]), |(acc, mark), i| product_row(i, acc, mark))
            .collect();
        #[cfg(not(feature = "rayon"))]
        let rows: Vec<Vec<(usize, f64)>> = {
            let (mut acc, mut mark) = (vec![0.0; n], vec![false; n]);
            (0..self.nrows()).map(|i| product_row(i, &mut acc, &mut mark)).collect()
        };
        Ok(Self::from_sorted_rows(n, rows))
    }

    fn from_sorted_rows(ncols: usize, rows: Vec<Vec<(usize, f64)>>) -> Self {
        let nrows = rows.len();
        let mut row_ptr = Vec::with_capacity(nrows + 1);
        row_ptr.push(0);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        for r in rows {
            for (j, v) in r {
                col_idx.push(j);
                values.push(v);
            }
            row_ptr.push(col_idx.len());
        }
        Self::from_csr(nrows, ncols, row_ptr, col_idx, values)
    }

    /// Submatrix `A[rows, cols]` renumbered to `0..rows.len()` × `0..cols.len()`.
    pub fn extract(&self, rows: &[usize], cols: &[usize]) -> CsrMatrix {
        let col_map = Self::index_map(self.ncols(), cols);
        let out = rows
            .iter()
            .map(|&i| {
                let (c, v) = self.row(i);
                c.iter()
                    .zip(v)
                    .filter_map(|(&j, &x)| col_map[j].map(|jj| (jj, x)))
                    .collect::<Vec<_>>()
            })
            .collect();
        Self::from_rows(cols.len(), out)
    }

    /// Dense copy of `A[rows, cols]`.
    pub fn extract_dense(&self, rows: &[usize], cols: &[usize]) -> Mat<f64> {
        let col_map = Self::index_map(self.ncols(), cols);
        let mut out = Mat::zeros(rows.len(), cols.len());
        for (ii, &i) in rows.iter().enumerate() {
            let (c, v) = self.row(i);
            for (&j, &x) in c.iter().zip(v) {
                if let Some(jj) = col_map[j] {
                    out[(ii, jj)] = x;
                }
            }
        }
        out
    }

    /// Inverse lookup from a global index to its position in `idx`.
    pub fn index_map(n: usize, idx: &[usize]) -> Vec<Option<usize>> {
        let mut map = vec![None; n];
        for (k, &g) in idx.iter().enumerate() {
            map[g] = Some(k);
        }
        map
    }

    /// Keep only the entries for which `keep(row, col, value)` holds.
    pub fn filter(&self, keep: impl Fn(usize, usize, f64) -> bool) -> CsrMatrix {
        let rows = (0..self.nrows())
            .map(|i| {
                let (c, v) = self.row(i);
                c.iter().zip(v).filter(|&(&j, &x)| keep(i, j, x)).map(|(&j, &x)| (j, x)).collect()
            })
            .collect();
        Self::from_sorted_rows(self.ncols(), rows)
    }

    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.nrows().min(self.ncols())).map(|i| self.get(i, i)).collect()
    }

    pub fn frobenius(&self) -> f64 {
        self.values().iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    pub fn to_dense(&self) -> Mat<f64> {
        let mut d = Mat::zeros(self.nrows(), self.ncols());
        for i in 0..self.nrows() {
            let (c, v) = self.row(i);
            for (&j, &x) in c.iter().zip(v) {
                d[(i, j)] = x;
            }
        }
        d
    }

    /// Neighbor lists of the symmetrized graph, without self loops.
    pub fn adjacency(&self) -> Vec<Vec<usize>> {
        let n = self.nrows();
        let mut adj = vec![Vec::new(); n];
        for i in 0..n {
            for &j in self.row(i).0 {
                if i != j && j < n {
                    adj[i].push(j);
                    adj[j].push(i);
                }
            }
        }
        for a in adj.iter_mut() {
            a.sort_unstable();
            a.dedup();
        }
        adj
    }

    /// `B[i, j] = A[perm[i], perm[j]]`.
    pub fn permute(&self, perm: &[usize]) -> CsrMatrix {
        self.extract(perm, perm)
    }

    /// `diag(r) A diag(c)`
    pub fn scale(&self, r: &[f64], c: &[f64]) -> CsrMatrix {
        let mut out = self.clone();
        for i in 0..self.nrows() {
            let cols = self.row(i).0.to_vec();
            for (v, j) in out.row_values_mut(i).iter_mut().zip(cols) {
                *v *= r[i] * c[j];
            }
        }
        out
    }

    /// `alpha A + beta B` on the union pattern.
    pub fn add(&self, alpha: f64, other: &CsrMatrix, beta: f64) -> Result<CsrMatrix, HymlsError> {
        check_dim("sparse add (rows)", self.nrows(), other.nrows())?;
        check_dim("sparse add (cols)", self.ncols(), other.ncols())?;
        let mut entries = Vec::with_capacity(self.nnz() + other.nnz());
        for (m, s) in [(self, alpha), (other, beta)] {
            for i in 0..m.nrows() {
                let (c, v) = m.row(i);
                entries.extend(c.iter().zip(v).map(|(&j, &x)| (i, j, s * x)));
            }
        }
        Ok(Self::from_triplets(self.nrows(), self.ncols(), entries))
    }

    /// True when both matrices store exactly the same pattern.
    pub fn same_pattern(&self, other: &CsrMatrix) -> bool {
        self.nrows() == other.nrows()
            && self.ncols() == other.ncols()
            && self.row_ptr() == other.row_ptr()
            && self.col_idx() == other.col_idx()
    }

    /// Column-major copy for faer's sparse factorizations.
    pub fn to_col_major(&self) -> Result<SparseColMat<usize, f64>, HymlsError> {
        self.inner.to_col_major().map_err(|e| HymlsError::Factorization {
            context: "CSR to CSC conversion".into(),
            detail: format!("{e:?}"),
        })
    }
}

impl Operator for CsrMatrix {
    fn nrows(&self) -> usize {
        CsrMatrix::nrows(self)
    }
    fn ncols(&self) -> usize {
        CsrMatrix::ncols(self)
    }
    fn apply(&self, x: MatRef<'_, f64>, mut y: MatMut<'_, f64>) -> Result<(), HymlsError> {
        check_dim("sparse apply (x rows)", CsrMatrix::ncols(self), x.nrows())?;
        check_dim("sparse apply (y rows)", CsrMatrix::nrows(self), y.nrows())?;
        check_dim("sparse apply (columns)", x.ncols(), y.ncols())?;
        y.copy_from(self.mul_dense(x));
        Ok(())
    }
    fn label(&self) -> String {
        format!("csr {}x{} ({} nnz)", CsrMatrix::nrows(self), CsrMatrix::ncols(self), self.nnz())
    }
}

impl RowMatrix for CsrMatrix {
    fn num_my_rows(&self) -> usize {
        CsrMatrix::nrows(self)
    }
    fn num_global_cols(&self) -> usize {
        CsrMatrix::ncols(self)
    }
    fn num_my_row_entries(&self, row: usize) -> Result<usize, HymlsError> {
        if row >= CsrMatrix::nrows(self) {
            return Err(HymlsError::DimensionMismatch {
                context: "row index",
                expected: CsrMatrix::nrows(self),
                found: row,
            });
        }
        Ok(self.row(row).0.len())
    }
    fn extract_my_row_copy(
        &self,
        row: usize,
        values: &mut Vec<f64>,
        indices: &mut Vec<usize>,
    ) -> Result<usize, HymlsError> {
        let len = self.num_my_row_entries(row)?;
        let (c, v) = self.row(row);
        indices.clear();
        indices.extend_from_slice(c);
        values.clear();
        values.extend_from_slice(v);
        Ok(len)
    }
    fn multiply(&self, transpose: bool, x: MatRef<'_, f64>, mut y: MatMut<'_, f64>) -> Result<(), HymlsError> {
        if transpose {
            check_dim("sparse transpose multiply", CsrMatrix::nrows(self), x.nrows())?;
            check_dim("sparse transpose multiply", CsrMatrix::ncols(self), y.nrows())?;
            y.copy_from(self.transpose_mul_dense(x));
            Ok(())
        } else {
            self.apply(x, y)
        }
    }
    fn extract_diagonal_copy(&self) -> Result<Vec<f64>, HymlsError> {
        Ok(self.diagonal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_spmv() {
        // 3×3 identity in CSR: row_ptr=[0,1,2,3], col_idx=[0,1,2], vals=[1,1,1]
        let m = CsrMatrix::from_csr(3, 3, vec![0, 1, 2, 3], vec![0, 1, 2], vec![1.0, 1.0, 1.0]);
        let x = vec![2.0, 3.0, 5.0];
        let mut y = vec![0.0; 3];
        m.spmv(&x, &mut y);
        assert_eq!(y, x);
    }

    #[test]
    fn triplets_sum_duplicates() {
        // 2×3 matrix [[1,2,0],[0,3,4]] with the (1,1) entry split in two
        let m = CsrMatrix::from_triplets(
            2,
            3,
            vec![(1, 2, 4.0), (0, 1, 2.0), (1, 1, 1.0), (0, 0, 1.0), (1, 1, 2.0)],
        );
        assert_eq!(m.nnz(), 4);
        let x = vec![1.0, 1.0, 1.0];
        let mut y = vec![0.0; 2];
        m.spmv(&x, &mut y);
        assert_eq!(y, vec![3.0, 7.0]);
    }

    #[test]
    fn transpose_and_matmul_agree_with_dense() {
        let a = CsrMatrix::from_triplets(3, 2, vec![(0, 0, 1.0), (1, 1, 2.0), (2, 0, 3.0), (2, 1, -1.0)]);
        let ata = a.transpose().matmul(&a).unwrap();
        let dense = a.to_dense();
        let expected = dense.transpose() * dense.as_ref();
        for i in 0..2 {
            for j in 0..2 {
                assert!((ata.get(i, j) - expected[(i, j)]).abs() < 1e-14);
            }
        }
    }

    #[test]
    fn extract_renumbers_rows_and_columns() {
        let a = CsrMatrix::from_triplets(3, 3, vec![(0, 0, 1.0), (0, 2, 5.0), (2, 0, 7.0), (2, 2, 9.0), (1, 1, 3.0)]);
        let sub = a.extract(&[2, 0], &[2, 0]);
        assert_eq!(sub.get(0, 0), 9.0);
        assert_eq!(sub.get(0, 1), 7.0);
        assert_eq!(sub.get(1, 0), 5.0);
        assert_eq!(sub.nnz(), 4);
    }
}
