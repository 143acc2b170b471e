//! Tests for the bordered and projected operators, the group transforms
//! and the partition checks.
//!
//! Operators are compared against the same product formed explicitly with
//! dense faer matrices.

use std::sync::{Arc, Barrier, Mutex};

use approx::assert_abs_diff_eq;
use faer::Mat;
use rand::{Rng, SeedableRng, rngs::StdRng};

use hymls::config::HymlsParams;
use hymls::core::traits::{Operator, RowMatrix};
use hymls::matrix::CsrMatrix;
use hymls::matrix::dense_utils::orthogonalize;
use hymls::matrix::gallery::{bgrid_stokes_2d, laplace_2d};
use hymls::error::HymlsError;
use hymls::operator::{AugmentedMatrix, ProjectedOperator};
use hymls::parallel::Comm;
use hymls::partition::{HierarchicalMap, TestContext, Tester};
use hymls::transform::{Householder, OrthogonalTransform, RestrictedOT, assemble_transform, bgrid_rotation};

fn random_mat(nrows: usize, ncols: usize, seed: u64) -> Mat<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Mat::from_fn(nrows, ncols, |_, _| rng.gen_range(-1.0..1.0))
}

/// `[A V; W' C] [x; s]` formed with dense blocks.
fn dense_bordered_product(a: &CsrMatrix, v: &Mat<f64>, w: &Mat<f64>, c: &Mat<f64>, xs: &Mat<f64>) -> Mat<f64> {
    let n = a.nrows();
    let k = v.ncols();
    let x = xs.as_ref().subrows(0, n);
    let s = xs.as_ref().subrows(n, k);
    let top = a.mul_dense(x) + v.as_ref() * s;
    let bottom = w.transpose() * x + c.as_ref() * s;
    Mat::from_fn(n + k, xs.ncols(), |i, j| if i < n { top[(i, j)] } else { bottom[(i - n, j)] })
}

/// The augmented matrix agrees with the dense product for a zero border,
/// only V, only W, and a full border.
#[test]
fn augmented_matrix_matches_dense_product() {
    let a = Arc::new(laplace_2d(6, 6));
    let (n, k) = (36, 2);
    let zeros = Mat::<f64>::zeros(n, k);
    let v = random_mat(n, k, 1);
    let w = random_mat(n, k, 2);
    let c = random_mat(k, k, 3);
    let cases = [
        ("V = W = 0", zeros.clone(), zeros.clone()),
        ("V only", v.clone(), zeros.clone()),
        ("W only", zeros.clone(), w.clone()),
        ("V and W", v.clone(), w.clone()),
    ];
    for (name, v, w) in cases {
        let aug = AugmentedMatrix::new(Arc::clone(&a), v.clone(), w.clone(), Some(c.clone())).unwrap();
        assert_eq!(aug.nrows(), n + k, "{name}");
        assert_eq!(aug.num_global_nonzeros(), a.nnz() + 2 * k * n + k * k, "{name}");
        let xs = random_mat(n + k, 3, 4);
        let mut y = Mat::zeros(n + k, 3);
        aug.apply(xs.as_ref(), y.as_mut()).unwrap();
        let expected = dense_bordered_product(&a, &v, &w, &c, &xs);
        assert!((y - expected.as_ref()).norm_max() < 1e-12, "{name}");

        let csr = aug.to_csr().unwrap();
        let y_csr = csr.mul_dense(xs.as_ref());
        assert!((y_csr - expected).norm_max() < 1e-12, "{name}");
    }
}

/// Zero border entries are left out of the assembled matrix.
#[test]
fn augmented_to_csr_skips_zero_border() {
    let a = Arc::new(laplace_2d(4, 4));
    let zeros = Mat::<f64>::zeros(16, 1);
    let aug = AugmentedMatrix::new(Arc::clone(&a), zeros.clone(), zeros, None).unwrap();
    assert_eq!(aug.to_csr().unwrap().nnz(), a.nnz());
    assert_eq!(aug.num_my_row_entries(0).unwrap(), a.row(0).0.len() + 1);
    assert_eq!(aug.num_my_row_entries(16).unwrap(), 17);
    assert_abs_diff_eq!(aug.norm_inf().unwrap(), a.norm_inf().unwrap(), epsilon = 1e-14);
}

/// `V'AV` for an orthonormal V, and its inverse.
#[test]
fn projected_operator_and_inverse() {
    let a = laplace_2d(5, 5);
    let dense_a = a.to_dense();
    let mut v = random_mat(25, 3, 8);
    orthogonalize(&mut v).unwrap();
    let op = ProjectedOperator::new(Box::new(a), v.clone(), None, false).unwrap();
    assert_eq!(op.nrows(), 3);

    let x = random_mat(3, 2, 9);
    let mut y = Mat::zeros(3, 2);
    op.apply(x.as_ref(), y.as_mut()).unwrap();
    let vav = v.transpose() * dense_a.as_ref() * v.as_ref();
    let expected = vav.as_ref() * x.as_ref();
    assert!((y.as_ref() - expected.as_ref()).norm_max() < 1e-12);

    let mut z = Mat::zeros(3, 2);
    op.apply_inverse(y.as_ref(), z.as_mut()).unwrap();
    assert!((z - x).norm_max() < 1e-10);
}

/// The complement projection maps into the orthogonal complement of V.
#[test]
fn projected_complement_is_orthogonal_to_v() {
    let a = laplace_2d(5, 5);
    let mut v = random_mat(25, 2, 12);
    orthogonalize(&mut v).unwrap();
    let op = ProjectedOperator::new(Box::new(a), v.clone(), None, true).unwrap();
    let x = random_mat(25, 1, 13);
    let mut y = Mat::zeros(25, 1);
    op.apply(x.as_ref(), y.as_mut()).unwrap();
    assert!((v.transpose() * y.as_ref()).norm_max() < 1e-12);
    let mut z = Mat::zeros(2, 1);
    assert!(op.apply_inverse(y.as_ref().subrows(0, 2), z.as_mut()).is_err());
}

/// The reflector sends the test vector to a multiple of e₁ and is its own inverse.
#[test]
fn householder_maps_test_vector_to_first_unit_vector() {
    let t = [1.0, 2.0, -1.0, 0.5];
    let mut x = Mat::from_fn(4, 1, |i, _| t[i]);
    Householder.apply(x.as_mut(), &t).unwrap();
    let norm = t.iter().map(|v| v * v).sum::<f64>().sqrt();
    assert_abs_diff_eq!(x[(0, 0)], -norm, epsilon = 1e-12);
    for i in 1..4 {
        assert_abs_diff_eq!(x[(i, 0)], 0.0, epsilon = 1e-12);
    }
    Householder.apply(x.as_mut(), &t).unwrap();
    for i in 0..4 {
        assert_abs_diff_eq!(x[(i, 0)], t[i], epsilon = 1e-12);
    }
}

/// The sparse transform built from per-group entries gives the same `T'AT`
/// as the restricted dense application.
#[test]
fn restricted_transform_matches_sparse_product() {
    let a = laplace_2d(3, 3);
    let t = [1.0, 1.0, 1.0];
    let indices = [3, 4, 5];
    let tr = assemble_transform(9, Householder.construct(&indices, &t).unwrap());
    let tat = Householder.apply_sparse(&tr, &a).unwrap();

    let mut dense = a.to_dense();
    RestrictedOT::new(Householder).apply(dense.as_mut(), 3, &t).unwrap();
    assert!((tat.to_dense() - dense).norm_max() < 1e-12);
}

/// A Cartesian partition of a 32 × 32 Laplacian passes the decomposition check.
#[test]
fn laplace_partition_is_a_valid_decomposition() {
    let a = laplace_2d(32, 32);
    let mut params = HymlsParams::for_grid_2d(32, 32, 1).with_separator_length(4);
    params.validate(a.nrows()).unwrap();
    let map = HierarchicalMap::new(&a, &params).unwrap();
    assert_eq!(map.num_subdomains(), 64);
    assert_eq!(map.interior().len() + map.separators().len(), 1024);
    let mut tester = Tester::new(TestContext::from_params(&params));
    assert!(tester.is_dd_correct(&a, &map), "{:?}", tester.ctx.messages());
}

/// Rotating the velocity pairs of a B-grid Stokes matrix gives an F-matrix.
#[test]
fn bgrid_rotation_gives_f_matrix() {
    let a = bgrid_stokes_2d(6, 6, 0.0, 0.0);
    let t = bgrid_rotation(a.nrows(), 3, 2).unwrap();
    let tat = Householder.apply_sparse(&t, &a).unwrap().filter(|_, _, v| v != 0.0);
    let params = HymlsParams::for_grid_2d(6, 6, 3).with_pressure_variable(2);
    let mut tester = Tester::new(TestContext::from_params(&params));
    assert!(tester.is_f_matrix(&tat), "{:?}", tester.ctx.messages());
    let tt = t.matmul(&t).unwrap();
    assert!(tester.is_identity(&tt.filter(|_, _, v| v.abs() > 1e-14)));
}

/// A thread-pool communicator behaves like the serial one for the border.
#[cfg(feature = "rayon")]
#[test]
fn augmented_matrix_over_rayon_comm() {
    use hymls::parallel::RayonComm;
    let a = Arc::new(laplace_2d(4, 4));
    let v = random_mat(16, 1, 30);
    let serial = AugmentedMatrix::new(Arc::clone(&a), v.clone(), v.clone(), None).unwrap();
    let threaded = AugmentedMatrix::with_comm(Arc::clone(&a), v.clone(), v, None, Box::new(RayonComm::default())).unwrap();
    let xs = random_mat(17, 1, 31);
    let (mut y1, mut y2) = (Mat::zeros(17, 1), Mat::zeros(17, 1));
    serial.apply(xs.as_ref(), y1.as_mut()).unwrap();
    threaded.apply(xs.as_ref(), y2.as_mut()).unwrap();
    assert!((y1 - y2).norm_max() < 1e-14);
}

/// Ranks running as threads of one process, for exercising the distributed paths.
struct ThreadComm {
    rank: usize,
    size: usize,
    barrier: Arc<Barrier>,
    slots: Arc<Mutex<Vec<Vec<f64>>>>,
}

impl ThreadComm {
    fn group(size: usize) -> Vec<ThreadComm> {
        let barrier = Arc::new(Barrier::new(size));
        let slots = Arc::new(Mutex::new(vec![Vec::new(); size]));
        (0..size)
            .map(|rank| ThreadComm { rank, size, barrier: Arc::clone(&barrier), slots: Arc::clone(&slots) })
            .collect()
    }

    fn post(&self, data: Vec<f64>) {
        self.slots.lock().unwrap()[self.rank] = data;
        self.barrier.wait();
    }
}

impl Comm for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
    fn barrier(&self) {
        self.barrier.wait();
    }
    fn gather(&self, local: &[f64], root: usize) -> Result<Vec<f64>, HymlsError> {
        self.post(local.to_vec());
        let out = if self.rank == root { self.slots.lock().unwrap().concat() } else { Vec::new() };
        self.barrier.wait();
        Ok(out)
    }
    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<(), HymlsError> {
        self.post(buf.to_vec());
        buf.copy_from_slice(&self.slots.lock().unwrap()[root]);
        self.barrier.wait();
        Ok(())
    }
    fn all_reduce(&self, x: f64) -> f64 {
        self.post(vec![x]);
        let sum = self.slots.lock().unwrap().iter().map(|s| s[0]).sum();
        self.barrier.wait();
        sum
    }
}

/// Two ranks holding half of the rows each reproduce the serial products,
/// column sums and scaling; the border rows live on the last rank.
#[test]
fn augmented_matrix_over_two_ranks_matches_serial() {
    let a = Arc::new(laplace_2d(6, 6));
    let (n, k, half) = (36, 2, 18);
    let v = random_mat(n, k, 40);
    let w = random_mat(n, k, 41);
    let c = random_mat(k, k, 42);
    let xs = random_mat(n + k, 2, 43);
    let serial = AugmentedMatrix::new(Arc::clone(&a), v.clone(), w.clone(), Some(c.clone())).unwrap();
    let mut y = Mat::zeros(n + k, 2);
    serial.multiply(false, xs.as_ref(), y.as_mut()).unwrap();
    let mut yt = Mat::zeros(n + k, 2);
    serial.multiply(true, xs.as_ref(), yt.as_mut()).unwrap();
    let col_sums = serial.inv_col_sums().unwrap();

    let all_cols: Vec<usize> = (0..n).collect();
    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = ThreadComm::group(2)
            .into_iter()
            .map(|comm| {
                let (a, v, w, c, xs, all_cols) = (&a, &v, &w, &c, &xs, &all_cols);
                scope.spawn(move || {
                    let rows: Vec<usize> = (comm.rank * half..(comm.rank + 1) * half).collect();
                    let local = Arc::new(a.extract(&rows, all_cols));
                    let pick = |m: &Mat<f64>| Mat::from_fn(half, k, |i, j| m[(rows[i], j)]);
                    let aug = AugmentedMatrix::with_comm(local, pick(v), pick(w), Some(c.clone()), Box::new(comm))
                        .unwrap();
                    let my_rows = aug.num_my_rows();
                    let x = Mat::from_fn(my_rows, 2, |i, j| xs[(rows[0] + i, j)]);
                    let mut y = Mat::zeros(my_rows, 2);
                    aug.multiply(false, x.as_ref(), y.as_mut()).unwrap();
                    let mut yt = Mat::zeros(my_rows, 2);
                    aug.multiply(true, x.as_ref(), yt.as_mut()).unwrap();
                    (rows[0], y, yt, aug.inv_col_sums().unwrap())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results[0].1.nrows(), half);
    assert_eq!(results[1].1.nrows(), half + k);
    for (first, y_local, yt_local, sums) in &results {
        for i in 0..y_local.nrows() {
            for j in 0..2 {
                assert_abs_diff_eq!(y_local[(i, j)], y[(first + i, j)], epsilon = 1e-12);
                assert_abs_diff_eq!(yt_local[(i, j)], yt[(first + i, j)], epsilon = 1e-12);
            }
            assert_abs_diff_eq!(sums[i], col_sums[first + i], epsilon = 1e-14);
        }
    }
}
