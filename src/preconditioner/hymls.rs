//! The recursive domain-decomposition preconditioner.
//!
//! One level splits the unknowns into subdomain interiors and separators,
//!
//! ```text
//!     [A11 A12] [x1]   [b1]
//!     [A21 A22] [x2] = [b2],
//! ```
//!
//! factors `A11` subdomain by subdomain, forms the separator Schur complement
//! `S = A22 − A21 A11⁻¹ A12` and hands it to a [`SchurPreconditioner`], which
//! either factors it or reduces it onto the next level. Applying the
//! preconditioner is one block elimination sweep:
//!
//! ```text
//!     x2 = S̃⁻¹ (b2 − A21 A11⁻¹ b1)
//!     x1 = A11⁻¹ (b1 − A12 x2)
//! ```
//!
//! With a border `[A V; W' C]` the border columns are eliminated from the
//! interiors as well and the separator system carries the reduced border.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use faer::{Mat, MatMut, MatRef};

use crate::config::HymlsParams;
use crate::core::traits::{BorderedOperator, RowMatrix};
use crate::core::wrappers::{axpy, gather_rows, scatter_rows};
use crate::error::{HymlsError, check_dim};
use crate::matrix::CsrMatrix;
use crate::partition::{HierarchicalMap, Role, TestContext, Tester};
use crate::preconditioner::matrix_block::MatrixBlock;
use crate::preconditioner::schur_complement::SchurComplement;
use crate::preconditioner::schur_preconditioner::SchurPreconditioner;
use crate::preconditioner::{Border, InversePreconditioner};
use crate::transform::{Householder, OrthogonalTransform, bgrid_rotation};
use crate::utils::counters::Counters;

struct Blocks {
    a11: MatrixBlock,
    a12: MatrixBlock,
    a21: MatrixBlock,
    a22: MatrixBlock,
}

/// Border columns eliminated from the interiors: `Q1 = A11⁻¹ V1` and `W1`.
struct EliminatedBorder {
    q1: Mat<f64>,
    w1: Mat<f64>,
}

/// `T'AT` for the B-grid rotation `T`.
struct BgridTransform {
    t: CsrMatrix,
    tat: Arc<CsrMatrix>,
}

/// HYMLS preconditioner for one level, owning every level below it.
pub struct Preconditioner {
    matrix: Arc<CsrMatrix>,
    params: HymlsParams,
    level: usize,
    map: Option<Arc<HierarchicalMap>>,
    test_vector: Option<Vec<f64>>,
    bgrid: Option<BgridTransform>,
    blocks: Option<Blocks>,
    schur: Option<SchurPreconditioner>,
    border: Option<Border>,
    eliminated: Option<EliminatedBorder>,
    counters: Counters,
    initialized: bool,
    computed: bool,
}

impl Preconditioner {
    /// Top-level preconditioner for `a`. The parameters are validated
    /// against the matrix size.
    pub fn new(a: Arc<CsrMatrix>, mut params: HymlsParams) -> Result<Self, HymlsError> {
        check_dim("preconditioner (square)", a.nrows(), a.ncols())?;
        params.validate(a.nrows())?;
        Ok(Self::with_parts(a, params, 0, None, None))
    }

    /// Preconditioner of a deeper level over an existing partition.
    pub fn for_level(
        a: Arc<CsrMatrix>,
        params: HymlsParams,
        map: Arc<HierarchicalMap>,
        test_vector: Option<Vec<f64>>,
    ) -> Result<Self, HymlsError> {
        check_dim("preconditioner (rows vs partition)", map.num_nodes(), a.nrows())?;
        check_dim("preconditioner (square)", a.nrows(), a.ncols())?;
        if let Some(t) = &test_vector {
            check_dim("preconditioner (test vector)", a.nrows(), t.len())?;
        }
        let level = map.level();
        Ok(Self::with_parts(a, params, level, Some(map), test_vector))
    }

    fn with_parts(
        matrix: Arc<CsrMatrix>,
        params: HymlsParams,
        level: usize,
        map: Option<Arc<HierarchicalMap>>,
        test_vector: Option<Vec<f64>>,
    ) -> Self {
        Self {
            matrix,
            params,
            level,
            map,
            test_vector,
            bgrid: None,
            blocks: None,
            schur: None,
            border: None,
            eliminated: None,
            counters: Counters::default(),
            initialized: false,
            computed: false,
        }
    }

    /// Replace the matrix values. The partition is kept, so the new matrix
    /// must have the same graph.
    ///
    /// With the B-grid transform, `T'AT` is updated in place when the
    /// pattern allows it and rebuilt otherwise.
    pub fn set_matrix(&mut self, a: Arc<CsrMatrix>) -> Result<(), HymlsError> {
        check_dim("set_matrix (rows)", self.matrix.nrows(), a.nrows())?;
        check_dim("set_matrix (columns)", self.matrix.ncols(), a.ncols())?;
        let updated = match self.bgrid.as_mut() {
            Some(bg) if a.same_pattern(&self.matrix) => {
                Householder.apply_sparse_in_place(Arc::make_mut(&mut bg.tat), &bg.t, &a).is_ok()
            }
            _ => false,
        };
        if !updated {
            self.bgrid = None;
        }
        self.matrix = a;
        self.initialized = false;
        self.computed = false;
        Ok(())
    }

    /// Replace the parameters. The partition is rebuilt on the next `initialize`.
    pub fn set_parameters(&mut self, mut params: HymlsParams) -> Result<(), HymlsError> {
        if self.level == 0 {
            params.validate(self.matrix.nrows())?;
            self.map = None;
        }
        self.params = params;
        self.bgrid = None;
        self.initialized = false;
        self.computed = false;
        Ok(())
    }

    pub fn set_use_transpose(&mut self, on: bool) -> Result<(), HymlsError> {
        if on {
            return Err(HymlsError::Unsupported("transposed HYMLS preconditioner"));
        }
        Ok(())
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn params(&self) -> &HymlsParams {
        &self.params
    }

    pub fn map(&self) -> Option<&Arc<HierarchicalMap>> {
        self.map.as_ref()
    }

    pub fn matrix(&self) -> &Arc<CsrMatrix> {
        &self.matrix
    }

    /// The matrix the levels work on: `T'AT` with the B-grid transform, else `A`.
    pub fn working_matrix(&self) -> &Arc<CsrMatrix> {
        self.bgrid.as_ref().map_or(&self.matrix, |bg| &bg.tat)
    }

    pub fn schur(&self) -> Option<&SchurPreconditioner> {
        self.schur.as_ref()
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Interior block, available after `initialize`.
    pub fn a11(&self) -> Option<&MatrixBlock> {
        self.blocks.as_ref().map(|b| &b.a11)
    }

    pub fn has_norm_inf(&self) -> bool {
        true
    }

    pub fn norm_inf(&self) -> Result<f64, HymlsError> {
        self.matrix.norm_inf()
    }

    /// Rotate the velocity pairs of a B-grid discretization so that the
    /// matrix becomes an F-matrix.
    fn transform_matrix(&self) -> Result<BgridTransform, HymlsError> {
        let p = &self.params.problem;
        let pvar = p.pressure_variable.ok_or_else(|| crate::config_error!("B-grid transform needs 'Pressure Variable'"))?;
        let t = bgrid_rotation(self.matrix.nrows(), p.dof, pvar)?;
        let tat = Householder.apply_sparse(&t, &self.matrix)?.filter(|_, _, v| v != 0.0);
        let mut tester = Tester::new(TestContext::from_params(&self.params));
        if !tester.is_f_matrix(&tat) {
            log::warn!("B-grid transform did not produce an F-matrix: {}", tester.ctx.messages().join("; "));
        }
        Ok(BgridTransform { t, tat: Arc::new(tat) })
    }

    fn blocks(&self) -> Result<&Blocks, HymlsError> {
        self.blocks.as_ref().ok_or(HymlsError::State { component: "Preconditioner", expected: "initialize" })
    }

    fn current_map(&self) -> Result<&Arc<HierarchicalMap>, HymlsError> {
        self.map.as_ref().ok_or(HymlsError::State { component: "Preconditioner", expected: "initialize" })
    }

    /// Border columns eliminated from the interiors, plus the border of the
    /// separator system.
    fn compute_border(&self, border: &Border) -> Result<(EliminatedBorder, Border), HymlsError> {
        let b = self.blocks()?;
        let map = self.current_map()?;
        let transformed = match &self.bgrid {
            Some(bg) => Border {
                v: Householder.apply_inverse_vec(&bg.t, border.v.as_ref())?,
                w: Householder.apply_inverse_vec(&bg.t, border.w.as_ref())?,
                c: border.c.clone(),
            },
            None => border.clone(),
        };
        let k = border.width();
        let (nint, nsep) = (map.interior().len(), map.separators().len());
        let Border { v: v1, w: w1, .. } = transformed.restrict(map.interior());
        let Border { v: mut v_s, w: mut w_s, c: mut c_s } = transformed.restrict(map.separators());

        let mut q1 = Mat::zeros(nint, k);
        b.a11.apply_inverse(v1.as_ref(), q1.as_mut())?;
        let mut a21q1 = Mat::zeros(nsep, k);
        b.a21.apply(q1.as_ref(), a21q1.as_mut())?;
        axpy(-1.0, a21q1.as_ref(), v_s.as_mut());

        let mut z = Mat::zeros(nint, k);
        b.a11.apply_inverse_transpose(w1.as_ref(), z.as_mut())?;
        let a12tz = b.a12.block().transpose_mul_dense(z.as_ref());
        axpy(-1.0, a12tz.as_ref(), w_s.as_mut());

        axpy(-1.0, (w1.transpose() * q1.as_ref()).as_ref(), c_s.as_mut());
        Ok((EliminatedBorder { q1, w1 }, Border { v: v_s, w: w_s, c: c_s }))
    }

    /// One elimination sweep. Returns the solution and, with a border, the
    /// border multipliers.
    fn solve(&self, x: MatRef<'_, f64>, t: Option<MatRef<'_, f64>>) -> Result<(Mat<f64>, Mat<f64>), HymlsError> {
        if !self.computed {
            return Err(HymlsError::State { component: "Preconditioner::apply_inverse", expected: "compute" });
        }
        check_dim("preconditioner apply (rows)", self.matrix.nrows(), x.nrows())?;
        let b = self.blocks()?;
        let map = self.current_map()?;
        let schur = self.schur.as_ref().ok_or(HymlsError::State { component: "Preconditioner", expected: "compute" })?;
        let _timer = self.counters.apply_inverse.start();
        let flops_before = b.a11.apply_inverse_flops();
        let m = x.ncols();

        let xw = match &self.bgrid {
            Some(bg) => Householder.apply_inverse_vec(&bg.t, x)?,
            None => x.to_owned(),
        };
        let (nint, nsep) = (map.interior().len(), map.separators().len());
        let x1 = gather_rows(xw.as_ref(), map.interior());
        let mut x2 = gather_rows(xw.as_ref(), map.separators());

        let mut z1 = Mat::zeros(nint, m);
        b.a11.apply_inverse(x1.as_ref(), z1.as_mut())?;
        let mut a21z1 = Mat::zeros(nsep, m);
        b.a21.apply(z1.as_ref(), a21z1.as_mut())?;
        axpy(-1.0, a21z1.as_ref(), x2.as_mut());

        let t_red = match (t, &self.eliminated) {
            (Some(t), Some(e)) => {
                let mut tr = t.to_owned();
                axpy(-1.0, (e.w1.transpose() * z1.as_ref()).as_ref(), tr.as_mut());
                Some(tr)
            }
            _ => None,
        };
        let (y2, s) = schur.solve(x2.as_ref(), t_red.as_ref().map(|t| t.as_ref()))?;

        let mut r1 = x1;
        let mut a12y2 = Mat::zeros(nint, m);
        b.a12.apply(y2.as_ref(), a12y2.as_mut())?;
        axpy(-1.0, a12y2.as_ref(), r1.as_mut());
        let mut y1 = Mat::zeros(nint, m);
        b.a11.apply_inverse(r1.as_ref(), y1.as_mut())?;
        if let Some(e) = &self.eliminated {
            axpy(-1.0, (e.q1.as_ref() * s.as_ref()).as_ref(), y1.as_mut());
        }

        let mut yw = Mat::zeros(xw.nrows(), m);
        scatter_rows(y1.as_ref(), map.interior(), yw.as_mut());
        scatter_rows(y2.as_ref(), map.separators(), yw.as_mut());
        let nnz_off = (b.a12.block().nnz() + b.a21.block().nnz()) as f64;
        self.counters
            .apply_inverse
            .add_flops(b.a11.apply_inverse_flops() - flops_before + 4.0 * nnz_off * m as f64);
        let y = match &self.bgrid {
            Some(bg) => Householder.apply_vec(&bg.t, yw.as_ref())?,
            None => yw,
        };
        Ok((y, s))
    }

    /// Write the partition of this level (and of the levels below it unless
    /// `no_recurse`) as a MATLAB script.
    pub fn visualize(&self, path: impl AsRef<Path>, no_recurse: bool) -> Result<(), HymlsError> {
        let mut out = BufWriter::new(File::create(path)?);
        let p = &self.params.problem;
        writeln!(out, "% HYMLS domain decomposition")?;
        writeln!(out, "nx = {}; ny = {}; nz = {}; dof = {};", p.nx, p.ny, p.nz, p.dof)?;
        self.write_level(&mut out, no_recurse)?;
        out.flush()?;
        Ok(())
    }

    fn write_level(&self, out: &mut impl Write, no_recurse: bool) -> Result<(), HymlsError> {
        let map = self.current_map()?;
        let l = self.level + 1;
        let coords = map.coords();
        writeln!(out, "level{l}.x = [{}];", list(coords.iter().map(|c| c.x)))?;
        writeln!(out, "level{l}.y = [{}];", list(coords.iter().map(|c| c.y)))?;
        writeln!(out, "level{l}.z = [{}];", list(coords.iter().map(|c| c.z)))?;
        writeln!(out, "level{l}.var = [{}];", list(coords.iter().map(|c| c.var)))?;
        writeln!(out, "level{l}.subdomain = [{}];", list((0..map.num_nodes()).map(|i| map.subdomain_of(i) + 1)))?;
        writeln!(
            out,
            "level{l}.separator = [{}];",
            list((0..map.num_nodes()).map(|i| usize::from(map.role(i) == Role::Separator)))
        )?;
        writeln!(out, "level{l}.groups = {{}};")?;
        for (g, group) in map.groups().iter().enumerate() {
            writeln!(out, "level{l}.groups{{{}}} = [{}];", g + 1, list(group.members().iter().map(|i| i + 1)))?;
        }
        if !no_recurse {
            if let Some(next) = self.schur.as_ref().and_then(|s| s.next_level()) {
                next.write_level(out, no_recurse)?;
            }
        }
        Ok(())
    }
}

fn list(v: impl Iterator<Item = usize>) -> String {
    v.map(|x| x.to_string()).collect::<Vec<_>>().join(" ")
}

impl InversePreconditioner for Preconditioner {
    fn initialize(&mut self) -> Result<(), HymlsError> {
        if self.initialized {
            return Ok(());
        }
        let _timer = self.counters.initialize.start();
        if self.level == 0 && self.params.preconditioner.bgrid_transform && self.bgrid.is_none() {
            self.bgrid = Some(self.transform_matrix()?);
        }
        let a = Arc::clone(self.working_matrix());
        let map = match &self.map {
            Some(map) => Arc::clone(map),
            None => {
                let map = Arc::new(HierarchicalMap::new(&a, &self.params)?);
                self.map = Some(Arc::clone(&map));
                map
            }
        };
        if log::log_enabled!(log::Level::Debug) {
            let mut tester = Tester::new(TestContext::from_params(&self.params));
            if !tester.is_dd_correct(&a, &map) {
                log::debug!("level {}: partition is not a valid domain decomposition", self.level);
            }
        }
        let block = |rows, cols| -> Result<MatrixBlock, HymlsError> {
            let mut b = MatrixBlock::new(Arc::clone(&map), rows, cols);
            b.compute(&a)?;
            Ok(b)
        };
        let mut a11 = block(Role::Interior, Role::Interior)?;
        let pc = &self.params.preconditioner;
        a11.initialize_subdomain_solvers(pc.subdomain_solver, &self.params.direct_solver, self.params.subdomain_threads())?;
        self.blocks = Some(Blocks {
            a11,
            a12: block(Role::Interior, Role::Separator)?,
            a21: block(Role::Separator, Role::Interior)?,
            a22: block(Role::Separator, Role::Separator)?,
        });
        self.schur = None;
        self.initialized = true;
        self.computed = false;
        log::info!(
            "level {}: {} subdomains, {} interior and {} separator nodes in {} groups",
            self.level,
            map.num_subdomains(),
            map.interior().len(),
            map.separators().len(),
            map.groups().len()
        );
        Ok(())
    }

    fn compute(&mut self) -> Result<(), HymlsError> {
        if !self.initialized {
            self.initialize()?;
        }
        let _timer = self.counters.compute.start();
        let blocks = self.blocks.as_mut().ok_or(HymlsError::State { component: "Preconditioner", expected: "initialize" })?;
        let flops_before = blocks.a11.compute_flops();
        blocks.a11.compute_subdomain_solvers()?;
        let b = self.blocks()?;
        self.counters.compute.add_flops(b.a11.compute_flops() - flops_before);
        let s = SchurComplement::new(&b.a11, &b.a12, &b.a21, &b.a22)?.construct()?;
        let map = Arc::clone(self.current_map()?);
        let test: Vec<f64> = match &self.test_vector {
            Some(t) => map.separators().iter().map(|&i| t[i]).collect(),
            None => vec![1.0; map.separators().len()],
        };
        let mut schur = SchurPreconditioner::new(Arc::clone(&map), self.params.clone(), test)?;
        self.eliminated = None;
        if let Some(border) = &self.border {
            let (eliminated, reduced) = self.compute_border(border)?;
            schur.set_border(Some(reduced))?;
            self.eliminated = Some(eliminated);
        }
        schur.compute(&s)?;
        self.schur = Some(schur);
        self.computed = true;
        Ok(())
    }

    fn apply_inverse(&self, x: MatRef<'_, f64>, mut y: MatMut<'_, f64>) -> Result<(), HymlsError> {
        check_dim("preconditioner apply (y rows)", self.matrix.nrows(), y.nrows())?;
        let (sol, _) = self.solve(x, None)?;
        y.copy_from(sol.as_ref());
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn is_computed(&self) -> bool {
        self.computed
    }

    /// `‖M⁻¹ 1‖∞`, a cheap lower bound for `‖M⁻¹‖∞`.
    fn condest(&self) -> f64 {
        if !self.computed {
            return -1.0;
        }
        let n = self.matrix.nrows();
        let ones = Mat::from_fn(n, 1, |_, _| 1.0);
        match self.solve(ones.as_ref(), None) {
            Ok((y, _)) => y.norm_max(),
            Err(e) => {
                log::warn!("condition estimate failed: {e}");
                -1.0
            }
        }
    }

    fn label(&self) -> String {
        format!("HYMLS level {} ({} rows)", self.level, self.matrix.nrows())
    }

    fn nrows(&self) -> usize {
        self.matrix.nrows()
    }
}

impl BorderedOperator for Preconditioner {
    fn set_border(&mut self, v: Option<Mat<f64>>, w: Option<Mat<f64>>, c: Option<Mat<f64>>) -> Result<(), HymlsError> {
        self.border = match v {
            Some(v) => {
                let border = Border::new(v, w, c)?;
                check_dim("border (rows vs matrix)", self.matrix.nrows(), border.nrows())?;
                Some(border)
            }
            None => None,
        };
        self.eliminated = None;
        self.computed = false;
        Ok(())
    }

    fn has_border(&self) -> bool {
        self.border.is_some()
    }

    fn apply_bordered(
        &self,
        x: MatRef<'_, f64>,
        s: MatRef<'_, f64>,
        mut y: MatMut<'_, f64>,
        mut t: MatMut<'_, f64>,
    ) -> Result<(), HymlsError> {
        let border =
            self.border.as_ref().ok_or(HymlsError::State { component: "Preconditioner::apply_bordered", expected: "set_border" })?;
        check_dim("bordered apply (x rows)", self.matrix.ncols(), x.nrows())?;
        check_dim("bordered apply (s rows)", border.width(), s.nrows())?;
        let top = self.matrix.mul_dense(x) + border.v.as_ref() * s;
        let bottom = border.w.transpose() * x + border.c.as_ref() * s;
        y.copy_from(top.as_ref());
        t.copy_from(bottom.as_ref());
        Ok(())
    }

    fn apply_inverse_bordered(
        &self,
        y: MatRef<'_, f64>,
        t: MatRef<'_, f64>,
        mut x: MatMut<'_, f64>,
        mut s: MatMut<'_, f64>,
    ) -> Result<(), HymlsError> {
        let border = self
            .border
            .as_ref()
            .ok_or(HymlsError::State { component: "Preconditioner::apply_inverse_bordered", expected: "set_border" })?;
        check_dim("bordered inverse (t rows)", border.width(), t.nrows())?;
        let (sol, mult) = self.solve(y, Some(t))?;
        x.copy_from(sol.as_ref());
        s.copy_from(mult.as_ref());
        Ok(())
    }
}

impl fmt::Display for Preconditioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "HYMLS preconditioner, level {} ({} rows):", self.level, self.matrix.nrows())?;
        if let Some(map) = &self.map {
            writeln!(
                f,
                "  {} subdomains, {} separator nodes in {} groups",
                map.num_subdomains(),
                map.separators().len(),
                map.groups().len()
            )?;
        }
        write!(f, "{}", self.counters)?;
        if let Some(schur) = &self.schur {
            write!(f, "{schur}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::gallery::laplace_2d;

    fn laplace_pc(n: usize, levels: usize) -> (Arc<CsrMatrix>, Preconditioner) {
        let a = Arc::new(laplace_2d(n, n));
        let params = HymlsParams::for_grid_2d(n, n, 1).with_separator_length(4).with_levels(levels);
        let pc = Preconditioner::new(a.clone(), params).unwrap();
        (a, pc)
    }

    #[test]
    fn one_level_is_an_exact_solve() {
        let (a, mut pc) = laplace_pc(12, 1);
        pc.compute().unwrap();
        let b = Mat::from_fn(144, 2, |i, j| ((i + 5 * j) as f64).sin());
        let mut x = Mat::zeros(144, 2);
        pc.apply_inverse(b.as_ref(), x.as_mut()).unwrap();
        assert!((a.mul_dense(x.as_ref()) - b.as_ref()).norm_max() < 1e-10);
        assert!(pc.condest() > 0.0);
        assert_eq!(pc.counters().apply_inverse.count(), 2);
    }

    #[test]
    fn apply_before_compute_is_a_state_error() {
        let (_, mut pc) = laplace_pc(8, 1);
        let b = Mat::zeros(64, 1);
        let mut x = Mat::zeros(64, 1);
        assert!(matches!(pc.apply_inverse(b.as_ref(), x.as_mut()), Err(HymlsError::State { .. })));
        assert_eq!(pc.condest(), -1.0);
        assert!(pc.set_use_transpose(true).is_err());
        pc.initialize().unwrap();
        assert!(pc.is_initialized() && !pc.is_computed());
    }

    #[test]
    fn two_levels_reduce_onto_vsums() {
        let (a, mut pc) = laplace_pc(16, 2);
        pc.compute().unwrap();
        let schur = pc.schur().unwrap();
        assert_eq!(schur.num_vsums(), Some(pc.map().unwrap().groups().len()));
        let b = Mat::from_fn(256, 1, |_, _| 1.0);
        let mut x = Mat::zeros(256, 1);
        pc.apply_inverse(b.as_ref(), x.as_mut()).unwrap();
        let r = a.mul_dense(x.as_ref()) - b.as_ref();
        assert!(r.norm_l2() < b.norm_l2());
        assert!(format!("{pc}").contains("level 0"));
    }
}
