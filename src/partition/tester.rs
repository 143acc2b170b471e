//! Structural checks on matrices and partitions.
//!
//! Every check returns `true` on success and appends a description of each
//! violation to the [`TestContext`]. [`Tester::run`] turns a failed check
//! into a logged warning.

use faer::MatRef;

use crate::config::HymlsParams;
use crate::error::{HymlsError, check_dim};
use crate::matrix::CsrMatrix;
use crate::partition::{HierarchicalMap, NodeCoord, Role};

/// Entries below this magnitude do not count as couplings.
const SMALL_ENTRY: f64 = 1e-14;

/// Grid description, tolerance and collected failure messages.
#[derive(Debug, Clone)]
pub struct TestContext {
    pub dim: usize,
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub dof: usize,
    pub pvar: Option<usize>,
    pub tol: f64,
    /// F-matrix checks only make sense for saddle-point problems.
    pub do_fmat_tests: bool,
    /// Number of processes; the decomposition check needs a serial run.
    pub comm_size: usize,
    messages: Vec<String>,
    failed: usize,
}

impl TestContext {
    pub fn from_params(params: &HymlsParams) -> Self {
        let p = &params.problem;
        Self {
            dim: p.dimension,
            nx: p.nx,
            ny: p.ny,
            nz: p.nz,
            dof: p.dof,
            pvar: p.pressure_variable,
            tol: 256.0 * f64::EPSILON,
            do_fmat_tests: p.pressure_variable.is_some(),
            comm_size: 1,
            messages: Vec::new(),
            failed: 0,
        }
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Checks that failed through [`Tester::run`].
    pub fn num_failed(&self) -> usize {
        self.failed
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Runs the checks against one [`TestContext`].
#[derive(Debug, Clone)]
pub struct Tester {
    pub ctx: TestContext,
}

impl Tester {
    pub fn new(ctx: TestContext) -> Self {
        Self { ctx }
    }

    fn note(&mut self, msg: String) {
        self.ctx.messages.push(msg);
    }

    fn is_pressure(&self, gid: usize) -> bool {
        self.ctx.dof > 0 && self.ctx.pvar == Some(gid % self.ctx.dof)
    }

    /// Record the outcome of a check; failures are logged with the messages gathered so far.
    pub fn run(&mut self, name: &str, passed: bool) -> bool {
        if !passed {
            self.ctx.failed += 1;
            log::warn!("test '{name}' failed:\n{}", self.ctx.messages.join("\n"));
        }
        self.ctx.messages.clear();
        passed
    }

    /// `(x,y,z):V` description of a global row.
    pub fn gid_to_string(&self, gid: usize) -> String {
        let c = &self.ctx;
        if c.nx == 0 || c.ny == 0 || c.dof == 0 {
            return "Tester not initialized correctly".into();
        }
        let NodeCoord { x, y, z, var } = NodeCoord::from_index(gid, c.nx, c.ny, c.dof);
        let name = match var {
            v if Some(v) == c.pvar => "P",
            0 => "U",
            1 => "V",
            2 => "W",
            _ => "X",
        };
        format!("({x},{y},{z}):{name}")
    }

    pub fn is_symmetric_pattern(&mut self, a: &CsrMatrix) -> bool {
        if a.nrows() != a.ncols() {
            self.note(format!("matrix is {}x{}", a.nrows(), a.ncols()));
            return false;
        }
        let at = a.transpose();
        for i in 0..a.nrows() {
            if a.row(i).0 != at.row(i).0 {
                self.note(format!("row {i} and column {i} have different patterns"));
                return false;
            }
        }
        true
    }

    pub fn is_symmetric(&mut self, a: &CsrMatrix) -> bool {
        if !self.is_symmetric_pattern(a) {
            return false;
        }
        let at = a.transpose();
        for i in 0..a.nrows() {
            let (cols, vals) = a.row(i);
            for ((&j, &v), &w) in cols.iter().zip(vals).zip(at.row(i).1) {
                if (v - w).abs() >= self.ctx.tol {
                    self.note(format!("A({i},{j}) = {v} differs from A({j},{i}) = {w}"));
                    return false;
                }
            }
        }
        true
    }

    pub fn is_identity(&mut self, a: &CsrMatrix) -> bool {
        let diag_err = a.diagonal().iter().map(|d| (d - 1.0).powi(2)).sum::<f64>().sqrt();
        self.note(format!("||diag(A)-e|| = {diag_err:e}"));
        if diag_err > self.ctx.tol {
            return false;
        }
        let off = a.filter(|i, j, _| i != j);
        let norm = (0..off.nrows()).map(|i| off.row(i).1.iter().map(|v| v.abs()).sum::<f64>()).fold(0.0, f64::max);
        self.note(format!("||A-I||_inf = {norm:e}"));
        norm <= self.ctx.tol
    }

    /// Every non-pressure row couples to at most two pressures, with entries summing to zero.
    pub fn is_f_matrix(&mut self, a: &CsrMatrix) -> bool {
        if !self.ctx.do_fmat_tests {
            return true;
        }
        let (dof, pvar) = (self.ctx.dof, self.ctx.pvar);
        self.note(format!("dof={dof}, pvar={pvar:?}"));
        if !matches!(pvar, Some(p) if p < dof) {
            self.note("pressure variable is not set or out of range".into());
            return false;
        }
        if !self.is_symmetric_pattern(a) {
            return false;
        }
        let mut status = true;
        let velocity_rows: Vec<usize> = (0..a.nrows()).filter(|&i| !self.is_pressure(i)).collect();
        for i in velocity_rows {
            let (cols, vals) = a.row(i);
            let (count, sum) = cols
                .iter()
                .zip(vals)
                .filter(|&(&j, _)| self.is_pressure(j))
                .fold((0usize, 0.0), |(n, s), (_, v)| (n + 1, s + v));
            if count > 2 {
                self.note(format!("global row {i} has {count} entries in Grad-part"));
                status = false;
            }
            if sum.abs() > self.ctx.tol {
                self.note(format!("global row {i} has row sum(G) = {sum:e}"));
                status = false;
            }
        }
        status
    }

    /// No coupling between interiors of different subdomains, and no interior row without
    /// a nonzero inside its own subdomain.
    pub fn is_dd_correct(&mut self, a: &CsrMatrix, map: &HierarchicalMap) -> bool {
        if self.ctx.comm_size > 1 {
            self.note("test skipped, it works only for serial runs".into());
            return true;
        }
        if a.nrows() != map.num_nodes() {
            self.note(format!("matrix has {} rows, partition {} nodes", a.nrows(), map.num_nodes()));
            return false;
        }
        let is_sep_of = |s: usize, node: usize| {
            map.role(node) == Role::Separator && map.separators_of(s).binary_search(&map.position(node)).is_ok()
        };
        let is_int_of = |s: usize, node: usize| map.role(node) == Role::Interior && map.subdomain_of(node) == s;
        let mut status = true;
        for i in 0..a.nrows() {
            let sd_i = map.subdomain_of(i);
            let mut has_interior_coupling = false;
            let (cols, vals) = a.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                let sd_j = map.subdomain_of(j);
                if sd_i != sd_j {
                    let ok1 = is_sep_of(sd_i, i) && is_sep_of(sd_j, i) && is_int_of(sd_j, j);
                    let ok2 = is_sep_of(sd_i, j) && is_sep_of(sd_j, j) && is_int_of(sd_i, i);
                    // both separators: a corner where retained nodes meet
                    let ok3 = !(ok1 || ok2) && is_sep_of(sd_i, i) && is_sep_of(sd_j, j);
                    if !(ok1 || ok2 || ok3) {
                        let msg = format!(
                            "edge between gid {i} [sd {sd_i}, {}] and {j} [sd {sd_j}, {}] is incorrect",
                            self.gid_to_string(i),
                            self.gid_to_string(j)
                        );
                        self.note(msg);
                        status = false;
                    }
                } else if is_int_of(sd_i, i) && is_int_of(sd_i, j) && v.abs() > SMALL_ENTRY {
                    has_interior_coupling = true;
                }
            }
            if is_int_of(sd_i, i) && !has_interior_coupling {
                let msg = format!("row {i} [sd {sd_i}, {}] is empty in sd {sd_i}", self.gid_to_string(i));
                self.note(msg);
                status = false;
            }
        }
        status
    }

    /// Non-V-sum velocity nodes of the transformed Schur complement `tst` (numbered like
    /// `map.separators()`) must not couple to pressures outside their own group; those
    /// couplings get dropped.
    pub fn no_p_couplings_dropped(&mut self, tst: &CsrMatrix, map: &HierarchicalMap) -> bool {
        let Some(pvar) = self.ctx.pvar.filter(|_| self.ctx.do_fmat_tests) else {
            return true;
        };
        let var_at = |pos: usize| map.coords()[map.separators()[pos]].var;
        let mut status = true;
        for g in 0..map.groups().len() {
            for pos in map.group_range(g).skip(1) {
                if var_at(pos) == pvar {
                    continue;
                }
                let (cols, vals) = tst.row(pos);
                for (&j, &v) in cols.iter().zip(vals) {
                    if map.group_of_position(j) != g && var_at(j) == pvar && v.abs() > self.ctx.tol {
                        let (gi, gj) = (map.separators()[pos], map.separators()[j]);
                        let msg = format!(
                            "coupling between non-Vsum-node {gi} and P-node {gj} of size {:e} will be dropped",
                            v.abs()
                        );
                        self.note(msg);
                        status = false;
                    }
                }
            }
        }
        status
    }

    pub fn no_numerical_zeros(&mut self, a: &CsrMatrix) -> bool {
        let mut status = true;
        for i in 0..a.nrows() {
            let (cols, vals) = a.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                if v.abs() <= f64::EPSILON {
                    self.note(format!("small entry A({i},{j}) = {v:e}"));
                    status = false;
                }
            }
        }
        status
    }

    /// Pressure rows of `A V` vanish, i.e. the columns of `V` are divergence free.
    pub fn is_div_free(&mut self, a: &CsrMatrix, v: MatRef<'_, f64>, tol: f64) -> Result<bool, HymlsError> {
        if self.ctx.pvar.is_none() {
            return Ok(true);
        }
        check_dim("divergence check (rows of V)", a.ncols(), v.nrows())?;
        let av = a.mul_dense(v);
        let pressure_rows: Vec<usize> = (0..av.nrows()).filter(|&i| self.is_pressure(i)).collect();
        let mut status = true;
        for j in 0..av.ncols() {
            for &i in &pressure_rows {
                if av[(i, j)].abs() > tol {
                    self.note(format!("rowsum not zero but {:e} on row {i}", av[(i, j)]));
                    status = false;
                }
            }
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::gallery::{bgrid_stokes_2d, laplace_2d};

    #[test]
    fn laplace_is_symmetric_and_not_identity() {
        let mut t = Tester::new(TestContext::from_params(&HymlsParams::for_grid_2d(4, 4, 1)));
        let a = laplace_2d(4, 4);
        assert!(t.is_symmetric(&a));
        assert!(!t.is_identity(&a));
        assert!(t.is_identity(&CsrMatrix::identity(5)));
        assert!(t.no_numerical_zeros(&a));
    }

    #[test]
    fn bgrid_gradient_is_not_an_f_matrix() {
        let params = HymlsParams::for_grid_2d(4, 4, 3).with_pressure_variable(2);
        let mut t = Tester::new(TestContext::from_params(&params));
        assert!(!t.is_f_matrix(&bgrid_stokes_2d(4, 4, 0.0, 0.0)));
        assert!(!t.ctx.messages().is_empty());
        assert!(!t.run("isFmatrix", false));
        assert_eq!(t.ctx.num_failed(), 1);
        assert_eq!(t.gid_to_string(5), "(1,0,0):P");
    }

    #[test]
    fn laplace_partition_passes_dd_check() {
        let params = HymlsParams::for_grid_2d(12, 12, 1).with_separator_length(4);
        let a = laplace_2d(12, 12);
        let map = HierarchicalMap::new(&a, &params).unwrap();
        let mut t = Tester::new(TestContext::from_params(&params));
        let ok = t.is_dd_correct(&a, &map);
        assert!(ok, "{:?}", t.ctx.messages());
    }

    #[test]
    fn dropped_pressure_couplings_are_reported() {
        let params = HymlsParams::for_grid_2d(8, 8, 3).with_pressure_variable(2).with_separator_length(4);
        let a = bgrid_stokes_2d(8, 8, 0.0, 0.0);
        let map = HierarchicalMap::new(&a, &params).unwrap();
        let seps = map.separators();
        let mut t = Tester::new(TestContext::from_params(&params));
        assert!(!t.no_p_couplings_dropped(&a.extract(seps, seps), &map));
        assert!(t.ctx.messages()[0].contains("will be dropped"));
        t.ctx.clear();
        assert!(t.no_p_couplings_dropped(&CsrMatrix::identity(seps.len()), &map));
    }

    #[test]
    fn boundary_velocities_are_divergence_free() {
        let params = HymlsParams::for_grid_2d(4, 4, 3).with_pressure_variable(2);
        let a = bgrid_stokes_2d(4, 4, 0.0, 0.0);
        let mut t = Tester::new(TestContext::from_params(&params));
        // u at (0,0) has no gradient couplings, u at (1,1) touches four cells
        let corner = faer::Mat::from_fn(48, 1, |i, _| if i == 0 { 1.0 } else { 0.0 });
        assert!(t.is_div_free(&a, corner.as_ref(), 1e-12).unwrap());
        let inner = faer::Mat::from_fn(48, 1, |i, _| if i == 15 { 1.0 } else { 0.0 });
        assert!(!t.is_div_free(&a, inner.as_ref(), 1e-12).unwrap());
        assert!(t.is_div_free(&a, faer::Mat::zeros(47, 1).as_ref(), 1e-12).is_err());
    }
}
