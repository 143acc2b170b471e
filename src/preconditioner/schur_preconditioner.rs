//! Approximate solve with the Schur complement of one level.
//!
//! On the last level the complement (bordered if needed) is factored
//! directly. Otherwise every separator group is rotated by a Householder
//! reflector of the level's test vector, so that the group's first node,
//! the V-sum, carries the test vector and the other members are orthogonal
//! to it. Couplings between a non-V-sum node and anything outside its own
//! group are dropped, the non-V-sum nodes are eliminated group by group with
//! a dense LU, and the remaining system on the V-sums is the matrix of the
//! next level.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use faer::{Mat, MatMut, MatRef};

use crate::config::HymlsParams;
use crate::core::traits::BorderedOperator;
use crate::core::wrappers::{axpy, gather_rows};
use crate::error::{HymlsError, check_dim};
use crate::matrix::CsrMatrix;
use crate::operator::AugmentedMatrix;
use crate::partition::{HierarchicalMap, TestContext, Tester};
use crate::preconditioner::{Border, InversePreconditioner, Preconditioner};
use crate::solver::{DenseLu, DirectSolver, SparseLu};
use crate::transform::{Householder, OrthogonalTransform, assemble_transform};
use crate::utils::counters::Counters;

/// Sparse LU of `S` or of `[S V; W' C]`.
struct DirectSchur {
    lu: Option<SparseLu>,
    n: usize,
    k: usize,
}

impl DirectSchur {
    fn new(s: &CsrMatrix, border: Option<&Border>, params: &HymlsParams) -> Result<Self, HymlsError> {
        let (n, k) = (s.nrows(), border.map_or(0, Border::width));
        if n + k == 0 {
            return Ok(Self { lu: None, n, k });
        }
        let matrix = match border {
            Some(b) => AugmentedMatrix::new(Arc::new(s.clone()), b.v.clone(), b.w.clone(), Some(b.c.clone()))?.to_csr()?,
            None => s.clone(),
        };
        let mut lu = SparseLu::new(params.direct_solver.clone());
        lu.factorize(&matrix)?;
        Ok(Self { lu: Some(lu), n, k })
    }

    fn solve(&self, b: MatRef<'_, f64>, t: Option<MatRef<'_, f64>>) -> Result<(Mat<f64>, Mat<f64>), HymlsError> {
        let m = b.ncols();
        let mut rhs = Mat::zeros(self.n + self.k, m);
        rhs.as_mut().subrows_mut(0, self.n).copy_from(b);
        if let Some(t) = t {
            rhs.as_mut().subrows_mut(self.n, self.k).copy_from(t);
        }
        if let Some(lu) = &self.lu {
            lu.solve_in_place(rhs.as_mut())?;
        }
        Ok((rhs.subrows(0, self.n).to_owned(), rhs.subrows(self.n, self.k).to_owned()))
    }
}

/// Elimination of the non-V-sum members of one group.
struct GroupSolve {
    /// Index of the group, and of its V-sum in the next level.
    group: usize,
    rest: Range<usize>,
    lu: DenseLu,
    /// Row of the V-sum in the rest columns.
    s_vr: Vec<f64>,
    /// `D⁻¹` applied to the column of the V-sum in the rest rows.
    d_rv: Vec<f64>,
}

impl GroupSolve {
    fn vsum_dot(&self, y: MatRef<'_, f64>, j: usize) -> f64 {
        self.s_vr.iter().enumerate().map(|(i, s)| s * y[(i, j)]).sum()
    }
}

enum Coarse {
    Direct(DirectSchur),
    Nested(Box<Preconditioner>),
}

impl Coarse {
    fn solve(&self, b: MatRef<'_, f64>, t: Option<MatRef<'_, f64>>) -> Result<(Mat<f64>, Mat<f64>), HymlsError> {
        match self {
            Coarse::Direct(d) => d.solve(b, t),
            Coarse::Nested(pc) => {
                let mut x = Mat::zeros(b.nrows(), b.ncols());
                match t {
                    Some(t) => {
                        let mut s = Mat::zeros(t.nrows(), t.ncols());
                        pc.apply_inverse_bordered(b, t, x.as_mut(), s.as_mut())?;
                        Ok((x, s))
                    }
                    None => {
                        pc.apply_inverse(b, x.as_mut())?;
                        Ok((x, Mat::zeros(0, b.ncols())))
                    }
                }
            }
        }
    }
}

struct Reduction {
    t: CsrMatrix,
    vsums: Vec<usize>,
    groups: Vec<GroupSolve>,
    /// `T'W`, and `D⁻¹ (T'V)` on the rest rows (zero on the V-sums).
    border: Option<(Mat<f64>, Mat<f64>)>,
    coarse: Coarse,
}

impl Reduction {
    fn solve(&self, b: MatRef<'_, f64>, t: Option<MatRef<'_, f64>>) -> Result<(Mat<f64>, Mat<f64>), HymlsError> {
        let m = b.ncols();
        let bt = self.t.transpose_mul_dense(b);
        let mut y = bt.clone();
        let mut b_v = gather_rows(bt.as_ref(), &self.vsums);
        let mut t_red = t.map(|t| t.to_owned());
        for g in &self.groups {
            let mut yr = bt.subrows(g.rest.start, g.rest.len()).to_owned();
            g.lu.solve_in_place(yr.as_mut())?;
            for j in 0..m {
                b_v[(g.group, j)] -= g.vsum_dot(yr.as_ref(), j);
            }
            if let (Some(tr), Some((wt, _))) = (t_red.as_mut(), &self.border) {
                let w_r = wt.subrows(g.rest.start, g.rest.len());
                axpy(-1.0, (w_r.transpose() * yr.as_ref()).as_ref(), tr.as_mut());
            }
            y.as_mut().subrows_mut(g.rest.start, g.rest.len()).copy_from(yr.as_ref());
        }
        let (x_v, s) = self.coarse.solve(b_v.as_ref(), t_red.as_ref().map(|t| t.as_ref()))?;
        for (g, &v) in self.vsums.iter().enumerate() {
            for j in 0..m {
                y[(v, j)] = x_v[(g, j)];
            }
        }
        for g in &self.groups {
            for j in 0..m {
                let xv = x_v[(g.group, j)];
                for (i, d) in g.rest.clone().zip(&g.d_rv) {
                    y[(i, j)] -= d * xv;
                }
            }
            if let Some((_, q)) = &self.border {
                let q_r = q.subrows(g.rest.start, g.rest.len());
                let corr = q_r * s.as_ref();
                axpy(-1.0, corr.as_ref(), y.as_mut().subrows_mut(g.rest.start, g.rest.len()));
            }
        }
        Ok((self.t.mul_dense(y.as_ref()), s))
    }
}

enum SchurSolve {
    Empty,
    Direct(DirectSchur),
    Reduced(Box<Reduction>),
}

/// Solver for the separator system of one level.
pub struct SchurPreconditioner {
    map: Arc<HierarchicalMap>,
    params: HymlsParams,
    test_vector: Vec<f64>,
    border: Option<Border>,
    solve: SchurSolve,
    computed: bool,
    counters: Counters,
}

impl SchurPreconditioner {
    /// `test_vector` is given on the separators, in the order of `map.separators()`.
    pub fn new(map: Arc<HierarchicalMap>, params: HymlsParams, test_vector: Vec<f64>) -> Result<Self, HymlsError> {
        check_dim("Schur preconditioner (test vector)", map.separators().len(), test_vector.len())?;
        Ok(Self { map, params, test_vector, border: None, solve: SchurSolve::Empty, computed: false, counters: Counters::default() })
    }

    /// Border of the separator system, already eliminated from the interiors.
    pub fn set_border(&mut self, border: Option<Border>) -> Result<(), HymlsError> {
        if let Some(b) = &border {
            check_dim("Schur border (rows)", self.map.separators().len(), b.nrows())?;
        }
        self.border = border;
        self.computed = false;
        Ok(())
    }

    pub fn has_border(&self) -> bool {
        self.border.is_some()
    }

    fn is_last_level(&self) -> bool {
        self.map.level() + 1 >= self.params.preconditioner.number_of_levels
    }

    /// Factor or reduce the explicit Schur complement `s`.
    pub fn compute(&mut self, s: &CsrMatrix) -> Result<(), HymlsError> {
        check_dim("Schur preconditioner (rows)", self.map.separators().len(), s.nrows())?;
        let _t = self.counters.compute.start();
        self.solve = if s.nrows() == 0 && self.border.is_none() {
            SchurSolve::Empty
        } else if s.nrows() == 0 || self.is_last_level() {
            log::debug!("level {}: direct solve of the {}x{} Schur complement", self.map.level(), s.nrows(), s.ncols());
            SchurSolve::Direct(DirectSchur::new(s, self.border.as_ref(), &self.params)?)
        } else {
            SchurSolve::Reduced(Box::new(self.reduce(s)?))
        };
        self.computed = true;
        Ok(())
    }

    fn reduce(&self, s: &CsrMatrix) -> Result<Reduction, HymlsError> {
        let map = &self.map;
        let n = s.nrows();
        let ng = map.groups().len();
        let mut entries = Vec::new();
        for g in 0..ng {
            let r = map.group_range(g);
            let idx: Vec<usize> = r.clone().collect();
            entries.extend(Householder.construct(&idx, &self.test_vector[r])?);
        }
        let t = assemble_transform(n, entries);
        let tst = Householder.apply_sparse(&t, s)?;
        let mut tester = Tester::new(TestContext::from_params(&self.params));
        if !tester.no_p_couplings_dropped(&tst, map) {
            log::warn!(
                "level {}: dropping pressure couplings of non-V-sum nodes: {}",
                map.level(),
                tester.ctx.messages().join("; ")
            );
        }
        let vsums: Vec<usize> = (0..ng).map(|g| map.group_range(g).start).collect();
        let is_vsum = |p: usize| map.group_range(map.group_of_position(p)).start == p;
        let kept = tst.filter(|i, j, _| map.group_of_position(i) == map.group_of_position(j) || (is_vsum(i) && is_vsum(j)));
        let level = map.level();

        let mut groups = Vec::new();
        let mut corrections = Vec::new();
        for g in 0..ng {
            let range = map.group_range(g);
            let rest = range.start + 1..range.end;
            if rest.is_empty() {
                continue;
            }
            let idx: Vec<usize> = rest.clone().collect();
            let mut lu = DenseLu::new();
            lu.factorize_dense(kept.extract_dense(&idx, &idx).as_ref()).map_err(|e| match e {
                HymlsError::Factorization { detail, .. } => HymlsError::Factorization {
                    context: format!("separator group {g} on level {level}"),
                    detail,
                },
                other => other,
            })?;
            let v = [range.start];
            let s_vr = kept.extract_dense(&v, &idx);
            let mut d_rv = kept.extract_dense(&idx, &v);
            lu.solve_in_place(d_rv.as_mut())?;
            let s_vr: Vec<f64> = (0..idx.len()).map(|i| s_vr[(0, i)]).collect();
            let d_rv: Vec<f64> = (0..idx.len()).map(|i| d_rv[(i, 0)]).collect();
            let corr: f64 = s_vr.iter().zip(&d_rv).map(|(a, b)| a * b).sum();
            corrections.push((g, g, -corr));
            groups.push(GroupSolve { group: g, rest, lu, s_vr, d_rv });
        }
        let m = kept.extract(&vsums, &vsums).add(1.0, &CsrMatrix::from_triplets(ng, ng, corrections), 1.0)?;

        let tt = t.transpose_mul_dense(MatRef::from_column_major_slice(&self.test_vector, n, 1));
        let next_test: Vec<f64> = vsums.iter().map(|&v| tt[(v, 0)]).collect();

        let (border, reduced_border) = match &self.border {
            Some(b) => {
                let vt = t.transpose_mul_dense(b.v.as_ref());
                let wt = t.transpose_mul_dense(b.w.as_ref());
                let k = b.width();
                let mut q = Mat::zeros(n, k);
                let mut v_m = gather_rows(vt.as_ref(), &vsums);
                let mut w_m = gather_rows(wt.as_ref(), &vsums);
                let mut c_m = b.c.clone();
                for grp in &groups {
                    let (start, len) = (grp.rest.start, grp.rest.len());
                    let mut q_r = vt.subrows(start, len).to_owned();
                    grp.lu.solve_in_place(q_r.as_mut())?;
                    let w_r = wt.subrows(start, len);
                    for j in 0..k {
                        v_m[(grp.group, j)] -= grp.vsum_dot(q_r.as_ref(), j);
                        let dw: f64 = grp.d_rv.iter().enumerate().map(|(i, d)| d * w_r[(i, j)]).sum();
                        w_m[(grp.group, j)] -= dw;
                    }
                    axpy(-1.0, (w_r.transpose() * q_r.as_ref()).as_ref(), c_m.as_mut());
                    q.as_mut().subrows_mut(start, len).copy_from(q_r.as_ref());
                }
                (Some((wt, q)), Some(Border { v: v_m, w: w_m, c: c_m }))
            }
            None => (None, None),
        };

        let coarse = if level + 2 >= self.params.preconditioner.number_of_levels {
            log::debug!("level {level}: direct solve of the {ng}x{ng} V-sum system");
            Coarse::Direct(DirectSchur::new(&m, reduced_border.as_ref(), &self.params)?)
        } else {
            let params_next = self.params.next_level();
            let next_map = Arc::new(map.spawn_next_level(&m, &params_next)?);
            let mut pc = Preconditioner::for_level(Arc::new(m), params_next, next_map, Some(next_test))?;
            if let Some(b) = reduced_border {
                pc.set_border(Some(b.v), Some(b.w), Some(b.c))?;
            }
            pc.compute()?;
            Coarse::Nested(Box::new(pc))
        };
        log::info!("level {level}: {n} separator nodes reduced to {ng} V-sums");
        Ok(Reduction { t, vsums, groups, border, coarse })
    }

    pub(crate) fn solve(&self, b: MatRef<'_, f64>, t: Option<MatRef<'_, f64>>) -> Result<(Mat<f64>, Mat<f64>), HymlsError> {
        if !self.computed {
            return Err(HymlsError::State { component: "SchurPreconditioner::apply_inverse", expected: "compute" });
        }
        check_dim("Schur preconditioner apply (rows)", self.map.separators().len(), b.nrows())?;
        let _t = self.counters.apply_inverse.start();
        let zeros;
        let t = match (&self.border, t) {
            (Some(_), Some(t)) => Some(t),
            (Some(bd), None) => {
                zeros = Mat::zeros(bd.width(), b.ncols());
                Some(zeros.as_ref())
            }
            (None, _) => None,
        };
        match &self.solve {
            SchurSolve::Empty => Ok((Mat::zeros(0, b.ncols()), Mat::zeros(0, b.ncols()))),
            SchurSolve::Direct(d) => d.solve(b, t),
            SchurSolve::Reduced(r) => r.solve(b, t),
        }
    }

    /// `X ≈ S⁻¹ B`; with a border the multiplier is solved for and dropped.
    pub fn apply_inverse(&self, b: MatRef<'_, f64>, mut x: MatMut<'_, f64>) -> Result<(), HymlsError> {
        let (y, _) = self.solve(b, None)?;
        x.copy_from(y.as_ref());
        Ok(())
    }

    /// `[X; S] ≈ [S V; W' C]⁻¹ [B; T]`
    pub fn apply_inverse_bordered(
        &self,
        b: MatRef<'_, f64>,
        t: MatRef<'_, f64>,
        mut x: MatMut<'_, f64>,
        mut s: MatMut<'_, f64>,
    ) -> Result<(), HymlsError> {
        if self.border.is_none() {
            return Err(HymlsError::State { component: "SchurPreconditioner::apply_inverse_bordered", expected: "set_border" });
        }
        let (y, mult) = self.solve(b, Some(t))?;
        x.copy_from(y.as_ref());
        s.copy_from(mult.as_ref());
        Ok(())
    }

    pub fn is_computed(&self) -> bool {
        self.computed
    }

    /// Preconditioner of the next level, if this level was reduced onto one.
    pub fn next_level(&self) -> Option<&Preconditioner> {
        match &self.solve {
            SchurSolve::Reduced(r) => match &r.coarse {
                Coarse::Nested(pc) => Some(pc),
                Coarse::Direct(_) => None,
            },
            _ => None,
        }
    }

    /// Size of the system on the V-sums, or `None` when solved directly.
    pub fn num_vsums(&self) -> Option<usize> {
        match &self.solve {
            SchurSolve::Reduced(r) => Some(r.vsums.len()),
            _ => None,
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }
}

impl fmt::Display for SchurPreconditioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.solve {
            SchurSolve::Empty => "empty",
            SchurSolve::Direct(_) => "direct",
            SchurSolve::Reduced(_) => "reduced to V-sums",
        };
        writeln!(f, "Schur complement, level {} ({kind}):", self.map.level())?;
        write!(f, "{}", self.counters)?;
        if let Some(next) = self.next_level() {
            write!(f, "{next}")?;
        }
        Ok(())
    }
}
