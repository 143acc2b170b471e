//! One quadrant of the matrix after the interior/separator split.
//!
//! `A11` (interior × interior) is block diagonal by subdomain; it keeps one
//! sub-block and one direct solver per subdomain so that its inverse can be
//! applied subdomain by subdomain. The other quadrants are only multiplied.

use std::sync::Arc;

use faer::reborrow::ReborrowMut;
use faer::{Mat, MatMut, MatRef};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::config::{DirectSolverOptions, SubdomainSolverKind};
use crate::core::traits::Operator;
use crate::error::{HymlsError, check_dim};
use crate::matrix::CsrMatrix;
use crate::partition::{HierarchicalMap, Role};
use crate::solver::{DirectSolver, new_direct_solver};
use crate::utils::counters::PhaseCounter;

/// Lifecycle of a block. The solver states only apply to `A11`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockState {
    Uninitialized,
    Computed,
    SubdomainSolversInitialized,
    SubdomainSolversComputed,
}

type SubdomainSolver = Option<Box<dyn DirectSolver>>;

pub struct MatrixBlock {
    map: Arc<HierarchicalMap>,
    row_role: Role,
    col_role: Role,
    block: CsrMatrix,
    sub_blocks: Vec<CsrMatrix>,
    solvers: Vec<SubdomainSolver>,
    state: BlockState,
    use_transpose: bool,
    #[cfg(feature = "rayon")]
    pool: Option<rayon::ThreadPool>,
    initialize_flops: PhaseCounter,
    compute_flops: PhaseCounter,
    apply_flops: PhaseCounter,
    apply_inverse_flops: PhaseCounter,
}

fn in_subdomain(e: HymlsError, s: usize, level: usize) -> HymlsError {
    match e {
        HymlsError::Factorization { detail, .. } => HymlsError::Factorization {
            context: format!("interior of subdomain {s} on level {level}"),
            detail,
        },
        other => other,
    }
}

impl MatrixBlock {
    pub fn new(map: Arc<HierarchicalMap>, row_role: Role, col_role: Role) -> Self {
        Self {
            map,
            row_role,
            col_role,
            block: CsrMatrix::zeros(0, 0),
            sub_blocks: Vec::new(),
            solvers: Vec::new(),
            state: BlockState::Uninitialized,
            use_transpose: false,
            #[cfg(feature = "rayon")]
            pool: None,
            initialize_flops: PhaseCounter::default(),
            compute_flops: PhaseCounter::default(),
            apply_flops: PhaseCounter::default(),
            apply_inverse_flops: PhaseCounter::default(),
        }
    }

    fn indices(&self, role: Role) -> &[usize] {
        match role {
            Role::Interior => self.map.interior(),
            Role::Separator => self.map.separators(),
        }
    }

    fn is_a11(&self) -> bool {
        self.row_role == Role::Interior && self.col_role == Role::Interior
    }

    pub fn label(&self) -> String {
        let name = match (self.row_role, self.col_role) {
            (Role::Interior, Role::Interior) => "A11",
            (Role::Interior, Role::Separator) => "A12",
            (Role::Separator, Role::Interior) => "A21",
            (Role::Separator, Role::Separator) => "A22",
        };
        format!("{name} (level {})", self.map.level())
    }

    /// Extract the block from `a` in local numbering, and for `A11` also the
    /// per-subdomain diagonal blocks.
    pub fn compute(&mut self, a: &CsrMatrix) -> Result<(), HymlsError> {
        check_dim("matrix block (rows vs partition)", self.map.num_nodes(), a.nrows())?;
        let block = a.extract(self.indices(self.row_role), self.indices(self.col_role));
        if self.is_a11() {
            let subs: Vec<CsrMatrix> = (0..self.map.num_subdomains())
                .map(|s| {
                    let r: Vec<usize> = self.map.interior_range(s).collect();
                    block.extract(&r, &r)
                })
                .collect();
            let nnz: usize = subs.iter().map(CsrMatrix::nnz).sum();
            if nnz != block.nnz() {
                return Err(HymlsError::DimensionMismatch {
                    context: "A11 entries outside the subdomain blocks",
                    expected: block.nnz(),
                    found: nnz,
                });
            }
            self.sub_blocks = subs;
        }
        log::debug!("{}: {}x{} with {} entries", self.label(), block.nrows(), block.ncols(), block.nnz());
        self.block = block;
        // new values for existing solvers: they refactor, re-analyzing if the pattern changed
        self.state = if self.solvers.is_empty() { BlockState::Computed } else { BlockState::SubdomainSolversInitialized };
        Ok(())
    }

    /// Create and analyze one solver per non-empty subdomain interior.
    pub fn initialize_subdomain_solvers(
        &mut self,
        kind: SubdomainSolverKind,
        opts: &DirectSolverOptions,
        num_threads: usize,
    ) -> Result<(), HymlsError> {
        if !self.is_a11() {
            return Err(HymlsError::Unsupported("subdomain solvers exist only for the interior block"));
        }
        if self.state < BlockState::Computed {
            return Err(HymlsError::State { component: "MatrixBlock::initialize_subdomain_solvers", expected: "compute" });
        }
        let _t = self.initialize_flops.start();
        #[cfg(feature = "rayon")]
        {
            self.pool = if num_threads > 1 {
                Some(rayon::ThreadPoolBuilder::new().num_threads(num_threads).build()?)
            } else {
                None
            };
        }
        #[cfg(not(feature = "rayon"))]
        let _ = num_threads;
        let level = self.map.level();
        let mut solvers = Vec::with_capacity(self.sub_blocks.len());
        for (s, sub) in self.sub_blocks.iter().enumerate() {
            if sub.nrows() == 0 {
                solvers.push(None);
                continue;
            }
            let mut solver = new_direct_solver(kind, opts);
            solver.analyze(sub).map_err(|e| in_subdomain(e, s, level))?;
            solvers.push(Some(solver));
        }
        self.solvers = solvers;
        self.state = BlockState::SubdomainSolversInitialized;
        Ok(())
    }

    /// Factor every subdomain interior, in parallel when a thread pool was requested.
    pub fn compute_subdomain_solvers(&mut self) -> Result<(), HymlsError> {
        if self.state < BlockState::SubdomainSolversInitialized {
            return Err(HymlsError::State {
                component: "MatrixBlock::compute_subdomain_solvers",
                expected: "initialize_subdomain_solvers",
            });
        }
        let _t = self.compute_flops.start();
        let level = self.map.level();
        let factor = |(s, (solver, sub)): (usize, (&mut SubdomainSolver, &CsrMatrix))| -> Result<f64, HymlsError> {
            match solver {
                Some(solver) => {
                    solver.factorize(sub).map_err(|e| in_subdomain(e, s, level))?;
                    Ok(solver.factor_flops())
                }
                None => Ok(0.0),
            }
        };
        let (solvers, subs) = (&mut self.solvers, &self.sub_blocks);
        #[cfg(feature = "rayon")]
        let flops: Vec<f64> = match &self.pool {
            Some(pool) => pool.install(|| {
                solvers.par_iter_mut().zip(subs.par_iter()).enumerate().map(factor).collect::<Result<_, _>>()
            })?,
            None => solvers.iter_mut().zip(subs.iter()).enumerate().map(factor).collect::<Result<_, _>>()?,
        };
        #[cfg(not(feature = "rayon"))]
        let flops: Vec<f64> = solvers.iter_mut().zip(subs.iter()).enumerate().map(factor).collect::<Result<_, _>>()?;
        self.compute_flops.add_flops(flops.iter().sum());
        self.state = BlockState::SubdomainSolversComputed;
        Ok(())
    }

    /// `Y = B X`, or `B' X` after `set_use_transpose(true)`.
    pub fn apply(&self, x: MatRef<'_, f64>, mut y: MatMut<'_, f64>) -> Result<(), HymlsError> {
        if self.state < BlockState::Computed {
            return Err(HymlsError::State { component: "MatrixBlock::apply", expected: "compute" });
        }
        let _t = self.apply_flops.start();
        let (rows, cols) = if self.use_transpose {
            (self.block.ncols(), self.block.nrows())
        } else {
            (self.block.nrows(), self.block.ncols())
        };
        check_dim("matrix block apply (x rows)", cols, x.nrows())?;
        check_dim("matrix block apply (y rows)", rows, y.nrows())?;
        let out = if self.use_transpose { self.block.transpose_mul_dense(x) } else { self.block.mul_dense(x) };
        y.copy_from(out);
        self.apply_flops.add_flops(2.0 * self.block.nnz() as f64 * x.ncols() as f64);
        Ok(())
    }

    /// `X = A11⁻¹ B`, one independent solve per subdomain.
    pub fn apply_inverse(&self, b: MatRef<'_, f64>, x: MatMut<'_, f64>) -> Result<(), HymlsError> {
        self.solve(b, x, self.use_transpose)
    }

    /// `X = A11⁻ᵀ B`, regardless of the transpose flag.
    pub fn apply_inverse_transpose(&self, b: MatRef<'_, f64>, x: MatMut<'_, f64>) -> Result<(), HymlsError> {
        self.solve(b, x, true)
    }

    fn solve(&self, b: MatRef<'_, f64>, mut x: MatMut<'_, f64>, transpose: bool) -> Result<(), HymlsError> {
        if !self.is_a11() {
            return Err(HymlsError::Unsupported("apply_inverse is only defined for the interior block"));
        }
        if self.state < BlockState::SubdomainSolversComputed {
            return Err(HymlsError::State { component: "MatrixBlock::apply_inverse", expected: "compute_subdomain_solvers" });
        }
        check_dim("A11 inverse (b rows)", self.block.nrows(), b.nrows())?;
        check_dim("A11 inverse (x rows)", self.block.nrows(), x.nrows())?;
        let _t = self.apply_inverse_flops.start();
        let solve = |s: usize| -> Result<Mat<f64>, HymlsError> {
            let range = self.map.interior_range(s);
            let mut rhs = b.subrows(range.start, range.len()).to_owned();
            if let Some(solver) = &self.solvers[s] {
                if transpose {
                    solver.solve_transpose_in_place(rhs.as_mut())?;
                } else {
                    solver.solve_in_place(rhs.as_mut())?;
                }
            }
            Ok(rhs)
        };
        let nsd = self.solvers.len();
        #[cfg(feature = "rayon")]
        let parts: Vec<Mat<f64>> = match &self.pool {
            Some(pool) => pool.install(|| (0..nsd).into_par_iter().map(solve).collect::<Result<_, _>>())?,
            None => (0..nsd).map(solve).collect::<Result<_, _>>()?,
        };
        #[cfg(not(feature = "rayon"))]
        let parts: Vec<Mat<f64>> = (0..nsd).map(solve).collect::<Result<_, _>>()?;
        for (s, part) in parts.iter().enumerate() {
            let start = self.map.interior_range(s).start;
            x.rb_mut().subrows_mut(start, part.nrows()).copy_from(part.as_ref());
        }
        let flops: f64 = self.solvers.iter().flatten().map(|sv| sv.solve_flops(b.ncols())).sum();
        self.apply_inverse_flops.add_flops(flops);
        Ok(())
    }

    pub fn set_use_transpose(&mut self, on: bool) {
        self.use_transpose = on;
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    /// The block in local numbering.
    pub fn block(&self) -> &CsrMatrix {
        &self.block
    }

    /// Interior block of subdomain `s` (A11 only).
    pub fn sub_block(&self, s: usize) -> Option<&CsrMatrix> {
        self.sub_blocks.get(s)
    }

    pub fn solver(&self, s: usize) -> Option<&dyn DirectSolver> {
        self.solvers.get(s).and_then(|sv| sv.as_deref())
    }

    pub fn map(&self) -> &Arc<HierarchicalMap> {
        &self.map
    }

    pub fn initialize_flops(&self) -> f64 {
        self.initialize_flops.flops()
    }

    pub fn compute_flops(&self) -> f64 {
        self.compute_flops.flops()
    }

    pub fn apply_flops(&self) -> f64 {
        self.apply_flops.flops()
    }

    pub fn apply_inverse_flops(&self) -> f64 {
        self.apply_inverse_flops.flops()
    }
}

impl Operator for MatrixBlock {
    fn nrows(&self) -> usize {
        if self.use_transpose { self.block.ncols() } else { self.block.nrows() }
    }
    fn ncols(&self) -> usize {
        if self.use_transpose { self.block.nrows() } else { self.block.ncols() }
    }
    fn apply(&self, x: MatRef<'_, f64>, y: MatMut<'_, f64>) -> Result<(), HymlsError> {
        MatrixBlock::apply(self, x, y)
    }
    fn label(&self) -> String {
        MatrixBlock::label(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HymlsParams;
    use crate::matrix::gallery::convection_diffusion_2d;

    fn a11(nthreads: usize, kind: SubdomainSolverKind) -> (CsrMatrix, MatrixBlock) {
        let params = HymlsParams::for_grid_2d(12, 12, 1).with_separator_length(4);
        let a = convection_diffusion_2d(12, 12, 1.5);
        let map = Arc::new(HierarchicalMap::new(&a, &params).unwrap());
        let mut blk = MatrixBlock::new(map, Role::Interior, Role::Interior);
        blk.compute(&a).unwrap();
        blk.initialize_subdomain_solvers(kind, &DirectSolverOptions::default(), nthreads).unwrap();
        blk.compute_subdomain_solvers().unwrap();
        (a, blk)
    }

    #[test]
    fn interior_inverse_is_exact_per_subdomain() {
        for (threads, kind) in [(1, SubdomainSolverKind::DenseLu), (2, SubdomainSolverKind::SparseLu)] {
            let (_, blk) = a11(threads, kind);
            let n = blk.block().nrows();
            let b = Mat::from_fn(n, 2, |i, j| ((i * 7 + j) as f64).sin());
            let mut x = Mat::zeros(n, 2);
            blk.apply_inverse(b.as_ref(), x.as_mut()).unwrap();
            let mut ax = Mat::zeros(n, 2);
            blk.apply(x.as_ref(), ax.as_mut()).unwrap();
            assert!((ax - b.as_ref()).norm_max() < 1e-12);
            assert!(blk.apply_inverse_flops() > 0.0);
        }
    }

    #[test]
    fn transpose_flag_switches_to_the_transposed_block() {
        let (_, mut blk) = a11(1, SubdomainSolverKind::DenseLu);
        blk.set_use_transpose(true);
        let n = blk.block().nrows();
        let b = Mat::from_fn(n, 1, |i, _| 1.0 + i as f64);
        let mut x = Mat::zeros(n, 1);
        blk.apply_inverse(b.as_ref(), x.as_mut()).unwrap();
        let r = blk.block().transpose_mul_dense(x.as_ref()) - b.as_ref();
        assert!(r.norm_max() < 1e-12);
    }

    #[test]
    fn off_diagonal_blocks_have_no_inverse() {
        let (a, blk) = a11(1, SubdomainSolverKind::DenseLu);
        let mut a12 = MatrixBlock::new(blk.map().clone(), Role::Interior, Role::Separator);
        let x = Mat::<f64>::zeros(1, 1);
        let mut y = Mat::<f64>::zeros(1, 1);
        assert!(matches!(a12.apply(x.as_ref(), y.as_mut()), Err(HymlsError::State { .. })));
        a12.compute(&a).unwrap();
        assert_eq!(a12.block().ncols(), blk.map().separators().len());
        assert!(a12.apply_inverse(x.as_ref(), y.as_mut()).is_err());
    }
}
