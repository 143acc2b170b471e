//! Parameter tree for the multilevel preconditioner.
//!
//! The options are grouped the way the solver reads them: a `Problem` sublist
//! describing the grid, a `Preconditioner` sublist steering partitioning and
//! recursion, and a `Direct Solver` sublist for the factorization at the
//! coarsest level. Each field can be set from typed builder methods or from
//! string keys through [`HymlsParams::set`].

use std::str::FromStr;

use crate::config_error;
use crate::error::HymlsError;

/// How grid nodes are assigned to subdomains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionerKind {
    /// Axis-aligned boxes of `sx × sy × sz` nodes.
    Cartesian,
    /// Boxes in the 45° rotated frame `(x + y, x - y)`.
    SkewCartesian,
}

impl FromStr for PartitionerKind {
    type Err = HymlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cartesian" => Ok(Self::Cartesian),
            "skew cartesian" | "skew-cartesian" | "skewcartesian" => Ok(Self::SkewCartesian),
            other => Err(config_error!("unknown partitioner '{other}'")),
        }
    }
}

/// Factorization used for the interior block of each subdomain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubdomainSolverKind {
    /// Dense LU with partial pivoting; best for small subdomains.
    DenseLu,
    /// Sparse LU with a reusable symbolic analysis.
    SparseLu,
}

impl FromStr for SubdomainSolverKind {
    type Err = HymlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dense" | "dense lu" | "lapack" => Ok(Self::DenseLu),
            "sparse" | "sparse lu" | "klu" | "umfpack" | "pardiso" => Ok(Self::SparseLu),
            "cholmod" => Err(config_error!("subdomain solver 'Cholmod' is not available")),
            other => Err(config_error!("unknown subdomain solver '{other}'")),
        }
    }
}

/// `Problem` sublist: the structured grid behind the matrix.
#[derive(Debug, Clone)]
pub struct ProblemOptions {
    /// Spatial dimension (2 or 3).
    pub dimension: usize,
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Unknowns per grid cell.
    pub dof: usize,
    /// Index of the pressure unknown within a cell, if any.
    pub pressure_variable: Option<usize>,
}

/// `Preconditioner` sublist.
#[derive(Debug, Clone)]
pub struct PreconditionerOptions {
    pub partitioner: PartitionerKind,
    /// Subdomain edge length in x; `sy`/`sz` default to it.
    pub sx: usize,
    pub sy: Option<usize>,
    pub sz: Option<usize>,
    /// Growth of the subdomain size from one level to the next.
    pub coarsening_factor: usize,
    /// Total number of levels; level `number_of_levels` is solved directly.
    pub number_of_levels: usize,
    pub subdomain_solver: SubdomainSolverKind,
    /// Threads for subdomain factorization and solves (0: all cores).
    pub num_threads: usize,
    /// Rotate B-grid velocity pairs so the matrix becomes an F-matrix.
    pub bgrid_transform: bool,
    /// Reserved; a fixed pressure level is not supported.
    pub fix_pressure_level: bool,
}

/// `Direct Solver` sublist, used at the coarsest level.
#[derive(Debug, Clone, Default)]
pub struct DirectSolverOptions {
    /// Reorder with reverse Cuthill-McKee before factoring.
    pub custom_ordering: bool,
    /// Equilibrate rows and columns before factoring.
    pub custom_scaling: bool,
    /// 0 is silent, larger values log factorization statistics.
    pub output_level: usize,
}

/// Complete parameter tree.
#[derive(Debug, Clone)]
pub struct HymlsParams {
    pub problem: ProblemOptions,
    pub preconditioner: PreconditionerOptions,
    pub direct_solver: DirectSolverOptions,
}

/// Recognized `(sublist, key, description)` triples.
const VALID_PARAMETERS: &[(&str, &str, &str)] = &[
    ("Problem", "Dimension", "spatial dimension, 2 or 3"),
    ("Problem", "nx", "grid size in x"),
    ("Problem", "ny", "grid size in y"),
    ("Problem", "nz", "grid size in z (1 in 2D)"),
    ("Problem", "Degrees of Freedom", "unknowns per grid cell"),
    ("Problem", "Pressure Variable", "index of the pressure unknown in a cell"),
    ("Preconditioner", "Partitioner", "\"Cartesian\" or \"Skew Cartesian\""),
    ("Preconditioner", "Separator Length", "subdomain edge length (sx)"),
    ("Preconditioner", "Separator Length (y)", "subdomain edge length in y"),
    ("Preconditioner", "Separator Length (z)", "subdomain edge length in z"),
    ("Preconditioner", "Coarsening Factor", "subdomain growth per level"),
    ("Preconditioner", "Number of Levels", "levels before the direct solve"),
    ("Preconditioner", "Subdomain Solver Type", "Dense, KLU, UMFPACK, Pardiso or Sparse"),
    ("Preconditioner", "Subdomain Solver Num Threads", "threads for subdomain solves"),
    ("Preconditioner", "B-grid Transform", "transform the matrix into an F-matrix"),
    ("Preconditioner", "Fix Pressure Level", "reserved, must be false"),
    ("Direct Solver", "Custom Ordering", "reverse Cuthill-McKee before factoring"),
    ("Direct Solver", "Custom Scaling", "row/column equilibration before factoring"),
    ("Direct Solver", "OutputLevel", "verbosity of the coarse solver"),
];

impl HymlsParams {
    /// Parameters for an `nx × ny` grid with `dof` unknowns per cell.
    pub fn for_grid_2d(nx: usize, ny: usize, dof: usize) -> Self {
        Self::for_grid(2, nx, ny, 1, dof)
    }

    /// Parameters for an `nx × ny × nz` grid with `dof` unknowns per cell.
    pub fn for_grid_3d(nx: usize, ny: usize, nz: usize, dof: usize) -> Self {
        Self::for_grid(3, nx, ny, nz, dof)
    }

    fn for_grid(dimension: usize, nx: usize, ny: usize, nz: usize, dof: usize) -> Self {
        Self {
            problem: ProblemOptions { dimension, nx, ny, nz, dof, pressure_variable: None },
            preconditioner: PreconditionerOptions {
                partitioner: PartitionerKind::Cartesian,
                sx: 4,
                sy: None,
                sz: None,
                coarsening_factor: 2,
                number_of_levels: 1,
                subdomain_solver: SubdomainSolverKind::DenseLu,
                num_threads: 1,
                bgrid_transform: false,
                fix_pressure_level: false,
            },
            direct_solver: DirectSolverOptions::default(),
        }
    }

    pub fn with_separator_length(mut self, sx: usize) -> Self {
        self.preconditioner.sx = sx;
        self
    }

    pub fn with_levels(mut self, levels: usize) -> Self {
        self.preconditioner.number_of_levels = levels;
        self
    }

    pub fn with_partitioner(mut self, kind: PartitionerKind) -> Self {
        self.preconditioner.partitioner = kind;
        self
    }

    pub fn with_subdomain_solver(mut self, kind: SubdomainSolverKind) -> Self {
        self.preconditioner.subdomain_solver = kind;
        self
    }

    pub fn with_num_threads(mut self, n: usize) -> Self {
        self.preconditioner.num_threads = n;
        self
    }

    pub fn with_pressure_variable(mut self, pvar: usize) -> Self {
        self.problem.pressure_variable = Some(pvar);
        self
    }

    pub fn with_bgrid_transform(mut self, on: bool) -> Self {
        self.preconditioner.bgrid_transform = on;
        self
    }

    pub fn with_direct_solver(mut self, opts: DirectSolverOptions) -> Self {
        self.direct_solver = opts;
        self
    }

    /// Separator lengths `(sx, sy, sz)` with defaults filled in.
    pub fn separator_lengths(&self) -> (usize, usize, usize) {
        let p = &self.preconditioner;
        let sy = p.sy.unwrap_or(p.sx);
        let sz = if self.problem.dimension == 2 { 1 } else { p.sz.unwrap_or(p.sx) };
        (p.sx, sy, sz)
    }

    /// Number of matrix rows this grid describes.
    pub fn grid_size(&self) -> usize {
        let p = &self.problem;
        p.nx * p.ny * p.nz * p.dof
    }

    /// Worker threads for subdomain work, resolving 0 to the machine's core count.
    pub fn subdomain_threads(&self) -> usize {
        match self.preconditioner.num_threads {
            #[cfg(feature = "rayon")]
            0 => num_cpus::get(),
            #[cfg(not(feature = "rayon"))]
            0 => 1,
            n => n,
        }
    }

    /// Set a parameter from its string form, e.g.
    /// `set("Preconditioner", "Partitioner", "Skew Cartesian")`.
    pub fn set(&mut self, sublist: &str, key: &str, value: &str) -> Result<(), HymlsError> {
        fn num(key: &str, value: &str) -> Result<usize, HymlsError> {
            value
                .trim()
                .parse::<usize>()
                .map_err(|_| config_error!("parameter '{key}' expects an unsigned integer, got '{value}'"))
        }
        fn flag(key: &str, value: &str) -> Result<bool, HymlsError> {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(config_error!("parameter '{key}' expects a boolean, got '{value}'")),
            }
        }
        match (sublist, key) {
            ("Problem", "Dimension") => self.problem.dimension = num(key, value)?,
            ("Problem", "nx") => self.problem.nx = num(key, value)?,
            ("Problem", "ny") => self.problem.ny = num(key, value)?,
            ("Problem", "nz") => self.problem.nz = num(key, value)?,
            ("Problem", "Degrees of Freedom") => self.problem.dof = num(key, value)?,
            ("Problem", "Pressure Variable") => self.problem.pressure_variable = Some(num(key, value)?),
            ("Preconditioner", "Partitioner") => self.preconditioner.partitioner = value.parse()?,
            ("Preconditioner", "Separator Length") => self.preconditioner.sx = num(key, value)?,
            ("Preconditioner", "Separator Length (y)") => self.preconditioner.sy = Some(num(key, value)?),
            ("Preconditioner", "Separator Length (z)") => self.preconditioner.sz = Some(num(key, value)?),
            ("Preconditioner", "Coarsening Factor") => self.preconditioner.coarsening_factor = num(key, value)?,
            ("Preconditioner", "Number of Levels") => self.preconditioner.number_of_levels = num(key, value)?,
            ("Preconditioner", "Subdomain Solver Type") => self.preconditioner.subdomain_solver = value.parse()?,
            ("Preconditioner", "Subdomain Solver Num Threads") => self.preconditioner.num_threads = num(key, value)?,
            ("Preconditioner", "B-grid Transform") => self.preconditioner.bgrid_transform = flag(key, value)?,
            ("Preconditioner", "Fix Pressure Level") => self.preconditioner.fix_pressure_level = flag(key, value)?,
            ("Direct Solver", "Custom Ordering") => self.direct_solver.custom_ordering = flag(key, value)?,
            ("Direct Solver", "Custom Scaling") => self.direct_solver.custom_scaling = flag(key, value)?,
            ("Direct Solver", "OutputLevel") => self.direct_solver.output_level = num(key, value)?,
            _ => {
                let known: Vec<&str> =
                    Self::valid_parameters().iter().filter(|(l, _, _)| *l == sublist).map(|(_, k, _)| *k).collect();
                return Err(config_error!("unrecognized parameter '{sublist}->{key}', valid keys: [{}]", known.join(", ")));
            }
        }
        Ok(())
    }

    /// All recognized `(sublist, key, description)` entries.
    pub fn valid_parameters() -> &'static [(&'static str, &'static str, &'static str)] {
        VALID_PARAMETERS
    }

    /// Check the tree against a matrix with `nrows` rows.
    ///
    /// Hard inconsistencies are errors; values that are merely adjusted
    /// (e.g. a separator length larger than the grid) are logged.
    pub fn validate(&mut self, nrows: usize) -> Result<(), HymlsError> {
        let p = &mut self.problem;
        if p.dimension != 2 && p.dimension != 3 {
            return Err(config_error!("'Dimension' must be 2 or 3, got {}", p.dimension));
        }
        if p.dof == 0 {
            return Err(config_error!("'Degrees of Freedom' is not set"));
        }
        if p.nx == 0 || p.ny == 0 || p.nz == 0 {
            return Err(config_error!("grid size nx={} ny={} nz={} is not set", p.nx, p.ny, p.nz));
        }
        if p.dimension == 2 && p.nz != 1 {
            log::warn!("nz={} ignored for a 2D problem, using nz=1", p.nz);
            p.nz = 1;
        }
        if let Some(pvar) = p.pressure_variable {
            if pvar >= p.dof {
                return Err(config_error!("'Pressure Variable' {pvar} out of range for dof={}", p.dof));
            }
        }
        if self.grid_size() != nrows {
            return Err(config_error!(
                "grid {}x{}x{} with dof={} describes {} unknowns, matrix has {} rows",
                self.problem.nx,
                self.problem.ny,
                self.problem.nz,
                self.problem.dof,
                self.grid_size(),
                nrows
            ));
        }
        let (nx, ny) = (self.problem.nx, self.problem.ny);
        let pc = &mut self.preconditioner;
        if pc.sx == 0 {
            return Err(config_error!("'Separator Length' must be positive"));
        }
        if pc.sx > nx.max(ny) {
            log::warn!("separator length {} exceeds the grid, reduced to {}", pc.sx, nx.max(ny));
            pc.sx = nx.max(ny);
        }
        if pc.coarsening_factor < 2 {
            log::warn!("coarsening factor {} too small, using 2", pc.coarsening_factor);
            pc.coarsening_factor = 2;
        }
        if pc.number_of_levels == 0 {
            log::warn!("'Number of Levels' is 0, using 1");
            pc.number_of_levels = 1;
        }
        if pc.bgrid_transform && (self.problem.dof < 3 || self.problem.pressure_variable.is_none()) {
            log::warn!("B-grid transform needs two velocities and a pressure variable, disabled");
            pc.bgrid_transform = false;
        }
        if pc.fix_pressure_level {
            log::warn!("'Fix Pressure Level' is not supported, ignored");
            pc.fix_pressure_level = false;
        }
        #[cfg(not(feature = "rayon"))]
        if pc.num_threads > 1 {
            log::warn!("{} subdomain threads requested without the rayon feature, running serially", pc.num_threads);
        }
        Ok(())
    }

    /// Parameters for level `level + 1`: subdomains grow by the coarsening factor.
    pub fn next_level(&self) -> Self {
        let mut next = self.clone();
        let f = self.preconditioner.coarsening_factor;
        let (sx, sy, sz) = self.separator_lengths();
        next.preconditioner.sx = sx * f;
        next.preconditioner.sy = Some(sy * f);
        next.preconditioner.sz = Some(if self.problem.dimension == 2 { 1 } else { sz * f });
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partitioner_and_solver_names() {
        assert_eq!("Skew Cartesian".parse::<PartitionerKind>().unwrap(), PartitionerKind::SkewCartesian);
        assert_eq!("KLU".parse::<SubdomainSolverKind>().unwrap(), SubdomainSolverKind::SparseLu);
        assert!("Cholmod".parse::<SubdomainSolverKind>().is_err());
    }

    #[test]
    fn set_rejects_unknown_keys() {
        let mut p = HymlsParams::for_grid_2d(8, 8, 1);
        p.set("Preconditioner", "Number of Levels", "3").unwrap();
        assert_eq!(p.preconditioner.number_of_levels, 3);
        let err = p.set("Preconditioner", "Levels", "3").unwrap_err();
        assert!(matches!(err, HymlsError::Config { .. }));
        assert!(err.to_string().contains("Number of Levels"));
    }

    #[test]
    fn every_listed_parameter_is_accepted() {
        for (sublist, key, _) in HymlsParams::valid_parameters() {
            let mut p = HymlsParams::for_grid_2d(8, 8, 1);
            let accepted = ["2", "true", "Cartesian", "Dense"].iter().any(|v| p.set(sublist, key, v).is_ok());
            assert!(accepted, "{sublist}->{key}");
        }
    }

    #[test]
    fn validate_checks_grid_against_matrix() {
        let mut p = HymlsParams::for_grid_2d(8, 8, 1);
        assert!(p.validate(64).is_ok());
        assert!(p.validate(63).is_err());
    }

    #[test]
    fn next_level_grows_subdomains() {
        let p = HymlsParams::for_grid_2d(16, 16, 1).with_separator_length(4);
        let q = p.next_level();
        assert_eq!(q.separator_lengths(), (8, 8, 1));
    }
}
