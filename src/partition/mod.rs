//! Hierarchical partitioning of the unknowns into subdomain interiors and
//! separator groups.
//!
//! Level 0 works on the rows of the input matrix, whose grid coordinates
//! follow from the row index. Every later level works on the V-sum nodes of
//! the level before it: one node per separator group, placed at the mean
//! coordinate of the group and partitioned with larger boxes.

pub mod cartesian;
pub mod tester;

pub use cartesian::CartesianPartitioner;
pub use tester::{TestContext, Tester};

use std::collections::HashMap;
use std::ops::Range;

use crate::config::HymlsParams;
use crate::error::{HymlsError, check_dim};
use crate::matrix::CsrMatrix;

/// Role of a node in the two-by-two block split of the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Interior,
    Separator,
}

/// Grid position and variable of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeCoord {
    pub x: usize,
    pub y: usize,
    pub z: usize,
    pub var: usize,
}

impl NodeCoord {
    /// Coordinates of row `i` with `var` fastest, then x, y and z.
    pub fn from_index(i: usize, nx: usize, ny: usize, dof: usize) -> Self {
        let cell = i / dof;
        Self { x: cell % nx, y: (cell / nx) % ny, z: cell / (nx * ny), var: i % dof }
    }
}

/// Separator nodes that are transformed together.
#[derive(Debug, Clone)]
pub struct SeparatorGroup {
    members: Vec<usize>,
    subdomains: Vec<usize>,
    var: usize,
}

impl SeparatorGroup {
    /// Node indices, ascending.
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    /// The node that carries the transformed test vector.
    pub fn vsum(&self) -> usize {
        self.members[0]
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Subdomains whose interiors touch the group; empty for a retained node.
    pub fn subdomains(&self) -> &[usize] {
        &self.subdomains
    }

    pub fn var(&self) -> usize {
        self.var
    }

    /// A separator without interior neighbors forms a group of its own.
    pub fn is_retained(&self) -> bool {
        self.subdomains.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Shared(Vec<usize>, usize),
    Retained(usize),
}

/// Partition of one level.
///
/// Interior nodes are listed per subdomain in [`interior`](Self::interior),
/// separators group by group in [`separators`](Self::separators). Positions
/// in those lists are the local numbering of the `A11`/`A22` blocks.
#[derive(Debug, Clone)]
pub struct HierarchicalMap {
    level: usize,
    params: HymlsParams,
    coords: Vec<NodeCoord>,
    subdomain: Vec<usize>,
    role: Vec<Role>,
    num_subdomains: usize,
    interior: Vec<usize>,
    interior_offsets: Vec<usize>,
    separators: Vec<usize>,
    groups: Vec<SeparatorGroup>,
    group_offsets: Vec<usize>,
    group_of_position: Vec<usize>,
    position: Vec<usize>,
    sd_separators: Vec<Vec<usize>>,
    sd_groups: Vec<Vec<usize>>,
}

impl HierarchicalMap {
    /// Level-0 partition of the rows of `a`.
    pub fn new(a: &CsrMatrix, params: &HymlsParams) -> Result<Self, HymlsError> {
        check_dim("partition (matrix rows vs grid)", params.grid_size(), a.nrows())?;
        let p = &params.problem;
        let coords = (0..a.nrows()).map(|i| NodeCoord::from_index(i, p.nx, p.ny, p.dof)).collect();
        Self::from_coords(0, coords, &a.adjacency(), params)
    }

    /// Partition of arbitrary nodes with known coordinates and graph.
    pub fn from_coords(
        level: usize,
        coords: Vec<NodeCoord>,
        adj: &[Vec<usize>],
        params: &HymlsParams,
    ) -> Result<Self, HymlsError> {
        let n = coords.len();
        check_dim("partition (graph size)", n, adj.len())?;
        let partitioner = CartesianPartitioner::new(params)?;

        let raw: Vec<usize> = coords.iter().map(|c| partitioner.raw_subdomain(c)).collect();
        let mut ids = raw.clone();
        ids.sort_unstable();
        ids.dedup();
        let compact: HashMap<usize, usize> = ids.iter().enumerate().map(|(k, &r)| (r, k)).collect();
        let subdomain: Vec<usize> = raw.iter().map(|r| compact[r]).collect();
        let num_subdomains = ids.len();

        let role: Vec<Role> = (0..n)
            .map(|i| {
                if adj[i].iter().any(|&j| subdomain[j] > subdomain[i]) { Role::Separator } else { Role::Interior }
            })
            .collect();

        let mut interior_by_sd = vec![Vec::new(); num_subdomains];
        for i in (0..n).filter(|&i| role[i] == Role::Interior) {
            interior_by_sd[subdomain[i]].push(i);
        }
        let mut interior_offsets = Vec::with_capacity(num_subdomains + 1);
        interior_offsets.push(0);
        let mut interior = Vec::new();
        for nodes in interior_by_sd {
            interior.extend(nodes);
            interior_offsets.push(interior.len());
        }

        // Ascending node order keeps members sorted and groups ordered by first member.
        let mut key_to_group: HashMap<GroupKey, usize> = HashMap::new();
        let mut groups: Vec<SeparatorGroup> = Vec::new();
        for i in (0..n).filter(|&i| role[i] == Role::Separator) {
            let mut sds: Vec<usize> =
                adj[i].iter().filter(|&&j| role[j] == Role::Interior).map(|&j| subdomain[j]).collect();
            sds.sort_unstable();
            sds.dedup();
            let key = if sds.is_empty() { GroupKey::Retained(i) } else { GroupKey::Shared(sds.clone(), coords[i].var) };
            let g = *key_to_group.entry(key).or_insert_with(|| {
                groups.push(SeparatorGroup { members: Vec::new(), subdomains: sds, var: coords[i].var });
                groups.len() - 1
            });
            groups[g].members.push(i);
        }

        let mut separators = Vec::new();
        let mut group_offsets = Vec::with_capacity(groups.len() + 1);
        let mut group_of_position = Vec::new();
        group_offsets.push(0);
        for (g, group) in groups.iter().enumerate() {
            separators.extend_from_slice(&group.members);
            group_of_position.extend(std::iter::repeat_n(g, group.len()));
            group_offsets.push(separators.len());
        }

        let mut position = vec![usize::MAX; n];
        for (k, &i) in interior.iter().enumerate() {
            position[i] = k;
        }
        for (k, &i) in separators.iter().enumerate() {
            position[i] = k;
        }

        let mut sd_separators = vec![Vec::new(); num_subdomains];
        for (k, &i) in separators.iter().enumerate() {
            sd_separators[subdomain[i]].push(k);
        }
        for s in 0..num_subdomains {
            for &i in &interior[interior_offsets[s]..interior_offsets[s + 1]] {
                sd_separators[s].extend(adj[i].iter().filter(|&&j| role[j] == Role::Separator).map(|&j| position[j]));
            }
            sd_separators[s].sort_unstable();
            sd_separators[s].dedup();
        }
        let sd_groups = sd_separators
            .iter()
            .map(|seps| {
                let mut g: Vec<usize> = seps.iter().map(|&k| group_of_position[k]).collect();
                g.dedup();
                g
            })
            .collect();

        let map = Self {
            level,
            params: params.clone(),
            coords,
            subdomain,
            role,
            num_subdomains,
            interior,
            interior_offsets,
            separators,
            groups,
            group_offsets,
            group_of_position,
            position,
            sd_separators,
            sd_groups,
        };
        log::debug!(
            "level {level}: {n} nodes, {} subdomains, {} interior, {} separators in {} groups",
            map.num_subdomains,
            map.interior.len(),
            map.separators.len(),
            map.groups.len()
        );
        Ok(map)
    }

    /// Partition of the V-sum nodes of this level.
    ///
    /// `m` is the matrix on the V-sums, numbered in group order; its graph
    /// becomes the graph of the next level.
    pub fn spawn_next_level(&self, m: &CsrMatrix, params_next: &HymlsParams) -> Result<Self, HymlsError> {
        check_dim("next level (matrix rows vs groups)", self.groups.len(), m.nrows())?;
        let coords = self
            .groups
            .iter()
            .map(|g| {
                let k = g.len();
                let sum = g.members.iter().fold((0, 0, 0), |(x, y, z), &i| {
                    let c = self.coords[i];
                    (x + c.x, y + c.y, z + c.z)
                });
                NodeCoord { x: sum.0 / k, y: sum.1 / k, z: sum.2 / k, var: g.var }
            })
            .collect();
        Self::from_coords(self.level + 1, coords, &m.adjacency(), params_next)
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn params(&self) -> &HymlsParams {
        &self.params
    }

    pub fn num_nodes(&self) -> usize {
        self.coords.len()
    }

    pub fn num_subdomains(&self) -> usize {
        self.num_subdomains
    }

    pub fn coords(&self) -> &[NodeCoord] {
        &self.coords
    }

    pub fn subdomain_of(&self, node: usize) -> usize {
        self.subdomain[node]
    }

    pub fn role(&self, node: usize) -> Role {
        self.role[node]
    }

    /// Position of `node` in the interior or the separator list.
    pub fn position(&self, node: usize) -> usize {
        self.position[node]
    }

    /// All interior nodes, subdomain by subdomain.
    pub fn interior(&self) -> &[usize] {
        &self.interior
    }

    /// Positions of the interior of subdomain `s` in [`interior`](Self::interior).
    pub fn interior_range(&self, s: usize) -> Range<usize> {
        self.interior_offsets[s]..self.interior_offsets[s + 1]
    }

    pub fn interior_of(&self, s: usize) -> &[usize] {
        &self.interior[self.interior_range(s)]
    }

    /// All separator nodes, group by group.
    pub fn separators(&self) -> &[usize] {
        &self.separators
    }

    pub fn groups(&self) -> &[SeparatorGroup] {
        &self.groups
    }

    /// Positions of group `g` in [`separators`](Self::separators).
    pub fn group_range(&self, g: usize) -> Range<usize> {
        self.group_offsets[g]..self.group_offsets[g + 1]
    }

    pub fn group_of_position(&self, pos: usize) -> usize {
        self.group_of_position[pos]
    }

    /// Separator positions that subdomain `s` owns or touches.
    pub fn separators_of(&self, s: usize) -> &[usize] {
        &self.sd_separators[s]
    }

    /// Groups with members in [`separators_of(s)`](Self::separators_of).
    pub fn groups_of(&self, s: usize) -> &[usize] {
        &self.sd_groups[s]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::gallery::laplace_2d;

    fn laplace_map(n: usize, sx: usize) -> HierarchicalMap {
        let params = HymlsParams::for_grid_2d(n, n, 1).with_separator_length(sx);
        HierarchicalMap::new(&laplace_2d(n, n), &params).unwrap()
    }

    #[test]
    fn every_node_is_listed_once() {
        let map = laplace_map(8, 4);
        assert_eq!(map.num_subdomains(), 4);
        let mut all: Vec<usize> = map.interior().iter().chain(map.separators()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..64).collect::<Vec<_>>());
        for (k, &i) in map.separators().iter().enumerate() {
            assert_eq!(map.position(i), k);
            assert_eq!(map.role(i), Role::Separator);
        }
    }

    #[test]
    fn edges_and_corners_form_groups() {
        let map = laplace_map(8, 4);
        // vertical edge between subdomains 0 and 1: x = 3, y = 0..2
        let edge = map.groups().iter().find(|g| g.subdomains() == [0, 1]).unwrap();
        assert_eq!(edge.members(), &[3, 11, 19]);
        assert_eq!(edge.vsum(), 3);
        // the cross point x = 3, y = 3 is retained
        let corner = map.groups().iter().find(|g| g.members().contains(&27)).unwrap();
        assert!(corner.is_retained());
        assert_eq!(corner.len(), 1);
        let firsts: Vec<usize> = map.groups().iter().map(|g| g.vsum()).collect();
        assert!(firsts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn subdomain_separator_sets_cover_touching_groups() {
        let map = laplace_map(8, 4);
        // subdomain 3 owns no separators and touches two edges, not the corner
        assert_eq!(map.groups_of(3).len(), 2);
        assert_eq!(map.groups_of(0).len(), 3);
        assert_eq!(map.interior_of(3).len(), 16);
        assert_eq!(map.interior_of(0).len(), 9);
    }

    #[test]
    fn next_level_has_one_node_per_group() {
        let map = laplace_map(16, 4);
        let n = map.groups().len();
        let m = CsrMatrix::identity(n);
        let next = map.spawn_next_level(&m, &map.params().next_level()).unwrap();
        assert_eq!(next.num_nodes(), n);
        assert_eq!(next.level(), 1);
        // an identity graph has no couplings, so nothing is a separator
        assert!(next.separators().is_empty());
    }
}
