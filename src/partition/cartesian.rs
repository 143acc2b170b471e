//! Box partitioning of grid nodes, axis aligned or rotated by 45°.

use crate::config::{HymlsParams, PartitionerKind};
use crate::config_error;
use crate::error::HymlsError;
use crate::partition::NodeCoord;

/// Assigns a raw subdomain id to every grid coordinate.
///
/// Raw ids are dense over the box lattice but may include boxes without
/// nodes; [`HierarchicalMap`](super::HierarchicalMap) compacts them.
#[derive(Debug, Clone)]
pub struct CartesianPartitioner {
    kind: PartitionerKind,
    sx: usize,
    sy: usize,
    sz: usize,
    /// Boxes along the first two (possibly rotated) axes.
    npx: usize,
    npy: usize,
    ny: usize,
}

impl CartesianPartitioner {
    pub fn new(params: &HymlsParams) -> Result<Self, HymlsError> {
        let (sx, sy, sz) = params.separator_lengths();
        if sx == 0 || sy == 0 || sz == 0 {
            return Err(config_error!("separator lengths must be positive, got {sx}x{sy}x{sz}"));
        }
        let p = &params.problem;
        let kind = params.preconditioner.partitioner;
        let (ext_x, ext_y) = match kind {
            PartitionerKind::Cartesian => (p.nx, p.ny),
            // u = x + y lies in [0, nx+ny-2], w = x - y + ny in [1, nx+ny-1]
            PartitionerKind::SkewCartesian => (p.nx + p.ny, p.nx + p.ny),
        };
        if kind == PartitionerKind::SkewCartesian && p.nz > 1 {
            log::warn!("skew partitioning rotates only the x-y plane; z is split into boxes of {sz}");
        }
        Ok(Self { kind, sx, sy, sz, npx: ext_x.div_ceil(sx), npy: ext_y.div_ceil(sy), ny: p.ny })
    }

    /// Raw subdomain id of the box containing `c`.
    pub fn raw_subdomain(&self, c: &NodeCoord) -> usize {
        let (u, w) = match self.kind {
            PartitionerKind::Cartesian => (c.x, c.y),
            PartitionerKind::SkewCartesian => (c.x + c.y, c.x + self.ny - c.y.min(self.ny)),
        };
        let bx = (u / self.sx).min(self.npx.saturating_sub(1));
        let by = (w / self.sy).min(self.npy.saturating_sub(1));
        bx + self.npx * (by + self.npy * (c.z / self.sz))
    }

    pub fn kind(&self) -> PartitionerKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: usize, y: usize) -> NodeCoord {
        NodeCoord { x, y, z: 0, var: 0 }
    }

    #[test]
    fn cartesian_boxes_follow_the_axes() {
        let params = HymlsParams::for_grid_2d(8, 8, 1).with_separator_length(4);
        let p = CartesianPartitioner::new(&params).unwrap();
        assert_eq!(p.raw_subdomain(&at(0, 0)), 0);
        assert_eq!(p.raw_subdomain(&at(3, 3)), 0);
        assert_eq!(p.raw_subdomain(&at(4, 0)), 1);
        assert_eq!(p.raw_subdomain(&at(0, 4)), 2);
        assert_eq!(p.raw_subdomain(&at(7, 7)), 3);
    }

    #[test]
    fn skew_boxes_follow_the_diagonals() {
        let params = HymlsParams::for_grid_2d(8, 8, 1)
            .with_separator_length(4)
            .with_partitioner(PartitionerKind::SkewCartesian);
        let p = CartesianPartitioner::new(&params).unwrap();
        // same anti-diagonal band and same diagonal band
        assert_eq!(p.raw_subdomain(&at(1, 1)), p.raw_subdomain(&at(2, 1)));
        // moving along a diagonal eventually changes the box
        assert_ne!(p.raw_subdomain(&at(0, 0)), p.raw_subdomain(&at(4, 4)));
    }
}
