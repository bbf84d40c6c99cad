//! Spatial grid index and district clustering.
//!
//! Provides a 3D uniform-grid index over building positions, used to find
//! every point within a radius without comparing against all of them, and
//! the greedy district clusterer built on top of it. Each district carries
//! an item ledger and its manifold blocks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod district;
pub mod ledger;
pub use district::{District, DistrictId, Districts, assign_districts, cluster_districts};
pub use ledger::{ItemBalance, ItemStatus, ManifoldBlock, item_ledger, manifold_blocks};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A cell of the uniform grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellPosition {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl CellPosition {
    pub fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    /// The cell containing `position` for the given cell size. Coordinates
    /// beyond the `i64` range saturate.
    pub fn containing(position: [f32; 3], cell_size: f64) -> Self {
        let axis = |v: f32| (f64::from(v) / cell_size).floor() as i64;
        Self::new(axis(position[0]), axis(position[1]), axis(position[2]))
    }

    /// This cell and its 26 neighbours.
    pub fn block(self) -> impl Iterator<Item = CellPosition> {
        (-1i64..=1).flat_map(move |dz| {
            (-1i64..=1).flat_map(move |dy| {
                (-1i64..=1).map(move |dx| {
                    CellPosition::new(
                        self.x.saturating_add(dx),
                        self.y.saturating_add(dy),
                        self.z.saturating_add(dz),
                    )
                })
            })
        })
    }
}

/// Euclidean distance between two positions.
pub fn distance(a: [f32; 3], b: [f32; 3]) -> f64 {
    let d = |i: usize| f64::from(a[i]) - f64::from(b[i]);
    (d(0) * d(0) + d(1) * d(1) + d(2) * d(2)).sqrt()
}

/// Errors from spatial operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpatialError {
    #[error("cell size must be finite and positive, got {0}")]
    InvalidCellSize(f64),
}

// ---------------------------------------------------------------------------
// SpatialGrid
// ---------------------------------------------------------------------------

/// A uniform grid mapping cells to the items placed in them.
///
/// With the cell size equal to the search radius, every point within the
/// radius of a query lies in the query's cell or one of its 26 neighbours.
#[derive(Debug, Clone)]
pub struct SpatialGrid<T> {
    cell_size: f64,
    cells: BTreeMap<CellPosition, Vec<([f32; 3], T)>>,
    len: usize,
}

impl<T: Copy> SpatialGrid<T> {
    pub fn new(cell_size: f64) -> Result<Self, SpatialError> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(SpatialError::InvalidCellSize(cell_size));
        }
        Ok(Self {
            cell_size,
            cells: BTreeMap::new(),
            len: 0,
        })
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn insert(&mut self, position: [f32; 3], item: T) {
        self.cells
            .entry(CellPosition::containing(position, self.cell_size))
            .or_default()
            .push((position, item));
        self.len += 1;
    }

    /// Items within `radius` of `position`, in cell order then insertion
    /// order. `radius` must not exceed the cell size.
    pub fn within(&self, position: [f32; 3], radius: f64) -> Vec<T> {
        let mut found = Vec::new();
        for cell in CellPosition::containing(position, self.cell_size).block() {
            let Some(items) = self.cells.get(&cell) else {
                continue;
            };
            for &(p, item) in items {
                if distance(position, p) <= radius {
                    found.push(item);
                }
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_of_negative_coordinates_floors() {
        assert_eq!(
            CellPosition::containing([-0.5, 0.5, 99.9], 10.0),
            CellPosition::new(-1, 0, 9)
        );
    }

    #[test]
    fn block_has_27_cells() {
        let cells: Vec<_> = CellPosition::new(0, 0, 0).block().collect();
        assert_eq!(cells.len(), 27);
        assert!(cells.contains(&CellPosition::new(-1, 1, -1)));
    }

    #[test]
    fn distance_is_euclidean() {
        assert_eq!(distance([0.0; 3], [3.0, 4.0, 12.0]), 13.0);
    }

    #[test]
    fn rejects_bad_cell_size() {
        assert!(SpatialGrid::<u32>::new(0.0).is_err());
        assert!(SpatialGrid::<u32>::new(f64::NAN).is_err());
        assert!(SpatialGrid::<u32>::new(f64::INFINITY).is_err());
    }

    #[test]
    fn within_finds_points_across_cell_borders() {
        let mut grid = SpatialGrid::new(10.0).unwrap();
        grid.insert([9.0, 0.0, 0.0], 1u32);
        grid.insert([11.0, 0.0, 0.0], 2);
        grid.insert([30.0, 0.0, 0.0], 3);
        let mut near = grid.within([10.0, 0.0, 0.0], 10.0);
        near.sort();
        assert_eq!(near, vec![1, 2]);
        assert_eq!(grid.len(), 3);
        assert_eq!(grid.cell_count(), 3);
    }

    #[test]
    fn within_is_inclusive() {
        let mut grid = SpatialGrid::new(5.0).unwrap();
        grid.insert([0.0, 5.0, 0.0], 'a');
        assert_eq!(grid.within([0.0; 3], 5.0), vec!['a']);
    }
}
