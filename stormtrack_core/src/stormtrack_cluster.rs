//! The "REGION" Layer - Clusters of Grid Cells
//!
//! A [`Cluster`] is one detected region at one time instant: a set of unique
//! cells plus two derived summaries, the inertia [`Ellipse`] and the
//! axis-aligned [`GridBounds`]. Both summaries are recomputed by every
//! mutator, so they are never stale.
//!
//! Containment between clusters is directed: `a.is_centre_inside_of(&b)`
//! asks whether a's centroid falls strictly inside b's ellipse.

use crate::stormtrack_ellipse::Ellipse;
use crate::stormtrack_grid::{Cell, GridBounds, ValidMask};
use nalgebra::{DMatrix, Vector2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Halo scale used when a cluster is built without an explicit one.
pub const DEFAULT_MIN_AXIS: f64 = 1.0;

// ============================================================================
// CLUSTER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Unique cells, ordered for deterministic iteration
    cells: BTreeSet<Cell>,

    /// Halo scale handed to the ellipse fit
    min_axis: f64,

    /// Derived shape; `None` iff the cluster is empty
    ellipse: Option<Ellipse>,

    /// Derived bounding box; `None` iff the cluster is empty
    bounds: Option<GridBounds>,
}

impl Cluster {
    /// Build a cluster with the default halo scale.
    pub fn new<I>(cells: I) -> Self
    where
        I: IntoIterator<Item = Cell>,
    {
        Self::with_min_axis(cells, DEFAULT_MIN_AXIS)
    }

    /// Build a cluster with an explicit halo scale.
    pub fn with_min_axis<I>(cells: I, min_axis: f64) -> Self
    where
        I: IntoIterator<Item = Cell>,
    {
        let mut cluster = Self {
            cells: cells.into_iter().collect(),
            min_axis,
            ellipse: None,
            bounds: None,
        };
        cluster.update();
        cluster
    }

    /// The "no-op" cluster: no cells, no ellipse, no box.
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Recompute the ellipse and bounding box from `cells`.
    ///
    /// The emptiness check here is the guard that keeps empty sets away from
    /// [`Ellipse::fit`].
    fn update(&mut self) {
        if self.cells.is_empty() {
            self.ellipse = None;
            self.bounds = None;
            return;
        }
        self.ellipse = Ellipse::fit(&self.cells, self.min_axis).ok();
        self.bounds = GridBounds::around(&self.cells);
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    #[inline]
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &BTreeSet<Cell> {
        &self.cells
    }

    pub fn contains(&self, cell: &Cell) -> bool {
        self.cells.contains(cell)
    }

    pub fn min_axis(&self) -> f64 {
        self.min_axis
    }

    pub fn ellipse(&self) -> Option<&Ellipse> {
        self.ellipse.as_ref()
    }

    /// Inclusive bounding box of the cells.
    pub fn bounds(&self) -> Option<&GridBounds> {
        self.bounds.as_ref()
    }

    /// Centroid (delegates to the ellipse).
    pub fn centre(&self) -> Option<Vector2<f64>> {
        self.ellipse.as_ref().map(Ellipse::centre)
    }

    /// Euclidean distance between the two centroids.
    pub fn distance(&self, other: &Cluster) -> Option<f64> {
        Some((self.centre()? - other.centre()?).norm())
    }

    // ========================================================================
    // CONTAINMENT
    // ========================================================================

    /// True iff this centroid lies strictly inside `other`'s ellipse.
    ///
    /// Always false when either cluster is empty.
    pub fn is_centre_inside_of(&self, other: &Cluster) -> bool {
        match (self.centre(), other.ellipse()) {
            (Some(c), Some(e)) => e.is_point_inside(&c),
            _ => false,
        }
    }

    /// Same as [`is_centre_inside_of`](Self::is_centre_inside_of) against the
    /// halo-extended ellipse.
    pub fn is_centre_inside_extended_of(&self, other: &Cluster) -> bool {
        match (self.centre(), other.ellipse()) {
            (Some(c), Some(e)) => e.is_point_inside_extended(&c),
            _ => false,
        }
    }

    /// Fraction of this cluster's cells lying inside `other`'s ellipse.
    pub fn ellipse_overlap(&self, other: &Cluster) -> f64 {
        let Some(ellipse) = other.ellipse() else {
            return 0.0;
        };
        if self.is_empty() {
            return 0.0;
        }
        let inside = self
            .cells
            .iter()
            .filter(|c| ellipse.is_point_inside(&c.as_point()))
            .count();
        inside as f64 / self.num_cells() as f64
    }

    /// Fraction of this cluster's cells flagged valid in `mask`.
    ///
    /// Cells outside the mask's bounds count as not valid.
    pub fn mask_overlap(&self, mask: &ValidMask) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let inside = self.cells.iter().filter(|c| mask.contains(**c)).count();
        inside as f64 / self.num_cells() as f64
    }

    // ========================================================================
    // SET ALGEBRA
    // ========================================================================

    /// New cluster over the common cells (may be empty).
    pub fn intersect(&self, other: &Cluster) -> Cluster {
        Cluster::with_min_axis(self.cells.intersection(&other.cells).copied(), self.min_axis)
    }

    /// New cluster over the cells of both.
    pub fn union(&self, other: &Cluster) -> Cluster {
        Cluster::with_min_axis(self.cells.union(&other.cells).copied(), self.min_axis)
    }

    /// Absorb `other`'s cells, then refresh the derived shape.
    pub fn merge_in_place(&mut self, other: &Cluster) {
        self.cells.extend(other.cells.iter().copied());
        self.update();
    }

    // ========================================================================
    // RASTERIZATION
    // ========================================================================

    /// Dense 0/1 image of the cluster over `bounds` (default: own box).
    ///
    /// Cells outside `bounds` are dropped. An empty cluster yields an empty
    /// raster.
    pub fn rasterize(&self, bounds: Option<&GridBounds>) -> Raster {
        let Some(own) = self.bounds.as_ref() else {
            return Raster::empty();
        };
        let bounds = *bounds.unwrap_or(own);

        let mut grid = DMatrix::zeros(bounds.num_i(), bounds.num_j());
        for cell in &self.cells {
            if let Some(offset) = bounds.offset_of(*cell) {
                grid[offset] = 1;
            }
        }
        Raster { bounds: Some(bounds), grid }
    }
}

impl std::fmt::Display for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.ellipse, &self.bounds) {
            (Some(e), Some(b)) => write!(
                f,
                "Cluster(cells={}, box=[{}..{}]x[{}..{}], {})",
                self.num_cells(),
                b.i_min,
                b.i_max,
                b.j_min,
                b.j_max,
                e
            ),
            _ => write!(f, "Cluster(empty)"),
        }
    }
}

// ============================================================================
// RASTER
// ============================================================================

/// Dense occupancy image of a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raster {
    /// Covered window; `None` for an empty raster
    pub bounds: Option<GridBounds>,

    /// `num_i x num_j` grid of 0/1
    pub grid: DMatrix<u8>,
}

impl Raster {
    fn empty() -> Self {
        Self { bounds: None, grid: DMatrix::zeros(0, 0) }
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    /// Row coordinates of the grid.
    pub fn i_axis(&self) -> Vec<i32> {
        self.bounds.map(|b| b.i_axis()).unwrap_or_default()
    }

    /// Column coordinates of the grid.
    pub fn j_axis(&self) -> Vec<i32> {
        self.bounds.map(|b| b.j_axis()).unwrap_or_default()
    }

    /// Re-extract the occupied cells.
    pub fn cells(&self) -> BTreeSet<Cell> {
        let Some(bounds) = self.bounds else {
            return BTreeSet::new();
        };
        let mut cells = BTreeSet::new();
        for r in 0..self.grid.nrows() {
            for c in 0..self.grid.ncols() {
                if self.grid[(r, c)] != 0 {
                    cells.insert(bounds.cell_at(r, c));
                }
            }
        }
        cells
    }
}

// ============================================================================
// TESTS
// ============================================================================
