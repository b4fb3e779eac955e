//! The "GRID" Layer - Cells, Bounded Windows and Validity Masks
//!
//! Every region in StormTrack lives on a flat integer grid (no projection).
//! Instead of assuming a global domain, operations that need one
//! (rasterization, mask filtering, label export) take an explicit
//! [`GridBounds`]. Anything outside those bounds is treated as "no overlap".

use nalgebra::{DMatrix, Vector2};
use serde::{Deserialize, Serialize};

// ============================================================================
// CELL
// ============================================================================

/// One grid point, addressed by (row, column).
///
/// Ordered by `i` then `j` so that cell sets iterate deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub i: i32,
    pub j: i32,
}

impl Cell {
    pub const fn new(i: i32, j: i32) -> Self {
        Self { i, j }
    }

    /// The cell centre as a real-valued point in (i, j) space.
    #[inline]
    pub fn as_point(&self) -> Vector2<f64> {
        Vector2::new(self.i as f64, self.j as f64)
    }
}

impl From<(i32, i32)> for Cell {
    fn from((i, j): (i32, i32)) -> Self {
        Self { i, j }
    }
}

// ============================================================================
// GRID BOUNDS
// ============================================================================

/// Inclusive rectangle `[i_min, i_max] x [j_min, j_max]` of grid indices.
///
/// Doubles as a cluster's bounding box and as the bounded-grid configuration
/// handed to rasterization and export. A rectangle with `i_max < i_min` (or
/// `j_max < j_min`) is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridBounds {
    pub i_min: i32,
    pub i_max: i32,
    pub j_min: i32,
    pub j_max: i32,
}

impl GridBounds {
    pub const fn new(i_min: i32, i_max: i32, j_min: i32, j_max: i32) -> Self {
        Self { i_min, i_max, j_min, j_max }
    }

    /// Bounds of a `ni x nj` array indexed from zero.
    pub fn from_shape(ni: usize, nj: usize) -> Self {
        Self {
            i_min: 0,
            i_max: ni as i32 - 1,
            j_min: 0,
            j_max: nj as i32 - 1,
        }
    }

    /// Smallest rectangle containing every cell, or `None` for no cells.
    pub fn around<'a, I>(cells: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Cell>,
    {
        let mut iter = cells.into_iter();
        let first = iter.next()?;
        let mut bounds = Self::new(first.i, first.i, first.j, first.j);
        for c in iter {
            bounds.i_min = bounds.i_min.min(c.i);
            bounds.i_max = bounds.i_max.max(c.i);
            bounds.j_min = bounds.j_min.min(c.j);
            bounds.j_max = bounds.j_max.max(c.j);
        }
        Some(bounds)
    }

    /// Number of rows covered.
    #[inline]
    pub fn num_i(&self) -> usize {
        (self.i_max as i64 - self.i_min as i64 + 1).max(0) as usize
    }

    /// Number of columns covered.
    #[inline]
    pub fn num_j(&self) -> usize {
        (self.j_max as i64 - self.j_min as i64 + 1).max(0) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_i() == 0 || self.num_j() == 0
    }

    #[inline]
    pub fn contains(&self, cell: Cell) -> bool {
        cell.i >= self.i_min && cell.i <= self.i_max && cell.j >= self.j_min && cell.j <= self.j_max
    }

    /// Zero-based (row, column) offset of `cell` inside this rectangle.
    pub fn offset_of(&self, cell: Cell) -> Option<(usize, usize)> {
        if !self.contains(cell) {
            return None;
        }
        Some((
            (cell.i as i64 - self.i_min as i64) as usize,
            (cell.j as i64 - self.j_min as i64) as usize,
        ))
    }

    /// Inverse of [`offset_of`](Self::offset_of).
    #[inline]
    pub fn cell_at(&self, row: usize, col: usize) -> Cell {
        Cell::new(self.i_min + row as i32, self.j_min + col as i32)
    }

    /// Smallest rectangle covering both.
    pub fn union(&self, other: &GridBounds) -> GridBounds {
        GridBounds {
            i_min: self.i_min.min(other.i_min),
            i_max: self.i_max.max(other.i_max),
            j_min: self.j_min.min(other.j_min),
            j_max: self.j_max.max(other.j_max),
        }
    }

    /// Row coordinates `i_min..=i_max`.
    pub fn i_axis(&self) -> Vec<i32> {
        (self.i_min..=self.i_max).collect()
    }

    /// Column coordinates `j_min..=j_max`.
    pub fn j_axis(&self) -> Vec<i32> {
        (self.j_min..=self.j_max).collect()
    }
}

// ============================================================================
// VALIDITY MASK
// ============================================================================

/// Boolean mask aligned to a [`GridBounds`] (e.g. a coastal zone).
///
/// Produced by an external mask provider; consumed by mask-overlap filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMask")]
pub struct ValidMask {
    bounds: GridBounds,
    valid: DMatrix<bool>,
}

/// Unchecked wire form of [`ValidMask`].
#[derive(Deserialize)]
struct RawMask {
    bounds: GridBounds,
    valid: DMatrix<bool>,
}

impl TryFrom<RawMask> for ValidMask {
    type Error = GridError;

    fn try_from(raw: RawMask) -> Result<Self, Self::Error> {
        Self::new(raw.bounds, raw.valid)
    }
}

impl ValidMask {
    /// Wrap a dense mask. The matrix must be `num_i x num_j` of `bounds`.
    pub fn new(bounds: GridBounds, valid: DMatrix<bool>) -> Result<Self, GridError> {
        let expected = (bounds.num_i(), bounds.num_j());
        let actual = valid.shape();
        if expected != actual {
            return Err(GridError::ShapeMismatch { expected, actual });
        }
        Ok(Self { bounds, valid })
    }

    /// Build a mask by evaluating `f` on every cell of `bounds`.
    pub fn from_fn<F>(bounds: GridBounds, mut f: F) -> Self
    where
        F: FnMut(Cell) -> bool,
    {
        let valid = DMatrix::from_fn(bounds.num_i(), bounds.num_j(), |r, c| f(bounds.cell_at(r, c)));
        Self { bounds, valid }
    }

    pub fn bounds(&self) -> &GridBounds {
        &self.bounds
    }

    /// True if `cell` is inside the bounds and flagged valid.
    pub fn contains(&self, cell: Cell) -> bool {
        match self.bounds.offset_of(cell) {
            Some((r, c)) => self.valid.get((r, c)).copied().unwrap_or(false),
            None => false,
        }
    }

    pub fn count_valid(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors raised when grid-aligned data disagrees with its bounds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("Mask shape {actual:?} does not match bounds shape {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_around_cells() {
        let cells = [Cell::new(2, 3), Cell::new(-1, 7), Cell::new(4, 5)];
        let bounds = GridBounds::around(cells.iter()).unwrap();
        assert_eq!(bounds, GridBounds::new(-1, 4, 3, 7));
        assert_eq!(bounds.num_i(), 6);
        assert_eq!(bounds.num_j(), 5);

        assert!(GridBounds::around(std::iter::empty::<&Cell>()).is_none());
    }

    #[test]
    fn test_offset_round_trip() {
        let bounds = GridBounds::new(-2, 3, 10, 12);
        let cell = Cell::new(1, 11);
        let (r, c) = bounds.offset_of(cell).unwrap();
        assert_eq!((r, c), (3, 1));
        assert_eq!(bounds.cell_at(r, c), cell);

        assert!(bounds.offset_of(Cell::new(4, 11)).is_none());
        assert!(bounds.offset_of(Cell::new(0, 9)).is_none());
    }

    #[test]
    fn test_from_shape_and_empty() {
        let bounds = GridBounds::from_shape(10, 8);
        assert_eq!(bounds.i_axis().len(), 10);
        assert_eq!(bounds.j_axis(), (0..8).collect::<Vec<_>>());

        let empty = GridBounds::from_shape(0, 5);
        assert!(empty.is_empty());
        assert_eq!(empty.num_i(), 0);
    }

    #[test]
    fn test_mask_shape_mismatch() {
        let bounds = GridBounds::from_shape(3, 4);
        let result = ValidMask::new(bounds, DMatrix::from_element(4, 3, true));
        assert_eq!(
            result.unwrap_err(),
            GridError::ShapeMismatch { expected: (3, 4), actual: (4, 3) }
        );
    }

    #[test]
    fn test_mask_out_of_range_is_invalid() {
        let bounds = GridBounds::from_shape(3, 3);
        let mask = ValidMask::from_fn(bounds, |c| c.i == 1);
        assert_eq!(mask.count_valid(), 3);
        assert!(mask.contains(Cell::new(1, 2)));
        assert!(!mask.contains(Cell::new(0, 2)));
        // Outside the grid is never valid
        assert!(!mask.contains(Cell::new(1, 3)));
        assert!(!mask.contains(Cell::new(-1, 0)));
    }

    #[test]
    fn test_mask_deserialize_checks_shape() {
        let mask = ValidMask::from_fn(GridBounds::from_shape(3, 3), |c| c.j > 0);
        let json = serde_json::to_string(&mask).unwrap();
        let decoded: ValidMask = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, mask);

        // Bounds from one mask, data from a smaller one
        let small = ValidMask::from_fn(GridBounds::from_shape(2, 2), |_| true);
        let mut value = serde_json::to_value(&mask).unwrap();
        value["valid"] = serde_json::to_value(&small).unwrap()["valid"].clone();
        assert!(serde_json::from_value::<ValidMask>(value).is_err());
    }
}
