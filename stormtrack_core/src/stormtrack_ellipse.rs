//! The "SHAPE" Engine - Inertia Ellipse of a Cell Cloud
//!
//! Summarises a set of grid cells as a rotated ellipse:
//! - Centre = arithmetic mean of the cell coordinates
//! - Principal axes = eigenvectors of the 2×2 inertia tensor about the centre
//! - Semi-axes = square roots of the eigenvalues, floored at 0.5 and rescaled
//!   so that `π·a·b` equals the cell count
//! - Halo = exponentially vanishing extension that gives small clusters a
//!   minimum containment radius
//!
//! The eigen-decomposition is done in closed form with a fixed convention
//! (larger eigenvalue → `a`, proper rotation), so identical inputs always
//! produce identical axes regardless of cell order.

use crate::stormtrack_grid::Cell;
use nalgebra::{Matrix2, Rotation2, Vector2};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};

/// Principal radii are never allowed below this before area matching.
const MIN_RADIUS: f64 = 0.5;

// ============================================================================
// ELLIPSE
// ============================================================================

/// Read-only ellipse fitted to a non-empty set of cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    // === Placement ===

    /// Barycentre of the cells in (i, j) space
    centre: Vector2<f64>,

    /// Rotation from the principal-axis frame to (i, j); columns are the
    /// major and minor directions
    axes_to_ij: Matrix2<f64>,

    /// Inverse (transpose) of `axes_to_ij`
    ij_to_axes: Matrix2<f64>,

    /// Orientation of the major axis relative to the i axis, in (-π/2, π/2]
    angle: f64,

    // === Size ===

    /// Major semi-axis (area matched)
    a: f64,

    /// Minor semi-axis (area matched)
    b: f64,

    /// Major semi-axis including the halo
    a_ext: f64,

    /// Minor semi-axis including the halo
    b_ext: f64,
}

impl Ellipse {
    /// Fit an ellipse to `cells`.
    ///
    /// `min_axis` scales the halo: `a_ext = min_axis·e^(−a_raw) + a`, where
    /// `a_raw` is the unfloored principal radius after area matching. The halo
    /// dominates for single cells and thin lines and vanishes for large
    /// clusters.
    pub fn fit<'a, I>(cells: I, min_axis: f64) -> Result<Self, GeometryError>
    where
        I: IntoIterator<Item = &'a Cell>,
    {
        let points: Vec<Vector2<f64>> = cells.into_iter().map(Cell::as_point).collect();
        if points.is_empty() {
            return Err(GeometryError::EmptyCellSet);
        }

        let area = points.len() as f64;
        let centre = points.iter().fold(Vector2::zeros(), |acc, p| acc + p) / area;

        // Inertia tensor (symmetric): [[p, q], [q, r]]
        let inertia = points.iter().fold(Matrix2::zeros(), |acc, p| {
            let d = p - centre;
            acc + d * d.transpose()
        });
        let (p, q, r) = (inertia[(0, 0)], inertia[(0, 1)], inertia[(1, 1)]);

        // Closed-form eigenvalues, larger first
        let half_sum = 0.5 * (p + r);
        let half_gap = (0.25 * (p - r) * (p - r) + q * q).sqrt();
        let lambda_major = half_sum + half_gap;
        let lambda_minor = (half_sum - half_gap).max(0.0);

        // Direction of the major eigenvector, kept in (-π/2, π/2]
        let mut angle = 0.5 * (2.0 * q).atan2(p - r);
        if angle <= -FRAC_PI_2 {
            angle += PI;
        }
        let axes_to_ij = *Rotation2::new(angle).matrix();
        let ij_to_axes = axes_to_ij.transpose();

        let mut a_raw = lambda_major.sqrt();
        let mut b_raw = lambda_minor.sqrt();
        let mut a = a_raw.max(MIN_RADIUS);
        let mut b = b_raw.max(MIN_RADIUS);

        // Stretch uniformly so that the ellipse covers the cluster's area
        let scale = (area / (PI * a * b)).sqrt();
        a *= scale;
        b *= scale;
        a_raw *= scale;
        b_raw *= scale;

        Ok(Self {
            centre,
            axes_to_ij,
            ij_to_axes,
            angle,
            a,
            b,
            a_ext: min_axis * (-a_raw).exp() + a,
            b_ext: min_axis * (-b_raw).exp() + b,
        })
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// The barycentric centre.
    #[inline]
    pub fn centre(&self) -> Vector2<f64> {
        self.centre
    }

    #[inline]
    pub fn a(&self) -> f64 {
        self.a
    }

    #[inline]
    pub fn b(&self) -> f64 {
        self.b
    }

    #[inline]
    pub fn a_ext(&self) -> f64 {
        self.a_ext
    }

    #[inline]
    pub fn b_ext(&self) -> f64 {
        self.b_ext
    }

    /// Major-axis orientation in radians, measured from the i axis.
    #[inline]
    pub fn angle(&self) -> f64 {
        self.angle
    }

    /// Rotation taking principal-frame coordinates to (i, j).
    #[inline]
    pub fn axes_to_ij(&self) -> &Matrix2<f64> {
        &self.axes_to_ij
    }

    /// Rotation taking (i, j) offsets into the principal frame.
    #[inline]
    pub fn ij_to_axes(&self) -> &Matrix2<f64> {
        &self.ij_to_axes
    }

    /// `π·a·b`; equals the number of fitted cells.
    pub fn area(&self) -> f64 {
        PI * self.a * self.b
    }

    // ========================================================================
    // CONTAINMENT
    // ========================================================================

    /// Normalised squared radius of `point` for semi-axes `(a, b)`.
    fn radius_squared(&self, point: &Vector2<f64>, a: f64, b: f64) -> f64 {
        let local = self.ij_to_axes * (point - self.centre);
        (local.x / a).powi(2) + (local.y / b).powi(2)
    }

    /// Strictly inside the ellipse; points on the boundary are outside.
    pub fn is_point_inside(&self, point: &Vector2<f64>) -> bool {
        self.radius_squared(point, self.a, self.b) < 1.0
    }

    /// Strictly inside the halo-extended ellipse.
    pub fn is_point_inside_extended(&self, point: &Vector2<f64>) -> bool {
        self.radius_squared(point, self.a_ext, self.b_ext) < 1.0
    }

    // ========================================================================
    // OUTLINE (diagnostics only)
    // ========================================================================

    /// Closed outline with `num_segments + 1` points (first == last).
    pub fn polyline(&self, num_segments: usize) -> Polyline {
        Polyline::new(self.centre, self.axes_to_ij, self.a, self.b, num_segments)
    }

    /// Closed outline of the halo-extended ellipse.
    pub fn polyline_ext(&self, num_segments: usize) -> Polyline {
        Polyline::new(self.centre, self.axes_to_ij, self.a_ext, self.b_ext, num_segments)
    }
}

impl std::fmt::Display for Ellipse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Ellipse(centre=({:.3}, {:.3}), a={:.3}, b={:.3}, angle={:.1}°)",
            self.centre.x,
            self.centre.y,
            self.a,
            self.b,
            self.angle.to_degrees()
        )
    }
}

// ============================================================================
// POLYLINE
// ============================================================================

/// Lazy sampler of the parametric ellipse, rotated back to (i, j).
///
/// Finite and restartable: clone it to iterate again.
#[derive(Debug, Clone)]
pub struct Polyline {
    centre: Vector2<f64>,
    axes_to_ij: Matrix2<f64>,
    a: f64,
    b: f64,
    num_segments: usize,
    next: usize,
}

impl Polyline {
    fn new(centre: Vector2<f64>, axes_to_ij: Matrix2<f64>, a: f64, b: f64, num_segments: usize) -> Self {
        Self { centre, axes_to_ij, a, b, num_segments, next: 0 }
    }
}

impl Iterator for Polyline {
    type Item = Vector2<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.num_segments {
            return None;
        }
        let theta = if self.num_segments == 0 {
            0.0
        } else {
            2.0 * PI * self.next as f64 / self.num_segments as f64
        };
        self.next += 1;

        let local = Vector2::new(self.a * theta.cos(), self.b * theta.sin());
        Some(self.axes_to_ij * local + self.centre)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.num_segments + 1).saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Polyline {}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors that can occur while fitting shapes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeometryError {
    #[error("Cannot fit an ellipse to an empty cell set")]
    EmptyCellSet,
}

// ============================================================================
// TESTS
// ============================================================================
