//! Ground truth oracle for synthetic storm fields.
//!
//! The Oracle owns the "true" storms of a simulated domain:
//! - Drifting elliptic storms whose intensity peaks at the centre
//! - Growth and decay of each storm's peak intensity
//! - Rendering of the summed intensity onto a bounded grid (with noise)
//!
//! All randomness comes from one seeded `ChaCha8Rng`, so a seed fully
//! determines every rendered field.

use crate::error::SimError;
use nalgebra::{DMatrix, Rotation2, Vector2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use stormtrack_core::{Cell, GridBounds, GridError};

// ============================================================================
// STORM
// ============================================================================

/// A ground truth storm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Storm {
    pub id: u64,

    /// Centre in (i, j) grid coordinates
    pub centre: Vector2<f64>,

    /// Displacement per time step
    pub velocity: Vector2<f64>,

    /// Semi-axes of the footprint before rotation
    pub radii: Vector2<f64>,

    /// Footprint orientation relative to the i axis (radians)
    pub angle: f64,

    /// Intensity at the centre
    pub peak: f64,

    /// Change of `peak` per time step
    pub growth: f64,

    /// Storm still exists
    pub active: bool,
}

impl Storm {
    /// Paraboloid intensity: `peak * (1 - r^2)` inside the footprint, 0 outside.
    pub fn intensity(&self, point: &Vector2<f64>) -> f64 {
        if !self.active {
            return 0.0;
        }
        let local = Rotation2::new(-self.angle) * (point - self.centre);
        let r2 = (local.x / self.radii.x).powi(2) + (local.y / self.radii.y).powi(2);
        if r2 < 1.0 {
            self.peak * (1.0 - r2)
        } else {
            0.0
        }
    }
}

// ============================================================================
// FIELD
// ============================================================================

/// Dense scalar field over a [`GridBounds`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    bounds: GridBounds,
    values: DMatrix<f64>,
}

impl Field {
    pub fn new(bounds: GridBounds, values: DMatrix<f64>) -> Result<Self, GridError> {
        let expected = (bounds.num_i(), bounds.num_j());
        if values.shape() != expected {
            return Err(GridError::ShapeMismatch {
                expected,
                actual: values.shape(),
            });
        }
        Ok(Self { bounds, values })
    }

    pub fn zeros(bounds: GridBounds) -> Self {
        Self {
            bounds,
            values: DMatrix::zeros(bounds.num_i(), bounds.num_j()),
        }
    }

    pub fn bounds(&self) -> &GridBounds {
        &self.bounds
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    /// Value at `cell`; 0 outside the bounds.
    pub fn get(&self, cell: Cell) -> f64 {
        self.bounds.offset_of(cell).map(|o| self.values[o]).unwrap_or(0.0)
    }

    /// Set the value at `cell`. Ignored outside the bounds.
    pub fn set(&mut self, cell: Cell, value: f64) {
        if let Some(offset) = self.bounds.offset_of(cell) {
            self.values[offset] = value;
        }
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }
}

// ============================================================================
// ORACLE
// ============================================================================

/// The Oracle - moves storms and renders fields.
pub struct Oracle {
    seed: u64,
    rng: ChaCha8Rng,
    bounds: GridBounds,
    storms: Vec<Storm>,
    next_id: u64,
    time_step: usize,

    /// Additive intensity noise inside storm footprints
    intensity_noise: Option<Normal<f64>>,

    /// Random walk added to each storm's motion
    drift_noise: Option<Normal<f64>>,
}

impl Oracle {
    /// Create an Oracle over `bounds`. Noise is off until configured.
    pub fn new(seed: u64, bounds: GridBounds) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            bounds,
            storms: Vec::new(),
            next_id: 0,
            time_step: 0,
            intensity_noise: None,
            drift_noise: None,
        }
    }

    /// Set the intensity and drift noise standard deviations.
    pub fn set_noise(&mut self, intensity_std: f64, drift_std: f64) -> Result<(), SimError> {
        // Normal::new only rejects non-finite deviations
        for std in [intensity_std, drift_std] {
            if std < 0.0 {
                return Err(SimError::NegativeNoise(std));
            }
        }
        self.intensity_noise = Some(Normal::new(0.0, intensity_std)?);
        self.drift_noise = Some(Normal::new(0.0, drift_std)?);
        Ok(())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn bounds(&self) -> &GridBounds {
        &self.bounds
    }

    pub fn time_step(&self) -> usize {
        self.time_step
    }

    pub fn storms(&self) -> &[Storm] {
        &self.storms
    }

    pub fn active_storms(&self) -> impl Iterator<Item = &Storm> {
        self.storms.iter().filter(|s| s.active)
    }

    /// Spawn a storm and return its id.
    pub fn spawn_storm(
        &mut self,
        centre: Vector2<f64>,
        velocity: Vector2<f64>,
        radii: Vector2<f64>,
        angle: f64,
        peak: f64,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.storms.push(Storm {
            id,
            centre,
            velocity,
            radii,
            angle,
            peak,
            growth: 0.0,
            active: true,
        });
        id
    }

    /// Spawn `count` storms with random placement, motion, shape and life cycle.
    pub fn spawn_random_storms(&mut self, count: usize) {
        let (i_lo, i_hi) = (self.bounds.i_min as f64, self.bounds.i_max as f64);
        let (j_lo, j_hi) = (self.bounds.j_min as f64, self.bounds.j_max as f64);
        if i_hi <= i_lo || j_hi <= j_lo {
            return;
        }

        for _ in 0..count {
            let centre = Vector2::new(self.rng.gen_range(i_lo..i_hi), self.rng.gen_range(j_lo..j_hi));
            let velocity = Vector2::new(self.rng.gen_range(-0.5..0.5), self.rng.gen_range(0.2..1.5));
            let radii = Vector2::new(self.rng.gen_range(3.0..8.0), self.rng.gen_range(3.0..8.0));
            let angle = self.rng.gen_range(-std::f64::consts::FRAC_PI_2..std::f64::consts::FRAC_PI_2);
            let peak = self.rng.gen_range(3.0..8.0);
            let growth = self.rng.gen_range(-0.4..0.1);

            let id = self.spawn_storm(centre, velocity, radii, angle, peak);
            if let Some(storm) = self.storms.iter_mut().find(|s| s.id == id) {
                storm.growth = growth;
            }
        }
    }

    /// Advance every storm by one time step.
    ///
    /// Storms die when their peak drops to zero or their footprint leaves
    /// the domain entirely.
    pub fn step(&mut self) {
        let margin = 10.0;
        for storm in self.storms.iter_mut().filter(|s| s.active) {
            let mut motion = storm.velocity;
            if let Some(drift) = &self.drift_noise {
                motion += Vector2::new(drift.sample(&mut self.rng), drift.sample(&mut self.rng));
            }
            storm.centre += motion;
            storm.peak += storm.growth;

            let outside = storm.centre.x < self.bounds.i_min as f64 - margin
                || storm.centre.x > self.bounds.i_max as f64 + margin
                || storm.centre.y < self.bounds.j_min as f64 - margin
                || storm.centre.y > self.bounds.j_max as f64 + margin;
            if storm.peak <= 0.0 || outside {
                storm.active = false;
            }
        }
        self.time_step += 1;
    }

    /// Render the summed intensity of all active storms.
    pub fn render(&mut self) -> Field {
        let bounds = self.bounds;
        let storms = &self.storms;
        let rng = &mut self.rng;
        let noise = &self.intensity_noise;

        let values = DMatrix::from_fn(bounds.num_i(), bounds.num_j(), |r, c| {
            let point = bounds.cell_at(r, c).as_point();
            let value: f64 = storms.iter().map(|s| s.intensity(&point)).sum();
            match noise {
                Some(normal) if value > 0.0 => (value + normal.sample(rng)).max(0.0),
                _ => value,
            }
        });

        Field { bounds, values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn oracle() -> Oracle {
        Oracle::new(42, GridBounds::from_shape(40, 60))
    }

    #[test]
    fn test_storm_intensity_profile() {
        let mut oracle = oracle();
        oracle.spawn_storm(Vector2::new(20.0, 30.0), Vector2::zeros(), Vector2::new(4.0, 2.0), 0.0, 5.0);
        let storm = &oracle.storms()[0];

        assert_relative_eq!(storm.intensity(&Vector2::new(20.0, 30.0)), 5.0);
        assert_relative_eq!(storm.intensity(&Vector2::new(22.0, 30.0)), 5.0 * 0.75);
        // Beyond the short semi-axis
        assert_eq!(storm.intensity(&Vector2::new(20.0, 32.5)), 0.0);
    }

    #[test]
    fn test_rotated_footprint() {
        let mut oracle = oracle();
        oracle.spawn_storm(
            Vector2::new(20.0, 30.0),
            Vector2::zeros(),
            Vector2::new(4.0, 1.0),
            std::f64::consts::FRAC_PI_2,
            5.0,
        );
        let storm = &oracle.storms()[0];

        // Long axis now runs along j
        assert!(storm.intensity(&Vector2::new(20.0, 33.0)) > 0.0);
        assert_eq!(storm.intensity(&Vector2::new(23.0, 30.0)), 0.0);
    }

    #[test]
    fn test_step_moves_and_decays() {
        let mut oracle = oracle();
        let id = oracle.spawn_storm(Vector2::new(5.0, 5.0), Vector2::new(1.0, 2.0), Vector2::new(3.0, 3.0), 0.0, 1.0);
        oracle.storms[0].growth = -0.6;

        oracle.step();
        let storm = oracle.storms().iter().find(|s| s.id == id).unwrap();
        assert_relative_eq!(storm.centre, Vector2::new(6.0, 7.0));
        assert!(storm.active);

        oracle.step();
        assert!(!oracle.storms()[0].active);
        assert_eq!(oracle.active_storms().count(), 0);
        assert_eq!(oracle.time_step(), 2);
    }

    #[test]
    fn test_render_is_zero_outside_storms() {
        let mut oracle = oracle();
        oracle.spawn_storm(Vector2::new(10.0, 10.0), Vector2::zeros(), Vector2::new(3.0, 3.0), 0.0, 4.0);
        let field = oracle.render();

        assert_relative_eq!(field.get(Cell::new(10, 10)), 4.0);
        assert_eq!(field.get(Cell::new(30, 50)), 0.0);
        assert_eq!(field.get(Cell::new(-1, 0)), 0.0);
        assert_relative_eq!(field.max(), 4.0);
    }

    #[test]
    fn test_deterministic_fields() {
        let run = |seed: u64| {
            let mut oracle = Oracle::new(seed, GridBounds::from_shape(30, 30));
            oracle.set_noise(0.2, 0.3).unwrap();
            oracle.spawn_random_storms(4);
            oracle.step();
            oracle.render()
        };

        assert_eq!(run(7), run(7));
        assert_ne!(run(7), run(8));
    }

    #[test]
    fn test_invalid_noise_rejected() {
        let mut oracle = oracle();
        assert!(matches!(oracle.set_noise(-1.0, 0.0), Err(SimError::NegativeNoise(_))));
        assert!(matches!(oracle.set_noise(0.2, -0.5), Err(SimError::NegativeNoise(d)) if d == -0.5));
        assert!(matches!(oracle.set_noise(f64::NAN, 0.0), Err(SimError::InvalidNoise(_))));
        assert!(oracle.set_noise(0.0, 0.0).is_ok());
    }

    #[test]
    fn test_field_shape_checked() {
        let bounds = GridBounds::from_shape(3, 4);
        assert!(Field::new(bounds, DMatrix::zeros(3, 4)).is_ok());
        assert!(Field::new(bounds, DMatrix::zeros(4, 3)).is_err());
    }
}
