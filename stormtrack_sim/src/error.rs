//! Error types for the StormTrack simulation harness.

use stormtrack_core::{GridError, TrackingError};
use thiserror::Error;

/// Errors that can occur while generating or tracking a synthetic field.
#[derive(Debug, Error)]
pub enum SimError {
    /// Noise parameters rejected by the distribution
    #[error("Invalid noise parameter: {0}")]
    InvalidNoise(#[from] rand_distr::NormalError),

    /// Standard deviation below zero
    #[error("Negative noise standard deviation: {0}")]
    NegativeNoise(f64),

    /// Field or mask does not match its bounds
    #[error("Grid error: {0}")]
    Grid(#[from] GridError),

    /// Track store rejected a frame
    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
