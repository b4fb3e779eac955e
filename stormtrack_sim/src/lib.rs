//! StormTrack Simulation Harness
//!
//! Drives the tracker with deterministic inputs:
//! - **Fixtures**: hand-made cell sets with a known merge/split topology
//! - **Storm fields**: seeded synthetic storms rendered by the [`Oracle`],
//!   thresholded into clusters by the [`ThresholdExtractor`]
//!
//! Every run is reproducible from a single 64-bit seed.
//!
//! # Usage
//!
//! ```ignore
//! use stormtrack_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::TwoMerging);
//! assert!(result.passed);
//! ```

mod error;
mod extractor;
mod oracle;
mod runner;
mod exporter;
pub mod scenarios;

pub use error::SimError;
pub use extractor::ThresholdExtractor;
pub use oracle::{Field, Oracle, Storm};
pub use runner::{coastal_mask, ScenarioResult, ScenarioRunner};
pub use exporter::{ClusterShape, SimExport, SimFrame, TrackSummary};
