//! Tracking scenarios for the simulation harness.
//!
//! The fixture scenarios are hand-made cell sets with a known topology;
//! `StormField` drives the tracker with oracle-generated fields instead.

use serde::{Deserialize, Serialize};
use stormtrack_core::{Cell, Cluster, GridBounds, SplitPolicy};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScenarioId {
    /// One rectangle seen twice
    Rectangle,

    /// Two rectangles followed by an unrelated third
    IndependentRectangles,

    /// Two blocks joined by a wider block
    TwoMerging,

    /// Two strips fused into one bar with no forward containment
    OnlyFuse,

    /// One bar breaking into two strips
    OnlySplit,

    /// A bar breaking into two irregular blobs
    SplittingInTwo,

    /// Seeded synthetic storms, thresholded and tracked
    StormField,
}

/// Expected outcome of a fixture scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectation {
    pub num_time_steps: usize,
    pub num_tracks: usize,
    pub num_live: usize,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Rectangle,
            ScenarioId::IndependentRectangles,
            ScenarioId::TwoMerging,
            ScenarioId::OnlyFuse,
            ScenarioId::OnlySplit,
            ScenarioId::SplittingInTwo,
            ScenarioId::StormField,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Rectangle => "rectangle",
            ScenarioId::IndependentRectangles => "independent_rectangles",
            ScenarioId::TwoMerging => "two_merging",
            ScenarioId::OnlyFuse => "only_fuse",
            ScenarioId::OnlySplit => "only_split",
            ScenarioId::SplittingInTwo => "splitting_in_two",
            ScenarioId::StormField => "storm_field",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Rectangle => "Same 3x2 rectangle at two time steps: one continuing track",
            ScenarioId::IndependentRectangles => "Two rectangles, then a third linked to neither: three tracks",
            ScenarioId::TwoMerging => "Two blocks whose centres fall inside a wider successor: one track",
            ScenarioId::OnlyFuse => "Backward containment only: both strips fuse into the bar",
            ScenarioId::OnlySplit => "Forward containment only: the bar splits into two strips",
            ScenarioId::SplittingInTwo => "A bar breaking into two irregular blobs",
            ScenarioId::StormField => "Drifting synthetic storms, thresholded and tracked",
        }
    }

    /// True for scenarios defined by fixed cell sets.
    pub fn is_fixture(&self) -> bool {
        !matches!(self, ScenarioId::StormField)
    }

    /// Grid covering every fixture cell.
    pub fn fixture_bounds() -> GridBounds {
        GridBounds::from_shape(12, 12)
    }

    /// The frames of a fixture scenario, or `None` for generated ones.
    pub fn fixture_frames(&self) -> Option<Vec<Vec<Cluster>>> {
        let frames = match self {
            ScenarioId::Rectangle => {
                let rectangle = cluster(&[(2, 3), (3, 3), (4, 3), (2, 4), (3, 4), (4, 4)]);
                vec![vec![rectangle.clone()], vec![rectangle]]
            }
            ScenarioId::IndependentRectangles => {
                let rect1 = cluster(&[(2, 3), (3, 3), (4, 3), (2, 4), (3, 4), (4, 4)]);
                let rect2 = cluster(&[(6, 3), (7, 3), (8, 3), (6, 4), (7, 4), (8, 4)]);
                let rect3 = cluster(&[(3, 4), (4, 4), (5, 4), (3, 5), (4, 5), (5, 5)]);
                vec![vec![rect1, rect2], vec![rect3]]
            }
            ScenarioId::TwoMerging => {
                let rect0 = block(2, 3, 3, 3);
                let rect1 = cluster(&[(6, 3), (7, 3), (8, 3), (6, 4), (7, 4), (8, 4), (6, 5)]);
                let rect2 = block(3, 5, 3, 3);
                vec![vec![rect0, rect1], vec![rect2]]
            }
            ScenarioId::OnlyFuse => {
                vec![vec![block(2, 2, 3, 3), block(7, 2, 3, 3)], vec![block(2, 7, 3, 3)]]
            }
            ScenarioId::OnlySplit => {
                vec![vec![block(2, 7, 3, 3)], vec![block(2, 2, 3, 3), block(7, 2, 3, 3)]]
            }
            ScenarioId::SplittingInTwo => {
                let bar = block(3, 3, 2, 8);
                let east = cluster(&[
                    (3, 8), (3, 9), (4, 7), (4, 8), (4, 10), (5, 7),
                    (5, 8), (5, 9), (5, 10), (6, 8), (6, 9),
                ]);
                let west = cluster(&[(3, 3), (4, 2), (4, 3), (4, 4), (5, 3)]);
                vec![vec![bar], vec![east, west]]
            }
            ScenarioId::StormField => return None,
        };
        Some(frames)
    }

    /// Expected track counts of a fixture scenario under `policy`.
    pub fn expectation(&self, policy: SplitPolicy) -> Option<Expectation> {
        let splits_apart = policy == SplitPolicy::Branch;
        let (num_tracks, num_live) = match self {
            ScenarioId::Rectangle => (1, 1),
            ScenarioId::IndependentRectangles => (3, 1),
            ScenarioId::TwoMerging => (1, 1),
            ScenarioId::OnlyFuse => (1, 1),
            ScenarioId::OnlySplit | ScenarioId::SplittingInTwo if splits_apart => (2, 2),
            ScenarioId::OnlySplit | ScenarioId::SplittingInTwo => (1, 1),
            ScenarioId::StormField => return None,
        };
        Some(Expectation {
            num_time_steps: 2,
            num_tracks,
            num_live,
        })
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rectangle" => Ok(ScenarioId::Rectangle),
            "independent_rectangles" | "independentrectangles" => Ok(ScenarioId::IndependentRectangles),
            "two_merging" | "twomerging" => Ok(ScenarioId::TwoMerging),
            "only_fuse" | "onlyfuse" => Ok(ScenarioId::OnlyFuse),
            "only_split" | "onlysplit" => Ok(ScenarioId::OnlySplit),
            "splitting_in_two" | "splittingintwo" => Ok(ScenarioId::SplittingInTwo),
            "storm_field" | "stormfield" => Ok(ScenarioId::StormField),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

/// `ni x nj` block with top-left cell `(i0, j0)`.
fn block(i0: i32, ni: i32, j0: i32, nj: i32) -> Cluster {
    Cluster::new((i0..i0 + ni).flat_map(|i| (j0..j0 + nj).map(move |j| Cell::new(i, j))))
}

fn cluster(cells: &[(i32, i32)]) -> Cluster {
    Cluster::new(cells.iter().copied().map(Cell::from))
}
