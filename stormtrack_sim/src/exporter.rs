//! JSON exporter for tracked scenarios.
//!
//! Exports per-frame label grids and cluster ellipses so an external
//! plotting script can animate the tracks.

use crate::runner::ScenarioResult;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use stormtrack_core::{Cluster, GridBounds, SplitPolicy, TrackEvent, TrackId};

/// Ellipse summary of one tracked cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterShape {
    pub track_id: u32,
    pub num_cells: usize,
    pub centre: [f64; 2],
    pub a: f64,
    pub b: f64,
    /// Halo semi-axes
    pub a_ext: f64,
    pub b_ext: f64,
    pub angle: f64,
}

impl ClusterShape {
    pub fn new(id: TrackId, cluster: &Cluster) -> Option<Self> {
        let ellipse = cluster.ellipse()?;
        let centre = ellipse.centre();
        Some(Self {
            track_id: id.value(),
            num_cells: cluster.num_cells(),
            centre: [centre.x, centre.y],
            a: ellipse.a(),
            b: ellipse.b(),
            a_ext: ellipse.a_ext(),
            b_ext: ellipse.b_ext(),
            angle: ellipse.angle(),
        })
    }
}

/// A single time step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    pub time_index: usize,

    /// Row-major label grid (0 = no cluster)
    pub labels: Vec<Vec<u32>>,

    pub clusters: Vec<ClusterShape>,
}

/// Lifetime summary of one track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSummary {
    pub track_id: u32,
    pub first_time: usize,
    pub last_time: usize,
    pub num_clusters: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub absorbed: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<u32>,
}

/// Complete scenario export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    pub split_policy: SplitPolicy,

    pub bounds: GridBounds,

    /// All frames
    pub frames: Vec<SimFrame>,

    pub tracks: Vec<TrackSummary>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<TrackEvent>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64, split_policy: SplitPolicy, bounds: GridBounds) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            split_policy,
            bounds,
            frames: Vec::new(),
            tracks: Vec::new(),
            events: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Builds the export of a finished run.
    pub fn from_result(result: &ScenarioResult) -> Self {
        let store = &result.store;
        let mut export = Self::new(
            result.scenario.name(),
            result.seed,
            store.config().split_policy,
            result.bounds,
        );

        let array = store.to_array(0..store.num_time_steps(), &result.bounds);
        for (time_index, layer) in array.layers.iter().enumerate() {
            let labels: Vec<Vec<u32>> = (0..layer.nrows())
                .map(|r| layer.row(r).iter().copied().collect())
                .collect();
            let clusters: Vec<ClusterShape> = store
                .frame(time_index)
                .filter_map(|(id, cluster)| ClusterShape::new(id, cluster))
                .collect();
            export.add_frame(SimFrame {
                time_index,
                labels,
                clusters,
            });
        }

        export.tracks = store
            .tracks()
            .filter_map(|track| {
                Some(TrackSummary {
                    track_id: track.id.value(),
                    first_time: track.first_time()?,
                    last_time: track.last_time()?,
                    num_clusters: track.num_clusters(),
                    absorbed: track.absorbed_ids.iter().map(|id| id.value()).collect(),
                    parent: track.parent.map(|p| p.value()),
                })
            })
            .collect();
        export.events = store.events().to_vec();
        export.finalize(result.passed, result.failure_reason.clone());
        export
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScenarioRunner;
    use crate::scenarios::ScenarioId;
    use stormtrack_core::Cell;

    #[test]
    fn test_export_two_merging() {
        let result = ScenarioRunner::new(42).run(ScenarioId::TwoMerging);
        let export = SimExport::from_result(&result);

        assert!(export.passed);
        assert_eq!(export.frames.len(), 2);
        assert_eq!(export.frames[0].labels.len(), 12);
        assert_eq!(export.frames[0].labels[7][3], 1);
        assert_eq!(export.frames[1].clusters.len(), 1);
        assert_eq!(export.tracks.len(), 1);
        assert_eq!(export.tracks[0].absorbed, vec![2]);
        assert_eq!(export.events.len(), 1);
    }

    #[test]
    fn test_export_json_fields() {
        let result = ScenarioRunner::new(42).run(ScenarioId::Rectangle);
        let json = serde_json::to_value(SimExport::from_result(&result)).unwrap();

        assert_eq!(json["scenario"], "rectangle");
        assert_eq!(json["split_policy"], "Inherit");
        assert!(json.get("events").is_none());
        assert!(json.get("failure_reason").is_none());
        assert_eq!(json["tracks"][0]["last_time"], 1);
    }

    #[test]
    fn test_cluster_shape_reports_halo() {
        let cells = [Cell::new(4, 4), Cell::new(4, 5)];
        let narrow = ClusterShape::new(TrackId::from(1), &Cluster::with_min_axis(cells, 0.0)).unwrap();
        let wide = ClusterShape::new(TrackId::from(1), &Cluster::with_min_axis(cells, 6.0)).unwrap();

        assert_eq!(narrow.num_cells, 2);
        assert!((narrow.a_ext - narrow.a).abs() < 1e-12);
        assert!(wide.a_ext > wide.a && wide.b_ext > wide.b);
        assert!(wide.b_ext > narrow.b_ext);
    }

    #[test]
    fn test_write_to_file() {
        let path = std::env::temp_dir().join(format!("stormtrack_export_{}.json", std::process::id()));
        let path = path.to_string_lossy().to_string();
        let result = ScenarioRunner::new(42).run(ScenarioId::OnlySplit);
        SimExport::from_result(&result).write_to_file(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        let parsed: SimExport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.frames.len(), 2);
        assert_eq!(parsed.scenario, "only_split");
    }
}
