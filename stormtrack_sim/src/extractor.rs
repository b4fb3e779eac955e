//! Threshold cluster extraction.
//!
//! Grows 8-connected regions of `value > thresh_low` and keeps those that
//! contain at least one core cell with `value > thresh_high`. This is the
//! harness's stand-in for a production watershed segmentation.

use crate::oracle::Field;
use nalgebra::DMatrix;
use std::collections::VecDeque;
use stormtrack_core::{filter_by_mask, Cluster, ValidMask, DEFAULT_MIN_AXIS};
use tracing::debug;

/// 8-neighbourhood offsets in (i, j).
const NEIGHBORS: [(i32, i32); 8] = [(-1, -1), (-1, 0), (-1, 1), (0, -1), (0, 1), (1, -1), (1, 0), (1, 1)];

#[derive(Debug, Clone)]
pub struct ThresholdExtractor {
    /// Region membership threshold (exclusive)
    pub thresh_low: f64,

    /// Core threshold (exclusive) a region must reach somewhere
    pub thresh_high: f64,

    /// Halo parameter given to every extracted cluster
    pub min_axis: f64,

    /// Optional validity mask and the minimum fraction of cells inside it
    pub mask: Option<(ValidMask, f64)>,
}

impl Default for ThresholdExtractor {
    fn default() -> Self {
        Self {
            thresh_low: 0.0,
            thresh_high: 2.5,
            min_axis: DEFAULT_MIN_AXIS,
            mask: None,
        }
    }
}

impl ThresholdExtractor {
    pub fn new(thresh_low: f64, thresh_high: f64) -> Self {
        Self {
            thresh_low,
            thresh_high,
            ..Default::default()
        }
    }

    pub fn with_min_axis(mut self, min_axis: f64) -> Self {
        self.min_axis = min_axis;
        self
    }

    pub fn with_mask(mut self, mask: ValidMask, frac: f64) -> Self {
        self.mask = Some((mask, frac));
        self
    }

    /// Extract clusters in row-major order of their first cell.
    pub fn extract(&self, field: &Field) -> Vec<Cluster> {
        let bounds = *field.bounds();
        let values = field.values();
        let (ni, nj) = values.shape();
        let mut visited = DMatrix::from_element(ni, nj, false);
        let mut clusters = Vec::new();
        let mut queue = VecDeque::new();

        for r in 0..ni {
            for c in 0..nj {
                if visited[(r, c)] || values[(r, c)] <= self.thresh_low {
                    continue;
                }

                visited[(r, c)] = true;
                queue.push_back((r, c));
                let mut cells = Vec::new();
                let mut has_core = false;

                while let Some((cr, cc)) = queue.pop_front() {
                    cells.push(bounds.cell_at(cr, cc));
                    has_core |= values[(cr, cc)] > self.thresh_high;

                    for &(di, dj) in &NEIGHBORS {
                        let nr = cr as i64 + di as i64;
                        let nc = cc as i64 + dj as i64;
                        if nr < 0 || nc < 0 || nr >= ni as i64 || nc >= nj as i64 {
                            continue;
                        }
                        let (nr, nc) = (nr as usize, nc as usize);
                        if !visited[(nr, nc)] && values[(nr, nc)] > self.thresh_low {
                            visited[(nr, nc)] = true;
                            queue.push_back((nr, nc));
                        }
                    }
                }

                if has_core {
                    clusters.push(Cluster::with_min_axis(cells, self.min_axis));
                }
            }
        }

        let found = clusters.len();
        let clusters = match &self.mask {
            Some((mask, frac)) => filter_by_mask(clusters, mask, *frac),
            None => clusters,
        };
        debug!("Extracted {} clusters ({} after mask)", found, clusters.len());
        clusters
    }
}
