//! The "TRACKING" Engine - Temporal Linking of Cluster Frames
//!
//! Turns a time-ordered sequence of per-frame cluster lists into persistent
//! track identities:
//! - Link: previous P and new N are linked iff either centroid lies inside
//!   the other's ellipse
//! - Group: connected components of the bipartite link graph (union-find)
//! - Resolve: birth, continuation, split, merge and merge-then-split per
//!   component, with the minimum-id rule picking the survivor of a merge
//!
//! Storage is an append-only arena: frame `t` holds immutable
//! `(Cluster, TrackId)` snapshots and tracks refer into it by
//! `(time, slot)`. Merged-away ids are redirected to their survivor instead
//! of rewriting history, so provenance stays queryable.

use crate::stormtrack_cluster::Cluster;
use crate::stormtrack_frame::{merge_mutually_contained, merge_overlapping, remove_large_scale};
use crate::stormtrack_grid::{Cell, GridBounds, ValidMask};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Write;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, warn};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// How identities are handed out when one track links to several clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SplitPolicy {
    /// Every branch keeps the ancestor id (one track with several clusters)
    #[default]
    Inherit,

    /// The largest branch keeps the ancestor id; every other branch gets a
    /// fresh id whose parent is the ancestor
    Branch,
}

/// Configuration for the TrackStore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Identity policy for splits (default: Inherit)
    pub split_policy: SplitPolicy,

    /// Same-frame consolidation threshold used when `add_time` is given
    /// `None` (default: no consolidation)
    pub overlap_fraction: Option<f64>,

    /// Clusters with more cells than this are dropped on ingestion
    /// (default: no limit)
    pub max_cluster_cells: Option<usize>,

    /// Fold clusters whose centres sit inside each other's ellipse before
    /// linking (default: off)
    #[serde(default)]
    pub merge_contained: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            split_policy: SplitPolicy::Inherit,
            overlap_fraction: None,
            max_cluster_cells: None,
            merge_contained: false,
        }
    }
}

impl TrackingConfig {
    pub fn with_split_policy(mut self, policy: SplitPolicy) -> Self {
        self.split_policy = policy;
        self
    }

    pub fn with_overlap_fraction(mut self, fraction: f64) -> Self {
        self.overlap_fraction = Some(fraction);
        self
    }

    pub fn with_max_cluster_cells(mut self, max_cells: usize) -> Self {
        self.max_cluster_cells = Some(max_cells);
        self
    }

    pub fn with_contained_merge(mut self, enabled: bool) -> Self {
        self.merge_contained = enabled;
        self
    }
}

// ============================================================================
// IDENTITY
// ============================================================================

/// Persistent track identity. Allocated from 1 upwards and never reused;
/// 0 is the "no cluster" label in exported arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(u32);

impl TrackId {
    #[inline]
    pub fn value(self) -> u32 {
        self.0
    }
}

impl From<u32> for TrackId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Address of one cluster snapshot in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterRef {
    pub time: usize,
    pub slot: usize,
}

/// One immutable arena entry: the cluster and the id it was given when its
/// frame was ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameEntry {
    pub cluster: Cluster,
    pub track_id: TrackId,
}

// ============================================================================
// TRACK
// ============================================================================

/// The ordered history of clusters sharing one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// The surviving id
    pub id: TrackId,

    /// Arena references, sorted by (time, slot). Several refs may share a
    /// time index after an inherited split.
    pub steps: Vec<ClusterRef>,

    /// Every id merged into this track (transitively)
    pub absorbed_ids: BTreeSet<TrackId>,

    /// Track this one branched off from, if born in a split
    pub parent: Option<TrackId>,
}

impl Track {
    fn new(id: TrackId, parent: Option<TrackId>) -> Self {
        Self {
            id,
            steps: Vec::new(),
            absorbed_ids: BTreeSet::new(),
            parent,
        }
    }

    /// Fold another track's history into this one.
    fn absorb(&mut self, other: Track) {
        self.absorbed_ids.insert(other.id);
        self.absorbed_ids.extend(other.absorbed_ids);
        self.steps.extend(other.steps);
        self.steps.sort();
    }

    pub fn first_time(&self) -> Option<usize> {
        self.steps.first().map(|r| r.time)
    }

    pub fn last_time(&self) -> Option<usize> {
        self.steps.last().map(|r| r.time)
    }

    /// Distinct time indices at which the track has clusters.
    pub fn time_indices(&self) -> BTreeSet<usize> {
        self.steps.iter().map(|r| r.time).collect()
    }

    pub fn num_clusters(&self) -> usize {
        self.steps.len()
    }
}

// ============================================================================
// EVENTS & REPORTS
// ============================================================================

/// Topology change recorded for provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackEvent {
    /// Several tracks collapsed into the one with the smallest id
    Merge {
        time: usize,
        survivor: TrackId,
        absorbed: Vec<TrackId>,
    },

    /// One track linked to several clusters at the next step
    Split {
        time: usize,
        parent: TrackId,
        branches: Vec<TrackId>,
    },
}

/// Summary of one `add_time` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Index of the ingested frame
    pub time: usize,

    /// Clusters stored for this frame
    pub num_clusters: usize,

    /// Input clusters rejected (empty or too large)
    pub dropped: usize,

    /// Ids allocated for clusters with no predecessor
    pub births: Vec<TrackId>,

    /// Components with exactly one predecessor id and one successor
    pub continuations: usize,

    /// Components in which several predecessor ids collapsed
    pub merges: usize,

    /// Components in which one id reached several successors
    pub splits: usize,

    /// Tracks with no successor at this step
    pub ended: Vec<TrackId>,
}

/// Dense `[time][i][j]` label array; 0 means no cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelArray {
    pub times: Range<usize>,
    pub bounds: GridBounds,
    pub layers: Vec<DMatrix<u32>>,
}

impl LabelArray {
    /// (time, i, j) extents.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.layers.len(), self.bounds.num_i(), self.bounds.num_j())
    }

    /// Label at absolute time index `time` and `cell`; 0 when out of range.
    pub fn get(&self, time: usize, cell: Cell) -> u32 {
        if !self.times.contains(&time) {
            return 0;
        }
        match (self.layers.get(time - self.times.start), self.bounds.offset_of(cell)) {
            (Some(layer), Some(offset)) => layer[offset],
            _ => 0,
        }
    }

    /// Distinct non-zero labels across all layers.
    pub fn labels(&self) -> BTreeSet<u32> {
        self.layers
            .iter()
            .flat_map(|layer| layer.iter().copied())
            .filter(|v| *v != 0)
            .collect()
    }
}

// ============================================================================
// TRACK STORE (The Engine)
// ============================================================================

/// Accumulates frames of clusters into persistent tracks.
///
/// Frames must arrive in time order; the store does no synchronization and
/// is meant to be owned by a single caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackStore {
    // === Arena ===

    /// Frame `t` holds its clusters in ingestion order
    frames: Vec<Vec<FrameEntry>>,

    // === Track Index ===

    /// Live and ended tracks, keyed by surviving id
    tracks: BTreeMap<TrackId, Track>,

    /// Merged-away id -> the id that absorbed it
    redirects: BTreeMap<TrackId, TrackId>,

    /// Ids dropped by the mask filter
    removed: BTreeSet<TrackId>,

    /// Merge/split provenance
    events: Vec<TrackEvent>,

    /// Next id to hand out
    next_id: u32,

    // === Configuration ===

    config: TrackingConfig,
}

impl TrackStore {
    /// Create a new TrackStore with the given configuration.
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            frames: Vec::new(),
            tracks: BTreeMap::new(),
            redirects: BTreeMap::new(),
            removed: BTreeSet::new(),
            events: Vec::new(),
            next_id: 1,
            config,
        }
    }

    /// Create a new TrackStore with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(TrackingConfig::default())
    }

    // ========================================================================
    // INGESTION
    // ========================================================================

    /// Ingest the clusters of the next time step and link them to the
    /// previous one.
    ///
    /// `overlap_fraction` overrides `config.overlap_fraction` for same-frame
    /// consolidation. Returns what happened to every track at this step.
    pub fn add_time(
        &mut self,
        clusters: Vec<Cluster>,
        overlap_fraction: Option<f64>,
    ) -> Result<StepReport, TrackingError> {
        let overlap_fraction = overlap_fraction.or(self.config.overlap_fraction);
        if let Some(fraction) = overlap_fraction {
            check_fraction(fraction)?;
        }

        let time = self.frames.len();
        let clusters = self.prepare_frame(clusters, overlap_fraction, time);
        let mut report = StepReport {
            time,
            num_clusters: clusters.len(),
            dropped: clusters.dropped,
            ..Default::default()
        };
        let clusters = clusters.kept;

        // Predecessors: previous frame entries whose track is still present.
        // On the very first frame there are none, so every cluster is a birth.
        let previous: Vec<(usize, TrackId)> = match time.checked_sub(1) {
            Some(prev_time) => self.frames[prev_time]
                .iter()
                .enumerate()
                .map(|(slot, entry)| (slot, self.resolve(entry.track_id)))
                .filter(|(_, id)| !self.removed.contains(id))
                .collect(),
            None => Vec::new(),
        };

        let components = self.link_components(time, &previous, &clusters);

        let mut assigned: Vec<Option<TrackId>> = vec![None; clusters.len()];
        let mut linked_ids: BTreeSet<TrackId> = BTreeSet::new();

        for component in &components {
            // Resolve again: an earlier component of this step may have
            // absorbed one of these ids already
            let mut ids: Vec<TrackId> = component
                .previous
                .iter()
                .map(|&p| self.resolve(previous[p].1))
                .collect();
            ids.sort();
            ids.dedup();
            linked_ids.extend(ids.iter().copied());

            let Some(&survivor) = ids.first() else {
                // Birth: no predecessor (a component then holds one cluster)
                for &n in &component.new {
                    let id = self.allocate(None);
                    assigned[n] = Some(id);
                    report.births.push(id);
                }
                continue;
            };

            if ids.len() > 1 {
                self.absorb(survivor, &ids[1..], time);
                report.merges += 1;
            }

            if component.new.len() == 1 {
                assigned[component.new[0]] = Some(survivor);
                if ids.len() == 1 {
                    report.continuations += 1;
                }
                continue;
            }

            // Split (possibly after a merge)
            let branches = self.split(survivor, &component.new, &clusters);
            for (&n, &id) in component.new.iter().zip(&branches) {
                assigned[n] = Some(id);
            }
            report.splits += 1;
            self.events.push(TrackEvent::Split {
                time,
                parent: survivor,
                branches,
            });
        }

        // Predecessor entries whose id was never linked end their track
        let linked_ids: BTreeSet<TrackId> = linked_ids.into_iter().map(|id| self.resolve(id)).collect();
        let ended: BTreeSet<TrackId> = previous
            .iter()
            .map(|(_, id)| self.resolve(*id))
            .filter(|id| !linked_ids.contains(id))
            .collect();
        report.ended = ended.into_iter().collect();

        // Commit the frame
        let mut entries = Vec::with_capacity(clusters.len());
        for (slot, (cluster, id)) in clusters.into_iter().zip(assigned).enumerate() {
            let track_id = match id {
                Some(id) => id,
                None => self.allocate(None),
            };
            self.tracks
                .entry(track_id)
                .or_insert_with(|| Track::new(track_id, None))
                .steps
                .push(ClusterRef { time, slot });
            entries.push(FrameEntry { cluster, track_id });
        }
        self.frames.push(entries);

        debug!(
            "t={} clusters={} births={} continued={} merges={} splits={} ended={} dropped={}",
            time,
            report.num_clusters,
            report.births.len(),
            report.continuations,
            report.merges,
            report.splits,
            report.ended.len(),
            report.dropped
        );

        Ok(report)
    }

    /// Drop degenerate and oversized clusters, then consolidate.
    fn prepare_frame(&self, clusters: Vec<Cluster>, overlap_fraction: Option<f64>, time: usize) -> PreparedFrame {
        let incoming = clusters.len();
        let mut kept: Vec<Cluster> = clusters.into_iter().filter(|c| !c.is_empty()).collect();
        if kept.len() < incoming {
            warn!("t={}: ignoring {} empty cluster(s)", time, incoming - kept.len());
        }
        if let Some(max_cells) = self.config.max_cluster_cells {
            kept = remove_large_scale(kept, max_cells);
        }
        let dropped = incoming - kept.len();

        if self.config.merge_contained {
            kept = merge_mutually_contained(kept);
        }
        if let Some(fraction) = overlap_fraction {
            kept = merge_overlapping(kept, fraction);
        }
        PreparedFrame { kept, dropped }
    }

    /// Connected components of the previous/new link graph, ordered by the
    /// first new cluster they contain. Components made only of predecessors
    /// are left out: those predecessors have no successor.
    fn link_components(&self, time: usize, previous: &[(usize, TrackId)], clusters: &[Cluster]) -> Vec<Component> {
        let n_prev = previous.len();
        let mut sets = DisjointSet::new(n_prev + clusters.len());

        if let Some(prev_frame) = time.checked_sub(1).and_then(|t| self.frames.get(t)) {
            for (p, &(slot, _)) in previous.iter().enumerate() {
                let before = &prev_frame[slot].cluster;
                for (n, after) in clusters.iter().enumerate() {
                    if before.is_centre_inside_of(after) || after.is_centre_inside_of(before) {
                        sets.union(p, n_prev + n);
                    }
                }
            }
        }

        let mut components: Vec<Component> = Vec::new();
        let mut by_root: BTreeMap<usize, usize> = BTreeMap::new();
        for n in 0..clusters.len() {
            let root = sets.find(n_prev + n);
            let index = *by_root.entry(root).or_insert_with(|| {
                components.push(Component::default());
                components.len() - 1
            });
            components[index].new.push(n);
        }
        for p in 0..n_prev {
            let root = sets.find(p);
            if let Some(&index) = by_root.get(&root) {
                components[index].previous.push(p);
            }
        }
        components
    }

    /// Hand out a fresh id.
    fn allocate(&mut self, parent: Option<TrackId>) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        self.tracks.insert(id, Track::new(id, parent));
        id
    }

    /// Merge `losers` into `survivor` (minimum-id rule, applied by the caller).
    fn absorb(&mut self, survivor: TrackId, losers: &[TrackId], time: usize) {
        for &loser in losers {
            if let Some(track) = self.tracks.remove(&loser) {
                self.tracks
                    .entry(survivor)
                    .or_insert_with(|| Track::new(survivor, None))
                    .absorb(track);
            }
            self.redirects.insert(loser, survivor);
        }
        debug!("t={}: {} absorbed {:?}", time, survivor, losers);
        self.events.push(TrackEvent::Merge {
            time,
            survivor,
            absorbed: losers.to_vec(),
        });
    }

    /// Ids for the branches of a split, in the order of `branches`.
    fn split(&mut self, ancestor: TrackId, branches: &[usize], clusters: &[Cluster]) -> Vec<TrackId> {
        match self.config.split_policy {
            SplitPolicy::Inherit => vec![ancestor; branches.len()],
            SplitPolicy::Branch => {
                // Largest branch keeps the ancestor id; first wins ties
                let mut keeper = 0;
                for (k, &n) in branches.iter().enumerate() {
                    if clusters[n].num_cells() > clusters[branches[keeper]].num_cells() {
                        keeper = k;
                    }
                }
                (0..branches.len())
                    .map(|k| if k == keeper { ancestor } else { self.allocate(Some(ancestor)) })
                    .collect()
            }
        }
    }

    // ========================================================================
    // MASK FILTER
    // ========================================================================

    /// Remove every track whose cells (union over all its time steps) lie
    /// inside `mask` for less than `frac` of their count.
    ///
    /// Whole-track decision. Returns the removed ids.
    pub fn remove_tracks_by_valid_mask(&mut self, mask: &ValidMask, frac: f64) -> Result<Vec<TrackId>, TrackingError> {
        check_fraction(frac)?;

        let doomed: Vec<TrackId> = self
            .tracks
            .keys()
            .copied()
            .filter(|id| {
                let cells = self.track_cells(*id);
                if cells.is_empty() {
                    return true;
                }
                let inside = cells.iter().filter(|c| mask.contains(**c)).count();
                (inside as f64 / cells.len() as f64) < frac
            })
            .collect();

        for id in &doomed {
            self.tracks.remove(id);
            self.removed.insert(*id);
        }
        debug!("Mask filter removed {} of {} tracks", doomed.len(), doomed.len() + self.tracks.len());
        Ok(doomed)
    }

    // ========================================================================
    // EXPORT
    // ========================================================================

    /// Dense label array over `times` and `bounds`.
    ///
    /// Labels are surviving ids; removed tracks are left out. Times past the
    /// last frame give all-zero layers and cells outside `bounds` are
    /// ignored.
    pub fn to_array(&self, times: Range<usize>, bounds: &GridBounds) -> LabelArray {
        let layers = times
            .clone()
            .map(|t| {
                let mut layer = DMatrix::zeros(bounds.num_i(), bounds.num_j());
                for (id, cluster) in self.frame(t) {
                    for cell in cluster.cells() {
                        if let Some(offset) = bounds.offset_of(*cell) {
                            layer[offset] = id.value();
                        }
                    }
                }
                layer
            })
            .collect();

        LabelArray {
            times,
            bounds: *bounds,
            layers,
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn num_time_steps(&self) -> usize {
        self.frames.len()
    }

    /// Number of tracks still present (merged-away and removed ones excluded).
    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn track_ids(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.tracks.keys().copied()
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    /// The track currently carrying `id` (follows merge redirects).
    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&self.resolve(id))
    }

    /// The clusters of a track with their time index, in time order.
    pub fn track_clusters(&self, id: TrackId) -> impl Iterator<Item = (usize, &Cluster)> + '_ {
        self.track(id)
            .into_iter()
            .flat_map(|track| track.steps.iter())
            .filter_map(|r| self.entry(*r).map(|e| (r.time, &e.cluster)))
    }

    /// Union of a track's cells over all time steps.
    pub fn track_cells(&self, id: TrackId) -> BTreeSet<Cell> {
        self.track_clusters(id)
            .flat_map(|(_, cluster)| cluster.cells().iter().copied())
            .collect()
    }

    /// `(surviving id, cluster)` pairs of frame `time`, skipping removed tracks.
    pub fn frame(&self, time: usize) -> impl Iterator<Item = (TrackId, &Cluster)> + '_ {
        self.frames
            .get(time)
            .into_iter()
            .flatten()
            .map(|entry| (self.resolve(entry.track_id), &entry.cluster))
            .filter(|(id, _)| !self.removed.contains(id))
    }

    /// Raw arena entries of frame `time` (ids as assigned at ingestion).
    pub fn frame_entries(&self, time: usize) -> &[FrameEntry] {
        self.frames.get(time).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Distinct ids present in the latest frame.
    pub fn live_track_ids(&self) -> BTreeSet<TrackId> {
        match self.frames.len().checked_sub(1) {
            Some(last) => self.frame(last).map(|(id, _)| id).collect(),
            None => BTreeSet::new(),
        }
    }

    /// Follow merge redirects to the id that currently carries `id`.
    pub fn resolve(&self, mut id: TrackId) -> TrackId {
        while let Some(next) = self.redirects.get(&id) {
            id = *next;
        }
        id
    }

    /// Root of the split genealogy of `id`.
    ///
    /// Parents always carry smaller ids than their branches, so the walk
    /// terminates.
    pub fn ancestor(&self, id: TrackId) -> TrackId {
        let mut id = self.resolve(id);
        while let Some(parent) = self.tracks.get(&id).and_then(|t| t.parent) {
            id = self.resolve(parent);
        }
        id
    }

    pub fn events(&self) -> &[TrackEvent] {
        &self.events
    }

    fn entry(&self, r: ClusterRef) -> Option<&FrameEntry> {
        self.frames.get(r.time)?.get(r.slot)
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    pub fn to_json_string(&self) -> Result<String, TrackingError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_str(json: &str) -> Result<Self, TrackingError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the full state so that a batch run can be resumed.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), TrackingError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, TrackingError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

impl std::fmt::Display for TrackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "TrackStore: {} time steps, {} tracks", self.frames.len(), self.tracks.len())?;
        for track in self.tracks.values() {
            let times: Vec<usize> = track.time_indices().into_iter().collect();
            write!(f, "  {} times={:?} clusters={}", track.id, times, track.num_clusters())?;
            if !track.absorbed_ids.is_empty() {
                write!(f, " absorbed={:?}", track.absorbed_ids.iter().map(|id| id.value()).collect::<Vec<_>>())?;
            }
            if let Some(parent) = track.parent {
                write!(f, " parent={}", parent)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn check_fraction(fraction: f64) -> Result<(), TrackingError> {
    if (0.0..=1.0).contains(&fraction) {
        Ok(())
    } else {
        Err(TrackingError::InvalidFraction(fraction))
    }
}

// ============================================================================
// INTERNALS
// ============================================================================

struct PreparedFrame {
    kept: Vec<Cluster>,
    dropped: usize,
}

impl PreparedFrame {
    fn len(&self) -> usize {
        self.kept.len()
    }
}

/// Indices into the predecessor list and the new cluster list.
#[derive(Debug, Default)]
struct Component {
    previous: Vec<usize>,
    new: Vec<usize>,
}

/// Union-find with path splitting and union by rank.
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            let next = self.parent[x];
            self.parent[x] = self.parent[next];
            x = next;
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let (big, small) = if self.rank[ra] >= self.rank[rb] { (ra, rb) } else { (rb, ra) };
        self.parent[small] = big;
        if self.rank[big] == self.rank[small] {
            self.rank[big] += 1;
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors that can occur during tracking operations.
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("Fraction must lie in [0, 1], got {0}")]
    InvalidFraction(f64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn block(i0: i32, ni: i32, j0: i32, nj: i32) -> Cluster {
        Cluster::new((i0..i0 + ni).flat_map(|i| (j0..j0 + nj).map(move |j| Cell::new(i, j))))
    }

    fn ids(values: &[u32]) -> BTreeSet<TrackId> {
        values.iter().map(|v| TrackId(*v)).collect()
    }

    fn branching() -> TrackStore {
        TrackStore::new(TrackingConfig::default().with_split_policy(SplitPolicy::Branch))
    }

    #[test]
    fn test_track_store_creation() {
        let store = TrackStore::with_defaults();
        assert_eq!(store.num_tracks(), 0);
        assert_eq!(store.num_time_steps(), 0);
        assert!(store.live_track_ids().is_empty());
    }

    #[test]
    fn test_first_frame_births() {
        let mut store = TrackStore::with_defaults();
        let report = store
            .add_time(vec![block(0, 3, 0, 3), block(10, 3, 10, 3), block(20, 2, 0, 2)], None)
            .unwrap();

        assert_eq!(report.births, vec![TrackId(1), TrackId(2), TrackId(3)]);
        assert!(report.ended.is_empty());
        assert_eq!(store.num_tracks(), 3);
        assert_eq!(store.live_track_ids(), ids(&[1, 2, 3]));
    }

    #[test]
    fn test_continuation() {
        let rectangle = block(2, 3, 3, 2);
        let mut store = TrackStore::with_defaults();
        store.add_time(vec![rectangle.clone()], None).unwrap();
        let report = store.add_time(vec![rectangle], None).unwrap();

        assert_eq!(report.continuations, 1);
        assert!(report.births.is_empty());
        assert_eq!(store.num_tracks(), 1);
        assert_eq!(store.num_time_steps(), 2);

        let track = store.track(TrackId(1)).unwrap();
        assert_eq!(track.time_indices(), BTreeSet::from([0, 1]));
        assert_eq!(store.track_clusters(TrackId(1)).count(), 2);
    }

    #[test]
    fn test_merge_keeps_minimum_id() {
        let mut store = TrackStore::with_defaults();
        store.add_time(vec![block(0, 3, 0, 3), block(0, 3, 6, 3)], None).unwrap();
        let report = store.add_time(vec![block(0, 3, 0, 9)], None).unwrap();

        assert_eq!(report.merges, 1);
        assert!(report.ended.is_empty());
        assert_eq!(store.num_tracks(), 1);
        assert_eq!(store.live_track_ids(), ids(&[1]));

        // Provenance: 2 now redirects to 1 and its history was folded in
        assert_eq!(store.resolve(TrackId(2)), TrackId(1));
        let track = store.track(TrackId(2)).unwrap();
        assert_eq!(track.id, TrackId(1));
        assert!(track.absorbed_ids.contains(&TrackId(2)));
        assert_eq!(track.num_clusters(), 3);
        assert_eq!(
            store.events(),
            &[TrackEvent::Merge { time: 1, survivor: TrackId(1), absorbed: vec![TrackId(2)] }]
        );
    }

    #[test]
    fn test_absorbed_id_is_never_reallocated() {
        let mut store = TrackStore::with_defaults();
        store.add_time(vec![block(0, 3, 0, 3), block(0, 3, 6, 3)], None).unwrap();
        store.add_time(vec![block(0, 3, 0, 9)], None).unwrap();
        let report = store.add_time(vec![block(0, 3, 0, 9), block(30, 2, 30, 2)], None).unwrap();

        assert_eq!(report.births, vec![TrackId(3)]);
        assert_eq!(store.live_track_ids(), ids(&[1, 3]));
    }

    #[test]
    fn test_split_inherits_ancestor_id() {
        let mut store = TrackStore::with_defaults();
        store.add_time(vec![block(0, 3, 0, 9)], None).unwrap();
        let report = store.add_time(vec![block(0, 3, 0, 3), block(0, 3, 6, 3)], None).unwrap();

        assert_eq!(report.splits, 1);
        assert_eq!(store.num_tracks(), 1);
        assert_eq!(store.live_track_ids(), ids(&[1]));
        assert_eq!(store.frame(1).count(), 2);
        assert_eq!(store.track(TrackId(1)).unwrap().num_clusters(), 3);
    }

    #[test]
    fn test_split_with_branch_identities() {
        let mut store = branching();
        store.add_time(vec![block(0, 3, 0, 9)], None).unwrap();
        store.add_time(vec![block(0, 3, 0, 3), block(0, 3, 6, 3)], None).unwrap();

        let live = store.live_track_ids();
        assert_eq!(live.len(), 2);
        for id in &live {
            assert_eq!(store.ancestor(*id), TrackId(1));
        }
        assert_eq!(store.track(TrackId(2)).unwrap().parent, Some(TrackId(1)));
        assert_eq!(
            store.events(),
            &[TrackEvent::Split { time: 1, parent: TrackId(1), branches: vec![TrackId(1), TrackId(2)] }]
        );
    }

    #[test]
    fn test_branch_split_largest_keeps_id() {
        let mut store = branching();
        store.add_time(vec![block(0, 3, 0, 9)], None).unwrap();
        // Second branch is larger
        store.add_time(vec![block(0, 2, 0, 2), block(0, 3, 5, 4)], None).unwrap();

        let frame: Vec<(TrackId, usize)> = store.frame(1).map(|(id, c)| (id, c.num_cells())).collect();
        assert_eq!(frame, vec![(TrackId(2), 4), (TrackId(1), 12)]);
    }

    #[test]
    fn test_merge_then_split() {
        // A and B fuse into X while B also continues into Y
        let mut store = TrackStore::with_defaults();
        store.add_time(vec![block(0, 3, 0, 3), block(0, 3, 6, 3)], None).unwrap();
        let report = store.add_time(vec![block(0, 3, 0, 8), block(0, 3, 8, 2)], None).unwrap();

        assert_eq!(report.merges, 1);
        assert_eq!(report.splits, 1);
        assert_eq!(store.live_track_ids(), ids(&[1]));

        let mut store = branching();
        store.add_time(vec![block(0, 3, 0, 3), block(0, 3, 6, 3)], None).unwrap();
        store.add_time(vec![block(0, 3, 0, 8), block(0, 3, 8, 2)], None).unwrap();

        // Survivor 1 goes to the larger branch; the other is a fresh id
        let frame: Vec<TrackId> = store.frame(1).map(|(id, _)| id).collect();
        assert_eq!(frame, vec![TrackId(1), TrackId(3)]);
        assert_eq!(store.ancestor(TrackId(3)), TrackId(1));
        assert_eq!(store.ancestor(TrackId(2)), TrackId(1));
    }

    #[test]
    fn test_shared_id_predecessors_count_once() {
        let mut store = TrackStore::with_defaults();
        store.add_time(vec![block(0, 3, 0, 9)], None).unwrap();
        store.add_time(vec![block(0, 3, 0, 3), block(0, 3, 6, 3)], None).unwrap();
        let report = store.add_time(vec![block(0, 3, 0, 9)], None).unwrap();

        assert_eq!(report.merges, 0);
        assert_eq!(report.continuations, 1);
        assert_eq!(store.num_tracks(), 1);
    }

    #[test]
    fn test_birth_and_death() {
        let mut store = TrackStore::with_defaults();
        store.add_time(vec![block(0, 3, 0, 3)], None).unwrap();
        let report = store.add_time(vec![block(20, 3, 20, 3)], None).unwrap();

        assert_eq!(report.births, vec![TrackId(2)]);
        assert_eq!(report.ended, vec![TrackId(1)]);
        assert_eq!(store.num_tracks(), 2);
        assert_eq!(store.track(TrackId(1)).unwrap().last_time(), Some(0));
    }

    #[test]
    fn test_independent_rectangles() {
        let rect1 = Cluster::new([(2, 3), (3, 3), (4, 3), (2, 4), (3, 4), (4, 4)].map(Cell::from));
        let rect2 = Cluster::new([(6, 3), (7, 3), (8, 3), (6, 4), (7, 4), (8, 4)].map(Cell::from));
        let rect3 = Cluster::new([(3, 4), (4, 4), (5, 4), (3, 5), (4, 5), (5, 5)].map(Cell::from));

        let mut store = TrackStore::with_defaults();
        store.add_time(vec![rect1, rect2], None).unwrap();
        let report = store.add_time(vec![rect3], None).unwrap();

        assert_eq!(report.births, vec![TrackId(3)]);
        assert_eq!(report.ended, vec![TrackId(1), TrackId(2)]);
        assert_eq!(store.num_tracks(), 3);
    }

    #[test]
    fn test_empty_and_oversized_clusters_dropped() {
        let mut store = TrackStore::new(TrackingConfig::default().with_max_cluster_cells(20));
        let report = store
            .add_time(vec![Cluster::empty(), block(0, 2, 0, 2), block(10, 5, 10, 5)], None)
            .unwrap();

        assert_eq!(report.dropped, 2);
        assert_eq!(report.num_clusters, 1);
        assert_eq!(store.frame_entries(0).len(), 1);
    }

    #[test]
    fn test_overlap_fraction_consolidates_frame() {
        let mut store = TrackStore::with_defaults();
        let report = store.add_time(vec![block(0, 3, 0, 3), block(0, 3, 0, 9)], Some(0.8)).unwrap();
        assert_eq!(report.num_clusters, 1);
        assert_eq!(report.births.len(), 1);

        assert!(matches!(
            store.add_time(vec![block(0, 1, 0, 1)], Some(1.5)),
            Err(TrackingError::InvalidFraction(_))
        ));
        // A rejected call ingests nothing
        assert_eq!(store.num_time_steps(), 1);
    }

    #[test]
    fn test_remove_tracks_by_valid_mask() {
        let mut store = TrackStore::with_defaults();
        // Track 1: rows 0..1, only row 0 valid -> 0.5
        // Track 2: rows 10..11, one of ten cells invalid -> 0.9
        let half = block(0, 2, 0, 5);
        let most = block(10, 2, 0, 5);
        store.add_time(vec![half.clone(), most.clone()], None).unwrap();
        store.add_time(vec![half, most], None).unwrap();

        let mask = ValidMask::from_fn(GridBounds::from_shape(20, 20), |c| {
            c.i == 0 || (c.i >= 10 && !(c.i == 11 && c.j == 4))
        });
        let removed = store.remove_tracks_by_valid_mask(&mask, 0.8).unwrap();

        assert_eq!(removed, vec![TrackId(1)]);
        assert_eq!(store.num_tracks(), 1);
        assert!(store.track(TrackId(1)).is_none());
        assert_eq!(store.frame(0).map(|(id, _)| id).collect::<Vec<_>>(), vec![TrackId(2)]);

        let labels = store.to_array(0..2, &GridBounds::from_shape(20, 20)).labels();
        assert_eq!(labels, BTreeSet::from([2]));
    }

    #[test]
    fn test_removed_track_is_not_continued() {
        let mut store = TrackStore::with_defaults();
        let half = block(0, 2, 0, 5);
        let most = block(10, 2, 0, 5);
        store.add_time(vec![half.clone(), most.clone()], None).unwrap();

        let mask = ValidMask::from_fn(GridBounds::from_shape(20, 20), |c| c.i >= 10);
        assert_eq!(store.remove_tracks_by_valid_mask(&mask, 0.8).unwrap(), vec![TrackId(1)]);

        // Same cells as the removed track: a fresh track, not a continuation
        let report = store.add_time(vec![half, most], None).unwrap();
        assert_eq!(report.births, vec![TrackId(3)]);
        assert_eq!(report.continuations, 1);
        assert!(store.track(TrackId(1)).is_none());
        assert_eq!(store.live_track_ids(), ids(&[2, 3]));
    }

    #[test]
    fn test_contained_merge_option() {
        // Concentric blocks: each centre sits inside the other's ellipse
        let frame = vec![block(0, 4, 0, 4), block(1, 2, 1, 2), block(20, 2, 20, 2)];

        let mut store = TrackStore::new(TrackingConfig::default().with_contained_merge(true));
        let report = store.add_time(frame.clone(), None).unwrap();
        assert_eq!(report.num_clusters, 2);
        assert_eq!(report.births, vec![TrackId(1), TrackId(2)]);
        assert_eq!(store.track_cells(TrackId(1)).len(), 16);

        let mut plain = TrackStore::with_defaults();
        assert_eq!(plain.add_time(frame, None).unwrap().num_clusters, 3);
    }

    #[test]
    fn test_configured_overlap_fraction_used_by_default() {
        let config = TrackingConfig::default().with_overlap_fraction(0.8);
        let mut store = TrackStore::new(config);
        let report = store.add_time(vec![block(0, 3, 0, 3), block(0, 3, 0, 9)], None).unwrap();
        assert_eq!(report.num_clusters, 1);
        assert_eq!(report.births, vec![TrackId(1)]);
        assert_eq!(store.frame_entries(0).len(), 1);

        // Without a configured fraction the same frame keeps both clusters
        let mut plain = TrackStore::with_defaults();
        let report = plain.add_time(vec![block(0, 3, 0, 3), block(0, 3, 0, 9)], None).unwrap();
        assert_eq!(report.num_clusters, 2);
    }

    #[test]
    fn test_to_array_labels() {
        let mut store = TrackStore::with_defaults();
        store.add_time(vec![block(0, 2, 0, 2), block(5, 1, 5, 1)], None).unwrap();
        store.add_time(vec![block(0, 2, 0, 2)], None).unwrap();

        let bounds = GridBounds::new(0, 4, 0, 4);
        let array = store.to_array(0..3, &bounds);

        assert_eq!(array.shape(), (3, 5, 5));
        assert_eq!(array.get(0, Cell::new(1, 1)), 1);
        assert_eq!(array.get(1, Cell::new(0, 1)), 1);
        assert_eq!(array.get(0, Cell::new(2, 2)), 0);
        // Track 2 lies outside the bounds
        assert_eq!(array.labels(), BTreeSet::from([1]));
        // Past the last frame: all zeros
        assert!(array.layers[2].iter().all(|v| *v == 0));
        assert_eq!(array.get(7, Cell::new(0, 0)), 0);
    }

    #[test]
    fn test_to_array_uses_surviving_ids() {
        let mut store = TrackStore::with_defaults();
        store.add_time(vec![block(0, 3, 0, 3), block(0, 3, 6, 3)], None).unwrap();
        store.add_time(vec![block(0, 3, 0, 9)], None).unwrap();

        let array = store.to_array(0..2, &GridBounds::from_shape(3, 9));
        // The absorbed track is relabelled in history too
        assert_eq!(array.get(0, Cell::new(1, 7)), 1);
        assert_eq!(array.labels(), BTreeSet::from([1]));
        // The arena itself is untouched
        assert_eq!(store.frame_entries(0)[1].track_id, TrackId(2));
    }

    #[test]
    fn test_rasterize_round_trip_through_array() {
        let cluster = Cluster::new([(3, 8), (3, 9), (4, 7), (4, 8), (5, 7), (6, 9)].map(Cell::from));
        let bounds = *cluster.bounds().unwrap();
        let mut store = TrackStore::with_defaults();
        store.add_time(vec![cluster.clone()], None).unwrap();

        let array = store.to_array(0..1, &bounds);
        let mut cells = BTreeSet::new();
        for r in 0..bounds.num_i() {
            for c in 0..bounds.num_j() {
                if array.layers[0][(r, c)] != 0 {
                    cells.insert(bounds.cell_at(r, c));
                }
            }
        }
        assert_eq!(&cells, cluster.cells());
    }

    #[test]
    fn test_json_round_trip() {
        let mut store = branching();
        store.add_time(vec![block(0, 3, 0, 9)], None).unwrap();
        store.add_time(vec![block(0, 3, 0, 3), block(0, 3, 6, 3)], None).unwrap();

        let json = store.to_json_string().unwrap();
        let restored = TrackStore::from_json_str(&json).unwrap();

        let bounds = GridBounds::from_shape(3, 9);
        assert_eq!(restored.to_array(0..2, &bounds), store.to_array(0..2, &bounds));
        assert_eq!(restored.events(), store.events());
        assert_eq!(restored.config(), store.config());
    }

    #[test]
    fn test_save_and_load_file() {
        let path = std::env::temp_dir().join(format!("stormtrack_store_{}.json", std::process::id()));
        let mut store = TrackStore::with_defaults();
        store.add_time(vec![block(0, 2, 0, 2)], None).unwrap();
        store.save_json(&path).unwrap();

        let mut restored = TrackStore::load_json(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        // Resumes where it left off
        let report = restored.add_time(vec![block(0, 2, 0, 2)], None).unwrap();
        assert_eq!(report.continuations, 1);
        assert_eq!(restored.num_time_steps(), 2);
    }

    #[test]
    fn test_display_lists_tracks() {
        let mut store = TrackStore::with_defaults();
        store.add_time(vec![block(0, 3, 0, 3), block(0, 3, 6, 3)], None).unwrap();
        store.add_time(vec![block(0, 3, 0, 9)], None).unwrap();

        let text = store.to_string();
        assert!(text.contains("2 time steps, 1 tracks"));
        assert!(text.contains("absorbed=[2]"));
    }
}
