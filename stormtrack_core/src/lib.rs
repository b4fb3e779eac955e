//! StormTrack Core - Storm-Cell Tracking on Gridded Fields
//!
//! This library follows connected regions of a thresholded field (storm
//! cells) through time:
//! 1. **Shape**: every region is summarised by an inertia ellipse with an
//!    extended "halo" for small cells
//! 2. **Frame**: same-frame consolidation of clusters that describe one cell
//! 3. **Time**: clusters of consecutive frames are linked when either
//!    centroid is inside the other's ellipse, giving persistent,
//!    never-reused track ids that survive merges and splits

pub mod stormtrack_grid;
pub mod stormtrack_ellipse;
pub mod stormtrack_cluster;
pub mod stormtrack_frame;
pub mod stormtrack_tracking;

// Re-export key types for convenience
pub use stormtrack_grid::{Cell, GridBounds, GridError, ValidMask};
pub use stormtrack_ellipse::{Ellipse, GeometryError, Polyline};
pub use stormtrack_cluster::{Cluster, Raster, DEFAULT_MIN_AXIS};
pub use stormtrack_frame::{filter_by_mask, merge_mutually_contained, merge_overlapping, remove_large_scale};
pub use stormtrack_tracking::{
    ClusterRef, FrameEntry, LabelArray, SplitPolicy, StepReport, Track, TrackEvent, TrackId, TrackStore,
    TrackingConfig, TrackingError,
};
