//! Same-frame consolidation of cluster lists.
//!
//! An extractor can hand over several clusters that describe one physical
//! cell (e.g. two watershed basins sharing a core). These helpers clean a
//! single frame before it is linked in time. All of them keep input order
//! for the clusters that survive, so downstream id allocation stays
//! deterministic.

use crate::stormtrack_cluster::Cluster;
use crate::stormtrack_grid::ValidMask;
use tracing::debug;

/// Merge pairs whose centres are each inside the other's ellipse, until no
/// such pair remains.
pub fn merge_mutually_contained(clusters: Vec<Cluster>) -> Vec<Cluster> {
    merge_while(clusters, |a, b| a.is_centre_inside_of(b) && b.is_centre_inside_of(a))
}

/// Merge pairs where the smaller cluster has at least `overlap_fraction` of
/// its cells inside the larger one's ellipse, until no such pair remains.
pub fn merge_overlapping(clusters: Vec<Cluster>, overlap_fraction: f64) -> Vec<Cluster> {
    merge_while(clusters, |a, b| {
        let (small, large) = if a.num_cells() < b.num_cells() { (a, b) } else { (b, a) };
        small.ellipse_overlap(large) >= overlap_fraction
    })
}

/// Drop clusters with more than `max_cells` cells (large-scale systems).
pub fn remove_large_scale(clusters: Vec<Cluster>, max_cells: usize) -> Vec<Cluster> {
    clusters.into_iter().filter(|c| c.num_cells() <= max_cells).collect()
}

/// Keep clusters with at least `frac` of their cells valid in `mask`.
pub fn filter_by_mask(clusters: Vec<Cluster>, mask: &ValidMask, frac: f64) -> Vec<Cluster> {
    clusters.into_iter().filter(|c| c.mask_overlap(mask) >= frac).collect()
}

/// Repeatedly fold the later cluster of the first matching pair into the
/// earlier one. Each merge changes a shape, so the scan restarts.
fn merge_while<F>(mut clusters: Vec<Cluster>, should_merge: F) -> Vec<Cluster>
where
    F: Fn(&Cluster, &Cluster) -> bool,
{
    clusters.retain(|c| !c.is_empty());

    'scan: loop {
        for i in 0..clusters.len() {
            for j in (i + 1)..clusters.len() {
                if should_merge(&clusters[i], &clusters[j]) {
                    let absorbed = clusters.remove(j);
                    debug!(
                        "Consolidating cluster {} ({} cells) into {} ({} cells)",
                        j,
                        absorbed.num_cells(),
                        i,
                        clusters[i].num_cells()
                    );
                    clusters[i].merge_in_place(&absorbed);
                    continue 'scan;
                }
            }
        }
        return clusters;
    }
}
