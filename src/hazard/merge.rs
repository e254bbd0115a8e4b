use rstar::RTree;
use rstar::primitives::GeomWithData;

use super::Hazard;
use crate::geometry::{BoundingBox, IndexedPoint};

/// Two reports from different sources closer than this are the same hazard.
pub const DEFAULT_DEDUP_THRESHOLD_M: f64 = 25.0;

/// Deduplicates hazards reported by more than one source.
#[derive(Debug, Clone, Copy)]
pub struct HazardMerger {
    threshold_m: f64,
}

impl Default for HazardMerger {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_THRESHOLD_M)
    }
}

impl HazardMerger {
    pub fn new(threshold_m: f64) -> Self {
        Self {
            threshold_m: if threshold_m.is_finite() { threshold_m.max(0.0) } else { DEFAULT_DEDUP_THRESHOLD_M },
        }
    }

    /// Folds each `secondary` hazard into the nearest `primary` hazard of another
    /// source within the threshold; the rest are appended in order.
    ///
    /// The primary entry keeps its identity and text. It takes the higher
    /// severity and the union of the traffic/weather flags, and records the
    /// absorbed source. A primary absorbs at most one hazard per source.
    pub fn merge(&self, primary: &[Hazard], secondary: &[Hazard]) -> Vec<Hazard> {
        let mut merged: Vec<Hazard> = primary.to_vec();
        let tree: RTree<IndexedPoint> = RTree::bulk_load(
            primary
                .iter()
                .enumerate()
                .map(|(idx, hazard)| GeomWithData::new([hazard.longitude, hazard.latitude], idx))
                .collect(),
        );

        let mut appended = Vec::new();
        for hazard in secondary {
            match self.find_match(&tree, &merged, hazard) {
                Some(idx) => absorb(&mut merged[idx], hazard),
                None => appended.push(hazard.clone()),
            }
        }

        merged.extend(appended);
        merged
    }

    fn find_match(&self, tree: &RTree<IndexedPoint>, merged: &[Hazard], hazard: &Hazard) -> Option<usize> {
        let location = hazard.location();
        let envelope = BoundingBox::around(location, self.threshold_m).envelope();

        tree.locate_in_envelope_intersecting(&envelope)
            .map(|point| point.data)
            .filter(|&idx| !merged[idx].sources().any(|source| source == hazard.source))
            .map(|idx| (idx, merged[idx].location().distance_m(&location)))
            .filter(|(_, distance)| *distance <= self.threshold_m)
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .map(|(idx, _)| idx)
    }
}

fn absorb(target: &mut Hazard, other: &Hazard) {
    target.severity = target.severity.max(other.severity);
    target.affects_traffic |= other.affects_traffic;
    target.weather_related |= other.weather_related;
    if target.description.is_empty() {
        target.description = other.description.clone();
    }
    target.merged_sources.push(other.source);
    target.merged_sources.extend(other.merged_sources.iter().copied());
}

/// Merges community reports with OSM hazards using the default threshold.
pub fn merge_hazards(community: &[Hazard], osm: &[Hazard]) -> Vec<Hazard> {
    HazardMerger::default().merge(community, osm)
}
