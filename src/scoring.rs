//! Route safety classification.
//!
//! A route is cut into short segments. Every segment gets an exposure in
//! `[0, 1]` for each of four factors (crime, collision, lighting, general
//! hazards) from the hazards around it and the heuristic grid. The factor
//! weights for the time of day fold those into one danger score per segment,
//! and the route score is the length-weighted mean over its segments.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{Local, NaiveTime, Timelike};
use rstar::RTree;
use rstar::primitives::GeomWithData;
use serde::{Deserialize, Serialize};

use crate::geometry::{BoundingBox, Coordinate, IndexedPoint, PathSegment, split_into_segments};
use crate::hazard::{Hazard, HazardCategory};
use crate::routing::TravelMode;
use crate::safety::SafetyMap;

/// Segment score above which a stretch of route is worth avoiding.
pub const DEFAULT_DANGER_THRESHOLD: f64 = 0.20;
pub const DEFAULT_SEGMENT_LENGTH_M: f64 = 100.0;
/// Hazards further than this from a segment do not affect it.
pub const DEFAULT_INFLUENCE_RADIUS_M: f64 = 75.0;
const CYCLING_COLLISION_FACTOR: f64 = 1.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeOfDay {
    Day,
    Night,
    MorningRush,
    EveningRush,
}

impl TimeOfDay {
    pub const ALL: [TimeOfDay; 4] = [TimeOfDay::Day, TimeOfDay::Night, TimeOfDay::MorningRush, TimeOfDay::EveningRush];

    /// Buckets a wall-clock time: night 22:00-06:00, morning rush 07:00-09:30,
    /// evening rush 16:30-19:00, day otherwise.
    pub fn detect(time: NaiveTime) -> Self {
        let minutes = time.hour() * 60 + time.minute();
        match minutes {
            m if m >= 22 * 60 || m < 6 * 60 => TimeOfDay::Night,
            m if (7 * 60..9 * 60 + 30).contains(&m) => TimeOfDay::MorningRush,
            m if (16 * 60 + 30..19 * 60).contains(&m) => TimeOfDay::EveningRush,
            _ => TimeOfDay::Day,
        }
    }

    pub fn now() -> Self {
        Self::detect(Local::now().time())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeOfDay::Day => "day",
            TimeOfDay::Night => "night",
            TimeOfDay::MorningRush => "morning-rush",
            TimeOfDay::EveningRush => "evening-rush",
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "day" => Ok(TimeOfDay::Day),
            "night" => Ok(TimeOfDay::Night),
            "morning-rush" | "morningrush" => Ok(TimeOfDay::MorningRush),
            "evening-rush" | "eveningrush" => Ok(TimeOfDay::EveningRush),
            other => Err(format!("unknown time of day '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorWeights {
    pub crime: f64,
    pub collision: f64,
    pub lighting: f64,
    pub hazard: f64,
}

impl FactorWeights {
    pub fn total(&self) -> f64 {
        self.crime + self.collision + self.lighting + self.hazard
    }

    fn apply(&self, factors: &FactorScores) -> f64 {
        self.crime * factors.crime
            + self.collision * factors.collision
            + self.lighting * factors.lighting
            + self.hazard * factors.hazard
    }
}

/// Weight of each safety factor for a time of day. Always sums to 1.0.
pub fn get_factor_weights(time_of_day: TimeOfDay) -> FactorWeights {
    match time_of_day {
        TimeOfDay::Day => FactorWeights { crime: 0.35, collision: 0.30, lighting: 0.10, hazard: 0.25 },
        TimeOfDay::Night => FactorWeights { crime: 0.35, collision: 0.15, lighting: 0.35, hazard: 0.15 },
        TimeOfDay::MorningRush | TimeOfDay::EveningRush => {
            FactorWeights { crime: 0.15, collision: 0.40, lighting: 0.15, hazard: 0.30 }
        }
    }
}

/// Exposure to each factor, every value in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FactorScores {
    pub crime: f64,
    pub collision: f64,
    pub lighting: f64,
    pub hazard: f64,
}

impl FactorScores {
    fn scaled(&self, by: f64) -> Self {
        Self {
            crime: self.crime * by,
            collision: self.collision * by,
            lighting: self.lighting * by,
            hazard: self.hazard * by,
        }
    }

    fn add(&mut self, other: &FactorScores) {
        self.crime += other.crime;
        self.collision += other.collision;
        self.lighting += other.lighting;
        self.hazard += other.hazard;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentScore {
    pub midpoint: Coordinate,
    pub bearing: f64,
    pub length_m: f64,
    pub factors: FactorScores,
    pub score: f64,
}

/// Consecutive segments above the danger threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskRun {
    pub start: Coordinate,
    pub end: Coordinate,
    /// Midpoint of the worst segment in the run.
    pub peak_at: Coordinate,
    pub peak_bearing: f64,
    pub peak_score: f64,
    pub length_m: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteAssessment {
    pub score: f64,
    pub factors: FactorScores,
    pub segments: Vec<SegmentScore>,
    pub high_risk_runs: Vec<RiskRun>,
    pub hazards_nearby: usize,
}

impl RouteAssessment {
    pub fn rating(&self) -> f64 {
        safety_rating(self.score)
    }
}

/// User-facing 0-10 rating, 10 being safest. Strictly decreasing in `score`.
pub fn safety_rating(score: f64) -> f64 {
    10.0 * (1.0 - score.clamp(0.0, 1.0))
}

/// Hazards indexed by location, built once and shared by every route scored
/// against the same set.
pub struct HazardIndex<'a> {
    hazards: &'a [Hazard],
    tree: RTree<IndexedPoint>,
}

impl<'a> HazardIndex<'a> {
    pub fn new(hazards: &'a [Hazard]) -> Self {
        let tree = RTree::bulk_load(
            hazards
                .iter()
                .enumerate()
                .map(|(idx, hazard)| GeomWithData::new([hazard.longitude, hazard.latitude], idx))
                .collect(),
        );
        Self { hazards, tree }
    }

    pub fn len(&self) -> usize {
        self.hazards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hazards.is_empty()
    }

    /// Hazards whose location may lie within `radius_m` of `piece`.
    fn candidates(&self, piece: &PathSegment, radius_m: f64) -> impl Iterator<Item = (usize, &'a Hazard)> + '_ {
        let envelope = BoundingBox::covering(&piece.points).map(|bbox| bbox.expand(radius_m).envelope());
        let hazards = self.hazards;
        envelope
            .into_iter()
            .flat_map(move |envelope| self.tree.locate_in_envelope_intersecting(&envelope).map(|p| p.data))
            .map(move |idx| (idx, &hazards[idx]))
    }
}

/// Scores routes against hazards, the heuristic grid and factor weights.
#[derive(Debug, Clone)]
pub struct RouteClassifier {
    safety_map: Arc<SafetyMap>,
    segment_length_m: f64,
    influence_radius_m: f64,
}

impl Default for RouteClassifier {
    fn default() -> Self {
        Self::new(Arc::new(SafetyMap::new()))
    }
}

impl RouteClassifier {
    pub fn new(safety_map: Arc<SafetyMap>) -> Self {
        Self {
            safety_map,
            segment_length_m: DEFAULT_SEGMENT_LENGTH_M,
            influence_radius_m: DEFAULT_INFLUENCE_RADIUS_M,
        }
    }

    pub fn classify(
        &self,
        path: &[Coordinate],
        hazards: &[Hazard],
        weights: &FactorWeights,
        mode: TravelMode,
        danger_threshold: f64,
    ) -> RouteAssessment {
        self.classify_indexed(path, &HazardIndex::new(hazards), weights, mode, danger_threshold)
    }

    pub fn classify_indexed(
        &self,
        path: &[Coordinate],
        hazards: &HazardIndex<'_>,
        weights: &FactorWeights,
        mode: TravelMode,
        danger_threshold: f64,
    ) -> RouteAssessment {
        let mut pieces = split_into_segments(path, self.segment_length_m);
        if pieces.is_empty() {
            if let Some(point) = path.first() {
                pieces.push(PathSegment { points: vec![*point], length_m: 0.0 });
            }
        }

        let mut nearby = vec![false; hazards.len()];
        let segments: Vec<SegmentScore> = pieces
            .iter()
            .map(|piece| self.score_segment(piece, hazards, weights, mode, &mut nearby))
            .collect();

        let total_length: f64 = segments.iter().map(|s| s.length_m).sum();
        let mut factors = FactorScores::default();
        let score = if total_length > 0.0 {
            for segment in &segments {
                factors.add(&segment.factors.scaled(segment.length_m / total_length));
            }
            segments.iter().map(|s| s.score * s.length_m).sum::<f64>() / total_length
        } else if !segments.is_empty() {
            let n = segments.len() as f64;
            for segment in &segments {
                factors.add(&segment.factors.scaled(1.0 / n));
            }
            segments.iter().map(|s| s.score).sum::<f64>() / n
        } else {
            0.0
        };

        RouteAssessment {
            score: score.clamp(0.0, 1.0),
            factors,
            high_risk_runs: risk_runs(&pieces, &segments, danger_threshold),
            segments,
            hazards_nearby: nearby.iter().filter(|hit| **hit).count(),
        }
    }

    fn score_segment(
        &self,
        piece: &PathSegment,
        hazards: &HazardIndex<'_>,
        weights: &FactorWeights,
        mode: TravelMode,
        nearby: &mut [bool],
    ) -> SegmentScore {
        let mut load = FactorScores::default();
        for (idx, hazard) in hazards.candidates(piece, self.influence_radius_m) {
            let distance = piece.distance_to_m(hazard.location());
            if distance >= self.influence_radius_m {
                continue;
            }
            nearby[idx] = true;
            let contribution = hazard.severity.weight() * (1.0 - distance / self.influence_radius_m);
            match hazard.category() {
                HazardCategory::Crime => load.crime += contribution,
                HazardCategory::Collision => load.collision += contribution,
                HazardCategory::Lighting => load.lighting += contribution,
                HazardCategory::General => load.hazard += contribution,
            }
        }

        let midpoint = piece.midpoint();
        let grid = self.safety_map.cell_risk(midpoint.lat, midpoint.lon);
        let collision_factor = match mode {
            TravelMode::Cycling => CYCLING_COLLISION_FACTOR,
            TravelMode::Walking => 1.0,
        };
        let factors = FactorScores {
            crime: saturate(load.crime).max(f64::from(grid.crime)),
            collision: (saturate(load.collision) * collision_factor).min(1.0),
            lighting: saturate(load.lighting).max(f64::from(grid.darkness)),
            hazard: saturate(load.hazard),
        };

        SegmentScore {
            midpoint,
            bearing: piece.bearing(),
            length_m: piece.length_m,
            score: weights.apply(&factors).clamp(0.0, 1.0),
            factors,
        }
    }
}

fn saturate(load: f64) -> f64 {
    1.0 - (-load).exp()
}

fn risk_runs(pieces: &[PathSegment], segments: &[SegmentScore], threshold: f64) -> Vec<RiskRun> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (idx, segment) in segments.iter().enumerate() {
        if segment.score <= threshold {
            continue;
        }
        match groups.last_mut() {
            Some(group) if group.last().is_some_and(|last| last + 1 == idx) => group.push(idx),
            _ => groups.push(vec![idx]),
        }
    }

    groups
        .into_iter()
        .filter_map(|group| {
            let first = *group.first()?;
            let last = *group.last()?;
            let peak = group
                .iter()
                .copied()
                .max_by(|a, b| segments[*a].score.total_cmp(&segments[*b].score))?;
            Some(RiskRun {
                start: pieces[first].points.first().copied().unwrap_or(segments[first].midpoint),
                end: pieces[last].points.last().copied().unwrap_or(segments[last].midpoint),
                peak_at: segments[peak].midpoint,
                peak_bearing: segments[peak].bearing,
                peak_score: segments[peak].score,
                length_m: group.iter().map(|idx| segments[*idx].length_m).sum(),
            })
        })
        .collect()
}

/// Danger score of `path` in `[0, 1]` with no heuristic grid, for walking.
pub fn classify_route_safety(path: &[Coordinate], hazards: &[Hazard], weights: &FactorWeights) -> f64 {
    RouteClassifier::default()
        .classify(path, hazards, weights, TravelMode::Walking, DEFAULT_DANGER_THRESHOLD)
        .score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hazard::{HazardSource, Severity};
    use crate::safety::SafetyCellRecord;

    fn straight_path() -> Vec<Coordinate> {
        (0..=20).map(|i| Coordinate::new(51.5, -0.13 + i as f64 * 0.0005)).collect()
    }

    fn hazard(kind: &str, at: Coordinate, severity: Severity) -> Hazard {
        Hazard::new(HazardSource::Community, kind, at, kind, severity)
    }

    #[test]
    fn weights_sum_to_one_for_every_time_of_day() {
        for tod in TimeOfDay::ALL {
            let w = get_factor_weights(tod);
            assert!((w.total() - 1.0).abs() < 1e-9, "{tod}: {}", w.total());
            assert!(w.crime >= 0.0 && w.collision >= 0.0 && w.lighting >= 0.0 && w.hazard >= 0.0);
        }
    }

    #[test]
    fn night_maximizes_and_day_minimizes_lighting() {
        let lighting: Vec<f64> = TimeOfDay::ALL.iter().map(|t| get_factor_weights(*t).lighting).collect();
        let max = lighting.iter().cloned().fold(f64::MIN, f64::max);
        let min = lighting.iter().cloned().fold(f64::MAX, f64::min);
        assert_eq!(get_factor_weights(TimeOfDay::Night).lighting, max);
        assert_eq!(get_factor_weights(TimeOfDay::Day).lighting, min);
    }

    #[test]
    fn rush_hours_maximize_collision_and_hazard() {
        let day = get_factor_weights(TimeOfDay::Day);
        for rush in [TimeOfDay::MorningRush, TimeOfDay::EveningRush] {
            let w = get_factor_weights(rush);
            for other in TimeOfDay::ALL {
                assert!(w.collision >= get_factor_weights(other).collision);
                assert!(w.hazard >= get_factor_weights(other).hazard);
            }
            assert!(w.collision >= day.collision && w.hazard >= day.hazard);
        }
    }

    #[test]
    fn time_of_day_boundaries() {
        let at = |h, m| TimeOfDay::detect(NaiveTime::from_hms_opt(h, m, 0).unwrap());
        assert_eq!(at(23, 0), TimeOfDay::Night);
        assert_eq!(at(5, 59), TimeOfDay::Night);
        assert_eq!(at(6, 0), TimeOfDay::Day);
        assert_eq!(at(7, 0), TimeOfDay::MorningRush);
        assert_eq!(at(9, 29), TimeOfDay::MorningRush);
        assert_eq!(at(9, 30), TimeOfDay::Day);
        assert_eq!(at(16, 30), TimeOfDay::EveningRush);
        assert_eq!(at(19, 0), TimeOfDay::Day);
        assert_eq!(at(22, 0), TimeOfDay::Night);
    }

    #[test]
    fn time_of_day_parses_wire_names() {
        assert_eq!("morning-rush".parse::<TimeOfDay>(), Ok(TimeOfDay::MorningRush));
        assert_eq!("EVENING_RUSH".parse::<TimeOfDay>(), Ok(TimeOfDay::EveningRush));
        assert!("dusk".parse::<TimeOfDay>().is_err());
        assert_eq!(serde_json::to_value(TimeOfDay::MorningRush).unwrap(), "morning-rush");
    }

    #[test]
    fn rating_decreases_strictly_with_score() {
        let scores = [0.0, 0.1, 0.25, 0.5, 0.9, 1.0];
        for pair in scores.windows(2) {
            assert!(safety_rating(pair[0]) > safety_rating(pair[1]));
        }
        assert_eq!(safety_rating(0.0), 10.0);
        assert_eq!(safety_rating(1.0), 0.0);
    }

    #[test]
    fn empty_surroundings_score_the_baseline() {
        let weights = get_factor_weights(TimeOfDay::Day);
        let score = classify_route_safety(&straight_path(), &[], &weights);
        // Only the grid's baseline crime risk contributes.
        assert!((score - weights.crime * 0.1).abs() < 1e-6, "got {score}");
    }

    #[test]
    fn hazards_on_the_route_raise_the_score() {
        let path = straight_path();
        let weights = get_factor_weights(TimeOfDay::Night);
        let on_route = path[10];
        let clean = classify_route_safety(&path, &[], &weights);
        let one = classify_route_safety(&path, &[hazard("assault", on_route, Severity::High)], &weights);
        let two = classify_route_safety(
            &path,
            &[hazard("assault", on_route, Severity::High), hazard("poor_lighting", on_route, Severity::High)],
            &weights,
        );
        assert!(clean < one && one < two);
        assert!((0.0..=1.0).contains(&two));
    }

    #[test]
    fn far_hazards_are_ignored() {
        let path = straight_path();
        let weights = get_factor_weights(TimeOfDay::Day);
        let far = path[10].destination(0.0, 500.0);
        let classifier = RouteClassifier::default();
        let assessment = classifier.classify(
            &path,
            &[hazard("theft", far, Severity::Critical)],
            &weights,
            TravelMode::Walking,
            DEFAULT_DANGER_THRESHOLD,
        );
        assert_eq!(assessment.hazards_nearby, 0);
        assert!(assessment.high_risk_runs.is_empty());
    }

    #[test]
    fn indexed_and_direct_classification_agree() {
        let path = straight_path();
        let weights = get_factor_weights(TimeOfDay::Night);
        let mut hazards: Vec<Hazard> = (0..200)
            .map(|i| {
                let at = path[i % path.len()].destination((i * 37 % 360) as f64, (i % 9) as f64 * 40.0);
                hazard("assault", at, Severity::Medium)
            })
            .collect();
        hazards.push(hazard("theft", path[5].destination(0.0, 74.0), Severity::High));
        hazards.push(hazard("theft", path[5].destination(0.0, 76.0), Severity::High));

        let classifier = RouteClassifier::default();
        let indexed = classifier.classify(&path, &hazards, &weights, TravelMode::Walking, 0.2);

        let nearby = hazards
            .iter()
            .filter(|h| {
                split_into_segments(&path, DEFAULT_SEGMENT_LENGTH_M)
                    .iter()
                    .any(|piece| piece.distance_to_m(h.location()) < DEFAULT_INFLUENCE_RADIUS_M)
            })
            .count();
        assert_eq!(indexed.hazards_nearby, nearby);
        assert!(nearby < hazards.len());

        let index = HazardIndex::new(&hazards);
        assert_eq!(index.len(), hazards.len());
        let reused = classifier.classify_indexed(&path, &index, &weights, TravelMode::Walking, 0.2);
        assert_eq!(reused, indexed);
    }

    #[test]
    fn clustered_hazards_form_a_high_risk_run() {
        let path = straight_path();
        let weights = get_factor_weights(TimeOfDay::MorningRush);
        let hazards: Vec<Hazard> = (0..4)
            .map(|i| hazard("accident", path[10 + i], Severity::Critical))
            .chain((0..4).map(|i| hazard("road_works", path[10 + i], Severity::Critical)))
            .collect();

        let assessment = RouteClassifier::default().classify(
            &path,
            &hazards,
            &weights,
            TravelMode::Cycling,
            DEFAULT_DANGER_THRESHOLD,
        );

        assert_eq!(assessment.high_risk_runs.len(), 1);
        let run = &assessment.high_risk_runs[0];
        assert!(run.peak_score > DEFAULT_DANGER_THRESHOLD);
        assert!(run.peak_at.distance_m(&path[11]) < 150.0);
        assert!(assessment.factors.collision > assessment.factors.crime);
    }

    #[test]
    fn grid_darkness_counts_as_lighting_exposure() {
        let path = straight_path();
        let map = SafetyMap::from_records(&[SafetyCellRecord {
            lat: 51.5,
            lon: -0.125,
            crime: None,
            darkness: Some(1.0),
            rings: 3,
        }]);
        let weights = get_factor_weights(TimeOfDay::Night);
        let lit = RouteClassifier::default().classify(&path, &[], &weights, TravelMode::Walking, 0.2);
        let dark = RouteClassifier::new(Arc::new(map)).classify(&path, &[], &weights, TravelMode::Walking, 0.2);
        assert!(dark.factors.lighting > lit.factors.lighting);
        assert!(dark.score > lit.score);
    }

    #[test]
    fn single_point_route_is_scored() {
        let weights = get_factor_weights(TimeOfDay::Day);
        let score = classify_route_safety(&[Coordinate::new(51.5, -0.12)], &[], &weights);
        assert!((0.0..=1.0).contains(&score));
        assert_eq!(classify_route_safety(&[], &[], &weights), 0.0);
    }
}
