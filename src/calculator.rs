//! Fastest-versus-safest route evaluation.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::RouteError;
use crate::geometry::{Coordinate, densify};
use crate::hazard::HazardAggregator;
use crate::routing::{RoutePath, RoutingProvider, TravelMode};
use crate::scoring::{
    DEFAULT_DANGER_THRESHOLD, FactorScores, FactorWeights, HazardIndex, RiskRun, RouteAssessment, RouteClassifier,
    TimeOfDay, get_factor_weights,
};

pub const DEFAULT_MAX_DETOUR_RATIO: f64 = 1.5;
pub const DEFAULT_MIN_IMPROVEMENT: f64 = 0.01;
pub const DEFAULT_MAX_HAZARD_RADIUS_M: f64 = 5_000.0;
pub const DEFAULT_MAX_HAZARD_AREAS: usize = 12;
const HAZARD_RADIUS_MARGIN_M: f64 = 500.0;
const COVERAGE_STEP_M: f64 = 250.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutePreferences {
    /// Longest acceptable safe route, as a multiple of the fastest route's length.
    pub max_detour_ratio: f64,
    /// How much lower a candidate's score must be to replace the fastest route.
    pub min_improvement: f64,
    /// Segment score above which avoidance waypoints are tried.
    pub danger_threshold: f64,
}

impl Default for RoutePreferences {
    fn default() -> Self {
        Self {
            max_detour_ratio: DEFAULT_MAX_DETOUR_RATIO,
            min_improvement: DEFAULT_MIN_IMPROVEMENT,
            danger_threshold: DEFAULT_DANGER_THRESHOLD,
        }
    }
}

impl RoutePreferences {
    fn validate(self) -> Result<Self, RouteError> {
        let finite = [self.max_detour_ratio, self.min_improvement, self.danger_threshold]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.max_detour_ratio < 1.0 || self.min_improvement < 0.0 {
            return Err(RouteError::InvalidInput(
                "preferences need maxDetourRatio >= 1 and minImprovement >= 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.danger_threshold) {
            return Err(RouteError::InvalidInput("dangerThreshold must lie in [0, 1]".to_string()));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteType {
    Fastest,
    Safest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoJsonLineString {
    r#type: String,
    coordinates: Vec<[f64; 2]>, // [lon, lat] standard for GeoJSON
}

impl GeoJsonLineString {
    pub fn from_path(path: &[Coordinate]) -> Self {
        Self {
            r#type: "LineString".to_string(),
            coordinates: path.iter().map(Coordinate::lon_lat).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResult {
    /// Kilometers.
    pub distance: f64,
    /// Minutes.
    pub time: f64,
    /// 0 = safe, 1 = dangerous.
    pub safety_score: f64,
    /// 0-10, 10 = safest.
    pub safety_rating: f64,
    pub factor_weights: FactorWeights,
    pub factor_scores: FactorScores,
    pub same_as_fastest: bool,
    pub route_type: RouteType,
    pub geometry: GeoJsonLineString,
    pub hazards_nearby: usize,
    pub high_risk_segments: usize,
}

/// Outcome of [`RouteCalculator::calculate_routes`]. Expected failures are
/// reported here with `success: false` instead of as an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateRoutes {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fastest: Option<RouteResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safest: Option<RouteResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<TimeOfDay>,
    /// Hazard sources that failed during this calculation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CalculateRoutes {
    pub fn failure(err: &RouteError) -> Self {
        Self {
            success: false,
            fastest: None,
            safest: None,
            time_of_day: None,
            warnings: Vec::new(),
            error: Some(err.code().to_string()),
            message: Some(err.to_string()),
        }
    }
}

/// A route candidate with its safety assessment.
#[derive(Debug, Clone)]
pub struct ScoredRoute {
    pub path: RoutePath,
    pub assessment: RouteAssessment,
}

impl ScoredRoute {
    fn to_result(
        &self,
        weights: FactorWeights,
        route_type: RouteType,
        same_as_fastest: bool,
        danger_threshold: f64,
    ) -> RouteResult {
        RouteResult {
            distance: self.path.distance_m / 1000.0,
            time: self.path.duration_s / 60.0,
            safety_score: self.assessment.score,
            safety_rating: self.assessment.rating(),
            factor_weights: weights,
            factor_scores: self.assessment.factors,
            same_as_fastest,
            route_type,
            geometry: GeoJsonLineString::from_path(&self.path.geometry),
            hazards_nearby: self.assessment.hazards_nearby,
            high_risk_segments: self
                .assessment
                .segments
                .iter()
                .filter(|s| s.score > danger_threshold)
                .count(),
        }
    }
}

/// Picks the safest acceptable alternative to `fastest`, if any.
///
/// A candidate qualifies when it is at most `max_detour_ratio` times as long and
/// scores at least `min_improvement` lower. The lowest score wins; equal scores
/// go to the quicker route.
pub fn evaluate_alternative<'a>(
    fastest: &ScoredRoute,
    candidates: &'a [ScoredRoute],
    preferences: &RoutePreferences,
) -> Option<&'a ScoredRoute> {
    let max_distance = fastest.path.distance_m * preferences.max_detour_ratio;
    let max_score = fastest.assessment.score - preferences.min_improvement;

    candidates
        .iter()
        .filter(|c| c.path.distance_m <= max_distance && c.assessment.score <= max_score)
        .min_by(|a, b| {
            a.assessment
                .score
                .total_cmp(&b.assessment.score)
                .then(a.path.duration_s.total_cmp(&b.path.duration_s))
        })
}

/// Circles to query hazards in so that every route is covered with a margin.
#[derive(Debug, Clone, PartialEq)]
pub struct HazardCoverage {
    pub centers: Vec<Coordinate>,
    pub radius_m: f64,
    /// Areas dropped to stay within the query cap.
    pub skipped: usize,
}

/// Plans hazard queries for `routes` between `from` and `to`.
///
/// A single circle around the trip midpoint is used while it can reach every
/// route point plus the margin within `max_radius_m`. Longer trips get a
/// chain of `max_radius_m` circles laid greedily along the routes, at most
/// `max_areas` of them.
pub fn hazard_coverage(
    from: Coordinate,
    to: Coordinate,
    routes: &[RoutePath],
    max_radius_m: f64,
    max_areas: usize,
) -> HazardCoverage {
    let samples: Vec<Coordinate> = routes
        .iter()
        .flat_map(|route| densify(&route.geometry, COVERAGE_STEP_M))
        .chain([from, to])
        .collect();

    let center = from.midpoint(&to);
    let reach = samples.iter().map(|p| center.distance_m(p)).fold(0.0, f64::max) + HAZARD_RADIUS_MARGIN_M;
    if reach <= max_radius_m {
        return HazardCoverage {
            centers: vec![center],
            radius_m: reach,
            skipped: 0,
        };
    }

    let inner = (max_radius_m - HAZARD_RADIUS_MARGIN_M - COVERAGE_STEP_M / 2.0).max(max_radius_m / 2.0);
    let mut centers: Vec<Coordinate> = Vec::new();
    for sample in samples {
        if !centers.iter().any(|c| c.distance_m(&sample) <= inner) {
            centers.push(sample);
        }
    }
    let skipped = centers.len().saturating_sub(max_areas.max(1));
    centers.truncate(max_areas.max(1));
    HazardCoverage {
        centers,
        radius_m: max_radius_m,
        skipped,
    }
}

/// Points beside the worst risky stretches for a route to pass through instead.
///
/// For each of the `max_runs` worst runs, one point per offset on each side,
/// perpendicular to the route at the run's peak.
pub fn avoidance_waypoints(runs: &[RiskRun], offsets_m: &[f64], max_runs: usize) -> Vec<Coordinate> {
    let mut worst: Vec<&RiskRun> = runs.iter().collect();
    worst.sort_by(|a, b| b.peak_score.total_cmp(&a.peak_score));

    worst
        .into_iter()
        .take(max_runs)
        .flat_map(|run| {
            offsets_m.iter().flat_map(move |&offset| {
                [90.0, -90.0].map(|side| run.peak_at.destination((run.peak_bearing + side).rem_euclid(360.0), offset))
            })
        })
        .filter(Coordinate::is_valid)
        .collect()
}

#[derive(Debug, Clone)]
pub struct CalculatorSettings {
    pub max_hazard_radius_m: f64,
    /// Hazard query circles per calculation.
    pub max_hazard_areas: usize,
    pub waypoint_offsets_m: Vec<f64>,
    pub max_avoided_runs: usize,
    /// Waypoint routes requested at once.
    pub max_concurrent_routes: usize,
    pub include_tomtom: bool,
}

impl Default for CalculatorSettings {
    fn default() -> Self {
        Self {
            max_hazard_radius_m: DEFAULT_MAX_HAZARD_RADIUS_M,
            max_hazard_areas: DEFAULT_MAX_HAZARD_AREAS,
            waypoint_offsets_m: vec![200.0, 400.0],
            max_avoided_runs: 3,
            max_concurrent_routes: 4,
            include_tomtom: true,
        }
    }
}

pub struct RouteCalculator {
    router: Arc<dyn RoutingProvider>,
    hazards: HazardAggregator,
    classifier: RouteClassifier,
    settings: CalculatorSettings,
}

impl RouteCalculator {
    pub fn new(
        router: Arc<dyn RoutingProvider>,
        hazards: HazardAggregator,
        classifier: RouteClassifier,
        settings: CalculatorSettings,
    ) -> Self {
        Self {
            router,
            hazards,
            classifier,
            settings,
        }
    }

    pub fn router_name(&self) -> &'static str {
        self.router.name()
    }

    /// Finds the fastest route and the safest acceptable alternative.
    ///
    /// `time_of_day` defaults to the current local time, `preferences` to
    /// [`RoutePreferences::default`]. Invalid input and provider failures come
    /// back as `success: false`.
    pub async fn calculate_routes(
        &self,
        from: Coordinate,
        to: Coordinate,
        mode: TravelMode,
        preferences: Option<RoutePreferences>,
        time_of_day: Option<TimeOfDay>,
    ) -> CalculateRoutes {
        let time_of_day = time_of_day.unwrap_or_else(TimeOfDay::now);
        match self.try_calculate(from, to, mode, preferences, time_of_day).await {
            Ok(result) => result,
            Err(err) => {
                warn!(router = self.router.name(), code = err.code(), "route calculation failed: {}", err);
                CalculateRoutes {
                    time_of_day: Some(time_of_day),
                    ..CalculateRoutes::failure(&err)
                }
            }
        }
    }

    async fn try_calculate(
        &self,
        from: Coordinate,
        to: Coordinate,
        mode: TravelMode,
        preferences: Option<RoutePreferences>,
        time_of_day: TimeOfDay,
    ) -> Result<CalculateRoutes, RouteError> {
        for (label, point) in [("origin", from), ("destination", to)] {
            if !point.is_valid() {
                return Err(RouteError::InvalidInput(format!(
                    "{label} ({}, {}) is not a valid coordinate",
                    point.lat, point.lon
                )));
            }
        }
        if from == to {
            return Err(RouteError::InvalidInput("origin and destination are the same point".to_string()));
        }
        let preferences = preferences.unwrap_or_default().validate()?;
        let weights = get_factor_weights(time_of_day);

        let endpoints = [from, to];
        let mut routes = self.router.route(&endpoints, mode, true).await?;
        if routes.is_empty() {
            return Err(RouteError::NoRoute);
        }
        routes.sort_by(|a, b| a.duration_s.total_cmp(&b.duration_s));

        let coverage = hazard_coverage(
            from,
            to,
            &routes,
            self.settings.max_hazard_radius_m,
            self.settings.max_hazard_areas,
        );
        let combined = self
            .hazards
            .combined_along(&coverage.centers, coverage.radius_m, self.settings.include_tomtom)
            .await;
        let mut warnings = combined.warnings;
        if coverage.skipped > 0 {
            warn!(
                areas = coverage.centers.len(),
                skipped = coverage.skipped,
                "route too long for full hazard coverage"
            );
            warnings.push(format!(
                "hazards were only checked on part of the route ({} of {} areas)",
                coverage.centers.len(),
                coverage.centers.len() + coverage.skipped
            ));
        }

        let index = HazardIndex::new(&combined.hazards);
        let score = |path: RoutePath| self.score(path, &index, &weights, mode, &preferences);
        let mut routes = routes.into_iter();
        let fastest = routes.next().map(score).ok_or(RouteError::NoRoute)?;
        let mut candidates: Vec<ScoredRoute> = routes.map(score).collect();
        debug!(
            time_of_day = %time_of_day,
            hazards = index.len(),
            areas = coverage.centers.len(),
            fastest_score = fastest.assessment.score,
            alternatives = candidates.len(),
            "fastest route classified"
        );

        if !fastest.assessment.high_risk_runs.is_empty() {
            let waypoints = avoidance_waypoints(
                &fastest.assessment.high_risk_runs,
                &self.settings.waypoint_offsets_m,
                self.settings.max_avoided_runs,
            );
            for path in self.route_via(from, to, &waypoints, mode).await {
                candidates.push(score(path));
            }
        }

        let threshold = preferences.danger_threshold;
        let fastest_result = fastest.to_result(weights, RouteType::Fastest, false, threshold);
        let safest_result = match evaluate_alternative(&fastest, &candidates, &preferences) {
            Some(safest) => safest.to_result(weights, RouteType::Safest, false, threshold),
            None => {
                info!(
                    candidates = candidates.len(),
                    score = fastest.assessment.score,
                    "no safer alternative found; safest route is the fastest"
                );
                fastest.to_result(weights, RouteType::Safest, true, threshold)
            }
        };

        Ok(CalculateRoutes {
            success: true,
            fastest: Some(fastest_result),
            safest: Some(safest_result),
            time_of_day: Some(time_of_day),
            warnings,
            error: None,
            message: None,
        })
    }

    fn score(
        &self,
        path: RoutePath,
        hazards: &HazardIndex<'_>,
        weights: &FactorWeights,
        mode: TravelMode,
        preferences: &RoutePreferences,
    ) -> ScoredRoute {
        let assessment = self
            .classifier
            .classify_indexed(&path.geometry, hazards, weights, mode, preferences.danger_threshold);
        ScoredRoute { path, assessment }
    }

    /// Routes `from -> waypoint -> to` for every waypoint, a few at a time.
    /// Failed legs are skipped.
    async fn route_via(
        &self,
        from: Coordinate,
        to: Coordinate,
        waypoints: &[Coordinate],
        mode: TravelMode,
    ) -> Vec<RoutePath> {
        let router = Arc::clone(&self.router);
        let results: Vec<Option<RoutePath>> = stream::iter(waypoints.to_vec())
            .map(move |waypoint| {
                let router = Arc::clone(&router);
                async move {
                    match router.route(&[from, waypoint, to], mode, false).await {
                        Ok(mut paths) if !paths.is_empty() => Some(paths.swap_remove(0)),
                        Ok(_) => None,
                        Err(err) => {
                            debug!(lat = waypoint.lat, lon = waypoint.lon, "avoidance waypoint unroutable: {}", err);
                            None
                        }
                    }
                }
            })
            .buffered(self.settings.max_concurrent_routes.max(1))
            .collect()
            .await;
        results.into_iter().flatten().collect()
    }
}
