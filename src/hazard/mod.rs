//! Hazards from community reports, OpenStreetMap and TomTom traffic, normalized
//! into one shape so the classifier does not care where they came from.

pub mod aggregate;
pub mod merge;
pub mod osm;
pub mod tomtom;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::geometry::Coordinate;

pub use aggregate::{CombinedHazards, HazardAggregator};
pub use merge::{DEFAULT_DEDUP_THRESHOLD_M, HazardMerger, merge_hazards};
pub use osm::OsmHazardsService;
pub use tomtom::TomTomHazardsService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HazardSource {
    Community,
    Osm,
    Tomtom,
}

impl HazardSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            HazardSource::Community => "community",
            HazardSource::Osm => "osm",
            HazardSource::Tomtom => "tomtom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Contribution of one hazard at zero distance to a factor's exposure.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Low => 0.25,
            Severity::Medium => 0.5,
            Severity::High => 0.75,
            Severity::Critical => 1.0,
        }
    }

    /// Maps the 1-5 `priority_level` scale used for community reports.
    pub fn from_level(level: u8) -> Self {
        match level {
            0 | 1 => Severity::Low,
            2 => Severity::Medium,
            3 | 4 => Severity::High,
            _ => Severity::Critical,
        }
    }
}

/// The safety factor a hazard feeds into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HazardCategory {
    Crime,
    Collision,
    Lighting,
    General,
}

impl HazardCategory {
    pub fn for_type(hazard_type: &str) -> Self {
        let t = hazard_type.to_ascii_lowercase();
        let has = |keys: &[&str]| keys.iter().any(|k| t.contains(k));
        if has(&["crime", "theft", "robbery", "assault", "harass", "mugging", "vandal", "suspicious"]) {
            HazardCategory::Crime
        } else if has(&["light", "dark", "unlit"]) {
            HazardCategory::Lighting
        } else if has(&["accident", "collision", "crossing", "junction", "traffic", "speed", "jam", "vehicle", "lane"]) {
            HazardCategory::Collision
        } else {
            HazardCategory::General
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hazard {
    pub id: String,
    pub source: HazardSource,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "type")]
    pub hazard_type: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
    /// Meters from the query point, when the hazard came from a radius query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_level: Option<u8>,
    #[serde(default)]
    pub affects_traffic: bool,
    #[serde(default)]
    pub weather_related: bool,
    /// Other sources that reported the same hazard and were folded into this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_sources: Vec<HazardSource>,
}

impl Hazard {
    pub fn new(
        source: HazardSource,
        id: impl Into<String>,
        location: Coordinate,
        hazard_type: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            id: id.into(),
            source,
            latitude: location.lat,
            longitude: location.lon,
            hazard_type: hazard_type.into(),
            severity,
            description: String::new(),
            distance: None,
            priority_level: None,
            affects_traffic: false,
            weather_related: false,
            merged_sources: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn location(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    pub fn category(&self) -> HazardCategory {
        HazardCategory::for_type(&self.hazard_type)
    }

    /// Sources that vouch for this hazard, its own first.
    pub fn sources(&self) -> impl Iterator<Item = HazardSource> + '_ {
        std::iter::once(self.source).chain(self.merged_sources.iter().copied())
    }
}

/// A source of hazards around a point.
#[async_trait]
pub trait HazardProvider: Send + Sync {
    fn source(&self) -> HazardSource;

    async fn get_hazards(&self, lat: f64, lon: f64, radius_m: f64) -> Result<Vec<Hazard>, ProviderError>;
}

/// Keeps hazards within `radius_m` of `center`, records their distance and
/// orders them nearest first (id breaks ties) so repeated reads are stable.
pub(crate) fn within_radius(mut hazards: Vec<Hazard>, center: Coordinate, radius_m: f64) -> Vec<Hazard> {
    hazards.retain_mut(|hazard| {
        let d = hazard.location().distance_m(&center);
        hazard.distance = Some(d);
        d <= radius_m
    });
    hazards.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hazards
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_follows_hazard_type() {
        assert_eq!(HazardCategory::for_type("theft"), HazardCategory::Crime);
        assert_eq!(HazardCategory::for_type("poor_lighting"), HazardCategory::Lighting);
        assert_eq!(HazardCategory::for_type("unmarked_crossing"), HazardCategory::Collision);
        assert_eq!(HazardCategory::for_type("accident"), HazardCategory::Collision);
        assert_eq!(HazardCategory::for_type("pothole"), HazardCategory::General);
    }

    #[test]
    fn severity_weights_increase() {
        let weights: Vec<f64> = [Severity::Low, Severity::Medium, Severity::High, Severity::Critical]
            .iter()
            .map(Severity::weight)
            .collect();
        assert!(weights.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(Severity::from_level(5), Severity::Critical);
    }

    #[test]
    fn hazard_serializes_with_wire_names() {
        let hazard = Hazard::new(HazardSource::Osm, "node/1", Coordinate::new(1.0, 2.0), "construction", Severity::High);
        let json = serde_json::to_value(&hazard).unwrap();
        assert_eq!(json["type"], "construction");
        assert_eq!(json["source"], "osm");
        assert_eq!(json["affectsTraffic"], false);
        assert!(json.get("mergedSources").is_none());
    }

    #[test]
    fn within_radius_filters_and_orders() {
        let center = Coordinate::new(51.5, -0.12);
        let near = Hazard::new(HazardSource::Osm, "b", center.destination(0.0, 50.0), "x", Severity::Low);
        let nearer = Hazard::new(HazardSource::Osm, "a", center.destination(90.0, 10.0), "x", Severity::Low);
        let far = Hazard::new(HazardSource::Osm, "c", center.destination(0.0, 900.0), "x", Severity::Low);
        let kept = within_radius(vec![near, far, nearer], center, 200.0);
        assert_eq!(kept.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(kept[0].distance.unwrap() < 11.0);
    }
}
