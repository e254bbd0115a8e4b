use std::collections::HashMap;

use async_trait::async_trait;
use lazy_static::lazy_static;
use serde::Deserialize;
use tracing::{debug, info};

use super::{Hazard, HazardProvider, HazardSource, Severity, within_radius};
use crate::error::ProviderError;
use crate::geometry::Coordinate;
use crate::upstream::UpstreamClient;

pub const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";
const PROVIDER: &str = "overpass";

/// An OSM tag combination that marks something a pedestrian or cyclist should
/// know about. `value: None` matches any value of `key`.
struct TagRule {
    key: &'static str,
    value: Option<&'static str>,
    requires_highway: bool,
    hazard_type: &'static str,
    severity: Severity,
    description: &'static str,
}

lazy_static! {
    static ref TAG_RULES: Vec<TagRule> = vec![
        TagRule { key: "hazard", value: None, requires_highway: false, hazard_type: "hazard", severity: Severity::Medium, description: "Mapped hazard" },
        TagRule { key: "highway", value: Some("construction"), requires_highway: false, hazard_type: "construction", severity: Severity::High, description: "Road under construction" },
        TagRule { key: "construction", value: None, requires_highway: true, hazard_type: "construction", severity: Severity::High, description: "Construction works" },
        TagRule { key: "crossing", value: Some("unmarked"), requires_highway: false, hazard_type: "unmarked_crossing", severity: Severity::Medium, description: "Unmarked pedestrian crossing" },
        TagRule { key: "crossing", value: Some("uncontrolled"), requires_highway: false, hazard_type: "uncontrolled_crossing", severity: Severity::Low, description: "Crossing without signals" },
        TagRule { key: "lit", value: Some("no"), requires_highway: true, hazard_type: "poor_lighting", severity: Severity::Medium, description: "Unlit street" },
        TagRule { key: "highway", value: Some("steps"), requires_highway: false, hazard_type: "steps", severity: Severity::Low, description: "Steps on the path" },
        TagRule { key: "surface", value: Some("gravel"), requires_highway: true, hazard_type: "rough_surface", severity: Severity::Low, description: "Loose gravel surface" },
        TagRule { key: "surface", value: Some("dirt"), requires_highway: true, hazard_type: "rough_surface", severity: Severity::Low, description: "Unpaved surface" },
    ];
}

impl TagRule {
    fn matches(&self, tags: &HashMap<String, String>) -> bool {
        if self.requires_highway && !tags.contains_key("highway") {
            return false;
        }
        match (tags.get(self.key), self.value) {
            (Some(actual), Some(expected)) => actual == expected,
            (Some(actual), None) => actual != "no",
            (None, _) => false,
        }
    }

    fn query_clause(&self, around: &str) -> String {
        let highway = if self.requires_highway && self.key != "highway" { "[\"highway\"]" } else { "" };
        match self.value {
            Some(value) => format!("  nw({around}){highway}[\"{}\"=\"{value}\"];\n", self.key),
            None => format!("  nw({around}){highway}[\"{}\"];\n", self.key),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct OverpassResponse {
    pub(crate) elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OverpassElement {
    #[serde(rename = "type")]
    pub(crate) elem_type: String,
    pub(crate) id: i64,
    pub(crate) lat: Option<f64>,
    pub(crate) lon: Option<f64>,
    pub(crate) center: Option<OverpassCenter>,
    #[serde(default)]
    pub(crate) tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OverpassCenter {
    pub(crate) lat: f64,
    pub(crate) lon: f64,
}

/// Hazards mapped in OpenStreetMap, fetched live from an Overpass endpoint.
#[derive(Debug, Clone)]
pub struct OsmHazardsService {
    upstream: UpstreamClient,
    overpass_url: String,
}

impl OsmHazardsService {
    pub fn new(upstream: UpstreamClient, overpass_url: impl Into<String>) -> Self {
        Self {
            upstream,
            overpass_url: overpass_url.into(),
        }
    }

    pub async fn get_osm_hazards(&self, lat: f64, lon: f64, radius_m: f64) -> Result<Vec<Hazard>, ProviderError> {
        let center = Coordinate::new(lat, lon);
        if !center.is_valid() || !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(ProviderError::InvalidResponse {
                provider: PROVIDER,
                reason: format!("invalid query ({lat}, {lon}) radius {radius_m}"),
            });
        }

        let timeout_s = self.upstream.policy().timeout.as_secs().max(5);
        let query = build_query(center, radius_m, timeout_s);
        debug!("Overpass query:\n{}", query);

        let response: OverpassResponse = self
            .upstream
            .fetch_json(PROVIDER, |client| {
                client
                    .post(&self.overpass_url)
                    .header("Content-Type", "text/plain")
                    .body(query.clone())
            })
            .await?;

        let total = response.elements.len();
        let hazards = within_radius(normalize_elements(response.elements), center, radius_m);
        info!(elements = total, hazards = hazards.len(), "fetched OSM hazards");
        Ok(hazards)
    }
}

#[async_trait]
impl HazardProvider for OsmHazardsService {
    fn source(&self) -> HazardSource {
        HazardSource::Osm
    }

    async fn get_hazards(&self, lat: f64, lon: f64, radius_m: f64) -> Result<Vec<Hazard>, ProviderError> {
        self.get_osm_hazards(lat, lon, radius_m).await
    }
}

pub(crate) fn build_query(center: Coordinate, radius_m: f64, timeout_s: u64) -> String {
    let around = format!("around:{:.0},{:.6},{:.6}", radius_m.ceil(), center.lat, center.lon);
    let clauses: String = TAG_RULES.iter().map(|rule| rule.query_clause(&around)).collect();
    format!("[out:json][timeout:{timeout_s}];\n(\n{clauses});\nout center tags;")
}

pub(crate) fn normalize_elements(elements: Vec<OverpassElement>) -> Vec<Hazard> {
    elements.into_iter().filter_map(normalize_element).collect()
}

fn normalize_element(element: OverpassElement) -> Option<Hazard> {
    let location = match (element.lat, element.lon, &element.center) {
        (Some(lat), Some(lon), _) => Coordinate::new(lat, lon),
        (_, _, Some(center)) => Coordinate::new(center.lat, center.lon),
        _ => return None,
    };
    let rule = TAG_RULES.iter().find(|rule| rule.matches(&element.tags))?;

    let (hazard_type, severity) = if rule.key == "hazard" {
        let value = element.tags.get("hazard").map(String::as_str).unwrap_or(rule.hazard_type);
        let severity = if value.contains("danger") || value.contains("accident") {
            Severity::High
        } else {
            rule.severity
        };
        (value.to_string(), severity)
    } else {
        (rule.hazard_type.to_string(), rule.severity)
    };

    let description = match element.tags.get("name") {
        Some(name) => format!("{} ({})", rule.description, name),
        None => rule.description.to_string(),
    };

    let mut hazard = Hazard::new(
        HazardSource::Osm,
        format!("{}/{}", element.elem_type, element.id),
        location,
        hazard_type,
        severity,
    )
    .with_description(description);
    hazard.affects_traffic = rule.hazard_type == "construction";
    Some(hazard)
}
