use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::{Hazard, HazardProvider, HazardSource, Severity, within_radius};
use crate::error::ProviderError;
use crate::geometry::{BoundingBox, Coordinate};
use crate::upstream::UpstreamClient;

pub const DEFAULT_TOMTOM_BASE_URL: &str = "https://api.tomtom.com";
const PROVIDER: &str = "tomtom";
const INCIDENT_FIELDS: &str =
    "{incidents{type,geometry{type,coordinates},properties{id,iconCategory,magnitudeOfDelay,events{description,code},from,to}}}";

#[derive(Debug, Deserialize)]
pub(crate) struct IncidentResponse {
    #[serde(default)]
    pub(crate) incidents: Vec<Incident>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Incident {
    pub(crate) geometry: IncidentGeometry,
    pub(crate) properties: IncidentProperties,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IncidentGeometry {
    pub(crate) coordinates: IncidentCoordinates,
}

/// GeoJSON `[lon, lat]` point or line.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum IncidentCoordinates {
    Point([f64; 2]),
    Line(Vec<[f64; 2]>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IncidentProperties {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) icon_category: u8,
    #[serde(default)]
    pub(crate) magnitude_of_delay: u8,
    #[serde(default)]
    pub(crate) events: Vec<IncidentEvent>,
    pub(crate) from: Option<String>,
    pub(crate) to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IncidentEvent {
    pub(crate) description: String,
}

/// Live traffic incidents from the TomTom Traffic Incident Details API.
#[derive(Debug, Clone)]
pub struct TomTomHazardsService {
    upstream: UpstreamClient,
    base_url: String,
    api_key: Option<String>,
}

impl TomTomHazardsService {
    pub fn new(upstream: UpstreamClient, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            upstream,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.usable_key().is_ok()
    }

    fn usable_key(&self) -> Result<&str, ProviderError> {
        let not_configured = |reason: &str| ProviderError::NotConfigured {
            provider: PROVIDER,
            reason: reason.to_string(),
        };
        let key = self
            .api_key
            .as_deref()
            .map(str::trim)
            .ok_or_else(|| not_configured("TOMTOM_API_KEY is not set"))?;
        if is_placeholder_key(key) {
            return Err(not_configured("TOMTOM_API_KEY holds a placeholder value"));
        }
        Ok(key)
    }

    pub async fn get_tomtom_hazards(&self, lat: f64, lon: f64, radius_m: f64) -> Result<Vec<Hazard>, ProviderError> {
        let key = self.usable_key()?;
        let center = Coordinate::new(lat, lon);
        if !center.is_valid() || !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(ProviderError::InvalidResponse {
                provider: PROVIDER,
                reason: format!("invalid query ({lat}, {lon}) radius {radius_m}"),
            });
        }

        let bbox = BoundingBox::around(center, radius_m);
        let bbox_param = format!(
            "{:.6},{:.6},{:.6},{:.6}",
            bbox.min_lon, bbox.min_lat, bbox.max_lon, bbox.max_lat
        );
        let url = format!("{}/traffic/services/5/incidentDetails", self.base_url);

        let response: IncidentResponse = self
            .upstream
            .fetch_json(PROVIDER, |client| {
                client.get(&url).query(&[
                    ("key", key),
                    ("bbox", bbox_param.as_str()),
                    ("fields", INCIDENT_FIELDS),
                    ("language", "en-GB"),
                    ("timeValidityFilter", "present"),
                ])
            })
            .await?;

        let total = response.incidents.len();
        let hazards = within_radius(normalize_incidents(response.incidents, center), center, radius_m);
        info!(incidents = total, hazards = hazards.len(), "fetched TomTom hazards");
        Ok(hazards)
    }
}

#[async_trait]
impl HazardProvider for TomTomHazardsService {
    fn source(&self) -> HazardSource {
        HazardSource::Tomtom
    }

    async fn get_hazards(&self, lat: f64, lon: f64, radius_m: f64) -> Result<Vec<Hazard>, ProviderError> {
        self.get_tomtom_hazards(lat, lon, radius_m).await
    }
}

pub(crate) fn is_placeholder_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    key.is_empty()
        || lower.starts_with("your")
        || lower.contains("placeholder")
        || lower.contains("api_key_here")
        || lower == "changeme"
        || lower == "xxx"
}

/// `(hazard type, weather related)` for a TomTom icon category.
fn icon_category(category: u8) -> (&'static str, bool) {
    match category {
        1 => ("accident", false),
        2 => ("fog", true),
        3 => ("dangerous_conditions", false),
        4 => ("rain", true),
        5 => ("ice", true),
        6 => ("traffic_jam", false),
        7 => ("lane_closed", false),
        8 => ("road_closed", false),
        9 => ("road_works", false),
        10 => ("wind", true),
        11 => ("flooding", true),
        14 => ("broken_down_vehicle", false),
        _ => ("traffic_incident", false),
    }
}

fn delay_severity(magnitude: u8) -> Severity {
    match magnitude {
        1 => Severity::Low,
        2 => Severity::Medium,
        // 4 is TomTom's "undefined", used for closures.
        3 | 4 => Severity::High,
        _ => Severity::Medium,
    }
}

pub(crate) fn normalize_incidents(incidents: Vec<Incident>, center: Coordinate) -> Vec<Hazard> {
    incidents
        .into_iter()
        .filter_map(|incident| {
            let location = match incident.geometry.coordinates {
                IncidentCoordinates::Point([lon, lat]) => Coordinate::new(lat, lon),
                IncidentCoordinates::Line(points) => points
                    .iter()
                    .map(|[lon, lat]| Coordinate::new(*lat, *lon))
                    .min_by(|a, b| a.distance_m(&center).total_cmp(&b.distance_m(&center)))?,
            };
            let props = incident.properties;
            let (hazard_type, weather_related) = icon_category(props.icon_category);

            let mut description = props
                .events
                .iter()
                .map(|event| event.description.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            if let (Some(from), Some(to)) = (&props.from, &props.to) {
                description = format!("{description} ({from} to {to})");
            }

            let mut hazard = Hazard::new(
                HazardSource::Tomtom,
                props.id,
                location,
                hazard_type,
                delay_severity(props.magnitude_of_delay),
            )
            .with_description(description);
            hazard.affects_traffic = true;
            hazard.weather_related = weather_related;
            Some(hazard)
        })
        .collect()
}
