use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use super::{RoutePath, RoutingProvider, TravelMode};
use crate::error::{ProviderError, RouteError};
use crate::geometry::Coordinate;
use crate::upstream::UpstreamClient;

const PROVIDER: &str = "osrm";

#[derive(Debug, Deserialize)]
pub(crate) struct OsrmRouteResponse {
    pub(crate) code: String,
    pub(crate) message: Option<String>,
    pub(crate) routes: Option<Vec<OsrmRoute>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OsrmRoute {
    pub(crate) distance: f64,
    pub(crate) duration: f64,
    pub(crate) geometry: OsrmGeometry,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OsrmGeometry {
    pub(crate) coordinates: Vec<[f64; 2]>,
}

/// Thin HTTP client for the OSRM `/route` service.
#[derive(Debug, Clone)]
pub struct OsrmRouter {
    upstream: UpstreamClient,
    endpoint: String,
}

impl OsrmRouter {
    /// Create a router for the given OSRM endpoint (e.g. `http://localhost:5000`).
    pub fn new(upstream: UpstreamClient, endpoint: &str) -> Self {
        Self {
            upstream,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn profile(mode: TravelMode) -> &'static str {
        match mode {
            TravelMode::Walking => "foot",
            TravelMode::Cycling => "bike",
        }
    }

    fn route_url(&self, waypoints: &[Coordinate], mode: TravelMode, alternatives: bool) -> Result<Url, RouteError> {
        let coord_segment = waypoints
            .iter()
            .map(|point| format!("{:.6},{:.6}", point.lon, point.lat))
            .collect::<Vec<_>>()
            .join(";");

        let base = format!("{}/route/v1/{}/{}", self.endpoint, Self::profile(mode), coord_segment);
        let mut url = Url::parse(&base).map_err(|err| {
            RouteError::Unavailable(ProviderError::InvalidResponse {
                provider: PROVIDER,
                reason: format!("failed to build OSRM URL: {}", err),
            })
        })?;

        url.query_pairs_mut()
            .append_pair("alternatives", if alternatives { "true" } else { "false" })
            .append_pair("overview", "full")
            .append_pair("geometries", "geojson")
            .append_pair("steps", "false");
        Ok(url)
    }
}

#[async_trait]
impl RoutingProvider for OsrmRouter {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn route(
        &self,
        waypoints: &[Coordinate],
        mode: TravelMode,
        alternatives: bool,
    ) -> Result<Vec<RoutePath>, RouteError> {
        if waypoints.len() < 2 {
            return Err(RouteError::InvalidInput("a route needs at least two points".to_string()));
        }

        let url = self.route_url(waypoints, mode, alternatives)?;
        debug!(%url, "requesting OSRM route");

        let parsed: OsrmRouteResponse = self
            .upstream
            .fetch_json(PROVIDER, |client| client.get(url.clone()))
            .await
            .map_err(|err| match err {
                // OSRM answers NoRoute, NoSegment and InvalidQuery with a 400.
                ProviderError::Status { status: 400, .. } => RouteError::NoRoute,
                other => RouteError::Unavailable(other),
            })?;

        parse_route_response(parsed)
    }
}

pub(crate) fn parse_route_response(resp: OsrmRouteResponse) -> Result<Vec<RoutePath>, RouteError> {
    match resp.code.as_str() {
        "Ok" => {}
        "NoRoute" | "NoSegment" => return Err(RouteError::NoRoute),
        code => {
            return Err(RouteError::Unavailable(ProviderError::InvalidResponse {
                provider: PROVIDER,
                reason: resp.message.unwrap_or_else(|| code.to_string()),
            }));
        }
    }

    let paths: Vec<RoutePath> = resp
        .routes
        .unwrap_or_default()
        .into_iter()
        .filter(|route| route.geometry.coordinates.len() >= 2)
        .map(|route| RoutePath {
            geometry: route
                .geometry
                .coordinates
                .iter()
                .map(|[lon, lat]| Coordinate::new(*lat, *lon))
                .collect(),
            distance_m: route.distance,
            duration_s: route.duration,
        })
        .collect();

    if paths.is_empty() {
        return Err(RouteError::NoRoute);
    }
    Ok(paths)
}
