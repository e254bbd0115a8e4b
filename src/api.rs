use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::calculator::{CalculateRoutes, RouteCalculator, RoutePreferences};
use crate::error::{ProviderError, RouteError};
use crate::geometry::Coordinate;
use crate::hazard::aggregate::SourceCounts;
use crate::hazard::{Hazard, HazardAggregator, OsmHazardsService, TomTomHazardsService};
use crate::routing::TravelMode;
use crate::scoring::{FactorWeights, TimeOfDay, get_factor_weights};
use crate::store::{CommunityHazardStore, HazardReport, RouteStore, SavedRoute};

const DEFAULT_QUERY_RADIUS_M: f64 = 1_000.0;

// Shared State for concurrency
pub struct AppState {
    pub calculator: RouteCalculator,
    pub hazards: HazardAggregator,
    pub osm: Arc<OsmHazardsService>,
    pub tomtom: Arc<TomTomHazardsService>,
    pub community: Arc<CommunityHazardStore>,
    pub routes: RouteStore,
    pub max_hazard_radius_m: f64,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/hazards/combined/:lat/:lon", get(combined_hazards))
        .route("/api/hazards/osm/:lat/:lon", get(osm_hazards))
        .route("/api/hazards/tomtom/:lat/:lon", get(tomtom_hazards))
        .route("/api/hazards/community", get(community_hazards).post(report_hazard))
        .route("/api/weights", get(factor_weights))
        .route("/routes", get(list_routes))
        .route("/routes/find", post(find_routes))
        .route("/routes/near/:lat/:lon", get(routes_near))
        .route("/routes/:id", get(get_route))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// --- Errors ---

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Upstream(ProviderError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, "invalid_input", message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message),
            ApiError::Upstream(err @ ProviderError::NotConfigured { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "not_configured", err.to_string())
            }
            ApiError::Upstream(err) => (StatusCode::BAD_GATEWAY, "upstream_unavailable", err.to_string()),
        };
        (status, Json(json!({ "success": false, "error": code, "message": message }))).into_response()
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        ApiError::Upstream(err)
    }
}

fn status_for(err: &RouteError) -> StatusCode {
    match err {
        RouteError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        RouteError::NoRoute => StatusCode::NOT_FOUND,
        RouteError::Unavailable(_) => StatusCode::BAD_GATEWAY,
    }
}

fn status_for_code(code: Option<&str>) -> StatusCode {
    match code {
        Some("invalid_input") => StatusCode::BAD_REQUEST,
        Some("no_route") => StatusCode::NOT_FOUND,
        Some("routing_unavailable") => StatusCode::BAD_GATEWAY,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
        None => StatusCode::OK,
    }
}

// --- API DTOs ---

#[derive(Debug, Default, Deserialize)]
pub struct RadiusQuery {
    radius: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedQuery {
    radius: Option<f64>,
    #[serde(rename = "includeTomTom")]
    include_tomtom: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightsQuery {
    time_of_day: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HazardsResponse {
    success: bool,
    count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    radius: Option<f64>,
    hazards: Vec<Hazard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sources: Option<SourceCounts>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
}

impl HazardsResponse {
    fn new(hazards: Vec<Hazard>, radius: Option<f64>) -> Self {
        Self {
            success: true,
            count: hazards.len(),
            radius,
            hazards,
            sources: None,
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WeightsResponse {
    time_of_day: TimeOfDay,
    weights: FactorWeights,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindRoutesRequest {
    from_lat: f64,
    from_lon: f64,
    to_lat: f64,
    to_lon: f64,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    preferences: Option<RoutePreferences>,
    #[serde(default)]
    time_of_day: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FindRoutesResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    route_id: Option<Uuid>,
    #[serde(flatten)]
    result: CalculateRoutes,
}

// --- Handlers ---

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "router": state.calculator.router_name(),
        "tomtom": state.hazards.has_tomtom(),
    }))
}

impl AppState {
    fn query_area(&self, lat: f64, lon: f64, radius: Option<f64>) -> Result<(Coordinate, f64), ApiError> {
        let center = Coordinate::new(lat, lon);
        if !center.is_valid() {
            return Err(ApiError::BadRequest(format!("({lat}, {lon}) is not a valid coordinate")));
        }
        let radius = radius.unwrap_or(DEFAULT_QUERY_RADIUS_M);
        if !radius.is_finite() || radius <= 0.0 {
            return Err(ApiError::BadRequest("radius must be a positive number of meters".to_string()));
        }
        Ok((center, radius.min(self.max_hazard_radius_m)))
    }
}

async fn combined_hazards(
    State(state): State<Arc<AppState>>,
    Path((lat, lon)): Path<(f64, f64)>,
    Query(query): Query<CombinedQuery>,
) -> Result<Json<HazardsResponse>, ApiError> {
    let (center, radius) = state.query_area(lat, lon, query.radius)?;
    let combined = state
        .hazards
        .combined(center.lat, center.lon, radius, query.include_tomtom.unwrap_or(true))
        .await;

    Ok(Json(HazardsResponse {
        sources: Some(combined.sources),
        warnings: combined.warnings,
        ..HazardsResponse::new(combined.hazards, Some(radius))
    }))
}

async fn osm_hazards(
    State(state): State<Arc<AppState>>,
    Path((lat, lon)): Path<(f64, f64)>,
    Query(query): Query<RadiusQuery>,
) -> Result<Json<HazardsResponse>, ApiError> {
    let (center, radius) = state.query_area(lat, lon, query.radius)?;
    let hazards = state.osm.get_osm_hazards(center.lat, center.lon, radius).await?;
    Ok(Json(HazardsResponse::new(hazards, Some(radius))))
}

async fn tomtom_hazards(
    State(state): State<Arc<AppState>>,
    Path((lat, lon)): Path<(f64, f64)>,
    Query(query): Query<RadiusQuery>,
) -> Result<Json<HazardsResponse>, ApiError> {
    let (center, radius) = state.query_area(lat, lon, query.radius)?;
    let hazards = state.tomtom.get_tomtom_hazards(center.lat, center.lon, radius).await?;
    Ok(Json(HazardsResponse::new(hazards, Some(radius))))
}

async fn community_hazards(State(state): State<Arc<AppState>>) -> Json<HazardsResponse> {
    Json(HazardsResponse::new(state.community.all().await, None))
}

async fn report_hazard(
    State(state): State<Arc<AppState>>,
    Json(report): Json<HazardReport>,
) -> Result<(StatusCode, Json<Hazard>), ApiError> {
    let hazard = state.community.report(report).await.map_err(ApiError::BadRequest)?;
    info!(id = %hazard.id, kind = %hazard.hazard_type, "community hazard reported");
    Ok((StatusCode::CREATED, Json(hazard)))
}

async fn factor_weights(Query(query): Query<WeightsQuery>) -> Result<Json<WeightsResponse>, ApiError> {
    let time_of_day = match query.time_of_day {
        Some(raw) => raw.parse::<TimeOfDay>().map_err(ApiError::BadRequest)?,
        None => TimeOfDay::now(),
    };
    Ok(Json(WeightsResponse {
        time_of_day,
        weights: get_factor_weights(time_of_day),
    }))
}

async fn find_routes(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<FindRoutesRequest>,
) -> (StatusCode, Json<FindRoutesResponse>) {
    let parsed = payload
        .mode
        .as_deref()
        .map(str::parse::<TravelMode>)
        .transpose()
        .and_then(|mode| {
            let time_of_day = payload
                .time_of_day
                .as_deref()
                .map(str::parse::<TimeOfDay>)
                .transpose()
                .map_err(RouteError::InvalidInput)?;
            Ok((mode.unwrap_or(TravelMode::Walking), time_of_day))
        });

    let (mode, time_of_day) = match parsed {
        Ok(values) => values,
        Err(err) => {
            let failure = FindRoutesResponse {
                route_id: None,
                result: CalculateRoutes::failure(&err),
            };
            return (status_for(&err), Json(failure));
        }
    };

    let from = Coordinate::new(payload.from_lat, payload.from_lon);
    let to = Coordinate::new(payload.to_lat, payload.to_lon);
    let result = state
        .calculator
        .calculate_routes(from, to, mode, payload.preferences, time_of_day)
        .await;

    let route_id = match (&result.fastest, &result.safest, result.time_of_day) {
        (Some(fastest), Some(safest), Some(tod)) => {
            let saved = state
                .routes
                .save(from, to, mode, tod, fastest.clone(), safest.clone())
                .await;
            Some(saved.id)
        }
        _ => None,
    };

    (
        status_for_code(result.error.as_deref()),
        Json(FindRoutesResponse { route_id, result }),
    )
}

async fn list_routes(State(state): State<Arc<AppState>>) -> Json<Vec<SavedRoute>> {
    Json(state.routes.list().await)
}

async fn get_route(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SavedRoute>, ApiError> {
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::BadRequest(format!("'{id}' is not a route id")))?;
    state
        .routes
        .get(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("route {id} not found")))
}

async fn routes_near(
    State(state): State<Arc<AppState>>,
    Path((lat, lon)): Path<(f64, f64)>,
    Query(query): Query<RadiusQuery>,
) -> Result<Json<Vec<SavedRoute>>, ApiError> {
    let center = Coordinate::new(lat, lon);
    if !center.is_valid() {
        return Err(ApiError::BadRequest(format!("({lat}, {lon}) is not a valid coordinate")));
    }
    let radius = query.radius.unwrap_or(DEFAULT_QUERY_RADIUS_M);
    if !radius.is_finite() || radius <= 0.0 {
        return Err(ApiError::BadRequest("radius must be a positive number of meters".to_string()));
    }
    Ok(Json(state.routes.near(center, radius).await))
}
