use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use safepath::api::{self, AppState};
use safepath::calculator::{CalculatorSettings, RouteCalculator};
use safepath::hazard::{HazardAggregator, HazardMerger, OsmHazardsService, TomTomHazardsService};
use safepath::routing::OsrmRouter;
use safepath::scoring::RouteClassifier;
use safepath::store::{CommunityHazardStore, RouteStore};
use safepath::upstream::{UpstreamClient, UpstreamPolicy};

fn upstream() -> UpstreamClient {
    UpstreamClient::new(UpstreamPolicy {
        timeout: Duration::from_secs(2),
        retries: 0,
        ..UpstreamPolicy::default()
    })
    .unwrap()
}

async fn mock_json(body: Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body.clone()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    server
}

fn app(osrm_url: &str, overpass_url: &str) -> Router {
    let community = Arc::new(CommunityHazardStore::new());
    let osm = Arc::new(OsmHazardsService::new(upstream(), overpass_url));
    let tomtom = Arc::new(TomTomHazardsService::new(upstream(), "http://127.0.0.1:1", None));
    let hazards = HazardAggregator::new(community.clone(), osm.clone(), None, HazardMerger::default());
    let calculator = RouteCalculator::new(
        Arc::new(OsrmRouter::new(upstream(), osrm_url)),
        hazards.clone(),
        RouteClassifier::default(),
        CalculatorSettings::default(),
    );

    api::router(Arc::new(AppState {
        calculator,
        hazards,
        osm,
        tomtom,
        community,
        routes: RouteStore::new(),
        max_hazard_radius_m: 5_000.0,
    }))
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn find_request() -> Value {
    json!({ "fromLat": 51.5, "fromLon": -0.13, "toLat": 51.5, "toLon": -0.12, "mode": "walking", "timeOfDay": "day" })
}

#[tokio::test]
async fn health_reports_the_backend() {
    let app = app("http://127.0.0.1:1", "http://127.0.0.1:1");
    let (status, body) = call(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["router"], "osrm");
    assert_eq!(body["tomtom"], false);
}

#[tokio::test]
async fn weights_endpoint_validates_time_of_day() {
    let app = app("http://127.0.0.1:1", "http://127.0.0.1:1");

    let (status, body) = call(&app, get("/api/weights?timeOfDay=night")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["timeOfDay"], "night");
    assert_eq!(body["weights"]["lighting"], 0.35);

    let (status, body) = call(&app, get("/api/weights?timeOfDay=dusk")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");
}

#[tokio::test]
async fn community_reports_show_up_in_combined_hazards() {
    let overpass = mock_json(json!({ "elements": [] })).await;
    let app = app("http://127.0.0.1:1", &overpass.uri());

    let report = json!({ "latitude": 51.5, "longitude": -0.125, "type": "broken_streetlight", "priorityLevel": 4 });
    let (status, created) = call(&app, post("/api/hazards/community", report)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["source"], "community");
    assert_eq!(created["severity"], "high");

    let (status, body) = call(&app, get("/api/hazards/combined/51.5/-0.125?radius=200&includeTomTom=false")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["hazards"][0]["id"], created["id"]);
    assert_eq!(body["sources"]["community"], 1);

    let (status, _) = call(&app, post("/api/hazards/community", json!({ "latitude": 200.0, "longitude": 0.0, "type": "x" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tomtom_without_a_key_is_service_unavailable() {
    let app = app("http://127.0.0.1:1", "http://127.0.0.1:1");
    let (status, body) = call(&app, get("/api/hazards/tomtom/51.5/-0.12")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "not_configured");
}

#[tokio::test]
async fn invalid_hazard_queries_are_bad_requests() {
    let app = app("http://127.0.0.1:1", "http://127.0.0.1:1");
    let (status, _) = call(&app, get("/api/hazards/osm/95.0/-0.12")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&app, get("/api/hazards/combined/51.5/-0.12?radius=-5")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn found_routes_are_saved_and_retrievable() {
    let osrm = mock_json(json!({
        "code": "Ok",
        "routes": [{
            "distance": 700.0, "duration": 500.0,
            "geometry": { "type": "LineString", "coordinates": [[-0.13, 51.5], [-0.125, 51.5], [-0.12, 51.5]] }
        }]
    }))
    .await;
    let overpass = mock_json(json!({ "elements": [] })).await;
    let app = app(&osrm.uri(), &overpass.uri());

    let (status, body) = call(&app, post("/routes/find", find_request())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["timeOfDay"], "day");
    assert_eq!(body["fastest"]["distance"], 0.7);
    assert_eq!(body["safest"]["sameAsFastest"], true);
    let id = body["routeId"].as_str().unwrap().to_string();

    let (status, saved) = call(&app, get(&format!("/routes/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["mode"], "walking");
    assert_eq!(saved["fastest"]["routeType"], "fastest");

    let (_, listed) = call(&app, get("/routes")).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (_, near) = call(&app, get("/routes/near/51.5/-0.1301?radius=100")).await;
    assert_eq!(near.as_array().unwrap().len(), 1);
    let (_, far) = call(&app, get("/routes/near/52.0/-0.13?radius=100")).await;
    assert!(far.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn route_failures_map_to_status_codes() {
    let overpass = mock_json(json!({ "elements": [] })).await;
    let app = app("http://127.0.0.1:1", &overpass.uri());

    let (status, body) = call(&app, post("/routes/find", find_request())).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "routing_unavailable");

    let mut bad_mode = find_request();
    bad_mode["mode"] = json!("teleport");
    let (status, body) = call(&app, post("/routes/find", bad_mode)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");

    let (status, _) = call(&app, get("/routes/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&app, get("/routes/7f1c1a6e-2b9c-4f3a-9a57-0d7e2c1b4a10")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
