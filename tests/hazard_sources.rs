use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use safepath::error::ProviderError;
use safepath::geometry::Coordinate;
use safepath::hazard::{
    Hazard, HazardAggregator, HazardMerger, HazardProvider, HazardSource, OsmHazardsService, Severity,
    TomTomHazardsService,
};
use safepath::store::CommunityHazardStore;
use safepath::upstream::{UpstreamClient, UpstreamPolicy};

const LAT: f64 = 51.5007;
const LON: f64 = -0.1246;

fn upstream() -> UpstreamClient {
    UpstreamClient::new(UpstreamPolicy {
        timeout: Duration::from_secs(2),
        retries: 0,
        ..UpstreamPolicy::default()
    })
    .unwrap()
}

fn overpass_body() -> serde_json::Value {
    json!({
        "elements": [
            { "type": "node", "id": 1, "lat": LAT + 0.0001, "lon": LON, "tags": { "hazard": "slippery" } },
            { "type": "way", "id": 2, "center": { "lat": LAT + 0.0009, "lon": LON },
              "tags": { "highway": "residential", "lit": "no", "name": "Derby Gate" } },
            { "type": "node", "id": 3, "lat": LAT, "lon": LON, "tags": { "amenity": "bench" } },
            { "type": "node", "id": 4, "lat": LAT + 0.05, "lon": LON, "tags": { "hazard": "rockfall" } }
        ]
    })
}

async fn overpass_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/interpreter"))
        .respond_with(ResponseTemplate::new(200).set_body_json(overpass_body()))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn overpass_elements_become_sorted_osm_hazards() {
    let server = overpass_server().await;
    let osm = OsmHazardsService::new(upstream(), format!("{}/api/interpreter", server.uri()));

    let hazards = osm.get_osm_hazards(LAT, LON, 500.0).await.unwrap();

    // The bench is not a hazard and the rockfall is out of range.
    assert_eq!(hazards.len(), 2);
    assert_eq!(hazards[0].id, "node/1");
    assert_eq!(hazards[0].hazard_type, "slippery");
    assert_eq!(hazards[1].id, "way/2");
    assert_eq!(hazards[1].hazard_type, "poor_lighting");
    assert!(hazards.iter().all(|h| h.source == HazardSource::Osm));
    assert!(hazards[0].distance.unwrap() <= hazards[1].distance.unwrap());
}

#[tokio::test]
async fn repeated_overpass_queries_give_identical_results() {
    let server = overpass_server().await;
    let osm = OsmHazardsService::new(upstream(), format!("{}/api/interpreter", server.uri()));

    let first = osm.get_osm_hazards(LAT, LON, 500.0).await.unwrap();
    let second = osm.get_osm_hazards(LAT, LON, 500.0).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn overpass_server_errors_are_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(504))
        .mount(&server)
        .await;
    let osm = OsmHazardsService::new(upstream(), format!("{}/api/interpreter", server.uri()));

    let err = osm.get_osm_hazards(LAT, LON, 500.0).await.unwrap_err();
    assert!(matches!(err, ProviderError::Status { status: 504, .. }), "{err}");
}

#[tokio::test]
async fn tomtom_incidents_are_fetched_with_the_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/traffic/services/5/incidentDetails"))
        .and(query_param("key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "incidents": [{
                "type": "Feature",
                "geometry": { "type": "LineString", "coordinates": [[LON + 0.01, LAT], [LON + 0.0002, LAT]] },
                "properties": {
                    "id": "tt-1", "iconCategory": 9, "magnitudeOfDelay": 2,
                    "events": [{ "description": "Roadworks", "code": 701 }],
                    "from": "Parliament St", "to": "Bridge St"
                }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tomtom = TomTomHazardsService::new(upstream(), server.uri(), Some("test-key".to_string()));
    let hazards = tomtom.get_tomtom_hazards(LAT, LON, 800.0).await.unwrap();

    assert_eq!(hazards.len(), 1);
    let hazard = &hazards[0];
    assert_eq!(hazard.source, HazardSource::Tomtom);
    assert_eq!(hazard.hazard_type, "road_works");
    assert!(hazard.affects_traffic);
    assert!(hazard.description.contains("Parliament St"));
    // The line's closest vertex to the query point is used.
    assert!(hazard.location().distance_m(&Coordinate::new(LAT, LON)) < 20.0);
}

#[tokio::test]
async fn combined_hazards_merge_duplicates_across_sources() {
    let server = overpass_server().await;
    let osm: Arc<dyn HazardProvider> =
        Arc::new(OsmHazardsService::new(upstream(), format!("{}/api/interpreter", server.uri())));
    let community = Arc::new(CommunityHazardStore::with_hazards(vec![Hazard::new(
        HazardSource::Community,
        "c-1",
        Coordinate::new(LAT, LON),
        "slippery_pavement",
        Severity::Critical,
    )]));

    let aggregator = HazardAggregator::new(community, osm, None, HazardMerger::default());
    let combined = aggregator.combined(LAT, LON, 500.0, true).await;

    assert_eq!(combined.sources.community, 1);
    assert_eq!(combined.sources.osm, 2);
    assert_eq!(combined.hazards.len(), 2);
    assert_eq!(combined.hazards[0].id, "c-1");
    assert_eq!(combined.hazards[0].merged_sources, vec![HazardSource::Osm]);
    assert!(combined.warnings.is_empty());
}

#[tokio::test]
async fn a_failing_source_only_adds_a_warning() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let osm: Arc<dyn HazardProvider> =
        Arc::new(OsmHazardsService::new(upstream(), format!("{}/api/interpreter", server.uri())));
    let community = Arc::new(CommunityHazardStore::with_hazards(vec![Hazard::new(
        HazardSource::Community,
        "c-1",
        Coordinate::new(LAT, LON),
        "mugging",
        Severity::High,
    )]));

    let aggregator = HazardAggregator::new(community, osm, None, HazardMerger::default());
    let combined = aggregator.combined(LAT, LON, 500.0, true).await;

    assert_eq!(combined.hazards.len(), 1);
    assert_eq!(combined.warnings.len(), 1);
    assert!(combined.warnings[0].contains("overpass"));
}
