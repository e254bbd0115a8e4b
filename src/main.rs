use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use safepath::api::{self, AppState};
use safepath::calculator::{CalculatorSettings, RouteCalculator};
use safepath::config::Config;
use safepath::graph::NavigationGraph;
use safepath::hazard::{HazardAggregator, HazardMerger, HazardProvider, OsmHazardsService, TomTomHazardsService};
use safepath::routing::{LocalRouter, OsrmRouter, RoutingProvider};
use safepath::safety::SafetyMap;
use safepath::scoring::RouteClassifier;
use safepath::store::{CommunityHazardStore, RouteStore};
use safepath::upstream::UpstreamClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    // 1. Initialize Safety Data
    let safety_map = Arc::new(match &config.safety_grid_path {
        Some(path) => SafetyMap::from_path(path)?,
        None => SafetyMap::new(),
    });
    info!(cells = safety_map.len(), "safety grid ready");

    let upstream = UpstreamClient::new(config.upstream_policy())?;

    // 2. Routing backend: a local OSM graph when an extract is given, OSRM otherwise
    let router: Arc<dyn RoutingProvider> = match config.pbf_path.clone() {
        Some(pbf_path) => {
            let map = Arc::clone(&safety_map);
            let nav_graph = tokio::task::spawn_blocking(move || NavigationGraph::from_pbf(&pbf_path, &map)).await??;
            Arc::new(LocalRouter::new(Arc::new(nav_graph), config.safety_alpha))
        }
        None => Arc::new(OsrmRouter::new(upstream.clone(), &config.osrm_url)),
    };

    // 3. Hazard sources
    let community = Arc::new(match &config.community_hazards_path {
        Some(path) => CommunityHazardStore::from_path(path)?,
        None => CommunityHazardStore::new(),
    });
    let osm = Arc::new(OsmHazardsService::new(upstream.clone(), config.overpass_url.clone()));
    let tomtom = Arc::new(TomTomHazardsService::new(
        upstream.clone(),
        config.tomtom_base_url.clone(),
        config.tomtom_api_key.clone(),
    ));
    let tomtom_provider: Option<Arc<dyn HazardProvider>> = if tomtom.is_configured() {
        Some(tomtom.clone())
    } else {
        warn!("TOMTOM_API_KEY not set; traffic incidents are disabled");
        None
    };
    let hazards = HazardAggregator::new(
        community.clone(),
        osm.clone(),
        tomtom_provider,
        HazardMerger::new(config.dedup_threshold_m),
    );

    let calculator = RouteCalculator::new(
        router,
        hazards.clone(),
        RouteClassifier::new(Arc::clone(&safety_map)),
        CalculatorSettings {
            max_hazard_radius_m: config.max_hazard_radius_m,
            max_concurrent_routes: config.max_concurrent_upstream,
            ..CalculatorSettings::default()
        },
    );

    let shared_state = Arc::new(AppState {
        calculator,
        hazards,
        osm,
        tomtom,
        community,
        routes: RouteStore::with_capacity(config.max_saved_routes),
        max_hazard_radius_m: config.max_hazard_radius_m,
    });

    let app = api::router(shared_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("API Server running on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, finishing in-flight requests");
}
