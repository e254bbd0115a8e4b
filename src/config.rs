use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::calculator::DEFAULT_MAX_HAZARD_RADIUS_M;
use crate::hazard::DEFAULT_DEDUP_THRESHOLD_M;
use crate::hazard::osm::DEFAULT_OVERPASS_URL;
use crate::hazard::tomtom::DEFAULT_TOMTOM_BASE_URL;
use crate::routing::local::DEFAULT_SAFETY_ALPHA;
use crate::store::DEFAULT_MAX_SAVED_ROUTES;
use crate::upstream::UpstreamPolicy;

pub const DEFAULT_OSRM_URL: &str = "http://localhost:5000";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// OSRM endpoint with foot and bike profiles. Ignored when `pbf_path` is set.
    pub osrm_url: String,
    /// Route over a graph built from this OSM extract instead of OSRM.
    pub pbf_path: Option<PathBuf>,
    pub safety_alpha: f64,
    pub overpass_url: String,
    pub tomtom_api_key: Option<String>,
    pub tomtom_base_url: String,
    pub upstream_timeout: Duration,
    pub upstream_retries: u32,
    pub max_concurrent_upstream: usize,
    pub dedup_threshold_m: f64,
    pub max_hazard_radius_m: f64,
    /// Route results kept for lookup; the oldest are dropped first.
    pub max_saved_routes: usize,
    /// JSON list of heuristic grid cells.
    pub safety_grid_path: Option<PathBuf>,
    /// JSON list of community hazards to seed the store with.
    pub community_hazards_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let upstream = UpstreamPolicy::default();
        Self {
            port: 3000,
            osrm_url: DEFAULT_OSRM_URL.to_string(),
            pbf_path: None,
            safety_alpha: DEFAULT_SAFETY_ALPHA,
            overpass_url: DEFAULT_OVERPASS_URL.to_string(),
            tomtom_api_key: None,
            tomtom_base_url: DEFAULT_TOMTOM_BASE_URL.to_string(),
            upstream_timeout: upstream.timeout,
            upstream_retries: upstream.retries,
            max_concurrent_upstream: upstream.max_concurrent,
            dedup_threshold_m: DEFAULT_DEDUP_THRESHOLD_M,
            max_hazard_radius_m: DEFAULT_MAX_HAZARD_RADIUS_M,
            max_saved_routes: DEFAULT_MAX_SAVED_ROUTES,
            safety_grid_path: None,
            community_hazards_path: None,
        }
    }
}

impl Config {
    /// Reads the environment (and `.env`, if present). Unset variables keep
    /// their defaults; malformed ones are an error.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Config::default();
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Config {
            port: parsed(&lookup, "PORT")?.unwrap_or(defaults.port),
            osrm_url: text("OSRM_URL").unwrap_or(defaults.osrm_url),
            pbf_path: text("PBF_PATH").map(PathBuf::from),
            safety_alpha: parsed(&lookup, "SAFETY_ALPHA")?.unwrap_or(defaults.safety_alpha),
            overpass_url: text("OVERPASS_URL").unwrap_or(defaults.overpass_url),
            tomtom_api_key: text("TOMTOM_API_KEY"),
            tomtom_base_url: text("TOMTOM_BASE_URL").unwrap_or(defaults.tomtom_base_url),
            upstream_timeout: parsed::<u64>(&lookup, "UPSTREAM_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.upstream_timeout),
            upstream_retries: parsed(&lookup, "UPSTREAM_RETRIES")?.unwrap_or(defaults.upstream_retries),
            max_concurrent_upstream: parsed(&lookup, "MAX_CONCURRENT_UPSTREAM")?
                .unwrap_or(defaults.max_concurrent_upstream),
            dedup_threshold_m: parsed(&lookup, "DEDUP_THRESHOLD_M")?.unwrap_or(defaults.dedup_threshold_m),
            max_hazard_radius_m: parsed(&lookup, "MAX_HAZARD_RADIUS_M")?.unwrap_or(defaults.max_hazard_radius_m),
            max_saved_routes: parsed(&lookup, "MAX_SAVED_ROUTES")?.unwrap_or(defaults.max_saved_routes),
            safety_grid_path: text("SAFETY_GRID_PATH").map(PathBuf::from),
            community_hazards_path: text("COMMUNITY_HAZARDS_PATH").map(PathBuf::from),
        };

        if config.max_concurrent_upstream == 0 {
            anyhow::bail!("MAX_CONCURRENT_UPSTREAM must be at least 1");
        }
        if config.max_saved_routes == 0 {
            anyhow::bail!("MAX_SAVED_ROUTES must be at least 1");
        }
        if !config.safety_alpha.is_finite() || config.safety_alpha < 0.0 {
            anyhow::bail!("SAFETY_ALPHA must be a finite number >= 0");
        }
        if config.dedup_threshold_m.is_nan()
            || config.dedup_threshold_m < 0.0
            || config.max_hazard_radius_m.is_nan()
            || config.max_hazard_radius_m <= 0.0
        {
            anyhow::bail!("DEDUP_THRESHOLD_M must be >= 0 and MAX_HAZARD_RADIUS_M > 0");
        }
        Ok(config)
    }

    pub fn upstream_policy(&self) -> UpstreamPolicy {
        UpstreamPolicy {
            timeout: self.upstream_timeout,
            retries: self.upstream_retries,
            max_concurrent: self.max_concurrent_upstream,
            ..UpstreamPolicy::default()
        }
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {} value '{}': {}", key, raw, e)),
        None => Ok(None),
    }
}
