//! Routing backends. Both produce plain geometries with distance and duration;
//! safety is judged afterwards by the classifier.

pub mod local;
pub mod osrm;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RouteError;
use crate::geometry::Coordinate;

pub use local::LocalRouter;
pub use osrm::OsrmRouter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    Walking,
    Cycling,
}

impl TravelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TravelMode::Walking => "walking",
            TravelMode::Cycling => "cycling",
        }
    }

    /// Average speed used when a backend reports no duration.
    pub fn speed_mps(&self) -> f64 {
        match self {
            TravelMode::Walking => 5.0 / 3.6,
            TravelMode::Cycling => 15.0 / 3.6,
        }
    }
}

impl fmt::Display for TravelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TravelMode {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "walking" | "walk" | "foot" | "pedestrian" => Ok(TravelMode::Walking),
            "cycling" | "cycle" | "bike" | "bicycle" => Ok(TravelMode::Cycling),
            other => Err(RouteError::InvalidInput(format!("unsupported travel mode '{other}'"))),
        }
    }
}

/// One drivable (walkable, rideable) path from a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePath {
    pub geometry: Vec<Coordinate>,
    pub distance_m: f64,
    pub duration_s: f64,
}

#[async_trait]
pub trait RoutingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Routes through `waypoints` in order. With `alternatives` the backend may
    /// return more than one path; the first is its preferred one.
    async fn route(
        &self,
        waypoints: &[Coordinate],
        mode: TravelMode,
        alternatives: bool,
    ) -> Result<Vec<RoutePath>, RouteError>;
}
