//! In-memory stand-ins for the relational store: community hazard reports and
//! saved route results.

use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::calculator::RouteResult;
use crate::error::ProviderError;
use crate::geometry::Coordinate;
use crate::hazard::{Hazard, HazardProvider, HazardSource, Severity, within_radius};
use crate::routing::TravelMode;
use crate::scoring::TimeOfDay;

/// A hazard reported by a user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HazardReport {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "type")]
    pub hazard_type: String,
    pub severity: Option<Severity>,
    pub priority_level: Option<u8>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub affects_traffic: bool,
    #[serde(default)]
    pub weather_related: bool,
}

#[derive(Debug, Default)]
pub struct CommunityHazardStore {
    hazards: RwLock<Vec<Hazard>>,
}

impl CommunityHazardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hazards(hazards: Vec<Hazard>) -> Self {
        let hazards = hazards
            .into_iter()
            .map(|mut hazard| {
                hazard.source = HazardSource::Community;
                hazard
            })
            .collect();
        Self {
            hazards: RwLock::new(hazards),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let hazards: Vec<Hazard> = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(Self::with_hazards(hazards))
    }

    pub async fn report(&self, report: HazardReport) -> Result<Hazard, String> {
        let location = Coordinate::new(report.latitude, report.longitude);
        if !location.is_valid() {
            return Err(format!("invalid location ({}, {})", report.latitude, report.longitude));
        }
        if report.hazard_type.trim().is_empty() {
            return Err("hazard type is required".to_string());
        }

        let severity = report
            .severity
            .or(report.priority_level.map(Severity::from_level))
            .unwrap_or_default();
        let mut hazard = Hazard::new(
            HazardSource::Community,
            Uuid::new_v4().to_string(),
            location,
            report.hazard_type.trim(),
            severity,
        )
        .with_description(report.description);
        hazard.priority_level = report.priority_level;
        hazard.affects_traffic = report.affects_traffic;
        hazard.weather_related = report.weather_related;

        self.hazards.write().await.push(hazard.clone());
        Ok(hazard)
    }

    pub async fn all(&self) -> Vec<Hazard> {
        self.hazards.read().await.clone()
    }
}

#[async_trait]
impl HazardProvider for CommunityHazardStore {
    fn source(&self) -> HazardSource {
        HazardSource::Community
    }

    async fn get_hazards(&self, lat: f64, lon: f64, radius_m: f64) -> Result<Vec<Hazard>, ProviderError> {
        let snapshot = self.hazards.read().await.clone();
        Ok(within_radius(snapshot, Coordinate::new(lat, lon), radius_m))
    }
}

/// A successful route calculation kept for later lookup.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedRoute {
    pub id: Uuid,
    pub from: Coordinate,
    pub to: Coordinate,
    pub mode: TravelMode,
    pub time_of_day: TimeOfDay,
    pub fastest: RouteResult,
    pub safest: RouteResult,
    pub created_at: DateTime<Utc>,
    /// Meters from the query point, on `near` lookups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

pub const DEFAULT_MAX_SAVED_ROUTES: usize = 1_000;

/// Recent route results. Once `capacity` is reached the oldest is dropped.
#[derive(Debug)]
pub struct RouteStore {
    routes: RwLock<VecDeque<SavedRoute>>,
    capacity: usize,
}

impl Default for RouteStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_SAVED_ROUTES)
    }
}

impl RouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            routes: RwLock::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    pub async fn save(
        &self,
        from: Coordinate,
        to: Coordinate,
        mode: TravelMode,
        time_of_day: TimeOfDay,
        fastest: RouteResult,
        safest: RouteResult,
    ) -> SavedRoute {
        let route = SavedRoute {
            id: Uuid::new_v4(),
            from,
            to,
            mode,
            time_of_day,
            fastest,
            safest,
            created_at: Utc::now(),
            distance: None,
        };
        let mut routes = self.routes.write().await;
        while routes.len() >= self.capacity {
            routes.pop_front();
        }
        routes.push_back(route.clone());
        route
    }

    /// Newest first.
    pub async fn list(&self) -> Vec<SavedRoute> {
        self.routes.read().await.iter().rev().cloned().collect()
    }

    pub async fn get(&self, id: Uuid) -> Option<SavedRoute> {
        self.routes.read().await.iter().find(|route| route.id == id).cloned()
    }

    /// Routes starting or ending within `radius_m` of the point, nearest first.
    pub async fn near(&self, point: Coordinate, radius_m: f64) -> Vec<SavedRoute> {
        let mut found: Vec<SavedRoute> = self
            .routes
            .read()
            .await
            .iter()
            .filter_map(|route| {
                let distance = route.from.distance_m(&point).min(route.to.distance_m(&point));
                (distance <= radius_m).then(|| SavedRoute {
                    distance: Some(distance),
                    ..route.clone()
                })
            })
            .collect();
        found.sort_by(|a, b| a.distance.unwrap_or(f64::MAX).total_cmp(&b.distance.unwrap_or(f64::MAX)));
        found
    }
}
