use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use petgraph::graph::{EdgeIndex, NodeIndex};
use tracing::debug;

use super::{RoutePath, RoutingProvider, TravelMode};
use crate::error::{ProviderError, RouteError};
use crate::geometry::Coordinate;
use crate::graph::{GraphPath, NavigationGraph};

const PROVIDER: &str = "local-graph";
pub const DEFAULT_SAFETY_ALPHA: f64 = 2.0;
/// Cost multiplier on edges of the fastest path when looking for a detour.
const REUSE_PENALTY: f64 = 1.4;

/// Routes over an in-process navigation graph built from an OSM extract.
///
/// Alternatives are the risk-weighted path (`safety_alpha`) and a path that
/// avoids reusing the fastest path's edges.
#[derive(Clone)]
pub struct LocalRouter {
    graph: Arc<NavigationGraph>,
    safety_alpha: f64,
}

impl LocalRouter {
    pub fn new(graph: Arc<NavigationGraph>, safety_alpha: f64) -> Self {
        Self { graph, safety_alpha }
    }

    fn snap(graph: &NavigationGraph, waypoints: &[Coordinate]) -> Result<Vec<NodeIndex>, RouteError> {
        waypoints
            .iter()
            .map(|point| {
                graph.find_nearest_node(point.lat, point.lon).ok_or_else(|| {
                    RouteError::InvalidInput(format!(
                        "({:.5}, {:.5}) is not near any walkable way",
                        point.lat, point.lon
                    ))
                })
            })
            .collect()
    }

    /// Chains one search per leg into a single path.
    fn route_legs(
        graph: &NavigationGraph,
        stops: &[NodeIndex],
        alpha: f64,
        penalized: &HashSet<EdgeIndex>,
    ) -> Option<GraphPath> {
        let mut joined = GraphPath {
            nodes: Vec::new(),
            edges: Vec::new(),
            distance_m: 0.0,
        };
        for leg in stops.windows(2) {
            let part = graph.shortest_path(leg[0], leg[1], alpha, penalized, REUSE_PENALTY)?;
            let skip = usize::from(!joined.nodes.is_empty());
            joined.nodes.extend(part.nodes.into_iter().skip(skip));
            joined.edges.extend(part.edges);
            joined.distance_m += part.distance_m;
        }
        Some(joined)
    }

    fn compute(
        graph: &NavigationGraph,
        waypoints: &[Coordinate],
        mode: TravelMode,
        alternatives: bool,
        safety_alpha: f64,
    ) -> Result<Vec<RoutePath>, RouteError> {
        let stops = Self::snap(graph, waypoints)?;
        let none = HashSet::new();
        let fastest = Self::route_legs(graph, &stops, 0.0, &none).ok_or(RouteError::NoRoute)?;

        let mut found = vec![fastest.clone()];
        if alternatives {
            let reused: HashSet<EdgeIndex> = fastest.edges.iter().copied().collect();
            let candidates = [
                Self::route_legs(graph, &stops, safety_alpha, &none),
                Self::route_legs(graph, &stops, 0.0, &reused),
            ];
            for candidate in candidates.into_iter().flatten() {
                if found.iter().all(|known| known.nodes != candidate.nodes) {
                    found.push(candidate);
                }
            }
        }

        debug!(paths = found.len(), "local graph routes computed");
        Ok(found
            .iter()
            .map(|path| RoutePath {
                geometry: graph.geometry(path),
                distance_m: path.distance_m,
                duration_s: path.distance_m / mode.speed_mps(),
            })
            .collect())
    }
}

#[async_trait]
impl RoutingProvider for LocalRouter {
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

        // A* over a city graph is CPU-bound; keep it off the async workers.
        let graph = Arc::clone(&self.graph);
        let waypoints = waypoints.to_vec();
        let alpha = self.safety_alpha;
        tokio::task::spawn_blocking(move || Self::compute(&graph, &waypoints, mode, alternatives, alpha))
            .await
            .map_err(|err| {
                RouteError::Unavailable(ProviderError::InvalidResponse {
                    provider: PROVIDER,
                    reason: format!("routing task failed: {err}"),
                })
            })?
    }
}
