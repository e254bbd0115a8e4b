use std::collections::{HashMap, HashSet};
use std::path::Path;

use geo::Point;
use geo::prelude::*;
use osmpbf::{Element, ElementReader};
use petgraph::algo::astar;
use petgraph::graph::{EdgeIndex, Graph, NodeIndex};
use petgraph::visit::EdgeRef;
use rstar::primitives::GeomWithData;
use rstar::{AABB, RTree};
use tracing::info;

use crate::geometry::{BoundingBox, Coordinate};
use crate::safety::SafetyMap;

/// Search radii tried in turn when snapping a coordinate to the graph.
const SNAP_RADII_M: [f64; 4] = [100.0, 500.0, 2_000.0, 10_000.0];

#[derive(Debug, Clone, Copy)]
pub struct GeoNode {
    pub lat: f64,
    pub lon: f64,
}

impl GeoNode {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WalkEdge {
    pub distance_meters: f64,
    pub safety_score: f32,
}

/// A path found in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphPath {
    pub nodes: Vec<NodeIndex>,
    pub edges: Vec<EdgeIndex>,
    pub distance_m: f64,
}

type NodePoint = GeomWithData<[f64; 2], NodeIndex>;

pub struct NavigationGraph {
    pub graph: Graph<GeoNode, WalkEdge>,
    index: RTree<NodePoint>,
}

/// Accumulates OSM nodes and walkable ways into a graph.
#[derive(Default)]
pub struct GraphBuilder {
    graph: Graph<GeoNode, WalkEdge>,
    osm_id_map: HashMap<i64, NodeIndex>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a two-way way through `nodes` (`(osm id, lat, lon)`), every edge
    /// carrying `risk`.
    pub fn add_way(&mut self, nodes: &[(i64, f64, f64)], risk: f32) {
        for window in nodes.windows(2) {
            let (id_a, lat_a, lon_a) = window[0];
            let (id_b, lat_b, lon_b) = window[1];

            let idx_a = self.node(id_a, lat_a, lon_a);
            let idx_b = self.node(id_b, lat_b, lon_b);

            let p1 = Point::new(lon_a, lat_a);
            let p2 = Point::new(lon_b, lat_b);
            let edge_data = WalkEdge {
                distance_meters: p1.haversine_distance(&p2),
                safety_score: risk,
            };

            self.graph.add_edge(idx_a, idx_b, edge_data);
            self.graph.add_edge(idx_b, idx_a, edge_data);
        }
    }

    fn node(&mut self, id: i64, lat: f64, lon: f64) -> NodeIndex {
        let graph = &mut self.graph;
        *self
            .osm_id_map
            .entry(id)
            .or_insert_with(|| graph.add_node(GeoNode { lat, lon }))
    }

    pub fn build(self) -> NavigationGraph {
        NavigationGraph::from_graph(self.graph)
    }
}

impl NavigationGraph {
    pub fn from_graph(graph: Graph<GeoNode, WalkEdge>) -> Self {
        let points = graph
            .node_indices()
            .map(|idx| GeomWithData::new([graph[idx].lon, graph[idx].lat], idx))
            .collect();
        Self {
            index: RTree::bulk_load(points),
            graph,
        }
    }

    pub fn from_pbf(path: impl AsRef<Path>, safety_map: &SafetyMap) -> anyhow::Result<Self> {
        let path = path.as_ref();
        info!("Parsing OSM PBF: {}", path.display());

        let mut temp_nodes = HashMap::new();

        // PASS 1: Nodes
        let reader = ElementReader::from_path(path)?;
        reader.for_each(|element| match element {
            Element::Node(node) => {
                temp_nodes.insert(node.id(), (node.lat(), node.lon()));
            }
            Element::DenseNode(node) => {
                temp_nodes.insert(node.id(), (node.lat(), node.lon()));
            }
            _ => {}
        })?;

        info!("Loaded {} nodes. Building Edges...", temp_nodes.len());

        // PASS 2: Ways
        let mut builder = GraphBuilder::new();
        let reader_pass2 = ElementReader::from_path(path)?;
        reader_pass2.for_each(|element| {
            if let Element::Way(way) = element {
                let tags: HashMap<&str, &str> = way.tags().collect();
                if !is_walkable(&tags) {
                    return;
                }

                let risk_score = safety_map.calculate_edge_risk(&tags);
                let nodes: Vec<(i64, f64, f64)> = way
                    .refs()
                    .filter_map(|id| temp_nodes.get(&id).map(|&(lat, lon)| (id, lat, lon)))
                    .collect();
                builder.add_way(&nodes, risk_score);
            }
        })?;

        let nav = builder.build();
        info!(
            "Graph built: {} nodes, {} edges",
            nav.graph.node_count(),
            nav.graph.edge_count()
        );
        Ok(nav)
    }

    pub fn find_nearest_node(&self, lat: f64, lon: f64) -> Option<NodeIndex> {
        let target = Coordinate::new(lat, lon);
        if !target.is_valid() {
            return None;
        }

        SNAP_RADII_M.iter().find_map(|&radius| {
            let bbox = BoundingBox::around(target, radius);
            let envelope = AABB::from_corners([bbox.min_lon, bbox.min_lat], [bbox.max_lon, bbox.max_lat]);
            self.index
                .locate_in_envelope_intersecting(&envelope)
                .map(|point| (point.data, self.graph[point.data].coordinate().distance_m(&target)))
                .filter(|(_, distance)| *distance <= radius)
                .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
                .map(|(idx, _)| idx)
        })
    }

    /// Weighted A* from `start` to `end`.
    ///
    /// Edge cost is `distance * (1 + alpha * safety_score)`, multiplied by
    /// `penalty` for edges in `penalized`. With `alpha = 0` and no penalties this
    /// is the shortest path.
    pub fn shortest_path(
        &self,
        start: NodeIndex,
        end: NodeIndex,
        alpha: f64,
        penalized: &HashSet<EdgeIndex>,
        penalty: f64,
    ) -> Option<GraphPath> {
        let g = &self.graph;
        let dest = g[end].coordinate();

        let (_cost, nodes) = astar(
            g,
            start,
            |finish| finish == end,
            |e| {
                let edge = e.weight();
                let base = edge.distance_meters * (1.0 + alpha * edge.safety_score as f64);
                if penalized.contains(&e.id()) { base * penalty } else { base }
            },
            // Haversine never overestimates, since every cost is at least the distance.
            |n| g[n].coordinate().distance_m(&dest),
        )?;

        let mut edges = Vec::with_capacity(nodes.len().saturating_sub(1));
        let mut distance_m = 0.0;
        for pair in nodes.windows(2) {
            if let Some(edge) = g.find_edge(pair[0], pair[1]) {
                distance_m += g[edge].distance_meters;
                edges.push(edge);
            }
        }

        Some(GraphPath {
            nodes,
            edges,
            distance_m,
        })
    }

    pub fn geometry(&self, path: &GraphPath) -> Vec<Coordinate> {
        path.nodes.iter().map(|&idx| self.graph[idx].coordinate()).collect()
    }
}

fn is_walkable(tags: &HashMap<&str, &str>) -> bool {
    let highway = tags.get("highway").copied().unwrap_or("");
    let foot = tags.get("foot").copied().unwrap_or("");
    let sidewalk = tags.get("sidewalk").copied().unwrap_or("");

    let is_walkable_type = matches!(
        highway,
        "footway" | "path" | "steps" | "pedestrian" | "living_street" | "cycleway"
            | "residential" | "tertiary" | "service" | "unclassified"
    );

    let is_motor_road = matches!(highway, "motorway" | "trunk" | "primary" | "secondary");
    let foot_allowed = matches!(foot, "yes" | "designated" | "permissive");
    let has_sidewalk = matches!(sidewalk, "both" | "left" | "right" | "yes" | "separate");

    foot != "no" && (is_walkable_type || (is_motor_road && (foot_allowed || has_sidewalk)))
}
