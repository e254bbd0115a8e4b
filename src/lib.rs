//! Walking and cycling routes scored for safety.
//!
//! Hazards come from community reports, OpenStreetMap (Overpass) and TomTom
//! traffic incidents; routes come from OSRM or a graph built from an OSM
//! extract.

pub mod api;
pub mod calculator;
pub mod config;
pub mod error;
pub mod geometry;
pub mod graph;
pub mod hazard;
pub mod routing;
pub mod safety;
pub mod scoring;
pub mod store;
pub mod upstream;
