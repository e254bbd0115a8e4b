use std::sync::Arc;

use futures::future::join_all;
use itertools::Itertools;
use serde::Serialize;
use tracing::warn;

use super::{Hazard, HazardMerger, HazardProvider, HazardSource};
use crate::error::ProviderError;
use crate::geometry::Coordinate;

type SourceResult = Result<Vec<Hazard>, ProviderError>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceCounts {
    pub community: usize,
    pub osm: usize,
    pub tomtom: usize,
}

/// Hazards from every source around one point, deduplicated.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedHazards {
    pub hazards: Vec<Hazard>,
    /// Hazards each source returned before merging.
    pub sources: SourceCounts,
    /// Sources that failed and contributed nothing.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Fans a hazard query out to community, OSM and TomTom sources.
///
/// A failing source is logged and contributes no hazards; the query itself
/// does not fail.
#[derive(Clone)]
pub struct HazardAggregator {
    community: Arc<dyn HazardProvider>,
    osm: Arc<dyn HazardProvider>,
    tomtom: Option<Arc<dyn HazardProvider>>,
    merger: HazardMerger,
}

impl HazardAggregator {
    pub fn new(
        community: Arc<dyn HazardProvider>,
        osm: Arc<dyn HazardProvider>,
        tomtom: Option<Arc<dyn HazardProvider>>,
        merger: HazardMerger,
    ) -> Self {
        Self {
            community,
            osm,
            tomtom,
            merger,
        }
    }

    pub fn has_tomtom(&self) -> bool {
        self.tomtom.is_some()
    }

    pub async fn combined(&self, lat: f64, lon: f64, radius_m: f64, include_tomtom: bool) -> CombinedHazards {
        self.combined_along(&[Coordinate::new(lat, lon)], radius_m, include_tomtom)
            .await
    }

    /// Hazards within `radius_m` of any of `centers`.
    ///
    /// Every source is queried once per center. A report seen from more than
    /// one center is kept once, and merging runs over the union.
    pub async fn combined_along(&self, centers: &[Coordinate], radius_m: f64, include_tomtom: bool) -> CombinedHazards {
        let fetched = join_all(
            centers
                .iter()
                .map(|center| self.fetch_area(*center, radius_m, include_tomtom)),
        )
        .await;

        let mut warnings = Vec::new();
        let (mut community, mut osm, mut tomtom) = (Vec::new(), Vec::new(), Vec::new());
        for (from_community, from_osm, from_tomtom) in fetched {
            community.extend(settle(self.community.source(), from_community, &mut warnings));
            osm.extend(settle(self.osm.source(), from_osm, &mut warnings));
            if let Some(result) = from_tomtom {
                tomtom.extend(settle(HazardSource::Tomtom, result, &mut warnings));
            }
        }
        let (community, osm, tomtom) = (distinct(community), distinct(osm), distinct(tomtom));

        let sources = SourceCounts {
            community: community.len(),
            osm: osm.len(),
            tomtom: tomtom.len(),
        };
        let hazards = self.merger.merge(&self.merger.merge(&community, &osm), &tomtom);

        CombinedHazards {
            hazards,
            sources,
            warnings: warnings.into_iter().unique().collect(),
        }
    }

    async fn fetch_area(
        &self,
        center: Coordinate,
        radius_m: f64,
        include_tomtom: bool,
    ) -> (SourceResult, SourceResult, Option<SourceResult>) {
        let (lat, lon) = (center.lat, center.lon);
        let tomtom = async {
            match (&self.tomtom, include_tomtom) {
                (Some(provider), true) => Some(provider.get_hazards(lat, lon, radius_m).await),
                _ => None,
            }
        };

        tokio::join!(
            self.community.get_hazards(lat, lon, radius_m),
            self.osm.get_hazards(lat, lon, radius_m),
            tomtom,
        )
    }
}

fn distinct(hazards: Vec<Hazard>) -> Vec<Hazard> {
    hazards.into_iter().unique_by(|hazard| hazard.id.clone()).collect()
}

fn settle(source: HazardSource, result: SourceResult, warnings: &mut Vec<String>) -> Vec<Hazard> {
    match result {
        Ok(hazards) => hazards,
        Err(err) => {
            warn!(source = source.as_str(), "hazard source failed, continuing without it: {}", err);
            warnings.push(err.to_string());
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Coordinate;
    use crate::hazard::Severity;
    use async_trait::async_trait;

    struct Fixed(HazardSource, Vec<Hazard>);

    #[async_trait]
    impl HazardProvider for Fixed {
        fn source(&self) -> HazardSource {
            self.0
        }

        async fn get_hazards(&self, _lat: f64, _lon: f64, _radius_m: f64) -> Result<Vec<Hazard>, ProviderError> {
            Ok(self.1.clone())
        }
    }

    struct Broken;

    #[async_trait]
    impl HazardProvider for Broken {
        fn source(&self) -> HazardSource {
            HazardSource::Tomtom
        }

        async fn get_hazards(&self, _lat: f64, _lon: f64, _radius_m: f64) -> Result<Vec<Hazard>, ProviderError> {
            Err(ProviderError::Status { provider: "tomtom", status: 503 })
        }
    }

    fn at(source: HazardSource, id: &str, lat: f64) -> Hazard {
        Hazard::new(source, id, Coordinate::new(lat, -6.26), "road_works", Severity::Medium)
    }

    #[tokio::test]
    async fn sources_are_merged_across_providers() {
        let aggregator = HazardAggregator::new(
            Arc::new(Fixed(HazardSource::Community, vec![at(HazardSource::Community, "c", 53.35)])),
            Arc::new(Fixed(HazardSource::Osm, vec![at(HazardSource::Osm, "o", 53.35)])),
            Some(Arc::new(Fixed(HazardSource::Tomtom, vec![at(HazardSource::Tomtom, "t", 53.36)]))),
            HazardMerger::default(),
        );

        let combined = aggregator.combined(53.35, -6.26, 2000.0, true).await;
        assert_eq!(combined.hazards.len(), 2);
        assert_eq!(combined.sources.osm, 1);
        assert_eq!(combined.sources.tomtom, 1);
        assert!(combined.warnings.is_empty());

        let without_tomtom = aggregator.combined(53.35, -6.26, 2000.0, false).await;
        assert_eq!(without_tomtom.hazards.len(), 1);
        assert_eq!(without_tomtom.sources.tomtom, 0);
    }

    struct Around(HazardSource, Vec<Hazard>);

    #[async_trait]
    impl HazardProvider for Around {
        fn source(&self) -> HazardSource {
            self.0
        }

        async fn get_hazards(&self, lat: f64, lon: f64, radius_m: f64) -> Result<Vec<Hazard>, ProviderError> {
            Ok(crate::hazard::within_radius(self.1.clone(), Coordinate::new(lat, lon), radius_m))
        }
    }

    #[tokio::test]
    async fn overlapping_areas_do_not_duplicate_hazards() {
        let osm = vec![
            at(HazardSource::Osm, "west", 53.35),
            at(HazardSource::Osm, "shared", 53.36),
            at(HazardSource::Osm, "east", 53.37),
        ];
        let aggregator = HazardAggregator::new(
            Arc::new(Fixed(HazardSource::Community, vec![])),
            Arc::new(Around(HazardSource::Osm, osm)),
            Some(Arc::new(Broken)),
            HazardMerger::default(),
        );

        let centers = [Coordinate::new(53.352, -6.26), Coordinate::new(53.368, -6.26)];
        let combined = aggregator.combined_along(&centers, 1_500.0, true).await;
        let mut ids: Vec<&str> = combined.hazards.iter().map(|h| h.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["east", "shared", "west"]);
        assert_eq!(combined.sources.osm, 3);
        assert_eq!(combined.warnings.len(), 1);
    }

    #[tokio::test]
    async fn failing_source_becomes_a_warning() {
        let aggregator = HazardAggregator::new(
            Arc::new(Fixed(HazardSource::Community, vec![])),
            Arc::new(Fixed(HazardSource::Osm, vec![at(HazardSource::Osm, "o", 53.35)])),
            Some(Arc::new(Broken)),
            HazardMerger::default(),
        );

        let combined = aggregator.combined(53.35, -6.26, 500.0, true).await;
        assert_eq!(combined.hazards.len(), 1);
        assert_eq!(combined.warnings.len(), 1);
        assert!(combined.warnings[0].contains("503"));
    }
}
