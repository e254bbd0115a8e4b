use h3o::{CellIndex, LatLng, Resolution};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

const RESOLUTION: Resolution = Resolution::Nine;
const BASELINE_CRIME: f32 = 0.1;
const BASELINE_DARKNESS: f32 = 0.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CellRisk {
    pub crime: f32,
    pub darkness: f32,
}

/// One seed entry of the heuristic grid. The values are spread over `rings`
/// rings of neighbouring cells, fading linearly outwards.
#[derive(Debug, Clone, Deserialize)]
pub struct SafetyCellRecord {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub crime: Option<f32>,
    #[serde(default)]
    pub darkness: Option<f32>,
    #[serde(default)]
    pub rings: u32,
}

// 0.0 = Safe, 1.0 = Dangerous
#[derive(Debug, Clone, Default)]
pub struct SafetyMap {
    cells: HashMap<CellIndex, CellRisk>,
}

impl SafetyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: &[SafetyCellRecord]) -> Self {
        let mut map = Self::new();
        for record in records {
            map.insert(record);
        }
        map
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let records: Vec<SafetyCellRecord> = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(Self::from_records(&records))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn insert(&mut self, record: &SafetyCellRecord) {
        let Some(center) = cell_at(record.lat, record.lon) else {
            return;
        };
        let crime = record.crime.unwrap_or(0.0).clamp(0.0, 1.0);
        let darkness = record.darkness.unwrap_or(0.0).clamp(0.0, 1.0);

        for ring in (0..=record.rings).rev() {
            let falloff = 1.0 - ring as f32 / (record.rings + 1) as f32;
            for cell in center.grid_disk::<Vec<_>>(ring) {
                let entry = self.cells.entry(cell).or_insert(CellRisk {
                    crime: BASELINE_CRIME,
                    darkness: BASELINE_DARKNESS,
                });
                entry.crime = entry.crime.max(crime * falloff);
                entry.darkness = entry.darkness.max(darkness * falloff);
            }
        }
    }

    pub fn cell_risk(&self, lat: f64, lon: f64) -> CellRisk {
        cell_at(lat, lon)
            .and_then(|cell| self.cells.get(&cell).copied())
            .unwrap_or(CellRisk {
                crime: BASELINE_CRIME,
                darkness: BASELINE_DARKNESS,
            })
    }

    /// Static risk of walking along an OSM way, from its tags alone.
    pub fn calculate_edge_risk(&self, tags: &HashMap<&str, &str>) -> f32 {
        let highway = tags.get("highway").copied().unwrap_or("");
        let sidewalk = tags.get("sidewalk").copied().unwrap_or("");
        let has_sidewalk = matches!(sidewalk, "both" | "left" | "right" | "yes" | "separate");

        let mut risk: f32 = match highway {
            "footway" | "pedestrian" | "living_street" => 0.1,
            "residential" => 0.15,
            "path" | "unclassified" | "steps" => 0.2,
            "service" => 0.25,
            "tertiary" => 0.3,
            "motorway" | "trunk" | "primary" | "secondary" if has_sidewalk => 0.35,
            "motorway" | "trunk" | "primary" | "secondary" => 0.5,
            _ => 0.2,
        };

        match tags.get("lit").copied() {
            Some("no") => risk += 0.2,
            Some("yes") | Some("24/7") | Some("automatic") => risk -= 0.05,
            _ => {}
        }
        if matches!(tags.get("surface").copied(), Some("gravel" | "dirt" | "mud" | "sand")) {
            risk += 0.05;
        }

        risk.clamp(0.0, 1.0)
    }
}

fn cell_at(lat: f64, lon: f64) -> Option<CellIndex> {
    LatLng::new(lat, lon).ok().map(|ll| ll.to_cell(RESOLUTION))
}
