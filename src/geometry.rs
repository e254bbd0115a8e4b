use geo::Point;
use geo::prelude::*;
use itertools::Itertools;
use rstar::AABB;
use rstar::primitives::GeomWithData;
use serde::{Deserialize, Serialize};

/// Mean earth radius used by the haversine helpers in `geo`.
const EARTH_RADIUS_M: f64 = 6_371_008.8;
const METERS_PER_DEG_LAT: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
/// Haversine circles bulge slightly past their equirectangular box away from
/// the equator.
const BOX_SLACK: f64 = 1.001;

/// `[lon, lat]` point carrying the index of the item it was built from.
pub type IndexedPoint = GeomWithData<[f64; 2], usize>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    pub fn to_point(self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }

    pub fn from_point(point: Point<f64>) -> Self {
        Self { lat: point.y(), lon: point.x() }
    }

    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        self.to_point().haversine_distance(&other.to_point())
    }

    /// Initial bearing towards `other`, degrees clockwise from north.
    pub fn bearing_to(&self, other: &Coordinate) -> f64 {
        self.to_point().haversine_bearing(other.to_point())
    }

    pub fn destination(&self, bearing_deg: f64, distance_m: f64) -> Coordinate {
        Coordinate::from_point(self.to_point().haversine_destination(bearing_deg, distance_m))
    }

    pub fn midpoint(&self, other: &Coordinate) -> Coordinate {
        Coordinate {
            lat: (self.lat + other.lat) / 2.0,
            lon: (self.lon + other.lon) / 2.0,
        }
    }

    /// GeoJSON order.
    pub fn lon_lat(&self) -> [f64; 2] {
        [self.lon, self.lat]
    }
}

/// Axis-aligned box in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Box enclosing the circle of `radius_m` around `center`.
    pub fn around(center: Coordinate, radius_m: f64) -> Self {
        Self {
            min_lat: center.lat,
            min_lon: center.lon,
            max_lat: center.lat,
            max_lon: center.lon,
        }
        .expand(radius_m)
    }

    /// Tightest box holding every point, `None` for an empty slice.
    pub fn covering(points: &[Coordinate]) -> Option<Self> {
        let first = points.first()?;
        Some(points.iter().fold(
            Self {
                min_lat: first.lat,
                min_lon: first.lon,
                max_lat: first.lat,
                max_lon: first.lon,
            },
            |b, p| Self {
                min_lat: b.min_lat.min(p.lat),
                min_lon: b.min_lon.min(p.lon),
                max_lat: b.max_lat.max(p.lat),
                max_lon: b.max_lon.max(p.lon),
            },
        ))
    }

    /// Grows the box by `meters` on every side.
    pub fn expand(self, meters: f64) -> Self {
        let d_lat = meters * BOX_SLACK / METERS_PER_DEG_LAT;
        let poleward = self.min_lat.abs().max(self.max_lat.abs()).min(90.0);
        let d_lon = meters * BOX_SLACK / (METERS_PER_DEG_LAT * poleward.to_radians().cos().max(0.01));
        Self {
            min_lat: (self.min_lat - d_lat).max(-90.0),
            min_lon: (self.min_lon - d_lon).max(-180.0),
            max_lat: (self.max_lat + d_lat).min(90.0),
            max_lon: (self.max_lon + d_lon).min(180.0),
        }
    }

    /// The box as an `rstar` envelope over `[lon, lat]` points.
    pub fn envelope(&self) -> AABB<[f64; 2]> {
        AABB::from_corners([self.min_lon, self.min_lat], [self.max_lon, self.max_lat])
    }
}

/// Distance in meters from `p` to the segment `a`-`b`.
///
/// Uses an equirectangular projection centred on `p`, which is accurate to well
/// under a meter at the few-hundred-meter scales hazards are matched at.
pub fn distance_to_segment_m(p: Coordinate, a: Coordinate, b: Coordinate) -> f64 {
    let scale_x = p.lat.to_radians().cos() * EARTH_RADIUS_M;
    let project = |c: Coordinate| {
        (
            (c.lon - p.lon).to_radians() * scale_x,
            (c.lat - p.lat).to_radians() * EARTH_RADIUS_M,
        )
    };
    let (ax, ay) = project(a);
    let (bx, by) = project(b);
    let (dx, dy) = (bx - ax, by - ay);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 0.0 {
        (-(ax * dx + ay * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (ax + t * dx, ay + t * dy);
    (cx * cx + cy * cy).sqrt()
}

pub fn path_length_m(path: &[Coordinate]) -> f64 {
    path.iter().tuple_windows().map(|(a, b)| a.distance_m(b)).sum()
}

/// `path` with extra vertices interpolated so no step exceeds `max_step_m`.
pub fn densify(path: &[Coordinate], max_step_m: f64) -> Vec<Coordinate> {
    let mut points: Vec<Coordinate> = path.first().copied().into_iter().collect();
    for (a, b) in path.iter().tuple_windows() {
        let steps = if max_step_m > 0.0 {
            (a.distance_m(b) / max_step_m).ceil().max(1.0) as usize
        } else {
            1
        };
        points.extend((1..=steps).map(|i| {
            let t = i as f64 / steps as f64;
            Coordinate::new(a.lat + (b.lat - a.lat) * t, a.lon + (b.lon - a.lon) * t)
        }));
    }
    points
}

/// A stretch of a path, used as the unit of safety classification.
#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub points: Vec<Coordinate>,
    pub length_m: f64,
}

impl PathSegment {
    pub fn midpoint(&self) -> Coordinate {
        let half = self.length_m / 2.0;
        let mut walked = 0.0;
        for (a, b) in self.points.iter().tuple_windows() {
            let step = a.distance_m(b);
            if step > 0.0 && walked + step >= half {
                let t = (half - walked) / step;
                return Coordinate {
                    lat: a.lat + (b.lat - a.lat) * t,
                    lon: a.lon + (b.lon - a.lon) * t,
                };
            }
            walked += step;
        }
        self.points.first().copied().unwrap_or(Coordinate::new(0.0, 0.0))
    }

    pub fn distance_to_m(&self, p: Coordinate) -> f64 {
        match self.points.as_slice() {
            [] => f64::INFINITY,
            [only] => only.distance_m(&p),
            points => points
                .iter()
                .tuple_windows()
                .map(|(a, b)| distance_to_segment_m(p, *a, *b))
                .fold(f64::INFINITY, f64::min),
        }
    }

    pub fn bearing(&self) -> f64 {
        match (self.points.first(), self.points.last()) {
            (Some(a), Some(b)) if a != b => a.bearing_to(b),
            _ => 0.0,
        }
    }
}

/// Splits `path` into consecutive segments of roughly `target_m` meters.
///
/// Vertices are never moved; a segment closes at the first vertex that reaches
/// the target length, so segments may run long on sparse geometries.
pub fn split_into_segments(path: &[Coordinate], target_m: f64) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    let Some(first) = path.first() else {
        return segments;
    };

    let mut current = vec![*first];
    let mut length = 0.0;
    for (a, b) in path.iter().tuple_windows() {
        length += a.distance_m(b);
        current.push(*b);
        if length >= target_m {
            segments.push(PathSegment { points: std::mem::replace(&mut current, vec![*b]), length_m: length });
            length = 0.0;
        }
    }
    if current.len() > 1 {
        segments.push(PathSegment { points: current, length_m: length });
    }
    segments
}
