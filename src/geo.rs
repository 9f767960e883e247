// src/geo.rs
//! Spherical distance and planar containment helpers

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

impl From<[f64; 2]> for LatLng {
    fn from([lat, lng]: [f64; 2]) -> Self {
        Self { lat, lng }
    }
}

/// Great-circle distance in meters (haversine).
pub fn haversine_distance(a: LatLng, b: LatLng) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Initial bearing from `a` towards `b`, degrees in [0, 360).
pub fn initial_bearing(a: LatLng, b: LatLng) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Ray-casting containment test treating lat/lng as planar coordinates.
///
/// The ring may be open or closed. Rings with fewer than three vertices
/// contain nothing.
pub fn point_in_polygon(point: LatLng, ring: &[LatLng]) -> bool {
    if ring.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (pi, pj) = (ring[i], ring[j]);
        if (pi.lat > point.lat) != (pj.lat > point.lat)
            && point.lng < (pj.lng - pi.lng) * (point.lat - pi.lat) / (pj.lat - pi.lat) + pi.lng
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// The four corners of the bounding box of `points`, counter-clockwise from
/// the south-west corner.
pub fn bounding_ring(points: &[LatLng]) -> Option<[LatLng; 4]> {
    let first = points.first()?;
    let (mut south, mut north, mut west, mut east) = (first.lat, first.lat, first.lng, first.lng);
    for p in &points[1..] {
        south = south.min(p.lat);
        north = north.max(p.lat);
        west = west.min(p.lng);
        east = east.max(p.lng);
    }

    Some([
        LatLng::new(south, west),
        LatLng::new(south, east),
        LatLng::new(north, east),
        LatLng::new(north, west),
    ])
}
