// src/geofence.rs
//! Geofence regions and containment checks

use crate::{
    error::{GpsError, Result},
    geo::{self, LatLng},
    gps::PositionFix,
    store::Keyed,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_COLOR: &str = "#3388ff";

/// Region geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GeofenceShape {
    Circle { center: LatLng, radius: f64 }, // radius in meters
    Polygon { vertices: Vec<LatLng> },
    /// Only the bounding extents of the ring matter.
    Rectangle { vertices: Vec<LatLng> },
}

impl GeofenceShape {
    pub fn kind(&self) -> &'static str {
        match self {
            GeofenceShape::Circle { .. } => "circle",
            GeofenceShape::Polygon { .. } => "polygon",
            GeofenceShape::Rectangle { .. } => "rectangle",
        }
    }

    /// Rectangle spanning two opposite corners.
    pub fn rectangle(a: LatLng, b: LatLng) -> Self {
        GeofenceShape::Rectangle {
            vertices: vec![
                LatLng::new(a.lat, a.lng),
                LatLng::new(a.lat, b.lng),
                LatLng::new(b.lat, b.lng),
                LatLng::new(b.lat, a.lng),
            ],
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            GeofenceShape::Circle { center, radius } => {
                if !center.is_finite() {
                    return Err(GpsError::Geofence("circle center is not finite".to_string()));
                }
                if !radius.is_finite() || *radius < 0.0 {
                    return Err(GpsError::Geofence(format!("invalid circle radius {}", radius)));
                }
            }
            GeofenceShape::Polygon { vertices } | GeofenceShape::Rectangle { vertices } => {
                if vertices.len() < 3 {
                    return Err(GpsError::Geofence(format!(
                        "{} needs at least 3 vertices, got {}",
                        self.kind(),
                        vertices.len()
                    )));
                }
                if !vertices.iter().all(LatLng::is_finite) {
                    return Err(GpsError::Geofence(format!("{} has a non-finite vertex", self.kind())));
                }
            }
        }
        Ok(())
    }

    /// Whether the shape contains `point`.
    pub fn contains(&self, point: LatLng) -> bool {
        match self {
            GeofenceShape::Circle { center, radius } => geo::haversine_distance(*center, point) <= *radius,
            GeofenceShape::Polygon { vertices } => geo::point_in_polygon(point, vertices),
            GeofenceShape::Rectangle { vertices } => {
                geo::bounding_ring(vertices).map_or(false, |ring| geo::point_in_polygon(point, &ring))
            }
        }
    }
}

/// A named region used to test containment of fixes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub id: String,
    pub name: String,
    pub shape: GeofenceShape,
    pub color: String,
}

impl Geofence {
    pub fn new(id: impl Into<String>, name: impl Into<String>, shape: GeofenceShape) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            shape,
            color: DEFAULT_COLOR.to_string(),
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn contains(&self, fix: &PositionFix) -> bool {
        self.shape.contains(fix.position())
    }
}

impl Keyed for Geofence {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Targeted field update; `None` leaves the field as is.
#[derive(Debug, Clone, Default)]
pub struct GeofenceUpdate {
    pub name: Option<String>,
    pub shape: Option<GeofenceShape>,
    pub color: Option<String>,
}

/// A region that currently contains the last evaluated fix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeofenceAlert {
    pub id: String,
    pub name: String,
}

/// Evaluate `fix` against every region, from scratch.
///
/// Alerts come back in region order.
pub fn evaluate(fix: &PositionFix, regions: &[Geofence]) -> Vec<GeofenceAlert> {
    regions
        .iter()
        .filter(|region| region.contains(fix))
        .map(|region| GeofenceAlert {
            id: region.id.clone(),
            name: region.name.clone(),
        })
        .collect()
}

/// The user's regions plus the alert set from the last check.
#[derive(Debug, Clone, Default)]
pub struct GeofenceSet {
    geofences: Vec<Geofence>,
    alerts: Vec<GeofenceAlert>,
}

impl GeofenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from previously stored regions, skipping any that no longer validate.
    pub fn from_geofences(geofences: impl IntoIterator<Item = Geofence>) -> Self {
        let mut set = Self::new();
        for geofence in geofences {
            if let Err(e) = set.add(geofence) {
                debug!("Skipping geofence: {}", e);
            }
        }
        set
    }

    /// Add a new region. Ids must be unique.
    pub fn add(&mut self, geofence: Geofence) -> Result<()> {
        geofence.shape.validate()?;
        if self.get(&geofence.id).is_some() {
            return Err(GpsError::Geofence(format!("duplicate geofence id {}", geofence.id)));
        }
        self.geofences.push(geofence);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<Geofence> {
        let index = self.geofences.iter().position(|g| g.id == id)?;
        Some(self.geofences.remove(index))
    }

    /// Replace a region wholesale, matched by id.
    pub fn replace(&mut self, geofence: Geofence) -> Result<()> {
        geofence.shape.validate()?;
        let existing = self
            .geofences
            .iter_mut()
            .find(|g| g.id == geofence.id)
            .ok_or_else(|| GpsError::NotFound(format!("geofence {}", geofence.id)))?;
        *existing = geofence;
        Ok(())
    }

    /// Apply a targeted update to the region with `id`.
    pub fn update(&mut self, id: &str, update: GeofenceUpdate) -> Result<&Geofence> {
        if let Some(shape) = &update.shape {
            shape.validate()?;
        }
        let existing = self
            .geofences
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| GpsError::NotFound(format!("geofence {}", id)))?;

        if let Some(name) = update.name {
            existing.name = name;
        }
        if let Some(shape) = update.shape {
            existing.shape = shape;
        }
        if let Some(color) = update.color {
            existing.color = color;
        }
        Ok(existing)
    }

    pub fn get(&self, id: &str) -> Option<&Geofence> {
        self.geofences.iter().find(|g| g.id == id)
    }

    pub fn geofences(&self) -> &[Geofence] {
        &self.geofences
    }

    pub fn len(&self) -> usize {
        self.geofences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geofences.is_empty()
    }

    /// Evaluate `fix` and replace the current alert set with the result.
    pub fn check(&mut self, fix: &PositionFix) -> &[GeofenceAlert] {
        self.alerts = evaluate(fix, &self.geofences);
        &self.alerts
    }

    pub fn alerts(&self) -> &[GeofenceAlert] {
        &self.alerts
    }

    pub fn alert_ids(&self) -> Vec<&str> {
        self.alerts.iter().map(|a| a.id.as_str()).collect()
    }
}
