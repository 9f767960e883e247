// src/lib.rs
//! NMEA Tracker Library
//!
//! Frames and parses NMEA-0183 streams into position fixes, checks them
//! against geofences and records them as tracks. Sentences come from a
//! serial GPS receiver, a replayed capture or the built-in simulator.

pub mod config;
pub mod error;
pub mod export;
pub mod geo;
pub mod geofence;
pub mod gps;
pub mod monitor;
pub mod store;
pub mod track;

// Re-export main types for convenience
pub use error::{GpsError, Result};
pub use geo::LatLng;
pub use geofence::{Geofence, GeofenceAlert, GeofenceSet, GeofenceShape};
pub use gps::{PositionFix, SentenceFramer, SentenceSimulator};
pub use monitor::{ConnectionId, GpsMonitor, GpsSource, SourceEvent};
pub use track::{Track, TrackRecorder};
