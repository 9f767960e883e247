// src/track.rs
//! Track recording: ordered fixes with running distance and duration

use crate::{
    error::Result,
    gps::PositionFix,
    store::{Keyed, Store},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_TRACK_NAME: &str = "Unnamed Track";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub fixes: Vec<PositionFix>,
    pub started_at: DateTime<Utc>,
    pub distance: f64, // meters
    pub duration: f64, // seconds
}

impl Track {
    pub fn new(name: &str) -> Self {
        Self::starting_at(name, Utc::now())
    }

    pub fn starting_at(name: &str, started_at: DateTime<Utc>) -> Self {
        let name = name.trim();
        Self {
            id: Uuid::new_v4().to_string(),
            name: if name.is_empty() {
                DEFAULT_TRACK_NAME.to_string()
            } else {
                name.to_string()
            },
            fixes: Vec::new(),
            started_at,
            distance: 0.0,
            duration: 0.0,
        }
    }

    /// Append a fix, extending distance by the hop from the previous fix.
    ///
    /// Duration is measured from the track start to the new fix, so it can go
    /// negative when fixes carry timestamps older than the recording (a
    /// replayed capture, for instance).
    pub fn push(&mut self, fix: PositionFix) {
        if let Some(last) = self.fixes.last() {
            self.distance += last.distance_to(&fix);
        }
        self.duration = fix
            .timestamp
            .signed_duration_since(self.started_at)
            .num_milliseconds() as f64
            / 1000.0;
        self.fixes.push(fix);
    }

    pub fn rename(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn point_count(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    pub fn last_fix(&self) -> Option<&PositionFix> {
        self.fixes.last()
    }

    /// Average speed in km/h over the recorded duration
    pub fn average_speed_kmh(&self) -> Option<f64> {
        if self.duration > 0.0 {
            Some((self.distance / 1000.0) / (self.duration / 3600.0))
        } else {
            None
        }
    }
}

impl Keyed for Track {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Holds the track being recorded, if any.
#[derive(Debug, Default)]
pub struct TrackRecorder {
    current: Option<Track>,
}

impl TrackRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new recording. An unfinished recording is discarded.
    pub fn start(&mut self, name: &str) -> &Track {
        self.start_at(name, Utc::now())
    }

    pub fn start_at(&mut self, name: &str, started_at: DateTime<Utc>) -> &Track {
        if let Some(previous) = self.current.take() {
            warn!(
                "Discarding unfinished track '{}' ({} points)",
                previous.name,
                previous.point_count()
            );
        }

        let track = Track::starting_at(name, started_at);
        info!("Recording track '{}' ({})", track.name, track.id);
        self.current.insert(track)
    }

    /// Add a fix to the current recording. Returns `None` when not recording.
    pub fn append(&mut self, fix: PositionFix) -> Option<&Track> {
        let track = self.current.as_mut()?;
        track.push(fix);
        Some(&*track)
    }

    /// Stop recording and hand back the finished track.
    ///
    /// A recording with no fixes still comes back, with zero distance and
    /// duration; callers decide whether to keep it. Returns `None` when
    /// nothing was being recorded.
    pub fn finish(&mut self) -> Option<Track> {
        let track = self.current.take()?;
        info!(
            "Finished track '{}': {} points, {:.1} m, {:.0} s",
            track.name,
            track.point_count(),
            track.distance,
            track.duration
        );
        Some(track)
    }

    pub fn is_recording(&self) -> bool {
        self.current.is_some()
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn stats(&self) -> Option<TrackStats> {
        self.current.as_ref().map(TrackStats::from_track)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackStats {
    pub points: usize,
    pub distance_km: f64,
    pub duration: chrono::Duration,
    pub avg_speed: Option<f64>,
}

impl TrackStats {
    pub fn from_track(track: &Track) -> Self {
        Self {
            points: track.point_count(),
            distance_km: track.distance / 1000.0,
            duration: chrono::Duration::milliseconds((track.duration * 1000.0) as i64),
            avg_speed: track.average_speed_kmh(),
        }
    }

    pub fn format_duration(&self) -> String {
        let total_seconds = self.duration.num_seconds();
        let sign = if total_seconds < 0 { "-" } else { "" };
        let total_seconds = total_seconds.abs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;

        if hours > 0 {
            format!("{}{}h {}m {}s", sign, hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}{}m {}s", sign, minutes, seconds)
        } else {
            format!("{}{}s", sign, seconds)
        }
    }
}

/// All stored tracks, oldest first.
pub fn tracks_by_date(store: &impl Store<Track>) -> Result<Vec<Track>> {
    let mut tracks = store.list()?;
    tracks.sort_by_key(|t| t.started_at);
    Ok(tracks)
}
