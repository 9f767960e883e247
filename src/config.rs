// src/config.rs
//! Configuration stored as JSON under the user's config directory

use crate::error::{GpsError, Result};
use crate::geo::LatLng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SOURCE_SIMULATOR: &str = "simulator";
pub const SOURCE_SERIAL: &str = "serial";
pub const SOURCE_REPLAY: &str = "replay";

const APP_DIR: &str = "nmea-tracker";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source_type: String, // "simulator", "serial", "replay"
    pub serial_port: Option<String>,
    pub serial_baudrate: u32,
    pub simulator_interval_ms: u64,
    pub simulator_start: Option<[f64; 2]>,
    pub replay_file: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_type: SOURCE_SIMULATOR.to_string(),
            serial_port: None,
            serial_baudrate: 9600,
            simulator_interval_ms: 1000,
            simulator_start: None,
            replay_file: None,
            data_dir: None,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from storage
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Save configuration to storage
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| GpsError::Other(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| GpsError::Parse(format!("config file: {}", e)))?;

        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GpsError::Other(format!("Failed to create config directory: {}", e)))?;
        }

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| GpsError::Other(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)
            .map_err(|e| GpsError::Other(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(home_dir()?.join(".config").join(APP_DIR).join("config.json"))
    }

    /// Root for stored tracks and geofences
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(home_dir()?.join(".local").join("share").join(APP_DIR)),
        }
    }

    pub fn tracks_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("tracks"))
    }

    pub fn geofences_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("geofences"))
    }

    pub fn simulator_start(&self) -> Option<LatLng> {
        self.simulator_start.map(LatLng::from)
    }

    /// Update configuration with new source settings
    pub fn update_source(&mut self, source_type: &str) -> Result<()> {
        match source_type {
            SOURCE_SIMULATOR | SOURCE_SERIAL | SOURCE_REPLAY => {
                self.source_type = source_type.to_string();
                Ok(())
            }
            other => Err(GpsError::Other(format!("Unknown source type '{}'", other))),
        }
    }

    /// Update serial port settings
    pub fn update_serial(&mut self, port: String, baudrate: u32) {
        self.source_type = SOURCE_SERIAL.to_string();
        self.serial_port = Some(port);
        self.serial_baudrate = baudrate;
    }

    pub fn update_simulator(&mut self, interval_ms: u64, start: Option<LatLng>) {
        self.source_type = SOURCE_SIMULATOR.to_string();
        self.simulator_interval_ms = interval_ms;
        self.simulator_start = start.map(|p| [p.lat, p.lng]);
    }

    pub fn update_replay(&mut self, file: PathBuf) {
        self.source_type = SOURCE_REPLAY.to_string();
        self.replay_file = Some(file);
    }
}

fn home_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| GpsError::Other("HOME environment variable not set".to_string()))?;
    Ok(PathBuf::from(home))
}
