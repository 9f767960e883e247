// src/export.rs
//! Track export to GPX, GeoJSON, KML and CSV

use crate::error::{GpsError, Result};
use crate::track::Track;
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TrackFormat {
    Gpx,
    #[value(name = "geojson")]
    GeoJson,
    Kml,
    Csv,
}

impl TrackFormat {
    pub fn extension(&self) -> &str {
        match self {
            TrackFormat::Gpx => "gpx",
            TrackFormat::GeoJson => "geojson",
            TrackFormat::Kml => "kml",
            TrackFormat::Csv => "csv",
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            TrackFormat::Gpx => "GPX (GPS Exchange)",
            TrackFormat::GeoJson => "GeoJSON",
            TrackFormat::Kml => "KML (Keyhole)",
            TrackFormat::Csv => "CSV",
        }
    }

    /// Guess the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "gpx" => Some(TrackFormat::Gpx),
            "geojson" | "json" => Some(TrackFormat::GeoJson),
            "kml" => Some(TrackFormat::Kml),
            "csv" => Some(TrackFormat::Csv),
            _ => None,
        }
    }
}

/// Render a track in the given format.
pub fn render(track: &Track, format: TrackFormat) -> Result<String> {
    if track.is_empty() {
        return Err(GpsError::Other(format!("Track '{}' has no points to export", track.name)));
    }

    match format {
        TrackFormat::Gpx => Ok(to_gpx(track)),
        TrackFormat::GeoJson => to_geojson(track),
        TrackFormat::Kml => Ok(to_kml(track)),
        TrackFormat::Csv => Ok(to_csv(track)),
    }
}

pub fn export_to_file(track: &Track, path: &Path, format: TrackFormat) -> Result<()> {
    let content = render(track, format)?;
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn to_gpx(track: &Track) -> String {
    let mut gpx = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="NMEA Tracker" xmlns="http://www.topografix.com/GPX/1/1">
  <trk>
"#,
    );
    gpx.push_str(&format!("    <name>{}</name>\n", escape_xml(&track.name)));
    gpx.push_str("    <trkseg>\n");

    for fix in &track.fixes {
        gpx.push_str(&format!(
            "      <trkpt lat=\"{}\" lon=\"{}\">\n",
            fix.latitude, fix.longitude
        ));
        if let Some(ele) = fix.altitude {
            gpx.push_str(&format!("        <ele>{}</ele>\n", ele));
        }
        gpx.push_str(&format!("        <time>{}</time>\n", fix.timestamp.to_rfc3339()));
        if let Some(sats) = fix.satellites {
            gpx.push_str(&format!("        <sat>{}</sat>\n", sats));
        }
        gpx.push_str("      </trkpt>\n");
    }

    gpx.push_str("    </trkseg>\n  </trk>\n</gpx>\n");
    gpx
}

fn to_geojson(track: &Track) -> Result<String> {
    let coordinates: Vec<serde_json::Value> = track
        .fixes
        .iter()
        .map(|fix| serde_json::json!([fix.longitude, fix.latitude, fix.altitude.unwrap_or(0.0)]))
        .collect();
    let times: Vec<String> = track.fixes.iter().map(|fix| fix.timestamp.to_rfc3339()).collect();

    let feature = serde_json::json!({
        "type": "Feature",
        "geometry": {
            "type": "LineString",
            "coordinates": coordinates
        },
        "properties": {
            "id": track.id,
            "name": track.name,
            "start": track.started_at.to_rfc3339(),
            "distance": track.distance,
            "duration": track.duration,
            "times": times
        }
    });

    Ok(serde_json::to_string_pretty(&feature)?)
}

fn to_kml(track: &Track) -> String {
    let mut kml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <Placemark>
"#,
    );
    kml.push_str(&format!("      <name>{}</name>\n", escape_xml(&track.name)));
    kml.push_str(&format!(
        "      <description>{:.1} m in {:.0} s</description>\n",
        track.distance, track.duration
    ));
    kml.push_str("      <LineString>\n        <coordinates>\n");
    for fix in &track.fixes {
        kml.push_str(&format!(
            "          {},{},{}\n",
            fix.longitude,
            fix.latitude,
            fix.altitude.unwrap_or(0.0)
        ));
    }
    kml.push_str("        </coordinates>\n      </LineString>\n");
    kml.push_str("    </Placemark>\n  </Document>\n</kml>\n");
    kml
}

fn to_csv(track: &Track) -> String {
    let mut csv = String::from("timestamp,latitude,longitude,altitude,speed,heading,satellites\n");

    for fix in &track.fixes {
        csv.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            fix.timestamp.to_rfc3339(),
            fix.latitude,
            fix.longitude,
            fix.altitude.map_or(String::new(), |v| v.to_string()),
            fix.speed.map_or(String::new(), |v| v.to_string()),
            fix.heading.map_or(String::new(), |v| v.to_string()),
            fix.satellites.map_or(String::new(), |v| v.to_string()),
        ));
    }

    csv
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
