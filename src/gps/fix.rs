// src/gps/fix.rs
//! Position fixes and their derivation from parsed sentences

use super::nmea::{ParsedSentence, RmcSentence};
use crate::geo::{self, LatLng};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single resolved position observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,   // meters
    pub speed: Option<f64>,      // km/h
    pub heading: Option<f64>,    // degrees
    pub satellites: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

impl PositionFix {
    /// A bare fix with only a position and a timestamp.
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            speed: None,
            heading: None,
            satellites: None,
            timestamp,
        }
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }

    /// Great-circle distance to another fix in meters
    pub fn distance_to(&self, other: &PositionFix) -> f64 {
        geo::haversine_distance(self.position(), other.position())
    }

    /// Get the age of the fix in seconds
    pub fn age_seconds(&self) -> i64 {
        Utc::now().signed_duration_since(self.timestamp).num_seconds()
    }

    /// Check if the fix is recent (within 10 seconds)
    pub fn is_recent(&self) -> bool {
        self.age_seconds() < 10
    }

    /// Format coordinate for display
    pub fn format_coordinate(coord: f64) -> String {
        format!("{:>12.6}°", coord)
    }

    /// Format value with unit for display
    pub fn format_value<T: std::fmt::Display>(value: Option<T>, unit: &str) -> String {
        match value {
            Some(val) => format!("{} {}", val, unit),
            None => "-".to_string(),
        }
    }
}

/// Turn a parsed sentence into a position fix, stamping with the current time
/// where the sentence carries no usable date.
pub fn to_fix(sentence: &ParsedSentence) -> Option<PositionFix> {
    to_fix_at(sentence, Utc::now())
}

/// Same as [`to_fix`] with an explicit capture instant.
///
/// Only GGA and RMC carry a position. A latitude or longitude of exactly zero
/// is read as "no data", so a genuine fix on the equator or the prime
/// meridian is dropped. Receivers report empty coordinate fields while they
/// have no fix, and those decode to zero.
pub fn to_fix_at(sentence: &ParsedSentence, captured_at: DateTime<Utc>) -> Option<PositionFix> {
    match sentence {
        ParsedSentence::Gga(gga) => {
            if !has_position(gga.latitude, gga.longitude) {
                return None;
            }
            // GGA has a time of day but no date, so it is not combined
            Some(PositionFix {
                latitude: gga.latitude,
                longitude: gga.longitude,
                altitude: Some(gga.altitude),
                speed: None,
                heading: None,
                satellites: Some(gga.satellites),
                timestamp: captured_at,
            })
        }
        ParsedSentence::Rmc(rmc) => {
            if !has_position(rmc.latitude, rmc.longitude) {
                return None;
            }
            Some(PositionFix {
                latitude: rmc.latitude,
                longitude: rmc.longitude,
                altitude: None,
                speed: Some(rmc.speed_kmh),
                heading: Some(rmc.course),
                satellites: None,
                timestamp: rmc_timestamp(rmc).unwrap_or(captured_at),
            })
        }
        ParsedSentence::Vtg(_) | ParsedSentence::Unknown { .. } => None,
    }
}

fn has_position(latitude: f64, longitude: f64) -> bool {
    latitude != 0.0 && longitude != 0.0
}

/// RMC date and time are UTC.
fn rmc_timestamp(rmc: &RmcSentence) -> Option<DateTime<Utc>> {
    let (date, time) = (rmc.date?, rmc.time?);
    Some(NaiveDateTime::new(date, time).and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gps::nmea::parse_nmea_sentence;
    use chrono::TimeZone;

    fn fix_of(line: &str, at: DateTime<Utc>) -> Option<PositionFix> {
        to_fix_at(&parse_nmea_sentence(line).unwrap(), at)
    }

    fn capture() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_gga_fix() {
        let fix = fix_of(
            "$GPGGA,092750.000,5321.6802,N,00630.3372,W,1,8,1.03,61.7,M,55.2,M,,*76",
            capture(),
        )
        .unwrap();

        assert!((fix.latitude - 53.36134).abs() < 1e-5);
        assert!((fix.longitude + 6.50562).abs() < 1e-5);
        assert_eq!(fix.altitude, Some(61.7));
        assert_eq!(fix.satellites, Some(8));
        assert_eq!(fix.speed, None);
        assert_eq!(fix.heading, None);
        // GGA time is not used
        assert_eq!(fix.timestamp, capture());
    }

    #[test]
    fn test_rmc_fix_uses_embedded_timestamp() {
        let fix = fix_of(
            "$GPRMC,092750.000,A,5321.6802,N,00630.3372,W,0.02,31.66,280511,,,A*43",
            capture(),
        )
        .unwrap();

        assert_eq!(fix.timestamp, Utc.with_ymd_and_hms(2011, 5, 28, 9, 27, 50).unwrap());
        assert_eq!(fix.heading, Some(31.66));
        assert!((fix.speed.unwrap() - 0.037).abs() < 1e-3);
        assert_eq!(fix.altitude, None);
    }

    #[test]
    fn test_rmc_without_date_falls_back_to_capture_time() {
        let fix = fix_of("$GPRMC,092750,A,5321.6802,N,00630.3372,W,0.02,31.66,,,,A*00", capture()).unwrap();
        assert_eq!(fix.timestamp, capture());

        let fix = fix_of("$GPRMC,,A,5321.6802,N,00630.3372,W,0.02,31.66,280511,,,A*00", capture()).unwrap();
        assert_eq!(fix.timestamp, capture());

        let fix = fix_of("$GPRMC,092750,A,5321.6802,N,00630.3372,W,0.02,31.66,2805,,,A*00", capture()).unwrap();
        assert_eq!(fix.timestamp, capture());
    }

    #[test]
    fn test_vtg_and_unknown_never_yield_fix() {
        assert!(fix_of("$GPVTG,31.66,T,,M,0.02,N,0.04,K,A*3B", capture()).is_none());
        assert!(fix_of("$GPGSV,3,1,12,01,40,083,46*75", capture()).is_none());
    }

    #[test]
    fn test_empty_position_is_no_fix() {
        assert!(fix_of("$GPGGA,092750.000,,,,,0,0,,,M,,M,,*00", capture()).is_none());
        assert!(fix_of("$GPRMC,092750.000,V,,,,,,,280511,,,N*00", capture()).is_none());
    }

    #[test]
    fn test_zero_coordinate_is_dropped() {
        // A real fix on the prime meridian is indistinguishable from no data
        assert!(fix_of("$GPGGA,120000,5130.0000,N,00000.0000,E,1,08,1.0,10.0,M,,M,,*00", capture()).is_none());
        assert!(fix_of("$GPGGA,120000,0000.0000,N,01000.0000,E,1,08,1.0,10.0,M,,M,,*00", capture()).is_none());
    }

    #[test]
    fn test_distance_between_fixes() {
        let a = PositionFix::new(0.0, 0.0, capture());
        let b = PositionFix::new(0.0, 1.0, capture());
        assert!((a.distance_to(&b) - 111_195.0).abs() < 1.0);
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(PositionFix::format_value(Some(8), "sats"), "8 sats");
        assert_eq!(PositionFix::format_value::<f64>(None, "m"), "-");
        assert!(PositionFix::format_coordinate(53.361336).contains("53.361336"));
    }

    #[test]
    fn test_recent_fix() {
        let fix = PositionFix::new(1.0, 1.0, Utc::now());
        assert!(fix.is_recent());
        assert!(!PositionFix::new(1.0, 1.0, capture()).is_recent());
    }
}
