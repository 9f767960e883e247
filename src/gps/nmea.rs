// src/gps/nmea.rs
//! NMEA sentence parsing
//!
//! Only GGA, RMC and VTG from the GPS talker are decoded. Everything else that
//! starts with `$` comes back as [`ParsedSentence::Unknown`]. Parsing is
//! deliberately lenient: short field lists and empty or garbled numeric
//! fields decode to zero (or `None` for optional fields) instead of failing.
//! The checksum is split off and ignored.

use chrono::{NaiveDate, NaiveTime};

/// Knots to kilometres per hour.
pub const KNOTS_TO_KMH: f64 = 1.852;

const START_MARKER: char = '$';
const CHECKSUM_DELIMITER: char = '*';
const FIELD_DELIMITER: char = ',';

/// GGA: Global Positioning System Fix Data
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GgaSentence {
    pub time: Option<NaiveTime>,
    pub latitude: f64,
    pub longitude: f64,
    pub fix_quality: u8,
    pub satellites: u32,
    pub hdop: f64,
    pub altitude: f64,            // meters above mean sea level
    pub altitude_unit: Option<String>,
    pub geoid_separation: f64,
    pub geoid_separation_unit: Option<String>,
    pub dgps_age: Option<f64>,    // seconds since last DGPS update
    pub dgps_station: Option<String>,
    pub raw: String,
}

/// RMC: Recommended Minimum Specific GNSS Data
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RmcSentence {
    pub time: Option<NaiveTime>,
    pub status: Option<char>,     // A = active, V = void
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub course: f64,              // degrees true
    pub date: Option<NaiveDate>,
    pub magnetic_variation: Option<f64>, // degrees, west negative
    pub mode: Option<char>,
    pub raw: String,
}

/// VTG: Track Made Good and Ground Speed
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VtgSentence {
    pub course_true: f64,
    pub course_magnetic: f64,
    pub speed_knots: f64,
    pub speed_kmh: f64,
    pub raw: String,
}

/// A single decoded sentence.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedSentence {
    Gga(GgaSentence),
    Rmc(RmcSentence),
    Vtg(VtgSentence),
    Unknown { tag: String, raw: String },
}

impl ParsedSentence {
    /// Short type name: `GGA`, `RMC`, `VTG`, or the full tag of an unknown sentence.
    pub fn kind(&self) -> &str {
        match self {
            ParsedSentence::Gga(_) => "GGA",
            ParsedSentence::Rmc(_) => "RMC",
            ParsedSentence::Vtg(_) => "VTG",
            ParsedSentence::Unknown { tag, .. } => tag,
        }
    }

    /// The sentence text as received.
    pub fn raw(&self) -> &str {
        match self {
            ParsedSentence::Gga(s) => &s.raw,
            ParsedSentence::Rmc(s) => &s.raw,
            ParsedSentence::Vtg(s) => &s.raw,
            ParsedSentence::Unknown { raw, .. } => raw,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ParsedSentence::Unknown { .. })
    }
}

/// Parse a single NMEA sentence.
///
/// Returns `None` only when the line does not start with `$`.
pub fn parse_nmea_sentence(line: &str) -> Option<ParsedSentence> {
    if !line.starts_with(START_MARKER) {
        return None;
    }

    // Checksum is not verified
    let body = line.split(CHECKSUM_DELIMITER).next().unwrap_or(line);
    let fields: Vec<&str> = body.split(FIELD_DELIMITER).collect();
    let tag = fields[0].strip_prefix(START_MARKER).unwrap_or(fields[0]);

    let sentence = match tag {
        "GPGGA" => ParsedSentence::Gga(parse_gga(&fields, line)),
        "GPRMC" => ParsedSentence::Rmc(parse_rmc(&fields, line)),
        "GPVTG" => ParsedSentence::Vtg(parse_vtg(&fields, line)),
        _ => ParsedSentence::Unknown {
            tag: tag.to_string(),
            raw: line.to_string(),
        },
    };
    Some(sentence)
}

/// Parse GGA fields: time, position, quality, satellites, HDOP, altitude, geoid, DGPS
fn parse_gga(fields: &[&str], raw: &str) -> GgaSentence {
    GgaSentence {
        time: parse_time(field(fields, 1)),
        latitude: parse_latitude(field(fields, 2), field(fields, 3)),
        longitude: parse_longitude(field(fields, 4), field(fields, 5)),
        fix_quality: u8::try_from(parse_uint(field(fields, 6))).unwrap_or(0),
        satellites: parse_uint(field(fields, 7)),
        hdop: parse_number(field(fields, 8)),
        altitude: parse_number(field(fields, 9)),
        altitude_unit: non_empty(field(fields, 10)),
        geoid_separation: parse_number(field(fields, 11)),
        geoid_separation_unit: non_empty(field(fields, 12)),
        dgps_age: non_empty(field(fields, 13)).map(|age| parse_number(&age)),
        dgps_station: non_empty(field(fields, 14)),
        raw: raw.to_string(),
    }
}

/// Parse RMC fields: time, status, position, speed, course, date, variation, mode
fn parse_rmc(fields: &[&str], raw: &str) -> RmcSentence {
    let magnetic_variation = non_empty(field(fields, 10)).map(|value| {
        let variation = parse_number(&value);
        if field(fields, 11) == "W" {
            -variation
        } else {
            variation
        }
    });

    RmcSentence {
        time: parse_time(field(fields, 1)),
        status: field(fields, 2).chars().next(),
        latitude: parse_latitude(field(fields, 3), field(fields, 4)),
        longitude: parse_longitude(field(fields, 5), field(fields, 6)),
        speed_kmh: parse_number(field(fields, 7)) * KNOTS_TO_KMH,
        course: parse_number(field(fields, 8)),
        date: parse_date(field(fields, 9)),
        magnetic_variation,
        mode: field(fields, 12).chars().next(),
        raw: raw.to_string(),
    }
}

/// Parse VTG fields: each value is followed by its unit letter
fn parse_vtg(fields: &[&str], raw: &str) -> VtgSentence {
    VtgSentence {
        course_true: parse_number(field(fields, 1)),
        course_magnetic: parse_number(field(fields, 3)),
        speed_knots: parse_number(field(fields, 5)),
        speed_kmh: parse_number(field(fields, 7)),
        raw: raw.to_string(),
    }
}

/// Latitude `DDMM.MMMM` to signed decimal degrees.
pub fn parse_latitude(value: &str, hemisphere: &str) -> f64 {
    parse_coordinate(value, hemisphere, 2, "S")
}

/// Longitude `DDDMM.MMMM` to signed decimal degrees.
pub fn parse_longitude(value: &str, hemisphere: &str) -> f64 {
    parse_coordinate(value, hemisphere, 3, "W")
}

fn parse_coordinate(value: &str, hemisphere: &str, degree_digits: usize, negative: &str) -> f64 {
    let value = value.trim();
    if value.is_empty() {
        return 0.0;
    }

    let split = degree_digits.min(value.len());
    let degrees = value.get(..split).map_or(0, parse_uint) as f64;
    let minutes = value.get(split..).map_or(0.0, parse_number);

    let decimal = degrees + minutes / 60.0;
    if hemisphere == negative {
        -decimal
    } else {
        decimal
    }
}

/// `hhmmss` or `hhmmss.sss`
fn parse_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    let digits = value.get(..6)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let hour = digits[0..2].parse().ok()?;
    let minute = digits[2..4].parse().ok()?;
    let second = digits[4..6].parse().ok()?;
    let millis = match &value[6..] {
        "" => 0,
        fraction if fraction.starts_with('.') => {
            let fraction: f64 = format!("0{}", fraction).parse().ok()?;
            (fraction * 1000.0).round().min(999.0) as u32
        }
        _ => return None,
    };

    NaiveTime::from_hms_milli_opt(hour, minute, second, millis)
}

/// `ddmmyy`, years taken as 2000 + yy
fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.len() != 6 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let day = value[0..2].parse().ok()?;
    let month = value[2..4].parse().ok()?;
    let year: i32 = value[4..6].parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + year, month, day)
}

fn field<'a>(fields: &[&'a str], index: usize) -> &'a str {
    fields.get(index).copied().unwrap_or("")
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_number(value: &str) -> f64 {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn parse_uint(value: &str) -> u32 {
    value.trim().parse::<u32>().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GGA: &str = "$GPGGA,092750.000,5321.6802,N,00630.3372,W,1,8,1.03,61.7,M,55.2,M,,*76";
    const RMC: &str = "$GPRMC,092750.000,A,5321.6802,N,00630.3372,W,0.02,31.66,280511,,,A*43";
    const VTG: &str = "$GPVTG,31.66,T,,M,0.02,N,0.04,K,A*3B";

    fn gga(line: &str) -> GgaSentence {
        match parse_nmea_sentence(line) {
            Some(ParsedSentence::Gga(gga)) => gga,
            other => panic!("expected GGA, got {:?}", other),
        }
    }

    fn rmc(line: &str) -> RmcSentence {
        match parse_nmea_sentence(line) {
            Some(ParsedSentence::Rmc(rmc)) => rmc,
            other => panic!("expected RMC, got {:?}", other),
        }
    }

    #[test]
    fn test_gpgga_parsing() {
        let data = gga(GGA);

        assert!((data.latitude - 53.36134).abs() < 1e-5);
        assert!((data.longitude + 6.50562).abs() < 1e-5);
        assert!((data.altitude - 61.7).abs() < 1e-9);
        assert_eq!(data.satellites, 8);
        assert_eq!(data.fix_quality, 1);
        assert_eq!(data.hdop, 1.03);
        assert_eq!(data.altitude_unit.as_deref(), Some("M"));
        assert_eq!(data.geoid_separation, 55.2);
        assert_eq!(data.dgps_age, None);
        assert_eq!(data.dgps_station, None);
        assert_eq!(data.time, NaiveTime::from_hms_opt(9, 27, 50));
        assert_eq!(data.raw, GGA);
    }

    #[test]
    fn test_gpgga_reference_sample() {
        let data = gga("$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47");

        assert!((data.latitude - 48.1173).abs() < 1e-4);
        assert!((data.longitude - 11.516667).abs() < 1e-5);
        assert_eq!(data.satellites, 8);
        assert_eq!(data.hdop, 0.9);
        assert_eq!(data.altitude, 545.4);
    }

    #[test]
    fn test_gprmc_parsing() {
        let data = rmc(RMC);

        assert_eq!(data.status, Some('A'));
        assert!((data.speed_kmh - 0.037).abs() < 1e-3);
        assert_eq!(data.course, 31.66);
        assert_eq!(data.date, NaiveDate::from_ymd_opt(2011, 5, 28));
        assert_eq!(data.magnetic_variation, None);
        assert_eq!(data.mode, Some('A'));
    }

    #[test]
    fn test_gprmc_speed_conversion() {
        let data = rmc("$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A");

        // Speed should be converted from knots to km/h
        assert!((data.speed_kmh - 41.48).abs() < 0.01);
        assert_eq!(data.course, 84.4);
        assert_eq!(data.magnetic_variation, Some(-3.1));
        assert_eq!(data.date, NaiveDate::from_ymd_opt(2094, 3, 23));
    }

    #[test]
    fn test_gprmc_two_digit_year() {
        let data = rmc("$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230324,,*6A");
        assert_eq!(data.date, NaiveDate::from_ymd_opt(2024, 3, 23));
    }

    #[test]
    fn test_gga_out_of_range_quality_defaults_to_zero() {
        match parse_nmea_sentence("$GPGGA,120000,4807.038,N,01131.000,E,300,08,0.9,545.4,M,46.9,M,,*47") {
            Some(ParsedSentence::Gga(gga)) => {
                assert_eq!(gga.fix_quality, 0);
                assert_eq!(gga.satellites, 8);
            }
            other => panic!("expected GGA, got {:?}", other),
        }
    }

    #[test]
    fn test_gpvtg_parsing() {
        match parse_nmea_sentence(VTG) {
            Some(ParsedSentence::Vtg(vtg)) => {
                assert_eq!(vtg.course_true, 31.66);
                assert_eq!(vtg.course_magnetic, 0.0);
                assert_eq!(vtg.speed_knots, 0.02);
                assert_eq!(vtg.speed_kmh, 0.04);
            }
            other => panic!("expected VTG, got {:?}", other),
        }
    }

    #[test]
    fn test_southern_and_eastern_hemispheres() {
        let data = gga("$GPGGA,000000,3351.5000,S,15112.6000,E,1,05,1.0,10.0,M,,M,,*00");
        assert!((data.latitude + 33.858333).abs() < 1e-5);
        assert!((data.longitude - 151.21).abs() < 1e-5);
    }

    #[test]
    fn test_rejects_missing_start_marker() {
        assert_eq!(parse_nmea_sentence("GPGGA,1,2,3"), None);
        assert_eq!(parse_nmea_sentence(""), None);
        assert_eq!(parse_nmea_sentence(" $GPGGA"), None);
    }

    #[test]
    fn test_unknown_sentence() {
        let line = "$GPGSV,3,1,12,01,40,083,46,02,17,308,41,12,07,344,39,14,22,228,45*75";
        let parsed = parse_nmea_sentence(line).unwrap();
        assert!(parsed.is_unknown());
        assert_eq!(parsed.kind(), "GPGSV");
        assert_eq!(parsed.raw(), line);
    }

    #[test]
    fn test_other_constellation_prefix_is_unknown() {
        let parsed = parse_nmea_sentence("$GNGGA,092750.000,5321.6802,N,00630.3372,W,1,8*00").unwrap();
        assert_eq!(parsed.kind(), "GNGGA");
        assert!(parsed.is_unknown());
    }

    #[test]
    fn test_short_sentence_defaults() {
        let data = gga("$GPGGA");
        assert_eq!(data.latitude, 0.0);
        assert_eq!(data.longitude, 0.0);
        assert_eq!(data.satellites, 0);
        assert_eq!(data.altitude, 0.0);
        assert_eq!(data.time, None);

        let data = rmc("$GPRMC,123519,A,4807.038,N");
        assert!((data.latitude - 48.1173).abs() < 1e-4);
        assert_eq!(data.longitude, 0.0);
        assert_eq!(data.speed_kmh, 0.0);
        assert_eq!(data.date, None);
    }

    #[test]
    fn test_garbled_numbers_default_to_zero() {
        let data = gga("$GPGGA,xx,abcd,N,,E,q,NaN,inf,-,M,,M,,*00");
        assert_eq!(data.latitude, 0.0);
        assert_eq!(data.longitude, 0.0);
        assert_eq!(data.fix_quality, 0);
        assert_eq!(data.satellites, 0);
        assert_eq!(data.hdop, 0.0);
        assert_eq!(data.altitude, 0.0);
        assert_eq!(data.time, None);
    }

    #[test]
    fn test_checksum_is_ignored() {
        let good = parse_nmea_sentence(GGA).unwrap();
        let bad = parse_nmea_sentence(&GGA.replace("*76", "*FF")).unwrap();
        match (good, bad) {
            (ParsedSentence::Gga(a), ParsedSentence::Gga(b)) => {
                assert_eq!(a.latitude, b.latitude);
                assert_eq!(a.satellites, b.satellites);
            }
            _ => panic!("both should parse as GGA"),
        }
    }

    #[test]
    fn test_parsing_is_idempotent() {
        for line in [GGA, RMC, VTG, "$GPGSV,1,1,00*79"] {
            assert_eq!(parse_nmea_sentence(line), parse_nmea_sentence(line));
        }
    }

    #[test]
    fn test_time_with_fraction() {
        assert_eq!(parse_time("092750.250"), NaiveTime::from_hms_milli_opt(9, 27, 50, 250));
        assert_eq!(parse_time("0927"), None);
        assert_eq!(parse_time("25xx00"), None);
        assert_eq!(parse_time("250000"), None);
    }

    #[test]
    fn test_date_requires_six_digits() {
        assert_eq!(parse_date("010124"), NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(parse_date("0101"), None);
        assert_eq!(parse_date("320124"), None);
    }

    #[test]
    fn test_empty_coordinates_decode_to_zero() {
        assert_eq!(parse_latitude("", "S"), 0.0);
        assert_eq!(parse_longitude("", "W"), 0.0);
    }
}
