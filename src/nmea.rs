//! NMEA 0183 plumbing: checksum math, sentence framing, coordinate fields.
//!
//! A sentence is `$<body>*HH\r\n` where `HH` is the XOR of every byte of the
//! body, rendered as two uppercase hex digits.

use core::fmt::Write;

pub const MAX_SENTENCE_LEN: usize = 96;

#[derive(Debug, PartialEq)]
pub enum NmeaError {
    MissingStart,
    MissingChecksum,
    BadChecksumDigits,
    ChecksumMismatch { expected: u8, found: u8 },
    BadCoordinate,
    BadHemisphere,
    EmptyField,
    TooLong,
}

/// XOR of all body bytes, per the NMEA 0183 framing rules.
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Checks framing and checksum, returning the body on success.
pub fn verify(sentence: &str) -> Result<&str, NmeaError> {
    let sentence = sentence.trim_end_matches(['\r', '\n']);
    let body_and_sum = sentence.strip_prefix('$').ok_or(NmeaError::MissingStart)?;
    let star = body_and_sum.rfind('*').ok_or(NmeaError::MissingChecksum)?;
    let (body, sum) = body_and_sum.split_at(star);
    let sum = &sum[1..];
    if sum.len() != 2 {
        return Err(NmeaError::BadChecksumDigits);
    }
    let found = u8::from_str_radix(sum, 16).map_err(|_| NmeaError::BadChecksumDigits)?;
    let expected = checksum(body);
    if expected != found {
        return Err(NmeaError::ChecksumMismatch { expected, found });
    }
    Ok(body)
}

/// Renders `$<body>*HH` for an arbitrary payload.
pub fn make_sentence(body: &str) -> Result<heapless::String<MAX_SENTENCE_LEN>, NmeaError> {
    let mut out = heapless::String::new();
    write!(out, "${}*{:02X}", body, checksum(body)).map_err(|_| NmeaError::TooLong)?;
    Ok(out)
}

/// Converts an NMEA `ddmm.mmmm`/`dddmm.mmmm` field plus hemisphere letter to
/// signed decimal degrees.
pub fn parse_coordinate(raw: &str, hemisphere: &str) -> Result<f64, NmeaError> {
    if raw.is_empty() || hemisphere.is_empty() {
        return Err(NmeaError::EmptyField);
    }
    let split = raw.find('.').unwrap_or(raw.len());
    if split < 3 {
        return Err(NmeaError::BadCoordinate);
    }
    let (deg, min) = raw.split_at(split - 2);
    let deg: f64 = deg.parse().map_err(|_| NmeaError::BadCoordinate)?;
    let min: f64 = min.parse().map_err(|_| NmeaError::BadCoordinate)?;
    if min >= 60.0 {
        return Err(NmeaError::BadCoordinate);
    }
    let value = deg + min / 60.0;
    match hemisphere {
        "N" | "E" => Ok(value),
        "S" | "W" => Ok(-value),
        _ => Err(NmeaError::BadHemisphere),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CMD_ANTENNA_ON, CMD_DATUM_WGS84, CMD_DYNAMIC_MODEL, CMD_NMEA_OUTPUT, CMD_SBAS_ON,
        CMD_UPDATE_RATE,
    };

    #[test]
    fn preconfigured_commands_carry_valid_checksums() {
        for cmd in [
            CMD_UPDATE_RATE,
            CMD_NMEA_OUTPUT,
            CMD_SBAS_ON,
            CMD_DYNAMIC_MODEL,
            CMD_DATUM_WGS84,
            CMD_ANTENNA_ON,
        ] {
            assert_eq!(verify(cmd), Ok(&cmd[1..cmd.len() - 3]), "{cmd}");
        }
    }

    #[test]
    fn known_checksums() {
        assert_eq!(checksum("PMTK313,1"), 0x2E);
        assert_eq!(checksum("PMTK220,200"), 0x2C);
    }

    #[test]
    fn update_rate_command_matches_configured_rate() {
        let mut body = heapless::String::<32>::new();
        write!(body, "PMTK220,{}", crate::config::GPS_UPDATE_RATE_MS).unwrap();
        assert_eq!(make_sentence(&body).unwrap().as_str(), CMD_UPDATE_RATE);
    }

    #[test]
    fn tampered_sentence_is_rejected() {
        assert_eq!(
            verify("$PMTK313,0*2E"),
            Err(NmeaError::ChecksumMismatch {
                expected: 0x2F,
                found: 0x2E
            })
        );
    }

    #[test]
    fn framing_errors_are_reported() {
        assert_eq!(verify("PMTK313,1*2E"), Err(NmeaError::MissingStart));
        assert_eq!(verify("$PMTK313,1"), Err(NmeaError::MissingChecksum));
        assert_eq!(verify("$PMTK313,1*2"), Err(NmeaError::BadChecksumDigits));
        assert_eq!(verify("$PMTK313,1*ZZ"), Err(NmeaError::BadChecksumDigits));
    }

    #[test]
    fn verify_accepts_line_endings() {
        assert_eq!(verify("$PMTK313,1*2E\r\n"), Ok("PMTK313,1"));
    }

    #[test]
    fn coordinates_convert_to_decimal_degrees() {
        let lat = parse_coordinate("4807.038", "N").unwrap();
        assert!((lat - 48.1173).abs() < 1e-4);

        let lon = parse_coordinate("07830.1234", "W").unwrap();
        assert!((lon + 78.502_056_7).abs() < 1e-6);

        // Just south of the equator, the collar's home turf
        let lat = parse_coordinate("0012.3456", "S").unwrap();
        assert!((lat + 0.205_76).abs() < 1e-5);
    }

    #[test]
    fn bad_coordinates_are_rejected() {
        assert_eq!(parse_coordinate("", "N"), Err(NmeaError::EmptyField));
        assert_eq!(parse_coordinate("4807.038", ""), Err(NmeaError::EmptyField));
        assert_eq!(parse_coordinate("4807.038", "Q"), Err(NmeaError::BadHemisphere));
        assert_eq!(parse_coordinate("7.038", "N"), Err(NmeaError::BadCoordinate));
        assert_eq!(parse_coordinate("4899.000", "N"), Err(NmeaError::BadCoordinate));
    }
}
