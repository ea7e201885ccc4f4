// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Two-line element set parsing.
//!
//! Fixed-column extraction per the TLE format, including the two implied-
//! decimal exponent fields (`nddot` and B*). Both line checksums are
//! verified; a TLE that fails any structural check is rejected rather than
//! propagated into garbage.

use crate::Elements;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TleError {
    /// Line too short or wrong line number.
    Structure,
    /// Modulo-10 checksum mismatch.
    Checksum,
    /// A numeric field failed to parse.
    Field,
    /// Ephemeris type other than SGP4 (type 0).
    EphemerisType,
}

fn checksum_ok(line: &str) -> bool {
    let bytes = line.as_bytes();
    let mut sum = 0u32;
    for &b in &bytes[..68] {
        match b {
            b'0'..=b'9' => sum += (b - b'0') as u32,
            b'-' => sum += 1,
            _ => {}
        }
    }
    (sum % 10) as u8 + b'0' == bytes[68]
}

fn field(line: &str, range: core::ops::Range<usize>) -> Result<&str, TleError> {
    line.get(range).ok_or(TleError::Structure)
}

fn parse_f64(s: &str) -> Result<f64, TleError> {
    s.trim().parse().map_err(|_| TleError::Field)
}

fn parse_u32(s: &str) -> Result<u32, TleError> {
    s.trim().parse().map_err(|_| TleError::Field)
}

/// Implied-decimal exponent field, e.g. `" 14854-3"` meaning 0.14854e-3.
fn parse_exp_field(s: &str) -> Result<f64, TleError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(0.0);
    }
    let (mantissa_str, exp_str) = match s.rfind(['-', '+']) {
        // A sign past position 0 splits mantissa from exponent.
        Some(i) if i > 0 => (&s[..i], &s[i..]),
        _ => (s, "0"),
    };
    let sign = if mantissa_str.starts_with('-') { -1.0 } else { 1.0 };
    let digits = mantissa_str.trim_start_matches(['-', '+']);
    if digits.is_empty() {
        return Ok(0.0);
    }
    let mantissa: f64 = digits.parse().map_err(|_| TleError::Field)?;
    let exponent: i32 = exp_str.parse().map_err(|_| TleError::Field)?;
    let scale = libm::pow(10.0, exponent as f64 - digits.len() as f64);
    Ok(sign * mantissa * scale)
}

/// Parses a TLE into raw orbital elements (degrees, revolutions per day).
pub fn parse(line1: &str, line2: &str) -> Result<Elements, TleError> {
    if line1.len() < 69 || line2.len() < 69 {
        return Err(TleError::Structure);
    }
    if !line1.starts_with('1') || !line2.starts_with('2') {
        return Err(TleError::Structure);
    }
    if !checksum_ok(line1) || !checksum_ok(line2) {
        return Err(TleError::Checksum);
    }

    let ephemeris_type = match field(line1, 62..63)?.trim() {
        "" | "0" => 0u8,
        _ => return Err(TleError::EphemerisType),
    };

    let satellite_number = parse_u32(field(line1, 2..7)?)?;
    if satellite_number != parse_u32(field(line2, 2..7)?)? {
        return Err(TleError::Structure);
    }

    let epoch_year = parse_u32(field(line1, 18..20)?)? as u8;
    let epoch_day = parse_f64(field(line1, 20..32)?)?;

    // ndot carries an implied leading "0"; the sign sits in column 33.
    let ndot_str = field(line1, 33..43)?.trim();
    let mean_motion_dot: f64 = if let Some(rest) = ndot_str.strip_prefix('-') {
        -parse_f64_with_leading_point(rest)?
    } else {
        parse_f64_with_leading_point(ndot_str.trim_start_matches('+'))?
    };

    let mean_motion_ddot = parse_exp_field(field(line1, 44..52)?)?;
    let bstar_drag = parse_exp_field(field(line1, 53..61)?)?;
    let element_number = parse_u32(field(line1, 64..68)?)? as u16;

    let inclination_deg = parse_f64(field(line2, 8..16)?)?;
    let raan_deg = parse_f64(field(line2, 17..25)?)?;
    // Eccentricity has an implied leading decimal point.
    let ecc_digits = field(line2, 26..33)?.trim();
    let eccentricity =
        parse_f64(ecc_digits)? / libm::pow(10.0, ecc_digits.len() as f64);
    let argument_of_perigee_deg = parse_f64(field(line2, 34..42)?)?;
    let mean_anomaly_deg = parse_f64(field(line2, 43..51)?)?;
    let mean_motion_rev_per_day = parse_f64(field(line2, 52..63)?)?;
    let revolution_number_at_epoch = parse_u32(field(line2, 63..68)?)?;

    Ok(Elements {
        satellite_number,
        element_number,
        ephemeris_type,
        epoch_year,
        epoch_day,
        mean_motion_dot,
        mean_motion_ddot,
        bstar_drag,
        inclination_deg,
        raan_deg,
        eccentricity,
        argument_of_perigee_deg,
        mean_anomaly_deg,
        mean_motion_rev_per_day,
        revolution_number_at_epoch,
    })
}

/// `".00008102"`-style field: value with the decimal point in the text.
fn parse_f64_with_leading_point(s: &str) -> Result<f64, TleError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(0.0);
    }
    if let Some(rest) = s.strip_prefix('.') {
        let digits: f64 = rest.parse().map_err(|_| TleError::Field)?;
        Ok(digits / libm::pow(10.0, rest.len() as f64))
    } else {
        s.parse().map_err(|_| TleError::Field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISS1: &str = "1 25544U 98067A   25176.73245655  .00008102  00000-0  14854-3 0  9994";
    const ISS2: &str = "2 25544  51.6390 264.7180 0001990 278.3788 217.2311 15.50240116516482";

    #[test]
    fn parses_the_iss() {
        let e = parse(ISS1, ISS2).unwrap();
        assert_eq!(e.satellite_number, 25544);
        assert_eq!(e.element_number, 999);
        assert_eq!(e.ephemeris_type, 0);
        assert_eq!(e.epoch_year, 25);
        assert!((e.epoch_day - 176.732_456_55).abs() < 1e-9);
        assert!((e.mean_motion_dot - 0.000_081_02).abs() < 1e-12);
        assert_eq!(e.mean_motion_ddot, 0.0);
        assert!((e.bstar_drag - 0.148_54e-3).abs() < 1e-10);
        assert!((e.inclination_deg - 51.639).abs() < 1e-9);
        assert!((e.raan_deg - 264.718).abs() < 1e-9);
        assert!((e.eccentricity - 0.000_199).abs() < 1e-12);
        assert!((e.argument_of_perigee_deg - 278.3788).abs() < 1e-9);
        assert!((e.mean_anomaly_deg - 217.2311).abs() < 1e-9);
        assert!((e.mean_motion_rev_per_day - 15.502_401_16).abs() < 1e-9);
        assert_eq!(e.revolution_number_at_epoch, 51648);
    }

    #[test]
    fn rejects_bad_checksum() {
        let mut bad = ISS1.to_string();
        bad.replace_range(68..69, "0");
        assert_eq!(parse(&bad, ISS2), Err(TleError::Checksum));
    }

    #[test]
    fn rejects_wrong_structure() {
        assert_eq!(parse("1 short", ISS2), Err(TleError::Structure));
        assert_eq!(parse(ISS2, ISS1), Err(TleError::Structure));
    }

    #[test]
    fn negative_bstar_parses() {
        // Same TLE with a negative drag term, checksum fixed up.
        let line1 = "1 25544U 98067A   25176.73245655  .00008102  00000-0 -14854-3 0  9995";
        let e = parse(line1, ISS2).unwrap();
        assert!((e.bstar_drag + 0.148_54e-3).abs() < 1e-10);
    }
}
