// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Calendar and frame utilities for the propagator and its consumers:
//! Julian dates, Greenwich sidereal time, and the TEME→ECEF rotation used
//! by the pointing law.

use core::f64::consts::PI;
use libm::{cos, floor, fmod, sin};

const TWOPI: f64 = 2.0 * PI;
const DEG2RAD: f64 = PI / 180.0;

/// Julian date of `year-mon-day hr:minute:sec` (UT), split into whole days
/// and day fraction to preserve precision.
pub fn jday(year: i32, mon: u32, day: u32, hr: u32, minute: u32, sec: f64) -> (f64, f64) {
    let jd = 367.0 * year as f64
        - floor((7.0 * (year as f64 + floor((mon as f64 + 9.0) / 12.0))) * 0.25)
        + floor(275.0 * mon as f64 / 9.0)
        + day as f64
        + 1_721_013.5;
    let jdfrac = (sec + minute as f64 * 60.0 + hr as f64 * 3600.0) / 86400.0;
    (jd, jdfrac)
}

/// Month, day, hours, minutes, seconds for a fractional day of the year.
pub fn days2mdhms(year: i32, days: f64) -> (u32, u32, u32, u32, f64) {
    const LMONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let dayofyr = floor(days) as u32;

    let mut i = 0usize;
    let mut inttemp = 0u32;
    while i < 12 {
        let len = if i == 1 && year % 4 == 0 && (year % 100 != 0 || year % 400 == 0) {
            29
        } else {
            LMONTH[i]
        };
        if inttemp + len >= dayofyr {
            break;
        }
        inttemp += len;
        i += 1;
    }
    let mon = i as u32 + 1;
    let day = dayofyr - inttemp;

    let mut temp = (days - dayofyr as f64) * 24.0;
    let hr = floor(temp) as u32;
    temp = (temp - hr as f64) * 60.0;
    let minute = floor(temp) as u32;
    let sec = (temp - minute as f64) * 60.0;
    (mon, day, hr, minute, sec)
}

/// Greenwich mean sidereal time (radians) for a UT1 Julian date.
pub fn gstime(jdut1: f64) -> f64 {
    let tut1 = (jdut1 - 2_451_545.0) / 36_525.0;
    let mut temp = -6.2e-6 * tut1 * tut1 * tut1
        + 0.093104 * tut1 * tut1
        + (876_600.0 * 3600.0 + 8_640_184.812_866) * tut1
        + 67_310.548_41;
    temp = fmod(temp * DEG2RAD / 240.0, TWOPI);
    if temp < 0.0 {
        temp += TWOPI;
    }
    temp
}

/// Polar-motion rotation (ECEF from PEF), coefficients from the bulletin
/// prediction formula. The effect is metres; it matters for the pointing
/// law, not the orbit itself.
pub fn polarm(jdut1: f64) -> [[f64; 3]; 3] {
    const ARCSEC2RAD: f64 = 4.848_136_81e-6;
    let mjd = jdut1 - 2_400_000.5;
    let a = TWOPI * (mjd - 57_226.0) / 365.25;
    let c = TWOPI * (mjd - 57_226.0) / 435.0;

    let xp = (0.1033 + 0.0494 * cos(a) + 0.0482 * sin(a) + 0.0297 * cos(c) + 0.0307 * sin(c))
        * ARCSEC2RAD;
    let yp = (0.3498 + 0.0441 * cos(a) - 0.0393 * sin(a) + 0.0307 * cos(c) - 0.0297 * sin(c))
        * ARCSEC2RAD;

    [
        [cos(xp), 0.0, -sin(xp)],
        [sin(xp) * sin(yp), cos(yp), cos(xp) * sin(yp)],
        [sin(xp) * cos(yp), -sin(yp), cos(xp) * cos(yp)],
    ]
}

/// Rotates a TEME position into ECEF: sidereal rotation plus polar motion.
pub fn teme2ecef(rteme: [f64; 3], jdut1: f64) -> [f64; 3] {
    let gmst = gstime(jdut1);
    let (cg, sg) = (cos(gmst), sin(gmst));

    // PEF = transpose(pef→tod sidereal matrix) · TEME
    let rpef = [
        cg * rteme[0] + sg * rteme[1],
        -sg * rteme[0] + cg * rteme[1],
        rteme[2],
    ];

    let pm = polarm(jdut1);
    [
        pm[0][0] * rpef[0] + pm[1][0] * rpef[1] + pm[2][0] * rpef[2],
        pm[0][1] * rpef[0] + pm[1][1] * rpef[1] + pm[2][1] * rpef[2],
        pm[0][2] * rpef[0] + pm[1][2] * rpef[1] + pm[2][2] * rpef[2],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jday_j2000() {
        let (jd, jdfrac) = jday(2000, 1, 1, 12, 0, 0.0);
        assert!((jd + jdfrac - 2_451_545.0).abs() < 1e-9);
    }

    #[test]
    fn days_to_calendar() {
        // Day 176.732... of 2025 is June 25, late afternoon.
        let (mon, day, hr, minute, sec) = days2mdhms(2025, 176.732_456_55);
        assert_eq!((mon, day, hr, minute), (6, 25, 17, 34));
        assert!((sec - 44.25).abs() < 0.1);

        // Leap year: day 60 is Feb 29.
        let (mon, day, _, _, _) = days2mdhms(2024, 60.0);
        assert_eq!((mon, day), (2, 29));
        // Non-leap: day 60 is Mar 1.
        let (mon, day, _, _, _) = days2mdhms(2025, 60.0);
        assert_eq!((mon, day), (3, 1));
    }

    #[test]
    fn gstime_range_and_reference() {
        // GMST at J2000.0 noon is about 280.46 degrees.
        let g = gstime(2_451_545.0);
        assert!((g - 280.460_618 * core::f64::consts::PI / 180.0).abs() < 1e-4);
        for offset in 0..10 {
            let g = gstime(2_451_545.0 + offset as f64 * 0.37);
            assert!((0.0..TWOPI).contains(&g));
        }
    }

    #[test]
    fn teme2ecef_preserves_length() {
        let r = [-3006.157, 4331.221, -4290.439];
        let e = teme2ecef(r, 2_460_852.25);
        let before = (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt();
        let after = (e[0] * e[0] + e[1] * e[1] + e[2] * e[2]).sqrt();
        assert!((before - after).abs() < 1e-6);
        // And actually rotates.
        assert!((e[0] - r[0]).abs() > 100.0);
    }
}
