// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SGP4 orbit propagation.
//!
//! The analytical propagator behind the spacecraft's position knowledge:
//! initialize once from a two-line element set, then evaluate position and
//! velocity at any offset from the element epoch in constant time. Both the
//! near-earth (period < 225 min) and deep-space paths are implemented, with
//! WGS-72 gravity as the TLE convention requires.
//!
//! Outputs are kilometres and kilometres per second in the TEME frame of
//! the element epoch; [`coord::teme2ecef`] rotates positions into ECEF for
//! consumers that need an earth-fixed view.
//!
//! Error returns follow the reference taxonomy: out-of-range mean or
//! perturbed elements, negative mean motion or semi-latus rectum, and
//! orbital decay. Any error means the element set is no longer usable and
//! the caller should wait for a fresh one.
//!
//! The arithmetic is `f64` throughout. The surveyed flight code carried a
//! single-precision variant for FPU-poor targets; this port keeps exactly
//! one variant and takes the precision that makes the accuracy contract
//! testable (see DESIGN.md).

#![cfg_attr(not(test), no_std)]

pub mod coord;
mod deep;
mod propagator;
pub mod tle;

pub use propagator::Propagator;
pub use tle::{parse as parse_tle, TleError};

/// Raw orbital elements as they appear in a TLE or the equivalent uplink
/// message: angles in degrees, mean motion in revolutions per day, epoch as
/// two-digit year plus fractional day of year.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Elements {
    pub satellite_number: u32,
    pub element_number: u16,
    pub ephemeris_type: u8,
    pub epoch_year: u8,
    pub epoch_day: f64,
    pub mean_motion_dot: f64,
    pub mean_motion_ddot: f64,
    pub bstar_drag: f64,
    pub inclination_deg: f64,
    pub raan_deg: f64,
    pub eccentricity: f64,
    pub argument_of_perigee_deg: f64,
    pub mean_anomaly_deg: f64,
    pub mean_motion_rev_per_day: f64,
    pub revolution_number_at_epoch: u32,
}

impl Elements {
    /// Full epoch year (1957–2056 window per the TLE convention).
    pub fn epoch_full_year(&self) -> i32 {
        if self.epoch_year < 57 {
            2000 + self.epoch_year as i32
        } else {
            1900 + self.epoch_year as i32
        }
    }

    /// Epoch as a Julian date.
    pub fn epoch_julian(&self) -> f64 {
        let (mon, day, hr, minute, sec) =
            coord::days2mdhms(self.epoch_full_year(), self.epoch_day);
        let (jd, jdfrac) = coord::jday(self.epoch_full_year(), mon, day, hr, minute, sec);
        jd + jdfrac
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sgp4Error {
    /// Mean eccentricity out of range after drag update.
    MeanElements,
    /// Mean motion went non-positive.
    MeanMotion,
    /// Perturbed eccentricity out of range.
    PerturbedElements,
    /// Semi-latus rectum went negative.
    SemiLatusRectum,
    /// Satellite has decayed (radius under one earth radius).
    Decayed,
}

/// Propagation output, TEME frame at the element epoch.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct StateVector {
    pub position_km: [f64; 3],
    pub velocity_kmps: [f64; 3],
}

/// WGS-72 gravity constants, the standard pairing for TLE data.
pub(crate) struct GravConst {
    pub radiusearthkm: f64,
    pub xke: f64,
    pub j2: f64,
    pub j4: f64,
    pub j3oj2: f64,
}

pub(crate) fn wgs72() -> GravConst {
    let mus = 398_600.8;
    let radiusearthkm = 6378.135;
    let xke = 60.0 / libm::sqrt(radiusearthkm * radiusearthkm * radiusearthkm / mus);
    let j2 = 0.001_082_616;
    let j3 = -0.000_002_538_81;
    let j4 = -0.000_001_655_97;
    GravConst {
        radiusearthkm,
        xke,
        j2,
        j4,
        j3oj2: j3 / j2,
    }
}
