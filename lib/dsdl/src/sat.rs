// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Vendor data types: orbital elements in, state solutions out.

use crate::{DataType, Reader, WireError, Writer};

/// Two-line element set as a message. Field set mirrors the TLE itself;
/// angles in degrees, mean motion in revolutions per day, epoch as
/// two-digit year plus fractional day of year.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Tle {
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

impl Tle {
    pub const EXTENT: usize = 128;
}

impl DataType for Tle {
    const MAX_SERIALIZED_SIZE: usize = 4 + 2 + 1 + 1 + 10 * 8 + 4;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        let mut w = Writer::new(buf);
        w.put_u32(self.satellite_number)?;
        w.put_u16(self.element_number)?;
        w.put_u8(self.ephemeris_type)?;
        w.put_u8(self.epoch_year)?;
        for v in [
            self.epoch_day,
            self.mean_motion_dot,
            self.mean_motion_ddot,
            self.bstar_drag,
            self.inclination_deg,
            self.raan_deg,
            self.eccentricity,
            self.argument_of_perigee_deg,
            self.mean_anomaly_deg,
            self.mean_motion_rev_per_day,
        ] {
            w.put_f64(v)?;
        }
        w.put_u32(self.revolution_number_at_epoch)?;
        Ok(w.finish())
    }

    fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let satellite_number = r.get_u32()?;
        let element_number = r.get_u16()?;
        let ephemeris_type = r.get_u8()?;
        let epoch_year = r.get_u8()?;
        let mut f = [0f64; 10];
        for v in f.iter_mut() {
            *v = r.get_f64()?;
        }
        Ok(Self {
            satellite_number,
            element_number,
            ephemeris_type,
            epoch_year,
            epoch_day: f[0],
            mean_motion_dot: f[1],
            mean_motion_ddot: f[2],
            bstar_drag: f[3],
            inclination_deg: f[4],
            raan_deg: f[5],
            eccentricity: f[6],
            argument_of_perigee_deg: f[7],
            mean_anomaly_deg: f[8],
            mean_motion_rev_per_day: f[9],
            revolution_number_at_epoch: r.get_u32()?,
        })
    }
}

/// Propagated state at `timestamp_us`: position in metres, velocity in
/// metres per second, TEME frame.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PositionVelocity {
    pub timestamp_us: u64,
    pub position_m: [f32; 3],
    pub velocity_mps: [f32; 3],
}

impl PositionVelocity {
    pub const EXTENT: usize = 48;
}

impl DataType for PositionVelocity {
    const MAX_SERIALIZED_SIZE: usize = 8 + 12 + 12;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        let mut w = Writer::new(buf);
        w.put_u64(self.timestamp_us)?;
        for v in self.position_m.iter().chain(self.velocity_mps.iter()) {
            w.put_f32(*v)?;
        }
        Ok(w.finish())
    }

    fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let timestamp_us = r.get_u64()?;
        let mut out = Self {
            timestamp_us,
            ..Self::default()
        };
        for v in out.position_m.iter_mut() {
            *v = r.get_f32()?;
        }
        for v in out.velocity_mps.iter_mut() {
            *v = r.get_f32()?;
        }
        Ok(out)
    }
}

/// Estimator output: attitude quaternion (body from NED, wxyz), body rates,
/// body-frame magnetic field. Validity bits cover each section.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct OrientationSolution {
    pub timestamp_us: u64,
    pub quaternion_wxyz: [f32; 4],
    pub angular_velocity_radps: [f32; 3],
    pub magnetic_field_body_t: [f32; 3],
    pub valid_quaternion: bool,
    pub valid_angular_velocity: bool,
    pub valid_magnetic_field: bool,
}

impl OrientationSolution {
    pub const EXTENT: usize = 64;
}

impl DataType for OrientationSolution {
    const MAX_SERIALIZED_SIZE: usize = 8 + 16 + 12 + 12 + 1;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        let mut w = Writer::new(buf);
        w.put_u64(self.timestamp_us)?;
        for v in self
            .quaternion_wxyz
            .iter()
            .chain(self.angular_velocity_radps.iter())
            .chain(self.magnetic_field_body_t.iter())
        {
            w.put_f32(*v)?;
        }
        let flags = self.valid_quaternion as u8
            | (self.valid_angular_velocity as u8) << 1
            | (self.valid_magnetic_field as u8) << 2;
        w.put_u8(flags)?;
        Ok(w.finish())
    }

    fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let mut out = Self {
            timestamp_us: r.get_u64()?,
            ..Self::default()
        };
        for v in out
            .quaternion_wxyz
            .iter_mut()
            .chain(out.angular_velocity_radps.iter_mut())
            .chain(out.magnetic_field_body_t.iter_mut())
        {
            *v = r.get_f32()?;
        }
        let flags = r.get_u8()?;
        out.valid_quaternion = flags & 1 != 0;
        out.valid_angular_velocity = flags & 2 != 0;
        out.valid_magnetic_field = flags & 4 != 0;
        Ok(out)
    }
}

/// Navigation output in ECEF: position, velocity, acceleration. Validity
/// bits per section.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PositionSolution {
    pub timestamp_us: u64,
    pub position_ecef_m: [f32; 3],
    pub velocity_ecef_mps: [f32; 3],
    pub acceleration_ecef_mps2: [f32; 3],
    pub valid_position: bool,
    pub valid_velocity: bool,
    pub valid_acceleration: bool,
}

impl PositionSolution {
    pub const EXTENT: usize = 64;
}

impl DataType for PositionSolution {
    const MAX_SERIALIZED_SIZE: usize = 8 + 12 + 12 + 12 + 1;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        let mut w = Writer::new(buf);
        w.put_u64(self.timestamp_us)?;
        for v in self
            .position_ecef_m
            .iter()
            .chain(self.velocity_ecef_mps.iter())
            .chain(self.acceleration_ecef_mps2.iter())
        {
            w.put_f32(*v)?;
        }
        let flags = self.valid_position as u8
            | (self.valid_velocity as u8) << 1
            | (self.valid_acceleration as u8) << 2;
        w.put_u8(flags)?;
        Ok(w.finish())
    }

    fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let mut out = Self {
            timestamp_us: r.get_u64()?,
            ..Self::default()
        };
        for v in out
            .position_ecef_m
            .iter_mut()
            .chain(out.velocity_ecef_mps.iter_mut())
            .chain(out.acceleration_ecef_mps2.iter_mut())
        {
            *v = r.get_f32()?;
        }
        let flags = r.get_u8()?;
        out.valid_position = flags & 1 != 0;
        out.valid_velocity = flags & 2 != 0;
        out.valid_acceleration = flags & 4 != 0;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tle_identity() {
        let tle = Tle {
            satellite_number: 25544,
            element_number: 999,
            ephemeris_type: 0,
            epoch_year: 25,
            epoch_day: 176.732_456_55,
            mean_motion_dot: 0.000_081_02,
            mean_motion_ddot: 0.0,
            bstar_drag: 0.000_148_54,
            inclination_deg: 51.639,
            raan_deg: 264.718,
            eccentricity: 0.000_199,
            argument_of_perigee_deg: 278.3788,
            mean_anomaly_deg: 217.2311,
            mean_motion_rev_per_day: 15.502_401_16,
            revolution_number_at_epoch: 51648,
        };
        let mut buf = [0u8; Tle::MAX_SERIALIZED_SIZE];
        let n = tle.serialize(&mut buf).unwrap();
        assert_eq!(Tle::deserialize(&buf[..n]).unwrap(), tle);
    }

    #[test]
    fn solution_identity() {
        let sol = OrientationSolution {
            timestamp_us: 123,
            quaternion_wxyz: [0.707, 0.707, 0.0, 0.0],
            angular_velocity_radps: [0.01, 0.02, 0.03],
            magnetic_field_body_t: [1e-4, 2e-4, 3e-4],
            valid_quaternion: true,
            valid_angular_velocity: true,
            valid_magnetic_field: true,
        };
        let mut buf = [0u8; OrientationSolution::MAX_SERIALIZED_SIZE];
        let n = sol.serialize(&mut buf).unwrap();
        assert_eq!(OrientationSolution::deserialize(&buf[..n]).unwrap(), sol);

        let pos = PositionSolution {
            timestamp_us: 456,
            position_ecef_m: [6_371_000.0, 0.0, 0.0],
            velocity_ecef_mps: [0.0, 7660.0, 0.0],
            acceleration_ecef_mps2: [0.0, 0.0, 9.81],
            valid_position: true,
            valid_velocity: true,
            valid_acceleration: false,
        };
        let mut buf = [0u8; PositionSolution::MAX_SERIALIZED_SIZE];
        let n = pos.serialize(&mut buf).unwrap();
        assert_eq!(PositionSolution::deserialize(&buf[..n]).unwrap(), pos);
    }

    #[test]
    fn position_velocity_identity() {
        let pv = PositionVelocity {
            timestamp_us: 804_189_600_000_000,
            position_m: [-3_006_157.4, 4_331_221.0, -4_290_439.6],
            velocity_mps: [-3380.82, -5872.9, -3561.01],
        };
        let mut buf = [0u8; PositionVelocity::MAX_SERIALIZED_SIZE];
        let n = pv.serialize(&mut buf).unwrap();
        assert_eq!(PositionVelocity::deserialize(&buf[..n]).unwrap(), pv);
    }
}
