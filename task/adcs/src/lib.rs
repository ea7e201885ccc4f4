// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Attitude determination and control tasks.
//!
//! Two control modes share the magnetorquers, mirrored by two tasks:
//!
//! - [`DetumbleTask`] runs the B-dot law on each orientation solution,
//!   bleeding off tumble energy after deployment or an upset;
//! - [`PointingTask`] holds nadir: position solutions update the LVLH
//!   target quaternion, orientation solutions close the PD loop and drive
//!   a dipole through the coils.
//!
//! The pointing target starts invalid and stays that way until the first
//! position solution arrives; orientation updates before that are
//! ignored rather than pointed at garbage. Commanding authority between
//! the two tasks is a mission-mode decision made at registration time --
//! a build registers one of them, not both.

#![cfg_attr(not(test), no_std)]

pub mod control;
pub mod math;

mod tasks;

pub use control::{lvlh_target_ecef, AttitudeController, BdotController};
pub use tasks::{DetumbleTask, PointingTask};
