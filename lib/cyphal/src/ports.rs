// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Port-id assignments.
//!
//! The fixed ports match the standard data-type repository revision this
//! system interoperates with; the vendor ports live in the unregulated
//! range.

use crate::PortId;

// Standard fixed subject ids.
pub const HEARTBEAT: PortId = 32085;
pub const NODE_PORT_LIST: PortId = 7510;
pub const TIME_SYNCHRONIZATION: PortId = 7168;
pub const DIAGNOSTIC_RECORD: PortId = 8184;

// Standard fixed service ids.
pub const GET_INFO: PortId = 430;
pub const REGISTER_ACCESS: PortId = 384;
pub const FILE_LIST: PortId = 406;

// Vendor subjects.
pub const TLE: PortId = 1101;
pub const POSITION_VELOCITY: PortId = 1102;
pub const ORIENTATION_SOLUTION: PortId = 1103;
pub const POSITION_SOLUTION: PortId = 1104;
