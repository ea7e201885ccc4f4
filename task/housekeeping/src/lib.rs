// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Housekeeping task set: the node-level plumbing every flight build
//! carries regardless of payload.
//!
//! Liveness (heartbeat out, peers' heartbeats observed), discovery (port
//! list out, peers' advertisements followed), time distribution (sync out,
//! RTC slewed on sync in), node identity (GetInfo server and a client to
//! poll a peer), and the local health chores: LED, heap watermarks, and
//! draining the log ring into diagnostic-record publications.

#![cfg_attr(not(test), no_std)]

mod getinfo;
mod heartbeat;
mod platform;
mod portlist;
mod timesync;

pub use getinfo::{RequestGetInfoTask, RespondGetInfoTask};
pub use heartbeat::{ProcessHeartbeatTask, SendHeartbeatTask};
pub use platform::{BlinkLedTask, CheckMemoryTask, LogPublisherTask};
pub use portlist::{PortListBoard, SendPortListTask, SubscribePortListTask};
pub use timesync::{ProcessTimeSyncTask, SendTimeSyncTask};
