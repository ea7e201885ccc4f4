// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Heartbeat in both directions: the periodic liveness beacon this node
//! publishes, and a listener that watches the rest of the fleet.

use cyphal::{ports, Transfer, TransportSet};
use dsdl::standard::Heartbeat;
use dsdl::DataType;
use o1heap::Shared;
use ringlog::{log, Severity};
use sched::{Context, Inbox, Publication, Registrar, Task, Timing};

/// Publishes the node heartbeat. Uptime counts in 1024 ms units of
/// scheduler time, so consecutive beats at interval I advance it by
/// exactly I/1024.
pub struct SendHeartbeatTask {
    timing: Timing,
    publication: Publication,
}

impl SendHeartbeatTask {
    pub fn new(interval_ms: u32, shift_ms: u32, transfer_id: u8) -> Self {
        Self {
            timing: Timing::new(interval_ms, shift_ms),
            publication: Publication::new(transfer_id),
        }
    }
}

impl<A: TransportSet> Task<A> for SendHeartbeatTask {
    fn timing(&mut self) -> &mut Timing {
        &mut self.timing
    }

    fn service(&mut self, cx: &mut Context<'_, A>) {
        let data = Heartbeat::nominal(cx.now_ms / 1024);
        self.publication
            .publish(cx.adapters, ports::HEARTBEAT, &data);
    }

    fn handle_message(&mut self, _transfer: Shared<Transfer>) {}

    fn register(&mut self, registrar: &mut Registrar<'_>) {
        registrar.publish(ports::HEARTBEAT);
    }

    fn unregister(&mut self, registrar: &mut Registrar<'_>) {
        registrar.unpublish(ports::HEARTBEAT);
    }
}

pub const HEARTBEAT_INBOX: usize = 8;

/// Observes peers' heartbeats. Today the record is a log line per beat;
/// the counters are the hook a future watchdog would consume.
pub struct ProcessHeartbeatTask {
    timing: Timing,
    inbox: Inbox<HEARTBEAT_INBOX>,
    observed: u32,
}

impl ProcessHeartbeatTask {
    pub fn new(interval_ms: u32, shift_ms: u32) -> Self {
        Self {
            timing: Timing::new(interval_ms, shift_ms),
            inbox: Inbox::new(),
            observed: 0,
        }
    }

    /// Total peer heartbeats seen since boot.
    pub fn observed(&self) -> u32 {
        self.observed
    }
}

impl<A: TransportSet> Task<A> for ProcessHeartbeatTask {
    fn timing(&mut self) -> &mut Timing {
        &mut self.timing
    }

    fn service(&mut self, _cx: &mut Context<'_, A>) {
        while let Some(transfer) = self.inbox.pop() {
            match Heartbeat::deserialize(&transfer.payload) {
                Ok(beat) => {
                    self.observed = self.observed.wrapping_add(1);
                    log!(
                        Severity::Debug,
                        "peer {} heartbeat: uptime {} health {}",
                        transfer.metadata.remote_node_id,
                        beat.uptime,
                        beat.health
                    );
                }
                Err(e) => {
                    log!(Severity::Error, "heartbeat: malformed payload ({e:?})");
                }
            }
        }
    }

    fn handle_message(&mut self, transfer: Shared<Transfer>) {
        self.inbox.push(transfer);
    }

    fn register(&mut self, registrar: &mut Registrar<'_>) {
        registrar.subscribe(ports::HEARTBEAT);
    }

    fn unregister(&mut self, registrar: &mut Registrar<'_>) {
        registrar.unsubscribe(ports::HEARTBEAT);
        self.inbox.clear();
    }
}
