// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The receive/transmit loop: frames in, transfers delivered, bridges
//! crossed, frames out.
//!
//! For each transport the loop manager drains a ring that interrupts (or
//! the board-support poll loop) keep filled:
//!
//! - CAN frames feed the reassembler one at a time; a completed transfer
//!   goes through [`LoopManager::process_transfer`];
//! - serial chunks are byte spans that can complete several transfers per
//!   chunk, so the drain loops until the adapter stops producing;
//! - the loopback just hands over pre-formed transfers until empty.
//!
//! `process_transfer` is where bridging happens: after local delivery the
//! transfer is re-pushed on every *other* adapter with the original source
//! node id spoofed in, so a segment's traffic is visible fleet-wide. The
//! ingress adapter is skipped -- forwarding a transfer back onto the wire it
//! arrived from is how broadcast storms start.
//!
//! Outbound CAN is a single drain shared by the scheduler and the
//! TX-complete interrupt: peek the software queue, require a free mailbox,
//! hand the frame over, pop. A frame the hardware rejects is logged and
//! popped anyway; queue slots must never leak to a dead controller.

#![cfg_attr(not(test), no_std)]

use cyphal::{Transfer, TransportSet};
use drv_cyphal_can::{CanFrame, CanTransport};
use drv_cyphal_loopback::LoopbackTransport;
use drv_cyphal_serial::SerialTransport;
use o1heap::{Heap, Shared};
use ringlog::{log, Severity};
use sched::RegistrationManager;

/// Inbound CAN frame ring; the RX interrupt pushes, the scheduler drains.
pub const CAN_RX_RING_CAPACITY: usize = 64;
pub type CanRxRing = heapless::Deque<CanFrame, CAN_RX_RING_CAPACITY>;

/// Inbound serial chunk ring. Chunks are whatever the UART driver handed
/// over; framing is the adapter's problem.
pub const SERIAL_MTU: usize = 640;
pub const SERIAL_RX_RING_CAPACITY: usize = 4;

#[derive(Clone)]
pub struct SerialChunk {
    pub len: usize,
    pub data: [u8; SERIAL_MTU],
}

impl SerialChunk {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut chunk = Self {
            len: bytes.len().min(SERIAL_MTU),
            data: [0; SERIAL_MTU],
        };
        chunk.data[..chunk.len].copy_from_slice(&bytes[..chunk.len]);
        chunk
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

pub type SerialRxRing = heapless::Deque<SerialChunk, SERIAL_RX_RING_CAPACITY>;

/// CAN controller interface the TX drain talks to. The flight build wires
/// this to the peripheral; tests substitute a mock.
pub trait CanDriver {
    /// Whether a hardware mailbox can take a frame right now.
    fn tx_mailbox_free(&mut self) -> bool;

    /// Hands one frame to the hardware. An error is a dropped frame, not a
    /// retry.
    fn transmit(&mut self, frame: &CanFrame) -> Result<(), CanTxRejected>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CanTxRejected;

pub struct LoopManager {
    heap: &'static Heap,
}

impl LoopManager {
    pub fn new(heap: &'static Heap) -> Self {
        Self { heap }
    }

    /// Delivers one inbound transfer locally, then bridges it to every
    /// adapter other than the one it arrived on (`source`, an index into
    /// the adapter tuple; pass `usize::MAX` for locally originated
    /// transfers that should hit every adapter).
    ///
    /// Returns false when delivery had to be abandoned (pool exhausted) or
    /// any egress adapter refused the forward.
    pub fn process_transfer<A: TransportSet + 'static>(
        &self,
        transfer: Transfer,
        source: usize,
        services: &mut RegistrationManager<A>,
        adapters: &mut A,
    ) -> bool {
        let shared = match Shared::new_in(self.heap, transfer) {
            Some(s) => s,
            None => {
                log!(Severity::Error, "rx: pool exhausted, transfer dropped");
                return false;
            }
        };
        services.handle_message(&shared);

        let metadata = shared.metadata;
        let origin = metadata.remote_node_id;
        let forwarded =
            adapters.forward_except(source, 0, &metadata, &shared.payload, origin);
        if !forwarded {
            log!(
                Severity::Error,
                "bridge: forward failed, port {}",
                metadata.port_id
            );
        }
        forwarded
    }

    /// Drains pending CAN frames through the reassembler. `can` projects
    /// the CAN adapter out of the tuple so completed transfers can still be
    /// bridged through the whole set.
    pub fn can_process_rx_queue<A: TransportSet + 'static>(
        &self,
        ring: &mut CanRxRing,
        can: impl Fn(&mut A) -> &mut CanTransport,
        source: usize,
        services: &mut RegistrationManager<A>,
        adapters: &mut A,
    ) {
        let pending = ring.len();
        for _ in 0..pending {
            let frame = match ring.pop_front() {
                Some(f) => f,
                None => break,
            };
            match can(adapters).rx_receive(frame.extended_can_id, frame.bytes()) {
                Ok(Some(transfer)) => {
                    self.process_transfer(transfer, source, services, adapters);
                }
                Ok(None) => {}
                Err(e) => {
                    log!(Severity::Debug, "can rx: discarded frame ({e:?})");
                }
            }
        }
    }

    /// Drains serial chunks. One chunk may complete several transfers; the
    /// adapter consumes the span until it is empty.
    pub fn serial_process_rx_queue<A: TransportSet + 'static>(
        &self,
        ring: &mut SerialRxRing,
        serial: impl Fn(&mut A) -> &mut SerialTransport,
        source: usize,
        services: &mut RegistrationManager<A>,
        adapters: &mut A,
    ) {
        let pending = ring.len();
        for _ in 0..pending {
            let chunk = match ring.pop_front() {
                Some(c) => c,
                None => break,
            };
            let mut span = chunk.bytes();
            loop {
                match serial(adapters).rx_receive(&mut span) {
                    Some(transfer) => {
                        self.process_transfer(transfer, source, services, adapters);
                    }
                    None => break,
                }
            }
        }
    }

    /// Drains pre-formed loopback transfers until the queue is empty.
    pub fn loopback_process_rx_queue<A: TransportSet + 'static>(
        &self,
        loopback: impl Fn(&mut A) -> &mut LoopbackTransport,
        source: usize,
        services: &mut RegistrationManager<A>,
        adapters: &mut A,
    ) {
        while let Some(transfer) = loopback(adapters).rx_receive() {
            self.process_transfer(transfer, source, services, adapters);
        }
    }
}

/// Moves frames from the software TX queue into hardware mailboxes.
/// Invoked from the scheduler and from the TX-complete interrupt; the
/// allocator's critical sections make the shared queue safe between the
/// two.
pub fn can_process_tx_queue(can: &mut CanTransport, driver: &mut impl CanDriver) {
    while let Some(frame) = can.tx_peek() {
        if !driver.tx_mailbox_free() {
            return;
        }
        if driver.transmit(frame).is_err() {
            log!(
                Severity::Error,
                "can tx: hardware rejected frame, id {:08x}",
                frame.extended_can_id
            );
        }
        // Pop either way; a rejected frame must not pin the queue.
        let _ = can.tx_pop();
    }
}
