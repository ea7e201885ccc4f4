// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cyphal transfer model and the unified transport contract.
//!
//! Everything the node says or hears is a [`Transfer`]: metadata (priority,
//! kind, port, addressing, transfer-id), a timestamp, and a payload owned by
//! whoever is holding the transfer. Four wire adapters -- loopback, CAN,
//! serial, UDP -- present this model through one capability set so the
//! scheduler, router, and tasks never care which medium a message crossed.
//!
//! The capability set is split in two, following the shape of the underlying
//! protocol libraries:
//!
//! - [`Transport`] covers the uniform operations: `tx_push`, `tx_forward`,
//!   `rx_subscribe`, `rx_unsubscribe`, and node-id access. Every adapter
//!   implements it and pins that fact with a compile-time assertion.
//! - `rx_receive` is deliberately **not** on the trait: its signature is
//!   per-medium (a CAN frame, a byte span that may yield several transfers,
//!   a pre-formed loopback transfer), so the router addresses each adapter
//!   concretely on the receive side.
//!
//! Forwarding -- rebroadcasting a received transfer with its original source
//! node id intact -- is expressed as the node-id swap dance in the provided
//! [`Transport::tx_forward`], the only sanctioned way to spoof a source.

#![cfg_attr(not(test), no_std)]

mod set;

pub mod ports;

pub use set::TransportSet;

use core::ops::Deref;
use core::ptr::NonNull;
use num_derive::FromPrimitive;
use o1heap::Heap;

pub type Microsecond = u64;
pub type PortId = u16;
pub type NodeId = u8;
pub type TransferId = u8;

/// "Unset / anonymous" node id on the 8-bit transports.
pub const NODE_ID_UNSET: NodeId = 0xFF;

/// Port 0 never touches a wire; tasks registered here are scheduled but
/// receive no traffic.
pub const PURE_HANDLER_PORT: PortId = 0;

pub const PORT_ID_MAX: PortId = 8191;

pub const DEFAULT_TRANSFER_ID_TIMEOUT_US: Microsecond = 2_000_000;

/// Ports eligible for the registration sets: the dynamic range, excluding
/// the pure handler. Fixed ports above [`PORT_ID_MAX`] are wired but never
/// advertised.
pub fn is_valid_port(port_id: PortId) -> bool {
    port_id > PURE_HANDLER_PORT && port_id <= PORT_ID_MAX
}

/// Eight transfer priority levels, highest first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, FromPrimitive)]
#[repr(u8)]
pub enum Priority {
    Exceptional = 0,
    Immediate = 1,
    Fast = 2,
    High = 3,
    /// The default for everything that does not have a reason to be special.
    Nominal = 4,
    Low = 5,
    Slow = 6,
    Optional = 7,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum TransferKind {
    /// Multicast, publisher to all subscribers.
    Message = 0,
    /// Point-to-point, server back to client.
    Response = 1,
    /// Point-to-point, client to server.
    Request = 2,
}

pub const NUM_TRANSFER_KINDS: usize = 3;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransferMetadata {
    pub priority: Priority,
    pub kind: TransferKind,
    pub port_id: PortId,
    /// The peer: origin of a received transfer, destination of a response.
    pub remote_node_id: NodeId,
    pub source_node_id: NodeId,
    pub destination_node_id: NodeId,
    pub transfer_id: TransferId,
}

impl TransferMetadata {
    /// Metadata for an ordinary published message.
    pub fn message(port_id: PortId, transfer_id: TransferId) -> Self {
        Self {
            priority: Priority::Nominal,
            kind: TransferKind::Message,
            port_id,
            remote_node_id: NODE_ID_UNSET,
            source_node_id: NODE_ID_UNSET,
            destination_node_id: NODE_ID_UNSET,
            transfer_id,
        }
    }

    /// Metadata for a service transfer addressed at `remote`.
    pub fn service(
        kind: TransferKind,
        port_id: PortId,
        remote: NodeId,
        transfer_id: TransferId,
    ) -> Self {
        Self {
            priority: Priority::Nominal,
            kind,
            port_id,
            remote_node_id: remote,
            source_node_id: NODE_ID_UNSET,
            destination_node_id: remote,
            transfer_id,
        }
    }
}

/// Receiver-owned payload bytes, allocated from the heap that will take them
/// back. Dropping the payload returns the buffer; an empty payload holds no
/// allocation at all (the pointer-nonnull-iff-nonempty invariant).
pub struct Payload {
    ptr: NonNull<u8>,
    len: usize,
    heap: Option<&'static Heap>,
}

impl Payload {
    pub const fn empty() -> Self {
        Self {
            ptr: NonNull::dangling(),
            len: 0,
            heap: None,
        }
    }

    /// Copies `bytes` into a fresh pool allocation. `None` on exhaustion --
    /// the caller drops the message and moves on.
    pub fn copy_from(heap: &'static Heap, bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return Some(Self::empty());
        }
        let ptr = heap.allocate(bytes.len())?;
        // Safety: fresh allocation of at least `bytes.len()` bytes.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len());
        }
        Some(Self {
            ptr,
            len: bytes.len(),
            heap: Some(heap),
        })
    }

    /// Adopts a buffer already allocated from `heap` (reassemblers build
    /// payloads in place and hand them over).
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation of at least `len` bytes obtained from
    /// `heap` and not owned by anyone else.
    pub unsafe fn from_raw(heap: &'static Heap, ptr: NonNull<u8>, len: usize) -> Self {
        debug_assert!(len > 0);
        Self {
            ptr,
            len,
            heap: Some(heap),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Deref for Payload {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        if self.len == 0 {
            &[]
        } else {
            // Safety: ptr/len describe our live allocation.
            unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
        }
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        if let Some(heap) = self.heap {
            if self.len > 0 {
                // Safety: we own this allocation and nobody sees it again.
                unsafe { heap.free(self.ptr) };
            }
        }
    }
}

/// The canonical in-memory message.
pub struct Transfer {
    pub metadata: TransferMetadata,
    pub timestamp_us: Microsecond,
    pub payload: Payload,
}

impl Transfer {
    pub fn new(metadata: TransferMetadata, payload: Payload) -> Self {
        Self {
            metadata,
            timestamp_us: 0,
            payload,
        }
    }
}

/// Receive-intent registration: port, receiver-side size bound, kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub port_id: PortId,
    /// Maximum deserialized payload size accepted from the wire; anything
    /// longer is truncated at the reassembler. A bound against malformed
    /// senders, not a promise about typical sizes.
    pub extent: usize,
    pub kind: TransferKind,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// Malformed argument (invalid port, payload without bytes, ...).
    Argument,
    /// The adapter could not get memory for the transfer.
    Memory,
    /// A bounded table (subscription slots) is full.
    Capacity,
    /// The operation needs a configured node id and the adapter is
    /// anonymous.
    Anonymous,
}

/// The uniform part of every adapter's capability set.
///
/// `tx_push` returns the number of outbound frames produced (at least 1) on
/// success, `Ok(0)` when a recoverable capacity limit dropped the transfer,
/// and `Err` only for unrecoverable argument-class problems.
pub trait Transport {
    fn tx_push(
        &mut self,
        deadline_us: Microsecond,
        metadata: &TransferMetadata,
        payload: &[u8],
    ) -> Result<usize, TransportError>;

    /// Registers intent to receive `(kind, port_id)`. `Ok(true)` for a new
    /// subscription, `Ok(false)` when it already existed (idempotent), and
    /// `Err(Capacity)` when the slot table is full.
    fn rx_subscribe(
        &mut self,
        kind: TransferKind,
        port_id: PortId,
        extent: usize,
        transfer_id_timeout_us: Microsecond,
    ) -> Result<bool, TransportError>;

    /// Removes a subscription; `true` if one was present.
    fn rx_unsubscribe(&mut self, kind: TransferKind, port_id: PortId) -> bool;

    fn node_id(&self) -> NodeId;

    fn set_node_id(&mut self, node_id: NodeId);

    /// Transmits on behalf of `spoofed_node_id`: the adapter's own id is
    /// swapped out for the duration of the push and restored afterwards.
    /// This is the bridging primitive -- a forwarded transfer keeps its
    /// original source on every segment it crosses.
    fn tx_forward(
        &mut self,
        deadline_us: Microsecond,
        metadata: &TransferMetadata,
        payload: &[u8],
        spoofed_node_id: NodeId,
    ) -> Result<usize, TransportError> {
        let own = self.node_id();
        self.set_node_id(spoofed_node_id);
        let result = self.tx_push(deadline_us, metadata, payload);
        self.set_node_id(own);
        result
    }
}
