// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cyphal/CAN transport over classic CAN 2.0B.
//!
//! The 29-bit extended identifier carries priority, transfer kind, port id,
//! and addressing; payload rides in up to 8 data bytes, the last of which is
//! the tail byte (start/end/toggle/transfer-id). Transfers longer than seven
//! bytes are split into a chunk stream with a CRC-16 trailer and reassembled
//! on the far side per (port, source) session.
//!
//! The transmit side does not touch hardware. `tx_push` segments the
//! transfer into a software frame queue; the router drains that queue into
//! the CAN mailboxes from the scheduler and from the TX-complete interrupt.
//! If the queue cannot hold the *whole* transfer it takes none of it and
//! reports a capacity drop -- partial transfers on the wire help nobody.
//!
//! Reassembly buffers come from the pool and are bounded by the
//! subscription extent; a frame stream that would overflow its buffer kills
//! the session silently, which is the prescribed response to malformed
//! senders.

#![cfg_attr(not(test), no_std)]

use byteorder::{BigEndian, ByteOrder};
use crc::Crc;
use cyphal::{
    Microsecond, NodeId, Payload, PortId, Priority, Subscription, Transfer, TransferId,
    TransferKind, TransferMetadata, Transport, TransportError, NODE_ID_UNSET,
};
use num_traits::FromPrimitive as _;
use o1heap::Heap;

/// Classic CAN payload limit.
pub const MTU: usize = 8;

/// Payload bytes per frame once the tail byte is paid for.
const BYTES_PER_FRAME: usize = MTU - 1;

pub const TX_QUEUE_CAPACITY: usize = 64;
pub const SUBSCRIPTION_CAPACITY: usize = 32;

/// Concurrent reassembly sessions per subscription (distinct source nodes).
const SESSIONS_PER_SUBSCRIPTION: usize = 4;

/// Transfer CRC for multi-frame transfers, appended big-endian.
const CRC16: Crc<u16> = Crc::<u16>::new(&crc::CRC_16_IBM_3740);

const TAIL_START: u8 = 1 << 7;
const TAIL_END: u8 = 1 << 6;
const TAIL_TOGGLE: u8 = 1 << 5;
const TAIL_TRANSFER_ID_MASK: u8 = 0x1F;

const FLAG_SERVICE: u32 = 1 << 25;
const FLAG_ANONYMOUS: u32 = 1 << 24;
const FLAG_REQUEST: u32 = 1 << 24;

/// Highest node id that fits the 7-bit wire field; anything else transmits
/// anonymously.
pub const NODE_ID_MAX: NodeId = 127;

/// One classic CAN frame, extended id.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CanFrame {
    pub extended_can_id: u32,
    pub dlc: u8,
    pub data: [u8; MTU],
}

impl CanFrame {
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CanRxError {
    /// Frame violates the framing rules; drop it and move on.
    Malformed,
    /// No pool memory for the reassembly buffer.
    Memory,
}

/// Reassembly buffer owned by an in-progress session. Frees itself unless
/// converted into a transfer payload.
struct SessionBuf {
    heap: &'static Heap,
    ptr: core::ptr::NonNull<u8>,
    cap: usize,
    len: usize,
}

impl SessionBuf {
    fn new(heap: &'static Heap, cap: usize) -> Option<Self> {
        let ptr = heap.allocate(cap.max(1))?;
        Some(Self {
            heap,
            ptr,
            cap,
            len: 0,
        })
    }

    fn append(&mut self, bytes: &[u8]) -> bool {
        if self.len + bytes.len() > self.cap {
            return false;
        }
        // Safety: bounds checked against our allocation.
        unsafe {
            core::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.ptr.as_ptr().add(self.len),
                bytes.len(),
            );
        }
        self.len += bytes.len();
        true
    }

    fn bytes(&self) -> &[u8] {
        // Safety: [0, len) is initialized.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Hands the buffer to a payload of `len` bytes. The allocation moves;
    /// nothing is copied.
    fn into_payload(self, len: usize) -> Payload {
        debug_assert!(len > 0 && len <= self.cap);
        let p = unsafe { Payload::from_raw(self.heap, self.ptr, len) };
        core::mem::forget(self);
        p
    }
}

impl Drop for SessionBuf {
    fn drop(&mut self) {
        // Safety: we own the allocation until into_payload took it.
        unsafe { self.heap.free(self.ptr) };
    }
}

struct Session {
    source: NodeId,
    transfer_id: TransferId,
    expected_toggle: bool,
    buf: SessionBuf,
}

struct SubscriptionState {
    sub: Subscription,
    sessions: heapless::Vec<Session, SESSIONS_PER_SUBSCRIPTION>,
}

pub struct CanTransport {
    heap: &'static Heap,
    node_id: NodeId,
    tx_queue: heapless::Deque<CanFrame, TX_QUEUE_CAPACITY>,
    subscriptions: heapless::Vec<SubscriptionState, SUBSCRIPTION_CAPACITY>,
}

struct ParsedId {
    priority: Priority,
    kind: TransferKind,
    port_id: PortId,
    source: NodeId,
    destination: NodeId,
    anonymous: bool,
}

fn parse_extended_id(id: u32) -> Option<ParsedId> {
    let priority = Priority::from_u32((id >> 26) & 0x7)?;
    if id & FLAG_SERVICE != 0 {
        let kind = if id & FLAG_REQUEST != 0 {
            TransferKind::Request
        } else {
            TransferKind::Response
        };
        Some(ParsedId {
            priority,
            kind,
            port_id: ((id >> 14) & 0x1FF) as PortId,
            source: (id & 0x7F) as NodeId,
            destination: ((id >> 7) & 0x7F) as NodeId,
            anonymous: false,
        })
    } else {
        Some(ParsedId {
            priority,
            kind: TransferKind::Message,
            port_id: ((id >> 8) & 0x1FFF) as PortId,
            source: (id & 0x7F) as NodeId,
            destination: NODE_ID_UNSET,
            anonymous: id & FLAG_ANONYMOUS != 0,
        })
    }
}

impl CanTransport {
    pub fn new(heap: &'static Heap) -> Self {
        Self {
            heap,
            node_id: NODE_ID_UNSET,
            tx_queue: heapless::Deque::new(),
            subscriptions: heapless::Vec::new(),
        }
    }

    /// Head of the software TX queue, if any. The hardware drain peeks,
    /// attempts the mailbox, and pops on success or on a fatal rejection.
    pub fn tx_peek(&self) -> Option<&CanFrame> {
        self.tx_queue.front()
    }

    pub fn tx_pop(&mut self) -> Option<CanFrame> {
        self.tx_queue.pop_front()
    }

    pub fn tx_queue_len(&self) -> usize {
        self.tx_queue.len()
    }

    fn make_can_id(&self, metadata: &TransferMetadata, anonymous: bool) -> u32 {
        let prio = (metadata.priority as u32) << 26;
        match metadata.kind {
            TransferKind::Message => {
                let src = if anonymous {
                    // Pseudo-id to spread anonymous traffic across sessions.
                    (metadata.transfer_id as u32) & 0x7F
                } else {
                    (self.node_id as u32) & 0x7F
                };
                let subject = (metadata.port_id as u32 & 0x1FFF) << 8;
                // Bits 21/22 transmit as ones per the CAN transport spec.
                let padding = (1 << 21) | (1 << 22);
                let anon = if anonymous { FLAG_ANONYMOUS } else { 0 };
                prio | anon | padding | subject | src
            }
            TransferKind::Request | TransferKind::Response => {
                let request = if metadata.kind == TransferKind::Request {
                    FLAG_REQUEST
                } else {
                    0
                };
                prio | FLAG_SERVICE
                    | request
                    | ((metadata.port_id as u32 & 0x1FF) << 14)
                    | ((metadata.remote_node_id as u32 & 0x7F) << 7)
                    | (self.node_id as u32 & 0x7F)
            }
        }
    }

    fn enqueue_frame(&mut self, id: u32, payload: &[u8], tail: u8) {
        let mut frame = CanFrame {
            extended_can_id: id,
            dlc: (payload.len() + 1) as u8,
            data: [0; MTU],
        };
        frame.data[..payload.len()].copy_from_slice(payload);
        frame.data[payload.len()] = tail;
        // Room was checked before segmentation started.
        let _ = self.tx_queue.push_back(frame);
    }

    fn subscription_index(&self, kind: TransferKind, port_id: PortId) -> Option<usize> {
        self.subscriptions
            .iter()
            .position(|s| s.sub.kind == kind && s.sub.port_id == port_id)
    }

    /// Feeds one received frame into the reassembler. `Ok(None)` means the
    /// transfer is still incomplete (or the frame was not for us);
    /// `Ok(Some(t))` hands back a whole transfer.
    pub fn rx_receive(
        &mut self,
        extended_can_id: u32,
        data: &[u8],
    ) -> Result<Option<Transfer>, CanRxError> {
        let parsed = parse_extended_id(extended_can_id).ok_or(CanRxError::Malformed)?;
        if data.is_empty() || data.len() > MTU {
            return Err(CanRxError::Malformed);
        }
        if matches!(parsed.kind, TransferKind::Request | TransferKind::Response)
            && parsed.destination != self.node_id
        {
            return Ok(None);
        }
        let sub_index = match self.subscription_index(parsed.kind, parsed.port_id) {
            Some(i) => i,
            None => return Ok(None),
        };

        let tail = data[data.len() - 1];
        let body = &data[..data.len() - 1];
        let start = tail & TAIL_START != 0;
        let end = tail & TAIL_END != 0;
        let toggle = tail & TAIL_TOGGLE != 0;
        let transfer_id = tail & TAIL_TRANSFER_ID_MASK;

        let metadata = TransferMetadata {
            priority: parsed.priority,
            kind: parsed.kind,
            port_id: parsed.port_id,
            remote_node_id: if parsed.anonymous {
                NODE_ID_UNSET
            } else {
                parsed.source
            },
            source_node_id: parsed.source,
            destination_node_id: parsed.destination,
            transfer_id,
        };

        if start && end {
            // Single-frame transfer; the toggle starts high.
            if !toggle {
                return Err(CanRxError::Malformed);
            }
            let payload =
                Payload::copy_from(self.heap, body).ok_or(CanRxError::Memory)?;
            return Ok(Some(Transfer::new(metadata, payload)));
        }
        if parsed.anonymous {
            // Anonymous transfers are single-frame only.
            return Err(CanRxError::Malformed);
        }

        let state = &mut self.subscriptions[sub_index];
        if start {
            if !toggle {
                return Err(CanRxError::Malformed);
            }
            // A new transfer from this source supersedes any half-built one.
            if let Some(i) = state
                .sessions
                .iter()
                .position(|s| s.source == parsed.source)
            {
                state.sessions.swap_remove(i);
            }
            let cap = state.sub.extent + 2;
            let mut buf = SessionBuf::new(self.heap, cap).ok_or(CanRxError::Memory)?;
            if !buf.append(body) {
                return Err(CanRxError::Malformed);
            }
            let session = Session {
                source: parsed.source,
                transfer_id,
                expected_toggle: false,
                buf,
            };
            if state.sessions.push(session).is_err() {
                // All session slots busy; this source loses.
                return Ok(None);
            }
            return Ok(None);
        }

        let pos = match state
            .sessions
            .iter()
            .position(|s| s.source == parsed.source)
        {
            Some(p) => p,
            None => return Ok(None), // missed the start; wait for the next transfer
        };
        {
            let session = &mut state.sessions[pos];
            if session.transfer_id != transfer_id || session.expected_toggle != toggle {
                state.sessions.swap_remove(pos);
                return Err(CanRxError::Malformed);
            }
            if !session.buf.append(body) {
                // Overflowing the extent bound kills the session.
                state.sessions.swap_remove(pos);
                return Err(CanRxError::Malformed);
            }
            session.expected_toggle = !session.expected_toggle;
        }
        if !end {
            return Ok(None);
        }

        let session = state.sessions.swap_remove(pos);
        let total = session.buf.len;
        if total < 2 {
            return Err(CanRxError::Malformed);
        }
        let payload_len = total - 2;
        let received = session.buf.bytes();
        let wire_crc = BigEndian::read_u16(&received[payload_len..]);
        if CRC16.checksum(&received[..payload_len]) != wire_crc {
            return Err(CanRxError::Malformed);
        }
        if payload_len == 0 {
            return Ok(Some(Transfer::new(metadata, Payload::empty())));
        }
        Ok(Some(Transfer::new(
            metadata,
            session.buf.into_payload(payload_len),
        )))
    }
}

impl Transport for CanTransport {
    fn tx_push(
        &mut self,
        _deadline_us: Microsecond,
        metadata: &TransferMetadata,
        payload: &[u8],
    ) -> Result<usize, TransportError> {
        match metadata.kind {
            TransferKind::Message => {
                if metadata.port_id > 0x1FFF {
                    return Err(TransportError::Argument);
                }
            }
            TransferKind::Request | TransferKind::Response => {
                if metadata.port_id > 0x1FF {
                    return Err(TransportError::Argument);
                }
                if self.node_id > NODE_ID_MAX || metadata.remote_node_id > NODE_ID_MAX {
                    return Err(TransportError::Anonymous);
                }
            }
        }
        let anonymous = self.node_id > NODE_ID_MAX;
        let id = self.make_can_id(metadata, anonymous);
        let tid = metadata.transfer_id & TAIL_TRANSFER_ID_MASK;

        if payload.len() <= BYTES_PER_FRAME {
            if self.tx_queue.is_full() {
                return Ok(0);
            }
            self.enqueue_frame(id, payload, TAIL_START | TAIL_END | TAIL_TOGGLE | tid);
            return Ok(1);
        }

        if anonymous {
            // Multi-frame transfers require a source node id.
            return Err(TransportError::Anonymous);
        }
        let total = payload.len() + 2;
        let nframes = (total + BYTES_PER_FRAME - 1) / BYTES_PER_FRAME;
        if nframes > TX_QUEUE_CAPACITY - self.tx_queue.len() {
            return Ok(0);
        }

        let crc = CRC16.checksum(payload).to_be_bytes();
        let mut chunk = [0u8; BYTES_PER_FRAME];
        let mut produced = 0usize;
        let mut offset = 0usize; // position in payload || crc
        let mut toggle = true;
        while produced < nframes {
            let mut fill = 0usize;
            while fill < BYTES_PER_FRAME && offset + fill < total {
                let i = offset + fill;
                chunk[fill] = if i < payload.len() {
                    payload[i]
                } else {
                    crc[i - payload.len()]
                };
                fill += 1;
            }
            offset += fill;

            let mut tail = tid;
            if produced == 0 {
                tail |= TAIL_START;
            }
            if produced == nframes - 1 {
                tail |= TAIL_END;
            }
            if toggle {
                tail |= TAIL_TOGGLE;
            }
            toggle = !toggle;
            self.enqueue_frame(id, &chunk[..fill], tail);
            produced += 1;
        }
        Ok(nframes)
    }

    fn rx_subscribe(
        &mut self,
        kind: TransferKind,
        port_id: PortId,
        extent: usize,
        _transfer_id_timeout_us: Microsecond,
    ) -> Result<bool, TransportError> {
        if self.subscription_index(kind, port_id).is_some() {
            return Ok(false);
        }
        self.subscriptions
            .push(SubscriptionState {
                sub: Subscription {
                    port_id,
                    extent,
                    kind,
                },
                sessions: heapless::Vec::new(),
            })
            .map_err(|_| TransportError::Capacity)?;
        Ok(true)
    }

    fn rx_unsubscribe(&mut self, kind: TransferKind, port_id: PortId) -> bool {
        match self.subscription_index(kind, port_id) {
            Some(i) => {
                self.subscriptions.swap_remove(i);
                true
            }
            None => false,
        }
    }

    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn set_node_id(&mut self, node_id: NodeId) {
        self.node_id = node_id;
    }
}

static_assertions::assert_impl_all!(CanTransport: Transport);

#[cfg(test)]
mod tests {
    use super::*;

    fn test_heap() -> &'static Heap {
        let pool = Box::leak(vec![0u8; 65536].into_boxed_slice());
        Heap::init(pool).unwrap()
    }

    fn transport(node_id: NodeId) -> CanTransport {
        let mut t = CanTransport::new(test_heap());
        t.set_node_id(node_id);
        t
    }

    /// Pops every queued frame back through the receiver, returning the
    /// completed transfer if one materializes.
    fn loop_back(t: &mut CanTransport) -> Option<Transfer> {
        let mut out = None;
        while let Some(frame) = t.tx_pop() {
            if let Some(done) = t
                .rx_receive(frame.extended_can_id, frame.bytes())
                .expect("rx")
            {
                out = Some(done);
            }
        }
        out
    }

    #[test]
    fn single_frame_round_trip() {
        let mut t = transport(11);
        t.rx_subscribe(TransferKind::Message, 123, 100, 2_000_000)
            .unwrap();

        let meta = TransferMetadata::message(123, 0);
        assert_eq!(t.tx_push(0, &meta, b"hello\0"), Ok(1));
        let got = loop_back(&mut t).expect("transfer");
        assert_eq!(&*got.payload, b"hello\0");
        assert_eq!(got.metadata.remote_node_id, 11);
        assert_eq!(got.metadata.port_id, 123);
    }

    #[test]
    fn three_frame_round_trip() {
        let mut t = transport(11);
        t.rx_subscribe(TransferKind::Message, 123, 100, 2_000_000)
            .unwrap();

        let payload = b"ehllo ehllo ehllo\0"; // 18 bytes -> 20 with crc -> 3 frames
        let meta = TransferMetadata::message(123, 1);
        assert_eq!(t.tx_push(0, &meta, payload), Ok(3));

        let f1 = t.tx_pop().unwrap();
        let f2 = t.tx_pop().unwrap();
        let f3 = t.tx_pop().unwrap();
        assert!(t.rx_receive(f1.extended_can_id, f1.bytes()).unwrap().is_none());
        assert!(t.rx_receive(f2.extended_can_id, f2.bytes()).unwrap().is_none());
        let got = t
            .rx_receive(f3.extended_can_id, f3.bytes())
            .unwrap()
            .expect("complete on final frame");
        assert_eq!(&*got.payload, payload);
        assert_eq!(got.metadata.transfer_id, 1);
    }

    #[test]
    fn large_transfer_is_37_frames() {
        let mut t = transport(11);
        t.rx_subscribe(TransferKind::Message, 123, 512, 2_000_000)
            .unwrap();

        let mut payload = [0u8; 256];
        for (i, b) in payload.iter_mut().enumerate() {
            *b = i as u8;
        }
        let meta = TransferMetadata::message(123, 0);
        assert_eq!(t.tx_push(0, &meta, &payload), Ok(37));
        assert_eq!(t.tx_queue_len(), 37);

        let mut frames = Vec::new();
        while let Some(f) = t.tx_pop() {
            frames.push(f);
        }
        let mut result = None;
        for (i, f) in frames.iter().enumerate() {
            let r = t.rx_receive(f.extended_can_id, f.bytes()).unwrap();
            if i < 36 {
                assert!(r.is_none(), "frame {i} completed early");
            } else {
                result = r;
            }
        }
        let got = result.expect("transfer after frame 37");
        assert_eq!(got.payload.len(), 256);
        assert_eq!(&*got.payload, &payload[..]);
        assert_eq!(got.metadata.remote_node_id, 11);
        assert_eq!(got.metadata.kind, TransferKind::Message);
        assert_eq!(got.metadata.priority, Priority::Nominal);
    }

    #[test]
    fn forward_spoofs_source() {
        let mut t = transport(11);
        t.rx_subscribe(TransferKind::Message, 123, 100, 2_000_000)
            .unwrap();

        let mut meta = TransferMetadata::message(123, 0);
        assert_eq!(t.tx_forward(0, &meta, b"hello", 22), Ok(1));
        let got = loop_back(&mut t).unwrap();
        assert_eq!(got.metadata.remote_node_id, 22);
        assert_eq!(t.node_id(), 11);

        meta.transfer_id = 1;
        assert_eq!(t.tx_push(0, &meta, b"ehllo"), Ok(1));
        let got = loop_back(&mut t).unwrap();
        assert_eq!(got.metadata.remote_node_id, 11);
    }

    #[test]
    fn tx_queue_capacity_is_all_or_nothing() {
        let mut t = transport(11);
        let meta = TransferMetadata::message(99, 0);
        // Fill the queue with single-frame pushes.
        for _ in 0..TX_QUEUE_CAPACITY {
            assert_eq!(t.tx_push(0, &meta, b"x"), Ok(1));
        }
        assert_eq!(t.tx_push(0, &meta, b"x"), Ok(0));
        // Popping restores capacity.
        assert!(t.tx_pop().is_some());
        assert_eq!(t.tx_push(0, &meta, b"x"), Ok(1));

        // A multi-frame transfer that does not fit whole takes nothing.
        let mut fresh = transport(11);
        let big = [0u8; 256];
        for _ in 0..(TX_QUEUE_CAPACITY - 10) {
            fresh.tx_push(0, &meta, b"x").unwrap();
        }
        let before = fresh.tx_queue_len();
        assert_eq!(fresh.tx_push(0, &meta, &big), Ok(0));
        assert_eq!(fresh.tx_queue_len(), before);
    }

    #[test]
    fn unsubscribed_traffic_is_ignored() {
        let mut t = transport(11);
        let meta = TransferMetadata::message(77, 0);
        t.tx_push(0, &meta, b"hi").unwrap();
        let f = t.tx_pop().unwrap();
        assert!(t.rx_receive(f.extended_can_id, f.bytes()).unwrap().is_none());
    }

    #[test]
    fn service_transfers_are_addressed() {
        let mut server = transport(9);
        server
            .rx_subscribe(TransferKind::Request, 384, 256, 2_000_000)
            .unwrap();

        let mut client = transport(11);
        let meta = TransferMetadata::service(TransferKind::Request, 384, 9, 4);
        assert_eq!(client.tx_push(0, &meta, b"req"), Ok(1));
        let f = client.tx_pop().unwrap();

        // Addressed to node 9: node 11 ignores it even when subscribed.
        let mut bystander = transport(11);
        bystander
            .rx_subscribe(TransferKind::Request, 384, 256, 2_000_000)
            .unwrap();
        assert!(bystander
            .rx_receive(f.extended_can_id, f.bytes())
            .unwrap()
            .is_none());

        let got = server
            .rx_receive(f.extended_can_id, f.bytes())
            .unwrap()
            .expect("request");
        assert_eq!(got.metadata.kind, TransferKind::Request);
        assert_eq!(got.metadata.remote_node_id, 11);
        assert_eq!(got.metadata.destination_node_id, 9);
        assert_eq!(&*got.payload, b"req");
    }

    #[test]
    fn corrupted_multiframe_crc_is_dropped() {
        let mut t = transport(11);
        t.rx_subscribe(TransferKind::Message, 123, 100, 2_000_000)
            .unwrap();
        let meta = TransferMetadata::message(123, 0);
        t.tx_push(0, &meta, b"a transfer long enough to need three frames!")
            .unwrap();

        let mut frames = Vec::new();
        while let Some(f) = t.tx_pop() {
            frames.push(f);
        }
        // Flip a payload bit in the middle frame.
        frames[1].data[0] ^= 0x01;
        let mut completed = false;
        for f in &frames {
            if let Ok(Some(_)) = t.rx_receive(f.extended_can_id, f.bytes()) {
                completed = true;
            }
        }
        assert!(!completed);
    }

    #[test]
    fn subscription_slots_bounded() {
        let mut t = transport(11);
        for port in 0..SUBSCRIPTION_CAPACITY as PortId {
            assert_eq!(
                t.rx_subscribe(TransferKind::Message, port + 1, 8, 0),
                Ok(true)
            );
        }
        assert_eq!(
            t.rx_subscribe(TransferKind::Message, 5000, 8, 0),
            Err(TransportError::Capacity)
        );
        // Duplicates stay idempotent even at capacity.
        assert_eq!(t.rx_subscribe(TransferKind::Message, 1, 8, 0), Ok(false));
    }

    #[test]
    fn reassembly_is_leak_free_on_abandoned_sessions() {
        let heap = test_heap();
        let mut t = CanTransport::new(heap);
        t.set_node_id(11);
        t.rx_subscribe(TransferKind::Message, 123, 256, 2_000_000)
            .unwrap();
        let before = heap.diagnostics().allocated;

        let meta = TransferMetadata::message(123, 0);
        t.tx_push(0, &meta, &[7u8; 100]).unwrap();
        // Deliver only the first frame, then drop the transport: the
        // half-built session buffer must come back to the pool.
        let f = t.tx_pop().unwrap();
        t.rx_receive(f.extended_can_id, f.bytes()).unwrap();
        drop(t);
        assert_eq!(heap.diagnostics().allocated, before);
    }
}
