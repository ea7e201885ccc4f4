// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cyphal/serial transport: framed transfers over a raw byte stream.
//!
//! Each transfer travels as one frame: a 24-byte header (version, priority,
//! 16-bit source/destination, data specifier, 64-bit transfer-id, frame
//! index, header CRC-16) followed by the payload and a CRC-32C trailer, the
//! whole thing COBS-encoded and closed with a `0x00` delimiter.
//!
//! The receive side is stream-oriented: whatever the UART or USB-CDC driver
//! hands over is a byte span with no frame alignment whatsoever. One
//! `rx_receive` call consumes from the span and may complete several
//! transfers; the caller loops until the span is drained. Partial frames
//! park in the reassembler between calls.
//!
//! Anything that fails the framing checks -- COBS damage, header CRC, short
//! frame, payload CRC -- is discarded without comment, because a serial
//! link's noise floor is not an event worth logging.

#![cfg_attr(not(test), no_std)]

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use crc::Crc;
use cyphal::{
    Microsecond, NodeId, Payload, PortId, Priority, Subscription, Transfer,
    TransferKind, TransferMetadata, Transport, TransportError, NODE_ID_UNSET,
};
use num_traits::FromPrimitive as _;
use o1heap::Heap;

/// Largest payload accepted in one serial frame.
pub const PAYLOAD_MAX: usize = 512;

const HEADER_SIZE: usize = 24;
const RAW_MAX: usize = HEADER_SIZE + PAYLOAD_MAX + 4;

/// COBS worst case plus delimiter.
pub const FRAME_MAX: usize = corncobs::max_encoded_len(RAW_MAX);

pub const TX_QUEUE_CAPACITY: usize = 4;
pub const SUBSCRIPTION_CAPACITY: usize = 32;

const VERSION: u8 = 1;

/// Node-id width on this transport is 16 bits; the 8-bit unset value maps
/// to the 16-bit one.
const WIRE_NODE_ID_UNSET: u16 = 0xFFFF;

const SPECIFIER_SERVICE: u16 = 1 << 15;
const SPECIFIER_REQUEST: u16 = 1 << 14;

const FRAME_INDEX_EOT: u32 = 1 << 31;

const HEADER_CRC: Crc<u16> = Crc::<u16>::new(&crc::CRC_16_IBM_3740);
const PAYLOAD_CRC: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISCSI);

/// One encoded frame ready for the wire.
#[derive(Clone, Debug)]
pub struct SerialFrame {
    bytes: heapless::Vec<u8, FRAME_MAX>,
}

impl SerialFrame {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

fn wire_node_id(id: NodeId) -> u16 {
    if id == NODE_ID_UNSET {
        WIRE_NODE_ID_UNSET
    } else {
        id as u16
    }
}

fn cyphal_node_id(id: u16) -> NodeId {
    if id == WIRE_NODE_ID_UNSET {
        NODE_ID_UNSET
    } else {
        (id & 0xFF) as NodeId
    }
}

fn data_specifier(kind: TransferKind, port_id: PortId) -> u16 {
    match kind {
        TransferKind::Message => port_id,
        TransferKind::Request => SPECIFIER_SERVICE | SPECIFIER_REQUEST | port_id,
        TransferKind::Response => SPECIFIER_SERVICE | port_id,
    }
}

fn split_specifier(spec: u16) -> (TransferKind, PortId) {
    if spec & SPECIFIER_SERVICE != 0 {
        let kind = if spec & SPECIFIER_REQUEST != 0 {
            TransferKind::Request
        } else {
            TransferKind::Response
        };
        (kind, spec & 0x3FFF)
    } else {
        (TransferKind::Message, spec)
    }
}

pub struct SerialTransport {
    heap: &'static Heap,
    node_id: NodeId,
    tx_queue: heapless::Deque<SerialFrame, TX_QUEUE_CAPACITY>,
    subscriptions: heapless::Vec<Subscription, SUBSCRIPTION_CAPACITY>,
    /// Bytes of a frame whose delimiter has not arrived yet.
    partial: heapless::Vec<u8, FRAME_MAX>,
    /// Set while skipping an oversized or garbage run until the next
    /// delimiter.
    resync: bool,
}

impl SerialTransport {
    pub fn new(heap: &'static Heap) -> Self {
        Self {
            heap,
            node_id: NODE_ID_UNSET,
            tx_queue: heapless::Deque::new(),
            subscriptions: heapless::Vec::new(),
            partial: heapless::Vec::new(),
            resync: false,
        }
    }

    /// Next encoded frame for the UART driver.
    pub fn tx_pop(&mut self) -> Option<SerialFrame> {
        self.tx_queue.pop_front()
    }

    pub fn tx_queue_len(&self) -> usize {
        self.tx_queue.len()
    }

    /// Consumes bytes from the front of `stream`, returning a transfer as
    /// soon as one completes. Call in a loop until the stream is empty:
    ///
    /// ```ignore
    /// while !span.is_empty() || transport.has_buffered_frame() {
    ///     match transport.rx_receive(&mut span) { ... }
    /// }
    /// ```
    pub fn rx_receive(&mut self, stream: &mut &[u8]) -> Option<Transfer> {
        while !stream.is_empty() {
            // Take bytes up to and including the next delimiter.
            let split = match stream.iter().position(|&b| b == 0) {
                Some(i) => i + 1,
                None => stream.len(),
            };
            let (chunk, rest) = stream.split_at(split);
            *stream = rest;
            let terminated = *chunk.last().unwrap() == 0;

            if self.resync {
                if terminated {
                    self.resync = false;
                }
                continue;
            }
            if self.partial.extend_from_slice(chunk).is_err() {
                // Oversized frame: drop it and resynchronize.
                self.partial.clear();
                self.resync = !terminated;
                continue;
            }
            if !terminated {
                return None; // wait for more bytes
            }

            let mut raw = [0u8; RAW_MAX];
            let decoded = corncobs::decode_buf(&self.partial, &mut raw).ok();
            self.partial.clear();
            let n = match decoded {
                Some(n) => n,
                None => continue,
            };
            if let Some(transfer) = self.accept_frame(&raw[..n]) {
                return Some(transfer);
            }
        }
        None
    }

    fn accept_frame(&mut self, raw: &[u8]) -> Option<Transfer> {
        if raw.len() < HEADER_SIZE + 4 {
            return None;
        }
        let header = &raw[..HEADER_SIZE];
        if header[0] != VERSION {
            return None;
        }
        if HEADER_CRC.checksum(&header[..22]) != BigEndian::read_u16(&header[22..24]) {
            return None;
        }
        let priority = Priority::from_u8(header[1])?;
        let source = LittleEndian::read_u16(&header[2..4]);
        let destination = LittleEndian::read_u16(&header[4..6]);
        let (kind, port_id) = split_specifier(LittleEndian::read_u16(&header[6..8]));
        let transfer_id = LittleEndian::read_u64(&header[8..16]);
        let frame_index_eot = LittleEndian::read_u32(&header[16..20]);

        // Single-frame transfers only: index zero with the end bit.
        if frame_index_eot != FRAME_INDEX_EOT {
            return None;
        }
        if matches!(kind, TransferKind::Request | TransferKind::Response)
            && cyphal_node_id(destination) != self.node_id
        {
            return None;
        }
        let sub = self
            .subscriptions
            .iter()
            .find(|s| s.kind == kind && s.port_id == port_id)?;

        let body = &raw[HEADER_SIZE..raw.len() - 4];
        let crc = LittleEndian::read_u32(&raw[raw.len() - 4..]);
        if PAYLOAD_CRC.checksum(body) != crc {
            return None;
        }
        if body.len() > sub.extent {
            return None;
        }

        let metadata = TransferMetadata {
            priority,
            kind,
            port_id,
            remote_node_id: cyphal_node_id(source),
            source_node_id: cyphal_node_id(source),
            destination_node_id: cyphal_node_id(destination),
            transfer_id: transfer_id as u8,
        };
        let payload = Payload::copy_from(self.heap, body)?;
        Some(Transfer::new(metadata, payload))
    }
}

impl Transport for SerialTransport {
    fn tx_push(
        &mut self,
        _deadline_us: Microsecond,
        metadata: &TransferMetadata,
        payload: &[u8],
    ) -> Result<usize, TransportError> {
        if payload.len() > PAYLOAD_MAX {
            return Err(TransportError::Argument);
        }
        if self.tx_queue.is_full() {
            return Ok(0);
        }

        let mut raw = [0u8; RAW_MAX];
        raw[0] = VERSION;
        raw[1] = metadata.priority as u8;
        LittleEndian::write_u16(&mut raw[2..4], wire_node_id(self.node_id));
        let destination = match metadata.kind {
            TransferKind::Message => WIRE_NODE_ID_UNSET,
            _ => wire_node_id(metadata.remote_node_id),
        };
        LittleEndian::write_u16(&mut raw[4..6], destination);
        LittleEndian::write_u16(
            &mut raw[6..8],
            data_specifier(metadata.kind, metadata.port_id),
        );
        LittleEndian::write_u64(&mut raw[8..16], metadata.transfer_id as u64);
        LittleEndian::write_u32(&mut raw[16..20], FRAME_INDEX_EOT);
        LittleEndian::write_u16(&mut raw[20..22], 0); // user data
        let hcrc = HEADER_CRC.checksum(&raw[..22]);
        BigEndian::write_u16(&mut raw[22..24], hcrc);

        raw[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
        let pcrc = PAYLOAD_CRC.checksum(payload);
        let total = HEADER_SIZE + payload.len() + 4;
        LittleEndian::write_u32(&mut raw[total - 4..total], pcrc);

        let mut frame = SerialFrame {
            bytes: heapless::Vec::new(),
        };
        frame
            .bytes
            .resize_default(corncobs::max_encoded_len(total))
            .map_err(|_| TransportError::Argument)?;
        let encoded = corncobs::encode_buf(&raw[..total], &mut frame.bytes);
        frame.bytes.truncate(encoded);

        let _ = self.tx_queue.push_back(frame);
        Ok(1)
    }

    fn rx_subscribe(
        &mut self,
        kind: TransferKind,
        port_id: PortId,
        extent: usize,
        _transfer_id_timeout_us: Microsecond,
    ) -> Result<bool, TransportError> {
        if self
            .subscriptions
            .iter()
            .any(|s| s.kind == kind && s.port_id == port_id)
        {
            return Ok(false);
        }
        self.subscriptions
            .push(Subscription {
                port_id,
                extent,
                kind,
            })
            .map_err(|_| TransportError::Capacity)?;
        Ok(true)
    }

    fn rx_unsubscribe(&mut self, kind: TransferKind, port_id: PortId) -> bool {
        match self
            .subscriptions
            .iter()
            .position(|s| s.kind == kind && s.port_id == port_id)
        {
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

static_assertions::assert_impl_all!(SerialTransport: Transport);
