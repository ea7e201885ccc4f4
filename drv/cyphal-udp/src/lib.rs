// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cyphal/UDP transport: one frame per datagram.
//!
//! Every datagram leads with a fixed 24-byte header -- version, priority,
//! 16-bit source and destination node ids, data specifier, 64-bit
//! transfer-id, frame index with end-of-transfer bit, user data, and a
//! big-endian header CRC -- followed by the payload and a CRC-32C trailer.
//! This node sends single-frame transfers only (frame index 0, EOT set) and
//! ignores anything else, which matches the traffic the rest of the fleet
//! produces.
//!
//! Sockets are board-support territory: the transmit side parks finished
//! datagrams in a bounded queue for the network driver, and the receive
//! side takes raw datagram bytes from it. Node ids are 16-bit on this
//! transport; the 8-bit ids used by the rest of the stack map onto the low
//! byte, with `0xFF` standing for the 16-bit unset value.

#![cfg_attr(not(test), no_std)]

use crc::Crc;
use cyphal::{
    Microsecond, NodeId, Payload, PortId, Priority, Subscription, Transfer,
    TransferKind, TransferMetadata, Transport, TransportError, NODE_ID_UNSET,
};
use num_traits::FromPrimitive as _;
use o1heap::Heap;
use zerocopy::byteorder::{LittleEndian, U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const PAYLOAD_MAX: usize = 512;
pub const DATAGRAM_MAX: usize = core::mem::size_of::<WireHeader>() + PAYLOAD_MAX + 4;

pub const TX_QUEUE_CAPACITY: usize = 8;
pub const SUBSCRIPTION_CAPACITY: usize = 32;

const VERSION: u8 = 1;

/// 16-bit anonymous/unset node id.
pub const WIRE_NODE_ID_UNSET: u16 = 0xFFFF;

const SPECIFIER_SERVICE: u16 = 1 << 15;
const SPECIFIER_REQUEST: u16 = 1 << 14;

const FRAME_INDEX_EOT: u32 = 1 << 31;

const HEADER_CRC: Crc<u16> = Crc::<u16>::new(&crc::CRC_16_IBM_3740);
const PAYLOAD_CRC: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISCSI);

/// Fixed datagram header. Little-endian fields, big-endian CRC bytes.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct WireHeader {
    pub version: u8,
    pub priority: u8,
    pub source_node_id: U16<LittleEndian>,
    pub destination_node_id: U16<LittleEndian>,
    pub data_specifier_snm: U16<LittleEndian>,
    pub transfer_id: U64<LittleEndian>,
    pub frame_index_eot: U32<LittleEndian>,
    pub user_data: U16<LittleEndian>,
    pub header_crc16_big_endian: [u8; 2],
}

const _: () = assert!(core::mem::size_of::<WireHeader>() == 24);

/// One finished datagram for the network driver.
#[derive(Clone, Debug)]
pub struct UdpFrame {
    bytes: heapless::Vec<u8, DATAGRAM_MAX>,
}

impl UdpFrame {
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

pub struct UdpTransport {
    heap: &'static Heap,
    /// Full 16-bit identity; the `Transport` view exposes the low byte.
    node_id: u16,
    tx_queue: heapless::Deque<UdpFrame, TX_QUEUE_CAPACITY>,
    subscriptions: heapless::Vec<Subscription, SUBSCRIPTION_CAPACITY>,
}

impl UdpTransport {
    pub fn new(heap: &'static Heap) -> Self {
        Self {
            heap,
            node_id: WIRE_NODE_ID_UNSET,
            tx_queue: heapless::Deque::new(),
            subscriptions: heapless::Vec::new(),
        }
    }

    /// Full-width node id, for deployments using more than 8 bits.
    pub fn node_id_16(&self) -> u16 {
        self.node_id
    }

    pub fn set_node_id_16(&mut self, node_id: u16) {
        self.node_id = node_id;
    }

    pub fn tx_pop(&mut self) -> Option<UdpFrame> {
        self.tx_queue.pop_front()
    }

    pub fn tx_queue_len(&self) -> usize {
        self.tx_queue.len()
    }

    /// Accepts one received datagram. `Ok(Some)` when it carried a whole
    /// transfer we subscribe to; `Ok(None)` for traffic that is not ours;
    /// `Err` for datagrams that fail the framing checks.
    pub fn rx_receive(&mut self, datagram: &[u8]) -> Result<Option<Transfer>, UdpRxError> {
        let (header, rest) =
            WireHeader::read_from_prefix(datagram).map_err(|_| UdpRxError::Malformed)?;
        if header.version != VERSION {
            return Err(UdpRxError::Malformed);
        }
        let mut head22 = [0u8; 22];
        head22.copy_from_slice(&datagram[..22]);
        let crc = u16::from_be_bytes(header.header_crc16_big_endian);
        if HEADER_CRC.checksum(&head22) != crc {
            return Err(UdpRxError::Malformed);
        }
        if rest.len() < 4 {
            return Err(UdpRxError::Malformed);
        }
        if header.frame_index_eot.get() != FRAME_INDEX_EOT {
            // Multi-frame UDP transfers are not part of this system's
            // traffic; drop them here.
            return Ok(None);
        }

        let spec = header.data_specifier_snm.get();
        let (kind, port_id) = if spec & SPECIFIER_SERVICE != 0 {
            let kind = if spec & SPECIFIER_REQUEST != 0 {
                TransferKind::Request
            } else {
                TransferKind::Response
            };
            (kind, spec & 0x3FFF)
        } else {
            (TransferKind::Message, spec)
        };

        if matches!(kind, TransferKind::Request | TransferKind::Response)
            && header.destination_node_id.get() != self.node_id
        {
            return Ok(None);
        }
        let sub = match self
            .subscriptions
            .iter()
            .find(|s| s.kind == kind && s.port_id == port_id)
        {
            Some(s) => s,
            None => return Ok(None),
        };

        let body = &rest[..rest.len() - 4];
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&rest[rest.len() - 4..]);
        if PAYLOAD_CRC.checksum(body) != u32::from_le_bytes(crc_bytes) {
            return Err(UdpRxError::Malformed);
        }
        if body.len() > sub.extent {
            return Err(UdpRxError::Malformed);
        }

        let metadata = TransferMetadata {
            priority: Priority::from_u8(header.priority).ok_or(UdpRxError::Malformed)?,
            kind,
            port_id,
            remote_node_id: cyphal_node_id(header.source_node_id.get()),
            source_node_id: cyphal_node_id(header.source_node_id.get()),
            destination_node_id: cyphal_node_id(header.destination_node_id.get()),
            transfer_id: header.transfer_id.get() as u8,
        };
        let payload = Payload::copy_from(self.heap, body).ok_or(UdpRxError::Memory)?;
        Ok(Some(Transfer::new(metadata, payload)))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UdpRxError {
    Malformed,
    Memory,
}

impl Transport for UdpTransport {
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

        let spec = match metadata.kind {
            TransferKind::Message => metadata.port_id,
            TransferKind::Request => {
                SPECIFIER_SERVICE | SPECIFIER_REQUEST | metadata.port_id
            }
            TransferKind::Response => SPECIFIER_SERVICE | metadata.port_id,
        };
        let destination = match metadata.kind {
            TransferKind::Message => WIRE_NODE_ID_UNSET,
            _ => wire_node_id(metadata.remote_node_id),
        };
        let mut header = WireHeader {
            version: VERSION,
            priority: metadata.priority as u8,
            source_node_id: U16::new(self.node_id),
            destination_node_id: U16::new(destination),
            data_specifier_snm: U16::new(spec),
            transfer_id: U64::new(metadata.transfer_id as u64),
            frame_index_eot: U32::new(FRAME_INDEX_EOT),
            user_data: U16::new(0),
            header_crc16_big_endian: [0; 2],
        };
        let crc = HEADER_CRC.checksum(&header.as_bytes()[..22]);
        header.header_crc16_big_endian = crc.to_be_bytes();

        let mut frame = UdpFrame {
            bytes: heapless::Vec::new(),
        };
        let _ = frame.bytes.extend_from_slice(header.as_bytes());
        let _ = frame.bytes.extend_from_slice(payload);
        let _ = frame
            .bytes
            .extend_from_slice(&PAYLOAD_CRC.checksum(payload).to_le_bytes());

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
        cyphal_node_id(self.node_id)
    }

    fn set_node_id(&mut self, node_id: NodeId) {
        self.node_id = wire_node_id(node_id);
    }
}

static_assertions::assert_impl_all!(UdpTransport: Transport);
