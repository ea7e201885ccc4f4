// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire representations of the data types this node speaks.
//!
//! The generated serializer library is an external collaborator of the
//! runtime; this crate is its stated interface: one struct per data type,
//! a fixed maximum serialized size, and `serialize`/`deserialize` that are
//! exact inverses. Encodings are little-endian and byte-aligned.
//!
//! Failures are values: a short buffer, a bad discriminant, or an
//! out-of-range count deserializes to `Err(WireError::Malformed)` and the
//! receiving task drops the transfer. Nothing here panics on wire input.

#![cfg_attr(not(test), no_std)]

pub mod sat;
pub mod standard;

use byteorder::{ByteOrder, LittleEndian};
use cyphal::{ports, Subscription, TransferKind};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WireError {
    /// Destination buffer too small (serialize) or source truncated
    /// (deserialize).
    Truncated,
    /// A discriminant or count that the type cannot represent.
    Malformed,
}

/// One serializable data type.
pub trait DataType: Sized {
    /// Upper bound on the serialized form; publish buffers are sized by it.
    const MAX_SERIALIZED_SIZE: usize;

    /// Writes the wire form into `buf`, returning the bytes used.
    fn serialize(&self, buf: &mut [u8]) -> Result<usize, WireError>;

    /// Parses the wire form. Must accept exactly what `serialize` produces.
    fn deserialize(buf: &[u8]) -> Result<Self, WireError>;
}

/// Message subscriptions this node knows how to decode, used to resolve a
/// peer's advertised port into a concrete subscription.
pub const MESSAGES: &[Subscription] = &[
    Subscription {
        port_id: ports::HEARTBEAT,
        extent: standard::Heartbeat::EXTENT,
        kind: TransferKind::Message,
    },
    Subscription {
        port_id: ports::NODE_PORT_LIST,
        extent: standard::NodePortList::EXTENT,
        kind: TransferKind::Message,
    },
    Subscription {
        port_id: ports::TIME_SYNCHRONIZATION,
        extent: standard::TimeSynchronization::EXTENT,
        kind: TransferKind::Message,
    },
    Subscription {
        port_id: ports::DIAGNOSTIC_RECORD,
        extent: standard::DiagnosticRecord::EXTENT,
        kind: TransferKind::Message,
    },
    Subscription {
        port_id: ports::TLE,
        extent: sat::Tle::EXTENT,
        kind: TransferKind::Message,
    },
    Subscription {
        port_id: ports::POSITION_VELOCITY,
        extent: sat::PositionVelocity::EXTENT,
        kind: TransferKind::Message,
    },
    Subscription {
        port_id: ports::ORIENTATION_SOLUTION,
        extent: sat::OrientationSolution::EXTENT,
        kind: TransferKind::Message,
    },
    Subscription {
        port_id: ports::POSITION_SOLUTION,
        extent: sat::PositionSolution::EXTENT,
        kind: TransferKind::Message,
    },
];

/// Service requests this node can receive (server side).
pub const REQUESTS: &[Subscription] = &[
    Subscription {
        port_id: ports::GET_INFO,
        extent: standard::GetInfoRequest::EXTENT,
        kind: TransferKind::Request,
    },
    Subscription {
        port_id: ports::REGISTER_ACCESS,
        extent: standard::RegisterAccessRequest::EXTENT,
        kind: TransferKind::Request,
    },
];

/// Service responses this node can receive (client side).
pub const RESPONSES: &[Subscription] = &[
    Subscription {
        port_id: ports::GET_INFO,
        extent: standard::GetInfoResponse::EXTENT,
        kind: TransferKind::Response,
    },
    Subscription {
        port_id: ports::REGISTER_ACCESS,
        extent: standard::RegisterAccessResponse::EXTENT,
        kind: TransferKind::Response,
    },
];

pub fn find_message(port_id: cyphal::PortId) -> Option<&'static Subscription> {
    MESSAGES.iter().find(|s| s.port_id == port_id)
}

// Cursor pair shared by the type modules. Writers fail on overflow rather
// than panicking; readers fail on truncation.

pub(crate) struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn space(&mut self, n: usize) -> Result<&mut [u8], WireError> {
        if self.pos + n > self.buf.len() {
            return Err(WireError::Truncated);
        }
        let s = &mut self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn finish(self) -> usize {
        self.pos
    }

    pub fn put_u8(&mut self, v: u8) -> Result<(), WireError> {
        self.space(1)?[0] = v;
        Ok(())
    }

    pub fn put_u16(&mut self, v: u16) -> Result<(), WireError> {
        LittleEndian::write_u16(self.space(2)?, v);
        Ok(())
    }

    pub fn put_u32(&mut self, v: u32) -> Result<(), WireError> {
        LittleEndian::write_u32(self.space(4)?, v);
        Ok(())
    }

    pub fn put_u64(&mut self, v: u64) -> Result<(), WireError> {
        LittleEndian::write_u64(self.space(8)?, v);
        Ok(())
    }

    pub fn put_f32(&mut self, v: f32) -> Result<(), WireError> {
        LittleEndian::write_f32(self.space(4)?, v);
        Ok(())
    }

    pub fn put_f64(&mut self, v: f64) -> Result<(), WireError> {
        LittleEndian::write_f64(self.space(8)?, v);
        Ok(())
    }

    pub fn put_bytes(&mut self, v: &[u8]) -> Result<(), WireError> {
        self.space(v.len())?.copy_from_slice(v);
        Ok(())
    }
}

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.pos + n > self.buf.len() {
            return Err(WireError::Truncated);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, WireError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn get_u64(&mut self) -> Result<u64, WireError> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn get_f32(&mut self) -> Result<f32, WireError> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    pub fn get_f64(&mut self) -> Result<f64, WireError> {
        Ok(LittleEndian::read_f64(self.take(8)?))
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        self.take(n)
    }
}
