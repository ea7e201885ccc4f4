// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Standard node-level data types: heartbeat, port list, time sync,
//! node info, register access, diagnostic records.

use crate::{DataType, Reader, WireError, Writer};
use byteorder::{ByteOrder, LittleEndian};
use cyphal::PortId;

pub const HEALTH_NOMINAL: u8 = 0;
pub const HEALTH_ADVISORY: u8 = 1;
pub const HEALTH_CAUTION: u8 = 2;
pub const HEALTH_WARNING: u8 = 3;

pub const MODE_OPERATIONAL: u8 = 0;
pub const MODE_INITIALIZATION: u8 = 1;
pub const MODE_MAINTENANCE: u8 = 2;
pub const MODE_SOFTWARE_UPDATE: u8 = 3;

/// Liveness beacon. `uptime` ticks once per 1024 ms of scheduler time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    pub uptime: u32,
    pub health: u8,
    pub mode: u8,
    pub vendor_specific_status_code: u8,
}

impl Heartbeat {
    pub const EXTENT: usize = 12;

    pub fn nominal(uptime: u32) -> Self {
        Self {
            uptime,
            health: HEALTH_NOMINAL,
            mode: MODE_OPERATIONAL,
            vendor_specific_status_code: 0,
        }
    }
}

impl DataType for Heartbeat {
    const MAX_SERIALIZED_SIZE: usize = 7;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        let mut w = Writer::new(buf);
        w.put_u32(self.uptime)?;
        w.put_u8(self.health)?;
        w.put_u8(self.mode)?;
        w.put_u8(self.vendor_specific_status_code)?;
        Ok(w.finish())
    }

    fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        Ok(Self {
            uptime: r.get_u32()?,
            health: r.get_u8()?,
            mode: r.get_u8()?,
            vendor_specific_status_code: r.get_u8()?,
        })
    }
}

/// Ports a node advertises: subject lists by id, service sets as bitmasks
/// over the 9-bit service-id space.
pub const PORT_LIST_CAPACITY: usize = 16;
pub const SERVICE_MASK_BYTES: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceIdMask {
    bits: [u8; SERVICE_MASK_BYTES],
}

impl Default for ServiceIdMask {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceIdMask {
    pub const fn new() -> Self {
        Self {
            bits: [0; SERVICE_MASK_BYTES],
        }
    }

    pub fn set(&mut self, service_id: PortId) {
        let i = service_id as usize;
        if i < SERVICE_MASK_BYTES * 8 {
            self.bits[i / 8] |= 1 << (i % 8);
        }
    }

    pub fn get(&self, service_id: PortId) -> bool {
        let i = service_id as usize;
        i < SERVICE_MASK_BYTES * 8 && self.bits[i / 8] & (1 << (i % 8)) != 0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodePortList {
    pub publishers: heapless::Vec<PortId, PORT_LIST_CAPACITY>,
    pub subscribers: heapless::Vec<PortId, PORT_LIST_CAPACITY>,
    pub clients: ServiceIdMask,
    pub servers: ServiceIdMask,
}

impl NodePortList {
    pub const EXTENT: usize = 256;
}

impl DataType for NodePortList {
    const MAX_SERIALIZED_SIZE: usize =
        2 * (1 + 2 * PORT_LIST_CAPACITY) + 2 * SERVICE_MASK_BYTES;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        let mut w = Writer::new(buf);
        for list in [&self.publishers, &self.subscribers] {
            w.put_u8(list.len() as u8)?;
            for &port in list.iter() {
                w.put_u16(port)?;
            }
        }
        w.put_bytes(&self.clients.bits)?;
        w.put_bytes(&self.servers.bits)?;
        Ok(w.finish())
    }

    fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let mut out = Self::default();
        for list in [&mut out.publishers, &mut out.subscribers] {
            let count = r.get_u8()? as usize;
            if count > PORT_LIST_CAPACITY {
                return Err(WireError::Malformed);
            }
            for _ in 0..count {
                list.push(r.get_u16()?).map_err(|_| WireError::Malformed)?;
            }
        }
        out.clients.bits.copy_from_slice(r.get_bytes(SERVICE_MASK_BYTES)?);
        out.servers.bits.copy_from_slice(r.get_bytes(SERVICE_MASK_BYTES)?);
        Ok(out)
    }
}

/// Time synchronization beacon: microsecond timestamp of the previous
/// transmission, 56 bits on the wire. Zero is the "RTC was unreadable"
/// sentinel and listeners skip it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimeSynchronization {
    pub previous_transmission_timestamp_us: u64,
}

impl TimeSynchronization {
    pub const EXTENT: usize = 8;
}

impl DataType for TimeSynchronization {
    const MAX_SERIALIZED_SIZE: usize = 7;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        let mut w = Writer::new(buf);
        let v = self.previous_transmission_timestamp_us & 0x00FF_FFFF_FFFF_FFFF;
        let mut bytes = [0u8; 8];
        LittleEndian::write_u64(&mut bytes, v);
        w.put_bytes(&bytes[..7])?;
        Ok(w.finish())
    }

    fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let low = r.get_bytes(7)?;
        let mut bytes = [0u8; 8];
        bytes[..7].copy_from_slice(low);
        Ok(Self {
            previous_transmission_timestamp_us: LittleEndian::read_u64(&bytes),
        })
    }
}

pub const NODE_NAME_CAPACITY: usize = 50;

/// GetInfo request carries nothing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GetInfoRequest;

impl GetInfoRequest {
    pub const EXTENT: usize = 0;
}

impl DataType for GetInfoRequest {
    const MAX_SERIALIZED_SIZE: usize = 0;

    fn serialize(&self, _buf: &mut [u8]) -> Result<usize, WireError> {
        Ok(0)
    }

    fn deserialize(_buf: &[u8]) -> Result<Self, WireError> {
        Ok(Self)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetInfoResponse {
    pub protocol_version: Version,
    pub hardware_version: Version,
    pub software_version: Version,
    pub software_vcs_revision_id: u64,
    pub unique_id: [u8; 16],
    pub name: heapless::String<NODE_NAME_CAPACITY>,
}

impl GetInfoResponse {
    pub const EXTENT: usize = 448;
}

impl DataType for GetInfoResponse {
    const MAX_SERIALIZED_SIZE: usize = 6 + 8 + 16 + 1 + NODE_NAME_CAPACITY;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        let mut w = Writer::new(buf);
        for v in [
            self.protocol_version,
            self.hardware_version,
            self.software_version,
        ] {
            w.put_u8(v.major)?;
            w.put_u8(v.minor)?;
        }
        w.put_u64(self.software_vcs_revision_id)?;
        w.put_bytes(&self.unique_id)?;
        w.put_u8(self.name.len() as u8)?;
        w.put_bytes(self.name.as_bytes())?;
        Ok(w.finish())
    }

    fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let mut versions = [Version { major: 0, minor: 0 }; 3];
        for v in versions.iter_mut() {
            v.major = r.get_u8()?;
            v.minor = r.get_u8()?;
        }
        let software_vcs_revision_id = r.get_u64()?;
        let mut unique_id = [0u8; 16];
        unique_id.copy_from_slice(r.get_bytes(16)?);
        let len = r.get_u8()? as usize;
        if len > NODE_NAME_CAPACITY {
            return Err(WireError::Malformed);
        }
        let text = r.get_bytes(len)?;
        let name = core::str::from_utf8(text)
            .map_err(|_| WireError::Malformed)?
            .into();
        Ok(Self {
            protocol_version: versions[0],
            hardware_version: versions[1],
            software_version: versions[2],
            software_vcs_revision_id,
            unique_id,
            name,
        })
    }
}

pub const REGISTER_NAME_CAPACITY: usize = 50;
pub const REGISTER_VALUE_CAPACITY: usize = 128;

/// Register value: either empty (pure read) or unstructured bytes to write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegisterValue {
    Empty,
    Unstructured(heapless::Vec<u8, REGISTER_VALUE_CAPACITY>),
}

const VALUE_TAG_EMPTY: u8 = 0;
const VALUE_TAG_UNSTRUCTURED: u8 = 2;

impl RegisterValue {
    fn serialize(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        match self {
            RegisterValue::Empty => w.put_u8(VALUE_TAG_EMPTY),
            RegisterValue::Unstructured(bytes) => {
                w.put_u8(VALUE_TAG_UNSTRUCTURED)?;
                w.put_u8(bytes.len() as u8)?;
                w.put_bytes(bytes)
            }
        }
    }

    fn deserialize(r: &mut Reader<'_>) -> Result<Self, WireError> {
        match r.get_u8()? {
            VALUE_TAG_EMPTY => Ok(RegisterValue::Empty),
            VALUE_TAG_UNSTRUCTURED => {
                let len = r.get_u8()? as usize;
                if len > REGISTER_VALUE_CAPACITY {
                    return Err(WireError::Malformed);
                }
                let mut bytes = heapless::Vec::new();
                bytes
                    .extend_from_slice(r.get_bytes(len)?)
                    .map_err(|_| WireError::Malformed)?;
                Ok(RegisterValue::Unstructured(bytes))
            }
            _ => Err(WireError::Malformed),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterAccessRequest {
    pub name: heapless::String<REGISTER_NAME_CAPACITY>,
    pub value: RegisterValue,
}

impl RegisterAccessRequest {
    pub const EXTENT: usize = 256;
}

impl DataType for RegisterAccessRequest {
    const MAX_SERIALIZED_SIZE: usize =
        1 + REGISTER_NAME_CAPACITY + 2 + REGISTER_VALUE_CAPACITY;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        let mut w = Writer::new(buf);
        w.put_u8(self.name.len() as u8)?;
        w.put_bytes(self.name.as_bytes())?;
        self.value.serialize(&mut w)?;
        Ok(w.finish())
    }

    fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let len = r.get_u8()? as usize;
        if len > REGISTER_NAME_CAPACITY {
            return Err(WireError::Malformed);
        }
        let name = core::str::from_utf8(r.get_bytes(len)?)
            .map_err(|_| WireError::Malformed)?
            .into();
        Ok(Self {
            name,
            value: RegisterValue::deserialize(&mut r)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterAccessResponse {
    pub timestamp_us: u64,
    pub mutable: bool,
    pub persistent: bool,
    pub value: RegisterValue,
}

impl RegisterAccessResponse {
    pub const EXTENT: usize = 256;
}

impl DataType for RegisterAccessResponse {
    const MAX_SERIALIZED_SIZE: usize = 8 + 1 + 2 + REGISTER_VALUE_CAPACITY;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        let mut w = Writer::new(buf);
        w.put_u64(self.timestamp_us)?;
        let flags = self.mutable as u8 | (self.persistent as u8) << 1;
        w.put_u8(flags)?;
        self.value.serialize(&mut w)?;
        Ok(w.finish())
    }

    fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let timestamp_us = r.get_u64()?;
        let flags = r.get_u8()?;
        Ok(Self {
            timestamp_us,
            mutable: flags & 1 != 0,
            persistent: flags & 2 != 0,
            value: RegisterValue::deserialize(&mut r)?,
        })
    }
}

pub const DIAGNOSTIC_TEXT_CAPACITY: usize = 112;

/// One log record on the wire; severity values match the logger's scale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiagnosticRecord {
    pub timestamp_us: u64,
    pub severity: u8,
    pub text: heapless::String<DIAGNOSTIC_TEXT_CAPACITY>,
}

impl DiagnosticRecord {
    pub const EXTENT: usize = 300;
}

impl DataType for DiagnosticRecord {
    const MAX_SERIALIZED_SIZE: usize = 8 + 1 + 1 + DIAGNOSTIC_TEXT_CAPACITY;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        let mut w = Writer::new(buf);
        w.put_u64(self.timestamp_us)?;
        w.put_u8(self.severity)?;
        w.put_u8(self.text.len() as u8)?;
        w.put_bytes(self.text.as_bytes())?;
        Ok(w.finish())
    }

    fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let timestamp_us = r.get_u64()?;
        let severity = r.get_u8()?;
        let len = r.get_u8()? as usize;
        if len > DIAGNOSTIC_TEXT_CAPACITY {
            return Err(WireError::Malformed);
        }
        let text = core::str::from_utf8(r.get_bytes(len)?)
            .map_err(|_| WireError::Malformed)?
            .into();
        Ok(Self {
            timestamp_us,
            severity,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: DataType + PartialEq + core::fmt::Debug>(value: &T) {
        let mut buf = vec![0u8; T::MAX_SERIALIZED_SIZE];
        let n = value.serialize(&mut buf).expect("serialize");
        assert!(n <= T::MAX_SERIALIZED_SIZE);
        let back = T::deserialize(&buf[..n]).expect("deserialize");
        assert_eq!(&back, value);
    }

    #[test]
    fn heartbeat_identity_and_size() {
        let hb = Heartbeat::nominal(10);
        let mut buf = [0u8; Heartbeat::MAX_SERIALIZED_SIZE];
        assert_eq!(hb.serialize(&mut buf).unwrap(), 7);
        round_trip(&hb);
    }

    #[test]
    fn heartbeat_truncated_is_error() {
        assert_eq!(
            Heartbeat::deserialize(&[1, 2, 3]),
            Err(WireError::Truncated)
        );
    }

    #[test]
    fn port_list_identity() {
        let mut list = NodePortList::default();
        list.publishers.push(32085).unwrap();
        list.publishers.push(1102).unwrap();
        list.subscribers.push(1103).unwrap();
        list.clients.set(430);
        list.servers.set(384);
        round_trip(&list);
        assert!(list.clients.get(430));
        assert!(!list.clients.get(431));
    }

    #[test]
    fn port_list_rejects_oversized_count() {
        let mut buf = [0u8; 4];
        buf[0] = 200; // publisher count way past capacity
        assert_eq!(
            NodePortList::deserialize(&buf),
            Err(WireError::Malformed)
        );
    }

    #[test]
    fn time_sync_is_56_bit() {
        let t = TimeSynchronization {
            previous_transmission_timestamp_us: 0x00AB_CDEF_0123_4567,
        };
        let mut buf = [0u8; TimeSynchronization::MAX_SERIALIZED_SIZE];
        assert_eq!(t.serialize(&mut buf).unwrap(), 7);
        round_trip(&t);
    }

    #[test]
    fn get_info_identity() {
        let resp = GetInfoResponse {
            protocol_version: Version { major: 1, minor: 0 },
            hardware_version: Version { major: 1, minor: 0 },
            software_version: Version { major: 0, minor: 1 },
            software_vcs_revision_id: 0xc5ad_8c7d,
            unique_id: [7; 16],
            name: "org.csat.obc".into(),
        };
        round_trip(&resp);
    }

    #[test]
    fn register_access_identity() {
        let mut bytes = heapless::Vec::new();
        bytes.extend_from_slice(b"!TestData!").unwrap();
        round_trip(&RegisterAccessRequest {
            name: "blob1".into(),
            value: RegisterValue::Unstructured(bytes.clone()),
        });
        round_trip(&RegisterAccessResponse {
            timestamp_us: 1_234_567_890,
            mutable: true,
            persistent: true,
            value: RegisterValue::Unstructured(bytes),
        });
        round_trip(&RegisterAccessRequest {
            name: "blob1".into(),
            value: RegisterValue::Empty,
        });
    }

    #[test]
    fn register_value_bad_tag() {
        // name "x", then tag 9.
        let buf = [1, b'x', 9];
        assert_eq!(
            RegisterAccessRequest::deserialize(&buf),
            Err(WireError::Malformed)
        );
    }

    #[test]
    fn diagnostic_record_identity() {
        round_trip(&DiagnosticRecord {
            timestamp_us: 804_189_600_000_000,
            severity: 5,
            text: "ERROR pool exhausted".into(),
        });
    }
}
