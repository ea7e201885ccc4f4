// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Named blob store over a fixed-layout flash region.
//!
//! Persistent configuration lives in a handful of fixed-size slots at
//! compile-time offsets; the map from name to `{offset, size}` is a static
//! table and lookup is a linear scan, which for a table this size beats any
//! cleverness. Writes shorter than the slot pad the remainder with `0xFF`
//! -- the erased state -- so a partial write reads back unambiguously.
//!
//! The backend is anything exposing bounded `read`/`write`/`capacity`; the
//! flight build points it at the external flash driver, tests use the
//! RAM-emulated variant here. Writes are not atomic across power loss; the
//! stored data is advisory configuration, not filesystem state.

#![cfg_attr(not(test), no_std)]

/// Erased-flash fill byte; short writes pad with it.
pub const ERASED: u8 = 0xFF;

/// Backend storage interface.
pub trait BlobAccess {
    fn read(&self, offset: usize, buf: &mut [u8]) -> bool;
    fn write(&mut self, offset: usize, data: &[u8]) -> bool;
    fn capacity(&self) -> usize;
}

/// RAM-emulated flash, erased at construction.
pub struct RamFlash<const N: usize> {
    mem: [u8; N],
}

impl<const N: usize> Default for RamFlash<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RamFlash<N> {
    pub fn new() -> Self {
        Self { mem: [ERASED; N] }
    }
}

impl<const N: usize> BlobAccess for RamFlash<N> {
    fn read(&self, offset: usize, buf: &mut [u8]) -> bool {
        match self.mem.get(offset..offset + buf.len()) {
            Some(src) => {
                buf.copy_from_slice(src);
                true
            }
            None => false,
        }
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> bool {
        match self.mem.get_mut(offset..offset + data.len()) {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    fn capacity(&self) -> usize {
        N
    }
}

/// One slot in the fixed layout.
#[derive(Copy, Clone, Debug)]
pub struct BlobEntry {
    pub name: &'static str,
    pub offset: usize,
    pub size: usize,
}

/// Name-addressed view over a backend and its layout table.
pub struct BlobStore<A: BlobAccess> {
    access: A,
    map: &'static [BlobEntry],
}

impl<A: BlobAccess> BlobStore<A> {
    pub fn new(access: A, map: &'static [BlobEntry]) -> Self {
        Self { access, map }
    }

    pub fn entry(&self, name: &str) -> Option<&'static BlobEntry> {
        self.map.iter().find(|e| e.name == name)
    }

    /// Reads the full slot into the front of `buf`, returning the slot
    /// size. Fails on unknown names, short buffers, or backend errors.
    pub fn read_by_name(&self, name: &str, buf: &mut [u8]) -> Option<usize> {
        let entry = self.entry(name)?;
        if buf.len() < entry.size {
            return None;
        }
        self.access
            .read(entry.offset, &mut buf[..entry.size])
            .then_some(entry.size)
    }

    /// Writes `data` at the head of the named slot and pads the rest with
    /// the erased byte. Data longer than the slot is refused outright.
    pub fn write_by_name(&mut self, name: &str, data: &[u8]) -> bool {
        let entry = match self.entry(name) {
            Some(e) => e,
            None => return false,
        };
        if data.len() > entry.size {
            return false;
        }
        if !self.access.write(entry.offset, data) {
            return false;
        }
        let pad = [ERASED; 64];
        let mut at = entry.offset + data.len();
        let end = entry.offset + entry.size;
        while at < end {
            let n = (end - at).min(pad.len());
            if !self.access.write(at, &pad[..n]) {
                return false;
            }
            at += n;
        }
        true
    }
}
