// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fan-out over a heterogeneous set of adapters.
//!
//! The adapter population of a node is known at build time, so the set is a
//! plain tuple of distinct transport types and every fan-out resolves
//! statically. Publishing tasks carry a `TransportSet` bound and never name
//! a concrete adapter.
//!
//! The boolean results fold with AND: a fan-out "succeeded" only if every
//! adapter produced at least one frame. Partial success is still on the
//! wire -- the caller logs and carries on, it cannot un-send.

use crate::{Microsecond, NodeId, PortId, TransferKind, TransferMetadata, Transport};

pub trait TransportSet {
    /// Number of adapters in the set.
    const LEN: usize;

    /// `tx_push` on every adapter; true iff all produced frames.
    fn push_all(
        &mut self,
        deadline_us: Microsecond,
        metadata: &TransferMetadata,
        payload: &[u8],
    ) -> bool;

    /// `tx_forward` on every adapter; true iff all produced frames.
    fn forward_all(
        &mut self,
        deadline_us: Microsecond,
        metadata: &TransferMetadata,
        payload: &[u8],
        spoofed_node_id: NodeId,
    ) -> bool {
        self.forward_except(usize::MAX, deadline_us, metadata, payload, spoofed_node_id)
    }

    /// `tx_forward` on every adapter except the one at `skip` -- the bridge
    /// uses this to avoid re-transmitting onto the segment a transfer
    /// arrived from.
    fn forward_except(
        &mut self,
        skip: usize,
        deadline_us: Microsecond,
        metadata: &TransferMetadata,
        payload: &[u8],
        spoofed_node_id: NodeId,
    ) -> bool;

    /// `rx_subscribe` on every adapter; true iff none failed.
    fn subscribe_all(
        &mut self,
        kind: TransferKind,
        port_id: PortId,
        extent: usize,
        transfer_id_timeout_us: Microsecond,
    ) -> bool;

    /// `rx_unsubscribe` on every adapter.
    fn unsubscribe_all(&mut self, kind: TransferKind, port_id: PortId);
}

macro_rules! impl_transport_set {
    ($n:expr, $($name:ident : $idx:tt),*) => {
        impl<$($name: Transport),*> TransportSet for ($($name,)*) {
            const LEN: usize = $n;

            fn push_all(
                &mut self,
                deadline_us: Microsecond,
                metadata: &TransferMetadata,
                payload: &[u8],
            ) -> bool {
                let mut ok = true;
                $(ok &= matches!(
                    self.$idx.tx_push(deadline_us, metadata, payload),
                    Ok(n) if n > 0
                );)*
                ok
            }

            fn forward_except(
                &mut self,
                skip: usize,
                deadline_us: Microsecond,
                metadata: &TransferMetadata,
                payload: &[u8],
                spoofed_node_id: NodeId,
            ) -> bool {
                let mut ok = true;
                $(if $idx != skip {
                    ok &= matches!(
                        self.$idx.tx_forward(deadline_us, metadata, payload, spoofed_node_id),
                        Ok(n) if n > 0
                    );
                })*
                ok
            }

            fn subscribe_all(
                &mut self,
                kind: TransferKind,
                port_id: PortId,
                extent: usize,
                transfer_id_timeout_us: Microsecond,
            ) -> bool {
                let mut ok = true;
                $(ok &= self
                    .$idx
                    .rx_subscribe(kind, port_id, extent, transfer_id_timeout_us)
                    .is_ok();)*
                ok
            }

            fn unsubscribe_all(&mut self, kind: TransferKind, port_id: PortId) {
                $(self.$idx.rx_unsubscribe(kind, port_id);)*
            }
        }
    };
}

impl TransportSet for () {
    const LEN: usize = 0;

    fn push_all(&mut self, _: Microsecond, _: &TransferMetadata, _: &[u8]) -> bool {
        true
    }

    fn forward_except(
        &mut self,
        _: usize,
        _: Microsecond,
        _: &TransferMetadata,
        _: &[u8],
        _: NodeId,
    ) -> bool {
        true
    }

    fn subscribe_all(&mut self, _: TransferKind, _: PortId, _: usize, _: Microsecond) -> bool {
        true
    }

    fn unsubscribe_all(&mut self, _: TransferKind, _: PortId) {}
}

impl_transport_set!(1, A: 0);
impl_transport_set!(2, A: 0, B: 1);
impl_transport_set!(3, A: 0, B: 1, C: 2);
impl_transport_set!(4, A: 0, B: 1, C: 2, D: 3);
