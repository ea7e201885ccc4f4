// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process loopback transport.
//!
//! No wire, no frames: `tx_push` copies the payload into the pool and parks
//! a complete transfer in a bounded queue; the receive drain pops them back
//! out. Two things make this more than a toy:
//!
//! - it gives single-box builds an on-board "bus" so the task set runs
//!   unchanged without CAN hardware, and
//! - it preserves forward identity. A push stamps the transfer with the
//!   adapter's *current* node id, so a `tx_forward` from node X is received
//!   with `remote_node_id == X` -- which is exactly what makes this adapter
//!   usable as a stand-in for multi-node wire traffic in tests.

#![cfg_attr(not(test), no_std)]

use cyphal::{
    Microsecond, NodeId, Payload, PortId, Subscription, Transfer, TransferKind,
    TransferMetadata, Transport, TransportError, NODE_ID_UNSET,
};
use o1heap::Heap;

/// Pre-formed transfers parked between push and drain.
pub const QUEUE_CAPACITY: usize = 32;

/// Subscription slots; matches the wire adapters so capacity behavior is
/// uniform across the set.
pub const SUBSCRIPTION_CAPACITY: usize = 32;

pub struct LoopbackTransport {
    heap: &'static Heap,
    node_id: NodeId,
    queue: heapless::Deque<Transfer, QUEUE_CAPACITY>,
    subscriptions: heapless::Vec<Subscription, SUBSCRIPTION_CAPACITY>,
}

impl LoopbackTransport {
    pub fn new(heap: &'static Heap) -> Self {
        Self {
            heap,
            node_id: NODE_ID_UNSET,
            queue: heapless::Deque::new(),
            subscriptions: heapless::Vec::new(),
        }
    }

    /// Dequeues the next pre-formed transfer. The receive drain calls this
    /// until it returns `None`.
    pub fn rx_receive(&mut self) -> Option<Transfer> {
        self.queue.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Transport for LoopbackTransport {
    fn tx_push(
        &mut self,
        _deadline_us: Microsecond,
        metadata: &TransferMetadata,
        payload: &[u8],
    ) -> Result<usize, TransportError> {
        if self.queue.is_full() {
            return Ok(0);
        }
        let body = Payload::copy_from(self.heap, payload).ok_or(TransportError::Memory)?;
        let mut meta = *metadata;
        meta.remote_node_id = self.node_id;
        let _ = self.queue.push_back(Transfer::new(meta, body));
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

// Every adapter carries the full uniform capability set.
static_assertions::assert_impl_all!(LoopbackTransport: Transport);

#[cfg(test)]
mod tests {
    use super::*;

    fn test_heap() -> &'static Heap {
        let pool = Box::leak(vec![0u8; 16384].into_boxed_slice());
        Heap::init(pool).unwrap()
    }

    #[test]
    fn push_then_receive() {
        let heap = test_heap();
        let mut lo = LoopbackTransport::new(heap);
        lo.set_node_id(11);

        let meta = TransferMetadata::message(123, 0);
        assert_eq!(lo.tx_push(0, &meta, b"hello"), Ok(1));
        let t = lo.rx_receive().expect("queued transfer");
        assert_eq!(&*t.payload, b"hello");
        assert_eq!(t.metadata.port_id, 123);
        assert_eq!(t.metadata.remote_node_id, 11);
        assert!(lo.rx_receive().is_none());
    }

    #[test]
    fn forward_preserves_identity_push_does_not() {
        let heap = test_heap();
        let mut lo = LoopbackTransport::new(heap);
        lo.set_node_id(11);

        let meta = TransferMetadata::message(123, 0);
        assert_eq!(lo.tx_forward(0, &meta, b"hello", 22), Ok(1));
        let t = lo.rx_receive().unwrap();
        assert_eq!(t.metadata.remote_node_id, 22);
        // The spoof was scoped to the forward.
        assert_eq!(lo.node_id(), 11);

        assert_eq!(lo.tx_push(0, &meta, b"again"), Ok(1));
        let t = lo.rx_receive().unwrap();
        assert_eq!(t.metadata.remote_node_id, 11);
    }

    #[test]
    fn full_queue_drops_with_zero() {
        let heap = test_heap();
        let mut lo = LoopbackTransport::new(heap);
        let meta = TransferMetadata::message(5, 0);
        for _ in 0..QUEUE_CAPACITY {
            assert_eq!(lo.tx_push(0, &meta, b"x"), Ok(1));
        }
        assert_eq!(lo.tx_push(0, &meta, b"x"), Ok(0));
        // Draining one restores room.
        drop(lo.rx_receive().unwrap());
        assert_eq!(lo.tx_push(0, &meta, b"x"), Ok(1));
    }

    #[test]
    fn subscription_idempotence_and_capacity() {
        let heap = test_heap();
        let mut lo = LoopbackTransport::new(heap);
        assert_eq!(lo.rx_subscribe(TransferKind::Message, 7, 64, 0), Ok(true));
        assert_eq!(lo.rx_subscribe(TransferKind::Message, 7, 64, 0), Ok(false));
        assert_eq!(lo.subscription_count(), 1);
        assert!(lo.rx_unsubscribe(TransferKind::Message, 7));
        assert!(!lo.rx_unsubscribe(TransferKind::Message, 7));

        for port in 0..SUBSCRIPTION_CAPACITY as PortId {
            assert_eq!(
                lo.rx_subscribe(TransferKind::Message, 100 + port, 64, 0),
                Ok(true)
            );
        }
        assert_eq!(
            lo.rx_subscribe(TransferKind::Message, 9000, 64, 0),
            Err(TransportError::Capacity)
        );
    }

    #[test]
    fn dropped_transfers_return_their_payloads() {
        let heap = test_heap();
        let before = heap.diagnostics().allocated;
        let mut lo = LoopbackTransport::new(heap);
        let meta = TransferMetadata::message(5, 0);
        lo.tx_push(0, &meta, b"payload bytes").unwrap();
        lo.tx_push(0, &meta, b"more payload").unwrap();
        drop(lo.rx_receive().unwrap());
        drop(lo);
        assert_eq!(heap.diagnostics().allocated, before);
    }
}
