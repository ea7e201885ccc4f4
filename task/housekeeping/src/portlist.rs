// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Port-list advertisement, both directions.
//!
//! The sender publishes this node's four port sets. Because the
//! registration manager owns every task, a task cannot borrow the manager
//! back to read those sets; instead the main loop posts a snapshot onto a
//! [`PortListBoard`] before each service pass and the sender publishes
//! whatever is posted. The snapshot is taken at publication time in the
//! loop, which is exactly the "sets as of the moment of publication"
//! contract.
//!
//! The subscriber feeds peers' advertisements into the
//! `SubscriptionManager`, wiring adapter subscriptions for every
//! advertised publication this node knows how to decode. Ports that
//! disappear from later advertisements are left subscribed; nothing here
//! unsubscribes.

use core::cell::RefCell;
use cyphal::{ports, Transfer, TransportSet};
use dsdl::standard::NodePortList;
use dsdl::DataType;
use o1heap::Shared;
use ringlog::{log, Severity};
use sched::{Context, Inbox, Publication, Registrar, SubscriptionManager, Task, Timing};

/// Where the main loop posts the current registration snapshot for the
/// advertisement task to publish.
pub struct PortListBoard {
    list: RefCell<NodePortList>,
}

impl Default for PortListBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl PortListBoard {
    pub fn new() -> Self {
        Self {
            list: RefCell::new(NodePortList::default()),
        }
    }

    pub fn post(&self, list: NodePortList) {
        *self.list.borrow_mut() = list;
    }

    pub fn snapshot(&self) -> NodePortList {
        self.list.borrow().clone()
    }
}

/// Publishes this node's advertised ports.
pub struct SendPortListTask {
    timing: Timing,
    publication: Publication,
    board: &'static PortListBoard,
}

impl SendPortListTask {
    pub fn new(
        board: &'static PortListBoard,
        interval_ms: u32,
        shift_ms: u32,
        transfer_id: u8,
    ) -> Self {
        Self {
            timing: Timing::new(interval_ms, shift_ms),
            publication: Publication::new(transfer_id),
            board,
        }
    }
}

impl<A: TransportSet> Task<A> for SendPortListTask {
    fn timing(&mut self) -> &mut Timing {
        &mut self.timing
    }

    fn service(&mut self, cx: &mut Context<'_, A>) {
        let list = self.board.snapshot();
        log!(
            Severity::Debug,
            "port list: {} pubs, {} subs",
            list.publishers.len(),
            list.subscribers.len()
        );
        self.publication
            .publish(cx.adapters, ports::NODE_PORT_LIST, &list);
    }

    fn handle_message(&mut self, _transfer: Shared<Transfer>) {}

    fn register(&mut self, registrar: &mut Registrar<'_>) {
        registrar.publish(ports::NODE_PORT_LIST);
    }

    fn unregister(&mut self, registrar: &mut Registrar<'_>) {
        registrar.unpublish(ports::NODE_PORT_LIST);
    }
}

pub const PORT_LIST_INBOX: usize = 8;

/// Follows peers' advertisements.
pub struct SubscribePortListTask {
    timing: Timing,
    inbox: Inbox<PORT_LIST_INBOX>,
    subscriptions: SubscriptionManager,
}

impl SubscribePortListTask {
    pub fn new(interval_ms: u32, shift_ms: u32) -> Self {
        Self {
            timing: Timing::new(interval_ms, shift_ms),
            inbox: Inbox::new(),
            subscriptions: SubscriptionManager::new(),
        }
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }
}

impl<A: TransportSet> Task<A> for SubscribePortListTask {
    fn timing(&mut self) -> &mut Timing {
        &mut self.timing
    }

    fn service(&mut self, cx: &mut Context<'_, A>) {
        while let Some(transfer) = self.inbox.pop() {
            match NodePortList::deserialize(&transfer.payload) {
                Ok(list) => {
                    log!(
                        Severity::Debug,
                        "peer {} advertises {} publications",
                        transfer.metadata.remote_node_id,
                        list.publishers.len()
                    );
                    self.subscriptions.ingest(&list, cx.adapters);
                }
                Err(e) => {
                    log!(Severity::Error, "port list: malformed payload ({e:?})");
                }
            }
        }
    }

    fn handle_message(&mut self, transfer: Shared<Transfer>) {
        self.inbox.push(transfer);
    }

    fn register(&mut self, registrar: &mut Registrar<'_>) {
        registrar.subscribe(ports::NODE_PORT_LIST);
    }

    fn unregister(&mut self, registrar: &mut Registrar<'_>) {
        registrar.unsubscribe(ports::NODE_PORT_LIST);
        self.inbox.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyphal::{Payload, PortId, TransferKind, TransferMetadata, Transport};
    use drv_cyphal_loopback::LoopbackTransport;
    use o1heap::Heap;

    fn test_heap() -> &'static Heap {
        let pool = Box::leak(vec![0u8; 65536].into_boxed_slice());
        Heap::init(pool).unwrap()
    }

    #[test]
    fn publishes_posted_snapshot() {
        let heap = test_heap();
        let board: &'static PortListBoard = Box::leak(Box::new(PortListBoard::new()));
        let mut adapters = (LoopbackTransport::new(heap),);
        adapters.0.set_node_id(11);

        let mut posted = NodePortList::default();
        posted.publishers.push(1102).unwrap();
        posted.subscribers.push(1103).unwrap();
        posted.clients.set(430);
        posted.servers.set(384);
        board.post(posted.clone());

        let mut task = SendPortListTask::new(board, 5000, 0, 0);
        Task::<(LoopbackTransport,)>::service(
            &mut task,
            &mut Context {
                now_ms: 0,
                adapters: &mut adapters,
            },
        );

        let t = adapters.0.rx_receive().expect("advertisement");
        assert_eq!(t.metadata.port_id, ports::NODE_PORT_LIST);
        assert_eq!(t.metadata.kind, TransferKind::Message);
        let got = NodePortList::deserialize(&t.payload).unwrap();
        assert_eq!(got, posted);
    }

    #[test]
    fn subscriber_wires_advertised_ports() {
        let heap = test_heap();
        let mut adapters = (LoopbackTransport::new(heap),);
        adapters.0.set_node_id(11);
        let mut task = SubscribePortListTask::new(1000, 0);

        let mut list = NodePortList::default();
        list.publishers.push(ports::POSITION_VELOCITY).unwrap();
        list.publishers.push(9999 as PortId).unwrap(); // unknown type
        let mut buf = [0u8; NodePortList::MAX_SERIALIZED_SIZE];
        let n = list.serialize(&mut buf).unwrap();
        let transfer = Shared::new_in(
            heap,
            Transfer::new(
                TransferMetadata::message(ports::NODE_PORT_LIST, 0),
                Payload::copy_from(heap, &buf[..n]).unwrap(),
            ),
        )
        .unwrap();

        Task::<(LoopbackTransport,)>::handle_message(&mut task, transfer);
        Task::<(LoopbackTransport,)>::service(
            &mut task,
            &mut Context {
                now_ms: 0,
                adapters: &mut adapters,
            },
        );

        // The known advertised publication got an adapter subscription.
        assert_eq!(task.subscriptions().subscriptions().len(), 1);
        assert_eq!(adapters.0.subscription_count(), 1);
    }
}
