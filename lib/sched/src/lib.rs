// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cooperative task scheduler and registration bookkeeping.
//!
//! The runtime is a flat set of tasks ticked from one loop. Each task gates
//! itself on an interval with an optional phase shift, so equal-rate tasks
//! spread across the timeline instead of stampeding the same tick. There is
//! no preemption and no yielding: a task that needs multiple phases runs a
//! state machine across multiple ticks.
//!
//! [`RegistrationManager`] is the authority on who talks on which port. A
//! task declares its ports through the [`Registrar`] when it is added; the
//! manager keeps the handler list (delivery fan-out, in registration order)
//! and the four port sets -- subscriptions, publications, clients, servers --
//! that the port-list advertisement publishes. Ports are reference counted
//! implicitly: a port leaves its set when the last handler naming it goes.
//!
//! Role mixins keep task implementations small: [`Publication`] owns the
//! transfer-id counter and the serialize-and-fan-out helper, [`Inbox`] is
//! the bounded mailbox subscribers drain at their own pace (overflow drops
//! the newest, quietly), and [`respond`] answers a request with the
//! caller's correlation intact.
//!
//! [`SubscriptionManager`] handles the other direction: when a peer
//! advertises its port list, it wires adapter subscriptions for the
//! advertised publications so this node can follow any peer's stream with
//! no static wiring. Nothing unsubscribes when a peer goes quiet; that is
//! a known limitation of the protocol as deployed.

#![cfg_attr(not(test), no_std)]

use cyphal::{
    is_valid_port, NodeId, PortId, Subscription, Transfer, TransferId, TransferKind,
    TransferMetadata, TransportSet,
};
use dsdl::standard::NodePortList;
use dsdl::DataType;
use o1heap::Shared;
use ringlog::{log, Severity};

pub const NUM_TASKS: usize = 32;
pub const NUM_HANDLERS: usize = 64;
pub const NUM_PORTS: usize = 16;

/// Scratch size for serialized publications; comfortably above the largest
/// data type this node emits.
pub const PUBLISH_BUFFER_CAPACITY: usize = 512;

/// Stable task identity; survives other tasks' removal.
pub type TaskId = u16;

/// Everything a task body needs from the outside world on one tick.
pub struct Context<'a, A> {
    /// Milliseconds since boot.
    pub now_ms: u32,
    pub adapters: &'a mut A,
}

/// Interval/phase gate for one task.
#[derive(Copy, Clone, Debug)]
pub struct Timing {
    interval_ms: u32,
    last_tick_ms: u32,
    shift_ms: u32,
}

impl Timing {
    pub fn new(interval_ms: u32, shift_ms: u32) -> Self {
        Self {
            interval_ms,
            last_tick_ms: 0,
            shift_ms,
        }
    }

    /// Applies the phase shift relative to `now`; called once when the task
    /// set starts.
    pub fn initialize(&mut self, now_ms: u32) {
        self.last_tick_ms = now_ms.wrapping_add(self.shift_ms);
    }

    pub fn due(&self, now_ms: u32) -> bool {
        now_ms >= self.last_tick_ms.wrapping_add(self.interval_ms)
    }

    pub fn mark_ran(&mut self, now_ms: u32) {
        self.last_tick_ms = now_ms;
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    pub fn shift_ms(&self) -> u32 {
        self.shift_ms
    }

    pub fn last_tick_ms(&self) -> u32 {
        self.last_tick_ms
    }
}

/// One cooperative task. `A` is the node's adapter tuple.
///
/// Implementations provide the periodic body (`service`), message intake,
/// and their port declarations; the tick gate itself is provided here and
/// not overridden.
pub trait Task<A: TransportSet> {
    fn timing(&mut self) -> &mut Timing;

    /// Periodic body, called only when the interval has elapsed.
    fn service(&mut self, cx: &mut Context<'_, A>);

    /// Inbound transfer delivery. Subscriber tasks queue into their inbox;
    /// pure periodic tasks ignore it.
    fn handle_message(&mut self, transfer: Shared<Transfer>);

    /// Declares this task's ports and roles to the manager.
    fn register(&mut self, registrar: &mut Registrar<'_>);

    /// Reverses `register`. Tasks owning an inbox also clear it here, which
    /// is what frees messages queued for a task that is going away.
    fn unregister(&mut self, registrar: &mut Registrar<'_>);

    /// Interval-gated entry point the scheduler calls every tick.
    fn handle_task(&mut self, cx: &mut Context<'_, A>) {
        if self.timing().due(cx.now_ms) {
            self.service(cx);
            let now = cx.now_ms;
            self.timing().mark_ran(now);
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct TaskHandler {
    port_id: PortId,
    task: TaskId,
}

/// Removes index `i` keeping the order of the rest; delivery and service
/// order are registration order, so holes may not be filled from the back.
fn remove_ordered<T, const N: usize>(v: &mut heapless::Vec<T, N>, i: usize) -> T {
    v[i..].rotate_left(1);
    v.pop().unwrap()
}

struct TaskSlot<A: 'static> {
    id: TaskId,
    task: &'static mut dyn Task<A>,
}

/// Port-role bookkeeping handed to a task during (un)registration.
pub struct Registrar<'a> {
    task_id: TaskId,
    handlers: &'a mut heapless::Vec<TaskHandler, NUM_HANDLERS>,
    subscriptions: &'a mut heapless::Vec<PortId, NUM_PORTS>,
    publications: &'a mut heapless::Vec<PortId, NUM_PORTS>,
    clients: &'a mut heapless::Vec<PortId, NUM_PORTS>,
    servers: &'a mut heapless::Vec<PortId, NUM_PORTS>,
}

impl Registrar<'_> {
    fn add_handler(&mut self, port_id: PortId) {
        let h = TaskHandler {
            port_id,
            task: self.task_id,
        };
        if self.handlers.iter().any(|e| *e == h) {
            return;
        }
        if self.handlers.push(h).is_err() {
            log!(Severity::Error, "registrar: handler table full, port {port_id}");
        }
    }

    fn drop_handler(
        handlers: &mut heapless::Vec<TaskHandler, NUM_HANDLERS>,
        set: &mut heapless::Vec<PortId, NUM_PORTS>,
        task_id: TaskId,
        port_id: PortId,
    ) {
        while let Some(i) = handlers
            .iter()
            .position(|h| h.port_id == port_id && h.task == task_id)
        {
            remove_ordered(handlers, i);
        }
        if !handlers.iter().any(|h| h.port_id == port_id) {
            while let Some(i) = set.iter().position(|p| *p == port_id) {
                remove_ordered(set, i);
            }
        }
    }

    fn add_port(set: &mut heapless::Vec<PortId, NUM_PORTS>, port_id: PortId) {
        if !is_valid_port(port_id) || set.contains(&port_id) {
            return;
        }
        if set.push(port_id).is_err() {
            log!(Severity::Error, "registrar: port set full, port {port_id}");
        }
    }

    pub fn subscribe(&mut self, port_id: PortId) {
        self.add_handler(port_id);
        Self::add_port(self.subscriptions, port_id);
    }

    pub fn unsubscribe(&mut self, port_id: PortId) {
        Self::drop_handler(self.handlers, self.subscriptions, self.task_id, port_id);
    }

    pub fn publish(&mut self, port_id: PortId) {
        self.add_handler(port_id);
        Self::add_port(self.publications, port_id);
    }

    pub fn unpublish(&mut self, port_id: PortId) {
        Self::drop_handler(self.handlers, self.publications, self.task_id, port_id);
    }

    pub fn client(&mut self, port_id: PortId) {
        self.add_handler(port_id);
        Self::add_port(self.clients, port_id);
    }

    pub fn unclient(&mut self, port_id: PortId) {
        Self::drop_handler(self.handlers, self.clients, self.task_id, port_id);
    }

    pub fn server(&mut self, port_id: PortId) {
        self.add_handler(port_id);
        Self::add_port(self.servers, port_id);
    }

    pub fn unserver(&mut self, port_id: PortId) {
        Self::drop_handler(self.handlers, self.servers, self.task_id, port_id);
    }
}

/// Task table, handler list, and the four advertised port sets. Also the
/// dispatch engine: message fan-out and the per-tick service pass, both in
/// registration order.
pub struct RegistrationManager<A: 'static> {
    tasks: heapless::Vec<TaskSlot<A>, NUM_TASKS>,
    next_id: TaskId,
    handlers: heapless::Vec<TaskHandler, NUM_HANDLERS>,
    subscriptions: heapless::Vec<PortId, NUM_PORTS>,
    publications: heapless::Vec<PortId, NUM_PORTS>,
    clients: heapless::Vec<PortId, NUM_PORTS>,
    servers: heapless::Vec<PortId, NUM_PORTS>,
}

impl<A: TransportSet + 'static> Default for RegistrationManager<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: TransportSet + 'static> RegistrationManager<A> {
    pub fn new() -> Self {
        Self {
            tasks: heapless::Vec::new(),
            next_id: 0,
            handlers: heapless::Vec::new(),
            subscriptions: heapless::Vec::new(),
            publications: heapless::Vec::new(),
            clients: heapless::Vec::new(),
            servers: heapless::Vec::new(),
        }
    }

    /// Installs a task for the life of the program and runs its port
    /// declarations. Tasks live in the pool and arrive here leaked; the
    /// manager never destroys them.
    pub fn add(&mut self, task: &'static mut dyn Task<A>) -> Option<TaskId> {
        if self.tasks.is_full() {
            log!(Severity::Error, "registration: task table full");
            return None;
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        task.register(&mut Registrar {
            task_id: id,
            handlers: &mut self.handlers,
            subscriptions: &mut self.subscriptions,
            publications: &mut self.publications,
            clients: &mut self.clients,
            servers: &mut self.servers,
        });
        let _ = self.tasks.push(TaskSlot { id, task });
        Some(id)
    }

    /// Removes a task: future deliveries stop, its ports are dropped where
    /// unreferenced, and the task reference is handed back. Messages
    /// already queued in its inbox were cleared by `unregister`.
    pub fn remove(&mut self, id: TaskId) -> Option<&'static mut dyn Task<A>> {
        let pos = self.tasks.iter().position(|s| s.id == id)?;
        let slot = remove_ordered(&mut self.tasks, pos);
        let task = slot.task;
        task.unregister(&mut Registrar {
            task_id: id,
            handlers: &mut self.handlers,
            subscriptions: &mut self.subscriptions,
            publications: &mut self.publications,
            clients: &mut self.clients,
            servers: &mut self.servers,
        });
        Some(task)
    }

    pub fn contains_task(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|s| s.id == id)
    }

    /// Applies every task's phase shift; call once before the first tick.
    pub fn initialize_services(&mut self, now_ms: u32) {
        for slot in self.tasks.iter_mut() {
            slot.task.timing().initialize(now_ms);
        }
    }

    /// Delivers one inbound transfer to every handler whose port matches,
    /// in registration order. Fan-out clones share the payload.
    pub fn handle_message(&mut self, transfer: &Shared<Transfer>) {
        let port_id = transfer.metadata.port_id;
        for i in 0..self.handlers.len() {
            let handler = self.handlers[i];
            if handler.port_id != port_id {
                continue;
            }
            if let Some(slot) = self.tasks.iter_mut().find(|s| s.id == handler.task) {
                slot.task.handle_message(transfer.clone());
            }
        }
    }

    /// One scheduler pass: every task gets its interval-gated chance, in
    /// registration order.
    pub fn handle_services(&mut self, cx: &mut Context<'_, A>) {
        for slot in self.tasks.iter_mut() {
            slot.task.handle_task(cx);
        }
    }

    pub fn subscriptions(&self) -> &[PortId] {
        &self.subscriptions
    }

    pub fn publications(&self) -> &[PortId] {
        &self.publications
    }

    pub fn clients(&self) -> &[PortId] {
        &self.clients
    }

    pub fn servers(&self) -> &[PortId] {
        &self.servers
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// The advertisement payload: exactly the four port sets as they stand.
    pub fn port_list(&self) -> NodePortList {
        let mut list = NodePortList::default();
        for &p in self.publications.iter() {
            let _ = list.publishers.push(p);
        }
        for &p in self.subscriptions.iter() {
            let _ = list.subscribers.push(p);
        }
        for &p in self.clients.iter() {
            list.clients.set(p);
        }
        for &p in self.servers.iter() {
            list.servers.set(p);
        }
        list
    }
}

/// Publisher role: the rolling transfer-id and the serialize-then-fan-out
/// helper. The id advances once per publication, success or not, matching
/// the wire expectation that ids count transmission attempts.
pub struct Publication {
    transfer_id: TransferId,
}

impl Publication {
    pub fn new(transfer_id: TransferId) -> Self {
        Self { transfer_id }
    }

    pub fn transfer_id(&self) -> TransferId {
        self.transfer_id
    }

    /// Serializes `value` and pushes it on every adapter. Returns whether
    /// all adapters accepted the transfer.
    pub fn publish<A: TransportSet, T: DataType>(
        &mut self,
        adapters: &mut A,
        port_id: PortId,
        value: &T,
    ) -> bool {
        let mut buf = [0u8; PUBLISH_BUFFER_CAPACITY];
        let n = match value.serialize(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                log!(Severity::Error, "publish: serialization {e:?} port {port_id}");
                return false;
            }
        };
        let metadata = TransferMetadata::message(port_id, self.transfer_id);
        self.transfer_id = self.transfer_id.wrapping_add(1);
        let ok = adapters.push_all(0, &metadata, &buf[..n]);
        if !ok {
            log!(Severity::Error, "publish: push failed, port {port_id}");
        }
        ok
    }

    /// Issues a request to `server`. Same counter, request kind.
    pub fn request<A: TransportSet, T: DataType>(
        &mut self,
        adapters: &mut A,
        port_id: PortId,
        server: NodeId,
        value: &T,
    ) -> bool {
        let mut buf = [0u8; PUBLISH_BUFFER_CAPACITY];
        let n = match value.serialize(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                log!(Severity::Error, "request: serialization {e:?} port {port_id}");
                return false;
            }
        };
        let metadata =
            TransferMetadata::service(TransferKind::Request, port_id, server, self.transfer_id);
        self.transfer_id = self.transfer_id.wrapping_add(1);
        let ok = adapters.push_all(0, &metadata, &buf[..n]);
        if !ok {
            log!(Severity::Error, "request: push failed, port {port_id}");
        }
        ok
    }
}

/// Answers a request: the response reuses the caller's node id and
/// transfer-id so the client can correlate it.
pub fn respond<A: TransportSet, T: DataType>(
    adapters: &mut A,
    port_id: PortId,
    client: NodeId,
    transfer_id: TransferId,
    value: &T,
) -> bool {
    let mut buf = [0u8; PUBLISH_BUFFER_CAPACITY];
    let n = match value.serialize(&mut buf) {
        Ok(n) => n,
        Err(e) => {
            log!(Severity::Error, "respond: serialization {e:?} port {port_id}");
            return false;
        }
    };
    let metadata =
        TransferMetadata::service(TransferKind::Response, port_id, client, transfer_id);
    let ok = adapters.push_all(0, &metadata, &buf[..n]);
    if !ok {
        log!(Severity::Error, "respond: push failed, port {port_id}");
    }
    ok
}

/// Bounded FIFO of shared transfers. Full means the newest message is
/// dropped: the system prefers predictable memory over backpressure into
/// the transport.
pub struct Inbox<const N: usize> {
    queue: heapless::Deque<Shared<Transfer>, N>,
}

impl<const N: usize> Default for Inbox<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Inbox<N> {
    pub fn new() -> Self {
        Self {
            queue: heapless::Deque::new(),
        }
    }

    pub fn push(&mut self, transfer: Shared<Transfer>) {
        if self.queue.is_full() {
            log!(
                Severity::Debug,
                "inbox full, dropping port {}",
                transfer.metadata.port_id
            );
            return;
        }
        let _ = self.queue.push_back(transfer);
    }

    pub fn pop(&mut self) -> Option<Shared<Transfer>> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Frees everything still queued; unregistering tasks call this.
    pub fn clear(&mut self) {
        while self.queue.pop_front().is_some() {}
    }
}

/// Dynamic subscription side of the port-list protocol: resolves advertised
/// ports against the locally known data types and wires the adapters.
pub struct SubscriptionManager {
    subscriptions: heapless::Vec<&'static Subscription, NUM_PORTS>,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: heapless::Vec::new(),
        }
    }

    pub fn subscriptions(&self) -> &[&'static Subscription] {
        &self.subscriptions
    }

    fn wire<A: TransportSet>(&mut self, sub: &'static Subscription, adapters: &mut A) {
        if self.subscriptions.iter().any(|s| core::ptr::eq(*s, sub)) {
            return;
        }
        if self.subscriptions.push(sub).is_err() {
            log!(
                Severity::Error,
                "subscription table full, port {}",
                sub.port_id
            );
            return;
        }
        if !adapters.subscribe_all(
            sub.kind,
            sub.port_id,
            sub.extent,
            cyphal::DEFAULT_TRANSFER_ID_TIMEOUT_US,
        ) {
            log!(Severity::Error, "adapter subscribe failed, port {}", sub.port_id);
        }
    }

    /// Subscribes to a message port if this node knows its type.
    pub fn subscribe_message<A: TransportSet>(&mut self, port_id: PortId, adapters: &mut A) {
        if let Some(sub) = dsdl::find_message(port_id) {
            self.wire(sub, adapters);
        }
    }

    /// Ingests a peer's advertisement: follow every advertised publication,
    /// and mirror the service sides the peer exercises (its client ports
    /// mean requests will be in the air; its server ports mean responses
    /// will be).
    pub fn ingest<A: TransportSet>(&mut self, list: &NodePortList, adapters: &mut A) {
        for &port in list.publishers.iter() {
            self.subscribe_message(port, adapters);
        }
        for sub in dsdl::REQUESTS {
            if list.clients.get(sub.port_id) {
                self.wire(sub, adapters);
            }
        }
        for sub in dsdl::RESPONSES {
            if list.servers.get(sub.port_id) {
                self.wire(sub, adapters);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyphal::Payload;
    use o1heap::{Heap, Owned};

    fn test_heap() -> &'static Heap {
        let pool = Box::leak(vec![0u8; 65536].into_boxed_slice());
        Heap::init(pool).unwrap()
    }

    use core::cell::Cell;

    /// Subscriber with a tiny inbox; progress observable through leaked
    /// counters since the task itself disappears behind `dyn`.
    struct Probe {
        timing: Timing,
        port: PortId,
        inbox: Inbox<2>,
        runs: &'static Cell<u32>,
        received: &'static Cell<u32>,
    }

    impl Probe {
        fn new(interval: u32, shift: u32, port: PortId) -> Self {
            Self {
                timing: Timing::new(interval, shift),
                port,
                inbox: Inbox::new(),
                runs: Box::leak(Box::new(Cell::new(0))),
                received: Box::leak(Box::new(Cell::new(0))),
            }
        }
    }

    impl Task<()> for Probe {
        fn timing(&mut self) -> &mut Timing {
            &mut self.timing
        }

        fn service(&mut self, _cx: &mut Context<'_, ()>) {
            self.runs.set(self.runs.get() + 1);
            while let Some(t) = self.inbox.pop() {
                assert_eq!(t.metadata.port_id, self.port);
                self.received.set(self.received.get() + 1);
            }
        }

        fn handle_message(&mut self, transfer: Shared<Transfer>) {
            self.inbox.push(transfer);
        }

        fn register(&mut self, registrar: &mut Registrar<'_>) {
            registrar.subscribe(self.port);
        }

        fn unregister(&mut self, registrar: &mut Registrar<'_>) {
            registrar.unsubscribe(self.port);
            self.inbox.clear();
        }
    }

    fn leak_task(heap: &'static Heap, probe: Probe) -> &'static mut Probe {
        Owned::new_in(heap, probe).unwrap().leak()
    }

    fn transfer(heap: &'static Heap, port: PortId) -> Shared<Transfer> {
        Shared::new_in(
            heap,
            Transfer::new(
                TransferMetadata::message(port, 0),
                Payload::copy_from(heap, b"m").unwrap(),
            ),
        )
        .unwrap()
    }

    #[test]
    fn tick_gating_with_shift() {
        let heap = test_heap();
        let pa = Probe::new(100, 0, 7);
        let pb = Probe::new(100, 50, 8);
        let (runs_a, runs_b) = (pa.runs, pb.runs);

        let mut mgr = RegistrationManager::<()>::new();
        mgr.add(leak_task(heap, pa)).unwrap();
        mgr.add(leak_task(heap, pb)).unwrap();
        mgr.initialize_services(1000);

        let mut tick = |now_ms| {
            mgr.handle_services(&mut Context {
                now_ms,
                adapters: &mut (),
            })
        };
        // Nothing due before the first interval elapses.
        tick(1099);
        assert_eq!((runs_a.get(), runs_b.get()), (0, 0));
        // a is due at 1100; b's shift delays it to 1150.
        tick(1100);
        assert_eq!((runs_a.get(), runs_b.get()), (1, 0));
        tick(1149);
        assert_eq!((runs_a.get(), runs_b.get()), (1, 0));
        tick(1150);
        assert_eq!((runs_a.get(), runs_b.get()), (1, 1));
        // Ran at 1100, so a is next due at 1200, not before.
        tick(1199);
        assert_eq!(runs_a.get(), 1);
        tick(1205);
        assert_eq!(runs_a.get(), 2);
    }

    #[test]
    fn register_unregister_leaves_no_trace() {
        let heap = test_heap();
        let mut mgr = RegistrationManager::<()>::new();
        let id = mgr.add(leak_task(heap, Probe::new(10, 0, 129))).unwrap();
        assert!(mgr.contains_task(id));
        assert_eq!(mgr.subscriptions(), &[129]);
        assert_eq!(mgr.handler_count(), 1);

        mgr.remove(id).unwrap();
        assert!(!mgr.contains_task(id));
        assert!(mgr.subscriptions().is_empty());
        assert!(mgr.publications().is_empty());
        assert!(mgr.clients().is_empty());
        assert!(mgr.servers().is_empty());
        assert_eq!(mgr.handler_count(), 0);
    }

    #[test]
    fn port_refcount_across_two_tasks() {
        let heap = test_heap();
        let mut mgr = RegistrationManager::<()>::new();
        let a = mgr.add(leak_task(heap, Probe::new(10, 0, 129))).unwrap();
        let b = mgr.add(leak_task(heap, Probe::new(10, 0, 129))).unwrap();
        // One port entry regardless of backing tasks.
        assert_eq!(mgr.subscriptions(), &[129]);
        assert_eq!(mgr.handler_count(), 2);

        mgr.remove(a).unwrap();
        // Port stays while a handler still references it.
        assert_eq!(mgr.subscriptions(), &[129]);
        mgr.remove(b).unwrap();
        assert!(mgr.subscriptions().is_empty());
    }

    #[test]
    fn message_fan_out_to_matching_handlers() {
        let heap = test_heap();
        let pa = Probe::new(10, 0, 60);
        let pb = Probe::new(10, 0, 60);
        let pc = Probe::new(10, 0, 61);
        let (rx_a, rx_b, rx_c) = (pa.received, pb.received, pc.received);

        let mut mgr = RegistrationManager::<()>::new();
        mgr.add(leak_task(heap, pa)).unwrap();
        mgr.add(leak_task(heap, pb)).unwrap();
        mgr.add(leak_task(heap, pc)).unwrap();

        let t = transfer(heap, 60);
        mgr.handle_message(&t);
        assert_eq!(Shared::ref_count(&t), 3); // us + two inboxes
        drop(t);

        mgr.handle_services(&mut Context {
            now_ms: 1_000_000,
            adapters: &mut (),
        });
        assert_eq!((rx_a.get(), rx_b.get(), rx_c.get()), (1, 1, 0));
    }

    #[test]
    fn inbox_overflow_drops_newest_keeps_queued() {
        let heap = test_heap();
        let mut inbox: Inbox<2> = Inbox::new();
        let t1 = transfer(heap, 5);
        let t2 = transfer(heap, 5);
        let t3 = transfer(heap, 5);
        inbox.push(t1.clone());
        inbox.push(t2.clone());
        inbox.push(t3.clone());
        assert_eq!(inbox.len(), 2);
        // The overflow victim lost its inbox reference.
        assert_eq!(Shared::ref_count(&t3), 1);
        // Queued entries are untouched, in order.
        assert_eq!(Shared::ref_count(&t1), 2);
        assert_eq!(Shared::ref_count(&t2), 2);
        drop(inbox.pop().unwrap());
        drop(inbox.pop().unwrap());
        assert_eq!(Shared::ref_count(&t1), 1);
        assert_eq!(Shared::ref_count(&t2), 1);
        assert!(inbox.pop().is_none());
    }

    #[test]
    fn unregister_clears_inbox_and_frees_payloads() {
        let heap = test_heap();
        let mut mgr = RegistrationManager::<()>::new();
        let id = mgr.add(leak_task(heap, Probe::new(10, 0, 77))).unwrap();

        let before = heap.diagnostics().allocated;
        let t = transfer(heap, 77);
        mgr.handle_message(&t);
        drop(t);
        assert!(heap.diagnostics().allocated > before);

        // Removing the task destroys the queued message.
        mgr.remove(id).unwrap();
        assert_eq!(heap.diagnostics().allocated, before);
    }

    #[test]
    fn port_list_reflects_all_four_sets() {
        struct Roles {
            timing: Timing,
        }
        impl Task<()> for Roles {
            fn timing(&mut self) -> &mut Timing {
                &mut self.timing
            }
            fn service(&mut self, _cx: &mut Context<'_, ()>) {}
            fn handle_message(&mut self, _t: Shared<Transfer>) {}
            fn register(&mut self, r: &mut Registrar<'_>) {
                r.publish(1102);
                r.subscribe(1103);
                r.client(430);
                r.server(384);
                // Out-of-range fixed port: wired but never advertised.
                r.publish(cyphal::ports::HEARTBEAT);
            }
            fn unregister(&mut self, r: &mut Registrar<'_>) {
                r.unpublish(1102);
                r.unsubscribe(1103);
                r.unclient(430);
                r.unserver(384);
                r.unpublish(cyphal::ports::HEARTBEAT);
            }
        }

        let heap = test_heap();
        let mut mgr = RegistrationManager::<()>::new();
        let task = Owned::new_in(
            heap,
            Roles {
                timing: Timing::new(10, 0),
            },
        )
        .unwrap()
        .leak();
        let id = mgr.add(task).unwrap();

        let list = mgr.port_list();
        assert_eq!(&list.publishers[..], &[1102]);
        assert_eq!(&list.subscribers[..], &[1103]);
        assert!(list.clients.get(430));
        assert!(list.servers.get(384));
        assert!(!list.servers.get(385));

        mgr.remove(id).unwrap();
        let list = mgr.port_list();
        assert!(list.publishers.is_empty());
        assert!(list.subscribers.is_empty());
    }

    #[test]
    fn subscription_manager_follows_advertisements() {
        use cyphal::{Microsecond, Transport};

        // Counting adapter.
        struct Counter {
            subs: Vec<(TransferKind, PortId)>,
        }
        impl Transport for Counter {
            fn tx_push(
                &mut self,
                _: Microsecond,
                _: &TransferMetadata,
                _: &[u8],
            ) -> Result<usize, cyphal::TransportError> {
                Ok(1)
            }
            fn rx_subscribe(
                &mut self,
                kind: TransferKind,
                port_id: PortId,
                _: usize,
                _: Microsecond,
            ) -> Result<bool, cyphal::TransportError> {
                self.subs.push((kind, port_id));
                Ok(true)
            }
            fn rx_unsubscribe(&mut self, _: TransferKind, _: PortId) -> bool {
                true
            }
            fn node_id(&self) -> NodeId {
                1
            }
            fn set_node_id(&mut self, _: NodeId) {}
        }

        let mut adapters = (Counter { subs: Vec::new() },);
        let mut sm = SubscriptionManager::new();

        let mut list = NodePortList::default();
        list.publishers.push(cyphal::ports::POSITION_VELOCITY).unwrap();
        list.publishers.push(9999).unwrap(); // unknown type: ignored
        list.clients.set(cyphal::ports::REGISTER_ACCESS);
        sm.ingest(&list, &mut adapters);

        assert_eq!(
            adapters.0.subs,
            vec![
                (TransferKind::Message, cyphal::ports::POSITION_VELOCITY),
                (TransferKind::Request, cyphal::ports::REGISTER_ACCESS),
            ]
        );
        assert_eq!(sm.subscriptions().len(), 2);

        // Ingesting the same advertisement again is a no-op.
        sm.ingest(&list, &mut adapters);
        assert_eq!(adapters.0.subs.len(), 2);
    }
}
