// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register-access server: the ground's window into the blob store.
//!
//! One request names a blob; if it carries unstructured bytes the slot is
//! written first (short writes pad with the erased byte). Either way the
//! response reports the slot's *current* contents, so a write's response
//! doubles as its read-back verification.
//!
//! Requests the server cannot honor -- unknown names, malformed payloads,
//! oversized values -- are answered with an empty value rather than
//! dropped, so the client can tell "store said no" from "request lost".

#![cfg_attr(not(test), no_std)]

use blobstore::{BlobAccess, BlobStore};
use cyphal::{ports, Transfer, TransferKind, TransportSet};
use dsdl::standard::{
    RegisterAccessRequest, RegisterAccessResponse, RegisterValue, REGISTER_VALUE_CAPACITY,
};
use dsdl::DataType;
use o1heap::Shared;
use ringlog::{log, Severity};
use sched::{respond, Context, Inbox, Registrar, Task, Timing};

pub const INBOX_CAPACITY: usize = 8;

pub struct RegisterServerTask<B: BlobAccess> {
    timing: Timing,
    store: BlobStore<B>,
    inbox: Inbox<INBOX_CAPACITY>,
}

impl<B: BlobAccess> RegisterServerTask<B> {
    pub fn new(interval_ms: u32, shift_ms: u32, store: BlobStore<B>) -> Self {
        Self {
            timing: Timing::new(interval_ms, shift_ms),
            store,
            inbox: Inbox::new(),
        }
    }

    pub fn store(&self) -> &BlobStore<B> {
        &self.store
    }

    fn process(&mut self, request: &RegisterAccessRequest, now_ms: u32) -> RegisterAccessResponse {
        let name = request.name.as_str();
        if let RegisterValue::Unstructured(data) = &request.value {
            if !self.store.write_by_name(name, data) {
                log!(Severity::Error, "register write failed: {name}");
            }
        }

        let mut slot = [0u8; REGISTER_VALUE_CAPACITY];
        let value = match self.store.read_by_name(name, &mut slot) {
            Some(n) => {
                let mut bytes = heapless::Vec::new();
                let _ = bytes.extend_from_slice(&slot[..n]);
                RegisterValue::Unstructured(bytes)
            }
            None => {
                log!(Severity::Error, "register read failed: {name}");
                RegisterValue::Empty
            }
        };
        RegisterAccessResponse {
            timestamp_us: now_ms as u64 * 1000,
            mutable: true,
            persistent: true,
            value,
        }
    }
}

impl<B: BlobAccess, A: TransportSet> Task<A> for RegisterServerTask<B> {
    fn timing(&mut self) -> &mut Timing {
        &mut self.timing
    }

    fn service(&mut self, cx: &mut Context<'_, A>) {
        while let Some(transfer) = self.inbox.pop() {
            if transfer.metadata.kind != TransferKind::Request {
                continue;
            }
            let request = match RegisterAccessRequest::deserialize(&transfer.payload) {
                Ok(r) => r,
                Err(e) => {
                    log!(Severity::Error, "register request malformed: {e:?}");
                    continue;
                }
            };
            let response = self.process(&request, cx.now_ms);
            respond(
                cx.adapters,
                ports::REGISTER_ACCESS,
                transfer.metadata.remote_node_id,
                transfer.metadata.transfer_id,
                &response,
            );
        }
    }

    fn handle_message(&mut self, transfer: Shared<Transfer>) {
        self.inbox.push(transfer);
    }

    fn register(&mut self, registrar: &mut Registrar<'_>) {
        registrar.server(ports::REGISTER_ACCESS);
    }

    fn unregister(&mut self, registrar: &mut Registrar<'_>) {
        registrar.unserver(ports::REGISTER_ACCESS);
        self.inbox.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobstore::{BlobEntry, RamFlash, ERASED};
    use cyphal::{Payload, TransferMetadata, Transport};
    use drv_cyphal_loopback::LoopbackTransport;
    use o1heap::Heap;

    static MAP: &[BlobEntry] = &[BlobEntry {
        name: "blob1",
        offset: 0,
        size: 10,
    }];

    fn test_heap() -> &'static Heap {
        let pool = Box::leak(vec![0u8; 65536].into_boxed_slice());
        Heap::init(pool).unwrap()
    }

    fn request_transfer(
        heap: &'static Heap,
        name: &str,
        value: RegisterValue,
        transfer_id: u8,
    ) -> Shared<Transfer> {
        let req = RegisterAccessRequest {
            name: name.into(),
            value,
        };
        let mut buf = [0u8; RegisterAccessRequest::MAX_SERIALIZED_SIZE];
        let n = req.serialize(&mut buf).unwrap();
        let meta =
            TransferMetadata::service(TransferKind::Request, ports::REGISTER_ACCESS, 42, transfer_id);
        Shared::new_in(
            heap,
            Transfer::new(meta, Payload::copy_from(heap, &buf[..n]).unwrap()),
        )
        .unwrap()
    }

    fn pop_response(lo: &mut LoopbackTransport) -> RegisterAccessResponse {
        let t = lo.rx_receive().expect("response queued");
        assert_eq!(t.metadata.kind, TransferKind::Response);
        assert_eq!(t.metadata.port_id, ports::REGISTER_ACCESS);
        RegisterAccessResponse::deserialize(&t.payload).unwrap()
    }

    fn unstructured(bytes: &[u8]) -> RegisterValue {
        let mut v = heapless::Vec::new();
        v.extend_from_slice(bytes).unwrap();
        RegisterValue::Unstructured(v)
    }

    #[test]
    fn write_then_read_round_trip() {
        let heap = test_heap();
        let mut adapters = (LoopbackTransport::new(heap),);
        adapters.0.set_node_id(9);
        let mut task =
            RegisterServerTask::new(100, 0, BlobStore::new(RamFlash::<64>::new(), MAP));

        // Write "!TestData!".
        Task::<(LoopbackTransport,)>::handle_message(
            &mut task,
            request_transfer(heap, "blob1", unstructured(b"!TestData!"), 5),
        );
        task.service(&mut Context {
            now_ms: 1000,
            adapters: &mut adapters,
        });
        let resp = pop_response(&mut adapters.0);
        assert_eq!(resp.value, unstructured(b"!TestData!"));
        assert!(resp.mutable && resp.persistent);

        // Short write pads the tail with the erased byte.
        Task::<(LoopbackTransport,)>::handle_message(
            &mut task,
            request_transfer(heap, "blob1", unstructured(b"1234567"), 6),
        );
        task.service(&mut Context {
            now_ms: 1100,
            adapters: &mut adapters,
        });
        let resp = pop_response(&mut adapters.0);
        let expect = [b'1', b'2', b'3', b'4', b'5', b'6', b'7', ERASED, ERASED, ERASED];
        assert_eq!(resp.value, unstructured(&expect));
    }

    #[test]
    fn read_only_request_reports_contents() {
        let heap = test_heap();
        let mut adapters = (LoopbackTransport::new(heap),);
        adapters.0.set_node_id(9);
        let mut task =
            RegisterServerTask::new(100, 0, BlobStore::new(RamFlash::<64>::new(), MAP));

        Task::<(LoopbackTransport,)>::handle_message(
            &mut task,
            request_transfer(heap, "blob1", RegisterValue::Empty, 1),
        );
        task.service(&mut Context {
            now_ms: 10,
            adapters: &mut adapters,
        });
        let resp = pop_response(&mut adapters.0);
        assert_eq!(resp.value, unstructured(&[ERASED; 10]));
    }

    #[test]
    fn unknown_register_answers_empty() {
        let heap = test_heap();
        let mut adapters = (LoopbackTransport::new(heap),);
        adapters.0.set_node_id(9);
        let mut task =
            RegisterServerTask::new(100, 0, BlobStore::new(RamFlash::<64>::new(), MAP));

        Task::<(LoopbackTransport,)>::handle_message(
            &mut task,
            request_transfer(heap, "missing", RegisterValue::Empty, 1),
        );
        task.service(&mut Context {
            now_ms: 10,
            adapters: &mut adapters,
        });
        let resp = pop_response(&mut adapters.0);
        assert_eq!(resp.value, RegisterValue::Empty);
    }

    #[test]
    fn non_request_transfers_are_ignored() {
        let heap = test_heap();
        let mut adapters = (LoopbackTransport::new(heap),);
        adapters.0.set_node_id(9);
        let mut task =
            RegisterServerTask::new(100, 0, BlobStore::new(RamFlash::<64>::new(), MAP));

        let meta = TransferMetadata::message(ports::REGISTER_ACCESS, 0);
        let stray = Shared::new_in(
            heap,
            Transfer::new(meta, Payload::copy_from(heap, b"junk").unwrap()),
        )
        .unwrap();
        Task::<(LoopbackTransport,)>::handle_message(&mut task, stray);
        task.service(&mut Context {
            now_ms: 10,
            adapters: &mut adapters,
        });
        assert!(adapters.0.rx_receive().is_none());
    }
}
