// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Node-information service: a server answering for this node and a
//! client that polls one peer.
//!
//! The client is deliberately simple-minded: with nothing pending it
//! issues a request; with responses queued it consumes them, discarding
//! anything whose origin or kind does not match the outstanding request.
//! One poll per tick is plenty for an identity endpoint.

use cyphal::{ports, NodeId, Transfer, TransferKind, TransportSet};
use dsdl::standard::{GetInfoRequest, GetInfoResponse, Version, NODE_NAME_CAPACITY};
use dsdl::DataType;
use o1heap::Shared;
use ringlog::{log, Severity};
use sched::{respond, Context, Inbox, Publication, Registrar, Task, Timing};

pub const GETINFO_INBOX: usize = 4;

/// Answers GetInfo requests with this node's identity.
pub struct RespondGetInfoTask {
    timing: Timing,
    inbox: Inbox<GETINFO_INBOX>,
    unique_id: [u8; 16],
    name: heapless::String<NODE_NAME_CAPACITY>,
    software_vcs_revision_id: u64,
}

impl RespondGetInfoTask {
    pub fn new(
        unique_id: [u8; 16],
        name: &str,
        software_vcs_revision_id: u64,
        interval_ms: u32,
        shift_ms: u32,
    ) -> Self {
        Self {
            timing: Timing::new(interval_ms, shift_ms),
            inbox: Inbox::new(),
            unique_id,
            name: name.into(),
            software_vcs_revision_id,
        }
    }

    fn response(&self) -> GetInfoResponse {
        GetInfoResponse {
            protocol_version: Version { major: 1, minor: 0 },
            hardware_version: Version { major: 1, minor: 0 },
            software_version: Version { major: 0, minor: 1 },
            software_vcs_revision_id: self.software_vcs_revision_id,
            unique_id: self.unique_id,
            name: self.name.clone(),
        }
    }
}

impl<A: TransportSet> Task<A> for RespondGetInfoTask {
    fn timing(&mut self) -> &mut Timing {
        &mut self.timing
    }

    fn service(&mut self, cx: &mut Context<'_, A>) {
        while let Some(transfer) = self.inbox.pop() {
            if transfer.metadata.kind != TransferKind::Request {
                continue;
            }
            respond(
                cx.adapters,
                ports::GET_INFO,
                transfer.metadata.remote_node_id,
                transfer.metadata.transfer_id,
                &self.response(),
            );
        }
    }

    fn handle_message(&mut self, transfer: Shared<Transfer>) {
        self.inbox.push(transfer);
    }

    fn register(&mut self, registrar: &mut Registrar<'_>) {
        registrar.server(ports::GET_INFO);
    }

    fn unregister(&mut self, registrar: &mut Registrar<'_>) {
        registrar.unserver(ports::GET_INFO);
        self.inbox.clear();
    }
}

/// Polls one peer's identity.
pub struct RequestGetInfoTask {
    timing: Timing,
    publication: Publication,
    inbox: Inbox<GETINFO_INBOX>,
    server_node_id: NodeId,
    last_response: Option<GetInfoResponse>,
}

impl RequestGetInfoTask {
    pub fn new(server_node_id: NodeId, interval_ms: u32, shift_ms: u32, transfer_id: u8) -> Self {
        Self {
            timing: Timing::new(interval_ms, shift_ms),
            publication: Publication::new(transfer_id),
            inbox: Inbox::new(),
            server_node_id,
            last_response: None,
        }
    }

    /// Most recent valid response from the polled peer.
    pub fn last_response(&self) -> Option<&GetInfoResponse> {
        self.last_response.as_ref()
    }
}

impl<A: TransportSet> Task<A> for RequestGetInfoTask {
    fn timing(&mut self) -> &mut Timing {
        &mut self.timing
    }

    fn service(&mut self, cx: &mut Context<'_, A>) {
        if self.inbox.is_empty() {
            self.publication.request(
                cx.adapters,
                ports::GET_INFO,
                self.server_node_id,
                &GetInfoRequest,
            );
            return;
        }
        while let Some(transfer) = self.inbox.pop() {
            if transfer.metadata.remote_node_id != self.server_node_id
                || transfer.metadata.kind != TransferKind::Response
            {
                log!(
                    Severity::Error,
                    "getinfo: unexpected transfer from {} kind {:?}",
                    transfer.metadata.remote_node_id,
                    transfer.metadata.kind
                );
                continue;
            }
            match GetInfoResponse::deserialize(&transfer.payload) {
                Ok(info) => {
                    log!(
                        Severity::Debug,
                        "peer {} is {}",
                        self.server_node_id,
                        info.name.as_str()
                    );
                    self.last_response = Some(info);
                }
                Err(e) => {
                    log!(Severity::Error, "getinfo: malformed response ({e:?})");
                }
            }
        }
    }

    fn handle_message(&mut self, transfer: Shared<Transfer>) {
        self.inbox.push(transfer);
    }

    fn register(&mut self, registrar: &mut Registrar<'_>) {
        registrar.client(ports::GET_INFO);
    }

    fn unregister(&mut self, registrar: &mut Registrar<'_>) {
        registrar.unclient(ports::GET_INFO);
        self.inbox.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyphal::{Payload, TransferMetadata, Transport};
    use drv_cyphal_loopback::LoopbackTransport;
    use o1heap::Heap;

    fn test_heap() -> &'static Heap {
        let pool = Box::leak(vec![0u8; 65536].into_boxed_slice());
        Heap::init(pool).unwrap()
    }

    type OneLoop = (LoopbackTransport,);

    fn service<T: Task<OneLoop>>(task: &mut T, adapters: &mut OneLoop) {
        task.service(&mut Context {
            now_ms: 0,
            adapters,
        });
    }

    #[test]
    fn request_then_response_round_trip() {
        let heap = test_heap();
        let mut adapters: OneLoop = (LoopbackTransport::new(heap),);
        adapters.0.set_node_id(9);

        let mut server =
            RespondGetInfoTask::new([7; 16], "org.csat.obc", 0xc5ad_8c7d, 100, 0);
        let mut client = RequestGetInfoTask::new(9, 100, 0, 3);

        // Client with an empty inbox sends a request.
        service(&mut client, &mut adapters);
        let req = adapters.0.rx_receive().expect("request on the wire");
        assert_eq!(req.metadata.kind, TransferKind::Request);
        assert_eq!(req.metadata.port_id, ports::GET_INFO);
        assert_eq!(req.metadata.destination_node_id, 9);
        let req_tid = req.metadata.transfer_id;
        assert_eq!(req_tid, 3);

        // Server consumes the request and answers with correlation.
        Task::<OneLoop>::handle_message(&mut server, Shared::new_in(heap, req).unwrap());
        service(&mut server, &mut adapters);
        let resp = adapters.0.rx_receive().expect("response on the wire");
        assert_eq!(resp.metadata.kind, TransferKind::Response);
        assert_eq!(resp.metadata.transfer_id, req_tid);

        // Client takes the response and records the identity.
        Task::<OneLoop>::handle_message(&mut client, Shared::new_in(heap, resp).unwrap());
        service(&mut client, &mut adapters);
        let info = client.last_response().expect("identity recorded");
        assert_eq!(info.name.as_str(), "org.csat.obc");
        assert_eq!(info.unique_id, [7; 16]);
        assert_eq!(info.software_vcs_revision_id, 0xc5ad_8c7d);
        // Consuming the response did not emit a new request this tick.
        assert!(adapters.0.rx_receive().is_none());
    }

    #[test]
    fn mismatched_origin_is_dropped() {
        let heap = test_heap();
        let mut adapters: OneLoop = (LoopbackTransport::new(heap),);
        adapters.0.set_node_id(9);
        let mut client = RequestGetInfoTask::new(9, 100, 0, 0);

        // A response claiming to come from node 14, not our server.
        let mut buf = [0u8; GetInfoResponse::MAX_SERIALIZED_SIZE];
        let data = RespondGetInfoTask::new([1; 16], "impostor", 0, 100, 0).response();
        let n = data.serialize(&mut buf).unwrap();
        let mut meta =
            TransferMetadata::service(TransferKind::Response, ports::GET_INFO, 14, 0);
        meta.remote_node_id = 14;
        let stray = Shared::new_in(
            heap,
            Transfer::new(meta, Payload::copy_from(heap, &buf[..n]).unwrap()),
        )
        .unwrap();

        Task::<OneLoop>::handle_message(&mut client, stray);
        service(&mut client, &mut adapters);
        assert!(client.last_response().is_none());
    }

    #[test]
    fn server_ignores_non_requests() {
        let heap = test_heap();
        let mut adapters: OneLoop = (LoopbackTransport::new(heap),);
        adapters.0.set_node_id(9);
        let mut server = RespondGetInfoTask::new([7; 16], "node", 0, 100, 0);

        let stray = Shared::new_in(
            heap,
            Transfer::new(
                TransferMetadata::message(ports::GET_INFO, 0),
                Payload::copy_from(heap, &[]).unwrap(),
            ),
        )
        .unwrap();
        Task::<OneLoop>::handle_message(&mut server, stray);
        service(&mut server, &mut adapters);
        assert!(adapters.0.rx_receive().is_none());
    }
}
