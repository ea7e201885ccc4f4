// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ground bench: the flight task set on a simulated clock over the
//! loopback transport.
//!
//! The loopback adapter stands in for the wire, so every publication this
//! node makes comes straight back at it: heartbeats are heard by the
//! heartbeat listener, the port list feeds the subscription follower, the
//! GetInfo client polls this node's own GetInfo server, and the orbit task
//! streams ISS state vectors against the mocked RTC. One process, no
//! hardware, fully deterministic.
//!
//! This is a bounded run over simulated milliseconds -- an end-to-end smoke
//! test of the whole stack and a place to eyeball scheduler phasing.

use core::cell::RefCell;
use cyphal::{ports, Transport};
use drv_cyphal_loopback::LoopbackTransport;
use dsdl::DataType;
use o1heap::{Heap, Owned};
use ringlog::{log, Severity};
use router::LoopManager;
use sched::{Context, RegistrationManager, SubscriptionManager};
use task_housekeeping::{
    CheckMemoryTask, LogPublisherTask, PortListBoard, ProcessHeartbeatTask,
    ProcessTimeSyncTask, RequestGetInfoTask, RespondGetInfoTask, SendHeartbeatTask,
    SendPortListTask, SendTimeSyncTask, SubscribePortListTask,
};
use task_orbit::Sgp4Task;
use task_registers::RegisterServerTask;
use timekeep::mock::MockRtc;
use timekeep::{to_epoch_ms, DateTime};

type Bus = (LoopbackTransport,);

const NODE_ID: u8 = 11;
const HEAP_SIZE: usize = 256 * 1024;
const RUN_MS: u32 = 20_000;
const TICK_MS: u32 = 10;

const ISS1: &str = "1 25544U 98067A   25176.73245655  .00008102  00000-0  14854-3 0  9994";
const ISS2: &str = "2 25544  51.6390 264.7180 0001990 278.3788 217.2311 15.50240116516482";

static BLOB_MAP: &[blobstore::BlobEntry] = &[
    blobstore::BlobEntry {
        name: "blob1",
        offset: 0,
        size: 10,
    },
    blobstore::BlobEntry {
        name: "callsign",
        offset: 10,
        size: 16,
    },
];

fn main() {
    ringlog::enable_stderr_mirror();
    ringlog::set_min_severity(Severity::Info);

    let heap = Heap::init(Box::leak(vec![0u8; HEAP_SIZE].into_boxed_slice()))
        .expect("heap pool");

    let mut adapters: Bus = (LoopbackTransport::new(heap),);
    adapters.0.set_node_id(NODE_ID);

    // Static subscriptions for the message streams this node consumes.
    let mut wiring = SubscriptionManager::new();
    for port in [
        ports::HEARTBEAT,
        ports::NODE_PORT_LIST,
        ports::TIME_SYNCHRONIZATION,
        ports::POSITION_VELOCITY,
    ] {
        wiring.subscribe_message(port, &mut adapters);
    }

    // One RTC shared by every task that needs wall time, pinned to a
    // known epoch so the orbit output is recognizable.
    let epoch = to_epoch_ms(&DateTime {
        year: 2025,
        month: 6,
        day: 25,
        hour: 18,
        minute: 0,
        second: 0,
        millisecond: 0,
    });
    let rtc: &'static RefCell<MockRtc> =
        Box::leak(Box::new(RefCell::new(MockRtc::new(1023, epoch))));

    let board: &'static PortListBoard = Box::leak(Box::new(PortListBoard::new()));

    let mut orbit = Sgp4Task::new(rtc, 1000, 40, 0);
    assert!(orbit.set_elements(sgp4::parse_tle(ISS1, ISS2).expect("ISS TLE parses")));

    let store = blobstore::BlobStore::new(blobstore::RamFlash::<64>::new(), BLOB_MAP);

    let mut mgr = RegistrationManager::<Bus>::new();
    let installed = [
        mgr.add(Owned::new_in(heap, SendHeartbeatTask::new(1000, 0, 0)).unwrap().leak()),
        mgr.add(Owned::new_in(heap, ProcessHeartbeatTask::new(500, 10)).unwrap().leak()),
        mgr.add(
            Owned::new_in(heap, SendPortListTask::new(board, 5000, 20, 0))
                .unwrap()
                .leak(),
        ),
        mgr.add(Owned::new_in(heap, SubscribePortListTask::new(1000, 30)).unwrap().leak()),
        mgr.add(
            Owned::new_in(heap, SendTimeSyncTask::new(rtc, 2000, 50, 0))
                .unwrap()
                .leak(),
        ),
        mgr.add(
            Owned::new_in(heap, ProcessTimeSyncTask::new(rtc, 500, 60))
                .unwrap()
                .leak(),
        ),
        mgr.add(Owned::new_in(heap, orbit).unwrap().leak()),
        mgr.add(
            Owned::new_in(
                heap,
                RespondGetInfoTask::new(
                    *b"csat-bench-0001!",
                    "org.csat.bench",
                    0xc5ad_8c7d,
                    200,
                    70,
                ),
            )
            .unwrap()
            .leak(),
        ),
        mgr.add(
            Owned::new_in(heap, RequestGetInfoTask::new(NODE_ID, 5000, 80, 0))
                .unwrap()
                .leak(),
        ),
        mgr.add(
            Owned::new_in(heap, RegisterServerTask::new(200, 90, store))
                .unwrap()
                .leak(),
        ),
        mgr.add(Owned::new_in(heap, CheckMemoryTask::new(heap, 5000, 100)).unwrap().leak()),
        mgr.add(Owned::new_in(heap, LogPublisherTask::new(200, 110, 0)).unwrap().leak()),
    ];
    assert!(installed.iter().all(|t| t.is_some()));
    mgr.initialize_services(0);

    let loop_manager = LoopManager::new(heap);
    let mut state_vectors = 0u32;

    let mut now_ms = 0u32;
    while now_ms < RUN_MS {
        now_ms += TICK_MS;

        // Advertise the port sets as they stand, then tick everyone.
        board.post(mgr.port_list());
        mgr.handle_services(&mut Context {
            now_ms,
            adapters: &mut adapters,
        });

        // Drain the bus. With a single adapter the bridge has nowhere to
        // forward, so this is pure local delivery.
        while let Some(transfer) = adapters.0.rx_receive() {
            if transfer.metadata.port_id == ports::POSITION_VELOCITY {
                if let Ok(pv) = dsdl::sat::PositionVelocity::deserialize(&transfer.payload) {
                    state_vectors += 1;
                    if state_vectors % 5 == 1 {
                        log!(
                            Severity::Info,
                            "state vector: r = ({:.0}, {:.0}, {:.0}) m",
                            pv.position_m[0],
                            pv.position_m[1],
                            pv.position_m[2]
                        );
                    }
                }
            }
            loop_manager.process_transfer(transfer, 0, &mut mgr, &mut adapters);
        }
    }

    let d = heap.diagnostics();
    println!(
        "bench complete: {RUN_MS} simulated ms, {state_vectors} state vectors, \
         heap peak {}/{} bytes, oom {}",
        d.peak_allocated, d.capacity, d.oom_count
    );
    assert!(heap.invariants_hold());
}
