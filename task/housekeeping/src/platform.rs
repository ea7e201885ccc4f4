// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Local chores: the status LED, the heap watchdog, and the bridge from
//! the log ring onto the diagnostic-record port. All three are pure
//! handlers -- scheduled, never wired to inbound traffic.

use cyphal::{ports, Priority, Transfer, TransferMetadata, TransportSet};
use dsdl::standard::DiagnosticRecord;
use dsdl::DataType;
use embedded_hal::digital::v2::ToggleableOutputPin;
use num_traits::FromPrimitive as _;
use o1heap::{Heap, Shared};
use ringlog::{log, Severity};
use sched::{Context, Registrar, Task, Timing, PUBLISH_BUFFER_CAPACITY};

/// Toggles the status LED so a camera (or a technician) can see the
/// scheduler breathing.
pub struct BlinkLedTask<L> {
    timing: Timing,
    led: L,
}

impl<L: ToggleableOutputPin> BlinkLedTask<L> {
    pub fn new(led: L, interval_ms: u32, shift_ms: u32) -> Self {
        Self {
            timing: Timing::new(interval_ms, shift_ms),
            led,
        }
    }
}

impl<L: ToggleableOutputPin, A: TransportSet> Task<A> for BlinkLedTask<L> {
    fn timing(&mut self) -> &mut Timing {
        &mut self.timing
    }

    fn service(&mut self, _cx: &mut Context<'_, A>) {
        let _ = self.led.toggle();
    }

    fn handle_message(&mut self, _transfer: Shared<Transfer>) {}

    fn register(&mut self, registrar: &mut Registrar<'_>) {
        registrar.subscribe(cyphal::PURE_HANDLER_PORT);
    }

    fn unregister(&mut self, registrar: &mut Registrar<'_>) {
        registrar.unsubscribe(cyphal::PURE_HANDLER_PORT);
    }
}

/// Logs the heap diagnostics and screams if the invariants break.
pub struct CheckMemoryTask {
    timing: Timing,
    heap: &'static Heap,
}

impl CheckMemoryTask {
    pub fn new(heap: &'static Heap, interval_ms: u32, shift_ms: u32) -> Self {
        Self {
            timing: Timing::new(interval_ms, shift_ms),
            heap,
        }
    }
}

impl<A: TransportSet> Task<A> for CheckMemoryTask {
    fn timing(&mut self) -> &mut Timing {
        &mut self.timing
    }

    fn service(&mut self, _cx: &mut Context<'_, A>) {
        let healthy = self.heap.invariants_hold();
        let d = self.heap.diagnostics();
        if healthy {
            log!(
                Severity::Info,
                "heap: {}/{} allocated, peak {}, oom {}",
                d.allocated,
                d.capacity,
                d.peak_allocated,
                d.oom_count
            );
        } else {
            log!(Severity::Critical, "heap invariants violated");
        }
    }

    fn handle_message(&mut self, _transfer: Shared<Transfer>) {}

    fn register(&mut self, registrar: &mut Registrar<'_>) {
        registrar.subscribe(cyphal::PURE_HANDLER_PORT);
    }

    fn unregister(&mut self, registrar: &mut Registrar<'_>) {
        registrar.unsubscribe(cyphal::PURE_HANDLER_PORT);
    }
}

/// Records drained from the log ring per tick; bounds the airtime spent
/// on diagnostics.
pub const LOG_DRAIN_PER_TICK: usize = 4;

/// Ships log records as diagnostic-record publications, more urgent
/// records at higher wire priority.
pub struct LogPublisherTask {
    timing: Timing,
    transfer_id: u8,
}

impl LogPublisherTask {
    pub fn new(interval_ms: u32, shift_ms: u32, transfer_id: u8) -> Self {
        Self {
            timing: Timing::new(interval_ms, shift_ms),
            transfer_id,
        }
    }
}

impl<A: TransportSet> Task<A> for LogPublisherTask {
    fn timing(&mut self) -> &mut Timing {
        &mut self.timing
    }

    fn service(&mut self, cx: &mut Context<'_, A>) {
        for _ in 0..LOG_DRAIN_PER_TICK {
            let Some(record) = ringlog::drain_one() else {
                return;
            };
            let mut data = DiagnosticRecord {
                timestamp_us: cx.now_ms as u64 * 1000,
                severity: record.severity as u8,
                text: heapless::String::new(),
            };
            let text = &record.text.as_str()
                [..record.text.len().min(dsdl::standard::DIAGNOSTIC_TEXT_CAPACITY)];
            let _ = data.text.push_str(text);

            let mut buf = [0u8; PUBLISH_BUFFER_CAPACITY];
            let Ok(n) = data.serialize(&mut buf) else {
                continue;
            };
            let mut metadata =
                TransferMetadata::message(ports::DIAGNOSTIC_RECORD, self.transfer_id);
            // Wire priority mirrors severity: alert rides exceptional.
            metadata.priority = Priority::from_u8(Severity::Alert as u8 - record.severity as u8)
                .unwrap_or(Priority::Nominal);
            self.transfer_id = self.transfer_id.wrapping_add(1);
            cx.adapters.push_all(0, &metadata, &buf[..n]);
        }
    }

    fn handle_message(&mut self, _transfer: Shared<Transfer>) {}

    fn register(&mut self, registrar: &mut Registrar<'_>) {
        registrar.publish(ports::DIAGNOSTIC_RECORD);
    }

    fn unregister(&mut self, registrar: &mut Registrar<'_>) {
        registrar.unpublish(ports::DIAGNOSTIC_RECORD);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyphal::Transport;
    use drv_cyphal_loopback::LoopbackTransport;
    use std::cell::Cell;
    use std::rc::Rc;

    fn test_heap() -> &'static Heap {
        let pool = Box::leak(vec![0u8; 65536].into_boxed_slice());
        Heap::init(pool).unwrap()
    }

    #[derive(Clone)]
    struct MockLed(Rc<Cell<u32>>);
    impl ToggleableOutputPin for MockLed {
        type Error = core::convert::Infallible;
        fn toggle(&mut self) -> Result<(), Self::Error> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn led_toggles_on_interval_only() {
        let toggles = Rc::new(Cell::new(0));
        let mut task = BlinkLedTask::new(MockLed(toggles.clone()), 500, 0);
        Task::<()>::timing(&mut task).initialize(0);

        for now in [100u32, 499, 500, 700, 1000] {
            Task::<()>::handle_task(
                &mut task,
                &mut Context {
                    now_ms: now,
                    adapters: &mut (),
                },
            );
        }
        // Fires at 500 and again at 1000.
        assert_eq!(toggles.get(), 2);
    }

    // The log ring is process-global and tests run threaded, so these
    // assertions scan for their own records instead of assuming an empty
    // ring.

    #[test]
    fn memory_check_logs_diagnostics() {
        let heap = test_heap();
        let mut task = CheckMemoryTask::new(heap, 1000, 0);
        Task::<()>::service(
            &mut task,
            &mut Context {
                now_ms: 0,
                adapters: &mut (),
            },
        );
        let mut found = false;
        while let Some(rec) = ringlog::drain_one() {
            if rec.severity == Severity::Info && rec.text.as_str().starts_with("heap:") {
                found = true;
                break;
            }
        }
        assert!(found, "heap diagnostics record not logged");
    }

    #[test]
    fn log_publisher_ships_records_with_mapped_priority() {
        let heap = test_heap();
        let mut adapters = (LoopbackTransport::new(heap),);
        adapters.0.set_node_id(11);
        let mut task = LogPublisherTask::new(100, 0, 0);

        log!(Severity::Error, "thruster on fire");
        let mut found = None;
        for _ in 0..8 {
            Task::<(LoopbackTransport,)>::service(
                &mut task,
                &mut Context {
                    now_ms: 2_000,
                    adapters: &mut adapters,
                },
            );
            while let Some(t) = adapters.0.rx_receive() {
                assert_eq!(t.metadata.port_id, ports::DIAGNOSTIC_RECORD);
                let rec = DiagnosticRecord::deserialize(&t.payload).unwrap();
                if rec.text.as_str() == "thruster on fire" {
                    found = Some((t.metadata.priority, rec));
                }
            }
            if found.is_some() {
                break;
            }
        }
        let (priority, rec) = found.expect("record published");
        // Error (5) maps to priority 2 (fast).
        assert_eq!(priority, Priority::Fast);
        assert_eq!(rec.severity, Severity::Error as u8);
        assert_eq!(rec.timestamp_us, 2_000_000);
    }
}
