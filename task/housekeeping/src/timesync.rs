// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Time distribution.
//!
//! The sender publishes the wall-clock timestamp of its *previous*
//! transmission, per the synchronization protocol; a zero timestamp is the
//! agreed sentinel for "my RTC was unreadable, ignore this one".
//!
//! The receiver pairs each sync message with the local tick at which it
//! arrived, projects the master's timestamp forward by the local time that
//! has passed since, and slews the RTC through the sub-second shift so
//! wall time never visibly jumps. The first message only establishes the
//! tick pairing; adjustment starts with the second.

use cyphal::{ports, Transfer, TransportSet};
use dsdl::standard::TimeSynchronization;
use dsdl::DataType;
use o1heap::Shared;
use ringlog::{log, Severity};
use sched::{Context, Inbox, Publication, Registrar, Task, Timing};
use timekeep::Rtc;

/// Publishes time synchronization beacons from the RTC.
pub struct SendTimeSyncTask<R: Rtc> {
    timing: Timing,
    publication: Publication,
    rtc: R,
    previous_us: u64,
}

impl<R: Rtc> SendTimeSyncTask<R> {
    pub fn new(rtc: R, interval_ms: u32, shift_ms: u32, transfer_id: u8) -> Self {
        Self {
            timing: Timing::new(interval_ms, shift_ms),
            publication: Publication::new(transfer_id),
            rtc,
            previous_us: 0,
        }
    }
}

impl<R: Rtc, A: TransportSet> Task<A> for SendTimeSyncTask<R> {
    fn timing(&mut self) -> &mut Timing {
        &mut self.timing
    }

    fn service(&mut self, cx: &mut Context<'_, A>) {
        let data = TimeSynchronization {
            previous_transmission_timestamp_us: self.previous_us,
        };
        self.publication
            .publish(cx.adapters, ports::TIME_SYNCHRONIZATION, &data);

        // Stamp this transmission for the next beacon; zero sentinel when
        // the RTC cannot be read.
        self.previous_us = match self.rtc.read() {
            Ok(stamp) => timekeep::from_rtc(&stamp, self.rtc.synch_prediv()) * 1000,
            Err(_) => {
                log!(Severity::Warning, "time sync: rtc unreadable");
                0
            }
        };
    }

    fn handle_message(&mut self, _transfer: Shared<Transfer>) {}

    fn register(&mut self, registrar: &mut Registrar<'_>) {
        registrar.publish(ports::TIME_SYNCHRONIZATION);
    }

    fn unregister(&mut self, registrar: &mut Registrar<'_>) {
        registrar.unpublish(ports::TIME_SYNCHRONIZATION);
    }
}

/// Slews the local RTC onto a time master's beacons.
pub struct ProcessTimeSyncTask<R: Rtc> {
    timing: Timing,
    inbox: Inbox<2>,
    rtc: R,
    /// Local tick at which the previous sync message was handled.
    previous_tick_ms: u32,
}

impl<R: Rtc> ProcessTimeSyncTask<R> {
    pub fn new(rtc: R, interval_ms: u32, shift_ms: u32) -> Self {
        Self {
            timing: Timing::new(interval_ms, shift_ms),
            inbox: Inbox::new(),
            rtc,
            previous_tick_ms: 0,
        }
    }
}

impl<R: Rtc, A: TransportSet> Task<A> for ProcessTimeSyncTask<R> {
    fn timing(&mut self) -> &mut Timing {
        &mut self.timing
    }

    fn service(&mut self, cx: &mut Context<'_, A>) {
        while let Some(transfer) = self.inbox.pop() {
            let sync = match TimeSynchronization::deserialize(&transfer.payload) {
                Ok(s) => s,
                Err(e) => {
                    log!(Severity::Error, "time sync: malformed payload ({e:?})");
                    continue;
                }
            };
            if sync.previous_transmission_timestamp_us == 0 {
                // Master's RTC was unreadable for that beacon.
                continue;
            }

            let previous_tick = self.previous_tick_ms;
            self.previous_tick_ms = cx.now_ms;
            if previous_tick == 0 {
                // First observation only pairs the clocks.
                continue;
            }

            let elapsed_ms = cx.now_ms.wrapping_sub(previous_tick) as u64;
            let target_ms = sync.previous_transmission_timestamp_us / 1000 + elapsed_ms;
            if let Err(e) = timekeep::slew_to(&mut self.rtc, target_ms) {
                log!(Severity::Error, "time sync: slew failed ({e:?})");
            }
        }
    }

    fn handle_message(&mut self, transfer: Shared<Transfer>) {
        self.inbox.push(transfer);
    }

    fn register(&mut self, registrar: &mut Registrar<'_>) {
        registrar.subscribe(ports::TIME_SYNCHRONIZATION);
    }

    fn unregister(&mut self, registrar: &mut Registrar<'_>) {
        registrar.unsubscribe(ports::TIME_SYNCHRONIZATION);
        self.inbox.clear();
    }
}
