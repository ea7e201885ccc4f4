// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Orbit propagation task: TLEs in, position/velocity out.
//!
//! The task is a two-state machine. With no element set loaded it only
//! drains its inbox waiting for a TLE message; once one initializes, every
//! tick reads the RTC, propagates to the current wall-clock time, and
//! publishes the state vector (metres and metres/second, TEME) with the
//! wall-clock timestamp. A newer TLE always wins -- re-initialization is
//! cheap and the uplink may send corrections at any time.
//!
//! A propagator error (decay, out-of-range elements) drops the task back
//! to the no-TLE state; it resumes on the next good element set. An
//! unreadable RTC skips the tick -- publishing a state vector against a
//! made-up time would be worse than silence.

#![cfg_attr(not(test), no_std)]

use cyphal::{ports, Transfer, TransportSet};
use dsdl::{sat, DataType};
use o1heap::Shared;
use ringlog::{log, Severity};
use sched::{Context, Inbox, Publication, Registrar, Task, Timing};
use sgp4::{Elements, Propagator};
use timekeep::Rtc;

pub const INBOX_CAPACITY: usize = 4;

fn elements_from_message(msg: &sat::Tle) -> Elements {
    Elements {
        satellite_number: msg.satellite_number,
        element_number: msg.element_number,
        ephemeris_type: msg.ephemeris_type,
        epoch_year: msg.epoch_year,
        epoch_day: msg.epoch_day,
        mean_motion_dot: msg.mean_motion_dot,
        mean_motion_ddot: msg.mean_motion_ddot,
        bstar_drag: msg.bstar_drag,
        inclination_deg: msg.inclination_deg,
        raan_deg: msg.raan_deg,
        eccentricity: msg.eccentricity,
        argument_of_perigee_deg: msg.argument_of_perigee_deg,
        mean_anomaly_deg: msg.mean_anomaly_deg,
        mean_motion_rev_per_day: msg.mean_motion_rev_per_day,
        revolution_number_at_epoch: msg.revolution_number_at_epoch,
    }
}

struct Loaded {
    elements: Elements,
    propagator: Propagator,
    epoch_ms: u64,
}

pub struct Sgp4Task<R: Rtc> {
    timing: Timing,
    publication: Publication,
    inbox: Inbox<INBOX_CAPACITY>,
    rtc: R,
    loaded: Option<Loaded>,
}

impl<R: Rtc> Sgp4Task<R> {
    pub fn new(rtc: R, interval_ms: u32, shift_ms: u32, transfer_id: u8) -> Self {
        Self {
            timing: Timing::new(interval_ms, shift_ms),
            publication: Publication::new(transfer_id),
            inbox: Inbox::new(),
            rtc,
            loaded: None,
        }
    }

    /// Currently loaded element set, if any.
    pub fn elements(&self) -> Option<&Elements> {
        self.loaded.as_ref().map(|l| &l.elements)
    }

    /// Installs an element set, replacing whatever was loaded. Returns
    /// false (and clears the state) if the propagator rejects it.
    pub fn set_elements(&mut self, elements: Elements) -> bool {
        match Propagator::new(&elements) {
            Ok(propagator) => {
                let epoch_ms = timekeep::tle_epoch_ms(elements.epoch_year, elements.epoch_day);
                self.loaded = Some(Loaded {
                    elements,
                    propagator,
                    epoch_ms,
                });
                true
            }
            Err(e) => {
                log!(
                    Severity::Error,
                    "sgp4: element set {} rejected ({e:?})",
                    elements.satellite_number
                );
                self.loaded = None;
                false
            }
        }
    }

    fn ingest_tle_messages(&mut self) {
        // Latest wins; earlier queued sets are superseded unread.
        let mut newest = None;
        while let Some(transfer) = self.inbox.pop() {
            newest = Some(transfer);
        }
        let Some(transfer) = newest else { return };
        match sat::Tle::deserialize(&transfer.payload) {
            Ok(msg) => {
                self.set_elements(elements_from_message(&msg));
            }
            Err(e) => {
                log!(Severity::Error, "sgp4: malformed TLE message ({e:?})");
            }
        }
    }
}

impl<R: Rtc, A: TransportSet> Task<A> for Sgp4Task<R> {
    fn timing(&mut self) -> &mut Timing {
        &mut self.timing
    }

    fn service(&mut self, cx: &mut Context<'_, A>) {
        self.ingest_tle_messages();

        let Some(loaded) = self.loaded.as_mut() else {
            return;
        };
        let now_ms = match self.rtc.read() {
            Ok(stamp) => timekeep::from_rtc(&stamp, self.rtc.synch_prediv()),
            Err(_) => {
                log!(Severity::Warning, "sgp4: rtc unreadable, skipping tick");
                return;
            }
        };

        let minutes = (now_ms as f64 - loaded.epoch_ms as f64) / 60_000.0;
        match loaded.propagator.propagate(minutes) {
            Ok(state) => {
                let data = sat::PositionVelocity {
                    timestamp_us: now_ms * 1000,
                    position_m: [
                        (state.position_km[0] * 1000.0) as f32,
                        (state.position_km[1] * 1000.0) as f32,
                        (state.position_km[2] * 1000.0) as f32,
                    ],
                    velocity_mps: [
                        (state.velocity_kmps[0] * 1000.0) as f32,
                        (state.velocity_kmps[1] * 1000.0) as f32,
                        (state.velocity_kmps[2] * 1000.0) as f32,
                    ],
                };
                self.publication
                    .publish(cx.adapters, ports::POSITION_VELOCITY, &data);
            }
            Err(e) => {
                log!(Severity::Error, "sgp4: propagation failed ({e:?}), dropping TLE");
                self.loaded = None;
            }
        }
    }

    fn handle_message(&mut self, transfer: Shared<Transfer>) {
        self.inbox.push(transfer);
    }

    fn register(&mut self, registrar: &mut Registrar<'_>) {
        registrar.subscribe(ports::TLE);
        registrar.publish(ports::POSITION_VELOCITY);
    }

    fn unregister(&mut self, registrar: &mut Registrar<'_>) {
        registrar.unsubscribe(ports::TLE);
        registrar.unpublish(ports::POSITION_VELOCITY);
        self.inbox.clear();
    }
}
