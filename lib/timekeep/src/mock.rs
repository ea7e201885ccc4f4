// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory RTC for hosted tests.
//!
//! Behaves like the calendar peripheral the flight build talks to: `write`
//! lands on a whole second (the sub-second counter restarts), and only
//! `shift_subseconds` moves the fractional part. Time does not advance on
//! its own; tests set it where they need it.

use crate::{from_rtc, to_rtc, Rtc, RtcDateTime, RtcError};

pub struct MockRtc {
    prediv: u16,
    now_ms: u64,
    /// When set, `read` fails, exercising the zero-sentinel paths.
    pub fail_reads: bool,
}

impl MockRtc {
    pub fn new(prediv: u16, now_ms: u64) -> Self {
        Self {
            prediv,
            now_ms,
            fail_reads: false,
        }
    }

    pub fn set_epoch_ms(&mut self, ms: u64) {
        self.now_ms = ms;
    }

    pub fn epoch_ms(&self) -> u64 {
        self.now_ms
    }
}

impl Rtc for MockRtc {
    fn read(&mut self) -> Result<RtcDateTime, RtcError> {
        if self.fail_reads {
            return Err(RtcError::Unavailable);
        }
        to_rtc(self.now_ms, self.prediv)
    }

    fn write(&mut self, stamp: &RtcDateTime) -> Result<(), RtcError> {
        let mut whole = *stamp;
        whole.subseconds = self.prediv;
        self.now_ms = from_rtc(&whole, self.prediv);
        Ok(())
    }

    fn shift_subseconds(&mut self, add_second: bool, fraction: u16) -> Result<(), RtcError> {
        if add_second {
            self.now_ms += 1000;
        }
        let span = self.prediv as u64 + 1;
        self.now_ms += fraction as u64 * 1000 / span;
        Ok(())
    }

    fn synch_prediv(&self) -> u16 {
        self.prediv
    }
}
