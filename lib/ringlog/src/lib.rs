// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Severity-tagged log ring for the flight runtime.
//!
//! Log records are formatted into fixed-size slots in a static ring rather
//! than written to a device at the call site: the logger must be callable
//! from interrupt context and from the middle of the transmit path without
//! blocking or allocating. Sinks run later and elsewhere -- the housekeeping
//! task drains the ring into diagnostic-record publications, and hosted
//! builds can mirror records to stderr as they arrive.
//!
//! Severities follow the diagnostic severity scale (0 = trace .. 7 = alert)
//! so a record maps onto the wire without translation. Per-severity
//! counters survive ring wrap, so "has this ever warned" stays answerable
//! after the text is gone.
//!
//! Records that do not fit (ring full before a drain) are counted and
//! discarded oldest-first; text longer than a slot is truncated. Both are
//! deliberate: the log is an aid, never a reason to stall the loop.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

use core::cell::RefCell;
use core::fmt::{self, Write as _};
use critical_section::Mutex;
use num_derive::FromPrimitive;

/// Diagnostic severity, numerically equal to the wire encoding.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, FromPrimitive)]
#[repr(u8)]
pub enum Severity {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Notice = 3,
    Warning = 4,
    Error = 5,
    Critical = 6,
    Alert = 7,
}

pub const NUM_SEVERITIES: usize = 8;

/// Characters of text kept per record; longer messages truncate.
pub const TEXT_CAPACITY: usize = 96;

/// Records retained between drains.
pub const RING_CAPACITY: usize = 16;

#[derive(Clone, Debug)]
pub struct Record {
    pub severity: Severity,
    pub text: heapless::String<TEXT_CAPACITY>,
}

struct Ring {
    records: heapless::Deque<Record, RING_CAPACITY>,
    counters: [u32; NUM_SEVERITIES],
    overwritten: u32,
    min_severity: Severity,
}

static RING: Mutex<RefCell<Ring>> = Mutex::new(RefCell::new(Ring {
    records: heapless::Deque::new(),
    counters: [0; NUM_SEVERITIES],
    overwritten: 0,
    min_severity: Severity::Debug,
}));

#[cfg(feature = "std")]
static STDERR_MIRROR: core::sync::atomic::AtomicBool =
    core::sync::atomic::AtomicBool::new(false);

/// Formatter that silently truncates once the slot is full.
struct Truncating<'a>(&'a mut heapless::String<TEXT_CAPACITY>);

impl fmt::Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Records one formatted message. Use through the [`log!`] macro.
pub fn log_record(severity: Severity, args: fmt::Arguments<'_>) {
    critical_section::with(|cs| {
        let mut ring = RING.borrow_ref_mut(cs);
        ring.counters[severity as usize] = ring.counters[severity as usize].wrapping_add(1);
        if severity < ring.min_severity {
            return;
        }
        let mut text = heapless::String::new();
        let _ = Truncating(&mut text).write_fmt(args);

        #[cfg(feature = "std")]
        if STDERR_MIRROR.load(core::sync::atomic::Ordering::Relaxed) {
            eprintln!("[{severity:?}] {text}");
        }

        if ring.records.is_full() {
            ring.records.pop_front();
            ring.overwritten = ring.overwritten.wrapping_add(1);
        }
        let _ = ring.records.push_back(Record { severity, text });
    });
}

#[macro_export]
macro_rules! log {
    ($severity:expr, $($arg:tt)*) => {
        $crate::log_record($severity, core::format_args!($($arg)*))
    };
}

/// Raises or lowers the retention threshold. Counters keep counting below
/// the threshold; only record storage is filtered.
pub fn set_min_severity(severity: Severity) {
    critical_section::with(|cs| {
        RING.borrow_ref_mut(cs).min_severity = severity;
    });
}

/// Pops the oldest retained record, if any. Sinks call this in a loop.
pub fn drain_one() -> Option<Record> {
    critical_section::with(|cs| RING.borrow_ref_mut(cs).records.pop_front())
}

/// Total records seen per severity since boot, including filtered and
/// overwritten ones.
pub fn counters() -> [u32; NUM_SEVERITIES] {
    critical_section::with(|cs| RING.borrow_ref(cs).counters)
}

/// Records lost to ring wrap since boot.
pub fn overwritten() -> u32 {
    critical_section::with(|cs| RING.borrow_ref(cs).overwritten)
}

/// Mirror records to stderr as they are logged (ground bench only).
#[cfg(feature = "std")]
pub fn enable_stderr_mirror() {
    STDERR_MIRROR.store(true, core::sync::atomic::Ordering::Relaxed);
}
