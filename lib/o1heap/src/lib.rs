// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Constant-complexity heap for the flight runtime.
//!
//! This is the single source of dynamic memory on the spacecraft: transfer
//! payloads, reassembly buffers, and the boot-time task objects all come out
//! of one fixed pool managed here. The discipline is the classic half-fit
//! one: fragment sizes are powers of two, free fragments live in segregated
//! bins indexed by log2, and both `allocate` and `free` complete in a bounded
//! number of steps regardless of pool state.
//!
//! Two properties matter more than raw efficiency:
//!
//! 1. **Determinism.** No operation ever searches a list of unknown length.
//!    Worst-case fragmentation is bounded by the half-fit guarantee, so a
//!    pool sized for the worst case cannot run out at 3am over the pacific.
//! 2. **Interrupt safety.** The CAN receive path allocates from interrupt
//!    context. `allocate` and `free` therefore run inside a critical section;
//!    the `_unlocked` variants exist for callers that are already masked
//!    (the TX-complete callback draining the frame queue).
//!
//! Exhaustion is not an error condition worth halting for: `allocate`
//! returns `None`, the out-of-memory counter ticks up, and the caller drops
//! whatever message it was holding. The diagnostics tuple is published
//! periodically by the heap-monitor task so the ground can watch the
//! high-water mark.

#![cfg_attr(not(test), no_std)]

mod handles;

pub use handles::{Owned, Shared};

use core::cell::UnsafeCell;
use core::mem::{align_of, size_of};
use core::ptr::NonNull;

/// Alignment of every pointer returned by the heap: four machine words,
/// which covers the widest scalar (u64 / f64) on both the MCU target and
/// hosted test builds.
pub const ALIGNMENT: usize = size_of::<*mut ()>() * 4;

/// Smallest fragment the heap will track. One header plus an equal amount of
/// usable space.
const FRAGMENT_SIZE_MIN: usize = ALIGNMENT * 2;

/// Largest fragment size representable without overflowing the rounding
/// arithmetic.
const FRAGMENT_SIZE_MAX: usize = (usize::MAX >> 1) + 1;

const NUM_BINS: usize = usize::BITS as usize;

/// Counters exposed for the heap-monitor task and for tests.
///
/// `allocated`, `peak_allocated`, and `capacity` count whole fragments
/// (headers included), so after every matched allocate/free pair `allocated`
/// returns exactly to its prior value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Diagnostics {
    pub capacity: usize,
    pub allocated: usize,
    pub peak_allocated: usize,
    pub peak_request_size: usize,
    pub oom_count: u64,
}

#[repr(C)]
struct Fragment {
    /// Next fragment by address, or null at the pool end.
    next: *mut Fragment,
    /// Previous fragment by address, or null at the pool start.
    prev: *mut Fragment,
    /// Fragment size in bytes, header included. Always a multiple of
    /// `FRAGMENT_SIZE_MIN`.
    size: usize,
    used: bool,
    /// Doubly linked free list within this fragment's bin. Meaningless while
    /// `used` is set.
    next_free: *mut Fragment,
    prev_free: *mut Fragment,
}

// The free-list links must fit inside the smallest fragment along with the
// header fields.
const _: () = assert!(size_of::<Fragment>() <= FRAGMENT_SIZE_MIN);
const _: () = assert!(HEADER_SIZE.is_power_of_two());

/// Bytes of each fragment consumed by bookkeeping. The payload starts this
/// far past the fragment base.
const HEADER_SIZE: usize = ALIGNMENT;

struct Core {
    bins: [*mut Fragment; NUM_BINS],
    nonempty_bin_mask: usize,
    diag: Diagnostics,
}

/// The heap instance. Lives at the head of its own pool (see [`Heap::init`]),
/// so the handle type seen by the rest of the system is always
/// `&'static Heap`.
pub struct Heap {
    core: UnsafeCell<Core>,
}

// Shared across the ISR boundary; every access to `core` happens either
// inside `critical_section::with` or in a context that is already masked.
unsafe impl Sync for Heap {}

fn log2_floor(x: usize) -> usize {
    debug_assert!(x > 0);
    (usize::BITS - 1 - x.leading_zeros()) as usize
}

fn log2_ceil(x: usize) -> usize {
    debug_assert!(x > 0);
    if x.is_power_of_two() {
        log2_floor(x)
    } else {
        log2_floor(x) + 1
    }
}

impl Heap {
    /// Builds a heap inside `pool` and returns a reference to it. The
    /// instance itself occupies the first bytes of the pool; everything that
    /// remains (rounded to fragment granularity) becomes allocatable
    /// capacity.
    ///
    /// Returns `None` if the pool is too small to hold the instance plus one
    /// minimal fragment.
    pub fn init(pool: &'static mut [u8]) -> Option<&'static Heap> {
        let base = pool.as_mut_ptr() as usize;
        let end = base.checked_add(pool.len())?;

        let instance_at = round_up(base, align_of::<Heap>());
        let first_fragment = round_up(instance_at + size_of::<Heap>(), ALIGNMENT);
        if first_fragment >= end {
            return None;
        }
        let capacity = round_down(end - first_fragment, FRAGMENT_SIZE_MIN)
            .min(FRAGMENT_SIZE_MAX);
        if capacity < FRAGMENT_SIZE_MIN {
            return None;
        }

        // Safety: the range [instance_at, first_fragment + capacity) lies
        // inside `pool`, which we own exclusively and whose lifetime is
        // 'static.
        unsafe {
            let heap = instance_at as *mut Heap;
            heap.write(Heap {
                core: UnsafeCell::new(Core {
                    bins: [core::ptr::null_mut(); NUM_BINS],
                    nonempty_bin_mask: 0,
                    diag: Diagnostics {
                        capacity,
                        allocated: 0,
                        peak_allocated: 0,
                        peak_request_size: 0,
                        oom_count: 0,
                    },
                }),
            });

            let frag = first_fragment as *mut Fragment;
            (*frag).next = core::ptr::null_mut();
            (*frag).prev = core::ptr::null_mut();
            (*frag).size = capacity;
            (*frag).used = false;
            (*(*heap).core.get()).rebin(frag);

            Some(&*heap)
        }
    }

    /// Allocates at least `amount` bytes aligned to [`ALIGNMENT`], or `None`
    /// if the pool cannot satisfy the request. Interrupts that can reach the
    /// heap are masked for the duration.
    pub fn allocate(&self, amount: usize) -> Option<NonNull<u8>> {
        critical_section::with(|_| unsafe { self.allocate_unlocked(amount) })
    }

    /// Returns `ptr` (previously obtained from this heap) to the pool.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `allocate`/`allocate_unlocked` on this heap
    /// and must not be used afterwards.
    pub unsafe fn free(&self, ptr: NonNull<u8>) {
        critical_section::with(|_| self.free_unlocked(ptr));
    }

    /// `allocate` without the critical section, for callers that already run
    /// with the relevant interrupts masked.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that no other heap operation can preempt
    /// this one.
    pub unsafe fn allocate_unlocked(&self, amount: usize) -> Option<NonNull<u8>> {
        let core = &mut *self.core.get();
        core.allocate(amount)
    }

    /// `free` without the critical section. Same contract as [`Heap::free`]
    /// plus the masking requirement of [`Heap::allocate_unlocked`].
    ///
    /// # Safety
    ///
    /// See `free` and `allocate_unlocked`.
    pub unsafe fn free_unlocked(&self, ptr: NonNull<u8>) {
        let core = &mut *self.core.get();
        core.free(ptr);
    }

    pub fn diagnostics(&self) -> Diagnostics {
        critical_section::with(|_| unsafe { (*self.core.get()).diag })
    }

    /// Health predicate over the diagnostics. A `false` here means the heap
    /// state has been corrupted and nothing coming out of it can be trusted.
    pub fn invariants_hold(&self) -> bool {
        let d = self.diagnostics();
        let mut ok = d.capacity >= FRAGMENT_SIZE_MIN
            && d.capacity <= FRAGMENT_SIZE_MAX
            && d.capacity % FRAGMENT_SIZE_MIN == 0;
        ok = ok
            && d.allocated <= d.capacity
            && d.allocated % FRAGMENT_SIZE_MIN == 0
            && d.allocated <= d.peak_allocated
            && d.peak_allocated <= d.capacity;
        ok = ok
            && (d.peak_allocated == 0 || d.peak_request_size > 0)
            && (d.peak_request_size <= d.capacity || d.oom_count > 0);
        ok
    }
}

impl Core {
    fn allocate(&mut self, amount: usize) -> Option<NonNull<u8>> {
        if amount > 0 && amount > self.diag.peak_request_size {
            self.diag.peak_request_size = amount;
        }
        if amount == 0 || amount > self.diag.capacity.saturating_sub(HEADER_SIZE) {
            self.diag.oom_count += 1;
            return None;
        }

        // Half-fit: the served fragment size is the next power of two that
        // holds the request plus its header.
        let fragment_size = (amount + HEADER_SIZE)
            .max(FRAGMENT_SIZE_MIN)
            .next_power_of_two();
        let optimal_bin = log2_ceil(fragment_size / FRAGMENT_SIZE_MIN);
        let candidates = self.nonempty_bin_mask & (usize::MAX << optimal_bin);
        if candidates == 0 {
            self.diag.oom_count += 1;
            return None;
        }

        let bin = candidates.trailing_zeros() as usize;
        let frag = self.bins[bin];
        debug_assert!(!frag.is_null());

        unsafe {
            self.unbin(frag);

            // Split the leftover into its own free fragment. The leftover is
            // a multiple of the minimum by construction.
            let leftover = (*frag).size - fragment_size;
            (*frag).size = fragment_size;
            debug_assert!(leftover % FRAGMENT_SIZE_MIN == 0);
            if leftover > 0 {
                let new_frag = (frag as usize + fragment_size) as *mut Fragment;
                (*new_frag).size = leftover;
                (*new_frag).used = false;
                (*new_frag).prev = frag;
                (*new_frag).next = (*frag).next;
                if !(*new_frag).next.is_null() {
                    (*(*new_frag).next).prev = new_frag;
                }
                (*frag).next = new_frag;
                self.rebin(new_frag);
            }

            (*frag).used = true;
            self.diag.allocated += fragment_size;
            if self.diag.allocated > self.diag.peak_allocated {
                self.diag.peak_allocated = self.diag.allocated;
            }

            NonNull::new((frag as *mut u8).add(HEADER_SIZE))
        }
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>) {
        let frag = (ptr.as_ptr() as usize - HEADER_SIZE) as *mut Fragment;
        debug_assert!((*frag).used);
        debug_assert!((*frag).size >= FRAGMENT_SIZE_MIN);
        (*frag).used = false;
        debug_assert!(self.diag.allocated >= (*frag).size);
        self.diag.allocated -= (*frag).size;

        // Coalesce with the address-ordered neighbors, then rebin whatever
        // came out of the merge.
        let prev = (*frag).prev;
        let next = (*frag).next;
        let join_prev = !prev.is_null() && !(*prev).used;
        let join_next = !next.is_null() && !(*next).used;

        let merged = if join_prev {
            self.unbin(prev);
            (*prev).size += (*frag).size;
            (*prev).next = next;
            if !next.is_null() {
                (*next).prev = prev;
            }
            prev
        } else {
            frag
        };
        if join_next {
            self.unbin(next);
            (*merged).size += (*next).size;
            (*merged).next = (*next).next;
            if !(*merged).next.is_null() {
                (*(*merged).next).prev = merged;
            }
        }
        self.rebin(merged);
    }

    /// Inserts a free fragment at the head of its bin. The bin index is the
    /// floor log2 so a fragment is only ever handed out for requests it is
    /// guaranteed to satisfy.
    unsafe fn rebin(&mut self, frag: *mut Fragment) {
        let bin = log2_floor((*frag).size / FRAGMENT_SIZE_MIN);
        (*frag).next_free = self.bins[bin];
        (*frag).prev_free = core::ptr::null_mut();
        if !self.bins[bin].is_null() {
            (*self.bins[bin]).prev_free = frag;
        }
        self.bins[bin] = frag;
        self.nonempty_bin_mask |= 1 << bin;
    }

    unsafe fn unbin(&mut self, frag: *mut Fragment) {
        let bin = log2_floor((*frag).size / FRAGMENT_SIZE_MIN);
        if !(*frag).next_free.is_null() {
            (*(*frag).next_free).prev_free = (*frag).prev_free;
        }
        if !(*frag).prev_free.is_null() {
            (*(*frag).prev_free).next_free = (*frag).next_free;
        } else {
            self.bins[bin] = (*frag).next_free;
            if self.bins[bin].is_null() {
                self.nonempty_bin_mask &= !(1 << bin);
            }
        }
    }
}

fn round_up(x: usize, to: usize) -> usize {
    (x + to - 1) / to * to
}

fn round_down(x: usize, to: usize) -> usize {
    x / to * to
}
