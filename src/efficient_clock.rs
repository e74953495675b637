//! Microsecond wall-clock timestamps for frames.
//!
//! The wall clock is sampled once; every later timestamp is that anchor plus
//! the elapsed time of a monotonic `Instant`, so stepping the system clock or
//! inserting a leap second never makes the log go backwards. Timestamps are
//! also strictly increasing process-wide: two log calls never share one, even
//! when they land in the same microsecond.
//!
//! That guarantee costs one shared atomic per frame. Threads only race on a
//! compare-exchange while the clock is ahead of the last timestamp; once a
//! burst outruns the clock, timestamps come from a single `fetch_add` and run
//! ahead of the wall clock by at most the burst length in microseconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;

struct Anchor {
    wall_micros: u64,
    instant: Instant,
}

lazy_static! {
    static ref ANCHOR: Anchor = Anchor {
        wall_micros: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_micros() as u64)
            .unwrap_or(0),
        instant: Instant::now(),
    };
}

static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

/// Returns the current time in microseconds since the Unix epoch.
///
/// Every call returns a value greater than the previous call from any thread.
///
/// # Examples
///
/// ```
/// # use frame_logger::efficient_clock::now_micros;
/// let a = now_micros();
/// let b = now_micros();
/// assert!(b > a);
/// ```
#[inline]
pub fn now_micros() -> u64 {
    let anchor = &*ANCHOR;
    let sample = anchor.wall_micros + anchor.instant.elapsed().as_micros() as u64;

    let mut last = LAST_TIMESTAMP.load(Ordering::Relaxed);
    while sample > last {
        match LAST_TIMESTAMP.compare_exchange_weak(last, sample, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return sample,
            Err(current) => last = current,
        }
    }
    // Clock has not moved past the last timestamp: take the next one.
    LAST_TIMESTAMP.fetch_add(1, Ordering::AcqRel) + 1
}

/// Converts a frame timestamp back into a `SystemTime`.
pub fn to_system_time(micros: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_micros(micros)
}

/// Splits a timestamp into whole seconds and the microsecond remainder.
#[inline]
pub const fn split_micros(micros: u64) -> (u64, u32) {
    (micros / 1_000_000, (micros % 1_000_000) as u32)
}
