//! Unrecoverable errors.
//!
//! A fatal error writes a best-effort `fatal` frame and text line, reports
//! through `tracing` and stderr, and aborts. Nested fatals (a fatal raised
//! while reporting another) skip straight to the abort.

use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};

static IN_FATAL: AtomicBool = AtomicBool::new(false);

/// Reports `message` and aborts the process.
///
/// Must not be called while holding a lock the logging path takes.
#[cold]
#[track_caller]
pub fn fatal(message: &str) -> ! {
    let caller = Location::caller();
    let location = format!("{}:{}", caller.file(), caller.line());

    if !IN_FATAL.swap(true, Ordering::SeqCst) {
        crate::binary_logger::log_fatal_frame(message, &location);
        tracing::error!(%location, "{}", message);
    }
    eprintln!("fatal error at {}: {}", location, message);
    std::process::abort()
}

/// Aborts with `message` unless `condition` holds.
#[inline]
#[track_caller]
pub fn require(condition: bool, message: &str) {
    if !condition {
        fatal(message)
    }
}

/// Whether a fatal error is being reported.
pub fn is_fatal_in_progress() -> bool {
    IN_FATAL.load(Ordering::Relaxed)
}
