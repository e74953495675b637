//! The write path of a log call.
//!
//! Every log macro expands to a `static` [`CallSite`] and one call to
//! [`log_call`]. The call:
//!
//! 1. Resolves the call site's schema identity (registered once, then cached
//!    in the call site)
//! 2. Measures the encoded arguments with a counting pass
//! 3. Reserves exactly that many bytes, padded to 8, in the frame store
//! 4. Encodes the arguments into the reservation and publishes the frame
//! 5. Renders a text line, unless the call site is disabled
//!
//! Steps 2 to 4 never take a lock. Interned values register themselves during
//! the counting pass, so their registration frames always precede the first
//! frame that refers to them.

use std::fmt::Write as _;

use crate::efficient_clock::{now_micros, split_micros};
use crate::error::ReserveError;
use crate::fatal::{fatal, require};
use crate::frame_store::{self, FrameStore, LogCookie};
use crate::log_format_registry::{CallSite, FATAL_SITE};
use crate::loggable::{encoded_len, padded_len, ArgList, SliceSink};
use crate::text_sink;

/// A frame that was written to a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedFrame {
    pub cookie: LogCookie,
    pub timestamp: u64,
}

/// Encodes `args` as one frame in `store`.
///
/// # Arguments
///
/// * `store` - The frame store to write to
/// * `schema` - Schema identity of the frame
/// * `args` - The argument tuple
///
/// # Returns
///
/// The cookie and timestamp of the new frame, or why it could not be
/// reserved. The timestamp is taken after the counting pass, so frames
/// emitted while measuring (registrations) carry earlier timestamps.
pub fn encode_frame<L: ArgList>(
    store: &FrameStore,
    schema: u32,
    args: &L,
) -> Result<EncodedFrame, ReserveError> {
    let len = encoded_len(args);
    let timestamp = now_micros();
    let mut reservation = store.try_reserve(padded_len(len), schema, timestamp)?;

    let mut sink = SliceSink::new(reservation.payload_mut());
    args.write_all(&mut sink);
    let written = sink.position();
    sink.pad();
    require(written == len, "argument encoding changed size between passes");

    Ok(EncodedFrame {
        cookie: reservation.commit(),
        timestamp,
    })
}

/// Writes one frame for `site` to the global store and renders its text
/// line. Failure to reserve the frame is fatal.
///
/// This is what the log macros call; use it directly only with a `static`
/// call site.
#[inline]
pub fn log_call<L: ArgList>(site: &'static CallSite, args: &L) -> LogCookie {
    match try_log_call(site, args) {
        Ok(cookie) => cookie,
        Err(err) => fatal(&format!("cannot log {}: {}", site.path(), err)),
    }
}

/// [`log_call`] returning reservation errors instead of aborting.
pub fn try_log_call<L: ArgList>(
    site: &'static CallSite,
    args: &L,
) -> Result<LogCookie, ReserveError> {
    let schema = site.resolve::<L>();
    let frame = encode_frame(frame_store::global(), schema, args)?;
    if site.should_render() {
        render_line(site, frame, args);
    }
    Ok(frame.cookie)
}

/// Formats the text rendering of a frame.
///
/// `[<secs>.<micros> <cookie>] <level> <path>: name = value, ...`
pub fn format_line<L: ArgList>(site: &CallSite, frame: EncodedFrame, args: &L) -> String {
    let (secs, micros) = split_micros(frame.timestamp);
    let mut line = String::with_capacity(64);
    let _ = write!(
        line,
        "[{}.{:06} {}] {} {}: ",
        secs,
        micros,
        frame.cookie,
        site.level(),
        site.path()
    );
    args.render_all(site.names(), &mut line);
    line
}

#[cold]
fn render_line<L: ArgList>(site: &CallSite, frame: EncodedFrame, args: &L) {
    text_sink::append_line(&format_line(site, frame, args));
}

/// Best-effort `fatal` frame; errors are ignored since the process is about
/// to abort anyway.
pub(crate) fn log_fatal_frame(message: &str, location: &str) {
    let _ = try_log_call(&FATAL_SITE, &(&message, &location));
}

/// Logs a structured message at the given level.
///
/// The path is a dotted message path checked at compile time; arguments are
/// `name = value` pairs whose types implement
/// [`Loggable`](crate::loggable::Loggable). Returns the frame's
/// [`LogCookie`](crate::frame_store::LogCookie).
///
/// # Examples
///
/// ```
/// use frame_logger::{level::Level, log_record};
///
/// let port = 8080u16;
/// let host = "db-1";
/// let cookie = log_record!(Level::Info, "net.tcp.connected", port = port, host = host);
/// assert_ne!(cookie.0, 0);
///
/// // No arguments
/// log_record!(Level::Debug, "net.tcp.idle");
/// ```
#[macro_export]
macro_rules! log_record {
    ($level:expr, $path:literal $(, $name:ident = $value:expr)* $(,)?) => {{
        const _: () = ::core::assert!(
            $crate::log_format_registry::validate_path($path),
            "malformed log message path"
        );
        static CALL_SITE: $crate::log_format_registry::CallSite =
            $crate::log_format_registry::CallSite::new(
                $level,
                $path,
                &[$(::core::stringify!($name)),*],
            );
        $crate::binary_logger::log_call(&CALL_SITE, &($(&$value,)*))
    }};
}

#[macro_export]
macro_rules! log_trace {
    ($path:literal $($args:tt)*) => {
        $crate::log_record!($crate::level::Level::Trace, $path $($args)*)
    };
}

#[macro_export]
macro_rules! log_debug {
    ($path:literal $($args:tt)*) => {
        $crate::log_record!($crate::level::Level::Debug, $path $($args)*)
    };
}

#[macro_export]
macro_rules! log_info {
    ($path:literal $($args:tt)*) => {
        $crate::log_record!($crate::level::Level::Info, $path $($args)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($path:literal $($args:tt)*) => {
        $crate::log_record!($crate::level::Level::Warn, $path $($args)*)
    };
}

#[macro_export]
macro_rules! log_error {
    ($path:literal $($args:tt)*) => {
        $crate::log_record!($crate::level::Level::Error, $path $($args)*)
    };
}

/// Binary-only message: written to the frame store, never rendered.
#[macro_export]
macro_rules! log_internal {
    ($path:literal $($args:tt)*) => {
        $crate::log_record!($crate::level::Level::Internal, $path $($args)*)
    };
}

/// Logs the message and aborts the process.
#[macro_export]
macro_rules! log_fatal {
    ($path:literal $($args:tt)*) => {{
        $crate::log_record!($crate::level::Level::Fatal, $path $($args)*);
        $crate::fatal::fatal(::core::concat!("fatal log message ", $path))
    }};
}
