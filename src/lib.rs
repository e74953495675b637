//! # Frame Logger
//!
//! A structured binary logging substrate for hot paths:
//!
//! * **Cheap log calls**: one atomic add to reserve a frame, no locks, no
//!   format strings on the wire
//! * **Self-describing frames**: every argument carries a kind tag, and every
//!   call site registers its schema once
//! * **Crash recovery**: the whole history stays in memory and can be
//!   exported, live or from a crash handler, as one image
//!
//! ## Main Components
//!
//! * `loggable`: argument kinds and their wire encoding
//! * `log_format_registry`: per-call-site schema identities
//! * `string_registry`, `source_location`: interning side-channels
//! * `frame_store`: the lock-free buffer chain frames are written to
//! * `disabler`: per-path switches for the text rendering
//! * `log_reader`, `image`: decoding and storing exported images
//!
//! ## Quick Start
//!
//! ```
//! use frame_logger::{log_info, log_warn, LogReader};
//!
//! let port = 8080u16;
//! log_info!("server.listening", port = port);
//! log_warn!("server.slow_request", millis = 1500u32, route = "/health");
//!
//! let image = frame_logger::capture_image();
//! let replay = LogReader::read_all(&image).unwrap();
//! let entry = replay.entries_with_path("server.listening").next().unwrap();
//! assert_eq!(entry.value("port").and_then(|v| v.as_u64()), Some(8080));
//! ```

pub mod binary_logger;
pub mod config;
pub mod disabler;
pub mod efficient_clock;
pub mod error;
pub mod fatal;
pub mod frame_store;
pub mod image;
pub mod level;
pub mod log_format_registry;
pub mod log_reader;
pub mod loggable;
pub mod source_location;
pub mod string_registry;
pub mod text_sink;

use std::io;
use std::sync::Arc;

pub use binary_logger::{encode_frame, log_call, try_log_call};
pub use config::LoggerConfig;
pub use error::{ReplayError, ReserveError};
pub use fatal::{fatal, require};
pub use frame_store::{capture_image, crashdump_data, iterate_frames, FrameStore, LogCookie};
pub use level::Level;
pub use log_reader::{LogEntry, LogReader, LogValue, Replay};
pub use loggable::{Fallback, Handle, Loggable};
pub use source_location::{lookup_source_location, SourceLocation};
pub use string_registry::{get_string, register_string, InternedStr};
pub use text_sink::{FileSink, MemorySink, StdoutSink, TextSink};

/// Installs the text sinks and loads the disabler file named by `config`.
///
/// Logging works without this; it then renders to stdout only and nothing
/// is disabled.
pub fn init_log(config: &LoggerConfig) -> io::Result<()> {
    let mut sinks: Vec<Arc<dyn TextSink>> = Vec::new();
    if config.echo_stdout {
        sinks.push(Arc::new(StdoutSink));
    }
    if let Some(path) = &config.text_file {
        sinks.push(Arc::new(FileSink::create(path)?));
    }
    text_sink::set_text_sinks(sinks);

    disabler::global().load_file(&config.disabler_file)?;
    tracing::debug!(?config, "frame logger initialized");
    Ok(())
}

/// Initialize internal tracing for the crate's own diagnostics.
///
/// `RUST_LOG` takes precedence; otherwise `verbose` selects debug-level
/// output and the default is warnings only.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr)
                .compact(),
        )
        .with(filter)
        .try_init();
}
