//! Plain-text destinations for the human-readable rendering of log calls.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::{Mutex, RwLock};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// An append-only line destination.
pub trait TextSink: Send + Sync {
    /// Appends one line; `line` has no trailing newline.
    fn append_line(&self, line: &str);
}

/// Writes lines to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl TextSink for StdoutSink {
    fn append_line(&self, line: &str) {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        let _ = writeln!(handle, "{}", line);
    }
}

/// Appends lines to a file that is never rotated.
pub struct FileSink {
    writer: Mutex<RollingFileAppender>,
}

impl FileSink {
    /// Creates `path`, truncating an existing file.
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::File::create(path)?;
        Self::open(path)
    }

    /// Opens (or creates) `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a file path: {}", path.display()),
                )
            })?;
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(directory)?;

        let writer = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(file_name)
            .build(directory)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        Ok(Self {
            writer: Mutex::new(writer),
        })
    }
}

impl TextSink for FileSink {
    fn append_line(&self, line: &str) {
        let mut writer = self.writer.lock();
        let _ = writeln!(writer, "{}", line);
        let _ = writer.flush();
    }
}

/// Keeps lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Lines containing `needle`.
    pub fn matching(&self, needle: &str) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|line| line.contains(needle))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl TextSink for MemorySink {
    fn append_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

lazy_static! {
    static ref SINKS: RwLock<Vec<Arc<dyn TextSink>>> =
        RwLock::new(vec![Arc::new(StdoutSink) as Arc<dyn TextSink>]);
}

/// Adds a sink to the process-wide list.
pub fn add_text_sink(sink: Arc<dyn TextSink>) {
    SINKS.write().push(sink);
}

/// Replaces the process-wide sink list.
pub fn set_text_sinks(sinks: Vec<Arc<dyn TextSink>>) {
    *SINKS.write() = sinks;
}

/// Sends one line to every installed sink.
pub fn append_line(line: &str) {
    for sink in SINKS.read().iter() {
        sink.append_line(line);
    }
}
