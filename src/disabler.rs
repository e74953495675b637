//! Per-call-site disable flags keyed by dotted message path.
//!
//! Every call site owns one flag. It is registered under each dotted prefix
//! of its path, the full path and `*`, so switching a key is a single map
//! lookup however many call sites share it. Disabling a call site only stops
//! its text rendering; the binary frame is still written.
//!
//! Configuration lines look like:
//!
//! ```text
//! # comment
//! net.tcp              # disable net.tcp and everything under it
//! net.tcp.connected = on
//! *                    # disable every suppressible message
//! ```
//!
//! The value, when present, is whether the message is logged (`on`/`off`,
//! `enabled`/`disabled`, `true`/`false`). Later lines override earlier ones.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::config::parse_switch;
use crate::fatal::fatal;
use crate::log_format_registry::validate_path;

/// Key matching every registered flag.
pub const WILDCARD: &str = "*";

#[derive(Default)]
struct DisablerTable {
    flags: HashMap<String, Vec<&'static AtomicBool>>,
    // Every assignment seen so far, replayed onto flags registered later.
    assignments: Vec<(String, bool)>,
}

/// Registry of disable flags.
#[derive(Default)]
pub struct DisablerRegistry {
    table: Mutex<DisablerTable>,
}

fn key_matches(key: &str, path: &str) -> bool {
    key == WILDCARD
        || path == key
        || (path.len() > key.len() && path.starts_with(key) && path.as_bytes()[key.len()] == b'.')
}

fn valid_key(key: &str) -> bool {
    key == WILDCARD || validate_path(key)
}

impl DisablerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `flag` under every prefix of `path`, `path` itself and `*`,
    /// then applies any assignments already loaded for those keys.
    ///
    /// A malformed path is fatal.
    pub fn add_disabler(&self, path: &str, flag: &'static AtomicBool) {
        if !validate_path(path) {
            fatal(&format!("malformed log message path {:?}", path));
        }

        let mut table = self.table.lock();
        for (index, byte) in path.bytes().enumerate() {
            if byte == b'.' {
                table.flags.entry(path[..index].to_string()).or_default().push(flag);
            }
        }
        table.flags.entry(path.to_string()).or_default().push(flag);
        table.flags.entry(WILDCARD.to_string()).or_default().push(flag);

        for (key, disabled) in &table.assignments {
            if key_matches(key, path) {
                flag.store(*disabled, Ordering::Relaxed);
            }
        }
    }

    /// Sets every flag registered under `key`. Returns `false` for a
    /// malformed key.
    pub fn set_disabled(&self, key: &str, disabled: bool) -> bool {
        if !valid_key(key) {
            return false;
        }
        let mut table = self.table.lock();
        if let Some(flags) = table.flags.get(key) {
            for flag in flags {
                flag.store(disabled, Ordering::Relaxed);
            }
        }
        table.assignments.push((key.to_string(), disabled));
        true
    }

    pub fn disable(&self, key: &str) -> bool {
        self.set_disabled(key, true)
    }

    pub fn enable(&self, key: &str) -> bool {
        self.set_disabled(key, false)
    }

    /// Applies configuration text. Malformed lines are skipped with a
    /// warning. Returns the number of assignments applied.
    pub fn load(&self, text: &str) -> usize {
        text.lines()
            .enumerate()
            .filter(|(number, line)| self.apply_line(number + 1, line))
            .count()
    }

    /// Like [`load`](Self::load), reading lines from `reader`.
    pub fn load_reader<R: BufRead>(&self, reader: R) -> io::Result<usize> {
        let mut applied = 0;
        for (number, line) in reader.lines().enumerate() {
            if self.apply_line(number + 1, &line?) {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Loads a configuration file. An absent file leaves everything enabled.
    pub fn load_file(&self, path: &Path) -> io::Result<usize> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no disabler file");
                return Ok(0);
            }
            Err(err) => return Err(err),
        };
        let applied = self.load_reader(BufReader::new(file))?;
        tracing::info!(path = %path.display(), applied, "loaded disabler file");
        Ok(applied)
    }

    fn apply_line(&self, number: usize, line: &str) -> bool {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            return false;
        }

        let (key, disabled) = match line.split_once('=') {
            Some((key, value)) => match parse_switch(value) {
                Some(logged) => (key.trim(), !logged),
                None => {
                    tracing::warn!(line = number, value = value.trim(), "bad disabler value");
                    return false;
                }
            },
            None => (line, true),
        };

        if !self.set_disabled(key, disabled) {
            tracing::warn!(line = number, key, "bad disabler path");
            return false;
        }
        true
    }

    /// Number of flags registered directly under `key`.
    pub fn registered(&self, key: &str) -> usize {
        self.table.lock().flags.get(key).map_or(0, Vec::len)
    }
}

lazy_static! {
    static ref DISABLERS: DisablerRegistry = DisablerRegistry::new();
}

/// The process-wide registry used by call sites.
pub fn global() -> &'static DisablerRegistry {
    &DISABLERS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leak_flag() -> &'static AtomicBool {
        Box::leak(Box::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_prefix_registration() {
        let registry = DisablerRegistry::new();
        let flag = leak_flag();
        registry.add_disabler("a.b.c", flag);
        assert_eq!(registry.registered("a"), 1);
        assert_eq!(registry.registered("a.b"), 1);
        assert_eq!(registry.registered("a.b.c"), 1);
        assert_eq!(registry.registered("*"), 1);
        assert_eq!(registry.registered("a.b.c.d"), 0);
        assert_eq!(registry.registered("b"), 0);
    }

    #[test]
    fn test_prefix_disables_children_only() {
        let registry = DisablerRegistry::new();
        let abc = leak_flag();
        let ax = leak_flag();
        let abx = leak_flag();
        registry.add_disabler("a.b.c", abc);
        registry.add_disabler("a.x", ax);
        registry.add_disabler("a.bx", abx);

        assert_eq!(registry.load("a.b\n"), 1);
        assert!(abc.load(Ordering::Relaxed));
        assert!(!ax.load(Ordering::Relaxed));
        assert!(!abx.load(Ordering::Relaxed));
    }

    #[test]
    fn test_later_lines_override() {
        let registry = DisablerRegistry::new();
        let flag = leak_flag();
        registry.add_disabler("net.tcp.connected", flag);

        registry.load("*\nnet.tcp.connected = on\n");
        assert!(!flag.load(Ordering::Relaxed));

        registry.load("net = off");
        assert!(flag.load(Ordering::Relaxed));
    }

    #[test]
    fn test_late_registration_gets_remembered_assignments() {
        let registry = DisablerRegistry::new();
        registry.load("gpu\ngpu.queue.full = enabled\n");

        let empty = leak_flag();
        let full = leak_flag();
        let other = leak_flag();
        registry.add_disabler("gpu.queue.empty", empty);
        registry.add_disabler("gpu.queue.full", full);
        registry.add_disabler("cpu.idle", other);

        assert!(empty.load(Ordering::Relaxed));
        assert!(!full.load(Ordering::Relaxed));
        assert!(!other.load(Ordering::Relaxed));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let registry = DisablerRegistry::new();
        let flag = leak_flag();
        registry.add_disabler("disk.write", flag);

        let applied = registry.load("# only comments\n\nbad path\ndisk..write\ndisk = sometimes\n");
        assert_eq!(applied, 0);
        assert!(!flag.load(Ordering::Relaxed));

        assert_eq!(registry.load("disk.write   # trailing comment"), 1);
        assert!(flag.load(Ordering::Relaxed));
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let registry = DisablerRegistry::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let applied = registry
            .load_file(&dir.path().join("nolog.txt"))
            .expect("missing file is fine");
        assert_eq!(applied, 0);
    }

    #[test]
    fn test_load_file() {
        let registry = DisablerRegistry::new();
        let flag = leak_flag();
        registry.add_disabler("io.read", flag);

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nolog.txt");
        std::fs::write(&path, "io.read\n").expect("write config");
        assert_eq!(registry.load_file(&path).expect("load"), 1);
        assert!(flag.load(Ordering::Relaxed));
    }

    #[test]
    fn test_key_matching() {
        assert!(key_matches("*", "a.b"));
        assert!(key_matches("a", "a.b"));
        assert!(key_matches("a.b", "a.b"));
        assert!(!key_matches("a.b", "a.bc"));
        assert!(!key_matches("a.b.c", "a.b"));
    }
}
