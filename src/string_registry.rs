//! String interning for the binary log.
//!
//! Interned strings are written to frames as a 64-bit identity. The first
//! time an identity is logged, one `string_cache` frame carrying the identity
//! and the text is emitted, so a replay consumer can rebuild the mapping from
//! the log alone.
//!
//! # Thread Safety
//!
//! Both tables are read-mostly: lookups take a shared lock, and the exclusive
//! lock is only taken on a genuine miss, with the lookup repeated after it is
//! acquired. That re-check is what guarantees a single registration frame per
//! string when many threads see the same string for the first time at once.

use std::collections::{HashMap, HashSet};
use std::fmt;

use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::binary_logger::log_call;
use crate::log_format_registry::STRING_CACHE_SITE;
use crate::loggable::{ArgKind, ByteSink, Loggable};

struct StringTable {
    by_text: HashMap<&'static str, u64>,
    by_id: Vec<&'static str>,
}

impl StringTable {
    fn new() -> Self {
        // Identity 0 is the empty string.
        let mut by_text = HashMap::new();
        by_text.insert("", 0);
        Self {
            by_text,
            by_id: vec![""],
        }
    }
}

lazy_static! {
    /// Text → identity, plus the reverse mapping indexed by identity.
    static ref STRING_TABLE: RwLock<StringTable> = RwLock::new(StringTable::new());

    /// Identities that already have a registration frame in the log.
    static ref ANNOUNCED: RwLock<HashSet<u64>> = RwLock::new(HashSet::new());
}

/// Interns `s` and returns its identity.
///
/// The same text always yields the same identity for the life of the process.
/// Interning alone writes nothing to the log.
///
/// # Examples
///
/// ```
/// # use frame_logger::string_registry::register_string;
/// let id1 = register_string("Hello, world!");
/// let id2 = register_string("Hello, world!");
/// assert_eq!(id1, id2);
///
/// let id3 = register_string("Different message");
/// assert_ne!(id1, id3);
/// ```
pub fn register_string(s: &str) -> u64 {
    intern(s).0
}

fn intern(s: &str) -> (u64, &'static str) {
    {
        let table = STRING_TABLE.read();
        if let Some((&text, &id)) = table.by_text.get_key_value(s) {
            return (id, text);
        }
    }

    let mut table = STRING_TABLE.write();
    if let Some((&text, &id)) = table.by_text.get_key_value(s) {
        return (id, text);
    }
    let text: &'static str = Box::leak(s.to_owned().into_boxed_str());
    let id = table.by_id.len() as u64;
    table.by_id.push(text);
    table.by_text.insert(text, id);
    (id, text)
}

/// Looks up the text of an interned identity.
///
/// ```
/// # use frame_logger::string_registry::{register_string, get_string};
/// let id = register_string("Temperature alert");
/// assert_eq!(get_string(id), Some("Temperature alert"));
/// assert_eq!(get_string(u64::MAX), None);
/// ```
pub fn get_string(id: u64) -> Option<&'static str> {
    let table = STRING_TABLE.read();
    usize::try_from(id)
        .ok()
        .and_then(|index| table.by_id.get(index).copied())
}

/// Emits the `string_cache` frame for `id` unless one was already emitted.
fn announce(id: u64, text: &'static str) {
    if id == 0 || ANNOUNCED.read().contains(&id) {
        return;
    }

    let mut announced = ANNOUNCED.write();
    if announced.contains(&id) {
        return;
    }
    log_call(&STRING_CACHE_SITE, &(&id, &text));
    announced.insert(id);
}

/// A handle to an interned string.
///
/// Cheap to copy and compare; logging it costs eight bytes after the first
/// time.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InternedStr {
    id: u64,
    text: &'static str,
}

impl InternedStr {
    pub fn new(text: &str) -> Self {
        let (id, text) = intern(text);
        Self { id, text }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn as_str(&self) -> &'static str {
        self.text
    }
}

impl fmt::Debug for InternedStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InternedStr({}, {:?})", self.id, self.text)
    }
}

impl fmt::Display for InternedStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text)
    }
}

impl Loggable for InternedStr {
    const KIND: ArgKind = ArgKind::CachedString;

    // Registration happens during the counting pass, before the frame that
    // refers to it is reserved.
    #[inline]
    fn write<S: ByteSink>(&self, sink: &mut S) {
        announce(self.id, self.text);
        sink.put_u64(self.id);
    }

    fn render(&self, out: &mut String) {
        self.text.render(out)
    }
}
