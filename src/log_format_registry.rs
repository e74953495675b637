//! Call-site schema identities.
//!
//! A schema identity names one (level, dotted path, argument names, argument
//! kinds) combination. The path and names half is hashed at compile time by
//! the log macros; the kinds half is an associated constant of the argument
//! tuple type. Both are FNV-1a so the identity is stable across runs and
//! builds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::binary_logger::log_call;
use crate::fatal::fatal;
use crate::level::Level;
use crate::loggable::{ArgKind, ArgList};

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

const fn fnv1a(mut hash: u32, bytes: &[u8]) -> u32 {
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Validates a dotted message path: non-empty segments of ASCII letters,
/// digits, `_`, `-` or `:`.
#[doc(hidden)]
pub const fn validate_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    let mut i = 0;
    let mut segment_len = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c == b'.' {
            if segment_len == 0 {
                return false;
            }
            segment_len = 0;
        } else if c.is_ascii_alphanumeric() || c == b'_' || c == b'-' || c == b':' {
            segment_len += 1;
        } else {
            return false;
        }
        i += 1;
    }
    segment_len > 0
}

/// Hash of the textual half of a schema: level, path and argument names.
pub const fn site_hash(level: Level, path: &str, names: &[&str]) -> u32 {
    let mut hash = fnv1a(FNV_OFFSET, &[level.as_u8()]);
    hash = fnv1a(hash, path.as_bytes());
    let mut i = 0;
    while i < names.len() {
        hash = fnv1a(hash, &[0]);
        hash = fnv1a(hash, names[i].as_bytes());
        i += 1;
    }
    hash
}

/// Hash of the ordered argument kinds.
pub const fn kinds_hash(kinds: &[ArgKind]) -> u32 {
    let mut hash = FNV_OFFSET;
    let mut i = 0;
    while i < kinds.len() {
        hash = fnv1a(hash, &[kinds[i].tag()]);
        i += 1;
    }
    hash
}

/// Folds both halves into a schema identity. Never returns 0.
#[inline]
pub const fn combine(site: u32, kinds: u32) -> u32 {
    let id = fnv1a(site, &kinds.to_le_bytes());
    if id == 0 {
        1
    } else {
        id
    }
}

pub const fn schema_id(level: Level, path: &str, names: &[&str], kinds: &[ArgKind]) -> u32 {
    combine(site_hash(level, path, names), kinds_hash(kinds))
}

/// Renders argument names and kinds as `name:kind,name:kind`.
pub fn format_signature(names: &[&str], kinds: &[ArgKind]) -> String {
    names
        .iter()
        .zip(kinds)
        .map(|(name, kind)| format!("{}:{}", name, kind.name()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Inverse of [`format_signature`].
pub fn parse_signature(signature: &str) -> Option<Vec<(String, ArgKind)>> {
    if signature.is_empty() {
        return Some(Vec::new());
    }
    signature
        .split(',')
        .map(|pair| {
            let (name, kind) = pair.rsplit_once(':')?;
            Some((name.to_string(), ArgKind::from_name(kind)?))
        })
        .collect()
}

const SCHEMA_PATH: &str = "schema";
const SCHEMA_NAMES: &[&str] = &["index", "level", "path", "signature"];
const SCHEMA_KINDS: &[ArgKind] = &[ArgKind::U32, ArgKind::U8, ArgKind::Text, ArgKind::Text];

const SEGMENT_PATH: &str = "segment";
const SEGMENT_NAMES: &[&str] = &["segment"];
const SEGMENT_KINDS: &[ArgKind] = &[ArgKind::U64];

const STRING_CACHE_PATH: &str = "string_cache";
const STRING_CACHE_NAMES: &[&str] = &["index", "data"];
const STRING_CACHE_KINDS: &[ArgKind] = &[ArgKind::U64, ArgKind::Text];

const SOURCE_LOCATION_PATH: &str = "source_location";
const SOURCE_LOCATION_NAMES: &[&str] = &["index", "function_name", "file_name", "line", "column"];
const SOURCE_LOCATION_KINDS: &[ArgKind] = &[
    ArgKind::U32,
    ArgKind::Text,
    ArgKind::Text,
    ArgKind::U32,
    ArgKind::U32,
];

const FATAL_PATH: &str = "fatal";
const FATAL_NAMES: &[&str] = &["message", "location"];
const FATAL_KINDS: &[ArgKind] = &[ArgKind::Text, ArgKind::Text];

const PLATFORM_PATH: &str = "platform";
const PLATFORM_KINDS: &[ArgKind] = &[ArgKind::Blob];

/// Identity of schema registration frames.
pub const SCHEMA_REGISTRATION_ID: u32 =
    schema_id(Level::Internal, SCHEMA_PATH, SCHEMA_NAMES, SCHEMA_KINDS);
/// Identity of the address frame heading every buffer.
pub const SEGMENT_ID: u32 = schema_id(Level::Internal, SEGMENT_PATH, SEGMENT_NAMES, SEGMENT_KINDS);
pub const STRING_CACHE_ID: u32 = schema_id(
    Level::Internal,
    STRING_CACHE_PATH,
    STRING_CACHE_NAMES,
    STRING_CACHE_KINDS,
);
pub const SOURCE_LOCATION_ID: u32 = schema_id(
    Level::Internal,
    SOURCE_LOCATION_PATH,
    SOURCE_LOCATION_NAMES,
    SOURCE_LOCATION_KINDS,
);
pub const FATAL_ID: u32 = schema_id(Level::Error, FATAL_PATH, FATAL_NAMES, FATAL_KINDS);

/// Platform self-identification schema for a given OS name.
pub const fn platform_id(os: &str) -> u32 {
    schema_id(Level::Internal, PLATFORM_PATH, &[os], PLATFORM_KINDS)
}

/// Platform identity of the running process; also tags crashdump frames.
pub const PLATFORM_ID: u32 = platform_id(std::env::consts::OS);

pub static SCHEMA_SITE: CallSite =
    CallSite::bootstrap(Level::Internal, SCHEMA_PATH, SCHEMA_NAMES, SCHEMA_KINDS);
pub static STRING_CACHE_SITE: CallSite = CallSite::bootstrap(
    Level::Internal,
    STRING_CACHE_PATH,
    STRING_CACHE_NAMES,
    STRING_CACHE_KINDS,
);
pub static SOURCE_LOCATION_SITE: CallSite = CallSite::bootstrap(
    Level::Internal,
    SOURCE_LOCATION_PATH,
    SOURCE_LOCATION_NAMES,
    SOURCE_LOCATION_KINDS,
);
pub static FATAL_SITE: CallSite =
    CallSite::bootstrap(Level::Error, FATAL_PATH, FATAL_NAMES, FATAL_KINDS);

/// A schema known without a registration frame.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapSchema {
    pub id: u32,
    pub level: Level,
    pub path: &'static str,
    pub names: &'static [&'static str],
    pub kinds: &'static [ArgKind],
}

/// Every bootstrap schema a replay consumer must know up front.
pub fn bootstrap_schemas() -> Vec<BootstrapSchema> {
    let fixed = [
        (Level::Internal, SCHEMA_PATH, SCHEMA_NAMES, SCHEMA_KINDS),
        (Level::Internal, SEGMENT_PATH, SEGMENT_NAMES, SEGMENT_KINDS),
        (Level::Internal, STRING_CACHE_PATH, STRING_CACHE_NAMES, STRING_CACHE_KINDS),
        (
            Level::Internal,
            SOURCE_LOCATION_PATH,
            SOURCE_LOCATION_NAMES,
            SOURCE_LOCATION_KINDS,
        ),
        (Level::Error, FATAL_PATH, FATAL_NAMES, FATAL_KINDS),
    ];
    const PLATFORMS: &[&[&str]] = &[&["linux"], &["windows"], &["macos"], &["freebsd"]];

    let mut schemas: Vec<BootstrapSchema> = fixed
        .into_iter()
        .map(|(level, path, names, kinds)| BootstrapSchema {
            id: schema_id(level, path, names, kinds),
            level,
            path,
            names,
            kinds,
        })
        .collect();
    for &names in PLATFORMS {
        schemas.push(BootstrapSchema {
            id: schema_id(Level::Internal, PLATFORM_PATH, names, PLATFORM_KINDS),
            level: Level::Internal,
            path: PLATFORM_PATH,
            names,
            kinds: PLATFORM_KINDS,
        });
    }
    if !PLATFORMS.iter().any(|names| names[0] == std::env::consts::OS) {
        schemas.push(BootstrapSchema {
            id: PLATFORM_ID,
            level: Level::Internal,
            path: PLATFORM_PATH,
            names: &[std::env::consts::OS],
            kinds: PLATFORM_KINDS,
        });
    }
    schemas
}

/// Per-call-site state, one `static` per log macro expansion.
///
/// The identity is computed on first use and cached together with the kinds
/// hash it was computed for. A `static` inside a generic function is shared
/// by every instantiation, so a cached identity is only reused when the
/// argument kinds match; otherwise the site resolves again. The disable flag
/// lives here so the hot path never consults a table.
#[derive(Debug)]
pub struct CallSite {
    level: Level,
    path: &'static str,
    names: &'static [&'static str],
    site_hash: u32,
    // `kinds_hash << 32 | id`; 0 until first resolved.
    resolved: AtomicU64,
    disabler: AtomicU8,
    disabled: AtomicBool,
}

const DISABLER_UNCLAIMED: u8 = 0;
const DISABLER_CLAIMED: u8 = 1;
const DISABLER_READY: u8 = 2;

const fn pack(kinds_hash: u32, id: u32) -> u64 {
    ((kinds_hash as u64) << 32) | id as u64
}

impl CallSite {
    pub const fn new(level: Level, path: &'static str, names: &'static [&'static str]) -> Self {
        Self {
            level,
            path,
            names,
            site_hash: site_hash(level, path, names),
            resolved: AtomicU64::new(0),
            disabler: AtomicU8::new(DISABLER_UNCLAIMED),
            disabled: AtomicBool::new(false),
        }
    }

    /// A call site whose identity is fixed up front and never registered.
    pub const fn bootstrap(
        level: Level,
        path: &'static str,
        names: &'static [&'static str],
        kinds: &'static [ArgKind],
    ) -> Self {
        Self {
            level,
            path,
            names,
            site_hash: site_hash(level, path, names),
            resolved: AtomicU64::new(pack(kinds_hash(kinds), schema_id(level, path, names, kinds))),
            disabler: AtomicU8::new(DISABLER_READY),
            disabled: AtomicBool::new(false),
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn path(&self) -> &'static str {
        self.path
    }

    pub fn names(&self) -> &'static [&'static str] {
        self.names
    }

    /// Returns the schema identity for argument list `L`, registering it on
    /// first use.
    #[inline]
    pub fn resolve<L: ArgList>(&'static self) -> u32 {
        let resolved = self.resolved.load(Ordering::Acquire);
        if resolved != 0 && (resolved >> 32) as u32 == L::KINDS_HASH {
            return resolved as u32;
        }
        self.register_slow(L::KINDS_HASH, L::KINDS)
    }

    #[cold]
    fn register_slow(&'static self, kinds_hash: u32, kinds: &'static [ArgKind]) -> u32 {
        let id = combine(self.site_hash, kinds_hash);
        registry().register(self, id, kinds);
        self.claim_disabler();
        self.resolved.store(pack(kinds_hash, id), Ordering::Release);
        id
    }

    /// Registers the disable flag once. Returns only after the flag holds
    /// any remembered assignment for this path, so no call renders before
    /// its configuration applies.
    fn claim_disabler(&'static self) {
        match self.disabler.compare_exchange(
            DISABLER_UNCLAIMED,
            DISABLER_CLAIMED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                crate::disabler::global().add_disabler(self.path, &self.disabled);
                self.disabler.store(DISABLER_READY, Ordering::Release);
            }
            Err(_) => {
                while self.disabler.load(Ordering::Acquire) != DISABLER_READY {
                    std::thread::yield_now();
                }
            }
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    /// Whether this call site produces a text line.
    #[inline]
    pub fn should_render(&self) -> bool {
        self.level != Level::Internal && (!self.level.is_suppressible() || !self.is_disabled())
    }
}

/// A registered schema, as seen in-process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaEntry {
    pub level: Level,
    pub path: &'static str,
    pub names: &'static [&'static str],
    pub kinds: &'static [ArgKind],
}

impl SchemaEntry {
    pub fn signature(&self) -> String {
        format_signature(self.names, self.kinds)
    }
}

/// Process-wide table of registered schema identities.
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<u32, SchemaEntry>>,
}

impl SchemaRegistry {
    fn new() -> Self {
        let schemas = bootstrap_schemas()
            .into_iter()
            .map(|schema| {
                (
                    schema.id,
                    SchemaEntry {
                        level: schema.level,
                        path: schema.path,
                        names: schema.names,
                        kinds: schema.kinds,
                    },
                )
            })
            .collect();
        Self {
            schemas: RwLock::new(schemas),
        }
    }

    /// Registers a call site's schema, emitting exactly one registration frame
    /// per identity. A different schema under the same identity is fatal.
    pub fn register(&self, site: &CallSite, id: u32, kinds: &'static [ArgKind]) {
        let entry = SchemaEntry {
            level: site.level,
            path: site.path,
            names: site.names,
            kinds,
        };

        let existing = self.schemas.read().get(&id).copied();
        if let Some(existing) = existing {
            check_collision(id, &existing, &entry);
            return;
        }

        let mut schemas = self.schemas.write();
        if let Some(existing) = schemas.get(&id).copied() {
            drop(schemas);
            check_collision(id, &existing, &entry);
            return;
        }
        let signature = entry.signature();
        log_call(
            &SCHEMA_SITE,
            &(&id, &entry.level.as_u8(), &entry.path, &signature),
        );
        schemas.insert(id, entry);
        tracing::trace!(id, path = entry.path, "registered log schema");
    }

    pub fn get(&self, id: u32) -> Option<SchemaEntry> {
        self.schemas.read().get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.schemas.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.read().is_empty()
    }
}

fn check_collision(id: u32, existing: &SchemaEntry, entry: &SchemaEntry) {
    if existing != entry {
        fatal(&format!(
            "schema identity {:#010x} collides: {} ({}) vs {} ({})",
            id,
            existing.path,
            existing.signature(),
            entry.path,
            entry.signature()
        ));
    }
}

lazy_static! {
    static ref SCHEMA_REGISTRY: SchemaRegistry = SchemaRegistry::new();
}

pub fn registry() -> &'static SchemaRegistry {
    &SCHEMA_REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_validation() {
        assert!(validate_path("net.tcp.connected"));
        assert!(validate_path("connected"));
        assert!(validate_path("gpu:0.queue_full"));
        assert!(!validate_path(""));
        assert!(!validate_path("net..connected"));
        assert!(!validate_path(".net"));
        assert!(!validate_path("net."));
        assert!(!validate_path("net tcp"));
        assert!(!validate_path("*"));
    }

    #[test]
    fn test_identity_is_compile_time_and_distinct() {
        const A: u32 = schema_id(Level::Info, "connected", &["port"], &[ArgKind::U16]);
        const B: u32 = schema_id(Level::Info, "connected", &["port"], &[ArgKind::U32]);
        const C: u32 = schema_id(Level::Warn, "connected", &["port"], &[ArgKind::U16]);
        const D: u32 = schema_id(Level::Info, "connected", &["host"], &[ArgKind::U16]);
        assert_ne!(A, 0);
        assert_ne!(A, B);
        assert_ne!(A, C);
        assert_ne!(A, D);
        assert_eq!(A, schema_id(Level::Info, "connected", &["port"], &[ArgKind::U16]));
    }

    #[test]
    fn test_bootstrap_identities_are_unique() {
        let schemas = bootstrap_schemas();
        for (i, a) in schemas.iter().enumerate() {
            for b in &schemas[i + 1..] {
                assert_ne!(a.id, b.id, "{} vs {}", a.path, b.path);
            }
        }
        assert!(schemas.iter().any(|s| s.id == PLATFORM_ID));
    }

    #[test]
    fn test_signature_round_trip() {
        let signature = format_signature(&["port", "host"], &[ArgKind::U16, ArgKind::Text]);
        assert_eq!(signature, "port:uint16,host:string");
        assert_eq!(
            parse_signature(&signature),
            Some(vec![
                ("port".to_string(), ArgKind::U16),
                ("host".to_string(), ArgKind::Text)
            ])
        );
        assert_eq!(parse_signature(""), Some(Vec::new()));
        assert_eq!(parse_signature("port:float"), None);
    }

    #[test]
    fn test_call_site_resolution_is_memoized() {
        static SITE: CallSite = CallSite::new(Level::Debug, "registry_test.memo", &["value"]);
        let first = SITE.resolve::<(&u8,)>();
        let second = SITE.resolve::<(&u8,)>();
        assert_eq!(first, second);
        assert_eq!(
            first,
            schema_id(Level::Debug, "registry_test.memo", &["value"], &[ArgKind::U8])
        );
        let entry = registry().get(first).expect("registered");
        assert_eq!(entry.path, "registry_test.memo");
        assert_eq!(entry.kinds, &[ArgKind::U8]);
    }

    #[test]
    fn test_shared_site_resolves_per_argument_kinds() {
        static SITE: CallSite = CallSite::new(Level::Info, "registry_test.shared", &["value"]);
        let narrow = SITE.resolve::<(&u8,)>();
        let wide = SITE.resolve::<(&u32,)>();
        assert_ne!(narrow, wide);
        assert_eq!(
            wide,
            schema_id(Level::Info, "registry_test.shared", &["value"], &[ArgKind::U32])
        );
        assert_eq!(SITE.resolve::<(&u8,)>(), narrow);
        assert_eq!(SITE.resolve::<(&u32,)>(), wide);
        assert_eq!(registry().get(narrow).expect("registered").kinds, &[ArgKind::U8]);
        assert_eq!(registry().get(wide).expect("registered").kinds, &[ArgKind::U32]);
    }

    #[test]
    fn test_bootstrap_site_ids() {
        assert_eq!(SCHEMA_SITE.resolve::<(&u32, &u8, &&str, &String)>(), SCHEMA_REGISTRATION_ID);
        assert_eq!(STRING_CACHE_SITE.resolve::<(&u64, &&str)>(), STRING_CACHE_ID);
        assert_eq!(FATAL_SITE.resolve::<(&&str, &String)>(), FATAL_ID);
    }
}
