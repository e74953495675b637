use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::panic::Location;
use std::sync::atomic::{AtomicU32, Ordering};

use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::binary_logger::log_call;
use crate::log_format_registry::SOURCE_LOCATION_SITE;
use crate::loggable::{ArgKind, ByteSink, Loggable};

/// A position in the source code, logged as a 32-bit index.
///
/// Construct one with [`here!`](crate::here) to capture the enclosing function
/// name, or [`SourceLocation::caller`] from a `#[track_caller]` function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub function: &'static str,
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub const fn new(function: &'static str, file: &'static str, line: u32, column: u32) -> Self {
        Self {
            function,
            file,
            line,
            column,
        }
    }

    /// Location of the caller; the function name is unknown (`?`).
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self::new("?", location.file(), location.line(), location.column())
    }

    /// Index of this location in the process-wide table, registering it on
    /// first sight.
    pub fn index(&self) -> u32 {
        lookup_source_location(self)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.file, self.line, self.function)
    }
}

impl From<&'static Location<'static>> for SourceLocation {
    fn from(location: &'static Location<'static>) -> Self {
        Self::new("?", location.file(), location.line(), location.column())
    }
}

/// Captures the current source location including the enclosing function.
#[macro_export]
macro_rules! here {
    () => {{
        fn __here() {}
        fn __type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let name = __type_name_of(__here);
        $crate::source_location::SourceLocation::new(
            name.strip_suffix("::__here").unwrap_or(name),
            file!(),
            line!(),
            column!(),
        )
    }};
}

static NEXT_INDEX: AtomicU32 = AtomicU32::new(0);

lazy_static! {
    static ref LOCATIONS: RwLock<HashMap<SourceLocation, u32>> = RwLock::new(HashMap::new());
}

/// Maps a source location to its index.
///
/// Indices are handed out in first-sight order. The first sight also emits a
/// single `source_location` frame with the index and all four components;
/// the exclusive lock is held across the re-check and the emission so racing
/// threads cannot register the same location twice.
pub fn lookup_source_location(location: &SourceLocation) -> u32 {
    if let Some(&index) = LOCATIONS.read().get(location) {
        return index;
    }

    let mut locations = LOCATIONS.write();
    if let Some(&index) = locations.get(location) {
        return index;
    }
    let index = NEXT_INDEX.fetch_add(1, Ordering::Relaxed);
    log_call(
        &SOURCE_LOCATION_SITE,
        &(
            &index,
            &location.function,
            &location.file,
            &location.line,
            &location.column,
        ),
    );
    locations.insert(*location, index);
    index
}

/// Number of distinct locations registered so far.
pub fn registered_locations() -> usize {
    LOCATIONS.read().len()
}

impl Loggable for SourceLocation {
    const KIND: ArgKind = ArgKind::SourceLocation;

    #[inline]
    fn write<S: ByteSink>(&self, sink: &mut S) {
        sink.put_u32(lookup_source_location(self));
    }

    fn render(&self, out: &mut String) {
        let _ = write!(out, "{}", self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_here_captures_function() {
        let location = crate::here!();
        assert!(location.function.ends_with("test_here_captures_function"));
        assert!(location.file.ends_with("source_location.rs"));
        assert!(location.line > 0);
    }

    #[test]
    fn test_lookup_is_stable() {
        let location = SourceLocation::new("unit::lookup", "unit/lookup.rs", 10, 4);
        let first = lookup_source_location(&location);
        let second = location.index();
        assert_eq!(first, second);

        let other = SourceLocation::new("unit::lookup", "unit/lookup.rs", 11, 4);
        assert_ne!(first, other.index());
    }

    #[test]
    fn test_display() {
        let location = SourceLocation::new("main", "src/main.rs", 3, 1);
        assert_eq!(location.to_string(), "src/main.rs:3 (main)");
    }
}
