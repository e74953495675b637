use frame_logger::log_format_registry::{SOURCE_LOCATION_ID, STRING_CACHE_ID};
use frame_logger::source_location::lookup_source_location;
use frame_logger::{
    capture_image, get_string, here, log_info, register_string, InternedStr, LogReader, LogValue,
    Replay, SourceLocation,
};
use std::sync::{Arc, Barrier};
use std::thread;

static TEST_STR: &str = "Test string";
static DUPLICATE_STR: &str = "Duplicate string";
static CONCURRENT_STR: &str = "Concurrent string";
static UNICODE_STR: &str = "Hello, 世界! 🌍";

fn replay() -> Replay {
    LogReader::read_all(&capture_image()).expect("image should replay")
}

fn string_registrations(replay: &Replay, text: &str) -> usize {
    replay
        .entries
        .iter()
        .filter(|entry| entry.schema == STRING_CACHE_ID)
        .filter(|entry| entry.value("data").and_then(LogValue::as_str) == Some(text))
        .count()
}

#[test]
fn test_string_registration() {
    let id = register_string(TEST_STR);
    assert_eq!(get_string(id), Some(TEST_STR));
}

#[test]
fn test_duplicate_registration() {
    let id1 = register_string(DUPLICATE_STR);
    let id2 = register_string(DUPLICATE_STR);
    assert_eq!(id1, id2, "Same string should get same ID");
}

#[test]
fn test_multiple_strings() {
    static STRINGS: [&str; 3] = ["First", "Second", "Third"];
    let ids: Vec<_> = STRINGS.iter().map(|s| register_string(s)).collect();

    for i in 0..ids.len() {
        for j in i + 1..ids.len() {
            assert_ne!(ids[i], ids[j], "Different strings should get different IDs");
        }
    }

    for (s, id) in STRINGS.iter().zip(ids.iter()) {
        assert_eq!(get_string(*id), Some(*s));
    }
}

#[test]
fn test_invalid_id() {
    assert!(get_string(u64::MAX).is_none(), "Invalid ID should return None");
}

#[test]
fn test_empty_string_is_zero() {
    assert_eq!(register_string(""), 0);
    assert_eq!(get_string(0), Some(""));
}

#[test]
fn test_unicode_string() {
    let id = register_string(UNICODE_STR);
    assert_eq!(get_string(id), Some(UNICODE_STR));

    let greeting = InternedStr::new(UNICODE_STR);
    let cookie = log_info!("strings.unicode", greeting = greeting);
    let replay = replay();
    let entry = replay.find_by_cookie(cookie).expect("frame");
    assert_eq!(
        entry.value("greeting").and_then(LogValue::as_str),
        Some(UNICODE_STR)
    );
}

#[test]
fn test_interning_alone_logs_nothing() {
    let text = "interned but never logged";
    InternedStr::new(text);
    assert_eq!(string_registrations(&replay(), text), 0);
}

#[test]
fn test_concurrent_first_use_registers_once() {
    const THREADS: usize = 8;
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|worker| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let queue = InternedStr::new(CONCURRENT_STR);
                barrier.wait();
                log_info!("strings.concurrent", queue = queue, worker = worker as u32);
                queue.id()
            })
        })
        .collect();

    let ids: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("logging thread"))
        .collect();
    assert!(ids.iter().all(|id| *id == ids[0]), "Same string should get same ID");

    let replay = replay();
    assert_eq!(string_registrations(&replay, CONCURRENT_STR), 1);

    let uses: Vec<_> = replay.entries_with_path("strings.concurrent").collect();
    assert_eq!(uses.len(), THREADS);
    for entry in uses {
        assert_eq!(
            entry.value("queue").and_then(LogValue::as_str),
            Some(CONCURRENT_STR)
        );
    }
}

#[test]
fn test_source_location_registered_once() {
    let mut indices = Vec::new();
    for _ in 0..5 {
        let location = here!();
        indices.push(lookup_source_location(&location));
        log_info!("strings.located", at = location);
    }
    assert!(indices.iter().all(|index| *index == indices[0]));

    let replay = replay();
    let registrations = replay
        .entries
        .iter()
        .filter(|entry| entry.schema == SOURCE_LOCATION_ID)
        .filter(|entry| entry.value("index").and_then(LogValue::as_u64) == Some(indices[0] as u64))
        .count();
    assert_eq!(registrations, 1);

    let info = replay
        .catalog
        .locations
        .get(&indices[0])
        .expect("location in catalog");
    assert_eq!(info.file, file!());
    assert!(info.function.ends_with("test_source_location_registered_once"));
}

#[test]
fn test_concurrent_source_location_registered_once() {
    const THREADS: usize = 8;
    static SHARED: SourceLocation = SourceLocation::new("worker::poll", "src/worker.rs", 212, 9);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                log_info!("strings.racing_location", at = SHARED);
                lookup_source_location(&SHARED)
            })
        })
        .collect();

    let indices: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("logging thread"))
        .collect();
    assert!(indices.iter().all(|index| *index == indices[0]));

    let replay = replay();
    let registrations: Vec<_> = replay
        .entries
        .iter()
        .filter(|entry| entry.schema == SOURCE_LOCATION_ID)
        .filter(|entry| entry.value("index").and_then(LogValue::as_u64) == Some(indices[0] as u64))
        .collect();
    assert_eq!(registrations.len(), 1);
    assert_eq!(
        registrations[0].value("file_name").and_then(LogValue::as_str),
        Some("src/worker.rs")
    );
    assert_eq!(replay.entries_with_path("strings.racing_location").count(), THREADS);
}

#[test]
fn test_distinct_locations_get_distinct_indices() {
    let a = SourceLocation::new("handler", "src/server.rs", 10, 5);
    let b = SourceLocation::new("handler", "src/server.rs", 11, 5);
    assert_ne!(lookup_source_location(&a), lookup_source_location(&b));
    assert_eq!(lookup_source_location(&a), a.index());
}

#[test]
fn test_many_registrations() {
    let strings: Vec<String> = (0..1000).map(|i| format!("String {}", i)).collect();
    let ids: Vec<_> = strings.iter().map(|s| register_string(s)).collect();

    for (s, id) in strings.iter().zip(ids) {
        assert_eq!(get_string(id), Some(s.as_str()));
    }
}
