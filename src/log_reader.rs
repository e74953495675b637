//! Reader and utilities for decoding log images.
//!
//! A log image is what [`crate::frame_store::FrameStore::capture_image`]
//! produces: the 40-byte header followed by frames. The format is
//! self-describing: every schema, interned string and source location used
//! by a frame is registered by an earlier frame, so the reader rebuilds all
//! names from the image alone.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::efficient_clock::{split_micros, to_system_time};
use crate::error::ReplayError;
use crate::frame_store::{LogCookie, FORMAT_VERSION, FRAME_HEADER_SIZE, HEADER_SIGNATURE, HEADER_SIZE};
use crate::level::Level;
use crate::log_format_registry::{
    bootstrap_schemas, parse_signature, SCHEMA_REGISTRATION_ID, SEGMENT_ID, SOURCE_LOCATION_ID,
    STRING_CACHE_ID,
};
use crate::loggable::{ArgKind, PADDING_TAG};

/// A value extracted from a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogValue {
    Bool(bool),
    /// Any unsigned integer kind, widened.
    UInt(u64),
    /// Any signed integer kind, widened.
    Int(i64),
    Text(String),
    Blob(Vec<u8>),
    /// An interned string; `text` is `None` if its registration was not in
    /// the image.
    CachedString { id: u64, text: Option<String> },
    SourceLocation {
        index: u32,
        location: Option<SourceLocationInfo>,
    },
    Handle(u64),
    Fallback(String),
}

impl LogValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            LogValue::UInt(v) | LogValue::Handle(v) => Some(*v),
            LogValue::Int(v) => u64::try_from(*v).ok(),
            LogValue::CachedString { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            LogValue::Int(v) => Some(*v),
            LogValue::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Text of `Text`, `Fallback` and resolved `CachedString` values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            LogValue::Text(s) | LogValue::Fallback(s) => Some(s),
            LogValue::CachedString { text, .. } => text.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::Bool(b) => write!(f, "{}", b),
            LogValue::UInt(v) => write!(f, "{}", v),
            LogValue::Int(v) => write!(f, "{}", v),
            LogValue::Text(s) => write!(f, "'{}'", s),
            LogValue::Blob(bytes) => write!(f, "blob({})", bytes.len()),
            LogValue::CachedString { text: Some(s), .. } => write!(f, "'{}'", s),
            LogValue::CachedString { id, text: None } => write!(f, "string#{}", id),
            LogValue::SourceLocation {
                location: Some(location),
                ..
            } => write!(f, "{}", location),
            LogValue::SourceLocation { index, location: None } => write!(f, "location#{}", index),
            LogValue::Handle(v) => write!(f, "{:#x}", v),
            LogValue::Fallback(s) => write!(f, "{}", s),
        }
    }
}

/// A source location as registered in the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocationInfo {
    pub function: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.file, self.line, self.function)
    }
}

/// A schema as registered in the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaInfo {
    pub level: Level,
    pub path: String,
    pub names: Vec<String>,
    pub kinds: Vec<ArgKind>,
}

/// Everything learned from registration frames so far.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub schemas: HashMap<u32, SchemaInfo>,
    pub strings: HashMap<u64, String>,
    pub locations: HashMap<u32, SourceLocationInfo>,
}

impl Catalog {
    /// A catalog that knows the bootstrap schemas.
    pub fn with_bootstrap() -> Self {
        let mut catalog = Self::default();
        for schema in bootstrap_schemas() {
            catalog.schemas.insert(
                schema.id,
                SchemaInfo {
                    level: schema.level,
                    path: schema.path.to_string(),
                    names: schema.names.iter().map(|name| name.to_string()).collect(),
                    kinds: schema.kinds.to_vec(),
                },
            );
        }
        // The empty string is never registered.
        catalog.strings.insert(0, String::new());
        catalog
    }
}

/// One buffer of the image: where it lived in the writing process and where
/// its frames start in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub address: u64,
    pub image_offset: usize,
}

/// A single decoded frame.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// When the frame was written.
    pub timestamp: SystemTime,
    pub timestamp_micros: u64,
    pub schema: u32,
    /// Level and path, if the schema is known.
    pub level: Option<Level>,
    pub path: Option<String>,
    /// `(name, value)` pairs; unnamed arguments are called `argN`.
    pub values: Vec<(String, LogValue)>,
    /// Image offset of the frame header.
    pub offset: usize,
    /// In-process address of the frame, if its buffer's address frame was
    /// seen.
    pub cookie: Option<LogCookie>,
}

impl LogEntry {
    pub fn value(&self, name: &str) -> Option<&LogValue> {
        self.values
            .iter()
            .find(|(value_name, _)| value_name == name)
            .map(|(_, value)| value)
    }

    pub fn is_internal(&self) -> bool {
        self.level == Some(Level::Internal)
    }

    /// Renders the entry the way the text sinks do.
    ///
    /// # Examples
    ///
    /// ```
    /// # use frame_logger::log_reader::LogReader;
    /// # use frame_logger::log_info;
    /// log_info!("reader_doc.started", workers = 4u8);
    /// let image = frame_logger::frame_store::capture_image();
    /// let replay = LogReader::read_all(&image).unwrap();
    /// let entry = replay.entries_with_path("reader_doc.started").next().unwrap();
    /// assert!(entry.format().ends_with("info reader_doc.started: workers = 4"));
    /// ```
    pub fn format(&self) -> String {
        let (secs, micros) = split_micros(self.timestamp_micros);
        let cookie = match self.cookie {
            Some(cookie) => cookie.to_string(),
            None => format!("@{}", self.offset),
        };
        let level = self.level.map_or("????", Level::as_str);
        let path = match &self.path {
            Some(path) => path.clone(),
            None => format!("schema#{:#010x}", self.schema),
        };
        let values = self
            .values
            .iter()
            .map(|(name, value)| format!("{} = {}", name, value))
            .collect::<Vec<_>>()
            .join(", ");
        format!("[{}.{:06} {}] {} {}: {}", secs, micros, cookie, level, path, values)
    }

    /// Returns a detailed multiline representation of the entry.
    pub fn to_detailed_string(&self) -> String {
        let mut result = String::new();

        let ts = self.timestamp.duration_since(UNIX_EPOCH).unwrap_or_default();
        result.push_str(&format!(
            "Timestamp: {}.{:06} ({})\n",
            ts.as_secs(),
            ts.subsec_micros(),
            self.timestamp_micros
        ));
        result.push_str(&format!("Schema: {:#010x}\n", self.schema));
        match (&self.level, &self.path) {
            (Some(level), Some(path)) => result.push_str(&format!("Message: {} {}\n", level, path)),
            _ => result.push_str("Message: <unknown schema>\n"),
        }
        result.push_str(&format!("Offset: {}\n", self.offset));
        if let Some(cookie) = self.cookie {
            result.push_str(&format!("Cookie: {}\n", cookie));
        }

        result.push_str(&format!("Values ({}):\n", self.values.len()));
        for (name, value) in &self.values {
            result.push_str(&format!("  {}: {}\n", name, value));
        }
        result
    }
}

/// Bounds-checked little-endian cursor over a payload.
struct PayloadCursor<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> PayloadCursor<'a> {
    fn malformed(&self, reason: impl Into<String>) -> ReplayError {
        ReplayError::MalformedFrame {
            offset: self.base + self.pos,
            reason: reason.into(),
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ReplayError> {
        if self.pos + len > self.data.len() {
            let missing = self.pos + len - self.data.len();
            return Err(self.malformed(format!("argument overruns payload by {} bytes", missing)));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ReplayError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn take_prefixed(&mut self) -> Result<&'a [u8], ReplayError> {
        let len = u32::from_le_bytes(self.take_array()?) as usize;
        self.take(len)
    }

    fn take_text(&mut self) -> Result<String, ReplayError> {
        let bytes = self.take_prefixed()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| self.malformed("text is not UTF-8"))
    }
}

/// Decodes tag-prefixed arguments until padding or the end of the payload.
fn decode_values(
    payload: &[u8],
    base: usize,
    catalog: &Catalog,
) -> Result<Vec<LogValue>, ReplayError> {
    let mut cursor = PayloadCursor {
        data: payload,
        pos: 0,
        base,
    };
    let mut values = Vec::new();

    while cursor.pos < payload.len() {
        let tag = cursor.take_array::<1>()?[0];
        if tag == PADDING_TAG {
            break;
        }
        let kind = ArgKind::from_tag(tag)
            .ok_or_else(|| cursor.malformed(format!("unknown argument tag {}", tag)))?;
        let value = match kind {
            ArgKind::Bool => LogValue::Bool(cursor.take_array::<1>()?[0] != 0),
            ArgKind::U8 => LogValue::UInt(u64::from(cursor.take_array::<1>()?[0])),
            ArgKind::I8 => LogValue::Int(i64::from(i8::from_le_bytes(cursor.take_array()?))),
            ArgKind::U16 => LogValue::UInt(u64::from(u16::from_le_bytes(cursor.take_array()?))),
            ArgKind::I16 => LogValue::Int(i64::from(i16::from_le_bytes(cursor.take_array()?))),
            ArgKind::U32 => LogValue::UInt(u64::from(u32::from_le_bytes(cursor.take_array()?))),
            ArgKind::I32 => LogValue::Int(i64::from(i32::from_le_bytes(cursor.take_array()?))),
            ArgKind::U64 => LogValue::UInt(u64::from_le_bytes(cursor.take_array()?)),
            ArgKind::I64 => LogValue::Int(i64::from_le_bytes(cursor.take_array()?)),
            ArgKind::Text => LogValue::Text(cursor.take_text()?),
            ArgKind::Blob => LogValue::Blob(cursor.take_prefixed()?.to_vec()),
            ArgKind::CachedString => {
                let id = u64::from_le_bytes(cursor.take_array()?);
                LogValue::CachedString {
                    id,
                    text: catalog.strings.get(&id).cloned(),
                }
            }
            ArgKind::SourceLocation => {
                let index = u32::from_le_bytes(cursor.take_array()?);
                LogValue::SourceLocation {
                    index,
                    location: catalog.locations.get(&index).cloned(),
                }
            }
            ArgKind::Handle => LogValue::Handle(u64::from_le_bytes(cursor.take_array()?)),
            ArgKind::Fallback => LogValue::Fallback(cursor.take_text()?),
        };
        values.push(value);
    }
    Ok(values)
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// Reader for decoding log images.
///
/// LogReader walks the frames of an image in order. Registration frames
/// (schemas, interned strings, source locations) and address frames update
/// the reader's [`Catalog`] and segment list as they pass, and are yielded
/// like any other entry.
///
/// # Examples
///
/// ```
/// # use frame_logger::{log_info, log_reader::LogReader};
/// log_info!("reader_doc.connected", port = 8080u16);
///
/// let image = frame_logger::frame_store::capture_image();
/// let mut reader = LogReader::new(&image)?;
/// while let Some(entry) = reader.read_entry()? {
///     if entry.path.as_deref() == Some("reader_doc.connected") {
///         assert_eq!(entry.value("port").and_then(|v| v.as_u64()), Some(8080));
///     }
/// }
/// # Ok::<(), frame_logger::error::ReplayError>(())
/// ```
pub struct LogReader<'a> {
    data: &'a [u8],
    pos: usize,
    platform_schema: u32,
    catalog: Catalog,
    segments: Vec<Segment>,
    crashdump_offset: Option<usize>,
    failed: bool,
}

impl<'a> LogReader<'a> {
    /// Validates the image header and positions the reader on the first
    /// frame.
    ///
    /// # Errors
    ///
    /// * [`ReplayError::Truncated`] - shorter than the header
    /// * [`ReplayError::BadSignature`] - not a log image
    /// * [`ReplayError::UnsupportedVersion`] - any format version but 3
    pub fn new(data: &'a [u8]) -> Result<Self, ReplayError> {
        if data.len() < HEADER_SIZE {
            return Err(ReplayError::Truncated {
                offset: data.len(),
                needed: HEADER_SIZE - data.len(),
            });
        }
        let signature = read_u64(data, 0);
        if signature != HEADER_SIGNATURE {
            return Err(ReplayError::BadSignature(signature));
        }
        let version = read_u64(data, 8);
        if version != FORMAT_VERSION {
            return Err(ReplayError::UnsupportedVersion(version));
        }
        if read_u32(data, 24) != 8 || read_u32(data, 28) != 0 {
            return Err(ReplayError::MalformedFrame {
                offset: 16,
                reason: "bad embedded header frame".to_string(),
            });
        }

        Ok(Self {
            data,
            pos: HEADER_SIZE,
            platform_schema: read_u64(data, 32) as u32,
            catalog: Catalog::with_bootstrap(),
            segments: Vec::new(),
            crashdump_offset: None,
            failed: false,
        })
    }

    /// Schema identity of the writer's platform self-identification message.
    pub fn platform_schema(&self) -> u32 {
        self.platform_schema
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Reads the next frame.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(entry))` - The next entry
    /// * `Ok(None)` - End of the image
    /// * `Err(_)` - The frame at the current position is damaged; the reader
    ///   yields nothing further
    pub fn read_entry(&mut self) -> Result<Option<LogEntry>, ReplayError> {
        if self.failed || self.pos >= self.data.len() {
            return Ok(None);
        }
        match self.decode_next() {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                self.failed = true;
                Err(err)
            }
        }
    }

    fn decode_next(&mut self) -> Result<LogEntry, ReplayError> {
        let offset = self.pos;
        let remaining = self.data.len() - offset;
        if remaining < FRAME_HEADER_SIZE {
            return Err(ReplayError::Truncated {
                offset,
                needed: FRAME_HEADER_SIZE - remaining,
            });
        }

        let timestamp_micros = read_u64(self.data, offset);
        let len = read_u32(self.data, offset + 8) as usize;
        let schema = read_u32(self.data, offset + 12);
        if schema == 0 {
            return Err(ReplayError::MalformedFrame {
                offset,
                reason: "unpublished frame".to_string(),
            });
        }
        if len % 8 != 0 {
            return Err(ReplayError::MalformedFrame {
                offset,
                reason: format!("payload length {} is not a multiple of 8", len),
            });
        }
        let payload_start = offset + FRAME_HEADER_SIZE;
        if payload_start + len > self.data.len() {
            return Err(ReplayError::Truncated {
                offset,
                needed: payload_start + len - self.data.len(),
            });
        }
        let payload = &self.data[payload_start..payload_start + len];
        self.pos = payload_start + len;

        let raw = decode_values(payload, payload_start, &self.catalog)?;
        self.learn(schema, offset, &raw)?;

        // The crashdump frame sits after the last buffer; no log call
        // returned a cookie for it.
        let cookie = if schema == self.platform_schema {
            self.crashdump_offset = Some(offset);
            None
        } else {
            self.cookie_for(offset)
        };
        let (level, path, values) = match self.catalog.schemas.get(&schema) {
            Some(info) => (
                Some(info.level),
                Some(info.path.clone()),
                raw.into_iter()
                    .enumerate()
                    .map(|(i, value)| {
                        let name = info.names.get(i).cloned().unwrap_or_else(|| format!("arg{}", i));
                        (name, value)
                    })
                    .collect(),
            ),
            None => (
                None,
                None,
                raw.into_iter()
                    .enumerate()
                    .map(|(i, value)| (format!("arg{}", i), value))
                    .collect(),
            ),
        };

        Ok(LogEntry {
            timestamp: to_system_time(timestamp_micros),
            timestamp_micros,
            schema,
            level,
            path,
            values,
            offset,
            cookie,
        })
    }

    /// Updates the catalog and segments from internal frames.
    fn learn(&mut self, schema: u32, offset: usize, values: &[LogValue]) -> Result<(), ReplayError> {
        let malformed = |what: &str| ReplayError::MalformedFrame {
            offset,
            reason: format!("bad {} frame", what),
        };

        if schema == SEGMENT_ID {
            let address = values.first().and_then(LogValue::as_u64).ok_or_else(|| malformed("segment"))?;
            self.segments.push(Segment {
                address,
                image_offset: offset,
            });
        } else if schema == SCHEMA_REGISTRATION_ID {
            let (id, level, path, signature) = match values {
                [LogValue::UInt(id), LogValue::UInt(level), LogValue::Text(path), LogValue::Text(signature)] => {
                    (*id, *level, path, signature)
                }
                _ => return Err(malformed("schema")),
            };
            let level = u8::try_from(level)
                .ok()
                .and_then(Level::from_u8)
                .ok_or_else(|| malformed("schema"))?;
            let pairs = parse_signature(signature).ok_or_else(|| malformed("schema"))?;
            let (names, kinds) = pairs.into_iter().unzip();
            self.catalog.schemas.insert(
                id as u32,
                SchemaInfo {
                    level,
                    path: path.clone(),
                    names,
                    kinds,
                },
            );
        } else if schema == STRING_CACHE_ID {
            match values {
                [LogValue::UInt(id), LogValue::Text(text)] => {
                    self.catalog.strings.insert(*id, text.clone());
                }
                _ => return Err(malformed("string_cache")),
            }
        } else if schema == SOURCE_LOCATION_ID {
            match values {
                [LogValue::UInt(index), LogValue::Text(function), LogValue::Text(file), LogValue::UInt(line), LogValue::UInt(column)] =>
                {
                    self.catalog.locations.insert(
                        *index as u32,
                        SourceLocationInfo {
                            function: function.clone(),
                            file: file.clone(),
                            line: *line as u32,
                            column: *column as u32,
                        },
                    );
                }
                _ => return Err(malformed("source_location")),
            }
        }
        Ok(())
    }

    fn cookie_for(&self, offset: usize) -> Option<LogCookie> {
        let segment = self.segments.iter().rev().find(|s| s.image_offset <= offset)?;
        Some(LogCookie(segment.address + (offset - segment.image_offset) as u64))
    }

    /// Reads the whole image.
    pub fn read_all(data: &'a [u8]) -> Result<Replay, ReplayError> {
        let mut reader = Self::new(data)?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.read_entry()? {
            entries.push(entry);
        }
        Ok(Replay {
            platform_schema: reader.platform_schema,
            entries,
            catalog: reader.catalog,
            segments: reader.segments,
            segments_end: reader.crashdump_offset.unwrap_or(data.len()),
        })
    }
}

impl Iterator for LogReader<'_> {
    type Item = Result<LogEntry, ReplayError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_entry().transpose()
    }
}

/// A fully decoded image.
#[derive(Debug, Clone)]
pub struct Replay {
    pub platform_schema: u32,
    pub entries: Vec<LogEntry>,
    pub catalog: Catalog,
    pub segments: Vec<Segment>,
    // End of the last buffer: the crashdump frame or the end of the image.
    segments_end: usize,
}

impl Replay {
    /// Entries logged at `path`, in image order.
    pub fn entries_with_path<'r>(&'r self, path: &'r str) -> impl Iterator<Item = &'r LogEntry> + 'r {
        self.entries
            .iter()
            .filter(move |entry| entry.path.as_deref() == Some(path))
    }

    /// Entries that are not registration, address or platform frames.
    pub fn user_entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(|entry| !entry.is_internal())
    }

    /// Image offset of the frame a cookie points at.
    pub fn relocate(&self, cookie: LogCookie) -> Option<usize> {
        for (i, segment) in self.segments.iter().enumerate() {
            let end = self
                .segments
                .get(i + 1)
                .map_or(self.segments_end, |next| next.image_offset);
            let span = (end - segment.image_offset) as u64;
            if cookie.0 >= segment.address && cookie.0 - segment.address < span {
                return Some(segment.image_offset + (cookie.0 - segment.address) as usize);
            }
        }
        None
    }

    /// The entry a log call's cookie refers to.
    pub fn find_by_cookie(&self, cookie: LogCookie) -> Option<&LogEntry> {
        let offset = self.relocate(cookie)?;
        self.entries
            .binary_search_by_key(&offset, |entry| entry.offset)
            .ok()
            .map(|index| &self.entries[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary_logger::encode_frame;
    use crate::frame_store::FrameStore;
    use crate::log_format_registry::{schema_id, PLATFORM_ID};

    #[test]
    fn test_rejects_bad_headers() {
        assert!(matches!(LogReader::new(&[0u8; 10]), Err(ReplayError::Truncated { .. })));

        let mut image = crate::frame_store::header_bytes().to_vec();
        image[0] ^= 1;
        assert!(matches!(LogReader::new(&image), Err(ReplayError::BadSignature(_))));

        let mut image = crate::frame_store::header_bytes().to_vec();
        image[8..16].copy_from_slice(&2u64.to_le_bytes());
        assert!(matches!(LogReader::new(&image), Err(ReplayError::UnsupportedVersion(2))));
    }

    #[test]
    fn test_empty_store_image() {
        let store = FrameStore::with_capacity(1024);
        let image = store.capture_image();
        let replay = LogReader::read_all(&image).expect("replay");
        assert_eq!(replay.platform_schema, PLATFORM_ID);
        assert!(replay.entries.is_empty());
    }

    #[test]
    fn test_decodes_unregistered_schema_positionally() {
        let store = FrameStore::with_capacity(4096);
        let flag = true;
        let delta = -3i16;
        let name = String::from("disk");
        encode_frame(&store, 0xabcd, &(&flag, &delta, &name)).expect("encode");

        let image = store.capture_image();
        let replay = LogReader::read_all(&image).expect("replay");
        let entry = replay.entries.iter().find(|e| e.schema == 0xabcd).expect("frame");
        assert_eq!(entry.path, None);
        assert_eq!(
            entry.values,
            vec![
                ("arg0".to_string(), LogValue::Bool(true)),
                ("arg1".to_string(), LogValue::Int(-3)),
                ("arg2".to_string(), LogValue::Text("disk".to_string())),
            ]
        );
    }

    #[test]
    fn test_registration_frames_feed_catalog() {
        let store = FrameStore::with_capacity(4096);
        let id = schema_id(Level::Warn, "disk.full", &["free"], &[ArgKind::U64]);
        let signature = String::from("free:uint64");
        encode_frame(
            &store,
            SCHEMA_REGISTRATION_ID,
            &(&id, &Level::Warn.as_u8(), &"disk.full", &signature),
        )
        .expect("register");
        encode_frame(&store, STRING_CACHE_ID, &(&9u64, &"sda1")).expect("string");
        encode_frame(&store, id, &(&512u64,)).expect("frame");

        let image = store.capture_image();
        let replay = LogReader::read_all(&image).expect("replay");
        assert_eq!(replay.catalog.strings.get(&9).map(String::as_str), Some("sda1"));
        let entry = replay.entries_with_path("disk.full").next().expect("entry");
        assert_eq!(entry.level, Some(Level::Warn));
        assert_eq!(entry.value("free"), Some(&LogValue::UInt(512)));
        assert!(entry.format().ends_with("warn disk.full: free = 512"));
    }

    #[test]
    fn test_cookie_relocation() {
        let store = FrameStore::with_capacity(128);
        let mut cookies = Vec::new();
        for i in 0..9u64 {
            cookies.push(encode_frame(&store, 5, &(&i,)).expect("encode").cookie);
        }
        assert!(store.buffer_count() > 1);

        let image = store.capture_image();
        let replay = LogReader::read_all(&image).expect("replay");
        assert_eq!(replay.segments.len(), store.buffer_count());
        for (i, cookie) in cookies.iter().enumerate() {
            let entry = replay.find_by_cookie(*cookie).expect("entry for cookie");
            assert_eq!(entry.values[0].1, LogValue::UInt(i as u64));
            assert_eq!(entry.cookie, Some(*cookie));
        }
        assert!(replay.find_by_cookie(LogCookie(1)).is_none());
    }

    #[test]
    fn test_crashdump_frame_has_no_cookie() {
        let store = FrameStore::with_capacity(1024);
        let last = encode_frame(&store, 5, &(&7u64,)).expect("encode").cookie;
        let mut scratch = store.crashdump_data().expect("claim");
        scratch.as_mut_slice()[..4].copy_from_slice(b"core");
        scratch.set_crashdump_data(4);
        drop(scratch);

        let image = store.capture_image();
        let replay = LogReader::read_all(&image).expect("replay");
        let crash = replay.entries.last().expect("crashdump entry");
        assert_eq!(crash.schema, PLATFORM_ID);
        assert_eq!(crash.cookie, None);
        assert_eq!(crash.values[0].1, LogValue::Blob(b"core".to_vec()));

        let segment = replay.segments.last().expect("segment");
        let past_buffer = LogCookie(segment.address + (crash.offset - segment.image_offset) as u64);
        assert_eq!(replay.relocate(past_buffer), None);
        assert_eq!(
            replay.find_by_cookie(last).and_then(|entry| entry.values[0].1.as_u64()),
            Some(7)
        );
    }

    #[test]
    fn test_truncated_frame() {
        let store = FrameStore::with_capacity(1024);
        encode_frame(&store, 5, &(&1u64,)).expect("encode");
        let image = store.capture_image();
        let cut = &image[..image.len() - 4];

        let mut reader = LogReader::new(cut).expect("header ok");
        let results: Vec<_> = reader.by_ref().collect();
        assert!(matches!(results.last(), Some(Err(ReplayError::Truncated { .. }))));
        assert!(reader.next().is_none());
    }
}
