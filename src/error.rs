//! Error types for the non-fatal library surface.
//!
//! Programming errors on the hot path go through [`crate::fatal`] instead;
//! these enums are for callers that asked to handle failure themselves.

use std::fmt;

use crate::frame_store::MAX_FRAME_PAYLOAD;

/// Why a frame could not be reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveError {
    /// Payload is at or above the per-frame limit.
    FrameTooLarge { len: usize },
    /// Payload length is not a multiple of 8.
    Unaligned { len: usize },
    /// A fresh buffer could not be allocated.
    Exhausted { capacity: usize },
    /// Schema identity 0 marks unpublished frames and cannot be written.
    ReservedSchema,
}

impl fmt::Display for ReserveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameTooLarge { len } => write!(
                f,
                "frame payload too large: {} bytes (limit {})",
                len, MAX_FRAME_PAYLOAD
            ),
            Self::Unaligned { len } => {
                write!(f, "frame payload length {} is not a multiple of 8", len)
            }
            Self::Exhausted { capacity } => {
                write!(f, "cannot allocate a {} byte log buffer", capacity)
            }
            Self::ReservedSchema => write!(f, "schema identity 0 is reserved"),
        }
    }
}

impl std::error::Error for ReserveError {}

/// Why a log image could not be replayed.
#[derive(Debug)]
pub enum ReplayError {
    /// The image ends inside a header or frame.
    Truncated { offset: usize, needed: usize },
    /// The first eight bytes are not the log signature.
    BadSignature(u64),
    /// The image was written by another format revision.
    UnsupportedVersion(u64),
    /// A frame header or argument could not be decoded.
    MalformedFrame { offset: usize, reason: String },
    /// A compressed image failed to decompress.
    Decompress(String),
    /// Reading or writing the image file failed.
    Io(std::io::Error),
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(source) => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { offset, needed } => {
                write!(f, "image truncated at offset {} ({} more bytes needed)", offset, needed)
            }
            Self::BadSignature(signature) => write!(f, "not a log image (signature {})", signature),
            Self::UnsupportedVersion(version) => {
                write!(f, "unsupported log format version {}", version)
            }
            Self::MalformedFrame { offset, reason } => {
                write!(f, "malformed frame at offset {}: {}", offset, reason)
            }
            Self::Decompress(reason) => write!(f, "cannot decompress image: {}", reason),
            Self::Io(source) => write!(f, "IO error: {}", source),
        }
    }
}

impl From<std::io::Error> for ReplayError {
    fn from(source: std::io::Error) -> Self {
        Self::Io(source)
    }
}
