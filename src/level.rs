use std::fmt;

/// Severity of a log call.
///
/// Lower values are more severe. `Fatal`, `Error` and `Warn` are never
/// suppressed by the disabler registry; `Internal` frames are only written to
/// the binary log and never rendered as text.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Fatal = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
    Internal = 6,
}

impl Level {
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Four-letter tag used in the text rendering.
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Fatal => "fatl",
            Level::Error => "eror",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Debug => "debg",
            Level::Trace => "trac",
            Level::Internal => "intl",
        }
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Level::Fatal),
            1 => Some(Level::Error),
            2 => Some(Level::Warn),
            3 => Some(Level::Info),
            4 => Some(Level::Debug),
            5 => Some(Level::Trace),
            6 => Some(Level::Internal),
            _ => None,
        }
    }

    /// Whether the disabler registry is allowed to mute this level.
    #[inline]
    pub const fn is_suppressible(self) -> bool {
        !matches!(self, Level::Fatal | Level::Error | Level::Warn)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
