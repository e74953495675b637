//! Logger configuration.

use std::env;
use std::path::PathBuf;

/// Name of the disabler configuration file looked up by default.
pub const DEFAULT_DISABLER_FILE: &str = "nolog.txt";

pub const TEXT_FILE_ENV: &str = "FRAME_LOGGER_TEXT_FILE";
pub const ECHO_ENV: &str = "FRAME_LOGGER_ECHO";
pub const DISABLER_FILE_ENV: &str = "FRAME_LOGGER_DISABLE_FILE";

/// Where the text rendering goes and where disabler settings come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    /// Text log file; `None` disables the file sink.
    pub text_file: Option<PathBuf>,
    /// Whether text lines are also echoed to stdout.
    pub echo_stdout: bool,
    /// Disabler configuration; a missing file means everything is enabled.
    pub disabler_file: PathBuf,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            text_file: default_text_file(),
            echo_stdout: true,
            disabler_file: PathBuf::from(DEFAULT_DISABLER_FILE),
        }
    }
}

impl LoggerConfig {
    /// Defaults overridden by `FRAME_LOGGER_*` environment variables.
    ///
    /// An empty `FRAME_LOGGER_TEXT_FILE` turns the file sink off;
    /// `FRAME_LOGGER_ECHO` accepts `0/1`, `on/off`, `true/false`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(text_file) = env::var(TEXT_FILE_ENV) {
            config.text_file = if text_file.is_empty() {
                None
            } else {
                Some(PathBuf::from(text_file))
            };
        }
        if let Some(echo) = env::var(ECHO_ENV).ok().and_then(|v| parse_switch(&v)) {
            config.echo_stdout = echo;
        }
        if let Ok(disabler_file) = env::var(DISABLER_FILE_ENV) {
            if !disabler_file.is_empty() {
                config.disabler_file = PathBuf::from(disabler_file);
            }
        }
        config
    }
}

/// `<executable>.txt` next to the running binary.
fn default_text_file() -> Option<PathBuf> {
    let exe = env::current_exe().ok()?;
    let mut name = exe.file_name()?.to_os_string();
    name.push(".txt");
    Some(exe.with_file_name(name))
}

/// Parses an on/off switch value.
pub fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" | "enabled" => Some(true),
        "0" | "off" | "false" | "no" | "disabled" => Some(false),
        _ => None,
    }
}
