//! Serial connection configuration and display settings.
//!
//! This module provides:
//! - `Config`: the parameters needed to open a serial device
//! - `Settings`: display/encoding options that never touch the connection
//! - TOML configuration file loading from `~/.serterm/config.toml`
//!
//! # Configuration File
//!
//! The configuration file is located at `~/.serterm/config.toml`:
//!
//! ```toml
//! # Device to connect to at startup (optional)
//! path = "/dev/ttyUSB0"
//!
//! baud = 115200
//! data_bits = 8
//! parity = "N"
//! stop_bits = "1"
//! timeout = "1s"
//! ```
//!
//! Command line flags override values from the file.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default baud rate
pub const DEFAULT_BAUD: u32 = 115_200;
/// Default data bit count
pub const DEFAULT_DATA_BITS: u8 = 8;
/// Default end-of-line code (LF)
pub const DEFAULT_EOL_CODE: u32 = 0x0A;

/// Parity bit scheme.
///
/// Mark and Space parity exist in the wild but are not supported by the
/// transport layer; their parse arms reject with an explicit message so the
/// user learns why instead of getting a generic error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl Parity {
    /// Parse a parity code (`N`/`O`/`E`, full words accepted).
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.to_lowercase().as_str() {
            "n" | "none" => Ok(Parity::None),
            "o" | "odd" => Ok(Parity::Odd),
            "e" | "even" => Ok(Parity::Even),
            "m" | "mark" | "s" | "space" => {
                Err("mark/space parity is not supported by the serial transport".to_string())
            }
            _ => Err("expected one of N|O|E".to_string()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Parity::None => "N",
            Parity::Odd => "O",
            Parity::Even => "E",
        }
    }
}

/// Stop bit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl StopBits {
    /// Parse a stop bit count (`1` or `2`).
    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "1" => Ok(StopBits::One),
            "2" => Ok(StopBits::Two),
            "1.5" | "15" => {
                Err("1.5 stop bits are not supported by the serial transport".to_string())
            }
            _ => Err("expected 1 or 2".to_string()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StopBits::One => "1",
            StopBits::Two => "2",
        }
    }
}

/// Input/output interpretation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Input lines are sent as literal text (plus optional EOL bytes).
    #[default]
    Text,
    /// Input lines are parsed as whitespace-separated byte tokens.
    Byte,
}

impl Mode {
    /// Parse a mode name or its short code (`t`/`b`).
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.to_lowercase().as_str() {
            "t" | "text" => Ok(Mode::Text),
            "b" | "byte" => Ok(Mode::Byte),
            _ => Err("expected 'text' or 'byte'".to_string()),
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            Mode::Text => Mode::Byte,
            Mode::Byte => Mode::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Text => "text",
            Mode::Byte => "byte",
        }
    }
}

/// Serial connection parameters.
///
/// A `Config` is created once at startup and thereafter only replaced
/// wholesale through a validated reconfigure; it is never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Device path. Empty means "do not connect".
    pub path: String,
    pub baud: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Requested read timeout. The effective timeout never drops below the
    /// time one byte needs on the wire (see `core::stream`).
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: String::new(),
            baud: DEFAULT_BAUD,
            data_bits: DEFAULT_DATA_BITS,
            parity: Parity::None,
            stop_bits: StopBits::One,
            timeout: None,
        }
    }
}

/// Display and encoding settings.
///
/// Independent of connection state: edits take effect on the next write or
/// read and never trigger a reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub mode: Mode,
    /// Append the EOL byte sequence to outgoing text.
    pub eol_enable: bool,
    /// Up to 4 trailing bytes encoded big-endian in one integer.
    pub eol_code: u32,
    /// Per-byte display (char, hex, binary, decimal) instead of plain text.
    pub verbose: bool,
    /// Suppress data lines (echo and inbound) on the display.
    pub quiet: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: Mode::Text,
            eol_enable: false,
            eol_code: DEFAULT_EOL_CODE,
            verbose: false,
            quiet: false,
        }
    }
}

/// On-disk configuration file shape.
///
/// All fields are optional; anything absent or unparsable falls back to the
/// built-in default.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub path: Option<String>,
    pub baud: Option<u32>,
    pub data_bits: Option<u8>,
    pub parity: Option<String>,
    pub stop_bits: Option<String>,
    pub timeout: Option<String>,
}

impl FileConfig {
    /// Load the configuration file, returning defaults when it is missing
    /// or malformed.
    pub fn load() -> Self {
        if let Some(path) = Self::file_path() {
            if path.exists() {
                if let Ok(content) = fs::read_to_string(&path) {
                    match toml::from_str(&content) {
                        Ok(config) => return config,
                        Err(e) => warn!("ignoring malformed config file: {}", e),
                    }
                }
            }
        }
        Self::default()
    }

    fn file_path() -> Option<PathBuf> {
        app_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge the file values over the built-in defaults.
    pub fn into_config(self) -> Config {
        let mut config = Config::default();
        if let Some(path) = self.path {
            config.path = path;
        }
        if let Some(baud) = self.baud {
            if baud > 0 {
                config.baud = baud;
            }
        }
        if let Some(bits) = self.data_bits {
            if (5..=8).contains(&bits) {
                config.data_bits = bits;
            }
        }
        if let Some(ref parity) = self.parity {
            match Parity::parse(parity) {
                Ok(p) => config.parity = p,
                Err(e) => warn!("config file parity '{}': {}", parity, e),
            }
        }
        if let Some(ref stop_bits) = self.stop_bits {
            match StopBits::parse(stop_bits) {
                Ok(s) => config.stop_bits = s,
                Err(e) => warn!("config file stop_bits '{}': {}", stop_bits, e),
            }
        }
        if let Some(ref timeout) = self.timeout {
            match parse_duration(timeout) {
                Some(t) => config.timeout = Some(t),
                None => warn!("config file timeout '{}' is not a duration", timeout),
            }
        }
        config
    }
}

/// Application data directory (`~/.serterm`), created on first use.
pub fn app_dir() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)?;
    let dir = home.join(".serterm");
    if !dir.exists() {
        let _ = fs::create_dir_all(&dir);
    }
    Some(dir)
}

/// Parse a duration literal: `500ms`, `250us` or `1s`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Some(ms) = value.strip_suffix("ms") {
        return ms.parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(us) = value.strip_suffix("us") {
        return us.parse::<u64>().ok().map(Duration::from_micros);
    }
    if let Some(secs) = value.strip_suffix('s') {
        return secs.parse::<u64>().ok().map(Duration::from_secs);
    }
    None
}

/// Render a duration the way `parse_duration` reads it.
pub fn format_duration(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{}s", duration.as_secs())
    } else if duration.subsec_nanos() % 1_000_000 == 0 {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{}us", duration.as_micros())
    }
}
