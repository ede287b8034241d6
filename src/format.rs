//! Outbound encoding and inbound/outbound display formatting.
//!
//! Everything that crosses the byte-stream boundary passes through here:
//! user input is encoded into wire bytes (text mode with optional EOL, or
//! byte mode with numeric tokens), and wire bytes are rendered into display
//! lines (plain text or a verbose per-byte dump).

use crate::config::{Mode, Settings};

/// Marker prefix for data received from the device.
pub const INBOUND_MARKER: &str = ">>";
/// Marker prefix for data sent to the device.
pub const OUTBOUND_MARKER: &str = "<<";

/// Line terminator used to detect complete inbound lines and trimmed from
/// plain inbound display.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Result of encoding one input line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Encoded {
    /// Bytes to write to the stream, in input order.
    pub bytes: Vec<u8>,
    /// One warning per skipped invalid byte-mode token.
    pub warnings: Vec<String>,
}

/// Encode an input line into wire bytes according to the current settings.
pub fn encode_outgoing(input: &str, settings: &Settings) -> Encoded {
    match settings.mode {
        Mode::Byte => encode_byte_tokens(input),
        Mode::Text => {
            let mut bytes = input.as_bytes().to_vec();
            if settings.eol_enable {
                bytes.extend_from_slice(&eol_bytes(settings.eol_code));
            }
            Encoded {
                bytes,
                warnings: Vec::new(),
            }
        }
    }
}

/// Parse whitespace-separated byte tokens. Invalid tokens are skipped with a
/// warning; valid bytes keep their original order.
fn encode_byte_tokens(input: &str) -> Encoded {
    let mut encoded = Encoded::default();
    for token in input.split_whitespace() {
        match parse_byte_token(token) {
            Some(byte) => encoded.bytes.push(byte),
            None => encoded.warnings.push(format!(
                "'{}' is not a byte literal (0x.., 0b.., 0-255 or a single character), skipped",
                token
            )),
        }
    }
    encoded
}

/// Parse one byte-mode token.
///
/// Numeric interpretation wins: `5` is the byte 5, not ASCII '5'. The
/// literal-character fallback applies only to single-character tokens that
/// fail every numeric parse.
pub fn parse_byte_token(token: &str) -> Option<u8> {
    if let Some(hex) = token.strip_prefix("0x") {
        return u8::from_str_radix(hex, 16).ok();
    }
    if let Some(bin) = token.strip_prefix("0b") {
        return u8::from_str_radix(bin, 2).ok();
    }
    if let Ok(value) = token.parse::<u8>() {
        return Some(value);
    }
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => u8::try_from(c as u32).ok(),
        _ => None,
    }
}

/// Serialize an EOL code into its trailing byte sequence.
///
/// The code is read big-endian and leading zero bytes are dropped, so
/// `0x0A` is one byte and `0x0A0D` is two. A code of exactly zero yields a
/// single explicit zero byte, not an empty sequence.
pub fn eol_bytes(code: u32) -> Vec<u8> {
    if code == 0 {
        return vec![0];
    }
    let mut bytes = Vec::with_capacity(4);
    for shift in [24u32, 16, 8, 0] {
        let byte = ((code >> shift) & 0xFF) as u8;
        if bytes.is_empty() && byte == 0 {
            continue;
        }
        bytes.push(byte);
    }
    bytes
}

/// Render an inbound chunk into display lines.
///
/// Byte mode and verbose mode both render one line per byte; plain text
/// mode renders a single marker line with one trailing terminator trimmed.
pub fn format_inbound(bytes: &[u8], settings: &Settings) -> Vec<String> {
    if settings.verbose || settings.mode == Mode::Byte {
        return bytes
            .iter()
            .map(|&b| verbose_line(INBOUND_MARKER, b))
            .collect();
    }
    let trimmed = trim_terminator(bytes);
    vec![format!(
        "{} {}",
        INBOUND_MARKER,
        String::from_utf8_lossy(trimmed)
    )]
}

/// Render the echo of an outbound write.
///
/// `input` is what the user typed; `wire` is what actually went out (EOL
/// included). Verbose mode dumps the wire bytes, plain mode echoes the
/// input line.
pub fn format_outbound(input: &str, wire: &[u8], settings: &Settings) -> Vec<String> {
    if settings.verbose {
        return wire
            .iter()
            .map(|&b| verbose_line(OUTBOUND_MARKER, b))
            .collect();
    }
    vec![format!("{} {}", OUTBOUND_MARKER, input)]
}

/// One verbose display line: marker, printable char (or '.'), hex, binary,
/// decimal.
fn verbose_line(marker: &str, byte: u8) -> String {
    let shown = if byte.is_ascii_graphic() || byte == b' ' {
        byte as char
    } else {
        '.'
    };
    format!("{} {} 0x{:02x} 0b{:08b} {}", marker, shown, byte, byte, byte)
}

/// Trim one trailing line terminator. Idempotent: already-trimmed input is
/// returned unchanged.
pub fn trim_terminator(bytes: &[u8]) -> &[u8] {
    match bytes.split_last() {
        Some((&last, rest)) if last == LINE_TERMINATOR => rest,
        _ => bytes,
    }
}
