//! Terminal user interface.
//!
//! This module provides the display surface and input line:
//!
//! - **panel**: scrollback panel of styled lines
//! - **prompt**: editable prompt line with input history
//!
//! The session talks to the display only through the `Surface` trait, so
//! tests can substitute a recording sink.

pub mod panel;
pub mod prompt;

pub use panel::Panel;
pub use prompt::Prompt;

/// Style hint for a display line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    /// Key/value dumps, help text, command results.
    Info,
    /// Echo of the command the user just entered.
    Echo,
    /// Connection established and similar good news.
    Success,
    Warning,
    Error,
    /// Data received from the device.
    Inbound,
    /// Echo of data sent to the device.
    Outbound,
}

/// The display surface consumed by the session: push styled lines, clear.
pub trait Surface {
    fn push(&mut self, line: String, style: LineStyle);
    fn clear(&mut self);
}
