//! Scrollback panel of styled display lines.

use std::collections::VecDeque;
use std::io::{self, Write};

use crossterm::{
    cursor::MoveTo,
    queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use unicode_width::UnicodeWidthChar;

use super::{LineStyle, Surface};

/// Scrollback cap. Oldest lines fall off first.
const MAX_LINES: usize = 5000;

/// A stack of styled lines, newest at the bottom, rendered into the region
/// above the status and prompt rows.
pub struct Panel {
    lines: VecDeque<(String, LineStyle)>,
    dirty: bool,
}

impl Default for Panel {
    fn default() -> Self {
        Self::new()
    }
}

impl Surface for Panel {
    fn push(&mut self, line: String, style: LineStyle) {
        self.lines.push_back((line, style));
        while self.lines.len() > MAX_LINES {
            self.lines.pop_front();
        }
        self.dirty = true;
    }

    fn clear(&mut self) {
        self.lines.clear();
        self.dirty = true;
    }
}

impl Panel {
    pub fn new() -> Self {
        Self {
            lines: VecDeque::new(),
            dirty: false,
        }
    }

    /// True once since the last render.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Draw the newest lines into rows `0..rows`.
    pub fn render(&self, out: &mut impl Write, cols: u16, rows: u16) -> io::Result<()> {
        let visible = rows as usize;
        let start = self.lines.len().saturating_sub(visible);
        for row in 0..visible {
            queue!(out, MoveTo(0, row as u16), Clear(ClearType::CurrentLine))?;
            if let Some((line, style)) = self.lines.get(start + row) {
                queue!(
                    out,
                    SetForegroundColor(style_color(*style)),
                    Print(truncate_to_width(line, cols as usize)),
                    ResetColor
                )?;
            }
        }
        Ok(())
    }
}

/// Map a style hint onto a terminal color.
///
/// The palette follows the 256-color codes the display historically used:
/// gray echo, light blue outbound, light green inbound.
fn style_color(style: LineStyle) -> Color {
    match style {
        LineStyle::Info => Color::AnsiValue(250),
        LineStyle::Echo => Color::AnsiValue(59),
        LineStyle::Success => Color::AnsiValue(46),
        LineStyle::Warning => Color::AnsiValue(214),
        LineStyle::Error => Color::AnsiValue(196),
        LineStyle::Inbound => Color::AnsiValue(82),
        LineStyle::Outbound => Color::AnsiValue(81),
    }
}

/// Cut a line at the terminal edge, respecting wide characters.
fn truncate_to_width(line: &str, width: usize) -> String {
    let mut used = 0;
    let mut out = String::new();
    for c in line.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > width {
            break;
        }
        used += w;
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_cap() {
        let mut panel = Panel::new();
        for i in 0..(MAX_LINES + 10) {
            panel.push(format!("line {}", i), LineStyle::Info);
        }
        assert_eq!(panel.lines.len(), MAX_LINES);
        // Oldest lines dropped first.
        assert_eq!(panel.lines.front().map(|(l, _)| l.as_str()), Some("line 10"));
    }

    #[test]
    fn test_take_dirty_resets() {
        let mut panel = Panel::new();
        panel.push("x".to_string(), LineStyle::Info);
        assert!(panel.take_dirty());
        assert!(!panel.take_dirty());
    }

    #[test]
    fn test_truncate_to_width() {
        assert_eq!(truncate_to_width("hello", 3), "hel");
        assert_eq!(truncate_to_width("hello", 10), "hello");
        // A fullwidth char is two columns; it must not straddle the edge.
        assert_eq!(truncate_to_width("a全b", 2), "a");
    }
}
