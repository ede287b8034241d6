//! Prompt line editing with input history.

use std::collections::VecDeque;
use std::io::{self, Write};

use crossterm::{
    cursor::MoveTo,
    queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use unicode_width::UnicodeWidthStr;

/// Maximum number of remembered input lines.
const HISTORY_LIMIT: usize = 200;

const PROMPT: &str = "serterm$ ";

/// Single editable input line. Submitted lines go into an in-memory
/// history navigable with Up/Down.
pub struct Prompt {
    /// Current edit buffer.
    buffer: String,
    /// Cursor position as a char index into `buffer`.
    cursor: usize,
    history: VecDeque<String>,
    /// Position while browsing history; `None` means editing a fresh line.
    history_index: Option<usize>,
    /// Stash of the fresh line while browsing history.
    stash: String,
    dirty: bool,
}

impl Default for Prompt {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompt {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            cursor: 0,
            history: VecDeque::new(),
            history_index: None,
            stash: String::new(),
            dirty: true,
        }
    }

    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn insert(&mut self, c: char) {
        let at = self.byte_index(self.cursor);
        self.buffer.insert(at, c);
        self.cursor += 1;
        self.dirty = true;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let at = self.byte_index(self.cursor);
            self.buffer.remove(at);
            self.dirty = true;
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.buffer.chars().count() {
            let at = self.byte_index(self.cursor);
            self.buffer.remove(at);
            self.dirty = true;
        }
    }

    pub fn left(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            self.dirty = true;
        }
    }

    pub fn right(&mut self) {
        if self.cursor < self.buffer.chars().count() {
            self.cursor += 1;
            self.dirty = true;
        }
    }

    pub fn home(&mut self) {
        self.cursor = 0;
        self.dirty = true;
    }

    pub fn end(&mut self) {
        self.cursor = self.buffer.chars().count();
        self.dirty = true;
    }

    /// Recall the previous history entry.
    pub fn history_up(&mut self) {
        if self.history.is_empty() {
            return;
        }
        let next = match self.history_index {
            None => {
                self.stash = self.buffer.clone();
                self.history.len() - 1
            }
            Some(0) => 0,
            Some(i) => i - 1,
        };
        self.history_index = Some(next);
        self.buffer = self.history[next].clone();
        self.cursor = self.buffer.chars().count();
        self.dirty = true;
    }

    /// Walk back toward the fresh line.
    pub fn history_down(&mut self) {
        let Some(index) = self.history_index else {
            return;
        };
        if index + 1 < self.history.len() {
            self.history_index = Some(index + 1);
            self.buffer = self.history[index + 1].clone();
        } else {
            self.history_index = None;
            self.buffer = std::mem::take(&mut self.stash);
        }
        self.cursor = self.buffer.chars().count();
        self.dirty = true;
    }

    /// Take the completed line, adding it to history.
    pub fn submit(&mut self) -> String {
        let line = std::mem::take(&mut self.buffer);
        self.cursor = 0;
        self.history_index = None;
        self.stash.clear();
        self.dirty = true;
        if !line.trim().is_empty() && self.history.back() != Some(&line) {
            self.history.push_back(line.clone());
            while self.history.len() > HISTORY_LIMIT {
                self.history.pop_front();
            }
        }
        line
    }

    /// Draw the prompt on `row` and park the terminal cursor at the edit
    /// position.
    pub fn render(&self, out: &mut impl Write, row: u16, cols: u16) -> io::Result<()> {
        queue!(
            out,
            MoveTo(0, row),
            Clear(ClearType::CurrentLine),
            SetForegroundColor(Color::AnsiValue(154)),
            Print(PROMPT),
            ResetColor,
            Print(&self.buffer)
        )?;
        let prefix: String = self.buffer.chars().take(self.cursor).collect();
        let x = (PROMPT.width() + prefix.width()).min(cols.saturating_sub(1) as usize);
        queue!(out, MoveTo(x as u16, row))?;
        Ok(())
    }

    fn byte_index(&self, char_index: usize) -> usize {
        self.buffer
            .char_indices()
            .nth(char_index)
            .map(|(i, _)| i)
            .unwrap_or(self.buffer.len())
    }
}
