//! Text-display widget
//!
//! [`TextWidget`] is what the dispatcher needs from whatever shows the text.
//! [`MemoryWidget`] is the in-memory implementation used for documents small
//! enough to hold as lines; it also runs ex commands directly on those lines
//! (see [`ExTarget`]) and provides the character-level editing primitives
//! that normal and insert mode are built from.

use crate::address::{AddressContext, AddressRange, LineRange, Markers};
use crate::error::{ExError, Result};
use crate::ex_command::ExTarget;
use crate::matcher::{Matcher, SearchFlags};
use crate::registers::{RegisterContent, SharedRegisters};
use crate::stream::SubstituteFlags;
use crate::vi_regex::{self, RegexFlavor};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// The display side of a document
pub trait TextWidget {
    fn line_count(&self) -> usize;

    /// Text of 1-based `lines`, each line terminated by `\n`
    fn get_visible_text(&self, lines: LineRange) -> Vec<u8>;

    /// Replace 1-based `lines` with `text`; an empty range inserts before `lines.begin`.
    fn replace_visible(&mut self, lines: LineRange, text: &[u8]);

    /// Make 1-based `line` visible
    fn scroll_to(&mut self, line: usize);

    fn is_streaming_mode(&self) -> bool;
}

/// Cursor position: 0-based line and character column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    pub line: usize,
    pub col: usize,
}

impl Position {
    pub const fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

const DEFAULT_HEIGHT: usize = 40;

#[derive(Debug)]
pub struct MemoryWidget {
    lines: Vec<String>,
    trailing_newline: bool,
    cursor: Position,
    first_visible: usize,
    height: usize,
    markers: Markers,
    registers: SharedRegisters,
    flavor: RegexFlavor,
    wrap_scan: bool,
    path: Option<PathBuf>,
    modified: bool,
}

/// Byte offset of character column `col` in `s` (end of string if past it)
pub fn byte_index(s: &str, col: usize) -> usize {
    s.char_indices().nth(col).map_or(s.len(), |(i, _)| i)
}

fn char_column(s: &str, byte: usize) -> usize {
    s[..byte.min(s.len())].chars().count()
}

/// Split text into lines; a trailing newline does not start another line.
fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let body = text.strip_suffix('\n').unwrap_or(text);
    body.split('\n').map(str::to_string).collect()
}

impl MemoryWidget {
    pub fn new(registers: SharedRegisters) -> Self {
        Self {
            lines: Vec::new(),
            trailing_newline: true,
            cursor: Position::default(),
            first_visible: 0,
            height: DEFAULT_HEIGHT,
            markers: Markers::new(),
            registers,
            flavor: RegexFlavor::Vi,
            wrap_scan: true,
            path: None,
            modified: false,
        }
    }

    pub fn from_text(text: &str, registers: SharedRegisters) -> Self {
        let mut widget = Self::new(registers);
        widget.lines = split_lines(text);
        widget.trailing_newline = text.is_empty() || text.ends_with('\n');
        widget
    }

    /// Load `path`; it must be valid UTF-8.
    pub fn open(path: &Path, registers: SharedRegisters) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| ExError::io(format!("cannot open {}", path.display()), e))?;
        let text = String::from_utf8(bytes).map_err(|_| {
            ExError::Precondition(format!(
                "{} is not valid UTF-8, open it in streaming mode",
                path.display()
            ))
        })?;
        let mut widget = Self::from_text(&text, registers);
        widget.path = Some(path.to_path_buf());
        debug!("Loaded {} ({} lines)", path.display(), widget.lines.len());
        Ok(widget)
    }

    pub fn set_flavor(&mut self, flavor: RegexFlavor) {
        self.flavor = flavor;
    }

    pub fn set_wrap_scan(&mut self, wrap_scan: bool) {
        self.wrap_scan = wrap_scan;
    }

    pub fn set_height(&mut self, height: usize) {
        self.height = height.max(1);
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    pub fn markers_mut(&mut self) -> &mut Markers {
        &mut self.markers
    }

    pub fn first_visible_line(&self) -> usize {
        self.first_visible
    }

    /// Whole document as text
    pub fn text(&self) -> String {
        let mut text = self.lines.join("\n");
        // An empty last line only exists if it is terminated.
        let last_empty = self.lines.last().is_some_and(|l| l.is_empty());
        if (self.trailing_newline || last_empty) && !self.lines.is_empty() {
            text.push('\n');
        }
        text
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn line(&self, line: usize) -> &str {
        self.lines.get(line).map_or("", String::as_str)
    }

    /// Length of `line` in characters
    pub fn line_len(&self, line: usize) -> usize {
        self.line(line).chars().count()
    }

    pub fn cursor(&self) -> Position {
        self.cursor
    }

    /// Move the cursor, clamped to the document (the column may sit just past
    /// the last character, as in insert mode).
    pub fn set_cursor(&mut self, pos: Position) {
        let line = pos.line.min(self.lines.len().saturating_sub(1));
        let col = pos.col.min(self.line_len(line));
        self.cursor = Position::new(line, col);
        self.scroll_to(line + 1);
    }

    /// Keep the cursor on a character (normal mode).
    pub fn clamp_cursor(&mut self) {
        let max = self.line_len(self.cursor.line).saturating_sub(1);
        if self.cursor.col > max {
            self.cursor.col = max;
        }
    }

    pub fn first_non_blank(&self, line: usize) -> usize {
        self.line(line).chars().take_while(|c| c.is_whitespace()).count()
    }

    /// A document always has a line to type into.
    pub fn ensure_line(&mut self) {
        if self.lines.is_empty() {
            self.lines.push(String::new());
        }
    }

    fn touch(&mut self) {
        self.modified = true;
    }

    /// Lines `begin..=end` (1-based), each followed by a newline
    pub fn lines_text(&self, begin: usize, end: usize) -> String {
        let end = end.min(self.lines.len());
        if begin == 0 || begin > end {
            return String::new();
        }
        let mut text = String::new();
        for line in &self.lines[begin - 1..end] {
            text.push_str(line);
            text.push('\n');
        }
        text
    }

    /// Replace `remove` lines at 0-based `at` with the lines of `text`.
    /// Returns the number of lines inserted.
    fn splice(&mut self, at: usize, remove: usize, text: &str) -> usize {
        let at = at.min(self.lines.len());
        let end = (at + remove).min(self.lines.len());
        let new = split_lines(text);
        let inserted = new.len();
        self.lines.splice(at..end, new);
        self.touch();
        inserted
    }

    /// Insert empty line at 0-based `at`.
    pub fn open_line(&mut self, at: usize) {
        let at = at.min(self.lines.len());
        self.lines.insert(at, String::new());
        self.markers.on_insert(at, 1);
        self.touch();
    }

    /// Text from `start` up to (not including) `end`
    pub fn text_between(&self, start: Position, end: Position) -> String {
        if end <= start || self.lines.is_empty() {
            return String::new();
        }
        let last = self.lines.len() - 1;
        let end = if end.line > last {
            Position::new(last, self.line_len(last))
        } else {
            end
        };
        let first = self.line(start.line);
        if start.line == end.line {
            return first[byte_index(first, start.col)..byte_index(first, end.col)].to_string();
        }
        let mut text = first[byte_index(first, start.col)..].to_string();
        for line in start.line + 1..end.line {
            text.push('\n');
            text.push_str(self.line(line));
        }
        text.push('\n');
        let tail = self.line(end.line);
        text.push_str(&tail[..byte_index(tail, end.col)]);
        text
    }

    /// Remove the text from `start` up to (not including) `end`.
    pub fn delete_between(&mut self, start: Position, end: Position) {
        if end <= start || start.line >= self.lines.len() {
            return;
        }
        let last = self.lines.len() - 1;
        let end = if end.line > last {
            Position::new(last, self.line_len(last))
        } else {
            end
        };
        let head_end = byte_index(self.line(start.line), start.col);
        let tail_start = byte_index(self.line(end.line), end.col);
        let joined = format!(
            "{}{}",
            &self.line(start.line)[..head_end],
            &self.line(end.line)[tail_start..]
        );
        self.lines.splice(start.line..=end.line, [joined]);
        if end.line > start.line {
            self.markers.on_erase(LineRange::new(start.line + 2, end.line + 1));
        }
        self.touch();
    }

    /// Insert `text` at `pos`; returns the position just after it.
    pub fn insert_str(&mut self, pos: Position, text: &str) -> Position {
        self.ensure_line();
        let line = pos.line.min(self.lines.len() - 1);
        let current = self.line(line).to_string();
        let split = byte_index(&current, pos.col);
        let (head, tail) = current.split_at(split);

        let pieces: Vec<&str> = text.split('\n').collect();
        let added = pieces.len() - 1;
        let last_piece = pieces[added];
        let end_col = if added == 0 {
            char_column(head, head.len()) + last_piece.chars().count()
        } else {
            last_piece.chars().count()
        };

        let mut new_lines = Vec::with_capacity(pieces.len());
        for (i, piece) in pieces.iter().enumerate() {
            let mut s = String::new();
            if i == 0 {
                s.push_str(head);
            }
            s.push_str(piece);
            if i == added {
                s.push_str(tail);
            }
            new_lines.push(s);
        }
        self.lines.splice(line..=line, new_lines);
        if added > 0 {
            self.markers.on_insert(line + 1, added);
        }
        self.touch();
        Position::new(line + added, end_col)
    }

    /// Overwrite the character at `pos`.
    pub fn replace_char(&mut self, pos: Position, c: char) {
        if let Some(line) = self.lines.get_mut(pos.line) {
            let start = byte_index(line, pos.col);
            if start < line.len() {
                let end = byte_index(line, pos.col + 1);
                line.replace_range(start..end, c.encode_utf8(&mut [0; 4]));
                self.modified = true;
            }
        }
    }

    /// Search from `from` for `pattern`, wrapping once when enabled.
    pub fn find(&self, pattern: &str, flags: SearchFlags, forward: bool, from: Position) -> Result<Option<Position>> {
        let matcher = Matcher::new(pattern, flags, self.flavor)?;
        let n = self.lines.len();
        if n == 0 {
            return Ok(None);
        }

        let hit = |line: usize, after: Option<usize>, before: Option<usize>| -> Option<Position> {
            let text = self.line(line);
            let bytes = text.as_bytes();
            let found = if forward {
                let start = after.map_or(0, |col| byte_index(text, col + 1));
                matcher.find(&bytes[start..]).map(|(s, _)| s + start)
            } else {
                let end = before.map_or(bytes.len() + 1, |col| byte_index(text, col));
                matcher.rfind(bytes, end).map(|(s, _)| s)
            };
            found.map(|byte| Position::new(line, char_column(text, byte)))
        };

        // rest of the current line
        let first = if forward {
            hit(from.line, Some(from.col), None)
        } else {
            hit(from.line, None, Some(from.col))
        };
        if first.is_some() {
            return Ok(first);
        }

        let order: Vec<usize> = if forward {
            let after = from.line + 1..n;
            if self.wrap_scan {
                after.chain(0..=from.line).collect()
            } else {
                after.collect()
            }
        } else {
            let before = (0..from.line).rev();
            if self.wrap_scan {
                before.chain((from.line..n).rev()).collect()
            } else {
                before.collect()
            }
        };

        Ok(order.into_iter().find_map(|line| hit(line, None, None)))
    }

    fn resolve_with_destination(&mut self, range: &AddressRange) -> Result<(LineRange, usize)> {
        let lines = range.resolve(self)?;
        let destination = range
            .resolve_destination(self)?
            .ok_or_else(|| ExError::Precondition("missing destination address".to_string()))?;
        Ok((lines, destination))
    }

    /// Clamp a resolved range to existing lines; `None` if nothing is left.
    fn existing(&self, range: LineRange) -> Option<LineRange> {
        let clamped = LineRange::new(range.begin, range.end.min(self.lines.len()));
        (!clamped.is_empty()).then_some(clamped)
    }

    fn settle(&mut self, line: usize) {
        let line = line.max(1) - 1;
        self.set_cursor(Position::new(line, self.first_non_blank(line)));
        if self.lines.is_empty() {
            self.cursor = Position::default();
        }
    }

    fn insert_lines_after(&mut self, after: usize, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        if self.lines.is_empty() {
            self.trailing_newline = true;
        }
        let after = after.min(self.lines.len());
        let inserted = self.splice(after, 0, text);
        self.markers.on_insert(after, inserted);
        self.settle(after + inserted);
        inserted
    }

    /// Join lines `range` the vi way: one space between pieces, leading
    /// whitespace of joined lines dropped.
    pub fn join_lines(&mut self, range: LineRange) -> usize {
        let Some(range) = self.existing(range) else {
            return 0;
        };
        if range.end <= range.begin {
            return 0;
        }
        let mut joined = self.line(range.begin - 1).to_string();
        let mut col = 0;
        for line in range.begin..range.end {
            let next = self.line(line).trim_start();
            col = joined.chars().count();
            if !next.is_empty() {
                if !joined.is_empty() && !joined.ends_with(char::is_whitespace) && !next.starts_with(')') {
                    joined.push(' ');
                }
                joined.push_str(next);
            }
        }
        self.lines.splice(range.begin - 1..range.end, [joined]);
        self.markers.on_erase(LineRange::new(range.begin + 1, range.end));
        self.touch();
        self.set_cursor(Position::new(range.begin - 1, col));
        range.end - range.begin
    }
}

impl TextWidget for MemoryWidget {
    fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn get_visible_text(&self, lines: LineRange) -> Vec<u8> {
        self.lines_text(lines.begin, lines.end).into_bytes()
    }

    fn replace_visible(&mut self, lines: LineRange, text: &[u8]) {
        let text = String::from_utf8_lossy(text);
        let at = lines.begin.max(1) - 1;
        let remove = if lines.end >= lines.begin { lines.len() } else { 0 };
        let inserted = self.splice(at, remove, &text);
        if remove > inserted {
            self.markers.on_erase(LineRange::new(at + inserted + 1, at + remove));
        } else if inserted > remove {
            self.markers.on_insert(at + remove, inserted - remove);
        }
    }

    fn scroll_to(&mut self, line: usize) {
        let line = line.max(1) - 1;
        if line < self.first_visible {
            self.first_visible = line;
        } else if line >= self.first_visible + self.height {
            self.first_visible = line + 1 - self.height;
        }
    }

    fn is_streaming_mode(&self) -> bool {
        false
    }
}

impl AddressContext for MemoryWidget {
    fn current_line(&self) -> usize {
        if self.lines.is_empty() {
            0
        } else {
            self.cursor.line + 1
        }
    }

    fn known_line_count(&self) -> Option<usize> {
        Some(self.lines.len())
    }

    fn line_count(&mut self) -> Result<usize> {
        Ok(self.lines.len())
    }

    fn marker_line(&self, marker: char) -> Option<usize> {
        self.markers.get(marker)
    }

    fn search_line(&mut self, pattern: &str, forward: bool) -> Result<Option<usize>> {
        // Addresses search whole lines, so skip the rest of the current one.
        let line = self.cursor.line;
        let from = if forward {
            Position::new(line, self.line_len(line))
        } else {
            Position::new(line, 0)
        };
        let flags = SearchFlags::default();
        let found = self.find(pattern, flags, forward, from)?;
        Ok(found.map(|p| p.line + 1))
    }
}

impl ExTarget for MemoryWidget {
    fn delete(&mut self, range: &AddressRange, register: Option<char>) -> Result<usize> {
        let resolved = range.resolve(self)?;
        let Some(lines) = self.existing(resolved) else {
            return Ok(0);
        };
        let text = self.lines_text(lines.begin, lines.end);
        self.registers.borrow_mut().delete(register, RegisterContent::lines(text))?;
        self.splice(lines.begin - 1, lines.len(), "");
        self.markers.on_erase(lines);
        self.settle(lines.begin.min(self.lines.len()));
        Ok(lines.len())
    }

    fn yank(&mut self, range: &AddressRange, register: Option<char>) -> Result<usize> {
        let resolved = range.resolve(self)?;
        let Some(lines) = self.existing(resolved) else {
            return Ok(0);
        };
        let text = self.lines_text(lines.begin, lines.end);
        self.registers.borrow_mut().yank(register, RegisterContent::lines(text))?;
        Ok(lines.len())
    }

    fn join(&mut self, range: &AddressRange) -> Result<usize> {
        let lines = range.resolve(self)?;
        Ok(self.join_lines(lines))
    }

    fn substitute(
        &mut self,
        range: &AddressRange,
        pattern: &str,
        replacement: &str,
        flags: SubstituteFlags,
    ) -> Result<usize> {
        let search = SearchFlags {
            match_case: !flags.ignore_case,
            ..SearchFlags::default()
        };
        let matcher = Matcher::new(pattern, search, self.flavor)?;
        let replacement = vi_regex::convert_replacement(replacement, self.flavor);
        let resolved = range.resolve(self)?;
        let Some(lines) = self.existing(resolved) else {
            return Ok(0);
        };

        let mut actions = 0;
        let mut last = None;
        for index in (lines.begin - 1..lines.end).rev() {
            let Some(new) = matcher.substitute(self.line(index).as_bytes(), replacement.as_bytes(), flags.global)
            else {
                continue;
            };
            actions += 1;
            let new = String::from_utf8_lossy(&new).into_owned();
            let pieces: Vec<String> = new.split('\n').map(str::to_string).collect();
            let added = pieces.len() - 1;
            self.lines.splice(index..=index, pieces);
            if added > 0 {
                self.markers.on_insert(index + 1, added);
            }
            last.get_or_insert(index + added + 1);
        }
        if let Some(line) = last {
            self.touch();
            self.settle(line);
        }
        Ok(actions)
    }

    fn insert_text(&mut self, range: &AddressRange, text: &str) -> Result<usize> {
        let lines = range.resolve(self)?;
        Ok(self.insert_lines_after(lines.begin - 1, text))
    }

    fn append_text(&mut self, range: &AddressRange, text: &str) -> Result<usize> {
        let end = range.end.resolve(self)?;
        Ok(self.insert_lines_after(end, text))
    }

    fn copy(&mut self, range: &AddressRange) -> Result<usize> {
        let (lines, destination) = self.resolve_with_destination(range)?;
        let Some(lines) = self.existing(lines) else {
            return Ok(0);
        };
        let text = self.lines_text(lines.begin, lines.end);
        Ok(self.insert_lines_after(destination, &text))
    }

    fn move_lines(&mut self, range: &AddressRange) -> Result<usize> {
        let (lines, destination) = self.resolve_with_destination(range)?;
        let Some(lines) = self.existing(lines) else {
            return Ok(0);
        };
        if destination >= lines.begin && destination < lines.end {
            return Err(ExError::Precondition("cannot move lines into themselves".to_string()));
        }
        let text = self.lines_text(lines.begin, lines.end);
        self.splice(lines.begin - 1, lines.len(), "");
        self.markers.on_erase(lines);
        let target = if destination > lines.end {
            destination - lines.len()
        } else {
            destination
        };
        Ok(self.insert_lines_after(target, &text))
    }

    fn read_range(&mut self, range: &AddressRange) -> Result<(LineRange, Vec<u8>)> {
        let lines = range.resolve(self)?;
        Ok((lines, self.lines_text(lines.begin, lines.end).into_bytes()))
    }

    fn write_range(&mut self, range: &AddressRange, path: &Path, append: bool) -> Result<usize> {
        let resolved = range.resolve(self)?;
        let Some(lines) = self.existing(resolved) else {
            return Ok(0);
        };
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .map_err(|e| ExError::io(format!("cannot open {}", path.display()), e))?;
        file.write_all(self.lines_text(lines.begin, lines.end).as_bytes())
            .map_err(|source| ExError::PartialWrite {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(lines.len())
    }

    fn write(&mut self) -> Result<()> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| ExError::Precondition("no file name".to_string()))?;
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut target = NamedTempFile::new_in(parent)
            .map_err(|e| ExError::io(format!("cannot create temp file in {}", parent.display()), e))?;
        target
            .write_all(self.text().as_bytes())
            .map_err(|source| ExError::PartialWrite {
                path: path.clone(),
                source,
            })?;
        if let Ok(meta) = fs::metadata(&path) {
            if let Err(e) = fs::set_permissions(target.path(), meta.permissions()) {
                warn!("Cannot keep permissions of {}: {}", path.display(), e);
            }
        }
        target
            .persist(&path)
            .map_err(|e| ExError::io(format!("cannot save {}", path.display()), e.error))?;
        self.modified = false;
        info!("Saved {}", path.display());
        Ok(())
    }

    fn set_marker(&mut self, marker: char, line: usize) -> Result<()> {
        self.markers.set(marker, line)
    }

    fn goto(&mut self, line: usize) -> Result<()> {
        self.settle(line);
        Ok(())
    }

    fn registers(&self) -> SharedRegisters {
        self.registers.clone()
    }
}
