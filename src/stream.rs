//! Stream Engine
//!
//! [`ExStream`] edits a document that is never held in memory. On attach the
//! document is copied into a private work file; navigation reads lines from
//! it on demand (forward with a widening line buffer, backward by re-reading
//! the block before the current offset), and every mutation is one linear
//! pass of a [`StreamLine`] from the work file into a scratch file. The
//! scratch file replaces the work file only when the pass finished without
//! an I/O error and did something. [`ExStream::write`] copies the work file
//! back over the document.
//!
//! Files whose lines do not fit into the configured buffer are handled in
//! "block mode": oversized stretches are treated as opaque blocks of
//! `buffer_size` bytes, and the line count is estimated instead of counted.

use crate::address::{AddressContext, AddressRange, LineRange, Markers};
use crate::disk_space;
use crate::error::{ExError, Result};
use crate::matcher::{Matcher, SearchFlags};
use crate::registers::{RegisterContent, Registers, SharedRegisters};
use crate::stream_line::{self, Handle, LineAction, StreamLine};
use crate::vi_regex::{self, RegexFlavor};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;
pub const DEFAULT_LINE_SIZE: usize = 500;

/// Shared flag used to abandon a running search or line count.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Tunables for an [`ExStream`]
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Largest line the engine reads as one line; longer stretches are blocks
    pub buffer_size: usize,
    /// Initial line buffer, widened on demand up to `buffer_size`
    pub line_size: usize,
    /// Where work and scratch files live (system temp dir when unset)
    pub temp_dir: Option<PathBuf>,
    pub flavor: RegexFlavor,
    /// Searches wrap around the end of the document once
    pub wrap_scan: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            line_size: DEFAULT_LINE_SIZE,
            temp_dir: None,
            flavor: RegexFlavor::Vi,
            wrap_scan: true,
        }
    }
}

/// Substitution modifiers (`:s/a/b/gi`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubstituteFlags {
    pub global: bool,
    pub ignore_case: bool,
}

/// Result of [`ExStream::verify_line_count`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCountCheck {
    pub recorded: Option<usize>,
    pub actual: usize,
}

impl LineCountCheck {
    pub fn is_consistent(&self) -> bool {
        self.recorded == Some(self.actual)
    }
}

/// Read cursor into the work file
#[derive(Debug, Clone, Default)]
struct Position {
    /// 0-based line, `None` before the first read
    line: Option<usize>,
    offset: u64,
    next_offset: u64,
    text: Vec<u8>,
}

pub struct ExStream {
    options: StreamOptions,
    path: Option<PathBuf>,
    work: Option<NamedTempFile>,
    pos: Position,
    line_size: usize,
    line_count: Option<usize>,
    line_count_estimated: bool,
    block_mode: bool,
    modified: bool,
    markers: Markers,
    registers: SharedRegisters,
    cancel: CancelToken,
}

impl ExStream {
    pub fn new(options: StreamOptions, registers: SharedRegisters) -> Self {
        let line_size = options.line_size.clamp(1, options.buffer_size.max(1));
        Self {
            options,
            path: None,
            work: None,
            pos: Position::default(),
            line_size,
            line_count: None,
            line_count_estimated: false,
            block_mode: false,
            modified: false,
            markers: Markers::new(),
            registers,
            cancel: CancelToken::new(),
        }
    }

    /// Open `path` for streaming and position on its first line.
    pub fn attach(&mut self, path: &Path) -> Result<()> {
        self.detach();

        let mut source =
            File::open(path).map_err(|e| ExError::io(format!("cannot open {}", path.display()), e))?;
        let temp_dir = self.temp_dir();
        let mut work = NamedTempFile::new_in(&temp_dir)
            .map_err(|e| ExError::io(format!("cannot create work file in {}", temp_dir.display()), e))?;
        io::copy(&mut source, work.as_file_mut())
            .map_err(|e| ExError::io(format!("cannot copy {} into work file", path.display()), e))?;

        debug!("Attached {} (work file {})", path.display(), work.path().display());
        self.path = Some(path.to_path_buf());
        self.work = Some(work);
        self.goto_line(0)?;
        Ok(())
    }

    /// Close the document; work and scratch files are removed.
    pub fn detach(&mut self) {
        if let Some(path) = self.path.take() {
            debug!("Detached {}", path.display());
        }
        self.work = None;
        self.pos = Position::default();
        self.line_size = self.options.line_size.clamp(1, self.options.buffer_size.max(1));
        self.line_count = None;
        self.line_count_estimated = false;
        self.block_mode = false;
        self.modified = false;
        self.markers.clear();
    }

    pub fn is_attached(&self) -> bool {
        self.work.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_block_mode(&self) -> bool {
        self.block_mode
    }

    /// The last line count came from a block-mode estimate
    pub fn is_line_count_estimated(&self) -> bool {
        self.line_count_estimated
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    pub fn set_flavor(&mut self, flavor: RegexFlavor) {
        self.options.flavor = flavor;
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    pub fn markers_mut(&mut self) -> &mut Markers {
        &mut self.markers
    }

    pub fn registers(&self) -> &SharedRegisters {
        &self.registers
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// 0-based current line, `None` when detached or the document is empty
    pub fn get_current_line(&self) -> Option<usize> {
        self.pos.line
    }

    /// Text of the current line, without terminator
    pub fn get_line(&self) -> &[u8] {
        &self.pos.text
    }

    /// Line count if already known
    pub fn get_line_count(&self) -> Option<usize> {
        self.line_count
    }

    /// Set marker `marker` on the current line.
    pub fn marker_add(&mut self, marker: char) -> Result<()> {
        self.work_file()?;
        let line = self.pos.line.map_or(0, |l| l + 1);
        self.markers.set(marker, line)
    }

    fn temp_dir(&self) -> PathBuf {
        self.options.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    fn work_file(&self) -> Result<&NamedTempFile> {
        self.work.as_ref().ok_or(ExError::Detached)
    }

    fn work_len(&self) -> Result<u64> {
        let work = self.work_file()?;
        work.as_file()
            .metadata()
            .map(|m| m.len())
            .map_err(|e| ExError::io("cannot stat work file", e))
    }

    fn enter_block_mode(&mut self) {
        if !self.block_mode {
            warn!(
                "No line break within {} bytes, switching to block mode",
                self.options.buffer_size
            );
            self.block_mode = true;
        }
    }

    // ---------------------------------------------------------------------
    // Navigation
    // ---------------------------------------------------------------------

    fn rewind(&mut self) {
        self.pos = Position::default();
    }

    fn step_forward(&mut self) -> Result<bool> {
        let from = if self.pos.line.is_some() {
            self.pos.next_offset
        } else {
            0
        };
        let mut line_size = self.line_size;
        let read = {
            let work = self.work_file()?;
            read_forward(work.as_file(), from, &mut line_size, self.options.buffer_size)
                .map_err(|e| ExError::io("cannot read work file", e))?
        };
        self.line_size = line_size;

        match read {
            Some((bytes, block)) => {
                if block {
                    self.enter_block_mode();
                }
                let next = from + bytes.len() as u64;
                let (content, _) = stream_line::split_terminator(&bytes);
                self.pos.text = content.to_vec();
                self.pos.line = Some(self.pos.line.map_or(0, |l| l + 1));
                self.pos.offset = from;
                self.pos.next_offset = next;
                Ok(true)
            }
            None => {
                if !self.block_mode {
                    self.line_count = Some(self.pos.line.map_or(0, |l| l + 1));
                    self.line_count_estimated = false;
                }
                Ok(false)
            }
        }
    }

    fn step_backward(&mut self) -> Result<bool> {
        let Some(line) = self.pos.line else {
            return Ok(false);
        };
        if line == 0 || self.pos.offset == 0 {
            return Ok(false);
        }
        let end = self.pos.offset;
        let read = {
            let work = self.work_file()?;
            read_backward(work.as_file(), end, self.line_size, self.options.buffer_size)
                .map_err(|e| ExError::io("cannot read work file", e))?
        };
        let (start, bytes, block) = read;
        if block {
            self.enter_block_mode();
        }
        let (content, _) = stream_line::split_terminator(&bytes);
        self.pos.text = content.to_vec();
        self.pos.line = Some(line - 1);
        self.pos.offset = start;
        self.pos.next_offset = end;
        Ok(true)
    }

    /// Go to 0-based line `line`, clamped to the last line.
    ///
    /// Returns false when the document has fewer lines (the cursor is then on
    /// the last line) or is empty.
    pub fn goto_line(&mut self, line: usize) -> Result<bool> {
        self.work_file()?;

        match self.pos.line {
            Some(current) if current == line => return Ok(true),
            Some(current) if line > current => {}
            Some(current) if line > 0 && line >= current / 2 => {
                while self.pos.line.is_some_and(|l| l > line) {
                    if !self.step_backward()? {
                        break;
                    }
                }
                return Ok(self.pos.line == Some(line));
            }
            _ => self.rewind(),
        }

        while self.pos.line.is_none_or(|l| l < line) {
            if !self.step_forward()? {
                break;
            }
        }

        debug!("goto_line {} -> {:?}", line, self.pos.line);
        Ok(self.pos.line == Some(line))
    }

    /// Move to the next line. False at the end of the document.
    pub fn next_line(&mut self) -> Result<bool> {
        self.work_file()?;
        self.step_forward()
    }

    /// Move to the previous line. False at the first line.
    pub fn previous_line(&mut self) -> Result<bool> {
        self.work_file()?;
        self.step_backward()
    }

    /// Count lines with a full scan.
    ///
    /// If a whole buffer holds no line break the engine switches to block
    /// mode and the rest of the document is estimated at one line per
    /// `line_size` bytes.
    pub fn get_line_count_request(&mut self) -> Result<usize> {
        let total = self.work_len()?;
        let buffer_size = self.options.buffer_size.max(1);
        let default_line_size = self.options.line_size.max(1) as u64;

        let (count, estimated) = {
            let work = self.work_file()?;
            let mut file = work.as_file();
            file.seek(SeekFrom::Start(0))
                .map_err(|e| ExError::io("cannot read work file", e))?;

            let mut buf = vec![0u8; buffer_size];
            let mut offset = 0u64;
            let mut count = 0usize;
            let mut last = None;
            let mut estimated = false;

            loop {
                if self.cancel.is_cancelled() {
                    return Err(ExError::Cancelled);
                }
                let n = read_full(&mut file, &mut buf).map_err(|e| ExError::io("cannot read work file", e))?;
                if n == 0 {
                    break;
                }
                let newlines = memchr::memchr_iter(b'\n', &buf[..n]).count();
                if newlines == 0 && n == buffer_size {
                    let remaining = total - offset;
                    count += remaining.div_ceil(default_line_size) as usize;
                    estimated = true;
                    break;
                }
                count += newlines;
                last = Some(buf[n - 1]);
                offset += n as u64;
            }

            if !estimated && last.is_some_and(|b| b != b'\n') {
                count += 1;
            }
            (count, estimated)
        };

        if estimated {
            self.enter_block_mode();
        }
        self.line_count = Some(count);
        self.line_count_estimated = estimated;
        debug!("Line count: {}{}", count, if estimated { " (estimated)" } else { "" });
        Ok(count)
    }

    /// Rescan the document and compare with the bookkept line count.
    pub fn verify_line_count(&mut self) -> Result<LineCountCheck> {
        let recorded = self.line_count;
        let actual = self.get_line_count_request()?;
        let check = LineCountCheck { recorded, actual };
        if !check.is_consistent() && recorded.is_some() {
            warn!("Line count drift: recorded {:?}, counted {}", recorded, actual);
        }
        Ok(check)
    }

    /// Search for `text` from the current line.
    ///
    /// A forward search starts on the line after the current one, a backward
    /// search on the line before. When the end (or start) is reached the
    /// search wraps once. On failure or cancellation the position is left
    /// exactly as it was.
    pub fn find(&mut self, text: &str, flags: SearchFlags, forward: bool) -> Result<bool> {
        self.work_file()?;
        let matcher = Matcher::new(text, flags, self.options.flavor)?;
        self.cancel.reset();

        let saved = self.pos.clone();
        let result = if forward {
            self.find_forward(&matcher, saved.line)
        } else {
            self.find_backward(&matcher, saved.line)
        };

        match result {
            Ok(true) => {
                debug!("find '{}' -> line {:?}", text, self.pos.line);
                Ok(true)
            }
            Ok(false) => {
                self.pos = saved;
                Ok(false)
            }
            Err(e) => {
                self.pos = saved;
                Err(e)
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ExError::Cancelled);
        }
        Ok(())
    }

    fn find_forward(&mut self, matcher: &Matcher, start: Option<usize>) -> Result<bool> {
        while self.step_forward()? {
            self.check_cancelled()?;
            if matcher.is_match(&self.pos.text) {
                return Ok(true);
            }
        }
        if !self.options.wrap_scan {
            return Ok(false);
        }

        // Wrap: from the top down to the starting line.
        self.rewind();
        while self.step_forward()? {
            self.check_cancelled()?;
            if matcher.is_match(&self.pos.text) {
                return Ok(true);
            }
            if self.pos.line >= start {
                break;
            }
        }
        Ok(false)
    }

    fn find_backward(&mut self, matcher: &Matcher, start: Option<usize>) -> Result<bool> {
        while self.step_backward()? {
            self.check_cancelled()?;
            if matcher.is_match(&self.pos.text) {
                return Ok(true);
            }
        }
        if !self.options.wrap_scan {
            return Ok(false);
        }

        // Wrap: the last match between the starting line and the end.
        let Some(start) = start else {
            return Ok(false);
        };
        self.rewind();
        self.goto_line(start)?;
        let mut hit: Option<usize> = None;
        loop {
            self.check_cancelled()?;
            if matcher.is_match(&self.pos.text) {
                hit = self.pos.line;
            }
            if !self.step_forward()? {
                break;
            }
        }
        match hit {
            Some(line) => {
                self.goto_line(line)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ---------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------

    /// Run one pass of `sl` over the work file.
    ///
    /// Writing actions go to a scratch file that replaces the work file when
    /// the pass completed and recorded at least one action. Other actions
    /// write to `side` (or nowhere).
    fn run_pass(&mut self, sl: &mut StreamLine, side: Option<&mut dyn Write>) -> Result<bool> {
        let len = self.work_len()?;
        if sl.range().is_empty() && !matches!(sl.action(), LineAction::Insert { .. }) {
            debug!("{} on empty range {:?}: nothing to do", sl.action().name(), sl.range());
            return Ok(false);
        }

        let mut source = self
            .work_file()?
            .reopen()
            .map_err(|e| ExError::io("cannot reopen work file", e))?;
        source
            .seek(SeekFrom::Start(0))
            .map_err(|e| ExError::io("cannot read work file", e))?;
        let mut reader = BufReader::with_capacity(self.options.buffer_size.max(1), source);

        if !sl.is_write() {
            let mut sink = io::sink();
            let out: &mut dyn Write = match side {
                Some(side) => side,
                None => &mut sink,
            };
            let path = self.path.clone().unwrap_or_default();
            self.stream_lines(sl, &mut reader, out)
                .map_err(|source| ExError::PartialWrite { path, source })?;
            return Ok(false);
        }

        let temp_dir = self.temp_dir();
        disk_space::check_scratch_space(&temp_dir, len)?;
        let scratch = NamedTempFile::new_in(&temp_dir)
            .map_err(|e| ExError::io(format!("cannot create scratch file in {}", temp_dir.display()), e))?;

        let written = {
            let mut writer = BufWriter::new(scratch.as_file());
            self.stream_lines(sl, &mut reader, &mut writer)
                .and_then(|_| writer.flush())
        };
        if let Err(source) = written {
            warn!("{} pass failed, document left unchanged: {}", sl.action().name(), source);
            return Err(ExError::PartialWrite {
                path: self.path.clone().unwrap_or_default(),
                source,
            });
        }

        if sl.actions() == 0 {
            debug!("{} recorded no actions, scratch discarded", sl.action().name());
            return Ok(false);
        }

        self.work = Some(scratch);
        self.modified = true;
        self.rewind();
        if self.block_mode {
            self.line_count = None;
        } else {
            self.line_count = Some(sl.output_lines());
            self.line_count_estimated = false;
        }
        Ok(true)
    }

    fn stream_lines<R: BufRead, W: Write + ?Sized>(
        &self,
        sl: &mut StreamLine,
        reader: &mut R,
        out: &mut W,
    ) -> io::Result<()> {
        let max = self.options.buffer_size.max(1);
        let mut line = Vec::new();
        let mut line_no = 0;
        let mut out = out;
        while read_pass_line(reader, &mut line, max)? > 0 {
            line_no += 1;
            if sl.handle(line_no, &line, &mut out)? == Handle::Stop {
                return Ok(());
            }
        }
        sl.finish(&mut out)
    }

    /// Cursor to 1-based `line`, clamped; an empty document has no cursor.
    fn settle(&mut self, line: usize) -> Result<()> {
        self.rewind();
        self.goto_line(line.saturating_sub(1))?;
        Ok(())
    }

    fn log_mutation(&self, sl: &StreamLine) {
        info!(
            "{} {}..{}: {} actions, {:?} lines",
            sl.action().name(),
            sl.range().begin,
            sl.range().end,
            sl.actions(),
            self.line_count
        );
    }

    /// Delete the lines in `range`.
    pub fn erase(&mut self, range: &AddressRange) -> Result<usize> {
        let range = range.resolve(self)?;
        let mut sl = StreamLine::new(LineAction::Erase, range);
        if self.run_pass(&mut sl, None)? {
            self.markers.on_erase(LineRange::new(range.begin, range.end.min(sl.lines())));
            self.log_mutation(&sl);
            self.settle(range.begin)?;
        }
        Ok(sl.actions())
    }

    /// Delete the lines in `range`, keeping their text in a register.
    pub fn delete(&mut self, range: &AddressRange, register: Option<char>) -> Result<usize> {
        Registers::check_name(register)?;
        let resolved = range.resolve(self)?;
        let text = self.collect(resolved)?;
        let actions = self.erase(&AddressRange::lines(resolved.begin, resolved.end))?;
        if actions > 0 {
            self.registers
                .borrow_mut()
                .delete(register, RegisterContent::lines(String::from_utf8_lossy(&text)))?;
        }
        Ok(actions)
    }

    /// Splice the lines in `range` into one.
    pub fn join(&mut self, range: &AddressRange) -> Result<usize> {
        let range = range.resolve(self)?;
        let mut sl = StreamLine::new(LineAction::Join, range);
        if self.run_pass(&mut sl, None)? {
            self.markers.on_erase(LineRange::new(range.begin + 1, range.end.min(sl.lines())));
            self.log_mutation(&sl);
            self.settle(range.begin)?;
        }
        Ok(sl.actions())
    }

    /// Replace `pattern` with `replacement` on each line of `range`.
    ///
    /// Returns the number of lines that matched.
    pub fn substitute(
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
        let matcher = Matcher::new(pattern, search, self.options.flavor)?;
        let replacement = vi_regex::convert_replacement(replacement, self.options.flavor).into_bytes();
        let range = range.resolve(self)?;

        let action = LineAction::Substitute {
            matcher,
            replacement,
            global: flags.global,
        };
        let mut sl = StreamLine::new(action, range);
        if self.run_pass(&mut sl, None)? {
            self.log_mutation(&sl);
            self.settle(range.end)?;
        }
        Ok(sl.actions())
    }

    /// Insert `text` before the first line of `range`.
    pub fn insert_text(&mut self, range: &AddressRange, text: &str) -> Result<usize> {
        let range = range.resolve(self)?;
        self.insert_before(range.begin, text)
    }

    /// Insert `text` after the last line of `range` (line 0 inserts at the top).
    pub fn append_text(&mut self, range: &AddressRange, text: &str) -> Result<usize> {
        let end = range.end.resolve(self)?;
        self.insert_before(end + 1, text)
    }

    fn insert_before(&mut self, line: usize, text: &str) -> Result<usize> {
        self.work_file()?;
        if text.is_empty() {
            return Ok(0);
        }
        let mut text = text.as_bytes().to_vec();
        if !text.ends_with(b"\n") {
            text.push(b'\n');
        }
        let line = line.max(1);
        let mut sl = StreamLine::new(LineAction::Insert { text }, LineRange::single(line));
        if self.run_pass(&mut sl, None)? {
            let inserted = sl.lines_added();
            let after = line.min(sl.lines() + 1) - 1;
            self.markers.on_insert(after, inserted);
            self.log_mutation(&sl);
            self.settle(after + inserted)?;
        }
        Ok(sl.actions())
    }

    /// Copy `range` to after its destination address.
    pub fn copy(&mut self, range: &AddressRange) -> Result<usize> {
        let (lines, destination) = self.resolve_with_destination(range)?;
        let text = self.collect(lines)?;
        let action = LineAction::Copy { destination, text };
        let mut sl = StreamLine::new(action, lines);
        if self.run_pass(&mut sl, None)? {
            let inserted = sl.lines_added();
            self.markers.on_insert(destination, inserted);
            self.log_mutation(&sl);
            self.settle(destination + inserted)?;
        }
        Ok(sl.actions())
    }

    /// Move `range` to after its destination address.
    pub fn r#move(&mut self, range: &AddressRange) -> Result<usize> {
        let (lines, destination) = self.resolve_with_destination(range)?;
        if destination >= lines.begin && destination < lines.end {
            return Err(ExError::Precondition("cannot move lines into themselves".to_string()));
        }
        let text = self.collect(lines)?;
        let action = LineAction::Move { destination, text };
        let mut sl = StreamLine::new(action, lines);
        if self.run_pass(&mut sl, None)? {
            let moved = sl.lines_added();
            let target = if destination > lines.end {
                destination - moved
            } else {
                destination
            };
            self.markers.on_erase(LineRange::new(lines.begin, lines.begin + moved - 1));
            self.markers.on_insert(target, moved);
            self.log_mutation(&sl);
            self.settle(target + moved)?;
        }
        Ok(sl.actions())
    }

    fn resolve_with_destination(&mut self, range: &AddressRange) -> Result<(LineRange, usize)> {
        let lines = range.resolve(self)?;
        let destination = range
            .resolve_destination(self)?
            .ok_or_else(|| ExError::Precondition("missing destination address".to_string()))?;
        Ok((lines, destination))
    }

    /// Text of the lines in `range`, each terminated by a newline.
    fn collect(&mut self, range: LineRange) -> Result<Vec<u8>> {
        let mut sl = StreamLine::new(LineAction::Yank, range);
        self.run_pass(&mut sl, None)?;
        Ok(sl.take_yanked())
    }

    /// Copy the lines in `range` into a register. The document is unchanged.
    pub fn yank(&mut self, range: &AddressRange, register: Option<char>) -> Result<usize> {
        let range = range.resolve(self)?;
        let mut sl = StreamLine::new(LineAction::Yank, range);
        self.run_pass(&mut sl, None)?;
        let text = sl.take_yanked();
        if sl.actions() > 0 {
            self.registers
                .borrow_mut()
                .yank(register, RegisterContent::lines(String::from_utf8_lossy(&text)))?;
        }
        debug!("yank {}..{}: {} lines", range.begin, range.end, sl.actions());
        Ok(sl.actions())
    }

    /// The resolved range and its lines (terminators normalized to `\n`).
    pub fn read_range(&mut self, range: &AddressRange) -> Result<(LineRange, Vec<u8>)> {
        let range = range.resolve(self)?;
        let text = self.collect(range)?;
        Ok((range, text))
    }

    /// Write the lines in `range` to another file (`:w file`, `:w >> file`).
    pub fn write_range(&mut self, range: &AddressRange, path: &Path, append: bool) -> Result<usize> {
        let range = range.resolve(self)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .map_err(|e| ExError::io(format!("cannot open {}", path.display()), e))?;
        let mut writer = BufWriter::new(file);
        let mut sl = StreamLine::new(LineAction::Write, range);
        self.run_pass(&mut sl, Some(&mut writer))?;
        writer.flush().map_err(|source| ExError::PartialWrite {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Wrote {} lines to {}", sl.actions(), path.display());
        Ok(sl.actions())
    }

    /// Save the work file over the document atomically.
    pub fn write(&mut self) -> Result<()> {
        let path = self.path.clone().ok_or(ExError::Detached)?;
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        let mut target = NamedTempFile::new_in(parent)
            .map_err(|e| ExError::io(format!("cannot create temp file in {}", parent.display()), e))?;
        self.copy_to(target.as_file_mut())?;
        target
            .as_file()
            .sync_all()
            .map_err(|e| ExError::io("cannot sync temp file", e))?;

        if let Ok(meta) = fs::metadata(&path) {
            // Best effort: the document keeps its mode bits.
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

    /// Copy the live document into `out`.
    pub fn copy_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<u64> {
        let mut source = self
            .work_file()?
            .reopen()
            .map_err(|e| ExError::io("cannot reopen work file", e))?;
        io::copy(&mut source, out).map_err(|e| ExError::io("cannot copy work file", e))
    }
}

impl std::fmt::Debug for ExStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExStream")
            .field("path", &self.path)
            .field("line", &self.pos.line)
            .field("line_count", &self.line_count)
            .field("block_mode", &self.block_mode)
            .finish()
    }
}

impl AddressContext for ExStream {
    fn current_line(&self) -> usize {
        self.pos.line.map_or(0, |l| l + 1)
    }

    fn known_line_count(&self) -> Option<usize> {
        self.line_count
    }

    fn line_count(&mut self) -> Result<usize> {
        match self.line_count {
            Some(count) => Ok(count),
            None => self.get_line_count_request(),
        }
    }

    fn marker_line(&self, marker: char) -> Option<usize> {
        self.markers.get(marker)
    }

    fn search_line(&mut self, pattern: &str, forward: bool) -> Result<Option<usize>> {
        let saved = self.pos.clone();
        let found = self.find(pattern, SearchFlags::default(), forward)?;
        let line = found.then(|| self.current_line());
        self.pos = saved;
        Ok(line)
    }
}

/// Fill `buf` as far as the reader allows.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read one line (terminator included) starting at `offset`.
///
/// The line buffer doubles until the line fits or reaches `max`; a stretch of
/// `max` bytes without a line break is returned as a block (second field).
fn read_forward(mut file: &File, offset: u64, line_size: &mut usize, max: usize) -> io::Result<Option<(Vec<u8>, bool)>> {
    file.seek(SeekFrom::Start(offset))?;
    let max = max.max(1);
    let mut out = Vec::new();
    let mut chunk = vec![0u8; (*line_size).clamp(1, max)];

    loop {
        let n = read_full(&mut file, &mut chunk)?;
        if n == 0 {
            break;
        }
        if let Some(i) = memchr::memchr(b'\n', &chunk[..n]) {
            out.extend_from_slice(&chunk[..=i]);
            if out.len() <= max {
                return Ok(Some((out, false)));
            }
        } else {
            out.extend_from_slice(&chunk[..n]);
        }
        if out.len() >= max {
            out.truncate(max);
            return Ok(Some((out, true)));
        }
        if n < chunk.len() {
            break;
        }
        if chunk.len() < max {
            *line_size = (chunk.len() * 2).min(max);
            chunk.resize(*line_size, 0);
        }
    }

    Ok((!out.is_empty()).then_some((out, false)))
}

/// Read the line that ends right before `end`; returns its start offset.
fn read_backward(mut file: &File, end: u64, chunk_size: usize, max: usize) -> io::Result<(u64, Vec<u8>, bool)> {
    // end - 1 is the previous line's own terminator
    let limit = end - 1;
    let max = max.max(1) as u64;
    let chunk_size = chunk_size.max(1) as u64;
    let mut pos = limit;
    let mut start = 0;
    let mut block = false;
    let mut chunk = Vec::new();

    while pos > 0 {
        let len = pos.min(chunk_size);
        let base = pos - len;
        chunk.resize(len as usize, 0);
        file.seek(SeekFrom::Start(base))?;
        file.read_exact(&mut chunk)?;
        if let Some(i) = memchr::memrchr(b'\n', &chunk) {
            start = base + i as u64 + 1;
            break;
        }
        pos = base;
        if end - pos >= max {
            start = end.saturating_sub(max);
            block = true;
            break;
        }
    }

    let mut line = vec![0u8; (end - start) as usize];
    file.seek(SeekFrom::Start(start))?;
    file.read_exact(&mut line)?;
    Ok((start, line, block))
}

/// Read one line for a pass, capped at `max` bytes.
fn read_pass_line<R: BufRead>(reader: &mut R, line: &mut Vec<u8>, max: usize) -> io::Result<usize> {
    line.clear();
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            break;
        }
        let room = max - line.len();
        let window = &available[..available.len().min(room)];
        match memchr::memchr(b'\n', window) {
            Some(i) => {
                line.extend_from_slice(&window[..=i]);
                reader.consume(i + 1);
                break;
            }
            None => {
                let n = window.len();
                line.extend_from_slice(window);
                reader.consume(n);
                if line.len() >= max {
                    break;
                }
            }
        }
    }
    Ok(line.len())
}
