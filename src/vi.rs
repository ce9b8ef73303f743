//! vi command dispatcher
//!
//! Keys are fed one at a time. In normal mode they accumulate until they form
//! a complete command (`["x][count]cmd`); operators take a second count and a
//! motion, whose extent is computed first and then operated on.
//!
//! Every command runs against a [`Document`]: an in-memory [`MemoryWidget`]
//! or a file-backed [`ExStream`]. Line-oriented commands go through
//! [`ExTarget`] on either path; character-level commands need the widget and
//! are refused in streaming mode (see [`crate::capability`]).

use crate::address::{AddressContext, AddressRange, LineRange};
use crate::capability;
use crate::error::{ExError, Result};
use crate::ex_command::{ExSession, ExTarget};
use crate::matcher::SearchFlags;
use crate::registers::{RegisterContent, SharedRegisters};
use crate::stream::ExStream;
use crate::widget::{MemoryWidget, Position, TextWidget};
use tracing::debug;

pub const ESC: char = '\x1b';
const BACKSPACE: char = '\x7f';
const CTRL_H: char = '\x08';

/// Nested `@x` replays deeper than this are refused.
pub const MAX_REPLAY_DEPTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Insert,
    CommandLine,
    Search { forward: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    Left,
    Right,
    Down,
    Up,
    WordForward,
    WordBackward,
    WordEnd,
    LineStart,
    FirstNonBlank,
    LineEnd,
    /// `G`: count is the line, default last
    LastLine,
    /// `gg`: count is the line, default first
    FirstLine,
    ParagraphForward,
    ParagraphBackward,
    Mark(char),
    SearchNext,
    SearchPrevious,
}

impl Motion {
    /// Operators on a linewise motion act on whole lines.
    pub fn is_linewise(self) -> bool {
        matches!(
            self,
            Motion::Down | Motion::Up | Motion::LastLine | Motion::FirstLine | Motion::Mark(_)
        )
    }

    /// The character under the motion's end is part of the extent.
    pub fn is_inclusive(self) -> bool {
        matches!(self, Motion::WordEnd | Motion::LineEnd)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Delete,
    Change,
    Yank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorTarget {
    /// `dd`, `cc`, `yy`
    Line,
    Motion(Motion),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertAt {
    /// `i`
    Cursor,
    /// `a`
    After,
    /// `I`
    LineStart,
    /// `A`
    LineEnd,
    /// `o`
    Below,
    /// `O`
    Above,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Move(Motion),
    Operator { op: Operator, target: OperatorTarget },
    DeleteChar,
    DeleteCharBefore,
    DeleteToEnd,
    ChangeToEnd,
    YankLine,
    Put { before: bool },
    Join,
    Insert(InsertAt),
    Replace(char),
    ToggleCase,
    SetMark(char),
    Repeat,
    StartRecording(char),
    StopRecording,
    Replay(char),
    ReplayLast,
    CommandLine,
    Search { forward: bool },
}

impl Action {
    /// Changes become the target of `.`; motions and yanks never do.
    pub fn is_change(self) -> bool {
        match self {
            Action::Operator { op, .. } => op != Operator::Yank,
            Action::DeleteChar
            | Action::DeleteCharBefore
            | Action::DeleteToEnd
            | Action::ChangeToEnd
            | Action::Put { .. }
            | Action::Join
            | Action::Insert(_)
            | Action::Replace(_)
            | Action::ToggleCase => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalCommand {
    pub register: Option<char>,
    pub count: Option<usize>,
    pub action: Action,
}

impl NormalCommand {
    /// Repeat count, at least 1
    pub fn times(&self) -> usize {
        self.count.unwrap_or(1).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parse {
    Incomplete,
    Invalid,
    Complete(NormalCommand),
}

enum MotionParse {
    Incomplete,
    Invalid,
    Complete(Motion),
}

fn parse_motion(keys: &[char]) -> MotionParse {
    let Some(&first) = keys.first() else {
        return MotionParse::Incomplete;
    };
    let motion = match first {
        'h' => Motion::Left,
        'l' | ' ' => Motion::Right,
        'j' => Motion::Down,
        'k' => Motion::Up,
        'w' => Motion::WordForward,
        'b' => Motion::WordBackward,
        'e' => Motion::WordEnd,
        '0' => Motion::LineStart,
        '^' => Motion::FirstNonBlank,
        '$' => Motion::LineEnd,
        'G' => Motion::LastLine,
        '}' => Motion::ParagraphForward,
        '{' => Motion::ParagraphBackward,
        'n' => Motion::SearchNext,
        'N' => Motion::SearchPrevious,
        'g' => match keys.get(1) {
            None => return MotionParse::Incomplete,
            Some('g') => Motion::FirstLine,
            Some(_) => return MotionParse::Invalid,
        },
        '\'' => match keys.get(1) {
            None => return MotionParse::Incomplete,
            Some(&c) => Motion::Mark(c),
        },
        _ => return MotionParse::Invalid,
    };
    MotionParse::Complete(motion)
}

/// Digits at `keys[*i..]`; a leading `0` is not a count.
fn parse_count(keys: &[char], i: &mut usize) -> Option<usize> {
    let start = *i;
    while *i < keys.len() && keys[*i].is_ascii_digit() && !(*i == start && keys[*i] == '0') {
        *i += 1;
    }
    if *i == start {
        return None;
    }
    keys[start..*i].iter().collect::<String>().parse().ok()
}

/// Parse the keys typed so far in normal mode.
///
/// `recording` decides whether a lone `q` stops a macro recording or waits for
/// a register name.
pub fn parse_normal(keys: &[char], recording: bool) -> Parse {
    let mut i = 0;
    let mut register = None;
    if keys.first() == Some(&'"') {
        match keys.get(1) {
            None => return Parse::Incomplete,
            Some(&c) => register = Some(c),
        }
        i = 2;
    }

    let mut count = parse_count(keys, &mut i);
    let Some(&key) = keys.get(i) else {
        return Parse::Incomplete;
    };
    i += 1;
    let next = keys.get(i).copied();

    let action = match key {
        'd' | 'c' | 'y' => {
            let op = match key {
                'd' => Operator::Delete,
                'c' => Operator::Change,
                _ => Operator::Yank,
            };
            if let Some(inner) = parse_count(keys, &mut i) {
                count = Some(count.unwrap_or(1) * inner);
            }
            let Some(&second) = keys.get(i) else {
                return Parse::Incomplete;
            };
            if second == key {
                Action::Operator {
                    op,
                    target: OperatorTarget::Line,
                }
            } else {
                match parse_motion(&keys[i..]) {
                    MotionParse::Incomplete => return Parse::Incomplete,
                    MotionParse::Invalid => return Parse::Invalid,
                    MotionParse::Complete(motion) => Action::Operator {
                        op,
                        target: OperatorTarget::Motion(motion),
                    },
                }
            }
        }
        'x' => Action::DeleteChar,
        'X' => Action::DeleteCharBefore,
        'D' => Action::DeleteToEnd,
        'C' => Action::ChangeToEnd,
        'Y' => Action::YankLine,
        'p' => Action::Put { before: false },
        'P' => Action::Put { before: true },
        'J' => Action::Join,
        'i' => Action::Insert(InsertAt::Cursor),
        'a' => Action::Insert(InsertAt::After),
        'I' => Action::Insert(InsertAt::LineStart),
        'A' => Action::Insert(InsertAt::LineEnd),
        'o' => Action::Insert(InsertAt::Below),
        'O' => Action::Insert(InsertAt::Above),
        '~' => Action::ToggleCase,
        '.' => Action::Repeat,
        ':' => Action::CommandLine,
        '/' => Action::Search { forward: true },
        '?' => Action::Search { forward: false },
        'r' | 'm' => match next {
            None => return Parse::Incomplete,
            Some(c) if key == 'r' => Action::Replace(c),
            Some(c) => Action::SetMark(c),
        },
        'q' if recording => Action::StopRecording,
        'q' => match next {
            None => return Parse::Incomplete,
            Some(c) => Action::StartRecording(c),
        },
        '@' => match next {
            None => return Parse::Incomplete,
            Some('@') => Action::ReplayLast,
            Some(c) => Action::Replay(c),
        },
        _ => match parse_motion(&keys[i - 1..]) {
            MotionParse::Incomplete => return Parse::Incomplete,
            MotionParse::Invalid => return Parse::Invalid,
            MotionParse::Complete(motion) => Action::Move(motion),
        },
    };

    Parse::Complete(NormalCommand {
        register,
        count,
        action,
    })
}

/// What the dispatcher edits
#[derive(Debug)]
pub enum Document {
    Memory(MemoryWidget),
    Stream(ExStream),
}

impl Document {
    pub fn target(&mut self) -> &mut dyn ExTarget {
        match self {
            Document::Memory(widget) => widget,
            Document::Stream(stream) => stream,
        }
    }

    pub fn is_streaming_mode(&self) -> bool {
        matches!(self, Document::Stream(_))
    }

    /// Current 1-based line, 0 for an empty document
    pub fn current_line(&self) -> usize {
        match self {
            Document::Memory(widget) => widget.current_line(),
            Document::Stream(stream) => stream.current_line(),
        }
    }

    pub fn line_count(&mut self) -> Result<usize> {
        self.target().line_count()
    }
}

// Character classes for word motions: blank, word, punctuation.
fn class(c: char) -> u8 {
    if c == '\n' || c.is_whitespace() {
        0
    } else if c.is_alphanumeric() || c == '_' {
        1
    } else {
        2
    }
}

/// Character at `p`; the slot past a line's end reads as a newline.
fn char_at(w: &MemoryWidget, p: Position) -> char {
    w.line(p.line).chars().nth(p.col).unwrap_or('\n')
}

fn is_empty_line(w: &MemoryWidget, p: Position) -> bool {
    p.col == 0 && w.line_len(p.line) == 0
}

fn step_forward(w: &MemoryWidget, p: Position) -> Option<Position> {
    if p.col < w.line_len(p.line) {
        Some(Position::new(p.line, p.col + 1))
    } else if p.line + 1 < w.lines().len() {
        Some(Position::new(p.line + 1, 0))
    } else {
        None
    }
}

fn step_backward(w: &MemoryWidget, p: Position) -> Option<Position> {
    if p.col > 0 {
        Some(Position::new(p.line, p.col - 1))
    } else if p.line > 0 {
        Some(Position::new(p.line - 1, w.line_len(p.line - 1)))
    } else {
        None
    }
}

fn word_forward(w: &MemoryWidget, start: Position) -> Position {
    let mut p = start;
    let cls = class(char_at(w, p));
    if cls != 0 {
        loop {
            match step_forward(w, p) {
                Some(next) => p = next,
                None => return p,
            }
            if class(char_at(w, p)) != cls {
                break;
            }
        }
    }
    while class(char_at(w, p)) == 0 {
        if p != start && is_empty_line(w, p) {
            break;
        }
        match step_forward(w, p) {
            Some(next) => p = next,
            None => return p,
        }
    }
    p
}

fn word_end(w: &MemoryWidget, start: Position) -> Position {
    let mut p = match step_forward(w, start) {
        Some(next) => next,
        None => return start,
    };
    while class(char_at(w, p)) == 0 {
        match step_forward(w, p) {
            Some(next) => p = next,
            None => return p,
        }
    }
    let cls = class(char_at(w, p));
    while let Some(next) = step_forward(w, p) {
        if class(char_at(w, next)) != cls {
            break;
        }
        p = next;
    }
    p
}

fn word_backward(w: &MemoryWidget, start: Position) -> Position {
    let mut p = match step_backward(w, start) {
        Some(prev) => prev,
        None => return start,
    };
    while class(char_at(w, p)) == 0 && !is_empty_line(w, p) {
        match step_backward(w, p) {
            Some(prev) => p = prev,
            None => return p,
        }
    }
    let cls = class(char_at(w, p));
    if cls == 0 {
        return p;
    }
    while let Some(prev) = step_backward(w, p) {
        if class(char_at(w, prev)) != cls {
            break;
        }
        p = prev;
    }
    p
}

pub struct Vi {
    doc: Document,
    registers: SharedRegisters,
    session: ExSession,
    mode: Mode,
    pending: Vec<char>,
    command_line: String,
    last_change: Vec<char>,
    /// Keys of the change in progress, kept open while its insert lasts
    change: Option<Vec<char>>,
    repeating: bool,
    recording: Option<(char, String)>,
    last_macro: Option<char>,
    replay_depth: usize,
    last_search: Option<(String, bool)>,
    search_flags: SearchFlags,
    status: String,
    output: Vec<String>,
}

impl Vi {
    /// The document's registers are shared with the dispatcher.
    pub fn new(doc: Document) -> Self {
        let registers = match &doc {
            Document::Memory(widget) => ExTarget::registers(widget),
            Document::Stream(stream) => stream.registers().clone(),
        };
        Self {
            doc,
            registers,
            session: ExSession::new(),
            mode: Mode::Normal,
            pending: Vec::new(),
            command_line: String::new(),
            last_change: Vec::new(),
            change: None,
            repeating: false,
            recording: None,
            last_macro: None,
            replay_depth: 0,
            last_search: None,
            search_flags: SearchFlags::default(),
            status: String::new(),
            output: Vec::new(),
        }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn into_document(self) -> Document {
        self.doc
    }

    pub fn registers(&self) -> &SharedRegisters {
        &self.registers
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn is_streaming_mode(&self) -> bool {
        self.doc.is_streaming_mode()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn set_search_flags(&mut self, flags: SearchFlags) {
        self.search_flags = flags;
    }

    /// Output of `:p` style commands since the last call
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    /// Keys of the last change, as `.` would replay them
    pub fn last_change(&self) -> String {
        self.last_change.iter().collect()
    }

    pub fn cursor(&self) -> Position {
        match &self.doc {
            Document::Memory(widget) => widget.cursor(),
            Document::Stream(stream) => Position::new(stream.get_current_line().unwrap_or(0), 0),
        }
    }

    /// Feed `keys`; stops at the first failing command and puts its message
    /// in the status line.
    pub fn feed(&mut self, keys: &str) -> bool {
        for c in keys.chars() {
            if let Err(e) = self.key(c) {
                debug!("vi: {}", e);
                self.status = e.status();
                return false;
            }
        }
        true
    }

    /// Run one ex command line, as if typed after `:`.
    pub fn ex(&mut self, line: &str) -> Result<()> {
        let report = self.session.execute(self.doc.target(), line)?;
        self.output.extend(report.output);
        if let Some(message) = report.message {
            self.status = message;
        }
        if let Document::Memory(widget) = &mut self.doc {
            widget.clamp_cursor();
        }
        Ok(())
    }

    pub fn key(&mut self, c: char) -> Result<()> {
        if self.replay_depth == 0 && !self.repeating {
            if let Some((_, keys)) = &mut self.recording {
                keys.push(c);
            }
        }
        match self.mode {
            Mode::Normal => self.normal_key(c),
            Mode::Insert => self.insert_key(c),
            Mode::CommandLine => self.command_line_key(c),
            Mode::Search { forward } => self.search_key(c, forward),
        }
    }

    fn normal_key(&mut self, c: char) -> Result<()> {
        if c == ESC {
            self.pending.clear();
            return Ok(());
        }
        self.pending.push(c);
        match parse_normal(&self.pending, self.recording.is_some()) {
            Parse::Incomplete => Ok(()),
            Parse::Invalid => {
                let keys: String = self.pending.drain(..).collect();
                Err(ExError::Parse(format!("unknown command: {}", keys)))
            }
            Parse::Complete(command) => {
                let keys = std::mem::take(&mut self.pending);
                self.run(command, keys)
            }
        }
    }

    fn run(&mut self, command: NormalCommand, keys: Vec<char>) -> Result<()> {
        capability::check_stream(&command, self.doc.is_streaming_mode())?;

        let record = command.action.is_change() && !self.repeating;
        if record {
            self.change = Some(keys);
        }
        let result = self.perform(command);
        if record {
            if result.is_err() {
                self.change = None;
            } else if self.mode != Mode::Insert {
                if let Some(keys) = self.change.take() {
                    self.last_change = keys;
                }
            }
        }
        result
    }

    fn perform(&mut self, command: NormalCommand) -> Result<()> {
        let count = command.times();
        let register = command.register;
        match command.action {
            Action::Move(motion) => self.move_cursor(motion, command.count),
            Action::Operator { op, target } => self.operator(op, target, command.count, register),
            Action::DeleteChar => self.delete_chars(count, false, register),
            Action::DeleteCharBefore => self.delete_chars(count, true, register),
            Action::DeleteToEnd => self.operator(
                Operator::Delete,
                OperatorTarget::Motion(Motion::LineEnd),
                command.count,
                register,
            ),
            Action::ChangeToEnd => self.operator(
                Operator::Change,
                OperatorTarget::Motion(Motion::LineEnd),
                command.count,
                register,
            ),
            Action::YankLine => self.operator(Operator::Yank, OperatorTarget::Line, command.count, register),
            Action::Put { before } => self.put(register, before, count),
            Action::Join => {
                let line = self.doc.current_line();
                let joined = self.doc.target().join(&AddressRange::lines(line, line + count.max(2) - 1))?;
                if joined == 0 {
                    return Err(ExError::Precondition("nothing to join".to_string()));
                }
                Ok(())
            }
            Action::Insert(at) => self.begin_insert(at),
            Action::Replace(c) => self.replace_chars(c, count),
            Action::ToggleCase => self.toggle_case(count),
            Action::SetMark(marker) => {
                let line = self.doc.current_line();
                self.doc.target().set_marker(marker, line)
            }
            Action::Repeat => self.repeat_last(count),
            Action::StartRecording(name) => {
                if !name.is_ascii_alphanumeric() {
                    return Err(ExError::Precondition(format!("invalid register name: {}", name)));
                }
                self.recording = Some((name, String::new()));
                self.status = format!("recording @{}", name);
                Ok(())
            }
            Action::StopRecording => self.stop_recording(),
            Action::Replay(name) => self.replay(name, count),
            Action::ReplayLast => {
                let name = self
                    .last_macro
                    .ok_or_else(|| ExError::Precondition("no previous macro".to_string()))?;
                self.replay(name, count)
            }
            Action::CommandLine => {
                self.command_line.clear();
                self.mode = Mode::CommandLine;
                Ok(())
            }
            Action::Search { forward } => {
                self.command_line.clear();
                self.mode = Mode::Search { forward };
                Ok(())
            }
        }
    }

    fn widget(&mut self) -> Result<&mut MemoryWidget> {
        match &mut self.doc {
            Document::Memory(widget) => Ok(widget),
            Document::Stream(_) => Err(ExError::Unsupported(
                "command is not available in streaming mode".to_string(),
            )),
        }
    }

    // Motions

    fn search_pattern(&self, reverse: bool) -> Result<(String, bool)> {
        let (pattern, forward) = self
            .last_search
            .clone()
            .ok_or_else(|| ExError::Precondition("no previous search".to_string()))?;
        Ok((pattern, forward != reverse))
    }

    /// Search for `pattern` from the cursor and move there.
    fn search(&mut self, pattern: &str, forward: bool) -> Result<()> {
        let flags = self.search_flags;
        let found = match &mut self.doc {
            Document::Memory(widget) => match widget.find(pattern, flags, forward, widget.cursor())? {
                Some(pos) => {
                    widget.set_cursor(pos);
                    true
                }
                None => false,
            },
            Document::Stream(stream) => stream.find(pattern, flags, forward)?,
        };
        if !found {
            return Err(ExError::Precondition(format!("pattern not found: {}", pattern)));
        }
        Ok(())
    }

    /// Line a linewise motion lands on (1-based).
    fn motion_line(&mut self, motion: Motion, count: Option<usize>) -> Result<usize> {
        let current = self.doc.current_line();
        let n = count.unwrap_or(1).max(1);
        Ok(match motion {
            Motion::Down => current + n,
            Motion::Up => current.saturating_sub(n).max(1),
            Motion::LastLine => match count {
                Some(line) => line,
                None => self.doc.line_count()?,
            },
            Motion::FirstLine => count.unwrap_or(1),
            Motion::Mark(marker) => self
                .doc
                .target()
                .marker_line(marker)
                .ok_or(ExError::NoSuchMarker(marker))?,
            _ => current,
        })
    }

    fn move_cursor(&mut self, motion: Motion, count: Option<usize>) -> Result<()> {
        match motion {
            Motion::SearchNext | Motion::SearchPrevious => {
                let (pattern, forward) = self.search_pattern(motion == Motion::SearchPrevious)?;
                for _ in 0..count.unwrap_or(1).max(1) {
                    self.search(&pattern, forward)?;
                }
                return Ok(());
            }
            _ if motion.is_linewise() && self.doc.is_streaming_mode() => {
                let line = self.motion_line(motion, count)?;
                return self.doc.target().goto(line);
            }
            _ => {}
        }

        let target = self.motion_target(motion, count, false)?;
        let widget = self.widget()?;
        widget.set_cursor(target);
        widget.clamp_cursor();
        Ok(())
    }

    /// Where `motion` moves the cursor in the widget.
    fn motion_target(&mut self, motion: Motion, count: Option<usize>, for_operator: bool) -> Result<Position> {
        let n = count.unwrap_or(1).max(1);
        if motion.is_linewise() {
            let line = self.motion_line(motion, count)?;
            let widget = self.widget()?;
            let index = line.clamp(1, widget.lines().len().max(1)) - 1;
            let col = match motion {
                Motion::Down | Motion::Up => widget.cursor().col,
                _ => widget.first_non_blank(index),
            };
            return Ok(Position::new(index, col));
        }

        let widget = &*self.widget()?;
        let cur = widget.cursor();
        let len = widget.line_len(cur.line);
        let target = match motion {
            Motion::Left => Position::new(cur.line, cur.col.saturating_sub(n)),
            Motion::Right => {
                let max = if for_operator { len } else { len.saturating_sub(1) };
                Position::new(cur.line, (cur.col + n).min(max))
            }
            Motion::WordForward => (0..n).fold(cur, |p, _| word_forward(widget, p)),
            Motion::WordBackward => (0..n).fold(cur, |p, _| word_backward(widget, p)),
            Motion::WordEnd => (0..n).fold(cur, |p, _| word_end(widget, p)),
            Motion::LineStart => Position::new(cur.line, 0),
            Motion::FirstNonBlank => Position::new(cur.line, widget.first_non_blank(cur.line)),
            Motion::LineEnd => {
                let line = (cur.line + n - 1).min(widget.lines().len().saturating_sub(1));
                Position::new(line, widget.line_len(line).saturating_sub(1))
            }
            Motion::ParagraphForward => {
                let last = widget.lines().len().saturating_sub(1);
                let mut line = cur.line;
                for _ in 0..n {
                    line = (line + 1..=last)
                        .find(|&l| widget.line_len(l) == 0)
                        .unwrap_or(last);
                }
                Position::new(line, widget.line_len(line))
            }
            Motion::ParagraphBackward => {
                let mut line = cur.line;
                for _ in 0..n {
                    line = (0..line).rev().find(|&l| widget.line_len(l) == 0).unwrap_or(0);
                }
                Position::new(line, 0)
            }
            _ => cur,
        };
        Ok(target)
    }

    // Operators

    fn operator(
        &mut self,
        op: Operator,
        target: OperatorTarget,
        count: Option<usize>,
        register: Option<char>,
    ) -> Result<()> {
        let n = count.unwrap_or(1).max(1);
        let lines = match target {
            OperatorTarget::Line => {
                let current = self.doc.current_line();
                Some((current, current + n - 1))
            }
            OperatorTarget::Motion(motion) if motion.is_linewise() => {
                let current = self.doc.current_line();
                let line = self.motion_line(motion, count)?;
                Some((current.min(line), current.max(line)))
            }
            OperatorTarget::Motion(_) => None,
        };
        if let Some((begin, end)) = lines {
            return self.linewise(op, begin, end, register);
        }
        let OperatorTarget::Motion(motion) = target else {
            return Ok(());
        };

        // cw on a word acts like ce
        let (motion, inclusive) = match (op, motion) {
            (Operator::Change, Motion::WordForward) => {
                let widget = self.widget()?;
                if class(char_at(widget, widget.cursor())) == 0 {
                    (motion, false)
                } else {
                    (Motion::WordEnd, true)
                }
            }
            _ => (motion, motion.is_inclusive()),
        };
        let end = if op == Operator::Change && motion == Motion::WordEnd && inclusive {
            let widget = &*self.widget()?;
            let start = widget.cursor();
            let same_word = step_forward(widget, start)
                .is_some_and(|next| next.line == start.line && class(char_at(widget, next)) == class(char_at(widget, start)));
            let first = if same_word { word_end(widget, start) } else { start };
            (1..n).fold(first, |p, _| word_end(widget, p))
        } else {
            self.motion_target(motion, count, true)?
        };

        let widget = self.widget()?;
        let cur = widget.cursor();
        let (start, mut end) = if end < cur { (end, cur) } else { (cur, end) };
        if inclusive {
            if char_at(widget, end) != '\n' {
                end = Position::new(end.line, end.col + 1);
            }
        } else if end.line > start.line && end.col <= widget.first_non_blank(end.line) {
            // exclusive motion into the indent of a later line stops at the previous line's end
            let line = end.line - 1;
            end = Position::new(line, widget.line_len(line));
        }
        self.charwise(op, start, end, register)
    }

    fn linewise(&mut self, op: Operator, begin: usize, end: usize, register: Option<char>) -> Result<()> {
        let range = AddressRange::lines(begin, end);
        match op {
            Operator::Delete => {
                let deleted = self.doc.target().delete(&range, register)?;
                if deleted >= 3 {
                    self.status = format!("{} fewer lines", deleted);
                }
                Ok(())
            }
            Operator::Yank => {
                let yanked = self.doc.target().yank(&range, register)?;
                if yanked >= 3 {
                    self.status = format!("{} lines yanked", yanked);
                }
                Ok(())
            }
            Operator::Change => {
                let registers = self.registers.clone();
                let widget = self.widget()?;
                let last = end.min(widget.lines().len());
                if begin > last {
                    return Ok(());
                }
                let text = widget.lines_text(begin, last);
                registers.borrow_mut().delete(register, RegisterContent::lines(text))?;
                let indent: String = widget.line(begin - 1).chars().take_while(|c| c.is_whitespace()).collect();
                widget.replace_visible(LineRange::new(begin, last), format!("{}\n", indent).as_bytes());
                widget.set_cursor(Position::new(begin - 1, indent.chars().count()));
                self.mode = Mode::Insert;
                Ok(())
            }
        }
    }

    fn charwise(&mut self, op: Operator, start: Position, end: Position, register: Option<char>) -> Result<()> {
        let registers = self.registers.clone();
        let widget = self.widget()?;
        let text = widget.text_between(start, end);
        match op {
            Operator::Yank => {
                registers.borrow_mut().yank(register, RegisterContent::chars(text))?;
                widget.set_cursor(start);
            }
            Operator::Delete | Operator::Change => {
                registers.borrow_mut().delete(register, RegisterContent::chars(text))?;
                widget.delete_between(start, end);
                widget.set_cursor(start);
                if op == Operator::Change {
                    self.mode = Mode::Insert;
                } else {
                    widget.clamp_cursor();
                }
            }
        }
        Ok(())
    }

    fn delete_chars(&mut self, count: usize, before: bool, register: Option<char>) -> Result<()> {
        let widget = self.widget()?;
        let cur = widget.cursor();
        let len = widget.line_len(cur.line);
        let (start, end) = if before {
            (Position::new(cur.line, cur.col.saturating_sub(count)), cur)
        } else {
            (cur, Position::new(cur.line, (cur.col + count).min(len)))
        };
        if start == end {
            return Ok(());
        }
        self.charwise(Operator::Delete, start, end, register)
    }

    fn replace_chars(&mut self, c: char, count: usize) -> Result<()> {
        let widget = self.widget()?;
        let cur = widget.cursor();
        if cur.col + count > widget.line_len(cur.line) {
            return Err(ExError::Precondition("not enough characters to replace".to_string()));
        }
        for col in cur.col..cur.col + count {
            widget.replace_char(Position::new(cur.line, col), c);
        }
        widget.set_cursor(Position::new(cur.line, cur.col + count - 1));
        Ok(())
    }

    fn toggle_case(&mut self, count: usize) -> Result<()> {
        let widget = self.widget()?;
        let cur = widget.cursor();
        let end = (cur.col + count).min(widget.line_len(cur.line));
        for col in cur.col..end {
            let pos = Position::new(cur.line, col);
            let c = char_at(widget, pos);
            let toggled = if c.is_uppercase() {
                c.to_lowercase().next()
            } else {
                c.to_uppercase().next()
            };
            if let Some(t) = toggled {
                widget.replace_char(pos, t);
            }
        }
        widget.set_cursor(Position::new(cur.line, end));
        widget.clamp_cursor();
        Ok(())
    }

    fn put(&mut self, register: Option<char>, before: bool, count: usize) -> Result<()> {
        let content = self
            .registers
            .borrow()
            .get(register)
            .cloned()
            .ok_or_else(|| ExError::Precondition(format!("nothing in register {}", register.unwrap_or('"'))))?;
        let text = content.text.repeat(count);

        if content.linewise || self.doc.is_streaming_mode() {
            let mut text = text;
            if !text.ends_with('\n') {
                text.push('\n');
            }
            let line = self.doc.current_line();
            let range = AddressRange::lines(line, line);
            let target = self.doc.target();
            if before {
                target.insert_text(&range, &text)?;
            } else {
                target.append_text(&range, &text)?;
            }
            return Ok(());
        }

        let widget = self.widget()?;
        widget.ensure_line();
        let cur = widget.cursor();
        let at = if before || widget.line_len(cur.line) == 0 {
            cur
        } else {
            Position::new(cur.line, cur.col + 1)
        };
        let end = widget.insert_str(at, &text);
        let last = if end.col > 0 {
            Position::new(end.line, end.col - 1)
        } else {
            end
        };
        widget.set_cursor(last);
        Ok(())
    }

    // Insert mode

    fn begin_insert(&mut self, at: InsertAt) -> Result<()> {
        let widget = self.widget()?;
        widget.ensure_line();
        let cur = widget.cursor();
        let len = widget.line_len(cur.line);
        let pos = match at {
            InsertAt::Cursor => cur,
            InsertAt::After => Position::new(cur.line, (cur.col + 1).min(len)),
            InsertAt::LineStart => Position::new(cur.line, widget.first_non_blank(cur.line)),
            InsertAt::LineEnd => Position::new(cur.line, len),
            InsertAt::Below => {
                widget.open_line(cur.line + 1);
                Position::new(cur.line + 1, 0)
            }
            InsertAt::Above => {
                widget.open_line(cur.line);
                Position::new(cur.line, 0)
            }
        };
        widget.set_cursor(pos);
        self.mode = Mode::Insert;
        Ok(())
    }

    fn insert_key(&mut self, c: char) -> Result<()> {
        if let Some(keys) = &mut self.change {
            keys.push(c);
        }
        let widget = self.widget()?;
        let cur = widget.cursor();
        match c {
            ESC => {
                widget.set_cursor(Position::new(cur.line, cur.col.saturating_sub(1)));
                widget.clamp_cursor();
                self.mode = Mode::Normal;
                if let Some(keys) = self.change.take() {
                    self.last_change = keys;
                }
            }
            BACKSPACE | CTRL_H => {
                if cur.col > 0 {
                    let start = Position::new(cur.line, cur.col - 1);
                    widget.delete_between(start, cur);
                    widget.set_cursor(start);
                } else if cur.line > 0 {
                    let start = Position::new(cur.line - 1, widget.line_len(cur.line - 1));
                    widget.delete_between(start, cur);
                    widget.set_cursor(start);
                }
            }
            '\r' | '\n' => {
                let end = widget.insert_str(cur, "\n");
                widget.set_cursor(end);
            }
            _ => {
                let end = widget.insert_str(cur, c.encode_utf8(&mut [0; 4]));
                widget.set_cursor(end);
            }
        }
        Ok(())
    }

    // Command line and search prompt

    fn prompt_key(&mut self, c: char) -> Option<String> {
        match c {
            ESC => {
                self.command_line.clear();
                self.mode = Mode::Normal;
            }
            '\r' | '\n' => {
                self.mode = Mode::Normal;
                return Some(std::mem::take(&mut self.command_line));
            }
            BACKSPACE | CTRL_H => {
                if self.command_line.pop().is_none() {
                    self.mode = Mode::Normal;
                }
            }
            _ => self.command_line.push(c),
        }
        None
    }

    fn command_line_key(&mut self, c: char) -> Result<()> {
        match self.prompt_key(c) {
            Some(line) => self.ex(&line),
            None => Ok(()),
        }
    }

    fn search_key(&mut self, c: char, forward: bool) -> Result<()> {
        let Some(pattern) = self.prompt_key(c) else {
            return Ok(());
        };
        let pattern = if pattern.is_empty() {
            self.search_pattern(false)?.0
        } else {
            pattern
        };
        self.last_search = Some((pattern.clone(), forward));
        self.search(&pattern, forward)
    }

    // Repeat and macros

    fn repeat_last(&mut self, count: usize) -> Result<()> {
        if self.last_change.is_empty() {
            return Err(ExError::Precondition("no previous change".to_string()));
        }
        let keys = self.last_change.clone();
        self.repeating = true;
        let result = (0..count).try_for_each(|_| keys.iter().try_for_each(|&k| self.key(k)));
        self.repeating = false;
        if self.mode == Mode::Insert {
            self.insert_key(ESC)?;
        }
        result
    }

    fn stop_recording(&mut self) -> Result<()> {
        let Some((name, mut keys)) = self.recording.take() else {
            return Ok(());
        };
        // the q that stopped the recording
        keys.pop();
        debug!("recorded macro @{}: {:?}", name, keys);
        self.registers.borrow_mut().set(name, RegisterContent::chars(keys))?;
        self.status.clear();
        Ok(())
    }

    fn replay(&mut self, name: char, count: usize) -> Result<()> {
        if self.replay_depth >= MAX_REPLAY_DEPTH {
            return Err(ExError::Precondition("macro recursion too deep".to_string()));
        }
        let keys: String = self
            .registers
            .borrow()
            .text(Some(name))
            .map(str::to_string)
            .ok_or_else(|| ExError::Precondition(format!("register {} is empty", name)))?;
        self.last_macro = Some(name);

        self.replay_depth += 1;
        let result = (0..count).try_for_each(|_| keys.chars().try_for_each(|k| self.key(k)));
        self.replay_depth -= 1;
        if result.is_err() {
            self.pending.clear();
        }
        result
    }
}

impl std::fmt::Debug for Vi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vi")
            .field("mode", &self.mode)
            .field("streaming", &self.doc.is_streaming_mode())
            .field("pending", &self.pending)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::Registers;
    use crate::stream::StreamOptions;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn vi(text: &str) -> Vi {
        Vi::new(Document::Memory(MemoryWidget::from_text(text, Registers::shared())))
    }

    fn text(vi: &Vi) -> String {
        match vi.document() {
            Document::Memory(widget) => widget.text(),
            Document::Stream(_) => unreachable!(),
        }
    }

    fn complete(keys: &str) -> NormalCommand {
        let keys: Vec<char> = keys.chars().collect();
        match parse_normal(&keys, false) {
            Parse::Complete(cmd) => cmd,
            other => panic!("{:?} for {:?}", other, keys),
        }
    }

    #[test]
    fn test_parse_counts_and_registers() {
        let cmd = complete("\"a3dd");
        assert_eq!(cmd.register, Some('a'));
        assert_eq!(cmd.count, Some(3));
        assert_eq!(
            cmd.action,
            Action::Operator {
                op: Operator::Delete,
                target: OperatorTarget::Line
            }
        );
        // counts multiply
        assert_eq!(complete("2d3w").count, Some(6));
        assert_eq!(complete("0").action, Action::Move(Motion::LineStart));
        assert_eq!(complete("10j").count, Some(10));
    }

    #[test]
    fn test_parse_incomplete_and_invalid() {
        let keys: Vec<char> = "d".chars().collect();
        assert_eq!(parse_normal(&keys, false), Parse::Incomplete);
        let keys: Vec<char> = "g".chars().collect();
        assert_eq!(parse_normal(&keys, false), Parse::Incomplete);
        let keys: Vec<char> = "dz".chars().collect();
        assert_eq!(parse_normal(&keys, false), Parse::Invalid);
        let keys: Vec<char> = "q".chars().collect();
        assert_eq!(parse_normal(&keys, true), Parse::Complete(NormalCommand {
            register: None,
            count: None,
            action: Action::StopRecording
        }));
    }

    #[test]
    fn test_motion_is_not_a_change() {
        assert!(!Action::Move(Motion::Down).is_change());
        assert!(!complete("yy").action.is_change());
        assert!(complete("dw").action.is_change());
    }

    #[test]
    fn test_word_motions() {
        let mut v = vi("foo bar.baz\n  next\n");
        assert!(v.feed("w"));
        assert_eq!(v.cursor(), Position::new(0, 4));
        assert!(v.feed("w"));
        assert_eq!(v.cursor(), Position::new(0, 7));
        assert!(v.feed("w"));
        assert_eq!(v.cursor(), Position::new(0, 8));
        assert!(v.feed("w"));
        assert_eq!(v.cursor(), Position::new(1, 2));
        assert!(v.feed("b"));
        assert_eq!(v.cursor(), Position::new(0, 8));
        assert!(v.feed("0e"));
        assert_eq!(v.cursor(), Position::new(0, 2));
    }

    #[test]
    fn test_delete_word_and_dot() {
        let mut v = vi("one two three four\n");
        assert!(v.feed("dw"));
        assert_eq!(text(&v), "two three four\n");
        assert!(v.feed("."));
        assert_eq!(text(&v), "three four\n");
        assert_eq!(v.registers().borrow().text(None), Some("two "));
    }

    #[test]
    fn test_dw_at_line_end_stays_on_line() {
        let mut v = vi("alpha beta\ngamma\n");
        assert!(v.feed("wdw"));
        assert_eq!(text(&v), "alpha \ngamma\n");
    }

    #[test]
    fn test_change_word_with_insert_then_repeat() {
        let mut v = vi("foo foo\n");
        assert!(v.feed("cwbar\x1b"));
        assert_eq!(text(&v), "bar foo\n");
        assert_eq!(v.last_change(), "cwbar\x1b");
        assert!(v.feed("w."));
        assert_eq!(text(&v), "bar bar\n");
        assert_eq!(v.mode(), Mode::Normal);
    }

    #[test]
    fn test_linewise_delete_yank_put() {
        let mut v = vi("a\nb\nc\nd\n");
        assert!(v.feed("j2dd"));
        assert_eq!(text(&v), "a\nd\n");
        assert!(v.feed("P"));
        assert_eq!(text(&v), "a\nb\nc\nd\n");
        assert!(v.feed("gg\"xyjG\"xp"));
        assert_eq!(text(&v), "a\nb\nc\nd\na\nb\n");
    }

    #[test]
    fn test_insert_mode_editing() {
        let mut v = vi("ac\n");
        assert!(v.feed("ab\x1b"));
        assert_eq!(text(&v), "abc\n");
        assert!(v.feed("A\rd\x1b"));
        assert_eq!(text(&v), "abc\nd\n");
        assert!(v.feed("Ox\x7f\x7fy\x1b"));
        assert_eq!(text(&v), "abcy\nd\n");
        assert!(v.feed("oz\x1b"));
        assert_eq!(text(&v), "abcy\nz\nd\n");
    }

    #[test]
    fn test_x_r_tilde_and_join() {
        let mut v = vi("hello\n  world\n");
        assert!(v.feed("2x"));
        assert_eq!(text(&v), "llo\n  world\n");
        assert!(v.feed("rLl~"));
        assert_eq!(text(&v), "LLo\n  world\n");
        assert!(v.feed("J"));
        assert_eq!(text(&v), "LLo world\n");
        assert!(v.feed("$X"));
        assert_eq!(text(&v), "LLo word\n");
    }

    #[test]
    fn test_d_dollar_and_c() {
        let mut v = vi("keep this\n");
        assert!(v.feed("wD"));
        assert_eq!(text(&v), "keep \n");
        assert!(v.feed("0Cnew\x1b"));
        assert_eq!(text(&v), "new\n");
    }

    #[test]
    fn test_marks_and_linewise_motion_operator() {
        let mut v = vi("1\n2\n3\n4\n5\n");
        assert!(v.feed("jmajjd'a"));
        assert_eq!(text(&v), "1\n5\n");
    }

    #[test]
    fn test_search_and_repeat_search() {
        let mut v = vi("x\nfoo\ny\nfoo\n");
        assert!(v.feed("/foo\r"));
        assert_eq!(v.cursor().line, 1);
        assert!(v.feed("n"));
        assert_eq!(v.cursor().line, 3);
        assert!(v.feed("N"));
        assert_eq!(v.cursor().line, 1);
        assert!(!v.feed("/nothing\r"));
        assert!(v.status().contains("pattern not found"));
        assert_eq!(v.cursor().line, 1);
    }

    #[test]
    fn test_ex_from_command_line() {
        let mut v = vi("a\nb\nc\n");
        assert!(v.feed(":%s/b/B/\r"));
        assert_eq!(text(&v), "a\nB\nc\n");
        assert!(v.feed(":2,3d\r"));
        assert_eq!(text(&v), "a\n");
    }

    #[test]
    fn test_macro_record_and_replay() {
        let mut v = vi("a1\na2\na3\n");
        assert!(v.feed("qqxjq"));
        assert_eq!(v.registers().borrow().text(Some('q')), Some("xj"));
        assert!(v.feed("@q"));
        assert!(v.feed("@@"));
        assert_eq!(text(&v), "1\n2\n3\n");
    }

    #[test]
    fn test_recursive_macro_is_bounded() {
        let mut v = vi(&"x\n".repeat(100));
        v.registers().borrow_mut().set('r', RegisterContent::chars("j@r")).unwrap();
        assert!(!v.feed("@r"));
        assert!(v.status().contains("too deep"));
    }

    #[test]
    fn test_unknown_command() {
        let mut v = vi("a\n");
        assert!(!v.feed("Z"));
        assert!(v.status().contains("unknown command"));
        assert!(v.feed("x"));
    }

    fn stream_vi(content: &str) -> (NamedTempFile, Vi) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        let mut stream = ExStream::new(StreamOptions::default(), Registers::shared());
        stream.attach(file.path()).unwrap();
        (file, Vi::new(Document::Stream(stream)))
    }

    fn stream_text(vi: &Vi) -> String {
        match vi.document() {
            Document::Stream(stream) => {
                let mut out = Vec::new();
                stream.copy_to(&mut out).unwrap();
                String::from_utf8(out).unwrap()
            }
            Document::Memory(_) => unreachable!(),
        }
    }

    #[test]
    fn test_streaming_linewise_commands() {
        let (_file, mut v) = stream_vi("a\nb\nc\nd\n");
        assert!(v.is_streaming_mode());
        assert!(v.feed("jdd"));
        assert_eq!(stream_text(&v), "a\nc\nd\n");
        assert!(v.feed("Gp"));
        assert_eq!(stream_text(&v), "a\nc\nd\nb\n");
        assert!(v.feed("ggJ"));
        assert_eq!(stream_text(&v), "ac\nd\nb\n");
    }

    #[test]
    fn test_streaming_refuses_char_commands() {
        let (_file, mut v) = stream_vi("abc\n");
        assert!(!v.feed("x"));
        assert!(v.status().contains("streaming"));
        assert!(!v.feed("i"));
        assert_eq!(stream_text(&v), "abc\n");
    }
}
