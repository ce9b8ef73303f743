//! Line-Edit-Action
//!
//! A [`StreamLine`] decides what happens to each line while the stream engine
//! copies the document into a scratch file. It knows nothing about files: it
//! gets one line at a time (terminator included) and an output to write to.
//! The counters it keeps are what the engine uses afterward to update its
//! line count and position.

use crate::address::LineRange;
use crate::matcher::Matcher;
use std::io::{self, Write};

/// What a pass does to the lines in its range
#[derive(Debug, Clone)]
pub enum LineAction {
    /// Drop the lines
    Erase,
    /// Write `text` (whole lines) before the first line of the range
    Insert { text: Vec<u8> },
    /// Splice each line onto the next one
    Join,
    /// Replace the first match per line (every match when `global`)
    Substitute {
        matcher: Matcher,
        replacement: Vec<u8>,
        global: bool,
    },
    /// Copy the lines to a separate output; the document is untouched
    Write,
    /// Collect the lines for a register; the document is untouched
    Yank,
    /// Write `text` after 1-based line `destination` (0 = before line 1)
    Copy { destination: usize, text: Vec<u8> },
    /// Drop the range and write `text` after line `destination`
    Move { destination: usize, text: Vec<u8> },
}

impl LineAction {
    pub fn name(&self) -> &'static str {
        match self {
            LineAction::Erase => "erase",
            LineAction::Insert { .. } => "insert",
            LineAction::Join => "join",
            LineAction::Substitute { .. } => "substitute",
            LineAction::Write => "write",
            LineAction::Yank => "yank",
            LineAction::Copy { .. } => "copy",
            LineAction::Move { .. } => "move",
        }
    }
}

/// Returned for every line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handle {
    Continue,
    /// Nothing further is of interest; the pass may end early
    Stop,
}

#[derive(Debug)]
pub struct StreamLine {
    action: LineAction,
    range: LineRange,
    actions: usize,
    lines_seen: usize,
    lines_added: usize,
    lines_removed: usize,
    stopped: bool,
    yanked: Vec<u8>,
    pending_terminator: Option<Vec<u8>>,
    last_terminated: bool,
    inserted: bool,
}

impl StreamLine {
    pub fn new(action: LineAction, range: LineRange) -> Self {
        Self {
            action,
            range,
            actions: 0,
            lines_seen: 0,
            lines_added: 0,
            lines_removed: 0,
            stopped: false,
            yanked: Vec::new(),
            pending_terminator: None,
            last_terminated: true,
            inserted: false,
        }
    }

    pub fn action(&self) -> &LineAction {
        &self.action
    }

    pub fn range(&self) -> LineRange {
        self.range
    }

    /// Whether the pass output replaces the live document
    pub fn is_write(&self) -> bool {
        !matches!(self.action, LineAction::Write | LineAction::Yank)
    }

    /// Lines that matched / were changed / were inserted
    pub fn actions(&self) -> usize {
        self.actions
    }

    /// Input lines handed to [`handle`](Self::handle)
    pub fn lines(&self) -> usize {
        self.lines_seen
    }

    pub fn lines_added(&self) -> usize {
        self.lines_added
    }

    pub fn lines_removed(&self) -> usize {
        self.lines_removed
    }

    /// The pass ended before reading the whole input
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// Output line count after a complete pass
    pub fn output_lines(&self) -> usize {
        self.lines_seen + self.lines_added - self.lines_removed
    }

    pub fn take_yanked(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.yanked)
    }

    /// Process 1-based line `line_no`; `line` includes its terminator, if any.
    pub fn handle<W: Write>(&mut self, line_no: usize, line: &[u8], out: &mut W) -> io::Result<Handle> {
        self.lines_seen += 1;
        let (content, terminator) = split_terminator(line);
        self.last_terminated = !terminator.is_empty();
        let in_range = self.range.contains(line_no);

        // A joined line waits for its successor before losing its newline.
        if self.pending_terminator.take().is_some() {
            self.actions += 1;
            self.lines_removed += 1;
        }

        let mut inserted = None;
        match &self.action {
            LineAction::Erase => {
                if in_range {
                    self.actions += 1;
                    self.lines_removed += 1;
                } else {
                    out.write_all(line)?;
                }
            }
            LineAction::Insert { text } => {
                if line_no == self.range.begin && !self.inserted {
                    out.write_all(text)?;
                    inserted = Some(count_lines(text));
                }
                out.write_all(line)?;
            }
            LineAction::Join => {
                if in_range && line_no < self.range.end {
                    out.write_all(content)?;
                    self.pending_terminator = Some(terminator.to_vec());
                } else {
                    out.write_all(line)?;
                }
            }
            LineAction::Substitute {
                matcher,
                replacement,
                global,
            } => {
                let replaced = if in_range {
                    matcher.substitute(content, replacement, *global)
                } else {
                    None
                };
                match replaced {
                    Some(mut new_content) => {
                        self.actions += 1;
                        new_content.extend_from_slice(terminator);
                        // An unterminated last line that ends up empty still
                        // has to be written as a line.
                        if terminator.is_empty() && new_content.last().is_none_or(|&b| b == b'\n') {
                            new_content.push(b'\n');
                        }
                        self.lines_added += count_lines(&new_content) - 1;
                        self.last_terminated = new_content.ends_with(b"\n");
                        out.write_all(&new_content)?;
                    }
                    None => out.write_all(line)?,
                }
            }
            LineAction::Write | LineAction::Yank => {
                if line_no > self.range.end {
                    self.stopped = true;
                    return Ok(Handle::Stop);
                }
                if in_range {
                    self.actions += 1;
                    if matches!(self.action, LineAction::Yank) {
                        self.yanked.extend_from_slice(content);
                        self.yanked.push(b'\n');
                    } else {
                        out.write_all(line)?;
                    }
                }
            }
            LineAction::Copy { destination, text } | LineAction::Move { destination, text } => {
                let destination = *destination;
                let is_move = matches!(self.action, LineAction::Move { .. });
                if destination == 0 && line_no == 1 && !self.inserted {
                    out.write_all(text)?;
                    inserted = Some(count_lines(text));
                }
                if is_move && in_range {
                    self.lines_removed += 1;
                } else {
                    out.write_all(line)?;
                }
                if line_no == destination && !self.inserted {
                    if terminator.is_empty() {
                        out.write_all(b"\n")?;
                        self.last_terminated = true;
                    }
                    out.write_all(text)?;
                    inserted = Some(count_lines(text));
                }
            }
        }

        if let Some(lines) = inserted {
            self.record_insert(lines);
        }
        Ok(Handle::Continue)
    }

    /// Called once after the last input line of a complete pass.
    pub fn finish<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        if let Some(terminator) = self.pending_terminator.take() {
            // Nothing followed the last joined line; keep its terminator.
            out.write_all(&terminator)?;
        }

        let trailing = match &self.action {
            LineAction::Insert { text } if !self.inserted && self.range.begin > self.lines_seen => Some(text.clone()),
            LineAction::Copy { destination, text } | LineAction::Move { destination, text }
                if !self.inserted && *destination >= self.lines_seen =>
            {
                Some(text.clone())
            }
            _ => None,
        };

        if let Some(text) = trailing {
            if !self.last_terminated && self.lines_seen > 0 {
                out.write_all(b"\n")?;
            }
            out.write_all(&text)?;
            self.record_insert(count_lines(&text));
        }

        Ok(())
    }

    fn record_insert(&mut self, lines: usize) {
        self.inserted = true;
        self.lines_added += lines;
        self.actions += lines;
    }
}

/// Split off a trailing `\n` or `\r\n`.
pub fn split_terminator(line: &[u8]) -> (&[u8], &[u8]) {
    if line.ends_with(b"\r\n") {
        line.split_at(line.len() - 2)
    } else if line.ends_with(b"\n") {
        line.split_at(line.len() - 1)
    } else {
        (line, &[])
    }
}

/// Number of lines in a block of text, counting an unterminated tail.
pub fn count_lines(text: &[u8]) -> usize {
    let newlines = memchr::memchr_iter(b'\n', text).count();
    if text.last().is_some_and(|&b| b != b'\n') {
        newlines + 1
    } else {
        newlines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::SearchFlags;
    use crate::vi_regex::RegexFlavor;

    const DOC: &[&str] = &["alpha\n", "beta\n", "gamma\n", "delta\n"];

    fn run(action: LineAction, range: LineRange, input: &[&str]) -> (StreamLine, String) {
        let mut sl = StreamLine::new(action, range);
        let mut out = Vec::new();
        for (i, line) in input.iter().enumerate() {
            if sl.handle(i + 1, line.as_bytes(), &mut out).unwrap() == Handle::Stop {
                return (sl, String::from_utf8(out).unwrap());
            }
        }
        sl.finish(&mut out).unwrap();
        (sl, String::from_utf8(out).unwrap())
    }

    fn matcher(p: &str) -> Matcher {
        Matcher::new(p, SearchFlags::default(), RegexFlavor::Vi).unwrap()
    }

    #[test]
    fn test_erase_range() {
        let (sl, out) = run(LineAction::Erase, LineRange::new(2, 3), DOC);
        assert_eq!(out, "alpha\ndelta\n");
        assert_eq!(sl.actions(), 2);
        assert_eq!(sl.output_lines(), 2);
        assert!(sl.is_write());
    }

    #[test]
    fn test_insert_before_line() {
        let text = b"new\n".to_vec();
        let (sl, out) = run(LineAction::Insert { text }, LineRange::single(2), DOC);
        assert_eq!(out, "alpha\nnew\nbeta\ngamma\ndelta\n");
        assert_eq!(sl.actions(), 1);
        assert_eq!(sl.output_lines(), 5);
    }

    #[test]
    fn test_insert_past_end_appends() {
        let text = b"tail\n".to_vec();
        let (_, out) = run(LineAction::Insert { text }, LineRange::single(3), &["a\n", "b"]);
        assert_eq!(out, "a\nb\ntail\n");
    }

    #[test]
    fn test_join_range() {
        let (sl, out) = run(LineAction::Join, LineRange::new(1, 3), DOC);
        assert_eq!(out, "alphabetagamma\ndelta\n");
        assert_eq!(sl.actions(), 2);
        assert_eq!(sl.output_lines(), 2);
    }

    #[test]
    fn test_join_past_end_keeps_last_newline() {
        let (sl, out) = run(LineAction::Join, LineRange::new(3, 9), DOC);
        assert_eq!(out, "alpha\nbeta\ngammadelta\n");
        assert_eq!(sl.actions(), 1);
    }

    #[test]
    fn test_substitute_first_match_per_line() {
        let action = LineAction::Substitute {
            matcher: matcher("a"),
            replacement: b"A".to_vec(),
            global: false,
        };
        let (sl, out) = run(action, LineRange::new(1, 4), DOC);
        assert_eq!(out, "Alpha\nbetA\ngAmma\ndeltA\n");
        assert_eq!(sl.actions(), 4);
    }

    #[test]
    fn test_substitute_identity_counts_action() {
        let action = LineAction::Substitute {
            matcher: matcher("beta"),
            replacement: b"beta".to_vec(),
            global: false,
        };
        let (sl, out) = run(action, LineRange::new(1, 4), DOC);
        assert_eq!(out, DOC.concat());
        assert_eq!(sl.actions(), 1);
    }

    #[test]
    fn test_substitute_to_empty_keeps_line() {
        let action = LineAction::Substitute {
            matcher: matcher("beta"),
            replacement: Vec::new(),
            global: false,
        };
        let (sl, out) = run(action, LineRange::single(2), DOC);
        assert_eq!(out, "alpha\n\ngamma\ndelta\n");
        assert_eq!(sl.output_lines(), 4);
    }

    #[test]
    fn test_substitute_newline_adds_lines() {
        let action = LineAction::Substitute {
            matcher: matcher("e"),
            replacement: b"\n".to_vec(),
            global: true,
        };
        let (sl, out) = run(action, LineRange::single(2), DOC);
        assert_eq!(out, "alpha\nb\nta\ngamma\ndelta\n");
        assert_eq!(sl.output_lines(), 5);
    }

    #[test]
    fn test_substitute_keeps_crlf() {
        let action = LineAction::Substitute {
            matcher: matcher("x$"),
            replacement: b"y".to_vec(),
            global: false,
        };
        let (_, out) = run(action, LineRange::single(1), &["ax\r\n", "bx\r\n"]);
        assert_eq!(out, "ay\r\nbx\r\n");
    }

    #[test]
    fn test_substitute_empties_unterminated_last_line() {
        let action = LineAction::Substitute {
            matcher: matcher("beta"),
            replacement: Vec::new(),
            global: false,
        };
        let (sl, out) = run(action, LineRange::new(1, 2), &["alpha\n", "beta"]);
        assert_eq!(out, "alpha\n\n");
        assert_eq!(sl.actions(), 1);
        assert_eq!(sl.output_lines(), 2);
        assert_eq!(count_lines(out.as_bytes()), 2);
    }

    #[test]
    fn test_substitute_newline_on_unterminated_last_line() {
        let action = LineAction::Substitute {
            matcher: matcher("a$"),
            replacement: b"a\n".to_vec(),
            global: false,
        };
        let (sl, out) = run(action, LineRange::new(1, 2), &["alpha\n", "beta"]);
        assert_eq!(out, "alpha\n\nbeta\n\n");
        assert_eq!(sl.output_lines(), count_lines(out.as_bytes()));
    }

    #[test]
    fn test_copy_after_unterminated_last_line() {
        let action = LineAction::Copy {
            destination: 2,
            text: b"a\n".to_vec(),
        };
        let (sl, out) = run(action, LineRange::single(1), &["a\n", "b"]);
        assert_eq!(out, "a\nb\na\n");
        assert_eq!(sl.output_lines(), 3);
    }

    #[test]
    fn test_yank_stops_after_range_and_writes_nothing() {
        let (mut sl, out) = run(LineAction::Yank, LineRange::new(1, 2), DOC);
        assert!(out.is_empty());
        assert!(sl.stopped());
        assert!(!sl.is_write());
        assert_eq!(sl.take_yanked(), b"alpha\nbeta\n");
    }

    #[test]
    fn test_write_copies_only_range() {
        let (sl, out) = run(LineAction::Write, LineRange::new(2, 3), DOC);
        assert_eq!(out, "beta\ngamma\n");
        assert_eq!(sl.actions(), 2);
        assert!(!sl.is_write());
    }

    #[test]
    fn test_copy_after_line_and_to_top() {
        let text = b"alpha\n".to_vec();
        let (sl, out) = run(
            LineAction::Copy {
                destination: 3,
                text: text.clone(),
            },
            LineRange::single(1),
            DOC,
        );
        assert_eq!(out, "alpha\nbeta\ngamma\nalpha\ndelta\n");
        assert_eq!(sl.actions(), 1);

        let (_, out) = run(
            LineAction::Copy {
                destination: 0,
                text: b"delta\n".to_vec(),
            },
            LineRange::single(4),
            DOC,
        );
        assert_eq!(out, "delta\nalpha\nbeta\ngamma\ndelta\n");
    }

    #[test]
    fn test_move_down_and_up() {
        let (sl, out) = run(
            LineAction::Move {
                destination: 4,
                text: b"alpha\nbeta\n".to_vec(),
            },
            LineRange::new(1, 2),
            DOC,
        );
        assert_eq!(out, "gamma\ndelta\nalpha\nbeta\n");
        assert_eq!(sl.output_lines(), 4);
        assert_eq!(sl.actions(), 2);

        let (_, out) = run(
            LineAction::Move {
                destination: 0,
                text: b"delta\n".to_vec(),
            },
            LineRange::single(4),
            DOC,
        );
        assert_eq!(out, "delta\nalpha\nbeta\ngamma\n");
    }

    #[test]
    fn test_count_lines() {
        assert_eq!(count_lines(b""), 0);
        assert_eq!(count_lines(b"a\n"), 1);
        assert_eq!(count_lines(b"a\nb"), 2);
    }
}
