//! Addresses, address ranges and markers
//!
//! An [`Address`] is an unresolved line reference as typed on an ex command
//! line (`12`, `.`, `$`, `'a`, `/pat/`, `.+3`). It is resolved against an
//! [`AddressContext`] (the stream engine or an in-memory buffer) into a
//! 1-based line number. Line 0 means "before the first line" and is only
//! meaningful as a copy/move destination.

use crate::error::{ExError, Result};
use std::collections::HashMap;

/// Unresolved line reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// Absolute 1-based line number
    Line(usize),
    /// `.`
    Current,
    /// `$`
    Last,
    /// `'x`
    Marker(char),
    /// `/pattern/` or `?pattern?`
    Search { pattern: String, forward: bool },
    /// `base+n` / `base-n`
    Offset { base: Box<Address>, offset: isize },
}

/// What an address needs to know about the document it is resolved against
pub trait AddressContext {
    /// 1-based current line, 0 for an empty document
    fn current_line(&self) -> usize;

    /// Line count if it is known without scanning
    fn known_line_count(&self) -> Option<usize>;

    /// Line count, scanning the document if necessary
    fn line_count(&mut self) -> Result<usize>;

    /// 1-based line of a marker
    fn marker_line(&self, marker: char) -> Option<usize>;

    /// 1-based line of the next line matching `pattern`, starting after
    /// (or before, when searching backward) the current line.
    fn search_line(&mut self, pattern: &str, forward: bool) -> Result<Option<usize>>;
}

impl Address {
    /// Resolve to a 1-based line number, clamped into `[0, line_count]`.
    ///
    /// The upper clamp is only applied when the line count is known or was
    /// needed to resolve the address (`$`); resolving `12` never forces a
    /// scan of the whole document.
    pub fn resolve(&self, ctx: &mut dyn AddressContext) -> Result<usize> {
        let raw = self.resolve_raw(ctx)?;
        let low = raw.max(0) as usize;
        Ok(match ctx.known_line_count() {
            Some(count) => low.min(count),
            None => low,
        })
    }

    fn resolve_raw(&self, ctx: &mut dyn AddressContext) -> Result<i64> {
        match self {
            Address::Line(n) => Ok(*n as i64),
            Address::Current => Ok(ctx.current_line() as i64),
            Address::Last => Ok(ctx.line_count()? as i64),
            Address::Marker(c) => ctx
                .marker_line(*c)
                .map(|line| line as i64)
                .ok_or(ExError::NoSuchMarker(*c)),
            Address::Search { pattern, forward } => ctx
                .search_line(pattern, *forward)?
                .map(|line| line as i64)
                .ok_or_else(|| ExError::Precondition(format!("pattern not found: {}", pattern))),
            Address::Offset { base, offset } => Ok(base.resolve_raw(ctx)? + *offset as i64),
        }
    }

    /// True for addresses that need the full line count to resolve
    pub fn needs_line_count(&self) -> bool {
        match self {
            Address::Last => true,
            Address::Offset { base, .. } => base.needs_line_count(),
            _ => false,
        }
    }
}

/// Parse one address at the start of `input`.
///
/// Returns the address and the number of bytes consumed, or `None` when the
/// input does not start with an address.
pub fn parse_address(input: &str) -> Result<Option<(Address, usize)>> {
    let bytes = input.as_bytes();
    let mut pos = 0;

    let base = match bytes.first() {
        Some(b'0'..=b'9') => {
            let digits = input.bytes().take_while(|b| b.is_ascii_digit()).count();
            let n = input[..digits]
                .parse::<usize>()
                .map_err(|_| ExError::Parse(format!("line number out of range: {}", &input[..digits])))?;
            pos = digits;
            Some(Address::Line(n))
        }
        Some(b'.') => {
            pos = 1;
            Some(Address::Current)
        }
        Some(b'$') => {
            pos = 1;
            Some(Address::Last)
        }
        Some(b'\'') => {
            let c = input[1..]
                .chars()
                .next()
                .ok_or_else(|| ExError::Parse("missing mark name after '".to_string()))?;
            pos = 1 + c.len_utf8();
            Some(Address::Marker(c))
        }
        Some(&delim @ (b'/' | b'?')) => {
            let (pattern, used) = scan_delimited(&input[1..], delim as char);
            pos = 1 + used;
            Some(Address::Search {
                pattern,
                forward: delim == b'/',
            })
        }
        _ => None,
    };

    let mut address = base;
    while let Some(&sign @ (b'+' | b'-')) = bytes.get(pos) {
        pos += 1;
        let digits = input[pos..].bytes().take_while(|b| b.is_ascii_digit()).count();
        let n: isize = if digits == 0 {
            1
        } else {
            input[pos..pos + digits]
                .parse()
                .map_err(|_| ExError::Parse(format!("offset out of range: {}", &input[pos..pos + digits])))?
        };
        pos += digits;
        let offset = if sign == b'-' { -n } else { n };
        let base = address.take().unwrap_or(Address::Current);
        address = Some(match base {
            Address::Offset { base, offset: prev } => Address::Offset {
                base,
                offset: prev + offset,
            },
            other => Address::Offset {
                base: Box::new(other),
                offset,
            },
        });
    }

    Ok(address.map(|a| (a, pos)))
}

/// Read up to an unescaped `delim`; `\delim` yields the delimiter itself.
/// Returns the text and the bytes consumed including the closing delimiter.
pub(crate) fn scan_delimited(input: &str, delim: char) -> (String, usize) {
    let mut text = String::new();
    let mut chars = input.char_indices();

    while let Some((i, c)) = chars.next() {
        if c == delim {
            return (text, i + c.len_utf8());
        }
        if c == '\\' {
            match chars.next() {
                Some((_, next)) if next == delim => text.push(next),
                Some((_, next)) => {
                    text.push('\\');
                    text.push(next);
                }
                None => text.push('\\'),
            }
            continue;
        }
        text.push(c);
    }

    (text, input.len())
}

/// Resolved, 1-based inclusive line range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub begin: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(begin: usize, end: usize) -> Self {
        Self { begin, end }
    }

    pub fn single(line: usize) -> Self {
        Self::new(line, line)
    }

    /// A range with begin > end selects nothing.
    pub fn is_empty(&self) -> bool {
        self.begin > self.end || self.end == 0
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.end - self.begin.max(1) + 1
        }
    }

    pub fn contains(&self, line: usize) -> bool {
        !self.is_empty() && line >= self.begin && line <= self.end
    }
}

/// Pair of addresses with an optional copy/move destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRange {
    pub begin: Address,
    pub end: Address,
    pub destination: Option<Address>,
}

impl AddressRange {
    pub fn new(begin: Address, end: Address) -> Self {
        Self {
            begin,
            end,
            destination: None,
        }
    }

    pub fn current() -> Self {
        Self::new(Address::Current, Address::Current)
    }

    /// `%`, i.e. `1,$`
    pub fn all() -> Self {
        Self::new(Address::Line(1), Address::Last)
    }

    /// Absolute 1-based lines `begin..=end`
    pub fn lines(begin: usize, end: usize) -> Self {
        Self::new(Address::Line(begin), Address::Line(end))
    }

    pub fn with_destination(mut self, destination: Address) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Parse `%`, `a`, `a,b` or `a;b` at the start of `input`.
    pub fn parse(input: &str) -> Result<Option<(AddressRange, usize)>> {
        if input.starts_with('%') {
            return Ok(Some((AddressRange::all(), 1)));
        }

        let Some((begin, used)) = parse_address(input)? else {
            return Ok(None);
        };

        let rest = &input[used..];
        if let Some(after) = rest.strip_prefix([',', ';']) {
            return match parse_address(after)? {
                Some((end, used_end)) => Ok(Some((AddressRange::new(begin, end), used + 1 + used_end))),
                // "5," means "5,."
                None => Ok(Some((AddressRange::new(begin, Address::Current), used + 1))),
            };
        }

        Ok(Some((AddressRange::new(begin.clone(), begin), used)))
    }

    /// Resolve begin and end. Begin is raised to 1 when the document has lines.
    pub fn resolve(&self, ctx: &mut dyn AddressContext) -> Result<LineRange> {
        let begin = self.begin.resolve(ctx)?;
        let end = self.end.resolve(ctx)?;
        Ok(LineRange::new(begin.max(1), end))
    }

    pub fn resolve_destination(&self, ctx: &mut dyn AddressContext) -> Result<Option<usize>> {
        self.destination.as_ref().map(|d| d.resolve(ctx)).transpose()
    }
}

/// Named line bookmarks for one document
#[derive(Debug, Clone, Default)]
pub struct Markers {
    marks: HashMap<char, usize>,
}

impl Markers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `marker` to the 1-based `line`, overwriting any previous value.
    pub fn set(&mut self, marker: char, line: usize) -> Result<()> {
        if marker.is_control() || marker.is_whitespace() {
            return Err(ExError::Precondition(format!("invalid mark name: {:?}", marker)));
        }
        self.marks.insert(marker, line);
        Ok(())
    }

    pub fn get(&self, marker: char) -> Option<usize> {
        self.marks.get(&marker).copied()
    }

    pub fn delete(&mut self, marker: char) -> bool {
        self.marks.remove(&marker).is_some()
    }

    pub fn clear(&mut self) {
        self.marks.clear();
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Lines `range` were removed: drop markers inside, shift the ones below.
    pub fn on_erase(&mut self, range: LineRange) {
        if range.is_empty() {
            return;
        }
        let removed = range.len();
        self.marks.retain(|_, line| !range.contains(*line));
        for line in self.marks.values_mut() {
            if *line > range.end {
                *line -= removed;
            }
        }
    }

    /// `count` lines were inserted after 1-based line `after`.
    pub fn on_insert(&mut self, after: usize, count: usize) {
        for line in self.marks.values_mut() {
            if *line > after {
                *line += count;
            }
        }
    }
}
