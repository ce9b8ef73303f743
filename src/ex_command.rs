//! Ex command lines
//!
//! `[range]cmd[!] [args]` is parsed into an [`ExLine`] and run by an
//! [`ExSession`] against any [`ExTarget`]: the stream engine for large
//! documents, the in-memory widget otherwise. The session keeps what must
//! survive between commands (the last substitution for `:&`).

use crate::address::{parse_address, scan_delimited, Address, AddressContext, AddressRange, LineRange};
use crate::error::{ExError, Result};
use crate::registers::SharedRegisters;
use crate::stream::{ExStream, SubstituteFlags};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Operations an ex command can perform on a document
pub trait ExTarget: AddressContext {
    fn delete(&mut self, range: &AddressRange, register: Option<char>) -> Result<usize>;
    fn yank(&mut self, range: &AddressRange, register: Option<char>) -> Result<usize>;
    fn join(&mut self, range: &AddressRange) -> Result<usize>;
    fn substitute(
        &mut self,
        range: &AddressRange,
        pattern: &str,
        replacement: &str,
        flags: SubstituteFlags,
    ) -> Result<usize>;
    fn insert_text(&mut self, range: &AddressRange, text: &str) -> Result<usize>;
    fn append_text(&mut self, range: &AddressRange, text: &str) -> Result<usize>;
    /// Copy to `range.destination`
    fn copy(&mut self, range: &AddressRange) -> Result<usize>;
    /// Move to `range.destination`
    fn move_lines(&mut self, range: &AddressRange) -> Result<usize>;
    fn read_range(&mut self, range: &AddressRange) -> Result<(LineRange, Vec<u8>)>;
    fn write_range(&mut self, range: &AddressRange, path: &Path, append: bool) -> Result<usize>;
    /// Save the document to its own path
    fn write(&mut self) -> Result<()>;
    fn set_marker(&mut self, marker: char, line: usize) -> Result<()>;
    /// Put the cursor on 1-based `line`
    fn goto(&mut self, line: usize) -> Result<()>;
    fn registers(&self) -> SharedRegisters;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub pattern: String,
    pub replacement: String,
    pub flags: SubstituteFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExCommand {
    /// A bare address moves the cursor
    Goto,
    Delete { register: Option<char>, count: Option<usize> },
    Yank { register: Option<char>, count: Option<usize> },
    Put { register: Option<char> },
    Join { count: Option<usize> },
    Substitute(Substitution),
    /// `:&`, `:&&`, `:s` without a pattern
    RepeatSubstitute { flags: SubstituteFlags, keep_flags: bool },
    Append { text: String },
    Insert { text: String },
    Copy { destination: Address },
    Move { destination: Address },
    Write { file: Option<PathBuf>, append: bool },
    Mark { marker: char },
    Print,
    Number,
    /// `:=`
    LineNumber,
}

impl ExCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ExCommand::Goto => "goto",
            ExCommand::Delete { .. } => "delete",
            ExCommand::Yank { .. } => "yank",
            ExCommand::Put { .. } => "put",
            ExCommand::Join { .. } => "join",
            ExCommand::Substitute(_) | ExCommand::RepeatSubstitute { .. } => "substitute",
            ExCommand::Append { .. } => "append",
            ExCommand::Insert { .. } => "insert",
            ExCommand::Copy { .. } => "copy",
            ExCommand::Move { .. } => "move",
            ExCommand::Write { .. } => "write",
            ExCommand::Mark { .. } => "mark",
            ExCommand::Print => "print",
            ExCommand::Number => "number",
            ExCommand::LineNumber => "=",
        }
    }

    fn default_range(&self) -> AddressRange {
        match self {
            ExCommand::Write { .. } => AddressRange::all(),
            ExCommand::LineNumber => AddressRange::new(Address::Last, Address::Last),
            _ => AddressRange::current(),
        }
    }
}

/// One parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExLine {
    pub range: Option<AddressRange>,
    pub command: ExCommand,
    pub bang: bool,
}

impl ExLine {
    pub fn range_or_default(&self) -> AddressRange {
        self.range.clone().unwrap_or_else(|| self.command.default_range())
    }
}

/// Command names with the shortest accepted abbreviation
const COMMANDS: &[(&str, usize)] = &[
    ("append", 1),
    ("copy", 2),
    ("delete", 1),
    ("insert", 1),
    ("join", 1),
    ("k", 1),
    ("move", 1),
    ("mark", 2),
    ("number", 2),
    ("print", 1),
    ("put", 2),
    ("substitute", 1),
    ("t", 1),
    ("write", 1),
    ("yank", 1),
];

fn lookup(name: &str) -> Option<&'static str> {
    COMMANDS
        .iter()
        .find(|(full, min)| name.len() >= *min && full.starts_with(name))
        .map(|(full, _)| *full)
}

/// Parse an ex command line (the leading `:` is optional).
pub fn parse_ex(input: &str) -> Result<ExLine> {
    let input = input.trim_start().trim_start_matches(':').trim_start();

    let (range, used) = match AddressRange::parse(input)? {
        Some((range, used)) => (Some(range), used),
        None => (None, 0),
    };
    let rest = input[used..].trim_start();

    if rest.is_empty() {
        return match range {
            Some(range) => Ok(ExLine {
                range: Some(range),
                command: ExCommand::Goto,
                bang: false,
            }),
            None => Err(ExError::Parse("empty command".to_string())),
        };
    }

    let first = rest.chars().next().unwrap_or_default();
    let (name, args) = if first.is_ascii_alphabetic() {
        let len = rest.bytes().take_while(|b| b.is_ascii_alphabetic()).count();
        rest.split_at(len)
    } else {
        rest.split_at(first.len_utf8())
    };

    let (bang, args) = match args.strip_prefix('!') {
        Some(after) => (true, after),
        None => (false, args),
    };

    let command = match name {
        "&" => parse_repeat(args, true)?,
        "=" => ExCommand::LineNumber,
        "#" => ExCommand::Number,
        _ => match lookup(name) {
            Some(full) => parse_args(full, args)?,
            // `:ka` sets mark a
            None if name.len() == 2 && name.starts_with('k') => ExCommand::Mark {
                marker: name.chars().nth(1).unwrap_or_default(),
            },
            None => return Err(ExError::Parse(format!("not an editor command: {}", rest.trim_end()))),
        },
    };

    debug!("parsed ex command {} (range {:?})", command.name(), range);
    Ok(ExLine { range, command, bang })
}

fn parse_args(name: &str, args: &str) -> Result<ExCommand> {
    let trimmed = args.trim();
    Ok(match name {
        "delete" | "yank" => {
            let (register, count) = parse_register_count(trimmed)?;
            if name == "delete" {
                ExCommand::Delete { register, count }
            } else {
                ExCommand::Yank { register, count }
            }
        }
        "put" => ExCommand::Put {
            register: trimmed.chars().next(),
        },
        "join" => ExCommand::Join {
            count: parse_count(trimmed)?,
        },
        "substitute" => parse_substitute(args)?,
        "append" | "insert" => {
            let text = args.strip_prefix([' ', '\t']).unwrap_or(args).to_string();
            if name == "append" {
                ExCommand::Append { text }
            } else {
                ExCommand::Insert { text }
            }
        }
        "copy" | "t" | "move" => {
            let (destination, used) = parse_address(trimmed)?
                .ok_or_else(|| ExError::Parse(format!("{}: missing destination address", name)))?;
            if !trimmed[used..].trim().is_empty() {
                return Err(ExError::Parse(format!("trailing characters: {}", &trimmed[used..])));
            }
            if name == "move" {
                ExCommand::Move { destination }
            } else {
                ExCommand::Copy { destination }
            }
        }
        "write" => {
            let (append, file) = match trimmed.strip_prefix(">>") {
                Some(file) => (true, file.trim()),
                None => (false, trimmed),
            };
            if append && file.is_empty() {
                return Err(ExError::Parse("write: missing file name after >>".to_string()));
            }
            ExCommand::Write {
                file: (!file.is_empty()).then(|| PathBuf::from(file)),
                append,
            }
        }
        "mark" | "k" => {
            let mut chars = trimmed.chars();
            match (chars.next(), chars.next()) {
                (Some(marker), None) => ExCommand::Mark { marker },
                (None, _) => return Err(ExError::Parse("mark: missing mark name".to_string())),
                _ => return Err(ExError::Parse(format!("mark: trailing characters: {}", trimmed))),
            }
        }
        "print" => ExCommand::Print,
        "number" => ExCommand::Number,
        other => return Err(ExError::Unsupported(format!("{} is not supported", other))),
    })
}

fn parse_count(args: &str) -> Result<Option<usize>> {
    if args.is_empty() {
        return Ok(None);
    }
    match args.parse::<usize>() {
        Ok(0) => Err(ExError::Parse("count must be positive".to_string())),
        Ok(n) => Ok(Some(n)),
        Err(_) => Err(ExError::Parse(format!("bad count: {}", args))),
    }
}

fn parse_register_count(args: &str) -> Result<(Option<char>, Option<usize>)> {
    let mut chars = args.chars();
    match chars.next() {
        None => Ok((None, None)),
        Some(c) if c.is_ascii_digit() => Ok((None, parse_count(args)?)),
        Some(register) => Ok((Some(register), parse_count(chars.as_str().trim())?)),
    }
}

fn parse_flags(flags: &str) -> Result<(SubstituteFlags, bool)> {
    let mut parsed = SubstituteFlags::default();
    let mut keep = false;
    for c in flags.trim().chars() {
        match c {
            'g' => parsed.global = true,
            'i' => parsed.ignore_case = true,
            'I' => parsed.ignore_case = false,
            '&' => keep = true,
            // confirmation prompts have no meaning here
            'c' => {}
            other => return Err(ExError::Parse(format!("unknown substitute flag: {}", other))),
        }
    }
    Ok((parsed, keep))
}

fn parse_repeat(args: &str, keep_first: bool) -> Result<ExCommand> {
    let (flags, keep) = parse_flags(args)?;
    Ok(ExCommand::RepeatSubstitute {
        flags,
        keep_flags: keep && keep_first,
    })
}

fn parse_substitute(args: &str) -> Result<ExCommand> {
    let Some(delim) = args.chars().next() else {
        return parse_repeat("", false);
    };
    if delim.is_ascii_alphanumeric() || delim == '&' || delim == ' ' {
        return parse_repeat(args, true);
    }
    if delim == '\\' || delim == '"' || delim == '|' {
        return Err(ExError::Parse(format!("invalid substitute delimiter: {}", delim)));
    }

    let body = &args[delim.len_utf8()..];
    let (pattern, used) = scan_delimited(body, delim);
    let rest = &body[used..];
    let (replacement, used) = scan_delimited(rest, delim);
    let (flags, _) = parse_flags(&rest[used..])?;

    Ok(ExCommand::Substitute(Substitution {
        pattern,
        replacement,
        flags,
    }))
}

/// What an executed command produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExReport {
    /// Lines affected
    pub actions: usize,
    /// Output of `:p`, `:nu`, `:=`
    pub output: Vec<String>,
    /// Status line text
    pub message: Option<String>,
}

impl ExReport {
    fn actions(actions: usize, message: Option<String>) -> Self {
        Self {
            actions,
            output: Vec::new(),
            message,
        }
    }
}

/// State shared by consecutive ex commands
#[derive(Debug, Default)]
pub struct ExSession {
    last_substitution: Option<Substitution>,
}

impl ExSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_substitution(&self) -> Option<&Substitution> {
        self.last_substitution.as_ref()
    }

    /// Parse and run one command line.
    pub fn execute(&mut self, target: &mut dyn ExTarget, input: &str) -> Result<ExReport> {
        let line = parse_ex(input)?;
        self.run(target, &line)
    }

    pub fn run(&mut self, target: &mut dyn ExTarget, line: &ExLine) -> Result<ExReport> {
        let range = line.range_or_default();

        match &line.command {
            ExCommand::Goto => {
                let lines = range.resolve(target)?;
                target.goto(lines.end)?;
                Ok(ExReport::default())
            }
            ExCommand::Delete { register, count } => {
                let range = with_count(target, &range, *count)?;
                let n = target.delete(&range, *register)?;
                Ok(ExReport::actions(n, lines_message(n, "deleted")))
            }
            ExCommand::Yank { register, count } => {
                let range = with_count(target, &range, *count)?;
                let n = target.yank(&range, *register)?;
                Ok(ExReport::actions(n, lines_message(n, "yanked")))
            }
            ExCommand::Put { register } => {
                let text = {
                    let registers = target.registers();
                    let registers = registers.borrow();
                    registers
                        .text(*register)
                        .map(str::to_string)
                        .ok_or_else(|| ExError::Precondition("nothing in register".to_string()))?
                };
                let n = target.append_text(&range, &text)?;
                Ok(ExReport::actions(n, lines_message(n, "added")))
            }
            ExCommand::Join { count } => {
                let lines = range.resolve(target)?;
                let end = match count {
                    Some(count) => lines.end + count - 1,
                    None if lines.begin == lines.end => lines.end + 1,
                    None => lines.end,
                };
                let n = target.join(&AddressRange::lines(lines.begin, end))?;
                Ok(ExReport::actions(n, None))
            }
            ExCommand::Substitute(sub) => {
                self.last_substitution = Some(sub.clone());
                self.substitute(target, &range, sub)
            }
            ExCommand::RepeatSubstitute { flags, keep_flags } => {
                let mut sub = self
                    .last_substitution
                    .clone()
                    .ok_or_else(|| ExError::Precondition("no previous substitute".to_string()))?;
                if !keep_flags {
                    sub.flags = *flags;
                }
                self.substitute(target, &range, &sub)
            }
            ExCommand::Append { text } => {
                let n = target.append_text(&range, text)?;
                Ok(ExReport::actions(n, None))
            }
            ExCommand::Insert { text } => {
                let n = target.insert_text(&range, text)?;
                Ok(ExReport::actions(n, None))
            }
            ExCommand::Copy { destination } => {
                let n = target.copy(&range.with_destination(destination.clone()))?;
                Ok(ExReport::actions(n, lines_message(n, "copied")))
            }
            ExCommand::Move { destination } => {
                let n = target.move_lines(&range.with_destination(destination.clone()))?;
                Ok(ExReport::actions(n, lines_message(n, "moved")))
            }
            ExCommand::Write { file: None, .. } => {
                target.write()?;
                Ok(ExReport::actions(0, Some("written".to_string())))
            }
            ExCommand::Write {
                file: Some(file),
                append,
            } => {
                let n = target.write_range(&range, file, *append)?;
                Ok(ExReport::actions(
                    n,
                    Some(format!("\"{}\" {} lines written", file.display(), n)),
                ))
            }
            ExCommand::Mark { marker } => {
                let lines = range.resolve(target)?;
                target.set_marker(*marker, lines.end)?;
                Ok(ExReport::default())
            }
            ExCommand::Print | ExCommand::Number => {
                let (lines, text) = target.read_range(&range)?;
                let numbered = matches!(line.command, ExCommand::Number);
                let output = String::from_utf8_lossy(&text)
                    .lines()
                    .enumerate()
                    .map(|(i, l)| {
                        if numbered {
                            format!("{:>6}  {}", lines.begin + i, l)
                        } else {
                            l.to_string()
                        }
                    })
                    .collect::<Vec<_>>();
                if let Some(last) = (!output.is_empty()).then(|| lines.begin + output.len() - 1) {
                    target.goto(last)?;
                }
                Ok(ExReport {
                    actions: output.len(),
                    output,
                    message: None,
                })
            }
            ExCommand::LineNumber => {
                let lines = range.resolve(target)?;
                Ok(ExReport {
                    actions: 0,
                    output: vec![lines.end.to_string()],
                    message: None,
                })
            }
        }
    }

    fn substitute(&mut self, target: &mut dyn ExTarget, range: &AddressRange, sub: &Substitution) -> Result<ExReport> {
        let n = target.substitute(range, &sub.pattern, &sub.replacement, sub.flags)?;
        let message = if n == 0 {
            Some(format!("pattern not found: {}", sub.pattern))
        } else {
            lines_message(n, "substituted")
        };
        Ok(ExReport::actions(n, message))
    }
}

/// `:d 3` works on 3 lines starting at the end of the range.
fn with_count(target: &mut dyn ExTarget, range: &AddressRange, count: Option<usize>) -> Result<AddressRange> {
    match count {
        None => Ok(range.clone()),
        Some(count) => {
            let end = range.end.resolve(target)?;
            Ok(AddressRange::lines(end, end + count - 1))
        }
    }
}

fn lines_message(n: usize, what: &str) -> Option<String> {
    match n {
        0 => None,
        1 => Some(format!("1 line {}", what)),
        n => Some(format!("{} lines {}", n, what)),
    }
}

impl ExTarget for ExStream {
    fn delete(&mut self, range: &AddressRange, register: Option<char>) -> Result<usize> {
        ExStream::delete(self, range, register)
    }

    fn yank(&mut self, range: &AddressRange, register: Option<char>) -> Result<usize> {
        ExStream::yank(self, range, register)
    }

    fn join(&mut self, range: &AddressRange) -> Result<usize> {
        ExStream::join(self, range)
    }

    fn substitute(
        &mut self,
        range: &AddressRange,
        pattern: &str,
        replacement: &str,
        flags: SubstituteFlags,
    ) -> Result<usize> {
        ExStream::substitute(self, range, pattern, replacement, flags)
    }

    fn insert_text(&mut self, range: &AddressRange, text: &str) -> Result<usize> {
        ExStream::insert_text(self, range, text)
    }

    fn append_text(&mut self, range: &AddressRange, text: &str) -> Result<usize> {
        ExStream::append_text(self, range, text)
    }

    fn copy(&mut self, range: &AddressRange) -> Result<usize> {
        ExStream::copy(self, range)
    }

    fn move_lines(&mut self, range: &AddressRange) -> Result<usize> {
        ExStream::r#move(self, range)
    }

    fn read_range(&mut self, range: &AddressRange) -> Result<(LineRange, Vec<u8>)> {
        ExStream::read_range(self, range)
    }

    fn write_range(&mut self, range: &AddressRange, path: &Path, append: bool) -> Result<usize> {
        ExStream::write_range(self, range, path, append)
    }

    fn write(&mut self) -> Result<()> {
        ExStream::write(self)
    }

    fn set_marker(&mut self, marker: char, line: usize) -> Result<()> {
        self.markers_mut().set(marker, line)
    }

    fn goto(&mut self, line: usize) -> Result<()> {
        self.goto_line(line.saturating_sub(1))?;
        Ok(())
    }

    fn registers(&self) -> SharedRegisters {
        ExStream::registers(self).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::Registers;
    use crate::stream::StreamOptions;
    use std::fs;
    use tempfile::TempDir;

    fn parse(s: &str) -> ExLine {
        parse_ex(s).unwrap()
    }

    #[test]
    fn test_parse_delete_with_range_and_register() {
        let line = parse(":2,3d a");
        assert_eq!(line.range, Some(AddressRange::lines(2, 3)));
        assert_eq!(
            line.command,
            ExCommand::Delete {
                register: Some('a'),
                count: None
            }
        );

        let line = parse("d 3");
        assert_eq!(line.range, None);
        assert_eq!(
            line.command,
            ExCommand::Delete {
                register: None,
                count: Some(3)
            }
        );
    }

    #[test]
    fn test_parse_abbreviations() {
        assert!(matches!(parse("1,$ya").command, ExCommand::Yank { .. }));
        assert!(matches!(parse("m0").command, ExCommand::Move { .. }));
        assert!(matches!(parse("ma x").command, ExCommand::Mark { marker: 'x' }));
        assert!(matches!(parse("kx").command, ExCommand::Mark { marker: 'x' }));
        assert!(matches!(parse("pu").command, ExCommand::Put { register: None }));
        assert!(matches!(parse("p").command, ExCommand::Print));
        assert!(matches!(parse("nu").command, ExCommand::Number));
        assert!(matches!(parse("co$").command, ExCommand::Copy { .. }));
        assert!(matches!(parse("t.").command, ExCommand::Copy { .. }));
        assert!(parse_ex("frobnicate").is_err());
        assert!(parse_ex("c").is_err());
    }

    #[test]
    fn test_parse_substitute() {
        let line = parse("%s/a\\/b/x&y/gi");
        assert_eq!(line.range, Some(AddressRange::all()));
        assert_eq!(
            line.command,
            ExCommand::Substitute(Substitution {
                pattern: "a/b".to_string(),
                replacement: "x&y".to_string(),
                flags: SubstituteFlags {
                    global: true,
                    ignore_case: true
                },
            })
        );

        let line = parse("s#x#y#");
        assert!(matches!(line.command, ExCommand::Substitute(ref s) if s.pattern == "x" && s.replacement == "y"));
        assert!(parse_ex("s/a/b/z").is_err());
    }

    #[test]
    fn test_parse_repeat_substitute() {
        assert_eq!(
            parse("&&").command,
            ExCommand::RepeatSubstitute {
                flags: SubstituteFlags::default(),
                keep_flags: true
            }
        );
        assert_eq!(
            parse("%s g").command,
            ExCommand::RepeatSubstitute {
                flags: SubstituteFlags {
                    global: true,
                    ignore_case: false
                },
                keep_flags: false
            }
        );
    }

    #[test]
    fn test_parse_write_forms() {
        assert_eq!(
            parse("w").command,
            ExCommand::Write {
                file: None,
                append: false
            }
        );
        assert_eq!(
            parse("1,2w >> out.txt").command,
            ExCommand::Write {
                file: Some(PathBuf::from("out.txt")),
                append: true
            }
        );
        assert!(parse("w! other").bang);
        assert!(parse_ex("w >>").is_err());
    }

    #[test]
    fn test_parse_goto_and_empty() {
        let line = parse(":42");
        assert_eq!(line.command, ExCommand::Goto);
        assert_eq!(line.range, Some(AddressRange::new(Address::Line(42), Address::Line(42))));
        assert!(parse_ex(":").is_err());
    }

    fn stream(content: &str) -> (TempDir, ExStream) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.txt");
        fs::write(&path, content).unwrap();
        let options = StreamOptions {
            temp_dir: Some(dir.path().to_path_buf()),
            ..StreamOptions::default()
        };
        let mut ex = ExStream::new(options, Registers::shared());
        ex.attach(&path).unwrap();
        (dir, ex)
    }

    fn text(ex: &ExStream) -> String {
        let mut out = Vec::new();
        ex.copy_to(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_session_on_stream() {
        let (_dir, mut ex) = stream("one\ntwo\nthree\nfour\n");
        let mut session = ExSession::new();

        let report = session.execute(&mut ex, "2,3d").unwrap();
        assert_eq!(report.actions, 2);
        assert_eq!(report.message.as_deref(), Some("2 lines deleted"));
        assert_eq!(text(&ex), "one\nfour\n");

        session.execute(&mut ex, "%s/o/0/").unwrap();
        assert_eq!(text(&ex), "0ne\nf0ur\n");
        session.execute(&mut ex, "1&").unwrap();
        assert_eq!(text(&ex), "0ne\nf0ur\n");
    }

    #[test]
    fn test_repeat_substitute_without_previous_fails() {
        let (_dir, mut ex) = stream("a\n");
        let mut session = ExSession::new();
        assert!(session.execute(&mut ex, "&").unwrap_err().is_precondition());
    }

    #[test]
    fn test_join_single_line_joins_next() {
        let (_dir, mut ex) = stream("a\nb\nc\n");
        let mut session = ExSession::new();
        session.execute(&mut ex, "1j").unwrap();
        assert_eq!(text(&ex), "ab\nc\n");
    }

    #[test]
    fn test_yank_put_and_print() {
        let (_dir, mut ex) = stream("a\nb\nc\n");
        let mut session = ExSession::new();
        session.execute(&mut ex, "1y x").unwrap();
        session.execute(&mut ex, "$pu x").unwrap();
        assert_eq!(text(&ex), "a\nb\nc\na\n");

        let report = session.execute(&mut ex, "2,3nu").unwrap();
        assert_eq!(report.output, vec!["     2  b", "     3  c"]);
        let report = session.execute(&mut ex, "=").unwrap();
        assert_eq!(report.output, vec!["4"]);
    }

    #[test]
    fn test_mark_and_marker_range() {
        let (_dir, mut ex) = stream("a\nb\nc\nd\n");
        let mut session = ExSession::new();
        session.execute(&mut ex, "2ka").unwrap();
        session.execute(&mut ex, "3mark b").unwrap();
        session.execute(&mut ex, "'a,'bd").unwrap();
        assert_eq!(text(&ex), "a\nd\n");
        assert!(matches!(
            session.execute(&mut ex, "'zd"),
            Err(ExError::NoSuchMarker('z'))
        ));
    }

    #[test]
    fn test_write_to_other_file() {
        let (dir, mut ex) = stream("a\nb\n");
        let mut session = ExSession::new();
        let out = dir.path().join("part.txt");
        session.execute(&mut ex, &format!("2w {}", out.display())).unwrap();
        session.execute(&mut ex, &format!("1w >> {}", out.display())).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "b\na\n");
    }
}
