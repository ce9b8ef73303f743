//! Regex Error Handling
//!
//! Turns a regex compile failure into a short status line plus a hint,
//! phrased in terms of the pattern the user typed (not the translated one).

use crate::error::ExError;
use crate::vi_regex::RegexFlavor;
use regex::Error as RegexError;

/// Types of pattern errors with specific diagnostic information
#[derive(Debug, Clone, PartialEq)]
pub enum PatternErrorKind {
    /// Unclosed group/bracket/brace
    UnclosedDelimiter { delimiter: char, position: usize },
    /// Invalid escape sequence
    InvalidEscape { message: String },
    /// Repetition operator with nothing to repeat, or a bad {n,m}
    InvalidRepetition { message: String },
    /// Look-around and backreferences are not supported by the engine
    Unsupported { message: String },
    /// Compiled program exceeded the size limit
    TooBig,
    /// Other syntax error
    Syntax { message: String },
}

/// Enhanced pattern error with helpful context
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancedPatternError {
    /// The pattern as typed by the user
    pub pattern: String,
    pub flavor: RegexFlavor,
    pub kind: PatternErrorKind,
    pub suggestion: Option<String>,
}

impl EnhancedPatternError {
    pub fn from_regex_error(err: &RegexError, pattern: &str, flavor: RegexFlavor) -> Self {
        let kind = match err {
            RegexError::CompiledTooBig(_) => PatternErrorKind::TooBig,
            other => classify(&detail_line(&other.to_string()), pattern),
        };
        let suggestion = suggest(&kind, flavor);

        EnhancedPatternError {
            pattern: pattern.to_string(),
            flavor,
            kind,
            suggestion,
        }
    }

    /// One-line description for the status bar
    pub fn summary(&self) -> String {
        let what = match &self.kind {
            PatternErrorKind::UnclosedDelimiter {
                delimiter,
                position,
            } => format!("unmatched '{}' at position {}", delimiter, position),
            PatternErrorKind::InvalidEscape { message } => format!("bad escape ({})", message),
            PatternErrorKind::InvalidRepetition { message } => {
                format!("bad repetition ({})", message)
            }
            PatternErrorKind::Unsupported { message } => format!("unsupported ({})", message),
            PatternErrorKind::TooBig => "pattern too large".to_string(),
            PatternErrorKind::Syntax { message } => message.clone(),
        };
        match &self.suggestion {
            Some(hint) => format!("{}; {}", what, hint),
            None => what,
        }
    }
}

impl From<EnhancedPatternError> for ExError {
    fn from(err: EnhancedPatternError) -> Self {
        ExError::Pattern {
            message: err.summary(),
            pattern: err.pattern,
        }
    }
}

/// The regex crate renders a caret diagram; the last "error: ..." line is the gist.
fn detail_line(message: &str) -> String {
    message
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix("error:"))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| message.trim().to_string())
}

fn classify(message: &str, pattern: &str) -> PatternErrorKind {
    let lower = message.to_lowercase();

    if lower.contains("unclosed") || lower.contains("unopened") {
        let (open, close) = if lower.contains("class") {
            ('[', ']')
        } else if lower.contains("repetition") || lower.contains("brace") {
            ('{', '}')
        } else {
            ('(', ')')
        };
        if let Some(position) = find_unclosed_delimiter(pattern, open, close) {
            return PatternErrorKind::UnclosedDelimiter {
                delimiter: open,
                position,
            };
        }
    }

    if lower.contains("look-around") || lower.contains("backreference") {
        return PatternErrorKind::Unsupported {
            message: message.to_string(),
        };
    }

    if lower.contains("escape") {
        return PatternErrorKind::InvalidEscape {
            message: message.to_string(),
        };
    }

    if lower.contains("repetition") || lower.contains("quantifier") {
        return PatternErrorKind::InvalidRepetition {
            message: message.to_string(),
        };
    }

    PatternErrorKind::Syntax {
        message: message.to_string(),
    }
}

fn suggest(kind: &PatternErrorKind, flavor: RegexFlavor) -> Option<String> {
    match (kind, flavor) {
        (PatternErrorKind::UnclosedDelimiter { delimiter: '(', .. }, RegexFlavor::Vi) => {
            Some("groups are written \\( \\) in vi patterns".to_string())
        }
        (PatternErrorKind::UnclosedDelimiter { delimiter: '{', .. }, RegexFlavor::Vi) => {
            Some("counts are written \\{n,m} in vi patterns".to_string())
        }
        (PatternErrorKind::UnclosedDelimiter { delimiter, .. }, _) => {
            let closer = match delimiter {
                '[' => ']',
                '{' => '}',
                _ => ')',
            };
            Some(format!("add a closing '{}'", closer))
        }
        (PatternErrorKind::InvalidRepetition { .. }, RegexFlavor::Vi) => {
            Some("place \\+ \\= or \\{n} after an atom".to_string())
        }
        (PatternErrorKind::InvalidRepetition { .. }, _) => {
            Some("place * + ? or {n} after an atom".to_string())
        }
        (PatternErrorKind::Unsupported { .. }, _) => {
            Some("look-around and backreferences in patterns are not available".to_string())
        }
        _ => None,
    }
}

/// Find the position of the last unmatched opening delimiter
fn find_unclosed_delimiter(pattern: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_char_class = false;
    let mut last_open_pos = None;
    let mut escaped = false;

    for (i, c) in pattern.chars().enumerate() {
        if escaped {
            escaped = false;
            // vi groups and counts are the escaped forms
            if open != '[' && (c == open || c == close) {
                if c == open {
                    depth += 1;
                    last_open_pos = Some(i.saturating_sub(1));
                } else {
                    depth -= 1;
                }
            }
            continue;
        }
        if c == '\\' {
            escaped = true;
            continue;
        }
        if open != '[' {
            if c == '[' {
                in_char_class = true;
            } else if c == ']' {
                in_char_class = false;
            }
        }
        if !in_char_class || open == '[' {
            if c == open {
                depth += 1;
                last_open_pos = Some(i);
            } else if c == close {
                depth -= 1;
            }
        }
    }

    if depth > 0 { last_open_pos } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn compile_error(translated: &str, typed: &str, flavor: RegexFlavor) -> EnhancedPatternError {
        let err = Regex::new(translated).unwrap_err();
        EnhancedPatternError::from_regex_error(&err, typed, flavor)
    }

    #[test]
    fn test_unclosed_group() {
        let err = compile_error("(foo", "(foo", RegexFlavor::Extended);
        assert_eq!(
            err.kind,
            PatternErrorKind::UnclosedDelimiter {
                delimiter: '(',
                position: 0
            }
        );
        assert!(err.summary().contains("add a closing ')'"));
    }

    #[test]
    fn test_unclosed_vi_group_mentions_escaped_form() {
        let err = compile_error("(foo", r"\(foo", RegexFlavor::Vi);
        assert!(matches!(err.kind, PatternErrorKind::UnclosedDelimiter { delimiter: '(', .. }));
        assert!(err.summary().contains(r"\( \)"));
    }

    #[test]
    fn test_unclosed_class() {
        let err = compile_error("[abc", "[abc", RegexFlavor::Rust);
        assert!(matches!(err.kind, PatternErrorKind::UnclosedDelimiter { delimiter: '[', .. }));
    }

    #[test]
    fn test_repetition_error() {
        let err = compile_error("*a", "*a", RegexFlavor::Rust);
        assert!(matches!(err.kind, PatternErrorKind::InvalidRepetition { .. }));
    }

    #[test]
    fn test_lookaround_unsupported() {
        let err = compile_error("(?=a)", "(?=a)", RegexFlavor::Rust);
        assert!(matches!(err.kind, PatternErrorKind::Unsupported { .. }));
    }

    #[test]
    fn test_into_ex_error_keeps_typed_pattern() {
        let err: ExError = compile_error("(x", r"\(x", RegexFlavor::Vi).into();
        match err {
            ExError::Pattern { pattern, .. } => assert_eq!(pattern, r"\(x"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_detail_line_extraction() {
        let msg = "regex parse error:\n    (foo\n    ^\nerror: unclosed group";
        assert_eq!(detail_line(msg), "unclosed group");
        assert_eq!(detail_line("plain"), "plain");
    }
}
