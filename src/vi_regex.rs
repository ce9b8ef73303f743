//! vi pattern translation
//!
//! ex/vi patterns are written in "magic" syntax: groups, counts and alternation
//! are backslash-escaped, while `(`, `+`, `|` and friends are literal. This
//! module rewrites them into the syntax the `regex` crate understands.
//! Replacement strings get the same treatment (`&`, `\1` become `${0}`, `${1}`).

use serde::{Deserialize, Serialize};

/// Pattern dialect used by search and substitute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegexFlavor {
    /// vi "magic" syntax (default)
    #[default]
    Vi,
    /// Extended syntax: unescaped `( ) { } + ? |` are operators
    Extended,
    /// Patterns are handed to the regex crate unchanged
    Rust,
}

impl RegexFlavor {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "vi" | "magic" | "bre" => Some(RegexFlavor::Vi),
            "extended" | "ere" => Some(RegexFlavor::Extended),
            "rust" | "pcre" => Some(RegexFlavor::Rust),
            _ => None,
        }
    }
}

/// Translate a search pattern written in `flavor` into regex crate syntax
pub fn convert_pattern(pattern: &str, flavor: RegexFlavor) -> String {
    match flavor {
        RegexFlavor::Vi => convert_magic(pattern),
        RegexFlavor::Extended => convert_extended(pattern),
        RegexFlavor::Rust => pattern.to_string(),
    }
}

/// Translate a substitute replacement into regex crate expansion syntax
pub fn convert_replacement(replacement: &str, flavor: RegexFlavor) -> String {
    if flavor == RegexFlavor::Rust {
        return replacement.to_string();
    }

    let mut result = String::with_capacity(replacement.len());
    let mut chars = replacement.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(d @ '0'..='9') => {
                    result.push_str("${");
                    result.push(d);
                    result.push('}');
                }
                Some('n') | Some('r') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some('&') => result.push('&'),
                Some('$') => result.push_str("$$"),
                Some(other) => result.push(other),
                None => result.push('\\'),
            },
            '&' => result.push_str("${0}"),
            '$' => result.push_str("$$"),
            _ => result.push(c),
        }
    }

    result
}

/// Magic syntax: escaped operators become operators, bare ones become literals.
fn convert_magic(pattern: &str) -> String {
    let mut result = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars().peekable();
    let mut in_count = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('(') => result.push('('),
                Some(')') => result.push(')'),
                Some('|') => result.push('|'),
                Some('+') => result.push('+'),
                Some('?') | Some('=') => result.push('?'),
                Some('{') => {
                    result.push('{');
                    in_count = true;
                }
                Some('}') if in_count => {
                    result.push('}');
                    in_count = false;
                }
                Some('<') | Some('>') => result.push_str("\\b"),
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push_str("\\\\"),
            },
            '}' if in_count => {
                // vim accepts \{n,m} with an unescaped closing brace
                result.push('}');
                in_count = false;
            }
            '[' => copy_class(&mut chars, &mut result),
            '(' | ')' | '|' | '+' | '?' | '{' | '}' => {
                result.push('\\');
                result.push(c);
            }
            _ => result.push(c),
        }
    }

    result
}

fn convert_extended(pattern: &str) -> String {
    let mut result = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('<') | Some('>') => result.push_str("\\b"),
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push_str("\\\\"),
            },
            '[' => copy_class(&mut chars, &mut result),
            _ => result.push(c),
        }
    }

    result
}

/// Copy a bracket expression verbatim, `[` already consumed.
fn copy_class(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, result: &mut String) {
    result.push('[');
    // A leading ']' (after an optional '^') is a literal member.
    if chars.peek() == Some(&'^') {
        result.push('^');
        chars.next();
    }
    if chars.peek() == Some(&']') {
        result.push_str("\\]");
        chars.next();
    }
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                result.push('\\');
                if let Some(next) = chars.next() {
                    result.push(next);
                }
            }
            '[' if chars.peek() == Some(&':') => {
                // POSIX class such as [:alpha:]
                result.push('[');
                for inner in chars.by_ref() {
                    result.push(inner);
                    if inner == ']' {
                        break;
                    }
                }
            }
            ']' => {
                result.push(']');
                return;
            }
            _ => result.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn magic(p: &str) -> String {
        convert_pattern(p, RegexFlavor::Vi)
    }

    #[test]
    fn test_convert_groups() {
        assert_eq!(magic(r"\(foo\)"), "(foo)");
        assert_eq!(magic(r"\(a\)\(b\)"), "(a)(b)");
        assert_eq!(magic("(foo)"), r"\(foo\)");
    }

    #[test]
    fn test_convert_counts() {
        assert_eq!(magic(r"a\{3}"), "a{3}");
        assert_eq!(magic(r"a\{2,5\}"), "a{2,5}");
        assert_eq!(magic("a{3}"), r"a\{3\}");
    }

    #[test]
    fn test_convert_operators() {
        assert_eq!(magic(r"foo\+"), "foo+");
        assert_eq!(magic(r"foo\="), "foo?");
        assert_eq!(magic(r"foo\|bar"), "foo|bar");
        assert_eq!(magic("a+b|c?"), r"a\+b\|c\?");
    }

    #[test]
    fn test_word_boundaries() {
        assert_eq!(magic(r"\<word\>"), r"\bword\b");
        assert_eq!(convert_pattern(r"\<x\>", RegexFlavor::Extended), r"\bx\b");
    }

    #[test]
    fn test_character_classes_untouched() {
        assert_eq!(magic("[a-z]"), "[a-z]");
        assert_eq!(magic("[^(+)]"), "[^(+)]");
        assert_eq!(magic("[]a]"), r"[\]a]");
        assert_eq!(magic("[[:alpha:]]x"), "[[:alpha:]]x");
    }

    #[test]
    fn test_anchors_and_wildcards() {
        assert_eq!(magic("^a.*b$"), "^a.*b$");
        assert_eq!(magic(r"\.\*"), r"\.\*");
        assert_eq!(magic(r"\t\s\d"), r"\t\s\d");
    }

    #[test]
    fn test_extended_and_rust_passthrough() {
        assert_eq!(convert_pattern("(a|b)+", RegexFlavor::Extended), "(a|b)+");
        assert_eq!(convert_pattern(r"\(x", RegexFlavor::Rust), r"\(x");
    }

    #[test]
    fn test_replacement_references() {
        assert_eq!(convert_replacement("&", RegexFlavor::Vi), "${0}");
        assert_eq!(convert_replacement(r"\&", RegexFlavor::Vi), "&");
        assert_eq!(convert_replacement(r"\2\1", RegexFlavor::Vi), "${2}${1}");
        assert_eq!(convert_replacement(r"a\1b", RegexFlavor::Extended), "a${1}b");
        assert_eq!(convert_replacement("$1", RegexFlavor::Rust), "$1");
    }

    #[test]
    fn test_replacement_escapes() {
        assert_eq!(convert_replacement(r"a\rb", RegexFlavor::Vi), "a\nb");
        assert_eq!(convert_replacement(r"a\nb", RegexFlavor::Vi), "a\nb");
        assert_eq!(convert_replacement("cost $5", RegexFlavor::Vi), "cost $$5");
        assert_eq!(convert_replacement(r"x\\y", RegexFlavor::Vi), r"x\y");
    }

    #[test]
    fn test_flavor_names() {
        assert_eq!(RegexFlavor::from_name("vi"), Some(RegexFlavor::Vi));
        assert_eq!(RegexFlavor::from_name("ere"), Some(RegexFlavor::Extended));
        assert_eq!(RegexFlavor::from_name("pcre"), Some(RegexFlavor::Rust));
        assert_eq!(RegexFlavor::from_name("perl6"), None);
    }
}
