//! Regex matcher shared by search and substitute
//!
//! Lines are matched as raw bytes so documents that are not valid UTF-8 still
//! stream through untouched.

use crate::error::{ExError, Result};
use crate::regex_error::EnhancedPatternError;
use crate::vi_regex::{self, RegexFlavor};
use regex::bytes::{Regex, RegexBuilder};

/// How the search text is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchFlags {
    /// Treat the text as a pattern; otherwise it is a plain substring
    pub regex: bool,
    pub match_case: bool,
    /// Only match whole words
    pub match_word: bool,
}

impl Default for SearchFlags {
    fn default() -> Self {
        Self {
            regex: true,
            match_case: true,
            match_word: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Matcher {
    regex: Regex,
    pattern: String,
}

impl Matcher {
    pub fn new(pattern: &str, flags: SearchFlags, flavor: RegexFlavor) -> Result<Self> {
        if pattern.is_empty() {
            return Err(ExError::Pattern {
                pattern: String::new(),
                message: "empty pattern".to_string(),
            });
        }

        let mut translated = if flags.regex {
            vi_regex::convert_pattern(pattern, flavor)
        } else {
            regex::escape(pattern)
        };
        if flags.match_word {
            translated = format!(r"\b(?:{})\b", translated);
        }

        let regex = RegexBuilder::new(&translated)
            .case_insensitive(!flags.match_case)
            .build()
            .map_err(|e| ExError::from(EnhancedPatternError::from_regex_error(&e, pattern, flavor)))?;

        Ok(Self {
            regex,
            pattern: pattern.to_string(),
        })
    }

    /// The pattern as typed
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, line: &[u8]) -> bool {
        self.regex.is_match(line)
    }

    /// Byte span of the first match in `line`
    pub fn find(&self, line: &[u8]) -> Option<(usize, usize)> {
        self.regex.find(line).map(|m| (m.start(), m.end()))
    }

    /// Byte span of the last match starting before `before`
    pub fn rfind(&self, line: &[u8], before: usize) -> Option<(usize, usize)> {
        self.regex
            .find_iter(line)
            .take_while(|m| m.start() < before)
            .last()
            .map(|m| (m.start(), m.end()))
    }

    /// Replace the first match (or every match when `global`).
    ///
    /// Returns `None` when the line does not match at all. A match whose
    /// replacement equals the matched text still returns `Some`.
    pub fn substitute(&self, line: &[u8], replacement: &[u8], global: bool) -> Option<Vec<u8>> {
        if !self.regex.is_match(line) {
            return None;
        }
        let limit = if global { 0 } else { 1 };
        Some(self.regex.replacen(line, limit, replacement).into_owned())
    }
}
