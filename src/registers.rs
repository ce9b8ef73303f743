//! Macro/register store
//!
//! Registers are addressed by a single character. `"` is the unnamed
//! register that yank, delete and put fall back to; `_` discards writes.
//! Letters are case-folded, so `A` and `a` name the same register. Recorded
//! macros live in the same store as yanked text, so `"ap` pastes a macro and
//! `@a` replays yanked text.
//!
//! A store is an explicit context object: documents that should share
//! registers hold clones of the same [`SharedRegisters`] handle.

use crate::error::{ExError, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub const UNNAMED: char = '"';
pub const BLACK_HOLE: char = '_';
/// Holds the most recent yank
pub const YANK: char = '0';
/// Holds the most recent delete
pub const DELETE: char = '1';

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegisterContent {
    pub text: String,
    /// Whole lines (put inserts them as new lines)
    pub linewise: bool,
}

impl RegisterContent {
    pub fn lines(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            linewise: true,
        }
    }

    pub fn chars(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            linewise: false,
        }
    }
}

pub type SharedRegisters = Rc<RefCell<Registers>>;

#[derive(Debug, Default)]
pub struct Registers {
    registers: HashMap<char, RegisterContent>,
}

impl Registers {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh store wrapped for sharing between engine and dispatcher.
    pub fn shared() -> SharedRegisters {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn is_valid_name(name: char) -> bool {
        name == UNNAMED || name == BLACK_HOLE || name.is_ascii_alphanumeric()
    }

    /// Fails the way a store into `name` would, without storing.
    pub fn check_name(name: Option<char>) -> Result<()> {
        Self::key(name).map(|_| ())
    }

    fn key(name: Option<char>) -> Result<char> {
        let name = name.unwrap_or(UNNAMED);
        if !Self::is_valid_name(name) {
            return Err(ExError::Precondition(format!("invalid register name: {:?}", name)));
        }
        Ok(name.to_ascii_lowercase())
    }

    /// Store yanked text: the named register (if any), `0` and the unnamed one.
    pub fn yank(&mut self, name: Option<char>, content: RegisterContent) -> Result<()> {
        let key = Self::key(name)?;
        if key == BLACK_HOLE {
            return Ok(());
        }
        self.registers.insert(YANK, content.clone());
        self.store(key, content);
        Ok(())
    }

    /// Store deleted text: the named register (if any), `1` and the unnamed one.
    pub fn delete(&mut self, name: Option<char>, content: RegisterContent) -> Result<()> {
        let key = Self::key(name)?;
        if key == BLACK_HOLE {
            return Ok(());
        }
        self.registers.insert(DELETE, content.clone());
        self.store(key, content);
        Ok(())
    }

    fn store(&mut self, key: char, content: RegisterContent) {
        if key != UNNAMED {
            self.registers.insert(key, content.clone());
        }
        self.registers.insert(UNNAMED, content);
    }

    /// Overwrite exactly one register (macro recording, `:let`-style sets).
    pub fn set(&mut self, name: char, content: RegisterContent) -> Result<()> {
        let key = Self::key(Some(name))?;
        if key != BLACK_HOLE {
            self.registers.insert(key, content);
        }
        Ok(())
    }

    /// Read a register without modifying it.
    pub fn get(&self, name: Option<char>) -> Option<&RegisterContent> {
        let key = Self::key(name).ok()?;
        if key == BLACK_HOLE {
            return None;
        }
        self.registers.get(&key)
    }

    pub fn text(&self, name: Option<char>) -> Option<&str> {
        self.get(name).map(|c| c.text.as_str())
    }

    pub fn clear(&mut self) {
        self.registers.clear();
    }

    /// Register names currently holding text, sorted
    pub fn names(&self) -> Vec<char> {
        let mut names: Vec<char> = self.registers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yank_overwrites() {
        let mut regs = Registers::new();
        regs.yank(Some('a'), RegisterContent::lines("alpha\nbeta\n")).unwrap();
        regs.yank(Some('a'), RegisterContent::lines("gamma\ndelta\n")).unwrap();
        assert_eq!(regs.text(Some('a')), Some("gamma\ndelta\n"));
        assert_eq!(regs.text(None), Some("gamma\ndelta\n"));
        assert_eq!(regs.text(Some(YANK)), Some("gamma\ndelta\n"));
    }

    #[test]
    fn test_delete_fills_unnamed_and_named() {
        let mut regs = Registers::new();
        regs.yank(None, RegisterContent::chars("kept")).unwrap();
        regs.delete(Some('b'), RegisterContent::chars("gone")).unwrap();
        assert_eq!(regs.text(Some('b')), Some("gone"));
        assert_eq!(regs.text(None), Some("gone"));
        assert_eq!(regs.text(Some(DELETE)), Some("gone"));
        assert_eq!(regs.text(Some(YANK)), Some("kept"));
    }

    #[test]
    fn test_get_is_non_destructive() {
        let mut regs = Registers::new();
        regs.yank(Some('x'), RegisterContent::chars("abc")).unwrap();
        assert_eq!(regs.text(Some('x')), Some("abc"));
        assert_eq!(regs.text(Some('x')), Some("abc"));
    }

    #[test]
    fn test_black_hole_discards() {
        let mut regs = Registers::new();
        regs.yank(None, RegisterContent::chars("kept")).unwrap();
        regs.delete(Some(BLACK_HOLE), RegisterContent::chars("gone")).unwrap();
        assert_eq!(regs.text(None), Some("kept"));
        assert_eq!(regs.get(Some(BLACK_HOLE)), None);
    }

    #[test]
    fn test_case_folding_and_validation() {
        let mut regs = Registers::new();
        regs.set('Q', RegisterContent::chars("dd")).unwrap();
        assert_eq!(regs.text(Some('q')), Some("dd"));
        assert!(regs.set('%', RegisterContent::chars("x")).is_err());
        assert!(regs.get(Some('%')).is_none());
    }

    #[test]
    fn test_shared_handle() {
        let shared = Registers::shared();
        let other = Rc::clone(&shared);
        shared.borrow_mut().set('a', RegisterContent::chars("one")).unwrap();
        assert_eq!(other.borrow().text(Some('a')), Some("one"));
        assert_eq!(other.borrow().names(), vec!['a']);
    }
}
