//! Property-based tests for wex
//!
//! These use proptest to check the invariants of the stream engine against a
//! plain vector of lines, and to check that streaming and in-memory editing
//! agree on the same commands.

use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use wex::{
    AddressRange, Document, ExStream, ExTarget, MemoryWidget, Registers, SearchFlags, StreamOptions, SubstituteFlags, Vi,
};

// Import proptest macro
use proptest::prelude::*;

fn attach(content: &str) -> (TempDir, PathBuf, ExStream) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("doc.txt");
    fs::write(&path, content).unwrap();
    let options = StreamOptions {
        temp_dir: Some(dir.path().to_path_buf()),
        ..StreamOptions::default()
    };
    let mut ex = ExStream::new(options, Registers::shared());
    ex.attach(&path).unwrap();
    (dir, path, ex)
}

fn contents(ex: &ExStream) -> String {
    let mut out = Vec::new();
    ex.copy_to(&mut out).unwrap();
    String::from_utf8(out).unwrap()
}

fn join_lines(lines: &[String]) -> String {
    lines.iter().map(|l| format!("{}\n", l)).collect()
}

/// Lines of lowercase words, plus a valid 1-based range into them
fn lines_and_range() -> impl Strategy<Value = (Vec<String>, usize, usize)> {
    prop::collection::vec("[a-m ]{0,12}", 1..40).prop_flat_map(|lines| {
        let n = lines.len();
        (Just(lines), 1..=n).prop_flat_map(move |(lines, begin)| (Just(lines), Just(begin), begin..=n))
    })
}

// ============================================================================
// Property 1: Round-trip identity
// ============================================================================
// Attaching and saving without edits reproduces the file byte for byte

proptest! {
    #[test]
    fn prop_attach_write_is_identity(content in "([a-z \t]{0,20}(\n|\r\n)){0,30}[a-z]{0,10}") {
        let (_dir, path, mut ex) = attach(&content);
        prop_assert_eq!(contents(&ex), content.clone());
        ex.write().unwrap();
        prop_assert_eq!(fs::read_to_string(&path).unwrap(), content);
    }
}

// ============================================================================
// Property 2: Erase correctness
// ============================================================================
// Erasing lines b..=e equals removing them from a vector of lines

proptest! {
    #[test]
    fn prop_erase_matches_vector((lines, begin, end) in lines_and_range()) {
        let (_dir, _path, mut ex) = attach(&join_lines(&lines));
        let erased = ex.erase(&AddressRange::lines(begin, end)).unwrap();

        let mut expected = lines.clone();
        expected.drain(begin - 1..end);

        prop_assert_eq!(erased, end - begin + 1);
        prop_assert_eq!(contents(&ex), join_lines(&expected));
    }

    #[test]
    fn prop_line_count_follows_erase((lines, begin, end) in lines_and_range()) {
        let (_dir, _path, mut ex) = attach(&join_lines(&lines));
        prop_assert_eq!(ex.get_line_count_request().unwrap(), lines.len());

        ex.erase(&AddressRange::lines(begin, end)).unwrap();
        let check = ex.verify_line_count().unwrap();
        prop_assert!(check.is_consistent(), "{:?}", check);
        prop_assert_eq!(check.actual, lines.len() - (end - begin + 1));
    }
}

// ============================================================================
// Property 2b: Bookkeeping stays exact on any last line
// ============================================================================
// Substitute, join and insert keep the recorded line count equal to a rescan,
// whether or not the document ends with a newline

#[derive(Debug, Clone)]
enum Edit {
    Substitute { pattern: &'static str, replacement: &'static str, global: bool },
    Join { begin: usize, extra: usize },
    Insert { at: usize, text: &'static str },
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (
            prop::sample::select(vec!["a", "b$", "^c", "a\\|b", "."]),
            prop::sample::select(vec!["", "X", "\\n", "x\\ny"]),
            any::<bool>(),
        )
            .prop_map(|(pattern, replacement, global)| Edit::Substitute { pattern, replacement, global }),
        (1usize..12, 0usize..3).prop_map(|(begin, extra)| Edit::Join { begin, extra }),
        (1usize..12, prop::sample::select(vec!["new\n", "p\nq\n", "r"]))
            .prop_map(|(at, text)| Edit::Insert { at, text }),
    ]
}

/// Document text, ending with a newline or not
fn document() -> impl Strategy<Value = String> {
    (prop::collection::vec("[a-c ]{0,6}", 1..10), any::<bool>()).prop_map(|(lines, terminated)| {
        let mut text = lines.join("\n");
        if terminated {
            text.push('\n');
        }
        text
    })
}

/// Lines as an editor shows them
fn logical_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    text.strip_suffix('\n').unwrap_or(text).split('\n').collect()
}

fn flags(global: bool) -> SubstituteFlags {
    SubstituteFlags {
        global,
        ..SubstituteFlags::default()
    }
}

proptest! {
    #[test]
    fn prop_line_count_exact_after_edits(content in document(), edits in prop::collection::vec(edit(), 1..8)) {
        let (_dir, _path, mut ex) = attach(&content);
        let mut count = ex.get_line_count_request().unwrap();

        for edit in &edits {
            match *edit {
                Edit::Substitute { pattern, replacement, global } => {
                    ex.substitute(&AddressRange::all(), pattern, replacement, flags(global)).unwrap();
                }
                Edit::Join { begin, extra } => {
                    if begin <= count {
                        ex.join(&AddressRange::lines(begin, (begin + extra).min(count))).unwrap();
                    }
                }
                Edit::Insert { at, text } => {
                    if at <= count {
                        ex.insert_text(&AddressRange::lines(at, at), text).unwrap();
                    }
                }
            }
            let check = ex.verify_line_count().unwrap();
            prop_assert!(check.is_consistent(), "after {:?}: {:?}", edit, check);
            prop_assert_eq!(check.actual, logical_lines(&contents(&ex)).len());
            count = check.actual;
        }
    }

    #[test]
    fn prop_stream_and_memory_agree_on_any_last_line(
        content in document(),
        edits in prop::collection::vec(edit(), 1..8),
    ) {
        let (_dir, _path, mut ex) = attach(&content);
        let mut widget = MemoryWidget::from_text(&content, Registers::shared());

        for edit in &edits {
            let count = logical_lines(&widget.text()).len();
            match *edit {
                Edit::Substitute { pattern, replacement, global } => {
                    let a = ex.substitute(&AddressRange::all(), pattern, replacement, flags(global)).unwrap();
                    let b = ExTarget::substitute(&mut widget, &AddressRange::all(), pattern, replacement, flags(global))
                        .unwrap();
                    prop_assert_eq!(a, b);
                }
                // Joins differ on purpose: raw splice vs. vi spacing
                Edit::Join { .. } => continue,
                Edit::Insert { at, text } => {
                    if at <= count {
                        ex.insert_text(&AddressRange::lines(at, at), text).unwrap();
                        ExTarget::insert_text(&mut widget, &AddressRange::lines(at, at), text).unwrap();
                    }
                }
            }
            let streamed = contents(&ex);
            let memory = widget.text();
            prop_assert_eq!(logical_lines(&streamed), logical_lines(&memory), "after {:?}", edit);
        }
    }
}

// ============================================================================
// Property 3: Yank does not mutate
// ============================================================================

proptest! {
    #[test]
    fn prop_yank_leaves_document((lines, begin, end) in lines_and_range()) {
        let content = join_lines(&lines);
        let (_dir, _path, mut ex) = attach(&content);

        prop_assert_eq!(ex.yank(&AddressRange::lines(begin, end), Some('a')).unwrap(), end - begin + 1);
        prop_assert_eq!(contents(&ex), content);
        prop_assert!(!ex.is_modified());

        let registers = ex.registers().borrow();
        let yanked = join_lines(&lines[begin - 1..end]);
        prop_assert_eq!(registers.text(Some('a')), Some(yanked.as_str()));
    }
}

// ============================================================================
// Property 4: A failed search leaves the position alone
// ============================================================================

proptest! {
    #[test]
    fn prop_failed_search_keeps_position(
        lines in prop::collection::vec("[a-m]{1,10}", 1..30),
        start in 0usize..30,
        forward in any::<bool>(),
    ) {
        let (_dir, _path, mut ex) = attach(&join_lines(&lines));
        let start = start % lines.len();
        ex.goto_line(start).unwrap();

        prop_assert!(!ex.find("xyz", SearchFlags::default(), forward).unwrap());
        prop_assert_eq!(ex.get_current_line(), Some(start));
        prop_assert_eq!(ex.get_line(), lines[start].as_bytes());
    }
}

// ============================================================================
// Property 5: Streaming and in-memory editing agree
// ============================================================================

fn run_both(content: &str, commands: &[String]) -> (String, String) {
    let (_dir, _path, stream) = attach(content);
    let mut streamed = Vi::new(Document::Stream(stream));
    let mut memory = Vi::new(Document::Memory(MemoryWidget::from_text(content, Registers::shared())));

    for command in commands {
        let a = streamed.ex(command).is_ok();
        let b = memory.ex(command).is_ok();
        assert_eq!(a, b, "'{}' succeeded in one mode only", command);
    }

    let streamed = match streamed.into_document() {
        Document::Stream(ex) => contents(&ex),
        Document::Memory(_) => unreachable!(),
    };
    let memory = match memory.into_document() {
        Document::Memory(widget) => widget.text(),
        Document::Stream(_) => unreachable!(),
    };
    (streamed, memory)
}

proptest! {
    #[test]
    fn prop_substitute_agrees(
        lines in prop::collection::vec("[a-e ]{0,12}", 1..25),
        pattern in "[a-e]{1,2}",
        global in any::<bool>(),
    ) {
        let command = format!("%s/{}/X/{}", pattern, if global { "g" } else { "" });
        let (streamed, memory) = run_both(&join_lines(&lines), &[command]);
        prop_assert_eq!(streamed, memory);
    }

    #[test]
    fn prop_delete_and_copy_agree((lines, begin, end) in lines_and_range(), dest in 0usize..40) {
        let dest = dest % (lines.len() + 1);
        let commands = vec![
            format!("{},{}t{}", begin, end, dest),
            format!("{},{}d", begin, end),
        ];
        let (streamed, memory) = run_both(&join_lines(&lines), &commands);
        prop_assert_eq!(streamed, memory);
    }
}

// ============================================================================
// Regular tests
// ============================================================================

#[test]
fn test_substitute_then_write() {
    let (_dir, path, ex) = attach("foo bar\nfoo foo\n");
    let mut vi = Vi::new(Document::Stream(ex));
    vi.ex("%s/foo/baz/g").unwrap();
    vi.ex("w").unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "baz bar\nbaz baz\n");
}

#[test]
fn test_no_trailing_newline_survives_edit() {
    let (_dir, _path, mut ex) = attach("one\ntwo\nthree");
    ex.erase(&AddressRange::lines(2, 2)).unwrap();
    assert_eq!(contents(&ex), "one\nthree");
}
