//! End-to-end scenarios for the stream engine and the vi dispatcher

use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use wex::diff_formatter::{ChangeType, DocumentDiff};
use wex::{
    AddressRange, Document, ExError, ExStream, MemoryWidget, Registers, SharedRegisters, StreamOptions,
    SubstituteFlags, Vi,
};

const GREEK: &str = "alpha\nbeta\ngamma\ndelta\n";

fn attach_with(content: &str, registers: SharedRegisters) -> (TempDir, PathBuf, ExStream) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("doc.txt");
    fs::write(&path, content).unwrap();
    let options = StreamOptions {
        temp_dir: Some(dir.path().to_path_buf()),
        ..StreamOptions::default()
    };
    let mut ex = ExStream::new(options, registers);
    ex.attach(&path).unwrap();
    (dir, path, ex)
}

fn attach(content: &str) -> (TempDir, PathBuf, ExStream) {
    attach_with(content, Registers::shared())
}

fn contents(ex: &ExStream) -> String {
    let mut out = Vec::new();
    ex.copy_to(&mut out).unwrap();
    String::from_utf8(out).unwrap()
}

fn stream_of(vi: &Vi) -> &ExStream {
    match vi.document() {
        Document::Stream(ex) => ex,
        Document::Memory(_) => panic!("expected a streamed document"),
    }
}

#[test]
fn scenario_erase_middle_lines() {
    let (_dir, _path, mut ex) = attach(GREEK);
    assert_eq!(ex.erase(&AddressRange::lines(2, 3)).unwrap(), 2);
    assert_eq!(contents(&ex), "alpha\ndelta\n");
    assert_eq!(ex.get_line_count_request().unwrap(), 2);
}

#[test]
fn scenario_substitute_first_match_per_line() {
    let (_dir, _path, mut ex) = attach(GREEK);
    let actions = ex
        .substitute(&AddressRange::lines(1, 4), "a", "A", SubstituteFlags::default())
        .unwrap();
    assert_eq!(actions, 4);
    assert_eq!(contents(&ex), "Alpha\nbetA\ngAmma\ndeltA\n");
    assert!(ex.is_modified());
}

#[test]
fn scenario_goto_first_line_always_succeeds() {
    let numbered: String = (1..=100).map(|i| format!("line {}\n", i)).collect();
    let (_dir, _path, mut ex) = attach(&numbered);

    assert!(ex.goto_line(0).unwrap());
    assert_eq!(ex.get_current_line(), Some(0));

    ex.goto_line(73).unwrap();
    ex.get_line_count_request().unwrap();
    assert!(ex.goto_line(0).unwrap());
    assert_eq!(ex.get_current_line(), Some(0));
    assert_eq!(ex.get_line(), b"line 1");
}

#[test]
fn scenario_yank_overwrites_register() {
    let (_dir, _path, mut ex) = attach(GREEK);
    ex.yank(&AddressRange::lines(1, 2), Some('a')).unwrap();
    ex.yank(&AddressRange::lines(3, 4), Some('a')).unwrap();
    assert_eq!(ex.registers().borrow().text(Some('a')), Some("gamma\ndelta\n"));
    assert_eq!(contents(&ex), GREEK);
}

#[test]
fn markers_follow_deleted_lines() {
    let (_dir, _path, ex) = attach(GREEK);
    let mut vi = Vi::new(Document::Stream(ex));
    vi.ex("4ka").unwrap();
    vi.ex("1,2d").unwrap();
    vi.ex("'ad").unwrap();
    assert_eq!(contents(stream_of(&vi)), "gamma\n");

    // a marker inside an erased range is gone
    vi.ex("1kb").unwrap();
    vi.ex("1d").unwrap();
    assert!(matches!(vi.ex("'bd"), Err(ExError::NoSuchMarker('b'))));
}

#[test]
fn search_address_selects_lines() {
    let (_dir, _path, ex) = attach(GREEK);
    let mut vi = Vi::new(Document::Stream(ex));
    vi.ex("/gamma/,$d").unwrap();
    assert_eq!(contents(stream_of(&vi)), "alpha\nbeta\n");
    assert!(vi.ex("/omega/d").is_err());
    assert_eq!(contents(stream_of(&vi)), "alpha\nbeta\n");
}

#[test]
fn print_commands_produce_output_only() {
    let (_dir, _path, ex) = attach(GREEK);
    let mut vi = Vi::new(Document::Stream(ex));
    vi.ex("2,3p").unwrap();
    vi.ex("=").unwrap();
    assert_eq!(vi.take_output(), vec!["beta", "gamma", "4"]);
    assert!(!stream_of(&vi).is_modified());
}

#[test]
fn streaming_mode_refuses_character_commands() {
    let (_dir, _path, ex) = attach(GREEK);
    let mut vi = Vi::new(Document::Stream(ex));
    assert!(!vi.feed("x"));
    assert!(vi.status().contains("streaming mode"));
    assert_eq!(contents(stream_of(&vi)), GREEK);

    // linewise commands still work
    assert!(vi.feed("jdd"));
    assert_eq!(contents(stream_of(&vi)), "alpha\ngamma\ndelta\n");
}

#[test]
fn registers_are_shared_between_documents() {
    let registers = Registers::shared();
    let (_dir, _path, ex) = attach_with(GREEK, registers.clone());
    let mut streamed = Vi::new(Document::Stream(ex));
    assert!(streamed.feed("\"kyy"));

    let widget = MemoryWidget::from_text("one\n", registers);
    let mut memory = Vi::new(Document::Memory(widget));
    assert!(memory.feed("\"kp"));
    match memory.document() {
        Document::Memory(widget) => assert_eq!(widget.text(), "one\nalpha\n"),
        Document::Stream(_) => unreachable!(),
    }
}

#[test]
fn edit_in_memory_and_save() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("notes.txt");
    fs::write(&path, "first\nsecond\nthird\n").unwrap();

    let widget = MemoryWidget::open(&path, Registers::shared()).unwrap();
    let mut vi = Vi::new(Document::Memory(widget));
    assert!(vi.feed("jcwsame\x1b"));
    assert!(vi.feed("j0."));
    assert!(vi.feed(":w\r"));
    assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsame\nsame\n");
}

#[test]
fn preview_of_streamed_edit() {
    let (_dir, _path, ex) = attach(GREEK);
    let mut vi = Vi::new(Document::Stream(ex));
    vi.ex("2d").unwrap();
    vi.ex("%s/gamma/GAMMA/").unwrap();

    let diff = DocumentDiff::compute("doc.txt", GREEK, &contents(stream_of(&vi)));
    assert_eq!(diff.count(ChangeType::Deleted) + diff.count(ChangeType::Modified), 2);
    assert!(diff.lines.iter().any(|(_, text, _)| text == "GAMMA"));
}
