use crate::vi_regex::RegexFlavor;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "

License: MIT
Rust Edition: 2024"
);

#[derive(Parser)]
#[command(name = "wex")]
#[command(about = "ex/vi editing of files of any size, from the command line")]
#[command(long_about = "wex runs ex commands and vi keystrokes against a file.

Small files are edited in memory. Files at or above the streaming threshold
(100 MB by default) are edited in streaming mode: every line-oriented command
is applied in one pass over the file, so memory use stays constant no matter
how large the file is. Character-level vi commands (x, w, i, cw, ...) need
the in-memory mode.

EX COMMANDS (-c):
  [range]d [x] [count]      Delete lines (into register x)
  [range]y [x] [count]      Yank lines
  [range]s/pat/rep/[gi]     Substitute (first match per line, g for all)
  [range]&                  Repeat last substitution
  [range]j                  Join lines
  [range]m addr, t addr     Move, copy lines after addr
  [line]a text, i text      Append, insert text
  [line]pu [x]              Put register x after the line
  [range]w [>>] file        Write lines to another file
  [line]k x                 Set mark x
  [range]p, nu, =           Print lines, with numbers, line count

RANGES:
  5   .   $   'x   /pat/   ?pat?   .+3   1,$   %   5;/end/

REGEX FLAVORS:
  vi (default)     - \\( \\) groups, \\{n,m\\} counts, \\< \\> word boundaries
  -E, --extended   - ( ) groups, {n,m} counts, like egrep
  -R, --rust-regex - regex crate syntax, unchanged

EXAMPLES:
  wex -c '%s/foo/bar/g' file.txt           Replace all occurrences
  wex -c '10,20d' -c 'w' big.log           Delete lines 10-20
  wex -k 'ggdd' file.txt                   Delete the first line with vi keys
  wex -k 'qaA;\\x1bjq3@a' file.txt          Record and replay a macro
  wex --dry-run -c 'g/x/d' file.txt        Preview without saving
  wex count huge.csv                       Count lines in streaming mode")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_version = LONG_VERSION)]
#[command(propagate_version = true)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// File to edit
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Ex command to run (repeatable, run in order)
    #[arg(short = 'c', long = "command", value_name = "EX")]
    commands: Vec<String>,

    /// vi keystrokes to feed in normal mode (repeatable)
    #[arg(short = 'k', long = "keys", value_name = "KEYS")]
    #[arg(help = "vi keystrokes to feed in normal mode (repeatable)\nEscape sequences: \\e or \\x1b (Esc), \\r (Enter), \\\\ (backslash)")]
    keys: Vec<String>,

    /// Preview changes without saving
    #[arg(short = 'd', long = "dry-run")]
    dry_run: bool,

    /// Number of context lines to show in the preview
    #[arg(short = 'n', long, value_name = "NUM")]
    context: Option<usize>,

    /// Force streaming mode
    #[arg(long, conflicts_with = "no_stream")]
    #[arg(help = "Force streaming mode (auto-detects at the configured threshold)")]
    stream: bool,

    /// Force in-memory mode
    #[arg(long = "no-stream")]
    #[arg(help = "Disable auto-detection and load the whole file into memory")]
    no_stream: bool,

    /// Use extended regular expressions
    #[arg(short = 'E', long, conflicts_with = "rust_regex")]
    extended: bool,

    /// Use the regex crate syntax unchanged
    #[arg(short = 'R', long = "rust-regex", conflicts_with = "extended")]
    rust_regex: bool,

    /// Write a log file (~/.wex/wex.log)
    #[arg(long)]
    log: bool,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Count the lines of a file
    #[command(long_about = "Count the lines of a file in streaming mode.

A file whose chunks contain no line break at all (minified data, binary
blobs) switches to block mode, and the count is an estimate based on the
configured line size.

EXAMPLES:
  wex count huge.csv")]
    Count {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Show version-control blame margins
    #[command(long_about = "Show each line of a file with its git blame margin.

EXAMPLES:
  wex blame src/main.rs")]
    Blame {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Show the recent version-control log of a file
    Log {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Number of commits to show
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },

    /// Edit configuration file
    #[command(long_about = "Open configuration file in text editor.

Opens the wex configuration file (~/.wex/config.toml) in your default editor.
If the file doesn't exist, a default one will be created.

After saving and exiting, the configuration will be validated.

CONFIGURATION OPTIONS:
  [stream]
    buffer_size = 1048576         # Bytes read per chunk
    line_size = 500               # Expected line length (block-mode estimate)
    threshold_mb = 100            # Stream files at or above this size
    temp_dir = \"/path\"            # Scratch directory (optional)

  [search]
    flavor = \"vi\"                 # vi, extended or rust
    ignore_case = false
    wrap_scan = true

  [display]
    context_lines = 2             # Context lines in previews (max 10)

  [log]
    enabled = false
    level = \"info\"

EXAMPLES:
  wex config                      Edit configuration
  wex config --show               Show current configuration")]
    Config {
        /// Show current configuration without editing
        #[arg(long = "show")]
        show: bool,
    },
}

pub fn parse_args() -> Result<Args> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Count { file }) => Ok(Args::Count { file }),
        Some(Commands::Blame { file }) => Ok(Args::Blame { file }),
        Some(Commands::Log { file, count }) => Ok(Args::Log { file, count }),
        Some(Commands::Config { show }) => Ok(Args::Config { show }),
        None => {
            let file = cli.file.context("Missing file. Usage: wex -c '%s/old/new/g' file.txt")?;

            // Determine streaming mode (None: auto-detect by size in main.rs)
            let streaming = if cli.no_stream {
                Some(false)
            } else if cli.stream {
                Some(true)
            } else {
                None
            };

            // Determine regex flavor (None: from config)
            let flavor = if cli.extended {
                Some(RegexFlavor::Extended)
            } else if cli.rust_regex {
                Some(RegexFlavor::Rust)
            } else {
                None
            };

            Ok(Args::Edit {
                file,
                commands: cli.commands,
                keys: cli.keys.iter().map(|k| unescape_keys(k)).collect(),
                dry_run: cli.dry_run,
                context: cli.context,
                streaming,
                flavor,
                log: cli.log,
            })
        }
    }
}

/// Turn `\e`, `\x1b`, `\r`, `\n`, `\t` and `\\` in a key string into the
/// characters they name.
pub fn unescape_keys(keys: &str) -> String {
    let mut out = String::with_capacity(keys.len());
    let mut chars = keys.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('e') => out.push('\x1b'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(byte) => out.push(char::from(byte)),
                    Err(_) => {
                        out.push_str("\\x");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[derive(Debug)]
pub enum Args {
    Edit {
        file: PathBuf,
        commands: Vec<String>,
        keys: Vec<String>,
        dry_run: bool,
        context: Option<usize>,
        streaming: Option<bool>,
        flavor: Option<RegexFlavor>,
        log: bool,
    },
    Count {
        file: PathBuf,
    },
    Blame {
        file: PathBuf,
    },
    Log {
        file: PathBuf,
        count: usize,
    },
    Config {
        show: bool,
    },
}
