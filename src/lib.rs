//! wex: ex/vi editing that keeps very large files editable
//!
//! Small documents are edited in memory through [`MemoryWidget`]; large ones
//! through [`ExStream`], which applies each line-oriented command in a single
//! pass over a work copy of the file. The [`Vi`] dispatcher drives both.
//! The main binary is at src/main.rs.

pub mod address;
pub mod capability;
pub mod cli;
pub mod config;
pub mod diff_formatter;
pub mod disk_space;
pub mod error;
pub mod ex_command;
pub mod logger;
pub mod matcher;
pub mod regex_error;
pub mod registers;
pub mod stream;
pub mod stream_line;
pub mod vcs;
pub mod vi;
pub mod vi_regex;
pub mod widget;

// Re-export commonly used types for convenience
pub use address::{Address, AddressContext, AddressRange, LineRange, Markers};
pub use capability::can_stream;
pub use error::{ExError, Result};
pub use ex_command::{ExSession, ExTarget};
pub use matcher::{Matcher, SearchFlags};
pub use registers::{RegisterContent, Registers, SharedRegisters};
pub use stream::{ExStream, StreamOptions, SubstituteFlags};
pub use vi::{Document, Mode, Vi};
pub use vi_regex::RegexFlavor;
pub use widget::{MemoryWidget, Position, TextWidget};
