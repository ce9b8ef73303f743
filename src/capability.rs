//! Streaming Capability Checks
//!
//! A streamed document is never held in memory, so only commands that work
//! on whole lines through an address range can run against it. Everything
//! that needs a character position (word motions, `x`, insert mode, `cw`)
//! requires the in-memory widget.

use crate::error::{ExError, Result};
use crate::vi::{Action, Motion, NormalCommand, Operator, OperatorTarget};

/// Check if a normal-mode command can be executed in streaming mode
///
/// # Streamable Commands
///
/// - Line motions: `j`, `k`, `G`, `gg`, `'x`, `n`, `N`
/// - Whole-line operators: `dd`, `yy`, `Y`, `dj`, `y'a`, ...
/// - `p`, `P` (register text is put as lines), `J`, `m`
/// - `.`, `q`, `@`, `:` and the `/` `?` prompts
///
/// `cc` is refused because it continues in insert mode.
pub fn can_stream(command: &NormalCommand) -> bool {
    match command.action {
        Action::Move(motion) => is_motion_streamable(motion),
        Action::Operator { op, target } => {
            op != Operator::Change
                && match target {
                    OperatorTarget::Line => true,
                    OperatorTarget::Motion(motion) => motion.is_linewise(),
                }
        }
        Action::YankLine
        | Action::Put { .. }
        | Action::Join
        | Action::SetMark(_)
        | Action::Repeat
        | Action::StartRecording(_)
        | Action::StopRecording
        | Action::Replay(_)
        | Action::ReplayLast
        | Action::CommandLine
        | Action::Search { .. } => true,
        Action::DeleteChar
        | Action::DeleteCharBefore
        | Action::DeleteToEnd
        | Action::ChangeToEnd
        | Action::Insert(_)
        | Action::Replace(_)
        | Action::ToggleCase => false,
    }
}

/// Check if a motion only moves between lines
pub fn is_motion_streamable(motion: Motion) -> bool {
    motion.is_linewise() || matches!(motion, Motion::SearchNext | Motion::SearchPrevious)
}

/// Refuse `command` when the document is streamed and the command needs
/// the in-memory widget.
pub fn check_stream(command: &NormalCommand, streaming: bool) -> Result<()> {
    if streaming && !can_stream(command) {
        return Err(ExError::Unsupported(format!(
            "{} is not available in streaming mode",
            describe(command.action)
        )));
    }
    Ok(())
}

fn describe(action: Action) -> &'static str {
    match action {
        Action::Move(_) => "character motion",
        Action::Operator {
            op: Operator::Change, ..
        } => "change",
        Action::Operator { .. } => "characterwise operator",
        Action::DeleteChar | Action::DeleteCharBefore => "character delete",
        Action::DeleteToEnd | Action::ChangeToEnd => "delete to end of line",
        Action::Insert(_) => "insert mode",
        Action::Replace(_) => "replace",
        Action::ToggleCase => "case toggle",
        _ => "command",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vi::{Parse, parse_normal};

    fn command(keys: &str) -> NormalCommand {
        let keys: Vec<char> = keys.chars().collect();
        match parse_normal(&keys, false) {
            Parse::Complete(cmd) => cmd,
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_line_commands_stream() {
        for keys in ["j", "5k", "G", "gg", "'a", "n", "dd", "3yy", "Y", "dj", "y'a", "p", "P", "J", "ma", ".", "@a", ":", "/"] {
            assert!(can_stream(&command(keys)), "{} should stream", keys);
        }
    }

    #[test]
    fn test_character_commands_need_memory() {
        for keys in ["w", "l", "$", "x", "X", "D", "C", "dw", "cc", "cw", "i", "A", "o", "rx", "~"] {
            assert!(!can_stream(&command(keys)), "{} should not stream", keys);
        }
    }

    #[test]
    fn test_check_stream() {
        assert!(check_stream(&command("x"), false).is_ok());
        let err = check_stream(&command("x"), true).unwrap_err();
        assert!(matches!(err, ExError::Unsupported(_)));
        assert!(err.to_string().contains("streaming mode"));
    }
}
