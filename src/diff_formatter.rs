use colored::*;
use similar::{ChangeTag, TextDiff};
use std::io::IsTerminal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Unchanged,
    Modified,
    Added,
    Deleted,
}

/// Line-by-line comparison of a document before and after editing
#[derive(Debug, Clone)]
pub struct DocumentDiff {
    pub path: String,
    /// Line number (new numbering, old for deletions), text, kind
    pub lines: Vec<(usize, String, ChangeType)>,
}

impl DocumentDiff {
    /// A deleted run directly followed by an added run is shown as modified
    /// lines, pairwise.
    pub fn compute(path: &str, old: &str, new: &str) -> Self {
        let diff = TextDiff::from_lines(old, new);
        let mut lines = Vec::new();
        let mut deleted: Vec<(usize, String)> = Vec::new();
        let mut paired = 0;

        for change in diff.iter_all_changes() {
            let text = change.value().trim_end_matches(['\n', '\r']).to_string();
            match change.tag() {
                ChangeTag::Delete => {
                    if paired > 0 {
                        Self::flush(&mut lines, &mut deleted, &mut paired);
                    }
                    deleted.push((change.old_index().map_or(0, |i| i + 1), text));
                }
                ChangeTag::Insert => {
                    let line = change.new_index().map_or(0, |i| i + 1);
                    if paired < deleted.len() {
                        paired += 1;
                        lines.push((line, text, ChangeType::Modified));
                    } else {
                        lines.push((line, text, ChangeType::Added));
                    }
                }
                ChangeTag::Equal => {
                    Self::flush(&mut lines, &mut deleted, &mut paired);
                    let line = change.new_index().map_or(0, |i| i + 1);
                    lines.push((line, text, ChangeType::Unchanged));
                }
            }
        }
        Self::flush(&mut lines, &mut deleted, &mut paired);

        Self {
            path: path.to_string(),
            lines,
        }
    }

    // Deletions that found no matching insertion stay deletions.
    fn flush(lines: &mut Vec<(usize, String, ChangeType)>, deleted: &mut Vec<(usize, String)>, paired: &mut usize) {
        for (line, text) in deleted.drain(*paired..) {
            lines.push((line, text, ChangeType::Deleted));
        }
        deleted.clear();
        *paired = 0;
    }

    pub fn count(&self, kind: ChangeType) -> usize {
        self.lines.iter().filter(|(_, _, ct)| *ct == kind).count()
    }

    pub fn has_changes(&self) -> bool {
        self.lines.iter().any(|(_, _, ct)| *ct != ChangeType::Unchanged)
    }
}

pub struct DiffFormatter;

impl DiffFormatter {
    /// Auto-detect if we should use colors
    pub fn should_use_color() -> bool {
        // Check NO_COLOR env var (https://no-color.org/)
        if std::env::var("NO_COLOR").is_ok() {
            return false;
        }

        std::io::stdout().is_terminal()
    }

    /// Format document diff with context lines around each change
    pub fn format_diff_with_context(diff: &DocumentDiff, context_size: usize) -> String {
        Self::format_diff(diff, context_size, Self::should_use_color())
    }

    pub fn format_diff(diff: &DocumentDiff, context_size: usize, use_color: bool) -> String {
        let mut output = String::new();

        if use_color {
            output.push_str(&format!("{}\n", diff.path.bold().cyan()));
        } else {
            output.push_str(&format!("{}\n", diff.path));
        }

        for (line_num, content, change_type) in Self::filter_lines_with_context(&diff.lines, context_size) {
            // Special handling for "..." placeholder
            if line_num == 0 && content == "..." {
                if use_color {
                    output.push_str(&format!("{}\n", "...".dimmed()));
                } else {
                    output.push_str("...\n");
                }
                continue;
            }

            let indicator = match change_type {
                ChangeType::Unchanged => "=",
                ChangeType::Modified => "~",
                ChangeType::Added => "+",
                ChangeType::Deleted => "-",
            };

            if use_color {
                let colored_line = match change_type {
                    ChangeType::Unchanged => format!("L{}: {} {}\n", line_num, indicator.dimmed(), content.dimmed()),
                    ChangeType::Modified => format!(
                        "L{}: {} {}\n",
                        line_num,
                        indicator.yellow().bold(),
                        content.yellow().bold()
                    ),
                    ChangeType::Added => format!(
                        "L{}: {} {}\n",
                        line_num,
                        indicator.green().bold(),
                        content.green().bold()
                    ),
                    ChangeType::Deleted => format!("L{}: {} {}\n", line_num, indicator.red().bold(), content.red()),
                };
                output.push_str(&colored_line);
            } else {
                output.push_str(&format!("L{}: {} {}\n", line_num, indicator, content));
            }
        }

        // Summary
        let modified_count = diff.count(ChangeType::Modified);
        let added_count = diff.count(ChangeType::Added);
        let deleted_count = diff.count(ChangeType::Deleted);
        let total = modified_count + added_count + deleted_count;

        if use_color {
            output.push_str(&format!("\nTotal: {} change", total.to_string().bold().white()));
            if total != 1 {
                output.push('s');
            }
            let mut parts = Vec::new();
            if modified_count > 0 {
                parts.push(format!("{} {}", modified_count, "modified".yellow()));
            }
            if added_count > 0 {
                parts.push(format!("{} {}", added_count, "added".green()));
            }
            if deleted_count > 0 {
                parts.push(format!("{} {}", deleted_count, "deleted".red()));
            }
            if !parts.is_empty() {
                output.push_str(&format!(" ({})", parts.join(", ")));
            }
            output.push('\n');
        } else {
            output.push_str(&format!("\nTotal: {} changes", total));
            if total > 0 {
                output.push_str(&format!(
                    " ({} modified, {} added, {} deleted)",
                    modified_count, added_count, deleted_count
                ));
            }
            output.push('\n');
        }

        output
    }

    /// Filter lines to show only changed lines with context, grouping close changes
    fn filter_lines_with_context(
        lines: &[(usize, String, ChangeType)],
        context_size: usize,
    ) -> Vec<(usize, String, ChangeType)> {
        if context_size == 0 {
            // Show only changed lines
            return lines
                .iter()
                .filter(|(_, _, ct)| *ct != ChangeType::Unchanged)
                .cloned()
                .collect();
        }

        // Find indices of all changed lines
        let changed_indices: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, (_, _, ct))| *ct != ChangeType::Unchanged)
            .map(|(i, _)| i)
            .collect();

        let Some((&first, rest)) = changed_indices.split_first() else {
            return Vec::new();
        };

        // Two changes are in the same group if they're within (context_size * 2 + 1) lines
        let group_threshold = context_size * 2 + 1;
        let mut groups: Vec<(usize, usize)> = vec![(first, first)];

        for &idx in rest {
            match groups.last_mut() {
                Some((_, end)) if idx.saturating_sub(*end) <= group_threshold => *end = idx,
                _ => groups.push((idx, idx)),
            }
        }

        // Build the result by including context around each group
        let mut result = Vec::new();
        let mut last_included_end = None;

        for (group_start, group_end) in groups {
            let start = group_start.saturating_sub(context_size);
            let end = (group_end + context_size + 1).min(lines.len());

            // Add "..." between distant groups (but not before the first group)
            if let Some(last_end) = last_included_end {
                if start > last_end {
                    result.push((0, "...".to_string(), ChangeType::Unchanged));
                }
            }

            result.extend(lines[start.max(last_included_end.unwrap_or(0))..end].iter().cloned());
            last_included_end = Some(end);
        }

        result
    }

    /// Format dry run header
    pub fn format_dry_run_header(commands: &str) -> String {
        if Self::should_use_color() {
            format!("{} {}\n\n", "🔍 Dry run:".bold().cyan(), commands.white().bold())
        } else {
            format!("Dry run: {}\n\n", commands)
        }
    }

    /// One-line summary after saving
    pub fn format_saved(path: &str, streaming: bool, status: &str) -> String {
        let mode = if streaming { "streamed" } else { "in memory" };
        let mut line = if Self::should_use_color() {
            format!("{} {} ({})", "✅ Saved:".bold().green(), path.white().bold(), mode)
        } else {
            format!("Saved: {} ({})", path, mode)
        };
        if !status.is_empty() {
            line.push_str(&format!(" - {}", status));
        }
        line.push('\n');
        line
    }
}
