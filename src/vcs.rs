//! Version-control margins
//!
//! Blame and log run as external processes; their output is only parsed into
//! margin text, one entry per document line.

use crate::error::{ExError, Result};
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Exit code and captured output of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub trait ProcessRunner {
    fn run(&self, program: &str, args: &[&str], workdir: &Path) -> Result<ProcessOutput>;
}

/// Runs programs found on `PATH`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str], workdir: &Path) -> Result<ProcessOutput> {
        let resolved = which::which(program)
            .map_err(|_| ExError::Precondition(format!("{} not found in PATH", program)))?;
        debug!("Running {} {:?} in {}", resolved.display(), args, workdir.display());

        let output = Command::new(&resolved)
            .args(args)
            .current_dir(workdir)
            .output()
            .map_err(|e| ExError::io(format!("cannot run {}", program), e))?;

        Ok(ProcessOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// One annotated line of `git blame --line-porcelain`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlameLine {
    pub commit: String,
    pub author: String,
    /// 1-based line in the current file
    pub line: usize,
}

impl BlameLine {
    pub fn margin(&self) -> String {
        let commit: String = self.commit.chars().take(8).collect();
        format!("{} {:<16.16}", commit, self.author)
    }
}

fn is_header(line: &str) -> bool {
    line.split(' ')
        .next()
        .is_some_and(|sha| sha.len() == 40 && sha.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Parse `--line-porcelain` output.
pub fn parse_blame(output: &str) -> Vec<BlameLine> {
    let mut lines = Vec::new();
    let mut current: Option<BlameLine> = None;

    for line in output.lines() {
        if line.starts_with('\t') {
            lines.extend(current.take());
        } else if is_header(line) {
            let mut fields = line.split(' ');
            let commit = fields.next().unwrap_or_default().to_string();
            let number = fields.nth(1).and_then(|n| n.parse().ok()).unwrap_or(lines.len() + 1);
            current = Some(BlameLine {
                commit,
                author: String::new(),
                line: number,
            });
        } else if let Some(author) = line.strip_prefix("author ") {
            if let Some(entry) = current.as_mut() {
                entry.author = author.to_string();
            }
        }
    }
    lines
}

fn file_location(file: &Path) -> Result<(&Path, String)> {
    let name = file
        .file_name()
        .ok_or_else(|| ExError::Precondition(format!("{} is not a file", file.display())))?
        .to_string_lossy()
        .into_owned();
    let dir = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    Ok((dir, name))
}

fn checked(output: ProcessOutput, what: &str) -> Result<String> {
    if output.code != 0 {
        let reason = output.stderr.lines().next().unwrap_or("").trim().to_string();
        return Err(ExError::Precondition(format!("{} failed: {}", what, reason)));
    }
    Ok(output.stdout)
}

/// Blame `file` through `git`, one entry per line.
pub fn blame(runner: &dyn ProcessRunner, file: &Path) -> Result<Vec<BlameLine>> {
    let (dir, name) = file_location(file)?;
    let output = runner.run("git", &["blame", "--line-porcelain", "--", &name], dir)?;
    Ok(parse_blame(&checked(output, "git blame")?))
}

/// Margin text for each line of `file`
pub fn blame_margins(runner: &dyn ProcessRunner, file: &Path) -> Result<Vec<String>> {
    Ok(blame(runner, file)?.iter().map(BlameLine::margin).collect())
}

/// The last `count` commits touching `file`, one line each
pub fn log(runner: &dyn ProcessRunner, file: &Path, count: usize) -> Result<Vec<String>> {
    let (dir, name) = file_location(file)?;
    let limit = format!("-{}", count.max(1));
    let output = runner.run("git", &["log", "--oneline", &limit, "--", &name], dir)?;
    Ok(checked(output, "git log")?.lines().map(str::to_string).collect())
}
