use anyhow::{Context, Result};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};
use wex::cli::{Args, parse_args};
use wex::config::{self, Config};
use wex::diff_formatter::{DiffFormatter, DocumentDiff};
use wex::error::{ExError, open_error, save_error};
use wex::ex_command::{ExCommand, ExLine, parse_ex};
use wex::registers::Registers;
use wex::vcs::{self, SystemRunner};
use wex::vi::{Document, Vi};
use wex::vi_regex::RegexFlavor;
use wex::{ExStream, MemoryWidget};

fn main() -> Result<()> {
    let args = parse_args()?;

    match args {
        Args::Edit {
            file,
            commands,
            keys,
            dry_run,
            context,
            streaming,
            flavor,
            log,
        } => {
            let config = load_validated_config()?;
            let level = config.log.level.clone().unwrap_or_else(|| "info".to_string());
            init_log(log || config.log.enabled.unwrap_or(false), &level);
            edit_file(&file, &commands, &keys, dry_run, context, streaming, flavor, &config)?;
        }
        Args::Count { file } => {
            let config = load_validated_config()?;
            count_lines(&file, &config)?;
        }
        Args::Blame { file } => {
            show_blame(&file)?;
        }
        Args::Log { file, count } => {
            for line in vcs::log(&SystemRunner, &file, count).map_err(|e| anyhow::anyhow!(e.status()))? {
                println!("{}", line);
            }
        }
        Args::Config { show } => {
            edit_config(show)?;
        }
    }

    Ok(())
}

fn load_validated_config() -> Result<Config> {
    let config = config::load_config()?;
    config::validate_config(&config).context("Invalid configuration, run 'wex config' to fix it")?;
    Ok(config)
}

fn init_log(enabled: bool, level: &str) {
    match wex::logger::init_logging(enabled, level) {
        Ok(Some(path)) => debug!("Logging to {}", path.display()),
        Ok(None) => {}
        Err(e) => eprintln!("Warning: {:#}", e),
    }
}

/// Streaming is forced by a flag or chosen when the file reaches the threshold.
fn use_streaming(file: &Path, forced: Option<bool>, config: &Config) -> Result<bool> {
    let metadata = fs::metadata(file).map_err(|e| anyhow::anyhow!(open_error(file, &e)))?;
    if !metadata.is_file() {
        anyhow::bail!("{} is not a regular file", file.display());
    }
    Ok(forced.unwrap_or(metadata.len() >= config.stream_threshold()))
}

fn open_document(file: &Path, streaming: bool, forced: bool, flavor: RegexFlavor, config: &Config) -> Result<Document> {
    let registers = Registers::shared();

    if !streaming {
        match MemoryWidget::open(file, registers.clone()) {
            Ok(mut widget) => {
                widget.set_flavor(flavor);
                widget.set_wrap_scan(config.search.wrap_scan.unwrap_or(true));
                return Ok(Document::Memory(widget));
            }
            // Non UTF-8 content can still be edited line by line
            Err(ExError::Precondition(reason)) if !forced => {
                info!("{}: {}, falling back to streaming", file.display(), reason);
            }
            Err(e) => return Err(status_error(file, e)),
        }
    }

    let mut options = config.stream_options();
    options.flavor = flavor;
    let mut stream = ExStream::new(options, registers);
    stream.attach(file).map_err(|e| status_error(file, e))?;
    Ok(Document::Stream(stream))
}

fn status_error(file: &Path, err: ExError) -> anyhow::Error {
    match &err {
        ExError::Io { source, .. } => anyhow::anyhow!(open_error(file, source)),
        _ => anyhow::anyhow!(err.status()),
    }
}

/// Full text of the document as it is now
fn document_text(doc: &Document) -> Result<String> {
    match doc {
        Document::Memory(widget) => Ok(widget.text()),
        Document::Stream(stream) => {
            let mut bytes = Vec::new();
            stream.copy_to(&mut bytes).map_err(|e| anyhow::anyhow!(e.status()))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

fn is_write(command: &str) -> bool {
    matches!(parse_ex(command), Ok(ExLine { command: ExCommand::Write { .. }, .. }))
}

fn is_modified(doc: &Document) -> bool {
    match doc {
        Document::Memory(widget) => widget.is_modified(),
        Document::Stream(stream) => stream.is_modified(),
    }
}

#[allow(clippy::too_many_arguments)]
fn edit_file(
    file: &Path,
    commands: &[String],
    keys: &[String],
    dry_run: bool,
    context: Option<usize>,
    streaming: Option<bool>,
    flavor: Option<RegexFlavor>,
    config: &Config,
) -> Result<()> {
    let stream_mode = use_streaming(file, streaming, config)?;
    let flavor = flavor.unwrap_or_else(|| config.flavor());
    let doc = open_document(file, stream_mode, streaming.is_some(), flavor, config)?;
    info!(
        "Editing {} ({})",
        file.display(),
        if doc.is_streaming_mode() { "streaming" } else { "in memory" }
    );

    let original = if dry_run { Some(document_text(&doc)?) } else { None };

    let mut vi = Vi::new(doc);
    vi.set_search_flags(config.search_flags());

    for command in commands {
        if dry_run && is_write(command) {
            println!("Skipping '{}' (dry run)", command);
            continue;
        }
        let result = vi.ex(command);
        for line in vi.take_output() {
            println!("{}", line);
        }
        if let Err(e) = result {
            anyhow::bail!("{}: {}", command, e.status());
        }
    }

    for sequence in keys {
        let ok = vi.feed(sequence);
        for line in vi.take_output() {
            println!("{}", line);
        }
        if !ok {
            anyhow::bail!("{}", vi.status());
        }
    }

    let status = vi.status().to_string();
    let mut doc = vi.into_document();
    let path = file.display().to_string();

    if let Some(original) = original {
        let description = commands.iter().chain(keys.iter()).cloned().collect::<Vec<_>>().join(" | ");
        print!("{}", DiffFormatter::format_dry_run_header(&description));
        let diff = DocumentDiff::compute(&path, &original, &document_text(&doc)?);
        if !diff.has_changes() {
            println!("No changes would be made.");
            return Ok(());
        }
        let context = context.unwrap_or_else(|| config.context_lines());
        print!("{}", DiffFormatter::format_diff_with_context(&diff, context));
        return Ok(());
    }

    if !is_modified(&doc) {
        if !status.is_empty() {
            println!("{}", status);
        }
        return Ok(());
    }

    let streaming = doc.is_streaming_mode();
    doc.target().write().map_err(|e| match &e {
        ExError::Io { source, .. } => anyhow::anyhow!(save_error(file, source)),
        _ => anyhow::anyhow!(e.status()),
    })?;
    print!("{}", DiffFormatter::format_saved(&path, streaming, &status));
    Ok(())
}

fn count_lines(file: &Path, config: &Config) -> Result<()> {
    let mut stream = ExStream::new(config.stream_options(), Registers::shared());
    stream.attach(file).map_err(|e| status_error(file, e))?;
    let count = stream.get_line_count_request().map_err(|e| anyhow::anyhow!(e.status()))?;

    if stream.is_line_count_estimated() {
        println!("~{} lines (estimated, no line breaks found)", count);
    } else {
        println!("{} lines", count);
    }
    Ok(())
}

fn show_blame(file: &Path) -> Result<()> {
    let margins = vcs::blame_margins(&SystemRunner, file).map_err(|e| anyhow::anyhow!(e.status()))?;
    let reader = BufReader::new(fs::File::open(file).map_err(|e| anyhow::anyhow!(open_error(file, &e)))?);

    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", file.display()))?;
        let margin = margins.get(i).map(String::as_str).unwrap_or("");
        println!("{:<25} {:>5} | {}", margin, i + 1, line);
    }
    Ok(())
}

fn edit_config(show: bool) -> Result<()> {
    let config_path = config::config_file_path()?;
    if !config_path.exists() {
        config::save_default_config_to(&config_path)?;
    }

    if show {
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        println!("# {}\n", config_path.display());
        print!("{}", content);
        return Ok(());
    }

    let editor = std::env::var("VISUAL")
        .or_else(|_| std::env::var("EDITOR"))
        .unwrap_or_else(|_| "vi".to_string());
    let program = which::which(&editor).with_context(|| format!("Editor not found: {}", editor))?;

    let status = Command::new(&program)
        .arg(&config_path)
        .status()
        .with_context(|| format!("Failed to run {}", editor))?;
    if !status.success() {
        anyhow::bail!("{} exited with {}", editor, status);
    }

    let config = config::load_config_from(&config_path)?;
    config::validate_config(&config)?;
    println!("Configuration saved: {}", config_path.display());
    Ok(())
}
