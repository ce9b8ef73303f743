//! Configuration management for wex
//!
//! wex stores configuration in ~/.wex/config.toml
use crate::matcher::SearchFlags;
use crate::stream::{DEFAULT_BUFFER_SIZE, DEFAULT_LINE_SIZE, StreamOptions};
use crate::vi_regex::RegexFlavor;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// wex configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Stream engine tunables
    #[serde(default)]
    pub stream: StreamConfig,

    /// Search and substitute settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Preview settings
    #[serde(default)]
    pub display: DisplayConfig,

    /// Log file settings
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Bytes read per chunk while scanning
    #[serde(default = "default_buffer_size")]
    pub buffer_size: Option<usize>,

    /// Expected line length, also the block-mode estimate divisor
    #[serde(default = "default_line_size")]
    pub line_size: Option<usize>,

    /// Files at or above this size in MB are streamed
    #[serde(default = "default_threshold_mb")]
    pub threshold_mb: Option<u64>,

    /// Directory for scratch files (default: system temp dir)
    #[serde(default)]
    pub temp_dir: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            line_size: default_line_size(),
            threshold_mb: default_threshold_mb(),
            temp_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Pattern flavor: "vi", "extended" or "rust"
    #[serde(default = "default_flavor")]
    pub flavor: Option<String>,

    #[serde(default = "default_false")]
    pub ignore_case: Option<bool>,

    /// Searches wrap around the end of the document
    #[serde(default = "default_true")]
    pub wrap_scan: Option<bool>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            flavor: default_flavor(),
            ignore_case: default_false(),
            wrap_scan: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Number of context lines to show around changes
    #[serde(default = "default_context_lines")]
    pub context_lines: Option<usize>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            context_lines: default_context_lines(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_false")]
    pub enabled: Option<bool>,

    #[serde(default = "default_level")]
    pub level: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_false(),
            level: default_level(),
        }
    }
}

// Default functions for serde
fn default_buffer_size() -> Option<usize> { Some(DEFAULT_BUFFER_SIZE) }
fn default_line_size() -> Option<usize> { Some(DEFAULT_LINE_SIZE) }
fn default_threshold_mb() -> Option<u64> { Some(100) }
fn default_flavor() -> Option<String> { Some("vi".to_string()) }
fn default_context_lines() -> Option<usize> { Some(2) }
fn default_level() -> Option<String> { Some("info".to_string()) }
fn default_true() -> Option<bool> { Some(true) }
fn default_false() -> Option<bool> { Some(false) }

impl Config {
    pub fn flavor(&self) -> RegexFlavor {
        self.search
            .flavor
            .as_deref()
            .and_then(RegexFlavor::from_name)
            .unwrap_or_default()
    }

    pub fn stream_options(&self) -> StreamOptions {
        let defaults = StreamOptions::default();
        StreamOptions {
            buffer_size: self.stream.buffer_size.unwrap_or(defaults.buffer_size),
            line_size: self.stream.line_size.unwrap_or(defaults.line_size),
            temp_dir: self.stream.temp_dir.as_ref().map(PathBuf::from),
            flavor: self.flavor(),
            wrap_scan: self.search.wrap_scan.unwrap_or(true),
        }
    }

    pub fn search_flags(&self) -> SearchFlags {
        SearchFlags {
            match_case: !self.search.ignore_case.unwrap_or(false),
            ..SearchFlags::default()
        }
    }

    /// Size in bytes from which files are streamed
    pub fn stream_threshold(&self) -> u64 {
        self.stream.threshold_mb.unwrap_or(100) * 1024 * 1024
    }

    pub fn context_lines(&self) -> usize {
        self.display.context_lines.unwrap_or(2)
    }
}

/// Key/value view of the configuration with dotted keys (`stream.line_size`)
pub trait ConfigStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

/// Typed lookup with a fallback for missing or unparsable values
pub fn get_or<T: FromStr>(store: &dyn ConfigStore, key: &str, default: T) -> T {
    store.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<Option<T>> {
    value
        .parse()
        .map(Some)
        .map_err(|_| anyhow::anyhow!("Invalid value for {}: {}", key, value))
}

impl ConfigStore for Config {
    fn get(&self, key: &str) -> Option<String> {
        match key {
            "stream.buffer_size" => self.stream.buffer_size.map(|v| v.to_string()),
            "stream.line_size" => self.stream.line_size.map(|v| v.to_string()),
            "stream.threshold_mb" => self.stream.threshold_mb.map(|v| v.to_string()),
            "stream.temp_dir" => self.stream.temp_dir.clone(),
            "search.flavor" => self.search.flavor.clone(),
            "search.ignore_case" => self.search.ignore_case.map(|v| v.to_string()),
            "search.wrap_scan" => self.search.wrap_scan.map(|v| v.to_string()),
            "display.context_lines" => self.display.context_lines.map(|v| v.to_string()),
            "log.enabled" => self.log.enabled.map(|v| v.to_string()),
            "log.level" => self.log.level.clone(),
            _ => None,
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "stream.buffer_size" => self.stream.buffer_size = parse_value(key, value)?,
            "stream.line_size" => self.stream.line_size = parse_value(key, value)?,
            "stream.threshold_mb" => self.stream.threshold_mb = parse_value(key, value)?,
            "stream.temp_dir" => self.stream.temp_dir = Some(value.to_string()),
            "search.flavor" => self.search.flavor = Some(value.to_string()),
            "search.ignore_case" => self.search.ignore_case = parse_value(key, value)?,
            "search.wrap_scan" => self.search.wrap_scan = parse_value(key, value)?,
            "display.context_lines" => self.display.context_lines = parse_value(key, value)?,
            "log.enabled" => self.log.enabled = parse_value(key, value)?,
            "log.level" => self.log.level = Some(value.to_string()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }
}

/// Get the configuration directory, creating it if needed
pub fn config_dir() -> Result<PathBuf> {
    let home_dir = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;

    let config_dir = home_dir.join(".wex");
    fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;

    Ok(config_dir)
}

/// Get the configuration file path
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Get the default configuration file content with comments
fn get_default_config_content() -> &'static str {
    r#"# wex Configuration File
#
# This file controls default behavior for wex. Values set here can be
# overridden by command-line flags.
#
# For more information, run: wex config --help

[stream]
# Bytes read per chunk while scanning the document (default: 1048576)
buffer_size = 1048576

# Expected line length in bytes (default: 500)
# A chunk without any newline switches the document to block mode, where
# the line count is estimated as remaining bytes / line_size.
line_size = 500

# Files at or above this size in MB are edited in streaming mode (default: 100)
threshold_mb = 100

# Directory for scratch files (optional, default: system temp dir)
#temp_dir = "/var/tmp"

[search]
# Pattern flavor: "vi" (default), "extended" or "rust"
# vi       - \( \) groups, \{n,m\} counts, \< \> word boundaries
# extended - ( ) groups, {n,m} counts, like egrep
# rust     - the regex crate syntax, passed through unchanged
flavor = "vi"

# Ignore case in searches and substitutions (default: false)
ignore_case = false

# Searches wrap around the end of the document (default: true)
wrap_scan = true

[display]
# Number of context lines to show around changes in --dry-run (default: 2, max: 10)
context_lines = 2

[log]
# Write a log file to ~/.wex/wex.log (default: false)
enabled = false

# Log level: "error", "warn", "info", "debug" or "trace" (default: "info")
level = "info"
"#
}

/// Save the default commented configuration file
pub fn save_default_config_to(config_path: &Path) -> Result<()> {
    fs::write(config_path, get_default_config_content())
        .with_context(|| format!("Failed to write default config file: {}", config_path.display()))?;

    Ok(())
}

/// Load configuration from file, creating default if needed
///
/// If the config file doesn't exist, creates it with defaults and returns them.
/// If the config file is malformed, recreates it with defaults.
pub fn load_config() -> Result<Config> {
    load_config_from(&config_file_path()?)
}

pub fn load_config_from(config_path: &Path) -> Result<Config> {
    // Create default config file if it doesn't exist
    if !config_path.exists() {
        save_default_config_to(config_path)?;
    }

    let config_str = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

    // Try to parse the config
    let config: Config = match toml::from_str(&config_str) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Malformed config {}: {}, recreating", config_path.display(), e);
            save_default_config_to(config_path)?;
            return Ok(Config::default());
        }
    };

    Ok(config)
}

/// Save configuration to file
pub fn save_config_to(config: &Config, config_path: &Path) -> Result<()> {
    let config_str = toml::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(config_path, config_str)
        .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

    Ok(())
}

/// Validate configuration values
pub fn validate_config(config: &Config) -> Result<()> {
    // Validate stream settings
    if let Some(buffer_size) = config.stream.buffer_size {
        if buffer_size < 4096 {
            anyhow::bail!("Invalid buffer_size: {} (min 4096 bytes)", buffer_size);
        }
    }

    if let Some(line_size) = config.stream.line_size {
        if line_size == 0 || line_size > config.stream.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE) {
            anyhow::bail!("Invalid line_size: {} (must be 1..=buffer_size)", line_size);
        }
    }

    if let Some(dir) = &config.stream.temp_dir {
        if !Path::new(dir).is_dir() {
            anyhow::bail!("Invalid temp_dir: {} (not a directory)", dir);
        }
    }

    // Validate search flavor
    if let Some(flavor) = &config.search.flavor {
        if RegexFlavor::from_name(flavor).is_none() {
            anyhow::bail!("Invalid flavor: {} (must be 'vi', 'extended', or 'rust')", flavor);
        }
    }

    // Validate display settings
    if let Some(context) = config.display.context_lines {
        if context > 10 {
            anyhow::bail!("Invalid context_lines: {} (max 10)", context);
        }
    }

    if let Some(level) = &config.log.level {
        if !["error", "warn", "info", "debug", "trace"].contains(&level.as_str()) {
            anyhow::bail!("Invalid log level: {}", level);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.stream.buffer_size, Some(DEFAULT_BUFFER_SIZE));
        assert_eq!(config.stream.line_size, Some(500));
        assert_eq!(config.stream.threshold_mb, Some(100));
        assert_eq!(config.search.flavor, Some("vi".to_string()));
        assert_eq!(config.search.wrap_scan, Some(true));
        assert_eq!(config.display.context_lines, Some(2));
        assert_eq!(config.log.enabled, Some(false));
    }

    #[test]
    fn test_default_template_parses_to_defaults() {
        let config: Config = toml::from_str(get_default_config_content()).unwrap();
        assert_eq!(config.stream.line_size, Some(500));
        assert_eq!(config.search.flavor, Some("vi".to_string()));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = toml::from_str("[stream]\nline_size = 80\n").unwrap();
        assert_eq!(config.stream.line_size, Some(80));
        assert_eq!(config.stream.buffer_size, Some(DEFAULT_BUFFER_SIZE));
        assert_eq!(config.search.wrap_scan, Some(true));
    }

    #[test]
    fn test_validate_config_invalid_flavor() {
        let mut config = Config::default();
        config.search.flavor = Some("pcre".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_config_invalid_line_size() {
        let mut config = Config::default();
        config.stream.line_size = Some(0);
        assert!(validate_config(&config).is_err());
        config.stream.line_size = Some(DEFAULT_BUFFER_SIZE + 1);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_config_context_lines() {
        let mut config = Config::default();
        config.display.context_lines = Some(11);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_config_store_dotted_keys() {
        let mut config = Config::default();
        config.set("stream.line_size", "120").unwrap();
        assert_eq!(config.get("stream.line_size").as_deref(), Some("120"));
        assert_eq!(get_or(&config, "stream.line_size", 0usize), 120);
        assert_eq!(get_or(&config, "no.such.key", 7usize), 7);
        assert!(config.set("stream.line_size", "many").is_err());
        assert!(config.set("bogus", "1").is_err());
        assert_eq!(config.stream_options().line_size, 120);
    }

    #[test]
    fn test_load_creates_and_recovers() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let config = load_config_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.context_lines(), 2);

        fs::write(&path, "[stream\nbroken").unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.stream.threshold_mb, Some(100));
        assert!(fs::read_to_string(&path).unwrap().contains("[stream]"));

        let mut config = Config::default();
        config.search.ignore_case = Some(true);
        save_config_to(&config, &path).unwrap();
        assert!(!load_config_from(&path).unwrap().search_flags().match_case);
    }

    #[test]
    fn test_config_to_toml() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[stream]"));
        assert!(toml_str.contains("[search]"));
        assert!(toml_str.contains("[display]"));
        assert!(toml_str.contains("[log]"));
    }
}
