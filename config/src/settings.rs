use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_GRACE_WINDOW_MS: i64 = 2000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to edit config {}: {source}", path.display())]
    Edit {
        path: PathBuf,
        source: toml_edit::TomlError,
    },
    #[error("failed to write config {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config key must be `section.name`, got `{0}`")]
    InvalidKey(String),
    #[error("config section `{0}` is not a table")]
    NotATable(String),
    #[error("no config file location is available")]
    NoLocation,
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Read { path, .. }
            | Self::Parse { path, .. }
            | Self::Edit { path, .. }
            | Self::Write { path, .. } => Some(path),
            Self::InvalidKey(_) | Self::NotATable(_) | Self::NoLocation => None,
        }
    }
}

/// Warden settings.
///
/// ```toml
/// [gates]
/// grace_window_ms = 2000
///
/// [exec]
/// shell = "sh"
/// shell_args = ["-c"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub gates: GatesConfig,
    #[serde(default)]
    pub exec: ExecConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatesConfig {
    /// Tolerance for clock skew between file timestamps and transition times.
    #[serde(default = "default_grace_window_ms")]
    pub grace_window_ms: i64,
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            grace_window_ms: DEFAULT_GRACE_WINDOW_MS,
        }
    }
}

const fn default_grace_window_ms() -> i64 {
    DEFAULT_GRACE_WINDOW_MS
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecConfig {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_shell_args")]
    pub shell_args: Vec<String>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            shell_args: default_shell_args(),
        }
    }
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_shell_args() -> Vec<String> {
    vec!["-c".to_string()]
}

impl WardenConfig {
    /// Loads from the first existing candidate. Missing files yield defaults.
    pub fn load(local: &Path) -> Result<Self, ConfigError> {
        match config_path(local) {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!(path = %path.display(), "Failed to read config: {source}");
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        toml::from_str(&content).map_err(|source| {
            tracing::warn!(path = %path.display(), "Failed to parse config: {source}");
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }
}

/// `local` when it exists, else `~/.warden/config.toml`, else `local`.
#[must_use]
pub fn config_path(local: &Path) -> Option<PathBuf> {
    if local.exists() {
        return Some(local.to_path_buf());
    }
    dirs::home_dir()
        .map(|home| home.join(".warden").join("config.toml"))
        .filter(|p| p.exists())
        .or_else(|| Some(local.to_path_buf()))
}

fn split_key(key: &str) -> Result<(&str, &str), ConfigError> {
    match key.split_once('.') {
        Some((section, name)) if !section.is_empty() && !name.is_empty() => Ok((section, name)),
        _ => Err(ConfigError::InvalidKey(key.to_string())),
    }
}

/// Reads `section.name` as a display string. Missing keys yield `None`.
pub fn get_value(path: &Path, key: &str) -> Result<Option<String>, ConfigError> {
    let (section, name) = split_key(key)?;
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let doc = parse_document(path, &content)?;
    Ok(doc
        .get(section)
        .and_then(|table| table.get(name))
        .and_then(toml_edit::Item::as_value)
        .map(|value| match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string().trim().to_string(),
        }))
}

/// Sets `section.name`, preserving comments and formatting.
///
/// The raw value is parsed as a TOML literal when possible (`2500`, `true`,
/// `["-c"]`) and stored as a string otherwise.
pub fn set_value(path: &Path, key: &str, raw: &str) -> Result<(), ConfigError> {
    let (section, name) = split_key(key)?;
    let content = if path.exists() {
        fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        String::new()
    };
    let mut doc = parse_document(path, &content)?;

    if doc.get(section).is_some_and(|item| !item.is_table_like()) {
        return Err(ConfigError::NotATable(section.to_string()));
    }
    if !doc.contains_key(section) {
        doc[section] = toml_edit::Item::Table(toml_edit::Table::new());
    }
    let value = raw
        .parse::<toml_edit::Value>()
        .unwrap_or_else(|_| toml_edit::Value::from(raw));
    doc[section][name] = toml_edit::value(value);

    warden_utils::atomic_write(path, doc.to_string().as_bytes()).map_err(|source| {
        ConfigError::Write {
            path: path.to_path_buf(),
            source,
        }
    })?;
    tracing::info!(path = %path.display(), key, "Config updated");
    Ok(())
}

fn parse_document(path: &Path, content: &str) -> Result<toml_edit::DocumentMut, ConfigError> {
    content
        .parse::<toml_edit::DocumentMut>()
        .map_err(|source| ConfigError::Edit {
            path: path.to_path_buf(),
            source,
        })
}
