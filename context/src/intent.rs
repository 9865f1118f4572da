//! Free text to structured intent classification.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use warden_types::{Intent, IntentPattern};

#[derive(Debug, Error)]
pub enum IntentError {
    #[error("intent pattern '{id}' has an invalid regex: {source}")]
    InvalidRegex { id: String, source: regex::Error },
    #[error("intent pattern '{0}' declares the reserved field `id`")]
    ReservedField(String),
    #[error("failed to read intent patterns {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("malformed intent patterns {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

const RESERVED_FIELD: &str = "id";

#[derive(Deserialize)]
struct PatternFile {
    #[serde(default)]
    patterns: Vec<IntentPattern>,
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    id: String,
    regex: Regex,
    template: BTreeMap<String, Value>,
}

/// Ordered patterns; the first regex that matches wins.
#[derive(Debug, Clone, Default)]
pub struct IntentResolver {
    patterns: Vec<CompiledPattern>,
}

impl IntentResolver {
    pub fn new(patterns: Vec<IntentPattern>) -> Result<Self, IntentError> {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let regex = Regex::new(&p.regex).map_err(|source| IntentError::InvalidRegex {
                    id: p.id.clone(),
                    source,
                })?;
                if p.intent.contains_key(RESERVED_FIELD) {
                    return Err(IntentError::ReservedField(p.id));
                }
                Ok(CompiledPattern {
                    id: p.id,
                    regex,
                    template: p.intent,
                })
            })
            .collect::<Result<Vec<_>, IntentError>>()?;
        Ok(Self { patterns })
    }

    /// Loads `{ "patterns": [...] }`. A missing file is an empty resolver.
    pub fn load(path: &Path) -> Result<Self, IntentError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No intent patterns registered");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(IntentError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let file: PatternFile =
            serde_json::from_str(&content).map_err(|source| IntentError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::new(file.patterns)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    #[must_use]
    pub fn resolve(&self, text: &str) -> Option<Intent> {
        self.patterns.iter().find_map(|pattern| {
            let caps = pattern.regex.captures(text)?;
            let fields = pattern
                .template
                .iter()
                .map(|(key, value)| (key.clone(), substitute(value, &caps)))
                .collect();
            Some(Intent {
                id: pattern.id.clone(),
                fields,
            })
        })
    }
}

/// A string starting with `$` is a capture reference: its leading digits
/// name the group. It becomes `null` when there are no digits, or the group
/// did not participate or matched nothing. Other values copy through.
fn substitute(value: &Value, caps: &Captures<'_>) -> Value {
    let Some(reference) = value.as_str().and_then(|s| s.strip_prefix('$')) else {
        return value.clone();
    };
    let digits_end = reference
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(reference.len());
    reference[..digits_end]
        .parse::<usize>()
        .ok()
        .and_then(|group| caps.get(group))
        .map(|m| m.as_str())
        .filter(|s| !s.is_empty())
        .map_or(Value::Null, |s| Value::String(s.to_string()))
}
