//! Editing the protocol library.
//!
//! Edits accumulate in memory. [`Governance::commit`] validates the whole
//! library against the schema and the structural checks first; a failed
//! validation writes nothing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use warden_config::WardenPaths;
use warden_core::{LibraryOrigin, LoadedProtocol, ProtocolLibrary, RegistryError, load_library};

use crate::integrity::{Finding, IntegrityError, structural_findings};
use crate::library::{SyncReport, sync_library};
use crate::schema::{SchemaError, SchemaValidator};

#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("protocol '{0}' not found")]
    UnknownProtocol(String),
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("malformed JSON in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("commit aborted, validation failed:\n  {}", .errors.join("\n  "))]
    ValidationFailed { errors: Vec<String> },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    pub schema_errors: Vec<String>,
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.schema_errors.is_empty() && !self.findings.iter().any(Finding::is_error)
    }

    fn blocking(&self) -> Vec<String> {
        self.schema_errors
            .iter()
            .cloned()
            .chain(
                self.findings
                    .iter()
                    .filter(|f| f.is_error())
                    .map(ToString::to_string),
            )
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub written: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub synced: Option<SyncReport>,
}

pub struct Governance {
    paths: WardenPaths,
    library: ProtocolLibrary,
    /// The flat aggregate as read, so keys outside `protocol_library`
    /// survive a commit.
    flat_document: Option<Value>,
    validator: SchemaValidator,
    removed: Vec<String>,
}

fn read_json(path: &Path) -> Result<Value, GovernanceError> {
    let bytes = fs::read(path).map_err(|source| GovernanceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| GovernanceError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json(path: &Path, value: &Value) -> Result<(), GovernanceError> {
    warden_utils::write_json_pretty(path, value).map_err(|source| GovernanceError::Write {
        path: path.to_path_buf(),
        source,
    })
}

impl Governance {
    pub fn open(paths: &WardenPaths) -> Result<Self, GovernanceError> {
        let library = load_library(paths)?;
        let flat_document = match &library.origin {
            LibraryOrigin::Flat(path) => Some(read_json(path)?),
            LibraryOrigin::Manifest(_) | LibraryOrigin::DirectoryScan(_) => None,
        };
        Ok(Self {
            paths: paths.clone(),
            library,
            flat_document,
            validator: SchemaValidator::load(paths)?,
            removed: Vec::new(),
        })
    }

    #[must_use]
    pub fn library(&self) -> &ProtocolLibrary {
        &self.library
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.library.protocols.keys()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Value> {
        self.library.protocols.get(id).map(|p| &p.raw)
    }

    fn destination(&self, id: &str) -> PathBuf {
        match &self.library.origin {
            LibraryOrigin::Flat(path) => path.clone(),
            LibraryOrigin::Manifest(_) | LibraryOrigin::DirectoryScan(_) => {
                self.paths.protocols_dir().join(format!("{id}.json"))
            }
        }
    }

    /// Adds or replaces `id`. Returns whether an existing protocol was replaced.
    pub fn add(&mut self, id: &str, raw: Value) -> Result<bool, GovernanceError> {
        let loaded = LoadedProtocol::from_value(id, raw, &self.destination(id))?;
        let replaced = self.library.protocols.insert(id, loaded).is_some();
        if replaced {
            tracing::warn!(id, "Protocol already exists, overwriting");
        }
        self.removed.retain(|r| r != id);
        Ok(replaced)
    }

    pub fn add_file(&mut self, id: &str, file: &Path) -> Result<bool, GovernanceError> {
        self.add(id, read_json(file)?)
    }

    pub fn remove(&mut self, id: &str) -> Result<(), GovernanceError> {
        self.library
            .protocols
            .remove(id)
            .ok_or_else(|| GovernanceError::UnknownProtocol(id.to_string()))?;
        self.removed.push(id.to_string());
        Ok(())
    }

    /// The aggregate document a commit would persist.
    #[must_use]
    pub fn document(&self) -> Value {
        let Some(Value::Object(base)) = &self.flat_document else {
            return self.library.to_aggregate();
        };
        let library: Map<String, Value> = self
            .library
            .protocols
            .iter()
            .map(|(id, p)| (id.to_string(), p.raw.clone()))
            .collect();
        let mut doc = base.clone();
        doc.insert("protocol_library".to_string(), Value::Object(library));
        Value::Object(doc)
    }

    /// Schema validation of a temporary serialized copy, plus the structural
    /// checks. Never writes outside the temporary file.
    pub fn validate(&self) -> Result<ValidationReport, GovernanceError> {
        let schema_errors = match self
            .validator
            .validate_via_temp(&self.document(), &self.paths.registry_dir())
        {
            Ok(()) => Vec::new(),
            Err(SchemaError::Invalid { errors }) => errors,
            Err(e) => return Err(e.into()),
        };
        Ok(ValidationReport {
            schema_errors,
            findings: structural_findings(&self.library),
        })
    }

    pub fn commit(&self) -> Result<CommitOutcome, GovernanceError> {
        let report = self.validate()?;
        if !report.passed() {
            return Err(GovernanceError::ValidationFailed {
                errors: report.blocking(),
            });
        }

        let outcome = match &self.library.origin {
            LibraryOrigin::Flat(path) => {
                write_json(path, &self.document())?;
                CommitOutcome {
                    written: vec![path.clone()],
                    removed: Vec::new(),
                    synced: None,
                }
            }
            LibraryOrigin::Manifest(_) | LibraryOrigin::DirectoryScan(_) => {
                self.commit_modular()?
            }
        };
        tracing::info!(
            protocols = self.library.protocols.len(),
            written = outcome.written.len(),
            "Library committed"
        );
        Ok(outcome)
    }

    fn commit_modular(&self) -> Result<CommitOutcome, GovernanceError> {
        let mut written = Vec::new();
        let index = self.paths.protocols_index();
        write_json(&index, &self.library.to_index())?;
        written.push(index);
        for (id, protocol) in self.library.protocols.iter() {
            let path = self.destination(id);
            write_json(&path, &protocol.raw)?;
            written.push(path);
        }

        let mut removed = Vec::new();
        for id in &self.removed {
            let path = self.destination(id);
            match fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(GovernanceError::Write { path, source }),
            }
        }

        let synced = match sync_library(&self.paths) {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!("Library synchronization failed after commit: {e}");
                None
            }
        };
        Ok(CommitOutcome {
            written,
            removed,
            synced,
        })
    }
}
