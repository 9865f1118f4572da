//! Session state persistence.
//!
//! A session is three documents: the protocol stack (rewritten whole on every
//! save), the journal (newline-delimited JSON, append-only), and the audit
//! trail (`{ "history": [...] }`, read-modify-write).
//!
//! # Key Invariant
//!
//! **Journal lines are never rewritten.** The only operation that removes
//! them is [`StateStore::purge`], which deletes the whole session once the
//! last frame closes.
//!
//! No locking protects these files. Two concurrent writers race on the
//! stack and audit trail (last writer wins); callers serialize invocations.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use warden_config::SessionFiles;
use warden_types::{AuditRecord, AuditTrail, JournalEntry, ProtocolStack};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("malformed document {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("malformed journal line {line} in {}: {source}", path.display())]
    JournalLine {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
    #[error("failed to encode session record: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Storage for one session.
///
/// Reads take `&self`. Writes are whole-document (stack,
/// audit trail) or single-line appends (journal).
pub trait StateStore {
    /// The current stack. A missing document is an empty stack.
    fn load_stack(&self) -> Result<ProtocolStack, StoreError>;

    fn save_stack(&mut self, stack: &ProtocolStack) -> Result<(), StoreError>;

    fn entries(&self) -> Result<Vec<JournalEntry>, StoreError>;

    /// Raw journal bytes, `None` when no journal exists.
    fn journal_bytes(&self) -> Result<Option<Vec<u8>>, StoreError>;

    fn append_entry(&mut self, entry: &JournalEntry) -> Result<(), StoreError>;

    /// The audit trail, `None` when no trail document exists.
    fn audit_trail(&self) -> Result<Option<AuditTrail>, StoreError>;

    fn append_audit(&mut self, record: AuditRecord) -> Result<(), StoreError>;

    /// Deletes the stack, journal and audit trail.
    fn purge(&mut self) -> Result<(), StoreError>;
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path)(e)),
    }
}

fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path)(e)),
    }
}

fn parse_journal(path: &Path, bytes: &[u8]) -> Result<Vec<JournalEntry>, StoreError> {
    String::from_utf8_lossy(bytes)
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| StoreError::JournalLine {
                path: path.to_path_buf(),
                line: idx + 1,
                source,
            })
        })
        .collect()
}

/// Session files on disk.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    files: SessionFiles,
}

impl FileStateStore {
    #[must_use]
    pub fn new(files: SessionFiles) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &SessionFiles {
        &self.files
    }

    fn write_document<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
        warden_utils::write_json_pretty(path, value).map_err(io_err(path))
    }
}

impl StateStore for FileStateStore {
    fn load_stack(&self) -> Result<ProtocolStack, StoreError> {
        let path = &self.files.stack;
        warden_utils::recover_bak_file(path);
        match read_optional(path)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
                path: path.clone(),
                source,
            }),
            None => Ok(ProtocolStack::default()),
        }
    }

    fn save_stack(&mut self, stack: &ProtocolStack) -> Result<(), StoreError> {
        Self::write_document(&self.files.stack, stack)?;
        tracing::debug!(path = %self.files.stack.display(), depth = stack.depth(), "Stack saved");
        Ok(())
    }

    fn entries(&self) -> Result<Vec<JournalEntry>, StoreError> {
        match self.journal_bytes()? {
            Some(bytes) => parse_journal(&self.files.journal, &bytes),
            None => Ok(Vec::new()),
        }
    }

    fn journal_bytes(&self) -> Result<Option<Vec<u8>>, StoreError> {
        read_optional(&self.files.journal)
    }

    fn append_entry(&mut self, entry: &JournalEntry) -> Result<(), StoreError> {
        let path = &self.files.journal;
        let mut line = serde_json::to_string(entry).map_err(StoreError::Encode)?;
        line.push('\n');
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err(path))?;
        // One write call per line: the entry lands whole or not at all.
        file.write_all(line.as_bytes()).map_err(io_err(path))?;
        Ok(())
    }

    fn audit_trail(&self) -> Result<Option<AuditTrail>, StoreError> {
        let path = &self.files.audit;
        read_optional(path)?
            .map(|bytes| {
                serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
                    path: path.clone(),
                    source,
                })
            })
            .transpose()
    }

    fn append_audit(&mut self, record: AuditRecord) -> Result<(), StoreError> {
        let mut trail = self.audit_trail()?.unwrap_or_default();
        trail.history.push(record);
        Self::write_document(&self.files.audit, &trail)
    }

    fn purge(&mut self) -> Result<(), StoreError> {
        remove_if_present(&self.files.stack)?;
        remove_if_present(&self.files.journal)?;
        remove_if_present(&self.files.audit)?;
        tracing::info!(dir = ?self.files.stack.parent(), "Session files removed");
        Ok(())
    }
}

/// In-memory session for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    stack: Option<ProtocolStack>,
    journal: Option<String>,
    audit: Option<AuditTrail>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn has_stack(&self) -> bool {
        self.stack.is_some()
    }
}

impl StateStore for MemoryStateStore {
    fn load_stack(&self) -> Result<ProtocolStack, StoreError> {
        Ok(self.stack.clone().unwrap_or_default())
    }

    fn save_stack(&mut self, stack: &ProtocolStack) -> Result<(), StoreError> {
        self.stack = Some(stack.clone());
        Ok(())
    }

    fn entries(&self) -> Result<Vec<JournalEntry>, StoreError> {
        match &self.journal {
            Some(text) => parse_journal(Path::new("<memory>"), text.as_bytes()),
            None => Ok(Vec::new()),
        }
    }

    fn journal_bytes(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.journal.as_ref().map(|text| text.as_bytes().to_vec()))
    }

    fn append_entry(&mut self, entry: &JournalEntry) -> Result<(), StoreError> {
        let line = serde_json::to_string(entry).map_err(StoreError::Encode)?;
        let journal = self.journal.get_or_insert_with(String::new);
        journal.push_str(&line);
        journal.push('\n');
        Ok(())
    }

    fn audit_trail(&self) -> Result<Option<AuditTrail>, StoreError> {
        Ok(self.audit.clone())
    }

    fn append_audit(&mut self, record: AuditRecord) -> Result<(), StoreError> {
        self.audit.get_or_insert_with(AuditTrail::default).history.push(record);
        Ok(())
    }

    fn purge(&mut self) -> Result<(), StoreError> {
        *self = Self::default();
        Ok(())
    }
}
