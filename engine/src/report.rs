//! Journal reporting: the interaction listing, engineer report drafts and
//! compliance scoring.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use warden_context::{
    ComplianceReport, EngineerReport, InteractionReport, StateStore, StoreError,
    analyze_compliance, audit_since, draft_report, interaction_report,
};
use warden_core::ProtocolLibrary;
use warden_types::{AuditScope, JournalEntry};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("session journal not found, nothing to report")]
    NoJournal,
    #[error("missing engineer report at {}", path.display())]
    MissingReport { path: PathBuf },
    #[error("malformed engineer report {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to access {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The window a report covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditWindow {
    pub since: i64,
    /// The active protocol audits at parent scope and a parent frame exists.
    pub parent_scoped: bool,
    pub objective: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftOutcome {
    pub path: PathBuf,
    pub report: EngineerReport,
    pub window: AuditWindow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceOutcome {
    pub input: PathBuf,
    pub report: ComplianceReport,
    pub window: AuditWindow,
}

pub struct Reporter<'a> {
    store: &'a dyn StateStore,
    library: &'a ProtocolLibrary,
}

impl<'a> Reporter<'a> {
    #[must_use]
    pub fn new(store: &'a dyn StateStore, library: &'a ProtocolLibrary) -> Self {
        Self { store, library }
    }

    /// Every journal entry. A session that never journaled is an error.
    pub fn entries(&self) -> Result<Vec<JournalEntry>, ReportError> {
        if self.store.journal_bytes()?.is_none() {
            return Err(ReportError::NoJournal);
        }
        Ok(self.store.entries()?)
    }

    pub fn window(&self) -> Result<AuditWindow, ReportError> {
        let stack = self.store.load_stack()?;
        let Some(top) = stack.top() else {
            return Ok(AuditWindow {
                since: 0,
                parent_scoped: false,
                objective: None,
            });
        };
        let scope = self
            .library
            .get(&top.protocol_id)
            .map(warden_types::ProtocolDefinition::audit_scope)
            .unwrap_or_default();
        let since = audit_since(&stack, scope);
        Ok(AuditWindow {
            since,
            parent_scoped: scope == AuditScope::Parent && since != top.start_time,
            objective: Some(top.objective.clone()),
        })
    }

    pub fn interactions(&self) -> Result<InteractionReport, ReportError> {
        Ok(interaction_report(&self.entries()?))
    }

    /// Drafts claims from the current audit window and writes them to `dest`.
    pub fn draft(&self, dest: &Path) -> Result<DraftOutcome, ReportError> {
        let entries = self.entries()?;
        let window = self.window()?;
        let report = draft_report(window.objective.as_deref(), &entries, window.since);
        warden_utils::write_json_pretty(dest, &report).map_err(|source| ReportError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        tracing::info!(
            claims = report.claims.len(),
            path = %dest.display(),
            "Engineer report drafted"
        );
        Ok(DraftOutcome {
            path: dest.to_path_buf(),
            report,
            window,
        })
    }

    pub fn compliance(&self, input: &Path) -> Result<ComplianceOutcome, ReportError> {
        let entries = self.entries()?;
        let bytes = match fs::read(input) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ReportError::MissingReport {
                    path: input.to_path_buf(),
                });
            }
            Err(source) => {
                return Err(ReportError::Io {
                    path: input.to_path_buf(),
                    source,
                });
            }
        };
        let claimed: EngineerReport =
            serde_json::from_slice(&bytes).map_err(|source| ReportError::Parse {
                path: input.to_path_buf(),
                source,
            })?;
        let window = self.window()?;
        let audit_present = self.store.audit_trail()?.is_some();
        let report = analyze_compliance(&claimed, &entries, window.since, audit_present);
        tracing::info!(
            score = report.score,
            trust = report.trust_score,
            "Compliance analyzed"
        );
        Ok(ComplianceOutcome {
            input: input.to_path_buf(),
            report,
            window,
        })
    }
}
