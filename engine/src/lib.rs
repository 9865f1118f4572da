//! Warden engine: the protocol driver and the tooling around its library.
//!
//! # Architecture
//!
//! ```text
//! Driver ──> StateStore (stack, journal, audit trail)
//!   │    ──> IntentResolver
//!   │    ──> CommandRunner (ShellRunner)
//!   └──────> ProtocolLibrary ──> handlers::evaluate
//!
//! Governance ──> SchemaValidator ──> library::sync_library
//! integrity  ──> snapshot / verify / restore
//! Reporter   ──> compliance analysis over the journal
//! ```

mod driver;
mod governance;
mod integrity;
mod library;
mod report;
mod runner;
mod schema;

pub use driver::{
    CloseOutcome, Driver, DriverError, DriverSettings, ExecOutcome, InitOutcome, NextOutcome,
    RequirementStatus, Status, StatusReport, TransitionView,
};
pub use governance::{CommitOutcome, Governance, GovernanceError, ValidationReport};
pub use integrity::{
    ChangeKind, ComponentAudit, ComponentCheck, Finding, GLOBAL_REGISTRIES, IntegrityError,
    ProtocolChange, Severity, SnapshotOutcome, VerifyReport, audit_components, compare,
    protocol_signature, restore, signatures, snapshot, structural_findings, verify,
};
pub use library::{FileCheck, LibraryCheck, LibraryVerification, SyncReport, sync_library, verify_library};
pub use report::{AuditWindow, ComplianceOutcome, DraftOutcome, ReportError, Reporter};
pub use runner::{CommandOutput, CommandRunner, RunnerError, ShellRunner};
pub use schema::{BUILTIN_PROTOCOL_SCHEMA, SchemaError, SchemaValidator};
