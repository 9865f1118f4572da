//! Session state and journal analysis.
//!
//! This crate provides:
//! - `StateStore`: the stack, journal and audit-trail persistence seam
//! - `IntentResolver`: first-match regex classification of free text
//! - Compliance matching between claimed and recorded commands
//!
//! # Architecture
//!
//! ```text
//! Driver
//! ├── store: Box<dyn StateStore>   (FileStateStore | MemoryStateStore)
//! └── intents: IntentResolver
//!
//! report
//! └── compliance: match_claim / analyze_compliance over JournalEntry
//! ```

mod compliance;
mod intent;
mod store;

pub use compliance::{
    Claim, ClaimVerdict, ComplianceReport, EngineerReport, InteractionClaim, InteractionReport,
    NormalizedCommand, analyze_compliance, audit_since, draft_report, interaction_report,
    match_claim, normalize_command, sanitize,
};
pub use intent::{IntentError, IntentResolver};
pub use store::{FileStateStore, MemoryStateStore, StateStore, StoreError};
