//! Core domain types for Warden.
//!
//! This crate contains pure domain types with no IO and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod audit;
mod declared;
mod integrity;
mod journal;
mod protocol;
mod requirement;
mod session;

pub use audit::{AuditAction, AuditRecord, AuditTrail};
pub use declared::DeclaredMap;
pub use integrity::{IntegritySignature, ManifestEntry};
pub use journal::{EntrySource, Intent, IntentPattern, JournalEntry};
pub use protocol::{
    AuditScope, Banner, EnterInteraction, ExitInteraction, InitialStateError, Interaction,
    ProtocolDefinition, ProtocolMeta, StateDefinition, StateKind, TransitionSpec,
};
pub use requirement::{Requirement, RequirementCheck};
pub use session::{GovernanceInstance, ProtocolStack, TransitionRecord};

/// Protocol label recorded on journal entries made while no frame is active.
pub const NO_PROTOCOL: &str = "none";
