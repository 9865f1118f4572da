//! Session journal records and intent patterns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provenance of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    ManualInit,
    ManualTransition,
    ManualClose,
    ManualEcho,
    AgentExec,
    ShadowAction,
    System,
}

impl EntrySource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManualInit => "manual_init",
            Self::ManualTransition => "manual_transition",
            Self::ManualClose => "manual_close",
            Self::ManualEcho => "manual_echo",
            Self::AgentExec => "agent_exec",
            Self::ShadowAction => "shadow_action",
            Self::System => "system",
        }
    }
}

/// A structured classification of free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub id: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: i64,
    pub command: String,
    #[serde(default)]
    pub output: String,
    pub source: EntrySource,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
}

impl JournalEntry {
    #[must_use]
    pub fn new(
        timestamp: i64,
        command: impl Into<String>,
        source: EntrySource,
        protocol: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            command: command.into(),
            output: String::new(),
            source,
            protocol: protocol.into(),
            intent: None,
            justification: None,
        }
    }

    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    #[must_use]
    pub fn with_intent(mut self, intent: Option<Intent>) -> Self {
        self.intent = intent;
        self
    }

    #[must_use]
    pub fn with_justification(mut self, justification: Option<String>) -> Self {
        self.justification = justification;
        self
    }

    /// Follow-up entries carrying a command's captured output.
    #[must_use]
    pub fn is_result(&self) -> bool {
        self.command.starts_with("[RESULT]")
    }
}

/// `{id, regex, intent}`. Template values of the form `"$N"` are replaced by
/// capture group `N`; everything else is copied through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentPattern {
    pub id: String,
    pub regex: String,
    #[serde(default)]
    pub intent: BTreeMap<String, Value>,
}
