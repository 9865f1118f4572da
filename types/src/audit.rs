use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Initialize,
    Transition,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: i64,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl AuditRecord {
    #[must_use]
    pub fn initialize(timestamp: i64, protocol_id: &str, objective: &str, depth: usize) -> Self {
        Self {
            timestamp,
            action: AuditAction::Initialize,
            protocol_id: Some(protocol_id.to_string()),
            objective: Some(objective.to_string()),
            depth: Some(depth),
            from: None,
            to: None,
        }
    }

    #[must_use]
    pub fn transition(timestamp: i64, protocol_id: &str, from: &str, to: &str) -> Self {
        Self {
            timestamp,
            action: AuditAction::Transition,
            protocol_id: Some(protocol_id.to_string()),
            objective: None,
            depth: None,
            from: Some(from.to_string()),
            to: Some(to.to_string()),
        }
    }

    #[must_use]
    pub fn close(timestamp: i64, protocol_id: &str, depth: usize) -> Self {
        Self {
            timestamp,
            action: AuditAction::Close,
            protocol_id: Some(protocol_id.to_string()),
            objective: None,
            depth: Some(depth),
            from: None,
            to: None,
        }
    }
}

/// On-disk shape: `{ "history": [...] }`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuditTrail {
    #[serde(default)]
    pub history: Vec<AuditRecord>,
}

impl AuditTrail {
    /// Whether `protocol_id` was initialized strictly after `since`.
    #[must_use]
    pub fn initialized_after(&self, protocol_id: &str, since: i64) -> bool {
        self.history.iter().any(|r| {
            r.action == AuditAction::Initialize
                && r.protocol_id.as_deref() == Some(protocol_id)
                && r.timestamp > since
        })
    }
}
