//! Protocol definitions: named state machines with gated transitions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::DeclaredMap;
use crate::requirement::Requirement;

/// Whose start time bounds a compliance audit of this protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditScope {
    /// The protocol's own frame.
    #[default]
    Cycle,
    /// The enclosing frame, for sub-protocols audited as part of their parent.
    Parent,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProtocolMeta {
    pub title: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_scope: Option<AuditScope>,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Initial,
    Terminal,
    #[serde(other)]
    Other,
}

/// Where a transition leads, and which requirements must pass first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransitionSpec {
    Target(String),
    Gated {
        target: String,
        #[serde(default)]
        gates: Vec<String>,
    },
}

impl TransitionSpec {
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::Target(target) | Self::Gated { target, .. } => target,
        }
    }

    #[must_use]
    pub fn gates(&self) -> &[String] {
        match self {
            Self::Target(_) => &[],
            Self::Gated { gates, .. } => gates,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Banner {
    StopRequired,
    AuditMode,
    Info,
    #[serde(other)]
    Other,
}

/// Guidance shown when a state is entered. Entering such a state halts at a
/// turn boundary instead of printing status.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnterInteraction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<Banner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_topic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExitInteraction {
    #[serde(default)]
    pub require_external_ack: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Interaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_enter: Option<EnterInteraction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_exit: Option<ExitInteraction>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateDefinition {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<StateKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub requirements: DeclaredMap<Requirement>,
    #[serde(default)]
    pub transitions: DeclaredMap<TransitionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction: Option<Interaction>,
}

impl StateDefinition {
    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.kind == Some(StateKind::Initial)
    }

    #[must_use]
    pub fn on_enter(&self) -> Option<&EnterInteraction> {
        self.interaction.as_ref()?.on_enter.as_ref()
    }

    #[must_use]
    pub fn on_exit(&self) -> Option<&ExitInteraction> {
        self.interaction.as_ref()?.on_exit.as_ref()
    }

    /// Whether leaving this state needs an `_ACK` command in the journal.
    #[must_use]
    pub fn requires_exit_ack(&self) -> bool {
        self.on_exit().is_some_and(|exit| exit.require_external_ack)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitialStateError {
    #[error("protocol declares no states")]
    NoStates,
    #[error("protocol marks more than one initial state: {}", .0.join(", "))]
    Ambiguous(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolDefinition {
    /// Filled from the library key when the document omits it.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub meta: ProtocolMeta,
    #[serde(default)]
    pub states: DeclaredMap<StateDefinition>,
}

impl ProtocolDefinition {
    #[must_use]
    pub fn state(&self, name: &str) -> Option<&StateDefinition> {
        self.states.get(name)
    }

    /// The state marked `"type": "initial"`, else the first declared state.
    pub fn initial_state(&self) -> Result<&str, InitialStateError> {
        let marked: Vec<&str> = self
            .states
            .iter()
            .filter(|(_, state)| state.is_initial())
            .map(|(name, _)| name)
            .collect();
        match marked.as_slice() {
            [one] => Ok(one),
            [] => self
                .states
                .first()
                .map(|(name, _)| name)
                .ok_or(InitialStateError::NoStates),
            many => Err(InitialStateError::Ambiguous(
                many.iter().map(ToString::to_string).collect(),
            )),
        }
    }

    #[must_use]
    pub fn has_initial_marker(&self) -> bool {
        self.states.values().any(StateDefinition::is_initial)
    }

    #[must_use]
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn requirement_count(&self) -> usize {
        self.states.values().map(|s| s.requirements.len()).sum()
    }

    #[must_use]
    pub fn audit_scope(&self) -> AuditScope {
        self.meta.audit_scope.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::{InitialStateError, ProtocolDefinition, TransitionSpec};

    fn parse(json: &str) -> ProtocolDefinition {
        serde_json::from_str(json).expect("valid protocol")
    }

    #[test]
    fn marked_initial_state_wins_over_order() {
        let proto = parse(
            r#"{
                "meta": {"title": "Review"},
                "states": {
                    "DRAFT": {},
                    "PLAN": {"type": "initial"}
                }
            }"#,
        );
        assert_eq!(proto.initial_state(), Ok("PLAN"));
    }

    #[test]
    fn first_declared_state_is_fallback() {
        let proto = parse(r#"{"meta": {"title": "T"}, "states": {"ZULU": {}, "ALPHA": {}}}"#);
        assert_eq!(proto.initial_state(), Ok("ZULU"));
        assert!(!proto.has_initial_marker());
    }

    #[test]
    fn two_initial_markers_are_ambiguous() {
        let proto = parse(
            r#"{"meta": {"title": "T"}, "states": {
                "A": {"type": "initial"}, "B": {"type": "initial"}
            }}"#,
        );
        assert_eq!(
            proto.initial_state(),
            Err(InitialStateError::Ambiguous(vec![
                "A".to_string(),
                "B".to_string()
            ]))
        );
    }

    #[test]
    fn empty_protocol_has_no_initial_state() {
        let proto = parse(r#"{"meta": {"title": "T"}}"#);
        assert_eq!(proto.initial_state(), Err(InitialStateError::NoStates));
    }

    #[test]
    fn transitions_accept_bare_and_gated_forms() {
        let proto = parse(
            r#"{"meta": {"title": "T", "version": "2.1.0"}, "states": {
                "A": {
                    "requirements": {"plan": {"type": "file_exists", "path": "PLAN.md"}},
                    "transitions": {
                        "approve": {"target": "B", "gates": ["plan"]},
                        "skip": "B"
                    }
                },
                "B": {}
            }}"#,
        );
        let a = proto.state("A").unwrap();
        let approve = a.transitions.get("approve").unwrap();
        assert_eq!(approve.target(), "B");
        assert_eq!(approve.gates(), ["plan".to_string()]);
        assert_eq!(
            a.transitions.get("skip"),
            Some(&TransitionSpec::Target("B".to_string()))
        );
        assert_eq!(proto.state_count(), 2);
        assert_eq!(proto.requirement_count(), 1);
        assert_eq!(proto.meta.version, "2.1.0");
    }

    #[test]
    fn exit_ack_flag_is_read_from_interaction() {
        let proto = parse(
            r#"{"meta": {"title": "T"}, "states": {
                "A": {"interaction": {"on_exit": {"require_external_ack": true}}},
                "B": {"interaction": {"on_enter": {"banner": "STOP_REQUIRED", "instruction": "Present"}}}
            }}"#,
        );
        assert!(proto.state("A").unwrap().requires_exit_ack());
        assert!(!proto.state("B").unwrap().requires_exit_ack());
        assert_eq!(
            proto
                .state("B")
                .unwrap()
                .on_enter()
                .and_then(|e| e.instruction.as_deref()),
            Some("Present")
        );
    }
}
