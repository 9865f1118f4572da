//! Gate requirements.
//!
//! Requirement documents are parsed through `RawRequirement` and resolved
//! into a closed set of checks. An unknown `type`, or a known type missing
//! the field it needs, does not fail the parse: it resolves to
//! [`RequirementCheck::Unsupported`], which every evaluator must fail closed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawRequirement {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    protocol_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    instruction: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    freshness: bool,
}

/// The predicate a requirement asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequirementCheck {
    /// `target` was modified no earlier than the grace window before the last transition.
    FileFreshness { target: String },
    /// `path` exists. A file-name glob (`dir/*.md`) needs at least one match;
    /// with `freshness`, at least one match must also be fresh.
    FileExists { path: String, freshness: bool },
    /// A recent journal command contains `pattern`.
    CommandLog { pattern: String },
    /// A recent journal output matches the regex `pattern`.
    RegexMatchOutput { pattern: String },
    /// The audit trail shows `protocol_id` initialized during the current cycle.
    SubProtocolComplete { protocol_id: String },
    /// Unknown type or missing field.
    Unsupported { kind: String, reason: String },
}

impl RequirementCheck {
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::FileFreshness { .. } => "file_freshness",
            Self::FileExists { .. } => "file_exists",
            Self::CommandLog { .. } => "command_log",
            Self::RegexMatchOutput { .. } => "regex_match_output",
            Self::SubProtocolComplete { .. } => "sub_protocol_complete",
            Self::Unsupported { kind, .. } => kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawRequirement", into = "RawRequirement")]
pub struct Requirement {
    pub check: RequirementCheck,
    pub instruction: Option<String>,
}

impl Requirement {
    #[must_use]
    pub fn new(check: RequirementCheck) -> Self {
        Self {
            check,
            instruction: None,
        }
    }

    #[must_use]
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        self.check.kind()
    }
}

fn missing(kind: &str, field: &str) -> RequirementCheck {
    RequirementCheck::Unsupported {
        kind: kind.to_string(),
        reason: format!("requirement type '{kind}' is missing field '{field}'"),
    }
}

impl From<RawRequirement> for Requirement {
    fn from(raw: RawRequirement) -> Self {
        let RawRequirement {
            kind,
            target,
            path,
            pattern,
            protocol_id,
            instruction,
            freshness,
        } = raw;
        let check = match kind.as_str() {
            "file_freshness" => match target.or(path) {
                Some(target) => RequirementCheck::FileFreshness { target },
                None => missing(&kind, "target"),
            },
            "file_exists" => match path.or(target) {
                Some(path) => RequirementCheck::FileExists { path, freshness },
                None => missing(&kind, "path"),
            },
            "command_log" => match pattern {
                Some(pattern) => RequirementCheck::CommandLog { pattern },
                None => missing(&kind, "pattern"),
            },
            "regex_match_output" => match pattern {
                Some(pattern) => RequirementCheck::RegexMatchOutput { pattern },
                None => missing(&kind, "pattern"),
            },
            "sub_protocol_complete" => match protocol_id {
                Some(protocol_id) => RequirementCheck::SubProtocolComplete { protocol_id },
                None => missing(&kind, "protocol_id"),
            },
            _ => RequirementCheck::Unsupported {
                reason: format!("unknown requirement type '{kind}'"),
                kind,
            },
        };
        Self { check, instruction }
    }
}

impl From<Requirement> for RawRequirement {
    fn from(req: Requirement) -> Self {
        let mut raw = RawRequirement {
            kind: req.check.kind().to_string(),
            instruction: req.instruction,
            ..Self::default()
        };
        match req.check {
            RequirementCheck::FileFreshness { target } => raw.target = Some(target),
            RequirementCheck::FileExists { path, freshness } => {
                raw.path = Some(path);
                raw.freshness = freshness;
            }
            RequirementCheck::CommandLog { pattern }
            | RequirementCheck::RegexMatchOutput { pattern } => raw.pattern = Some(pattern),
            RequirementCheck::SubProtocolComplete { protocol_id } => {
                raw.protocol_id = Some(protocol_id);
            }
            RequirementCheck::Unsupported { .. } => {}
        }
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::{Requirement, RequirementCheck};

    #[test]
    fn parses_known_kinds() {
        let req: Requirement = serde_json::from_str(
            r#"{"type": "file_exists", "path": "docs/*.md", "freshness": true, "instruction": "write docs"}"#,
        )
        .unwrap();
        assert_eq!(
            req.check,
            RequirementCheck::FileExists {
                path: "docs/*.md".to_string(),
                freshness: true
            }
        );
        assert_eq!(req.instruction.as_deref(), Some("write docs"));
    }

    #[test]
    fn unknown_kind_is_unsupported_not_a_parse_error() {
        let req: Requirement =
            serde_json::from_str(r#"{"type": "telepathy", "target": "x"}"#).unwrap();
        match req.check {
            RequirementCheck::Unsupported { kind, reason } => {
                assert_eq!(kind, "telepathy");
                assert!(reason.contains("unknown requirement type"));
            }
            other => panic!("expected Unsupported, got {other:?}"),
        }
    }

    #[test]
    fn missing_field_is_unsupported() {
        let req: Requirement = serde_json::from_str(r#"{"type": "command_log"}"#).unwrap();
        assert!(matches!(
            req.check,
            RequirementCheck::Unsupported { ref reason, .. } if reason.contains("pattern")
        ));
        assert_eq!(req.kind(), "command_log");
    }

    #[test]
    fn serializes_back_to_document_shape() {
        let req = Requirement::new(RequirementCheck::SubProtocolComplete {
            protocol_id: "REVIEW".to_string(),
        });
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type": "sub_protocol_complete", "protocol_id": "REVIEW"})
        );
    }
}
