//! Compliance analysis: reconciling an operator's claimed commands with the
//! journal.
//!
//! Claims are matched against recorded entries by exact intent id first and
//! by fuzzy command comparison otherwise. Fuzzy comparison normalizes the
//! tool name (interpreter wrapper and extension stripped) and compares
//! sanitized text: quotes, backslashes and commas removed, whitespace
//! collapsed, lowercased.

use std::path::Path;

use serde::{Deserialize, Serialize};
use warden_types::{AuditScope, EntrySource, Intent, JournalEntry, ProtocolStack};

const UNKNOWN: &str = "unknown";
const UNKNOWN_ID: &str = "UNKNOWN";
/// Entries this far before the audit start still count. Absorbs the gap
/// between the frame timestamp and the first journal append.
const SINCE_SLACK_MS: i64 = 100;
const TRUST_THRESHOLD: u32 = 90;
const COMPLIANT_SCORE: u32 = 8;
const CHECK_COUNT: u32 = 3;
const WRAPPERS: [&str; 3] = ["node ", "bash ", "sh "];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl Claim {
    #[must_use]
    pub fn label(&self) -> &str {
        self.id.as_deref().unwrap_or("Manual")
    }
}

/// What the operator says they did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineerReport {
    pub objective: String,
    #[serde(default)]
    pub claims: Vec<Claim>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedCommand {
    pub tool: String,
    pub args: Vec<String>,
    pub original: String,
}

#[must_use]
pub fn normalize_command(cmd: &str) -> NormalizedCommand {
    let mut clean = cmd.trim();
    for wrapper in WRAPPERS {
        if let Some(rest) = clean.strip_prefix(wrapper) {
            clean = rest.trim();
            break;
        }
    }
    let mut parts = clean.split(' ');
    let first = parts.next().unwrap_or_default();
    let tool = match tool_name(first) {
        name if name == "echo" => "manual_echo".to_string(),
        name if name.is_empty() => UNKNOWN.to_string(),
        name => name,
    };
    NormalizedCommand {
        tool,
        args: parts.map(ToString::to_string).collect(),
        original: clean.to_string(),
    }
}

fn tool_name(token: &str) -> String {
    Path::new(token)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[must_use]
pub fn sanitize(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '\\' | ','))
        .collect();
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Whether any journal entry since `since` substantiates `claim`.
#[must_use]
pub fn match_claim(claim: &Claim, entries: &[JournalEntry], since: i64) -> bool {
    let claim_tool = claim
        .tool
        .as_deref()
        .map_or_else(|| UNKNOWN.to_string(), tool_name);
    let claim_cmd = sanitize(&claim.command);
    let claim_args: Vec<String> = claim
        .args
        .iter()
        .map(|a| sanitize(a))
        .filter(|a| !a.is_empty())
        .collect();
    let wanted_id = claim.id.as_deref().filter(|id| *id != UNKNOWN_ID);

    entries.iter().any(|entry| {
        if entry.is_result() || entry.timestamp < since - SINCE_SLACK_MS {
            return false;
        }
        if let (Some(intent), Some(id)) = (&entry.intent, wanted_id)
            && intent.id == id
        {
            return true;
        }

        let normalized = normalize_command(&entry.command);
        let recorded = sanitize(&normalized.original);
        let tool_match = normalized.tool == claim_tool
            || (claim_tool == UNKNOWN && normalized.tool == EntrySource::System.as_str());
        if !tool_match {
            return false;
        }
        let cmd_match = if normalized.tool == "warden" || normalized.tool == "manual_echo" {
            claim_cmd.split(' ').all(|word| recorded.contains(word))
        } else {
            recorded.contains(&claim_cmd)
        };
        cmd_match && claim_args.iter().all(|arg| recorded.contains(arg.as_str()))
    })
}

/// Start of the audited window: the top frame's start time, or its parent's
/// when the protocol audits at parent scope. Zero when idle.
#[must_use]
pub fn audit_since(stack: &ProtocolStack, scope: AuditScope) -> i64 {
    let Some(top) = stack.top() else {
        return 0;
    };
    match (scope, stack.parent()) {
        (AuditScope::Parent, Some(parent)) => parent.start_time,
        _ => top.start_time,
    }
}

/// Draft claims from the current cycle's entries.
#[must_use]
pub fn draft_report(objective: Option<&str>, entries: &[JournalEntry], since: i64) -> EngineerReport {
    let claims = entries
        .iter()
        .filter(|e| e.timestamp >= since && !e.is_result())
        .map(|e| match &e.intent {
            Some(intent) => Claim {
                id: Some(intent.id.clone()),
                command: e.command.clone(),
                tool: intent
                    .fields
                    .get("tool")
                    .and_then(|v| v.as_str())
                    .map(ToString::to_string),
                args: Vec::new(),
            },
            None => Claim {
                id: Some(UNKNOWN_ID.to_string()),
                command: e.command.clone(),
                tool: Some(UNKNOWN.to_string()),
                args: Vec::new(),
            },
        })
        .collect();
    EngineerReport {
        objective: objective.unwrap_or("System interaction audit").to_string(),
        claims,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractionClaim {
    pub id: String,
    pub command: String,
    pub intent: Option<Intent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractionReport {
    pub objective: String,
    pub claims: Vec<InteractionClaim>,
}

/// Every operator-driven entry as a claim, for machine consumption.
#[must_use]
pub fn interaction_report(entries: &[JournalEntry]) -> InteractionReport {
    let claims = entries
        .iter()
        .filter(|e| {
            matches!(
                e.source,
                EntrySource::AgentExec
                    | EntrySource::ManualInit
                    | EntrySource::ManualTransition
                    | EntrySource::ManualClose
                    | EntrySource::ShadowAction
            ) && !e.is_result()
        })
        .map(|e| InteractionClaim {
            id: e
                .intent
                .as_ref()
                .map_or_else(|| UNKNOWN_ID.to_string(), |i| i.id.clone()),
            command: e.command.clone(),
            intent: e.intent.clone(),
        })
        .collect();
    InteractionReport {
        objective: "System interaction audit".to_string(),
        claims,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimVerdict {
    pub claim: Claim,
    pub matched: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceReport {
    pub since: i64,
    pub shadow_actions: usize,
    pub audit_trail_present: bool,
    pub verdicts: Vec<ClaimVerdict>,
    pub trust_score: u32,
    pub passed_checks: u32,
    pub score: u32,
    pub friction: Vec<String>,
}

impl ComplianceReport {
    #[must_use]
    pub fn is_compliant(&self) -> bool {
        self.score >= COMPLIANT_SCORE
    }
}

/// Scores three checks: no shadow actions since `since`, an audit trail
/// exists, and at least 90% of claims are substantiated.
#[must_use]
pub fn analyze_compliance(
    report: &EngineerReport,
    entries: &[JournalEntry],
    since: i64,
    audit_trail_present: bool,
) -> ComplianceReport {
    let mut passed_checks = 0;
    let mut friction = Vec::new();

    let shadow_actions = entries
        .iter()
        .filter(|e| e.timestamp >= since && e.source == EntrySource::ShadowAction)
        .count();
    if shadow_actions == 0 {
        passed_checks += 1;
    } else {
        friction.push(format!("{shadow_actions} shadow actions."));
    }

    if audit_trail_present {
        passed_checks += 1;
    }

    let verdicts: Vec<ClaimVerdict> = report
        .claims
        .iter()
        .map(|claim| ClaimVerdict {
            matched: match_claim(claim, entries, since),
            claim: claim.clone(),
        })
        .collect();
    for verdict in verdicts.iter().filter(|v| !v.matched) {
        friction.push(format!("Unverified: {}", verdict.claim.label()));
    }
    let matched = verdicts.iter().filter(|v| v.matched).count();
    let trust_score = if verdicts.is_empty() {
        0
    } else {
        (matched as f64 / verdicts.len() as f64 * 100.0).round() as u32
    };
    if trust_score >= TRUST_THRESHOLD {
        passed_checks += 1;
    }

    let score = (f64::from(passed_checks) / f64::from(CHECK_COUNT) * 10.0).round() as u32;
    ComplianceReport {
        since,
        shadow_actions,
        audit_trail_present,
        verdicts,
        trust_score,
        passed_checks,
        score,
        friction,
    }
}
