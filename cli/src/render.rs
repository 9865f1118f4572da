//! Plain-text rendering of engine outcomes.
//!
//! Everything here writes to stdout, which operators and agents parse. Logs
//! go to the log file, never here.

use warden_engine::{
    ComplianceOutcome, ComponentAudit, DraftOutcome, ExecOutcome, FileCheck, InitOutcome,
    LibraryVerification, NextOutcome, SnapshotOutcome, StatusReport, SyncReport,
    ValidationReport, VerifyReport,
};
use warden_types::{Banner, EnterInteraction, JournalEntry};

const RULE: &str = "====================================================";
const RESULT_PREVIEW: usize = 80;

fn header(title: &str) {
    println!("\n{RULE}");
    println!("      WARDEN GOVERNANCE: {title}");
    println!("{RULE}\n");
}

pub fn idle() {
    println!("[WARDEN] IDLE: no active governance cycle.");
}

pub fn status(report: &StatusReport) {
    println!(
        "[WARDEN] {} v{} ({})",
        report.title, report.version, report.protocol_id
    );
    println!("Objective: {}", report.objective);
    println!(
        "State: {}  |  Depth: {}  |  Events: {}",
        report.current_state, report.depth, report.events
    );
    if let Some(description) = &report.description {
        println!("{description}");
    }

    if !report.requirements.is_empty() {
        println!("\nRequirements:");
        for req in &report.requirements {
            match req.verdict.reason() {
                None => println!("  [PASS] {} ({})", req.id, req.kind),
                Some(reason) => println!("  [FAIL] {} ({}): {reason}", req.id, req.kind),
            }
        }
    }

    if !report.transitions.is_empty() {
        println!("\nTransitions:");
        for t in &report.transitions {
            if t.gates.is_empty() {
                println!("  {} -> {}", t.trigger, t.target);
            } else {
                println!("  {} -> {} [gates: {}]", t.trigger, t.target, t.gates.join(", "));
            }
        }
    }

    match &report.next_action {
        Some(action) => println!("\nNext action: {action}"),
        None => println!("\nNext action: all requirements satisfied."),
    }
}

pub fn init(outcome: &InitOutcome) {
    println!(
        "[WARDEN] Initialized {} ({}) at '{}', depth {}.",
        outcome.title, outcome.protocol_id, outcome.initial_state, outcome.depth
    );
    println!();
    status(&outcome.status);
}

fn halt(interaction: &EnterInteraction) {
    let label = match interaction.banner {
        Some(Banner::StopRequired) => "STOP REQUIRED",
        Some(Banner::AuditMode) => "AUDIT MODE",
        Some(Banner::Info | Banner::Other) | None => "NOTICE",
    };
    println!("\n[{label}]");
    if let Some(instruction) = &interaction.instruction {
        println!("{instruction}");
    }
    if let Some(topic) = &interaction.oracle_topic {
        println!("Topic: {topic}");
    }
    println!("[TURN BOUNDARY] Halting until the director responds.");
}

pub fn next(outcome: &NextOutcome) {
    println!(
        "[WARDEN] {} -> {} via '{}'.",
        outcome.from, outcome.to, outcome.trigger
    );
    if let Some(interaction) = &outcome.halt {
        halt(interaction);
    } else if let Some(report) = &outcome.status {
        println!();
        status(report);
    }
}

pub fn exec(outcome: &ExecOutcome) {
    match &outcome.intent {
        Some(intent) => println!("[WARDEN] Intent {} ({})", intent.id, outcome.protocol_id),
        None => println!(
            "[WARDEN] Shadow action logged ({}): {}",
            outcome.protocol_id,
            outcome.justification.as_deref().unwrap_or_default()
        ),
    }
    let combined = outcome.output.combined();
    if !combined.is_empty() {
        print!("{combined}");
        if !combined.ends_with('\n') {
            println!();
        }
    }
    for line in &outcome.deliverables {
        println!("{line}");
    }
}

pub fn closed(protocol_id: &str, remaining: usize, parent: Option<&StatusReport>) {
    if remaining == 0 {
        println!("[WARDEN] Closed {protocol_id}. Session archived, now IDLE.");
        return;
    }
    println!("[WARDEN] Closed {protocol_id}. Returning to parent (depth {remaining}).");
    if let Some(report) = parent {
        println!();
        status(report);
    }
}

pub fn snapshot(outcome: &SnapshotOutcome) {
    if let Some(sync) = &outcome.synced {
        library_sync(sync);
    }
    println!(
        "[INTEGRITY] Snapshot of {} protocols captured from {}.",
        outcome.signatures.len(),
        outcome.target.display()
    );
    println!("  snapshot: {}", outcome.snapshot.display());
    println!("  baseline: {}", outcome.baseline.display());
}

fn components(audit: &ComponentAudit) {
    match audit {
        ComponentAudit::Skipped { path } => {
            println!("[COMPONENTS] No inventory at {}, skipped.", path.display());
        }
        ComponentAudit::Checked(checks) => {
            for check in checks {
                let mark = if check.present { "OK" } else { "MISSING" };
                println!("[COMPONENTS] {mark}: {}", check.name);
            }
        }
    }
}

pub fn verify(report: &VerifyReport) {
    println!("[INTEGRITY] Verifying {}", report.target.display());
    if !report.schema_errors.is_empty() {
        println!("[SCHEMA] Validation failed:");
        for error in &report.schema_errors {
            println!("  - {error}");
        }
        return;
    }
    for change in &report.changes {
        let flag = if change.regression { " REGRESSION" } else { "" };
        println!("  [{}{flag}] {}", change.kind.as_str(), change.id);
    }
    for finding in &report.findings {
        println!("  {finding}");
    }
    if let Some(audit) = &report.components {
        components(audit);
    }
    if let Some(library) = &report.library {
        library_verify(library);
    }
    if report.passed() {
        println!("[INTEGRITY] PASS");
    } else {
        println!("[INTEGRITY] FAIL");
    }
}

pub fn library_sync(report: &SyncReport) {
    for (id, entry) in &report.manifest {
        println!("  [SYNC] {id} v{} ({})", entry.version, entry.file);
    }
    println!(
        "[LIBRARY] Manifest written to {} ({} protocols).",
        report.manifest_path.display(),
        report.manifest.len()
    );
}

pub fn library_verify(verification: &LibraryVerification) {
    for check in &verification.checks {
        match &check.result {
            FileCheck::Verified => println!("  [VERIFIED] {} ({})", check.id, check.file),
            FileCheck::Missing => println!("  [MISSING] {} ({})", check.id, check.file),
            FileCheck::Breach { expected, actual } => println!(
                "  [FIDELITY BREACH] {} ({}): expected {expected}, found {actual}",
                check.id, check.file
            ),
        }
    }
}

pub fn validation(report: &ValidationReport) {
    for error in &report.schema_errors {
        println!("  [SCHEMA] {error}");
    }
    for finding in &report.findings {
        println!("  {finding}");
    }
    if report.passed() {
        println!("[GOV] Validation passed.");
    } else {
        println!("[GOV] Validation failed.");
    }
}

fn preview(output: &str) -> String {
    let first = output.trim().lines().next().unwrap_or_default();
    if first.is_empty() {
        return "No output recorded.".to_string();
    }
    if first.chars().count() > RESULT_PREVIEW {
        let cut: String = first.chars().take(RESULT_PREVIEW).collect();
        format!("{cut}...")
    } else {
        first.to_string()
    }
}

fn clock(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp)
        .map_or_else(|| timestamp.to_string(), |t| t.format("%H:%M:%S%.3f").to_string())
}

pub fn interactions(entries: &[JournalEntry]) {
    header("INTERACTION REPORT");
    for (idx, entry) in entries.iter().enumerate() {
        let intent = entry
            .intent
            .as_ref()
            .map_or_else(|| "[SHADOW]".to_string(), |i| format!("[{}]", i.id));
        println!(
            "{}. [{}] {intent} Command: {}",
            idx + 1,
            clock(entry.timestamp),
            entry.command
        );
        println!("   Result: {}", preview(&entry.output));
    }
    println!("\n{RULE}");
}

pub fn draft(outcome: &DraftOutcome) {
    if outcome.window.parent_scoped {
        println!("[WARDEN] Deep audit active: scope shifted to parent cycle.");
    }
    println!(
        "[Success] Audit draft with {} claims generated: {}",
        outcome.report.claims.len(),
        outcome.path.display()
    );
}

pub fn compliance(outcome: &ComplianceOutcome) {
    if outcome.window.parent_scoped {
        println!("[WARDEN] Deep audit active: scope shifted to parent cycle.");
    }
    let report = &outcome.report;
    header("COMPLIANCE REPORT");
    if report.shadow_actions == 0 {
        println!("  [PASS] All cycle actions mapped to canonical intents.");
    } else {
        println!("  [WARN] {} shadow actions detected.", report.shadow_actions);
    }
    if report.audit_trail_present {
        println!("  [PASS] Internal audit trail reconciled.");
    } else {
        println!("  [WARN] No internal audit trail.");
    }
    println!();
    for verdict in &report.verdicts {
        let mark = if verdict.matched { "MATCH" } else { "OMISSION" };
        println!(
            "  [{mark}] {} (\"{}\")",
            verdict.claim.label(),
            verdict.claim.command
        );
    }
    println!("Trust score: {}%", report.trust_score);
    println!("\nCompliance score: {}/10", report.score);
    let verdict = if report.is_compliant() {
        "COMPLIANT"
    } else {
        "NON-COMPLIANT"
    };
    println!("Status: {verdict}");
    for point in &report.friction {
        println!("  friction: {point}");
    }
    println!("\n{RULE}");
}

#[cfg(test)]
mod tests {
    use super::{clock, preview};

    #[test]
    fn preview_takes_first_line_and_truncates() {
        assert_eq!(preview(""), "No output recorded.");
        assert_eq!(preview("  one\ntwo"), "one");
        let long = "x".repeat(100);
        let shown = preview(&long);
        assert_eq!(shown.len(), 83);
        assert!(shown.ends_with("..."));
    }

    #[test]
    fn clock_shows_time_of_day() {
        assert_eq!(clock(1_500), "00:00:01.500");
    }
}
