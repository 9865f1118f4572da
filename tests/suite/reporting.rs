//! `warden report`: interaction listing, drafts and compliance scoring.

use serde_json::json;

use crate::common::{Project, assert_failure, assert_success, stderr, stdout};

#[test]
fn report_without_journal_fails() {
    let project = Project::with_release_library();
    let out = project.warden(&["report"]);
    assert_failure(&out);
    assert!(stderr(&out).contains("journal"));
}

#[test]
fn interaction_report_marks_shadow_actions() {
    let project = Project::with_release_library();
    assert_success(&project.warden(&["init", "RELEASE", "Ship"]));
    assert_success(&project.warden(&["exec", "echo build"]));
    assert_success(&project.warden(&["exec", "true", "--justify", "probe"]));

    let out = project.warden(&["report"]);
    assert_success(&out);
    let text = stdout(&out);
    assert!(text.contains("[ECHO_BUILD] Command: echo build"));
    assert!(text.contains("[SHADOW] Command: true"));

    let out = project.warden(&["report", "--json"]);
    assert_success(&out);
    let report: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    let ids: Vec<&str> = report["claims"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["UNKNOWN", "ECHO_BUILD", "UNKNOWN"]);
}

#[test]
fn drafted_report_with_shadow_action_is_non_compliant() {
    let project = Project::with_release_library();
    assert_success(&project.warden(&["init", "RELEASE", "Ship"]));
    assert_success(&project.warden(&["exec", "echo build"]));
    assert_success(&project.warden(&["exec", "true", "--justify", "probe"]));

    assert_success(&project.warden(&["report", "--draft"]));
    let draft = project.read_json(&project.paths().engineer_report());
    assert_eq!(draft["objective"], "Ship");
    assert_eq!(draft["claims"].as_array().unwrap().len(), 3);

    let out = project.warden(&["report", "--compliance"]);
    assert_success(&out);
    let text = stdout(&out);
    assert!(text.contains("1 shadow actions detected"));
    assert!(text.contains("[MATCH] ECHO_BUILD"));
    assert!(text.contains("Status: NON-COMPLIANT"));
}

#[test]
fn substantiated_claims_are_compliant() {
    let project = Project::with_release_library();
    assert_success(&project.warden(&["init", "RELEASE", "Ship"]));
    assert_success(&project.warden(&["exec", "echo build"]));

    let input = project.path("claims.json");
    project.write_json(
        &input,
        &json!({"objective": "Ship", "claims": [{"id": "ECHO_BUILD", "command": "echo build"}]}),
    );
    let out = project.warden(&["report", "--compliance", "--input", input.to_str().unwrap()]);
    assert_success(&out);
    let text = stdout(&out);
    assert!(text.contains("Trust score: 100%"));
    assert!(text.contains("Compliance score: 10/10"));
    assert!(text.contains("Status: COMPLIANT"));
}

#[test]
fn compliance_requires_engineer_report() {
    let project = Project::with_release_library();
    assert_success(&project.warden(&["init", "RELEASE", "Ship"]));
    let out = project.warden(&["report", "--compliance"]);
    assert_failure(&out);
    assert!(stderr(&out).contains("engineer report"));
}
