//! `warden verify` snapshot, regression detection and restore.

use std::fs;

use serde_json::json;

use crate::common::{Project, assert_failure, assert_success, stderr, stdout};

#[test]
fn verify_without_snapshot_fails() {
    let project = Project::with_release_library();
    let out = project.warden(&["verify"]);
    assert_failure(&out);
    assert!(stderr(&out).to_lowercase().contains("snapshot"));
}

#[test]
fn snapshot_then_verify_reports_unchanged() {
    let project = Project::with_release_library();
    assert_success(&project.warden(&["verify", "--snapshot"]));

    let out = project.warden(&["verify"]);
    assert_success(&out);
    let text = stdout(&out);
    assert!(text.contains("[UNCHANGED] RELEASE"));
    assert!(text.contains("[UNCHANGED] HOTFIX"));
    assert!(text.contains("PASS"));
}

#[test]
fn dropped_requirement_is_a_regression_until_restored() {
    let project = Project::with_release_library();
    let target = project.paths().flat_protocols();
    let original = fs::read(&target).unwrap();
    assert_success(&project.warden(&["verify", "--snapshot"]));

    let mut doc = project.read_json(&target);
    doc["protocol_library"]["RELEASE"]["states"]["BUILD"]
        .as_object_mut()
        .unwrap()
        .remove("requirements");
    project.write_json(&target, &doc);

    let out = project.warden(&["verify", "--verify"]);
    assert_failure(&out);
    assert!(stdout(&out).contains("[MODIFIED REGRESSION] RELEASE"));

    assert_success(&project.warden(&["verify", "--restore"]));
    assert_eq!(fs::read(&target).unwrap(), original);
    assert_success(&project.warden(&["verify"]));
}

#[test]
fn dangling_registry_reference_fails_verification() {
    let project = Project::with_release_library();
    let target = project.paths().flat_protocols();
    let mut doc = project.read_json(&target);
    doc["protocol_library"]["HOTFIX"]["states"]["PATCH"]["description"] =
        json!("Produces DLR_PATCH_NOTES");
    project.write_json(&target, &doc);
    assert_success(&project.warden(&["verify", "--snapshot"]));

    let out = project.warden(&["verify"]);
    assert_failure(&out);
    assert!(stdout(&out).contains("DLR_PATCH_NOTES"));

    doc["deliverable_registry"] = json!([{"id": "DLR_PATCH_NOTES"}]);
    project.write_json(&target, &doc);
    assert_success(&project.warden(&["verify", "--snapshot"]));
    assert_success(&project.warden(&["verify"]));
}

#[test]
fn missing_component_fails_verification() {
    let project = Project::with_release_library();
    project.write_json(
        &project.paths().component_status(),
        &json!({"components": [{"name": "registry"}, {"name": "engine"}]}),
    );
    assert_success(&project.warden(&["verify", "--snapshot"]));

    let out = project.warden(&["verify"]);
    assert_failure(&out);
    assert!(stdout(&out).contains("MISSING: engine"));
}
