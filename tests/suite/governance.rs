//! `warden gov` edits and `warden library` manifest maintenance on a modular
//! library.

use std::fs;

use serde_json::json;

use crate::common::{
    Project, assert_failure, assert_success, hotfix_protocol, release_protocol, stderr, stdout,
};

fn modular_project() -> Project {
    let project = Project::new();
    let paths = project.paths();
    project.write_json(&paths.protocols_index(), &json!({"meta": {"version": "3"}}));
    project.write_json(&paths.protocols_dir().join("RELEASE.json"), &release_protocol());
    project
}

#[test]
fn add_writes_shard_and_refreshes_manifest() {
    let project = modular_project();
    let paths = project.paths();
    let source = project.path("hotfix.json");
    project.write_json(&source, &hotfix_protocol());

    let out = project.warden(&["gov", "add", "HOTFIX", source.to_str().unwrap()]);
    assert_success(&out);
    assert!(stdout(&out).contains("Added protocol 'HOTFIX'"));
    assert!(paths.protocols_dir().join("HOTFIX.json").exists());

    let manifest = project.read_json(&paths.library_manifest());
    assert_eq!(manifest["HOTFIX"]["version"], "0.1.0");
    assert_eq!(manifest["RELEASE"]["file"], "registry/protocols/RELEASE.json");

    let flat = project.read_json(&paths.flat_protocols());
    assert_eq!(flat["meta"]["version"], "3");
    assert!(flat["protocol_library"].get("HOTFIX").is_some());

    let out = project.warden(&["gov", "get"]);
    assert_success(&out);
    let ids: Vec<String> = stdout(&out).lines().map(ToString::to_string).collect();
    assert_eq!(ids, ["HOTFIX", "RELEASE"]);

    assert_success(&project.warden(&["library", "verify"]));
}

#[test]
fn invalid_protocol_is_rejected_without_writes() {
    let project = modular_project();
    let paths = project.paths();
    let source = project.path("broken.json");
    project.write_json(
        &source,
        &json!({
            "meta": {"title": "Broken"},
            "states": {"A": {"type": "initial", "transitions": {"go": "NOWHERE"}}}
        }),
    );

    let out = project.warden(&["gov", "add", "BROKEN", source.to_str().unwrap()]);
    assert_failure(&out);
    assert!(stderr(&out).contains("NOWHERE"));
    assert!(!paths.protocols_dir().join("BROKEN.json").exists());
    assert!(!paths.library_manifest().exists());

    let leftovers = fs::read_dir(paths.registry_dir())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(".warden-validate-"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn remove_deletes_shard() {
    let project = modular_project();
    let paths = project.paths();
    let source = project.path("hotfix.json");
    project.write_json(&source, &hotfix_protocol());
    assert_success(&project.warden(&["gov", "add", "HOTFIX", source.to_str().unwrap()]));

    assert_success(&project.warden(&["gov", "remove", "HOTFIX"]));
    assert!(!paths.protocols_dir().join("HOTFIX.json").exists());
    let manifest = project.read_json(&paths.library_manifest());
    assert!(manifest.get("HOTFIX").is_none());

    assert_failure(&project.warden(&["gov", "remove", "HOTFIX"]));
}

#[test]
fn library_verify_detects_fidelity_breach() {
    let project = modular_project();
    let paths = project.paths();
    assert_success(&project.warden(&["library", "sync"]));
    assert_success(&project.warden(&["library", "verify"]));

    let mut edited = release_protocol();
    edited["meta"]["version"] = json!("1.0.1");
    project.write_json(&paths.protocols_dir().join("RELEASE.json"), &edited);

    let out = project.warden(&["library", "verify"]);
    assert_failure(&out);
    assert!(stdout(&out).contains("FIDELITY BREACH"));
}

#[test]
fn validate_reports_without_writing() {
    let project = Project::with_release_library();
    let before = fs::read(project.paths().flat_protocols()).unwrap();
    let out = project.warden(&["gov", "validate"]);
    assert_success(&out);
    assert!(stdout(&out).contains("Validation passed"));
    assert_eq!(fs::read(project.paths().flat_protocols()).unwrap(), before);
}

#[test]
fn get_prints_protocol_document() {
    let project = Project::with_release_library();
    let out = project.warden(&["gov", "get", "HOTFIX"]);
    assert_success(&out);
    let doc: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(doc["meta"]["title"], "Hotfix");
    assert_failure(&project.warden(&["gov", "get", "MISSING"]));
}
