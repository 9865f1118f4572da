//! Driver lifecycle through the binary: init, gated transitions, exec and
//! close against on-disk session files.

use std::fs;

use crate::common::{Project, assert_failure, assert_success, stderr, stdout};

#[test]
fn status_is_idle_without_a_session() {
    let project = Project::with_release_library();
    let out = project.warden(&["status"]);
    assert_success(&out);
    assert!(stdout(&out).contains("IDLE"));
}

#[test]
fn full_cycle_from_init_to_close() {
    let project = Project::with_release_library();
    let session = project.paths().session().clone();

    let out = project.warden(&["init", "RELEASE", "Ship 1.0"]);
    assert_success(&out);
    assert!(stdout(&out).contains("DRAFT"));
    assert!(stdout(&out).contains("Write NOTES.md"));
    assert!(session.stack.exists());

    let before = fs::read(&session.stack).unwrap();
    let out = project.warden(&["next"]);
    assert_failure(&out);
    assert!(stderr(&out).contains("notes"));
    assert_eq!(fs::read(&session.stack).unwrap(), before);

    project.write(&project.path("NOTES.md"), "# 1.0\n");
    let out = project.warden(&["next", "submit"]);
    assert_success(&out);
    assert!(stdout(&out).contains("DRAFT -> BUILD"));

    let out = project.warden(&["close"]);
    assert_failure(&out);
    assert!(stderr(&out).contains("built"));

    let out = project.warden(&["exec", "echo build ok"]);
    assert_success(&out);
    assert!(stdout(&out).contains("ECHO_BUILD"));
    assert!(stdout(&out).contains("build ok"));

    let out = project.warden(&["close"]);
    assert_success(&out);
    assert!(stdout(&out).contains("IDLE"));
    assert!(!session.stack.exists());
    assert!(!session.journal.exists());
    assert!(!session.audit.exists());
}

#[test]
fn unknown_trigger_lists_available_transitions() {
    let project = Project::with_release_library();
    assert_success(&project.warden(&["init", "RELEASE", "Ship"]));
    let out = project.warden(&["next", "teleport"]);
    assert_failure(&out);
    assert!(stderr(&out).contains("submit"));
}

#[test]
fn unclassified_exec_needs_justification() {
    let project = Project::with_release_library();
    let journal = project.paths().session().journal.clone();

    let out = project.warden(&["exec", "ls"]);
    assert_failure(&out);
    assert!(stderr(&out).contains("intent"));
    assert!(!journal.exists());

    let out = project.warden(&["exec", "ls", "--justify", "inspect the tree"]);
    assert_success(&out);
    assert!(stdout(&out).contains("Shadow action"));

    let text = fs::read_to_string(&journal).unwrap();
    let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(first["source"], "shadow_action");
    assert_eq!(first["protocol"], "none");
    assert_eq!(first["justification"], "inspect the tree");
}

#[test]
fn nested_close_returns_to_parent() {
    let project = Project::with_release_library();
    assert_success(&project.warden(&["init", "RELEASE", "Ship"]));
    let out = project.warden(&["init", "HOTFIX", "Patch"]);
    assert_success(&out);
    assert!(stdout(&out).contains("depth 2"));

    let out = project.warden(&["close"]);
    assert_success(&out);
    assert!(stdout(&out).contains("depth 1"));
    assert!(stdout(&out).contains("DRAFT"));

    let stack = project.read_json(&project.paths().session().stack);
    assert_eq!(stack.as_array().unwrap().len(), 1);
    assert_eq!(stack[0]["protocol_id"], "RELEASE");
}

#[test]
fn init_rejects_unknown_protocol() {
    let project = Project::with_release_library();
    let out = project.warden(&["init", "NOPE", "Anything"]);
    assert_failure(&out);
    assert!(stderr(&out).contains("NOPE"));
    assert!(!project.paths().session().stack.exists());
}

#[test]
fn sandbox_leaves_live_session_untouched() {
    let project = Project::with_release_library();
    let out = project.warden(&["sandbox", "RELEASE"]);
    assert_success(&out);
    assert!(stdout(&out).contains("Sandbox Session"));

    let sandbox = project.paths().sandboxed();
    assert!(sandbox.session().stack.exists());
    assert!(!project.paths().session().stack.exists());
}
