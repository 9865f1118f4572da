//! `warden config` and settings flowing into the driver.

use std::fs;

use crate::common::{Project, assert_failure, assert_success, stdout};

#[test]
fn set_then_get_round_trips_through_local_file() {
    let project = Project::with_release_library();
    let local = project.paths().local_config();
    project.write(&local, "# gate tuning\n[gates]\ngrace_window_ms = 2000\n");

    assert_success(&project.warden(&["config", "set", "gates.grace_window_ms", "5000"]));
    let out = project.warden(&["config", "get", "gates.grace_window_ms"]);
    assert_success(&out);
    assert_eq!(stdout(&out).trim(), "5000");

    let text = fs::read_to_string(&local).unwrap();
    assert!(text.contains("# gate tuning"));
}

#[test]
fn path_points_at_local_config() {
    let project = Project::with_release_library();
    let out = project.warden(&["config", "path"]);
    assert_success(&out);
    assert!(stdout(&out).trim().ends_with("config.toml"));
}

#[test]
fn unknown_and_malformed_keys_fail() {
    let project = Project::with_release_library();
    assert_failure(&project.warden(&["config", "get", "gates.nothing"]));
    assert_failure(&project.warden(&["config", "get", "flat"]));
}

#[test]
fn configured_shell_runs_exec() {
    let project = Project::with_release_library();
    project.write(
        &project.paths().local_config(),
        "[exec]\nshell = \"sh\"\nshell_args = [\"-c\"]\n",
    );
    let out = project.warden(&["exec", "echo build from config"]);
    assert_success(&out);
    assert!(stdout(&out).contains("build from config"));
}
