//! Shared test utilities and fixtures
//!
//! Each test gets its own project root in a temp directory and drives the
//! built `warden` binary against it.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::{Value, json};
use tempfile::TempDir;
use warden_config::WardenPaths;

const ISOLATED_VARS: [&str; 7] = [
    "WARDEN_TARGET",
    "WARDEN_STATE_DIR",
    "WARDEN_STATE_PATH",
    "WARDEN_LOG_PATH",
    "WARDEN_AUDIT_PATH",
    "PROTOCOL_PATH",
    "RUST_LOG",
];

/// A throwaway project root with a `.warden` marker.
pub struct Project {
    dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp project");
        fs::create_dir_all(dir.path().join(".warden")).expect("create marker dir");
        Self { dir }
    }

    /// A project whose flat library is [`release_library`].
    pub fn with_release_library() -> Self {
        let project = Self::new();
        project.write_json(&project.paths().flat_protocols(), &release_library());
        project.write_json(&project.paths().intent_patterns(), &intent_patterns());
        project
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn paths(&self) -> WardenPaths {
        WardenPaths::from_root(self.root())
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub fn write(&self, path: &Path, text: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(path, text).expect("write file");
    }

    pub fn write_json(&self, path: &Path, value: &Value) {
        self.write(path, &serde_json::to_string_pretty(value).expect("encode json"));
    }

    pub fn read_json(&self, path: &Path) -> Value {
        serde_json::from_slice(&fs::read(path).expect("read file")).expect("parse json")
    }

    /// Runs the binary from the project root with a clean environment.
    pub fn warden(&self, args: &[&str]) -> Output {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_warden"));
        cmd.args(args)
            .current_dir(self.root())
            .env("WARDEN_ROOT", self.root())
            .env("HOME", self.root());
        for var in ISOLATED_VARS {
            cmd.env_remove(var);
        }
        cmd.output().expect("run warden binary")
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[track_caller]
pub fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "expected success\nstdout:\n{}\nstderr:\n{}",
        stdout(output),
        stderr(output)
    );
}

#[track_caller]
pub fn assert_failure(output: &Output) {
    assert!(
        !output.status.success(),
        "expected failure\nstdout:\n{}\nstderr:\n{}",
        stdout(output),
        stderr(output)
    );
}

pub fn release_protocol() -> Value {
    json!({
        "meta": {"title": "Release", "version": "1.0.0"},
        "states": {
            "DRAFT": {
                "type": "initial",
                "description": "Write release notes.",
                "requirements": {
                    "notes": {
                        "type": "file_exists",
                        "path": "NOTES.md",
                        "instruction": "Write NOTES.md"
                    }
                },
                "transitions": {
                    "submit": {"target": "BUILD", "gates": ["notes"]}
                }
            },
            "BUILD": {
                "requirements": {
                    "built": {"type": "command_log", "pattern": "echo build"}
                },
                "transitions": {"ship": "DONE"}
            },
            "DONE": {"type": "terminal"}
        }
    })
}

pub fn hotfix_protocol() -> Value {
    json!({
        "meta": {"title": "Hotfix", "version": "0.1.0", "audit_scope": "parent"},
        "states": {
            "PATCH": {"type": "initial", "transitions": {"done": "CLOSED"}},
            "CLOSED": {"type": "terminal"}
        }
    })
}

pub fn release_library() -> Value {
    json!({
        "meta": {"version": "1"},
        "protocol_library": {
            "RELEASE": release_protocol(),
            "HOTFIX": hotfix_protocol()
        }
    })
}

pub fn intent_patterns() -> Value {
    json!({
        "patterns": [
            {"id": "ECHO_BUILD", "regex": "^echo build", "intent": {"tool": "echo"}},
            {"id": "ECHO_DELIVERABLE", "regex": "^echo (DLR_\\w+)", "intent": {"tool": "echo", "deliverable": "$1"}}
        ]
    })
}
