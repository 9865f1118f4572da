//! Filesystem layout.
//!
//! Two roots are tracked. The warden root holds the registries (protocol
//! library, deliverables, intent patterns). The target is the governed
//! project: session state lives under `<target>/.warden/state` and relative
//! requirement paths resolve against it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const ENV_ROOT: &str = "WARDEN_ROOT";
pub const ENV_TARGET: &str = "WARDEN_TARGET";
pub const ENV_STATE_DIR: &str = "WARDEN_STATE_DIR";
pub const ENV_STATE_PATH: &str = "WARDEN_STATE_PATH";
pub const ENV_LOG_PATH: &str = "WARDEN_LOG_PATH";
pub const ENV_AUDIT_PATH: &str = "WARDEN_AUDIT_PATH";
pub const ENV_PROTOCOL_PATH: &str = "PROTOCOL_PATH";

const MARKER_DIR: &str = ".warden";

/// Session files for one state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFiles {
    pub stack: PathBuf,
    pub journal: PathBuf,
    pub audit: PathBuf,
}

impl SessionFiles {
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            stack: dir.join("active.json"),
            journal: dir.join("session.log"),
            audit: dir.join("internal_audit.json"),
        }
    }

    /// Isolated files for dry runs. Never shares a path with the live session.
    #[must_use]
    pub fn sandbox_in(dir: &Path) -> Self {
        Self {
            stack: dir.join("sandbox.json"),
            journal: dir.join("sandbox.log"),
            audit: dir.join("sandbox_audit.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WardenPaths {
    root: PathBuf,
    target: PathBuf,
    state_dir: PathBuf,
    session: SessionFiles,
    protocol_override: Option<PathBuf>,
}

impl WardenPaths {
    /// Layout rooted at `root` for both registries and session state, with no
    /// environment overrides.
    #[must_use]
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self::with_target(root.clone(), root)
    }

    #[must_use]
    pub fn with_target(root: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let target = target.into();
        let state_dir = target.join(MARKER_DIR).join("state");
        Self {
            session: SessionFiles::in_dir(&state_dir),
            root,
            target,
            state_dir,
            protocol_override: None,
        }
    }

    /// Resolves the layout from the process environment and working directory.
    #[must_use]
    pub fn discover() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::discover_with(|key| std::env::var_os(key), &cwd)
    }

    /// Resolution with an injected environment lookup.
    ///
    /// The root is `WARDEN_ROOT` when it exists, else the nearest ancestor of
    /// `cwd` holding a `.warden` directory, else `cwd`. The target is
    /// `WARDEN_TARGET`, else the root. File-level overrides win over
    /// `WARDEN_STATE_DIR`.
    pub fn discover_with<F>(env: F, cwd: &Path) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let var = |key: &str| env(key).filter(|v| !v.is_empty()).map(PathBuf::from);

        let root = var(ENV_ROOT)
            .filter(|p| p.exists())
            .or_else(|| find_marked_ancestor(cwd))
            .unwrap_or_else(|| cwd.to_path_buf());
        let target = var(ENV_TARGET).unwrap_or_else(|| root.clone());

        let mut paths = Self::with_target(root, target);
        if let Some(dir) = var(ENV_STATE_DIR) {
            paths.session = SessionFiles::in_dir(&dir);
            paths.state_dir = dir;
        }
        if let Some(stack) = var(ENV_STATE_PATH) {
            paths.session.stack = stack;
        }
        if let Some(journal) = var(ENV_LOG_PATH) {
            paths.session.journal = journal;
        }
        if let Some(audit) = var(ENV_AUDIT_PATH) {
            paths.session.audit = audit;
        }
        paths.protocol_override = var(ENV_PROTOCOL_PATH);
        paths
    }

    #[must_use]
    pub fn with_protocol_override(mut self, path: impl Into<PathBuf>) -> Self {
        self.protocol_override = Some(path.into());
        self
    }

    /// The same layout with session files swapped for their sandbox copies.
    #[must_use]
    pub fn sandboxed(&self) -> Self {
        let mut paths = self.clone();
        paths.session = SessionFiles::sandbox_in(&self.state_dir);
        paths
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    #[must_use]
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    #[must_use]
    pub fn session(&self) -> &SessionFiles {
        &self.session
    }

    #[must_use]
    pub fn protocol_override(&self) -> Option<&Path> {
        self.protocol_override.as_deref()
    }

    #[must_use]
    pub fn registry_dir(&self) -> PathBuf {
        self.root.join("registry")
    }

    #[must_use]
    pub fn flat_protocols(&self) -> PathBuf {
        self.registry_dir().join("protocols.json")
    }

    #[must_use]
    pub fn protocols_dir(&self) -> PathBuf {
        self.registry_dir().join("protocols")
    }

    #[must_use]
    pub fn protocols_index(&self) -> PathBuf {
        self.protocols_dir().join("index.json")
    }

    #[must_use]
    pub fn library_manifest(&self) -> PathBuf {
        self.registry_dir().join("library_manifest.json")
    }

    #[must_use]
    pub fn deliverables(&self) -> PathBuf {
        self.registry_dir().join("deliverables.json")
    }

    #[must_use]
    pub fn compliance(&self) -> PathBuf {
        self.registry_dir().join("compliance.json")
    }

    #[must_use]
    pub fn intent_patterns(&self) -> PathBuf {
        self.registry_dir().join("intent_patterns.json")
    }

    #[must_use]
    pub fn component_status(&self) -> PathBuf {
        self.registry_dir().join("status.json")
    }

    #[must_use]
    pub fn protocol_schema(&self) -> PathBuf {
        self.registry_dir().join("schema").join("protocol.schema.json")
    }

    /// The document the integrity verifier snapshots: `PROTOCOL_PATH` or the
    /// flat aggregate.
    #[must_use]
    pub fn integrity_target(&self) -> PathBuf {
        self.protocol_override
            .clone()
            .unwrap_or_else(|| self.flat_protocols())
    }

    #[must_use]
    pub fn engineer_report(&self) -> PathBuf {
        self.target.join(MARKER_DIR).join("engineer_report.json")
    }

    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.root.join(MARKER_DIR).join("logs")
    }

    #[must_use]
    pub fn local_config(&self) -> PathBuf {
        self.root.join(MARKER_DIR).join("config.toml")
    }

    /// Resolves a requirement path against the target project.
    #[must_use]
    pub fn resolve_target(&self, rel: &str) -> PathBuf {
        self.target.join(rel)
    }
}

fn find_marked_ancestor(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(MARKER_DIR).is_dir())
        .map(Path::to_path_buf)
}

/// `<file>.integrity.snapshot.json` beside `file`.
#[must_use]
pub fn snapshot_path(file: &Path) -> PathBuf {
    sibling_with_suffix(file, ".integrity.snapshot.json")
}

/// `<file>.baseline` beside `file`.
#[must_use]
pub fn baseline_path(file: &Path) -> PathBuf {
    sibling_with_suffix(file, ".baseline")
}

fn sibling_with_suffix(file: &Path, suffix: &str) -> PathBuf {
    let mut name = file.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    file.with_file_name(name)
}
