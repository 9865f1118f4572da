//! Protocol integrity verification.
//!
//! Two composed checks run over the loaded library:
//!
//! 1. **Regression detection**: each protocol's raw definition is hashed and
//!    counted, then compared with the last snapshot. A modified protocol that
//!    lost states or requirements is a regression; so is a removed one.
//! 2. **Structural integrity**: transition targets, gate names, initial-state
//!    markers, `DLR_`/`CMP_` references and the component inventory.
//!
//! `verify` never writes. `snapshot` and `restore` are the only operations
//! that touch the snapshot, baseline and target files.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use warden_config::{WardenPaths, baseline_path, snapshot_path};
use warden_core::{ProtocolLibrary, RegistryError, load_library};
use warden_types::{
    InitialStateError, IntegritySignature, ProtocolDefinition, RequirementCheck,
};

use crate::library::{LibraryVerification, SyncReport, sync_library, verify_library};
use crate::schema::{SchemaError, SchemaValidator};

pub const GLOBAL_REGISTRIES: &str = "_GLOBAL_REGISTRIES";
const GLOBAL_VERSION: &str = "0.0.0";

static REFERENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(DLR|CMP)_[A-Z0-9_]+").expect("valid reference regex"));

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("failed to access {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("malformed JSON in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("verification target missing: {}", path.display())]
    NoTarget { path: PathBuf },
    #[error("no integrity snapshot at {}; run `warden verify --snapshot` first", path.display())]
    NoSnapshot { path: PathBuf },
    #[error("no baseline at {}", path.display())]
    NoBaseline { path: PathBuf },
    #[error("library index missing: {}", path.display())]
    NoIndex { path: PathBuf },
    #[error("library manifest missing at {}; run `warden library sync` first", path.display())]
    NoManifest { path: PathBuf },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

pub(crate) fn read_bytes(path: &Path) -> Result<Vec<u8>, IntegrityError> {
    fs::read(path).map_err(|source| IntegrityError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn read_json(path: &Path) -> Result<Value, IntegrityError> {
    serde_json::from_slice(&read_bytes(path)?).map_err(|source| IntegrityError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub type Signatures = BTreeMap<String, IntegritySignature>;

#[must_use]
pub fn protocol_signature(raw: &Value, definition: &ProtocolDefinition) -> IntegritySignature {
    IntegritySignature {
        hash: warden_utils::sha256_hex(raw.to_string().as_bytes()),
        version: definition.meta.version.clone(),
        state_count: definition.state_count(),
        requirement_count: definition.requirement_count(),
    }
}

/// One signature per protocol plus [`GLOBAL_REGISTRIES`] for the deliverable
/// and compliance registries.
#[must_use]
pub fn signatures(library: &ProtocolLibrary) -> Signatures {
    let mut sigs: Signatures = library
        .protocols
        .iter()
        .map(|(id, p)| (id.to_string(), protocol_signature(&p.raw, &p.definition)))
        .collect();
    let registries = json!({
        "deliverables": library.deliverables,
        "compliance": library.compliance,
    });
    sigs.insert(
        GLOBAL_REGISTRIES.to_string(),
        IntegritySignature {
            hash: warden_utils::sha256_hex(registries.to_string().as_bytes()),
            version: GLOBAL_VERSION.to_string(),
            state_count: 0,
            requirement_count: 0,
        },
    );
    sigs
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Unchanged,
    Modified,
    Removed,
}

impl ChangeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Unchanged => "UNCHANGED",
            Self::Modified => "MODIFIED",
            Self::Removed => "REMOVED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolChange {
    pub id: String,
    pub kind: ChangeKind,
    pub regression: bool,
}

/// Current ids in order, then ids present only in `previous`.
#[must_use]
pub fn compare(previous: &Signatures, current: &Signatures) -> Vec<ProtocolChange> {
    let mut changes: Vec<ProtocolChange> = current
        .iter()
        .map(|(id, curr)| {
            let (kind, regression) = match previous.get(id) {
                None => (ChangeKind::New, false),
                Some(old) if old.hash == curr.hash => (ChangeKind::Unchanged, false),
                Some(old) => (
                    ChangeKind::Modified,
                    curr.state_count < old.state_count
                        || curr.requirement_count < old.requirement_count,
                ),
            };
            ProtocolChange {
                id: id.clone(),
                kind,
                regression,
            }
        })
        .collect();
    changes.extend(
        previous
            .keys()
            .filter(|id| !current.contains_key(*id))
            .map(|id| ProtocolChange {
                id: id.clone(),
                kind: ChangeKind::Removed,
                regression: true,
            }),
    );
    changes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub severity: Severity,
    pub protocol: String,
    pub message: String,
}

impl Finding {
    fn error(protocol: &str, message: String) -> Self {
        Self {
            severity: Severity::Error,
            protocol: protocol.to_string(),
            message,
        }
    }

    fn warning(protocol: &str, message: String) -> Self {
        Self {
            severity: Severity::Warning,
            protocol: protocol.to_string(),
            message,
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "[{tag}] {}: {}", self.protocol, self.message)
    }
}

fn definition_findings(id: &str, protocol: &ProtocolDefinition) -> Vec<Finding> {
    let mut findings = Vec::new();
    match protocol.initial_state() {
        Ok(first) if !protocol.has_initial_marker() => findings.push(Finding::warning(
            id,
            format!("no state is marked initial; init falls back to '{first}'"),
        )),
        Ok(_) => {}
        Err(InitialStateError::NoStates) => {
            findings.push(Finding::error(id, "declares no states".to_string()));
        }
        Err(e @ InitialStateError::Ambiguous(_)) => findings.push(Finding::error(id, e.to_string())),
    }

    for (state_name, state) in protocol.states.iter() {
        for (trigger, spec) in state.transitions.iter() {
            if protocol.state(spec.target()).is_none() {
                findings.push(Finding::error(
                    id,
                    format!(
                        "state {state_name} transition '{trigger}' targets non-existent state '{}'",
                        spec.target()
                    ),
                ));
            }
            for gate in spec.gates() {
                if !state.requirements.contains_key(gate) {
                    findings.push(Finding::error(
                        id,
                        format!(
                            "state {state_name} transition '{trigger}' gates on undeclared requirement '{gate}'"
                        ),
                    ));
                }
            }
        }
        for (req_id, req) in state.requirements.iter() {
            if let RequirementCheck::Unsupported { reason, .. } = &req.check {
                findings.push(Finding::error(
                    id,
                    format!("state {state_name} requirement '{req_id}': {reason}"),
                ));
            }
        }
    }
    findings
}

/// Every finding for every protocol in the library.
#[must_use]
pub fn structural_findings(library: &ProtocolLibrary) -> Vec<Finding> {
    let known = library.registry_ids();
    let mut findings = Vec::new();
    for (id, loaded) in library.protocols.iter() {
        findings.extend(definition_findings(id, &loaded.definition));

        let text = loaded.raw.to_string();
        let dangling: BTreeSet<&str> = REFERENCE_RE
            .find_iter(&text)
            .map(|m| m.as_str())
            .filter(|reference| !known.contains(*reference))
            .collect();
        findings.extend(
            dangling
                .into_iter()
                .map(|r| Finding::error(id, format!("reference {r} has no definition"))),
        );
    }
    findings
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentCheck {
    pub name: String,
    pub present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentAudit {
    /// No inventory document exists.
    Skipped { path: PathBuf },
    Checked(Vec<ComponentCheck>),
}

impl ComponentAudit {
    #[must_use]
    pub fn missing(&self) -> Vec<&str> {
        match self {
            Self::Skipped { .. } => Vec::new(),
            Self::Checked(checks) => checks
                .iter()
                .filter(|c| !c.present)
                .map(|c| c.name.as_str())
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct Inventory {
    #[serde(default)]
    components: Vec<Component>,
}

#[derive(Deserialize)]
struct Component {
    name: String,
}

pub fn audit_components(paths: &WardenPaths) -> Result<ComponentAudit, IntegrityError> {
    let path = paths.component_status();
    if !path.exists() {
        tracing::info!(path = %path.display(), "No component inventory, skipping");
        return Ok(ComponentAudit::Skipped { path });
    }
    let inventory: Inventory =
        serde_json::from_value(read_json(&path)?).map_err(|source| IntegrityError::Parse {
            path: path.clone(),
            source,
        })?;
    Ok(ComponentAudit::Checked(
        inventory
            .components
            .into_iter()
            .map(|c| ComponentCheck {
                present: paths.root().join(&c.name).exists(),
                name: c.name,
            })
            .collect(),
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub target: PathBuf,
    /// Non-empty means validation stopped before the other checks ran.
    pub schema_errors: Vec<String>,
    pub changes: Vec<ProtocolChange>,
    pub findings: Vec<Finding>,
    pub components: Option<ComponentAudit>,
    pub library: Option<LibraryVerification>,
}

impl VerifyReport {
    #[must_use]
    pub fn regressions(&self) -> Vec<&ProtocolChange> {
        self.changes.iter().filter(|c| c.regression).collect()
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.schema_errors.is_empty()
            && self.regressions().is_empty()
            && !self.findings.iter().any(Finding::is_error)
            && self
                .components
                .as_ref()
                .is_none_or(|c| c.missing().is_empty())
            && self.library.as_ref().is_none_or(LibraryVerification::passed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotOutcome {
    pub target: PathBuf,
    pub snapshot: PathBuf,
    pub baseline: PathBuf,
    pub signatures: Signatures,
    pub synced: Option<SyncReport>,
}

fn target_bytes(target: &Path) -> Result<Vec<u8>, IntegrityError> {
    if !target.exists() {
        return Err(IntegrityError::NoTarget {
            path: target.to_path_buf(),
        });
    }
    read_bytes(target)
}

/// Records signatures and a byte copy of the target. A modular library is
/// synchronized first so the flat view matches the shards.
pub fn snapshot(paths: &WardenPaths) -> Result<SnapshotOutcome, IntegrityError> {
    let synced = if paths.protocols_index().exists() {
        Some(sync_library(paths)?)
    } else {
        None
    };
    let library = load_library(paths)?;
    let sigs = signatures(&library);

    let target = paths.integrity_target();
    let bytes = target_bytes(&target)?;
    let snapshot = snapshot_path(&target);
    let baseline = baseline_path(&target);
    warden_utils::write_json_pretty(&snapshot, &sigs).map_err(|source| IntegrityError::Io {
        path: snapshot.clone(),
        source,
    })?;
    warden_utils::atomic_write(&baseline, &bytes).map_err(|source| IntegrityError::Io {
        path: baseline.clone(),
        source,
    })?;
    tracing::info!(
        target = %target.display(),
        protocols = sigs.len(),
        "Integrity snapshot captured"
    );
    Ok(SnapshotOutcome {
        target,
        snapshot,
        baseline,
        signatures: sigs,
        synced,
    })
}

pub fn verify(paths: &WardenPaths) -> Result<VerifyReport, IntegrityError> {
    let target = paths.integrity_target();
    if !target.exists() {
        return Err(IntegrityError::NoTarget { path: target });
    }
    let schema_errors = SchemaValidator::load(paths)?.errors(&read_json(&target)?);
    if !schema_errors.is_empty() {
        tracing::warn!(target = %target.display(), count = schema_errors.len(), "Schema validation failed");
        return Ok(VerifyReport {
            target,
            schema_errors,
            changes: Vec::new(),
            findings: Vec::new(),
            components: None,
            library: None,
        });
    }

    let snapshot = snapshot_path(&target);
    if !snapshot.exists() {
        return Err(IntegrityError::NoSnapshot { path: snapshot });
    }
    let previous: Signatures =
        serde_json::from_value(read_json(&snapshot)?).map_err(|source| IntegrityError::Parse {
            path: snapshot.clone(),
            source,
        })?;

    let library = load_library(paths)?;
    let changes = compare(&previous, &signatures(&library));
    let findings = structural_findings(&library);
    let components = audit_components(paths)?;
    let library_check = if paths.library_manifest().exists() {
        Some(verify_library(paths)?)
    } else {
        None
    };

    let report = VerifyReport {
        target,
        schema_errors,
        changes,
        findings,
        components: Some(components),
        library: library_check,
    };
    tracing::info!(passed = report.passed(), "Integrity verification complete");
    Ok(report)
}

/// Overwrites the target with its baseline bytes.
pub fn restore(paths: &WardenPaths) -> Result<PathBuf, IntegrityError> {
    let target = paths.integrity_target();
    let baseline = baseline_path(&target);
    if !baseline.exists() {
        return Err(IntegrityError::NoBaseline { path: baseline });
    }
    let bytes = read_bytes(&baseline)?;
    warden_utils::atomic_write(&target, &bytes).map_err(|source| IntegrityError::Io {
        path: target.clone(),
        source,
    })?;
    tracing::info!(target = %target.display(), "Restored from baseline");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::{Value, json};
    use warden_config::WardenPaths;

    use super::{
        ChangeKind, ComponentAudit, GLOBAL_REGISTRIES, IntegrityError, restore, snapshot,
        structural_findings, verify,
    };
    use warden_core::load_library;

    fn library() -> Value {
        json!({
            "meta": {"version": "1"},
            "protocol_library": {
                "BUILD": {
                    "meta": {"title": "Build", "version": "1.0.0"},
                    "states": {
                        "PLAN": {
                            "type": "initial",
                            "requirements": {
                                "plan": {"type": "file_exists", "path": "PLAN.md"}
                            },
                            "transitions": {"go": {"target": "DONE", "gates": ["plan"]}}
                        },
                        "DONE": {"type": "terminal", "description": "Emits DLR_PLAN"}
                    }
                }
            },
            "deliverable_registry": [{"id": "DLR_PLAN"}]
        })
    }

    fn setup(doc: &Value) -> (tempfile::TempDir, WardenPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = WardenPaths::from_root(dir.path());
        fs::create_dir_all(paths.registry_dir()).unwrap();
        fs::write(
            paths.flat_protocols(),
            serde_json::to_string_pretty(doc).unwrap(),
        )
        .unwrap();
        (dir, paths)
    }

    #[test]
    fn snapshot_then_verify_is_unchanged() {
        let (_dir, paths) = setup(&library());
        let outcome = snapshot(&paths).unwrap();
        assert!(outcome.signatures.contains_key(GLOBAL_REGISTRIES));
        assert_eq!(
            fs::read(&outcome.baseline).unwrap(),
            fs::read(paths.flat_protocols()).unwrap()
        );

        let report = verify(&paths).unwrap();
        assert!(report.passed(), "{report:?}");
        assert!(report.changes.iter().all(|c| c.kind == ChangeKind::Unchanged));
        assert!(matches!(report.components, Some(ComponentAudit::Skipped { .. })));
    }

    #[test]
    fn verify_without_snapshot_fails() {
        let (_dir, paths) = setup(&library());
        assert!(matches!(verify(&paths), Err(IntegrityError::NoSnapshot { .. })));
    }

    #[test]
    fn removing_a_state_is_a_regression() {
        let (_dir, paths) = setup(&library());
        snapshot(&paths).unwrap();

        let mut doc = library();
        doc["protocol_library"]["BUILD"]["states"]
            .as_object_mut()
            .unwrap()
            .remove("DONE");
        doc["protocol_library"]["BUILD"]["states"]["PLAN"]["transitions"] = json!({});
        fs::write(paths.flat_protocols(), doc.to_string()).unwrap();

        let report = verify(&paths).unwrap();
        let build = report.changes.iter().find(|c| c.id == "BUILD").unwrap();
        assert_eq!(build.kind, ChangeKind::Modified);
        assert!(build.regression);
        assert!(!report.passed());
    }

    #[test]
    fn removed_protocol_is_reported() {
        let (_dir, paths) = setup(&library());
        snapshot(&paths).unwrap();
        let mut doc = library();
        doc["protocol_library"] = json!({
            "OTHER": {"meta": {"title": "Other"}, "states": {"S": {"type": "initial"}}}
        });
        fs::write(paths.flat_protocols(), doc.to_string()).unwrap();

        let report = verify(&paths).unwrap();
        let kinds: Vec<(&str, ChangeKind)> = report
            .changes
            .iter()
            .map(|c| (c.id.as_str(), c.kind))
            .collect();
        assert!(kinds.contains(&("OTHER", ChangeKind::New)));
        assert!(kinds.contains(&("BUILD", ChangeKind::Removed)));
        assert!(!report.passed());
    }

    #[test]
    fn schema_failure_stops_verification() {
        let (_dir, paths) = setup(&json!({"meta": {}}));
        let report = verify(&paths).unwrap();
        assert!(!report.schema_errors.is_empty());
        assert!(report.changes.is_empty());
        assert!(!report.passed());
    }

    #[test]
    fn structural_findings_cover_targets_gates_and_references() {
        let mut doc = library();
        doc["protocol_library"]["BUILD"]["states"]["PLAN"]["transitions"] = json!({
            "go": {"target": "NOWHERE", "gates": ["ghost"]}
        });
        doc["protocol_library"]["BUILD"]["states"]["DONE"]["description"] =
            json!("Emits CMP_UNKNOWN");
        doc["protocol_library"]["LOOSE"] =
            json!({"meta": {"title": "Loose"}, "states": {"A": {}}});
        let (_dir, paths) = setup(&doc);

        let findings = structural_findings(&load_library(&paths).unwrap());
        let messages: Vec<String> = findings.iter().map(ToString::to_string).collect();
        assert!(messages.iter().any(|m| m.contains("non-existent state 'NOWHERE'")));
        assert!(messages.iter().any(|m| m.contains("undeclared requirement 'ghost'")));
        assert!(messages.iter().any(|m| m.contains("CMP_UNKNOWN")));
        let loose = findings.iter().find(|f| f.protocol == "LOOSE").unwrap();
        assert!(!loose.is_error());
    }

    #[test]
    fn missing_component_fails_verification() {
        let (dir, paths) = setup(&library());
        fs::write(
            paths.component_status(),
            json!({"components": [{"name": "engine"}, {"name": "registry"}]}).to_string(),
        )
        .unwrap();
        snapshot(&paths).unwrap();
        let report = verify(&paths).unwrap();
        assert_eq!(report.components.as_ref().unwrap().missing(), ["engine"]);
        assert!(!report.passed());

        fs::create_dir(dir.path().join("engine")).unwrap();
        assert!(verify(&paths).unwrap().passed());
    }

    #[test]
    fn restore_copies_baseline_bytes() {
        let (_dir, paths) = setup(&library());
        assert!(matches!(restore(&paths), Err(IntegrityError::NoBaseline { .. })));
        snapshot(&paths).unwrap();
        let original = fs::read(paths.flat_protocols()).unwrap();
        fs::write(paths.flat_protocols(), "{}").unwrap();

        restore(&paths).unwrap();
        assert_eq!(fs::read(paths.flat_protocols()).unwrap(), original);
    }
}
