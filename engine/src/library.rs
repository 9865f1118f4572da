//! Modular library auditor.
//!
//! `sync` rebuilds `library_manifest.json` and the flat `protocols.json` from
//! the per-protocol files. `verify` rehashes every manifest entry's file and
//! reports a fidelity breach when the content drifted.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use warden_config::WardenPaths;
use warden_types::ManifestEntry;

use crate::integrity::{IntegrityError, read_bytes, read_json};

const DEFAULT_VERSION: &str = "0.0.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub manifest: BTreeMap<String, ManifestEntry>,
    pub manifest_path: PathBuf,
    pub aggregate_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileCheck {
    Verified,
    Missing,
    Breach { expected: String, actual: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryCheck {
    pub id: String,
    pub file: String,
    pub result: FileCheck,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LibraryVerification {
    pub checks: Vec<LibraryCheck>,
}

impl LibraryVerification {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = &LibraryCheck> {
        self.checks
            .iter()
            .filter(|c| c.result != FileCheck::Verified)
    }
}

/// `path` relative to `root`, always with forward slashes.
fn relative_to(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn shard_files(dir: &Path) -> Result<Vec<PathBuf>, IntegrityError> {
    let read_dir = fs::read_dir(dir).map_err(|source| IntegrityError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = read_dir
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "json")
                && path.file_name().is_some_and(|name| name != "index.json")
        })
        .collect();
    files.sort();
    Ok(files)
}

pub fn sync_library(paths: &WardenPaths) -> Result<SyncReport, IntegrityError> {
    let index_path = paths.protocols_index();
    if !index_path.exists() {
        return Err(IntegrityError::NoIndex { path: index_path });
    }
    let index = read_json(&index_path)?;
    let mut aggregate = match index {
        Value::Object(fields) => fields,
        _ => Map::new(),
    };

    let mut manifest = BTreeMap::new();
    let mut library = Map::new();
    let updated = warden_utils::rfc3339_now();
    for path in shard_files(&paths.protocols_dir())? {
        let Some(id) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        let bytes = read_bytes(&path)?;
        let doc: Value = serde_json::from_slice(&bytes).map_err(|source| IntegrityError::Parse {
            path: path.clone(),
            source,
        })?;
        let version = doc
            .pointer("/meta/version")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_VERSION)
            .to_string();
        tracing::debug!(id = %id, version = %version, "Library shard processed");
        manifest.insert(
            id.clone(),
            ManifestEntry {
                file: relative_to(paths.root(), &path),
                version,
                hash: warden_utils::sha256_hex(&bytes),
                updated: updated.clone(),
            },
        );
        library.insert(id, doc);
    }
    aggregate.insert("protocol_library".to_string(), Value::Object(library));

    let manifest_path = paths.library_manifest();
    let aggregate_path = paths.flat_protocols();
    write_json(&manifest_path, &manifest)?;
    write_json(&aggregate_path, &Value::Object(aggregate))?;
    tracing::info!(
        protocols = manifest.len(),
        manifest = %manifest_path.display(),
        "Library synchronized"
    );
    Ok(SyncReport {
        manifest,
        manifest_path,
        aggregate_path,
    })
}

pub fn verify_library(paths: &WardenPaths) -> Result<LibraryVerification, IntegrityError> {
    let manifest_path = paths.library_manifest();
    if !manifest_path.exists() {
        return Err(IntegrityError::NoManifest {
            path: manifest_path,
        });
    }
    let manifest: BTreeMap<String, ManifestEntry> =
        serde_json::from_value(read_json(&manifest_path)?).map_err(|source| {
            IntegrityError::Parse {
                path: manifest_path.clone(),
                source,
            }
        })?;

    let mut checks = Vec::with_capacity(manifest.len());
    for (id, entry) in manifest {
        let path = paths.root().join(&entry.file);
        let result = if path.exists() {
            let actual = warden_utils::sha256_hex(&read_bytes(&path)?);
            if actual == entry.hash {
                FileCheck::Verified
            } else {
                tracing::warn!(id = %id, file = %entry.file, "Fidelity breach");
                FileCheck::Breach {
                    expected: entry.hash,
                    actual,
                }
            }
        } else {
            FileCheck::Missing
        };
        checks.push(LibraryCheck {
            id,
            file: entry.file,
            result,
        });
    }
    Ok(LibraryVerification { checks })
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), IntegrityError> {
    warden_utils::write_json_pretty(path, value).map_err(|source| IntegrityError::Io {
        path: path.to_path_buf(),
        source,
    })
}
