//! Protocol registry loading.
//!
//! The library is assembled from one of two layouts:
//!
//! - **Flat**: one aggregate document with a `protocol_library` object.
//! - **Modular**: `registry/protocols/index.json` (library meta) plus one
//!   document per protocol. When `registry/library_manifest.json` exists the
//!   manifest names the files; otherwise the directory is scanned in sorted
//!   file-name order.
//!
//! Loading is all-or-nothing: any unreadable or malformed document fails the
//! load and no partial library is returned.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use warden_config::WardenPaths;
use warden_types::{DeclaredMap, ManifestEntry, ProtocolDefinition};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry document missing: {}", path.display())]
    Missing { path: PathBuf },
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("malformed registry document {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("protocol '{id}' in {} is invalid: {source}", path.display())]
    InvalidProtocol {
        id: String,
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("manifest entry '{id}' points at missing file {}", path.display())]
    ManifestFileMissing { id: String, path: PathBuf },
    #[error("{} has no `protocol_library` object", path.display())]
    NoLibrary { path: PathBuf },
}

/// Where the library was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryOrigin {
    Flat(PathBuf),
    Manifest(PathBuf),
    DirectoryScan(PathBuf),
}

impl LibraryOrigin {
    #[must_use]
    pub fn is_modular(&self) -> bool {
        !matches!(self, Self::Flat(_))
    }
}

/// A parsed protocol and the exact JSON it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedProtocol {
    pub definition: ProtocolDefinition,
    pub raw: Value,
    pub file: Option<PathBuf>,
}

impl LoadedProtocol {
    pub fn from_value(id: &str, raw: Value, file: &Path) -> Result<Self, RegistryError> {
        let mut definition: ProtocolDefinition =
            serde_json::from_value(raw.clone()).map_err(|source| {
                RegistryError::InvalidProtocol {
                    id: id.to_string(),
                    path: file.to_path_buf(),
                    source,
                }
            })?;
        if definition.id.is_empty() {
            definition.id = id.to_string();
        }
        Ok(Self {
            definition,
            raw,
            file: Some(file.to_path_buf()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProtocolLibrary {
    /// Library-level `meta` from the aggregate or index document.
    pub meta: Value,
    pub bootstrap: Option<Value>,
    pub protocols: DeclaredMap<LoadedProtocol>,
    pub deliverables: Vec<Value>,
    pub compliance: Vec<Value>,
    pub origin: LibraryOrigin,
}

impl ProtocolLibrary {
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ProtocolDefinition> {
        self.protocols.get(id).map(|p| &p.definition)
    }

    /// The first protocol whose `meta.title` equals `title`.
    #[must_use]
    pub fn find_by_title(&self, title: &str) -> Option<(&str, &ProtocolDefinition)> {
        self.protocols
            .iter()
            .find(|(_, p)| p.definition.meta.title == title)
            .map(|(id, p)| (id, &p.definition))
    }

    /// Every `id` declared in the deliverable and compliance registries.
    #[must_use]
    pub fn registry_ids(&self) -> BTreeSet<String> {
        self.deliverables
            .iter()
            .chain(&self.compliance)
            .filter_map(|entry| entry.get("id").and_then(Value::as_str))
            .map(ToString::to_string)
            .collect()
    }

    /// The flat aggregate view of this library.
    #[must_use]
    pub fn to_aggregate(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("meta".to_string(), self.meta.clone());
        if let Some(bootstrap) = &self.bootstrap {
            doc.insert("bootstrap".to_string(), bootstrap.clone());
        }
        let library: Map<String, Value> = self
            .protocols
            .iter()
            .map(|(id, p)| (id.to_string(), p.raw.clone()))
            .collect();
        doc.insert("protocol_library".to_string(), Value::Object(library));
        if !self.deliverables.is_empty() {
            doc.insert(
                "deliverable_registry".to_string(),
                Value::Array(self.deliverables.clone()),
            );
        }
        if !self.compliance.is_empty() {
            doc.insert(
                "compliance_registry".to_string(),
                Value::Array(self.compliance.clone()),
            );
        }
        Value::Object(doc)
    }

    /// The index (`meta`, `bootstrap`) written beside modular protocol files.
    #[must_use]
    pub fn to_index(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("meta".to_string(), self.meta.clone());
        if let Some(bootstrap) = &self.bootstrap {
            doc.insert("bootstrap".to_string(), bootstrap.clone());
        }
        Value::Object(doc)
    }
}

/// A layout the library can be loaded from.
pub trait RegistrySource {
    fn describe(&self) -> String;
    fn load(&self) -> Result<ProtocolLibrary, RegistryError>;
}

pub(crate) fn read_json(path: &Path) -> Result<Value, RegistryError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(RegistryError::Missing {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(RegistryError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_slice(&bytes).map_err(|source| RegistryError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn read_optional_json(path: &Path) -> Result<Option<Value>, RegistryError> {
    match read_json(path) {
        Ok(value) => Ok(Some(value)),
        Err(RegistryError::Missing { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Reads `key` from a side registry file, falling back to `fallback_key` in
/// the aggregate document.
fn side_registry(
    path: &Path,
    key: &str,
    aggregate: Option<&Value>,
    fallback_key: &str,
) -> Result<Vec<Value>, RegistryError> {
    let from_file = read_optional_json(path)?.and_then(|doc| doc.get(key).cloned());
    let value = from_file.or_else(|| aggregate.and_then(|doc| doc.get(fallback_key).cloned()));
    Ok(match value {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    })
}

/// Single aggregate document.
#[derive(Debug, Clone)]
pub struct FlatRegistry {
    path: PathBuf,
    deliverables: PathBuf,
    compliance: PathBuf,
}

impl FlatRegistry {
    #[must_use]
    pub fn new(path: PathBuf, paths: &WardenPaths) -> Self {
        Self {
            path,
            deliverables: paths.deliverables(),
            compliance: paths.compliance(),
        }
    }
}

impl RegistrySource for FlatRegistry {
    fn describe(&self) -> String {
        format!("flat aggregate {}", self.path.display())
    }

    fn load(&self) -> Result<ProtocolLibrary, RegistryError> {
        let doc = read_json(&self.path)?;
        let Some(Value::Object(library)) = doc.get("protocol_library") else {
            return Err(RegistryError::NoLibrary {
                path: self.path.clone(),
            });
        };
        let mut protocols = DeclaredMap::new();
        for (id, raw) in library {
            protocols.insert(
                id.clone(),
                LoadedProtocol::from_value(id, raw.clone(), &self.path)?,
            );
        }
        Ok(ProtocolLibrary {
            meta: doc.get("meta").cloned().unwrap_or(Value::Null),
            bootstrap: doc.get("bootstrap").cloned(),
            protocols,
            deliverables: side_registry(
                &self.deliverables,
                "deliverables",
                Some(&doc),
                "deliverable_registry",
            )?,
            compliance: side_registry(
                &self.compliance,
                "compliance",
                Some(&doc),
                "compliance_registry",
            )?,
            origin: LibraryOrigin::Flat(self.path.clone()),
        })
    }
}

/// Index plus one document per protocol.
#[derive(Debug, Clone)]
pub struct ModularRegistry {
    root: PathBuf,
    index: PathBuf,
    dir: PathBuf,
    manifest: PathBuf,
    deliverables: PathBuf,
    compliance: PathBuf,
}

impl ModularRegistry {
    #[must_use]
    pub fn new(paths: &WardenPaths) -> Self {
        Self {
            root: paths.root().to_path_buf(),
            index: paths.protocols_index(),
            dir: paths.protocols_dir(),
            manifest: paths.library_manifest(),
            deliverables: paths.deliverables(),
            compliance: paths.compliance(),
        }
    }

    fn manifest_files(&self) -> Result<Option<Vec<(String, PathBuf)>>, RegistryError> {
        let Some(doc) = read_optional_json(&self.manifest)? else {
            return Ok(None);
        };
        let manifest: DeclaredMap<ManifestEntry> =
            serde_json::from_value(doc).map_err(|source| RegistryError::Parse {
                path: self.manifest.clone(),
                source,
            })?;
        let files = manifest
            .iter()
            .map(|(id, entry)| (id.to_string(), self.root.join(&entry.file)))
            .collect();
        Ok(Some(files))
    }

    fn scanned_files(&self) -> Result<Vec<(String, PathBuf)>, RegistryError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RegistryError::Read {
                    path: self.dir.clone(),
                    source,
                });
            }
        };
        let mut files: Vec<(String, PathBuf)> = read_dir
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension().is_some_and(|ext| ext == "json")
                    && path.file_name().is_some_and(|name| name != "index.json")
            })
            .filter_map(|path| {
                let id = path.file_stem()?.to_string_lossy().into_owned();
                Some((id, path))
            })
            .collect();
        files.sort_by(|a, b| a.1.file_name().cmp(&b.1.file_name()));
        Ok(files)
    }
}

impl RegistrySource for ModularRegistry {
    fn describe(&self) -> String {
        format!("modular library {}", self.dir.display())
    }

    fn load(&self) -> Result<ProtocolLibrary, RegistryError> {
        let index = read_json(&self.index)?;
        let (files, origin) = match self.manifest_files()? {
            Some(files) => (files, LibraryOrigin::Manifest(self.manifest.clone())),
            None => (
                self.scanned_files()?,
                LibraryOrigin::DirectoryScan(self.dir.clone()),
            ),
        };

        let mut protocols = DeclaredMap::new();
        for (id, path) in files {
            let raw = match read_json(&path) {
                Ok(raw) => raw,
                Err(RegistryError::Missing { path }) => {
                    return Err(RegistryError::ManifestFileMissing { id, path });
                }
                Err(e) => return Err(e),
            };
            let loaded = LoadedProtocol::from_value(&id, raw, &path)?;
            protocols.insert(id, loaded);
        }
        tracing::debug!(count = protocols.len(), origin = ?origin, "Modular library loaded");

        Ok(ProtocolLibrary {
            meta: index.get("meta").cloned().unwrap_or(Value::Null),
            bootstrap: index.get("bootstrap").cloned(),
            protocols,
            deliverables: side_registry(
                &self.deliverables,
                "deliverables",
                None,
                "deliverable_registry",
            )?,
            compliance: side_registry(&self.compliance, "compliance", None, "compliance_registry")?,
            origin,
        })
    }
}

/// `PROTOCOL_PATH` override, else the modular index when present, else the
/// flat aggregate.
#[must_use]
pub fn select_source(paths: &WardenPaths) -> Box<dyn RegistrySource> {
    if let Some(path) = paths.protocol_override() {
        return Box::new(FlatRegistry::new(path.to_path_buf(), paths));
    }
    if paths.protocols_index().exists() {
        return Box::new(ModularRegistry::new(paths));
    }
    Box::new(FlatRegistry::new(paths.flat_protocols(), paths))
}

pub fn load_library(paths: &WardenPaths) -> Result<ProtocolLibrary, RegistryError> {
    let source = select_source(paths);
    tracing::debug!(source = %source.describe(), "Loading protocol library");
    source.load()
}
