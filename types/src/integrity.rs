use serde::{Deserialize, Serialize};

/// Content fingerprint of one protocol definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegritySignature {
    pub hash: String,
    pub version: String,
    pub state_count: usize,
    pub requirement_count: usize,
}

/// One modular protocol file as recorded in `library_manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file: String,
    pub version: String,
    pub hash: String,
    pub updated: String,
}
