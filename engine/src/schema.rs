//! JSON Schema validation for protocol library documents.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use warden_config::WardenPaths;

pub const BUILTIN_PROTOCOL_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/protocol.schema.json"
));

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("malformed JSON in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("schema itself is invalid: {0}")]
    InvalidSchema(String),
    #[error("schema validation failed:\n  {}", .errors.join("\n  "))]
    Invalid { errors: Vec<String> },
    #[error("failed to stage document for validation: {0}")]
    TempFile(#[source] io::Error),
}

pub struct SchemaValidator {
    validator: jsonschema::Validator,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator").finish_non_exhaustive()
    }
}

impl SchemaValidator {
    pub fn builtin() -> Result<Self, SchemaError> {
        let schema: Value = serde_json::from_str(BUILTIN_PROTOCOL_SCHEMA).map_err(|source| {
            SchemaError::Parse {
                path: PathBuf::from("<builtin protocol schema>"),
                source,
            }
        })?;
        Self::from_value(&schema)
    }

    /// The registry's own schema when present, else the built-in one.
    pub fn load(paths: &WardenPaths) -> Result<Self, SchemaError> {
        let path = paths.protocol_schema();
        if !path.exists() {
            return Self::builtin();
        }
        tracing::debug!(path = %path.display(), "Using registry protocol schema");
        Self::from_value(&read_json(&path)?)
    }

    pub fn from_value(schema: &Value) -> Result<Self, SchemaError> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| SchemaError::InvalidSchema(e.to_string()))?;
        Ok(Self { validator })
    }

    /// Every violation, in the validator's reporting order.
    #[must_use]
    pub fn errors(&self, doc: &Value) -> Vec<String> {
        self.validator
            .iter_errors(doc)
            .map(|e| e.to_string())
            .collect()
    }

    pub fn validate(&self, doc: &Value) -> Result<(), SchemaError> {
        let errors = self.errors(doc);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::Invalid { errors })
        }
    }

    pub fn validate_file(&self, path: &Path) -> Result<(), SchemaError> {
        self.validate(&read_json(path)?)
    }

    /// Serializes `doc` to a temporary file in `dir` and validates what was
    /// written. The file is removed on every path.
    pub fn validate_via_temp(&self, doc: &Value, dir: &Path) -> Result<(), SchemaError> {
        fs::create_dir_all(dir).map_err(SchemaError::TempFile)?;
        let mut staged = tempfile::Builder::new()
            .prefix(".warden-validate-")
            .suffix(".json")
            .tempfile_in(dir)
            .map_err(SchemaError::TempFile)?;
        let bytes = serde_json::to_vec_pretty(doc).map_err(|source| SchemaError::Parse {
            path: staged.path().to_path_buf(),
            source,
        })?;
        staged.write_all(&bytes).map_err(SchemaError::TempFile)?;
        staged.flush().map_err(SchemaError::TempFile)?;
        self.validate_file(staged.path())
    }
}

fn read_json(path: &Path) -> Result<Value, SchemaError> {
    let bytes = fs::read(path).map_err(|source| SchemaError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| SchemaError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::{SchemaError, SchemaValidator};

    fn valid_doc() -> serde_json::Value {
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
                            "transitions": {
                                "go": {"target": "DONE", "gates": ["plan"]}
                            }
                        },
                        "DONE": {"type": "terminal"}
                    }
                }
            }
        })
    }

    #[test]
    fn builtin_schema_accepts_well_formed_library() {
        let validator = SchemaValidator::builtin().unwrap();
        assert!(validator.errors(&valid_doc()).is_empty());
    }

    #[test]
    fn builtin_schema_rejects_unknown_requirement_type() {
        let validator = SchemaValidator::builtin().unwrap();
        let mut doc = valid_doc();
        doc["protocol_library"]["BUILD"]["states"]["PLAN"]["requirements"]["plan"]["type"] =
            json!("telepathy");
        assert!(matches!(
            validator.validate(&doc),
            Err(SchemaError::Invalid { ref errors }) if !errors.is_empty()
        ));
    }

    #[test]
    fn builtin_schema_requires_title() {
        let validator = SchemaValidator::builtin().unwrap();
        let mut doc = valid_doc();
        doc["protocol_library"]["BUILD"]["meta"] = json!({"version": "1"});
        assert!(validator.validate(&doc).is_err());
    }

    #[test]
    fn temp_copy_is_removed_after_validation() {
        let dir = tempfile::tempdir().unwrap();
        let validator = SchemaValidator::builtin().unwrap();
        validator.validate_via_temp(&valid_doc(), dir.path()).unwrap();
        assert!(validator.validate_via_temp(&json!({}), dir.path()).is_err());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
