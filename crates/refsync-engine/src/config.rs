//! Engine configuration.

use crate::{Result, SyncError};
use refsync_schema::RESERVED_FIELDS;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Field names and policies shared by every engine component.
///
/// Every field has a default, so a config file only needs the keys it
/// changes:
///
/// ```json
/// { "reference_key": "ref", "fail_save_on_propagation_error": true }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Identifier field of every document.
    pub id_field: String,
    /// Key holding the identifier inside a reference object.
    pub reference_key: String,
    /// Optional boolean flag on source documents. Missing means active.
    pub active_field: String,
    /// Names never copied into a reference object.
    pub reserved_fields: Vec<String>,
    /// Make the after-save hook fail when any propagation entry failed.
    /// The source document stays saved either way.
    pub fail_save_on_propagation_error: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            id_field: "_id".to_string(),
            reference_key: "ref".to_string(),
            active_field: "active".to_string(),
            reserved_fields: RESERVED_FIELDS.iter().map(|f| f.to_string()).collect(),
            fail_save_on_propagation_error: false,
        }
    }
}

impl SyncConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("id_field", &self.id_field),
            ("reference_key", &self.reference_key),
            ("active_field", &self.active_field),
        ] {
            if value.is_empty() || value.contains('.') {
                return Err(SyncError::Config(format!(
                    "{name} must be a plain field name, got '{value}'"
                )));
            }
        }
        Ok(())
    }

    /// Whether `field` may never be projected.
    pub fn is_reserved(&self, field: &str) -> bool {
        field == self.id_field
            || field == self.reference_key
            || self.reserved_fields.iter().any(|r| r == field)
    }
}
