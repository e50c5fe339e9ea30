//! Reference field declarations.
//!
//! [`ReferenceBuilder`] is immutable: every configuration call consumes the
//! builder and returns a new one, and only [`ReferenceBuilder::build`] yields
//! a [`ReferenceDef`]. A half-configured declaration therefore cannot end up
//! inside a schema.
//!
//! ```
//! use refsync_schema::{FieldOptions, ReferenceBuilder};
//!
//! let def = ReferenceBuilder::to("targets")
//!     .on(["name", "age"])
//!     .set("name", FieldOptions::searchable())
//!     .unwrap()
//!     .build()
//!     .unwrap();
//! assert_eq!(def.projected(), &["name", "age"]);
//! ```

use crate::path::FieldPath;
use crate::schema::ScalarType;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field names that are never copied onto a reference object.
pub const RESERVED_FIELDS: &[&str] = &["_id", "ref", "__v", "createdAt", "updatedAt", "createdBy"];

/// Per-projected-field options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOptions {
    /// Value type of the local copy. Inferred from the target schema when absent.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<ScalarType>,
    /// The local copy is worth indexing.
    #[serde(default)]
    pub searchable: bool,
    #[serde(default)]
    pub required: bool,
}

impl FieldOptions {
    pub fn searchable() -> Self {
        Self {
            searchable: true,
            ..Self::default()
        }
    }

    pub fn typed(ty: ScalarType) -> Self {
        Self {
            ty: Some(ty),
            ..Self::default()
        }
    }

    fn merged(self, incoming: FieldOptions) -> Self {
        Self {
            ty: incoming.ty.or(self.ty),
            searchable: incoming.searchable,
            required: incoming.required,
        }
    }
}

/// Frozen reference declaration, as embedded in a [`Schema`](crate::Schema).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ReferenceDecl", into = "ReferenceDecl")]
pub struct ReferenceDef {
    target: String,
    projected: Vec<String>,
    options: BTreeMap<String, FieldOptions>,
    required: bool,
}

impl ReferenceDef {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn projected(&self) -> &[String] {
        &self.projected
    }

    pub fn options(&self, field: &str) -> Option<&FieldOptions> {
        self.options.get(field)
    }

    pub fn all_options(&self) -> &BTreeMap<String, FieldOptions> {
        &self.options
    }

    pub fn is_required(&self) -> bool {
        self.required
    }
}

// ============================================================================
// Builder
// ============================================================================

#[derive(Debug, Clone)]
#[must_use]
pub struct ReferenceBuilder {
    target: String,
    projected: Vec<String>,
    options: BTreeMap<String, FieldOptions>,
    required: bool,
}

impl ReferenceBuilder {
    /// Start a declaration pointing at `target` collection.
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            projected: Vec::new(),
            options: BTreeMap::new(),
            required: false,
        }
    }

    /// Include fields in the projection. Reserved names and duplicates are skipped.
    pub fn on<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for field in fields {
            let field = field.as_ref();
            if RESERVED_FIELDS.contains(&field) || self.projected.iter().any(|p| p == field) {
                continue;
            }
            self.projected.push(field.to_string());
            self.options.entry(field.to_string()).or_default();
        }
        self
    }

    /// Configure one projected field. The field must already be included via [`Self::on`].
    pub fn set(mut self, field: &str, options: FieldOptions) -> Result<Self, SchemaError> {
        let slot = self
            .options
            .get_mut(field)
            .ok_or_else(|| SchemaError::UnknownProjectedField {
                field: field.to_string(),
            })?;
        *slot = std::mem::take(slot).merged(options);
        Ok(self)
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn build(self) -> Result<ReferenceDef, SchemaError> {
        if self.target.trim().is_empty() {
            return Err(SchemaError::EmptyTarget);
        }
        for field in &self.projected {
            FieldPath::field(field)?;
        }
        Ok(ReferenceDef {
            target: self.target,
            projected: self.projected,
            options: self.options,
            required: self.required,
        })
    }
}

// ============================================================================
// Serialized form
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReferenceDecl {
    target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    project: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    options: BTreeMap<String, FieldOptions>,
    #[serde(default)]
    required: bool,
}

impl TryFrom<ReferenceDecl> for ReferenceDef {
    type Error = SchemaError;

    fn try_from(decl: ReferenceDecl) -> Result<Self, Self::Error> {
        let mut builder = ReferenceBuilder::to(decl.target)
            .on(&decl.project)
            .required(decl.required);
        for (field, options) in decl.options {
            builder = builder.set(&field, options)?;
        }
        builder.build()
    }
}

impl From<ReferenceDef> for ReferenceDecl {
    fn from(def: ReferenceDef) -> Self {
        Self {
            target: def.target,
            project: def.projected,
            options: def.options,
            required: def.required,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_skips_reserved_and_duplicates() {
        let def = ReferenceBuilder::to("targets")
            .on(["name", "_id", "ref", "name", "age"])
            .build()
            .unwrap();
        assert_eq!(def.projected(), &["name", "age"]);
    }

    #[test]
    fn test_set_requires_included_field() {
        let err = ReferenceBuilder::to("targets")
            .on(["name"])
            .set("age", FieldOptions::searchable())
            .unwrap_err();
        assert_eq!(err.to_string(), "age not included in reference object");
    }

    #[test]
    fn test_set_merges_type_with_later_flags() {
        let def = ReferenceBuilder::to("targets")
            .on(["name"])
            .set("name", FieldOptions::typed(ScalarType::String))
            .unwrap()
            .set("name", FieldOptions::searchable())
            .unwrap()
            .build()
            .unwrap();

        let options = def.options("name").unwrap();
        assert_eq!(options.ty, Some(ScalarType::String));
        assert!(options.searchable);
    }

    #[test]
    fn test_builder_calls_do_not_affect_earlier_values() {
        let base = ReferenceBuilder::to("targets").on(["name"]);
        let wider = base.clone().on(["age"]).required(true).build().unwrap();
        let narrow = base.build().unwrap();

        assert_eq!(narrow.projected(), &["name"]);
        assert!(!narrow.is_required());
        assert_eq!(wider.projected(), &["name", "age"]);
        assert!(wider.is_required());
    }

    #[test]
    fn test_build_rejects_empty_target_and_bad_field() {
        assert_eq!(
            ReferenceBuilder::to("  ").build().unwrap_err(),
            SchemaError::EmptyTarget
        );
        assert!(matches!(
            ReferenceBuilder::to("targets").on(["a.b"]).build(),
            Err(SchemaError::MalformedPath { .. })
        ));
    }
}
