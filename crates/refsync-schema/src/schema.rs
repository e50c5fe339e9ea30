//! Document schemas.
//!
//! Schemas are plain data. They can be built in code or deserialized from
//! JSON, e.g.:
//!
//! ```json
//! {
//!   "fields": [
//!     { "name": "title", "kind": { "type": "string" } },
//!     { "name": "friend", "kind": { "type": "reference", "target": "people", "project": ["name"] } }
//!   ]
//! }
//! ```

use crate::reference::ReferenceDef;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Primitive value types a field (or a projected copy of one) can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    String,
    Number,
    Boolean,
    Date,
    Id,
    Mixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Date,
    Id,
    Mixed,
    /// Embedded sub-document.
    Embedded { schema: Schema },
    /// Array of embedded sub-documents.
    EmbeddedArray { schema: Schema },
    /// Single reference object `{ ref, <projected...> }`.
    Reference(ReferenceDef),
    /// Ordered array of reference objects.
    ReferenceArray(ReferenceDef),
}

impl FieldKind {
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            Self::String => Some(ScalarType::String),
            Self::Number => Some(ScalarType::Number),
            Self::Boolean => Some(ScalarType::Boolean),
            Self::Date => Some(ScalarType::Date),
            Self::Id => Some(ScalarType::Id),
            Self::Mixed => Some(ScalarType::Mixed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

/// A document schema with optional polymorphic variants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    /// Polymorphic variants keyed by discriminator value. Each variant only
    /// lists the fields it adds to the base schema.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variants: BTreeMap<String, Schema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            kind,
        });
        self
    }

    #[must_use]
    pub fn variant(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.variants.insert(name.into(), schema);
        self
    }

    /// Find a top-level field by name, searching variants too.
    pub fn lookup(&self, name: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.variants.values().find_map(|v| v.lookup(name)))
    }

    /// Reject duplicate field names at each level.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = BTreeSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    field: field.name.clone(),
                });
            }
            if let FieldKind::Embedded { schema } | FieldKind::EmbeddedArray { schema } =
                &field.kind
            {
                schema.validate()?;
            }
        }
        for variant in self.variants.values() {
            variant.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReferenceBuilder;

    #[test]
    fn test_deserialize_schema_with_reference() {
        let json = serde_json::json!({
            "fields": [
                { "name": "name", "kind": { "type": "string" } },
                {
                    "name": "friend",
                    "kind": {
                        "type": "reference",
                        "target": "targets",
                        "project": ["name", "age"],
                        "options": { "name": { "searchable": true } }
                    }
                },
                {
                    "name": "items",
                    "kind": { "type": "embedded_array", "schema": { "fields": [
                        { "name": "owner", "kind": { "type": "reference", "target": "targets" } }
                    ] } }
                }
            ]
        });

        let schema: Schema = serde_json::from_value(json).unwrap();
        assert_eq!(schema.fields.len(), 3);

        match &schema.lookup("friend").unwrap().kind {
            FieldKind::Reference(def) => {
                assert_eq!(def.target(), "targets");
                assert_eq!(def.projected(), &["name", "age"]);
                assert!(def.options("name").unwrap().searchable);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_deserialize_rejects_unknown_option_field() {
        let json = serde_json::json!({
            "fields": [{
                "name": "friend",
                "kind": {
                    "type": "reference",
                    "target": "targets",
                    "project": ["name"],
                    "options": { "age": { "searchable": true } }
                }
            }]
        });
        assert!(serde_json::from_value::<Schema>(json).is_err());
    }

    #[test]
    fn test_lookup_searches_variants() {
        let def = ReferenceBuilder::to("teams").build().unwrap();
        let schema = Schema::new()
            .field("name", FieldKind::String)
            .variant("player", Schema::new().field("team", FieldKind::Reference(def)));

        assert!(schema.lookup("team").is_some());
        assert!(schema.lookup("missing").is_none());
    }

    #[test]
    fn test_validate_rejects_duplicate_fields() {
        let schema = Schema::new()
            .field("name", FieldKind::String)
            .field("name", FieldKind::Number);
        assert_eq!(
            schema.validate(),
            Err(SchemaError::DuplicateField {
                field: "name".to_string()
            })
        );
    }
}
