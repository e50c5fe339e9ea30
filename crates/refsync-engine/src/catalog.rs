//! Collection catalog and sync registrations.
//!
//! The catalog is the frozen view the engine runs against: one resolved
//! [`DescriptorTable`] per local collection and one [`SyncRegistration`] per
//! target collection. It is built once, after every schema is registered,
//! and shared behind an `Arc` from then on.

use crate::config::SyncConfig;
use crate::Result;
use refsync_schema::{
    resolve, DescriptorTable, FieldOptions, FieldPath, ReferenceDescriptor, Schema, SchemaError,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

// ============================================================================
// Sync registrations
// ============================================================================

/// One local location that copies fields from a target collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncEntry {
    pub local_collection: String,
    pub field_path: FieldPath,
    pub projected_fields: Vec<String>,
    pub is_array: bool,
}

/// Everything that must be refreshed when a document of `collection_name`
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncRegistration {
    pub collection_name: String,
    pub entries: Vec<SyncEntry>,
}

impl SyncRegistration {
    /// Union of the fields projected by any entry, first-seen order.
    pub fn projectable_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        for field in self.entries.iter().flat_map(|e| &e.projected_fields) {
            if !fields.contains(&field.as_str()) {
                fields.push(field);
            }
        }
        fields
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Collects collection schemas before the catalog is frozen.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    config: SyncConfig,
    schemas: BTreeMap<String, Schema>,
}

impl CatalogBuilder {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            schemas: BTreeMap::new(),
        }
    }

    /// Register the schema of `collection`. Each collection registers once.
    pub fn register(mut self, collection: impl Into<String>, schema: Schema) -> Result<Self> {
        let collection = collection.into();
        if self.schemas.contains_key(&collection) {
            return Err(SchemaError::DuplicateCollection(collection).into());
        }
        self.schemas.insert(collection, schema);
        Ok(self)
    }

    /// Register every collection of a `{ "<collection>": <schema>, ... }`
    /// JSON document.
    pub fn register_json(mut self, schemas: &serde_json::Value) -> Result<Self> {
        let parsed: BTreeMap<String, Schema> = serde_json::from_value(schemas.clone())
            .map_err(|e| crate::SyncError::Config(format!("invalid schema document: {e}")))?;
        for (collection, schema) in parsed {
            self = self.register(collection, schema)?;
        }
        Ok(self)
    }

    /// Resolve every schema, reconcile projections against the registered
    /// target schemas and index sync registrations by target.
    pub fn build(self) -> Result<Catalog> {
        let mut tables = BTreeMap::new();
        for (collection, schema) in &self.schemas {
            let resolved = resolve(schema)?;
            let reconciled = resolved
                .iter()
                .map(|d| self.reconcile(collection, d))
                .collect::<Vec<_>>();
            let table = DescriptorTable::from_descriptors(reconciled);
            tracing::debug!(
                collection = %collection,
                descriptors = table.len(),
                "descriptor table resolved"
            );
            tables.insert(collection.clone(), Arc::new(table));
        }

        let mut registrations: BTreeMap<String, SyncRegistration> = BTreeMap::new();
        for (collection, table) in &tables {
            for descriptor in table.iter() {
                if descriptor.projected_fields().is_empty() {
                    continue;
                }
                let target = descriptor.target_collection();
                registrations
                    .entry(target.to_string())
                    .or_insert_with(|| SyncRegistration {
                        collection_name: target.to_string(),
                        entries: Vec::new(),
                    })
                    .entries
                    .push(SyncEntry {
                        local_collection: collection.clone(),
                        field_path: descriptor.field_path().clone(),
                        projected_fields: descriptor.projected_fields().to_vec(),
                        is_array: descriptor.is_array(),
                    });
            }
        }

        Ok(Catalog {
            config: self.config,
            schemas: self.schemas,
            tables,
            registrations,
        })
    }

    /// Drop reserved and unknown projected fields; fill in missing types
    /// from the target schema.
    fn reconcile(&self, collection: &str, descriptor: &ReferenceDescriptor) -> ReferenceDescriptor {
        let target = self.schemas.get(descriptor.target_collection());
        let mut fields = Vec::new();
        let mut options = BTreeMap::new();

        for field in descriptor.projected_fields() {
            if self.config.is_reserved(field) {
                tracing::warn!(
                    collection,
                    path = %descriptor.field_path(),
                    field = %field,
                    "reserved field dropped from projection"
                );
                continue;
            }

            let mut field_options = descriptor.options(field).cloned().unwrap_or_default();
            if let Some(target) = target {
                let Some(def) = target.lookup(field) else {
                    tracing::warn!(
                        collection,
                        path = %descriptor.field_path(),
                        target = descriptor.target_collection(),
                        field = %field,
                        "projected field not on target schema, dropped"
                    );
                    continue;
                };
                if field_options.ty.is_none() {
                    field_options.ty = def.kind.scalar_type();
                }
            }

            if field_options != FieldOptions::default() {
                options.insert(field.clone(), field_options);
            }
            fields.push(field.clone());
        }

        if fields.is_empty() && !descriptor.projected_fields().is_empty() {
            tracing::warn!(
                collection,
                path = %descriptor.field_path(),
                "every projected field was dropped; reference will not be kept in sync"
            );
        }
        descriptor.with_projection(fields, options)
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Frozen schemas, descriptor tables and sync registrations.
#[derive(Debug)]
pub struct Catalog {
    config: SyncConfig,
    schemas: BTreeMap<String, Schema>,
    tables: BTreeMap<String, Arc<DescriptorTable>>,
    registrations: BTreeMap<String, SyncRegistration>,
}

impl Catalog {
    pub fn builder(config: SyncConfig) -> CatalogBuilder {
        CatalogBuilder::new(config)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn schema(&self, collection: &str) -> Option<&Schema> {
        self.schemas.get(collection)
    }

    pub fn descriptors(&self, collection: &str) -> Option<&Arc<DescriptorTable>> {
        self.tables.get(collection)
    }

    /// Registration of a target collection, if any local schema copies
    /// fields from it.
    pub fn registration(&self, target: &str) -> Option<&SyncRegistration> {
        self.registrations.get(target)
    }

    pub fn registrations(&self) -> impl Iterator<Item = &SyncRegistration> {
        self.registrations.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncError;
    use refsync_schema::{FieldKind, ReferenceBuilder, ScalarType};

    fn reference(target: &str, fields: &[&str]) -> FieldKind {
        FieldKind::Reference(
            ReferenceBuilder::to(target)
                .on(fields.iter().copied())
                .build()
                .unwrap(),
        )
    }

    fn people() -> Schema {
        Schema::new()
            .field("name", FieldKind::String)
            .field("age", FieldKind::Number)
            .field("active", FieldKind::Boolean)
    }

    #[test]
    fn test_variant_target_conflict_still_builds() {
        let catalog = CatalogBuilder::default()
            .register("people", people())
            .unwrap()
            .register("teams", Schema::new().field("title", FieldKind::String))
            .unwrap()
            .register(
                "tasks",
                Schema::new()
                    .variant("a", Schema::new().field("owner", reference("people", &["name"])))
                    .variant("b", Schema::new().field("owner", reference("teams", &["title"]))),
            )
            .unwrap()
            .build()
            .unwrap();

        let tasks = catalog.descriptors("tasks").unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks.iter().next().unwrap().target_collection(), "people");
        assert!(catalog.registration("people").is_some());
        assert!(catalog.registration("teams").is_none());
    }

    #[test]
    fn test_registrations_group_entries_by_target() {
        let catalog = CatalogBuilder::default()
            .register("people", people())
            .unwrap()
            .register(
                "posts",
                Schema::new()
                    .field("author", reference("people", &["name"]))
                    .field(
                        "likes",
                        FieldKind::ReferenceArray(
                            ReferenceBuilder::to("people").on(["name", "age"]).build().unwrap(),
                        ),
                    ),
            )
            .unwrap()
            .register("teams", Schema::new().field("lead", reference("people", &["age"])))
            .unwrap()
            .build()
            .unwrap();

        let registration = catalog.registration("people").unwrap();
        assert_eq!(registration.entries.len(), 3);
        assert_eq!(registration.projectable_fields(), vec!["name", "age"]);
        assert!(registration
            .entries
            .iter()
            .any(|e| e.local_collection == "posts" && e.is_array));
        assert!(catalog.registration("posts").is_none());
    }

    #[test]
    fn test_unknown_projected_fields_are_dropped_and_types_inferred() {
        let catalog = CatalogBuilder::default()
            .register("people", people())
            .unwrap()
            .register(
                "posts",
                Schema::new().field("author", reference("people", &["name", "nickname"])),
            )
            .unwrap()
            .build()
            .unwrap();

        let table = catalog.descriptors("posts").unwrap();
        let author = table.get(&FieldPath::field("author").unwrap()).unwrap();
        assert_eq!(author.projected_fields(), &["name"]);
        assert_eq!(author.options("name").unwrap().ty, Some(ScalarType::String));
    }

    #[test]
    fn test_unregistered_target_keeps_declared_projection() {
        let catalog = CatalogBuilder::default()
            .register(
                "posts",
                Schema::new().field("author", reference("people", &["name", "nickname"])),
            )
            .unwrap()
            .build()
            .unwrap();
        let registration = catalog.registration("people").unwrap();
        assert_eq!(registration.entries[0].projected_fields, vec!["name", "nickname"]);
    }

    #[test]
    fn test_empty_projection_is_not_registered_for_sync() {
        let catalog = CatalogBuilder::default()
            .register("posts", Schema::new().field("author", reference("people", &[])))
            .unwrap()
            .build()
            .unwrap();
        assert!(catalog.registration("people").is_none());
        assert_eq!(catalog.descriptors("posts").unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_collection_is_rejected() {
        let err = CatalogBuilder::default()
            .register("people", people())
            .unwrap()
            .register("people", people())
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Schema(SchemaError::DuplicateCollection(name)) if name == "people"
        ));
    }

    #[test]
    fn test_register_json() {
        let schemas = serde_json::json!({
            "people": { "fields": [{ "name": "name", "kind": { "type": "string" } }] },
            "posts": { "fields": [{
                "name": "author",
                "kind": { "type": "reference", "target": "people", "project": ["name"] }
            }] }
        });
        let catalog = CatalogBuilder::default()
            .register_json(&schemas)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(catalog.collections().collect::<Vec<_>>(), vec!["people", "posts"]);
        assert!(catalog.registration("people").is_some());
    }
}
