//! Propagation of source changes into referencing documents.

use crate::catalog::{Catalog, SyncEntry};
use crate::config::SyncConfig;
use crate::{Result, SyncError};
use futures::future::join_all;
use refsync_store::{
    CollectionRegistry, DocumentId, FieldUpdate, Filter, Mutation, SavedDocument, UpdateOptions,
    UpdateOutcome,
};
use serde_json::Value;
use std::sync::Arc;

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationAction {
    /// Listed fields were set (or cleared when gone from the source).
    Updated { fields: Vec<String> },
    /// The source is inactive; references to it were removed.
    Removed,
    /// Nothing this entry projects changed.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryReport {
    pub local_collection: String,
    pub field_path: String,
    pub action: PropagationAction,
    pub outcome: UpdateOutcome,
}

#[derive(Debug)]
pub struct EntryFailure {
    pub local_collection: String,
    pub field_path: String,
    pub error: SyncError,
}

/// Result of propagating one source save.
#[derive(Debug, Default)]
pub struct PropagationReport {
    pub source_collection: String,
    pub source_id: Option<DocumentId>,
    /// The source was created by this save; nothing can reference it yet.
    pub skipped_new: bool,
    pub applied: Vec<EntryReport>,
    pub failures: Vec<EntryFailure>,
}

impl PropagationReport {
    fn new(source_collection: &str) -> Self {
        Self {
            source_collection: source_collection.to_string(),
            ..Self::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Documents modified across all entries.
    pub fn modified(&self) -> usize {
        self.applied.iter().map(|e| e.outcome.modified).sum()
    }

    /// Collapse failures into a single error.
    pub fn ensure_clean(&self) -> Result<()> {
        match self.failures.first() {
            None => Ok(()),
            Some(first) => Err(SyncError::Propagation {
                source_collection: self.source_collection.clone(),
                failed: self.failures.len(),
                total: self.failures.len() + self.applied.len(),
                first: first.error.to_string(),
            }),
        }
    }
}

// ============================================================================
// Propagation
// ============================================================================

/// `true` unless the active flag is explicitly `false`.
pub fn is_active(doc: &Value, active_field: &str) -> bool {
    doc.get(active_field) != Some(&Value::Bool(false))
}

/// Pushes changed projected fields of a saved source document into every
/// local document that references it.
pub struct PropagateOnSourceChange {
    catalog: Arc<Catalog>,
    registry: Arc<dyn CollectionRegistry>,
}

impl PropagateOnSourceChange {
    pub fn new(catalog: Arc<Catalog>, registry: Arc<dyn CollectionRegistry>) -> Self {
        Self { catalog, registry }
    }

    /// Run every registration entry of `collection` concurrently. Entry
    /// failures are collected, never raised; the source stays saved.
    pub async fn run(&self, collection: &str, saved: &SavedDocument) -> PropagationReport {
        let mut report = PropagationReport::new(collection);
        if saved.was_new {
            report.skipped_new = true;
            return report;
        }
        let Some(registration) = self.catalog.registration(collection) else {
            return report;
        };

        let config = self.catalog.config();
        let Some(id) = saved
            .document
            .get(&config.id_field)
            .and_then(DocumentId::from_value)
        else {
            tracing::warn!(collection, "saved source has no identifier, not propagating");
            return report;
        };
        report.source_id = Some(id);

        let active = is_active(&saved.document, &config.active_field);
        let reactivated = active
            && saved
                .previous
                .as_ref()
                .is_some_and(|previous| !is_active(previous, &config.active_field));
        let change = Change {
            id,
            active,
            reactivated,
            saved,
        };

        let results = join_all(
            registration
                .entries
                .iter()
                .map(|entry| self.apply_entry(entry, &change, config)),
        )
        .await;

        for (entry, result) in registration.entries.iter().zip(results) {
            match result {
                Ok(applied) => {
                    tracing::debug!(
                        source = collection,
                        %id,
                        local = %entry.local_collection,
                        path = %entry.field_path,
                        action = ?applied.action,
                        modified = applied.outcome.modified,
                        "propagation entry applied"
                    );
                    report.applied.push(applied);
                }
                Err(error) => {
                    tracing::warn!(
                        source = collection,
                        %id,
                        local = %entry.local_collection,
                        path = %entry.field_path,
                        %error,
                        "propagation entry failed"
                    );
                    report.failures.push(EntryFailure {
                        local_collection: entry.local_collection.clone(),
                        field_path: entry.field_path.to_string(),
                        error,
                    });
                }
            }
        }

        report
    }

    async fn apply_entry(
        &self,
        entry: &SyncEntry,
        change: &Change<'_>,
        config: &SyncConfig,
    ) -> Result<EntryReport> {
        let report = |action, outcome| EntryReport {
            local_collection: entry.local_collection.clone(),
            field_path: entry.field_path.to_string(),
            action,
            outcome,
        };

        let fields: Vec<String> = entry
            .projected_fields
            .iter()
            .filter(|f| change.reactivated || change.saved.is_modified(f))
            .cloned()
            .collect();
        if change.active && fields.is_empty() {
            return Ok(report(PropagationAction::Skipped, UpdateOutcome::default()));
        }

        let executor = self.registry.require(&entry.local_collection)?;
        let key = &config.reference_key;
        let path = entry.field_path.to_string();
        let filter = Filter::id_in_any_form(entry.field_path.dotted_with(key), &change.id);
        let when = Filter::id_in_any_form(key.as_str(), &change.id);

        let (mutation, action) = if change.active {
            let mut update = FieldUpdate::default();
            for field in &fields {
                match change.saved.document.get(field) {
                    Some(value) => {
                        update.assign.insert(field.clone(), value.clone());
                    }
                    None => update.clear.push(field.clone()),
                }
            }
            let mutation = if entry.is_array {
                Mutation::SetElements { path, when, update }
            } else {
                Mutation::Set { path, when, update }
            };
            (mutation, PropagationAction::Updated { fields })
        } else if entry.is_array {
            (Mutation::Pull { path, when }, PropagationAction::Removed)
        } else {
            (Mutation::Unset { path, when }, PropagationAction::Removed)
        };

        let outcome = executor
            .update_many(&filter, &mutation, &UpdateOptions::default())
            .await?;
        Ok(report(action, outcome))
    }
}

/// What changed about one source document.
struct Change<'a> {
    id: DocumentId,
    active: bool,
    reactivated: bool,
    saved: &'a SavedDocument,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_active_flag_means_active() {
        assert!(is_active(&json!({}), "active"));
        assert!(is_active(&json!({ "active": true }), "active"));
        assert!(is_active(&json!({ "active": null }), "active"));
        assert!(!is_active(&json!({ "active": false }), "active"));
    }

    #[test]
    fn test_ensure_clean_summarizes_failures() {
        let mut report = PropagationReport::new("people");
        assert!(report.ensure_clean().is_ok());

        report.failures.push(EntryFailure {
            local_collection: "posts".into(),
            field_path: "author".into(),
            error: SyncError::UnknownCollection("posts".into()),
        });
        report.applied.push(EntryReport {
            local_collection: "teams".into(),
            field_path: "lead".into(),
            action: PropagationAction::Skipped,
            outcome: UpdateOutcome::default(),
        });

        let err = report.ensure_clean().unwrap_err();
        assert!(matches!(err, SyncError::Propagation { failed: 1, total: 2, .. }));
        assert!(err.to_string().contains("posts"));
    }
}
