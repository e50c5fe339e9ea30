//! Write-time population of reference objects.

use crate::catalog::Catalog;
use crate::walk::{self, Location};
use crate::{Result, SyncError};
use futures::future::join_all;
use refsync_store::{
    CollectionRegistry, DocumentId, FieldUpdate, HookContext, Projection, QueryExecutor,
    StoreError, WriteState,
};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Marker recorded on a [`WriteState`] once population ran for that save.
pub const POPULATE_MARKER: &str = "refsync:populate";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulateReport {
    /// Occurrences whose source was found.
    pub resolved: usize,
    /// Occurrences whose source is gone; their projected fields were cleared.
    pub unresolved: usize,
    /// `find_by_id` calls issued.
    pub lookups: usize,
    /// Population already ran earlier in this save cycle.
    pub skipped: bool,
}

/// One distinct source document to fetch.
struct Fetch {
    executor: Arc<dyn QueryExecutor>,
    target: String,
    id: DocumentId,
    fields: Vec<String>,
}

/// One occurrence waiting for the result of `fetch`.
struct Slot {
    location: Location,
    fields: Vec<String>,
    fetch: usize,
}

/// Copies projected source fields onto a local document before it is stored.
pub struct PopulateOnWrite {
    catalog: Arc<Catalog>,
    registry: Arc<dyn CollectionRegistry>,
}

impl PopulateOnWrite {
    pub fn new(catalog: Arc<Catalog>, registry: Arc<dyn CollectionRegistry>) -> Self {
        Self { catalog, registry }
    }

    /// Populate the document of an in-flight write, once per save cycle.
    pub async fn run(&self, ctx: &HookContext, state: &mut WriteState) -> Result<PopulateReport> {
        if !state.mark_once(POPULATE_MARKER) {
            return Ok(PopulateReport {
                skipped: true,
                ..PopulateReport::default()
            });
        }
        self.populate(&ctx.collection, &mut state.document).await
    }

    /// Reject `doc` if a `required` reference has no identifier.
    ///
    /// A reference reached through an array may have no occurrence at all;
    /// only the occurrences that exist must carry an identifier.
    pub fn check_required(&self, collection: &str, doc: &Value) -> Result<()> {
        let Some(table) = self.catalog.descriptors(collection) else {
            return Ok(());
        };
        let key = &self.catalog.config().reference_key;

        for descriptor in table.iter().filter(|d| d.is_required()) {
            let locations = walk::locate(doc, descriptor.field_path());
            let has_id = |location: &Location| {
                walk::get(doc, location)
                    .and_then(|value| walk::occurrence(value, key).id())
                    .is_some()
            };
            let absent = locations.is_empty() && !descriptor.crosses_array();
            if absent || !locations.iter().all(has_id) {
                return Err(SyncError::RequiredReference {
                    collection: collection.to_string(),
                    path: descriptor.field_path().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Fill every reference occurrence of `doc` from its source.
    ///
    /// All lookups complete before the document is touched, so a failing
    /// lookup leaves `doc` unchanged.
    pub async fn populate(&self, collection: &str, doc: &mut Value) -> Result<PopulateReport> {
        let Some(table) = self.catalog.descriptors(collection) else {
            return Ok(PopulateReport::default());
        };
        let key = self.catalog.config().reference_key.clone();

        let mut fetches: Vec<Fetch> = Vec::new();
        let mut slots: Vec<Slot> = Vec::new();

        for descriptor in table.iter().filter(|d| !d.projected_fields().is_empty()) {
            let target = descriptor.target_collection();
            let Some(executor) = self.registry.executor(target) else {
                tracing::debug!(collection, target, "target not registered, skipping");
                continue;
            };

            for location in walk::locate(doc, descriptor.field_path()) {
                let Some(id) = walk::get(doc, &location)
                    .and_then(|value| walk::occurrence(value, &key).id())
                else {
                    continue;
                };

                let fetch = match fetches
                    .iter()
                    .position(|f| f.target == target && f.id == id)
                {
                    Some(idx) => {
                        let fields = &mut fetches[idx].fields;
                        for field in descriptor.projected_fields() {
                            if !fields.contains(field) {
                                fields.push(field.clone());
                            }
                        }
                        idx
                    }
                    None => {
                        fetches.push(Fetch {
                            executor: Arc::clone(&executor),
                            target: target.to_string(),
                            id,
                            fields: descriptor.projected_fields().to_vec(),
                        });
                        fetches.len() - 1
                    }
                };
                slots.push(Slot {
                    location,
                    fields: descriptor.projected_fields().to_vec(),
                    fetch,
                });
            }
        }

        if slots.is_empty() {
            return Ok(PopulateReport::default());
        }

        let projections: Vec<Projection> = fetches
            .iter()
            .map(|f| Projection::fields(f.fields.iter().cloned()))
            .collect();
        let lookups = fetches
            .iter()
            .zip(&projections)
            .map(|(f, projection)| f.executor.find_by_id(&f.id, projection));
        let found = join_all(lookups)
            .await
            .into_iter()
            .collect::<std::result::Result<Vec<_>, StoreError>>()?;

        let mut report = PopulateReport {
            lookups: fetches.len(),
            ..PopulateReport::default()
        };
        for slot in &slots {
            let source = found[slot.fetch].as_ref();
            let Some(target) = walk::get_mut(doc, &slot.location) else {
                continue;
            };
            let Some(object) = reference_object(target, &key) else {
                continue;
            };

            let mut update = FieldUpdate::default();
            for field in &slot.fields {
                match source.and_then(|s| s.get(field)) {
                    Some(value) => {
                        update.assign.insert(field.clone(), value.clone());
                    }
                    None => update.clear.push(field.clone()),
                }
            }
            update.apply(object);

            if source.is_some() {
                report.resolved += 1;
            } else {
                report.unresolved += 1;
                tracing::debug!(
                    collection,
                    location = %slot.location,
                    target = %fetches[slot.fetch].target,
                    id = %fetches[slot.fetch].id,
                    "source missing, projected fields cleared"
                );
            }
        }

        Ok(report)
    }
}

/// The reference object at `slot`; a bare identifier is wrapped into one.
fn reference_object<'a>(slot: &'a mut Value, key: &str) -> Option<&'a mut Map<String, Value>> {
    if DocumentId::from_value(slot).is_some() {
        let raw = std::mem::take(slot);
        let mut wrapped = Map::new();
        wrapped.insert(key.to_string(), raw);
        *slot = Value::Object(wrapped);
    }
    slot.as_object_mut()
}
