//! Read-time batch resolution of references.
//!
//! Loading happens in two phases. The plan is computed once per local
//! schema: descriptors are grouped by target collection and their
//! projections merged. Each call then runs a [`LoadSession`] that gathers
//! distinct identifiers over the whole batch, issues one `find_many` per
//! target collection and writes the results back into every occurrence.
//! Each occurrence only receives the fields its own path projects.

use crate::config::SyncConfig;
use crate::walk::{self, Occurrence};
use crate::SyncError;
use futures::future::join_all;
use refsync_schema::{DescriptorTable, FieldPath};
use refsync_store::{CollectionRegistry, DocumentId, FieldUpdate, Filter, Projection};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// One reference path and the fields it projects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPlan {
    pub path: FieldPath,
    /// Empty when the path takes the whole source document.
    pub projection: Projection,
}

/// Everything to load from one target collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePlan {
    pub collection: String,
    pub paths: Vec<PathPlan>,
    /// Union of projected fields, first-seen order.
    pub fields: Vec<String>,
    /// Some path declared no projection; whole documents are fetched.
    pub whole_documents: bool,
}

impl SourcePlan {
    pub fn projection(&self) -> Projection {
        if self.whole_documents || self.fields.is_empty() {
            Projection::all()
        } else {
            Projection::fields(self.fields.iter().cloned())
        }
    }
}

#[derive(Debug)]
pub struct FetchFailure {
    pub target: String,
    pub error: SyncError,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: usize,
    /// `find_many` calls issued.
    pub queries: usize,
    /// Source documents returned across all queries.
    pub fetched: usize,
    /// Occurrences that received source data.
    pub assigned: usize,
    /// Occurrences with an identifier but no matching source.
    pub unresolved: usize,
    pub failures: Vec<FetchFailure>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Resolves references of one local collection in batches.
pub struct BatchReferenceLoader {
    plans: Vec<SourcePlan>,
    registry: Arc<dyn CollectionRegistry>,
    id_field: String,
    reference_key: String,
}

impl BatchReferenceLoader {
    pub fn new(
        table: &DescriptorTable,
        registry: Arc<dyn CollectionRegistry>,
        config: &SyncConfig,
    ) -> Self {
        let mut plans: Vec<SourcePlan> = Vec::new();
        for descriptor in table.iter() {
            let target = descriptor.target_collection();
            let idx = match plans.iter().position(|p| p.collection == target) {
                Some(idx) => idx,
                None => {
                    plans.push(SourcePlan {
                        collection: target.to_string(),
                        paths: Vec::new(),
                        fields: Vec::new(),
                        whole_documents: false,
                    });
                    plans.len() - 1
                }
            };

            let plan = &mut plans[idx];
            plan.paths.push(PathPlan {
                path: descriptor.field_path().clone(),
                projection: Projection::fields(descriptor.projected_fields().iter().cloned()),
            });
            if descriptor.projected_fields().is_empty() {
                plan.whole_documents = true;
            }
            for field in descriptor.projected_fields() {
                if !plan.fields.contains(field) {
                    plan.fields.push(field.clone());
                }
            }
        }

        Self {
            plans,
            registry,
            id_field: config.id_field.clone(),
            reference_key: config.reference_key.clone(),
        }
    }

    pub fn plans(&self) -> &[SourcePlan] {
        &self.plans
    }

    /// Resolve every reference of `docs` in place.
    pub async fn load(&self, docs: &mut [Value]) -> LoadReport {
        let mut session = LoadSession::new(&self.plans);
        session.collect(docs, &self.reference_key);
        session.fetch(self.registry.as_ref(), &self.id_field).await;
        session.assign(docs, &self.reference_key, &self.id_field)
    }
}

/// Per-call state: identifiers to fetch and fetched documents.
struct LoadSession<'p> {
    plans: &'p [SourcePlan],
    pending: Vec<Vec<DocumentId>>,
    cache: Vec<Vec<Value>>,
    report: LoadReport,
}

impl<'p> LoadSession<'p> {
    fn new(plans: &'p [SourcePlan]) -> Self {
        Self {
            plans,
            pending: vec![Vec::new(); plans.len()],
            cache: vec![Vec::new(); plans.len()],
            report: LoadReport::default(),
        }
    }

    fn collect(&mut self, docs: &[Value], reference_key: &str) {
        self.report.documents = docs.len();
        for (plan, pending) in self.plans.iter().zip(&mut self.pending) {
            let mut seen = BTreeSet::new();
            for doc in docs {
                for planned in &plan.paths {
                    for location in walk::locate(doc, &planned.path) {
                        let id = walk::get(doc, &location)
                            .and_then(|value| walk::occurrence(value, reference_key).id());
                        if let Some(id) = id {
                            if seen.insert(id) {
                                pending.push(id);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn fetch(&mut self, registry: &dyn CollectionRegistry, id_field: &str) {
        let requests = self
            .plans
            .iter()
            .zip(&self.pending)
            .enumerate()
            .filter(|(_, (_, ids))| !ids.is_empty())
            .map(|(idx, (plan, ids))| async move {
                let result = async {
                    let executor = registry.require(&plan.collection)?;
                    let filter = Filter::ids_in_any_form(id_field, ids);
                    Ok::<_, SyncError>(executor.find_many(&filter, &plan.projection()).await?)
                }
                .await;
                (idx, result)
            });
        let results = join_all(requests).await;

        self.report.queries = results.len();
        for (idx, result) in results {
            match result {
                Ok(found) => {
                    self.report.fetched += found.len();
                    self.cache[idx] = found;
                }
                Err(error) => {
                    let target = self.plans[idx].collection.clone();
                    tracing::warn!(target = %target, %error, "batch fetch failed");
                    self.report.failures.push(FetchFailure { target, error });
                }
            }
        }
    }

    fn assign(mut self, docs: &mut [Value], reference_key: &str, id_field: &str) -> LoadReport {
        for (plan, cache) in self.plans.iter().zip(&self.cache) {
            for doc in docs.iter_mut() {
                for planned in &plan.paths {
                    for location in walk::locate(doc, &planned.path) {
                        let Some(slot) = walk::get_mut(doc, &location) else {
                            continue;
                        };
                        let (raw, id, bare) = match walk::occurrence(slot, reference_key) {
                            Occurrence::Empty => continue,
                            occurrence => (
                                occurrence.raw().cloned(),
                                occurrence.id(),
                                matches!(occurrence, Occurrence::Bare { .. }),
                            ),
                        };
                        let Some(raw) = raw else {
                            continue;
                        };

                        let Some(found) = find_cached(cache, id, &raw, id_field) else {
                            self.report.unresolved += 1;
                            continue;
                        };
                        if bare {
                            *slot = planned.projection.apply(found, id_field);
                        } else if let (Value::Object(target), Value::Object(source)) =
                            (&mut *slot, found)
                        {
                            let mut update = FieldUpdate::default();
                            if planned.projection.is_all() {
                                for (field, value) in source {
                                    if field != id_field && field != reference_key {
                                        update.assign.insert(field.clone(), value.clone());
                                    }
                                }
                            } else {
                                // Fields gone from the source must not linger on the copy.
                                for field in planned.projection.field_names() {
                                    match source.get(field) {
                                        Some(value) => {
                                            update.assign.insert(field.clone(), value.clone());
                                        }
                                        None => update.clear.push(field.clone()),
                                    }
                                }
                            }
                            update.apply(target);
                        }
                        self.report.assigned += 1;
                    }
                }
            }
        }
        self.report
    }
}

/// Match by identifier first, then by the raw stored value.
fn find_cached<'c>(
    cache: &'c [Value],
    id: Option<DocumentId>,
    raw: &Value,
    id_field: &str,
) -> Option<&'c Value> {
    id.and_then(|id| {
        cache
            .iter()
            .find(|doc| doc.get(id_field).and_then(DocumentId::from_value) == Some(id))
    })
    .or_else(|| cache.iter().find(|doc| doc.get(id_field) == Some(raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use refsync_schema::{resolve, FieldKind, ReferenceBuilder, Schema};
    use refsync_store::MemoryStore;
    use serde_json::json;

    fn reference(target: &str, fields: &[&str]) -> refsync_schema::ReferenceDef {
        ReferenceBuilder::to(target)
            .on(fields.iter().copied())
            .build()
            .unwrap()
    }

    #[test]
    fn test_plan_merges_paths_and_projections_per_target() {
        let schema = Schema::new()
            .field("author", FieldKind::Reference(reference("people", &["name"])))
            .field(
                "reviewers",
                FieldKind::ReferenceArray(reference("people", &["name", "age"])),
            )
            .field("venue", FieldKind::Reference(reference("places", &[])));
        let table = resolve(&schema).unwrap();
        let loader = BatchReferenceLoader::new(
            &table,
            Arc::new(MemoryStore::new()),
            &SyncConfig::default(),
        );

        let plans = loader.plans();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].collection, "people");
        assert_eq!(plans[0].paths.len(), 2);
        assert_eq!(plans[0].paths[0].projection, Projection::fields(["name"]));
        assert_eq!(plans[0].fields, vec!["name", "age"]);
        assert_eq!(plans[0].projection(), Projection::fields(["name", "age"]));
        assert!(plans[1].whole_documents);
        assert!(plans[1].projection().is_all());
    }

    #[test]
    fn test_find_cached_prefers_id_then_raw_value() {
        let id = DocumentId::new();
        let cache = vec![
            json!({ "_id": id.to_native(), "name": "native" }),
            json!({ "_id": "legacy-key", "name": "raw" }),
        ];
        let by_string = find_cached(&cache, Some(id), &id.to_string_form(), "_id").unwrap();
        assert_eq!(by_string["name"], json!("native"));

        let by_raw = find_cached(&cache, None, &json!("legacy-key"), "_id").unwrap();
        assert_eq!(by_raw["name"], json!("raw"));

        assert!(find_cached(&cache, None, &json!("other"), "_id").is_none());
    }

    #[tokio::test]
    async fn test_bare_ids_are_replaced_and_objects_augmented() {
        let store = MemoryStore::new();
        let frank = DocumentId::new();
        store
            .load_fixture(&json!({ "collections": { "people": [
                { "_id": frank.to_native(), "name": "Frank", "age": 30, "secret": "x" }
            ] } }))
            .unwrap();

        let table = resolve(
            &Schema::new()
                .field("author", FieldKind::Reference(reference("people", &["name"])))
                .field("editor", FieldKind::Reference(reference("people", &["name"]))),
        )
        .unwrap();
        let loader = BatchReferenceLoader::new(&table, Arc::new(store.clone()), &SyncConfig::default());

        let mut docs = vec![json!({
            "author": { "ref": frank.to_string() },
            "editor": frank.to_string()
        })];
        let report = loader.load(&mut docs).await;

        assert_eq!(report.queries, 1);
        assert_eq!(report.assigned, 2);
        assert_eq!(docs[0]["author"], json!({ "ref": frank.to_string(), "name": "Frank" }));
        assert_eq!(docs[0]["editor"], json!({ "_id": frank.to_native(), "name": "Frank" }));
    }

    #[tokio::test]
    async fn test_whole_document_path_does_not_widen_other_paths() {
        let store = MemoryStore::new();
        let frank = DocumentId::new();
        store
            .load_fixture(&json!({ "collections": { "people": [
                { "_id": frank.to_native(), "name": "Frank", "age": 30, "secret": "x" }
            ] } }))
            .unwrap();

        let table = resolve(
            &Schema::new()
                .field("author", FieldKind::Reference(reference("people", &["name"])))
                .field("owner", FieldKind::Reference(reference("people", &[]))),
        )
        .unwrap();
        let loader = BatchReferenceLoader::new(&table, Arc::new(store.clone()), &SyncConfig::default());
        assert!(loader.plans()[0].projection().is_all());

        let mut docs = vec![json!({
            "author": { "ref": frank.to_string() },
            "owner": { "ref": frank.to_string() }
        })];
        let report = loader.load(&mut docs).await;

        assert_eq!(report.queries, 1);
        assert_eq!(docs[0]["author"], json!({ "ref": frank.to_string(), "name": "Frank" }));
        assert_eq!(docs[0]["owner"]["secret"], json!("x"));
        assert_eq!(docs[0]["owner"]["age"], json!(30));
    }

    #[tokio::test]
    async fn test_field_removed_from_source_is_cleared_on_read() {
        let store = MemoryStore::new();
        let frank = DocumentId::new();
        store
            .load_fixture(&json!({ "collections": { "people": [
                { "_id": frank.to_native(), "name": "Frank" }
            ] } }))
            .unwrap();

        let table = resolve(
            &Schema::new().field("author", FieldKind::Reference(reference("people", &["name", "age"]))),
        )
        .unwrap();
        let loader = BatchReferenceLoader::new(&table, Arc::new(store.clone()), &SyncConfig::default());

        let mut docs = vec![json!({
            "author": { "ref": frank.to_string(), "name": "Old", "age": 99, "note": "kept" }
        })];
        loader.load(&mut docs).await;

        assert_eq!(
            docs[0]["author"],
            json!({ "ref": frank.to_string(), "name": "Frank", "note": "kept" })
        );
    }

    #[tokio::test]
    async fn test_no_identifiers_means_no_queries() {
        let store = MemoryStore::new();
        store
            .load_fixture(&json!({ "collections": { "people": [] } }))
            .unwrap();
        let table = resolve(
            &Schema::new().field("author", FieldKind::Reference(reference("people", &["name"]))),
        )
        .unwrap();
        let loader = BatchReferenceLoader::new(&table, Arc::new(store.clone()), &SyncConfig::default());

        let mut docs = vec![json!({ "title": "a" }), json!({ "author": null })];
        let report = loader.load(&mut docs).await;
        assert_eq!(report.queries, 0);
        assert_eq!(store.stats("people").total(), 0);
    }
}
