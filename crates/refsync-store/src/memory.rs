//! In-memory document store.
//!
//! Collections are ordered maps guarded by `parking_lot` locks. Each
//! [`MemoryExecutor`] counts the queries it serves so callers can check how
//! many round trips an operation cost.

use crate::executor::{CollectionRegistry, QueryExecutor};
use crate::hooks::{HookContext, HookEvent, HookSink, LifecycleHook, SavedDocument, WriteState};
use crate::id::DocumentId;
use crate::query::{Filter, Mutation, Projection, UpdateOptions, UpdateOutcome};
use crate::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStoreConfig {
    /// Field holding each document's identifier.
    #[serde(default = "default_id_field")]
    pub id_field: String,
}

fn default_id_field() -> String {
    "_id".to_string()
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            id_field: default_id_field(),
        }
    }
}

// ============================================================================
// Query accounting
// ============================================================================

#[derive(Debug, Default)]
struct QueryStats {
    find_by_id: AtomicUsize,
    find_many: AtomicUsize,
    update_many: AtomicUsize,
}

/// Snapshot of the queries served for one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueryCounts {
    pub find_by_id: usize,
    pub find_many: usize,
    pub update_many: usize,
}

impl QueryCounts {
    pub fn total(&self) -> usize {
        self.find_by_id + self.find_many + self.update_many
    }
}

impl QueryStats {
    fn snapshot(&self) -> QueryCounts {
        QueryCounts {
            find_by_id: self.find_by_id.load(Ordering::Relaxed),
            find_many: self.find_many.load(Ordering::Relaxed),
            update_many: self.update_many.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.find_by_id.store(0, Ordering::Relaxed);
        self.find_many.store(0, Ordering::Relaxed);
        self.update_many.store(0, Ordering::Relaxed);
    }
}

// ============================================================================
// Store
// ============================================================================

struct CollectionData {
    name: String,
    docs: RwLock<BTreeMap<DocumentId, Value>>,
    stats: QueryStats,
}

impl CollectionData {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            docs: RwLock::new(BTreeMap::new()),
            stats: QueryStats::default(),
        }
    }
}

struct StoreInner {
    config: MemoryStoreConfig,
    collections: RwLock<BTreeMap<String, Arc<CollectionData>>>,
    hooks: RwLock<BTreeMap<String, Vec<Arc<dyn LifecycleHook>>>>,
    operations: AtomicU64,
}

/// Cheap to clone; clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    pub fn with_config(config: MemoryStoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                collections: RwLock::new(BTreeMap::new()),
                hooks: RwLock::new(BTreeMap::new()),
                operations: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &MemoryStoreConfig {
        &self.inner.config
    }

    fn data(&self, name: &str) -> Arc<CollectionData> {
        if let Some(data) = self.inner.collections.read().get(name) {
            return Arc::clone(data);
        }
        let mut collections = self.inner.collections.write();
        Arc::clone(
            collections
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CollectionData::new(name))),
        )
    }

    /// Handle on `name`, creating the collection if needed.
    pub fn collection(&self, name: &str) -> Collection {
        Collection {
            store: self.clone(),
            data: self.data(name),
        }
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.inner.collections.read().keys().cloned().collect()
    }

    fn hooks_for(&self, collection: &str) -> Vec<Arc<dyn LifecycleHook>> {
        self.inner
            .hooks
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn next_operation(&self) -> u64 {
        self.inner.operations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Queries served for `collection` since creation or the last reset.
    pub fn stats(&self, collection: &str) -> QueryCounts {
        self.inner
            .collections
            .read()
            .get(collection)
            .map(|data| data.stats.snapshot())
            .unwrap_or_default()
    }

    pub fn reset_stats(&self) {
        for data in self.inner.collections.read().values() {
            data.stats.reset();
        }
    }

    /// Bulk-insert documents without running hooks.
    ///
    /// Expected shape: `{ "collections": { "<name>": [ { "_id": ..., ... } ] } }`.
    /// Documents without an id get a fresh one; ids in string form are
    /// stored natively.
    pub fn load_fixture(&self, fixture: &Value) -> Result<usize, StoreError> {
        let collections = fixture
            .get("collections")
            .and_then(Value::as_object)
            .ok_or_else(|| StoreError::Fixture("missing 'collections' object".to_string()))?;

        let mut loaded = 0;
        for (name, docs) in collections {
            let docs = docs.as_array().ok_or_else(|| {
                StoreError::Fixture(format!("collection '{name}' must be an array"))
            })?;
            let data = self.data(name);
            let mut stored = data.docs.write();
            for doc in docs {
                let mut doc = doc.clone();
                let id = self.assign_id(&mut doc)?;
                stored.insert(id, doc);
                loaded += 1;
            }
        }

        tracing::debug!(documents = loaded, "fixture loaded");
        Ok(loaded)
    }

    /// Every stored document, in the shape [`Self::load_fixture`] accepts.
    pub fn export_fixture(&self) -> Value {
        let collections: serde_json::Map<String, Value> = self
            .inner
            .collections
            .read()
            .iter()
            .map(|(name, data)| {
                let docs = data.docs.read().values().cloned().collect();
                (name.clone(), Value::Array(docs))
            })
            .collect();
        serde_json::json!({ "collections": collections })
    }

    /// Normalize or generate the id of `doc`.
    fn assign_id(&self, doc: &mut Value) -> Result<DocumentId, StoreError> {
        let id_field = &self.inner.config.id_field;
        let map = doc.as_object_mut().ok_or(StoreError::NotAnObject)?;
        let id = match map.get(id_field) {
            None | Some(Value::Null) => DocumentId::new(),
            Some(raw) => DocumentId::from_value(raw).ok_or_else(|| StoreError::MissingId {
                field: id_field.clone(),
            })?,
        };
        map.insert(id_field.clone(), id.to_native());
        Ok(id)
    }
}

impl HookSink for MemoryStore {
    fn register_hook(&self, collection: &str, hook: Arc<dyn LifecycleHook>) {
        self.data(collection);
        self.inner
            .hooks
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(hook);
    }
}

impl CollectionRegistry for MemoryStore {
    fn executor(&self, collection: &str) -> Option<Arc<dyn QueryExecutor>> {
        let data = self.inner.collections.read().get(collection).cloned()?;
        Some(Arc::new(MemoryExecutor {
            data,
            id_field: self.inner.config.id_field.clone(),
        }))
    }
}

// ============================================================================
// Executor
// ============================================================================

pub struct MemoryExecutor {
    data: Arc<CollectionData>,
    id_field: String,
}

#[async_trait]
impl QueryExecutor for MemoryExecutor {
    fn collection(&self) -> &str {
        &self.data.name
    }

    async fn find_by_id(
        &self,
        id: &DocumentId,
        projection: &Projection,
    ) -> Result<Option<Value>, StoreError> {
        self.data.stats.find_by_id.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .data
            .docs
            .read()
            .get(id)
            .map(|doc| projection.apply(doc, &self.id_field)))
    }

    async fn find_many(
        &self,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Vec<Value>, StoreError> {
        self.data.stats.find_many.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .data
            .docs
            .read()
            .values()
            .filter(|doc| filter.matches(doc))
            .map(|doc| projection.apply(doc, &self.id_field))
            .collect())
    }

    async fn update_many(
        &self,
        filter: &Filter,
        mutation: &Mutation,
        options: &UpdateOptions,
    ) -> Result<UpdateOutcome, StoreError> {
        self.data.stats.update_many.fetch_add(1, Ordering::Relaxed);
        let mut outcome = UpdateOutcome::default();
        let mut docs = self.data.docs.write();

        for doc in docs.values_mut() {
            if !filter.matches(doc) {
                continue;
            }
            outcome.matched += 1;

            // Mutate a copy and swap it in so a document is never observed
            // half-updated.
            let mut next = doc.clone();
            if mutation.apply(&mut next) {
                *doc = next;
                outcome.modified += 1;
            }
            if !options.multi {
                break;
            }
        }

        tracing::debug!(
            collection = %self.data.name,
            path = mutation.path(),
            matched = outcome.matched,
            modified = outcome.modified,
            "update_many"
        );
        Ok(outcome)
    }
}

// ============================================================================
// Collection handle (hook dispatch)
// ============================================================================

/// Collection handle that runs the registered lifecycle hooks around
/// writes and reads.
#[derive(Clone)]
pub struct Collection {
    store: MemoryStore,
    data: Arc<CollectionData>,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn len(&self) -> usize {
        self.data.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored document, bypassing hooks.
    pub fn get_raw(&self, id: &DocumentId) -> Option<Value> {
        self.data.docs.read().get(id).cloned()
    }

    /// Persist `document` (insert or replace, by id) and return it as stored.
    ///
    /// Runs before-validate, before-save, the write, then after-save. A
    /// failing before-hook aborts the write; a failing after-save hook is
    /// reported after the document is already stored.
    pub async fn save(&self, mut document: Value) -> Result<Value, StoreError> {
        let id = self.store.assign_id(&mut document)?;
        let previous = self.get_raw(&id);
        let hooks = self.store.hooks_for(self.name());
        let ctx = HookContext::new(
            self.name(),
            HookEvent::BeforeValidate,
            self.store.next_operation(),
        );

        let mut state = WriteState::new(document, previous.is_none());
        for hook in &hooks {
            hook.before_validate(&ctx, &mut state)
                .await
                .map_err(|source| self.hook_error(HookEvent::BeforeValidate, source))?;
        }
        let ctx = ctx.with_event(HookEvent::BeforeSave);
        for hook in &hooks {
            hook.before_save(&ctx, &mut state)
                .await
                .map_err(|source| self.hook_error(HookEvent::BeforeSave, source))?;
        }

        let was_new = state.is_new();
        let mut document = state.into_document();
        let stored_id = self.store.assign_id(&mut document)?;
        if stored_id != id {
            return Err(StoreError::Backend(format!(
                "hooks moved document {id} to {stored_id}"
            )));
        }
        let modified = modified_fields(previous.as_ref(), &document);
        self.data.docs.write().insert(id, document.clone());

        tracing::debug!(
            collection = %self.name(),
            %id,
            was_new,
            modified = modified.len(),
            "document saved"
        );

        let saved = SavedDocument {
            document,
            previous,
            was_new,
            modified,
        };
        let ctx = ctx.with_event(HookEvent::AfterSave);
        for hook in &hooks {
            hook.after_save(&ctx, &saved)
                .await
                .map_err(|source| self.hook_error(HookEvent::AfterSave, source))?;
        }

        Ok(saved.document)
    }

    /// Documents matching `filter`, after after-find hooks ran on the batch.
    pub async fn find(&self, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        let mut docs: Vec<Value> = self
            .data
            .docs
            .read()
            .values()
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect();
        self.run_after_find(&mut docs).await?;
        Ok(docs)
    }

    pub async fn find_by_id(&self, id: &DocumentId) -> Result<Option<Value>, StoreError> {
        let Some(doc) = self.get_raw(id) else {
            return Ok(None);
        };
        let mut docs = vec![doc];
        self.run_after_find(&mut docs).await?;
        Ok(docs.pop())
    }

    async fn run_after_find(&self, docs: &mut [Value]) -> Result<(), StoreError> {
        let hooks = self.store.hooks_for(self.name());
        let ctx = HookContext::new(self.name(), HookEvent::AfterFind, self.store.next_operation());
        for hook in &hooks {
            hook.after_find(&ctx, docs)
                .await
                .map_err(|source| self.hook_error(HookEvent::AfterFind, source))?;
        }
        Ok(())
    }

    fn hook_error(&self, event: HookEvent, source: anyhow::Error) -> StoreError {
        StoreError::Hook {
            event,
            collection: self.name().to_string(),
            source,
        }
    }
}

/// Top-level fields that differ between the stored and the new version.
fn modified_fields(previous: Option<&Value>, current: &Value) -> BTreeSet<String> {
    let empty = serde_json::Map::new();
    let before = previous.and_then(Value::as_object).unwrap_or(&empty);
    let after = current.as_object().unwrap_or(&empty);

    after
        .keys()
        .chain(before.keys())
        .filter(|key| before.get(*key) != after.get(*key))
        .cloned()
        .collect()
}
