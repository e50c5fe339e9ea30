//! Reference sync manager: wires populate, propagate and batch loading
//! into a host store's lifecycle hooks.

use crate::catalog::Catalog;
use crate::events::{SyncEvent, SyncEventHandler};
use crate::loader::{BatchReferenceLoader, LoadReport};
use crate::populate::{PopulateOnWrite, PopulateReport};
use crate::propagate::{PropagateOnSourceChange, PropagationAction, PropagationReport};
use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use refsync_store::{
    CollectionRegistry, HookContext, HookSink, LifecycleHook, SavedDocument, WriteState,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct ReferenceSync {
    catalog: Arc<Catalog>,
    populate: PopulateOnWrite,
    propagate: PropagateOnSourceChange,
    /// Batch loaders, one per local collection with references.
    loaders: BTreeMap<String, BatchReferenceLoader>,
    event_handlers: RwLock<Vec<Arc<dyn Fn(SyncEvent) + Send + Sync>>>,
}

impl ReferenceSync {
    pub fn new(catalog: Catalog, registry: Arc<dyn CollectionRegistry>) -> Self {
        let catalog = Arc::new(catalog);
        let loaders = catalog
            .collections()
            .filter_map(|collection| {
                let table = catalog.descriptors(collection)?;
                (!table.is_empty()).then(|| {
                    (
                        collection.to_string(),
                        BatchReferenceLoader::new(table, Arc::clone(&registry), catalog.config()),
                    )
                })
            })
            .collect();

        Self {
            populate: PopulateOnWrite::new(Arc::clone(&catalog), Arc::clone(&registry)),
            propagate: PropagateOnSourceChange::new(Arc::clone(&catalog), registry),
            catalog,
            loaders,
            event_handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn loader(&self, collection: &str) -> Option<&BatchReferenceLoader> {
        self.loaders.get(collection)
    }

    /// Register an event handler. Handlers may register further handlers;
    /// those see events emitted from then on.
    pub fn on_event(&self, handler: SyncEventHandler) {
        self.event_handlers.write().push(Arc::from(handler));
    }

    fn emit(&self, event: SyncEvent) {
        // Snapshot so no lock is held while handlers run.
        let handlers = self.event_handlers.read().clone();
        for handler in &handlers {
            handler(event.clone());
        }
    }

    /// Register hooks for every catalog collection on `sink`.
    pub fn install(self: &Arc<Self>, sink: &dyn HookSink) {
        let hooks: Arc<dyn LifecycleHook> = Arc::new(ReferenceHooks {
            sync: Arc::clone(self),
        });
        for collection in self.catalog.collections() {
            sink.register_hook(collection, Arc::clone(&hooks));
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    pub fn check_required(&self, collection: &str, doc: &Value) -> Result<()> {
        self.populate.check_required(collection, doc)
    }

    pub async fn populate(&self, collection: &str, doc: &mut Value) -> Result<PopulateReport> {
        let report = self.populate.populate(collection, doc).await?;
        self.emit_populated(collection, &report);
        Ok(report)
    }

    async fn populate_state(
        &self,
        ctx: &HookContext,
        state: &mut WriteState,
    ) -> Result<PopulateReport> {
        let report = self.populate.run(ctx, state).await?;
        if !report.skipped {
            self.emit_populated(&ctx.collection, &report);
        }
        Ok(report)
    }

    fn emit_populated(&self, collection: &str, report: &PopulateReport) {
        if report.resolved + report.unresolved > 0 {
            self.emit(SyncEvent::Populated {
                collection: collection.to_string(),
                resolved: report.resolved,
                unresolved: report.unresolved,
            });
        }
    }

    pub async fn propagate(&self, collection: &str, saved: &SavedDocument) -> PropagationReport {
        let report = self.propagate.run(collection, saved).await;

        for entry in &report.applied {
            if entry.action == PropagationAction::Skipped {
                continue;
            }
            self.emit(SyncEvent::Propagated {
                source: collection.to_string(),
                local_collection: entry.local_collection.clone(),
                path: entry.field_path.clone(),
                removed: entry.action == PropagationAction::Removed,
                matched: entry.outcome.matched,
                modified: entry.outcome.modified,
            });
        }
        for failure in &report.failures {
            self.emit(SyncEvent::PropagationFailed {
                source: collection.to_string(),
                local_collection: failure.local_collection.clone(),
                path: failure.field_path.clone(),
                message: failure.error.to_string(),
            });
        }
        report
    }

    /// Resolve the references of a batch of `collection` documents.
    pub async fn load(&self, collection: &str, docs: &mut [Value]) -> LoadReport {
        let Some(loader) = self.loaders.get(collection) else {
            return LoadReport {
                documents: docs.len(),
                ..LoadReport::default()
            };
        };
        let report = loader.load(docs).await;

        for failure in &report.failures {
            self.emit(SyncEvent::FetchFailed {
                collection: collection.to_string(),
                target: failure.target.clone(),
                message: failure.error.to_string(),
            });
        }
        if report.queries > 0 {
            self.emit(SyncEvent::BatchLoaded {
                collection: collection.to_string(),
                documents: report.documents,
                queries: report.queries,
                assigned: report.assigned,
            });
        }
        report
    }
}

// ============================================================================
// Lifecycle hooks
// ============================================================================

/// [`LifecycleHook`] adapter installed by [`ReferenceSync::install`].
pub struct ReferenceHooks {
    sync: Arc<ReferenceSync>,
}

impl ReferenceHooks {
    pub fn new(sync: Arc<ReferenceSync>) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl LifecycleHook for ReferenceHooks {
    async fn before_validate(&self, ctx: &HookContext, state: &mut WriteState) -> anyhow::Result<()> {
        self.sync.check_required(&ctx.collection, &state.document)?;
        self.sync.populate_state(ctx, state).await?;
        Ok(())
    }

    async fn before_save(&self, ctx: &HookContext, state: &mut WriteState) -> anyhow::Result<()> {
        self.sync.populate_state(ctx, state).await?;
        Ok(())
    }

    async fn after_save(&self, ctx: &HookContext, saved: &SavedDocument) -> anyhow::Result<()> {
        let report = self.sync.propagate(&ctx.collection, saved).await;
        if self.sync.catalog.config().fail_save_on_propagation_error {
            report.ensure_clean()?;
        }
        Ok(())
    }

    async fn after_find(&self, ctx: &HookContext, docs: &mut [Value]) -> anyhow::Result<()> {
        self.sync.load(&ctx.collection, docs).await;
        Ok(())
    }
}
