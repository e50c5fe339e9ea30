//! Query execution contracts.

use crate::id::DocumentId;
use crate::query::{Filter, Mutation, Projection, UpdateOptions, UpdateOutcome};
use crate::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Query access to one collection.
///
/// All results are plain JSON. Implementations decide timeouts and retries;
/// callers add none.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Name of the collection this executor is bound to.
    fn collection(&self) -> &str;

    /// Look up one document, matching `id` in either stored form.
    async fn find_by_id(
        &self,
        id: &DocumentId,
        projection: &Projection,
    ) -> Result<Option<Value>, StoreError>;

    async fn find_many(
        &self,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Vec<Value>, StoreError>;

    /// Apply `mutation` to matching documents. Each document is updated
    /// atomically; atomicity across documents is up to the backend.
    async fn update_many(
        &self,
        filter: &Filter,
        mutation: &Mutation,
        options: &UpdateOptions,
    ) -> Result<UpdateOutcome, StoreError>;
}

/// Resolves collection names to executors. Injected into the engine in
/// place of any global model registry.
pub trait CollectionRegistry: Send + Sync {
    fn executor(&self, collection: &str) -> Option<Arc<dyn QueryExecutor>>;

    fn require(&self, collection: &str) -> Result<Arc<dyn QueryExecutor>, StoreError> {
        self.executor(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))
    }
}
