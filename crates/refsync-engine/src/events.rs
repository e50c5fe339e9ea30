//! Sync events for observability.

use serde::{Deserialize, Serialize};

/// Events emitted by [`ReferenceSync`](crate::ReferenceSync).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// Reference objects of a local document were filled in before a write.
    Populated {
        collection: String,
        resolved: usize,
        unresolved: usize,
    },
    /// One registration entry was updated after a source change.
    Propagated {
        source: String,
        local_collection: String,
        path: String,
        removed: bool,
        matched: usize,
        modified: usize,
    },
    /// One registration entry could not be updated.
    PropagationFailed {
        source: String,
        local_collection: String,
        path: String,
        message: String,
    },
    /// References of a batch of local documents were resolved.
    BatchLoaded {
        collection: String,
        documents: usize,
        queries: usize,
        assigned: usize,
    },
    /// One target collection could not be fetched during a batch load.
    FetchFailed {
        collection: String,
        target: String,
        message: String,
    },
}

/// Event handler callback
pub type SyncEventHandler = Box<dyn Fn(SyncEvent) + Send + Sync>;
