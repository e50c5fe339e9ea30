//! Refsync engine: keeps denormalized reference copies in sync
//!
//! ```text
//!            write local doc                      write source doc
//!                  │                                     │
//!   before-validate/before-save                     after-save
//!                  ▼                                     ▼
//!        ┌──────────────────┐                 ┌─────────────────────────┐
//!        │ PopulateOnWrite  │                 │ PropagateOnSourceChange │
//!        │ find_by_id per   │                 │ one update_many per     │
//!        │ referenced id    │                 │ SyncRegistration entry  │
//!        └──────────────────┘                 └─────────────────────────┘
//!                  │             read local docs         │
//!                  │                  │ after-find       │
//!                  │                  ▼                  │
//!                  │     ┌────────────────────────┐      │
//!                  │     │ BatchReferenceLoader   │      │
//!                  │     │ one find_many per      │      │
//!                  │     │ target collection      │      │
//!                  │     └────────────────────────┘      │
//!                  └───────────────┬─────────────────────┘
//!                                  ▼
//!                      Catalog (descriptor tables,
//!                      sync registrations, config)
//! ```
//!
//! [`ReferenceSync`] bundles the three behaviours and installs itself as a
//! lifecycle hook on any [`HookSink`](refsync_store::HookSink).

pub mod catalog;
pub mod config;
pub mod events;
pub mod loader;
pub mod populate;
pub mod propagate;
pub mod sync;
pub mod walk;

pub use catalog::{Catalog, CatalogBuilder, SyncEntry, SyncRegistration};
pub use config::SyncConfig;
pub use events::{SyncEvent, SyncEventHandler};
pub use loader::{BatchReferenceLoader, FetchFailure, LoadReport, PathPlan, SourcePlan};
pub use populate::{PopulateOnWrite, PopulateReport, POPULATE_MARKER};
pub use propagate::{
    EntryFailure, EntryReport, PropagateOnSourceChange, PropagationAction, PropagationReport,
};
pub use sync::{ReferenceHooks, ReferenceSync};

use refsync_schema::SchemaError;
use refsync_store::StoreError;

/// Errors raised by the synchronization engine.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("collection '{0}' is not registered in the catalog")]
    UnknownCollection(String),

    #[error("required reference '{path}' on '{collection}' has no identifier")]
    RequiredReference { collection: String, path: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("{failed} of {total} propagation entries failed for '{source_collection}': {first}")]
    Propagation {
        source_collection: String,
        failed: usize,
        total: usize,
        first: String,
    },
}

pub type Result<T> = std::result::Result<T, SyncError>;
