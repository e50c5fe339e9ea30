//! Refsync document store contracts
//!
//! The synchronization engine never talks to a database directly. It goes
//! through the two collaborator contracts defined here:
//!
//! ```text
//! ┌──────────────────────┐   find_by_id / find_many / update_many   ┌───────────────┐
//! │   refsync engine     │─────────────────────────────────────────►│ QueryExecutor │
//! │ (populate/propagate/ │                                          │ (per collection)
//! │  batch loader)       │◄──── before_validate / before_save ──────┤               │
//! └──────────────────────┘      after_save / after_find             │ LifecycleHook │
//!                                                                   │     sink      │
//!                                                                   └───────────────┘
//! ```
//!
//! [`MemoryStore`] implements both on top of in-process maps; it is what the
//! CLI and the test suites run against.
//!
//! ## Identifier forms
//!
//! A [`DocumentId`] is stored natively as `{"$oid": "<uuid>"}` but older data
//! may hold the bare string `"<uuid>"`. The store boundary owns that
//! ambiguity: [`Filter::id_in_any_form`] and [`Filter::ids_in_any_form`] are
//! the only places that spell out both forms.

pub mod executor;
pub mod hooks;
pub mod id;
pub mod memory;
pub mod paths;
pub mod query;

pub use executor::{CollectionRegistry, QueryExecutor};
pub use hooks::{HookContext, HookEvent, HookSink, LifecycleHook, SavedDocument, WriteState};
pub use id::DocumentId;
pub use memory::{Collection, MemoryExecutor, MemoryStore, MemoryStoreConfig, QueryCounts};
pub use query::{FieldUpdate, Filter, Mutation, Projection, UpdateOptions, UpdateOutcome};

/// Errors surfaced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),
    #[error("document has no valid identifier in field '{field}'")]
    MissingId { field: String },
    #[error("invalid identifier '{0}'")]
    InvalidId(String),
    #[error("document must be a JSON object")]
    NotAnObject,
    #[error("{event} hook failed on '{collection}': {source}")]
    Hook {
        event: HookEvent,
        collection: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("backend error: {0}")]
    Backend(String),
    #[error("invalid fixture: {0}")]
    Fixture(String),
}
