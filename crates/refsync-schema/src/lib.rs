//! Refsync schema layer
//!
//! Describes document shapes and the reference fields inside them:
//!
//! ```text
//!   Schema ──► fields ──► Embedded / EmbeddedArray ──► (recurse, prefixed)
//!     │                   Reference / ReferenceArray ──► ReferenceDescriptor
//!     └──► variants (polymorphic, walked at the same prefix)
//! ```
//!
//! The [`resolver`] flattens a schema into a [`DescriptorTable`], the
//! immutable index every write-time and read-time mechanism works from.

pub mod descriptor;
pub mod path;
pub mod reference;
pub mod resolver;
pub mod schema;

pub use descriptor::{DescriptorTable, ReferenceDescriptor};
pub use path::FieldPath;
pub use reference::{FieldOptions, ReferenceBuilder, ReferenceDef, RESERVED_FIELDS};
pub use resolver::resolve;
pub use schema::{FieldDef, FieldKind, ScalarType, Schema};

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while declaring or resolving schemas.
///
/// All of them surface at schema-registration time; none is produced on the
/// read or write path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("malformed field path '{path}': {reason}")]
    MalformedPath { path: String, reason: &'static str },
    #[error("{field} not included in reference object")]
    UnknownProjectedField { field: String },
    #[error("reference target collection must not be empty")]
    EmptyTarget,
    #[error("collection '{0}' registered twice")]
    DuplicateCollection(String),
    #[error("duplicate field '{field}' in schema")]
    DuplicateField { field: String },
}
