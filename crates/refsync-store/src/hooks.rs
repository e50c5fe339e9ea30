//! Lifecycle hook sink.
//!
//! Handlers receive the collection and event through an explicit
//! [`HookContext`] plus the in-flight document(s). Returning an error from a
//! `before_*` handler aborts the write.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    BeforeValidate,
    BeforeSave,
    AfterSave,
    AfterFind,
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BeforeValidate => "before-validate",
            Self::BeforeSave => "before-save",
            Self::AfterSave => "after-save",
            Self::AfterFind => "after-find",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    pub collection: String,
    pub event: HookEvent,
    /// Identifies one write or read; stable across the events it fires.
    pub operation: u64,
}

impl HookContext {
    pub fn new(collection: impl Into<String>, event: HookEvent, operation: u64) -> Self {
        Self {
            collection: collection.into(),
            event,
            operation,
        }
    }

    pub fn with_event(&self, event: HookEvent) -> Self {
        Self {
            event,
            ..self.clone()
        }
    }
}

/// Document being written, shared by every before-hook of one save cycle.
#[derive(Debug, Clone)]
pub struct WriteState {
    pub document: Value,
    is_new: bool,
    markers: BTreeSet<String>,
}

impl WriteState {
    pub fn new(document: Value, is_new: bool) -> Self {
        Self {
            document,
            is_new,
            markers: BTreeSet::new(),
        }
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Record `marker` for this save cycle. Returns `false` if it was
    /// already recorded, letting a handler wired to several stages run once.
    pub fn mark_once(&mut self, marker: &str) -> bool {
        self.markers.insert(marker.to_string())
    }

    pub fn into_document(self) -> Value {
        self.document
    }
}

/// Document as persisted, handed to after-save handlers.
#[derive(Debug, Clone)]
pub struct SavedDocument {
    pub document: Value,
    /// Stored version this save replaced.
    pub previous: Option<Value>,
    pub was_new: bool,
    /// Top-level fields whose value changed in this save.
    pub modified: BTreeSet<String>,
}

impl SavedDocument {
    pub fn is_modified(&self, field: &str) -> bool {
        self.modified.contains(field)
    }
}

#[async_trait]
pub trait LifecycleHook: Send + Sync {
    async fn before_validate(
        &self,
        _ctx: &HookContext,
        _state: &mut WriteState,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn before_save(&self, _ctx: &HookContext, _state: &mut WriteState) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_save(&self, _ctx: &HookContext, _saved: &SavedDocument) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_find(&self, _ctx: &HookContext, _docs: &mut [Value]) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Host facility accepting lifecycle hooks per collection.
pub trait HookSink {
    fn register_hook(&self, collection: &str, hook: Arc<dyn LifecycleHook>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mark_once_is_per_cycle() {
        let mut state = WriteState::new(json!({}), true);
        assert!(state.mark_once("populate"));
        assert!(!state.mark_once("populate"));
        assert!(state.mark_once("other"));

        let fresh = WriteState::new(json!({}), false);
        assert!(!fresh.is_new());
    }
}
