//! Loading schemas and fixtures into an in-memory store wired for sync.

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use refsync_engine::{Catalog, ReferenceSync, SyncConfig, SyncEvent};
use refsync_store::MemoryStore;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;

pub struct Session {
    pub store: MemoryStore,
    pub sync: Arc<ReferenceSync>,
    pub events: Arc<Mutex<Vec<SyncEvent>>>,
}

impl Session {
    /// Build the catalog from `schemas`, install sync hooks and load `data`
    /// (without running hooks).
    pub fn open(schemas: &Path, data: Option<&Path>, config: SyncConfig) -> Result<Self> {
        let catalog = Catalog::builder(config)
            .register_json(&read_json(schemas)?)?
            .build()
            .with_context(|| format!("building catalog from {}", schemas.display()))?;

        let store = MemoryStore::new();
        let sync = Arc::new(ReferenceSync::new(catalog, Arc::new(store.clone())));
        sync.install(&store);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        sync.on_event(Box::new(move |event: SyncEvent| sink.lock().push(event)));

        if let Some(data) = data {
            let loaded = store
                .load_fixture(&read_json(data)?)
                .with_context(|| format!("loading {}", data.display()))?;
            tracing::info!(documents = loaded, path = %data.display(), "fixture loaded");
        }

        Ok(Self { store, sync, events })
    }

    pub fn take_events(&self) -> Vec<SyncEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

pub fn read_json(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Parse `field=value`. The value is read as JSON when it parses, as a
/// plain string otherwise.
pub fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected field=value, got '{raw}'"))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(anyhow!("empty field name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((field.to_string(), value))
}
