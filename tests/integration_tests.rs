//! Integration tests for the complete refsync pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - JSON schemas → Catalog → descriptor tables and registrations
//! - Writes through the store → populate / propagate hooks
//! - Reads through the store → batched reference loading
//!
//! Run with: cargo test --test integration_tests

use refsync_engine::{Catalog, ReferenceSync, SyncConfig};
use refsync_store::{DocumentId, Filter, MemoryStore, MemoryStoreConfig};
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

fn schemas() -> Value {
    json!({
        "authors": { "fields": [
            { "name": "name", "kind": { "type": "string" } },
            { "name": "country", "kind": { "type": "string" } },
            { "name": "active", "kind": { "type": "boolean" } }
        ] },
        "books": { "fields": [
            { "name": "title", "kind": { "type": "string" } },
            { "name": "author", "kind": {
                "type": "reference", "target": "authors", "project": ["name", "country"],
                "options": { "name": { "searchable": true } }
            } },
            { "name": "editions", "kind": { "type": "embedded_array", "schema": { "fields": [
                { "name": "translator", "kind": { "type": "reference", "target": "authors", "project": ["name"] } }
            ] } } },
            { "name": "reviewers", "kind": { "type": "reference_array", "target": "authors", "project": ["name"] } }
        ] }
    })
}

fn open(config: SyncConfig, store: MemoryStore) -> Arc<ReferenceSync> {
    let catalog = Catalog::builder(config)
        .register_json(&schemas())
        .unwrap()
        .build()
        .unwrap();
    let sync = Arc::new(ReferenceSync::new(catalog, Arc::new(store.clone())));
    sync.install(&store);
    sync
}

// ============================================================================
// Full lifecycle
// ============================================================================

#[tokio::test]
async fn test_write_read_update_deactivate_lifecycle() {
    let store = MemoryStore::new();
    let _sync = open(SyncConfig::default(), store.clone());
    let authors = store.collection("authors");
    let books = store.collection("books");

    let mut ursula = authors
        .save(json!({ "name": "Ursula", "country": "US" }))
        .await
        .unwrap();
    let mut tove = authors
        .save(json!({ "name": "Tove", "country": "FI" }))
        .await
        .unwrap();

    // Write: references are populated from their sources.
    let book = books
        .save(json!({
            "title": "Earthsea",
            "author": { "ref": ursula["_id"] },
            "editions": [{ "translator": { "ref": tove["_id"] } }],
            "reviewers": [{ "ref": tove["_id"] }, { "ref": ursula["_id"] }]
        }))
        .await
        .unwrap();
    assert_eq!(book["author"]["country"], json!("US"));
    assert_eq!(book["editions"][0]["translator"]["name"], json!("Tove"));
    assert_eq!(book["reviewers"][1]["name"], json!("Ursula"));
    let book_id = DocumentId::from_value(&book["_id"]).unwrap();

    // Update: the rename reaches every copy.
    ursula["name"] = json!("Ursula K.");
    authors.save(ursula.clone()).await.unwrap();
    let stored = books.get_raw(&book_id).unwrap();
    assert_eq!(stored["author"]["name"], json!("Ursula K."));
    assert_eq!(stored["reviewers"][1]["name"], json!("Ursula K."));
    assert_eq!(stored["reviewers"][0]["name"], json!("Tove"));

    // Deactivate: scalar copies lose their reference, arrays drop the entry.
    tove["active"] = json!(false);
    authors.save(tove).await.unwrap();
    let stored = books.get_raw(&book_id).unwrap();
    assert!(stored["editions"][0].get("translator").is_none());
    assert_eq!(stored["reviewers"].as_array().unwrap().len(), 1);

    // Read: one batched query resolves whatever is left.
    store.reset_stats();
    let found = books.find(&Filter::All).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["author"]["name"], json!("Ursula K."));
    assert_eq!(store.stats("authors").find_many, 1);
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn test_custom_field_names_from_config_file() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("sync.json");
    fs::write(
        &config_path,
        r#"{ "id_field": "id", "reference_key": "target", "active_field": "enabled" }"#,
    )
    .unwrap();
    let config = SyncConfig::from_json_file(&config_path).unwrap();

    let store = MemoryStore::with_config(MemoryStoreConfig {
        id_field: "id".to_string(),
    });
    let _sync = open(config, store.clone());
    let authors = store.collection("authors");
    let books = store.collection("books");

    let mut ursula = authors.save(json!({ "name": "Ursula" })).await.unwrap();
    let book = books
        .save(json!({ "author": { "target": ursula["id"] }, "reviewers": [{ "target": ursula["id"] }] }))
        .await
        .unwrap();
    assert_eq!(book["author"]["name"], json!("Ursula"));

    ursula["enabled"] = json!(false);
    authors.save(ursula).await.unwrap();

    let stored = books
        .get_raw(&DocumentId::from_value(&book["id"]).unwrap())
        .unwrap();
    assert!(stored.get("author").is_none());
    assert_eq!(stored["reviewers"], json!([]));
}

#[test]
fn test_catalog_from_schema_file_keeps_field_options() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("schemas.json");
    fs::write(&path, serde_json::to_string_pretty(&schemas()).unwrap()).unwrap();

    let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    let catalog = Catalog::builder(SyncConfig::default())
        .register_json(&raw)
        .unwrap()
        .build()
        .unwrap();

    let books = catalog.descriptors("books").unwrap();
    let author = books
        .iter()
        .find(|d| d.field_path().to_string() == "author")
        .unwrap();
    assert_eq!(author.searchable_fields().collect::<Vec<_>>(), vec!["name"]);

    let registration = catalog.registration("authors").unwrap();
    let paths: Vec<String> = registration
        .entries
        .iter()
        .map(|e| e.field_path.to_string())
        .collect();
    assert_eq!(paths, vec!["author", "editions.translator", "reviewers"]);
}
