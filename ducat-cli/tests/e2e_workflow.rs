//! End-to-end workflow tests for ducat-cli.
//!
//! These tests verify complete operator workflows: the artifacts the
//! commands write must boot a working TAXII service.

use std::fs;
use std::sync::Arc;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;

use ducat_core::backend::memory::MemoryBackend;
use ducat_core::backend::{Backend, BackendConfig, DataTree};
use ducat_core::{Envelope, Query, ServicePolicy, TaxiiService, Timestamp};
use ducat_server::{verify_password, Config};

/// Get a Command for the ducat binary.
fn ducat() -> Command {
    Command::cargo_bin("ducat").unwrap()
}

// ============================================================================
// Complete Workflow: init-data → hash-password → check-config → serve
// ============================================================================

#[tokio::test]
async fn test_e2e_new_server_setup() {
    let temp = TempDir::new().unwrap();
    let seed = temp.path().join("seed.json");
    let config_path = temp.path().join("config.json");

    // Step 1: Generate the starter data tree
    ducat()
        .args(["init-data", seed.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Starter data tree written"));

    // Step 2: Hash a password for the analyst account
    let output = ducat()
        .args(["--quiet", "hash-password", "s3cret"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let hash = String::from_utf8(output).unwrap().trim().to_string();

    // Step 3: Write a configuration referencing both artifacts
    let config_json = json!({
        "port": 7000,
        "backend": { "type": "memory", "seed_file": seed },
        "auth": { "users": { "analyst": hash } }
    });
    fs::write(
        &config_path,
        serde_json::to_string_pretty(&config_json).unwrap(),
    )
    .unwrap();

    // Step 4: The configuration checks out
    ducat()
        .args(["check-config", config_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration OK"))
        .stdout(predicate::str::contains("memory (seed:"))
        .stdout(predicate::str::contains("1 user(s)"));

    // Step 5: The server boots from the same files
    let config = Config::from_file(&config_path).unwrap();
    assert!(matches!(
        config.backend,
        BackendConfig::Memory { seed_file: Some(ref p), .. } if p == &seed
    ));
    assert!(verify_password("s3cret", &config.auth.users["analyst"]).unwrap());

    let backend = Arc::new(MemoryBackend::from_seed_file(&seed, false).unwrap());
    let service = TaxiiService::new(backend, ServicePolicy::default());

    let discovery = service.discovery().await.unwrap();
    assert_eq!(discovery.title, "Ducat TAXII Server");
    assert_eq!(discovery.default.as_deref(), Some("trustgroup1"));

    let collections = service.collections("trustgroup1").await.unwrap();
    assert_eq!(collections.len(), 1);
    assert!(collections[0].can_write);
}

// ============================================================================
// Seed Persistence: objects written through the service survive restarts
// ============================================================================

#[tokio::test]
async fn test_e2e_seed_file_accepts_and_persists_objects() {
    let temp = TempDir::new().unwrap();
    let seed = temp.path().join("seed.json");

    ducat()
        .args(["--quiet", "init-data", seed.to_str().unwrap()])
        .assert()
        .success();

    let tree: DataTree = serde_json::from_str(&fs::read_to_string(&seed).unwrap()).unwrap();
    let collection_id = tree.api_roots["trustgroup1"].collections[0]
        .collection
        .id
        .clone();

    // First boot: add one indicator with persistence enabled
    let backend = Arc::new(MemoryBackend::from_seed_file(&seed, true).unwrap());
    let service = TaxiiService::new(backend.clone(), ServicePolicy::default());

    let envelope: Envelope = serde_json::from_value(json!({
        "objects": [{
            "id": "indicator--8e2e2d2b-17d4-4cbf-938f-98ee46b3cd3f",
            "type": "indicator",
            "spec_version": "2.1",
            "created": "2024-01-01T00:00:00.000Z",
            "modified": "2024-01-01T00:00:00.000Z",
            "name": "File hash for Poison Ivy variant",
            "pattern": "[file:hashes.'SHA-256' = 'aec7badfdd13a5a1f8bd9dd9c9ed4c51f90a9c22']",
            "pattern_type": "stix"
        }]
    }))
    .unwrap();

    let status = service
        .add_objects("trustgroup1", &collection_id, envelope, Timestamp::now())
        .await
        .unwrap();
    assert_eq!(status.success_count, 1);

    backend.shutdown().await.unwrap();

    // Second boot: the object is still there
    let backend = Arc::new(MemoryBackend::from_seed_file(&seed, false).unwrap());
    let service = TaxiiService::new(backend, ServicePolicy::default());

    let page = service
        .objects("trustgroup1", &collection_id, &Query::default())
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(
        page.items[0].object.id,
        "indicator--8e2e2d2b-17d4-4cbf-938f-98ee46b3cd3f"
    );
}
