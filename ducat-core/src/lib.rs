//! Ducat Core - TAXII 2.1 threat intelligence sharing library
//!
//! This crate provides the storage-independent machinery of a TAXII server:
//! resource models, the filter and pagination pipeline, write validation,
//! status tracking, and the backends that persist it all.
//!
//! # Features
//!
//! - STIX objects as open JSON maps versioned by their `modified` timestamp
//! - One filter pipeline (`added_after`, `match[id]`, `match[type]`,
//!   `match[version]`, stable paging) shared by every backend
//! - Pluggable storage behind the [`backend::Backend`] trait: in-memory with
//!   flat-file persistence, PostgreSQL with SQL push-down, and a read-only
//!   directory tree
//! - Status records resolved inline or by a background task
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ducat_core::backend::memory::MemoryBackend;
//! use ducat_core::filter::Query;
//! use ducat_core::service::{ServicePolicy, TaxiiService};
//!
//! # async fn example() -> ducat_core::error::Result<()> {
//! let backend = Arc::new(MemoryBackend::from_seed_file(
//!     std::path::Path::new("data.json"),
//!     false,
//! )?);
//! let service = TaxiiService::new(backend, ServicePolicy::default());
//!
//! // List the latest version of every indicator in a collection.
//! let query = Query::from_pairs([("match[type]", "indicator")])?;
//! let page = service
//!     .objects("trustgroup1", "91a7b528-80eb-42ed-a74d-c6fbd5a26116", &query)
//!     .await?;
//! println!("{} of {} objects", page.items.len(), page.total);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod filter;
pub mod model;
pub mod service;
pub mod status;
pub mod timestamp;
pub mod validate;

// Re-export main types for convenience
pub use error::{Result, TaxiiError, ValidationError};
pub use filter::{FilterRecord, Page, PagePolicy, Query, VersionSelect};
pub use model::{
    ApiRoot, Collection, CollectionsResponse, DiscoveryInfo, Envelope, ManifestEnvelope,
    ManifestRecord, ObjectRecord, ObjectsEnvelope, StixObject, VersionsEnvelope,
    STIX_MEDIA_TYPE, TAXII_MEDIA_TYPE,
};
pub use service::{AddMode, ServicePolicy, TaxiiService};
pub use status::{StatusRecord, StatusResolution, StatusState};
pub use timestamp::Timestamp;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::DataTree;
    use serde_json::json;
    use std::sync::Arc;

    /// Integration test: seed a server, write a batch, and read it back
    /// through the filter pipeline.
    #[tokio::test]
    async fn test_full_sharing_workflow() {
        let tree: DataTree = serde_json::from_value(json!({
            "discovery": {
                "title": "Sharing server",
                "default": "intel",
                "api_roots": ["intel"]
            },
            "api_roots": {
                "intel": {
                    "title": "Intel",
                    "versions": [TAXII_MEDIA_TYPE],
                    "max_content_length": 10485760,
                    "collections": [{
                        "id": "2f669986-b40b-4423-b720-74396345d9de",
                        "title": "Indicators",
                        "can_read": true,
                        "can_write": true,
                        "media_types": [STIX_MEDIA_TYPE]
                    }]
                }
            }
        }))
        .unwrap();
        let backend = Arc::new(MemoryBackend::from_data(tree, None).unwrap());
        let service = TaxiiService::new(backend, ServicePolicy::default());

        let discovery = service.discovery().await.unwrap();
        assert_eq!(discovery.default.as_deref(), Some("intel"));

        let request_time = Timestamp::parse("2024-06-01T00:00:00.000Z").unwrap();
        let envelope: Envelope = serde_json::from_value(json!({
            "objects": [
                {
                    "type": "indicator",
                    "id": "indicator--9ad1a07c-5936-4cd6-9492-225b751b9bd4",
                    "spec_version": "2.1",
                    "created": "2024-01-01T00:00:00.000Z",
                    "modified": "2024-01-01T00:00:00.000Z",
                    "pattern": "[ipv4-addr:value = '198.51.100.1']"
                },
                {
                    "type": "malware",
                    "id": "malware--0d9d6c17-8368-4b5b-903c-fc2ca4105b31",
                    "spec_version": "2.1",
                    "created": "2024-01-02T00:00:00.000Z",
                    "modified": "2024-01-02T00:00:00.000Z",
                    "name": "dropper"
                }
            ]
        }))
        .unwrap();

        let status = service
            .add_objects("intel", "2f669986-b40b-4423-b720-74396345d9de", envelope, request_time)
            .await
            .unwrap();
        assert!(status.is_complete());
        assert_eq!(status.success_count, 2);

        let indicators = service
            .objects(
                "intel",
                "2f669986-b40b-4423-b720-74396345d9de",
                &Query::from_pairs([("match[type]", "indicator")]).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(indicators.total, 1);
        assert_eq!(
            indicators.items[0].object.id,
            "indicator--9ad1a07c-5936-4cd6-9492-225b751b9bd4"
        );

        let manifest = service
            .manifest(
                "intel",
                "2f669986-b40b-4423-b720-74396345d9de",
                &Query::default(),
            )
            .await
            .unwrap();
        assert_eq!(manifest.total, 2);
        assert!(manifest.items.iter().all(|m| m.date_added == request_time));
    }

    /// Pages concatenated in cursor order equal the unpaginated result.
    #[tokio::test]
    async fn test_pagination_round_trip() {
        let tree: DataTree = serde_json::from_value(json!({
            "api_roots": {
                "intel": {
                    "title": "Intel",
                    "versions": [TAXII_MEDIA_TYPE],
                    "max_content_length": 1048576,
                    "collections": [{
                        "id": "2f669986-b40b-4423-b720-74396345d9de",
                        "title": "Indicators",
                        "can_read": true,
                        "can_write": true,
                        "media_types": []
                    }]
                }
            }
        }))
        .unwrap();
        let backend = Arc::new(MemoryBackend::from_data(tree, None).unwrap());
        let service = TaxiiService::new(backend, ServicePolicy::default());

        let request_time = Timestamp::parse("2024-06-01T00:00:00.000Z").unwrap();
        let objects: Vec<serde_json::Value> = (1..=5)
            .map(|i| {
                json!({
                    "type": "indicator",
                    "id": format!("indicator--00000000-0000-4000-8000-00000000000{i}"),
                    "spec_version": "2.1",
                    "created": format!("2024-01-0{i}T00:00:00.000Z"),
                    "modified": format!("2024-01-0{i}T00:00:00.000Z")
                })
            })
            .collect();
        let envelope: Envelope =
            serde_json::from_value(json!({ "objects": objects })).unwrap();
        service
            .add_objects("intel", "2f669986-b40b-4423-b720-74396345d9de", envelope, request_time)
            .await
            .unwrap();

        let mut pairs = vec![("limit".to_owned(), "2".to_owned())];
        let mut walked = Vec::new();
        let mut pages = 0;
        loop {
            let query =
                Query::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))).unwrap();
            let page = service
                .objects("intel", "2f669986-b40b-4423-b720-74396345d9de", &query)
                .await
                .unwrap();
            pages += 1;
            walked.extend(page.items.iter().map(|r| r.object.id.clone()));
            match page.next {
                Some(next) => {
                    pairs = vec![("limit".to_owned(), "2".to_owned()), ("next".to_owned(), next)];
                }
                None => break,
            }
        }
        assert_eq!(pages, 3);

        let full = service
            .objects("intel", "2f669986-b40b-4423-b720-74396345d9de", &Query::default())
            .await
            .unwrap();
        let all_ids: Vec<String> = full.items.iter().map(|r| r.object.id.clone()).collect();
        assert_eq!(walked, all_ids);
    }
}
