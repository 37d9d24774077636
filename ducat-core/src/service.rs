//! Protocol orchestration over a [`Backend`].
//!
//! [`TaxiiService`] owns the request flow the transport does not care
//! about: permission checks against collection flags, per-object validation
//! of writes, status bookkeeping, and the choice between finishing a write
//! inline or handing it to a background task. Handlers stay thin and
//! backends stay storage-only.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::error::{Result, TaxiiError};
use crate::filter::{Page, PagePolicy, Query, VersionSelect};
use crate::model::{ApiRoot, Collection, DiscoveryInfo, Envelope, ManifestRecord, ObjectRecord};
use crate::status::{StatusRecord, StatusResolution};
use crate::timestamp::Timestamp;
use crate::validate::parse_object;

/// Whether an accepted write is finished before or after the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AddMode {
    /// Objects are stored and the status resolved before returning.
    #[default]
    Inline,
    /// The status is returned pending and resolved by a background task.
    Deferred,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ServicePolicy {
    pub page: PagePolicy,
    pub add_mode: AddMode,
}

pub struct TaxiiService {
    backend: Arc<dyn Backend>,
    policy: ServicePolicy,
}

impl TaxiiService {
    pub fn new(backend: Arc<dyn Backend>, policy: ServicePolicy) -> Self {
        TaxiiService { backend, policy }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub async fn discovery(&self) -> Result<DiscoveryInfo> {
        self.backend.get_discovery().await
    }

    pub async fn api_root(&self, api_root: &str) -> Result<ApiRoot> {
        self.backend.get_api_root_info(api_root).await
    }

    /// Collections the caller may see. Unreadable collections are omitted
    /// from the listing rather than advertised.
    pub async fn collections(&self, api_root: &str) -> Result<Vec<Collection>> {
        let collections = self.backend.get_collections(api_root).await?;
        Ok(collections.into_iter().filter(|c| c.can_read).collect())
    }

    pub async fn collection(&self, api_root: &str, collection_id: &str) -> Result<Collection> {
        let collection = self.backend.get_collection(api_root, collection_id).await?;
        if !collection.can_read {
            return Err(TaxiiError::Forbidden(format!(
                "collection {collection_id} is not readable"
            )));
        }
        Ok(collection)
    }

    async fn readable(&self, api_root: &str, collection_id: &str) -> Result<Collection> {
        self.collection(api_root, collection_id).await
    }

    async fn writable(&self, api_root: &str, collection_id: &str) -> Result<Collection> {
        let collection = self.backend.get_collection(api_root, collection_id).await?;
        if !collection.can_write {
            return Err(TaxiiError::Forbidden(format!(
                "collection {collection_id} is not writable"
            )));
        }
        Ok(collection)
    }

    pub async fn objects(
        &self,
        api_root: &str,
        collection_id: &str,
        query: &Query,
    ) -> Result<Page<ObjectRecord>> {
        self.readable(api_root, collection_id).await?;
        self.backend
            .get_objects(api_root, collection_id, query, self.policy.page)
            .await
    }

    /// One object by id. Filters still apply; a request whose filters match
    /// nothing reports the object as absent.
    pub async fn object(
        &self,
        api_root: &str,
        collection_id: &str,
        object_id: &str,
        query: Query,
    ) -> Result<Page<ObjectRecord>> {
        self.readable(api_root, collection_id).await?;
        let scoped = query.scoped_to_object(object_id);
        let page = self
            .backend
            .get_objects(api_root, collection_id, &scoped, self.policy.page)
            .await?;
        if page.total == 0 {
            return Err(TaxiiError::not_found(format!("object {object_id}")));
        }
        Ok(page)
    }

    pub async fn manifest(
        &self,
        api_root: &str,
        collection_id: &str,
        query: &Query,
    ) -> Result<Page<ManifestRecord>> {
        self.readable(api_root, collection_id).await?;
        self.backend
            .get_manifest(api_root, collection_id, query, self.policy.page)
            .await
    }

    /// Versions of one object, oldest `date_added` first. Unlike object
    /// reads, an unqualified request reports every revision.
    pub async fn object_versions(
        &self,
        api_root: &str,
        collection_id: &str,
        object_id: &str,
        query: Query,
    ) -> Result<Page<Timestamp>> {
        self.readable(api_root, collection_id).await?;
        let mut scoped = query.scoped_to_object(object_id);
        scoped
            .filters
            .version
            .get_or_insert_with(VersionSelect::all_versions);
        self.backend
            .get_object_versions(api_root, collection_id, object_id, &scoped, self.policy.page)
            .await
    }

    /// Accept an envelope for a collection.
    ///
    /// Validation failures become failed status entries without blocking the
    /// rest of the batch. In inline mode the returned record is final; in
    /// deferred mode it is pending and the caller polls the status endpoint.
    pub async fn add_objects(
        &self,
        api_root: &str,
        collection_id: &str,
        envelope: Envelope,
        request_time: Timestamp,
    ) -> Result<StatusRecord> {
        let collection = self.writable(api_root, collection_id).await?;
        if envelope.objects.is_empty() {
            return Err(TaxiiError::Processing(
                "envelope contains no objects".into(),
            ));
        }

        let mut status = StatusRecord::accepted(request_time);
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for raw in envelope.objects {
            match parse_object(raw, &collection, request_time) {
                Ok(object) => {
                    status.push_pending(object.id.clone(), object.version(request_time));
                    accepted.push(object);
                }
                Err(reject) => {
                    status.push_pending(reject.id.clone(), reject.version);
                    rejected.push(StatusResolution::failure(
                        reject.id,
                        reject.version,
                        reject.error.to_string(),
                    ));
                }
            }
        }

        let status_id = status.id.clone();
        self.backend.insert_status(api_root, status.clone()).await?;
        tracing::debug!(
            status = %status_id,
            total = status.total_count,
            invalid = rejected.len(),
            "accepted add request"
        );

        match self.policy.add_mode {
            AddMode::Inline => {
                resolve_batch(
                    &self.backend,
                    api_root,
                    collection_id,
                    &status_id,
                    accepted,
                    rejected,
                    request_time,
                )
                .await
            }
            AddMode::Deferred => {
                let backend = Arc::clone(&self.backend);
                let api_root = api_root.to_owned();
                let collection_id = collection_id.to_owned();
                let task_status_id = status_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = resolve_batch(
                        &backend,
                        &api_root,
                        &collection_id,
                        &task_status_id,
                        accepted,
                        rejected,
                        request_time,
                    )
                    .await
                    {
                        tracing::error!(status = %task_status_id, error = %e, "deferred add failed");
                    }
                });
                Ok(status)
            }
        }
    }

    pub async fn delete_object(
        &self,
        api_root: &str,
        collection_id: &str,
        object_id: &str,
        query: &Query,
    ) -> Result<()> {
        self.writable(api_root, collection_id).await?;
        let select = query
            .filters
            .version
            .clone()
            .unwrap_or_else(VersionSelect::all_versions);
        self.backend
            .delete_object(api_root, collection_id, object_id, &select)
            .await
    }

    pub async fn status(&self, api_root: &str, status_id: &str) -> Result<StatusRecord> {
        self.backend.get_status(api_root, status_id).await
    }
}

/// Store the valid objects and walk every resolution through the status
/// record. A storage failure for the whole batch fails each entry rather
/// than abandoning the record in pending.
async fn resolve_batch(
    backend: &Arc<dyn Backend>,
    api_root: &str,
    collection_id: &str,
    status_id: &str,
    objects: Vec<crate::model::StixObject>,
    rejected: Vec<StatusResolution>,
    request_time: Timestamp,
) -> Result<StatusRecord> {
    let mut resolutions = Vec::with_capacity(objects.len() + rejected.len());
    if !objects.is_empty() {
        let pending: Vec<(String, Timestamp)> = objects
            .iter()
            .map(|o| (o.id.clone(), o.version(request_time)))
            .collect();
        match backend
            .add_objects(api_root, collection_id, objects, request_time)
            .await
        {
            Ok(stored) => resolutions.extend(stored),
            Err(e) => {
                tracing::error!(status = %status_id, error = %e, "storing batch failed");
                let message = e.to_string();
                resolutions.extend(
                    pending
                        .into_iter()
                        .map(|(id, version)| StatusResolution::failure(id, version, message.clone())),
                );
            }
        }
    }
    resolutions.extend(rejected);

    let mut latest = None;
    for resolution in &resolutions {
        latest = Some(
            backend
                .update_status(api_root, status_id, resolution)
                .await?,
        );
    }
    match latest {
        Some(record) => Ok(record),
        None => backend.get_status(api_root, status_id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::DataTree;
    use crate::status::StatusState;
    use serde_json::json;

    const COLLECTION: &str = "91a7b528-80eb-42ed-a74d-c6fbd5a26116";
    const READONLY: &str = "64993447-4d7e-4f70-b94d-d7f22742ff63";
    const HIDDEN: &str = "472c94ae-3113-4e3e-a4dd-a9f4ac7471d4";

    fn tree() -> DataTree {
        serde_json::from_value(json!({
            "discovery": {
                "title": "Test server",
                "default": "trustgroup1",
                "api_roots": ["trustgroup1"]
            },
            "api_roots": {
                "trustgroup1": {
                    "title": "Trust group",
                    "versions": ["application/taxii+json;version=2.1"],
                    "max_content_length": 10485760,
                    "collections": [
                        {
                            "id": COLLECTION,
                            "title": "Writable",
                            "can_read": true,
                            "can_write": true,
                            "media_types": ["application/stix+json;version=2.1"]
                        },
                        {
                            "id": READONLY,
                            "title": "Read only",
                            "can_read": true,
                            "can_write": false,
                            "media_types": []
                        },
                        {
                            "id": HIDDEN,
                            "title": "Hidden",
                            "can_read": false,
                            "can_write": true,
                            "media_types": []
                        }
                    ]
                }
            }
        }))
        .unwrap()
    }

    fn service(mode: AddMode) -> TaxiiService {
        let backend = Arc::new(MemoryBackend::from_data(tree(), None).unwrap());
        TaxiiService::new(
            backend,
            ServicePolicy {
                page: PagePolicy::default(),
                add_mode: mode,
            },
        )
    }

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    fn envelope(objects: serde_json::Value) -> Envelope {
        serde_json::from_value(json!({ "objects": objects })).unwrap()
    }

    #[tokio::test]
    async fn collections_hide_unreadable_entries() {
        let service = service(AddMode::Inline);
        let listed = service.collections("trustgroup1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|c| c.id != HIDDEN));

        let direct = service.collection("trustgroup1", HIDDEN).await;
        assert!(matches!(direct, Err(TaxiiError::Forbidden(_))));
    }

    #[tokio::test]
    async fn add_resolves_good_and_bad_objects_in_one_batch() {
        let service = service(AddMode::Inline);
        let request_time = ts("2021-01-01T00:00:00.000Z");
        let batch = envelope(json!([
            {
                "type": "indicator",
                "id": "indicator--9ad1a07c-5936-4cd6-9492-225b751b9bd4",
                "spec_version": "2.1",
                "created": "2020-01-01T00:00:00.000Z",
                "modified": "2020-01-01T00:00:00.000Z"
            },
            {
                "type": "malware",
                "id": "malware--0d9d6c17-8368-4b5b-903c-fc2ca4105b31",
                "spec_version": "2.1",
                "created": "2020-01-02T00:00:00.000Z",
                "modified": "2020-01-02T00:00:00.000Z"
            },
            { "id": "not a stix id" }
        ]));

        let status = service
            .add_objects("trustgroup1", COLLECTION, batch, request_time)
            .await
            .unwrap();
        assert_eq!(status.status, StatusState::Complete);
        assert_eq!(status.total_count, 3);
        assert_eq!(status.success_count, 2);
        assert_eq!(status.failure_count, 1);
        assert_eq!(status.pending_count, 0);
        assert!(status.failures[0]
            .message
            .as_deref()
            .unwrap()
            .contains("Malformed object id"));

        let fetched = service.status("trustgroup1", &status.id).await.unwrap();
        assert_eq!(fetched, status);
    }

    #[tokio::test]
    async fn re_adding_the_same_version_succeeds_without_duplicating() {
        let service = service(AddMode::Inline);
        let request_time = ts("2021-01-01T00:00:00.000Z");
        let object = json!([{
            "type": "indicator",
            "id": "indicator--9ad1a07c-5936-4cd6-9492-225b751b9bd4",
            "spec_version": "2.1",
            "created": "2020-01-01T00:00:00.000Z",
            "modified": "2020-01-01T00:00:00.000Z"
        }]);

        let first = service
            .add_objects("trustgroup1", COLLECTION, envelope(object.clone()), request_time)
            .await
            .unwrap();
        assert_eq!(first.success_count, 1);

        let second = service
            .add_objects("trustgroup1", COLLECTION, envelope(object), request_time)
            .await
            .unwrap();
        assert_eq!(second.success_count, 1);
        assert_eq!(
            second.successes[0].message.as_deref(),
            Some("object already added")
        );

        let page = service
            .objects(
                "trustgroup1",
                COLLECTION,
                &Query::from_pairs([("match[version]", "all")]).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn deferred_adds_return_pending_and_settle() {
        let service = service(AddMode::Deferred);
        let request_time = ts("2021-01-01T00:00:00.000Z");
        let status = service
            .add_objects(
                "trustgroup1",
                COLLECTION,
                envelope(json!([{
                    "type": "indicator",
                    "id": "indicator--9ad1a07c-5936-4cd6-9492-225b751b9bd4",
                    "spec_version": "2.1",
                    "created": "2020-01-01T00:00:00.000Z",
                    "modified": "2020-01-01T00:00:00.000Z"
                }])),
                request_time,
            )
            .await
            .unwrap();
        assert_eq!(status.status, StatusState::Pending);
        assert_eq!(status.pending_count, 1);

        let mut settled = None;
        for _ in 0..50 {
            let polled = service.status("trustgroup1", &status.id).await.unwrap();
            if polled.is_complete() {
                settled = Some(polled);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let settled = settled.expect("deferred add never completed");
        assert_eq!(settled.success_count, 1);
    }

    #[tokio::test]
    async fn writes_to_read_only_collections_are_forbidden() {
        let service = service(AddMode::Inline);
        let result = service
            .add_objects(
                "trustgroup1",
                READONLY,
                envelope(json!([{ "id": "indicator--9ad1a07c-5936-4cd6-9492-225b751b9bd4" }])),
                ts("2021-01-01T00:00:00.000Z"),
            )
            .await;
        assert!(matches!(result, Err(TaxiiError::Forbidden(_))));
    }

    #[tokio::test]
    async fn empty_envelopes_are_rejected() {
        let service = service(AddMode::Inline);
        let result = service
            .add_objects(
                "trustgroup1",
                COLLECTION,
                envelope(json!([])),
                ts("2021-01-01T00:00:00.000Z"),
            )
            .await;
        assert!(matches!(result, Err(TaxiiError::Processing(_))));
    }

    #[tokio::test]
    async fn single_object_reads_honor_filters_or_report_absence() {
        let service = service(AddMode::Inline);
        let request_time = ts("2021-01-01T00:00:00.000Z");
        let id = "indicator--9ad1a07c-5936-4cd6-9492-225b751b9bd4";
        service
            .add_objects(
                "trustgroup1",
                COLLECTION,
                envelope(json!([{
                    "type": "indicator",
                    "id": id,
                    "spec_version": "2.1",
                    "created": "2020-01-01T00:00:00.000Z",
                    "modified": "2020-01-01T00:00:00.000Z"
                }])),
                request_time,
            )
            .await
            .unwrap();

        let found = service
            .object("trustgroup1", COLLECTION, id, Query::default())
            .await
            .unwrap();
        assert_eq!(found.total, 1);

        let missing = service
            .object(
                "trustgroup1",
                COLLECTION,
                "indicator--ffffffff-0000-4000-8000-000000000000",
                Query::default(),
            )
            .await;
        assert!(matches!(missing, Err(TaxiiError::NotFound(_))));
    }

    #[tokio::test]
    async fn version_listing_defaults_to_every_revision() {
        let service = service(AddMode::Inline);
        let id = "indicator--9ad1a07c-5936-4cd6-9492-225b751b9bd4";
        for modified in ["2020-01-01T00:00:00.000Z", "2020-01-05T00:00:00.000Z"] {
            service
                .add_objects(
                    "trustgroup1",
                    COLLECTION,
                    envelope(json!([{
                        "type": "indicator",
                        "id": id,
                        "spec_version": "2.1",
                        "created": "2020-01-01T00:00:00.000Z",
                        "modified": modified
                    }])),
                    ts("2021-01-01T00:00:00.000Z"),
                )
                .await
                .unwrap();
        }
        let versions = service
            .object_versions("trustgroup1", COLLECTION, id, Query::default())
            .await
            .unwrap();
        assert_eq!(versions.items.len(), 2);
    }

    #[tokio::test]
    async fn delete_defaults_to_all_versions() {
        let service = service(AddMode::Inline);
        let id = "indicator--9ad1a07c-5936-4cd6-9492-225b751b9bd4";
        for modified in ["2020-01-01T00:00:00.000Z", "2020-01-05T00:00:00.000Z"] {
            service
                .add_objects(
                    "trustgroup1",
                    COLLECTION,
                    envelope(json!([{
                        "type": "indicator",
                        "id": id,
                        "spec_version": "2.1",
                        "created": "2020-01-01T00:00:00.000Z",
                        "modified": modified
                    }])),
                    ts("2021-01-01T00:00:00.000Z"),
                )
                .await
                .unwrap();
        }
        service
            .delete_object("trustgroup1", COLLECTION, id, &Query::default())
            .await
            .unwrap();
        let missing = service
            .object("trustgroup1", COLLECTION, id, Query::default())
            .await;
        assert!(matches!(missing, Err(TaxiiError::NotFound(_))));
    }
}
