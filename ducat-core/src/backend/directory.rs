//! Read-only backend over a directory tree of STIX files.
//!
//! Layout: every subdirectory of the configured root is an API root, and
//! every `.json` file inside one is a collection. A file may hold a STIX
//! bundle, an envelope with an `objects` array, or a bare array. Objects
//! take the file's modification time as `date_added`, and collection ids
//! are UUIDv5 hashes of the relative path so they stay stable across
//! restarts and hosts. Parsed files are cached and reloaded when their
//! modification time changes. All writes are refused.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::{Result, TaxiiError};
use crate::filter::{evaluate, Page, PagePolicy, Query};
use crate::model::{
    ApiRoot, Collection, DiscoveryInfo, ManifestEntry, ManifestRecord, ObjectRecord, StixObject,
    TAXII_MEDIA_TYPE,
};
use crate::status::{StatusRecord, StatusResolution};
use crate::timestamp::Timestamp;

const MAX_CONTENT_LENGTH: u64 = 10 * 1024 * 1024;

pub struct DirectoryBackend {
    root: PathBuf,
    cache: DashMap<PathBuf, CachedFile>,
}

#[derive(Clone)]
struct CachedFile {
    modified: SystemTime,
    records: Vec<ObjectRecord>,
}

impl DirectoryBackend {
    pub fn open(root: &Path) -> Result<Self> {
        let meta = std::fs::metadata(root).map_err(|e| {
            TaxiiError::BackendUnavailable(format!("cannot open {}: {e}", root.display()))
        })?;
        if !meta.is_dir() {
            return Err(TaxiiError::BackendUnavailable(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        tracing::info!(root = %root.display(), "serving directory tree read-only");
        Ok(DirectoryBackend {
            root: root.to_owned(),
            cache: DashMap::new(),
        })
    }

    fn api_root_dir(&self, api_root: &str) -> Result<PathBuf> {
        let clean = !api_root.is_empty()
            && api_root != "."
            && api_root != ".."
            && !api_root.contains(['/', '\\']);
        if !clean {
            return Err(TaxiiError::not_found(format!("API root {api_root}")));
        }
        let dir = self.root.join(api_root);
        match std::fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => Ok(dir),
            _ => Err(TaxiiError::not_found(format!("API root {api_root}"))),
        }
    }

    async fn api_root_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            TaxiiError::BackendUnavailable(format!("cannot list {}: {e}", self.root.display()))
        })?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            TaxiiError::BackendUnavailable(format!("cannot list {}: {e}", self.root.display()))
        })? {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Collections of one API root: each `.json` file, sorted by file name.
    async fn collections_in(&self, api_root: &str) -> Result<Vec<(Collection, PathBuf)>> {
        let dir = self.api_root_dir(api_root)?;
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
            TaxiiError::BackendUnavailable(format!("cannot list {}: {e}", dir.display()))
        })?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            TaxiiError::BackendUnavailable(format!("cannot list {}: {e}", dir.display()))
        })? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files
            .into_iter()
            .filter_map(|path| {
                let stem = path.file_stem()?.to_str()?.to_owned();
                let id = self.collection_id(api_root, &path);
                Some((
                    Collection {
                        id,
                        title: stem,
                        description: None,
                        can_read: true,
                        can_write: false,
                        media_types: vec![crate::model::STIX_MEDIA_TYPE.to_owned()],
                    },
                    path,
                ))
            })
            .collect())
    }

    fn collection_id(&self, api_root: &str, path: &Path) -> String {
        let file = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let name = format!("{api_root}/{file}");
        Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
    }

    async fn collection_file(&self, api_root: &str, collection_id: &str) -> Result<PathBuf> {
        let collections = self.collections_in(api_root).await?;
        collections
            .into_iter()
            .find(|(c, _)| c.id == collection_id)
            .map(|(_, path)| path)
            .ok_or_else(|| TaxiiError::not_found(format!("collection {collection_id}")))
    }

    async fn records_for(&self, path: &Path) -> Result<Vec<ObjectRecord>> {
        let meta = tokio::fs::metadata(path).await.map_err(|e| {
            TaxiiError::BackendUnavailable(format!("cannot stat {}: {e}", path.display()))
        })?;
        let modified = meta.modified().map_err(|e| {
            TaxiiError::BackendUnavailable(format!("cannot stat {}: {e}", path.display()))
        })?;
        if let Some(hit) = self.cache.get(path) {
            if hit.modified == modified {
                return Ok(hit.records.clone());
            }
        }

        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            TaxiiError::BackendUnavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        let added = Timestamp::from(modified);
        let records = parse_members(&raw, path, added);
        self.cache.insert(
            path.to_owned(),
            CachedFile {
                modified,
                records: records.clone(),
            },
        );
        Ok(records)
    }
}

/// Pull the object list out of a bundle, an envelope, or a bare array.
/// Members that do not parse are logged and skipped so one bad object does
/// not hide a whole file.
fn parse_members(raw: &str, path: &Path, added: Timestamp) -> Vec<ObjectRecord> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping unparseable collection file");
            return Vec::new();
        }
    };
    let members = match value {
        Value::Array(members) => members,
        Value::Object(mut map) => match map.remove("objects") {
            Some(Value::Array(members)) => members,
            _ => {
                tracing::warn!(path = %path.display(), "collection file has no objects array");
                return Vec::new();
            }
        },
        _ => {
            tracing::warn!(path = %path.display(), "collection file is not a JSON document of objects");
            return Vec::new();
        }
    };
    members
        .into_iter()
        .filter_map(|member| match serde_json::from_value::<StixObject>(member) {
            Ok(object) => {
                let version = object.version(added);
                let media_type = object.media_type();
                Some(ObjectRecord {
                    object,
                    manifest: ManifestEntry {
                        date_added: added,
                        media_type,
                        version,
                    },
                })
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping malformed object");
                None
            }
        })
        .collect()
}

#[async_trait]
impl Backend for DirectoryBackend {
    async fn get_discovery(&self) -> Result<DiscoveryInfo> {
        let override_path = self.root.join("discovery.json");
        if let Ok(raw) = tokio::fs::read_to_string(&override_path).await {
            return serde_json::from_str(&raw).map_err(|e| {
                TaxiiError::BackendUnavailable(format!(
                    "cannot parse {}: {e}",
                    override_path.display()
                ))
            });
        }
        let api_roots = self.api_root_names().await?;
        Ok(DiscoveryInfo {
            title: "Directory-backed TAXII server".to_owned(),
            description: None,
            contact: None,
            default: api_roots.first().cloned(),
            api_roots,
        })
    }

    async fn get_api_root_info(&self, api_root: &str) -> Result<ApiRoot> {
        self.api_root_dir(api_root)?;
        Ok(ApiRoot {
            title: api_root.to_owned(),
            description: None,
            versions: vec![TAXII_MEDIA_TYPE.to_owned()],
            max_content_length: MAX_CONTENT_LENGTH,
        })
    }

    async fn get_collections(&self, api_root: &str) -> Result<Vec<Collection>> {
        Ok(self
            .collections_in(api_root)
            .await?
            .into_iter()
            .map(|(collection, _)| collection)
            .collect())
    }

    async fn get_collection(&self, api_root: &str, collection_id: &str) -> Result<Collection> {
        self.collections_in(api_root)
            .await?
            .into_iter()
            .map(|(collection, _)| collection)
            .find(|c| c.id == collection_id)
            .ok_or_else(|| TaxiiError::not_found(format!("collection {collection_id}")))
    }

    async fn get_objects(
        &self,
        api_root: &str,
        collection_id: &str,
        query: &Query,
        policy: PagePolicy,
    ) -> Result<Page<ObjectRecord>> {
        let path = self.collection_file(api_root, collection_id).await?;
        let candidates = self.records_for(&path).await?;
        Ok(evaluate(candidates, query, policy))
    }

    async fn get_manifest(
        &self,
        api_root: &str,
        collection_id: &str,
        query: &Query,
        policy: PagePolicy,
    ) -> Result<Page<ManifestRecord>> {
        let path = self.collection_file(api_root, collection_id).await?;
        let candidates: Vec<ManifestRecord> = self
            .records_for(&path)
            .await?
            .iter()
            .map(ObjectRecord::manifest_record)
            .collect();
        Ok(evaluate(candidates, query, policy))
    }

    async fn get_object_versions(
        &self,
        api_root: &str,
        collection_id: &str,
        object_id: &str,
        query: &Query,
        policy: PagePolicy,
    ) -> Result<Page<Timestamp>> {
        let path = self.collection_file(api_root, collection_id).await?;
        let candidates: Vec<ObjectRecord> = self
            .records_for(&path)
            .await?
            .into_iter()
            .filter(|r| r.object.id == object_id)
            .collect();
        if candidates.is_empty() {
            return Err(TaxiiError::not_found(format!("object {object_id}")));
        }
        Ok(evaluate(candidates, query, policy).map(|r| r.manifest.version))
    }

    async fn add_objects(
        &self,
        _api_root: &str,
        _collection_id: &str,
        _objects: Vec<StixObject>,
        _request_time: Timestamp,
    ) -> Result<Vec<StatusResolution>> {
        Err(TaxiiError::Unsupported("add_objects"))
    }

    async fn get_status(&self, _api_root: &str, status_id: &str) -> Result<StatusRecord> {
        Err(TaxiiError::not_found(format!("status {status_id}")))
    }

    async fn insert_status(&self, _api_root: &str, _record: StatusRecord) -> Result<()> {
        Err(TaxiiError::Unsupported("insert_status"))
    }

    async fn update_status(
        &self,
        _api_root: &str,
        _status_id: &str,
        _resolution: &StatusResolution,
    ) -> Result<StatusRecord> {
        Err(TaxiiError::Unsupported("update_status"))
    }
}
