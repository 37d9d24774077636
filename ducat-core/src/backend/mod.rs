//! Storage backends.
//!
//! [`Backend`] is the fixed seam between the protocol layer and storage.
//! Every implementation answers the same call set with the same semantics;
//! capability differences surface as [`TaxiiError::Unsupported`] rather than
//! as a different interface. Backends are registered through
//! [`BackendConfig`] and built by [`BackendFactory`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TaxiiError};
use crate::filter::{Page, PagePolicy, Query, VersionSelect};
use crate::model::{
    ApiRoot, Collection, DiscoveryInfo, ManifestEntry, ManifestRecord, ObjectRecord, StixObject,
};
use crate::status::{StatusRecord, StatusResolution};
use crate::timestamp::Timestamp;

pub mod directory;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

/// The operations a TAXII store must answer.
///
/// Reads take the parsed [`Query`] plus the server's [`PagePolicy`] so a
/// backend can push filtering into its native query language; whatever the
/// strategy, results must match [`crate::filter::evaluate`] over the same
/// candidates. `add_objects` persists already-validated objects and reports
/// one [`StatusResolution`] per object; it never fails wholesale because one
/// object could not be stored.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get_discovery(&self) -> Result<DiscoveryInfo>;

    async fn get_api_root_info(&self, api_root: &str) -> Result<ApiRoot>;

    async fn get_collections(&self, api_root: &str) -> Result<Vec<Collection>>;

    async fn get_collection(&self, api_root: &str, collection_id: &str) -> Result<Collection>;

    async fn get_objects(
        &self,
        api_root: &str,
        collection_id: &str,
        query: &Query,
        policy: PagePolicy,
    ) -> Result<Page<ObjectRecord>>;

    async fn get_manifest(
        &self,
        api_root: &str,
        collection_id: &str,
        query: &Query,
        policy: PagePolicy,
    ) -> Result<Page<ManifestRecord>>;

    async fn get_object_versions(
        &self,
        api_root: &str,
        collection_id: &str,
        object_id: &str,
        query: &Query,
        policy: PagePolicy,
    ) -> Result<Page<Timestamp>>;

    async fn add_objects(
        &self,
        api_root: &str,
        collection_id: &str,
        objects: Vec<StixObject>,
        request_time: Timestamp,
    ) -> Result<Vec<StatusResolution>>;

    async fn get_status(&self, api_root: &str, status_id: &str) -> Result<StatusRecord>;

    async fn insert_status(&self, api_root: &str, record: StatusRecord) -> Result<()>;

    /// Apply one resolution to a stored status record, atomically against
    /// concurrent updates of the same record, and return the updated record.
    async fn update_status(
        &self,
        api_root: &str,
        status_id: &str,
        resolution: &StatusResolution,
    ) -> Result<StatusRecord>;

    async fn delete_object(
        &self,
        _api_root: &str,
        _collection_id: &str,
        _object_id: &str,
        _versions: &VersionSelect,
    ) -> Result<()> {
        Err(TaxiiError::Unsupported("delete_object"))
    }

    async fn create_collection(&self, _api_root: &str, _collection: Collection) -> Result<()> {
        Err(TaxiiError::Unsupported("create_collection"))
    }

    /// Flush state ahead of process exit. Backends with nothing to flush
    /// keep the default no-op.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Serialized shape of a whole server's data, used by the memory backend's
/// load/save cycle and by `ducat init-data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataTree {
    #[serde(default)]
    pub discovery: DiscoveryInfo,
    #[serde(default)]
    pub api_roots: BTreeMap<String, ApiRootData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRootData {
    #[serde(flatten)]
    pub info: ApiRoot,
    #[serde(default)]
    pub collections: Vec<CollectionData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionData {
    #[serde(flatten)]
    pub collection: Collection,
    #[serde(default)]
    pub objects: Vec<ObjectSeed>,
}

/// One stored object in a data tree. `date_added` may be given explicitly;
/// otherwise the object's own version is used so that reloading a tree is
/// deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSeed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_added: Option<Timestamp>,
    #[serde(flatten)]
    pub object: StixObject,
}

impl ObjectSeed {
    /// Objects carrying neither `modified` nor `created` version as the time
    /// they were received, which a stored tree records as `date_added`.
    pub fn into_record(self, load_time: Timestamp) -> ObjectRecord {
        let received = self.date_added.unwrap_or(load_time);
        let version = self.object.version(received);
        let media_type = self.object.media_type();
        let date_added = self.date_added.unwrap_or(version);
        ObjectRecord {
            object: self.object,
            manifest: ManifestEntry {
                date_added,
                media_type,
                version,
            },
        }
    }
}

/// Backend selection, deserialized straight from server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-process store, optionally loaded from and persisted to a JSON
    /// data tree.
    Memory {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seed_file: Option<PathBuf>,
        /// Write the tree back to `seed_file` on shutdown.
        #[serde(default)]
        persist: bool,
    },
    /// PostgreSQL store with filtering pushed down into SQL.
    Postgres {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_connections: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seed_file: Option<PathBuf>,
    },
    /// Read-only view over a directory of STIX bundle files.
    Directory { root: PathBuf },
}

impl Default for BackendConfig {
    /// An empty in-process store.
    fn default() -> Self {
        BackendConfig::Memory {
            seed_file: None,
            persist: false,
        }
    }
}

/// Builds the configured backend.
pub struct BackendFactory;

impl BackendFactory {
    pub async fn create(config: &BackendConfig) -> Result<Arc<dyn Backend>> {
        match config {
            BackendConfig::Memory { seed_file, persist } => {
                let backend = match seed_file {
                    Some(path) => memory::MemoryBackend::from_seed_file(path, *persist)?,
                    None => memory::MemoryBackend::empty(),
                };
                Ok(Arc::new(backend))
            }
            BackendConfig::Postgres {
                url,
                max_connections,
                seed_file,
            } => postgres_backend(url, *max_connections, seed_file.as_deref()).await,
            BackendConfig::Directory { root } => {
                Ok(Arc::new(directory::DirectoryBackend::open(root)?))
            }
        }
    }
}

#[cfg(feature = "postgres")]
async fn postgres_backend(
    url: &str,
    max_connections: Option<u32>,
    seed_file: Option<&Path>,
) -> Result<Arc<dyn Backend>> {
    let backend = postgres::PostgresBackend::connect(url, max_connections).await?;
    if let Some(path) = seed_file {
        backend.seed_from_file(path).await?;
    }
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "postgres"))]
async fn postgres_backend(
    _url: &str,
    _max_connections: Option<u32>,
    _seed_file: Option<&Path>,
) -> Result<Arc<dyn Backend>> {
    Err(TaxiiError::BackendUnavailable(
        "postgres support is not compiled into this build".into(),
    ))
}
