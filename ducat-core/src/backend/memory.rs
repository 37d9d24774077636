//! In-process backend over a [`DataTree`].
//!
//! All state lives behind one `tokio::sync::RwLock`. Writes take the lock
//! for the whole batch, which serializes concurrent adds to a collection and
//! makes read-after-write immediate. With `persist`, the tree is written
//! back to its seed file on shutdown.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;

use crate::backend::{ApiRootData, Backend, CollectionData, DataTree, ObjectSeed};
use crate::error::{Result, TaxiiError};
use crate::filter::{evaluate, Page, PagePolicy, Query, VersionSelect};
use crate::model::{
    ApiRoot, Collection, DiscoveryInfo, ManifestEntry, ManifestRecord, ObjectRecord, StixObject,
};
use crate::status::{StatusRecord, StatusResolution};
use crate::timestamp::Timestamp;

use async_trait::async_trait;

pub struct MemoryBackend {
    store: RwLock<Store>,
    persist_to: Option<PathBuf>,
}

struct Store {
    discovery: DiscoveryInfo,
    api_roots: BTreeMap<String, RootStore>,
}

struct RootStore {
    info: ApiRoot,
    collections: Vec<CollectionStore>,
    statuses: BTreeMap<String, StatusRecord>,
}

struct CollectionStore {
    info: Collection,
    records: Vec<ObjectRecord>,
}

impl RootStore {
    fn collection(&self, collection_id: &str) -> Result<&CollectionStore> {
        self.collections
            .iter()
            .find(|c| c.info.id == collection_id)
            .ok_or_else(|| TaxiiError::not_found(format!("collection {collection_id}")))
    }

    fn collection_mut(&mut self, collection_id: &str) -> Result<&mut CollectionStore> {
        self.collections
            .iter_mut()
            .find(|c| c.info.id == collection_id)
            .ok_or_else(|| TaxiiError::not_found(format!("collection {collection_id}")))
    }
}

impl Store {
    fn root(&self, api_root: &str) -> Result<&RootStore> {
        self.api_roots
            .get(api_root)
            .ok_or_else(|| TaxiiError::not_found(format!("API root {api_root}")))
    }

    fn root_mut(&mut self, api_root: &str) -> Result<&mut RootStore> {
        self.api_roots
            .get_mut(api_root)
            .ok_or_else(|| TaxiiError::not_found(format!("API root {api_root}")))
    }
}

impl MemoryBackend {
    pub fn empty() -> Self {
        MemoryBackend {
            store: RwLock::new(Store {
                discovery: DiscoveryInfo::default(),
                api_roots: BTreeMap::new(),
            }),
            persist_to: None,
        }
    }

    /// Build from an in-memory tree. `persist_to` re-saves the tree there on
    /// shutdown.
    pub fn from_data(tree: DataTree, persist_to: Option<PathBuf>) -> Result<Self> {
        let load_time = Timestamp::now();
        let mut api_roots = BTreeMap::new();
        for (name, root) in tree.api_roots {
            let mut collections: Vec<CollectionStore> = Vec::with_capacity(root.collections.len());
            for data in root.collections {
                if collections.iter().any(|c| c.info.id == data.collection.id) {
                    return Err(TaxiiError::BackendUnavailable(format!(
                        "data tree has duplicate collection {} under api root {name}",
                        data.collection.id
                    )));
                }
                let records = data
                    .objects
                    .into_iter()
                    .map(|seed| seed.into_record(load_time))
                    .collect();
                collections.push(CollectionStore {
                    info: data.collection,
                    records,
                });
            }
            api_roots.insert(
                name,
                RootStore {
                    info: root.info,
                    collections,
                    statuses: BTreeMap::new(),
                },
            );
        }
        Ok(MemoryBackend {
            store: RwLock::new(Store {
                discovery: tree.discovery,
                api_roots,
            }),
            persist_to,
        })
    }

    pub fn from_seed_file(path: &Path, persist: bool) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TaxiiError::BackendUnavailable(format!(
                "cannot read data tree {}: {e}",
                path.display()
            ))
        })?;
        let tree: DataTree = serde_json::from_str(&raw).map_err(|e| {
            TaxiiError::BackendUnavailable(format!(
                "cannot parse data tree {}: {e}",
                path.display()
            ))
        })?;
        tracing::info!(path = %path.display(), "loaded data tree");
        Self::from_data(tree, persist.then(|| path.to_owned()))
    }

    /// Snapshot the store back into its serialized shape.
    pub async fn to_tree(&self) -> DataTree {
        let store = self.store.read().await;
        let api_roots = store
            .api_roots
            .iter()
            .map(|(name, root)| {
                let collections = root
                    .collections
                    .iter()
                    .map(|c| CollectionData {
                        collection: c.info.clone(),
                        objects: c
                            .records
                            .iter()
                            .map(|r| ObjectSeed {
                                date_added: Some(r.manifest.date_added),
                                object: r.object.clone(),
                            })
                            .collect(),
                    })
                    .collect();
                (
                    name.clone(),
                    ApiRootData {
                        info: root.info.clone(),
                        collections,
                    },
                )
            })
            .collect();
        DataTree {
            discovery: store.discovery.clone(),
            api_roots,
        }
    }

    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let tree = self.to_tree().await;
        let json = serde_json::to_string_pretty(&tree)
            .map_err(|e| TaxiiError::Processing(format!("cannot serialize data tree: {e}")))?;
        tokio::fs::write(path, json).await.map_err(|e| {
            TaxiiError::Processing(format!("cannot write data tree {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "saved data tree");
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get_discovery(&self) -> Result<DiscoveryInfo> {
        Ok(self.store.read().await.discovery.clone())
    }

    async fn get_api_root_info(&self, api_root: &str) -> Result<ApiRoot> {
        Ok(self.store.read().await.root(api_root)?.info.clone())
    }

    async fn get_collections(&self, api_root: &str) -> Result<Vec<Collection>> {
        let store = self.store.read().await;
        Ok(store
            .root(api_root)?
            .collections
            .iter()
            .map(|c| c.info.clone())
            .collect())
    }

    async fn get_collection(&self, api_root: &str, collection_id: &str) -> Result<Collection> {
        let store = self.store.read().await;
        Ok(store.root(api_root)?.collection(collection_id)?.info.clone())
    }

    async fn get_objects(
        &self,
        api_root: &str,
        collection_id: &str,
        query: &Query,
        policy: PagePolicy,
    ) -> Result<Page<ObjectRecord>> {
        let store = self.store.read().await;
        let candidates = store.root(api_root)?.collection(collection_id)?.records.clone();
        Ok(evaluate(candidates, query, policy))
    }

    async fn get_manifest(
        &self,
        api_root: &str,
        collection_id: &str,
        query: &Query,
        policy: PagePolicy,
    ) -> Result<Page<ManifestRecord>> {
        let store = self.store.read().await;
        let candidates: Vec<ManifestRecord> = store
            .root(api_root)?
            .collection(collection_id)?
            .records
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
        let store = self.store.read().await;
        let candidates: Vec<ObjectRecord> = store
            .root(api_root)?
            .collection(collection_id)?
            .records
            .iter()
            .filter(|r| r.object.id == object_id)
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(TaxiiError::not_found(format!("object {object_id}")));
        }
        Ok(evaluate(candidates, query, policy).map(|r| r.manifest.version))
    }

    async fn add_objects(
        &self,
        api_root: &str,
        collection_id: &str,
        objects: Vec<StixObject>,
        request_time: Timestamp,
    ) -> Result<Vec<StatusResolution>> {
        let mut store = self.store.write().await;
        let collection = store.root_mut(api_root)?.collection_mut(collection_id)?;
        let mut resolutions = Vec::with_capacity(objects.len());
        for object in objects {
            let version = object.version(request_time);
            let already_there = collection
                .records
                .iter()
                .any(|r| r.object.id == object.id && r.manifest.version == version);
            if already_there {
                resolutions.push(StatusResolution::success_with(
                    object.id,
                    version,
                    "object already added",
                ));
                continue;
            }
            let id = object.id.clone();
            let media_type = object.media_type();
            collection.records.push(ObjectRecord {
                manifest: ManifestEntry {
                    date_added: request_time,
                    media_type,
                    version,
                },
                object,
            });
            resolutions.push(StatusResolution::success(id, version));
        }
        Ok(resolutions)
    }

    async fn get_status(&self, api_root: &str, status_id: &str) -> Result<StatusRecord> {
        let store = self.store.read().await;
        store
            .root(api_root)?
            .statuses
            .get(status_id)
            .cloned()
            .ok_or_else(|| TaxiiError::not_found(format!("status {status_id}")))
    }

    async fn insert_status(&self, api_root: &str, record: StatusRecord) -> Result<()> {
        let mut store = self.store.write().await;
        let root = store.root_mut(api_root)?;
        root.statuses.insert(record.id.clone(), record);
        Ok(())
    }

    async fn update_status(
        &self,
        api_root: &str,
        status_id: &str,
        resolution: &StatusResolution,
    ) -> Result<StatusRecord> {
        let mut store = self.store.write().await;
        let record = store
            .root_mut(api_root)?
            .statuses
            .get_mut(status_id)
            .ok_or_else(|| TaxiiError::not_found(format!("status {status_id}")))?;
        record.resolve(resolution)?;
        Ok(record.clone())
    }

    async fn delete_object(
        &self,
        api_root: &str,
        collection_id: &str,
        object_id: &str,
        versions: &VersionSelect,
    ) -> Result<()> {
        let mut store = self.store.write().await;
        let collection = store.root_mut(api_root)?.collection_mut(collection_id)?;
        let present: Vec<Timestamp> = collection
            .records
            .iter()
            .filter(|r| r.object.id == object_id)
            .map(|r| r.manifest.version)
            .collect();
        if present.is_empty() {
            return Err(TaxiiError::not_found(format!("object {object_id}")));
        }
        let doomed = versions.pick(&present);
        collection
            .records
            .retain(|r| r.object.id != object_id || !doomed.contains(&r.manifest.version));
        Ok(())
    }

    async fn create_collection(&self, api_root: &str, collection: Collection) -> Result<()> {
        let mut store = self.store.write().await;
        let root = store.root_mut(api_root)?;
        if root.collections.iter().any(|c| c.info.id == collection.id) {
            return Err(TaxiiError::Processing(format!(
                "collection {} already exists",
                collection.id
            )));
        }
        root.collections.push(CollectionStore {
            info: collection,
            records: Vec::new(),
        });
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(path) = &self.persist_to {
            self.save_to_file(path).await?;
        }
        Ok(())
    }
}
