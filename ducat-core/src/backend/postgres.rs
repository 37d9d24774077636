//! PostgreSQL backend with the filter pipeline pushed down into SQL.
//!
//! Objects are stored with typed columns for the filterable fields and the
//! full document as JSONB. Version selection uses window functions over the
//! candidate set, so a page is produced in one round trip plus a count.
//! Status updates run read-modify-write under `SELECT ... FOR UPDATE`.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::backend::{Backend, DataTree};
use crate::error::{Result, TaxiiError};
use crate::filter::{Page, PagePolicy, Query, VersionSelect};
use crate::model::{
    ApiRoot, Collection, DiscoveryInfo, ManifestEntry, ManifestRecord, ObjectRecord, StixObject,
};
use crate::status::{StatusRecord, StatusResolution};
use crate::timestamp::Timestamp;

pub struct PostgresBackend {
    pool: PgPool,
}

/// Filter bind set shared by the count and page queries. The SQL fragments
/// below must agree with [`crate::filter::evaluate`].
struct FilterBinds {
    added_after: Option<DateTime<Utc>>,
    ids: Option<Vec<String>>,
    types: Option<Vec<String>>,
    all: bool,
    last: bool,
    first: bool,
    explicit: Vec<DateTime<Utc>>,
}

impl FilterBinds {
    fn from_query(query: &Query) -> Self {
        let filters = &query.filters;
        let version = filters.version.clone().unwrap_or_default();
        FilterBinds {
            added_after: filters.added_after.map(|t| t.datetime()),
            ids: filters.ids.as_ref().map(|s| s.iter().cloned().collect()),
            types: filters.types.as_ref().map(|s| s.iter().cloned().collect()),
            all: version.all,
            last: version.last,
            first: version.first,
            explicit: version.explicit.iter().map(|t| t.datetime()).collect(),
        }
    }
}

const MATCHED_CTE: &str = r#"
    WITH candidates AS (
        SELECT object_id, object_type, version, date_added, media_type, document,
               MIN(version) OVER (PARTITION BY object_id) AS first_version,
               MAX(version) OVER (PARTITION BY object_id) AS last_version
        FROM taxii_objects
        WHERE api_root = $1
          AND collection_id = $2
          AND ($3::timestamptz IS NULL OR date_added > $3)
          AND ($4::text[] IS NULL OR object_id = ANY($4))
          AND ($5::text[] IS NULL OR object_type = ANY($5))
    ),
    matched AS (
        SELECT object_id, version, date_added, media_type, document
        FROM candidates
        WHERE $6::bool
           OR ($7::bool AND version = last_version)
           OR ($8::bool AND version = first_version)
           OR version = ANY($9::timestamptz[])
    )
"#;

#[derive(sqlx::FromRow)]
struct ObjectRow {
    object_id: String,
    version: DateTime<Utc>,
    date_added: DateTime<Utc>,
    media_type: String,
    document: serde_json::Value,
}

impl ObjectRow {
    fn into_record(self) -> Result<ObjectRecord> {
        let object: StixObject = serde_json::from_value(self.document).map_err(|e| {
            TaxiiError::Processing(format!("corrupt stored object {}: {e}", self.object_id))
        })?;
        Ok(ObjectRecord {
            object,
            manifest: ManifestEntry {
                date_added: Timestamp::from(self.date_added),
                media_type: self.media_type,
                version: Timestamp::from(self.version),
            },
        })
    }

    fn into_manifest(self) -> ManifestRecord {
        ManifestRecord {
            id: self.object_id,
            date_added: Timestamp::from(self.date_added),
            version: Timestamp::from(self.version),
            media_type: self.media_type,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    document: serde_json::Value,
}

fn db_err(e: sqlx::Error) -> TaxiiError {
    TaxiiError::BackendUnavailable(format!("database error: {e}"))
}

fn decode<T: serde::de::DeserializeOwned>(what: &str, document: serde_json::Value) -> Result<T> {
    serde_json::from_value(document)
        .map_err(|e| TaxiiError::Processing(format!("corrupt stored {what}: {e}")))
}

impl PostgresBackend {
    pub async fn connect(url: &str, max_connections: Option<u32>) -> Result<Self> {
        let mut options = PgPoolOptions::new();
        if let Some(max) = max_connections {
            options = options.max_connections(max);
        }
        let pool = options
            .connect(url)
            .await
            .map_err(|e| TaxiiError::BackendUnavailable(format!("cannot connect: {e}")))?;
        tracing::info!("connected to PostgreSQL");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| TaxiiError::BackendUnavailable(format!("migration failed: {e}")))?;
        tracing::info!("database migrations completed");

        Ok(Self { pool })
    }

    /// Build on an existing pool. Migrations are the caller's problem.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load a data tree into the database, inserting what is missing and
    /// leaving existing rows alone.
    pub async fn seed_from_file(&self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TaxiiError::BackendUnavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        let tree: DataTree = serde_json::from_str(&raw).map_err(|e| {
            TaxiiError::BackendUnavailable(format!("cannot parse {}: {e}", path.display()))
        })?;
        self.seed(tree).await
    }

    pub async fn seed(&self, tree: DataTree) -> Result<()> {
        let load_time = Timestamp::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let discovery = serde_json::to_value(&tree.discovery)
            .map_err(|e| TaxiiError::Processing(format!("cannot serialize discovery: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO taxii_discovery (singleton, document)
            VALUES (TRUE, $1)
            ON CONFLICT (singleton) DO UPDATE SET document = EXCLUDED.document
            "#,
        )
        .bind(&discovery)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut objects = 0usize;
        for (name, root) in &tree.api_roots {
            let info = serde_json::to_value(&root.info)
                .map_err(|e| TaxiiError::Processing(format!("cannot serialize api root: {e}")))?;
            sqlx::query(
                r#"
                INSERT INTO taxii_api_roots (name, document)
                VALUES ($1, $2)
                ON CONFLICT (name) DO UPDATE SET document = EXCLUDED.document
                "#,
            )
            .bind(name)
            .bind(&info)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            for data in &root.collections {
                let document = serde_json::to_value(&data.collection).map_err(|e| {
                    TaxiiError::Processing(format!("cannot serialize collection: {e}"))
                })?;
                sqlx::query(
                    r#"
                    INSERT INTO taxii_collections (api_root, id, document)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (api_root, id) DO UPDATE SET document = EXCLUDED.document
                    "#,
                )
                .bind(name)
                .bind(&data.collection.id)
                .bind(&document)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                for seed in data.objects.iter().cloned() {
                    let record = seed.into_record(load_time);
                    insert_record(&mut tx, name, &data.collection.id, &record).await?;
                    objects += 1;
                }
            }
        }

        tx.commit().await.map_err(db_err)?;
        tracing::info!(api_roots = tree.api_roots.len(), objects, "seeded database");
        Ok(())
    }

    async fn collection_exists(&self, api_root: &str, collection_id: &str) -> Result<bool> {
        let found: Option<i32> =
            sqlx::query_scalar(r#"SELECT 1 FROM taxii_collections WHERE api_root = $1 AND id = $2"#)
                .bind(api_root)
                .bind(collection_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(found.is_some())
    }

    async fn require_collection(&self, api_root: &str, collection_id: &str) -> Result<()> {
        if self.collection_exists(api_root, collection_id).await? {
            Ok(())
        } else {
            Err(TaxiiError::not_found(format!("collection {collection_id}")))
        }
    }

    async fn count_matched(
        &self,
        api_root: &str,
        collection_id: &str,
        binds: &FilterBinds,
    ) -> Result<usize> {
        let sql = format!("{MATCHED_CTE} SELECT COUNT(*) FROM matched");
        let total: i64 = sqlx::query_scalar(&sql)
            .bind(api_root)
            .bind(collection_id)
            .bind(binds.added_after)
            .bind(binds.ids.as_deref())
            .bind(binds.types.as_deref())
            .bind(binds.all)
            .bind(binds.last)
            .bind(binds.first)
            .bind(&binds.explicit)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(total as usize)
    }

    async fn fetch_page(
        &self,
        api_root: &str,
        collection_id: &str,
        query: &Query,
        policy: PagePolicy,
    ) -> Result<Page<ObjectRow>> {
        let binds = FilterBinds::from_query(query);
        let total = self.count_matched(api_root, collection_id, &binds).await?;

        let limit = policy.effective_limit(query.page.limit);
        let offset = query.page.offset;
        let sql = format!(
            "{MATCHED_CTE}
             SELECT object_id, version, date_added, media_type, document
             FROM matched
             ORDER BY date_added, object_id, version
             OFFSET $10 LIMIT $11"
        );
        let rows = sqlx::query_as::<_, ObjectRow>(&sql)
            .bind(api_root)
            .bind(collection_id)
            .bind(binds.added_after)
            .bind(binds.ids.as_deref())
            .bind(binds.types.as_deref())
            .bind(binds.all)
            .bind(binds.last)
            .bind(binds.first)
            .bind(&binds.explicit)
            .bind(sql_offset(offset))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let more = offset.saturating_add(limit) < total;
        Ok(Page {
            next: more.then(|| offset.saturating_add(limit).to_string()),
            more,
            total,
            first_added: rows.first().map(|r| Timestamp::from(r.date_added)),
            last_added: rows.last().map(|r| Timestamp::from(r.date_added)),
            items: rows,
        })
    }
}

/// Cursors past i64 clamp to the end of the result set instead of wrapping
/// into a negative OFFSET.
fn sql_offset(offset: usize) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}

async fn insert_record(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    api_root: &str,
    collection_id: &str,
    record: &ObjectRecord,
) -> Result<u64> {
    let document = serde_json::to_value(&record.object)
        .map_err(|e| TaxiiError::Processing(format!("cannot serialize object: {e}")))?;
    let done = sqlx::query(
        r#"
        INSERT INTO taxii_objects
            (api_root, collection_id, object_id, object_type,
             version, date_added, media_type, document)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (api_root, collection_id, object_id, version) DO NOTHING
        "#,
    )
    .bind(api_root)
    .bind(collection_id)
    .bind(&record.object.id)
    .bind(&record.object.object_type)
    .bind(record.manifest.version.datetime())
    .bind(record.manifest.date_added.datetime())
    .bind(&record.manifest.media_type)
    .bind(&document)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(done.rows_affected())
}

#[async_trait]
impl Backend for PostgresBackend {
    async fn get_discovery(&self) -> Result<DiscoveryInfo> {
        let row = sqlx::query_as::<_, DocumentRow>(r#"SELECT document FROM taxii_discovery"#)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => decode("discovery information", row.document),
            None => Err(TaxiiError::BackendUnavailable(
                "discovery information has not been seeded".into(),
            )),
        }
    }

    async fn get_api_root_info(&self, api_root: &str) -> Result<ApiRoot> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"SELECT document FROM taxii_api_roots WHERE name = $1"#,
        )
        .bind(api_root)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => decode("api root", row.document),
            None => Err(TaxiiError::not_found(format!("API root {api_root}"))),
        }
    }

    async fn get_collections(&self, api_root: &str) -> Result<Vec<Collection>> {
        self.get_api_root_info(api_root).await?;
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"SELECT document FROM taxii_collections WHERE api_root = $1 ORDER BY id"#,
        )
        .bind(api_root)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter()
            .map(|row| decode("collection", row.document))
            .collect()
    }

    async fn get_collection(&self, api_root: &str, collection_id: &str) -> Result<Collection> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"SELECT document FROM taxii_collections WHERE api_root = $1 AND id = $2"#,
        )
        .bind(api_root)
        .bind(collection_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => decode("collection", row.document),
            None => Err(TaxiiError::not_found(format!("collection {collection_id}"))),
        }
    }

    async fn get_objects(
        &self,
        api_root: &str,
        collection_id: &str,
        query: &Query,
        policy: PagePolicy,
    ) -> Result<Page<ObjectRecord>> {
        self.require_collection(api_root, collection_id).await?;
        let page = self.fetch_page(api_root, collection_id, query, policy).await?;
        let Page {
            items,
            total,
            more,
            next,
            first_added,
            last_added,
        } = page;
        let items = items
            .into_iter()
            .map(ObjectRow::into_record)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page {
            items,
            total,
            more,
            next,
            first_added,
            last_added,
        })
    }

    async fn get_manifest(
        &self,
        api_root: &str,
        collection_id: &str,
        query: &Query,
        policy: PagePolicy,
    ) -> Result<Page<ManifestRecord>> {
        self.require_collection(api_root, collection_id).await?;
        let page = self.fetch_page(api_root, collection_id, query, policy).await?;
        Ok(page.map(ObjectRow::into_manifest))
    }

    async fn get_object_versions(
        &self,
        api_root: &str,
        collection_id: &str,
        object_id: &str,
        query: &Query,
        policy: PagePolicy,
    ) -> Result<Page<Timestamp>> {
        self.require_collection(api_root, collection_id).await?;
        let exists: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM taxii_objects
            WHERE api_root = $1 AND collection_id = $2 AND object_id = $3
            LIMIT 1
            "#,
        )
        .bind(api_root)
        .bind(collection_id)
        .bind(object_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        if exists.is_none() {
            return Err(TaxiiError::not_found(format!("object {object_id}")));
        }
        let scoped = query.clone().scoped_to_object(object_id);
        let page = self.fetch_page(api_root, collection_id, &scoped, policy).await?;
        Ok(page.map(|r| Timestamp::from(r.version)))
    }

    async fn add_objects(
        &self,
        api_root: &str,
        collection_id: &str,
        objects: Vec<StixObject>,
        request_time: Timestamp,
    ) -> Result<Vec<StatusResolution>> {
        self.require_collection(api_root, collection_id).await?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut resolutions = Vec::with_capacity(objects.len());
        for object in objects {
            let version = object.version(request_time);
            let media_type = object.media_type();
            let record = ObjectRecord {
                manifest: ManifestEntry {
                    date_added: request_time,
                    media_type,
                    version,
                },
                object,
            };
            match insert_record(&mut tx, api_root, collection_id, &record).await {
                Ok(0) => resolutions.push(StatusResolution::success_with(
                    record.object.id,
                    version,
                    "object already added",
                )),
                Ok(_) => resolutions.push(StatusResolution::success(record.object.id, version)),
                Err(e) => {
                    tracing::warn!(object = %record.object.id, error = %e, "object insert failed");
                    resolutions.push(StatusResolution::failure(
                        record.object.id,
                        version,
                        e.to_string(),
                    ));
                }
            }
        }
        tx.commit().await.map_err(db_err)?;
        Ok(resolutions)
    }

    async fn get_status(&self, api_root: &str, status_id: &str) -> Result<StatusRecord> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"SELECT document FROM taxii_status WHERE api_root = $1 AND id = $2"#,
        )
        .bind(api_root)
        .bind(status_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => decode("status record", row.document),
            None => Err(TaxiiError::not_found(format!("status {status_id}"))),
        }
    }

    async fn insert_status(&self, api_root: &str, record: StatusRecord) -> Result<()> {
        let document = serde_json::to_value(&record)
            .map_err(|e| TaxiiError::Processing(format!("cannot serialize status: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO taxii_status (api_root, id, document)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(api_root)
        .bind(&record.id)
        .bind(&document)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_status(
        &self,
        api_root: &str,
        status_id: &str,
        resolution: &StatusResolution,
    ) -> Result<StatusRecord> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"SELECT document FROM taxii_status WHERE api_root = $1 AND id = $2 FOR UPDATE"#,
        )
        .bind(api_root)
        .bind(status_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let mut record: StatusRecord = match row {
            Some(row) => decode("status record", row.document)?,
            None => return Err(TaxiiError::not_found(format!("status {status_id}"))),
        };
        record.resolve(resolution)?;
        let document = serde_json::to_value(&record)
            .map_err(|e| TaxiiError::Processing(format!("cannot serialize status: {e}")))?;
        sqlx::query(r#"UPDATE taxii_status SET document = $3 WHERE api_root = $1 AND id = $2"#)
            .bind(api_root)
            .bind(status_id)
            .bind(&document)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(record)
    }

    async fn delete_object(
        &self,
        api_root: &str,
        collection_id: &str,
        object_id: &str,
        versions: &VersionSelect,
    ) -> Result<()> {
        self.require_collection(api_root, collection_id).await?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let present: Vec<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT version FROM taxii_objects
            WHERE api_root = $1 AND collection_id = $2 AND object_id = $3
            FOR UPDATE
            "#,
        )
        .bind(api_root)
        .bind(collection_id)
        .bind(object_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;
        if present.is_empty() {
            return Err(TaxiiError::not_found(format!("object {object_id}")));
        }
        let present: Vec<Timestamp> = present.into_iter().map(Timestamp::from).collect();
        let doomed: Vec<DateTime<Utc>> = versions
            .pick(&present)
            .into_iter()
            .map(|t| t.datetime())
            .collect();
        sqlx::query(
            r#"
            DELETE FROM taxii_objects
            WHERE api_root = $1 AND collection_id = $2 AND object_id = $3
              AND version = ANY($4::timestamptz[])
            "#,
        )
        .bind(api_root)
        .bind(collection_id)
        .bind(object_id)
        .bind(&doomed)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn create_collection(&self, api_root: &str, collection: Collection) -> Result<()> {
        self.get_api_root_info(api_root).await?;
        let document = serde_json::to_value(&collection)
            .map_err(|e| TaxiiError::Processing(format!("cannot serialize collection: {e}")))?;
        let done = sqlx::query(
            r#"
            INSERT INTO taxii_collections (api_root, id, document)
            VALUES ($1, $2, $3)
            ON CONFLICT (api_root, id) DO NOTHING
            "#,
        )
        .bind(api_root)
        .bind(&collection.id)
        .bind(&document)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if done.rows_affected() == 0 {
            return Err(TaxiiError::Processing(format!(
                "collection {} already exists",
                collection.id
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend")
            .field("pool", &"<PgPool>")
            .finish()
    }
}
