//! Collection handlers
//!
//! Lists the collections under an API root and serves individual
//! collection metadata, including the caller-visible read/write flags.

use axum::extract::{Path, State};

use ducat_core::{Collection, CollectionsResponse};

use crate::auth::Authenticated;
use crate::error::ApiError;
use crate::handlers::{AppState, TaxiiAccept, TaxiiJson};

/// List collections
///
/// The collections under the API root that the caller may read. The
/// `can_write` flag tells clients whether they may also push objects.
#[utoipa::path(
    get,
    path = "/{api_root}/collections/",
    tag = "Collections",
    params(
        ("api_root" = String, Path, description = "API root path segment")
    ),
    responses(
        (status = 200, description = "Readable collections in the API root", body = CollectionsResponse),
        (status = 401, description = "Missing or invalid credentials"),
        (status = 404, description = "Unknown API root")
    )
)]
pub async fn get_collections(
    State(state): State<AppState>,
    _user: Authenticated,
    _accept: TaxiiAccept,
    Path(api_root): Path<String>,
) -> Result<TaxiiJson<CollectionsResponse>, ApiError> {
    let collections = state.service.collections(&api_root).await?;
    Ok(TaxiiJson(CollectionsResponse { collections }))
}

/// Get one collection
#[utoipa::path(
    get,
    path = "/{api_root}/collections/{collection_id}/",
    tag = "Collections",
    params(
        ("api_root" = String, Path, description = "API root path segment"),
        ("collection_id" = String, Path, description = "Collection identifier")
    ),
    responses(
        (status = 200, description = "Collection metadata", body = Collection),
        (status = 401, description = "Missing or invalid credentials"),
        (status = 403, description = "Collection is not readable"),
        (status = 404, description = "Unknown API root or collection")
    )
)]
pub async fn get_collection(
    State(state): State<AppState>,
    _user: Authenticated,
    _accept: TaxiiAccept,
    Path((api_root, collection_id)): Path<(String, String)>,
) -> Result<TaxiiJson<Collection>, ApiError> {
    let collection = state.service.collection(&api_root, &collection_id).await?;
    Ok(TaxiiJson(collection))
}
