//! Manifest handler
//!
//! Serves object metadata (id, date added, version, media type) through
//! the same filter pipeline as the objects endpoint.

use axum::extract::{Path, State};
use axum::http::HeaderMap;

use ducat_core::ManifestEnvelope;

use crate::auth::Authenticated;
use crate::error::ApiError;
use crate::handlers::{page_headers, AppState, FilterParams, TaxiiAccept, TaxiiJson};

/// Get manifest
///
/// Manifest entries for the collection, one per stored object version,
/// filtered and paged exactly like the objects endpoint.
#[utoipa::path(
    get,
    path = "/{api_root}/collections/{collection_id}/manifest/",
    tag = "Objects",
    params(
        ("api_root" = String, Path, description = "API root path segment"),
        ("collection_id" = String, Path, description = "Collection identifier"),
        ("added_after" = Option<String>, Query, description = "Only entries added strictly after this instant"),
        ("limit" = Option<u32>, Query, description = "Page size, clamped to the server maximum"),
        ("next" = Option<String>, Query, description = "Opaque cursor from a previous page"),
        ("match[id]" = Option<String>, Query, description = "Comma-separated object ids"),
        ("match[type]" = Option<String>, Query, description = "Comma-separated STIX types"),
        ("match[version]" = Option<String>, Query, description = "first, last, all, or explicit timestamps")
    ),
    responses(
        (status = 200, description = "Filtered page of manifest entries", body = ManifestEnvelope),
        (status = 400, description = "Malformed filter parameter"),
        (status = 401, description = "Missing or invalid credentials"),
        (status = 403, description = "Collection does not permit reading"),
        (status = 404, description = "Unknown API root or collection")
    )
)]
pub async fn get_manifest(
    State(state): State<AppState>,
    _user: Authenticated,
    _accept: TaxiiAccept,
    Path((api_root, collection_id)): Path<(String, String)>,
    FilterParams(query): FilterParams,
) -> Result<(HeaderMap, TaxiiJson<ManifestEnvelope>), ApiError> {
    let page = state
        .service
        .manifest(&api_root, &collection_id, &query)
        .await?;
    let headers = page_headers(&page);
    let envelope = ManifestEnvelope {
        more: page.more,
        next: page.next,
        objects: page.items,
    };
    Ok((headers, TaxiiJson(envelope)))
}
