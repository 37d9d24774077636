//! Object handlers
//!
//! The read side serves envelopes through the shared filter pipeline; the
//! write side accepts envelopes for asynchronous-style processing and
//! reports progress through status records.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use ducat_core::{Envelope, ObjectsEnvelope, StatusRecord, Timestamp, VersionsEnvelope};

use crate::auth::Authenticated;
use crate::error::ApiError;
use crate::handlers::{page_headers, AppState, FilterParams, TaxiiAccept, TaxiiJson};

/// Get objects
///
/// Objects in the collection, filtered and paged. The `X-TAXII-Date-Added-First`
/// and `-Last` headers bracket the `date_added` range of the returned page.
#[utoipa::path(
    get,
    path = "/{api_root}/collections/{collection_id}/objects/",
    tag = "Objects",
    params(
        ("api_root" = String, Path, description = "API root path segment"),
        ("collection_id" = String, Path, description = "Collection identifier"),
        ("added_after" = Option<String>, Query, description = "Only objects added strictly after this instant"),
        ("limit" = Option<u32>, Query, description = "Page size, clamped to the server maximum"),
        ("next" = Option<String>, Query, description = "Opaque cursor from a previous page"),
        ("match[id]" = Option<String>, Query, description = "Comma-separated object ids"),
        ("match[type]" = Option<String>, Query, description = "Comma-separated STIX types"),
        ("match[version]" = Option<String>, Query, description = "first, last, all, or explicit timestamps")
    ),
    responses(
        (status = 200, description = "Filtered page of objects", body = ObjectsEnvelope),
        (status = 400, description = "Malformed filter parameter"),
        (status = 401, description = "Missing or invalid credentials"),
        (status = 403, description = "Collection does not permit reading"),
        (status = 404, description = "Unknown API root or collection")
    )
)]
pub async fn get_objects(
    State(state): State<AppState>,
    _user: Authenticated,
    _accept: TaxiiAccept,
    Path((api_root, collection_id)): Path<(String, String)>,
    FilterParams(query): FilterParams,
) -> Result<(HeaderMap, TaxiiJson<ObjectsEnvelope>), ApiError> {
    let page = state
        .service
        .objects(&api_root, &collection_id, &query)
        .await?;
    let headers = page_headers(&page);
    let envelope = ObjectsEnvelope {
        more: page.more,
        next: page.next,
        objects: page.items.into_iter().map(|r| r.object).collect(),
    };
    Ok((headers, TaxiiJson(envelope)))
}

/// Add objects
///
/// Accepts an envelope and returns 202 with a status record. Per-object
/// validation failures land in the record as failures without aborting the
/// rest of the batch; whether the record is already complete depends on the
/// configured add mode.
#[utoipa::path(
    post,
    path = "/{api_root}/collections/{collection_id}/objects/",
    tag = "Objects",
    params(
        ("api_root" = String, Path, description = "API root path segment"),
        ("collection_id" = String, Path, description = "Collection identifier")
    ),
    request_body(
        content = Envelope,
        description = "Envelope of STIX objects to add",
        content_type = "application/taxii+json"
    ),
    responses(
        (status = 202, description = "Request accepted; poll the status endpoint", body = StatusRecord),
        (status = 401, description = "Missing or invalid credentials"),
        (status = 403, description = "Collection does not permit writing"),
        (status = 404, description = "Unknown API root or collection"),
        (status = 415, description = "Body is not a JSON media type"),
        (status = 422, description = "Envelope could not be processed")
    )
)]
pub async fn add_objects(
    State(state): State<AppState>,
    _user: Authenticated,
    _accept: TaxiiAccept,
    Path((api_root, collection_id)): Path<(String, String)>,
    body: Result<Json<Envelope>, JsonRejection>,
) -> Result<(StatusCode, TaxiiJson<StatusRecord>), ApiError> {
    let Json(envelope) = body.map_err(|rejection| match rejection {
        JsonRejection::MissingJsonContentType(_) => {
            ApiError::unsupported_media_type("POST bodies must be a JSON media type")
        }
        other => ApiError::bad_request(other.body_text()),
    })?;
    // Objects without a modified or created timestamp version as the moment
    // the server received them.
    let request_time = Timestamp::now();
    let status = state
        .service
        .add_objects(&api_root, &collection_id, envelope, request_time)
        .await?;
    Ok((StatusCode::ACCEPTED, TaxiiJson(status)))
}

/// Get one object
///
/// The latest version of the object unless `match[version]` selects
/// others. Absent objects and objects whose versions are all filtered
/// out both report 404.
#[utoipa::path(
    get,
    path = "/{api_root}/collections/{collection_id}/objects/{object_id}/",
    tag = "Objects",
    params(
        ("api_root" = String, Path, description = "API root path segment"),
        ("collection_id" = String, Path, description = "Collection identifier"),
        ("object_id" = String, Path, description = "STIX object identifier"),
        ("match[version]" = Option<String>, Query, description = "first, last, all, or explicit timestamps")
    ),
    responses(
        (status = 200, description = "Matching versions of the object", body = ObjectsEnvelope),
        (status = 401, description = "Missing or invalid credentials"),
        (status = 403, description = "Collection does not permit reading"),
        (status = 404, description = "Object not present in the collection")
    )
)]
pub async fn get_object(
    State(state): State<AppState>,
    _user: Authenticated,
    _accept: TaxiiAccept,
    Path((api_root, collection_id, object_id)): Path<(String, String, String)>,
    FilterParams(query): FilterParams,
) -> Result<(HeaderMap, TaxiiJson<ObjectsEnvelope>), ApiError> {
    let page = state
        .service
        .object(&api_root, &collection_id, &object_id, query)
        .await?;
    let headers = page_headers(&page);
    let envelope = ObjectsEnvelope {
        more: page.more,
        next: page.next,
        objects: page.items.into_iter().map(|r| r.object).collect(),
    };
    Ok((headers, TaxiiJson(envelope)))
}

/// Delete an object
///
/// Removes the versions selected by `match[version]` from a writable
/// collection, all of them when unqualified.
#[utoipa::path(
    delete,
    path = "/{api_root}/collections/{collection_id}/objects/{object_id}/",
    tag = "Objects",
    params(
        ("api_root" = String, Path, description = "API root path segment"),
        ("collection_id" = String, Path, description = "Collection identifier"),
        ("object_id" = String, Path, description = "STIX object identifier"),
        ("match[version]" = Option<String>, Query, description = "first, last, all, or explicit timestamps")
    ),
    responses(
        (status = 200, description = "Selected versions deleted"),
        (status = 401, description = "Missing or invalid credentials"),
        (status = 403, description = "Collection does not permit writing"),
        (status = 404, description = "Object not present in the collection")
    )
)]
pub async fn delete_object(
    State(state): State<AppState>,
    _user: Authenticated,
    _accept: TaxiiAccept,
    Path((api_root, collection_id, object_id)): Path<(String, String, String)>,
    FilterParams(query): FilterParams,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .delete_object(&api_root, &collection_id, &object_id, &query)
        .await?;
    Ok(StatusCode::OK)
}

/// Get object versions
///
/// Every stored version timestamp of the object, oldest `date_added`
/// first.
#[utoipa::path(
    get,
    path = "/{api_root}/collections/{collection_id}/objects/{object_id}/versions/",
    tag = "Objects",
    params(
        ("api_root" = String, Path, description = "API root path segment"),
        ("collection_id" = String, Path, description = "Collection identifier"),
        ("object_id" = String, Path, description = "STIX object identifier"),
        ("added_after" = Option<String>, Query, description = "Only versions added strictly after this instant"),
        ("limit" = Option<u32>, Query, description = "Page size, clamped to the server maximum")
    ),
    responses(
        (status = 200, description = "Version timestamps of the object", body = VersionsEnvelope),
        (status = 401, description = "Missing or invalid credentials"),
        (status = 403, description = "Collection does not permit reading"),
        (status = 404, description = "Unknown API root or collection")
    )
)]
pub async fn get_object_versions(
    State(state): State<AppState>,
    _user: Authenticated,
    _accept: TaxiiAccept,
    Path((api_root, collection_id, object_id)): Path<(String, String, String)>,
    FilterParams(query): FilterParams,
) -> Result<(HeaderMap, TaxiiJson<VersionsEnvelope>), ApiError> {
    let page = state
        .service
        .object_versions(&api_root, &collection_id, &object_id, query)
        .await?;
    let headers = page_headers(&page);
    let envelope = VersionsEnvelope {
        more: page.more,
        next: page.next,
        versions: page.items,
    };
    Ok((headers, TaxiiJson(envelope)))
}
