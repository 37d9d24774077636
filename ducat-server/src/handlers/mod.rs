//! HTTP request handlers for the TAXII endpoint surface.
//!
//! Shared request/response plumbing lives here: the TAXII JSON responder,
//! the Accept-header gate, and the filter-parameter extractor the listing
//! endpoints share.

pub mod collections;
pub mod discovery;
pub mod health;
pub mod manifest;
pub mod objects;
pub mod status;

pub use crate::state::AppState;
pub use collections::{get_collection, get_collections};
pub use discovery::{get_api_root, get_discovery};
pub use health::{health, ready, HealthResponse, ReadyResponse};
pub use manifest::get_manifest;
pub use objects::{add_objects, delete_object, get_object, get_object_versions, get_objects};
pub use status::get_status;

use axum::extract::{FromRequestParts, Query as QueryParams};
use axum::http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use ducat_core::{Page, Query, TAXII_MEDIA_TYPE};

use crate::error::ApiError;

/// Response headers exposing the `date_added` range of a served page.
pub const DATE_ADDED_FIRST: HeaderName = HeaderName::from_static("x-taxii-date-added-first");
pub const DATE_ADDED_LAST: HeaderName = HeaderName::from_static("x-taxii-date-added-last");

/// JSON responder carrying the TAXII media type instead of plain JSON.
pub struct TaxiiJson<T>(pub T);

impl<T: Serialize> IntoResponse for TaxiiJson<T> {
    fn into_response(self) -> Response {
        let mut response = Json(self.0).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(TAXII_MEDIA_TYPE),
        );
        response
    }
}

/// Accept-header gate. Every TAXII endpoint requires the header to offer
/// `application/taxii+json`, bare or with `version=2.1`.
pub struct TaxiiAccept;

impl<S: Send + Sync> FromRequestParts<S> for TaxiiAccept {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let accept = parts
            .headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        check_accept(accept)?;
        Ok(TaxiiAccept)
    }
}

/// Spaces are stripped and each comma-separated entry checked on its own;
/// wildcards do not match.
fn check_accept(accept: &str) -> Result<(), ApiError> {
    for item in accept.replace(' ', "").split(',') {
        if let Some(rest) = item.strip_prefix("application/taxii+json") {
            if rest.is_empty() {
                return Ok(());
            }
            if let Some(version) = rest.strip_prefix(";version=") {
                if version == "2.1" {
                    return Ok(());
                }
                return Err(ApiError::not_acceptable(format!(
                    "the server does not support version {version}"
                )));
            }
        }
    }
    Err(ApiError::not_acceptable(
        "media type in the Accept header is invalid or not found",
    ))
}

/// Filter and paging parameters, parsed from the query string.
///
/// Malformed values reject the request with 400 before the handler runs.
pub struct FilterParams(pub Query);

impl<S: Send + Sync> FromRequestParts<S> for FilterParams {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let QueryParams(pairs) =
            QueryParams::<Vec<(String, String)>>::from_request_parts(parts, state)
                .await
                .map_err(|e| ApiError::bad_request(e.to_string()))?;
        let query = Query::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
        Ok(FilterParams(query))
    }
}

/// `X-TAXII-Date-Added-First` / `-Last` headers for a served page. Empty
/// pages carry neither.
pub fn page_headers<T>(page: &Page<T>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(first) = page.first_added {
        if let Ok(value) = HeaderValue::from_str(&first.to_rfc3339()) {
            headers.insert(DATE_ADDED_FIRST, value);
        }
    }
    if let Some(last) = page.last_added {
        if let Ok(value) = HeaderValue::from_str(&last.to_rfc3339()) {
            headers.insert(DATE_ADDED_LAST, value);
        }
    }
    headers
}
