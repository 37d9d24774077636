//! Status handler
//!
//! Lets clients poll the outcome of an add request by the status id the
//! 202 response carried.

use axum::extract::{Path, State};

use ducat_core::StatusRecord;

use crate::auth::Authenticated;
use crate::error::ApiError;
use crate::handlers::{AppState, TaxiiAccept, TaxiiJson};

/// Get status
///
/// The status record for one add request. Counts are final once the state
/// reports complete.
#[utoipa::path(
    get,
    path = "/{api_root}/status/{status_id}/",
    tag = "Status",
    params(
        ("api_root" = String, Path, description = "API root path segment"),
        ("status_id" = String, Path, description = "Status identifier from a 202 response")
    ),
    responses(
        (status = 200, description = "Status of the add request", body = StatusRecord),
        (status = 401, description = "Missing or invalid credentials"),
        (status = 404, description = "Unknown API root or status id")
    )
)]
pub async fn get_status(
    State(state): State<AppState>,
    _user: Authenticated,
    _accept: TaxiiAccept,
    Path((api_root, status_id)): Path<(String, String)>,
) -> Result<TaxiiJson<StatusRecord>, ApiError> {
    let status = state.service.status(&api_root, &status_id).await?;
    Ok(TaxiiJson(status))
}
