//! Discovery handlers
//!
//! Serves the server discovery resource and per-API-root metadata.

use axum::extract::{Path, State};

use ducat_core::{ApiRoot, DiscoveryInfo};

use crate::auth::Authenticated;
use crate::error::ApiError;
use crate::handlers::{AppState, TaxiiAccept, TaxiiJson};

/// Server discovery
///
/// Entry point for TAXII clients: advertises the server's API roots and
/// which one is the default.
#[utoipa::path(
    get,
    path = "/taxii2/",
    tag = "Discovery",
    responses(
        (status = 200, description = "Discovery information", body = DiscoveryInfo),
        (status = 401, description = "Missing or invalid credentials"),
        (status = 406, description = "Accept header does not offer the TAXII media type")
    )
)]
pub async fn get_discovery(
    State(state): State<AppState>,
    _user: Authenticated,
    _accept: TaxiiAccept,
) -> Result<TaxiiJson<DiscoveryInfo>, ApiError> {
    let discovery = state.service.discovery().await?;
    Ok(TaxiiJson(discovery))
}

/// API root information
///
/// Returns the title, supported versions, and upload size limit of one
/// API root.
#[utoipa::path(
    get,
    path = "/{api_root}/",
    tag = "Discovery",
    params(
        ("api_root" = String, Path, description = "API root path segment")
    ),
    responses(
        (status = 200, description = "API root information", body = ApiRoot),
        (status = 401, description = "Missing or invalid credentials"),
        (status = 404, description = "Unknown API root")
    )
)]
pub async fn get_api_root(
    State(state): State<AppState>,
    _user: Authenticated,
    _accept: TaxiiAccept,
    Path(api_root): Path<String>,
) -> Result<TaxiiJson<ApiRoot>, ApiError> {
    let info = state.service.api_root(&api_root).await?;
    Ok(TaxiiJson(info))
}
