//! OpenAPI documentation configuration
//!
//! Generates OpenAPI 3.0 specification for the Ducat TAXII API.

use utoipa::OpenApi;

use ducat_core::{
    ApiRoot, Collection, CollectionsResponse, DiscoveryInfo, Envelope, ManifestEnvelope,
    ManifestRecord, ObjectsEnvelope, StatusRecord, StixObject, VersionsEnvelope,
};
use ducat_core::status::{StatusEntry, StatusState};

use crate::handlers::{HealthResponse, ReadyResponse};

/// Ducat TAXII API - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Ducat - TAXII 2.1 API",
        version = "0.1.0",
        description = r#"
## Threat Intelligence Sharing API

Ducat is a TAXII 2.1 server for exchanging STIX cyber threat intelligence:

- **Collections** - Named groupings of STIX objects with per-collection read/write permissions
- **Filtering** - `added_after`, `match[id]`, `match[type]`, `match[version]` on every listing
- **Pagination** - Stable `date_added` ordering with opaque `next` cursors
- **Status tracking** - Every add request yields a pollable status record
- **Pluggable storage** - In-memory, PostgreSQL, or read-only directory backends

### How It Works

1. **Discover** the server's API roots via `GET /taxii2/`
2. **List** the collections under a root and check their `can_read`/`can_write` flags
3. **Poll** `GET .../objects/` with `added_after` to pull new intelligence
4. **Push** envelopes via `POST .../objects/` and track the outcome through `GET /{api_root}/status/{status_id}/`

All TAXII endpoints require `Accept: application/taxii+json;version=2.1`.

### Use Cases

- Sharing indicators of compromise between organizations
- Feeding SIEM and threat-hunting pipelines
- Mirroring commercial or community intelligence feeds
"#,
        license(
            name = "MIT OR Apache-2.0",
            url = "https://github.com/ducat-dev/ducat/blob/main/LICENSE"
        ),
        contact(
            name = "Ducat Team",
            url = "https://github.com/ducat-dev/ducat"
        )
    ),
    servers(
        (url = "http://localhost:5000", description = "Local development server")
    ),
    tags(
        (name = "Discovery", description = "Server discovery and API root metadata"),
        (name = "Collections", description = "Collection listings and per-collection metadata"),
        (name = "Objects", description = "Read, add, and delete STIX objects; manifests and version histories"),
        (name = "Status", description = "Poll the outcome of add requests"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::health::ready,
        crate::handlers::discovery::get_discovery,
        crate::handlers::discovery::get_api_root,
        crate::handlers::collections::get_collections,
        crate::handlers::collections::get_collection,
        crate::handlers::objects::get_objects,
        crate::handlers::objects::add_objects,
        crate::handlers::objects::get_object,
        crate::handlers::objects::delete_object,
        crate::handlers::objects::get_object_versions,
        crate::handlers::manifest::get_manifest,
        crate::handlers::status::get_status,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            DiscoveryInfo,
            ApiRoot,
            Collection,
            CollectionsResponse,
            StixObject,
            Envelope,
            ObjectsEnvelope,
            ManifestEnvelope,
            ManifestRecord,
            VersionsEnvelope,
            StatusRecord,
            StatusEntry,
            StatusState,
        )
    )
)]
pub struct ApiDoc;
