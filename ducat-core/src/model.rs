//! TAXII resource shapes.
//!
//! STIX content is deliberately open-ended, so object bodies keep their
//! type-specific properties in a raw JSON map; only the fields the protocol
//! itself reads (id, type, spec_version, created, modified) are typed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::filter::FilterRecord;
use crate::timestamp::Timestamp;

/// Content type for TAXII API requests and responses.
pub const TAXII_MEDIA_TYPE: &str = "application/taxii+json;version=2.1";

/// Content type recorded for stored STIX 2.1 objects.
pub const STIX_MEDIA_TYPE: &str = "application/stix+json;version=2.1";

/// Media type of one object revision, derived from its spec version.
pub fn stix_media_type(spec_version: &str) -> String {
    format!("application/stix+json;version={spec_version}")
}

/// Server-level discovery information. One per instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DiscoveryInfo {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub api_roots: Vec<String>,
}

/// Metadata for one API root, addressed by its path segment name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiRoot {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub versions: Vec<String>,
    pub max_content_length: u64,
}

/// A named grouping of objects within an API root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Collection {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub can_read: bool,
    #[serde(default)]
    pub can_write: bool,
    #[serde(default)]
    pub media_types: Vec<String>,
}

impl Collection {
    /// Whether the collection accepts content of the given media type.
    /// An empty declared list accepts everything; a declared entry without
    /// a version parameter accepts every version of its base type.
    pub fn accepts_media_type(&self, media_type: &str) -> bool {
        if self.media_types.is_empty() {
            return true;
        }
        let (base, version) = split_media_type(media_type);
        self.media_types.iter().any(|declared| {
            let (d_base, d_version) = split_media_type(declared);
            d_base == base && (d_version.is_none() || d_version == version)
        })
    }
}

fn split_media_type(media_type: &str) -> (&str, Option<&str>) {
    let mut parts = media_type.split(';').map(str::trim);
    let base = parts.next().unwrap_or("");
    let version = parts.find_map(|p| p.strip_prefix("version="));
    (base, version)
}

/// One revision of a STIX object, as stored and served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StixObject {
    pub id: String,
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<Timestamp>,
    #[serde(flatten)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub properties: Map<String, Value>,
}

impl StixObject {
    /// The revision identifier: `modified`, falling back to `created`,
    /// falling back to the time the add request was received.
    pub fn version(&self, request_time: Timestamp) -> Timestamp {
        self.modified.or(self.created).unwrap_or(request_time)
    }

    /// Effective STIX spec version. Objects carrying neither `created` nor
    /// `modified` are cyber-observables, which only exist in 2.1; otherwise
    /// the explicit `spec_version` wins, defaulting to 2.0.
    pub fn spec_version(&self) -> &str {
        if self.created.is_none() && self.modified.is_none() {
            return "2.1";
        }
        self.spec_version.as_deref().unwrap_or("2.0")
    }

    pub fn media_type(&self) -> String {
        stix_media_type(self.spec_version())
    }
}

/// Manifest bookkeeping attached to one stored object revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub date_added: Timestamp,
    pub media_type: String,
    pub version: Timestamp,
}

/// A stored object revision together with its manifest entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub object: StixObject,
    pub manifest: ManifestEntry,
}

impl ObjectRecord {
    pub fn manifest_record(&self) -> ManifestRecord {
        ManifestRecord {
            id: self.object.id.clone(),
            date_added: self.manifest.date_added,
            version: self.manifest.version,
            media_type: self.manifest.media_type.clone(),
        }
    }
}

/// Wire projection of a manifest entry, as served by the manifest endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ManifestRecord {
    pub id: String,
    pub date_added: Timestamp,
    pub version: Timestamp,
    pub media_type: String,
}

/// The type prefix of a STIX id (`indicator--...` → `indicator`). Falls back
/// to the whole id if the separator is missing.
pub fn type_prefix(id: &str) -> &str {
    id.split_once("--").map_or(id, |(prefix, _)| prefix)
}

impl FilterRecord for ObjectRecord {
    fn id(&self) -> &str {
        &self.object.id
    }

    fn object_type(&self) -> &str {
        &self.object.object_type
    }

    fn version(&self) -> Timestamp {
        self.manifest.version
    }

    fn date_added(&self) -> Timestamp {
        self.manifest.date_added
    }
}

impl FilterRecord for ManifestRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn object_type(&self) -> &str {
        type_prefix(&self.id)
    }

    fn version(&self) -> Timestamp {
        self.version
    }

    fn date_added(&self) -> Timestamp {
        self.date_added
    }
}

/// An add request's body. Objects stay raw until validated one by one.
#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Envelope {
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<Object>))]
    pub objects: Vec<Value>,
}

/// Paged objects response.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ObjectsEnvelope {
    pub more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    pub objects: Vec<StixObject>,
}

/// Paged manifest response.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ManifestEnvelope {
    pub more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    pub objects: Vec<ManifestRecord>,
}

/// Paged listing of one object's stored versions.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct VersionsEnvelope {
    pub more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    pub versions: Vec<Timestamp>,
}

/// Collections listing response.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CollectionsResponse {
    pub collections: Vec<Collection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(created: Option<&str>, modified: Option<&str>, spec: Option<&str>) -> StixObject {
        StixObject {
            id: "indicator--a932fcc6-e032-476c-826f-cb970a5a1ade".into(),
            object_type: "indicator".into(),
            spec_version: spec.map(Into::into),
            created: created.map(|c| Timestamp::parse(c).unwrap()),
            modified: modified.map(|m| Timestamp::parse(m).unwrap()),
            properties: Map::new(),
        }
    }

    #[test]
    fn version_prefers_modified_then_created_then_request_time() {
        let request_time = Timestamp::parse("2024-05-01T00:00:00.000Z").unwrap();
        let created = "2014-05-08T09:00:00.000Z";
        let modified = "2016-11-03T12:30:59.000Z";

        let full = object(Some(created), Some(modified), Some("2.1"));
        assert_eq!(full.version(request_time), Timestamp::parse(modified).unwrap());

        let created_only = object(Some(created), None, Some("2.1"));
        assert_eq!(created_only.version(request_time), Timestamp::parse(created).unwrap());

        let bare = object(None, None, None);
        assert_eq!(bare.version(request_time), request_time);
    }

    #[test]
    fn spec_version_treats_observables_as_21() {
        assert_eq!(object(None, None, None).spec_version(), "2.1");
        assert_eq!(object(None, None, Some("2.0")).spec_version(), "2.1");
        let dated = object(Some("2014-05-08T09:00:00.000Z"), None, None);
        assert_eq!(dated.spec_version(), "2.0");
        let explicit = object(Some("2014-05-08T09:00:00.000Z"), None, Some("2.1"));
        assert_eq!(explicit.spec_version(), "2.1");
    }

    #[test]
    fn media_type_acceptance_honors_version_parameters() {
        let mut collection = Collection {
            id: "91a7b528-80eb-42ed-a74d-c6fbd5a26116".into(),
            title: "writable".into(),
            description: None,
            can_read: true,
            can_write: true,
            media_types: vec!["application/stix+json;version=2.1".into()],
        };
        assert!(collection.accepts_media_type("application/stix+json;version=2.1"));
        assert!(!collection.accepts_media_type("application/stix+json;version=2.0"));

        collection.media_types = vec!["application/stix+json".into()];
        assert!(collection.accepts_media_type("application/stix+json;version=2.0"));

        collection.media_types.clear();
        assert!(collection.accepts_media_type("application/stix+json;version=2.0"));
    }

    #[test]
    fn type_prefix_splits_on_double_dash() {
        assert_eq!(type_prefix("indicator--abc"), "indicator");
        assert_eq!(type_prefix("no-separator"), "no-separator");
    }

    #[test]
    fn stix_object_serde_keeps_open_properties() {
        let raw = serde_json::json!({
            "type": "indicator",
            "spec_version": "2.1",
            "id": "indicator--68794cd5-28db-429d-ab1e-1256704ef906",
            "created": "2017-01-27T13:49:53.935Z",
            "modified": "2017-01-27T13:49:53.935Z",
            "name": "Poison Ivy Malware",
            "pattern": "[ file:hashes.'SHA-256' = 'aec7badf...' ]",
        });
        let object: StixObject = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(object.object_type, "indicator");
        assert_eq!(object.properties["name"], "Poison Ivy Malware");

        let back = serde_json::to_value(&object).unwrap();
        assert_eq!(back, raw);
    }
}
