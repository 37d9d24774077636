//! Canonical timestamp representation.
//!
//! Version ordering, `added_after` bounds, and (id, version) uniqueness all
//! compare timestamps, so the crate stores exactly one representation: UTC
//! with millisecond precision. Values are truncated at every construction
//! site and rendered as RFC 3339 with three fractional digits and a `Z`
//! suffix, e.g. `2024-11-05T08:17:31.245Z`.

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid timestamp {value:?}: expected an RFC 3339 instant")]
pub struct TimestampParseError {
    pub value: String,
}

/// A UTC instant with millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current time, truncated to the canonical precision.
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// Parse an RFC 3339 instant. Fractional digits beyond milliseconds are
    /// truncated; offsets other than `Z` are normalized to UTC.
    pub fn parse(value: &str) -> Result<Self, TimestampParseError> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| Self::from(dt.with_timezone(&Utc)))
            .map_err(|_| TimestampParseError {
                value: value.to_owned(),
            })
    }

    /// The wire form: RFC 3339 with exactly three fractional digits.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

fn truncate_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    let sub_millis = i64::from(dt.timestamp_subsec_nanos() % 1_000_000);
    dt - Duration::nanoseconds(sub_millis)
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Timestamp(truncate_millis(dt))
    }
}

impl From<SystemTime> for Timestamp {
    fn from(st: SystemTime) -> Self {
        Self::from(DateTime::<Utc>::from(st))
    }
}

impl FromStr for Timestamp {
    type Err = TimestampParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(feature = "openapi")]
impl utoipa::PartialSchema for Timestamp {
    fn schema() -> utoipa::openapi::RefOr<utoipa::openapi::schema::Schema> {
        use utoipa::openapi::schema::{ObjectBuilder, Type};
        use utoipa::openapi::{KnownFormat, SchemaFormat};

        ObjectBuilder::new()
            .schema_type(Type::String)
            .format(Some(SchemaFormat::KnownFormat(KnownFormat::DateTime)))
            .into()
    }
}

#[cfg(feature = "openapi")]
impl utoipa::ToSchema for Timestamp {}
