//! Status records for asynchronous object addition.
//!
//! A record is created with every envelope member pending and is resolved
//! entry by entry. `pending` only ever shrinks, and once it reaches zero the
//! record flips to complete and stays there.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TaxiiError};
use crate::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum StatusState {
    Pending,
    Complete,
}

/// One envelope member inside a status record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StatusEntry {
    pub id: String,
    pub version: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The outcome of processing one pending entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Success { message: Option<String> },
    Failure { message: String },
}

/// Instruction to move one entry out of `pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResolution {
    pub id: String,
    pub version: Timestamp,
    pub outcome: EntryOutcome,
}

impl StatusResolution {
    pub fn success(id: impl Into<String>, version: Timestamp) -> Self {
        StatusResolution {
            id: id.into(),
            version,
            outcome: EntryOutcome::Success { message: None },
        }
    }

    pub fn success_with(id: impl Into<String>, version: Timestamp, message: impl Into<String>) -> Self {
        StatusResolution {
            id: id.into(),
            version,
            outcome: EntryOutcome::Success {
                message: Some(message.into()),
            },
        }
    }

    pub fn failure(id: impl Into<String>, version: Timestamp, message: impl Into<String>) -> Self {
        StatusResolution {
            id: id.into(),
            version,
            outcome: EntryOutcome::Failure {
                message: message.into(),
            },
        }
    }
}

/// A TAXII status resource tracking one add request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StatusRecord {
    pub id: String,
    pub status: StatusState,
    pub request_timestamp: Timestamp,
    pub total_count: u64,
    pub success_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub successes: Vec<StatusEntry>,
    pub failure_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<StatusEntry>,
    pub pending_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pendings: Vec<StatusEntry>,
}

impl StatusRecord {
    /// Fresh record for a just-accepted request. No entries yet.
    pub fn accepted(request_timestamp: Timestamp) -> Self {
        StatusRecord {
            id: Uuid::new_v4().to_string(),
            status: StatusState::Pending,
            request_timestamp,
            total_count: 0,
            success_count: 0,
            successes: Vec::new(),
            failure_count: 0,
            failures: Vec::new(),
            pending_count: 0,
            pendings: Vec::new(),
        }
    }

    /// Register one envelope member as pending.
    pub fn push_pending(&mut self, id: impl Into<String>, version: Timestamp) {
        self.pendings.push(StatusEntry {
            id: id.into(),
            version,
            message: None,
        });
        self.pending_count += 1;
        self.total_count += 1;
        self.status = StatusState::Pending;
    }

    /// Move the matching pending entry to successes or failures.
    ///
    /// Resolving an entry that is not pending, or resolving against an
    /// already-complete record, is a processing bug and is reported as such.
    pub fn resolve(&mut self, resolution: &StatusResolution) -> Result<()> {
        if self.status == StatusState::Complete {
            return Err(TaxiiError::Processing(format!(
                "status {} is already complete",
                self.id
            )));
        }
        let position = self
            .pendings
            .iter()
            .position(|entry| entry.id == resolution.id && entry.version == resolution.version)
            .ok_or_else(|| {
                TaxiiError::Processing(format!(
                    "no pending entry {} ({}) in status {}",
                    resolution.id,
                    resolution.version,
                    self.id
                ))
            })?;
        let mut entry = self.pendings.remove(position);
        self.pending_count -= 1;
        match &resolution.outcome {
            EntryOutcome::Success { message } => {
                entry.message = message.clone();
                self.successes.push(entry);
                self.success_count += 1;
            }
            EntryOutcome::Failure { message } => {
                entry.message = Some(message.clone());
                self.failures.push(entry);
                self.failure_count += 1;
            }
        }
        if self.pending_count == 0 {
            self.status = StatusState::Complete;
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.status == StatusState::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    fn record_with(entries: &[(&str, &str)]) -> StatusRecord {
        let mut record = StatusRecord::accepted(ts("2024-06-01T00:00:00.000Z"));
        for (id, version) in entries {
            record.push_pending(*id, ts(version));
        }
        record
    }

    #[test]
    fn counts_always_sum_to_total() {
        let mut record = record_with(&[
            ("indicator--a", "2020-01-01T00:00:00.000Z"),
            ("indicator--b", "2020-01-01T00:00:00.000Z"),
            ("indicator--c", "2020-01-01T00:00:00.000Z"),
        ]);
        assert_eq!(record.total_count, 3);
        assert_eq!(record.pending_count, 3);

        record
            .resolve(&StatusResolution::success(
                "indicator--a",
                ts("2020-01-01T00:00:00.000Z"),
            ))
            .unwrap();
        record
            .resolve(&StatusResolution::failure(
                "indicator--b",
                ts("2020-01-01T00:00:00.000Z"),
                "duplicate id collision",
            ))
            .unwrap();

        assert_eq!(
            record.success_count + record.failure_count + record.pending_count,
            record.total_count
        );
        assert_eq!(record.status, StatusState::Pending);
    }

    #[test]
    fn completes_when_the_last_entry_resolves_and_stays_complete() {
        let mut record = record_with(&[("indicator--a", "2020-01-01T00:00:00.000Z")]);
        record
            .resolve(&StatusResolution::success(
                "indicator--a",
                ts("2020-01-01T00:00:00.000Z"),
            ))
            .unwrap();
        assert!(record.is_complete());

        let err = record
            .resolve(&StatusResolution::success(
                "indicator--a",
                ts("2020-01-01T00:00:00.000Z"),
            ))
            .unwrap_err();
        assert!(matches!(err, TaxiiError::Processing(_)));
        assert!(record.is_complete());
    }

    #[test]
    fn rejects_resolutions_for_unknown_entries() {
        let mut record = record_with(&[
            ("indicator--a", "2020-01-01T00:00:00.000Z"),
            ("indicator--b", "2020-01-01T00:00:00.000Z"),
        ]);
        let err = record
            .resolve(&StatusResolution::success(
                "indicator--a",
                ts("2021-09-09T00:00:00.000Z"),
            ))
            .unwrap_err();
        assert!(matches!(err, TaxiiError::Processing(_)));
        assert_eq!(record.pending_count, 2);
    }

    #[test]
    fn failure_messages_land_on_the_failed_entry() {
        let mut record = record_with(&[("indicator--a", "2020-01-01T00:00:00.000Z")]);
        record
            .resolve(&StatusResolution::failure(
                "indicator--a",
                ts("2020-01-01T00:00:00.000Z"),
                "Malformed object id: indicator--a",
            ))
            .unwrap();
        assert_eq!(
            record.failures[0].message.as_deref(),
            Some("Malformed object id: indicator--a")
        );
    }

    #[test]
    fn serializes_with_lowercase_state_and_no_empty_entry_lists() {
        let mut record = record_with(&[("indicator--a", "2020-01-01T00:00:00.000Z")]);
        record
            .resolve(&StatusResolution::success_with(
                "indicator--a",
                ts("2020-01-01T00:00:00.000Z"),
                "object already added",
            ))
            .unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "complete");
        assert_eq!(json["total_count"], 1);
        assert!(json.get("pendings").is_none());
        assert!(json.get("failures").is_none());
        assert_eq!(json["successes"][0]["message"], "object already added");
    }
}
