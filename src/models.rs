//! Core data models used throughout the harvest pipeline.
//!
//! These types represent the jobs, per-record harvest objects, and mapped
//! records that flow through the gather → fetch → import stages.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a harvest job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    New,
    Running,
    Finished,
    Errored,
}

impl JobStatus {
    /// String form used for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Errored => "errored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(JobStatus::New),
            "running" => Some(JobStatus::Running),
            "finished" => Some(JobStatus::Finished),
            "errored" => Some(JobStatus::Errored),
            _ => None,
        }
    }
}

/// Final outcome of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    FinishedClean,
    FinishedWithErrors,
    Errored,
    Cancelled,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::FinishedClean => "finished",
            JobOutcome::FinishedWithErrors => "finished_with_errors",
            JobOutcome::Errored => "errored",
            JobOutcome::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "finished" => Some(JobOutcome::FinishedClean),
            "finished_with_errors" => Some(JobOutcome::FinishedWithErrors),
            "errored" => Some(JobOutcome::Errored),
            "cancelled" => Some(JobOutcome::Cancelled),
            _ => None,
        }
    }
}

/// One execution attempt against a configured source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestJob {
    pub id: String,
    pub source_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<JobOutcome>,
    /// Job-level error, set only when the whole job aborts.
    pub error: Option<String>,
}

impl HarvestJob {
    pub fn new(source_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            status: JobStatus::New,
            created_at: now,
            started_at: None,
            finished_at: None,
            outcome: None,
            error: None,
        }
    }
}

/// Per-record stage status within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectState {
    Gathered,
    Fetched,
    Imported,
    Errored,
}

impl ObjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectState::Gathered => "gathered",
            ObjectState::Fetched => "fetched",
            ObjectState::Imported => "imported",
            ObjectState::Errored => "errored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gathered" => Some(ObjectState::Gathered),
            "fetched" => Some(ObjectState::Fetched),
            "imported" => Some(ObjectState::Imported),
            "errored" => Some(ObjectState::Errored),
            _ => None,
        }
    }
}

/// Why an object was skipped at import time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Target already holds an identical fingerprint.
    Unchanged,
    /// A later fetch of the same GUID within this job won the tie-break.
    Superseded,
    /// The record carried an explicit withdrawal signal.
    Withdrawn,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Unchanged => "unchanged",
            SkipReason::Superseded => "superseded",
            SkipReason::Withdrawn => "withdrawn",
        }
    }
}

/// What happened to a record that completed the import stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordOutcome {
    Created,
    Updated,
    Skipped(SkipReason),
}

impl RecordOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordOutcome::Created => "created",
            RecordOutcome::Updated => "updated",
            RecordOutcome::Skipped(SkipReason::Unchanged) => "skipped:unchanged",
            RecordOutcome::Skipped(SkipReason::Superseded) => "skipped:superseded",
            RecordOutcome::Skipped(SkipReason::Withdrawn) => "skipped:withdrawn",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(RecordOutcome::Created),
            "updated" => Some(RecordOutcome::Updated),
            "skipped:unchanged" => Some(RecordOutcome::Skipped(SkipReason::Unchanged)),
            "skipped:superseded" => Some(RecordOutcome::Skipped(SkipReason::Superseded)),
            "skipped:withdrawn" => Some(RecordOutcome::Skipped(SkipReason::Withdrawn)),
            _ => None,
        }
    }
}

/// An error retained on a harvest object. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectError {
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// One candidate record within a job.
///
/// Created during gather, mutated during fetch and import, never deleted.
/// Objects for the same GUID across jobs form a version chain through
/// `predecessor_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestObject {
    pub id: String,
    pub job_id: String,
    pub source_id: String,
    /// Source-assigned identifier; immutable reconciliation key.
    pub guid: String,
    pub state: ObjectState,
    /// Raw metadata blob attached during the fetch stage.
    pub payload: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub outcome: Option<RecordOutcome>,
    pub errors: Vec<ObjectError>,
    /// Previous chain head for this GUID, if any.
    pub predecessor_id: Option<String>,
}

impl HarvestObject {
    pub fn gathered(
        job_id: &str,
        source_id: &str,
        guid: &str,
        predecessor_id: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            source_id: source_id.to_string(),
            guid: guid.to_string(),
            state: ObjectState::Gathered,
            payload: None,
            fetched_at: None,
            outcome: None,
            errors: Vec::new(),
            predecessor_id,
        }
    }

    /// Record an error and move the object to the Errored state.
    pub fn record_error(&mut self, kind: &str, message: String, at: DateTime<Utc>) {
        self.errors.push(ObjectError {
            kind: kind.to_string(),
            message,
            at,
        });
        self.state = ObjectState::Errored;
    }
}

/// A resource (distribution) attached to a mapped record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedResource {
    pub name: String,
    pub url: String,
    pub format: Option<String>,
}

/// A fully validated Data.Vic representation of a source record.
///
/// Immutable once produced. Field order in the canonical serialization is
/// fixed (explicit key order plus BTreeMap extras) so the fingerprint is
/// stable across processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedRecord {
    pub guid: String,
    pub title: String,
    pub notes: String,
    /// First sentence of the plain-text notes.
    pub extract: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub full_metadata_url: Option<String>,
    pub license_id: Option<String>,
    pub date_created_data_asset: Option<String>,
    pub date_modified_data_asset: Option<String>,
    pub resources: Vec<MappedResource>,
    /// Data.Vic extras (update_frequency, access, protective_marking, ...).
    pub extras: BTreeMap<String, String>,
    /// Explicit withdrawal signal from the source.
    pub withdrawn: bool,
    /// When this record was mapped (injected, not read from the clock).
    pub mapped_at: DateTime<Utc>,
}

impl MappedRecord {
    /// Canonical JSON serialization used for fingerprinting.
    ///
    /// Excludes `mapped_at` so that re-mapping an unchanged payload at a
    /// later time still produces the same fingerprint.
    pub fn canonical_json(&self) -> String {
        let value = serde_json::json!({
            "guid": self.guid,
            "title": self.title,
            "notes": self.notes,
            "extract": self.extract,
            "category": self.category,
            "tags": self.tags,
            "full_metadata_url": self.full_metadata_url,
            "license_id": self.license_id,
            "date_created_data_asset": self.date_created_data_asset,
            "date_modified_data_asset": self.date_modified_data_asset,
            "resources": self.resources,
            "extras": self.extras,
            "withdrawn": self.withdrawn,
        });
        value.to_string()
    }

    /// Content fingerprint: hex SHA-256 of the canonical serialization.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Per-job summary of record outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errored: usize,
    /// GUIDs from the previous successful job missing from this one,
    /// flagged for operator review.
    pub flagged_missing: usize,
}

impl JobSummary {
    pub fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Created => self.created += 1,
            RecordOutcome::Updated => self.updated += 1,
            RecordOutcome::Skipped(_) => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.skipped + self.errored
    }
}

/// The target catalog's view of a dataset, as returned by lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetDataset {
    /// Target-assigned stable identifier.
    pub id: String,
    /// Cross-reference to the source GUID.
    pub guid: String,
    /// Fingerprint recorded at the last create/update, if known.
    pub fingerprint: Option<String>,
}
