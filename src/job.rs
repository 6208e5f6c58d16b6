//! Harvest job orchestration.
//!
//! Coordinates the three sequential stages: gather (list the source and
//! create one harvest object per GUID), fetch (attach raw payloads), and
//! import (map, reconcile, write to the target catalog). Stages never
//! overlap; within fetch and import, per-record work runs on a bounded
//! worker pool and each worker writes only its own object.
//!
//! Per-record failures never abort the job. Job-level failure is reserved
//! for fatal configuration errors at listing time and for store failures
//! that make continuing meaningless. Cancellation is checked before each
//! stage; a cancelled job keeps everything already completed.

use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::HarvestError;
use crate::mapper::{self, MappingProfile};
use crate::models::{
    HarvestJob, HarvestObject, JobOutcome, JobStatus, JobSummary, ObjectState, RecordOutcome,
    SkipReason,
};
use crate::reconcile::{self, Action};
use crate::retry::RetryPolicy;
use crate::source::SourceCatalog;
use crate::store::ObjectStore;
use crate::target::TargetCatalog;

/// Outcome of one harvest run: the finished job row plus outcome counts.
#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub job: HarvestJob,
    pub summary: JobSummary,
}

/// Runs harvest jobs for one configured source.
///
/// Generic over the source, target, and store so tests can substitute
/// in-process implementations for the HTTP clients and SQLite backend.
pub struct HarvestRunner<S, T, O>
where
    S: SourceCatalog,
    T: TargetCatalog,
    O: ObjectStore,
{
    source_id: String,
    source: S,
    target: T,
    store: O,
    profile: MappingProfile,
    retry: RetryPolicy,
    concurrency: usize,
}

impl<S, T, O> HarvestRunner<S, T, O>
where
    S: SourceCatalog,
    T: TargetCatalog,
    O: ObjectStore,
{
    pub fn new(
        source_id: &str,
        source: S,
        target: T,
        store: O,
        profile: MappingProfile,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            source_id: source_id.to_string(),
            source,
            target,
            store,
            profile,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    /// Execute one full job: gather → fetch → import → finish.
    pub async fn run(&self, cancel: CancellationToken) -> Result<HarvestReport> {
        let mut job = HarvestJob::new(&self.source_id, Utc::now());
        self.store.create_job(&job).await?;

        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        self.store.update_job(&job).await?;

        if cancel.is_cancelled() {
            return self.finish(job, JobOutcome::Cancelled).await;
        }

        // ── Gathering ────────────────────────────────────────────────────
        let guids = match self
            .retry
            .run(|| self.source.list(), HarvestError::is_retryable)
            .await
        {
            Ok(guids) => guids,
            Err(e) => {
                tracing::error!(source = %self.source_id, error = %e, "listing failed, aborting job");
                job.error = Some(e.to_string());
                return self.finish(job, JobOutcome::Errored).await;
            }
        };
        tracing::info!(source = %self.source_id, count = guids.len(), "gathered guids");

        let mut objects = Vec::with_capacity(guids.len());
        for guid in &guids {
            let predecessor = self
                .store
                .chain_head(&self.source_id, guid)
                .await?
                .map(|head| head.id);
            let object = HarvestObject::gathered(&job.id, &self.source_id, guid, predecessor);
            self.store.insert_object(&object).await?;
            objects.push(object);
        }

        if cancel.is_cancelled() {
            return self.finish(job, JobOutcome::Cancelled).await;
        }

        // ── Fetching ─────────────────────────────────────────────────────
        let results: Vec<Result<HarvestObject>> = stream::iter(objects)
            .map(|mut object| async move {
                match self
                    .retry
                    .run(|| self.source.fetch(&object.guid), HarvestError::is_retryable)
                    .await
                {
                    Ok(payload) => {
                        object.payload = Some(payload);
                        object.fetched_at = Some(Utc::now());
                        object.state = ObjectState::Fetched;
                    }
                    Err(e) => {
                        tracing::warn!(guid = %object.guid, error = %e, "fetch failed");
                        object.record_error(e.kind(), e.to_string(), Utc::now());
                    }
                }
                self.store.update_object(&object).await?;
                Ok(object)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut objects = Vec::with_capacity(results.len());
        for result in results {
            objects.push(result?);
        }

        if cancel.is_cancelled() {
            return self.finish(job, JobOutcome::Cancelled).await;
        }

        // ── Importing ────────────────────────────────────────────────────
        // Duplicate listings are resolved by fetch timestamp before any
        // per-record work is scheduled.
        let superseded = reconcile::supersede_duplicates(&mut objects);
        for object in objects.iter().filter(|o| superseded.contains(&o.id)) {
            self.store.update_object(object).await?;
        }

        let results: Vec<Result<()>> = stream::iter(
            objects
                .into_iter()
                .filter(|o| o.state == ObjectState::Fetched),
        )
        .map(|object| self.import_object(object))
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        for result in results {
            result?;
        }

        // ── Finishing ────────────────────────────────────────────────────
        let flagged = self.flag_missing_guids(&job, &guids).await?;

        let mut summary = self.summarize(&job.id).await?;
        summary.flagged_missing = flagged;
        let outcome = if summary.errored > 0 {
            JobOutcome::FinishedWithErrors
        } else {
            JobOutcome::FinishedClean
        };
        job.status = JobStatus::Finished;
        job.outcome = Some(outcome);
        job.finished_at = Some(Utc::now());
        self.store.update_job(&job).await?;

        tracing::info!(
            source = %self.source_id,
            job = %job.id,
            outcome = outcome.as_str(),
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            errored = summary.errored,
            flagged_missing = summary.flagged_missing,
            "job finished"
        );

        Ok(HarvestReport { job, summary })
    }

    /// Map, reconcile, and write one fetched object.
    async fn import_object(&self, mut object: HarvestObject) -> Result<()> {
        let payload = object.payload.clone().unwrap_or_default();

        let record = match mapper::map(&object.guid, &payload, &self.profile, Utc::now()) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(guid = %object.guid, error = %e, "mapping failed");
                object.record_error(e.kind(), e.to_string(), Utc::now());
                return self.store.update_object(&object).await;
            }
        };

        let existing = match self
            .retry
            .run(|| self.target.find_by_guid(&object.guid), HarvestError::is_retryable)
            .await
        {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!(guid = %object.guid, error = %e, "target lookup failed");
                object.record_error(e.kind(), e.to_string(), Utc::now());
                return self.store.update_object(&object).await;
            }
        };

        let action = match reconcile::reconcile(&record, &existing) {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!(guid = %object.guid, error = %e, "reconciliation failed");
                object.record_error(e.kind(), e.to_string(), Utc::now());
                return self.store.update_object(&object).await;
            }
        };

        let fingerprint = record.fingerprint();
        let applied: Result<RecordOutcome, HarvestError> = match &action {
            Action::Create => self
                .retry
                .run(
                    || self.target.create(&record, &fingerprint),
                    HarvestError::is_retryable,
                )
                .await
                .map(|_| RecordOutcome::Created),
            Action::Update { dataset_id } => self
                .retry
                .run(
                    || self.target.update(dataset_id, &record, &fingerprint),
                    HarvestError::is_retryable,
                )
                .await
                .map(|_| RecordOutcome::Updated),
            Action::Withdraw { dataset_id } => self
                .retry
                .run(
                    || self.target.flag_missing(dataset_id),
                    HarvestError::is_retryable,
                )
                .await
                .map(|_| RecordOutcome::Skipped(SkipReason::Withdrawn)),
            Action::Skip { reason } => Ok(RecordOutcome::Skipped(*reason)),
        };

        match applied {
            Ok(outcome) => {
                object.state = ObjectState::Imported;
                object.outcome = Some(outcome);
            }
            Err(e) => {
                tracing::warn!(guid = %object.guid, error = %e, "target write failed");
                object.record_error(e.kind(), e.to_string(), Utc::now());
            }
        }
        self.store.update_object(&object).await
    }

    /// Flag target datasets whose GUIDs were imported by the previous
    /// successful job but are absent from this gather list. Marking is
    /// advisory; failures are logged and do not fail the job.
    async fn flag_missing_guids(&self, job: &HarvestJob, current: &[String]) -> Result<usize> {
        let Some(previous) = self
            .store
            .latest_finished_job(&self.source_id, &job.id)
            .await?
        else {
            return Ok(0);
        };

        let current: HashSet<&str> = current.iter().map(String::as_str).collect();
        let previous_objects = self.store.objects_for_job(&previous.id).await?;

        let mut flagged = 0usize;
        for object in previous_objects
            .iter()
            .filter(|o| o.state == ObjectState::Imported && !current.contains(o.guid.as_str()))
        {
            match self.target.find_by_guid(&object.guid).await {
                Ok(datasets) => {
                    for dataset in datasets {
                        match self.target.flag_missing(&dataset.id).await {
                            Ok(()) => flagged += 1,
                            Err(e) => {
                                tracing::warn!(guid = %object.guid, error = %e, "flag-missing failed")
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(guid = %object.guid, error = %e, "lookup for flag-missing failed")
                }
            }
        }

        if flagged > 0 {
            tracing::info!(count = flagged, "flagged datasets missing from listing");
        }
        Ok(flagged)
    }

    /// Build the job summary from the retained objects.
    async fn summarize(&self, job_id: &str) -> Result<JobSummary> {
        let mut summary = JobSummary::default();
        for object in self.store.objects_for_job(job_id).await? {
            match object.state {
                ObjectState::Errored => summary.errored += 1,
                ObjectState::Imported => {
                    if let Some(outcome) = object.outcome {
                        summary.record(outcome);
                    }
                }
                ObjectState::Gathered | ObjectState::Fetched => {}
            }
        }
        Ok(summary)
    }

    async fn finish(&self, mut job: HarvestJob, outcome: JobOutcome) -> Result<HarvestReport> {
        job.status = match outcome {
            JobOutcome::Errored => JobStatus::Errored,
            _ => JobStatus::Finished,
        };
        job.outcome = Some(outcome);
        job.finished_at = Some(Utc::now());
        self.store.update_job(&job).await?;
        let summary = self.summarize(&job.id).await?;
        Ok(HarvestReport { job, summary })
    }
}
