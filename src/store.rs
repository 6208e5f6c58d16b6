//! Storage abstraction for harvest state.
//!
//! The [`ObjectStore`] trait defines all persistence the job runner needs,
//! enabling pluggable backends (SQLite, in-memory). Objects are append-only:
//! they are inserted at gather time and mutated in place through the fetch
//! and import stages, but never deleted, so every job leaves a full audit
//! trail.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{HarvestJob, HarvestObject};

/// Abstract storage backend for jobs and harvest objects.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_job`](ObjectStore::create_job) | Persist a new job |
/// | [`update_job`](ObjectStore::update_job) | Persist a job's status transition |
/// | [`insert_object`](ObjectStore::insert_object) | Persist a gathered object |
/// | [`update_object`](ObjectStore::update_object) | Persist a per-object state change |
/// | [`objects_for_job`](ObjectStore::objects_for_job) | All objects of one job |
/// | [`chain_head`](ObjectStore::chain_head) | Most recent object for a GUID |
/// | [`latest_finished_job`](ObjectStore::latest_finished_job) | Previous successful job |
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn create_job(&self, job: &HarvestJob) -> Result<()>;

    async fn update_job(&self, job: &HarvestJob) -> Result<()>;

    async fn insert_object(&self, object: &HarvestObject) -> Result<()>;

    async fn update_object(&self, object: &HarvestObject) -> Result<()>;

    async fn objects_for_job(&self, job_id: &str) -> Result<Vec<HarvestObject>>;

    /// The most recently created object for `(source, guid)`: the head of
    /// the GUID's version chain, used to link successor objects.
    async fn chain_head(&self, source_id: &str, guid: &str) -> Result<Option<HarvestObject>>;

    /// The most recent job for `source_id` that reached a Finished status,
    /// excluding `excluding_job_id` (the running job).
    async fn latest_finished_job(
        &self,
        source_id: &str,
        excluding_job_id: &str,
    ) -> Result<Option<HarvestJob>>;
}

#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<T> {
    async fn create_job(&self, job: &HarvestJob) -> Result<()> {
        (**self).create_job(job).await
    }

    async fn update_job(&self, job: &HarvestJob) -> Result<()> {
        (**self).update_job(job).await
    }

    async fn insert_object(&self, object: &HarvestObject) -> Result<()> {
        (**self).insert_object(object).await
    }

    async fn update_object(&self, object: &HarvestObject) -> Result<()> {
        (**self).update_object(object).await
    }

    async fn objects_for_job(&self, job_id: &str) -> Result<Vec<HarvestObject>> {
        (**self).objects_for_job(job_id).await
    }

    async fn chain_head(&self, source_id: &str, guid: &str) -> Result<Option<HarvestObject>> {
        (**self).chain_head(source_id, guid).await
    }

    async fn latest_finished_job(
        &self,
        source_id: &str,
        excluding_job_id: &str,
    ) -> Result<Option<HarvestJob>> {
        (**self).latest_finished_job(source_id, excluding_job_id).await
    }
}
