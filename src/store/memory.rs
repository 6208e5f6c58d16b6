//! In-memory [`ObjectStore`] implementation for tests and dry runs.
//!
//! Uses `Vec` and `HashMap` behind `std::sync::RwLock`. Insertion order
//! stands in for the rowid ordering of the SQLite backend.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{HarvestJob, HarvestObject, JobStatus};

use super::ObjectStore;

/// In-memory store. Each job and object is kept whole; updates replace the
/// stored copy by id.
#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<String, HarvestJob>>,
    objects: RwLock<Vec<HarvestObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create_job(&self, job: &HarvestJob) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &HarvestJob) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn insert_object(&self, object: &HarvestObject) -> Result<()> {
        let mut objects = self.objects.write().unwrap();
        objects.push(object.clone());
        Ok(())
    }

    async fn update_object(&self, object: &HarvestObject) -> Result<()> {
        let mut objects = self.objects.write().unwrap();
        match objects.iter_mut().find(|o| o.id == object.id) {
            Some(stored) => {
                *stored = object.clone();
                Ok(())
            }
            None => anyhow::bail!("unknown harvest object: {}", object.id),
        }
    }

    async fn objects_for_job(&self, job_id: &str) -> Result<Vec<HarvestObject>> {
        let objects = self.objects.read().unwrap();
        Ok(objects
            .iter()
            .filter(|o| o.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn chain_head(&self, source_id: &str, guid: &str) -> Result<Option<HarvestObject>> {
        let objects = self.objects.read().unwrap();
        Ok(objects
            .iter()
            .rev()
            .find(|o| o.source_id == source_id && o.guid == guid)
            .cloned())
    }

    async fn latest_finished_job(
        &self,
        source_id: &str,
        excluding_job_id: &str,
    ) -> Result<Option<HarvestJob>> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs
            .values()
            .filter(|j| {
                j.source_id == source_id
                    && j.id != excluding_job_id
                    && j.status == JobStatus::Finished
                    && j.outcome != Some(crate::models::JobOutcome::Cancelled)
            })
            .max_by_key(|j| j.finished_at)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobOutcome, ObjectState};
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn object_updates_replace_by_id() {
        let store = MemoryStore::new();
        let mut obj = HarvestObject::gathered("job-1", "src", "g1", None);
        store.insert_object(&obj).await.unwrap();

        obj.state = ObjectState::Fetched;
        obj.payload = Some("{}".to_string());
        store.update_object(&obj).await.unwrap();

        let stored = store.objects_for_job("job-1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].state, ObjectState::Fetched);
        assert_eq!(stored[0].payload.as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn chain_head_returns_most_recent() {
        let store = MemoryStore::new();
        let first = HarvestObject::gathered("job-1", "src", "g1", None);
        store.insert_object(&first).await.unwrap();
        let second = HarvestObject::gathered("job-2", "src", "g1", Some(first.id.clone()));
        store.insert_object(&second).await.unwrap();

        let head = store.chain_head("src", "g1").await.unwrap().unwrap();
        assert_eq!(head.id, second.id);
        assert_eq!(head.predecessor_id.as_deref(), Some(first.id.as_str()));
    }

    #[tokio::test]
    async fn latest_finished_job_skips_running_and_current() {
        let store = MemoryStore::new();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let mut old = HarvestJob::new("src", t0);
        old.status = JobStatus::Finished;
        old.outcome = Some(JobOutcome::FinishedClean);
        old.finished_at = Some(t0);
        store.create_job(&old).await.unwrap();

        let mut newer = HarvestJob::new("src", t0);
        newer.status = JobStatus::Finished;
        newer.outcome = Some(JobOutcome::FinishedWithErrors);
        newer.finished_at = Some(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
        store.create_job(&newer).await.unwrap();

        let running = HarvestJob::new("src", t0);
        store.create_job(&running).await.unwrap();

        let latest = store
            .latest_finished_job("src", &running.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, newer.id);

        // The current job never counts as its own predecessor.
        let excluding_newer = store
            .latest_finished_job("src", &newer.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(excluding_newer.id, old.id);
    }
}
