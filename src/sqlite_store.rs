//! SQLite [`ObjectStore`] backend.
//!
//! Jobs and objects are stored whole; timestamps as Unix epoch seconds,
//! per-object errors as a JSON array. Chain-head ordering relies on rowid,
//! which follows insertion order.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::models::{
    HarvestJob, HarvestObject, JobOutcome, JobStatus, ObjectError, ObjectState, RecordOutcome,
};
use crate::store::ObjectStore;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn ts(value: Option<DateTime<Utc>>) -> Option<i64> {
    value.map(|dt| dt.timestamp())
}

fn from_ts(value: Option<i64>) -> Option<DateTime<Utc>> {
    value.and_then(|secs| DateTime::from_timestamp(secs, 0))
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<HarvestJob> {
    let status: String = row.get("status");
    let outcome: Option<String> = row.get("outcome");
    Ok(HarvestJob {
        id: row.get("id"),
        source_id: row.get("source_id"),
        status: JobStatus::parse(&status)
            .with_context(|| format!("unknown job status: {}", status))?,
        created_at: from_ts(Some(row.get("created_at")))
            .context("invalid created_at timestamp")?,
        started_at: from_ts(row.get("started_at")),
        finished_at: from_ts(row.get("finished_at")),
        outcome: outcome.as_deref().and_then(JobOutcome::parse),
        error: row.get("error"),
    })
}

fn object_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<HarvestObject> {
    let state: String = row.get("state");
    let outcome: Option<String> = row.get("outcome");
    let errors_json: String = row.get("errors_json");
    let errors: Vec<ObjectError> =
        serde_json::from_str(&errors_json).context("invalid errors_json")?;
    Ok(HarvestObject {
        id: row.get("id"),
        job_id: row.get("job_id"),
        source_id: row.get("source_id"),
        guid: row.get("guid"),
        state: ObjectState::parse(&state)
            .with_context(|| format!("unknown object state: {}", state))?,
        payload: row.get("payload"),
        fetched_at: from_ts(row.get("fetched_at")),
        outcome: outcome.as_deref().and_then(RecordOutcome::parse),
        errors,
        predecessor_id: row.get("predecessor_id"),
    })
}

#[async_trait]
impl ObjectStore for SqliteStore {
    async fn create_job(&self, job: &HarvestJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO harvest_jobs (id, source_id, status, created_at, started_at, finished_at, outcome, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.source_id)
        .bind(job.status.as_str())
        .bind(job.created_at.timestamp())
        .bind(ts(job.started_at))
        .bind(ts(job.finished_at))
        .bind(job.outcome.map(|o| o.as_str()))
        .bind(&job.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_job(&self, job: &HarvestJob) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE harvest_jobs
            SET status = ?, started_at = ?, finished_at = ?, outcome = ?, error = ?
            WHERE id = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(ts(job.started_at))
        .bind(ts(job.finished_at))
        .bind(job.outcome.map(|o| o.as_str()))
        .bind(&job.error)
        .bind(&job.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_object(&self, object: &HarvestObject) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO harvest_objects
                (id, job_id, source_id, guid, state, payload, fetched_at, outcome, errors_json, predecessor_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&object.id)
        .bind(&object.job_id)
        .bind(&object.source_id)
        .bind(&object.guid)
        .bind(object.state.as_str())
        .bind(&object.payload)
        .bind(ts(object.fetched_at))
        .bind(object.outcome.map(|o| o.as_str()))
        .bind(serde_json::to_string(&object.errors)?)
        .bind(&object.predecessor_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_object(&self, object: &HarvestObject) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE harvest_objects
            SET state = ?, payload = ?, fetched_at = ?, outcome = ?, errors_json = ?
            WHERE id = ?
            "#,
        )
        .bind(object.state.as_str())
        .bind(&object.payload)
        .bind(ts(object.fetched_at))
        .bind(object.outcome.map(|o| o.as_str()))
        .bind(serde_json::to_string(&object.errors)?)
        .bind(&object.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn objects_for_job(&self, job_id: &str) -> Result<Vec<HarvestObject>> {
        let rows = sqlx::query("SELECT * FROM harvest_objects WHERE job_id = ? ORDER BY rowid")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(object_from_row).collect()
    }

    async fn chain_head(&self, source_id: &str, guid: &str) -> Result<Option<HarvestObject>> {
        let row = sqlx::query(
            "SELECT * FROM harvest_objects WHERE source_id = ? AND guid = ? ORDER BY rowid DESC LIMIT 1",
        )
        .bind(source_id)
        .bind(guid)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(object_from_row).transpose()
    }

    async fn latest_finished_job(
        &self,
        source_id: &str,
        excluding_job_id: &str,
    ) -> Result<Option<HarvestJob>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM harvest_jobs
            WHERE source_id = ? AND id != ? AND status = 'finished'
                AND (outcome IS NULL OR outcome != 'cancelled')
            ORDER BY finished_at DESC LIMIT 1
            "#,
        )
        .bind(source_id)
        .bind(excluding_job_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SkipReason;
    use chrono::TimeZone;

    async fn test_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::connect(&dir.path().join("harvest.sqlite"))
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        (dir, SqliteStore::new(pool))
    }

    #[tokio::test]
    async fn job_round_trip() {
        let (_dir, store) = test_store().await;
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let mut job = HarvestJob::new("src", now);
        store.create_job(&job).await.unwrap();

        job.status = JobStatus::Finished;
        job.started_at = Some(now);
        job.finished_at = Some(now);
        job.outcome = Some(JobOutcome::FinishedClean);
        store.update_job(&job).await.unwrap();

        let latest = store
            .latest_finished_job("src", "other-job")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, job.id);
        assert_eq!(latest.status, JobStatus::Finished);
        assert_eq!(latest.outcome, Some(JobOutcome::FinishedClean));
    }

    #[tokio::test]
    async fn object_round_trip_keeps_errors() {
        let (_dir, store) = test_store().await;
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let mut obj = HarvestObject::gathered("job-1", "src", "g1", None);
        store.insert_object(&obj).await.unwrap();

        obj.state = ObjectState::Fetched;
        obj.payload = Some(r#"{"title": "x"}"#.to_string());
        obj.fetched_at = Some(now);
        store.update_object(&obj).await.unwrap();

        obj.record_error("transient_fetch", "HTTP 500".to_string(), now);
        store.update_object(&obj).await.unwrap();

        let stored = store.objects_for_job("job-1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].state, ObjectState::Errored);
        assert_eq!(stored[0].errors.len(), 1);
        assert_eq!(stored[0].errors[0].message, "HTTP 500");
        assert_eq!(stored[0].payload.as_deref(), Some(r#"{"title": "x"}"#));
    }

    #[tokio::test]
    async fn chain_head_follows_insertion_order() {
        let (_dir, store) = test_store().await;

        let first = HarvestObject::gathered("job-1", "src", "g1", None);
        store.insert_object(&first).await.unwrap();

        let mut second = HarvestObject::gathered("job-2", "src", "g1", Some(first.id.clone()));
        second.outcome = Some(RecordOutcome::Skipped(SkipReason::Unchanged));
        store.insert_object(&second).await.unwrap();

        let head = store.chain_head("src", "g1").await.unwrap().unwrap();
        assert_eq!(head.id, second.id);
        assert_eq!(head.predecessor_id.as_deref(), Some(first.id.as_str()));
        assert_eq!(
            head.outcome,
            Some(RecordOutcome::Skipped(SkipReason::Unchanged))
        );

        assert!(store.chain_head("src", "missing").await.unwrap().is_none());
    }
}
