use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Create jobs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS harvest_jobs (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            finished_at INTEGER,
            outcome TEXT,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create objects table. Objects are never deleted; superseded objects
    // for the same guid link to their predecessor through predecessor_id.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS harvest_objects (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            guid TEXT NOT NULL,
            state TEXT NOT NULL,
            payload TEXT,
            fetched_at INTEGER,
            outcome TEXT,
            errors_json TEXT NOT NULL DEFAULT '[]',
            predecessor_id TEXT,
            FOREIGN KEY (job_id) REFERENCES harvest_jobs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_objects_job_id ON harvest_objects(job_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_objects_source_guid ON harvest_objects(source_id, guid)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jobs_source_finished ON harvest_jobs(source_id, finished_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
