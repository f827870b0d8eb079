//! Job read operations: list and get.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::super::db::ResumeDb;
use super::super::types::{JobDetails, JobId, JobState, JobSummary, NewJob};

fn details_from_row(row: &SqliteRow) -> Result<JobDetails> {
    let id: i64 = row.get("id");
    let job_json: String = row.get("job_json");
    let job: NewJob =
        serde_json::from_str(&job_json).with_context(|| format!("job {} has a corrupt row", id))?;
    let state_str: String = row.get("state");
    Ok(JobDetails {
        id,
        job,
        state: JobState::from_str(&state_str),
        bytes_completed: row.get("bytes_completed"),
        total_size: row.get("total_size"),
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl ResumeDb {
    /// List all jobs in the database, oldest first.
    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, url, dest_path, state, priority, start_at,
                   bytes_completed, total_size, error
            FROM jobs
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let state_str: String = row.get("state");
            out.push(JobSummary {
                id: row.get("id"),
                url: row.get("url"),
                dest_path: row.get("dest_path"),
                state: JobState::from_str(&state_str),
                priority: row.get("priority"),
                start_at: row.get("start_at"),
                bytes_completed: row.get("bytes_completed"),
                total_size: row.get("total_size"),
                error: row.get("error"),
            });
        }

        Ok(out)
    }

    /// Fetch a single job row.
    pub async fn get_job(&self, id: JobId) -> Result<Option<JobDetails>> {
        let row = sqlx::query(
            r#"
            SELECT id, job_json, state, bytes_completed, total_size, error,
                   created_at, updated_at
            FROM jobs
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(details_from_row).transpose()
    }

    /// Jobs in `state`, in submission order.
    pub async fn jobs_in_state(&self, state: JobState) -> Result<Vec<JobDetails>> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_json, state, bytes_completed, total_size, error,
                   created_at, updated_at
            FROM jobs
            WHERE state = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(details_from_row).collect()
    }
}
