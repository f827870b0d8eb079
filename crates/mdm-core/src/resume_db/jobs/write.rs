//! Job write operations: add, update, state, remove.

use anyhow::Result;

use super::super::db::{unix_timestamp, ResumeDb};
use super::super::types::{JobId, JobState, NewJob};

impl ResumeDb {
    /// Insert a new queued job.
    pub async fn add_job(&self, job: &NewJob) -> Result<JobId> {
        let now = unix_timestamp();
        let job_json = serde_json::to_string(job)?;

        let row_id = sqlx::query(
            r#"
            INSERT INTO jobs (
                url, dest_path, job_json, priority, start_at,
                state, bytes_completed, total_size, error,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, NULL, ?8, ?9)
            "#,
        )
        .bind(job.resource.primary_url())
        .bind(job.resource.dest_path.to_string_lossy().into_owned())
        .bind(job_json)
        .bind(job.priority)
        .bind(job.start_at)
        .bind(JobState::Queued.as_str())
        .bind(job.resource.combined_size().map(|s| s as i64))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(row_id)
    }

    /// Rewrite the submission parameters (priority, start time, limit) of a job.
    pub async fn update_job(&self, id: JobId, job: &NewJob) -> Result<()> {
        let job_json = serde_json::to_string(job)?;
        sqlx::query(
            r#"
            UPDATE jobs
            SET job_json = ?1,
                priority = ?2,
                start_at = ?3,
                updated_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(job_json)
        .bind(job.priority)
        .bind(job.start_at)
        .bind(unix_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record the latest reported byte counts.
    pub async fn set_progress(
        &self,
        id: JobId,
        bytes_completed: u64,
        total_size: Option<u64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET bytes_completed = ?1,
                total_size = COALESCE(?2, total_size),
                updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(bytes_completed as i64)
        .bind(total_size.map(|s| s as i64))
        .bind(unix_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Normalize any job left in `running` to `queued` (e.g. after a crash).
    /// Call before scheduling so stranded jobs are picked up again.
    /// Returns the number of jobs reset.
    pub async fn recover_running_jobs(&self) -> Result<u64> {
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'queued',
                updated_at = ?1
            WHERE state = 'running'
            "#,
        )
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    /// Update the state of an existing job.
    pub async fn set_state(&self, id: JobId, state: JobState) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?1,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(state.as_str())
        .bind(unix_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Set or clear the last error detail.
    pub async fn set_error(&self, id: JobId, error: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET error = ?1,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(error)
        .bind(unix_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Permanently remove a job row from the database.
    ///
    /// File and resume-record cleanup is handled separately by higher layers.
    pub async fn remove_job(&self, id: JobId) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
