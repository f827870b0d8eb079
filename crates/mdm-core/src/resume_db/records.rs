//! Resume record load/save/delete.

use anyhow::Result;
use sqlx::Row;

use super::db::{unix_timestamp, ResumeDb};
use super::record::ResumeRecord;

impl ResumeDb {
    /// Load the record stored under `key`.
    ///
    /// Rows that fail to parse or validate are deleted and reported as absent,
    /// so the stream restarts fresh instead of resuming from bad state.
    pub async fn load_record(&self, key: &str) -> Result<Option<ResumeRecord>> {
        let row = sqlx::query(r#"SELECT record_json FROM resume_records WHERE key = ?1"#)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let json: String = row.get("record_json");

        let parsed = serde_json::from_str::<ResumeRecord>(&json)
            .map_err(|e| e.to_string())
            .and_then(|r| r.validate().map(|_| r));
        match parsed {
            Ok(record) => Ok(Some(record)),
            Err(reason) => {
                tracing::warn!(key, %reason, "discarding unusable resume record");
                self.delete_record(key).await?;
                Ok(None)
            }
        }
    }

    /// Insert or replace the record (keyed by its URL and destination).
    pub async fn save_record(&self, record: &ResumeRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        sqlx::query(
            r#"
            INSERT INTO resume_records (key, url, dest_path, record_json, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(key) DO UPDATE SET
                record_json = excluded.record_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.key())
        .bind(&record.url)
        .bind(record.dest_path.to_string_lossy().into_owned())
        .bind(json)
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_record(&self, key: &str) -> Result<()> {
        sqlx::query(r#"DELETE FROM resume_records WHERE key = ?1"#)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
