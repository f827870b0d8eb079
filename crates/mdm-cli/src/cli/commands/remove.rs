//! `mdm remove <id>` – remove a job; unfinished jobs are cancelled first and
//! their partial data discarded. `--delete-files` also deletes the finished file.

use anyhow::Result;
use mdm_core::resume_db::{JobId, JobState, ResumeDb};

use super::cancel::cancel;
use crate::cli::catalogue;

pub async fn run_remove(db: &ResumeDb, id: JobId, delete_files: bool) -> Result<()> {
    let job = catalogue::require(db, id).await?;
    if !job.state.is_terminal() {
        cancel(db, id, false).await?;
    }

    if delete_files && job.state == JobState::Completed {
        let path = &job.job.resource.dest_path;
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "deleted file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), "could not delete file: {}", e),
        }
    }

    db.remove_job(id).await?;
    println!("Removed job {id}");
    Ok(())
}
