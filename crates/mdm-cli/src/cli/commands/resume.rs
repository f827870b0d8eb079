//! `mdm resume <id>` – requeue a paused or failed job.

use anyhow::Result;
use mdm_core::resume_db::{JobId, ResumeDb};

use crate::cli::catalogue;
use crate::cli::control_socket::{self, Request};

pub async fn run_resume(db: &ResumeDb, id: JobId) -> Result<()> {
    match control_socket::request(&Request::Resume { id }).await? {
        Some(resp) => {
            resp.into_result()?;
            println!("Resumed job {id}");
        }
        None => {
            catalogue::resume(db, id).await?;
            println!("Queued job {id}; it starts with the next `mdm run`");
        }
    }
    Ok(())
}
