//! `mdm pause <id>` – pause a job. If `mdm run` is active, the download stops
//! after flushing its progress.

use anyhow::Result;
use mdm_core::resume_db::{JobId, ResumeDb};

use crate::cli::catalogue;
use crate::cli::control_socket::{self, Request};

pub async fn run_pause(db: &ResumeDb, id: JobId) -> Result<()> {
    match control_socket::request(&Request::Pause { id }).await? {
        Some(resp) => {
            resp.into_result()?;
        }
        None => catalogue::pause(db, id).await?,
    }
    println!("Paused job {id}");
    Ok(())
}
