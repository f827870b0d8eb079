//! `mdm cancel <id>` – cancel a job, discarding partial data unless asked to keep it.

use anyhow::Result;
use mdm_core::config::MdmConfig;
use mdm_core::resume_db::{JobId, ResumeDb};

use crate::cli::catalogue;
use crate::cli::control_socket::{self, Request};

pub async fn run_cancel(db: &ResumeDb, cfg: &MdmConfig, id: JobId, keep_partial: bool) -> Result<()> {
    cancel(db, id, keep_partial || cfg.keep_partial_on_cancel).await?;
    println!("Cancelled job {id}");
    Ok(())
}

pub(super) async fn cancel(db: &ResumeDb, id: JobId, keep_partial: bool) -> Result<()> {
    match control_socket::request(&Request::Cancel { id, keep_partial }).await? {
        Some(resp) => resp.into_result().map(drop),
        None => catalogue::cancel(db, id, keep_partial).await,
    }
}
