//! `mdm schedule-all <WHEN>` – give every unfinished job the same start time.

use anyhow::Result;
use mdm_core::resume_db::ResumeDb;

use crate::cli::catalogue;
use crate::cli::control_socket::{self, Request};

pub async fn run_schedule_all(db: &ResumeDb, start_at: i64) -> Result<()> {
    let count = match control_socket::request(&Request::ScheduleAll { start_at }).await? {
        Some(resp) => resp.into_result()?.count.unwrap_or(0),
        None => catalogue::schedule_all(db, start_at).await?,
    };
    println!("Scheduled {count} job(s) to start at {start_at}");
    Ok(())
}
