//! `mdm status` – show status of all jobs.

use anyhow::Result;
use mdm_core::human::format_size;
use mdm_core::resume_db::ResumeDb;
use mdm_core::scheduler::JobSnapshot;
use std::collections::HashMap;

use crate::cli::control_socket::{self, Request};

pub async fn run_status(db: &ResumeDb) -> Result<()> {
    let jobs = db.list_jobs().await?;
    if jobs.is_empty() {
        println!("No jobs in database.");
        return Ok(());
    }
    // A running scheduler knows fresher state than the catalogue.
    let live: HashMap<_, JobSnapshot> = match control_socket::request(&Request::List).await {
        Ok(Some(resp)) if resp.ok => resp.jobs.into_iter().map(|j| (j.id, j)).collect(),
        _ => HashMap::new(),
    };

    println!(
        "{:<6} {:<12} {:>4} {:>22} {}",
        "ID", "STATE", "PRI", "PROGRESS", "DESTINATION"
    );
    for j in jobs {
        let (state, done, total, error) = match live.get(&j.id) {
            Some(s) => (
                s.status.as_str().to_string(),
                s.bytes_completed,
                s.total_size,
                s.last_error.clone(),
            ),
            None => (
                j.state.as_str().to_string(),
                j.bytes_completed.max(0) as u64,
                j.total_size.map(|t| t.max(0) as u64),
                j.error.clone(),
            ),
        };
        let progress = match total {
            Some(t) if t > 0 => format!("{} / {}", format_size(done), format_size(t)),
            _ => format_size(done),
        };
        println!(
            "{:<6} {:<12} {:>4} {:>22} {}",
            j.id, state, j.priority, progress, j.dest_path
        );
        if let Some(e) = error {
            println!("       last error: {e}");
        }
    }
    Ok(())
}
