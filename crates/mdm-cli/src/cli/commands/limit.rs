//! `mdm limit <id|global> <RATE|off>` – change a speed limit.

use anyhow::{bail, Result};
use mdm_core::human::format_size;
use mdm_core::resume_db::ResumeDb;
use mdm_core::scheduler::SpeedTarget;

use crate::cli::catalogue;
use crate::cli::control_socket::{self, Request};

pub async fn run_limit(db: &ResumeDb, target: SpeedTarget, rate: Option<u64>) -> Result<()> {
    match control_socket::request(&Request::Limit { target, rate }).await? {
        Some(resp) => {
            resp.into_result()?;
        }
        None => match target {
            SpeedTarget::Job(id) => catalogue::set_limit(db, id, rate).await?,
            SpeedTarget::Global => {
                bail!("no scheduler is running; set global_speed_limit in the config file instead")
            }
        },
    }
    let what = match target {
        SpeedTarget::Job(id) => format!("job {id}"),
        SpeedTarget::Global => "all jobs".to_string(),
    };
    match rate {
        Some(r) => println!("Limited {what} to {}/s", format_size(r)),
        None => println!("Removed speed limit for {what}"),
    }
    Ok(())
}
