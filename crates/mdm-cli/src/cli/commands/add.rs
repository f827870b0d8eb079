//! `mdm add <url>` – probe a URL and add it to the catalogue.

use anyhow::{Context, Result};
use mdm_core::config::MdmConfig;
use mdm_core::fetch_head::{self, Probe};
use mdm_core::human::format_size;
use mdm_core::resource::audio_stream_path;
use mdm_core::resume_db::{NewJob, ResumeDb};
use mdm_core::url_model::unique_destination;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::control_socket::{self, Request};

#[derive(Debug, Clone)]
pub struct AddOptions {
    pub url: String,
    /// File or directory.
    pub output: Option<PathBuf>,
    pub audio_url: Option<String>,
    pub priority: i32,
    pub start_at: Option<i64>,
    pub speed_limit: Option<u64>,
}

/// Probe `url` on a blocking thread.
pub(super) async fn probe(url: &str, cfg: &MdmConfig) -> Result<Probe> {
    let url_owned = url.to_string();
    let timeout = Duration::from_secs(cfg.connect_timeout_secs);
    let probe = tokio::task::spawn_blocking(move || fetch_head::probe(&url_owned, timeout))
        .await?
        .with_context(|| format!("probe {}", url))?;
    if probe.is_html() {
        tracing::warn!(url, "server answered with a web page");
        eprintln!("warning: {url} looks like a web page, not a media file");
    }
    Ok(probe)
}

fn destination(output: Option<&Path>, probe: &Probe) -> Result<PathBuf> {
    match output {
        Some(p) if p.is_dir() => Ok(unique_destination(p, &probe.file_name())),
        Some(p) => Ok(p.to_path_buf()),
        None => Ok(unique_destination(&std::env::current_dir()?, &probe.file_name())),
    }
}

/// Tell a running scheduler about a new catalogue job.
pub(super) async fn notify(id: i64) -> Result<bool> {
    match control_socket::request(&Request::Submit { id }).await? {
        Some(resp) => resp.into_result().map(|_| true),
        None => Ok(false),
    }
}

pub async fn run_add(db: &ResumeDb, cfg: &MdmConfig, opts: AddOptions) -> Result<()> {
    let video = probe(&opts.url, cfg).await?;
    let dest = destination(opts.output.as_deref(), &video)?;
    let mut resource = video.resource(&opts.url, &dest);
    if let Some(audio_url) = &opts.audio_url {
        let audio = probe(audio_url, cfg).await?;
        resource = resource.with_companion(audio.resource(audio_url, audio_stream_path(&dest)));
    }
    resource.validate().map_err(anyhow::Error::msg)?;

    let size = resource.combined_size();
    let job = NewJob {
        resource,
        priority: opts.priority,
        start_at: opts.start_at,
        speed_limit: opts.speed_limit,
    };
    let id = db.add_job(&job).await?;
    tracing::info!(job_id = id, url = %opts.url, dest = %dest.display(), "job added");
    println!(
        "Added job {id}: {} ({})",
        dest.display(),
        size.map(format_size).unwrap_or_else(|| "size unknown".to_string())
    );
    if !notify(id).await? {
        println!("Run `mdm run` to start downloading.");
    }
    Ok(())
}
