//! `mdm playlist <file>` – add every URL of a playlist as one batch.
//!
//! All entries are probed before anything is stored, so a bad line leaves the
//! catalogue untouched.

use anyhow::{bail, Context, Result};
use mdm_core::config::MdmConfig;
use mdm_core::resume_db::{NewJob, ResumeDb};
use mdm_core::url_model::unique_destination_with;
use std::path::PathBuf;

use super::add::{notify, probe};

#[derive(Debug, Clone)]
pub struct PlaylistOptions {
    pub file: PathBuf,
    pub dir: Option<PathBuf>,
    pub priority: i32,
    pub start_at: Option<i64>,
}

/// Non-empty lines that are not `#` comments, with their 1-based line numbers.
pub(crate) fn playlist_urls(text: &str) -> Vec<(usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
        .collect()
}

pub async fn run_playlist(db: &ResumeDb, cfg: &MdmConfig, opts: PlaylistOptions) -> Result<()> {
    let text = tokio::fs::read_to_string(&opts.file)
        .await
        .with_context(|| format!("read playlist {}", opts.file.display()))?;
    let entries = playlist_urls(&text);
    if entries.is_empty() {
        bail!("playlist {} has no URLs", opts.file.display());
    }
    let dir = match opts.dir {
        Some(d) => d,
        None => std::env::current_dir()?,
    };
    tokio::fs::create_dir_all(&dir).await?;

    let mut jobs = Vec::with_capacity(entries.len());
    let mut taken: Vec<PathBuf> = Vec::new();
    for (line, url) in entries {
        let p = probe(url, cfg)
            .await
            .with_context(|| format!("playlist line {}", line))?;
        let dest = unique_destination_with(&dir, &p.file_name(), |c| taken.iter().any(|t| t == c));
        taken.push(dest.clone());
        jobs.push(NewJob {
            resource: p.resource(url, dest),
            priority: opts.priority,
            start_at: opts.start_at,
            speed_limit: None,
        });
    }

    let mut live = false;
    for job in &jobs {
        let id = db.add_job(job).await?;
        live |= notify(id).await?;
        println!("Added job {id}: {}", job.resource.dest_path.display());
    }
    println!("Added {} job(s) from {}", jobs.len(), opts.file.display());
    if !live {
        println!("Run `mdm run` to start downloading.");
    }
    Ok(())
}
