//! CLI for the MDM download manager.

mod args;
mod catalogue;
mod commands;
mod control_socket;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use mdm_core::config;
use mdm_core::resume_db::{JobId, ResumeDb};
use mdm_core::scheduler::SpeedTarget;
use std::path::PathBuf;

use args::{parse_rate_arg, parse_target, parse_when, Rate};
use commands::{
    run_add, run_cancel, run_limit, run_pause, run_playlist, run_remove, run_resume,
    run_schedule_all, run_scheduler, run_status, AddOptions, PlaylistOptions,
};

/// Top-level CLI for the MDM download manager.
#[derive(Debug, Parser)]
#[command(name = "mdm")]
#[command(about = "MDM: segmented media download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add a download job.
    Add {
        /// Direct HTTP/HTTPS URL to download.
        url: String,
        /// Destination file, or a directory to save into.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Separate audio stream, merged with the video after both finish.
        #[arg(long, value_name = "URL")]
        audio_url: Option<String>,
        /// Higher runs first.
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i32,
        /// Do not start before WHEN (unix seconds or +N[s|m|h]).
        #[arg(long, value_name = "WHEN", value_parser = parse_when)]
        at: Option<i64>,
        /// Per-job speed limit, e.g. 500K or 2M.
        #[arg(long, value_name = "RATE", value_parser = parse_rate_arg)]
        limit: Option<Rate>,
    },

    /// Add every URL of a playlist file (one per line) as a batch.
    Playlist {
        /// Text file with one URL per line; blank lines and `#` comments are skipped.
        file: PathBuf,
        /// Directory to save into (default: current directory).
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i32,
        #[arg(long, value_name = "WHEN", value_parser = parse_when)]
        at: Option<i64>,
    },

    /// Run the scheduler until every job has finished or is paused.
    Run {
        /// Maximum jobs downloading at once (default from config).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
        /// Keep running and accept new jobs after the queue drains.
        #[arg(long)]
        watch: bool,
    },

    /// Show status of all jobs.
    Status,

    /// Pause a downloading job by its ID.
    Pause {
        /// Job identifier.
        id: JobId,
    },

    /// Resume a paused job, or retry a failed one.
    Resume {
        /// Job identifier.
        id: JobId,
    },

    /// Cancel a job.
    Cancel {
        /// Job identifier.
        id: JobId,
        /// Keep partial data so the job could be added again later.
        #[arg(long)]
        keep_partial: bool,
    },

    /// Change a speed limit: `mdm limit <id|global> <RATE|off>`.
    Limit {
        #[arg(value_name = "ID|global", value_parser = parse_target)]
        target: SpeedTarget,
        #[arg(value_name = "RATE", value_parser = parse_rate_arg)]
        rate: Rate,
    },

    /// Give every unfinished job the same start time.
    ScheduleAll {
        #[arg(value_name = "WHEN", value_parser = parse_when)]
        when: i64,
    },

    /// Remove a job from the catalogue, discarding its partial data.
    Remove {
        /// Job identifier.
        id: JobId,
        /// Also delete the finished file.
        #[arg(long)]
        delete_files: bool,
    },

    /// Print shell completions to stdout.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Print the man page (roff) to stdout.
    Man,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        if let CliCommand::Completions { shell } = cli.command {
            clap_complete::generate(shell, &mut Cli::command(), "mdm", &mut std::io::stdout());
            return Ok(());
        }
        if let CliCommand::Man = cli.command {
            clap_mangen::Man::new(Cli::command()).render(&mut std::io::stdout())?;
            return Ok(());
        }

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let db = ResumeDb::open_default().await?;

        match cli.command {
            CliCommand::Add {
                url,
                output,
                audio_url,
                priority,
                at,
                limit,
            } => {
                let opts = AddOptions {
                    url,
                    output,
                    audio_url,
                    priority,
                    start_at: at,
                    speed_limit: limit.and_then(|r| r.0),
                };
                run_add(&db, &cfg, opts).await?
            }
            CliCommand::Playlist {
                file,
                dir,
                priority,
                at,
            } => {
                let opts = PlaylistOptions {
                    file,
                    dir,
                    priority,
                    start_at: at,
                };
                run_playlist(&db, &cfg, opts).await?
            }
            CliCommand::Run { jobs, watch } => run_scheduler(db, cfg, jobs, watch).await?,
            CliCommand::Status => run_status(&db).await?,
            CliCommand::Pause { id } => run_pause(&db, id).await?,
            CliCommand::Resume { id } => run_resume(&db, id).await?,
            CliCommand::Cancel { id, keep_partial } => {
                run_cancel(&db, &cfg, id, keep_partial).await?
            }
            CliCommand::Limit { target, rate } => run_limit(&db, target, rate.0).await?,
            CliCommand::ScheduleAll { when } => run_schedule_all(&db, when).await?,
            CliCommand::Remove { id, delete_files } => run_remove(&db, id, delete_files).await?,
            CliCommand::Completions { .. } | CliCommand::Man => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
