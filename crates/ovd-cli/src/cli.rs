use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use ovd_core::api::HttpObjectApi;
use ovd_core::config;
use ovd_core::context::Context;
use ovd_core::fetch::SpawnedFetcher;
use ovd_core::scheduler::Scheduler;

mod commands;

/// Top-level CLI for the OVD object-vault download manager.
#[derive(Debug, Parser)]
#[command(name = "ovd")]
#[command(about = "OVD: bulk, resumable object-vault download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Queue one object id for download.
    Add {
        /// External object id.
        id: String,
    },

    /// Import a comma-separated id list and queue everything actionable.
    Import {
        /// Path to the flat id list. Defaults to `import.txt` in the data
        /// directory.
        path: Option<PathBuf>,
    },

    /// Run the pipeline until all queued work is done.
    Run,

    /// Show all jobs and their stages.
    Status,

    /// Search the vendor API for objects.
    Search {
        /// Free-text query.
        query: String,
    },

    /// Cancel a job wherever it currently is.
    Cancel {
        /// External object id.
        id: String,
    },

    /// Re-queue a failed job from the validation stage.
    Retry {
        /// External object id.
        id: String,
    },

    /// Audit a downloaded object folder against its metadata snapshot.
    Audit {
        /// External object id.
        id: String,
    },

    /// Remove all completed jobs from the list.
    ClearCompleted,

    /// Remove all failed jobs from the list.
    ClearFailed,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        let api = Arc::new(HttpObjectApi::new(
            cfg.api_base_url.clone(),
            cfg.api_token.clone(),
        ));
        let fetcher = Arc::new(SpawnedFetcher::new(cfg.max_file_bytes));
        let ctx = Context::open(cfg, config::data_dir()?, api, fetcher).await?;
        let sched = Scheduler::new(Arc::clone(&ctx));

        match cli.command {
            CliCommand::Add { id } => commands::run_add(&sched, &id).await,
            CliCommand::Import { path } => {
                let path = match path {
                    Some(path) => path,
                    None => config::data_dir()?.join("import.txt"),
                };
                commands::run_import(&sched, &path).await
            }
            CliCommand::Run => commands::run_pipeline(&ctx, &sched).await,
            CliCommand::Status => commands::run_status(&ctx).await,
            CliCommand::Search { query } => commands::run_search(&ctx, &query).await,
            CliCommand::Cancel { id } => commands::run_cancel(&sched, &id).await,
            CliCommand::Retry { id } => commands::run_retry(&sched, &id).await,
            CliCommand::Audit { id } => commands::run_audit(&sched, &id).await,
            CliCommand::ClearCompleted => commands::run_clear_completed(&ctx).await,
            CliCommand::ClearFailed => commands::run_clear_failed(&ctx).await,
        }
    }
}
