// src/cli.rs
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use crate::config::ScrapeConfig;
use crate::core::Database;
use crate::pipeline::run_from_config;
use crate::scraping::session::capture_interactive;
use crate::scraping::sites::login_url;
use crate::types::Source;

#[derive(Parser)]
#[command(name = "jobscrape")]
#[command(about = "Scrape job postings into a local database")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Also write JSON logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a scrape described by a config file (json, yaml or toml)
    Run {
        #[arg(long)]
        config: PathBuf,
        /// Override the configured concurrency limit
        #[arg(long)]
        concurrency: Option<usize>,
        /// Show the browser window
        #[arg(long)]
        headful: bool,
    },
    /// Log in interactively and save the browser session
    Login {
        #[arg(long)]
        session: PathBuf,
        #[arg(long, default_value = "linkedin")]
        source: Source,
        /// Defaults to the source's login page
        #[arg(long)]
        login_url: Option<String>,
    },
    /// Create the database and its schema
    Init {
        #[arg(long, default_value = "jobs.db")]
        database: PathBuf,
    },
    /// List stored jobs whose title contains a role
    Jobs {
        #[arg(long, default_value = "jobs.db")]
        database: PathBuf,
        #[arg(long, default_value = "")]
        role: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

pub async fn handle_command(command: Command) -> Result<()> {
    match command {
        Command::Run {
            config,
            concurrency,
            headful,
        } => {
            let mut config = ScrapeConfig::load(&config)?;
            if let Some(limit) = concurrency {
                config.concurrency = limit;
            }
            if headful {
                config.headless = false;
            }
            config.validate()?;

            let summary = run_from_config(&config).await?;
            println!(
                "✓ {} discovered, {} fetched ({} blocked), {} persisted, {} filtered, {} failed in {:.1}s",
                summary.discovered,
                summary.fetched,
                summary.blocked,
                summary.persisted,
                summary.filtered,
                summary.failed,
                summary.elapsed.as_secs_f64()
            );
        }

        Command::Login {
            session,
            source,
            login_url: url,
        } => {
            let url = url.unwrap_or_else(|| login_url(source).to_string());
            info!(url = %url, "Starting interactive login");
            capture_interactive(&url, &session, None).await?;
        }

        Command::Init { database } => {
            let db = Database::new(&database).await?;
            db.health_check().await?;
            println!("✓ Database ready: {}", database.display());
        }

        Command::Jobs {
            database,
            role,
            limit,
        } => {
            if !database.exists() {
                anyhow::bail!("Database not found: {}", database.display());
            }
            let db = Database::new(&database).await?;
            let jobs = db
                .jobs()
                .search_by_title(&role)
                .await
                .context("Failed to query jobs")?;

            if jobs.is_empty() {
                println!("No jobs found for '{}'", role);
                return Ok(());
            }

            println!("{} job(s) matching '{}':", jobs.len(), role);
            for job in jobs.iter().take(limit) {
                let posted = job
                    .date_posted
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {} | {} | {} | {} | {}",
                    posted, job.title, job.company, job.location, job.link
                );
            }
        }
    }

    Ok(())
}

/// Runs a command and logs a failure before returning it.
pub async fn run(cli: Cli) -> Result<()> {
    let result = handle_command(cli.command).await;
    if let Err(e) = &result {
        error!("Command failed: {:#}", e);
    }
    result
}
