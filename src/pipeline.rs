// src/pipeline.rs
//! End-to-end run: discovery, bounded detail fetching, filtering and
//! persistence.

use anyhow::Result;
use futures::StreamExt;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{DiscoveryMode, ScrapeConfig};
use crate::core::Database;
use crate::scraping::coordinator::{Coordinator, FetchOutcome};
use crate::scraping::detail::{DetailFetcher, DetailSettings};
use crate::scraping::discovery::{discover_all, BrowserDiscoverer, CardParser, HttpDiscoverer, ListingDiscoverer};
use crate::scraping::renderer::{LazyRenderer, PageFactory, RendererSettings};
use crate::scraping::session::SessionState;
use crate::types::{JobRecord, RecordStage, SearchTask};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub discovered: usize,
    pub fetched: usize,
    pub blocked: usize,
    pub failed: usize,
    pub filtered: usize,
    pub persisted: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    fn log(&self) {
        info!(
            discovered = self.discovered,
            fetched = self.fetched,
            blocked = self.blocked,
            failed = self.failed,
            filtered = self.filtered,
            persisted = self.persisted,
            elapsed_secs = self.elapsed.as_secs_f64(),
            "Run finished"
        );
    }
}

pub struct ScrapePipeline {
    fetcher: DetailFetcher,
    coordinator: Coordinator,
    database: Database,
    desc_words: Vec<String>,
}

impl ScrapePipeline {
    pub fn new(fetcher: DetailFetcher, coordinator: Coordinator, database: Database) -> Self {
        Self {
            fetcher,
            coordinator,
            database,
            desc_words: Vec::new(),
        }
    }

    /// Keep only jobs whose description mentions one of `words`.
    pub fn with_desc_words(mut self, words: Vec<String>) -> Self {
        self.desc_words = words.into_iter().filter(|w| !w.trim().is_empty()).collect();
        self
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Runs every task in order and returns the unique records found.
    pub async fn discover<D>(&self, discoverer: &D, tasks: &[SearchTask]) -> Vec<JobRecord>
    where
        D: ListingDiscoverer + ?Sized,
    {
        let mut seen = HashSet::new();
        discover_all(discoverer, tasks)
            .filter(|record| {
                let fresh = seen.insert(record.detail_url.clone());
                if !fresh {
                    debug!(url = %record.detail_url, "Already discovered by an earlier search");
                }
                futures::future::ready(fresh)
            })
            .collect()
            .await
    }

    /// Fetches details for `records` with bounded concurrency and persists
    /// each completed record as soon as it is done.
    pub async fn process<F>(&self, pages: &F, records: Vec<JobRecord>, summary: &mut RunSummary)
    where
        F: PageFactory,
    {
        let repo = self.database.jobs();
        let mut outcomes = Box::pin(self.coordinator.fetch_details(pages, &self.fetcher, records));

        while let Some(outcome) = outcomes.next().await {
            let mut record = match outcome {
                FetchOutcome::Completed(record) => record,
                FetchOutcome::Failed { .. } => {
                    summary.failed += 1;
                    continue;
                }
            };

            summary.fetched += 1;
            if record.is_blocked() {
                summary.blocked += 1;
            }

            if !self.desc_words.is_empty() && !record.description_matches(&self.desc_words) {
                debug!(url = %record.detail_url, "Description matches no filter word; skipping");
                summary.filtered += 1;
                continue;
            }

            match repo.upsert(&record).await {
                Ok(outcome) => {
                    record.advance(RecordStage::Persisted);
                    summary.persisted += 1;
                    debug!(url = %record.detail_url, ?outcome, "Persisted job");
                }
                Err(e) => {
                    error!(
                        url = %record.detail_url,
                        title = %record.title,
                        company = %record.company,
                        "{}",
                        e
                    );
                    summary.failed += 1;
                }
            }
        }
    }

    /// Discovery followed by processing. `pages` is only made ready once
    /// discovery has produced something to fetch; failing to get it ready
    /// ends the run.
    pub async fn run<D, F>(&self, discoverer: &D, tasks: &[SearchTask], pages: &F) -> Result<RunSummary>
    where
        D: ListingDiscoverer + ?Sized,
        F: PageFactory,
    {
        let started = Instant::now();
        let records = self.discover(discoverer, tasks).await;
        let mut summary = RunSummary {
            discovered: records.len(),
            ..RunSummary::default()
        };

        if records.is_empty() {
            warn!(tasks = tasks.len(), "No search returned any job; nothing to fetch");
        } else {
            pages.ready().await?;
            self.process(pages, records, &mut summary).await;
        }

        summary.elapsed = started.elapsed();
        summary.log();
        Ok(summary)
    }
}

/// Runs one full scrape as described by `config`. The browser is launched
/// only once discovery has produced something to fetch, or up front when
/// discovery itself renders pages.
pub async fn run_from_config(config: &ScrapeConfig) -> Result<RunSummary> {
    let run_id = Uuid::new_v4();
    let span = info_span!("scrape_run", run_id = %run_id);

    async move {
        let tasks = config.search_tasks();
        info!(
            tasks = tasks.len(),
            mode = ?config.discovery_mode,
            concurrency = config.concurrency,
            "Starting scrape run"
        );

        let database = Database::new(&config.database_path).await?;
        let session = match &config.session_path {
            Some(path) => Some(SessionState::load(path).await?),
            None => None,
        };

        let mut fetcher = DetailFetcher::new(DetailSettings::from_config(config));
        for (source, selectors) in &config.detail_selectors {
            fetcher = fetcher.with_selectors(*source, selectors.clone());
        }
        let pipeline = ScrapePipeline::new(fetcher, Coordinator::new(config.concurrency), database)
            .with_desc_words(config.desc_words.clone());

        let parsers: Vec<CardParser> = config
            .sources
            .iter()
            .map(|source| CardParser::new(*source, config.cascade_for(*source)).with_limit(config.max_jobs_per_task))
            .collect();
        let pages = LazyRenderer::new(
            RendererSettings {
                headless: config.headless,
                ..RendererSettings::default()
            },
            session,
        );

        let (result, pages) = match config.discovery_mode {
            DiscoveryMode::Http => {
                let discoverer = HttpDiscoverer::new(
                    parsers,
                    config.delay.clone(),
                    Duration::from_secs(config.timeouts.http_secs),
                )?;
                let result = pipeline.run(&discoverer, &tasks, &pages).await;
                (result, pages)
            }
            DiscoveryMode::Browser => {
                pages.ready().await?;
                let settle = Duration::from_millis(config.timeouts.settle_millis);
                let discoverer = BrowserDiscoverer::new(pages, parsers, config.delay.clone(), settle);
                let result = pipeline.run(&discoverer, &tasks, discoverer.pages()).await;
                (result, discoverer.into_pages())
            }
        };

        if pages.is_launched() {
            if let Err(e) = pages.close().await {
                warn!("Failed to close browser: {:#}", e);
            }
        }
        result
    }
    .instrument(span)
    .await
}
