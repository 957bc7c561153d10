// src/config.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::scraping::detail::DetailSelectors;
use crate::scraping::locator::SelectorCascade;
use crate::types::{SearchTask, Source};

pub const DEFAULT_CONCURRENCY: usize = 6;

/// How search result pages are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    #[default]
    Http,
    Browser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub navigation_secs: u64,
    pub description_wait_secs: u64,
    pub http_secs: u64,
    pub settle_millis: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation_secs: 90,
            description_wait_secs: 5,
            http_secs: 15,
            settle_millis: 1500,
        }
    }
}

/// Jittered pause before each search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayRange {
    pub min_millis: u64,
    pub max_millis: u64,
}

impl Default for DelayRange {
    fn default() -> Self {
        Self {
            min_millis: 1000,
            max_millis: 2000,
        }
    }
}

impl DelayRange {
    pub fn none() -> Self {
        Self {
            min_millis: 0,
            max_millis: 0,
        }
    }

    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_millis)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_millis)
    }
}

/// Run configuration, read once at start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub keywords: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    /// Recency window in hours.
    #[serde(default = "default_date_range", alias = "date_range_hours")]
    pub date_range: u64,
    #[serde(default)]
    pub desc_words: Vec<String>,
    #[serde(default = "default_sources")]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub discovery_mode: DiscoveryMode,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default)]
    pub session_path: Option<PathBuf>,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default)]
    pub screenshot_dir: Option<PathBuf>,
    #[serde(default)]
    pub max_jobs_per_task: Option<usize>,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub delay: DelayRange,
    /// Per-source replacements for the built-in selector cascades.
    #[serde(default)]
    pub selectors: HashMap<Source, SelectorCascade>,
    /// Per-source replacements for the detail page selectors.
    #[serde(default)]
    pub detail_selectors: HashMap<Source, DetailSelectors>,
}

fn default_date_range() -> u64 {
    24
}

fn default_sources() -> Vec<Source> {
    vec![Source::LinkedIn]
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_database_path() -> PathBuf {
    PathBuf::from("jobs.db")
}

fn default_headless() -> bool {
    true
}

impl ScrapeConfig {
    /// Minimal configuration for one keyword/location pair.
    pub fn new(keywords: Vec<String>, locations: Vec<String>, date_range: u64) -> Self {
        Self {
            keywords,
            locations,
            date_range,
            desc_words: Vec::new(),
            sources: default_sources(),
            discovery_mode: DiscoveryMode::default(),
            concurrency: DEFAULT_CONCURRENCY,
            database_path: default_database_path(),
            session_path: None,
            headless: true,
            screenshot_dir: None,
            max_jobs_per_task: None,
            timeouts: Timeouts::default(),
            delay: DelayRange::default(),
            selectors: HashMap::new(),
            detail_selectors: HashMap::new(),
        }
    }

    /// Load from a JSON, YAML or TOML file, picked by extension, then apply
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading scrape configuration from {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let mut config = Self::parse(&content, &extension)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str, format: &str) -> Result<Self> {
        let config = match format {
            "yaml" | "yml" => serde_yaml::from_str(content)?,
            "toml" => toml::from_str(content)?,
            "json" | "" => serde_json::from_str(content)?,
            other => anyhow::bail!("Unsupported config format: {}. Use json, yaml or toml", other),
        };
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("JOBSCRAPE_DATABASE") {
            info!("Database path overridden by JOBSCRAPE_DATABASE: {}", path);
            self.database_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("JOBSCRAPE_SESSION") {
            info!("Session path overridden by JOBSCRAPE_SESSION: {}", path);
            self.session_path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.keywords.iter().all(|k| k.trim().is_empty()) {
            anyhow::bail!("Configuration must list at least one keyword");
        }
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        if self.sources.is_empty() {
            anyhow::bail!("Configuration must list at least one source");
        }
        if self.delay.max_millis < self.delay.min_millis {
            anyhow::bail!(
                "delay.max_millis ({}) is below delay.min_millis ({})",
                self.delay.max_millis,
                self.delay.min_millis
            );
        }
        Ok(())
    }

    pub fn recency_window(&self) -> Duration {
        Duration::from_secs(self.date_range * 3600)
    }

    /// Every source × keyword × location combination, in configuration order.
    /// An empty location list means one location-less search per keyword.
    pub fn search_tasks(&self) -> Vec<SearchTask> {
        let locations: Vec<&str> = if self.locations.is_empty() {
            vec![""]
        } else {
            self.locations.iter().map(String::as_str).collect()
        };

        let mut tasks = Vec::new();
        for source in &self.sources {
            for keyword in self.keywords.iter().filter(|k| !k.trim().is_empty()) {
                for location in &locations {
                    tasks.push(SearchTask::new(
                        keyword,
                        location,
                        self.recency_window(),
                        *source,
                    ));
                }
            }
        }
        tasks
    }

    /// Selector cascade for a source: the configured override or the built-in one.
    pub fn cascade_for(&self, source: Source) -> SelectorCascade {
        self.selectors
            .get(&source)
            .cloned()
            .unwrap_or_else(|| SelectorCascade::for_source(source))
    }
}
