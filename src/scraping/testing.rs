// src/scraping/testing.rs
//! In-memory browser used by unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::renderer::{BrowserPage, PageFactory};

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeResponse {
    html: String,
    final_url: Option<String>,
    failures: usize,
    hang: bool,
    latency: Duration,
}

impl FakeResponse {
    pub(crate) fn html(html: &str) -> Self {
        Self {
            html: html.to_string(),
            ..Self::default()
        }
    }

    pub(crate) fn redirect_to(mut self, url: &str) -> Self {
        self.final_url = Some(url.to_string());
        self
    }

    /// Fails the first `n` navigations.
    pub(crate) fn failing(mut self, n: usize) -> Self {
        self.failures = n;
        self
    }

    /// Navigation never completes.
    pub(crate) fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub(crate) fn slow(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[derive(Default)]
pub(crate) struct FakeSite {
    responses: HashMap<String, FakeResponse>,
    visits: Mutex<HashMap<String, usize>>,
    open_pages: AtomicUsize,
    max_open_pages: AtomicUsize,
    screenshots: Mutex<Vec<PathBuf>>,
    scrolled: Mutex<Vec<String>>,
    unavailable: bool,
}

impl FakeSite {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_page(mut self, url: &str, response: FakeResponse) -> Self {
        self.responses.insert(url.to_string(), response);
        self
    }

    /// The browser behind this site cannot be started.
    pub(crate) fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub(crate) fn page(self: &Arc<Self>) -> FakePage {
        let open = self.open_pages.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open_pages.fetch_max(open, Ordering::SeqCst);
        FakePage {
            site: Arc::clone(self),
            current: Mutex::new(None),
        }
    }

    pub(crate) fn visits(&self, url: &str) -> usize {
        self.visits.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub(crate) fn total_visits(&self) -> usize {
        self.visits.lock().unwrap().values().sum()
    }

    pub(crate) fn max_open_pages(&self) -> usize {
        self.max_open_pages.load(Ordering::SeqCst)
    }

    pub(crate) fn open_pages(&self) -> usize {
        self.open_pages.load(Ordering::SeqCst)
    }

    pub(crate) fn screenshots(&self) -> Vec<PathBuf> {
        self.screenshots.lock().unwrap().clone()
    }

    /// Containers scrolled so far, in call order.
    pub(crate) fn scrolled(&self) -> Vec<String> {
        self.scrolled.lock().unwrap().clone()
    }
}

#[derive(Clone)]
pub(crate) struct FakeBrowser {
    pub(crate) site: Arc<FakeSite>,
}

#[async_trait]
impl PageFactory for FakeBrowser {
    type Page = FakePage;

    async fn open_page(&self) -> Result<FakePage> {
        self.ready().await?;
        Ok(self.site.page())
    }

    async fn ready(&self) -> Result<()> {
        if self.site.unavailable {
            return Err(anyhow!("Failed to launch browser: executable not found"));
        }
        Ok(())
    }
}

pub(crate) struct FakePage {
    site: Arc<FakeSite>,
    current: Mutex<Option<(String, String)>>,
}

impl FakePage {
    fn current(&self) -> Option<(String, String)> {
        self.current.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&self, url: &str) -> Result<()> {
        let visit = {
            let mut visits = self.site.visits.lock().unwrap();
            let count = visits.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let response = self
            .site
            .responses
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("net::ERR_NAME_NOT_RESOLVED at {}", url))?;

        if response.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if !response.latency.is_zero() {
            tokio::time::sleep(response.latency).await;
        }
        if visit <= response.failures {
            return Err(anyhow!("net::ERR_CONNECTION_RESET at {}", url));
        }

        let final_url = response.final_url.unwrap_or_else(|| url.to_string());
        *self.current.lock().unwrap() = Some((final_url, response.html));
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.current().map(|(url, _)| url).unwrap_or_else(|| "about:blank".into()))
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        let Some((_, html)) = self.current() else {
            return Ok(0);
        };
        let selector = Selector::parse(selector).map_err(|e| anyhow!("{}", e))?;
        Ok(Html::parse_document(&html).select(&selector).count())
    }

    async fn scroll_to_bottom(&self, container: &str) -> Result<()> {
        if self.count(container).await? == 0 {
            return Err(anyhow!("no element matches {}", container));
        }
        self.site.scrolled.lock().unwrap().push(container.to_string());
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        Ok(self.current().map(|(_, html)| html).unwrap_or_default())
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        self.site.screenshots.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.site.open_pages.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
