// src/scraping/discovery.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use scraper::{ElementRef, Html};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::locator::{first_text, parse_selector, AdaptiveLocator, LocateStrategy, SelectorCascade};
use super::renderer::{BrowserPage, PageFactory, DEFAULT_USER_AGENT};
use super::sites::search_url;
use crate::config::DelayRange;
use crate::types::{JobRecord, SearchTask, Source};
use crate::utils::{parse_posted_date, random_delay};

/// Turns one search into summary records. HTTP and browser discovery are
/// interchangeable implementations.
#[async_trait]
pub trait ListingDiscoverer: Send + Sync {
    async fn discover(&self, task: &SearchTask) -> Result<Vec<JobRecord>>;
}

/// Runs tasks one after another and yields their records lazily. A failed
/// task is logged and skipped.
pub fn discover_all<'a, D>(discoverer: &'a D, tasks: &'a [SearchTask]) -> impl Stream<Item = JobRecord> + 'a
where
    D: ListingDiscoverer + ?Sized,
{
    stream::iter(tasks)
        .then(move |task| async move {
            match discoverer.discover(task).await {
                Ok(records) => {
                    info!(
                        keyword = %task.keyword,
                        location = %task.location,
                        source = %task.source,
                        found = records.len(),
                        "Search finished"
                    );
                    records
                }
                Err(e) => {
                    warn!(
                        keyword = %task.keyword,
                        location = %task.location,
                        source = %task.source,
                        "Search failed: {:#}",
                        e
                    );
                    Vec::new()
                }
            }
        })
        .flat_map(stream::iter)
}

/// Shared by both discoverers: how to read cards once the page is in hand.
#[derive(Clone)]
pub struct CardParser {
    source: Source,
    cascade: SelectorCascade,
    max_per_task: Option<usize>,
}

impl CardParser {
    pub fn new(source: Source, cascade: SelectorCascade) -> Self {
        Self {
            source,
            cascade,
            max_per_task: None,
        }
    }

    pub fn with_limit(mut self, max_per_task: Option<usize>) -> Self {
        self.max_per_task = max_per_task;
        self
    }

    /// Locates the cards in a results page and parses each one. Cards
    /// without a usable link are skipped; duplicate links are dropped.
    pub fn parse_listing(&self, html: &str, page_url: &Url, today: NaiveDate) -> (LocateStrategy, Vec<JobRecord>) {
        let document = Html::parse_document(html);
        let locator = AdaptiveLocator::new(self.cascade.clone(), Duration::ZERO);
        let located = locator.locate(&document);

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for card in located.cards {
            let Some(record) = self.parse_card(card, page_url, today) else {
                debug!("Skipping card without a detail link");
                continue;
            };
            if !seen.insert(record.detail_url.clone()) {
                continue;
            }
            records.push(record);
            if self.max_per_task.is_some_and(|max| records.len() >= max) {
                break;
            }
        }
        (located.strategy, records)
    }

    pub fn parse_card(&self, card: ElementRef<'_>, page_url: &Url, today: NaiveDate) -> Option<JobRecord> {
        let fields = &self.cascade.fields;

        let href = if card.value().name() == "a" {
            card.value()
                .attr("href")
                .filter(|href| self.is_detail_link(href))
                .map(str::to_string)
        } else {
            fields.link.iter().find_map(|s| {
                let selector = parse_selector(s)?;
                card.select(&selector)
                    .filter_map(|a| a.value().attr("href"))
                    .find(|href| self.is_detail_link(href))
                    .map(str::to_string)
            })
        }?;

        let absolute = page_url.join(href.trim()).ok()?;
        let record = JobRecord::new(absolute.as_str(), self.source)?;

        let title = first_text(card, &fields.title).or_else(|| {
            (card.value().name() == "a")
                .then(|| crate::utils::clean_text(&card.text().collect::<String>()))
                .filter(|t| !t.is_empty())
        });
        let company = first_text(card, &fields.company);
        let location = first_text(card, &fields.location);
        let posted = self.posted_date(card, today);

        Some(
            record
                .with_title(title.as_deref())
                .with_company(company.as_deref())
                .with_location(location.as_deref())
                .with_posted_date(posted),
        )
    }

    /// A card's link only counts when it points at a job posting. An empty
    /// pattern list accepts any non-blank link.
    fn is_detail_link(&self, href: &str) -> bool {
        let href = href.trim();
        !href.is_empty()
            && (self.cascade.detail_link_patterns.is_empty()
                || self
                    .cascade
                    .detail_link_patterns
                    .iter()
                    .any(|pattern| href.contains(pattern.as_str())))
    }

    /// `datetime` attribute first, element text second.
    fn posted_date(&self, card: ElementRef<'_>, today: NaiveDate) -> Option<NaiveDate> {
        for selector_str in &self.cascade.fields.posted {
            let Some(selector) = parse_selector(selector_str) else {
                continue;
            };
            for element in card.select(&selector) {
                let candidates = [
                    element.value().attr("datetime").map(str::to_string),
                    Some(element.text().collect::<String>()),
                ];
                for candidate in candidates.into_iter().flatten() {
                    match parse_posted_date(&candidate, today) {
                        Ok(date) => return Some(date),
                        Err(e) => debug!("{}", e),
                    }
                }
            }
        }
        None
    }
}

/// Discovery over plain HTTP with a browser-like header set.
pub struct HttpDiscoverer {
    client: Client,
    parsers: Vec<CardParser>,
    delay: DelayRange,
}

impl HttpDiscoverer {
    pub fn new(parsers: Vec<CardParser>, delay: DelayRange, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(super::renderer::ACCEPT_LANGUAGE));

        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            parsers,
            delay,
        })
    }

    async fn fetch(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .context("Failed to fetch search page")?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP error: {}", response.status());
        }

        response.text().await.context("Failed to read response body")
    }
}

fn parser_for(parsers: &[CardParser], source: Source) -> Result<&CardParser> {
    parsers
        .iter()
        .find(|p| p.source == source)
        .with_context(|| format!("No card parser configured for {}", source))
}

#[async_trait]
impl ListingDiscoverer for HttpDiscoverer {
    async fn discover(&self, task: &SearchTask) -> Result<Vec<JobRecord>> {
        let parser = parser_for(&self.parsers, task.source)?;
        let url = search_url(task)?;

        random_delay(self.delay.min(), self.delay.max()).await;
        info!(url = %url, keyword = %task.keyword, location = %task.location, "Fetching search results");

        let html = self.fetch(&url).await?;
        let today = chrono::Local::now().date_naive();
        let (strategy, records) = parser.parse_listing(&html, &url, today);
        debug!(?strategy, "Cards located");
        Ok(records)
    }
}

/// Discovery through the page renderer, for result lists that only render
/// with JavaScript or need the saved session.
pub struct BrowserDiscoverer<F: PageFactory> {
    pages: F,
    parsers: Vec<CardParser>,
    delay: DelayRange,
    settle: Duration,
}

impl<F: PageFactory> BrowserDiscoverer<F> {
    pub fn new(pages: F, parsers: Vec<CardParser>, delay: DelayRange, settle: Duration) -> Self {
        Self {
            pages,
            parsers,
            delay,
            settle,
        }
    }

    pub fn pages(&self) -> &F {
        &self.pages
    }

    pub fn into_pages(self) -> F {
        self.pages
    }

    async fn render(&self, page: &F::Page, url: &Url, cascade: &SelectorCascade) -> Result<String> {
        page.goto(url.as_str()).await?;
        let locator = AdaptiveLocator::new(cascade.clone(), self.settle);
        if locator.prepare(page).await?.is_none() {
            debug!(url = %url, "No listing container on page; relying on page-wide fallbacks");
        }
        page.content().await
    }
}

#[async_trait]
impl<F: PageFactory> ListingDiscoverer for BrowserDiscoverer<F> {
    async fn discover(&self, task: &SearchTask) -> Result<Vec<JobRecord>> {
        let parser = parser_for(&self.parsers, task.source)?;
        let url = search_url(task)?;

        random_delay(self.delay.min(), self.delay.max()).await;
        info!(url = %url, keyword = %task.keyword, location = %task.location, "Rendering search results");

        let page = self.pages.open_page().await?;
        let rendered = self.render(&page, &url, &parser.cascade).await;
        if let Err(e) = page.close().await {
            debug!("Failed to close search page: {}", e);
        }

        let html = rendered?;
        let today = chrono::Local::now().date_naive();
        let (strategy, records) = parser.parse_listing(&html, &url, today);
        debug!(?strategy, "Cards located");
        Ok(records)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::WorkMode;
    use std::sync::Mutex;

    pub(crate) const LINKEDIN_RESULTS: &str = r#"
    <html><body>
      <ul class="jobs-search__results-list">
        <li>
          <div class="base-card">
            <a class="base-card__full-link" href="https://www.linkedin.com/jobs/view/data-analyst-123?refId=abc&trackingId=xyz"></a>
            <h3 class="base-search-card__title">
                Data Analyst
            </h3>
            <h4 class="base-search-card__subtitle"><a>Acme Corp</a></h4>
            <span class="job-search-card__location">Remote - New York, NY</span>
            <time class="job-search-card__listdate" datetime="2024-05-18">2 days ago</time>
          </div>
        </li>
        <li>
          <div class="base-card">
            <h3 class="base-search-card__title">No link here</h3>
          </div>
        </li>
        <li>
          <div class="base-card">
            <a class="base-card__full-link" href="/jobs/view/senior-analyst-456"></a>
            <h3 class="base-search-card__title">Senior Analyst</h3>
            <span class="job-search-card__location">Austin, TX (Hybrid)</span>
            <time>3 days ago</time>
          </div>
        </li>
        <li>
          <div class="base-card">
            <a class="base-card__full-link" href="https://www.linkedin.com/jobs/view/data-analyst-123?refId=other"></a>
            <h3 class="base-search-card__title">Data Analyst (duplicate)</h3>
          </div>
        </li>
      </ul>
    </body></html>"#;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 20).unwrap()
    }

    fn page_url() -> Url {
        Url::parse("https://www.linkedin.com/jobs/search/?keywords=data+analyst").unwrap()
    }

    fn linkedin_parser() -> CardParser {
        CardParser::new(Source::LinkedIn, SelectorCascade::linkedin())
    }

    #[test]
    fn test_parse_listing_extracts_cards() {
        let (strategy, records) = linkedin_parser().parse_listing(LINKEDIN_RESULTS, &page_url(), today());

        assert!(matches!(strategy, LocateStrategy::ContainerCard { .. }));
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.detail_url, "https://www.linkedin.com/jobs/view/data-analyst-123");
        assert_eq!(first.title, "Data Analyst");
        assert_eq!(first.company, "Acme Corp");
        assert_eq!(first.location, "Remote - New York, NY");
        assert_eq!(first.work_mode, WorkMode::Remote);
        assert_eq!(first.posted_date, NaiveDate::from_ymd_opt(2024, 5, 18));
        assert!(first.description.is_none());

        let second = &records[1];
        assert_eq!(second.detail_url, "https://www.linkedin.com/jobs/view/senior-analyst-456");
        assert_eq!(second.company, "N/A");
        assert_eq!(second.work_mode, WorkMode::Hybrid);
        assert_eq!(second.posted_date, NaiveDate::from_ymd_opt(2024, 5, 17));
    }

    #[test]
    fn test_parse_listing_respects_limit() {
        let parser = linkedin_parser().with_limit(Some(1));
        let (_, records) = parser.parse_listing(LINKEDIN_RESULTS, &page_url(), today());
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_parse_listing_from_bare_anchors() {
        let html = r#"<div><a href="/jobs/view/99?trk=x"> Platform  Engineer </a></div>"#;
        let (strategy, records) = linkedin_parser().parse_listing(html, &page_url(), today());
        assert!(matches!(strategy, LocateStrategy::DetailLinks { .. }));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Platform Engineer");
        assert_eq!(records[0].detail_url, "https://www.linkedin.com/jobs/view/99");
        assert_eq!(records[0].posted_date, None);
    }

    #[test]
    fn test_card_without_job_link_is_skipped() {
        let html = r#"
        <ul class="jobs-search__results-list">
          <li><div class="base-card">
            <h3 class="base-search-card__title">Data Analyst</h3>
            <h4 class="base-search-card__subtitle"><a href="https://www.linkedin.com/company/acme?trk=x">Acme</a></h4>
          </div></li>
        </ul>"#;
        let (strategy, records) = linkedin_parser().parse_listing(html, &page_url(), today());
        assert!(matches!(strategy, LocateStrategy::ContainerCard { .. }));
        assert!(records.is_empty());
    }

    #[test]
    fn test_job_link_found_after_unrelated_anchor() {
        let html = r#"
        <ul class="jobs-search__results-list">
          <li><div class="base-card">
            <h4><a href="/company/acme">Acme</a></h4>
            <a href="/jobs/view/77?trk=x">Data Analyst</a>
          </div></li>
        </ul>"#;
        let (_, records) = linkedin_parser().parse_listing(html, &page_url(), today());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].detail_url, "https://www.linkedin.com/jobs/view/77");
    }

    #[test]
    fn test_parse_indeed_cards() {
        let html = r#"
        <div id="mosaic-jobResults"><ul>
          <li><div class="job_seen_beacon">
            <h2 class="jobTitle"><a class="jcs-JobTitle" href="/rc/clk?jk=abc123&from=serp"><span title="Data Analyst">Data Analyst</span></a></h2>
            <span data-testid="company-name">Globex</span>
            <div data-testid="text-location">Remote in Denver, CO</div>
            <span data-testid="myJobsStateDate">Posted 30+ days ago</span>
          </div></li>
        </ul></div>"#;
        let url = Url::parse("https://www.indeed.com/jobs?q=data+analyst").unwrap();
        let parser = CardParser::new(Source::Indeed, SelectorCascade::indeed());
        let (_, records) = parser.parse_listing(html, &url, today());

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].detail_url, "https://www.indeed.com/rc/clk?jk=abc123");
        assert_eq!(records[0].title, "Data Analyst");
        assert_eq!(records[0].company, "Globex");
        assert_eq!(records[0].work_mode, WorkMode::Remote);
        assert_eq!(records[0].source, Source::Indeed);
    }

    #[tokio::test]
    async fn test_browser_discoverer_renders_and_parses() {
        use crate::scraping::testing::{FakeBrowser, FakeResponse, FakeSite};
        use std::sync::Arc;

        let task = SearchTask::new("data analyst", "remote", Duration::from_secs(86_400), Source::LinkedIn);
        let url = search_url(&task).unwrap();
        let site = FakeSite::new().with_page(url.as_str(), FakeResponse::html(LINKEDIN_RESULTS));
        let browser = FakeBrowser { site: Arc::new(site) };

        let discoverer = BrowserDiscoverer::new(
            browser.clone(),
            vec![linkedin_parser()],
            DelayRange::none(),
            Duration::ZERO,
        );
        let records = discoverer.discover(&task).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].detail_url, "https://www.linkedin.com/jobs/view/data-analyst-123");
        assert_eq!(records[1].detail_url, "https://www.linkedin.com/jobs/view/senior-analyst-456");
        assert_eq!(browser.site.scrolled(), vec![".jobs-search__results-list".to_string()]);
        assert_eq!(browser.site.visits(url.as_str()), 1);
        assert_eq!(browser.site.open_pages(), 0);
    }

    #[tokio::test]
    async fn test_browser_discoverer_closes_page_on_failure() {
        use crate::scraping::testing::{FakeBrowser, FakeSite};
        use std::sync::Arc;

        let task = SearchTask::new("data analyst", "remote", Duration::from_secs(86_400), Source::LinkedIn);
        let browser = FakeBrowser {
            site: Arc::new(FakeSite::new()),
        };
        let discoverer = BrowserDiscoverer::new(
            browser.clone(),
            vec![linkedin_parser()],
            DelayRange::none(),
            Duration::ZERO,
        );

        assert!(discoverer.discover(&task).await.is_err());
        assert_eq!(browser.site.open_pages(), 0);
        assert!(browser.site.scrolled().is_empty());
    }

    struct ScriptedDiscoverer {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ListingDiscoverer for ScriptedDiscoverer {
        async fn discover(&self, task: &SearchTask) -> Result<Vec<JobRecord>> {
            self.calls.lock().unwrap().push(task.keyword.clone());
            if task.keyword == "broken" {
                anyhow::bail!("HTTP error: 429 Too Many Requests");
            }
            let url = format!("https://www.linkedin.com/jobs/view/{}", task.keyword);
            Ok(JobRecord::new(&url, task.source).into_iter().collect())
        }
    }

    #[tokio::test]
    async fn test_discover_all_skips_failed_tasks() {
        let discoverer = ScriptedDiscoverer {
            calls: Mutex::new(Vec::new()),
        };
        let window = Duration::from_secs(86_400);
        let tasks = vec![
            SearchTask::new("first", "remote", window, Source::LinkedIn),
            SearchTask::new("broken", "remote", window, Source::LinkedIn),
            SearchTask::new("third", "remote", window, Source::LinkedIn),
        ];

        let records: Vec<_> = discover_all(&discoverer, &tasks).collect().await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| !r.detail_url.is_empty()));
        assert_eq!(
            *discoverer.calls.lock().unwrap(),
            vec!["first".to_string(), "broken".to_string(), "third".to_string()]
        );
    }

    #[tokio::test]
    async fn test_discover_all_is_lazy() {
        let discoverer = ScriptedDiscoverer {
            calls: Mutex::new(Vec::new()),
        };
        let window = Duration::from_secs(3600);
        let tasks = vec![
            SearchTask::new("a", "", window, Source::LinkedIn),
            SearchTask::new("b", "", window, Source::LinkedIn),
        ];

        let first: Vec<_> = discover_all(&discoverer, &tasks).take(1).collect().await;
        assert_eq!(first.len(), 1);
        assert_eq!(discoverer.calls.lock().unwrap().len(), 1);
    }
}
