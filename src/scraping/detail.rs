// src/scraping/detail.rs
//! Detail page fetching: navigation with one retry, wall detection, the
//! description wait and label-adjacent secondary fields.

use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::locator::{first_text, parse_selector};
use super::renderer::BrowserPage;
use crate::config::{DelayRange, ScrapeConfig};
use crate::error::{BlockKind, ScrapeError};
use crate::types::{JobRecord, Source};
use crate::utils::{clean_multiline, clean_text, random_delay, slugify};

const NAVIGATION_ATTEMPTS: u32 = 2;

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Label/value pairs such as LinkedIn's job criteria list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelSelectors {
    pub items: Vec<String>,
    pub label: Vec<String>,
    pub value: Vec<String>,
    pub work_type: Vec<String>,
    pub employment_type: Vec<String>,
}

impl Default for LabelSelectors {
    fn default() -> Self {
        Self {
            items: owned(&["li.description__job-criteria-item", ".job-details-jobs-unified-top-card__job-insight"]),
            label: owned(&["h3.description__job-criteria-subheader", "h3"]),
            value: owned(&["span.description__job-criteria-text", "span"]),
            work_type: owned(&["Work type", "Workplace type", "Work mode"]),
            employment_type: owned(&["Employment type", "Job type"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailSelectors {
    pub description: Vec<String>,
    pub captcha: Vec<String>,
    pub captcha_url_markers: Vec<String>,
    pub login_wall: Vec<String>,
    pub login_url_markers: Vec<String>,
    pub labels: LabelSelectors,
}

impl Default for DetailSelectors {
    fn default() -> Self {
        Self::linkedin()
    }
}

impl DetailSelectors {
    pub fn for_source(source: Source) -> Self {
        match source {
            Source::LinkedIn => Self::linkedin(),
            Source::Indeed => Self::indeed(),
        }
    }

    pub fn linkedin() -> Self {
        Self {
            description: owned(&[
                "div.description__text",
                ".show-more-less-html__markup",
                ".jobs-description__content",
                "#job-details",
            ]),
            captcha: owned(&["input[name=captcha]", "iframe[src*='captcha']", "#captcha-internal"]),
            captcha_url_markers: owned(&["captcha", "checkpoint/challenge"]),
            login_wall: owned(&["form.login__form", "input[name=session_key]"]),
            login_url_markers: owned(&["authwall", "/login", "/uas/login"]),
            labels: LabelSelectors::default(),
        }
    }

    pub fn indeed() -> Self {
        Self {
            description: owned(&["#jobDescriptionText", ".jobsearch-jobDescriptionText"]),
            captcha: owned(&["input[name=captcha]", "iframe[src*='captcha']", "#challenge-form", "#cf-challenge-running"]),
            captcha_url_markers: owned(&["captcha", "/challenge"]),
            login_wall: owned(&["form[action*='/account/login']", "input[name='__email']"]),
            login_url_markers: owned(&["secure.indeed.com/auth", "/account/login"]),
            labels: LabelSelectors {
                items: owned(&["#jobDetailsSection [role=group]", "div.js-match-insights-provider-16m282m"]),
                label: owned(&["h3", "[aria-label]"]),
                value: owned(&["li", "span"]),
                ..LabelSelectors::default()
            },
        }
    }
}

/// What one detail page yielded. `None` means not found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailFields {
    pub description: Option<String>,
    pub work_type: Option<String>,
    pub employment_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DetailSettings {
    pub navigation_timeout: Duration,
    pub description_timeout: Duration,
    pub retry_backoff: DelayRange,
    pub screenshot_dir: Option<PathBuf>,
}

impl Default for DetailSettings {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(90),
            description_timeout: Duration::from_secs(5),
            retry_backoff: DelayRange {
                min_millis: 1000,
                max_millis: 3000,
            },
            screenshot_dir: None,
        }
    }
}

impl DetailSettings {
    pub fn from_config(config: &ScrapeConfig) -> Self {
        Self {
            navigation_timeout: Duration::from_secs(config.timeouts.navigation_secs),
            description_timeout: Duration::from_secs(config.timeouts.description_wait_secs),
            screenshot_dir: config.screenshot_dir.clone(),
            ..Self::default()
        }
    }
}

pub struct DetailFetcher {
    settings: DetailSettings,
    selectors: HashMap<Source, DetailSelectors>,
}

impl DetailFetcher {
    pub fn new(settings: DetailSettings) -> Self {
        Self {
            settings,
            selectors: HashMap::new(),
        }
    }

    pub fn with_selectors(mut self, source: Source, selectors: DetailSelectors) -> Self {
        self.selectors.insert(source, selectors);
        self
    }

    fn selectors(&self, source: Source) -> DetailSelectors {
        self.selectors
            .get(&source)
            .cloned()
            .unwrap_or_else(|| DetailSelectors::for_source(source))
    }

    /// Visits the record's detail page and fills in what it finds.
    ///
    /// A CAPTCHA or login wall is not an error here: the record comes back
    /// marked blocked and is never retried. Only a navigation that fails
    /// twice, or a page whose content cannot be read, is an error.
    pub async fn fetch<P>(&self, page: &P, mut record: JobRecord) -> Result<JobRecord, ScrapeError>
    where
        P: BrowserPage + ?Sized,
    {
        let selectors = self.selectors(record.source);
        let url = record.detail_url.clone();

        self.navigate(page, &url).await?;

        match self.check_walls(page, &selectors, &url).await {
            Ok(()) => {}
            Err(ScrapeError::Blocked { kind, url }) => {
                warn!(
                    url = %url,
                    title = %record.title,
                    company = %record.company,
                    "{} detected on detail page; marking job as blocked",
                    kind
                );
                self.capture_screenshot(page, "blocked", &url).await;
                record.mark_blocked();
                return Ok(record);
            }
            Err(e) => return Err(e),
        }

        let matched = page
            .wait_for_any(&selectors.description, self.settings.description_timeout)
            .await
            .unwrap_or_else(|e| {
                debug!("Waiting for description failed: {:#}", e);
                None
            });
        if matched.is_none() {
            warn!(
                url = %url,
                timeout = ?self.settings.description_timeout,
                "Description did not appear; storing N/A"
            );
            self.capture_screenshot(page, "no-description", &url).await;
        }

        let html = page.content().await.map_err(ScrapeError::browser)?;
        let fields = extract_fields(&html, &selectors);
        record.apply_details(fields.description, fields.work_type, fields.employment_type);

        info!(url = %url, title = %record.title, "Fetched job details");
        Ok(record)
    }

    async fn navigate<P>(&self, page: &P, url: &str) -> Result<(), ScrapeError>
    where
        P: BrowserPage + ?Sized,
    {
        let mut reason = String::new();
        for attempt in 1..=NAVIGATION_ATTEMPTS {
            match tokio::time::timeout(self.settings.navigation_timeout, page.goto(url)).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => reason = format!("{:#}", e),
                Err(_) => reason = format!("timed out after {:?}", self.settings.navigation_timeout),
            }

            if attempt < NAVIGATION_ATTEMPTS {
                warn!(url = %url, attempt, "Navigation failed ({}); retrying", reason);
                random_delay(self.settings.retry_backoff.min(), self.settings.retry_backoff.max()).await;
            }
        }

        Err(ScrapeError::Navigation {
            url: url.to_string(),
            attempts: NAVIGATION_ATTEMPTS,
            reason,
        })
    }

    async fn check_walls<P>(&self, page: &P, selectors: &DetailSelectors, url: &str) -> Result<(), ScrapeError>
    where
        P: BrowserPage + ?Sized,
    {
        let current = page
            .current_url()
            .await
            .unwrap_or_else(|_| url.to_string())
            .to_lowercase();

        let blocked = |kind| ScrapeError::Blocked {
            kind,
            url: url.to_string(),
        };

        if selectors.captcha_url_markers.iter().any(|m| current.contains(&m.to_lowercase()))
            || any_present(page, &selectors.captcha).await
        {
            return Err(blocked(BlockKind::Captcha));
        }
        if selectors.login_url_markers.iter().any(|m| current.contains(&m.to_lowercase()))
            || any_present(page, &selectors.login_wall).await
        {
            return Err(blocked(BlockKind::LoginWall));
        }
        Ok(())
    }

    async fn capture_screenshot<P>(&self, page: &P, reason: &str, url: &str)
    where
        P: BrowserPage + ?Sized,
    {
        let Some(dir) = &self.settings.screenshot_dir else {
            return;
        };
        let path = dir.join(format!("{}-{}.png", reason, slugify(url)));
        match page.screenshot(&path).await {
            Ok(()) => debug!("Saved screenshot to {}", path.display()),
            Err(e) => debug!("Screenshot failed: {:#}", e),
        }
    }
}

async fn any_present<P>(page: &P, selectors: &[String]) -> bool
where
    P: BrowserPage + ?Sized,
{
    for selector in selectors {
        match page.count(selector).await {
            Ok(n) if n > 0 => return true,
            Ok(_) => {}
            Err(e) => debug!("Indicator check for {} failed: {:#}", selector, e),
        }
    }
    false
}

/// Pulls the description and secondary fields from a rendered detail page.
/// Each field is looked up on its own; a miss leaves only that field empty.
pub fn extract_fields(html: &str, selectors: &DetailSelectors) -> DetailFields {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let description = selectors.description.iter().find_map(|s| {
        let selector = parse_selector(s)?;
        document
            .select(&selector)
            .map(|el| clean_multiline(&block_text(el)))
            .find(|text| !text.is_empty())
    });
    if description.is_none() {
        let missing = ScrapeError::ElementNotFound {
            selector: selectors.description.join(", "),
        };
        debug!("{}", missing);
    }

    let labels = &selectors.labels;
    let work_type = labeled_value(&document, root, labels, &labels.work_type);
    let employment_type = labeled_value(&document, root, labels, &labels.employment_type);

    DetailFields {
        description,
        work_type,
        employment_type,
    }
}

/// Element text with line breaks at block boundaries so paragraphs survive.
fn block_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        if let Some(text) = node.value().as_text() {
            out.push_str(text);
        } else if let Some(el) = node.value().as_element() {
            if matches!(el.name(), "p" | "br" | "li" | "div" | "ul" | "ol" | "h1" | "h2" | "h3" | "h4") {
                out.push('\n');
            }
        }
    }
    out
}

fn label_matches(text: &str, wanted: &[String]) -> bool {
    let text = text.trim().trim_end_matches(':').trim();
    wanted.iter().any(|w| w.eq_ignore_ascii_case(text))
}

fn labeled_value(document: &Html, root: ElementRef<'_>, labels: &LabelSelectors, wanted: &[String]) -> Option<String> {
    for item_str in &labels.items {
        let Some(item_sel) = parse_selector(item_str) else {
            continue;
        };
        for item in document.select(&item_sel) {
            let label = first_text(item, &labels.label);
            if label.is_some_and(|l| label_matches(&l, wanted)) {
                if let Some(value) = first_text(item, &labels.value) {
                    return Some(value);
                }
            }
        }
    }

    // Any element whose own text is the label, followed by a sibling value.
    let candidates = parse_selector("dt, h3, h4, span, strong, label, div")?;
    for element in root.select(&candidates) {
        let text = clean_text(&element.text().collect::<String>());
        if !label_matches(&text, wanted) {
            continue;
        }
        let value = element
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .map(|sibling| clean_text(&sibling.text().collect::<String>()))
            .find(|v| !v.is_empty());
        if value.is_some() {
            return value;
        }
    }

    debug!("No value found for label {:?}", wanted.first());
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraping::testing::{FakeResponse, FakeSite};
    use crate::types::{CAPTCHA_BLOCKED, NOT_AVAILABLE};
    use std::sync::Arc;

    const DETAIL: &str = r#"
    <html><body>
      <div class="description__text">
        <div class="show-more-less-html__markup">
          <p>We are hiring a <strong>Data Analyst</strong>.</p>
          <ul><li>SQL</li><li>Tableau</li></ul>
        </div>
      </div>
      <ul class="description__job-criteria-list">
        <li class="description__job-criteria-item">
          <h3 class="description__job-criteria-subheader">Seniority level</h3>
          <span class="description__job-criteria-text">Entry level</span>
        </li>
        <li class="description__job-criteria-item">
          <h3 class="description__job-criteria-subheader">Employment type</h3>
          <span class="description__job-criteria-text">Full-time</span>
        </li>
      </ul>
      <dl><dt>Work type</dt><dd>Hybrid</dd></dl>
    </body></html>"#;

    const URL: &str = "https://www.linkedin.com/jobs/view/123";

    fn record() -> JobRecord {
        JobRecord::new(URL, Source::LinkedIn)
            .unwrap()
            .with_title(Some("Data Analyst"))
            .with_location(Some("Remote - New York, NY"))
    }

    fn fetcher() -> DetailFetcher {
        DetailFetcher::new(DetailSettings {
            navigation_timeout: Duration::from_millis(200),
            description_timeout: Duration::ZERO,
            retry_backoff: DelayRange::none(),
            screenshot_dir: None,
        })
    }

    #[test]
    fn test_extract_fields() {
        let fields = extract_fields(DETAIL, &DetailSelectors::linkedin());
        assert_eq!(
            fields.description.as_deref(),
            Some("We are hiring a Data Analyst.\n\nSQL\nTableau")
        );
        assert_eq!(fields.employment_type.as_deref(), Some("Full-time"));
        assert_eq!(fields.work_type.as_deref(), Some("Hybrid"));
    }

    #[test]
    fn test_missing_fields_are_isolated() {
        let html = r#"<div class="description__text">Only a description</div>"#;
        let fields = extract_fields(html, &DetailSelectors::linkedin());
        assert_eq!(fields.description.as_deref(), Some("Only a description"));
        assert_eq!(fields.work_type, None);
        assert_eq!(fields.employment_type, None);
    }

    #[tokio::test]
    async fn test_fetch_fills_details() {
        let site = Arc::new(FakeSite::new().with_page(URL, FakeResponse::html(DETAIL)));
        let page = site.page();

        let job = fetcher().fetch(&page, record()).await.unwrap();
        assert!(job.description.as_deref().unwrap().starts_with("We are hiring"));
        assert_eq!(job.work_type, "Hybrid");
        assert_eq!(job.employment_type, "Full-time");
        assert_eq!(site.visits(URL), 1);
    }

    #[tokio::test]
    async fn test_captcha_is_terminal_without_retry() {
        let html = r#"<form><input name="captcha"></form>"#;
        let site = Arc::new(FakeSite::new().with_page(URL, FakeResponse::html(html)));
        let page = site.page();

        let job = fetcher().fetch(&page, record()).await.unwrap();
        assert_eq!(job.description.as_deref(), Some(CAPTCHA_BLOCKED));
        assert_eq!(job.work_type, NOT_AVAILABLE);
        assert_eq!(job.employment_type, NOT_AVAILABLE);
        assert_eq!(site.visits(URL), 1);
    }

    #[tokio::test]
    async fn test_redirect_to_authwall_is_blocked() {
        let response = FakeResponse::html("<html></html>").redirect_to("https://www.linkedin.com/authwall?trk=x");
        let site = Arc::new(FakeSite::new().with_page(URL, response));

        let job = fetcher().fetch(&site.page(), record()).await.unwrap();
        assert!(job.is_blocked());
    }

    #[tokio::test]
    async fn test_missing_description_becomes_sentinel() {
        let site = Arc::new(FakeSite::new().with_page(URL, FakeResponse::html("<main>Loading...</main>")));

        let job = fetcher().fetch(&site.page(), record()).await.unwrap();
        assert_eq!(job.description.as_deref(), Some(NOT_AVAILABLE));
        assert_eq!(job.work_type, "Remote");
    }

    #[tokio::test]
    async fn test_navigation_retried_once() {
        let site = Arc::new(FakeSite::new().with_page(URL, FakeResponse::html(DETAIL).failing(1)));

        let job = fetcher().fetch(&site.page(), record()).await.unwrap();
        assert_eq!(job.employment_type, "Full-time");
        assert_eq!(site.visits(URL), 2);
    }

    #[tokio::test]
    async fn test_navigation_gives_up_after_second_failure() {
        let site = Arc::new(FakeSite::new().with_page(URL, FakeResponse::html(DETAIL).hanging()));

        let err = fetcher().fetch(&site.page(), record()).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Navigation { attempts: 2, .. }));
        assert_eq!(site.visits(URL), 2);
    }
}
