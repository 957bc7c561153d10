// src/scraping/coordinator.rs
use futures::stream::{FuturesUnordered, Stream};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use super::detail::DetailFetcher;
use super::renderer::{BrowserPage, PageFactory};
use crate::config::DEFAULT_CONCURRENCY;
use crate::error::ScrapeError;
use crate::types::JobRecord;

/// Result of one dispatched job. A failed job carries only what is needed
/// to log it; the record itself is dropped.
#[derive(Debug)]
pub enum FetchOutcome {
    Completed(JobRecord),
    Failed {
        detail_url: String,
        title: String,
        company: String,
        error: String,
    },
}

/// Bounds how many detail fetches run at once. The permit pool is owned
/// here and handed to each job, never shared globally.
pub struct Coordinator {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl Coordinator {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Dispatches `job` once per record and yields outcomes in completion
    /// order. Errors and panics are contained per job.
    pub fn run<'a, F, Fut>(&'a self, records: Vec<JobRecord>, job: F) -> impl Stream<Item = FetchOutcome> + 'a
    where
        F: Fn(JobRecord) -> Fut + 'a,
        Fut: Future<Output = Result<JobRecord, ScrapeError>> + 'a,
    {
        debug!(jobs = records.len(), limit = self.limit, "Dispatching detail fetches");

        records
            .into_iter()
            .map(|record| {
                let permits = Arc::clone(&self.permits);
                let detail_url = record.detail_url.clone();
                let title = record.title.clone();
                let company = record.company.clone();
                let work = job(record);

                async move {
                    let failed = |error: String| FetchOutcome::Failed {
                        detail_url: detail_url.clone(),
                        title: title.clone(),
                        company: company.clone(),
                        error,
                    };

                    let _permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => return failed(e.to_string()),
                    };

                    match AssertUnwindSafe(work).catch_unwind().await {
                        Ok(Ok(record)) => FetchOutcome::Completed(record),
                        Ok(Err(e)) => {
                            warn!(
                                url = %detail_url,
                                title = %title,
                                company = %company,
                                "Job failed: {}",
                                e
                            );
                            failed(e.to_string())
                        }
                        Err(panic) => {
                            let message = panic
                                .downcast_ref::<&str>()
                                .map(|s| s.to_string())
                                .or_else(|| panic.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "unknown panic".to_string());
                            error!(
                                url = %detail_url,
                                title = %title,
                                company = %company,
                                "Job panicked: {}",
                                message
                            );
                            failed(message)
                        }
                    }
                }
            })
            .collect::<FuturesUnordered<_>>()
    }

    /// Detail fetching over a page factory: one fresh page per job, closed
    /// when the job ends.
    pub fn fetch_details<'a, F>(
        &'a self,
        pages: &'a F,
        fetcher: &'a DetailFetcher,
        records: Vec<JobRecord>,
    ) -> impl Stream<Item = FetchOutcome> + 'a
    where
        F: PageFactory,
    {
        self.run(records, move |record| async move {
            let page = pages.open_page().await.map_err(ScrapeError::browser)?;
            let result = fetcher.fetch(&page, record).await;
            if let Err(e) = page.close().await {
                debug!("Failed to close detail page: {:#}", e);
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DelayRange;
    use crate::scraping::detail::DetailSettings;
    use crate::scraping::testing::{FakeBrowser, FakeResponse, FakeSite};
    use crate::types::Source;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn records(n: usize) -> Vec<JobRecord> {
        (0..n)
            .map(|i| {
                JobRecord::new(&format!("https://www.linkedin.com/jobs/view/{}", i), Source::LinkedIn)
                    .unwrap()
                    .with_title(Some(&format!("Job {}", i)))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_never_exceeds_limit() {
        let coordinator = Coordinator::new(3);
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let outcomes: Vec<_> = coordinator
            .run(records(20), |record| {
                let in_flight = &in_flight;
                let peak = &peak;
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(record)
                }
            })
            .collect()
            .await;

        assert_eq!(outcomes.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_contained() {
        let coordinator = Coordinator::new(2);
        let outcomes: Vec<_> = coordinator
            .run(records(5), |record| async move {
                let title = record.title.clone();
                match title.as_str() {
                    "Job 1" => Err(ScrapeError::Navigation {
                        url: record.detail_url.clone(),
                        attempts: 2,
                        reason: "timed out".into(),
                    }),
                    "Job 3" => panic!("selector engine exploded"),
                    _ => Ok(record),
                }
            })
            .collect()
            .await;

        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, FetchOutcome::Completed(_)))
            .count();
        assert_eq!(completed, 3);

        let panicked = outcomes.iter().any(|o| {
            matches!(o, FetchOutcome::Failed { title, error, .. }
                if title == "Job 3" && error.contains("exploded"))
        });
        assert!(panicked);
    }

    #[tokio::test]
    async fn test_default_limit_is_six() {
        assert_eq!(Coordinator::default().limit(), 6);
        assert_eq!(Coordinator::new(0).limit(), 1);
    }

    #[tokio::test]
    async fn test_fetch_details_opens_one_page_per_job() {
        let mut site = FakeSite::new();
        for i in 0..8 {
            let html = format!(r#"<div class="description__text">Role {}</div>"#, i);
            site = site.with_page(
                &format!("https://www.linkedin.com/jobs/view/{}", i),
                FakeResponse::html(&html).slow(Duration::from_millis(10)),
            );
        }
        let browser = FakeBrowser { site: Arc::new(site) };
        let fetcher = DetailFetcher::new(DetailSettings {
            navigation_timeout: Duration::from_secs(1),
            description_timeout: Duration::ZERO,
            retry_backoff: DelayRange::none(),
            screenshot_dir: None,
        });

        let coordinator = Coordinator::new(3);
        let outcomes: Vec<_> = coordinator
            .fetch_details(&browser, &fetcher, records(8))
            .collect()
            .await;

        assert_eq!(outcomes.len(), 8);
        assert!(outcomes.iter().all(|o| matches!(o, FetchOutcome::Completed(r) if r.description.is_some())));
        assert!(browser.site.max_open_pages() <= 3);
        assert_eq!(browser.site.open_pages(), 0);
        assert_eq!(browser.site.total_visits(), 8);
    }
}
