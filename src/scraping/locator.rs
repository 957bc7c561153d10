// src/scraping/locator.rs
//! Selector cascades for listing pages whose markup drifts without notice.
//!
//! Everything a cascade tries lives in [`SelectorCascade`], which is plain
//! data and can be replaced from the configuration file. The locator itself
//! only knows the order in which the lists are tried:
//!
//! 1. each container selector, and inside the first matching container each
//!    card selector, first non-empty result wins;
//! 2. page-wide anchors whose `href` contains a detail-link pattern;
//! 3. page-wide elements matching a job-card attribute selector.
//!
//! An empty result means every strategy was exhausted and the selectors need
//! maintenance. It is not an error.

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use super::renderer::BrowserPage;
use crate::types::Source;

/// Selectors used to pull summary fields out of a located card, tried in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardFields {
    pub link: Vec<String>,
    pub title: Vec<String>,
    pub company: Vec<String>,
    pub location: Vec<String>,
    pub posted: Vec<String>,
}

impl Default for CardFields {
    fn default() -> Self {
        SelectorCascade::linkedin().fields
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorCascade {
    pub containers: Vec<String>,
    pub cards: Vec<String>,
    pub detail_link_patterns: Vec<String>,
    pub card_attributes: Vec<String>,
    pub fields: CardFields,
}

impl Default for SelectorCascade {
    fn default() -> Self {
        Self::linkedin()
    }
}

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl SelectorCascade {
    pub fn for_source(source: Source) -> Self {
        match source {
            Source::LinkedIn => Self::linkedin(),
            Source::Indeed => Self::indeed(),
        }
    }

    /// Most recent markup first.
    pub fn linkedin() -> Self {
        Self {
            containers: owned(&[
                ".jobs-search__results-list",
                ".scaffold-layout__list-container",
                ".jobs-search-results-list",
                "#main-content section ul",
            ]),
            cards: owned(&[
                "div.base-card",
                "li.jobs-search-results__list-item",
                "li.scaffold-layout__list-item",
                "li",
            ]),
            detail_link_patterns: owned(&["/jobs/view/"]),
            card_attributes: owned(&[
                "[data-job-id]",
                "[data-entity-urn*='jobPosting']",
                "div.job-search-card",
            ]),
            fields: CardFields {
                link: owned(&[
                    "a.base-card__full-link",
                    "a.job-card-container__link",
                    "a[href*='/jobs/view/']",
                    "a[href]",
                ]),
                title: owned(&[
                    "h3.base-search-card__title",
                    ".job-card-list__title",
                    "h3",
                ]),
                company: owned(&[
                    "h4.base-search-card__subtitle",
                    ".job-card-container__primary-description",
                    ".artdeco-entity-lockup__subtitle",
                    "h4",
                ]),
                location: owned(&[
                    "span.job-search-card__location",
                    ".job-card-container__metadata-item",
                    ".artdeco-entity-lockup__caption",
                ]),
                posted: owned(&[
                    "time",
                    ".job-search-card__listdate",
                    ".job-search-card__listdate--new",
                ]),
            },
        }
    }

    pub fn indeed() -> Self {
        Self {
            containers: owned(&["#mosaic-jobResults", "#mosaic-provider-jobcards", "ul.jobsearch-ResultsList"]),
            cards: owned(&["div.job_seen_beacon", "div.cardOutline", "li"]),
            detail_link_patterns: owned(&["/viewjob", "/rc/clk", "/pagead/clk"]),
            card_attributes: owned(&["[data-jk]", "a.jcs-JobTitle"]),
            fields: CardFields {
                link: owned(&["a.jcs-JobTitle", "h2.jobTitle a", "a[data-jk]", "a[href]"]),
                title: owned(&["h2.jobTitle span[title]", "h2.jobTitle", "a.jcs-JobTitle span", "h2"]),
                company: owned(&["[data-testid='company-name']", "span.companyName", ".company_location span"]),
                location: owned(&["[data-testid='text-location']", "div.companyLocation", ".company_location div"]),
                posted: owned(&["[data-testid='myJobsStateDate']", "span.date", "time"]),
            },
        }
    }
}

/// Which strategy produced the cards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocateStrategy {
    ContainerCard { container: String, card: String },
    DetailLinks { pattern: String },
    CardAttribute { selector: String },
    Exhausted,
}

pub struct Located<'a> {
    pub strategy: LocateStrategy,
    pub cards: Vec<ElementRef<'a>>,
}

pub struct AdaptiveLocator {
    cascade: SelectorCascade,
    settle: Duration,
}

impl AdaptiveLocator {
    pub fn new(cascade: SelectorCascade, settle: Duration) -> Self {
        Self { cascade, settle }
    }

    pub fn cascade(&self) -> &SelectorCascade {
        &self.cascade
    }

    /// Runs the cascade against a parsed document.
    pub fn locate<'a>(&self, document: &'a Html) -> Located<'a> {
        for container_str in &self.cascade.containers {
            let Some(container_sel) = parse_selector(container_str) else {
                continue;
            };
            let Some(container) = document.select(&container_sel).next() else {
                continue;
            };

            for card_str in &self.cascade.cards {
                let Some(card_sel) = parse_selector(card_str) else {
                    continue;
                };
                let cards: Vec<_> = container.select(&card_sel).collect();
                if !cards.is_empty() {
                    return Located {
                        strategy: LocateStrategy::ContainerCard {
                            container: container_str.clone(),
                            card: card_str.clone(),
                        },
                        cards,
                    };
                }
            }
            debug!("Container {} matched but no card selector did", container_str);
        }

        if let Some(anchor_sel) = parse_selector("a[href]") {
            for pattern in &self.cascade.detail_link_patterns {
                let mut seen = HashSet::new();
                let cards: Vec<_> = document
                    .select(&anchor_sel)
                    .filter(|a| {
                        a.value()
                            .attr("href")
                            .is_some_and(|href| href.contains(pattern.as_str()))
                    })
                    .filter(|a| seen.insert(a.value().attr("href").unwrap_or_default().to_string()))
                    .collect();
                if !cards.is_empty() {
                    return Located {
                        strategy: LocateStrategy::DetailLinks {
                            pattern: pattern.clone(),
                        },
                        cards,
                    };
                }
            }
        }

        for attr_str in &self.cascade.card_attributes {
            let Some(selector) = parse_selector(attr_str) else {
                continue;
            };
            let cards: Vec<_> = document.select(&selector).collect();
            if !cards.is_empty() {
                return Located {
                    strategy: LocateStrategy::CardAttribute {
                        selector: attr_str.clone(),
                    },
                    cards,
                };
            }
        }

        warn!("Selector cascade exhausted; listing markup may have changed");
        Located {
            strategy: LocateStrategy::Exhausted,
            cards: Vec::new(),
        }
    }

    /// Scrolls the first container present on a live page so lazy-loaded
    /// cards render, then waits for the settle delay. Returns the container
    /// selector that matched.
    pub async fn prepare<P>(&self, page: &P) -> anyhow::Result<Option<String>>
    where
        P: BrowserPage + ?Sized,
    {
        for container in &self.cascade.containers {
            if page.count(container).await? == 0 {
                continue;
            }
            debug!("Scrolling container {}", container);
            page.scroll_to_bottom(container).await?;
            if !self.settle.is_zero() {
                tokio::time::sleep(self.settle).await;
            }
            return Ok(Some(container.clone()));
        }
        Ok(None)
    }
}

pub(crate) fn parse_selector(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(selector) => Some(selector),
        Err(e) => {
            warn!("Skipping invalid selector {:?}: {}", selector, e);
            None
        }
    }
}

/// First non-empty text among `selectors`, searched under `root`.
pub(crate) fn first_text(root: ElementRef<'_>, selectors: &[String]) -> Option<String> {
    selectors.iter().find_map(|s| {
        let selector = parse_selector(s)?;
        root.select(&selector)
            .map(|el| crate::utils::clean_text(&el.text().collect::<String>()))
            .find(|text| !text.is_empty())
    })
}
