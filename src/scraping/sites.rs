// src/scraping/sites.rs
use anyhow::{Context, Result};
use url::Url;

use crate::types::{SearchTask, Source};

const LINKEDIN_SEARCH: &str = "https://www.linkedin.com/jobs/search/";
const INDEED_SEARCH: &str = "https://www.indeed.com/jobs";

/// Login page used by the interactive session capture.
pub fn login_url(source: Source) -> &'static str {
    match source {
        Source::LinkedIn => "https://www.linkedin.com/login",
        Source::Indeed => "https://secure.indeed.com/auth",
    }
}

/// Search results URL for a task, with keyword, location and recency filter.
pub fn search_url(task: &SearchTask) -> Result<Url> {
    let keyword = task.keyword.as_str();
    let location = task.location.as_str();

    let url = match task.source {
        Source::LinkedIn => {
            // f_TPR takes the window in seconds.
            let recency = format!("r{}", task.recency_window.as_secs().max(1));
            let mut params = vec![("keywords", keyword)];
            if !location.is_empty() {
                params.push(("location", location));
            }
            params.extend([("f_TPR", recency.as_str()), ("position", "1"), ("pageNum", "0")]);
            Url::parse_with_params(LINKEDIN_SEARCH, &params)
        }
        Source::Indeed => {
            // fromage takes whole days.
            let days = task.recency_window.as_secs().div_ceil(86_400).max(1).to_string();
            let mut params = vec![("q", keyword)];
            if !location.is_empty() {
                params.push(("l", location));
            }
            params.push(("fromage", days.as_str()));
            Url::parse_with_params(INDEED_SEARCH, &params)
        }
    };

    url.with_context(|| format!("Failed to build search URL for '{}' in '{}'", keyword, location))
}
