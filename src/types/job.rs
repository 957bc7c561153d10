// src/types/job.rs
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::utils::{normalize_detail_url, sanitize_field};

/// Placeholder for a field that could not be found.
pub const NOT_AVAILABLE: &str = "N/A";
/// Terminal description for a job whose detail page was walled off.
pub const CAPTCHA_BLOCKED: &str = "CAPTCHA Blocked";

/// True for the placeholder values that must never replace real content.
pub fn is_sentinel(value: &str) -> bool {
    value == NOT_AVAILABLE || value == CAPTCHA_BLOCKED
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[serde(alias = "LinkedIn")]
    LinkedIn,
    #[serde(alias = "Indeed")]
    Indeed,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::LinkedIn => "LinkedIn",
            Source::Indeed => "Indeed",
        }
    }

    /// Query parameter that carries the posting identity on sites whose
    /// detail links have no id in the path (Indeed's `viewjob?jk=`).
    pub fn identity_param(&self) -> Option<&'static str> {
        match self {
            Source::LinkedIn => None,
            Source::Indeed => Some("jk"),
        }
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "linkedin" => Ok(Source::LinkedIn),
            "indeed" => Ok(Source::Indeed),
            other => Err(format!("unknown source '{}': expected linkedin or indeed", other)),
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkMode {
    Remote,
    Onsite,
    Hybrid,
    Unknown,
}

impl WorkMode {
    /// Substring classification over free-form location text.
    pub fn classify(location: &str) -> Self {
        let lowered = location.to_lowercase();
        if lowered.contains("remote") {
            WorkMode::Remote
        } else if lowered.contains("onsite") || lowered.contains("on-site") {
            WorkMode::Onsite
        } else if lowered.contains("hybrid") {
            WorkMode::Hybrid
        } else {
            WorkMode::Unknown
        }
    }

    /// Column value; `Unknown` is stored as the sentinel.
    pub fn as_field(&self) -> &'static str {
        match self {
            WorkMode::Remote => "Remote",
            WorkMode::Onsite => "Onsite",
            WorkMode::Hybrid => "Hybrid",
            WorkMode::Unknown => NOT_AVAILABLE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordStage {
    Discovered,
    DetailFetched,
    Persisted,
}

/// A single job posting, filled in as it moves through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub title: String,
    pub company: String,
    pub location: String,
    pub detail_url: String,
    pub source: Source,
    pub posted_date: Option<NaiveDate>,
    pub work_mode: WorkMode,
    pub work_type: String,
    pub employment_type: String,
    pub description: Option<String>,
    stage: RecordStage,
}

impl JobRecord {
    /// Builds a discovered record. Returns `None` when the link is empty
    /// after normalization.
    pub fn new(detail_url: &str, source: Source) -> Option<Self> {
        let detail_url = normalize_detail_url(detail_url, source.identity_param());
        if detail_url.is_empty() {
            return None;
        }

        Some(Self {
            title: NOT_AVAILABLE.to_string(),
            company: NOT_AVAILABLE.to_string(),
            location: NOT_AVAILABLE.to_string(),
            detail_url,
            source,
            posted_date: None,
            work_mode: WorkMode::Unknown,
            work_type: NOT_AVAILABLE.to_string(),
            employment_type: NOT_AVAILABLE.to_string(),
            description: None,
            stage: RecordStage::Discovered,
        })
    }

    pub fn with_title(mut self, title: Option<&str>) -> Self {
        self.title = sanitize_field(title);
        self
    }

    pub fn with_company(mut self, company: Option<&str>) -> Self {
        self.company = sanitize_field(company);
        self
    }

    /// Sets the location and derives the work mode from it.
    pub fn with_location(mut self, location: Option<&str>) -> Self {
        self.location = sanitize_field(location);
        self.work_mode = WorkMode::classify(&self.location);
        self.work_type = self.work_mode.as_field().to_string();
        self
    }

    pub fn with_posted_date(mut self, date: Option<NaiveDate>) -> Self {
        self.posted_date = date;
        self
    }

    pub fn stage(&self) -> RecordStage {
        self.stage
    }

    /// Moves the record forward. Backwards moves are ignored.
    pub fn advance(&mut self, stage: RecordStage) {
        if stage > self.stage {
            self.stage = stage;
        }
    }

    /// Applies what the detail page yielded. A `None` secondary field keeps
    /// whatever the listing card provided.
    pub fn apply_details(
        &mut self,
        description: Option<String>,
        work_type: Option<String>,
        employment_type: Option<String>,
    ) {
        self.description = Some(sanitize_field(description.as_deref()));
        if let Some(work_type) = work_type {
            self.work_type = sanitize_field(Some(&work_type));
        }
        self.employment_type = sanitize_field(employment_type.as_deref());
        self.advance(RecordStage::DetailFetched);
    }

    /// Terminal outcome for a walled detail page.
    pub fn mark_blocked(&mut self) {
        self.description = Some(CAPTCHA_BLOCKED.to_string());
        self.work_type = NOT_AVAILABLE.to_string();
        self.employment_type = NOT_AVAILABLE.to_string();
        self.advance(RecordStage::DetailFetched);
    }

    pub fn is_blocked(&self) -> bool {
        self.description.as_deref() == Some(CAPTCHA_BLOCKED)
    }

    /// Description as stored; the sentinel when the detail fetch never ran.
    pub fn description_or_sentinel(&self) -> &str {
        self.description.as_deref().unwrap_or(NOT_AVAILABLE)
    }

    /// True when the description contains any of `words`, ignoring case.
    /// Sentinel descriptions never match.
    pub fn description_matches(&self, words: &[String]) -> bool {
        let Some(description) = self.description.as_deref() else {
            return false;
        };
        if is_sentinel(description) {
            return false;
        }
        let lowered = description.to_lowercase();
        words
            .iter()
            .filter(|w| !w.trim().is_empty())
            .any(|w| lowered.contains(&w.trim().to_lowercase()))
    }
}

/// One keyword/location/source search with its recency window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTask {
    pub keyword: String,
    pub location: String,
    pub recency_window: Duration,
    pub source: Source,
}

impl SearchTask {
    pub fn new(keyword: &str, location: &str, recency_window: Duration, source: Source) -> Self {
        Self {
            keyword: keyword.trim().to_string(),
            location: location.trim().to_string(),
            recency_window,
            source,
        }
    }
}
