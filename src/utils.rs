// src/utils.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use rand::Rng;
use std::path::Path;
use std::time::Duration;

use crate::error::ScrapeError;
use crate::types::job::NOT_AVAILABLE;

/// Strip the query string and fragment from a detail link. `identity_param`,
/// when the site has one and the link carries it, is the only parameter kept.
pub fn normalize_detail_url(url: &str, identity_param: Option<&str>) -> String {
    let url = url.trim();
    let url = url.split('#').next().unwrap_or_default();
    let (base, query) = url.split_once('?').unwrap_or((url, ""));
    let base = base.trim();
    if base.is_empty() {
        return String::new();
    }

    let Some(param) = identity_param else {
        return base.to_string();
    };
    let identity = query
        .split(['&', '?'])
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, value)| *key == param && !value.is_empty());
    match identity {
        Some((key, value)) => format!("{}?{}={}", base, key, value),
        None => base.to_string(),
    }
}

/// Collapse every run of whitespace (newlines included) into one space.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trim each line and drop blank runs, keeping paragraph breaks.
pub fn clean_multiline(text: &str) -> String {
    let mut lines = Vec::new();
    let mut previous_blank = true;
    for line in text.lines().map(clean_text) {
        if line.is_empty() {
            if !previous_blank {
                lines.push(String::new());
            }
            previous_blank = true;
        } else {
            lines.push(line);
            previous_blank = false;
        }
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Map missing or junk values onto the sentinel.
pub fn sanitize_field(value: Option<&str>) -> String {
    match value.map(str::trim) {
        None | Some("") => NOT_AVAILABLE.to_string(),
        Some(v) if v.eq_ignore_ascii_case("nan") || v.eq_ignore_ascii_case("none") => {
            NOT_AVAILABLE.to_string()
        }
        Some(v) => v.to_string(),
    }
}

/// Parse a posting date from ISO-8601 or the relative phrases job boards use
/// ("3 days ago", "Posted 30+ days ago", "today", "yesterday").
pub fn parse_posted_date(input: &str, today: NaiveDate) -> Result<NaiveDate, ScrapeError> {
    let parse_error = || ScrapeError::Parse {
        field: "posted_date",
        input: input.to_string(),
    };

    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(parse_error());
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(datetime.date_naive());
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Ok(datetime.date());
    }

    let lowered = trimmed.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();
    if ["just now", "just posted", "today"]
        .iter()
        .any(|phrase| lowered.contains(phrase))
        || words.contains(&"new")
    {
        return Ok(today);
    }
    if lowered.contains("yesterday") {
        return Ok(today - ChronoDuration::days(1));
    }

    if !words.contains(&"ago") {
        return Err(parse_error());
    }

    for pair in words.windows(2) {
        let Ok(amount) = pair[0].trim_end_matches('+').parse::<i64>() else {
            continue;
        };
        let unit = pair[1];
        let days = if unit.starts_with("min") || unit.starts_with("hour") || unit.starts_with("hr") {
            0
        } else if unit.starts_with("day") {
            amount
        } else if unit.starts_with("week") {
            amount * 7
        } else if unit.starts_with("month") {
            amount * 30
        } else {
            continue;
        };
        return Ok(today - ChronoDuration::days(days));
    }

    Err(parse_error())
}

/// Uniformly random duration in `[min, max]`.
pub fn jitter(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    rand::thread_rng().gen_range(min..=max)
}

/// Sleep for a jittered duration; a zero range returns immediately.
pub async fn random_delay(min: Duration, max: Duration) {
    let delay = jitter(min, max);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

// File system utilities
pub async fn ensure_dir_exists(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create directory: {}", path.display()))
}

pub async fn write_file_safe(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir_exists(parent).await?;
    }

    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write file: {}", path.display()))
}

pub async fn read_file_safe(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read file: {}", path.display()))
}

/// File name safe slug, used for failure screenshots.
pub fn slugify(text: &str) -> String {
    let slug: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let slug = slug
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    slug.chars().rev().take(80).collect::<Vec<_>>().into_iter().rev().collect()
}
