// src/scraping/session.rs
//! Saved browser session (cookies and per-origin localStorage).
//!
//! The file layout is the common "storage state" JSON:
//! `{"cookies": [...], "origins": [{"origin": ..., "localStorage": [...]}]}`.
//! A session is captured once by an interactive login and loaded explicitly
//! at the start of every run. Nothing refreshes it; a login wall on a detail
//! page means it is time to capture again.

use anyhow::{anyhow, Context, Result};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, CookieSameSite, SetCookiesParams, TimeSinceEpoch};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::Page;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use super::renderer::{BrowserPage, Renderer, RendererSettings};
use crate::utils::{read_file_safe, write_file_safe};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Seconds since the epoch; -1 for a browser-session cookie.
    #[serde(default = "session_expiry")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_path() -> String {
    "/".to_string()
}

fn session_expiry() -> f64 {
    -1.0
}

impl SessionCookie {
    pub fn is_expired(&self, now_epoch_secs: f64) -> bool {
        self.expires > 0.0 && self.expires < now_epoch_secs
    }

    fn to_param(&self) -> Result<CookieParam> {
        let mut builder = CookieParam::builder()
            .name(self.name.clone())
            .value(self.value.clone())
            .domain(self.domain.clone())
            .path(self.path.clone())
            .secure(self.secure)
            .http_only(self.http_only);
        if self.expires > 0.0 {
            builder = builder.expires(TimeSinceEpoch::new(self.expires));
        }
        if let Some(same_site) = self.same_site.as_deref().and_then(|s| s.parse::<CookieSameSite>().ok()) {
            builder = builder.same_site(same_site);
        }
        builder
            .build()
            .map_err(|e| anyhow!("Invalid cookie {}: {}", self.name, e))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageItem {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginStorage {
    pub origin: String,
    #[serde(default)]
    pub local_storage: Vec<StorageItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub cookies: Vec<SessionCookie>,
    #[serde(default)]
    pub origins: Vec<OriginStorage>,
}

impl SessionState {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = read_file_safe(path).await?;
        let state: SessionState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session file: {}", path.display()))?;

        let expired = state.expired_cookies(chrono::Utc::now().timestamp() as f64);
        if expired > 0 {
            warn!(
                expired,
                total = state.cookies.len(),
                "Saved session has expired cookies; capture a new one if detail pages hit a login wall"
            );
        }

        info!(
            "Loaded session from {} ({} cookies)",
            path.display(),
            state.cookies.len()
        );
        Ok(state)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize session")?;
        write_file_safe(path, &content).await?;
        info!("Saved session to {}", path.display());
        Ok(())
    }

    pub fn expired_cookies(&self, now_epoch_secs: f64) -> usize {
        self.cookies
            .iter()
            .filter(|c| c.is_expired(now_epoch_secs))
            .count()
    }

    /// Script that seeds localStorage for whichever saved origin the
    /// document belongs to. Existing keys are left alone.
    pub fn local_storage_script(&self) -> Option<String> {
        let seeds: HashMap<&str, Vec<(&str, &str)>> = self
            .origins
            .iter()
            .filter(|o| !o.local_storage.is_empty())
            .map(|o| {
                let items = o
                    .local_storage
                    .iter()
                    .map(|i| (i.name.as_str(), i.value.as_str()))
                    .collect();
                (o.origin.as_str(), items)
            })
            .collect();
        if seeds.is_empty() {
            return None;
        }

        let seeds = serde_json::to_string(&seeds).ok()?;
        Some(format!(
            "(() => {{ const seeds = {seeds}; const items = seeds[window.location.origin]; if (!items) return; for (const [k, v] of items) {{ try {{ if (window.localStorage.getItem(k) === null) window.localStorage.setItem(k, v); }} catch (e) {{}} }} }})();"
        ))
    }

    /// CDP parameters for every cookie still valid at `now_epoch_secs`.
    /// Each carries its domain and no URL, so it can be set from any page,
    /// `about:blank` included.
    pub fn cookie_params(&self, now_epoch_secs: f64) -> Result<Vec<CookieParam>> {
        self.cookies
            .iter()
            .filter(|c| !c.is_expired(now_epoch_secs))
            .map(SessionCookie::to_param)
            .collect()
    }

    /// Puts the cookies into the page's browsing context and registers the
    /// localStorage seed script.
    pub async fn install(&self, page: &Page) -> Result<()> {
        let params = self.cookie_params(chrono::Utc::now().timestamp() as f64)?;
        if !params.is_empty() {
            page.execute(SetCookiesParams::new(params))
                .await
                .context("Failed to install session cookies")?;
        }

        if let Some(script) = self.local_storage_script() {
            page.execute(AddScriptToEvaluateOnNewDocumentParams::new(script))
                .await
                .context("Failed to install localStorage seed")?;
        }
        Ok(())
    }

    /// Reads cookies and the current origin's localStorage from a live page.
    pub async fn capture(page: &Page) -> Result<Self> {
        let cookies = page
            .get_cookies()
            .await
            .context("Failed to read cookies")?
            .into_iter()
            .map(|c| SessionCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires: c.expires,
                http_only: c.http_only,
                secure: c.secure,
                same_site: c.same_site.map(|s| format!("{:?}", s)),
            })
            .collect();

        let origin: String = page
            .evaluate("window.location.origin")
            .await
            .context("Failed to read page origin")?
            .into_value()
            .context("Unexpected origin value")?;
        let entries: Vec<(String, String)> = page
            .evaluate("Object.entries(window.localStorage)")
            .await
            .context("Failed to read localStorage")?
            .into_value()
            .context("Unexpected localStorage value")?;

        let origins = if entries.is_empty() {
            Vec::new()
        } else {
            vec![OriginStorage {
                origin,
                local_storage: entries
                    .into_iter()
                    .map(|(name, value)| StorageItem { name, value })
                    .collect(),
            }]
        };

        Ok(Self { cookies, origins })
    }
}

/// One-time interactive login: opens a visible browser on the login page,
/// waits for ENTER on stdin, then writes the session to `path`.
pub async fn capture_interactive(login_url: &str, path: &Path, user_agent: Option<String>) -> Result<SessionState> {
    let mut settings = RendererSettings {
        headless: false,
        ..RendererSettings::default()
    };
    if let Some(user_agent) = user_agent {
        settings.user_agent = user_agent;
    }

    let renderer = Renderer::launch(settings, None).await?;
    let page = renderer.new_page().await?;
    page.goto(login_url).await?;

    println!("Log in within the browser window, then press ENTER here...");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read from stdin")?;

    let state = SessionState::capture(page.inner()).await?;
    state.save(path).await?;
    page.close().await?;
    renderer.close().await?;

    println!("✓ Session saved to {} ({} cookies)", path.display(), state.cookies.len());
    Ok(state)
}
