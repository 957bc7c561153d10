// src/scraping/renderer.rs
//! Browser automation over the Chrome DevTools Protocol.
//!
//! [`Renderer`] owns one Chromium process and hands out [`ChromePage`]s, one
//! per task. Every page gets the stealth script, a realistic user agent and
//! the saved session before it is used.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::session::SessionState;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The page primitives the scraper needs. Implemented by [`ChromePage`]
/// and by in-memory fakes in tests.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// Number of elements matching a CSS selector.
    async fn count(&self, selector: &str) -> Result<usize>;

    async fn scroll_to_bottom(&self, container: &str) -> Result<()>;

    /// Serialized DOM of the current document.
    async fn content(&self) -> Result<String>;

    async fn screenshot(&self, path: &Path) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Polls until one of `selectors` matches or the timeout passes.
    /// Returns the selector that matched.
    async fn wait_for_any(&self, selectors: &[String], timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            for selector in selectors {
                if self.count(selector).await? > 0 {
                    return Ok(Some(selector.clone()));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Opens fresh pages that share one browsing context.
#[async_trait]
pub trait PageFactory: Send + Sync {
    type Page: BrowserPage + 'static;

    async fn open_page(&self) -> Result<Self::Page>;

    /// Makes sure pages can be opened, starting whatever backs them.
    async fn ready(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub headless: bool,
    pub user_agent: String,
    pub window: (u32, u32),
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            headless: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            window: (1920, 1080),
        }
    }
}

pub struct Renderer {
    browser: Browser,
    handler_task: JoinHandle<()>,
    settings: RendererSettings,
    session: Option<SessionState>,
}

impl Renderer {
    /// Launches Chromium. A session, when given, is installed on every page
    /// this renderer opens.
    pub async fn launch(settings: RendererSettings, session: Option<SessionState>) -> Result<Self> {
        let (width, height) = settings.window;
        let mut builder = BrowserConfig::builder()
            .window_size(width, height)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg(format!("--user-agent={}", settings.user_agent))
            .arg(format!("--lang={}", ACCEPT_LANGUAGE.split(',').next().unwrap_or("en-US")));
        if !settings.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("Invalid browser configuration: {}", e))?;

        info!(headless = settings.headless, "Launching browser");
        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("Browser handler event error: {}", e);
                }
            }
        });

        if let Some(session) = &session {
            info!(
                cookies = session.cookies.len(),
                origins = session.origins.len(),
                "Using saved browser session"
            );
        }

        Ok(Self {
            browser,
            handler_task,
            settings,
            session,
        })
    }

    pub async fn new_page(&self) -> Result<ChromePage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("Failed to open browser page")?;

        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
            .await
            .context("Failed to inject stealth script")?;

        let user_agent = SetUserAgentOverrideParams::builder()
            .user_agent(self.settings.user_agent.clone())
            .accept_language(ACCEPT_LANGUAGE)
            .build()
            .map_err(|e| anyhow!("Invalid user agent override: {}", e))?;
        page.execute(user_agent)
            .await
            .context("Failed to set user agent")?;

        if let Some(session) = &self.session {
            session.install(&page).await?;
        }

        Ok(ChromePage { page })
    }

    pub async fn close(mut self) -> Result<()> {
        self.browser.close().await.context("Failed to close browser")?;
        if let Err(e) = self.browser.wait().await {
            debug!("Browser process did not exit cleanly: {}", e);
        }
        self.handler_task.abort();
        Ok(())
    }
}

/// A [`Renderer`] that is launched on first use, so a run that finds nothing
/// to fetch never starts a browser.
pub struct LazyRenderer {
    settings: RendererSettings,
    session: Option<SessionState>,
    renderer: OnceCell<Renderer>,
}

impl LazyRenderer {
    pub fn new(settings: RendererSettings, session: Option<SessionState>) -> Self {
        Self {
            settings,
            session,
            renderer: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<&Renderer> {
        self.renderer
            .get_or_try_init(|| Renderer::launch(self.settings.clone(), self.session.clone()))
            .await
    }

    pub fn is_launched(&self) -> bool {
        self.renderer.initialized()
    }

    pub async fn close(self) -> Result<()> {
        match self.renderer.into_inner() {
            Some(renderer) => renderer.close().await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PageFactory for LazyRenderer {
    type Page = ChromePage;

    async fn open_page(&self) -> Result<ChromePage> {
        self.get().await?.new_page().await
    }

    async fn ready(&self) -> Result<()> {
        self.get().await.map(|_| ())
    }
}

pub struct ChromePage {
    page: Page,
}

impl ChromePage {
    pub fn inner(&self) -> &Page {
        &self.page
    }

    async fn evaluate<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T> {
        self.page
            .evaluate(script)
            .await
            .context("Script evaluation failed")?
            .into_value::<T>()
            .context("Unexpected script result")
    }
}

/// Quote a selector as a JavaScript string literal.
fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[async_trait]
impl BrowserPage for ChromePage {
    async fn goto(&self, url: &str) -> Result<()> {
        debug!(url = %url, "Navigating");
        self.page
            .goto(url)
            .await
            .with_context(|| format!("Navigation to {} failed", url))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self
            .page
            .url()
            .await
            .context("Failed to read page URL")?
            .unwrap_or_default())
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        let script = format!(
            "(() => {{ try {{ return document.querySelectorAll({}).length; }} catch (e) {{ return 0; }} }})()",
            js_string(selector)
        );
        self.evaluate(script).await
    }

    async fn scroll_to_bottom(&self, container: &str) -> Result<()> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (el) {{ el.scrollTop = el.scrollHeight; }} window.scrollTo(0, document.body.scrollHeight); return !!el; }})()",
            js_string(container)
        );
        let _: bool = self.evaluate(script).await?;
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        self.page.content().await.context("Failed to read page content")
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            crate::utils::ensure_dir_exists(parent).await?;
        }
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await
            .with_context(|| format!("Failed to save screenshot: {}", path.display()))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.page
            .clone()
            .close()
            .await
            .context("Failed to close page")
    }
}

/// Hides the usual automation fingerprints before any page script runs.
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
window.chrome = window.chrome || { runtime: {} };
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {
  window.navigator.permissions.query = (parameters) =>
    parameters.name === 'notifications'
      ? Promise.resolve({ state: typeof Notification !== 'undefined' ? Notification.permission : 'default' })
      : originalQuery(parameters);
}
if (typeof WebGLRenderingContext !== 'undefined') {
  const getParameter = WebGLRenderingContext.prototype.getParameter;
  WebGLRenderingContext.prototype.getParameter = function (parameter) {
    if (parameter === 37445) return 'Intel Inc.';
    if (parameter === 37446) return 'Intel Iris OpenGL Engine';
    return getParameter.call(this, parameter);
  };
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string("a[href*='/jobs/view/']"), "\"a[href*='/jobs/view/']\"");
        assert_eq!(js_string("span:contains(\"x\")"), "\"span:contains(\\\"x\\\")\"");
    }

    #[test]
    fn test_default_settings_are_headless() {
        let settings = RendererSettings::default();
        assert!(settings.headless);
        assert!(settings.user_agent.contains("Chrome/"));
        assert_eq!(settings.window, (1920, 1080));
    }
}
