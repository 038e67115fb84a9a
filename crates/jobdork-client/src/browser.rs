//! Headless Chromium rendering over the Chrome DevTools Protocol.
//!
//! One Chromium process backs every clone of [`ChromiumRenderer`]. A
//! [`ChromiumSession`] is a single tab that is navigated again for every
//! render; heavy resource types are blocked per tab through
//! `Network.setBlockedURLs`.

use std::path::PathBuf;
use std::sync::Arc;

use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{EnableParams, SetBlockedUrLsParams};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use jobdork_core::config::{ResourceKind, ResultSelectors};
use jobdork_core::error::AppError;
use jobdork_core::models::RenderedListing;
use jobdork_core::traits::{RenderRequest, RenderSession, RenderedPage, Renderer, SessionOptions};
use tokio::sync::Mutex;

use crate::fetcher::random_user_agent;

#[derive(Clone)]
pub struct ChromiumRenderer {
    browser: Arc<Mutex<Browser>>,
}

impl ChromiumRenderer {
    /// Launch headless Chromium.
    ///
    /// `CHROME_BIN` overrides the binary; otherwise a few well-known install
    /// locations are tried before leaving the lookup to `chromiumoxide`.
    pub async fn launch() -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();
        if let Some(bin) = find_chrome_binary() {
            tracing::info!(binary = %bin.display(), "Using Chrome binary");
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::BrowserLaunch(format!("browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserLaunch(e.to_string()))?;

        // The CDP handler must be polled for the connection to make progress.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser CDP handler error");
                    break;
                }
            }
        });

        tracing::info!("Headless browser launched");
        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
        })
    }
}

fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHROME_BIN").map(PathBuf::from)
        && path.exists()
    {
        return Some(path);
    }

    [
        // Snap's wrapper drops headless flags; use the real binary.
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|path| path.exists())
}

fn blocked_url_patterns(kinds: &[ResourceKind]) -> Vec<String> {
    kinds
        .iter()
        .flat_map(|kind| -> &'static [&'static str] {
            match kind {
                ResourceKind::Image => &["png", "jpg", "jpeg", "gif", "webp", "svg", "ico"],
                ResourceKind::Font => &["woff", "woff2", "ttf", "otf"],
                ResourceKind::Media => &["mp4", "webm", "mp3", "ogg", "wav"],
                ResourceKind::Stylesheet => &["css"],
            }
        })
        .map(|ext| format!("*.{ext}*"))
        .collect()
}

impl Renderer for ChromiumRenderer {
    type Session = ChromiumSession;

    async fn open_session(&self, options: &SessionOptions) -> Result<ChromiumSession, AppError> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::BrowserLaunch(format!("cannot open tab: {e}")))?;

        let user_agent = options
            .user_agent
            .clone()
            .unwrap_or_else(|| random_user_agent().to_string());
        page.execute(SetUserAgentOverrideParams::new(user_agent))
            .await
            .map_err(|e| AppError::BrowserLaunch(format!("cannot set user agent: {e}")))?;

        let patterns = blocked_url_patterns(&options.blocked_resources);
        if !patterns.is_empty() {
            page.execute(EnableParams::default())
                .await
                .map_err(|e| AppError::BrowserLaunch(format!("cannot enable network: {e}")))?;
            page.execute(SetBlockedUrLsParams::new(patterns))
                .await
                .map_err(|e| AppError::BrowserLaunch(format!("cannot block resources: {e}")))?;
        }

        Ok(ChromiumSession { page })
    }

    async fn shutdown(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            tracing::warn!(error = %e, "Failed to close browser");
            return;
        }
        if let Err(e) = browser.wait().await {
            tracing::warn!(error = %e, "Browser process did not exit cleanly");
        }
        tracing::info!("Headless browser closed");
    }
}

/// One browser tab.
pub struct ChromiumSession {
    page: Page,
}

impl RenderSession for ChromiumSession {
    async fn render(&self, request: &RenderRequest<'_>) -> Result<RenderedPage, AppError> {
        let url = request.url;
        let work = async {
            self.page
                .goto(url)
                .await
                .map_err(|e| AppError::Generic(format!("navigation to {url} failed: {e}")))?;
            self.page
                .wait_for_navigation()
                .await
                .map_err(|e| AppError::Generic(format!("navigation to {url} failed: {e}")))?;

            let html = self
                .page
                .content()
                .await
                .map_err(|e| AppError::Generic(format!("cannot read page content: {e}")))?;

            let listings = match request.selectors {
                Some(selectors) => self.listings(selectors).await?,
                None => Vec::new(),
            };

            let final_url = self.page.url().await.ok().flatten();
            Ok::<_, AppError>(RenderedPage {
                url: final_url.unwrap_or_else(|| url.to_string()),
                // CDP does not surface the document status on this path.
                status: 0,
                html,
                listings,
            })
        };

        tokio::time::timeout(request.timeout, work)
            .await
            .map_err(|_| AppError::Timeout(request.timeout.as_secs()))?
    }

    fn close(self) -> impl Future<Output = ()> + Send + 'static {
        async move {
            if let Err(e) = self.page.close().await {
                tracing::debug!(error = %e, "Failed to close tab");
            }
        }
    }
}

impl ChromiumSession {
    /// Run the listing script in the page and validate its output.
    async fn listings(&self, selectors: &ResultSelectors) -> Result<Vec<RenderedListing>, AppError> {
        let script = listing_script(selectors)?;
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| AppError::ParseError(format!("listing script failed: {e}")))?;
        let listings: Vec<RenderedListing> = result
            .into_value()
            .map_err(|e| AppError::ParseError(format!("listing script returned bad data: {e}")))?;
        Ok(listings
            .into_iter()
            .filter(|listing| listing.title.is_some() || listing.url.is_some())
            .collect())
    }
}

/// In-page script mapping each result block to a [`RenderedListing`].
fn listing_script(selectors: &ResultSelectors) -> Result<String, AppError> {
    let selectors = serde_json::to_string(selectors)?;
    Ok(format!(
        r#"(() => {{
  const s = {selectors};
  const pick = (root, sel) => {{
    if (!sel) return null;
    const el = root.querySelector(sel);
    const text = el ? el.textContent.replace(/\s+/g, " ").trim() : "";
    return text.length ? text : null;
  }};
  return Array.from(document.querySelectorAll(s.result_item)).map((item) => {{
    const link = item.querySelector(s.link) || item.closest("a[href]");
    return {{
      title: pick(item, s.title),
      company: pick(item, s.company),
      location: pick(item, s.location),
      url: link ? link.href : null,
      description: pick(item, s.snippet),
      salaryText: pick(item, s.salary),
      postedDateText: pick(item, s.posted),
    }};
  }});
}})()"#
    ))
}

#[cfg(test)]
mod tests {
    use jobdork_core::config::SourceConfig;

    use super::*;

    #[test]
    fn test_blocked_patterns_cover_requested_kinds() {
        let patterns = blocked_url_patterns(&[ResourceKind::Font, ResourceKind::Stylesheet]);
        assert!(patterns.contains(&"*.woff2*".to_string()));
        assert!(patterns.contains(&"*.css*".to_string()));
        assert!(!patterns.iter().any(|p| p.contains("png")));
        assert!(blocked_url_patterns(&[]).is_empty());
    }

    #[test]
    fn test_listing_script_embeds_selectors() {
        let script = listing_script(&SourceConfig::weworkremotely().selectors).unwrap();
        assert!(script.contains("\"result_item\":\"section.jobs li.new-listing-container"));
        assert!(script.contains("salaryText"));
        assert!(script.contains("postedDateText"));
        assert!(script.trim_end().ends_with("})()"));
    }
}
