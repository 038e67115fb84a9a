use std::time::{Duration, Instant};

use jobdork_core::error::AppError;
use jobdork_core::models::RawPage;
use jobdork_core::traits::{CircuitControl, Fetcher};
use rand::prelude::IndexedRandom;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Proxy};

/// Desktop browser user agents, one picked per request.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.4; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// HTTP fetcher using reqwest.
///
/// Returns every response as a [`RawPage`], whatever its status; the request
/// executor decides what a 403 or a 429 means. Each request carries a browser
/// user agent drawn from [`USER_AGENTS`]. Fetches can be routed through a
/// SOCKS or HTTP proxy with [`with_proxy`](Self::with_proxy).
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout: Duration,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        Self::build(timeout, None)
    }

    /// Route every fetch through `proxy_url` (`socks5h://127.0.0.1:9050`, `http://proxy:3128`).
    pub fn with_proxy(self, proxy_url: &str) -> Result<Self, AppError> {
        let proxy = Proxy::all(proxy_url)
            .map_err(|e| AppError::NetworkError(format!("Invalid proxy {proxy_url}: {e}")))?;
        tracing::info!(proxy = %proxy_url, "Routing fetches through proxy");
        Self::build(self.timeout, Some(proxy))
    }

    /// Build a fetcher routed through whatever proxy `circuit` exposes.
    pub fn for_circuit(timeout: Duration, circuit: &dyn CircuitControl) -> Result<Self, AppError> {
        let fetcher = Self::with_timeout(timeout)?;
        match circuit.proxy_url() {
            Some(proxy_url) => fetcher.with_proxy(&proxy_url),
            None => Ok(fetcher),
        }
    }

    fn build(timeout: Duration, proxy: Option<Proxy>) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let mut builder = Client::builder().default_headers(headers).timeout(timeout);
        if let Some(proxy) = proxy {
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| AppError::NetworkError(format!("HTTP client error: {e}")))?;

        Ok(Self { client, timeout })
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<RawPage, AppError> {
        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, random_user_agent())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout.as_secs())
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to read response body: {e}")))?;

        tracing::debug!(
            %url,
            status,
            bytes = body.len(),
            elapsed_ms = %started.elapsed().as_millis(),
            "Fetched document"
        );

        let mut page = RawPage::new(final_url, status, body);
        page.elapsed = started.elapsed();
        Ok(page)
    }
}
