//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit and integration tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;

use crate::config::{ExecutorConfig, PoolConfig, RetryPolicy};
use crate::error::AppError;
use crate::events::{RequestEvent, RequestReporter};
use crate::models::{
    CandidateJob, EmploymentType, JobFilter, Provenance, RawPage, fingerprint, job_id,
};
use crate::traits::{
    CircuitControl, Fetcher, JobStore, RenderRequest, RenderSession, RenderedPage, Renderer,
    SessionOptions,
};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

type FetchHandler = Arc<dyn Fn(&str) -> Result<RawPage, AppError> + Send + Sync>;

/// Mock fetcher with a response queue, an optional URL handler and a delay.
#[derive(Clone)]
pub struct MockFetcher {
    /// Queue of responses. Each call pops the first element.
    /// If empty, the handler answers, or else the default body is returned.
    responses: Arc<Mutex<Vec<Result<RawPage, AppError>>>>,
    handler: Option<FetchHandler>,
    default_body: String,
    calls: Arc<Mutex<Vec<String>>>,
    delay: Duration,
}

impl MockFetcher {
    /// Every call returns `html` with status 200.
    pub fn new(html: &str) -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            handler: None,
            default_body: html.to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
        }
    }

    pub fn with_responses(responses: Vec<Result<RawPage, AppError>>) -> Self {
        let fetcher = Self::new("<html><body>default</body></html>");
        *fetcher.responses.lock().unwrap() = responses;
        fetcher
    }

    /// Answer every call by URL.
    pub fn with_handler(
        handler: impl Fn(&str) -> Result<RawPage, AppError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Some(Arc::new(handler)),
            ..Self::new("")
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<RawPage, AppError> {
        self.calls.lock().unwrap().push(url.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let queued = {
            let mut responses = self.responses.lock().unwrap();
            (!responses.is_empty()).then(|| responses.remove(0))
        };
        let result = match (queued, &self.handler) {
            (Some(response), _) => response,
            (None, Some(handler)) => handler(url),
            (None, None) => Ok(html_page(&self.default_body)),
        };
        result.map(|mut page| {
            if page.url.is_empty() {
                page.url = url.to_string();
            }
            page
        })
    }
}

/// An empty page with the given status.
pub fn status_page(status: u16) -> RawPage {
    RawPage::new("", status, "")
}

/// A 200 page with the given body.
pub fn html_page(body: &str) -> RawPage {
    RawPage::new("", 200, body)
}

// ---------------------------------------------------------------------------
// MockRenderer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RendererState {
    pages: Mutex<Vec<Result<RenderedPage, AppError>>>,
    session_options: Mutex<Vec<SessionOptions>>,
    rendered_urls: Mutex<Vec<String>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    shut_down: AtomicBool,
}

/// Mock renderer recording session lifecycle and rendered URLs.
#[derive(Clone, Default)]
pub struct MockRenderer {
    state: Arc<RendererState>,
    fail_open: bool,
    delay: Duration,
}

impl MockRenderer {
    /// Sessions render an empty page unless pages are queued.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    /// Queue of render results shared by every session.
    pub fn with_pages(pages: Vec<Result<RenderedPage, AppError>>) -> Self {
        let renderer = Self::default();
        *renderer.state.pages.lock().unwrap() = pages;
        renderer
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn session_options(&self) -> Vec<SessionOptions> {
        self.state.session_options.lock().unwrap().clone()
    }

    pub fn rendered_urls(&self) -> Vec<String> {
        self.state.rendered_urls.lock().unwrap().clone()
    }

    pub fn was_shut_down(&self) -> bool {
        self.state.shut_down.load(Ordering::SeqCst)
    }
}

pub struct MockSession {
    state: Arc<RendererState>,
    delay: Duration,
}

impl RenderSession for MockSession {
    async fn render(&self, request: &RenderRequest<'_>) -> Result<RenderedPage, AppError> {
        self.state
            .rendered_urls
            .lock()
            .unwrap()
            .push(request.url.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let queued = {
            let mut pages = self.state.pages.lock().unwrap();
            (!pages.is_empty()).then(|| pages.remove(0))
        };
        queued
            .unwrap_or_else(|| Ok(rendered_page("<html><body></body></html>")))
            .map(|mut page| {
                if page.url.is_empty() {
                    page.url = request.url.to_string();
                }
                page
            })
    }

    fn close(self) -> impl std::future::Future<Output = ()> + Send + 'static {
        async move {
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Renderer for MockRenderer {
    type Session = MockSession;

    async fn open_session(&self, options: &SessionOptions) -> Result<MockSession, AppError> {
        if self.fail_open {
            return Err(AppError::BrowserLaunch("mock launch failure".into()));
        }
        self.state
            .session_options
            .lock()
            .unwrap()
            .push(options.clone());
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockSession {
            state: self.state.clone(),
            delay: self.delay,
        })
    }

    async fn shutdown(&self) {
        self.state.shut_down.store(true, Ordering::SeqCst);
    }
}

/// A rendered 200 page.
pub fn rendered_page(html: &str) -> RenderedPage {
    RenderedPage {
        url: String::new(),
        status: 200,
        html: html.to_string(),
        listings: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// In-memory job store, upserting by job id.
#[derive(Clone, Default)]
pub struct MockStore {
    jobs: Arc<Mutex<Vec<CandidateJob>>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<CandidateJob> {
        self.jobs.lock().unwrap().clone()
    }
}

impl JobStore for MockStore {
    async fn save_jobs(&self, jobs: &[CandidateJob]) -> Result<usize, AppError> {
        let mut stored = self.jobs.lock().unwrap();
        for job in jobs {
            match stored.iter_mut().find(|existing| existing.id == job.id) {
                Some(existing) => *existing = job.clone(),
                None => stored.push(job.clone()),
            }
        }
        Ok(jobs.len())
    }

    async fn search_jobs(&self, filter: &JobFilter) -> Result<Vec<CandidateJob>, AppError> {
        let stored = self.jobs.lock().unwrap();
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(stored
            .iter()
            .filter(|job| filter.matches(job))
            .take(limit)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// RecordingReporter
// ---------------------------------------------------------------------------

/// Reporter that records a short name per event.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<String>>,
}

impl RecordingReporter {
    /// `started`, `succeeded`, `failed`, `failed:retry` or `throttled`.
    pub fn names(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl RequestReporter for RecordingReporter {
    fn report(&self, event: RequestEvent<'_>) {
        let name = match event {
            RequestEvent::Started { .. } => "started",
            RequestEvent::Succeeded { .. } => "succeeded",
            RequestEvent::Failed {
                will_retry: true, ..
            } => "failed:retry",
            RequestEvent::Failed { .. } => "failed",
            RequestEvent::Throttled { .. } => "throttled",
        };
        self.events.lock().unwrap().push(name.to_string());
    }
}

// ---------------------------------------------------------------------------
// MockCircuit
// ---------------------------------------------------------------------------

/// Proxy hook counting circuit changes.
#[derive(Default)]
pub struct MockCircuit {
    changes: AtomicUsize,
}

impl MockCircuit {
    pub fn changes(&self) -> usize {
        self.changes.load(Ordering::SeqCst)
    }
}

impl CircuitControl for MockCircuit {
    fn proxy_url(&self) -> Option<String> {
        Some("socks5h://127.0.0.1:9050".into())
    }

    fn change_circuit(&self) -> BoxFuture<'_, Result<(), AppError>> {
        Box::pin(async move {
            self.changes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// No inter-request delay and an effectively unlimited rate.
pub fn fast_executor_config() -> ExecutorConfig {
    ExecutorConfig::default()
        .with_rate(1000, 1000)
        .with_inter_request_delay(Duration::ZERO)
        .with_timeout(Duration::from_secs(5))
}

/// Default retry count with millisecond backoff.
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy::default()
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
}

/// Default pool size without the settle delay.
pub fn fast_pool_config() -> PoolConfig {
    PoolConfig::default().with_settle_delay(Duration::ZERO, Duration::ZERO)
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// One organic result on a search results page.
#[derive(Debug, Clone)]
pub struct SerpItem {
    pub title: String,
    pub href: String,
    pub snippet: String,
}

pub fn serp_item(title: &str, href: &str, snippet: &str) -> SerpItem {
    SerpItem {
        title: title.to_string(),
        href: href.to_string(),
        snippet: snippet.to_string(),
    }
}

/// A results page in the markup the `google` source preset selects.
pub fn google_serp(items: &[SerpItem]) -> String {
    let results: String = items
        .iter()
        .map(|item| {
            format!(
                r#"<div class="g"><a href="{}"><h3>{}</h3></a><div class="VwiC3b">{}</div></div>"#,
                item.href, item.title, item.snippet
            )
        })
        .collect();
    format!(r#"<html><body><div id="search">{results}</div></body></html>"#)
}

/// A minimal candidate with the given identity and score.
pub fn candidate(title: &str, company: &str, confidence: f64) -> CandidateJob {
    sourced_candidate(title, company, confidence, "google", "test query")
}

pub fn sourced_candidate(
    title: &str,
    company: &str,
    confidence: f64,
    source: &str,
    query: &str,
) -> CandidateJob {
    let url = format!(
        "https://jobs.example/{}",
        fingerprint(title, company).replace(' ', "-")
    );
    CandidateJob {
        id: job_id(&fingerprint(title, company)),
        title: title.to_string(),
        company: company.to_string(),
        location: String::new(),
        description: String::new(),
        url: url.clone(),
        salary_text: None,
        salary: None,
        posted_date_text: None,
        posted_at: None,
        employment_type: EmploymentType::FullTime,
        remote: false,
        source: source.to_string(),
        query: query.to_string(),
        confidence,
        raw: serde_json::Value::Null,
        sources: vec![Provenance {
            source: source.to_string(),
            query: query.to_string(),
            url,
        }],
        discovered_at: Utc::now(),
    }
}
