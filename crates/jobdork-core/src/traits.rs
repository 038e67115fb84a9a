use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::config::{ResourceKind, ResultSelectors};
use crate::error::AppError;
use crate::models::{CandidateJob, FetchTarget, JobFilter, RawPage, RenderedListing};

/// Fetches a document over HTTP.
///
/// Any HTTP response, whatever its status, is returned as a [`RawPage`];
/// only transport failures (DNS, connect, timeout) are errors.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<RawPage, AppError>> + Send;
}

/// Options applied to every page opened in a rendering session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub blocked_resources: Vec<ResourceKind>,
    pub user_agent: Option<String>,
}

/// One navigation inside a rendering session.
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    pub url: &'a str,
    pub timeout: Duration,
    /// When set, the session runs the typed listing extraction with these selectors.
    pub selectors: Option<&'a ResultSelectors>,
}

#[derive(Debug, Clone, Default)]
pub struct RenderedPage {
    pub url: String,
    pub status: u16,
    pub html: String,
    pub listings: Vec<RenderedListing>,
}

/// A live headless-browser context able to render pages one at a time.
pub trait RenderSession: Send + Sync + 'static {
    fn render(
        &self,
        request: &RenderRequest<'_>,
    ) -> impl Future<Output = Result<RenderedPage, AppError>> + Send;

    fn close(self) -> impl Future<Output = ()> + Send + 'static;
}

/// Factory for rendering sessions, owning the underlying engine.
pub trait Renderer: Send + Sync + Clone + 'static {
    type Session: RenderSession;

    fn open_session(
        &self,
        options: &SessionOptions,
    ) -> impl Future<Output = Result<Self::Session, AppError>> + Send;

    /// Tears down the engine. Sessions still open afterwards are invalid.
    fn shutdown(&self) -> impl Future<Output = ()> + Send;
}

/// One way of turning a [`FetchTarget`] into a [`RawPage`].
///
/// Loaders stamp the returned page with the strategy that produced it.
pub trait PageLoader: Send + Sync {
    fn load(
        &self,
        target: &FetchTarget,
        selectors: &ResultSelectors,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<RawPage, AppError>> + Send;
}

/// Persists deduplicated jobs.
pub trait JobStore: Send + Sync + Clone {
    /// Idempotent upsert keyed by job id. Returns the number of jobs written.
    fn save_jobs(&self, jobs: &[CandidateJob])
    -> impl Future<Output = Result<usize, AppError>> + Send;

    fn search_jobs(
        &self,
        filter: &JobFilter,
    ) -> impl Future<Output = Result<Vec<CandidateJob>, AppError>> + Send;
}

/// A no-op JobStore for use when persistence is not needed.
#[derive(Debug, Clone)]
pub struct NullStore;

impl JobStore for NullStore {
    async fn save_jobs(&self, _jobs: &[CandidateJob]) -> Result<usize, AppError> {
        Ok(0)
    }

    async fn search_jobs(&self, _filter: &JobFilter) -> Result<Vec<CandidateJob>, AppError> {
        Ok(vec![])
    }
}

/// Anonymizing proxy hook.
pub trait CircuitControl: Send + Sync {
    /// Proxy URL fetches should be routed through (e.g. `socks5h://127.0.0.1:9050`).
    fn proxy_url(&self) -> Option<String>;

    /// Request a fresh exit identity.
    fn change_circuit(&self) -> BoxFuture<'_, Result<(), AppError>>;
}

/// Renderer for builds without a browser engine. Every session open fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRenderer;

#[derive(Debug)]
pub struct NullSession;

impl RenderSession for NullSession {
    async fn render(&self, request: &RenderRequest<'_>) -> Result<RenderedPage, AppError> {
        Err(AppError::BrowserLaunch(format!(
            "no rendering engine available for {}",
            request.url
        )))
    }

    fn close(self) -> impl Future<Output = ()> + Send + 'static {
        async {}
    }
}

impl Renderer for NullRenderer {
    type Session = NullSession;

    async fn open_session(&self, _options: &SessionOptions) -> Result<NullSession, AppError> {
        Err(AppError::BrowserLaunch("no rendering engine available".into()))
    }

    async fn shutdown(&self) {}
}
