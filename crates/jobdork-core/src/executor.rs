//! Polite, retried request execution.
//!
//! Every call goes through three gates before touching the network:
//!
//! 1. the per-domain slot, held for the whole request so that calls to the
//!    same domain are strictly serialized;
//! 2. a per-domain token bucket (governor), waited on for at most
//!    `max_limiter_wait` before failing with [`AppError::RateLimitExceeded`];
//! 3. the inter-request delay, counted from the end of the previous request
//!    to that domain in the current session.
//!
//! Failures are classified through [`AppError::kind`] and retried with
//! exponential backoff by [`RequestExecutor::execute_with_retry`].

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{ExecutorConfig, RetryPolicy};
use crate::error::{AppError, ErrorKind, detect_block};
use crate::events::{NoopReporter, RequestEvent, RequestReporter};
use crate::models::RawPage;
use crate::traits::Fetcher;

type DomainLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;
type DomainSlots = Arc<Mutex<HashMap<String, Arc<Mutex<Option<Instant>>>>>>;

/// Per-call overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
}

impl RequestOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

/// Request counters of the current session.
#[derive(Debug, Default)]
pub struct SessionCounters {
    total: AtomicU64,
    successful: AtomicU64,
}

impl SessionCounters {
    pub fn record_attempt(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successful.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn successful(&self) -> u64 {
        self.successful.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.successful.store(0, Ordering::Relaxed);
    }
}

/// Exclusive right to issue one request to a domain.
///
/// Dropping the permit stamps the domain's last-request time.
pub struct DomainPermit {
    domain: String,
    last_request: OwnedMutexGuard<Option<Instant>>,
}

impl DomainPermit {
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl Drop for DomainPermit {
    fn drop(&mut self) {
        *self.last_request = Some(Instant::now());
    }
}

/// Rate-limited, retried fetch primitive shared by all loaders of a session.
#[derive(Clone)]
pub struct RequestExecutor<F> {
    fetcher: F,
    config: ExecutorConfig,
    retry: RetryPolicy,
    limiter: Arc<DomainLimiter>,
    slots: DomainSlots,
    counters: Arc<SessionCounters>,
    reporter: Arc<dyn RequestReporter>,
}

impl<F: Fetcher> RequestExecutor<F> {
    pub fn new(fetcher: F, config: ExecutorConfig, retry: RetryPolicy) -> Self {
        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rate).allow_burst(burst);
        Self {
            fetcher,
            config,
            retry,
            limiter: Arc::new(RateLimiter::keyed(quota)),
            slots: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(SessionCounters::default()),
            reporter: Arc::new(NoopReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn RequestReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn counters(&self) -> &Arc<SessionCounters> {
        &self.counters
    }

    pub(crate) fn reporter(&self) -> &dyn RequestReporter {
        self.reporter.as_ref()
    }

    /// Start a new session: counters are zeroed and every domain is treated
    /// as not yet contacted.
    pub async fn begin_session(&self) {
        self.counters.reset();
        self.slots.lock().await.clear();
    }

    /// Wait for the per-domain slot, a limiter token and the inter-request delay.
    pub async fn acquire_permit(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<DomainPermit, AppError> {
        let domain =
            domain_key(url).ok_or_else(|| AppError::ParseError(format!("Invalid URL: {url}")))?;
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(domain.clone()).or_default().clone()
        };

        let started = Instant::now();
        let last_request = tokio::select! {
            () = cancel.cancelled() => return Err(AppError::Cancelled),
            guard = slot.lock_owned() => guard,
        };

        tokio::select! {
            () = cancel.cancelled() => return Err(AppError::Cancelled),
            ready = tokio::time::timeout(
                self.config.max_limiter_wait,
                self.limiter.until_key_ready(&domain),
            ) => {
                if ready.is_err() {
                    tracing::warn!(%domain, "Rate limiter wait exhausted");
                    return Err(AppError::RateLimitExceeded);
                }
            }
        }

        if let Some(last) = *last_request {
            let elapsed = last.elapsed();
            if elapsed < self.config.inter_request_delay {
                let remaining = self.config.inter_request_delay - elapsed;
                tokio::select! {
                    () = cancel.cancelled() => return Err(AppError::Cancelled),
                    () = tokio::time::sleep(remaining) => {}
                }
            }
        }

        let waited = started.elapsed();
        if waited >= Duration::from_millis(1) {
            self.reporter.report(RequestEvent::Throttled {
                domain: &domain,
                waited,
            });
        }

        Ok(DomainPermit {
            domain,
            last_request,
        })
    }

    /// A single attempt, no retries.
    pub async fn fetch(
        &self,
        url: &str,
        options: RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<RawPage, AppError> {
        let result = self.attempt(url, options, cancel, 1).await;
        if let Err(e) = &result {
            self.reporter.report(RequestEvent::Failed {
                url,
                attempt: 1,
                error: e,
                will_retry: false,
            });
        }
        result
    }

    /// Fetch with the retry policy applied.
    ///
    /// Retry-eligible failures are retried up to `max_retries` times
    /// (`unknown` failures at most once); other failures surface immediately.
    pub async fn execute_with_retry(
        &self,
        url: &str,
        options: RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<RawPage, AppError> {
        let max_retries = options.max_retries.unwrap_or(self.retry.max_retries);
        let mut attempt = 1;

        loop {
            match self.attempt(url, options, cancel, attempt).await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    let will_retry = attempt <= retries_allowed(&e, max_retries);
                    self.reporter.report(RequestEvent::Failed {
                        url,
                        attempt,
                        error: &e,
                        will_retry,
                    });
                    if !will_retry {
                        return Err(e);
                    }

                    let delay = self.retry.backoff(attempt);
                    tracing::debug!(%url, %attempt, delay_ms = %delay.as_millis(), "Backing off before retry");
                    tokio::select! {
                        () = cancel.cancelled() => return Err(AppError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(
        &self,
        url: &str,
        options: RequestOptions,
        cancel: &CancellationToken,
        attempt: u32,
    ) -> Result<RawPage, AppError> {
        let _permit = self.acquire_permit(url, cancel).await?;
        let timeout = options.timeout.unwrap_or(self.config.timeout);

        self.counters.record_attempt();
        self.reporter.report(RequestEvent::Started { url, attempt });

        let started = Instant::now();
        let mut page = tokio::select! {
            () = cancel.cancelled() => return Err(AppError::Cancelled),
            result = tokio::time::timeout(timeout, self.fetcher.fetch(url)) => {
                result.map_err(|_| AppError::Timeout(timeout.as_secs()))??
            }
        };
        page.elapsed = started.elapsed();

        check_page(url, &page)?;

        self.counters.record_success();
        self.reporter.report(RequestEvent::Succeeded {
            url,
            status: page.status,
            elapsed: page.elapsed,
        });
        Ok(page)
    }
}

/// Converts error statuses and block pages into errors.
pub(crate) fn check_page(url: &str, page: &RawPage) -> Result<(), AppError> {
    if !page.is_success() {
        return Err(AppError::HttpStatus {
            status: page.status,
            url: url.to_string(),
        });
    }
    if let Some(marker) = detect_block(&page.body) {
        return Err(AppError::Blocked(format!("page contains \"{marker}\"")));
    }
    Ok(())
}

/// Number of retries an error is eligible for.
fn retries_allowed(error: &AppError, max_retries: u32) -> u32 {
    if !error.is_retryable() {
        0
    } else if error.kind() == ErrorKind::Unknown {
        max_retries.min(1)
    } else {
        max_retries
    }
}

/// Extract the domain key from a URL (scheme://host:port).
pub fn domain_key(url_str: &str) -> Option<String> {
    let url = Url::parse(url_str).ok()?;
    let host = url.host_str()?;
    let port = url
        .port_or_known_default()
        .map(|p| format!(":{p}"))
        .unwrap_or_default();
    Some(format!("{}://{}{}", url.scheme(), host, port))
}
