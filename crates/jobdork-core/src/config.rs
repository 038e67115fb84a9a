//! Configuration values for a scrape session.
//!
//! All structs carry sensible `Default`s and `with_*` builders. Per-site
//! behaviour (URL building, selectors, strategy preference) is plain data in
//! [`SourceConfig`], not code.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::StrategyPreference;

/// Request executor politeness settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Token refill rate of each per-domain bucket.
    pub requests_per_second: u32,
    /// Bucket capacity.
    pub burst: u32,
    /// Longest a call may wait for a token before failing with `RateLimitExceeded`.
    pub max_limiter_wait: Duration,
    /// Minimum gap between consecutive requests to the same domain,
    /// applied after the first request of a session.
    pub inter_request_delay: Duration,
    /// Hard timeout of a single fetch.
    pub timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 1,
            burst: 2,
            max_limiter_wait: Duration::from_secs(60),
            inter_request_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ExecutorConfig {
    pub fn with_rate(mut self, requests_per_second: u32, burst: u32) -> Self {
        self.requests_per_second = requests_per_second;
        self.burst = burst;
        self
    }

    pub fn with_max_limiter_wait(mut self, wait: Duration) -> Self {
        self.max_limiter_wait = wait;
        self
    }

    pub fn with_inter_request_delay(mut self, delay: Duration) -> Self {
        self.inter_request_delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Retry schedule with exponential backoff.
///
/// Delay before retry `k` (1-indexed) is `min(base * 2^(k-1), max_delay)`
/// plus up to `jitter_ratio` of that value.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base: Duration) -> Self {
        self.base_delay = base;
        self
    }

    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.max_delay = max;
        self
    }

    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Backoff before retry `attempt` (1-indexed), without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }

    /// Backoff before retry `attempt` with uniform jitter in `[0, jitter_ratio]`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter_ratio <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::random_range(0.0..=self.jitter_ratio);
        delay + delay.mul_f64(factor)
    }
}

/// Resource types a rendering session refuses to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Image,
    Font,
    Media,
    Stylesheet,
}

/// Browser session pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of pre-warmed sessions kept idle.
    pub size: usize,
    /// Per-render timeout, normally equal to the executor timeout.
    pub operation_timeout: Duration,
    /// Randomized wait after page load, lower bound.
    pub settle_min: Duration,
    /// Randomized wait after page load, upper bound.
    pub settle_max: Duration,
    pub blocked_resources: Vec<ResourceKind>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 3,
            operation_timeout: Duration::from_secs(30),
            settle_min: Duration::from_millis(500),
            settle_max: Duration::from_millis(1500),
            blocked_resources: vec![ResourceKind::Image, ResourceKind::Font, ResourceKind::Media],
        }
    }
}

impl PoolConfig {
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, min: Duration, max: Duration) -> Self {
        self.settle_min = min;
        self.settle_max = max.max(min);
        self
    }

    pub fn with_blocked_resources(mut self, kinds: Vec<ResourceKind>) -> Self {
        self.blocked_resources = kinds;
        self
    }

    pub(crate) fn settle_delay(&self) -> Duration {
        if self.settle_max <= self.settle_min {
            return self.settle_min;
        }
        let min = self.settle_min.as_millis() as u64;
        let max = self.settle_max.as_millis() as u64;
        Duration::from_millis(rand::random_range(min..=max))
    }
}

/// Hybrid fetch settings.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    /// A static page is sufficient when it yields at least this many candidates.
    pub min_candidates: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self { min_candidates: 1 }
    }
}

/// Query synthesis settings.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Site scopes in generation order.
    pub scopes: Vec<String>,
    /// Hard cap on generated queries, further bounded by `max_results`.
    pub max_queries: usize,
    /// Cap on keyword-subset variants.
    pub max_variants: usize,
    /// Scoped queries produced per variant.
    pub queries_per_variant: usize,
    pub file_types: Vec<String>,
    /// `inurl:` hints for the career-page query.
    pub career_url_hints: Vec<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            scopes: [
                "linkedin.com/jobs",
                "indeed.com",
                "glassdoor.com",
                "ziprecruiter.com",
                "monster.com",
                "dice.com",
                "wellfound.com",
                "weworkremotely.com",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            max_queries: 20,
            max_variants: 10,
            queries_per_variant: 3,
            file_types: vec!["pdf".into(), "doc".into(), "docx".into()],
            career_url_hints: vec!["careers".into()],
        }
    }
}

impl QueryConfig {
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_queries(mut self, max: usize) -> Self {
        self.max_queries = max;
        self
    }
}

/// Confidence scoring weights.
///
/// Values were tuned by inspecting result pages; tests rely on their relative
/// ordering only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub search_engine_base: f64,
    pub job_board_base: f64,
    pub job_keyword_in_title: f64,
    pub reputable_board: f64,
    pub hiring_language: f64,
    pub rich_description: f64,
    /// Description length (chars) that counts as rich.
    pub rich_description_len: usize,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            search_engine_base: 0.3,
            job_board_base: 0.5,
            job_keyword_in_title: 0.2,
            reputable_board: 0.2,
            hiring_language: 0.15,
            rich_description: 0.1,
            rich_description_len: 150,
        }
    }
}

/// Entry of the known-domain table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSite {
    /// Registrable domain, matched against the host and its subdomains.
    pub domain: String,
    pub name: String,
    /// Counts towards the reputable-board confidence bonus.
    pub reputable: bool,
    /// The first path segment of a posting URL is the hiring company (ATS hosts).
    pub company_in_path: bool,
}

impl JobSite {
    pub fn board(domain: &str, name: &str) -> Self {
        Self {
            domain: domain.to_string(),
            name: name.to_string(),
            reputable: true,
            company_in_path: false,
        }
    }

    pub fn ats(domain: &str, name: &str) -> Self {
        Self {
            domain: domain.to_string(),
            name: name.to_string(),
            reputable: true,
            company_in_path: true,
        }
    }

    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.trim_start_matches("www.");
        host == self.domain || host.ends_with(&format!(".{}", self.domain))
    }
}

pub fn default_job_sites() -> Vec<JobSite> {
    vec![
        JobSite::board("linkedin.com", "LinkedIn"),
        JobSite::board("indeed.com", "Indeed"),
        JobSite::board("glassdoor.com", "Glassdoor"),
        JobSite::board("ziprecruiter.com", "ZipRecruiter"),
        JobSite::board("monster.com", "Monster"),
        JobSite::board("dice.com", "Dice"),
        JobSite::board("wellfound.com", "Wellfound"),
        JobSite::board("angel.co", "AngelList"),
        JobSite::board("weworkremotely.com", "We Work Remotely"),
        JobSite::board("remoteok.com", "Remote OK"),
        JobSite::board("stackoverflow.com", "Stack Overflow Jobs"),
        JobSite::board("simplyhired.com", "SimplyHired"),
        JobSite::ats("greenhouse.io", "Greenhouse"),
        JobSite::ats("lever.co", "Lever"),
        JobSite::ats("workable.com", "Workable"),
        JobSite::ats("ashbyhq.com", "Ashby"),
    ]
}

/// Whether a source is a general search engine or a structured job board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Receives dork queries; candidates start at the low base confidence.
    SearchEngine,
    /// Receives plain keyword queries; candidates start at the structured base.
    JobBoard,
}

/// CSS selectors that locate result blocks and their fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSelectors {
    pub result_item: String,
    pub title: String,
    pub link: String,
    pub snippet: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub salary: Option<String>,
    pub posted: Option<String>,
}

/// Per-site data: where to send queries and how to read the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    /// Placeholders: `{query}` (url-encoded), `{page}` (1-indexed),
    /// `{offset}` (0-indexed result offset), `{per_page}`.
    pub url_template: String,
    pub results_per_page: usize,
    pub selectors: ResultSelectors,
    pub preference: StrategyPreference,
}

impl SourceConfig {
    pub fn google() -> Self {
        Self {
            name: "google".into(),
            kind: SourceKind::SearchEngine,
            url_template: "https://www.google.com/search?q={query}&num={per_page}&start={offset}"
                .into(),
            results_per_page: 10,
            selectors: ResultSelectors {
                result_item: "div.g".into(),
                title: "h3".into(),
                link: "a[href]".into(),
                snippet: "div.VwiC3b, span.aCOpRe, div[data-sncf]".into(),
                company: None,
                location: None,
                salary: None,
                posted: None,
            },
            preference: StrategyPreference::Auto,
        }
    }

    pub fn duckduckgo() -> Self {
        Self {
            name: "duckduckgo".into(),
            kind: SourceKind::SearchEngine,
            url_template: "https://html.duckduckgo.com/html/?q={query}&s={offset}".into(),
            results_per_page: 10,
            selectors: ResultSelectors {
                result_item: "div.result".into(),
                title: "a.result__a".into(),
                link: "a.result__a".into(),
                snippet: ".result__snippet".into(),
                company: None,
                location: None,
                salary: None,
                posted: None,
            },
            preference: StrategyPreference::StaticOnly,
        }
    }

    pub fn weworkremotely() -> Self {
        Self {
            name: "weworkremotely".into(),
            kind: SourceKind::JobBoard,
            url_template: "https://weworkremotely.com/remote-jobs/search?term={query}&page={page}"
                .into(),
            results_per_page: 25,
            selectors: ResultSelectors {
                result_item: "section.jobs li.new-listing-container, section.jobs li.feature"
                    .into(),
                title: "h4.new-listing__header__title, span.title".into(),
                link: "a[href*='/remote-jobs/']".into(),
                snippet: "p.new-listing__company-headquarters, span.region".into(),
                company: Some("p.new-listing__company-name, span.company".into()),
                location: Some("p.new-listing__company-headquarters, span.region".into()),
                salary: None,
                posted: Some("p.new-listing__header__icons__date, time".into()),
            },
            preference: StrategyPreference::Auto,
        }
    }

    /// Look up a built-in preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "google" => Some(Self::google()),
            "duckduckgo" | "ddg" => Some(Self::duckduckgo()),
            "weworkremotely" | "wwr" => Some(Self::weworkremotely()),
            _ => None,
        }
    }

    pub fn with_preference(mut self, preference: StrategyPreference) -> Self {
        self.preference = preference;
        self
    }

    pub fn with_results_per_page(mut self, per_page: usize) -> Self {
        self.results_per_page = per_page.max(1);
        self
    }

    pub fn with_url_template(mut self, template: impl Into<String>) -> Self {
        self.url_template = template.into();
        self
    }

    /// Build the URL for a query string and a 1-indexed page.
    pub fn build_url(&self, query: &str, page: u32) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        let page = page.max(1);
        let offset = (page as usize - 1) * self.results_per_page;
        self.url_template
            .replace("{query}", &encoded)
            .replace("{page}", &page.to_string())
            .replace("{offset}", &offset.to_string())
            .replace("{per_page}", &self.results_per_page.to_string())
    }
}

/// Everything an orchestrator needs, read-only once built.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub sources: Vec<SourceConfig>,
    pub executor: ExecutorConfig,
    pub retry: RetryPolicy,
    pub pool: PoolConfig,
    pub strategy: StrategyConfig,
    pub query: QueryConfig,
    pub weights: ConfidenceWeights,
    pub job_sites: Vec<JobSite>,
    /// Session error list is truncated beyond this many entries.
    pub max_errors: usize,
    /// Overall session deadline; `None` for no deadline.
    pub session_deadline: Option<Duration>,
    /// Rotate the proxy circuit every N executed queries, when a proxy is set.
    pub rotate_circuit_every: Option<usize>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            sources: vec![SourceConfig::google(), SourceConfig::weworkremotely()],
            executor: ExecutorConfig::default(),
            retry: RetryPolicy::default(),
            pool: PoolConfig::default(),
            strategy: StrategyConfig::default(),
            query: QueryConfig::default(),
            weights: ConfidenceWeights::default(),
            job_sites: default_job_sites(),
            max_errors: 100,
            session_deadline: None,
            rotate_circuit_every: None,
        }
    }
}

impl ScrapeConfig {
    pub fn with_sources(mut self, sources: Vec<SourceConfig>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_query(mut self, query: QueryConfig) -> Self {
        self.query = query;
        self
    }

    pub fn with_weights(mut self, weights: ConfidenceWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_session_deadline(mut self, deadline: Duration) -> Self {
        self.session_deadline = Some(deadline);
        self
    }

    pub fn with_circuit_rotation(mut self, every_n_queries: usize) -> Self {
        self.rotate_circuit_every = Some(every_n_queries.max(1));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(100), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_jitter_is_bounded() {
        let policy = RetryPolicy::default();
        for attempt in 1..=7 {
            let floor = policy.delay_for_attempt(attempt);
            for _ in 0..50 {
                let d = policy.backoff(attempt);
                assert!(d >= floor, "attempt {attempt}: {d:?} < {floor:?}");
                assert!(
                    d <= floor.mul_f64(1.1) + Duration::from_micros(1),
                    "attempt {attempt}: {d:?} above 110% of {floor:?}"
                );
            }
        }
    }

    #[test]
    fn test_settle_delay_in_range() {
        let config = PoolConfig::default();
        for _ in 0..50 {
            let d = config.settle_delay();
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1500));
        }
        let zero = PoolConfig::default().with_settle_delay(Duration::ZERO, Duration::ZERO);
        assert_eq!(zero.settle_delay(), Duration::ZERO);
    }

    #[test]
    fn test_build_url_placeholders() {
        let google = SourceConfig::google();
        assert_eq!(
            google.build_url("site:indeed.com \"rust dev\"", 3),
            "https://www.google.com/search?q=site%3Aindeed.com+%22rust+dev%22&num=10&start=20"
        );
        let wwr = SourceConfig::weworkremotely();
        assert!(wwr.build_url("rust", 2).ends_with("term=rust&page=2"));
    }

    #[test]
    fn test_job_site_host_matching() {
        let site = JobSite::ats("greenhouse.io", "Greenhouse");
        assert!(site.matches_host("boards.greenhouse.io"));
        assert!(site.matches_host("greenhouse.io"));
        assert!(!site.matches_host("notgreenhouse.io"));
        assert!(JobSite::board("indeed.com", "Indeed").matches_host("www.indeed.com"));
    }

    #[test]
    fn test_presets_by_name() {
        assert_eq!(SourceConfig::preset("DDG").unwrap().name, "duckduckgo");
        assert!(SourceConfig::preset("altavista").is_none());
    }
}
