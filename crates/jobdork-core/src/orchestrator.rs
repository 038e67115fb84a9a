//! Scrape sessions: query iteration, pagination, quota, block handling.
//!
//! A session walks every configured source, every synthesized query and
//! every page up to `ceil(max_results / results_per_page)`. A query ends on
//! the first page that yields no new candidate or on a block signal; the
//! session ends when the quota is reached or it is cancelled. Candidates are
//! deduplicated once, at the end.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::browser_pool::BrowserPool;
use crate::config::{ScrapeConfig, SourceConfig, SourceKind};
use crate::dedupe::{DedupeResult, dedupe};
use crate::error::{AppError, ScrapingError};
use crate::events::RequestReporter;
use crate::executor::RequestExecutor;
use crate::extract::{QueryContext, ResultExtractor, matches_criteria};
use crate::models::{
    CandidateJob, FetchTarget, ScrapeMetadata, ScrapeResult, ScrapeStats, SearchCriteria,
    success_rate,
};
use crate::query::{DorkQuery, QuerySynthesizer};
use crate::strategy::HybridSelector;
use crate::traits::{CircuitControl, Fetcher, JobStore, NullRenderer, Renderer};

/// Errors kept in `ScrapeStats::recent_errors`.
const RECENT_ERRORS: usize = 10;

#[derive(Default)]
struct SessionState {
    running: AtomicBool,
    errors: Mutex<Vec<ScrapingError>>,
    cancel: Mutex<CancellationToken>,
}

impl SessionState {
    fn lock_errors(&self) -> MutexGuard<'_, Vec<ScrapingError>> {
        self.errors.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned session error list");
            poisoned.into_inner()
        })
    }

    fn lock_cancel(&self) -> MutexGuard<'_, CancellationToken> {
        self.cancel.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned session token");
            poisoned.into_inner()
        })
    }
}

/// Clears the running flag on every exit path of a session.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cancels the session token once the deadline passes.
struct DeadlineTimer(tokio::task::JoinHandle<()>);

impl DeadlineTimer {
    fn start(deadline: Duration, token: CancellationToken) -> Self {
        Self(tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(deadline) => {
                    tracing::warn!(deadline_ms = %deadline.as_millis(), "Session deadline reached, cancelling");
                    token.cancel();
                }
            }
        }))
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Candidates gathered during a session, with the quota counted on unique
/// fingerprints.
struct Accumulator {
    candidates: Vec<CandidateJob>,
    seen: HashSet<String>,
    max_results: usize,
}

impl Accumulator {
    fn new(max_results: usize) -> Self {
        Self {
            candidates: Vec::new(),
            seen: HashSet::new(),
            max_results,
        }
    }

    /// Returns whether the candidate's fingerprint is new.
    fn push(&mut self, candidate: CandidateJob) -> bool {
        let fresh = self.seen.insert(candidate.fingerprint());
        self.candidates.push(candidate);
        fresh
    }

    fn quota_reached(&self) -> bool {
        self.seen.len() >= self.max_results
    }
}

/// Drives scrape sessions over a fetcher and an optional renderer.
pub struct ScrapeOrchestrator<F: Fetcher, R: Renderer = NullRenderer> {
    config: Arc<ScrapeConfig>,
    executor: RequestExecutor<F>,
    pool: Option<Arc<BrowserPool<R>>>,
    selector: HybridSelector<F, R>,
    synthesizer: QuerySynthesizer,
    circuit: Option<Arc<dyn CircuitControl>>,
    session: SessionState,
}

impl<F: Fetcher> ScrapeOrchestrator<F, NullRenderer> {
    /// Static fetching only.
    pub fn new(config: ScrapeConfig, fetcher: F) -> Self {
        Self::assemble(config, fetcher, None)
    }
}

impl<F: Fetcher, R: Renderer> ScrapeOrchestrator<F, R> {
    /// Static fetching with browser rendering as fallback.
    pub fn with_renderer(config: ScrapeConfig, fetcher: F, renderer: R) -> Self {
        Self::assemble(config, fetcher, Some(renderer))
    }

    fn assemble(config: ScrapeConfig, fetcher: F, renderer: Option<R>) -> Self {
        let executor = RequestExecutor::new(fetcher, config.executor.clone(), config.retry.clone());
        let pool = renderer.map(|renderer| Arc::new(BrowserPool::new(renderer, config.pool.clone())));
        let selector = build_selector(&config, &executor, &pool);
        Self {
            synthesizer: QuerySynthesizer::new(config.query.clone()),
            config: Arc::new(config),
            executor,
            pool,
            selector,
            circuit: None,
            session: SessionState::default(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn RequestReporter>) -> Self {
        self.executor = self.executor.with_reporter(reporter);
        self.selector = build_selector(&self.config, &self.executor, &self.pool);
        self
    }

    /// Rotate the proxy circuit on block detection and, if configured, on a schedule.
    pub fn with_circuit(mut self, circuit: Arc<dyn CircuitControl>) -> Self {
        self.circuit = Some(circuit);
        self
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    pub fn synthesizer(&self) -> &QuerySynthesizer {
        &self.synthesizer
    }

    /// Run one session. Only one session runs at a time per orchestrator.
    pub async fn scrape(&self, criteria: &SearchCriteria) -> Result<ScrapeResult, AppError> {
        self.scrape_with_cancel(criteria, &CancellationToken::new())
            .await
    }

    /// Run one session that also ends when `cancel` fires.
    ///
    /// Cancellation is not an error: the jobs gathered so far are returned
    /// with `metadata.cancelled` set.
    pub async fn scrape_with_cancel(
        &self,
        criteria: &SearchCriteria,
        cancel: &CancellationToken,
    ) -> Result<ScrapeResult, AppError> {
        criteria.validate()?;
        // The token is swapped under the same lock `stop` takes, so a stop
        // that sees the session running always cancels this session's token.
        let token = {
            let mut current = self.session.lock_cancel();
            if self
                .session
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(AppError::SessionBusy);
            }
            let token = cancel.child_token();
            *current = token.clone();
            token
        };
        let _running = RunningGuard(&self.session.running);

        let session_id = Uuid::new_v4();
        self.session.lock_errors().clear();
        self.executor.begin_session().await;
        let _deadline = self
            .config
            .session_deadline
            .map(|deadline| DeadlineTimer::start(deadline, token.clone()));

        let started = Instant::now();
        tracing::info!(
            %session_id,
            keywords = ?criteria.clean_keywords(),
            max_results = criteria.max_results,
            "Scrape session started"
        );

        if let Some(pool) = &self.pool {
            pool.warm().await?;
        }

        let mut acc = Accumulator::new(criteria.max_results);
        let mut queries_executed = 0;
        'sources: for source in &self.config.sources {
            for query in self.queries_for(source, criteria) {
                if token.is_cancelled() || acc.quota_reached() {
                    break 'sources;
                }
                self.scheduled_rotation(queries_executed).await;
                queries_executed += 1;
                self.run_query(source, &query, criteria, &mut acc, &token)
                    .await;
            }
        }

        let cancelled = token.is_cancelled();
        let total_found = acc.candidates.len();
        let DedupeResult {
            unique: mut jobs,
            duplicates,
        } = dedupe(acc.candidates);
        jobs.truncate(criteria.max_results);

        let mut sources = BTreeMap::new();
        for job in &jobs {
            *sources.entry(job.source.clone()).or_insert(0) += 1;
        }

        let counters = self.executor.counters();
        let (total_requests, successful_requests) = (counters.total(), counters.successful());
        let metadata = ScrapeMetadata {
            session_id,
            total_found,
            duplicates: duplicates.len(),
            success_rate: success_rate(successful_requests, total_requests),
            duration_ms: started.elapsed().as_millis() as u64,
            errors: self.session.lock_errors().clone(),
            sources,
            queries_executed,
            total_requests,
            successful_requests,
            cancelled,
        };

        tracing::info!(
            %session_id,
            jobs = jobs.len(),
            total_found,
            duplicates = metadata.duplicates,
            errors = metadata.errors.len(),
            success_rate = %format!("{:.1}", metadata.success_rate),
            duration_ms = metadata.duration_ms,
            cancelled,
            "Scrape session finished"
        );
        Ok(ScrapeResult { jobs, metadata })
    }

    /// Run a session and hand the deduplicated jobs to `store`.
    ///
    /// Returns the result together with the number of jobs the store wrote.
    pub async fn scrape_into<S: JobStore>(
        &self,
        criteria: &SearchCriteria,
        store: &S,
    ) -> Result<(ScrapeResult, usize), AppError> {
        let result = self.scrape(criteria).await?;
        let saved = store.save_jobs(&result.jobs).await?;
        tracing::info!(saved, "Saved jobs");
        Ok((result, saved))
    }

    pub fn get_stats(&self) -> ScrapeStats {
        let counters = self.executor.counters();
        let (total_requests, successful_requests) = (counters.total(), counters.successful());
        let errors = self.session.lock_errors();
        ScrapeStats {
            is_running: self.session.running.load(Ordering::Acquire),
            total_requests,
            successful_requests,
            success_rate: success_rate(successful_requests, total_requests),
            error_count: errors.len(),
            recent_errors: errors[errors.len().saturating_sub(RECENT_ERRORS)..].to_vec(),
        }
    }

    /// Request cooperative cancellation of the running session.
    pub fn stop(&self) {
        let current = self.session.lock_cancel();
        if self.session.running.load(Ordering::Acquire) {
            tracing::info!("Stop requested");
        }
        current.cancel();
    }

    /// Close pooled browser sessions and the rendering engine.
    pub async fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
    }

    fn queries_for(&self, source: &SourceConfig, criteria: &SearchCriteria) -> Vec<String> {
        match source.kind {
            SourceKind::SearchEngine => self
                .synthesizer
                .generate(criteria)
                .iter()
                .map(DorkQuery::render)
                .collect(),
            SourceKind::JobBoard => vec![self.synthesizer.keyword_query(criteria)],
        }
    }

    async fn run_query(
        &self,
        source: &SourceConfig,
        query: &str,
        criteria: &SearchCriteria,
        acc: &mut Accumulator,
        cancel: &CancellationToken,
    ) {
        let ctx = QueryContext { source, query };
        let max_pages = criteria
            .max_results
            .div_ceil(source.results_per_page.max(1))
            .max(1);

        for page in 1..=max_pages as u32 {
            if cancel.is_cancelled() || acc.quota_reached() {
                return;
            }
            let target = FetchTarget {
                url: source.build_url(query, page),
                preference: source.preference,
                source: source.name.clone(),
                query: query.to_string(),
                page,
            };

            match self.selector.fetch(&target, &ctx, cancel).await {
                Ok(outcome) => {
                    for error in outcome.extraction.errors {
                        self.record_error(error);
                    }
                    let mut fresh = 0;
                    for candidate in outcome.extraction.candidates {
                        if matches_criteria(&candidate, criteria) && acc.push(candidate) {
                            fresh += 1;
                        }
                    }
                    tracing::debug!(
                        source = %source.name,
                        %query,
                        page,
                        fresh,
                        strategy = %outcome.strategy,
                        "Page processed"
                    );
                    if fresh == 0 {
                        return;
                    }
                }
                Err(AppError::Cancelled) => return,
                Err(e) if e.is_block_signal() => {
                    tracing::warn!(
                        source = %source.name,
                        %query,
                        page,
                        error = %e,
                        "Blocking detected, abandoning query"
                    );
                    self.record_error(ScrapingError::from_app_error(&e, Some(&target.url)));
                    self.rotate_circuit("block detected").await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(url = %target.url, error = %e, "Fetch target failed");
                    self.record_error(ScrapingError::from_app_error(&e, Some(&target.url)));
                }
            }
        }
    }

    fn record_error(&self, error: ScrapingError) {
        let mut errors = self.session.lock_errors();
        if errors.len() < self.config.max_errors {
            errors.push(error);
        } else {
            tracing::debug!(%error, "Session error list full, dropping error");
        }
    }

    async fn scheduled_rotation(&self, queries_executed: usize) {
        if let Some(every) = self.config.rotate_circuit_every
            && every > 0
            && queries_executed > 0
            && queries_executed % every == 0
        {
            self.rotate_circuit("scheduled").await;
        }
    }

    async fn rotate_circuit(&self, reason: &str) {
        let Some(circuit) = &self.circuit else {
            return;
        };
        match circuit.change_circuit().await {
            Ok(()) => tracing::info!(reason, "Proxy circuit changed"),
            Err(e) => tracing::warn!(reason, error = %e, "Failed to change proxy circuit"),
        }
    }
}

fn build_selector<F: Fetcher, R: Renderer>(
    config: &ScrapeConfig,
    executor: &RequestExecutor<F>,
    pool: &Option<Arc<BrowserPool<R>>>,
) -> HybridSelector<F, R> {
    HybridSelector::new(
        executor.clone(),
        pool.clone(),
        ResultExtractor::new(config.weights.clone(), config.job_sites.clone()),
        config.strategy.clone(),
    )
}
