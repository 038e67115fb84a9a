//! Static and dynamic page loaders and the hybrid selector that chooses
//! between them.
//!
//! Per target the selector runs a small state machine:
//!
//! ```text
//! StaticAttempt --sufficient--> Done
//!       |  insufficient / error
//!       v
//! DynamicAttempt --ok--> Done
//!       |  error
//!       v
//!    Failed
//! ```
//!
//! Block signals and cancellation fail the target straight away; there is
//! never a third attempt and nothing is retried at this layer.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::browser_pool::BrowserPool;
use crate::config::{ResultSelectors, StrategyConfig};
use crate::error::AppError;
use crate::events::RequestEvent;
use crate::executor::{RequestExecutor, RequestOptions, check_page};
use crate::extract::{Extraction, QueryContext, ResultExtractor};
use crate::models::{FetchStrategy, FetchTarget, RawPage, StrategyPreference};
use crate::traits::{Fetcher, PageLoader, Renderer};

/// Plain HTTP fetch through the request executor, retries included.
#[derive(Clone)]
pub struct StaticLoader<F> {
    executor: RequestExecutor<F>,
}

impl<F: Fetcher> StaticLoader<F> {
    pub fn new(executor: RequestExecutor<F>) -> Self {
        Self { executor }
    }
}

impl<F: Fetcher> PageLoader for StaticLoader<F> {
    async fn load(
        &self,
        target: &FetchTarget,
        _selectors: &ResultSelectors,
        cancel: &CancellationToken,
    ) -> Result<RawPage, AppError> {
        let mut page = self
            .executor
            .execute_with_retry(&target.url, RequestOptions::default(), cancel)
            .await?;
        page.strategy = FetchStrategy::Static;
        Ok(page)
    }
}

/// Browser rendering through the session pool.
///
/// Shares the executor's per-domain permits and session counters, so a
/// rendered page is subject to the same politeness rules as a static fetch.
pub struct DynamicLoader<F, R: Renderer> {
    executor: RequestExecutor<F>,
    pool: Arc<BrowserPool<R>>,
}

impl<F: Fetcher, R: Renderer> DynamicLoader<F, R> {
    pub fn new(executor: RequestExecutor<F>, pool: Arc<BrowserPool<R>>) -> Self {
        Self { executor, pool }
    }
}

impl<F: Fetcher, R: Renderer> PageLoader for DynamicLoader<F, R> {
    async fn load(
        &self,
        target: &FetchTarget,
        selectors: &ResultSelectors,
        cancel: &CancellationToken,
    ) -> Result<RawPage, AppError> {
        let url = target.url.as_str();
        let _permit = self.executor.acquire_permit(url, cancel).await?;
        let reporter = self.executor.reporter();

        self.executor.counters().record_attempt();
        reporter.report(RequestEvent::Started { url, attempt: 1 });

        let started = Instant::now();
        let result = self
            .pool
            .render(url, Some(selectors), cancel)
            .await
            .and_then(|rendered| {
                let page = RawPage {
                    url: if rendered.url.is_empty() {
                        url.to_string()
                    } else {
                        rendered.url
                    },
                    // Renderers that cannot observe the response status report 0.
                    status: if rendered.status == 0 { 200 } else { rendered.status },
                    body: rendered.html,
                    elapsed: started.elapsed(),
                    strategy: FetchStrategy::Dynamic,
                    listings: rendered.listings,
                };
                check_page(url, &page)?;
                Ok(page)
            });

        match &result {
            Ok(page) => {
                self.executor.counters().record_success();
                reporter.report(RequestEvent::Succeeded {
                    url,
                    status: page.status,
                    elapsed: page.elapsed,
                });
            }
            Err(error) => reporter.report(RequestEvent::Failed {
                url,
                attempt: 1,
                error,
                will_retry: false,
            }),
        }
        result
    }
}

/// A fetched and extracted page.
#[derive(Debug)]
pub struct FetchOutcome {
    pub page: RawPage,
    pub extraction: Extraction,
    pub strategy: FetchStrategy,
}

enum FetchState {
    StaticAttempt,
    /// Carries the thin static result, kept if rendering fails.
    DynamicAttempt(Option<Box<FetchOutcome>>),
    Done(Box<FetchOutcome>),
    Failed(AppError),
}

/// Chooses static or dynamic loading per target, with a single fallback.
pub struct HybridSelector<F, R: Renderer> {
    static_loader: StaticLoader<F>,
    dynamic_loader: Option<DynamicLoader<F, R>>,
    extractor: ResultExtractor,
    config: StrategyConfig,
}

impl<F: Fetcher, R: Renderer> HybridSelector<F, R> {
    pub fn new(
        executor: RequestExecutor<F>,
        pool: Option<Arc<BrowserPool<R>>>,
        extractor: ResultExtractor,
        config: StrategyConfig,
    ) -> Self {
        Self {
            static_loader: StaticLoader::new(executor.clone()),
            dynamic_loader: pool.map(|pool| DynamicLoader::new(executor, pool)),
            extractor,
            config,
        }
    }

    fn can_render(&self, target: &FetchTarget) -> bool {
        self.dynamic_loader.is_some() && target.preference != StrategyPreference::StaticOnly
    }

    fn finish(&self, page: RawPage, ctx: &QueryContext<'_>) -> Box<FetchOutcome> {
        let extraction = self.extractor.extract(&page, ctx);
        Box::new(FetchOutcome {
            strategy: page.strategy,
            page,
            extraction,
        })
    }

    pub async fn fetch(
        &self,
        target: &FetchTarget,
        ctx: &QueryContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, AppError> {
        let selectors = &ctx.source.selectors;
        let mut state = match target.preference {
            StrategyPreference::DynamicOnly if self.dynamic_loader.is_some() => {
                FetchState::DynamicAttempt(None)
            }
            StrategyPreference::DynamicOnly => {
                tracing::warn!(url = %target.url, "No renderer configured, fetching statically");
                FetchState::StaticAttempt
            }
            _ => FetchState::StaticAttempt,
        };

        loop {
            state = match state {
                FetchState::StaticAttempt => {
                    match self.static_loader.load(target, selectors, cancel).await {
                        Ok(page) => {
                            let outcome = self.finish(page, ctx);
                            let found = outcome.extraction.candidates.len();
                            if found >= self.config.min_candidates || !self.can_render(target) {
                                FetchState::Done(outcome)
                            } else {
                                tracing::debug!(
                                    url = %target.url,
                                    found,
                                    "Static page insufficient, rendering"
                                );
                                FetchState::DynamicAttempt(Some(outcome))
                            }
                        }
                        Err(e)
                            if e.is_block_signal()
                                || matches!(e, AppError::Cancelled)
                                || !self.can_render(target) =>
                        {
                            FetchState::Failed(e)
                        }
                        Err(e) => {
                            tracing::debug!(url = %target.url, error = %e, "Static fetch failed, rendering");
                            FetchState::DynamicAttempt(None)
                        }
                    }
                }
                FetchState::DynamicAttempt(fallback) => {
                    let Some(loader) = &self.dynamic_loader else {
                        return Err(AppError::BrowserLaunch("no renderer configured".into()));
                    };
                    match loader.load(target, selectors, cancel).await {
                        Ok(page) => FetchState::Done(self.finish(page, ctx)),
                        Err(e) => match fallback {
                            Some(outcome) if !matches!(e, AppError::Cancelled) => {
                                tracing::warn!(
                                    url = %target.url,
                                    error = %e,
                                    "Rendering failed, keeping static page"
                                );
                                FetchState::Done(outcome)
                            }
                            _ => FetchState::Failed(e),
                        },
                    }
                }
                FetchState::Done(outcome) => return Ok(*outcome),
                FetchState::Failed(e) => return Err(e),
            };
        }
    }
}
