use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use jobdork_core::config::{ScrapeConfig, SourceConfig};
use jobdork_core::models::RawPage;
use jobdork_core::testutil::{
    MockFetcher, fast_executor_config, fast_pool_config, fast_retry_policy, google_serp, html_page,
    serp_item,
};

pub fn test_config(sources: Vec<SourceConfig>) -> ScrapeConfig {
    ScrapeConfig::default()
        .with_sources(sources)
        .with_executor(fast_executor_config())
        .with_retry(fast_retry_policy())
        .with_pool(fast_pool_config())
}

/// A SERP with postings `range`, each at its own company.
pub fn postings(range: std::ops::Range<usize>) -> RawPage {
    let items: Vec<_> = range
        .map(|i| {
            serp_item(
                &format!("Platform Engineer at Company {i}"),
                &format!("https://company{i}.example/jobs/{i}"),
                "Fully remote role. Apply now.",
            )
        })
        .collect();
    html_page(&google_serp(&items))
}

/// Fetcher serving `batch` fresh postings per call, `batches` times, then
/// empty pages.
pub fn batched_fetcher(batch: usize, batches: usize) -> MockFetcher {
    let served = Arc::new(AtomicUsize::new(0));
    MockFetcher::with_handler(move |_| {
        let n = served.fetch_add(1, Ordering::SeqCst);
        Ok(if n < batches {
            postings(n * batch..(n + 1) * batch)
        } else {
            html_page("<html><body></body></html>")
        })
    })
}

/// Fetcher that never runs out of fresh postings.
pub fn endless_fetcher() -> MockFetcher {
    batched_fetcher(10, usize::MAX)
}
