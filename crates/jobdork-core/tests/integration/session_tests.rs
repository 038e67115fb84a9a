use std::sync::Arc;
use std::time::Duration;

use jobdork_core::config::SourceConfig;
use jobdork_core::testutil::{
    MockCircuit, MockFetcher, MockRenderer, RecordingReporter, google_serp, html_page,
    rendered_page, serp_item, status_page,
};
use jobdork_core::{AppError, ErrorKind, ScrapeOrchestrator, SearchCriteria};

use crate::integration::common::{batched_fetcher, endless_fetcher, postings, test_config};

#[tokio::test]
async fn session_stops_at_quota() {
    let fetcher = batched_fetcher(6, 2);
    let orchestrator =
        ScrapeOrchestrator::new(test_config(vec![SourceConfig::google()]), fetcher.clone());

    let result = orchestrator
        .scrape(
            &SearchCriteria::new(["platform engineer"])
                .with_remote(true)
                .with_max_results(10),
        )
        .await
        .unwrap();

    assert_eq!(result.jobs.len(), 10);
    assert!(result.jobs.iter().all(|job| job.remote));
    assert!(result.jobs.iter().all(|job| job.source == "google"));
    assert_eq!(result.metadata.duplicates, 0);
    assert_eq!(result.metadata.total_found, 12);
    assert_eq!(result.metadata.queries_executed, 2);
    assert_eq!(fetcher.call_count(), 2);
    assert!((0.0..=100.0).contains(&result.metadata.success_rate));
    assert!(!result.metadata.cancelled);
}

#[tokio::test]
async fn rate_limited_query_is_abandoned() {
    let fetcher = MockFetcher::with_handler(|url| {
        Ok(if url.contains("start=10") {
            status_page(429)
        } else {
            postings(0..5)
        })
    });
    let circuit = Arc::new(MockCircuit::default());
    let orchestrator =
        ScrapeOrchestrator::new(test_config(vec![SourceConfig::google()]), fetcher.clone())
            .with_circuit(circuit.clone());

    let result = orchestrator
        .scrape(&SearchCriteria::new(["platform"]).with_max_results(30))
        .await
        .unwrap();

    let calls = fetcher.calls();
    assert!(!calls.iter().any(|url| url.contains("start=20")));
    // One attempt plus three retries.
    assert_eq!(calls.iter().filter(|url| url.contains("start=10")).count(), 4);
    assert_eq!(result.jobs.len(), 5);
    assert_eq!(result.metadata.errors.len(), 1);
    assert_eq!(result.metadata.errors[0].kind, ErrorKind::RateLimit);
    assert!(circuit.changes() >= 1);
}

#[tokio::test]
async fn stop_cancels_running_session() {
    let fetcher = endless_fetcher().with_delay(Duration::from_millis(40));
    let orchestrator = Arc::new(ScrapeOrchestrator::new(
        test_config(vec![SourceConfig::google()]),
        fetcher,
    ));
    let criteria = SearchCriteria::new(["platform"]).with_max_results(500);

    let handle = {
        let orchestrator = orchestrator.clone();
        let criteria = criteria.clone();
        tokio::spawn(async move { orchestrator.scrape(&criteria).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(orchestrator.get_stats().is_running);
    let busy = orchestrator.scrape(&criteria).await.unwrap_err();
    assert!(matches!(busy, AppError::SessionBusy));

    orchestrator.stop();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(result.metadata.cancelled);
    assert!(!result.jobs.is_empty());
    assert!(result.jobs.len() < 500);
    assert!(!orchestrator.get_stats().is_running);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_as_soon_as_session_is_running_is_not_lost() {
    let fetcher = endless_fetcher().with_delay(Duration::from_millis(20));
    let orchestrator = Arc::new(ScrapeOrchestrator::new(
        test_config(vec![SourceConfig::google()]),
        fetcher,
    ));

    let handle = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .scrape(&SearchCriteria::new(["platform"]).with_max_results(500))
                .await
        })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while !orchestrator.get_stats().is_running {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    orchestrator.stop();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(result.metadata.cancelled);
    assert!(result.jobs.len() < 500);
}

#[tokio::test]
async fn stop_without_a_session_does_not_cancel_the_next_one() {
    let orchestrator =
        ScrapeOrchestrator::new(test_config(vec![SourceConfig::google()]), batched_fetcher(6, 2));

    orchestrator.stop();
    let result = orchestrator
        .scrape(&SearchCriteria::new(["platform"]).with_max_results(10))
        .await
        .unwrap();

    assert!(!result.metadata.cancelled);
    assert_eq!(result.jobs.len(), 10);
}

#[tokio::test]
async fn deadline_ends_session_with_partial_results() {
    let fetcher = endless_fetcher().with_delay(Duration::from_millis(30));
    let config = test_config(vec![SourceConfig::google()])
        .with_session_deadline(Duration::from_millis(200));
    let orchestrator = ScrapeOrchestrator::new(config, fetcher);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.scrape(&SearchCriteria::new(["platform"]).with_max_results(500)),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(result.metadata.cancelled);
    assert!(!result.jobs.is_empty());
    assert!(result.jobs.len() < 500);
}

#[tokio::test]
async fn external_token_cancels_session() {
    let orchestrator =
        ScrapeOrchestrator::new(test_config(vec![SourceConfig::google()]), endless_fetcher());
    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();

    let result = orchestrator
        .scrape_with_cancel(&SearchCriteria::new(["platform"]), &cancel)
        .await
        .unwrap();

    assert!(result.metadata.cancelled);
    assert!(result.jobs.is_empty());
    assert_eq!(result.metadata.queries_executed, 0);
}

#[tokio::test]
async fn thin_static_pages_fall_back_to_rendering() {
    let fetcher = MockFetcher::new("<html><body></body></html>");
    let renderer = MockRenderer::with_pages(vec![Ok(rendered_page(&google_serp(&[
        serp_item(
            "Platform Engineer at Acme",
            "https://acme.example/jobs/1",
            "Remote friendly team",
        ),
        serp_item(
            "Platform Engineer at Globex",
            "https://globex.example/jobs/2",
            "",
        ),
    ])))]);
    let orchestrator = ScrapeOrchestrator::with_renderer(
        test_config(vec![SourceConfig::google()]),
        fetcher.clone(),
        renderer.clone(),
    );

    let result = orchestrator
        .scrape(&SearchCriteria::new(["platform"]).with_max_results(5))
        .await
        .unwrap();

    assert_eq!(result.jobs.len(), 2);
    assert!(result.jobs.iter().all(|job| job.raw["strategy"] == "dynamic"));
    assert!(renderer.opened() >= 1);
    assert!(fetcher.call_count() >= 1);
    assert!(
        renderer
            .rendered_urls()
            .iter()
            .all(|url| url.starts_with("https://www.google.com/search"))
    );

    orchestrator.shutdown().await;
    assert!(renderer.was_shut_down());
}

#[tokio::test]
async fn static_only_source_never_renders() {
    let renderer = MockRenderer::new();
    let orchestrator = ScrapeOrchestrator::with_renderer(
        test_config(vec![SourceConfig::duckduckgo()]),
        MockFetcher::new("<html><body></body></html>"),
        renderer.clone(),
    );

    let result = orchestrator
        .scrape(&SearchCriteria::new(["platform"]).with_max_results(3))
        .await
        .unwrap();

    assert!(result.jobs.is_empty());
    assert!(renderer.rendered_urls().is_empty());
}

#[tokio::test]
async fn reporter_sees_every_request() {
    let reporter = Arc::new(RecordingReporter::default());
    let fetcher = MockFetcher::with_responses(vec![
        Ok(status_page(503)),
        Ok(html_page("<html><body></body></html>")),
    ]);
    let orchestrator = ScrapeOrchestrator::new(test_config(vec![SourceConfig::google()]), fetcher)
        .with_reporter(reporter.clone());

    orchestrator
        .scrape(&SearchCriteria::new(["platform"]).with_max_results(1))
        .await
        .unwrap();

    let names: Vec<String> = reporter
        .names()
        .into_iter()
        .filter(|name| name != "throttled")
        .collect();
    assert_eq!(names, ["started", "failed:retry", "started", "succeeded"]);
}
