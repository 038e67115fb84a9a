//! Bounded pool of pre-warmed rendering sessions.
//!
//! Sessions are handed out as [`PooledSession`] guards that put the session
//! back on drop, so every exit path (success, error, timeout, cancellation)
//! releases it. When the pool is empty `acquire` opens a transient session
//! instead of waiting; transient sessions are closed on release if the pool
//! is already full. A session whose render timed out or was cancelled may
//! still be navigating, so it is retired and closed instead of reused.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::config::{PoolConfig, ResultSelectors};
use crate::error::AppError;
use crate::traits::{RenderRequest, RenderSession, RenderedPage, Renderer, SessionOptions};

struct PoolInner<S> {
    idle: Mutex<Vec<S>>,
    capacity: usize,
    closed: AtomicBool,
}

impl<S> PoolInner<S> {
    fn lock_idle(&self) -> MutexGuard<'_, Vec<S>> {
        self.idle.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned browser pool mutex");
            poisoned.into_inner()
        })
    }
}

/// A session checked out of the pool. Returned to the pool when dropped.
pub struct PooledSession<S: RenderSession> {
    session: Option<S>,
    pool: Arc<PoolInner<S>>,
    transient: bool,
    retired: bool,
}

impl<S: RenderSession> PooledSession<S> {
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    /// Close the session on release instead of returning it to the pool.
    pub fn retire(&mut self) {
        self.retired = true;
    }
}

impl<S: RenderSession> Deref for PooledSession<S> {
    type Target = S;

    fn deref(&self) -> &S {
        // Only `drop` takes the session out.
        match &self.session {
            Some(session) => session,
            None => unreachable!("pooled session used after release"),
        }
    }
}

impl<S: RenderSession> Drop for PooledSession<S> {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        if !self.retired && !self.pool.closed.load(Ordering::Acquire) {
            let mut idle = self.pool.lock_idle();
            if idle.len() < self.pool.capacity {
                idle.push(session);
                return;
            }
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(session.close());
            }
            Err(_) => tracing::warn!("No runtime to close released browser session"),
        }
    }
}

/// Fixed-size pool of rendering sessions over a [`Renderer`].
pub struct BrowserPool<R: Renderer> {
    renderer: R,
    config: PoolConfig,
    inner: Arc<PoolInner<R::Session>>,
    transient_opened: AtomicUsize,
}

impl<R: Renderer> BrowserPool<R> {
    pub fn new(renderer: R, config: PoolConfig) -> Self {
        let capacity = config.size;
        Self {
            renderer,
            config,
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::with_capacity(capacity)),
                capacity,
                closed: AtomicBool::new(false),
            }),
            transient_opened: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            blocked_resources: self.config.blocked_resources.clone(),
            user_agent: None,
        }
    }

    /// Fill the pool up to its configured size. Failure here is fatal for a session.
    pub async fn warm(&self) -> Result<(), AppError> {
        self.inner.closed.store(false, Ordering::Release);
        let missing = self.config.size.saturating_sub(self.idle_count());
        if missing == 0 {
            return Ok(());
        }

        let options = self.session_options();
        let mut opened = Vec::with_capacity(missing);
        for _ in 0..missing {
            match self.renderer.open_session(&options).await {
                Ok(session) => opened.push(session),
                Err(e) => {
                    for session in opened {
                        session.close().await;
                    }
                    return Err(match e {
                        AppError::BrowserLaunch(_) => e,
                        other => AppError::BrowserLaunch(other.to_string()),
                    });
                }
            }
        }

        self.inner.lock_idle().extend(opened);
        tracing::info!(size = self.config.size, "Browser pool warmed");
        Ok(())
    }

    /// Take an idle session, or open a transient one when none is idle.
    pub async fn acquire(&self) -> Result<PooledSession<R::Session>, AppError> {
        let idle = self.inner.lock_idle().pop();
        if let Some(session) = idle {
            return Ok(PooledSession {
                session: Some(session),
                pool: self.inner.clone(),
                transient: false,
                retired: false,
            });
        }

        let session = self.renderer.open_session(&self.session_options()).await?;
        let count = self.transient_opened.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(transient_sessions = count, "Browser pool exhausted, opened transient session");
        Ok(PooledSession {
            session: Some(session),
            pool: self.inner.clone(),
            transient: true,
            retired: false,
        })
    }

    /// Render a page on a pooled session.
    ///
    /// Navigation failures are reported as network errors. A randomized
    /// settle delay follows a successful load. Sessions interrupted by a
    /// timeout or cancellation are retired.
    pub async fn render(
        &self,
        url: &str,
        selectors: Option<&ResultSelectors>,
        cancel: &CancellationToken,
    ) -> Result<RenderedPage, AppError> {
        let mut session = tokio::select! {
            () = cancel.cancelled() => return Err(AppError::Cancelled),
            session = self.acquire() => session?,
        };

        let timeout = self.config.operation_timeout;
        let request = RenderRequest {
            url,
            timeout,
            selectors,
        };

        let outcome = tokio::select! {
            () = cancel.cancelled() => Err(AppError::Cancelled),
            result = tokio::time::timeout(timeout, session.render(&request)) => match result {
                Err(_) => Err(AppError::Timeout(timeout.as_secs())),
                Ok(result) => result.map_err(navigation_error),
            },
        };
        let page = match outcome {
            Ok(page) => page,
            Err(e) => {
                if matches!(e, AppError::Cancelled | AppError::Timeout(_)) {
                    tracing::debug!(%url, error = %e, "Retiring interrupted browser session");
                    session.retire();
                }
                return Err(e);
            }
        };

        let settle = self.config.settle_delay();
        if !settle.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => return Err(AppError::Cancelled),
                () = tokio::time::sleep(settle) => {}
            }
        }

        drop(session);
        Ok(page)
    }

    pub fn idle_count(&self) -> usize {
        self.inner.lock_idle().len()
    }

    pub fn transient_count(&self) -> usize {
        self.transient_opened.load(Ordering::Relaxed)
    }

    /// Close every idle session and the underlying engine.
    ///
    /// Sessions checked out at this point are closed when released.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let sessions: Vec<_> = self.inner.lock_idle().drain(..).collect();
        let count = sessions.len();
        for session in sessions {
            session.close().await;
        }
        self.renderer.shutdown().await;
        tracing::info!(closed_sessions = count, "Browser pool shut down");
    }
}

fn navigation_error(error: AppError) -> AppError {
    match error {
        e if e.is_block_signal() => e,
        e @ (AppError::Cancelled | AppError::Timeout(_) | AppError::NetworkError(_)) => e,
        other => AppError::NetworkError(format!("navigation failed: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::ErrorKind;
    use crate::testutil::*;

    fn pool(renderer: MockRenderer) -> BrowserPool<MockRenderer> {
        BrowserPool::new(renderer, fast_pool_config())
    }

    #[tokio::test]
    async fn warm_opens_configured_sessions() {
        let renderer = MockRenderer::new();
        let pool = pool(renderer.clone());

        pool.warm().await.unwrap();
        pool.warm().await.unwrap();

        assert_eq!(pool.idle_count(), 3);
        assert_eq!(renderer.opened(), 3);
    }

    #[tokio::test]
    async fn sessions_block_non_essential_resources() {
        let renderer = MockRenderer::new();
        let pool = pool(renderer.clone());
        pool.warm().await.unwrap();

        let options = renderer.session_options();
        assert_eq!(options.len(), 3);
        assert!(options[0].blocked_resources.contains(&crate::config::ResourceKind::Image));
        assert!(options[0].blocked_resources.contains(&crate::config::ResourceKind::Font));
        assert!(options[0].blocked_resources.contains(&crate::config::ResourceKind::Media));
    }

    #[tokio::test]
    async fn warm_failure_is_browser_launch_error() {
        let renderer = MockRenderer::failing_open();
        let pool = pool(renderer);

        let err = pool.warm().await.unwrap_err();
        assert!(matches!(err, AppError::BrowserLaunch(_)));
    }

    #[tokio::test]
    async fn released_sessions_are_reused() {
        let renderer = MockRenderer::new();
        let pool = pool(renderer.clone());
        pool.warm().await.unwrap();

        for _ in 0..5 {
            let session = pool.acquire().await.unwrap();
            assert!(!session.is_transient());
            drop(session);
        }

        assert_eq!(pool.idle_count(), 3);
        assert_eq!(renderer.opened(), 3);
    }

    #[tokio::test]
    async fn exhausted_pool_opens_transient_session() {
        let renderer = MockRenderer::new();
        let pool = pool(renderer.clone());
        pool.warm().await.unwrap();

        let held: Vec<_> = futures::future::join_all((0..3).map(|_| pool.acquire()))
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        let extra = pool.acquire().await.unwrap();

        assert!(extra.is_transient());
        assert_eq!(pool.transient_count(), 1);
        assert_eq!(pool.idle_count(), 0);

        drop(held);
        drop(extra);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(pool.idle_count(), 3);
        assert_eq!(renderer.closed(), 1);
    }

    #[tokio::test]
    async fn render_returns_page_and_releases_session() {
        let renderer = MockRenderer::with_pages(vec![Ok(rendered_page("<html>jobs</html>"))]);
        let pool = pool(renderer.clone());
        pool.warm().await.unwrap();

        let page = pool
            .render("https://example.com/jobs", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(page.html, "<html>jobs</html>");
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(renderer.rendered_urls(), vec!["https://example.com/jobs"]);
    }

    #[tokio::test]
    async fn navigation_error_is_network_and_session_is_released() {
        let renderer = MockRenderer::with_pages(vec![Err(AppError::Generic(
            "net::ERR_NAME_NOT_RESOLVED".into(),
        ))]);
        let pool = pool(renderer);
        pool.warm().await.unwrap();

        let err = pool
            .render("https://nowhere.invalid", None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(pool.idle_count(), 3);
    }

    #[tokio::test]
    async fn timed_out_session_is_closed_not_reused() {
        let renderer = MockRenderer::new().with_delay(Duration::from_millis(500));
        let pool = BrowserPool::new(
            renderer.clone(),
            fast_pool_config().with_operation_timeout(Duration::from_millis(20)),
        );
        pool.warm().await.unwrap();

        let err = pool
            .render("https://example.com", None, &CancellationToken::new())
            .await
            .unwrap_err();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(err, AppError::Timeout(_)));
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(renderer.closed(), 1);

        // The next warm-up tops the pool back up with a fresh session.
        pool.warm().await.unwrap();
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(renderer.opened(), 4);
    }

    #[tokio::test]
    async fn cancelled_session_is_closed_not_reused() {
        let renderer = MockRenderer::new().with_delay(Duration::from_secs(5));
        let pool = pool(renderer.clone());
        pool.warm().await.unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = pool
            .render("https://example.com", None, &cancel)
            .await
            .unwrap_err();

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(err, AppError::Cancelled));
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(renderer.closed(), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let renderer = MockRenderer::new();
        let pool = pool(renderer.clone());
        pool.warm().await.unwrap();

        let held = pool.acquire().await.unwrap();
        pool.shutdown().await;
        assert_eq!(renderer.closed(), 2);
        assert!(renderer.was_shut_down());

        drop(held);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(renderer.closed(), 3);
        assert_eq!(pool.idle_count(), 0);
    }
}
