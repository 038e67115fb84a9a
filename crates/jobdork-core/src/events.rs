use std::time::Duration;

use crate::error::AppError;

/// Request lifecycle events emitted by the executor.
#[derive(Debug, Clone, Copy)]
pub enum RequestEvent<'a> {
    Started {
        url: &'a str,
        attempt: u32,
    },
    Succeeded {
        url: &'a str,
        status: u16,
        elapsed: Duration,
    },
    Failed {
        url: &'a str,
        attempt: u32,
        error: &'a AppError,
        will_retry: bool,
    },
    /// The call waited on the per-domain limiter or inter-request delay.
    Throttled {
        domain: &'a str,
        waited: Duration,
    },
}

/// Trait for receiving request events (decoupled logging).
///
/// Counters are maintained by the executor itself; reporters are observers only.
pub trait RequestReporter: Send + Sync {
    fn report(&self, event: RequestEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl RequestReporter for NoopReporter {}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRequestReporter;

impl RequestReporter for TracingRequestReporter {
    fn report(&self, event: RequestEvent<'_>) {
        match event {
            RequestEvent::Started { url, attempt } => {
                tracing::debug!(%url, %attempt, "Request started");
            }
            RequestEvent::Succeeded {
                url,
                status,
                elapsed,
            } => {
                tracing::info!(%url, %status, elapsed_ms = %elapsed.as_millis(), "Request succeeded");
            }
            RequestEvent::Failed {
                url,
                attempt,
                error,
                will_retry,
            } => {
                tracing::warn!(%url, %attempt, kind = %error.kind(), %error, %will_retry, "Request failed");
            }
            RequestEvent::Throttled { domain, waited } => {
                tracing::debug!(%domain, waited_ms = %waited.as_millis(), "Request throttled");
            }
        }
    }
}
