use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error types for jobdork.
#[derive(Error, Debug)]
pub enum AppError {
    /// The server answered with a non-success status code.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The local rate limiter could not grant a token within the bounded wait.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// The target served a CAPTCHA, interstitial or "unusual traffic" page.
    #[error("Blocked: {0}")]
    Blocked(String),

    /// Page content could not be turned into candidates.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The rendering engine could not be started or a session could not be opened.
    #[error("Browser error: {0}")]
    BrowserLaunch(String),

    /// Search criteria failed validation.
    #[error("Invalid search criteria: {0}")]
    InvalidCriteria(String),

    /// A scrape session is already running on this orchestrator.
    #[error("A scrape session is already running")]
    SessionBusy,

    /// The operation was cancelled by the caller or by the session deadline.
    #[error("Operation cancelled")]
    Cancelled,

    /// Storage collaborator failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

/// Coarse failure taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Network,
    RateLimit,
    Blocked,
    Parsing,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::RateLimit => "rate-limit",
            ErrorKind::Blocked => "blocked",
            ErrorKind::Parsing => "parsing",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phrases in error messages that mean the target is refusing us.
const BLOCK_MARKERS: &[&str] = &[
    "unusual traffic",
    "captcha",
    "are you a robot",
    "not a robot",
    "/sorry/index",
    "automated queries",
    "verify you are human",
    "access denied",
];

/// Markup found only on CAPTCHA walls and anti-bot interstitials.
///
/// Matched against raw HTML, so these are element names, form actions and
/// titles rather than words a job snippet could contain.
const BLOCK_PAGE_SIGNATURES: &[&str] = &[
    "/sorry/index",
    "unusual traffic from your computer",
    "class=\"g-recaptcha\"",
    "id=\"captcha-form\"",
    "id=\"challenge-form\"",
    "cf-browser-verification",
    "anomaly-modal",
    "<title>access denied</title>",
    "<title>just a moment...</title>",
];

const NETWORK_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "connect",
    "reset",
    "refused",
    "dns",
    "broken pipe",
    "navigation",
];

/// Classify a free-text failure message into the error taxonomy.
pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if BLOCK_MARKERS.iter().any(|m| lower.contains(m)) {
        ErrorKind::Blocked
    } else if lower.contains("429") || lower.contains("too many requests") {
        ErrorKind::RateLimit
    } else if NETWORK_MARKERS.iter().any(|m| lower.contains(m)) {
        ErrorKind::Network
    } else if lower.contains("parse") || lower.contains("malformed") {
        ErrorKind::Parsing
    } else {
        ErrorKind::Unknown
    }
}

/// Returns the first interstitial signature found in a fetched page body, if any.
pub fn detect_block(body: &str) -> Option<&'static str> {
    let lower = body.to_lowercase();
    BLOCK_PAGE_SIGNATURES.iter().copied().find(|m| lower.contains(m))
}

impl AppError {
    /// Maps the error onto the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::HttpStatus { status, .. } => match status {
                429 => ErrorKind::RateLimit,
                403 => ErrorKind::Blocked,
                500.. => ErrorKind::Network,
                _ => ErrorKind::Unknown,
            },
            AppError::Timeout(_) | AppError::NetworkError(_) => ErrorKind::Network,
            AppError::RateLimitExceeded => ErrorKind::RateLimit,
            AppError::Blocked(_) => ErrorKind::Blocked,
            AppError::ParseError(_) | AppError::SerializationError(_) => ErrorKind::Parsing,
            AppError::Generic(msg) => classify_message(msg),
            AppError::BrowserLaunch(_)
            | AppError::InvalidCriteria(_)
            | AppError::SessionBusy
            | AppError::Cancelled
            | AppError::StorageError(_) => ErrorKind::Unknown,
        }
    }

    /// Returns true if this error is transient and worth retrying.
    ///
    /// 4xx other than 429 and blocking signals are final; timeouts, connection
    /// failures, 5xx and limiter exhaustion are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            AppError::Timeout(_) | AppError::NetworkError(_) | AppError::RateLimitExceeded => true,
            AppError::Generic(msg) => matches!(
                classify_message(msg),
                ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Unknown
            ),
            _ => false,
        }
    }

    /// Returns true if the target is pushing back on us (429, 403, CAPTCHA,
    /// "unusual traffic"). The orchestrator abandons the current query on these.
    pub fn is_block_signal(&self) -> bool {
        match self {
            AppError::HttpStatus { status, .. } => *status == 429 || *status == 403,
            AppError::Blocked(_) => true,
            AppError::Generic(msg) => classify_message(msg) == ErrorKind::Blocked,
            _ => false,
        }
    }
}

/// A failure recorded during a scrape session and returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapingError {
    pub kind: ErrorKind,
    pub message: String,
    pub url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub retryable: bool,
}

impl ScrapingError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, url: Option<&str>) -> Self {
        Self {
            kind,
            message: message.into(),
            url: url.map(str::to_string),
            timestamp: Utc::now(),
            retryable: matches!(
                kind,
                ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Unknown
            ),
        }
    }

    pub fn from_app_error(error: &AppError, url: Option<&str>) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            url: url.map(str::to_string),
            timestamp: Utc::now(),
            retryable: error.is_retryable(),
        }
    }
}

impl std::fmt::Display for ScrapingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.url {
            Some(url) => write!(f, "[{}] {} ({})", self.kind, self.message, url),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> AppError {
        AppError::HttpStatus {
            status: code,
            url: "https://example.com".into(),
        }
    }

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::NetworkError("reset".into()).is_retryable());
        assert!(AppError::Timeout(30).is_retryable());
        assert!(AppError::RateLimitExceeded.is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(403).is_retryable());
        assert!(!AppError::Blocked("captcha".into()).is_retryable());
        assert!(!AppError::ParseError("bad html".into()).is_retryable());
    }

    #[test]
    fn test_status_kinds() {
        assert_eq!(status(429).kind(), ErrorKind::RateLimit);
        assert_eq!(status(403).kind(), ErrorKind::Blocked);
        assert_eq!(status(502).kind(), ErrorKind::Network);
        assert_eq!(status(404).kind(), ErrorKind::Unknown);
        assert_eq!(AppError::Timeout(5).kind(), ErrorKind::Network);
    }

    #[test]
    fn test_generic_messages_are_classified() {
        assert_eq!(
            AppError::Generic("Our systems have detected unusual traffic".into()).kind(),
            ErrorKind::Blocked
        );
        assert_eq!(
            AppError::Generic("connection reset by peer".into()).kind(),
            ErrorKind::Network
        );
        assert_eq!(AppError::Generic("weird".into()).kind(), ErrorKind::Unknown);
        assert!(AppError::Generic("weird".into()).is_retryable());
        assert!(!AppError::Generic("solve this CAPTCHA".into()).is_retryable());
    }

    #[test]
    fn test_block_signals() {
        assert!(status(429).is_block_signal());
        assert!(status(403).is_block_signal());
        assert!(AppError::Blocked("captcha".into()).is_block_signal());
        assert!(!status(500).is_block_signal());
        assert!(!AppError::Timeout(30).is_block_signal());
    }

    #[test]
    fn test_detect_block_in_body() {
        assert_eq!(
            detect_block(
                "<html>Our systems have detected Unusual Traffic from your computer network</html>"
            ),
            Some("unusual traffic from your computer")
        );
        assert!(detect_block("<div class=\"g-recaptcha\" data-sitekey=\"x\"></div>").is_some());
        assert!(detect_block("<form action=\"/sorry/index\" method=\"post\">").is_some());
        assert!(detect_block("<html><head><title>Access Denied</title></head></html>").is_some());
        assert!(detect_block("<html><body>10 results</body></html>").is_none());
    }

    #[test]
    fn test_job_text_about_captchas_is_not_a_block() {
        let snippets = [
            "<div>Build our CAPTCHA and bot-defense platform. Apply now.</div>",
            "<div>Harden login flows: access denied handling, are you a robot checks</div>",
            "<div>Detect unusual traffic patterns and automated queries at scale</div>",
        ];
        for body in snippets {
            assert_eq!(detect_block(body), None, "{body}");
        }
    }

    #[test]
    fn test_scraping_error_from_app_error() {
        let err = ScrapingError::from_app_error(&status(429), Some("https://x.test/search"));
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert!(err.retryable);
        assert_eq!(err.url.as_deref(), Some("https://x.test/search"));
        assert!(err.to_string().contains("rate-limit"));
    }

    #[test]
    fn test_error_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ErrorKind::RateLimit).unwrap();
        assert_eq!(json, "\"rate-limit\"");
    }
}
