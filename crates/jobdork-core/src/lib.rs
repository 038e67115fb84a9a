pub mod browser_pool;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod events;
pub mod executor;
pub mod extract;
pub mod models;
pub mod orchestrator;
pub mod query;
pub mod strategy;
pub mod traits;

#[doc(hidden)]
pub mod testutil;

pub use config::{ScrapeConfig, SourceConfig, SourceKind};
pub use error::{AppError, ErrorKind, ScrapingError};
pub use events::{RequestEvent, RequestReporter, TracingRequestReporter};
pub use models::{CandidateJob, ScrapeResult, ScrapeStats, SearchCriteria};
pub use orchestrator::ScrapeOrchestrator;
pub use query::{DorkQuery, QuerySynthesizer};
pub use traits::{
    CircuitControl, Fetcher, JobStore, NullRenderer, RenderRequest, RenderSession, RenderedPage,
    Renderer, SessionOptions,
};
