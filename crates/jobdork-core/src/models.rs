use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AppError, ScrapingError};

/// Upper bound on `SearchCriteria::max_results`.
pub const MAX_RESULTS_LIMIT: usize = 1000;

/// Employment category of a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmploymentType {
    FullTime,
    PartTime,
    Contract,
    Temporary,
    Internship,
}

impl EmploymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmploymentType::FullTime => "full-time",
            EmploymentType::PartTime => "part-time",
            EmploymentType::Contract => "contract",
            EmploymentType::Temporary => "temporary",
            EmploymentType::Internship => "internship",
        }
    }
}

impl fmt::Display for EmploymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EmploymentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '_'], "-").as_str() {
            "full-time" | "fulltime" => Ok(EmploymentType::FullTime),
            "part-time" | "parttime" => Ok(EmploymentType::PartTime),
            "contract" => Ok(EmploymentType::Contract),
            "temporary" | "temp" => Ok(EmploymentType::Temporary),
            "internship" | "intern" => Ok(EmploymentType::Internship),
            _ => Err(format!("Unknown employment type: {}", s)),
        }
    }
}

/// Seniority bucket used to add synonym terms to queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    Entry,
    Mid,
    Senior,
    Executive,
}

impl ExperienceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperienceLevel::Entry => "entry",
            ExperienceLevel::Mid => "mid",
            ExperienceLevel::Senior => "senior",
            ExperienceLevel::Executive => "executive",
        }
    }
}

impl fmt::Display for ExperienceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExperienceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "entry" | "junior" => Ok(ExperienceLevel::Entry),
            "mid" | "intermediate" => Ok(ExperienceLevel::Mid),
            "senior" => Ok(ExperienceLevel::Senior),
            "executive" | "exec" => Ok(ExperienceLevel::Executive),
            _ => Err(format!("Unknown experience level: {}", s)),
        }
    }
}

/// Immutable input to a scrape session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub keywords: Vec<String>,
    pub location: Option<String>,
    pub remote: bool,
    pub salary_min: Option<u32>,
    pub salary_max: Option<u32>,
    pub employment_types: Vec<EmploymentType>,
    pub exclude_keywords: Vec<String>,
    pub experience_level: Option<ExperienceLevel>,
    pub max_results: usize,
}

impl SearchCriteria {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            location: None,
            remote: false,
            salary_min: None,
            salary_max: None,
            employment_types: Vec::new(),
            exclude_keywords: Vec::new(),
            experience_level: None,
            max_results: 50,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_remote(mut self, remote: bool) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_salary(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.salary_min = min;
        self.salary_max = max;
        self
    }

    pub fn with_employment_types(mut self, types: Vec<EmploymentType>) -> Self {
        self.employment_types = types;
        self
    }

    pub fn with_exclude_keywords<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_keywords = terms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_experience_level(mut self, level: ExperienceLevel) -> Self {
        self.experience_level = Some(level);
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Trimmed, non-empty keywords in input order.
    pub fn clean_keywords(&self) -> Vec<String> {
        self.keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.clean_keywords().is_empty() {
            return Err(AppError::InvalidCriteria(
                "at least one keyword is required".into(),
            ));
        }
        if self.max_results == 0 || self.max_results > MAX_RESULTS_LIMIT {
            return Err(AppError::InvalidCriteria(format!(
                "max_results must be between 1 and {MAX_RESULTS_LIMIT}, got {}",
                self.max_results
            )));
        }
        if let (Some(min), Some(max)) = (self.salary_min, self.salary_max)
            && min > max
        {
            return Err(AppError::InvalidCriteria(format!(
                "salary_min ({min}) is greater than salary_max ({max})"
            )));
        }
        Ok(())
    }
}

/// How a page was (or should be) fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStrategy {
    Static,
    Dynamic,
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStrategy::Static => write!(f, "static"),
            FetchStrategy::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// Which strategies a source allows, and in what order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyPreference {
    /// Static first, dynamic when the static result is insufficient.
    #[default]
    Auto,
    StaticOnly,
    DynamicOnly,
}

/// One page of one query against one source. Consumed once.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTarget {
    pub url: String,
    pub preference: StrategyPreference,
    pub source: String,
    pub query: String,
    /// 1-indexed page number.
    pub page: u32,
}

/// A listing returned by the in-page extraction script of a rendering session.
///
/// Every field is optional on the wire; blocks without title and url are
/// rejected before becoming candidates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderedListing {
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub salary_text: Option<String>,
    pub posted_date_text: Option<String>,
}

/// Fetched page content plus fetch metadata.
#[derive(Debug, Clone)]
pub struct RawPage {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub body: String,
    pub elapsed: Duration,
    pub strategy: FetchStrategy,
    /// Typed listings when the page was rendered with an extraction script.
    pub listings: Vec<RenderedListing>,
}

impl RawPage {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status,
            body: body.into(),
            elapsed: Duration::ZERO,
            strategy: FetchStrategy::Static,
            listings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Pay period of a parsed salary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalaryPeriod {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl SalaryPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SalaryPeriod::Hourly => "hourly",
            SalaryPeriod::Daily => "daily",
            SalaryPeriod::Weekly => "weekly",
            SalaryPeriod::Monthly => "monthly",
            SalaryPeriod::Yearly => "yearly",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Salary {
    pub min: f64,
    pub max: f64,
    /// ISO 4217 code.
    pub currency: String,
    pub period: SalaryPeriod,
}

/// Where a candidate was seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    pub query: String,
    pub url: String,
}

/// An extracted job posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateJob {
    /// First 16 hex chars of the SHA-256 of the fingerprint.
    pub id: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub url: String,
    pub salary_text: Option<String>,
    pub salary: Option<Salary>,
    pub posted_date_text: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub employment_type: EmploymentType,
    pub remote: bool,
    /// Source name (e.g. "google", "weworkremotely").
    pub source: String,
    /// Rendered query string that produced this candidate.
    pub query: String,
    pub confidence: f64,
    /// Fields as they were found on the page, for audit.
    pub raw: serde_json::Value,
    /// Every place this posting was seen, the first entry being its own origin.
    pub sources: Vec<Provenance>,
    pub discovered_at: DateTime<Utc>,
}

impl CandidateJob {
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.title, &self.company)
    }
}

/// Normalized duplicate-detection key: lower-cased `title-company` with
/// whitespace runs collapsed to a single space.
pub fn fingerprint(title: &str, company: &str) -> String {
    format!("{}-{}", normalize_text(title), normalize_text(company))
}

fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Stable identifier derived from a fingerprint.
pub fn job_id(fingerprint: &str) -> String {
    compute_hash(fingerprint)[..16].to_string()
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Summary counts and diagnostics of a finished session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeMetadata {
    pub session_id: Uuid,
    /// Candidates accumulated before deduplication.
    pub total_found: usize,
    pub duplicates: usize,
    /// Successful requests over total requests, 0..=100.
    pub success_rate: f64,
    pub duration_ms: u64,
    pub errors: Vec<ScrapingError>,
    /// Returned jobs per source name.
    pub sources: BTreeMap<String, usize>,
    pub queries_executed: usize,
    pub total_requests: u64,
    pub successful_requests: u64,
    /// True when the session ended through `stop()` or the deadline.
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub jobs: Vec<CandidateJob>,
    pub metadata: ScrapeMetadata,
}

/// Live view of the current (or last) session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeStats {
    pub is_running: bool,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub success_rate: f64,
    pub error_count: usize,
    pub recent_errors: Vec<ScrapingError>,
}

/// Percentage of successful requests, 0 when nothing was issued.
pub fn success_rate(successful: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (successful as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// Filter for `JobStore::search_jobs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    /// Case-insensitive substring of title or description.
    pub keyword: Option<String>,
    pub company: Option<String>,
    pub remote: Option<bool>,
    pub min_confidence: Option<f64>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn matches(&self, job: &CandidateJob) -> bool {
        if let Some(keyword) = &self.keyword {
            let keyword = keyword.to_lowercase();
            if !job.title.to_lowercase().contains(&keyword)
                && !job.description.to_lowercase().contains(&keyword)
            {
                return false;
            }
        }
        if let Some(company) = &self.company
            && !job.company.eq_ignore_ascii_case(company)
        {
            return false;
        }
        if let Some(remote) = self.remote
            && job.remote != remote
        {
            return false;
        }
        if let Some(min) = self.min_confidence
            && job.confidence < min
        {
            return false;
        }
        true
    }
}
