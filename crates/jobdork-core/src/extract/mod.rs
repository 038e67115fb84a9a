//! Result extraction and confidence scoring.
//!
//! A page is turned into candidates block by block. Blocks come either from
//! the typed listings a rendering session returned or from the source's CSS
//! selectors applied to the HTML. A block that fails is recorded as a
//! `parsing` error and skipped; the rest of the page is still processed.

pub mod heuristics;
pub mod posted;
pub mod salary;
pub mod scoring;

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};

use crate::config::{ConfidenceWeights, JobSite, ResultSelectors, SourceConfig, SourceKind};
use crate::error::{AppError, ScrapingError};
use crate::models::{
    CandidateJob, Provenance, RawPage, RenderedListing, SearchCriteria, fingerprint, job_id,
};

pub use posted::parse_posted_date;
pub use salary::parse_salary;

use heuristics::{
    clean_company, collapse_whitespace, company_from_ats, company_from_text, contains_word,
    decompose_title, employment_type, find_city, host_of, is_remote, resolve_link, site_for_host,
};
use scoring::{ScoreInputs, confidence};

/// Longest title accepted from a result block.
const MAX_TITLE_CHARS: usize = 300;

/// Where a page came from.
#[derive(Debug, Clone, Copy)]
pub struct QueryContext<'a> {
    pub source: &'a SourceConfig,
    /// Rendered query string.
    pub query: &'a str,
}

/// Candidates extracted from one page plus the blocks that failed.
#[derive(Debug, Default)]
pub struct Extraction {
    pub candidates: Vec<CandidateJob>,
    pub errors: Vec<ScrapingError>,
    /// Result blocks found on the page, valid or not.
    pub blocks: usize,
}

/// Untrusted fields of one result block.
#[derive(Debug, Clone, Default)]
struct BlockFields {
    title: String,
    href: String,
    snippet: String,
    company: Option<String>,
    location: Option<String>,
    salary_text: Option<String>,
    posted_text: Option<String>,
}

impl From<&RenderedListing> for BlockFields {
    fn from(listing: &RenderedListing) -> Self {
        Self {
            title: listing.title.clone().unwrap_or_default(),
            href: listing.url.clone().unwrap_or_default(),
            snippet: listing.description.clone().unwrap_or_default(),
            company: listing.company.clone(),
            location: listing.location.clone(),
            salary_text: listing.salary_text.clone(),
            posted_text: listing.posted_date_text.clone(),
        }
    }
}

struct CompiledSelectors {
    item: Selector,
    title: Selector,
    link: Selector,
    snippet: Selector,
    company: Option<Selector>,
    location: Option<Selector>,
    salary: Option<Selector>,
    posted: Option<Selector>,
}

fn parse_selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css).map_err(|e| AppError::ParseError(format!("invalid selector {css:?}: {e:?}")))
}

impl CompiledSelectors {
    fn compile(selectors: &ResultSelectors) -> Result<Self, AppError> {
        let optional = |css: &Option<String>| css.as_deref().map(parse_selector).transpose();
        Ok(Self {
            item: parse_selector(&selectors.result_item)?,
            title: parse_selector(&selectors.title)?,
            link: parse_selector(&selectors.link)?,
            snippet: parse_selector(&selectors.snippet)?,
            company: optional(&selectors.company)?,
            location: optional(&selectors.location)?,
            salary: optional(&selectors.salary)?,
            posted: optional(&selectors.posted)?,
        })
    }
}

fn text_of(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .find(|text| !text.is_empty())
}

fn html_blocks(html: &str, selectors: &ResultSelectors) -> Result<Vec<BlockFields>, AppError> {
    let compiled = CompiledSelectors::compile(selectors)?;
    let document = Html::parse_document(html);

    let blocks = document
        .select(&compiled.item)
        .map(|item| {
            let href = item
                .select(&compiled.link)
                .find_map(|a| a.value().attr("href"))
                .or_else(|| item.value().attr("href"))
                .unwrap_or_default()
                .to_string();
            let optional = |sel: &Option<Selector>| sel.as_ref().and_then(|s| text_of(item, s));
            BlockFields {
                title: text_of(item, &compiled.title).unwrap_or_default(),
                href,
                snippet: text_of(item, &compiled.snippet).unwrap_or_default(),
                company: optional(&compiled.company),
                location: optional(&compiled.location),
                salary_text: optional(&compiled.salary),
                posted_text: optional(&compiled.posted),
            }
        })
        .collect();
    Ok(blocks)
}

/// Turns pages into scored candidates.
#[derive(Debug, Clone)]
pub struct ResultExtractor {
    weights: ConfidenceWeights,
    sites: Vec<JobSite>,
}

impl ResultExtractor {
    pub fn new(weights: ConfidenceWeights, sites: Vec<JobSite>) -> Self {
        Self { weights, sites }
    }

    pub fn extract(&self, page: &RawPage, ctx: &QueryContext<'_>) -> Extraction {
        self.extract_at(page, ctx, Utc::now())
    }

    /// Same as [`extract`](Self::extract) with an explicit clock for relative dates.
    pub fn extract_at(
        &self,
        page: &RawPage,
        ctx: &QueryContext<'_>,
        now: DateTime<Utc>,
    ) -> Extraction {
        let mut extraction = Extraction::default();

        let blocks = if page.listings.is_empty() {
            match html_blocks(&page.body, &ctx.source.selectors) {
                Ok(blocks) => blocks,
                Err(e) => {
                    tracing::warn!(source = %ctx.source.name, error = %e, "Cannot read result blocks");
                    extraction
                        .errors
                        .push(ScrapingError::from_app_error(&e, Some(&page.url)));
                    return extraction;
                }
            }
        } else {
            page.listings.iter().map(BlockFields::from).collect()
        };
        extraction.blocks = blocks.len();

        let engine_host = match ctx.source.kind {
            SourceKind::SearchEngine => host_of(&ctx.source.build_url("", 1)),
            SourceKind::JobBoard => None,
        };

        for (index, block) in blocks.into_iter().enumerate() {
            match self.build_candidate(block, page, ctx, engine_host.as_deref(), now) {
                Ok(Some(candidate)) => extraction.candidates.push(candidate),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(url = %page.url, block = index, error = %e, "Skipping malformed result block");
                    extraction
                        .errors
                        .push(ScrapingError::from_app_error(&e, Some(&page.url)));
                }
            }
        }

        tracing::debug!(
            url = %page.url,
            blocks = extraction.blocks,
            candidates = extraction.candidates.len(),
            "Extracted page"
        );
        extraction
    }

    /// `Ok(None)` drops a block silently (missing required field, navigation link),
    /// `Err` marks it malformed.
    fn build_candidate(
        &self,
        block: BlockFields,
        page: &RawPage,
        ctx: &QueryContext<'_>,
        engine_host: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<CandidateJob>, AppError> {
        let raw_title = collapse_whitespace(&block.title);
        if raw_title.is_empty() {
            return Ok(None);
        }
        if raw_title.chars().count() > MAX_TITLE_CHARS {
            return Err(AppError::ParseError(format!(
                "result title of {} chars",
                raw_title.chars().count()
            )));
        }
        let Some(url) = resolve_link(&block.href, &page.url)? else {
            return Ok(None);
        };
        let host = host_of(&url).unwrap_or_default();
        if engine_host.is_some_and(|engine| engine == host) {
            return Ok(None);
        }

        let site = site_for_host(&host, &self.sites);
        let parts = decompose_title(&raw_title, &self.sites);
        let title = if parts.title.is_empty() {
            raw_title.clone()
        } else {
            parts.title.clone()
        };
        let description = collapse_whitespace(&block.snippet);

        let company = block
            .company
            .as_deref()
            .and_then(clean_company)
            .or_else(|| company_from_ats(&url, &self.sites))
            .or_else(|| parts.company.clone())
            .or_else(|| company_from_text(&description))
            .or_else(|| parts.split_company.clone())
            .or_else(|| site.map(|s| s.name.clone()));
        let Some(company) = company else {
            return Ok(None);
        };

        let stated_location = block
            .location
            .as_deref()
            .map(collapse_whitespace)
            .filter(|l| !l.is_empty())
            .or_else(|| parts.location.clone());
        let remote = is_remote(&[
            stated_location.as_deref().unwrap_or_default(),
            &description,
            &title,
        ]);
        let location = stated_location
            .or_else(|| find_city(&format!("{title} {description}")).map(str::to_string))
            .or_else(|| remote.then(|| "Remote".to_string()))
            .unwrap_or_default();

        let salary = block
            .salary_text
            .as_deref()
            .and_then(parse_salary)
            .or_else(|| parse_salary(&description));
        let posted_at = match block.posted_text.as_deref() {
            Some(text) => parse_posted_date(text, now),
            None => posted::find_relative_date(&description, now),
        };

        let score = confidence(
            &self.weights,
            ScoreInputs {
                kind: ctx.source.kind,
                title: &title,
                description: &description,
                reputable_host: site.is_some_and(|s| s.reputable),
            },
        );

        let raw = serde_json::json!({
            "title": raw_title,
            "href": block.href,
            "snippet": block.snippet,
            "company": block.company,
            "location": block.location,
            "salaryText": block.salary_text,
            "postedDateText": block.posted_text,
            "strategy": page.strategy,
        });

        Ok(Some(CandidateJob {
            id: job_id(&fingerprint(&title, &company)),
            employment_type: employment_type(&format!("{title} {description}")),
            title,
            company,
            location,
            description,
            url: url.clone(),
            salary_text: block.salary_text,
            salary,
            posted_date_text: block.posted_text,
            posted_at,
            remote,
            source: ctx.source.name.clone(),
            query: ctx.query.to_string(),
            confidence: score,
            raw,
            sources: vec![Provenance {
                source: ctx.source.name.clone(),
                query: ctx.query.to_string(),
                url,
            }],
            discovered_at: now,
        }))
    }
}

/// Exclude-keywords and requested employment types.
pub fn matches_criteria(job: &CandidateJob, criteria: &SearchCriteria) -> bool {
    let title = job.title.to_lowercase();
    let description = job.description.to_lowercase();
    let excluded = criteria.exclude_keywords.iter().any(|term| {
        let term = term.trim().to_lowercase();
        !term.is_empty() && (contains_word(&title, &term) || contains_word(&description, &term))
    });
    if excluded {
        return false;
    }
    criteria.employment_types.is_empty() || criteria.employment_types.contains(&job.employment_type)
}
