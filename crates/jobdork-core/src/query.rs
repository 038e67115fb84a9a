//! Dork query synthesis.
//!
//! Turns [`SearchCriteria`] into a fixed-order list of site-scoped search
//! engine queries. Ordering depends only on the criteria and [`QueryConfig`],
//! so the same input always produces the same list.

use std::collections::HashSet;
use std::fmt;

use crate::config::QueryConfig;
use crate::models::{ExperienceLevel, SearchCriteria};

/// One synthesized search query. Built once, never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DorkQuery {
    /// `site:` scope; empty means unrestricted.
    pub site: String,
    /// Required keywords, OR-joined when there are several.
    pub keywords: Vec<String>,
    /// Extra groups; terms inside a group are OR-joined.
    pub qualifiers: Vec<Vec<String>>,
    pub exclusions: Vec<String>,
    /// `filetype:` restrictions, OR-joined.
    pub file_types: Vec<String>,
    /// Appended verbatim as `key:value`.
    pub custom: Vec<(String, String)>,
}

impl DorkQuery {
    pub fn render(&self) -> String {
        let mut parts = Vec::new();
        if !self.site.is_empty() {
            parts.push(format!("site:{}", self.site));
        }
        if let Some(group) = or_group(self.keywords.iter().map(|k| term(k))) {
            parts.push(group);
        }
        for qualifier in &self.qualifiers {
            if let Some(group) = or_group(qualifier.iter().map(|q| term(q))) {
                parts.push(group);
            }
        }
        if let Some(group) = or_group(self.file_types.iter().map(|t| format!("filetype:{t}"))) {
            parts.push(group);
        }
        for (key, value) in &self.custom {
            parts.push(format!("{key}:{value}"));
        }
        for exclusion in &self.exclusions {
            let exclusion = term(exclusion);
            if !exclusion.is_empty() {
                parts.push(format!("-{exclusion}"));
            }
        }
        parts.join(" ")
    }
}

impl fmt::Display for DorkQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Multi-word terms become quoted phrases.
fn term(raw: &str) -> String {
    let cleaned = raw.replace('"', "");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.contains(' ') {
        format!("\"{cleaned}\"")
    } else {
        cleaned
    }
}

fn or_group(terms: impl Iterator<Item = String>) -> Option<String> {
    let terms: Vec<String> = terms.filter(|t| !t.is_empty()).collect();
    match terms.len() {
        0 => None,
        1 => terms.into_iter().next(),
        _ => Some(format!("({})", terms.join(" OR "))),
    }
}

fn experience_synonyms(level: ExperienceLevel) -> &'static [&'static str] {
    match level {
        ExperienceLevel::Entry => &["entry level", "junior", "graduate"],
        ExperienceLevel::Mid => &["mid level", "intermediate"],
        ExperienceLevel::Senior => &["senior", "lead", "principal"],
        ExperienceLevel::Executive => &["director", "vp", "executive", "head of"],
    }
}

fn salary_floor(min: u32) -> String {
    if min >= 1000 && min % 1000 == 0 {
        format!("${}k+", min / 1000)
    } else {
        format!("${min}+")
    }
}

#[derive(Debug, Clone)]
pub struct QuerySynthesizer {
    config: QueryConfig,
}

impl QuerySynthesizer {
    pub fn new(config: QueryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Ordered, de-duplicated queries, at most `min(max_queries, max_results)`.
    ///
    /// Order: one query per scope, the file-type query, the career-page query,
    /// then keyword-subset variants.
    pub fn generate(&self, criteria: &SearchCriteria) -> Vec<DorkQuery> {
        let keywords = criteria.clean_keywords();
        if keywords.is_empty() {
            return Vec::new();
        }
        let limit = self.config.max_queries.min(criteria.max_results);
        let qualifiers = self.qualifiers(criteria);
        let exclusions: Vec<String> = criteria
            .exclude_keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        let scoped = |site: &str, keywords: Vec<String>| DorkQuery {
            site: site.to_string(),
            keywords,
            qualifiers: qualifiers.clone(),
            exclusions: exclusions.clone(),
            ..DorkQuery::default()
        };

        let mut candidates: Vec<DorkQuery> = self
            .config
            .scopes
            .iter()
            .map(|scope| scoped(scope, keywords.clone()))
            .collect();

        if !self.config.file_types.is_empty() {
            candidates.push(DorkQuery {
                keywords: keywords.clone(),
                qualifiers: vec![vec!["job description".to_string()]],
                exclusions: exclusions.clone(),
                file_types: self.config.file_types.clone(),
                ..DorkQuery::default()
            });
        }
        if !self.config.career_url_hints.is_empty() {
            candidates.push(DorkQuery {
                keywords: keywords.clone(),
                exclusions: exclusions.clone(),
                custom: self
                    .config
                    .career_url_hints
                    .iter()
                    .map(|hint| ("inurl".to_string(), hint.clone()))
                    .collect(),
                ..DorkQuery::default()
            });
        }

        for variant in self.variants(&keywords) {
            for scope in self.config.scopes.iter().take(self.config.queries_per_variant) {
                candidates.push(scoped(scope, variant.clone()));
            }
        }

        let mut seen = HashSet::new();
        let queries: Vec<DorkQuery> = candidates
            .into_iter()
            .filter(|q| seen.insert(q.render()))
            .take(limit)
            .collect();
        tracing::debug!(count = queries.len(), limit, "Synthesized queries");
        queries
    }

    /// Plain keyword query for job-board sources, which take no dork operators.
    pub fn keyword_query(&self, criteria: &SearchCriteria) -> String {
        criteria.clean_keywords().join(" ")
    }

    fn qualifiers(&self, criteria: &SearchCriteria) -> Vec<Vec<String>> {
        let mut groups = Vec::new();
        if criteria.remote {
            groups.push(vec!["remote".to_string(), "work from home".to_string()]);
        }
        if let Some(min) = criteria.salary_min {
            groups.push(vec![salary_floor(min)]);
        }
        if let Some(level) = criteria.experience_level {
            groups.push(
                experience_synonyms(level)
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            );
        }
        if let Some(location) = criteria.location.as_deref().map(str::trim)
            && !location.is_empty()
        {
            groups.push(vec![location.to_string()]);
        }
        groups
    }

    /// Singletons first, then pairs, bounded by `max_variants`. Only for
    /// multi-keyword criteria.
    fn variants(&self, keywords: &[String]) -> Vec<Vec<String>> {
        if keywords.len() < 2 {
            return Vec::new();
        }
        let singles = keywords.iter().map(|k| vec![k.clone()]);
        let pairs = keywords.iter().enumerate().flat_map(|(i, a)| {
            keywords[i + 1..]
                .iter()
                .map(move |b| vec![a.clone(), b.clone()])
        });
        singles.chain(pairs).take(self.config.max_variants).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthesizer() -> QuerySynthesizer {
        QuerySynthesizer::new(QueryConfig::default())
    }

    fn rendered(criteria: &SearchCriteria) -> Vec<String> {
        synthesizer()
            .generate(criteria)
            .iter()
            .map(DorkQuery::render)
            .collect()
    }

    #[test]
    fn test_single_keyword_scoped_queries() {
        let queries = rendered(&SearchCriteria::new(["rust developer"]));

        assert_eq!(queries[0], "site:linkedin.com/jobs \"rust developer\"");
        assert_eq!(queries[1], "site:indeed.com \"rust developer\"");
        assert_eq!(
            queries[8],
            "\"rust developer\" \"job description\" (filetype:pdf OR filetype:doc OR filetype:docx)"
        );
        assert_eq!(queries[9], "\"rust developer\" inurl:careers");
        assert_eq!(queries.len(), 10);
    }

    #[test]
    fn test_qualifiers_and_exclusions() {
        let criteria = SearchCriteria::new(["platform engineer"])
            .with_remote(true)
            .with_salary(Some(120_000), None)
            .with_experience_level(ExperienceLevel::Senior)
            .with_location("New York")
            .with_exclude_keywords(["intern", "unpaid work"]);

        let queries = rendered(&criteria);

        assert_eq!(
            queries[0],
            "site:linkedin.com/jobs \"platform engineer\" (remote OR \"work from home\") $120k+ \
             (senior OR lead OR principal) \"New York\" -intern -\"unpaid work\""
        );
    }

    #[test]
    fn test_multiple_keywords_are_or_joined_with_variants() {
        let criteria = SearchCriteria::new(["rust", "golang", "zig"]);
        let queries = rendered(&criteria);

        assert_eq!(queries[0], "site:linkedin.com/jobs (rust OR golang OR zig)");
        assert!(queries.contains(&"site:linkedin.com/jobs rust".to_string()));
        assert!(queries.contains(&"site:glassdoor.com golang".to_string()));
        assert!(!queries.contains(&"site:ziprecruiter.com rust".to_string()));
    }

    #[test]
    fn test_no_duplicates_and_capped() {
        let cases = [
            SearchCriteria::new(["a", "b", "c", "d", "e"]).with_max_results(1000),
            SearchCriteria::new(["rust", "rust"]).with_max_results(50),
            SearchCriteria::new(["rust"]).with_max_results(3),
            SearchCriteria::new(["rust", "go"]).with_remote(true).with_max_results(7),
        ];
        for criteria in cases {
            let queries = rendered(&criteria);
            let unique: HashSet<_> = queries.iter().collect();
            assert_eq!(unique.len(), queries.len(), "duplicates in {queries:?}");
            assert!(queries.len() <= criteria.max_results.min(20));
            assert!(!queries.is_empty());
        }
    }

    #[test]
    fn test_generation_is_deterministic() {
        let criteria = SearchCriteria::new(["data", "ml engineer"])
            .with_experience_level(ExperienceLevel::Entry);
        assert_eq!(rendered(&criteria), rendered(&criteria));
    }

    #[test]
    fn test_salary_floor_formats() {
        assert_eq!(salary_floor(90_000), "$90k+");
        assert_eq!(salary_floor(65_500), "$65500+");
    }

    #[test]
    fn test_keyword_query_is_plain() {
        let criteria = SearchCriteria::new([" rust ", "", "tokio"]).with_remote(true);
        assert_eq!(synthesizer().keyword_query(&criteria), "rust tokio");
    }
}
