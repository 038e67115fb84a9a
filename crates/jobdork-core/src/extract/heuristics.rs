//! Text heuristics used to fill in fields search results rarely state
//! explicitly: company, location, remote status and employment type.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::config::JobSite;
use crate::error::AppError;
use crate::models::EmploymentType;

const CAP_NAME: &str = r"[A-Z0-9][\w&.'’-]*(?:\s+(?:&\s+)?[A-Z0-9][\w&.'’-]*){0,3}";

static AT_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?:^|\s)(?:at|@)\s+(?P<company>{CAP_NAME})"))
        .expect("hard-coded company regex")
});

static IS_HIRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?P<company>{CAP_NAME})\s+(?:is|are)\s+(?:now\s+)?hiring"
    ))
    .expect("hard-coded company regex")
});

static JOIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b[Jj]oin\s+(?:the\s+team\s+at\s+)?(?P<company>{CAP_NAME})"
    ))
    .expect("hard-coded company regex")
});

static TITLE_AT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<role>.+?)\s+(?:at|@)\s+(?P<company>[A-Z0-9].*)$")
        .expect("hard-coded title regex")
});

static TITLE_HIRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<company>.+?)\s+hiring\s+(?P<role>.+?)(?:\s+in\s+(?P<location>.+))?$")
        .expect("hard-coded title regex")
});

static SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+[-–—·]\s+|\s*\|\s*").expect("hard-coded separator regex")
});

/// Words that end a company name when they trail it.
const COMPANY_STOP_WORDS: &[&str] = &[
    "remote", "hybrid", "onsite", "on-site", "today", "now", "full-time", "part-time",
    "contract", "jobs", "careers",
];

/// Captures that are never company names.
const NOT_COMPANIES: &[&str] = &[
    "us", "our team", "the team", "jobs", "careers", "home", "remote", "we", "you", "hiring",
];

const CITIES: &[&str] = &[
    "New York",
    "San Francisco",
    "London",
    "Berlin",
    "Austin",
    "Seattle",
    "Boston",
    "Chicago",
    "Los Angeles",
    "Toronto",
    "Amsterdam",
    "Paris",
    "Dublin",
    "Denver",
    "Atlanta",
    "Singapore",
    "Sydney",
    "Bangalore",
];

const REMOTE_KEYWORDS: &[&str] = &["remote", "work from home", "wfh", "distributed", "anywhere"];

/// Checked in order; the first category with a matching keyword wins.
const EMPLOYMENT_KEYWORDS: &[(EmploymentType, &[&str])] = &[
    (EmploymentType::Internship, &["internship", "intern", "interns"]),
    (EmploymentType::PartTime, &["part-time", "part time", "parttime"]),
    (
        EmploymentType::Contract,
        &["contract", "contractor", "freelance", "c2c"],
    ),
    (EmploymentType::Temporary, &["temporary", "temp", "seasonal"]),
    (
        EmploymentType::FullTime,
        &["full-time", "full time", "fulltime", "permanent"],
    ),
];

const JOB_KEYWORDS: &[&str] = &[
    "engineer",
    "developer",
    "manager",
    "analyst",
    "designer",
    "scientist",
    "architect",
    "specialist",
    "consultant",
    "administrator",
    "coordinator",
    "technician",
    "director",
    "lead",
    "intern",
    "job",
    "jobs",
    "position",
    "role",
    "opening",
    "vacancy",
];

const HIRING_PHRASES: &[&str] = &[
    "apply",
    "hiring",
    "join our team",
    "join us",
    "we are looking",
    "we're looking",
    "looking for",
    "responsibilities",
    "requirements",
    "qualifications",
    "job description",
    "years of experience",
];

/// Whole-word (or whole-phrase) containment. Both sides are expected lower-cased.
pub(crate) fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(i, _)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve a result link against the page URL, unwrapping search-engine
/// redirect links (`/url?q=`, DuckDuckGo `uddg=`).
///
/// Non-navigational links (`#`, `javascript:`, `mailto:`) give `Ok(None)`;
/// links that cannot be parsed at all are errors.
pub fn resolve_link(href: &str, base: &str) -> Result<Option<String>, AppError> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
    {
        return Ok(None);
    }

    let url = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(base)
            .and_then(|base| base.join(href))
            .map_err(|e| AppError::ParseError(format!("unresolvable link {href:?}: {e}")))?,
        Err(e) => {
            return Err(AppError::ParseError(format!(
                "malformed link {href:?}: {e}"
            )));
        }
    };

    let redirect_param = match url.host_str() {
        Some(host) if host.contains("duckduckgo.") && url.path().starts_with("/l/") => {
            Some("uddg")
        }
        _ if url.path() == "/url" => Some("q"),
        _ => None,
    };
    let url = match redirect_param {
        Some(param) => {
            let target = url
                .query_pairs()
                .find(|(k, _)| k == param || (param == "q" && k == "url"))
                .map(|(_, v)| v.into_owned());
            match target.map(|t| Url::parse(&t)) {
                Some(Ok(target)) => target,
                Some(Err(e)) => {
                    return Err(AppError::ParseError(format!(
                        "malformed redirect target in {href:?}: {e}"
                    )));
                }
                None => return Ok(None),
            }
        }
        None => url,
    };

    match url.scheme() {
        "http" | "https" => Ok(Some(url.to_string())),
        _ => Ok(None),
    }
}

pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_lowercase()))
}

pub fn site_for_host<'a>(host: &str, sites: &'a [JobSite]) -> Option<&'a JobSite> {
    sites.iter().find(|site| site.matches_host(host))
}

/// Company from the first path segment of an ATS posting URL
/// (`boards.greenhouse.io/acme-corp/jobs/1` -> "Acme Corp").
pub fn company_from_ats(url: &str, sites: &[JobSite]) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let site = site_for_host(host, sites)?;
    if !site.company_in_path {
        return None;
    }
    let segment = parsed.path_segments()?.find(|s| !s.is_empty())?;
    if matches!(segment, "jobs" | "job" | "careers" | "embed" | "j") {
        return None;
    }
    clean_company(&humanize_slug(segment))
}

fn humanize_slug(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Company from hiring phrases in free text, tried in order:
/// "X is hiring", "Join X", "... at X".
pub fn company_from_text(text: &str) -> Option<String> {
    [&*IS_HIRING, &*JOIN, &*AT_IN_TEXT]
        .iter()
        .flat_map(|re| re.captures_iter(text))
        .find_map(|caps| clean_company(&caps["company"]))
}

/// Trim punctuation and trailing stop words; reject generic captures.
pub fn clean_company(raw: &str) -> Option<String> {
    let mut words: Vec<&str> = raw.split_whitespace().collect();
    while let Some(last) = words.last() {
        let bare = last.trim_end_matches(['.', ',', ';', ':', '!', '?', ')']);
        if bare.is_empty() || COMPANY_STOP_WORDS.contains(&bare.to_lowercase().as_str()) {
            words.pop();
        } else {
            break;
        }
    }
    let joined = words.join(" ");
    let company = joined
        .trim_matches(|c: char| c.is_whitespace() || ",;:!?|()".contains(c))
        .trim_end_matches('.')
        .to_string();
    if company.is_empty()
        || company.chars().count() > 80
        || NOT_COMPANIES.contains(&company.to_lowercase().as_str())
    {
        None
    } else {
        Some(company)
    }
}

/// Pieces of a search-result title.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TitleParts {
    pub title: String,
    /// From "Role at Company" or "Company hiring Role".
    pub company: Option<String>,
    /// From "Role - Company - City" style separators.
    pub split_company: Option<String>,
    pub location: Option<String>,
}

/// Split a SERP title such as `"Role - Company - City | Board"`.
pub fn decompose_title(raw: &str, sites: &[JobSite]) -> TitleParts {
    let raw = collapse_whitespace(raw);
    let mut parts: Vec<&str> = SEPARATOR
        .split(&raw)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    while parts.len() > 1 && parts.last().is_some_and(|p| is_board_suffix(p, sites)) {
        parts.pop();
    }

    let Some((head, rest)) = parts.split_first() else {
        return TitleParts::default();
    };

    let mut result = TitleParts {
        title: (*head).to_string(),
        ..TitleParts::default()
    };

    if let Some(caps) = TITLE_AT.captures(head) {
        result.title = caps["role"].trim().to_string();
        result.company = clean_company(&caps["company"]);
    } else if let Some(caps) = TITLE_HIRING.captures(head) {
        result.title = caps["role"].trim().to_string();
        result.company = clean_company(&caps["company"]);
        result.location = caps.name("location").map(|m| m.as_str().trim().to_string());
    }

    for part in rest {
        let lower = part.to_lowercase();
        let looks_like_location = find_city(part).is_some()
            || REMOTE_KEYWORDS.iter().any(|k| contains_word(&lower, k))
            || lower == "hybrid";
        if looks_like_location && result.location.is_none() {
            result.location = Some((*part).to_string());
        } else if result.split_company.is_none() && !looks_like_location {
            result.split_company = clean_company(part);
        }
    }
    result
}

fn is_board_suffix(part: &str, sites: &[JobSite]) -> bool {
    let lower = part.to_lowercase();
    lower == "jobs"
        || lower.ends_with(" jobs")
        || lower.ends_with(" careers")
        || sites.iter().any(|site| {
            lower == site.name.to_lowercase() || lower.contains(&site.domain)
        })
}

/// First gazetteer city mentioned in the text.
pub fn find_city(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    CITIES
        .iter()
        .copied()
        .find(|city| contains_word(&lower, &city.to_lowercase()))
}

pub fn is_remote(texts: &[&str]) -> bool {
    texts.iter().any(|text| {
        let lower = text.to_lowercase();
        REMOTE_KEYWORDS.iter().any(|k| contains_word(&lower, k))
    })
}

pub fn employment_type(text: &str) -> EmploymentType {
    let lower = text.to_lowercase();
    EMPLOYMENT_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| contains_word(&lower, k)))
        .map(|(kind, _)| *kind)
        .unwrap_or(EmploymentType::FullTime)
}

pub fn has_job_keyword(title: &str) -> bool {
    let lower = title.to_lowercase();
    JOB_KEYWORDS.iter().any(|k| contains_word(&lower, k))
}

pub fn has_hiring_language(text: &str) -> bool {
    let lower = text.to_lowercase();
    HIRING_PHRASES.iter().any(|k| lower.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_job_sites;

    #[test]
    fn test_contains_word_respects_boundaries() {
        assert!(contains_word("fully remote role", "remote"));
        assert!(contains_word("part-time, flexible", "part-time"));
        assert!(!contains_word("internal tooling", "intern"));
        assert!(!contains_word("remotely", "remote"));
    }

    #[test]
    fn test_resolve_google_redirect() {
        let link = resolve_link(
            "/url?q=https://boards.greenhouse.io/acme/jobs/123&sa=U&ved=x",
            "https://www.google.com/search?q=rust",
        )
        .unwrap();
        assert_eq!(
            link.as_deref(),
            Some("https://boards.greenhouse.io/acme/jobs/123")
        );
    }

    #[test]
    fn test_resolve_duckduckgo_redirect() {
        let link = resolve_link(
            "//duckduckgo.com/l/?uddg=https%3A%2F%2Fjobs.lever.co%2Fglobex%2Fabc&rut=1",
            "https://html.duckduckgo.com/html/?q=rust",
        )
        .unwrap();
        assert_eq!(link.as_deref(), Some("https://jobs.lever.co/globex/abc"));
    }

    #[test]
    fn test_resolve_relative_and_ignored_links() {
        assert_eq!(
            resolve_link("/remote-jobs/42", "https://weworkremotely.com/search")
                .unwrap()
                .as_deref(),
            Some("https://weworkremotely.com/remote-jobs/42")
        );
        assert_eq!(resolve_link("#", "https://x.test").unwrap(), None);
        assert_eq!(resolve_link("mailto:a@b.c", "https://x.test").unwrap(), None);
        assert!(resolve_link("http://[::1", "https://x.test").is_err());
    }

    #[test]
    fn test_company_from_ats_path() {
        let sites = default_job_sites();
        assert_eq!(
            company_from_ats("https://boards.greenhouse.io/acme-corp/jobs/1", &sites).as_deref(),
            Some("Acme Corp")
        );
        assert_eq!(
            company_from_ats("https://jobs.lever.co/globex/abc", &sites).as_deref(),
            Some("Globex")
        );
        assert_eq!(
            company_from_ats("https://www.indeed.com/viewjob?jk=1", &sites),
            None
        );
    }

    #[test]
    fn test_company_from_text_patterns() {
        assert_eq!(
            company_from_text("Great news: Initech is hiring engineers").as_deref(),
            Some("Initech")
        );
        assert_eq!(
            company_from_text("Join Umbrella Labs and build the future").as_deref(),
            Some("Umbrella Labs")
        );
        assert_eq!(
            company_from_text("Build infrastructure at Hooli Remote.").as_deref(),
            Some("Hooli")
        );
        assert_eq!(company_from_text("Join our team today"), None);
        assert_eq!(company_from_text("no company here"), None);
    }

    #[test]
    fn test_decompose_title_with_separators() {
        let parts = decompose_title(
            "Senior Rust Engineer - Acme Corp - Berlin | LinkedIn",
            &default_job_sites(),
        );
        assert_eq!(parts.title, "Senior Rust Engineer");
        assert_eq!(parts.split_company.as_deref(), Some("Acme Corp"));
        assert_eq!(parts.location.as_deref(), Some("Berlin"));
        assert_eq!(parts.company, None);
    }

    #[test]
    fn test_decompose_title_at_and_hiring_forms() {
        let sites = default_job_sites();
        let at = decompose_title("Platform Engineer at Acme Corp", &sites);
        assert_eq!(at.title, "Platform Engineer");
        assert_eq!(at.company.as_deref(), Some("Acme Corp"));

        let hiring = decompose_title(
            "Globex hiring Site Reliability Engineer in Austin, TX | LinkedIn",
            &sites,
        );
        assert_eq!(hiring.title, "Site Reliability Engineer");
        assert_eq!(hiring.company.as_deref(), Some("Globex"));
        assert_eq!(hiring.location.as_deref(), Some("Austin, TX"));
    }

    #[test]
    fn test_remote_and_city_detection() {
        assert!(is_remote(&["", "This is a fully remote position"]));
        assert!(is_remote(&["Anywhere"]));
        assert!(!is_remote(&["Berlin", "On-site in our office"]));
        assert_eq!(find_city("Hybrid role in San Francisco, CA"), Some("San Francisco"));
        assert_eq!(find_city("Somewhere else"), None);
    }

    #[test]
    fn test_employment_type_table() {
        assert_eq!(employment_type("Summer internship 2024"), EmploymentType::Internship);
        assert_eq!(employment_type("Part-time support role"), EmploymentType::PartTime);
        assert_eq!(employment_type("6 month contract"), EmploymentType::Contract);
        assert_eq!(employment_type("Temporary cover"), EmploymentType::Temporary);
        assert_eq!(employment_type("Backend engineer"), EmploymentType::FullTime);
    }

    #[test]
    fn test_keyword_signals() {
        assert!(has_job_keyword("Senior Backend Engineer"));
        assert!(!has_job_keyword("Rust 1.80 release notes"));
        assert!(has_hiring_language("We are looking for someone. Apply now"));
        assert!(!has_hiring_language("A blog post about compilers"));
    }
}
