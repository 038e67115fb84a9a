use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use jobdork_client::{ReqwestFetcher, TorCircuit};
use jobdork_core::config::{ExecutorConfig, QueryConfig};
use jobdork_core::models::{EmploymentType, ExperienceLevel};
use jobdork_core::query::QuerySynthesizer;
use jobdork_core::traits::{CircuitControl, Renderer};
use jobdork_core::{
    ScrapeConfig, ScrapeOrchestrator, ScrapeResult, SearchCriteria, SourceConfig,
    TracingRequestReporter,
};

#[derive(Parser)]
#[command(name = "jobdork", version, about = "Find job postings through search-engine dorks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scrape session and print the jobs as JSON
    Scrape {
        #[command(flatten)]
        criteria: CriteriaArgs,

        /// Sources to query (google, duckduckgo, weworkremotely)
        #[arg(
            short,
            long = "source",
            env = "JOBDORK_SOURCES",
            value_delimiter = ',',
            default_value = "google"
        )]
        sources: Vec<String>,

        /// Route fetches through this proxy (e.g. socks5h://127.0.0.1:9050)
        #[arg(long, env = "JOBDORK_PROXY")]
        proxy: Option<String>,

        /// Tor control port used to request a new circuit when blocked (e.g. 127.0.0.1:9051)
        #[arg(long, env = "JOBDORK_TOR_CONTROL", requires = "proxy")]
        tor_control: Option<String>,

        /// Password for the Tor control port
        #[arg(long, env = "JOBDORK_TOR_PASSWORD", hide_env_values = true)]
        tor_password: Option<String>,

        /// Requests per second allowed per target host
        #[arg(long, env = "JOBDORK_RATE", default_value_t = 1)]
        rate: u32,

        /// Per-request timeout in seconds
        #[arg(long, env = "JOBDORK_REQUEST_TIMEOUT", default_value_t = 30)]
        request_timeout: u64,

        /// Overall session deadline in seconds
        #[arg(long, env = "JOBDORK_DEADLINE")]
        deadline: Option<u64>,

        /// Render thin pages in headless Chromium
        #[arg(long, default_value_t = false)]
        browser: bool,

        /// Log every request at info level
        #[arg(long, default_value_t = false)]
        log_requests: bool,

        /// Write JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the dork queries a scrape would run, without network access
    Queries {
        #[command(flatten)]
        criteria: CriteriaArgs,

        /// Restrict site-scoped queries to these domains
        #[arg(long = "scope", value_delimiter = ',')]
        scopes: Vec<String>,
    },
}

#[derive(Args)]
struct CriteriaArgs {
    /// Keywords to search for; multi-word keywords are searched as phrases
    #[arg(required = true)]
    keywords: Vec<String>,

    #[arg(short, long)]
    location: Option<String>,

    #[arg(short, long, default_value_t = false)]
    remote: bool,

    #[arg(long)]
    salary_min: Option<u32>,

    #[arg(long)]
    salary_max: Option<u32>,

    /// full-time, part-time, contract, temporary, internship
    #[arg(short = 't', long = "employment-type", value_delimiter = ',')]
    employment_types: Vec<EmploymentType>,

    /// Drop postings mentioning any of these terms
    #[arg(short = 'x', long = "exclude", value_delimiter = ',')]
    exclude: Vec<String>,

    /// entry, mid, senior, executive
    #[arg(short, long)]
    experience: Option<ExperienceLevel>,

    #[arg(short = 'n', long, env = "JOBDORK_MAX_RESULTS", default_value_t = 50)]
    max_results: usize,
}

impl CriteriaArgs {
    fn into_criteria(self) -> Result<SearchCriteria> {
        let mut criteria = SearchCriteria::new(self.keywords)
            .with_remote(self.remote)
            .with_salary(self.salary_min, self.salary_max)
            .with_employment_types(self.employment_types)
            .with_exclude_keywords(self.exclude)
            .with_max_results(self.max_results);
        if let Some(location) = self.location {
            criteria = criteria.with_location(location);
        }
        if let Some(level) = self.experience {
            criteria = criteria.with_experience_level(level);
        }
        criteria.validate().map_err(|e| anyhow::anyhow!(e))?;
        Ok(criteria)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("jobdork=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape {
            criteria,
            sources,
            proxy,
            tor_control,
            tor_password,
            rate,
            request_timeout,
            deadline,
            browser,
            log_requests,
            output,
        } => {
            let criteria = criteria.into_criteria()?;
            let mut config = ScrapeConfig::default()
                .with_sources(resolve_sources(&sources)?)
                .with_executor(
                    ExecutorConfig::default()
                        .with_rate(rate.max(1), rate.max(1))
                        .with_timeout(Duration::from_secs(request_timeout)),
                );
            if let Some(secs) = deadline {
                config = config.with_session_deadline(Duration::from_secs(secs));
            }

            let timeout = Duration::from_secs(request_timeout);
            let circuit = proxy.map(|proxy| {
                let circuit = TorCircuit::new(proxy);
                let circuit = match tor_control {
                    Some(addr) => circuit.with_control(addr, tor_password),
                    None => circuit,
                };
                Arc::new(circuit)
            });
            let fetcher = match &circuit {
                Some(circuit) => ReqwestFetcher::for_circuit(timeout, circuit.as_ref()),
                None => ReqwestFetcher::with_timeout(timeout),
            }
            .context("Failed to create HTTP client")?;
            let circuit = circuit.map(|c| c as Arc<dyn CircuitControl>);

            let result = if browser {
                scrape_with_browser(config, fetcher, circuit, &criteria, log_requests).await?
            } else {
                let orchestrator = ScrapeOrchestrator::new(config, fetcher);
                run_session(orchestrator, circuit, &criteria, log_requests).await?
            };
            write_result(&result, output.as_deref())?;
        }
        Commands::Queries { criteria, scopes } => {
            let criteria = criteria.into_criteria()?;
            let mut query_config = QueryConfig::default();
            if !scopes.is_empty() {
                query_config = query_config.with_scopes(scopes);
            }
            for query in QuerySynthesizer::new(query_config).generate(&criteria) {
                println!("{query}");
            }
        }
    }

    Ok(())
}

fn resolve_sources(names: &[String]) -> Result<Vec<SourceConfig>> {
    names
        .iter()
        .filter(|name| !name.trim().is_empty())
        .map(|name| {
            SourceConfig::preset(name).with_context(|| format!("Unknown source: {name}"))
        })
        .collect()
}

#[cfg(feature = "browser")]
async fn scrape_with_browser(
    config: ScrapeConfig,
    fetcher: ReqwestFetcher,
    circuit: Option<Arc<dyn CircuitControl>>,
    criteria: &SearchCriteria,
    log_requests: bool,
) -> Result<ScrapeResult> {
    let renderer = jobdork_client::ChromiumRenderer::launch()
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to launch headless browser")?;
    let orchestrator = ScrapeOrchestrator::with_renderer(config, fetcher, renderer);
    run_session(orchestrator, circuit, criteria, log_requests).await
}

#[cfg(not(feature = "browser"))]
async fn scrape_with_browser(
    _config: ScrapeConfig,
    _fetcher: ReqwestFetcher,
    _circuit: Option<Arc<dyn CircuitControl>>,
    _criteria: &SearchCriteria,
    _log_requests: bool,
) -> Result<ScrapeResult> {
    anyhow::bail!("--browser requires jobdork built with the `browser` feature")
}

/// Run one session, stopping cleanly on Ctrl-C.
async fn run_session<R: Renderer>(
    mut orchestrator: ScrapeOrchestrator<ReqwestFetcher, R>,
    circuit: Option<Arc<dyn CircuitControl>>,
    criteria: &SearchCriteria,
    log_requests: bool,
) -> Result<ScrapeResult> {
    if log_requests {
        orchestrator = orchestrator.with_reporter(Arc::new(TracingRequestReporter));
    }
    if let Some(circuit) = circuit {
        orchestrator = orchestrator.with_circuit(circuit);
    }

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, finishing with the jobs found so far");
                cancel.cancel();
            }
        })
    };

    let result = orchestrator.scrape_with_cancel(criteria, &cancel).await;
    interrupt.abort();
    orchestrator.shutdown().await;

    let result = result.map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!(
        jobs = result.jobs.len(),
        duplicates = result.metadata.duplicates,
        errors = result.metadata.errors.len(),
        "Scrape complete"
    );
    Ok(result)
}

fn write_result(result: &ScrapeResult, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(result)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "Results written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrape_args_build_criteria() {
        let cli = Cli::try_parse_from([
            "jobdork",
            "scrape",
            "rust developer",
            "--remote",
            "-t",
            "full-time,contract",
            "-x",
            "senior",
            "-e",
            "mid",
            "-n",
            "20",
            "--source",
            "google,wwr",
        ])
        .unwrap();

        let Commands::Scrape {
            criteria, sources, ..
        } = cli.command
        else {
            panic!("expected scrape command");
        };
        let criteria = criteria.into_criteria().unwrap();
        assert_eq!(criteria.keywords, ["rust developer"]);
        assert!(criteria.remote);
        assert_eq!(
            criteria.employment_types,
            [EmploymentType::FullTime, EmploymentType::Contract]
        );
        assert_eq!(criteria.experience_level, Some(ExperienceLevel::Mid));
        assert_eq!(criteria.max_results, 20);

        let sources = resolve_sources(&sources).unwrap();
        let names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["google", "weworkremotely"]);
    }

    #[test]
    fn test_tor_control_requires_proxy() {
        let result = Cli::try_parse_from([
            "jobdork",
            "scrape",
            "rust",
            "--tor-control",
            "127.0.0.1:9051",
        ]);
        assert!(result.is_err());

        let cli = Cli::try_parse_from([
            "jobdork",
            "scrape",
            "rust",
            "--proxy",
            "socks5h://127.0.0.1:9050",
            "--tor-control",
            "127.0.0.1:9051",
        ])
        .unwrap();
        let Commands::Scrape {
            proxy, tor_control, ..
        } = cli.command
        else {
            panic!("expected scrape command");
        };
        assert_eq!(proxy.as_deref(), Some("socks5h://127.0.0.1:9050"));
        assert_eq!(tor_control.as_deref(), Some("127.0.0.1:9051"));
    }

    #[test]
    fn test_unknown_source_is_rejected() {
        let err = resolve_sources(&["altavista".to_string()]).unwrap_err();
        assert!(err.to_string().contains("altavista"));
    }

    #[test]
    fn test_inverted_salary_range_is_rejected() {
        let cli = Cli::try_parse_from([
            "jobdork",
            "queries",
            "rust",
            "--salary-min",
            "150000",
            "--salary-max",
            "90000",
        ])
        .unwrap();
        let Commands::Queries { criteria, .. } = cli.command else {
            panic!("expected queries command");
        };
        assert!(criteria.into_criteria().is_err());
    }
}
