//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;

use triangulate_core::{ProgressReporter, ResearchOutcome, Researcher};
use triangulate_extractor::{ContentExtractor, ExtractorOptions};
use triangulate_shared::{
    AppConfig, Credentials, ResearchQuery, ResearchResult, SourceKind, init_config, load_config,
    load_config_from, render_config,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Triangulate: answers balanced across AI search, web search and your own sources.
#[derive(Parser)]
#[command(
    name = "triangulate",
    version,
    about = "Research a question across AI search, web search and custom URLs.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.triangulate/triangulate.toml.
    #[arg(long, global = true, env = "TRIANGULATE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Answer output format.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    Markdown,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Research a question and print the synthesized answer.
    Ask {
        /// The question to research.
        query: String,

        /// Custom source URL (repeatable).
        #[arg(short, long = "url")]
        urls: Vec<String>,

        /// File with one custom URL per line.
        #[arg(long)]
        urls_file: Option<PathBuf>,

        /// Requested answer language.
        #[arg(short, long)]
        language: Option<String>,

        /// Output format.
        #[arg(short, long, default_value = "markdown")]
        format: OutputFormat,

        /// Write the answer to a file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Gather and rank sources without synthesizing an answer.
    Sources {
        /// The question to research.
        query: String,

        /// Custom source URL (repeatable).
        #[arg(short, long = "url")]
        urls: Vec<String>,
    },

    /// Fetch one page and print its extracted main content.
    Extract {
        /// Page URL (http or https).
        url: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "triangulate=info",
        1 => "triangulate=debug",
        _ => "triangulate=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Ask {
            query,
            urls,
            urls_file,
            language,
            format,
            out,
        } => {
            let config = resolve_config(config_path.as_deref())?;
            let mut custom_urls = urls;
            if let Some(path) = urls_file {
                custom_urls.extend(read_url_list(&path)?);
            }
            let request = ResearchQuery {
                query,
                custom_urls,
                language: language.unwrap_or_else(|| config.defaults.language.clone()),
            };
            cmd_ask(&config, &request, format, out.as_deref()).await
        }
        Command::Sources { query, urls } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_sources(&config, &query, &urls).await
        }
        Command::Extract { url } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_extract(&config, &url).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Custom URLs from a file: one per line, blank lines and `#` comments skipped.
fn read_url_list(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read URL list {}", path.display()))?;
    Ok(parse_url_list(&text))
}

fn parse_url_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

/// Flat JSON record: the result plus the diagnostics list.
#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    result: &'a ResearchResult,
    diagnostics: &'a [String],
}

async fn cmd_ask(
    config: &AppConfig,
    request: &ResearchQuery,
    format: OutputFormat,
    out: Option<&Path>,
) -> Result<()> {
    let researcher = Researcher::from_config(config)?;

    info!(
        query = %request.query,
        custom_urls = request.custom_urls.len(),
        language = %request.language,
        "researching"
    );

    let reporter = CliProgress::new();
    let outcome = researcher.research(request, &reporter).await?;

    let rendered = match format {
        OutputFormat::Markdown => format!("{}\n", outcome.result.answer),
        OutputFormat::Json => {
            let report = JsonReport {
                result: &outcome.result,
                diagnostics: &outcome.diagnostics,
            };
            format!("{}\n", serde_json::to_string_pretty(&report)?)
        }
    };

    match out {
        Some(path) => {
            std::fs::write(path, &rendered)
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            eprintln!("  Answer written to {}", path.display());
        }
        None => print!("{rendered}"),
    }

    print_summary(&outcome);
    Ok(())
}

fn print_summary(outcome: &ResearchOutcome) {
    let sources = &outcome.result.sources;
    eprintln!();
    for kind in SourceKind::ALL {
        let total = sources.iter().filter(|s| s.source == kind).count();
        if total == 0 {
            continue;
        }
        let used = sources.iter().filter(|s| s.source == kind && s.used).count();
        eprintln!("  {:<11} {used}/{total} used", kind.label());
    }
    for diagnostic in &outcome.diagnostics {
        eprintln!("  warning: {diagnostic}");
    }
    eprintln!("  Time:       {:.1}s", outcome.elapsed.as_secs_f64());
}

async fn cmd_sources(config: &AppConfig, query: &str, urls: &[String]) -> Result<()> {
    if query.trim().is_empty() {
        return Err(eyre!("query must not be empty"));
    }
    let researcher = Researcher::from_config(config)?;
    let reporter = CliProgress::new();
    let aggregation = researcher
        .aggregator()
        .aggregate(query.trim(), urls, &reporter)
        .await;
    reporter.spinner.finish_and_clear();
    let aggregation = aggregation?;

    for (i, source) in aggregation.pool.sources().iter().enumerate() {
        println!(
            "{:>2}. [{}] {:.2} {}",
            i + 1,
            source.source,
            source.relevance_score,
            source.title
        );
        if let Some(url) = &source.url {
            println!("      {url}");
        }
    }
    if aggregation.ai_answer.is_some() {
        println!();
        println!("  AI search returned its own analysis.");
    }
    for diagnostic in &aggregation.diagnostics {
        eprintln!("  warning: {diagnostic}");
    }
    Ok(())
}

async fn cmd_extract(config: &AppConfig, url: &str) -> Result<()> {
    let extractor = ContentExtractor::new(ExtractorOptions::from_config(&config.extraction))?;
    let extracted = extractor
        .try_extract(url)
        .await
        .map_err(|e| eyre!("could not extract {url}: {e}"))?;

    if let Some(title) = &extracted.title {
        println!("# {title}");
        println!();
    }
    println!("{}", extracted.content);
    eprintln!();
    eprintln!("  {} characters from {}", extracted.content.chars().count(), extracted.url);
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    println!("{}", render_config(&config)?);

    let credentials = Credentials::from_env(&config);
    let status = |present: bool| if present { "set" } else { "missing" };
    println!("# API keys");
    println!(
        "# {} = {}",
        config.ai_search.api_key_env,
        status(credentials.ai_search.is_some())
    );
    println!(
        "# {} = {}",
        config.web_search.api_key_env,
        status(credentials.web_search.is_some())
    );
    println!(
        "# {} = {}",
        config.synthesis.api_key_env,
        status(credentials.synthesis.is_some())
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn source_finished(&self, kind: SourceKind, results: usize) {
        self.spinner
            .println(format!("  ✓ {}: {results} results", kind.label()));
    }

    fn source_failed(&self, kind: SourceKind, reason: &str) {
        self.spinner.println(format!("  ✗ {}: {reason}", kind.label()));
    }

    fn done(&self, _outcome: &ResearchOutcome) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ask_collects_repeated_urls() {
        let cli = Cli::try_parse_from([
            "triangulate",
            "ask",
            "what eats urchins",
            "--url",
            "https://a.example/",
            "-u",
            "https://b.example/",
            "--format",
            "json",
        ])
        .unwrap();
        match cli.command {
            Command::Ask { query, urls, format, .. } => {
                assert_eq!(query, "what eats urchins");
                assert_eq!(urls.len(), 2);
                assert!(matches!(format, OutputFormat::Json));
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn url_list_skips_blanks_and_comments() {
        let text = "# sources\nhttps://a.example/\n\n  https://b.example/  \n#https://c.example/\n";
        assert_eq!(
            parse_url_list(text),
            vec!["https://a.example/", "https://b.example/"]
        );
    }
}
