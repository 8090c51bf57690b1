//! Application configuration for Triangulate.
//!
//! User config lives at `~/.triangulate/triangulate.toml`.
//! CLI flags override config file values, which override defaults.
//! API keys are never stored in the file, only the names of the
//! environment variables that hold them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ResearchError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "triangulate.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".triangulate";

// ---------------------------------------------------------------------------
// Config structs (matching triangulate.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// AI-answer search service.
    #[serde(default)]
    pub ai_search: AiSearchConfig,

    /// Organic web search service.
    #[serde(default)]
    pub web_search: WebSearchConfig,

    /// Completion service used for answer synthesis.
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// Custom-URL content extraction.
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Balance audit thresholds.
    #[serde(default)]
    pub balance: BalanceConfig,

    /// Optional system-instruction overrides.
    #[serde(default)]
    pub prompts: PromptsConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Maximum results kept per source type in the candidate pool.
    #[serde(default = "default_max_results_per_source")]
    pub max_results_per_source: usize,

    /// Answer language when the request does not name one.
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            max_results_per_source: default_max_results_per_source(),
            language: default_language(),
        }
    }
}

fn default_max_results_per_source() -> usize {
    10
}
fn default_language() -> String {
    "english".into()
}

/// `[ai_search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSearchConfig {
    /// Name of the env var holding the API key.
    #[serde(default = "default_ai_key_env")]
    pub api_key_env: String,

    /// Structured search endpoint (primary call).
    #[serde(default = "default_ai_search_endpoint")]
    pub search_endpoint: String,

    /// Chat-completion endpoint (fallback call).
    #[serde(default = "default_ai_chat_endpoint")]
    pub chat_endpoint: String,

    /// Model used by the chat fallback.
    #[serde(default = "default_ai_model")]
    pub model: String,

    /// Results requested from the search endpoint.
    #[serde(default = "default_max_results")]
    pub max_results: u32,

    #[serde(default = "default_vendor_timeout")]
    pub timeout_secs: u64,
}

impl Default for AiSearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_ai_key_env(),
            search_endpoint: default_ai_search_endpoint(),
            chat_endpoint: default_ai_chat_endpoint(),
            model: default_ai_model(),
            max_results: default_max_results(),
            timeout_secs: default_vendor_timeout(),
        }
    }
}

fn default_ai_key_env() -> String {
    "PERPLEXITY_API_KEY".into()
}
fn default_ai_search_endpoint() -> String {
    "https://api.perplexity.ai/search".into()
}
fn default_ai_chat_endpoint() -> String {
    "https://api.perplexity.ai/chat/completions".into()
}
fn default_ai_model() -> String {
    "sonar-pro".into()
}
fn default_max_results() -> u32 {
    10
}
fn default_vendor_timeout() -> u64 {
    30
}

/// `[web_search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default = "default_web_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_web_endpoint")]
    pub endpoint: String,

    /// Country code sent as `gl`.
    #[serde(default = "default_country")]
    pub country: String,

    /// Interface language sent as `hl`.
    #[serde(default = "default_locale")]
    pub locale: String,

    #[serde(default = "default_max_results")]
    pub num_results: u32,

    #[serde(default = "default_vendor_timeout")]
    pub timeout_secs: u64,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_web_key_env(),
            endpoint: default_web_endpoint(),
            country: default_country(),
            locale: default_locale(),
            num_results: default_max_results(),
            timeout_secs: default_vendor_timeout(),
        }
    }
}

fn default_web_key_env() -> String {
    "SERPER_API_KEY".into()
}
fn default_web_endpoint() -> String {
    "https://google.serper.dev/search".into()
}
fn default_country() -> String {
    "us".into()
}
fn default_locale() -> String {
    "en".into()
}

/// `[synthesis]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default = "default_synthesis_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_synthesis_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_synthesis_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_synthesis_timeout")]
    pub timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_synthesis_key_env(),
            endpoint: default_synthesis_endpoint(),
            model: default_synthesis_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_synthesis_timeout(),
        }
    }
}

fn default_synthesis_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_synthesis_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".into()
}
fn default_synthesis_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    1500
}
fn default_synthesis_timeout() -> u64 {
    120
}

/// `[extraction]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Per-URL fetch timeout.
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,

    /// Responses larger than this are rejected.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,

    /// Minimum extracted text length for a strategy to succeed.
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,

    /// Extracted text is truncated to this many characters.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,

    /// Concurrent custom-URL fetches.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Whether the DOM-based readability strategy may run.
    #[serde(default = "default_true")]
    pub dom_parsing: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_extraction_timeout(),
            max_response_bytes: default_max_response_bytes(),
            min_content_chars: default_min_content_chars(),
            max_content_chars: default_max_content_chars(),
            concurrency: default_concurrency(),
            dom_parsing: true,
        }
    }
}

fn default_extraction_timeout() -> u64 {
    15
}
fn default_max_response_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_min_content_chars() -> usize {
    200
}
fn default_max_content_chars() -> usize {
    15_000
}
fn default_concurrency() -> usize {
    8
}
fn default_true() -> bool {
    true
}

/// `[balance]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceConfig {
    /// Allowed deviation from the fairness target, in percentage points.
    #[serde(default = "default_tolerance")]
    pub tolerance_pct: f64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            tolerance_pct: default_tolerance(),
        }
    }
}

fn default_tolerance() -> f64 {
    10.0
}

/// `[prompts]` section. Paths to files replacing the built-in instructions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_system_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_system_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Credentials (resolved from env at request time)
// ---------------------------------------------------------------------------

/// API keys resolved for one request. `None` means the source is skipped.
#[derive(Clone, Default)]
pub struct Credentials {
    pub ai_search: Option<String>,
    pub web_search: Option<String>,
    pub synthesis: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("ai_search", &self.ai_search.is_some())
            .field("web_search", &self.web_search.is_some())
            .field("synthesis", &self.synthesis.is_some())
            .finish()
    }
}

impl Credentials {
    /// Read every key named in the config from the process environment.
    pub fn from_env(config: &AppConfig) -> Self {
        Self::resolve(config, |name| std::env::var(name).ok())
    }

    /// Resolve keys through an arbitrary lookup (tests inject a map).
    pub fn resolve(config: &AppConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            ai_search: get(&config.ai_search.api_key_env),
            web_search: get(&config.web_search.api_key_env),
            synthesis: get(&config.synthesis.api_key_env),
        }
    }
}

/// Return the key or a configuration error naming the env var to set.
pub fn require_api_key<'a>(key: Option<&'a str>, service: &str, env_var: &str) -> Result<&'a str> {
    key.ok_or_else(|| {
        ResearchError::config(format!(
            "{service} API key not found. Set the {env_var} environment variable."
        ))
    })
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.triangulate/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ResearchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.triangulate/triangulate.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ResearchError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ResearchError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ResearchError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = render_config(&AppConfig::default())?;

    std::fs::write(&path, content).map_err(|e| ResearchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Serialize a config to pretty TOML.
pub fn render_config(config: &AppConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| ResearchError::config(e.to_string()))
}
