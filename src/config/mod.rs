use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 8700;
const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL_PRO: &str = "gemini-2.0-flash-exp";
const DEFAULT_MODEL_FLASH: &str = "gemini-1.5-flash";
const DEFAULT_MAX_COMMENTS: usize = 20;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETENTION_DAYS: u32 = 30;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── GithubConfig ─────────────────────────────────────────────────────────────

/// GitHub App credentials and API tuning (`[github]` in config.toml; the
/// secrets normally arrive via environment variables instead).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GithubConfig {
    /// GitHub App ID (GITHUB_APP_ID env var).
    pub app_id: Option<String>,
    /// PEM-encoded App private key (GITHUB_APP_PRIVATE_KEY env var), or a
    /// path to the PEM file (GITHUB_APP_PRIVATE_KEY_PATH).
    pub private_key: Option<String>,
    pub private_key_path: Option<PathBuf>,
    /// Shared secret for webhook signature verification (GITHUB_WEBHOOK_SECRET).
    pub webhook_secret: Option<String>,
    /// API base URL override, for GitHub Enterprise installs.
    pub api_url: Option<String>,
}

// ─── GeminiConfig ─────────────────────────────────────────────────────────────

/// Gemini API configuration (`[gemini]` in config.toml).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GeminiConfig {
    /// API key (GEMINI_API_KEY env var).
    pub api_key: Option<String>,
    /// Full-capability model for large or complex pull requests.
    pub model_pro: Option<String>,
    /// Fast model for everything else.
    pub model_flash: Option<String>,
    pub api_url: Option<String>,
}

// ─── ReviewConfig ─────────────────────────────────────────────────────────────

/// Review pipeline tuning (`[review]` in config.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Hard cap on inline comments per pull request. Default: 20.
    pub max_comments: usize,
    /// Task-level retries after the initial attempt. Default: 3.
    pub max_retries: u32,
    /// Days of completed/failed sessions to keep (0 = forever). Default: 30.
    pub retention_days: u32,
    /// Minutes before a stuck in_progress session is marked failed. Default: 60.
    pub stale_after_minutes: u32,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            max_comments: DEFAULT_MAX_COMMENTS,
            max_retries: DEFAULT_MAX_RETRIES,
            retention_days: DEFAULT_RETENTION_DAYS,
            stale_after_minutes: 60,
        }
    }
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// HTTP server port (default: 8700).
    port: Option<u16>,
    /// Bind address (default: "127.0.0.1"; use "0.0.0.0" behind a proxy).
    bind_address: Option<String>,
    /// Log level filter string, e.g. "debug", "info,revd=trace" (default: "info").
    log: Option<String>,
    /// Log output format: "pretty" (default) | "json".
    log_format: Option<String>,
    github: Option<GithubConfig>,
    gemini: Option<GeminiConfig>,
    review: Option<ReviewConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── AppConfig ────────────────────────────────────────────────────────────────

/// Fully resolved daemon configuration.
///
/// Built once at startup by [`AppConfig::new`]; every secret the pipeline
/// needs is validated there so a misconfigured deployment fails before it
/// binds a socket.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub bind_address: String,
    pub data_dir: PathBuf,
    pub log: String,
    pub log_format: String,
    /// GitHub App ID, signed into every App JWT as `iss`.
    pub github_app_id: String,
    /// PEM-encoded RSA private key for RS256 App JWTs.
    pub github_private_key: String,
    pub github_webhook_secret: String,
    pub github_api_url: String,
    pub gemini_api_key: String,
    pub gemini_api_url: String,
    pub gemini_model_pro: String,
    pub gemini_model_flash: String,
    pub review: ReviewConfig,
}

impl AppConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    ///
    /// Fails if any required secret (App ID, private key, webhook secret,
    /// Gemini key) is missing after all three layers are consulted.
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> anyhow::Result<Self> {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let toml = load_toml(&data_dir).unwrap_or_default();
        let github = toml.github.unwrap_or_default();
        let gemini = toml.gemini.unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());
        let bind_address = bind_address
            .or(std::env::var("REVD_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);
        let log_format = std::env::var("REVD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let github_app_id = env_or("GITHUB_APP_ID", github.app_id)
            .context("GITHUB_APP_ID is required (env var or [github].app_id)")?;

        let github_private_key = match env_or("GITHUB_APP_PRIVATE_KEY", github.private_key) {
            Some(pem) => pem,
            None => {
                let path = std::env::var("GITHUB_APP_PRIVATE_KEY_PATH")
                    .ok()
                    .map(PathBuf::from)
                    .or(github.private_key_path)
                    .context("GITHUB_APP_PRIVATE_KEY or GITHUB_APP_PRIVATE_KEY_PATH is required")?;
                std::fs::read_to_string(&path)
                    .with_context(|| format!("reading App private key from {}", path.display()))?
            }
        };
        if !github_private_key.contains("PRIVATE KEY") {
            bail!("GitHub App private key does not look like a PEM document");
        }

        let github_webhook_secret = env_or("GITHUB_WEBHOOK_SECRET", github.webhook_secret)
            .context("GITHUB_WEBHOOK_SECRET is required (env var or [github].webhook_secret)")?;

        let gemini_api_key = env_or("GEMINI_API_KEY", gemini.api_key)
            .context("GEMINI_API_KEY is required (env var or [gemini].api_key)")?;

        let github_api_url = env_or("GITHUB_API_URL", github.api_url)
            .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string());
        let gemini_api_url = env_or("GEMINI_API_URL", gemini.api_url)
            .unwrap_or_else(|| DEFAULT_GEMINI_API_URL.to_string());
        let gemini_model_pro = env_or("GEMINI_MODEL_PRO", gemini.model_pro)
            .unwrap_or_else(|| DEFAULT_MODEL_PRO.to_string());
        let gemini_model_flash = env_or("GEMINI_MODEL_FLASH", gemini.model_flash)
            .unwrap_or_else(|| DEFAULT_MODEL_FLASH.to_string());

        let review = toml.review.unwrap_or_default();

        Ok(Self {
            port,
            bind_address,
            data_dir,
            log,
            log_format,
            github_app_id,
            github_private_key,
            github_webhook_secret,
            github_api_url,
            gemini_api_key,
            gemini_api_url,
            gemini_model_pro,
            gemini_model_flash,
            review,
        })
    }
}

fn env_or(var: &str, fallback: Option<String>) -> Option<String> {
    std::env::var(var).ok().filter(|s| !s.is_empty()).or(fallback)
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/revd or ~/.local/share/revd
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("revd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("revd");
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("revd");
        }
    }
    // Fallback
    PathBuf::from(".revd")
}
