//! Configuration loading and management

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::UtcOffset;
use time::macros::format_description;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default = "PlatformConfig::instagram")]
    pub instagram: PlatformConfig,

    #[serde(default = "PlatformConfig::facebook")]
    pub facebook: PlatformConfig,
}

/// Where rules are read from at run time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_rules_path")]
    pub rules_path: PathBuf,

    #[serde(default)]
    pub rule_source: RuleSource,

    #[serde(default = "default_state_db_path")]
    pub state_db_path: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Bound to `{linkPageUrl}`; the built-in placeholder when unset
    #[serde(default)]
    pub link_page_url: Option<String>,

    /// Server offset like "+02:00"; unset uses each event's own offset
    #[serde(default)]
    pub utc_offset: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Longest single wait between send attempts, Retry-After included
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub access_token_env: String,

    #[serde(default = "default_graph_base_url")]
    pub base_url: String,

    #[serde(default = "default_graph_api_version")]
    pub api_version: String,
}

// Default value functions
fn default_rules_path() -> PathBuf {
    PathBuf::from("./rules.toml")
}

fn default_state_db_path() -> PathBuf {
    PathBuf::from("./linkreply.sqlite")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_concurrent() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_graph_base_url() -> String {
    linkreply_adapters::graph::DEFAULT_BASE_URL.to_string()
}

fn default_graph_api_version() -> String {
    linkreply_adapters::graph::DEFAULT_API_VERSION.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            dispatch: DispatchConfig::default(),
            instagram: PlatformConfig::instagram(),
            facebook: PlatformConfig::facebook(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            rules_path: default_rules_path(),
            rule_source: RuleSource::default(),
            state_db_path: default_state_db_path(),
            log_level: default_log_level(),
            dry_run: default_true(),
            link_page_url: None,
            utc_offset: None,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_concurrent: default_max_concurrent(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            access_token_env: String::new(),
            base_url: default_graph_base_url(),
            api_version: default_graph_api_version(),
        }
    }
}

impl PlatformConfig {
    fn instagram() -> Self {
        Self {
            access_token_env: "INSTAGRAM_ACCESS_TOKEN".to_string(),
            ..Self::default()
        }
    }

    fn facebook() -> Self {
        Self {
            access_token_env: "FACEBOOK_PAGE_ACCESS_TOKEN".to_string(),
            ..Self::default()
        }
    }
}

impl DispatchConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }
}

impl GeneralConfig {
    /// Parse `utc_offset` ("+02:00", "-05:30", "Z")
    pub fn utc_offset(&self) -> Result<Option<UtcOffset>> {
        let Some(raw) = self.utc_offset.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if raw.is_empty() {
            return Ok(None);
        }
        if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
            return Ok(Some(UtcOffset::UTC));
        }

        let format = format_description!("[offset_hour sign:mandatory]:[offset_minute]");
        UtcOffset::parse(raw, format)
            .map(Some)
            .with_context(|| format!("Invalid general.utc_offset '{}'", raw))
    }

    /// `link_page_url`, with blank treated as unset
    pub fn link_page_url(&self) -> Option<String> {
        self.link_page_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Try default config path if none specified
        let default_path = PathBuf::from("./linkreply.toml");
        let path = config_path.unwrap_or(&default_path);

        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        } else if config_path.is_some() {
            // User specified a path that doesn't exist
            bail!("Config file not found: {}", path.display());
        }

        // Add environment variable overrides
        builder = builder.add_source(
            config::Environment::with_prefix("LINKREPLY")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Generate example configuration as TOML string
    pub fn example_toml() -> String {
        r#"# linkreply configuration

[general]
rules_path = "./rules.toml"
rule_source = "file"  # file, sqlite
state_db_path = "./linkreply.sqlite"
log_level = "info"
dry_run = true
link_page_url = "https://linkinbio.example/your-page"
# Evaluate out_of_hours triggers and render {date}/{time} at a fixed offset.
# Unset: each event's own timestamp offset is used.
# utc_offset = "+02:00"

[dispatch]
queue_capacity = 256
max_concurrent = 4
max_attempts = 3
retry_backoff_ms = 500
# Cap on any retry wait, including a platform's Retry-After
max_retry_delay_ms = 30000

[instagram]
enabled = false
access_token_env = "INSTAGRAM_ACCESS_TOKEN"
base_url = "https://graph.facebook.com"
api_version = "v19.0"

[facebook]
enabled = false
access_token_env = "FACEBOOK_PAGE_ACCESS_TOKEN"
base_url = "https://graph.facebook.com"
api_version = "v19.0"
"#
        .to_string()
    }
}
