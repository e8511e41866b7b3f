//! Application configuration for protocolsio.
//!
//! User config lives at `~/.protocolsio/protocolsio.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ProtocolsError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "protocolsio.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".protocolsio";

// ---------------------------------------------------------------------------
// Config structs (matching protocolsio.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub endpoints: EndpointsConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub harvest: HarvestConfig,

    #[serde(default)]
    pub index: IndexSection,
}

/// `[auth]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Name of the env var holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Literal token; prefer `token_env` so the secret stays out of the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            token: None,
        }
    }
}

impl AuthConfig {
    /// The configured token: the literal value if present, else the env var.
    pub fn resolve(&self) -> Option<String> {
        resolve_secret(self.token.as_deref(), &self.token_env)
    }
}

fn default_token_env() -> String {
    "PROTOCOLSIO_TOKEN".into()
}

/// `[cache]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory downloaded protocols are written to.
    #[serde(default)]
    pub path: String,
}

/// `[endpoints]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_list_endpoint")]
    pub list_protocols: String,

    #[serde(default = "default_get_endpoint")]
    pub get_protocol: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            list_protocols: default_list_endpoint(),
            get_protocol: default_get_endpoint(),
        }
    }
}

fn default_list_endpoint() -> String {
    "https://www.protocols.io/api/v3/protocols".into()
}
fn default_get_endpoint() -> String {
    "https://www.protocols.io/api/v4/protocols".into()
}

/// `[retry]` section: backoff applied when the API answers HTTP 429.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay(),
            max_delay_secs: default_max_delay(),
        }
    }
}

fn default_initial_delay() -> u64 {
    60
}
fn default_max_delay() -> u64 {
    16 * 60
}

/// `[harvest]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Pages buffered between the fetch task and the processor.
    #[serde(default = "default_harvest_queue")]
    pub queue_capacity: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_harvest_queue(),
        }
    }
}

fn default_harvest_queue() -> usize {
    1000
}

/// `[index]` section: the bulk index sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSection {
    /// Base URL of the indexing API.
    #[serde(default)]
    pub endpoint: String,

    /// Name of the env var holding the indexing API token.
    #[serde(default = "default_index_token_env")]
    pub token_env: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_datasource")]
    pub datasource: String,

    /// Records per bulk index request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batches buffered between the directory reader and the sink.
    #[serde(default = "default_index_queue")]
    pub queue_capacity: usize,
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token_env: default_index_token_env(),
            token: None,
            datasource: default_datasource(),
            batch_size: default_batch_size(),
            queue_capacity: default_index_queue(),
        }
    }
}

fn default_index_token_env() -> String {
    "PROTOCOLSIO_INDEX_TOKEN".into()
}
fn default_datasource() -> String {
    "protocolsio".into()
}
fn default_batch_size() -> usize {
    50
}
fn default_index_queue() -> usize {
    100
}

// ---------------------------------------------------------------------------
// Runtime config (resolved from the file, injected into components)
// ---------------------------------------------------------------------------

/// Exponential backoff bounds for rate-limited requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for BackoffPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            initial: Duration::from_secs(config.initial_delay_secs),
            max: Duration::from_secs(config.max_delay_secs),
        }
    }
}

/// Everything a fetcher needs to talk to the protocols.io API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bearer token; `None` makes every request fail as unauthenticated.
    pub token: Option<String>,
    /// Env var the token was expected in, for error messages.
    pub token_env: String,
    pub list_endpoint: Url,
    pub get_endpoint: Url,
    pub backoff: BackoffPolicy,
}

impl ApiConfig {
    /// Resolve the API settings from the loaded config file.
    pub fn from_app(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            token: config.auth.resolve(),
            token_env: config.auth.token_env.clone(),
            list_endpoint: parse_endpoint("endpoints.list_protocols", &config.endpoints.list_protocols)?,
            get_endpoint: parse_endpoint("endpoints.get_protocol", &config.endpoints.get_protocol)?,
            backoff: BackoffPolicy::from(&config.retry),
        })
    }
}

/// Settings for the bulk index pipeline and its sink.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub endpoint: Url,
    pub token: Option<String>,
    pub token_env: String,
    pub datasource: String,
    pub batch_size: usize,
    pub queue_capacity: usize,
}

impl IndexConfig {
    /// Resolve the index settings from the loaded config file.
    pub fn from_app(config: &AppConfig) -> Result<Self> {
        let section = &config.index;
        if section.endpoint.is_empty() {
            return Err(ProtocolsError::config(
                "no index endpoint configured; set [index].endpoint",
            ));
        }
        if section.batch_size == 0 {
            return Err(ProtocolsError::config("[index].batch_size must be at least 1"));
        }
        Ok(Self {
            endpoint: parse_endpoint("index.endpoint", &section.endpoint)?,
            token: resolve_secret(section.token.as_deref(), &section.token_env),
            token_env: section.token_env.clone(),
            datasource: section.datasource.clone(),
            batch_size: section.batch_size,
            queue_capacity: section.queue_capacity.max(1),
        })
    }
}

fn parse_endpoint(key: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| ProtocolsError::config(format!("{key}: invalid url {value:?}: {e}")))
}

fn resolve_secret(literal: Option<&str>, env_var: &str) -> Option<String> {
    literal
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| std::env::var(env_var).ok().filter(|t| !t.is_empty()))
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.protocolsio/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ProtocolsError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.protocolsio/protocolsio.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| ProtocolsError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ProtocolsError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ProtocolsError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ProtocolsError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ProtocolsError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("PROTOCOLSIO_TOKEN"));
        assert!(toml_str.contains("list_protocols"));
        assert!(!toml_str.contains("token = "));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let toml_str = r#"
[cache]
path = "/tmp/protocols"

[retry]
initial_delay_secs = 5
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.cache.path, "/tmp/protocols");
        assert_eq!(config.retry.initial_delay_secs, 5);
        assert_eq!(config.retry.max_delay_secs, 960);
        assert_eq!(config.harvest.queue_capacity, 1000);
        assert_eq!(config.index.batch_size, 50);
    }

    #[test]
    fn literal_token_wins() {
        let mut config = AppConfig::default();
        config.auth.token_env = "PROTOCOLSIO_TEST_NONEXISTENT_TOKEN_9241".into();
        assert_eq!(config.auth.resolve(), None);

        config.auth.token = Some("secret".into());
        let api = ApiConfig::from_app(&config).unwrap();
        assert_eq!(api.token.as_deref(), Some("secret"));
        assert_eq!(api.backoff.initial, Duration::from_secs(60));
        assert_eq!(api.backoff.max, Duration::from_secs(960));
    }

    #[test]
    fn bad_endpoint_is_config_error() {
        let mut config = AppConfig::default();
        config.endpoints.get_protocol = "not a url".into();
        let err = ApiConfig::from_app(&config).unwrap_err();
        assert!(err.to_string().contains("endpoints.get_protocol"));
    }

    #[test]
    fn index_config_requires_endpoint() {
        let mut config = AppConfig::default();
        assert!(IndexConfig::from_app(&config).is_err());

        config.index.endpoint = "https://search.example.com/api/index/v1".into();
        let index = IndexConfig::from_app(&config).unwrap();
        assert_eq!(index.datasource, "protocolsio");
        assert_eq!(index.batch_size, 50);
    }
}
