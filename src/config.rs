//! Configuration loader and validator for the PCC content sync.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub pcc: Pcc,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Public URL of this site; its host is what the stored site hash is checked against.
    pub site_url: String,
}

/// Content API endpoint settings. Credentials live in the options store, not here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pcc {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

fn default_api_base_url() -> String {
    crate::pcc::PCC_API_BASE.to_string()
}

impl App {
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/pcc-sync.db", self.data_dir))
    }

    pub fn parsed_site_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.site_url)
            .map_err(|_| ConfigError::Invalid("app.site_url must be a valid URL"))
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.site_url.trim().is_empty() {
        return Err(ConfigError::Invalid("app.site_url must be non-empty"));
    }
    let site = cfg.app.parsed_site_url()?;
    if site.host_str().is_none() {
        return Err(ConfigError::Invalid("app.site_url must include a host"));
    }

    if Url::parse(&cfg.pcc.api_base_url).is_err() {
        return Err(ConfigError::Invalid("pcc.api_base_url must be a valid URL"));
    }

    Ok(())
}

/// Returns the example YAML shipped with the binary.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  site_url: "https://example.com"

pcc:
  api_base_url: "https://gql.prod.pcc.pantheon.io/"
"#
}
