//! Configuration types and loading
//!
//! Config precedence: CLI `--config` > `CONFIG_PATH` env > `config.toml` in
//! the app home > `token-server.toml` in the working directory.
//!
//! App secrets can sit inline in the TOML (`app_secret`) or in a separate
//! file (`app_secret_file`), so the config itself can be checked in without
//! them.

use common::Secret;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use token_pool::RefreshSettings;
use token_pool::holder::MAX_CHECK_INTERVAL;
use wechat_auth::{Credential, DEFAULT_REQUEST_TIMEOUT_SECS, TOKEN_ENDPOINT};

/// Root configuration
#[derive(Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub token: TokenConfig,
    pub credentials: Vec<Credential>,
}

/// Raw TOML shape, before secrets are resolved
#[derive(Debug, Deserialize)]
struct RawConfig {
    server: ServerConfig,
    #[serde(default)]
    token: TokenConfig,
    #[serde(default)]
    credentials: Vec<CredentialConfig>,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Token endpoint and refresh schedule
#[derive(Debug, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Overrides the default app home (`~/.token-server`)
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            check_interval_secs: default_check_interval(),
            refresh_threshold_secs: default_refresh_threshold(),
            request_timeout_secs: default_request_timeout(),
            state_dir: None,
        }
    }
}

impl TokenConfig {
    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            interval: Duration::from_secs(self.check_interval_secs),
            threshold: Duration::from_secs(self.refresh_threshold_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// One `[[credentials]]` entry
#[derive(Debug, Deserialize)]
struct CredentialConfig {
    #[serde(alias = "appId")]
    app_id: String,
    #[serde(default, alias = "appSecret")]
    app_secret: Option<Secret<String>>,
    #[serde(default)]
    app_secret_file: Option<PathBuf>,
}

fn default_max_connections() -> usize {
    1000
}

fn default_endpoint() -> String {
    TOKEN_ENDPOINT.to_string()
}

fn default_check_interval() -> u64 {
    60
}

fn default_refresh_threshold() -> u64 {
    180
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Config {
    /// Load configuration from a TOML file and resolve app secrets.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let raw: RawConfig = toml::from_str(&contents)?;

        if !raw.token.endpoint.starts_with("http://") && !raw.token.endpoint.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "token endpoint must start with http:// or https://, got: {}",
                raw.token.endpoint
            )));
        }

        if raw.token.check_interval_secs == 0 {
            return Err(common::Error::Config(
                "check_interval_secs must be greater than 0".into(),
            ));
        }

        if raw.token.check_interval_secs > MAX_CHECK_INTERVAL.as_secs() {
            return Err(common::Error::Config(format!(
                "check_interval_secs must be at most {}, got: {}",
                MAX_CHECK_INTERVAL.as_secs(),
                raw.token.check_interval_secs
            )));
        }

        if raw.token.request_timeout_secs == 0 {
            return Err(common::Error::Config(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if raw.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if raw.credentials.is_empty() {
            return Err(common::Error::Config("no credentials configured".into()));
        }

        let mut seen = HashSet::new();
        let mut credentials = Vec::with_capacity(raw.credentials.len());
        for entry in raw.credentials {
            if entry.app_id.trim().is_empty() {
                return Err(common::Error::Config("credential with empty app_id".into()));
            }
            if !seen.insert(entry.app_id.clone()) {
                return Err(common::Error::Config(format!(
                    "duplicate app_id {}",
                    entry.app_id
                )));
            }
            credentials.push(resolve_credential(entry)?);
        }

        Ok(Config {
            server: raw.server,
            token: raw.token,
            credentials,
        })
    }

    /// Resolve config file path from CLI arg, CONFIG_PATH env var or the
    /// app home.
    pub fn resolve_path(cli_path: Option<&str>, app_home: Option<&Path>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        if let Some(home) = app_home {
            let candidate = home.join("config.toml");
            if candidate.is_file() {
                return candidate;
            }
        }
        PathBuf::from("token-server.toml")
    }
}

/// Secret resolution order: inline `app_secret`, then `app_secret_file`.
fn resolve_credential(entry: CredentialConfig) -> common::Result<Credential> {
    if let Some(secret) = entry.app_secret {
        if secret.expose().is_empty() {
            return Err(common::Error::Config(format!(
                "empty app_secret for {}",
                entry.app_id
            )));
        }
        return Ok(Credential::from_secret(entry.app_id, secret));
    }

    let Some(secret_file) = entry.app_secret_file else {
        return Err(common::Error::Config(format!(
            "no app_secret or app_secret_file for {}",
            entry.app_id
        )));
    };

    let secret = std::fs::read_to_string(&secret_file).map_err(|e| {
        common::Error::Config(format!(
            "failed to read app_secret_file {}: {e}",
            secret_file.display()
        ))
    })?;
    let secret = secret.trim().to_owned();
    if secret.is_empty() {
        return Err(common::Error::Config(format!(
            "app_secret_file {} is empty",
            secret_file.display()
        )));
    }
    Ok(Credential::new(entry.app_id, secret))
}
