//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The OAuth client secret is loaded from the BITRIX_CLIENT_SECRET env var or
//! client_secret_file, never stored in the TOML directly to avoid leaking
//! secrets.

use common::SecretString;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub bitrix: BitrixConfig,
    pub server: ServerConfig,
}

/// Bitrix24 portal and OAuth application settings
#[derive(Debug, Deserialize)]
pub struct BitrixConfig {
    /// Portal base URL, e.g. `https://example.bitrix24.vn`
    pub domain: String,
    /// OAuth client ID of the local application
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<SecretString>,
    /// Path to a file containing the client secret (alternative to the
    /// BITRIX_CLIENT_SECRET env var)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    /// Where the access/refresh token pair is persisted
    pub token_file: PathBuf,
}

/// HTTP server settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. BITRIX_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.bitrix.domain.starts_with("http://")
            && !config.bitrix.domain.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "bitrix.domain must start with http:// or https://, got: {}",
                config.bitrix.domain
            )));
        }

        if config.bitrix.client_id.is_empty() {
            return Err(common::Error::Config("bitrix.client_id must be set".into()));
        }

        if config.server.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        // Resolve client secret: env var takes precedence over file
        if let Ok(secret) = std::env::var("BITRIX_CLIENT_SECRET") {
            config.bitrix.client_secret = Some(SecretString::new(secret));
        } else if let Some(ref secret_file) = config.bitrix.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.bitrix.client_secret = Some(SecretString::new(secret));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("contact-gateway.toml")
    }
}
