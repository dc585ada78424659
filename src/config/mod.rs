//! Configuration for the discovery flow.
//!
//! Settings are loaded with priority: env var > TOML file > default.
//! A `.env` file in the working directory is loaded via dotenvy first and
//! never overrides variables that are already set.

pub(crate) mod helpers;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::chain::ChainInfo;
use crate::error::ConfigError;

use self::helpers::{optional_env, parse_bool_env, parse_optional_env, validate_http_url};

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "multisig-session.toml";

const DEFAULT_CHAIN_ID: &str = "cosmoshub-4";
const DEFAULT_CHAIN_DISPLAY_NAME: &str = "Cosmos Hub";
const DEFAULT_NODE_ADDRESS: &str = "https://rest.cosmos.directory/cosmoshub";
const DEFAULT_ADDRESS_PREFIX: &str = "cosmos";
const DEFAULT_DENOM: &str = "uatom";
const DEFAULT_DISPLAY_DENOM: &str = "ATOM";
const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:3000/api";
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_LOG_FILTER: &str = "multisig_session=info";

/// Main configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub chain: ChainInfo,
    pub backend: BackendConfig,
    pub logging: LoggingConfig,
}

/// Backend API and node client transport settings.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    /// Per-request transport timeout for both the backend and node clients.
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub json: bool,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    chain: ChainSettings,
    backend: BackendSettings,
    logging: LoggingSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ChainSettings {
    id: Option<String>,
    display_name: Option<String>,
    node_address: Option<String>,
    address_prefix: Option<String>,
    denom: Option<String>,
    display_denom: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BackendSettings {
    url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LoggingSettings {
    json: Option<bool>,
    filter: Option<String>,
}

impl SessionConfig {
    /// Load configuration from environment variables and the default config
    /// file, if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_toml(None)
    }

    /// Load from env with an optional TOML config file overlay.
    ///
    /// An explicit path that is missing or unreadable is an error; a missing
    /// default file is not.
    pub fn from_env_with_toml(toml_path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let settings = load_file_settings(toml_path)?;
        Self::resolve(&settings)
    }

    fn resolve(settings: &FileSettings) -> Result<Self, ConfigError> {
        let chain = resolve_chain(&settings.chain)?;

        let base_url = optional_env("MULTISIG_BACKEND_URL")?
            .or_else(|| settings.backend.url.clone())
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        let base_url = validate_http_url("MULTISIG_BACKEND_URL", &base_url)?;

        let timeout_ms = parse_optional_env::<u64>("MULTISIG_HTTP_TIMEOUT_MS")?
            .or(settings.backend.timeout_ms)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MULTISIG_HTTP_TIMEOUT_MS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let logging = LoggingConfig {
            json: parse_bool_env("MULTISIG_LOG_JSON")?
                .or(settings.logging.json)
                .unwrap_or(false),
            filter: settings
                .logging
                .filter
                .clone()
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        };

        Ok(Self {
            chain,
            backend: BackendConfig {
                base_url,
                timeout: Duration::from_millis(timeout_ms),
            },
            logging,
        })
    }
}

fn resolve_chain(settings: &ChainSettings) -> Result<ChainInfo, ConfigError> {
    let pick = |key: &str, file: &Option<String>, default: &str| -> Result<String, ConfigError> {
        Ok(optional_env(key)?
            .or_else(|| file.clone().filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| default.to_string()))
    };

    let chain_id = pick("MULTISIG_CHAIN_ID", &settings.id, DEFAULT_CHAIN_ID)?;
    let chain_display_name = pick(
        "MULTISIG_CHAIN_DISPLAY_NAME",
        &settings.display_name,
        DEFAULT_CHAIN_DISPLAY_NAME,
    )?;
    let node_address = pick(
        "MULTISIG_NODE_ADDRESS",
        &settings.node_address,
        DEFAULT_NODE_ADDRESS,
    )?;
    let node_address = validate_http_url("MULTISIG_NODE_ADDRESS", &node_address)?;
    let address_prefix = pick(
        "MULTISIG_ADDRESS_PREFIX",
        &settings.address_prefix,
        DEFAULT_ADDRESS_PREFIX,
    )?;
    if !address_prefix
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    {
        return Err(ConfigError::InvalidValue {
            key: "MULTISIG_ADDRESS_PREFIX".to_string(),
            message: format!("'{address_prefix}' is not a lowercase bech32 prefix"),
        });
    }

    Ok(ChainInfo {
        chain_id,
        chain_display_name,
        node_address,
        address_prefix,
        denom: pick("MULTISIG_DENOM", &settings.denom, DEFAULT_DENOM)?,
        display_denom: pick(
            "MULTISIG_DISPLAY_DENOM",
            &settings.display_denom,
            DEFAULT_DISPLAY_DENOM,
        )?,
    })
}

fn load_file_settings(explicit_path: Option<&Path>) -> Result<FileSettings, ConfigError> {
    let path = explicit_path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && explicit_path.is_none() => {
            return Ok(FileSettings::default());
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::ParseError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    let settings = toml::from_str(&raw).map_err(|e| {
        ConfigError::ParseError(format!("Failed to load config file {}: {e}", path.display()))
    })?;
    tracing::debug!("Loaded TOML config from {}", path.display());
    Ok(settings)
}
