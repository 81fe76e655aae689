//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.pulsar/config.json`) and
//! environment. Only the backend connection is configurable for now.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::rpc::ApiAuth;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Backend server connection settings.
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Where the RPC backend lives and how to authenticate against it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Server origin (default http://127.0.0.1:8000).
    pub base_url: Option<String>,

    /// Dotted prefix of the whitelisted RPC methods. Leave unset for the
    /// default app path.
    pub method_root: Option<String>,

    /// API key for token auth. Overridden by PULSAR_API_KEY env.
    pub api_key: Option<String>,

    /// API secret for token auth. Overridden by PULSAR_API_SECRET env.
    pub api_secret: Option<String>,

    /// User identity whose saved chats are listed. Overridden by
    /// PULSAR_OWNER env.
    pub owner: Option<String>,
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve API auth: PULSAR_API_KEY/PULSAR_API_SECRET env override config.
/// Both halves must be present for auth to be used at all.
pub fn resolve_api_auth(config: &Config) -> Option<ApiAuth> {
    let key = env_nonempty("PULSAR_API_KEY").or_else(|| {
        config
            .backend
            .api_key
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })?;
    let secret = env_nonempty("PULSAR_API_SECRET").or_else(|| {
        config
            .backend
            .api_secret
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })?;
    Some(ApiAuth { key, secret })
}

/// Resolve the chat owner: PULSAR_OWNER env overrides config; falls back to
/// the server's administrator account.
pub fn resolve_owner(config: &Config) -> String {
    env_nonempty("PULSAR_OWNER")
        .or_else(|| {
            config
                .backend
                .owner
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| "Administrator".to_string())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("PULSAR_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".pulsar").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or PULSAR_CONFIG_PATH). Missing file =>
/// default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
