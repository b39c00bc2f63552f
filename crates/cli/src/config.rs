//! Client configuration assembled from flags and `ARCREST_*` variables.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use transport::TransportConfig;

/// Output format of log events on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Connection and runtime settings shared by every command.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct ClientConfig {
    /// CE endpoint, e.g. `https://ce.example.org:443`
    #[arg(short, long, env = "ARCREST_URL")]
    pub url: String,

    /// Path prefix of the REST interface on the CE host
    #[arg(long, env = "ARCREST_API_BASE", default_value = rest::DEFAULT_API_BASE)]
    pub api_base: String,

    /// Pin the REST API version instead of using the newest one both sides speak
    #[arg(long, env = "ARCREST_API_VERSION")]
    pub api_version: Option<String>,

    /// PEM file with the proxy certificate and key used as client identity
    #[arg(long, env = "ARCREST_PROXY")]
    pub proxy_path: Option<PathBuf>,

    /// Bearer token for authentication and token delegations
    #[arg(long, env = "ARCREST_TOKEN", hide_env_values = true)]
    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// Number of parallel transfer workers
    #[arg(long, env = "ARCREST_WORKERS", default_value_t = transfer::DEFAULT_WORKERS)]
    pub workers: usize,

    /// Per-request timeout in seconds
    #[arg(long, env = "ARCREST_TIMEOUT")]
    pub timeout_secs: Option<u64>,

    /// Log format: text or json
    #[arg(long, env = "ARCREST_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl ClientConfig {
    /// Proxy file to present as client identity.
    ///
    /// An explicit path wins; otherwise `X509_USER_PROXY`, then the
    /// conventional `/tmp/x509up_u<uid>` if it exists.
    pub fn proxy(&self) -> Option<PathBuf> {
        if let Some(path) = &self.proxy_path {
            return Some(path.clone());
        }
        if let Some(path) = std::env::var_os("X509_USER_PROXY") {
            return Some(PathBuf::from(path));
        }
        default_proxy_path().filter(|path| path.is_file())
    }

    /// Builds the transport settings for this CE.
    pub fn transport_config(&self) -> Result<TransportConfig> {
        let mut config = TransportConfig::new(&self.url)?;
        if let Some(path) = self.proxy() {
            config = config
                .with_proxy_file(&path)
                .with_context(|| format!("loading proxy {}", path.display()))?;
        }
        if let Some(token) = &self.token {
            config = config.with_token(token.clone());
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

#[cfg(unix)]
fn default_proxy_path() -> Option<PathBuf> {
    Some(proxy_path_for(nix::unistd::getuid().as_raw()))
}

#[cfg(not(unix))]
fn default_proxy_path() -> Option<PathBuf> {
    None
}

fn proxy_path_for(uid: u32) -> PathBuf {
    PathBuf::from(format!("/tmp/x509up_u{uid}"))
}
