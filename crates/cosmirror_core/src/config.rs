use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::scheduler::DEFAULT_CONCURRENCY;

pub const DEFAULT_ORIGIN: &str = "https://scrapbox.io";
pub const DEFAULT_USER_AGENT: &str = "cosmirror/0.2";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: usize = 2;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MirrorConfig {
    #[serde(default)]
    pub remote: RemoteSection,
    #[serde(default)]
    pub sync: SyncSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RemoteSection {
    pub origin: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SyncSection {
    pub concurrency: Option<usize>,
}

/// Settings after env > config file > default resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub origin: String,
    pub user_agent: String,
    /// `connect.sid` cookie value for private projects.
    pub session_id: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub concurrency: usize,
}

impl MirrorConfig {
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.resolve_with(|key| env::var(key).ok())
    }

    /// Resolution against an arbitrary variable lookup, so tests need not touch the process env.
    pub fn resolve_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<ResolvedConfig> {
        let text = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let origin = text("COSENSE_ORIGIN")
            .or_else(|| self.remote.origin.clone())
            .unwrap_or_else(|| DEFAULT_ORIGIN.to_string());
        let origin = normalize_origin(&origin)?;

        let concurrency = parse_number(text("COSMIRROR_CONCURRENCY"), "COSMIRROR_CONCURRENCY")?
            .or(self.sync.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            bail!("sync concurrency must be at least 1");
        }

        Ok(ResolvedConfig {
            origin,
            user_agent: text("COSENSE_USER_AGENT")
                .or_else(|| self.remote.user_agent.clone())
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            session_id: text("COSENSE_SID"),
            timeout_ms: parse_number(text("COSENSE_HTTP_TIMEOUT_MS"), "COSENSE_HTTP_TIMEOUT_MS")?
                .or(self.remote.timeout_ms)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
            max_retries: parse_number(text("COSENSE_HTTP_RETRIES"), "COSENSE_HTTP_RETRIES")?
                .or(self.remote.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            retry_delay_ms: parse_number(
                text("COSENSE_HTTP_RETRY_DELAY_MS"),
                "COSENSE_HTTP_RETRY_DELAY_MS",
            )?
            .or(self.remote.retry_delay_ms)
            .unwrap_or(DEFAULT_RETRY_DELAY_MS),
            concurrency,
        })
    }
}

/// Load and parse a MirrorConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MirrorConfig> {
    if !config_path.exists() {
        return Ok(MirrorConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MirrorConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Strips trailing slashes and requires an http(s) scheme.
pub fn normalize_origin(origin: &str) -> Result<String> {
    let trimmed = origin.trim().trim_end_matches('/');
    let host = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"));
    match host {
        Some(host) if !host.is_empty() => Ok(trimmed.to_string()),
        _ => bail!("invalid origin {origin:?}: expected an http(s) URL"),
    }
}

fn parse_number<T: std::str::FromStr>(value: Option<String>, key: &str) -> Result<Option<T>> {
    value
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|_| anyhow::anyhow!("{key} must be a non-negative integer, got {value:?}"))
        })
        .transpose()
}
