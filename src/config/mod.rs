//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{collections::HashMap, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{CacheConfig, CacheStrategy, Expiry};

mod cli;

pub use cli::{CliArgs, Command, FetchArgs, Overrides, PreloadArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "querycache";
const ENV_PREFIX: &str = "QUERYCACHE";
const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:4000/graphql";
const DEFAULT_DOCUMENTS_PATH: &str = "config/operations.toml";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
    pub upstream: UpstreamSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub endpoint: Url,
    pub documents: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Parse the process arguments and resolve settings, returning both.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    upstream: RawUpstreamSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(megabytes) = overrides.cache_max_size_mb {
            self.cache.max_size_bytes = Some(megabytes.saturating_mul(BYTES_PER_MIB));
        }
        if let Some(endpoint) = overrides.upstream_endpoint.as_ref() {
            self.upstream.endpoint = Some(endpoint.clone());
        }
        if let Some(path) = overrides.upstream_documents.as_ref() {
            self.upstream.documents = Some(path.clone());
        }
        if let Some(seconds) = overrides.upstream_timeout_seconds {
            self.upstream.timeout_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            upstream,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_config(cache)?,
            upstream: build_upstream_settings(upstream)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_config(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let max_size_bytes = match cache.max_size_bytes {
        Some(0) => {
            return Err(LoadError::invalid(
                "cache.max_size_bytes",
                "must be greater than zero",
            ));
        }
        Some(bytes) => usize::try_from(bytes).map_err(|_| {
            LoadError::invalid("cache.max_size_bytes", "value exceeds supported range")
        })?,
        None => defaults.max_size_bytes,
    };

    let default_strategy = match cache.default_strategy {
        Some(text) => CacheStrategy::from_str(&text)
            .map_err(|err| LoadError::invalid("cache.default_strategy", err.to_string()))?,
        None => defaults.default_strategy,
    };

    let short_ttl_secs = positive_secs(
        cache.short_ttl_secs,
        defaults.short_ttl_secs,
        "cache.short_ttl_secs",
    )?;
    let long_ttl_secs = positive_secs(
        cache.long_ttl_secs,
        defaults.long_ttl_secs,
        "cache.long_ttl_secs",
    )?;

    Ok(CacheConfig {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        deduplicate: cache.deduplicate.unwrap_or(defaults.deduplicate),
        metrics_enabled: cache.metrics_enabled.unwrap_or(defaults.metrics_enabled),
        max_size_bytes,
        default_strategy,
        short_ttl_secs,
        long_ttl_secs,
        ttl_overrides: cache.ttl_overrides,
    })
}

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let endpoint_text = upstream
        .endpoint
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
    let endpoint = Url::parse(&endpoint_text)
        .map_err(|err| LoadError::invalid("upstream.endpoint", format!("{endpoint_text}: {err}")))?;
    if !matches!(endpoint.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "upstream.endpoint",
            "scheme must be http or https",
        ));
    }

    let timeout_secs = positive_secs(
        upstream.timeout_seconds,
        DEFAULT_UPSTREAM_TIMEOUT_SECS,
        "upstream.timeout_seconds",
    )?;

    Ok(UpstreamSettings {
        endpoint,
        documents: upstream
            .documents
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DOCUMENTS_PATH)),
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn positive_secs(value: Option<u64>, default: u64, key: &'static str) -> Result<u64, LoadError> {
    match value {
        Some(0) => Err(LoadError::invalid(key, "must be greater than zero")),
        Some(seconds) => Ok(seconds),
        None => Ok(default),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    deduplicate: Option<bool>,
    metrics_enabled: Option<bool>,
    max_size_bytes: Option<u64>,
    default_strategy: Option<String>,
    short_ttl_secs: Option<u64>,
    long_ttl_secs: Option<u64>,
    ttl_overrides: HashMap<String, Expiry>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    endpoint: Option<String>,
    documents: Option<PathBuf>,
    timeout_seconds: Option<u64>,
}

#[cfg(test)]
mod tests;
