//! TTL strategies for cached results.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, de};
use thiserror::Error;

/// Named TTL policy applied to a class of cached results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStrategy {
    /// Reference data that never expires.
    Static,
    /// Slowly changing data (categories, institutions, profile).
    Long,
    /// Frequently changing data (balances, transactions).
    Short,
    /// Caller-supplied TTL.
    Custom(Duration),
}

/// When a cache entry stops being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expiry {
    Never,
    After(Duration),
}

/// Concrete TTLs backing the `Long` and `Short` strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlDefaults {
    pub short: Duration,
    pub long: Duration,
}

impl CacheStrategy {
    /// Resolve the strategy into a concrete expiry.
    pub fn resolve(self, defaults: &TtlDefaults) -> Expiry {
        match self {
            Self::Static => Expiry::Never,
            Self::Long => Expiry::After(defaults.long),
            Self::Short => Expiry::After(defaults.short),
            Self::Custom(ttl) => Expiry::After(ttl),
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => f.write_str("static"),
            Self::Long => f.write_str("long"),
            Self::Short => f.write_str("short"),
            Self::Custom(ttl) => write!(f, "custom:{}", ttl.as_secs()),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseStrategyError {
    #[error("unknown cache strategy `{0}` (expected static, long, short or custom:<seconds>)")]
    Unknown(String),
    #[error("invalid custom ttl `{0}`: expected whole seconds")]
    InvalidTtl(String),
}

impl FromStr for CacheStrategy {
    type Err = ParseStrategyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "static" => Ok(Self::Static),
            "long" => Ok(Self::Long),
            "short" => Ok(Self::Short),
            other => match other.strip_prefix("custom:") {
                Some(seconds) => seconds
                    .parse::<u64>()
                    .map(|secs| Self::Custom(Duration::from_secs(secs)))
                    .map_err(|_| ParseStrategyError::InvalidTtl(seconds.to_string())),
                None => Err(ParseStrategyError::Unknown(value.to_string())),
            },
        }
    }
}

impl<'de> Deserialize<'de> for CacheStrategy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Per-operation TTL override as written in configuration: seconds or `"never"`.
impl<'de> Deserialize<'de> for Expiry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Self::After(Duration::from_secs(secs))),
            Raw::Text(text) if text.eq_ignore_ascii_case("never") => Ok(Self::Never),
            Raw::Text(text) => text
                .parse::<u64>()
                .map(|secs| Self::After(Duration::from_secs(secs)))
                .map_err(|_| de::Error::custom(format!("invalid ttl override `{text}`"))),
        }
    }
}
