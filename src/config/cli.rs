use std::num::NonZeroU32;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::cache::CacheStrategy;

/// Command-line arguments for the querycache binary.
#[derive(Debug, Parser)]
#[command(
    name = "querycache",
    version,
    about = "Cached, coalesced GraphQL reads"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "QUERYCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Fetch one operation through the cache and print the result.
    Fetch(FetchArgs),
    /// Warm the cache for a view and print per-task outcomes.
    Preload(PreloadArgs),
}

#[derive(Debug, Args, Clone)]
pub struct FetchArgs {
    /// Operation name, as registered in the documents file.
    #[arg(value_name = "OPERATION")]
    pub operation: String,

    /// Variables as a JSON object.
    #[arg(long, value_name = "JSON")]
    pub variables: Option<String>,

    /// Cache strategy (static|long|short|custom:<seconds>).
    #[arg(long, value_name = "STRATEGY")]
    pub strategy: Option<CacheStrategy>,

    /// Skip the cached value and fetch from upstream.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub force_refresh: bool,

    /// Issue the same fetch this many times, concurrently.
    #[arg(long, default_value = "1", value_name = "COUNT")]
    pub repeat: NonZeroU32,
}

#[derive(Debug, Args, Clone)]
pub struct PreloadArgs {
    /// View to warm (general|dashboard|transactions|investments). Unknown
    /// names warm the essential set only.
    #[arg(long, default_value = "general", value_name = "CONTEXT")]
    pub context: String,
}

/// Settings overrides applied after file and environment sources.
#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Enable or disable the query cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_enabled: Option<bool>,

    /// Override the cache budget in MiB.
    #[arg(long = "cache-max-size-mb", value_name = "MIB", global = true)]
    pub cache_max_size_mb: Option<u64>,

    /// Override the GraphQL endpoint URL.
    #[arg(long = "upstream-endpoint", value_name = "URL", global = true)]
    pub upstream_endpoint: Option<String>,

    /// Override the query documents file.
    #[arg(
        long = "upstream-documents",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub upstream_documents: Option<PathBuf>,

    /// Override the upstream request timeout.
    #[arg(long = "upstream-timeout-seconds", value_name = "SECONDS", global = true)]
    pub upstream_timeout_seconds: Option<u64>,
}
