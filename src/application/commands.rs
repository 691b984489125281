//! Runners behind the `fetch` and `preload` subcommands.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::cache::{CachedFetcher, MetricsSnapshot, PreloadContext};
use crate::config::{FetchArgs, PreloadArgs};
use crate::util::bytes::format_budget;

use super::error::AppError;

#[derive(Debug, Serialize)]
pub struct FetchReport {
    pub operation: String,
    pub requests: u32,
    pub result: Arc<Value>,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct PreloadReport {
    pub context: String,
    pub tasks: BTreeMap<String, bool>,
    pub metrics: MetricsSnapshot,
}

/// Issue `args.repeat` identical fetches concurrently and report the result.
pub async fn run_fetch(fetcher: &CachedFetcher, args: &FetchArgs) -> Result<FetchReport, AppError> {
    let variables = parse_variables(args.variables.as_deref())?;
    let requests = args.repeat.get();

    let outcomes = join_all((0..requests).map(|_| {
        fetcher.cached_fetch(
            &args.operation,
            variables.as_ref(),
            args.strategy,
            args.force_refresh,
        )
    }))
    .await;

    let mut result = None;
    for outcome in outcomes {
        result = Some(outcome?);
    }
    let result = result.ok_or_else(|| AppError::unexpected("no fetch was issued"))?;

    let metrics = fetcher.metrics();
    log_residency(&metrics);
    Ok(FetchReport {
        operation: args.operation.clone(),
        requests,
        result,
        metrics,
    })
}

/// Warm the cache for the requested context.
pub async fn run_preload(fetcher: &CachedFetcher, args: &PreloadArgs) -> PreloadReport {
    let context = PreloadContext::from_name(&args.context);
    let tasks = fetcher.preload(context).await;
    let metrics = fetcher.metrics();
    log_residency(&metrics);
    PreloadReport {
        context: context.to_string(),
        tasks,
        metrics,
    }
}

/// Print a report as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{out}");
    Ok(())
}

fn parse_variables(text: Option<&str>) -> Result<Option<Value>, AppError> {
    let Some(text) = text else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(text)
        .map_err(|err| AppError::validation(format!("--variables is not valid JSON: {err}")))?;
    if !(value.is_object() || value.is_null()) {
        return Err(AppError::validation("--variables must be a JSON object"));
    }
    Ok(Some(value))
}

fn log_residency(metrics: &MetricsSnapshot) {
    info!(
        entries = metrics.entry_count,
        resident = %format_budget(metrics.current_size_bytes, metrics.max_size_bytes),
        hit_rate = metrics.hit_rate,
        "query cache residency"
    );
}
