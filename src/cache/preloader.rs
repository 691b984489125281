//! Concurrent cache warmup for common views.
//!
//! Every task goes through [`CachedFetcher::cached_fetch`], so preloading only
//! populates the shared cache. A failing task is reported as `false` and never
//! affects its siblings.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use futures::future::join_all;
use metrics::histogram;
use serde_json::{Value, json};
use thiserror::Error;
use time::{Date, Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, info, warn};

use super::error::CacheError;
use super::fetcher::CachedFetcher;
use super::metrics::{METRIC_PRELOAD_MS, MetricsSnapshot};
use super::strategy::CacheStrategy;

const RECENT_TRANSACTION_DAYS: i64 = 7;
const RECENT_TRANSACTION_LIMIT: u64 = 50;
const INVESTMENT_ACCOUNT_TYPES: [&str; 2] = ["investment", "retirement"];

/// The view a preload is warming the cache for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PreloadContext {
    #[default]
    General,
    Dashboard,
    Transactions,
    Investments,
}

impl PreloadContext {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Dashboard => "dashboard",
            Self::Transactions => "transactions",
            Self::Investments => "investments",
        }
    }
}

impl PreloadContext {
    /// Resolve a context name, falling back to [`PreloadContext::General`]
    /// (the essential tasks only) when the name is not recognized.
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_else(|error: ParsePreloadContextError| {
            warn!(context = name, error = %error, "unknown preload context; using general");
            Self::General
        })
    }
}

impl fmt::Display for PreloadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown preload context `{0}` (expected general, dashboard, transactions or investments)")]
pub struct ParsePreloadContextError(String);

impl FromStr for PreloadContext {
    type Err = ParsePreloadContextError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(Self::General),
            "dashboard" => Ok(Self::Dashboard),
            "transactions" => Ok(Self::Transactions),
            "investments" => Ok(Self::Investments),
            _ => Err(ParsePreloadContextError(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PreloadWork {
    Query {
        operation: &'static str,
        variables: Option<Value>,
        strategy: CacheStrategy,
    },
    /// Holdings are only fetched when an investment account exists.
    Holdings,
}

#[derive(Debug, Clone, PartialEq)]
struct PreloadTask {
    name: &'static str,
    work: PreloadWork,
}

impl PreloadTask {
    fn query(name: &'static str, operation: &'static str, strategy: CacheStrategy) -> Self {
        Self::query_with(name, operation, None, strategy)
    }

    fn query_with(
        name: &'static str,
        operation: &'static str,
        variables: Option<Value>,
        strategy: CacheStrategy,
    ) -> Self {
        Self {
            name,
            work: PreloadWork::Query {
                operation,
                variables,
                strategy,
            },
        }
    }
}

fn basic_accounts_variables() -> Value {
    json!({"detailLevel": "basic"})
}

/// First day of the recent-transactions window ending on `today`.
fn recent_window_start(today: Date) -> Date {
    today
        .checked_sub(TimeDuration::days(RECENT_TRANSACTION_DAYS))
        .unwrap_or(Date::MIN)
}

fn essential_tasks() -> Vec<PreloadTask> {
    vec![
        PreloadTask::query("categories", "GetTransactionCategories", CacheStrategy::Long),
        PreloadTask::query("account_types", "GetAccountTypeOptions", CacheStrategy::Static),
        PreloadTask::query("user_profile", "GetMe", CacheStrategy::Long),
        PreloadTask::query("institutions", "GetInstitutions", CacheStrategy::Long),
    ]
}

fn activity_tasks(today: Date) -> Vec<PreloadTask> {
    let start_date = recent_window_start(today).to_string();
    vec![
        PreloadTask::query_with(
            "accounts_basic",
            "GetAccounts",
            Some(basic_accounts_variables()),
            CacheStrategy::Short,
        ),
        PreloadTask::query_with(
            "recent_transactions",
            "GetTransactionsList",
            Some(json!({
                "limit": RECENT_TRANSACTION_LIMIT,
                "filters": {"startDate": start_date},
            })),
            CacheStrategy::Short,
        ),
        PreloadTask::query("merchants", "GetMerchants", CacheStrategy::Long),
        PreloadTask::query("transaction_rules", "GetTransactionRules", CacheStrategy::Long),
    ]
}

fn tasks_for(context: PreloadContext, today: Date) -> Vec<PreloadTask> {
    let mut tasks = essential_tasks();
    match context {
        PreloadContext::General => {}
        PreloadContext::Dashboard | PreloadContext::Transactions => {
            tasks.extend(activity_tasks(today));
        }
        PreloadContext::Investments => tasks.push(PreloadTask {
            name: "holdings",
            work: PreloadWork::Holdings,
        }),
    }
    tasks
}

/// Ids of investment/retirement accounts in a `GetAccounts` response.
fn investment_account_ids(accounts: &Value) -> Option<Vec<Value>> {
    let investments: Vec<&Value> = accounts
        .get("accounts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|account| {
            account
                .pointer("/type/name")
                .and_then(Value::as_str)
                .is_some_and(|name| INVESTMENT_ACCOUNT_TYPES.contains(&name))
        })
        .collect();

    if investments.is_empty() {
        return None;
    }
    Some(
        investments
            .into_iter()
            .filter_map(|account| account.get("id").cloned())
            .collect(),
    )
}

/// Today's date in the local offset, or UTC when the offset is unavailable.
fn local_today() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|error| {
            debug!(error = %error, "local offset unavailable; using UTC date");
            OffsetDateTime::now_utc()
        })
        .date()
}

/// Runs the warmup task set for a context.
pub struct CachePreloader {
    fetcher: CachedFetcher,
}

impl CachePreloader {
    pub fn new(fetcher: CachedFetcher) -> Self {
        Self { fetcher }
    }

    /// Warm the cache for `context`; returns task name → success.
    pub async fn preload(&self, context: PreloadContext) -> BTreeMap<String, bool> {
        self.preload_as_of(context, local_today()).await
    }

    async fn preload_as_of(&self, context: PreloadContext, today: Date) -> BTreeMap<String, bool> {
        info!(context = %context, "starting cache preload");
        let started = Instant::now();

        let tasks = tasks_for(context, today);
        let outcomes = join_all(tasks.into_iter().map(|task| self.run(task))).await;

        let results: BTreeMap<String, bool> = outcomes
            .into_iter()
            .map(|(name, succeeded)| (name.to_string(), succeeded))
            .collect();

        let elapsed = started.elapsed();
        if self.fetcher.cache().config().metrics_enabled {
            histogram!(METRIC_PRELOAD_MS, "context" => context.as_str())
                .record(elapsed.as_secs_f64() * 1000.0);
        }

        let successful = results.values().filter(|succeeded| **succeeded).count();
        info!(
            context = %context,
            successful,
            total = results.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "cache preload completed"
        );
        results
    }

    async fn run(&self, task: PreloadTask) -> (&'static str, bool) {
        let outcome = match task.work {
            PreloadWork::Query {
                operation,
                variables,
                strategy,
            } => self
                .fetcher
                .cached_fetch(operation, variables.as_ref(), Some(strategy), false)
                .await
                .map(|_| ()),
            PreloadWork::Holdings => self.preload_holdings().await,
        };

        match outcome {
            Ok(()) => {
                debug!(task = task.name, "preloaded");
                (task.name, true)
            }
            Err(error) => {
                warn!(task = task.name, error = %error, "preload task failed");
                (task.name, false)
            }
        }
    }

    async fn preload_holdings(&self) -> Result<(), CacheError> {
        let variables = basic_accounts_variables();
        let accounts = self
            .fetcher
            .cached_fetch("GetAccounts", Some(&variables), Some(CacheStrategy::Short), false)
            .await?;

        let Some(account_ids) = investment_account_ids(&accounts) else {
            debug!("no investment accounts; skipping holdings preload");
            return Ok(());
        };

        let variables = json!({ "accountIds": account_ids });
        self.fetcher
            .cached_fetch(
                "GetHoldingsBatch",
                Some(&variables),
                Some(CacheStrategy::Short),
                false,
            )
            .await?;
        Ok(())
    }

    /// Current cache counters, for judging how effective a preload was.
    pub fn preload_metrics(&self) -> MetricsSnapshot {
        self.fetcher.metrics()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use time::macros::date;

    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::error::UpstreamError;
    use crate::cache::fetcher::UpstreamFetch;

    /// Upstream that fails chosen operations and records every call.
    #[derive(Default)]
    struct ScriptedUpstream {
        failing: HashSet<&'static str>,
        accounts: Option<Value>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedUpstream {
        fn failing(operations: &[&'static str]) -> Self {
            Self {
                failing: operations.iter().copied().collect(),
                ..Default::default()
            }
        }

        fn with_accounts(accounts: Value) -> Self {
            Self {
                accounts: Some(accounts),
                ..Default::default()
            }
        }

        fn calls_to(&self, operation: &str) -> Vec<Value> {
            self.calls
                .lock()
                .expect("calls lock")
                .iter()
                .filter(|(name, _)| name == operation)
                .map(|(_, variables)| variables.clone())
                .collect()
        }
    }

    #[async_trait]
    impl UpstreamFetch for ScriptedUpstream {
        async fn fetch(&self, operation: &str, variables: &Value) -> Result<Value, UpstreamError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((operation.to_string(), variables.clone()));
            if self.failing.contains(operation) {
                return Err(UpstreamError::Status {
                    status: 500,
                    message: format!("{operation} unavailable"),
                });
            }
            if operation == "GetAccounts"
                && let Some(accounts) = &self.accounts
            {
                return Ok(accounts.clone());
            }
            Ok(json!({ "operation": operation }))
        }
    }

    fn preloader(upstream: Arc<ScriptedUpstream>) -> CachePreloader {
        CachePreloader::new(CachedFetcher::new(CacheConfig::default(), upstream))
    }

    #[test]
    fn contexts_parse_case_insensitively() {
        assert_eq!("Dashboard".parse(), Ok(PreloadContext::Dashboard));
        assert_eq!("investments".parse(), Ok(PreloadContext::Investments));
        assert_eq!("transactions".parse(), Ok(PreloadContext::Transactions));
        assert_eq!(" general ".parse(), Ok(PreloadContext::General));
        assert!("budgets".parse::<PreloadContext>().is_err());
        assert_eq!(PreloadContext::default(), PreloadContext::General);
    }

    #[test]
    fn local_today_is_within_a_day_of_utc() {
        let utc = OffsetDateTime::now_utc().date();
        let today = local_today();
        assert!((today - utc).whole_days().abs() <= 1, "{today} vs {utc}");
    }

    #[test]
    fn unknown_context_names_fall_back_to_general() {
        assert_eq!(PreloadContext::from_name("budgets"), PreloadContext::General);
        assert_eq!(PreloadContext::from_name(""), PreloadContext::General);
        assert_eq!(
            PreloadContext::from_name("Investments"),
            PreloadContext::Investments
        );
    }

    #[test]
    fn task_sets_per_context() {
        let today = date!(2024 - 03 - 10);
        let names = |context| -> Vec<&'static str> {
            tasks_for(context, today).iter().map(|task| task.name).collect()
        };

        let essential = ["categories", "account_types", "user_profile", "institutions"];
        assert_eq!(names(PreloadContext::General), essential);
        assert_eq!(names(PreloadContext::Dashboard).len(), 8);
        assert_eq!(
            names(PreloadContext::Dashboard),
            names(PreloadContext::Transactions)
        );
        assert_eq!(
            names(PreloadContext::Investments).last(),
            Some(&"holdings")
        );
    }

    #[test]
    fn recent_transactions_window_is_one_week() {
        let tasks = tasks_for(PreloadContext::Dashboard, date!(2024 - 03 - 03));
        let recent = tasks
            .iter()
            .find(|task| task.name == "recent_transactions")
            .expect("recent transactions task");

        let PreloadWork::Query { variables, .. } = &recent.work else {
            panic!("recent transactions should be a plain query");
        };
        assert_eq!(
            variables.as_ref(),
            Some(&json!({"limit": 50, "filters": {"startDate": "2024-02-25"}}))
        );
    }

    #[tokio::test]
    async fn general_preload_warms_essential_data() {
        let upstream = Arc::new(ScriptedUpstream::default());
        let preloader = preloader(upstream.clone());

        let results = preloader.preload(PreloadContext::General).await;

        assert_eq!(results.len(), 4);
        assert!(results.values().all(|succeeded| *succeeded));
        let metrics = preloader.preload_metrics();
        assert_eq!(metrics.entry_count, 4);
        assert_eq!(metrics.sets, 4);
    }

    #[tokio::test]
    async fn one_failing_task_does_not_affect_siblings() {
        let upstream = Arc::new(ScriptedUpstream::failing(&["GetMerchants"]));
        let preloader = preloader(upstream.clone());

        let results = preloader.preload(PreloadContext::Dashboard).await;

        assert_eq!(results.len(), 8);
        assert_eq!(results.get("merchants"), Some(&false));
        assert_eq!(
            results.values().filter(|succeeded| **succeeded).count(),
            7
        );
        assert_eq!(preloader.preload_metrics().entry_count, 7);
    }

    #[tokio::test]
    async fn failing_rules_are_reported() {
        let upstream = Arc::new(ScriptedUpstream::failing(&["GetTransactionRules"]));
        let preloader = preloader(upstream);

        let results = preloader.preload(PreloadContext::Transactions).await;

        assert_eq!(results.get("transaction_rules"), Some(&false));
        assert_eq!(results.get("recent_transactions"), Some(&true));
    }

    #[tokio::test]
    async fn holdings_fetched_for_investment_accounts() {
        let upstream = Arc::new(ScriptedUpstream::with_accounts(json!({
            "accounts": [
                {"id": "chk-1", "type": {"name": "depository"}},
                {"id": "ira-1", "type": {"name": "retirement"}},
                {"id": "brk-1", "type": {"name": "investment"}},
            ]
        })));
        let preloader = preloader(upstream.clone());

        let results = preloader.preload(PreloadContext::Investments).await;

        assert_eq!(results.get("holdings"), Some(&true));
        assert_eq!(
            upstream.calls_to("GetHoldingsBatch"),
            vec![json!({"accountIds": ["ira-1", "brk-1"]})]
        );
    }

    #[tokio::test]
    async fn holdings_skipped_without_investment_accounts() {
        let upstream = Arc::new(ScriptedUpstream::with_accounts(json!({
            "accounts": [{"id": "chk-1", "type": {"name": "depository"}}]
        })));
        let preloader = preloader(upstream.clone());

        let results = preloader.preload(PreloadContext::Investments).await;

        assert_eq!(results.get("holdings"), Some(&true));
        assert!(upstream.calls_to("GetHoldingsBatch").is_empty());
        assert_eq!(upstream.calls_to("GetAccounts").len(), 1);
    }

    #[tokio::test]
    async fn holdings_fail_when_accounts_cannot_be_listed() {
        let upstream = Arc::new(ScriptedUpstream::failing(&["GetAccounts"]));
        let preloader = preloader(upstream.clone());

        let results = preloader.preload(PreloadContext::Investments).await;

        assert_eq!(results.get("holdings"), Some(&false));
        assert_eq!(results.get("categories"), Some(&true));
    }

    #[tokio::test]
    async fn preload_reuses_cached_entries() {
        let upstream = Arc::new(ScriptedUpstream::default());
        let fetcher = CachedFetcher::new(CacheConfig::default(), upstream.clone());

        fetcher.preload(PreloadContext::General).await;
        fetcher.preload(PreloadContext::General).await;

        assert_eq!(upstream.calls_to("GetMe").len(), 1);
        assert_eq!(fetcher.metrics().hits, 4);
    }
}
