use std::io::Write;

use tempfile::NamedTempFile;

use super::*;

fn parse(args: &[&str]) -> CliArgs {
    let mut argv = vec!["querycache"];
    argv.extend_from_slice(args);
    CliArgs::parse_from(argv)
}

#[test]
fn defaults_without_any_source() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert_eq!(settings.cache.max_size_bytes, 50 * 1024 * 1024);
    assert!(settings.cache.enabled);
    assert_eq!(settings.upstream.endpoint.as_str(), DEFAULT_ENDPOINT);
    assert_eq!(settings.upstream.timeout, Duration::from_secs(30));
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.cache.max_size_bytes = Some(4096);

    let overrides = Overrides {
        log_level: Some("debug".to_string()),
        cache_max_size_mb: Some(8),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.cache.max_size_bytes, 8 * 1024 * 1024);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = Overrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn rejects_zero_budget_and_ttls() {
    let mut raw = RawSettings::default();
    raw.cache.max_size_bytes = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero budget");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.max_size_bytes",
            ..
        }
    ));

    let mut raw = RawSettings::default();
    raw.cache.short_ttl_secs = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero ttl");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.short_ttl_secs",
            ..
        }
    ));
}

#[test]
fn rejects_unknown_default_strategy() {
    let mut raw = RawSettings::default();
    raw.cache.default_strategy = Some("eventually".to_string());

    let err = Settings::from_raw(raw).expect_err("unknown strategy");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.default_strategy",
            ..
        }
    ));
}

#[test]
fn rejects_non_http_endpoint() {
    let mut raw = RawSettings::default();
    raw.upstream.endpoint = Some("ftp://example.com/graphql".to_string());

    let err = Settings::from_raw(raw).expect_err("ftp endpoint");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "upstream.endpoint",
            ..
        }
    ));
}

#[test]
fn loads_cache_section_from_file() {
    let mut file = NamedTempFile::with_suffix(".toml").expect("temp config");
    writeln!(
        file,
        r#"
[logging]
level = "warn"

[cache]
max_size_bytes = 2048
default_strategy = "custom:45"
deduplicate = false

[cache.ttl_overrides]
GetAccountTypeOptions = "never"
GetTransactionsList = 120

[upstream]
endpoint = "https://api.example.com/graphql"
timeout_seconds = 5
"#
    )
    .expect("write config");

    let path = file.path().to_string_lossy().into_owned();
    let cli = parse(&["--config-file", &path, "preload"]);
    let settings = load(&cli).expect("settings from file");

    assert_eq!(settings.logging.level, LevelFilter::WARN);
    assert_eq!(settings.cache.max_size_bytes, 2048);
    assert_eq!(
        settings.cache.default_strategy,
        CacheStrategy::Custom(Duration::from_secs(45))
    );
    assert!(!settings.cache.deduplicate);
    assert_eq!(
        settings.cache.ttl_override_for("GetAccountTypeOptions"),
        Some(Expiry::Never)
    );
    assert_eq!(
        settings.cache.ttl_override_for("GetTransactionsList"),
        Some(Expiry::After(Duration::from_secs(120)))
    );
    assert_eq!(
        settings.upstream.endpoint.as_str(),
        "https://api.example.com/graphql"
    );
    assert_eq!(settings.upstream.timeout, Duration::from_secs(5));
}

#[test]
fn parse_fetch_arguments() {
    let args = parse(&[
        "fetch",
        "GetAccounts",
        "--variables",
        r#"{"detailLevel":"basic"}"#,
        "--strategy",
        "long",
        "--force-refresh",
        "--repeat",
        "4",
    ]);

    match args.command {
        Command::Fetch(fetch) => {
            assert_eq!(fetch.operation, "GetAccounts");
            assert_eq!(fetch.variables.as_deref(), Some(r#"{"detailLevel":"basic"}"#));
            assert_eq!(fetch.strategy, Some(CacheStrategy::Long));
            assert!(fetch.force_refresh);
            assert_eq!(fetch.repeat.get(), 4);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_preload_arguments() {
    let args = parse(&["preload", "--context", "dashboard", "--log-level", "debug"]);

    match args.command {
        Command::Preload(preload) => {
            assert_eq!(preload.context, "dashboard");
        }
        _ => panic!("wrong command parsed"),
    }
    assert_eq!(args.overrides.log_level.as_deref(), Some("debug"));
}

#[test]
fn preload_context_defaults_to_general() {
    let args = parse(&["preload"]);
    match args.command {
        Command::Preload(preload) => {
            assert_eq!(preload.context, "general");
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn preload_accepts_unlisted_context_names() {
    let args = parse(&["preload", "--context", "budgets"]);
    match args.command {
        Command::Preload(preload) => assert_eq!(preload.context, "budgets"),
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn fetch_repeat_must_be_positive() {
    let result = CliArgs::try_parse_from(["querycache", "fetch", "GetMe", "--repeat", "0"]);
    assert!(result.is_err());
}
