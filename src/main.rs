use std::{process, sync::Arc};

use querycache::{
    application::{
        commands::{self, print_json},
        error::AppError,
    },
    cache::CachedFetcher,
    config::{self, Command},
    infra::{
        telemetry,
        upstream::{HttpUpstream, QueryDocuments},
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(source = report.source, error = %report.chain(), "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(source = report.source, error = %report.chain(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    let documents = QueryDocuments::load(&settings.upstream.documents).await?;
    info!(
        endpoint = %settings.upstream.endpoint,
        operations = documents.len(),
        "upstream configured"
    );
    let upstream = HttpUpstream::new(&settings.upstream, documents)?;
    let fetcher = CachedFetcher::new(settings.cache.clone(), Arc::new(upstream));

    match cli_args.command {
        Command::Fetch(args) => {
            let report = commands::run_fetch(&fetcher, &args).await?;
            print_json(&report)
        }
        Command::Preload(args) => {
            let report = commands::run_preload(&fetcher, &args).await;
            print_json(&report)
        }
    }
}
