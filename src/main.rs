use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use evidence_collector_cli::{cli::Cli, io, session, RunError};

/// Exit code for a failed or timed-out primary navigation; distinct so
/// audit pipelines can tell "target unreachable" from setup errors.
const EXIT_NAVIGATION_FAILED: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Prepare the output folder before any log file attaches to it; a
    // non-empty folder is refused here, with nothing written yet.
    if let Some(dir) = cli.output_dir() {
        if let Err(err) = io::init_output_dir(dir, cli.overwrite) {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }

    let default_level = if cli.quiet { "error" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    // Operator telemetry goes to stderr; the evidence itself lands in the
    // log store's ndjson sink and the inspection artifacts.
    let file_layer = cli.output_dir().map(|dir| {
        let appender = tracing_appender::rolling::never(dir, "collector.log");
        fmt::layer().json().with_writer(appender).with_ansi(false)
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    match session::run(&cli).await {
        Ok(inspection) => {
            if cli.yaml {
                match inspection.to_yaml_string() {
                    Ok(dump) => println!("{dump}"),
                    Err(err) => error!(%err, "yaml dump failed"),
                }
            }
            if cli.json {
                match inspection.to_json_string() {
                    Ok(dump) => println!("{dump}"),
                    Err(err) => error!(%err, "json dump failed"),
                }
            }
        }
        Err(RunError::Fatal(err)) => {
            error!(%err, "aborting: primary navigation failed");
            std::process::exit(EXIT_NAVIGATION_FAILED);
        }
        Err(RunError::Other(err)) => {
            error!(%err, "collection failed");
            std::process::exit(1);
        }
    }
}
