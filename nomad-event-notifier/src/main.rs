use std::process::ExitCode;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use nomad_event_notifier::config::AppConfig;
use nomad_event_notifier::{app, logging, shutdown};

#[tokio::main]
async fn main() -> ExitCode {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = match logging::init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    info!(stream = ?config.stream, sink = ?config.sink, "Configuration loaded");
    if config.ui_base_is_fallback {
        warn!(
            ui_base = %config.ui_base,
            "NOMAD_SERVER_EXTERNAL_URL not set, deep links point at the Nomad address"
        );
    }

    let cancel = CancellationToken::new();
    let signals = shutdown::spawn_signal_handler(cancel.clone());

    let result = app::run(config, cancel.clone()).await;
    cancel.cancel();
    signals.abort();

    let report = result.context("Notifier stopped")?;
    info!(
        cursor = report.cursor.index,
        delivered = report.stats.delivered,
        failed = report.stats.failed,
        "Shutdown complete"
    );
    Ok(())
}
