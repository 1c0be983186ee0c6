use std::io::IsTerminal;
use std::process::ExitCode;

use batchwatch::cli::{self, LineSink, OutputFormat, ViewSink};
use batchwatch::terminal::LiveProgress;
use batchwatch::{Command, Config, HttpProgressClient, telemetry};
use clap::{CommandFactory, Parser};

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, stopping...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, stopping...");
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = batchwatch::Args::parse();

    let config = Config::load(&args)?;

    if args.validate {
        println!("Configuration is valid.");
        return Ok(ExitCode::SUCCESS);
    }

    telemetry::init_telemetry(std::io::stderr().is_terminal())?;

    tracing::debug!("{:?}", args);

    let Some(command) = args.command else {
        batchwatch::Args::command().print_help()?;
        return Ok(ExitCode::FAILURE);
    };

    let format = if args.json { OutputFormat::Json } else { OutputFormat::Text };
    let source = HttpProgressClient::from_config(&config);
    let mut stdout = std::io::stdout();

    let success = match command {
        Command::Status { batch_id } => {
            cli::run_status(&source, &config.cadence, &batch_id, format, &mut stdout).await?
        }
        Command::Watch { batch_ids } => {
            // Live bars on a terminal, one line per view change otherwise
            let mut sink: Box<dyn ViewSink> = if format == OutputFormat::Text && stdout.is_terminal() {
                Box::new(LiveProgress::for_stdout()?)
            } else {
                Box::new(LineSink::new(stdout, format))
            };
            cli::run_watch(source, &config.cadence, batch_ids, sink.as_mut(), shutdown_signal())
                .await?
                .all_completed()
        }
    };

    Ok(if success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
