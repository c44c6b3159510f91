use anyhow::Context;
use clap::Parser;
use servicemon::cli::Cli;
use servicemon::config::AppConfig;
use servicemon::supervisor::LogSink;
use servicemon::{logging, system};
use tokio::signal;
use tracing::{error, info, warn};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config =
        AppConfig::load(cli.config.as_deref(), cli.overrides()).context("loading configuration")?;

    // Forking is only safe while the process is still single-threaded.
    if !config.service.foreground {
        system::daemonize().context("detaching into the background")?;
    }

    let sink = system::open_log_sink(config.service.output.as_deref())
        .context("opening output file")?;
    let _guard = logging::init_logging(&config.logging, &sink, config.service.verbose)?;
    info!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    if config.service.open_files_limit > 0 {
        system::raise_open_files_limit(config.service.open_files_limit);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building async runtime")?;
    runtime.block_on(supervise(config, sink))
}

async fn supervise(config: AppConfig, sink: LogSink) -> anyhow::Result<()> {
    let mut controller = config.controller(&sink);

    tokio::select! {
        _ = controller.run() => {
            info!("service supervision finished");
        }
        _ = shutdown_signal() => {
            warn!("shutdown signal received, stopping service");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
