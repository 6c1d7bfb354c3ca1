//! dirsyncd: watch directory trees and mirror them with rsync.
//!
//! Startup is fail-fast: configuration problems and log-file errors are
//! reported and the process exits before any watcher is established. Once
//! running, the daemon only stops on SIGINT/SIGTERM; individual sync
//! failures never bring it down.

use clap::Parser;
use dirsyncd::cli::Args;
use dirsyncd::config::Config;
use dirsyncd::logging::LogSink;
use dirsyncd::sync;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = args.config_path();
    let mut config = match Config::load(&config_path) {
        Ok(config) => {
            tracing::info!("Read configuration file: {}", config_path.display());
            config
        }
        Err(e) => {
            tracing::error!(
                "Problem reading or parsing configuration file {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }
    };

    // CLI flags win over the config file.
    if let Some(log_file) = args.log_file {
        config.log_file = Some(log_file);
    }
    if args.debug {
        config.debug = true;
    }
    if args.ignore_initial {
        config.watch.ignore_initial = Some(true);
    }

    let sink = match LogSink::open(config.log_file.as_deref()).await {
        Ok(sink) => {
            if let Some(path) = &config.log_file {
                tracing::info!("Sending logs to {}", path.display());
            }
            Arc::new(sink)
        }
        Err(e) => {
            if let Some(path) = &config.log_file {
                tracing::error!(
                    "Error writing to '{}'. Ensure file exists and is writable: {}",
                    path.display(),
                    e
                );
            }
            std::process::exit(1);
        }
    };

    let _handles = match sync::start(&config, sink.clone()) {
        Ok(handles) => handles,
        Err(e) => {
            tracing::error!("Misconfigured config file: {}", e);
            std::process::exit(1);
        }
    };

    wait_for_shutdown().await;

    tracing::info!("Received termination signal, shutting down");
    sink.flush().await;
}

/// Resolve on SIGINT or SIGTERM. In-flight rsync processes get standard
/// child-process termination semantics; there is no graceful drain.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
