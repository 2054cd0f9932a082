//! Expedientes server binary.
//!
//! Opens the configured engine, runs startup maintenance, and serves
//! line-delimited JSON requests over TCP until Ctrl-C or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! # Durable store
//! expedientes-server --listen 0.0.0.0:7878 --data /var/lib/expedientes/store.redb
//!
//! # Volatile store for development
//! EXPEDIENTES_ENGINE=memory expedientes-server
//!
//! # Print the contents of a store and exit
//! expedientes-server --data /var/lib/expedientes/store.redb --dump
//! ```

use std::io::IsTerminal;

use clap::Parser;
use expedientes_records::{Gateway, RecordService};
use expedientes_server::{Cli, LogFormat, ServerError, serve, shutdown::shutdown_signal, write_dump};
use expedientes_storage::{Backend, StorageBackend};
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let storage_config = cli.storage_config()?;
    let backend = Backend::open(&storage_config)?;

    if cli.dump {
        let dumped = write_dump(&backend, &mut tokio::io::stdout()).await;
        backend.close().await?;
        let entries = dumped?;
        tracing::info!(entries, "dump complete");
        return Ok(());
    }

    let service_config = cli.service_config()?;
    if backend.is_memory() {
        tracing::warn!("running on the memory engine; all data is lost on shutdown");
    }

    let service = RecordService::new(backend.clone(), service_config);
    let report = service.prepare().await?;
    tracing::info!(
        purged_sessions = report.purged_sessions,
        records = report.index.records,
        index_entries = report.index.entries,
        divergent = report.index.divergent.len(),
        rebuilt = report.rebuilt,
        "startup maintenance complete"
    );

    let listener = TcpListener::bind(cli.listen).await?;
    tracing::info!(
        listen_addr = %listener.local_addr()?,
        engine = %backend.kind(),
        hospitals = ?service.config().hospitals(),
        specialties = ?service.config().specialties(),
        "accepting connections"
    );

    let served = serve(listener, Gateway::new(service), shutdown_signal()).await;
    backend.close().await?;
    served?;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Installs the global subscriber on stderr, leaving stdout to `--dump`.
/// `RUST_LOG` overrides the default `info` filter.
fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = match format {
        LogFormat::Json => true,
        LogFormat::Text => false,
        LogFormat::Auto => !std::io::stderr().is_terminal(),
    };

    if use_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().flatten_event(true).with_current_span(false).with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry().with(env_filter).with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}
