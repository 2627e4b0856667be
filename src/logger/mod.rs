//! Logger module
//!
//! Installs the `tracing` subscriber for the process:
//! - diagnostics filtered by `logging.level` (or `RUST_LOG`), to stderr or a file
//! - access log lines on the `access` target, to stdout or a file

mod format;
pub mod writer;

pub use format::AccessLogEntry;

use crate::config::{Config, LoggingConfig};
use std::io;
use std::net::SocketAddr;
use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};
use writer::Console;

/// Target reserved for access log lines
pub const ACCESS_TARGET: &str = "access";

/// Initialize the logger with configuration
///
/// Should be called once at application startup.
pub fn init(config: &LoggingConfig) -> io::Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(&config.level).map_err(io::Error::other)?
    };
    let access_off = format!("{ACCESS_TARGET}=off").parse().map_err(io::Error::other)?;

    let diagnostics = fmt::layer()
        .with_target(true)
        .with_ansi(config.error_log_file.is_none())
        .with_writer(writer::make_writer(
            config.error_log_file.as_deref(),
            Console::Stderr,
        )?)
        .with_filter(filter.add_directive(access_off));

    let access = fmt::layer()
        .without_time()
        .with_target(false)
        .with_level(false)
        .with_ansi(false)
        .with_writer(writer::make_writer(
            config.access_log_file.as_deref(),
            Console::Stdout,
        )?)
        .with_filter(Targets::new().with_target(ACCESS_TARGET, Level::INFO));

    tracing_subscriber::registry()
        .with(diagnostics)
        .with(access)
        .try_init()
        .map_err(io::Error::other)
}

pub fn log_server_start(addr: &SocketAddr, config: &Config) {
    tracing::info!("Listening on: http://{addr}");
    tracing::info!(
        level = %config.logging.level,
        workers = ?config.server.workers,
        access_log = config.logging.access_log,
        access_log_file = config.logging.access_log_file.as_deref().unwrap_or("-"),
        error_log_file = config.logging.error_log_file.as_deref().unwrap_or("-"),
        "logging configured"
    );
    tracing::info!(
        handler = %config.relay.handler_name,
        legacy_status = config.relay.legacy_status,
        max_body_size = config.http.max_body_size,
        max_connections = ?config.performance.max_connections,
        "relay configured"
    );
}

/// Log formatted access log entry
pub fn log_access(entry: &AccessLogEntry, format: &str) {
    tracing::info!(target: ACCESS_TARGET, "{}", entry.format(format));
}
