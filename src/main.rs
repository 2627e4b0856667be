use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::Notify;

mod config;
mod handler;
mod http;
mod license;
mod logger;
mod server;

use crate::config::{AppState, Config};
use crate::handler::HookRegistry;
use crate::license::{LicenseLibrary, Relay};

#[derive(Parser)]
#[command(
    name = "fps-relay",
    version,
    about = "HTTP relay for a FairPlay Streaming key server library"
)]
struct Cli {
    /// Configuration file, extension optional
    #[arg(short, long, env = "FPS_RELAY_CONFIG", default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP relay (default)
    Serve,
    /// Relay one request body from a file and print the response payload
    Process {
        /// File holding the request body
        file: PathBuf,
    },
    /// Print the effective configuration as TOML
    PrintConfig,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let cfg = Config::load_from(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            logger::init(&cfg.logging).context("failed to initialize logging")?;
            serve(cfg)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Process { file } => {
            logger::init(&cfg.logging).context("failed to initialize logging")?;
            process_file(&cfg, &file)
        }
        Command::PrintConfig => {
            print!("{}", cfg.to_toml().context("failed to render configuration")?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_library(cfg: &Config) -> anyhow::Result<LicenseLibrary> {
    let Some(path) = cfg.relay.library_path.as_deref() else {
        bail!("relay.library_path is not set");
    };
    let relay = &cfg.relay;
    Ok(LicenseLibrary::load(path, &relay.process_symbol, &relay.dispose_symbol)?)
}

fn serve(cfg: Config) -> anyhow::Result<()> {
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(workers) = cfg.server.workers {
        runtime_builder.worker_threads(workers);
    }
    let runtime = runtime_builder.build().context("failed to build runtime")?;
    tracing::info!(workers = ?cfg.server.workers, "runtime ready");

    let addr = cfg
        .get_socket_addr()
        .map_err(anyhow::Error::msg)
        .context("invalid server address")?;

    let relay: Arc<dyn Relay> = Arc::new(load_library(&cfg)?);
    let mut hooks = HookRegistry::new();
    handler::register_hooks(&mut hooks, relay, &cfg);
    if hooks.is_empty() {
        bail!("no request handlers registered");
    }
    tracing::debug!(hooks = ?hooks.names(), "hooks registered");

    runtime.block_on(async move {
        let listener = server::create_reusable_listener(addr)
            .with_context(|| format!("failed to bind {addr}"))?;
        logger::log_server_start(&addr, &cfg);

        let state = Arc::new(AppState::new(cfg, hooks));
        let shutdown = Arc::new(Notify::new());
        server::start_signal_handler(Arc::clone(&shutdown));

        // spawn_local requires a LocalSet
        let local = tokio::task::LocalSet::new();
        local
            .run_until(server::start_server_loop(listener, state, shutdown))
            .await
            .context("server loop failed")
    })
}

fn process_file(cfg: &Config, file: &Path) -> anyhow::Result<ExitCode> {
    let body = std::fs::read(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let library = load_library(cfg)?;
    tracing::debug!(library = %library.path().display(), bytes = body.len(), "relaying file");
    let exchange = library.exchange(&body);

    if let Some(status) = exchange.dispose_status {
        if !status.is_ok() {
            eprintln!("{} failed with status {status}", cfg.relay.dispose_symbol);
        }
    }

    if !exchange.process_status.is_ok() {
        eprintln!(
            "{} failed with status {}",
            cfg.relay.process_symbol, exchange.process_status
        );
        return Ok(ExitCode::FAILURE);
    }

    let mut stdout = std::io::stdout().lock();
    if let Some(payload) = &exchange.payload {
        stdout.write_all(payload)?;
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(ExitCode::SUCCESS)
}
