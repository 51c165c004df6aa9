//! harpoon: terminal client for hack.chat.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use harpoon_core::CancellationToken;
use harpoon_core::orchestrator::Orchestrator;
use harpoon_core::transport::WsTransport;
use harpoon_tui::Cli;
use harpoon_tui::config::{Config, Resolved};
use harpoon_tui::{signals, terminal};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let resolved = Resolved::merge(&cli, &Config::load());

    // The terminal belongs to the UI, so logs go to a file.
    init_logging(&resolved.log_file)?;
    install_panic_hook();
    tracing::info!(
        server = %resolved.server,
        channel = %resolved.channel,
        username = %resolved.username,
        "starting"
    );

    let shutdown = CancellationToken::new();
    let _signals = signals::cancel_on_signal(&shutdown).context("failed to install signal handlers")?;
    let transport = Arc::new(WsTransport::new().context("failed to start network runtime")?);
    let orchestrator = Orchestrator::start(transport, resolved.session.clone(), shutdown.clone())
        .context("failed to start dispatch threads")?;

    orchestrator.connect(resolved.credentials());
    let outcome = terminal::run(&orchestrator, &shutdown, &resolved.channel);
    orchestrator.shutdown();
    tracing::info!("stopped");
    outcome
}

fn init_logging(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "harpoon=info".into()))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))
}

/// Put the terminal back before the default hook prints the panic.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        terminal::restore();
        tracing::error!("panic: {info}");
        default_hook(info);
    }));
}
