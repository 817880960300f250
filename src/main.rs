//! taskmasterd — entry point.
//!
//! Operator-facing logs go to stderr and to the rotating log file; nothing
//! else is written to stdout except the `-H` password-hash utility's
//! output.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use taskmaster::auth::AuthState;
use taskmaster::context::SupervisorContext;
use taskmaster::dispatcher::{Action, DispatchError};
use taskmaster::logging::RotatingWriter;
use taskmaster::{dashboard, dispatcher, reload, rpc, signals};

/// Process supervisor: launches configured jobs and exposes remote control.
#[derive(Debug, Parser)]
#[command(name = "taskmasterd")]
struct Cli {
    /// RPC listen port.
    #[arg(short = 'p', long, default_value_t = 4242)]
    port: u16,

    /// Configuration file path.
    #[arg(short = 'c', long, default_value = "./config.json")]
    config: String,

    /// Log file path.
    #[arg(short = 'l', long, default_value = "./taskmaster_logs")]
    log: String,

    /// Max bytes per rotated log file.
    #[arg(short = 's', long, default_value_t = 65535)]
    max_log_bytes: u64,

    /// Max number of rotated log files.
    #[arg(short = 'n', long, default_value_t = 8)]
    max_log_files: u32,

    /// Generate a password hash interactively and exit.
    #[arg(short = 'H', long)]
    hash: bool,

    /// Enable the embedded HTTP dashboard.
    #[arg(short = 'b', long, default_value_t = true)]
    dashboard: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.hash {
        return taskmaster::auth::generate_hash_interactive();
    }

    let log_writer = RotatingWriter::open(&cli.log, cli.max_log_bytes, cli.max_log_files)
        .with_context(|| format!("failed to open log file {}", cli.log))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_writer(log_writer.clone())
        .with_env_filter(filter)
        .init();

    let doc = reload::load(&cli.config).with_context(|| "failed to load configuration")?;
    let registry = Arc::new(reload::initial_registry(&doc));
    let auth = Arc::new(AuthState::new(doc.password.clone()));

    let config_path_for_reload = cli.config.clone();
    let registry_for_reload = Arc::clone(&registry);
    let auth_for_reload = Arc::clone(&auth);

    // `dispatcher` is captured by the reload closure via a lazily-filled
    // cell because the dispatcher itself must exist before the closure that
    // references it can be constructed; see the `OnceLock` below.
    let dispatcher_cell: Arc<std::sync::OnceLock<dispatcher::Dispatcher>> =
        Arc::new(std::sync::OnceLock::new());
    let dispatcher_for_reload = Arc::clone(&dispatcher_cell);

    let on_reload = move |path: &str| -> Result<Vec<taskmaster::job::ProcStatus>, DispatchError> {
        let dispatcher = dispatcher_for_reload
            .get()
            .expect("dispatcher initialized before first reload")
            .clone();
        reload::apply(path, &registry_for_reload, &auth_for_reload, &dispatcher)
    };

    let (dispatcher, dispatcher_handle) = dispatcher::spawn(Arc::clone(&registry), on_reload);
    dispatcher_cell
        .set(dispatcher.clone())
        .unwrap_or_else(|_| panic!("dispatcher cell set twice"));

    let ctx = Arc::new(SupervisorContext {
        registry: Arc::clone(&registry),
        dispatcher: dispatcher.clone(),
        auth: Arc::clone(&auth),
        log_writer: log_writer.clone(),
        config_path: cli.config.clone(),
    });

    rpc::spawn(Arc::clone(&ctx), cli.port).with_context(|| "failed to start RPC listener")?;
    if cli.dashboard {
        dashboard::spawn(Arc::clone(&ctx), cli.port + 1)
            .with_context(|| "failed to start HTTP dashboard")?;
    }
    signals::spawn(dispatcher.clone(), config_path_for_reload);

    for name in registry.names() {
        if let Some(rec) = registry.get(&name) {
            if rec.spec_snapshot().autostart {
                if let Err(e) = dispatcher.submit(Action::Start(name.clone())) {
                    tracing::warn!(job = %name, error = %e, "autostart failed");
                }
            }
        }
    }

    dispatcher_handle
        .join()
        .map_err(|_| anyhow::anyhow!("dispatcher thread panicked"))?;
    Ok(())
}
