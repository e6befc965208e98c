#![forbid(unsafe_code)]

//! `pw-session-engine`: multi-account game client session daemon.
//!
//! Bootstraps configuration, the session registry and process monitor, and
//! the IPC server for `pw-session-ctl`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use tracing_subscriber::{fmt, EnvFilter};

use pw_session_engine::config::GlobalConfig;
use pw_session_engine::ipc::server::{spawn_ipc_server, EngineState};
use pw_session_engine::orchestrator::bulk::BulkCoordinator;
use pw_session_engine::orchestrator::host::{ProcessHost, SystemHost};
use pw_session_engine::orchestrator::launcher::{LaunchSettings, Launcher};
use pw_session_engine::orchestrator::monitor::Monitor;
use pw_session_engine::orchestrator::registry::SessionRegistry;
use pw_session_engine::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "pw-session-engine", about = "Game client session engine", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured game directory.
    #[arg(long)]
    game_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("pw-session-engine bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(dir) = args.game_dir {
        config.game_directory = Some(dir);
    }
    if config.accounts_file.is_relative() {
        if let Some(base) = args.config.parent() {
            config.accounts_file = base.join(&config.accounts_file);
        }
    }
    let config = Arc::new(config);
    info!(
        game_directory = ?config.game_directory,
        accounts_file = %config.accounts_file.display(),
        "configuration loaded"
    );

    // ── Build the engine ────────────────────────────────
    let registry = SessionRegistry::new();
    let host: Arc<dyn ProcessHost> = Arc::new(SystemHost::new());
    let launcher = Launcher::new(
        registry.clone(),
        Arc::clone(&host),
        LaunchSettings::from_config(&config),
    );
    let bulk = BulkCoordinator::from_config(launcher, &config);

    let ct = CancellationToken::new();
    let monitor_handle =
        Monitor::new(registry.clone(), host, config.monitor.clone()).spawn(ct.clone());
    let notice_handle = spawn_exit_logger(&registry, ct.clone());

    let state = Arc::new(EngineState::new(Arc::clone(&config), bulk.clone()));
    let ipc_handle = spawn_ipc_server(state, ct.clone())?;

    info!("session engine ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");

    if config.terminate_clients_on_shutdown {
        let outcomes = bulk.close_all().await;
        for outcome in outcomes.iter().filter(|o| !o.is_success()) {
            if let Err(ref err) = outcome.result {
                error!(login = %outcome.login, %err, "failed to close client on shutdown");
            }
        }
    } else if !registry.is_empty() {
        info!(
            clients = registry.len(),
            "leaving running clients detached"
        );
    }

    ct.cancel();

    // ── Wait for background tasks ───────────────────────
    let _ = tokio::join!(monitor_handle, notice_handle, ipc_handle);
    info!("pw-session-engine shut down");

    Ok(())
}

/// Log every exit notice the registry publishes.
fn spawn_exit_logger(
    registry: &SessionRegistry,
    ct: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut notices = registry.subscribe();
    tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => break,
                    received = notices.recv() => match received {
                        Ok(notice) => info!(
                            login = %notice.login,
                            pid = notice.process_id,
                            reason = ?notice.reason,
                            detected_at = %notice.detected_at.to_rfc3339(),
                            "client exited"
                        ),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "exit notice stream lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        }
        .instrument(info_span!("exit_notices")),
    )
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
