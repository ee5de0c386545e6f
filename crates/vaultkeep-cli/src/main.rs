#![forbid(unsafe_code)]
//! vaultkeep binary entry point: parses process configuration, boots the
//! shared runtime kernel (C1-C7) for the configured role, and — for the
//! server role — binds every configured resource-taxonomy service (C8-
//! C10) behind it. Handles graceful shutdown on SIGINT/SIGTERM in the
//! two-phase order §4.7 specifies (`ShutdownView` then `ShutdownModel`).

mod config;
mod server;

use std::process;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use vaultkeep_client::ClientRoleHooks;
use vaultkeep_listener::{ListenerManager, ServiceSpec};
use vaultkeep_postgres::{PostgresEngine, PostgresFactory};
use vaultkeep_runtime::{is_already_running, Controller, RoleHooks, RunMarker};
use vaultkeep_server::{assemble_service, ServiceConfig, ServiceKind, ServiceState, ServerRoleHooks, SessionManager};

use crate::config::{Cli, Role};

const TRACING_TARGET_STARTUP: &str = "vaultkeep_cli::startup";
const TRACING_TARGET_SHUTDOWN: &str = "vaultkeep_cli::shutdown";

#[tokio::main]
async fn main() {
    let cli = Cli::init();
    init_tracing();

    let Err(error) = run(&cli).await else {
        tracing::info!(target: TRACING_TARGET_SHUTDOWN, "vaultkeep terminated successfully");
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(target: TRACING_TARGET_SHUTDOWN, error = %error, "vaultkeep terminated with error");
    } else {
        eprintln!("Error: {error:#}");
    }
    write_crash_log(&cli.db_dir, &error);
    process::exit(1);
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    cli.validate().context("invalid configuration")?;
    cli.log();

    std::fs::create_dir_all(&cli.db_dir).context("could not create db_dir")?;
    let is_first_start = claim_first_start_marker(&cli.db_dir)?;

    let role_name = match cli.role {
        Role::Client => "client",
        Role::Server => "server",
    };

    if is_already_running(&cli.db_dir, role_name) {
        if cli.role != Role::Server {
            anyhow::bail!("a {role_name} process is already running against {}", cli.db_dir.display());
        }
        tracing::info!(target: TRACING_TARGET_STARTUP, "a sibling {role_name} instance is already running, attempting handshake shutdown");
        server::shutdown_sibling(&cli.db_dir, role_name, cli.host, &cli.candidate_ports(), cli.admin_session_key.as_deref())
            .await
            .context("could not shut down the already-running sibling instance")?;
    }
    let run_marker = RunMarker::claim(&cli.db_dir, role_name).context("could not claim run-marker")?;

    let engine_config = cli.postgres.clone();
    let factory = PostgresFactory::new(engine_config, register_action_handlers);

    match cli.role {
        Role::Client => run_client(cli, is_first_start, factory).await?,
        Role::Server => run_server(cli, is_first_start, factory).await?,
    }

    run_marker.release();
    Ok(())
}

/// Action handlers are storage-schema specific and out of scope for this
/// workspace (the controller treats the database as an opaque pipe); a
/// deployment layers its own schema crate on top and registers its
/// handlers here before the engine is placed behind `DbPipe`.
fn register_action_handlers(_engine: &PostgresEngine) {
    tracing::debug!(target: TRACING_TARGET_STARTUP, "no action handlers registered: storage schema is an external collaborator");
}

/// `IsFirstStart` (§6): whether this boot is the first against `db_dir`,
/// decided by the presence of a sentinel file written on the first
/// successful boot, distinct from the per-process `RunMarker`.
fn claim_first_start_marker(db_dir: &std::path::Path) -> anyhow::Result<bool> {
    let path = db_dir.join(".vaultkeep-initialized");
    let is_first_start = !path.exists();
    if is_first_start {
        std::fs::write(&path, b"").context("could not write first-start marker")?;
    }
    Ok(is_first_start)
}

async fn run_client(cli: &Cli, is_first_start: bool, factory: PostgresFactory) -> anyhow::Result<()> {
    let hooks: Arc<dyn RoleHooks<PostgresEngine>> = Arc::new(ClientRoleHooks::default());
    let controller = Controller::new(cli.db_dir.clone(), is_first_start, hooks, factory).await.context("could not initialise client controller")?;
    controller.init_view();
    log_first_start_banner(&controller);

    tracing::info!(target: TRACING_TARGET_STARTUP, "client controller booted, running until shutdown signal");
    shutdown_signal().await;

    shutdown_controller(&controller).await;
    Ok(())
}

async fn run_server(cli: &Cli, is_first_start: bool, factory: PostgresFactory) -> anyhow::Result<()> {
    let hooks: Arc<dyn RoleHooks<PostgresEngine>> = Arc::new(ServerRoleHooks);
    let controller = Controller::new(cli.db_dir.clone(), is_first_start, hooks, factory).await.context("could not initialise server controller")?;
    controller.init_view();
    log_first_start_banner(&controller);

    let (listener, _reactor) = ListenerManager::spawn(controller.bus().clone());
    let sessions = Arc::new(SessionManager::new());
    let tls = cli.tls.material();

    let mut specs = Vec::new();
    if let Some(port) = cli.ports.admin {
        let config = ServiceConfig::new("server administration", cli.network_version)
            .local_only()
            .with_cors_origins(cli.cors_origins.clone());
        specs.push(build_service_spec("admin", cli.bind_addr(port), tls.clone(), ServiceKind::Admin, config, controller.clone(), sessions.clone(), listener.clone()));
    }
    if let Some(port) = cli.ports.file_repository {
        let config = ServiceConfig::new("file repository", cli.network_version).with_cors_origins(cli.cors_origins.clone());
        specs.push(build_service_spec(
            "file_repository",
            cli.bind_addr(port),
            tls.clone(),
            ServiceKind::FileRepository,
            config,
            controller.clone(),
            sessions.clone(),
            listener.clone(),
        ));
    }
    if let Some(port) = cli.ports.tag_repository {
        let config = ServiceConfig::new("tag repository", cli.network_version).with_cors_origins(cli.cors_origins.clone());
        specs.push(build_service_spec(
            "tag_repository",
            cli.bind_addr(port),
            tls.clone(),
            ServiceKind::TagRepository,
            config,
            controller.clone(),
            sessions.clone(),
            listener.clone(),
        ));
    }

    listener.set_services(specs).await.context("could not bind configured services")?;

    let admin_shutdown = Arc::new(tokio::sync::Notify::new());
    {
        let admin_shutdown = admin_shutdown.clone();
        controller.sub(
            "shutdown_requested",
            Box::new(move |_payload| {
                admin_shutdown.notify_one();
                Ok(())
            }),
        );
    }

    tracing::info!(target: TRACING_TARGET_STARTUP, "server controller booted, running until shutdown signal");
    tokio::select! {
        () = shutdown_signal() => {}
        () = admin_shutdown.notified() => {
            tracing::info!(target: TRACING_TARGET_SHUTDOWN, "received /shutdown admin request, shutting down");
        }
    }

    listener.shutdown().await.context("listener shutdown failed")?;
    shutdown_controller(&controller).await;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_service_spec(
    key: &str,
    addr: std::net::SocketAddr,
    tls: Option<vaultkeep_listener::TlsMaterial>,
    kind: ServiceKind,
    config: ServiceConfig,
    controller: Arc<Controller<PostgresEngine>>,
    sessions: Arc<SessionManager>,
    listener: Arc<ListenerManager>,
) -> ServiceSpec {
    let state = ServiceState::new(controller, config, sessions, listener);
    let app = assemble_service(kind, state.clone()).with_state(state);
    ServiceSpec { key: key.to_owned(), addr, tls, app }
}

fn log_first_start_banner(controller: &Controller<PostgresEngine>) {
    if controller.is_first_start() {
        tracing::info!(target: TRACING_TARGET_STARTUP, "first start against this db_dir, running first-run setup");
    }
}

async fn shutdown_controller(controller: &Arc<Controller<PostgresEngine>>) {
    tracing::info!(target: TRACING_TARGET_SHUTDOWN, "shutting down view");
    controller.shutdown_view().await;
    tracing::info!(target: TRACING_TARGET_SHUTDOWN, "shutting down model");
    controller.shutdown_model().await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = ctrl_c().await {
            tracing::error!(target: TRACING_TARGET_SHUTDOWN, %err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match unix::signal(unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!(target: TRACING_TARGET_SHUTDOWN, %err, "failed to install sigterm handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!(target: TRACING_TARGET_SHUTDOWN, "received ctrl-c, shutting down"),
        () = terminate => tracing::info!(target: TRACING_TARGET_SHUTDOWN, "received sigterm, shutting down"),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
}

/// Writes `<db_dir>/crash.log` on catastrophic failure (§6), best-effort:
/// a failure here must never mask the original error.
fn write_crash_log(db_dir: &std::path::Path, error: &anyhow::Error) {
    let path = db_dir.join("crash.log");
    let contents = format!("{error:#}\n");
    if let Err(err) = std::fs::write(&path, contents) {
        tracing::warn!(target: TRACING_TARGET_SHUTDOWN, %err, path = %path.display(), "could not write crash log");
    }
}
