mod config_loader;
mod control;
mod runtime;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use common::err::ReError;
use connection::ConnectionOptions;
use coordinator::{Coordinator, CoordinatorCallbacks};
use delivery::{HttpBackend, KafkaBackend, TcpBackend, WebSocketBackend};
use dispatcher::{Backend, Dispatcher};
use position::PositionStore;
use tracing::{error, info, warn};

use control::{ControlHandler, ExitCode};
use runtime::{AppState, BackendServer, CoordinatorServer};

#[derive(Parser)]
#[command(name = "cdc", about = "MySQL binlog fan-out service", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the service in the foreground.
    Run {
        /// Path to the YAML or TOML config file.
        #[arg(long, short)]
        config: PathBuf,
        /// Directory holding the local position file and control socket.
        #[arg(long, default_value = "/var/lib/cdc")]
        state_dir: PathBuf,
        #[arg(long)]
        debug: bool,
        #[arg(long)]
        log_dir: Option<String>,
    },
    /// Ask a running process to stop.
    Stop(ControlArgs),
    /// Ask a running process to reload one service's config (or "all").
    Reload {
        target: String,
        #[command(flatten)]
        control: ControlArgs,
    },
    /// List the running process's view of the cluster.
    ShowMembers(ControlArgs),
}

#[derive(Args)]
struct ControlArgs {
    #[arg(long, default_value = "/var/lib/cdc/control.sock")]
    control_socket: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match cli.command {
        Command::Run {
            config,
            state_dir,
            debug,
            log_dir,
        } => run(config, state_dir, debug, log_dir).await,
        Command::Stop(args) => send_one_shot(&args.control_socket, "STOP").await,
        Command::Reload { target, control } => send_one_shot(&control.control_socket, &format!("RELOAD {target}")).await,
        Command::ShowMembers(args) => send_one_shot(&args.control_socket, "SHOW_MEMBERS").await,
    };
    std::process::exit(exit_code as i32);
}

async fn send_one_shot(socket: &std::path::Path, line: &str) -> ExitCode {
    match control::send_command(socket, line).await {
        Ok(response) => {
            print!("{response}");
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::Runtime
        }
    }
}

async fn run(config_path: PathBuf, state_dir: PathBuf, debug: bool, log_dir: Option<String>) -> ExitCode {
    let _guard = common::log::init_log(debug, log_dir.as_deref());

    let config = match config_loader::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config {}: {e}", config_path.display());
            return ExitCode::Usage;
        }
    };

    if let Err(e) = std::fs::create_dir_all(&state_dir) {
        eprintln!("failed to create state directory {}: {e}", state_dir.display());
        return ExitCode::Runtime;
    }

    let options = ConnectionOptions {
        hostname: config.mysql.host.clone(),
        port: config.mysql.port,
        username: config.mysql.user.clone(),
        password: config.mysql.password.clone(),
        database: None,
        server_id: config.mysql.server_id,
        heartbeat_interval: Duration::from_secs(30),
    };

    let worker_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    let backends: Vec<Arc<dyn Backend>> = match build_backends(&config, worker_count) {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to build delivery back-ends");
            return ExitCode::Runtime;
        }
    };

    let dispatcher = Arc::new(Dispatcher::new(backends.clone()));
    let position_store = Arc::new(PositionStore::new(state_dir.join("position")));

    let app_state = AppState::new(options, position_store, dispatcher, backends.clone());

    let kv = match coordinator::etcd_kv::EtcdKv::connect(&config.cluster.endpoints).await {
        Ok(kv) => Arc::new(kv),
        Err(e) => {
            error!(error = %e, "failed to connect to the cluster KV store");
            return ExitCode::Runtime;
        }
    };

    let member_key = common::uuid::uuid_timestamp();
    let leader_state = app_state.clone();
    let position_state = app_state.clone();
    let callbacks = CoordinatorCallbacks {
        on_became_leader: Box::new(move || leader_state.spawn_leader_duties()),
        on_position_changed: Box::new(move |bytes| position_state.apply_remote_position(bytes)),
    };
    let coordinator = Coordinator::new(
        kv,
        member_key,
        config.cluster.service_ip.clone(),
        config.cluster.service_port,
        callbacks,
    );
    app_state.set_coordinator(coordinator.clone());

    let mut shutdown = common::server::ShutdownHandle::create();
    for backend in &backends {
        shutdown.add_service(Arc::new(BackendServer(backend.clone())));
    }
    shutdown.add_service(Arc::new(CoordinatorServer(coordinator.clone())));

    for backend in &backends {
        if let Err(e) = backend.start().await {
            error!(backend = backend.name(), error = %e, "back-end failed to start");
            return ExitCode::Runtime;
        }
    }
    if let Err(e) = coordinator.start().await {
        error!(error = %e, "coordinator failed to start");
        return ExitCode::Runtime;
    }

    let control_handler: Arc<dyn ControlHandler> = Arc::new(CdcControlHandler {
        app_state: app_state.clone(),
        coordinator: coordinator.clone(),
    });
    let control_socket = state_dir.join("control.sock");
    let control_socket_path = control_socket.clone();
    tokio::spawn(async move {
        if let Err(e) = control::serve(&control_socket_path, control_handler).await {
            error!(error = %e, "control channel stopped unexpectedly");
        }
    });

    info!(config = %config_path.display(), state_dir = %state_dir.display(), "cdc started");

    tokio::select! {
        _ = app_state.wait_for_stop() => {
            info!("STOP received on control channel, shutting down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt signal, shutting down");
            app_state.request_stop();
        }
    }

    // Drain in-flight work bounded by 30s per node,
    // then release leadership and delete the heartbeat key.
    match tokio::time::timeout(Duration::from_secs(30), shutdown.shutdown_all(true)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "shutdown reported an error"),
        Err(_) => warn!("shutdown did not complete within the 30s drain bound"),
    }

    ExitCode::Success
}

fn build_backends(config: &common::config::Config, worker_count: usize) -> Result<Vec<Arc<dyn Backend>>, ReError> {
    let mut backends: Vec<Arc<dyn Backend>> = Vec::new();
    backends.push(Arc::new(HttpBackend::new(&config.services.http, worker_count, Duration::from_secs(1))?));
    backends.push(Arc::new(TcpBackend::new(&config.services.tcp)?));
    backends.push(Arc::new(WebSocketBackend::new(&config.services.websocket)?));
    backends.push(Arc::new(KafkaBackend::new(&config.kafka)?));
    Ok(backends)
}

/// Wires the control channel's one-shot commands to the running process:
/// `STOP` requests graceful shutdown, `RELOAD` reinitializes one back-end
/// (or all of them), `SHOW_MEMBERS` reports the Coordinator's view of the
/// cluster.
struct CdcControlHandler {
    app_state: Arc<AppState>,
    coordinator: Arc<Coordinator>,
}

#[async_trait::async_trait]
impl ControlHandler for CdcControlHandler {
    async fn stop(&self) -> Result<String, ReError> {
        self.app_state.request_stop();
        Ok("stopping".to_string())
    }

    async fn reload(&self, target: &str) -> Result<String, ReError> {
        let mut reloaded = Vec::new();
        for backend in &self.app_state.backends {
            if target == "all" || backend.name() == target {
                backend.reload().await?;
                reloaded.push(backend.name().to_string());
            }
        }
        if reloaded.is_empty() {
            return Err(ReError::Error(format!("unknown back-end '{target}'")));
        }
        Ok(format!("reloaded: {}", reloaded.join(", ")))
    }

    async fn show_members(&self) -> Result<String, ReError> {
        let members = self.coordinator.list_members().await?;
        if members.is_empty() {
            return Ok("no members".to_string());
        }
        let mut lines = Vec::with_capacity(members.len());
        for member in members {
            lines.push(format!(
                "{} leader={} last_heartbeat={}",
                member.session_id, member.is_leader, member.last_heartbeat_unix
            ));
        }
        Ok(lines.join("\n"))
    }
}
