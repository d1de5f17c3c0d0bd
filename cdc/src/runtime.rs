use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use common::err::ReError;
use common::model::position::{Position, PositionUpdate};
use common::server::Server;
use connection::{Consumer, ConnectionOptions};
use coordinator::Coordinator;
use dispatcher::{Backend, Dispatcher};
use position::PositionStore;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Position is saved every N events, every T seconds, always on ROTATE,
/// and always on shutdown. This bounds worst-case replay
/// after a crash to `min(N events, T seconds)`.
const SAVE_EVERY_N_EVENTS: u64 = 1000;
const SAVE_EVERY: Duration = Duration::from_secs(3);

const RECORD_CHANNEL_CAPACITY: usize = 1024;
const POSITION_CHANNEL_CAPACITY: usize = 1024;

/// Adapts a delivery back-end onto the generic `Server` lifecycle so the
/// process can bring every back-end up and down the same way it brings
/// the coordinator up and down.
pub struct BackendServer(pub Arc<dyn Backend>);

#[async_trait]
impl Server for BackendServer {
    async fn start(&self) {
        if let Err(e) = self.0.start().await {
            warn!(backend = self.0.name(), error = %e, "backend failed to start");
        }
    }

    async fn shutdown(&self, _graceful: bool) -> Result<(), ReError> {
        self.0.close().await
    }

    fn name(&self) -> &str {
        self.0.name()
    }
}

pub struct CoordinatorServer(pub Arc<Coordinator>);

#[async_trait]
impl Server for CoordinatorServer {
    async fn start(&self) {
        if let Err(e) = self.0.start().await {
            warn!(error = %e, "coordinator failed to start");
        }
    }

    async fn shutdown(&self, _graceful: bool) -> Result<(), ReError> {
        self.0.shutdown().await
    }

    fn name(&self) -> &str {
        "coordinator"
    }
}

/// Everything the running process needs to react to the Coordinator's two
/// callbacks and to service the control channel. Built once at
/// startup; the callbacks and the control handler each hold a clone.
pub struct AppState {
    pub options: ConnectionOptions,
    pub position_store: Arc<PositionStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub backends: Vec<Arc<dyn Backend>>,
    coordinator: OnceLock<Arc<Coordinator>>,
    consumer_running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        options: ConnectionOptions,
        position_store: Arc<PositionStore>,
        dispatcher: Arc<Dispatcher>,
        backends: Vec<Arc<dyn Backend>>,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::new(Self {
            options,
            position_store,
            dispatcher,
            backends,
            coordinator: OnceLock::new(),
            consumer_running: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// The `Coordinator` is constructed after `AppState` (its callbacks
    /// close over this state), so it's wired in as a second step rather
    /// than threaded through `new`.
    pub fn set_coordinator(&self, coordinator: Arc<Coordinator>) {
        let _ = self.coordinator.set(coordinator);
    }

    fn coordinator(&self) -> Arc<Coordinator> {
        self.coordinator.get().expect("coordinator set before first use").clone()
    }

    pub fn request_stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn stop_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    pub async fn wait_for_stop(&self) {
        let mut rx = self.shutdown_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// `OnBecameLeader`. Idempotent: under the single-leader
    /// invariant this should never double-fire while a consumer is already
    /// running, but a re-election race can land here again before
    /// `run_consumer` flips the flag back.
    pub fn spawn_leader_duties(self: &Arc<Self>) {
        if self.consumer_running.swap(true, Ordering::SeqCst) {
            return;
        }
        for backend in &self.backends {
            let backend = backend.clone();
            tokio::spawn(async move { backend.agent_stop().await });
        }
        let state = self.clone();
        tokio::spawn(async move { state.run_consumer().await });
    }

    /// `OnPositionChanged`: followers keep a warm local copy of
    /// the leader's position so a promotion doesn't have to wait on a KV
    /// round-trip.
    pub fn apply_remote_position(self: &Arc<Self>, bytes: Vec<u8>) {
        let state = self.clone();
        tokio::spawn(async move {
            if let Err(e) = state.position_store.apply_remote(&bytes).await {
                warn!(error = %e, "failed to apply replicated position");
            }
        });
    }

    /// Resolution order: local file, then the Coordinator's
    /// replicated copy, then MySQL's current master status.
    async fn starting_position(&self) -> Result<Position, ReError> {
        if let Some(position) = self.position_store.load().await? {
            return Ok(position);
        }
        let remote = self.coordinator().read_position().await?;
        if !remote.is_empty() {
            return Position::decode(&remote);
        }
        info!("no local or replicated position on hand, reading MySQL's current master status");
        let mut connection = connection::replica::ReplicaConnection::connect(&self.options).await?;
        let (file, offset) = connection.show_master_status().await?;
        Ok(Position::new(file, offset, 0))
    }

    async fn run_consumer(self: Arc<Self>) {
        let coordinator = self.coordinator();
        let position = match self.starting_position().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to determine a starting position, stepping down");
                let _ = coordinator.release_leadership().await;
                self.consumer_running.store(false, Ordering::SeqCst);
                return;
            }
        };

        let cancelled = Arc::new(AtomicBool::new(false));
        let (record_tx, mut record_rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
        let (position_tx, position_rx) = mpsc::channel(POSITION_CHANNEL_CAPACITY);

        let dispatcher = self.dispatcher.clone();
        let dispatch_task = tokio::spawn(async move {
            while let Some(record) = record_rx.recv().await {
                if let Err(e) = dispatcher.dispatch(record).await {
                    warn!(error = %e, "dispatch failed");
                }
            }
        });

        let save_task = tokio::spawn(run_save_cadence(self.position_store.clone(), coordinator.clone(), position_rx));

        // Leadership can be lost between heartbeat renewals; this consumer has no
        // other way to learn that short of polling `is_leader`, so it does.
        let watch_cancelled = cancelled.clone();
        let watch_coordinator = coordinator.clone();
        let mut stop_rx = self.shutdown_rx.clone();
        let watch_task = tokio::spawn(async move {
            loop {
                if !watch_coordinator.is_leader() || *stop_rx.borrow() {
                    watch_cancelled.store(true, Ordering::SeqCst);
                    return;
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    _ = stop_rx.changed() => {}
                }
            }
        });

        info!(file = %position.file, offset = position.offset, "consumer taking over as leader");
        let mut consumer = Consumer::new(self.options.clone());
        let run_result = consumer.run(position, record_tx, position_tx, cancelled.clone()).await;
        cancelled.store(true, Ordering::SeqCst);

        let _ = watch_task.await;
        let _ = dispatch_task.await;
        let _ = save_task.await;

        if let Err(e) = run_result {
            warn!(error = %e, "binlog consumer stopped with a fatal error, releasing leadership");
            let _ = coordinator.release_leadership().await;
        }
        self.consumer_running.store(false, Ordering::SeqCst);
    }
}

async fn run_save_cadence(
    position_store: Arc<PositionStore>,
    coordinator: Arc<Coordinator>,
    mut updates: mpsc::Receiver<PositionUpdate>,
) {
    let mut pending: Option<Position> = None;
    let mut since_save: u64 = 0;
    let mut ticker = tokio::time::interval(SAVE_EVERY);
    ticker.tick().await;

    loop {
        tokio::select! {
            update = updates.recv() => {
                match update {
                    Some(PositionUpdate::Rotated(position)) => {
                        persist(&position_store, &coordinator, &position).await;
                        pending = None;
                        since_save = 0;
                    }
                    Some(PositionUpdate::Progress(position)) => {
                        since_save += 1;
                        if since_save >= SAVE_EVERY_N_EVENTS {
                            persist(&position_store, &coordinator, &position).await;
                            pending = None;
                            since_save = 0;
                        } else {
                            pending = Some(position);
                        }
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                if let Some(position) = pending.take() {
                    persist(&position_store, &coordinator, &position).await;
                    since_save = 0;
                }
            }
        }
    }

    if let Some(position) = pending {
        persist(&position_store, &coordinator, &position).await;
    }
}

async fn persist(position_store: &Arc<PositionStore>, coordinator: &Arc<Coordinator>, position: &Position) {
    if let Err(e) = position_store.save(position).await {
        warn!(error = %e, "position save failed");
        return;
    }
    if let Err(e) = coordinator.write_position(position.encode()).await {
        warn!(error = %e, "mirroring position to coordinator KV failed");
    }
}
