use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::config::TcpServiceConfig;
use common::err::ReError;
use common::model::change_record::ChangeRecord;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::group::Group;
use crate::subscriber::{Subscriber, SubscriberGroups};
use crate::wire::{Command, Frame};
use dispatcher::Backend;

const REGISTRATION_DEADLINE: Duration = Duration::from_secs(3);
const WRITE_DEADLINE: Duration = Duration::from_secs(1);
const WRITER_IDLE_POLL: Duration = Duration::from_millis(500);

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Accepts subscriber connections on a listen address, groups them, and
/// broadcasts or weight-routes records to them.
///
/// When this engine is not the leader, `agent_start` turns the listener
/// into a transparent L4 proxy to the leader's own listener instead of
/// terminating the subscriber protocol locally — new client connections are
/// bridged byte-for-byte to the leader, so SET_PRO/TICK/EVENT all still
/// flow between the real subscriber and the leader that actually owns the
/// groups and weights.
pub struct TcpBackend {
    listen_addr: String,
    groups: Arc<SubscriberGroups>,
    cancelled: Arc<AtomicBool>,
    agent_target: Arc<std::sync::Mutex<Option<(String, u16)>>>,
    accept_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl TcpBackend {
    pub fn new(config: &TcpServiceConfig) -> Result<Self, ReError> {
        let groups = Arc::new(SubscriberGroups::new());
        for g in &config.groups {
            groups.register_group(Group::new(g.name.clone(), g.mode, &g.filters)?);
        }
        Ok(Self {
            listen_addr: config.listen_addr.clone(),
            groups,
            cancelled: Arc::new(AtomicBool::new(false)),
            agent_target: Arc::new(std::sync::Mutex::new(None)),
            accept_task: AsyncMutex::new(None),
        })
    }
}

#[async_trait::async_trait]
impl Backend for TcpBackend {
    async fn start(&self) -> Result<(), ReError> {
        if self.listen_addr.is_empty() {
            return Ok(());
        }
        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|e| ReError::ConnectionError(format!("bind TCP listener {}: {e}", self.listen_addr)))?;
        info!(addr = %self.listen_addr, "TCP subscriber listener bound");

        let groups = self.groups.clone();
        let cancelled = self.cancelled.clone();
        let agent_target = self.agent_target.clone();
        let handle = tokio::spawn(async move { accept_loop(listener, groups, cancelled, agent_target).await });
        *self.accept_task.lock().await = Some(handle);
        Ok(())
    }

    async fn close(&self) -> Result<(), ReError> {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_task.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }

    async fn reload(&self) -> Result<(), ReError> {
        Ok(())
    }

    async fn send_all(&self, record: Arc<ChangeRecord>, serialized: Arc<str>) {
        self.groups.dispatch(&record.table, serialized);
    }

    /// Points the listener's accept loop at the leader's own address so
    /// newly-connecting subscribers get bridged there instead.
    async fn agent_start(&self, peer_ip: String, peer_port: u16) {
        *self.agent_target.lock().unwrap() = Some((peer_ip, peer_port));
    }

    async fn agent_stop(&self) {
        *self.agent_target.lock().unwrap() = None;
    }

    fn name(&self) -> &str {
        "tcp"
    }
}

async fn accept_loop(
    listener: TcpListener,
    groups: Arc<SubscriberGroups>,
    cancelled: Arc<AtomicBool>,
    agent_target: Arc<std::sync::Mutex<Option<(String, u16)>>>,
) {
    loop {
        if cancelled.load(Ordering::SeqCst) {
            return;
        }
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "TCP accept failed");
                continue;
            }
        };
        stream.set_nodelay(true).ok();

        let target = agent_target.lock().unwrap().clone();
        match target {
            Some((peer_ip, peer_port)) => {
                tokio::spawn(async move { proxy_to_leader(stream, peer_ip, peer_port).await });
            }
            None => {
                let groups = groups.clone();
                let cancelled = cancelled.clone();
                tokio::spawn(async move { handle_connection(stream, addr, groups, cancelled).await });
            }
        }
    }
}

async fn proxy_to_leader(mut client: TcpStream, peer_ip: String, peer_port: u16) {
    let leader_addr = format!("{peer_ip}:{peer_port}");
    match TcpStream::connect(&leader_addr).await {
        Ok(mut leader) => {
            if let Err(e) = tokio::io::copy_bidirectional(&mut client, &mut leader).await {
                warn!(error = %e, leader = %leader_addr, "TCP agent proxy connection ended");
            }
        }
        Err(e) => warn!(error = %e, leader = %leader_addr, "TCP agent failed to reach leader"),
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, groups: Arc<SubscriberGroups>, cancelled: Arc<AtomicBool>) {
    let (mut read_half, mut write_half) = stream.into_split();

    let frame = match tokio::time::timeout(REGISTRATION_DEADLINE, read_frame(&mut read_half)).await {
        Ok(Ok(frame)) if frame.command == Command::SetPro => frame,
        _ => return,
    };
    let (weight, group_name) = match frame.parse_set_pro() {
        Ok(v) => v,
        Err(_) => {
            let _ = write_half.write_all(&Frame::error("malformed SET_PRO body").encode()).await;
            return;
        }
    };
    if weight > 100 {
        let _ = write_half.write_all(&Frame::error("weight must be 0..=100").encode()).await;
        return;
    }

    let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::SeqCst);
    let subscriber = Subscriber::new(id, weight);
    if groups.join(&group_name, subscriber.clone()).is_err() {
        let _ = write_half.write_all(&Frame::error(&format!("unknown group '{group_name}'")).encode()).await;
        return;
    }
    if write_half.write_all(&Frame::ok().encode()).await.is_err() {
        groups.leave(&group_name, id);
        return;
    }
    info!(peer = %addr, group = %group_name, weight, "TCP subscriber registered");

    let (control_tx, control_rx) = mpsc::channel(16);
    let writer = tokio::spawn(writer_loop(subscriber.clone(), write_half, control_rx, cancelled.clone()));
    reader_loop(read_half, control_tx).await;

    groups.leave(&group_name, id);
    writer.abort();
    info!(peer = %addr, group = %group_name, "TCP subscriber disconnected");
}

/// Reads TICK heartbeats and acks them; any read error or EOF ends the
/// connection. Subscribers are never expired purely for idleness once
/// registered, so there is no read deadline here.
async fn reader_loop(mut read_half: OwnedReadHalf, control_tx: mpsc::Sender<Frame>) {
    loop {
        match read_frame(&mut read_half).await {
            Ok(frame) if frame.command == Command::Tick => {
                if control_tx.send(Frame::ok()).await.is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(_) => return,
        }
    }
}

/// Drains the subscriber's send queue (woken by `Subscriber::notified`) and
/// relays TICK acks from the reader, under a single writer so the two
/// never race on the socket.
async fn writer_loop(subscriber: Arc<Subscriber>, mut write_half: OwnedWriteHalf, mut control_rx: mpsc::Receiver<Frame>, cancelled: Arc<AtomicBool>) {
    loop {
        if cancelled.load(Ordering::SeqCst) {
            return;
        }
        if let Some(payload) = subscriber.dequeue() {
            let frame = Frame::event(&payload);
            if tokio::time::timeout(WRITE_DEADLINE, write_half.write_all(&frame.encode())).await.is_err() {
                return;
            }
            continue;
        }
        tokio::select! {
            _ = subscriber.notified() => {}
            maybe_ctrl = control_rx.recv() => {
                match maybe_ctrl {
                    Some(frame) => {
                        if tokio::time::timeout(WRITE_DEADLINE, write_half.write_all(&frame.encode())).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }
            _ = tokio::time::sleep(WRITER_IDLE_POLL) => {}
        }
    }
}

async fn read_frame(read_half: &mut OwnedReadHalf) -> Result<Frame, ReError> {
    let mut len_buf = [0u8; 4];
    read_half.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    read_half.read_exact(&mut payload).await?;
    Frame::decode_payload(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::{GroupConfig, GroupMode};

    #[test]
    fn rejects_out_of_range_weight() {
        // parse_set_pro itself doesn't bound-check; the connection handler
        // does. This documents the bound the handler enforces.
        let (weight, _group) = Frame::set_pro(101, "g").parse_set_pro().unwrap();
        assert!(weight > 100);
    }

    #[test]
    fn new_with_no_groups_still_constructs() {
        let config = TcpServiceConfig {
            enable: false,
            listen_addr: String::new(),
            groups: vec![GroupConfig {
                name: "g".into(),
                mode: GroupMode::Broadcast,
                filters: vec![],
            }],
        };
        assert!(TcpBackend::new(&config).is_ok());
    }
}
