use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::config::WebSocketServiceConfig;
use common::err::ReError;
use common::model::change_record::ChangeRecord;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::group::Group;
use crate::subscriber::{Subscriber, SubscriberGroups};
use crate::wire::{Command, Frame};
use dispatcher::Backend;

const REGISTRATION_DEADLINE: Duration = Duration::from_secs(3);
const WRITE_DEADLINE: Duration = Duration::from_secs(1);
const WRITER_IDLE_POLL: Duration = Duration::from_millis(500);

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Same grouping/weighting semantics as `tcp::TcpBackend`, carried over
/// WebSocket binary frames instead of raw length-prefixed TCP.
/// `agent_start` bridges raw TCP bytes to the leader before the
/// WebSocket handshake is even parsed, so the upgrade itself happens
/// end-to-end between the real client and the leader.
pub struct WebSocketBackend {
    listen_addr: String,
    groups: Arc<SubscriberGroups>,
    cancelled: Arc<AtomicBool>,
    agent_target: Arc<std::sync::Mutex<Option<(String, u16)>>>,
    accept_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl WebSocketBackend {
    pub fn new(config: &WebSocketServiceConfig) -> Result<Self, ReError> {
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
impl Backend for WebSocketBackend {
    async fn start(&self) -> Result<(), ReError> {
        if self.listen_addr.is_empty() {
            return Ok(());
        }
        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|e| ReError::ConnectionError(format!("bind WebSocket listener {}: {e}", self.listen_addr)))?;
        info!(addr = %self.listen_addr, "WebSocket subscriber listener bound");

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

    async fn agent_start(&self, peer_ip: String, peer_port: u16) {
        *self.agent_target.lock().unwrap() = Some((peer_ip, peer_port));
    }

    async fn agent_stop(&self) {
        *self.agent_target.lock().unwrap() = None;
    }

    fn name(&self) -> &str {
        "websocket"
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
                warn!(error = %e, "WebSocket accept failed");
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
                warn!(error = %e, leader = %leader_addr, "WebSocket agent proxy connection ended");
            }
        }
        Err(e) => warn!(error = %e, leader = %leader_addr, "WebSocket agent failed to reach leader"),
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, groups: Arc<SubscriberGroups>, cancelled: Arc<AtomicBool>) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, peer = %addr, "WebSocket handshake failed");
            return;
        }
    };
    let (mut sink, mut stream) = ws_stream.split();

    let frame = match tokio::time::timeout(REGISTRATION_DEADLINE, next_frame(&mut stream)).await {
        Ok(Ok(Some(frame))) if frame.command == Command::SetPro => frame,
        _ => return,
    };
    let (weight, group_name) = match frame.parse_set_pro() {
        Ok(v) => v,
        Err(_) => {
            let _ = sink.send(Message::Binary(Frame::error("malformed SET_PRO body").encode_body())).await;
            return;
        }
    };
    if weight > 100 {
        let _ = sink.send(Message::Binary(Frame::error("weight must be 0..=100").encode_body())).await;
        return;
    }

    let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::SeqCst);
    let subscriber = Subscriber::new(id, weight);
    if groups.join(&group_name, subscriber.clone()).is_err() {
        let _ = sink.send(Message::Binary(Frame::error(&format!("unknown group '{group_name}'")).encode_body())).await;
        return;
    }
    if sink.send(Message::Binary(Frame::ok().encode_body())).await.is_err() {
        groups.leave(&group_name, id);
        return;
    }
    info!(peer = %addr, group = %group_name, weight, "WebSocket subscriber registered");

    let (control_tx, control_rx) = mpsc::channel(16);
    let writer = tokio::spawn(writer_loop(subscriber.clone(), sink, control_rx, cancelled.clone()));
    reader_loop(stream, control_tx).await;

    groups.leave(&group_name, id);
    writer.abort();
    info!(peer = %addr, group = %group_name, "WebSocket subscriber disconnected");
}

type WsSink = futures_util::stream::SplitSink<tokio_tungstenite::WebSocketStream<TcpStream>, Message>;
type WsStream = futures_util::stream::SplitStream<tokio_tungstenite::WebSocketStream<TcpStream>>;

async fn next_frame(stream: &mut WsStream) -> Result<Option<Frame>, ReError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Binary(bytes))) => return Ok(Some(Frame::decode_payload(&bytes)?)),
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue, // ignore text/ping/pong, protocol is binary-only
            Some(Err(e)) => return Err(ReError::ConnectionError(e.to_string())),
        }
    }
}

async fn reader_loop(mut stream: WsStream, control_tx: mpsc::Sender<Frame>) {
    loop {
        match next_frame(&mut stream).await {
            Ok(Some(frame)) if frame.command == Command::Tick => {
                if control_tx.send(Frame::ok()).await.is_err() {
                    return;
                }
            }
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => return,
        }
    }
}

async fn writer_loop(subscriber: Arc<Subscriber>, mut sink: WsSink, mut control_rx: mpsc::Receiver<Frame>, cancelled: Arc<AtomicBool>) {
    loop {
        if cancelled.load(Ordering::SeqCst) {
            return;
        }
        if let Some(payload) = subscriber.dequeue() {
            let frame = Frame::event(&payload);
            let send = sink.send(Message::Binary(frame.encode_body()));
            if tokio::time::timeout(WRITE_DEADLINE, send).await.is_err() {
                return;
            }
            continue;
        }
        tokio::select! {
            _ = subscriber.notified() => {}
            maybe_ctrl = control_rx.recv() => {
                match maybe_ctrl {
                    Some(frame) => {
                        let send = sink.send(Message::Binary(frame.encode_body()));
                        if tokio::time::timeout(WRITE_DEADLINE, send).await.is_err() {
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
