use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::config::HttpGroupConfig;
use common::err::ReError;
use common::model::change_record::ChangeRecord;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{info, warn};

use crate::group::Group;
use crate::replay_cache::{ReplayCache, REPLAY_CACHE_CAPACITY};
use crate::status::NodeStatus;
use dispatcher::Backend;

const NODE_QUEUE_CAPACITY: usize = 10_000;
const CONSECUTIVE_FAILURES_BEFORE_OFFLINE: u32 = 3;
const HTTP_TIMEOUT: Duration = Duration::from_secs(3);

/// One HTTP POST endpoint. Workers dequeue in FIFO order and
/// POST under `send_gate` so concurrent workers never race two sends for
/// the same node — the only thing that gives the per-node ordering
/// guarantee when more than one worker drains the same queue.
pub struct HttpNode {
    pub url: String,
    tx: mpsc::Sender<Arc<str>>,
    rx: Arc<AsyncMutex<mpsc::Receiver<Arc<str>>>>,
    status: std::sync::Mutex<NodeStatus>,
    failure_count: AtomicU32,
    probe_count: AtomicU32,
    probing: AtomicBool,
    replay: ReplayCache<Arc<str>>,
    send_gate: AsyncMutex<()>,
}

impl HttpNode {
    fn new(url: String) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(NODE_QUEUE_CAPACITY);
        Arc::new(Self {
            url,
            tx,
            rx: Arc::new(AsyncMutex::new(rx)),
            status: std::sync::Mutex::new(NodeStatus::new_online()),
            failure_count: AtomicU32::new(0),
            probe_count: AtomicU32::new(0),
            probing: AtomicBool::new(false),
            replay: ReplayCache::new(REPLAY_CACHE_CAPACITY),
            send_gate: AsyncMutex::new(()),
        })
    }

    fn is_online(&self) -> bool {
        self.status.lock().unwrap().online
    }

    fn mark_offline(&self) {
        let mut status = self.status.lock().unwrap();
        status.online = false;
    }

    fn mark_online(&self) {
        let mut status = self.status.lock().unwrap();
        status.online = true;
        status.cache_ready = false;
        status.cache_full = false;
    }
}

struct HttpGroup {
    group: Group,
    nodes: Vec<Arc<HttpNode>>,
}

/// Groups of HTTP POST endpoints, one sender pool per node.
pub struct HttpBackend {
    client: reqwest::Client,
    groups: Vec<HttpGroup>,
    cancelled: Arc<AtomicBool>,
    worker_count: usize,
    time_tick: Duration,
}

impl HttpBackend {
    pub fn new(configs: &[HttpGroupConfig], worker_count: usize, time_tick: Duration) -> Result<Self, ReError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ReError::ConnectionError(format!("building HTTP client failed: {e}")))?;
        let mut groups = Vec::with_capacity(configs.len());
        for cfg in configs {
            let group = Group::new(cfg.group.name.clone(), cfg.group.mode, &cfg.group.filters)?;
            let nodes = cfg.nodes.iter().map(|n| HttpNode::new(n.url.clone())).collect();
            groups.push(HttpGroup { group, nodes });
        }
        Ok(Self {
            client,
            groups,
            cancelled: Arc::new(AtomicBool::new(false)),
            worker_count: worker_count.max(1),
            time_tick,
        })
    }

    fn spawn_probe(&self, node: Arc<HttpNode>) {
        if node.probing.swap(true, Ordering::SeqCst) {
            return;
        }
        let client = self.client.clone();
        let cancelled = self.cancelled.clone();
        let base = self.time_tick;
        tokio::spawn(async move {
            loop {
                if cancelled.load(Ordering::SeqCst) {
                    node.probing.store(false, Ordering::SeqCst);
                    return;
                }
                let k = node.probe_count.load(Ordering::SeqCst);
                let interval = if k == 0 {
                    base
                } else {
                    Duration::from_secs_f64((k as f64 / 1000.0).clamp(1.0, 60.0))
                };
                tokio::time::sleep(interval).await;

                let probe_result = client.post(&node.url).body(vec![0u8]).send().await;
                match probe_result {
                    Ok(resp) if resp.status().is_success() => {
                        node.failure_count.store(0, Ordering::SeqCst);
                        node.probe_count.store(0, Ordering::SeqCst);
                        node.mark_online();
                        node.probing.store(false, Ordering::SeqCst);
                        info!(url = %node.url, "node recovered, replaying cache");
                        drain_replay_cache(&node).await;
                        return;
                    }
                    _ => {
                        node.probe_count.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });
    }
}

async fn drain_replay_cache(node: &Arc<HttpNode>) {
    for payload in node.replay.drain_in_order() {
        if node.tx.send(payload).await.is_err() {
            return;
        }
    }
}

async fn send_one(client: &reqwest::Client, node: &Arc<HttpNode>, payload: Arc<str>) {
    if !node.is_online() {
        node.replay.push(payload);
        return;
    }
    let _gate = node.send_gate.lock().await;
    let result = client.post(&node.url).body(payload.to_string()).send().await;
    match result {
        Ok(resp) if resp.status().is_success() => {
            node.failure_count.store(0, Ordering::SeqCst);
        }
        _ => {
            let failures = node.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(url = %node.url, failures, "HTTP delivery failed");
            if failures >= CONSECUTIVE_FAILURES_BEFORE_OFFLINE {
                node.mark_offline();
            }
        }
    }
}

#[async_trait::async_trait]
impl Backend for HttpBackend {
    async fn start(&self) -> Result<(), ReError> {
        for group in &self.groups {
            for node in &group.nodes {
                for _ in 0..self.worker_count {
                    let node = node.clone();
                    let client = self.client.clone();
                    let rx = node.rx.clone();
                    let cancelled = self.cancelled.clone();
                    tokio::spawn(async move {
                        loop {
                            if cancelled.load(Ordering::SeqCst) {
                                return;
                            }
                            let payload = {
                                let mut guard = rx.lock().await;
                                guard.recv().await
                            };
                            match payload {
                                Some(payload) => send_one(&client, &node, payload).await,
                                None => return,
                            }
                        }
                    });
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), ReError> {
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn reload(&self) -> Result<(), ReError> {
        Ok(())
    }

    async fn send_all(&self, record: Arc<ChangeRecord>, serialized: Arc<str>) {
        for group in &self.groups {
            if !group.group.matches(&record.table) {
                continue;
            }
            for node in &group.nodes {
                if node.is_online() {
                    if node.tx.send(serialized.clone()).await.is_err() {
                        continue;
                    }
                } else {
                    node.replay.push(serialized.clone());
                }
            }
        }
    }

    async fn agent_start(&self, _peer_ip: String, _peer_port: u16) {}

    async fn agent_stop(&self) {}

    fn name(&self) -> &str {
        "http"
    }
}
