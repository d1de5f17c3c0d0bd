use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::err::ReError;
use tracing::{info, warn};

use crate::kv::KvStore;
use crate::member::ClusterMember;

pub type SessionId = i64;

const LOCK_KEY: &str = "lock/leader";
const HEARTBEAT_PREFIX: &str = "heartbeat/";
const POSITION_KEY: &str = "pos";

const SESSION_TTL_SECS: i64 = 60;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const LIVENESS_SCAN_INTERVAL: Duration = Duration::from_secs(3);
const STALE_THRESHOLD_SECS: u64 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// The two callbacks the Coordinator invokes on the owning process.
/// `on_became_leader` fires once, right after a successful
/// acquisition — whether from the initial `try_acquire_leadership` call or
/// from the liveness scan re-electing after the old leader's heartbeat goes
/// stale. `on_position_changed` fires on every observed change to `pos`,
/// followers only.
pub struct CoordinatorCallbacks {
    pub on_became_leader: Box<dyn Fn() + Send + Sync>,
    pub on_position_changed: Box<dyn Fn(Vec<u8>) + Send + Sync>,
}

/// Wraps the external KV store: leader lock, liveness heartbeats, peer
/// discovery, and a watched position key.
///
/// The three periodic loops (heartbeat write, liveness scan, position
/// watch) are independent tasks, spawned separately in `start` rather
/// than folded into one ticking loop, since their periods and failure
/// modes differ.
pub struct Coordinator {
    kv: Arc<dyn KvStore>,
    member_key: String,
    service_ip: String,
    service_port: u16,
    session: Mutex<Option<SessionId>>,
    /// Guarded by a mutex, not an atomic: heartbeats read it while the
    /// election/liveness loop writes it.
    is_leader: Mutex<bool>,
    cancelled: Arc<AtomicBool>,
    callbacks: CoordinatorCallbacks,
}

impl Coordinator {
    pub fn new(
        kv: Arc<dyn KvStore>,
        member_key: impl Into<String>,
        service_ip: impl Into<String>,
        service_port: u16,
        callbacks: CoordinatorCallbacks,
    ) -> Arc<Self> {
        Arc::new(Self {
            kv,
            member_key: member_key.into(),
            service_ip: service_ip.into(),
            service_port,
            session: Mutex::new(None),
            is_leader: Mutex::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
            callbacks,
        })
    }

    pub fn is_leader(&self) -> bool {
        *self.is_leader.lock().unwrap()
    }

    fn heartbeat_key(&self) -> String {
        format!("{HEARTBEAT_PREFIX}{}", self.member_key)
    }

    /// Creates this member's session and spawns the three coordinator
    /// tasks. Returns once the session is established; the tasks keep
    /// running until `shutdown`.
    pub async fn start(self: &Arc<Self>) -> Result<(), ReError> {
        let session = self.kv.create_session(SESSION_TTL_SECS).await?;
        *self.session.lock().unwrap() = Some(session);
        self.try_acquire_leadership().await?;

        let heartbeat = self.clone();
        tokio::spawn(async move { heartbeat.run_heartbeat_loop().await });

        let scanner = self.clone();
        tokio::spawn(async move { scanner.run_liveness_scan_loop().await });

        let watcher = self.clone();
        tokio::spawn(async move { watcher.run_position_watch_loop().await });

        Ok(())
    }

    /// Session-guarded PUT on `lock/`; success means this member is now the
    /// leader. Invoked at startup and again by the liveness scanner after
    /// deleting a stale leader heartbeat.
    pub async fn try_acquire_leadership(&self) -> Result<bool, ReError> {
        let session = self.current_session()?;
        let acquired = self.kv.try_acquire_lock(LOCK_KEY, session).await?;
        if acquired {
            *self.is_leader.lock().unwrap() = true;
            info!(member = %self.member_key, "acquired leadership");
            (self.callbacks.on_became_leader)();
        }
        Ok(acquired)
    }

    pub async fn release_leadership(&self) -> Result<(), ReError> {
        let was_leader = {
            let mut guard = self.is_leader.lock().unwrap();
            let was = *guard;
            *guard = false;
            was
        };
        if was_leader {
            self.kv.release_lock(LOCK_KEY).await?;
            info!(member = %self.member_key, "released leadership");
        }
        Ok(())
    }

    /// Writes the leader's position into the shared `pos` key so followers
    /// can warm their local copy. Only meaningful when
    /// called by the leader; the KV layer doesn't enforce that, the
    /// calling Position Store does.
    pub async fn write_position(&self, bytes: Vec<u8>) -> Result<(), ReError> {
        self.kv.put(POSITION_KEY, bytes, None).await
    }

    pub async fn read_position(&self) -> Result<Vec<u8>, ReError> {
        Ok(self.kv.get(POSITION_KEY).await?.unwrap_or_default())
    }

    /// Snapshot of every member currently heartbeating, for the control
    /// channel's `SHOW_MEMBERS`. Stale entries
    /// are whatever the last liveness scan hasn't deleted yet, so this can
    /// briefly include a member that is seconds away from being reaped.
    pub async fn list_members(&self) -> Result<Vec<ClusterMember>, ReError> {
        let entries = self.kv.list_prefix(HEARTBEAT_PREFIX).await?;
        let mut members = Vec::with_capacity(entries.len());
        for (key, payload) in entries {
            let (seconds, is_leader) = match ClusterMember::decode_heartbeat(&payload) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let session_id = key.strip_prefix(HEARTBEAT_PREFIX).unwrap_or(&key).to_string();
            let mut member = ClusterMember::new(session_id, "", 0);
            member.last_heartbeat_unix = seconds;
            member.is_leader = is_leader;
            members.push(member);
        }
        Ok(members)
    }

    /// Gracefully leaves the cluster: releases leadership if held and
    /// revokes the session, which deletes this member's heartbeat key
    /// along with it.
    pub async fn shutdown(&self) -> Result<(), ReError> {
        self.cancelled.store(true, Ordering::SeqCst);
        self.release_leadership().await?;
        if let Some(session) = *self.session.lock().unwrap() {
            self.kv.revoke_session(session).await?;
        }
        Ok(())
    }

    fn current_session(&self) -> Result<SessionId, ReError> {
        self.session
            .lock()
            .unwrap()
            .ok_or_else(|| ReError::CoordinatorError("coordinator session not established".into()))
    }

    async fn run_heartbeat_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        while !self.cancelled.load(Ordering::SeqCst) {
            interval.tick().await;
            let session = match self.current_session() {
                Ok(s) => s,
                Err(_) => continue,
            };
            if let Err(e) = self.kv.renew_session(session).await {
                warn!(error = %e, "session renewal failed, dropping leadership");
                let _ = self.release_leadership().await;
                tokio::time::sleep(RETRY_BACKOFF).await;
                continue;
            }
            let payload = ClusterMember::encode_heartbeat(unix_now(), self.is_leader());
            if let Err(e) = self.kv.put(&self.heartbeat_key(), payload, Some(session)).await {
                warn!(error = %e, "heartbeat write failed, retrying after backoff");
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
    }

    /// Non-leaders scan all heartbeats every 3s and delete any entry older
    /// than 3s. If the deleted entry belonged to the leader, the scanner
    /// attempts to take over. The leader itself skips this scan.
    async fn run_liveness_scan_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(LIVENESS_SCAN_INTERVAL);
        while !self.cancelled.load(Ordering::SeqCst) {
            interval.tick().await;
            if self.is_leader() {
                continue;
            }
            let entries = match self.kv.list_prefix(HEARTBEAT_PREFIX).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, "liveness scan read failed");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                    continue;
                }
            };
            let now = unix_now();
            for (key, payload) in entries {
                let (seconds, was_leader) = match ClusterMember::decode_heartbeat(&payload) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if now.saturating_sub(seconds) > STALE_THRESHOLD_SECS {
                    if let Err(e) = self.kv.delete(&key).await {
                        warn!(error = %e, key = %key, "failed to delete stale heartbeat");
                        continue;
                    }
                    if was_leader {
                        info!(key = %key, "stale leader heartbeat deleted, attempting takeover");
                        if let Err(e) = self.try_acquire_leadership().await {
                            warn!(error = %e, "leadership takeover attempt failed");
                        }
                    }
                }
            }
        }
    }

    /// Non-leaders watch `pos`; the leader doesn't.
    async fn run_position_watch_loop(self: Arc<Self>) {
        while !self.cancelled.load(Ordering::SeqCst) {
            if self.is_leader() {
                tokio::time::sleep(LIVENESS_SCAN_INTERVAL).await;
                continue;
            }
            let mut receiver = match self.kv.watch(POSITION_KEY).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "position watch setup failed, retrying");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                    continue;
                }
            };
            while let Some(bytes) = receiver.recv().await {
                if self.is_leader() {
                    break;
                }
                (self.callbacks.on_position_changed)(bytes);
            }
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_kv::MockKv;
    use std::sync::atomic::AtomicUsize;

    fn noop_callbacks() -> CoordinatorCallbacks {
        CoordinatorCallbacks {
            on_became_leader: Box::new(|| {}),
            on_position_changed: Box::new(|_| {}),
        }
    }

    /// At any wall-clock instant, at most one member holds the lock key —
    /// verified here by racing every member's acquisition attempt against
    /// the same in-memory KV.
    #[tokio::test]
    async fn single_leader_among_n_members() {
        let kv: Arc<dyn KvStore> = Arc::new(MockKv::new());
        let leader_count = Arc::new(AtomicUsize::new(0));
        let mut coordinators = vec![];
        for i in 0..5 {
            let count = leader_count.clone();
            let callbacks = CoordinatorCallbacks {
                on_became_leader: Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                }),
                on_position_changed: Box::new(|_| {}),
            };
            let coordinator = Coordinator::new(kv.clone(), format!("member-{i}"), "10.0.0.1", 9000, callbacks);
            coordinators.push(coordinator);
        }

        let mut handles = vec![];
        for coordinator in &coordinators {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                let session = coordinator.kv.create_session(60).await.unwrap();
                *coordinator.session.lock().unwrap() = Some(session);
                coordinator.try_acquire_leadership().await.unwrap()
            }));
        }
        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(leader_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_acquire_attempt_fails_while_first_holds_lock() {
        let kv = Arc::new(MockKv::new());
        let session_a = kv.create_session(60).await.unwrap();
        let session_b = kv.create_session(60).await.unwrap();

        assert!(kv.try_acquire_lock(LOCK_KEY, session_a).await.unwrap());
        assert!(!kv.try_acquire_lock(LOCK_KEY, session_b).await.unwrap());
    }

    #[tokio::test]
    async fn takeover_succeeds_after_leader_session_expires() {
        let kv = Arc::new(MockKv::new());
        let session_a = kv.create_session(60).await.unwrap();
        let session_b = kv.create_session(60).await.unwrap();
        assert!(kv.try_acquire_lock(LOCK_KEY, session_a).await.unwrap());

        kv.expire_session(session_a);
        assert!(kv.try_acquire_lock(LOCK_KEY, session_b).await.unwrap());
    }

    #[tokio::test]
    async fn position_watch_delivers_written_bytes() {
        let kv = Arc::new(MockKv::new());
        let mut receiver = kv.watch(POSITION_KEY).await.unwrap();
        kv.put(POSITION_KEY, b"abc".to_vec(), None).await.unwrap();
        let received = receiver.recv().await.unwrap();
        assert_eq!(received, b"abc");
    }

    #[tokio::test]
    async fn list_members_reflects_live_heartbeats() {
        let kv: Arc<dyn KvStore> = Arc::new(MockKv::new());
        let coordinator = Coordinator::new(kv.clone(), "member-0", "10.0.0.1", 9000, noop_callbacks());
        let session = kv.create_session(60).await.unwrap();
        let payload = ClusterMember::encode_heartbeat(unix_now(), true);
        kv.put(&format!("{HEARTBEAT_PREFIX}member-0"), payload, Some(session)).await.unwrap();

        let members = coordinator.list_members().await.unwrap();
        assert_eq!(members.len(), 1);
        assert!(members[0].is_leader);
    }

    #[tokio::test]
    async fn transient_kv_failure_surfaces_as_error() {
        let kv = MockKv::new();
        kv.inject_failures(1);
        assert!(kv.get("anything").await.is_err());
        assert!(kv.get("anything").await.unwrap().is_none());
    }
}
