use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use common::err::ReError;
use tokio::sync::mpsc;

use crate::election::SessionId;
use crate::kv::KvStore;

/// In-memory `KvStore` used to exercise the election/liveness/watch logic
/// in `election.rs` without a live etcd cluster.
///
/// Session expiry is explicit here (call `expire_session`) rather than
/// timer-driven, so tests control exactly when a lease lapses.
#[derive(Default)]
struct Inner {
    next_session: SessionId,
    live_sessions: HashSet<SessionId>,
    session_keys: HashMap<SessionId, HashSet<String>>,
    kv: HashMap<String, (Vec<u8>, Option<SessionId>)>,
    watch_txs: HashMap<String, Vec<mpsc::Sender<Vec<u8>>>>,
}

pub struct MockKv {
    inner: Mutex<Inner>,
    fail_next: AtomicUsize,
    session_seq: AtomicI64,
}

impl MockKv {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            fail_next: AtomicUsize::new(0),
            session_seq: AtomicI64::new(1),
        }
    }

    /// Makes the next `count` KvStore calls on this instance return a
    /// transient `ReError`, simulating KV flakiness.
    pub fn inject_failures(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Simulates a session TTL lapse: deletes every key bound to it,
    /// mirroring etcd lease expiry.
    pub fn expire_session(&self, session: SessionId) {
        let mut inner = self.inner.lock().unwrap();
        inner.live_sessions.remove(&session);
        if let Some(keys) = inner.session_keys.remove(&session) {
            for key in keys {
                inner.kv.remove(&key);
            }
        }
    }

    fn maybe_fail(&self) -> Result<(), ReError> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err(ReError::ConnectionError("injected KV failure".into()));
        }
        Ok(())
    }
}

impl Default for MockKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl KvStore for MockKv {
    async fn create_session(&self, _ttl_secs: i64) -> Result<SessionId, ReError> {
        self.maybe_fail()?;
        let session = self.session_seq.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        inner.live_sessions.insert(session);
        inner.session_keys.entry(session).or_default();
        Ok(session)
    }

    async fn renew_session(&self, session: SessionId) -> Result<(), ReError> {
        self.maybe_fail()?;
        let inner = self.inner.lock().unwrap();
        if inner.live_sessions.contains(&session) {
            Ok(())
        } else {
            Err(ReError::CoordinatorError("session expired".into()))
        }
    }

    async fn revoke_session(&self, session: SessionId) -> Result<(), ReError> {
        self.maybe_fail()?;
        self.expire_session(session);
        Ok(())
    }

    async fn try_acquire_lock(&self, key: &str, session: SessionId) -> Result<bool, ReError> {
        self.maybe_fail()?;
        let mut inner = self.inner.lock().unwrap();
        if !inner.live_sessions.contains(&session) {
            return Err(ReError::CoordinatorError("session expired".into()));
        }
        let held_by_live_other = match inner.kv.get(key) {
            Some((_, Some(owner))) if *owner != session => inner.live_sessions.contains(owner),
            _ => false,
        };
        if held_by_live_other {
            return Ok(false);
        }
        inner.kv.insert(key.to_string(), (vec![1], Some(session)));
        inner.session_keys.entry(session).or_default().insert(key.to_string());
        Ok(true)
    }

    async fn release_lock(&self, key: &str) -> Result<(), ReError> {
        self.maybe_fail()?;
        let mut inner = self.inner.lock().unwrap();
        if let Some((_, Some(owner))) = inner.kv.remove(key) {
            if let Some(keys) = inner.session_keys.get_mut(&owner) {
                keys.remove(key);
            }
        }
        Ok(())
    }

    async fn put(&self, key: &str, value: Vec<u8>, session: Option<SessionId>) -> Result<(), ReError> {
        self.maybe_fail()?;
        let mut inner = self.inner.lock().unwrap();
        inner.kv.insert(key.to_string(), (value.clone(), session));
        if let Some(session) = session {
            inner.session_keys.entry(session).or_default().insert(key.to_string());
        }
        if let Some(senders) = inner.watch_txs.get(key) {
            for tx in senders {
                let _ = tx.try_send(value.clone());
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ReError> {
        self.maybe_fail()?;
        Ok(self.inner.lock().unwrap().kv.get(key).map(|(v, _)| v.clone()))
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, ReError> {
        self.maybe_fail()?;
        Ok(self
            .inner
            .lock()
            .unwrap()
            .kv
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, (v, _))| (k.clone(), v.clone()))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), ReError> {
        self.maybe_fail()?;
        let mut inner = self.inner.lock().unwrap();
        if let Some((_, Some(owner))) = inner.kv.remove(key) {
            if let Some(keys) = inner.session_keys.get_mut(&owner) {
                keys.remove(key);
            }
        }
        Ok(())
    }

    async fn watch(&self, key: &str) -> Result<mpsc::Receiver<Vec<u8>>, ReError> {
        self.maybe_fail()?;
        let (tx, rx) = mpsc::channel(16);
        self.inner.lock().unwrap().watch_txs.entry(key.to_string()).or_default().push(tx);
        Ok(rx)
    }
}
