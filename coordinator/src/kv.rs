use common::err::ReError;

use crate::election::SessionId;

/// Everything the Cluster Coordinator needs from the external KV store:
/// sessions with a TTL, session-guarded single-key locks, plain key/value
/// reads and writes, and a change watch. `etcd_kv::EtcdKv` implements this
/// against real etcd; `mock_kv::MockKv` implements it in-memory so the
/// election/liveness/watch logic in `election.rs` can be exercised by the
/// a fault-injection harness without a live etcd cluster.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Creates a session with the given TTL (seconds). Expiry deletes every
    /// key written under this session.
    async fn create_session(&self, ttl_secs: i64) -> Result<SessionId, ReError>;

    /// Keeps a session alive. Called once per second by the owning member;
    /// a session that isn't renewed in time lapses on its own.
    async fn renew_session(&self, session: SessionId) -> Result<(), ReError>;

    /// Explicitly ends a session, deleting every key bound to it.
    async fn revoke_session(&self, session: SessionId) -> Result<(), ReError>;

    /// Session-guarded compare-and-swap PUT on `key`: succeeds (returns
    /// `true`) only if nobody else currently holds it bound to a live
    /// session. This is the primitive `TryAcquireLeadership` is built on.
    async fn try_acquire_lock(&self, key: &str, session: SessionId) -> Result<bool, ReError>;

    /// Releases a lock this process holds. No-op if not held.
    async fn release_lock(&self, key: &str) -> Result<(), ReError>;

    /// Writes `value` at `key`. If `session` is given the key is bound to
    /// that session's lease and disappears with it.
    async fn put(&self, key: &str, value: Vec<u8>, session: Option<SessionId>) -> Result<(), ReError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ReError>;

    /// Lists every key under `prefix`, used by the liveness scan to read
    /// every member's heartbeat in one round-trip.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, ReError>;

    async fn delete(&self, key: &str) -> Result<(), ReError>;

    /// Subscribes to changes at `key`. The returned receiver yields the new
    /// value each time it changes; it closes if the watch itself fails,
    /// which the caller treats as a transient error and retries.
    async fn watch(&self, key: &str) -> Result<tokio::sync::mpsc::Receiver<Vec<u8>>, ReError>;
}
