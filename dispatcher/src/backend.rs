use std::sync::Arc;

use common::err::ReError;
use common::model::change_record::ChangeRecord;

/// Shared capability set every delivery back-end family (HTTP, TCP,
/// WebSocket, Kafka) implements. The Dispatcher only ever holds these as
/// `Arc<dyn Backend>` handles — it never owns the nodes or queues behind
/// them.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Brings the back-end up: binds listeners, starts sender/prober tasks.
    async fn start(&self) -> Result<(), ReError>;

    /// Idempotent shutdown: drains in-flight queues (bounded wait) before
    /// returning.
    async fn close(&self) -> Result<(), ReError>;

    /// Applies a configuration change without a restart. On failure the
    /// previous configuration keeps running.
    async fn reload(&self) -> Result<(), ReError>;

    /// Delivers one record to every selected, enabled node (or buffers it
    /// to that node's replay cache). `serialized` is the dispatcher's
    /// single JSON encoding of `record`, shared across every back-end for
    /// this call so no back-end re-serializes it.
    async fn send_all(&self, record: Arc<ChangeRecord>, serialized: Arc<str>);

    /// No-op for back-ends that are intrinsically leader-only (Kafka).
    /// For TCP/WebSocket, lets a non-leader peer forward-proxy to the
    /// leader's subscribers.
    async fn agent_start(&self, peer_ip: String, peer_port: u16);

    async fn agent_stop(&self);

    fn name(&self) -> &str;
}
