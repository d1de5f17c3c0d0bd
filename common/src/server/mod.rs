use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::warn;

use crate::err::ReError;

/// Every long-running component (coordinator, consumer, delivery back-end)
/// implements `start`/`shutdown` so the process can bring them up and tear
/// them down uniformly.
#[async_trait::async_trait]
pub trait Server: Send + Sync {
    async fn start(&self);

    /// `graceful = true` drains in-flight work (bounded); `false` cuts over
    /// immediately. Must be idempotent.
    async fn shutdown(&self, graceful: bool) -> Result<(), ReError>;

    fn name(&self) -> &str;
}

/// Owns the set of running services and fans a single cancellation out to
/// all of them.
pub struct ShutdownHandle {
    shutdown: Arc<AtomicBool>,
    services: Vec<Arc<dyn Server>>,
}

impl ShutdownHandle {
    pub fn create() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            services: vec![],
        }
    }

    pub fn add_service(&mut self, server: Arc<dyn Server>) {
        self.services.push(server);
    }

    pub async fn shutdown_all(&self, graceful: bool) -> Result<(), ReError> {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut futures = vec![];
        for s in &self.services {
            futures.push(s.shutdown(graceful));
        }
        let results = join_all(futures).await;
        for (service, result) in self.services.iter().zip(results) {
            if let Err(e) = &result {
                warn!(service = service.name(), error = %e, "service shutdown returned an error");
            }
        }
        Ok(())
    }
}
