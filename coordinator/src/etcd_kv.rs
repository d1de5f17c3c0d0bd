use common::err::ReError;
use etcd_client::{
    Client, Compare, CompareOp, GetOptions, PutOptions, Txn, TxnOp, TxnOpResponse,
};
use tokio::sync::mpsc;
use tracing::warn;

use crate::election::SessionId;
use crate::kv::KvStore;

/// `KvStore` backed by a real etcd cluster: leases stand in for sessions,
/// a compare-and-swap transaction stands in for the session-guarded PUT,
/// and `Client::watch` drives the position watch.
pub struct EtcdKv {
    client: Client,
}

impl EtcdKv {
    pub async fn connect(endpoints: &[String]) -> Result<Self, ReError> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|e| ReError::CoordinatorError(format!("etcd connect failed: {e}")))?;
        Ok(Self { client })
    }
}

fn to_err(e: etcd_client::Error) -> ReError {
    ReError::CoordinatorError(e.to_string())
}

#[async_trait::async_trait]
impl KvStore for EtcdKv {
    async fn create_session(&self, ttl_secs: i64) -> Result<SessionId, ReError> {
        let mut client = self.client.clone();
        let resp = client.lease_grant(ttl_secs, None).await.map_err(to_err)?;
        Ok(resp.id())
    }

    async fn renew_session(&self, session: SessionId) -> Result<(), ReError> {
        let mut client = self.client.clone();
        let (mut keeper, mut stream) = client.lease_keep_alive(session).await.map_err(to_err)?;
        keeper.keep_alive().await.map_err(to_err)?;
        match stream.message().await {
            Ok(Some(resp)) if resp.ttl() > 0 => Ok(()),
            Ok(_) => Err(ReError::CoordinatorError("lease no longer exists".into())),
            Err(e) => Err(to_err(e)),
        }
    }

    async fn revoke_session(&self, session: SessionId) -> Result<(), ReError> {
        let mut client = self.client.clone();
        client.lease_revoke(session).await.map_err(to_err)?;
        Ok(())
    }

    async fn try_acquire_lock(&self, key: &str, session: SessionId) -> Result<bool, ReError> {
        let mut client = self.client.clone();
        let txn = Txn::new()
            .when(vec![Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(
                key,
                vec![1u8],
                Some(PutOptions::new().with_lease(session)),
            )])
            .or_else(vec![TxnOp::get(key, None)]);
        let resp = client.txn(txn).await.map_err(to_err)?;
        if resp.succeeded() {
            return Ok(true);
        }
        // Not newly created: succeed anyway (idempotent) if we already own it.
        for op_resp in resp.op_responses() {
            if let TxnOpResponse::Get(get_resp) = op_resp {
                if let Some(kv) = get_resp.kvs().first() {
                    if kv.lease() == session {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    async fn release_lock(&self, key: &str) -> Result<(), ReError> {
        let mut client = self.client.clone();
        client.delete(key, None).await.map_err(to_err)?;
        Ok(())
    }

    async fn put(&self, key: &str, value: Vec<u8>, session: Option<SessionId>) -> Result<(), ReError> {
        let mut client = self.client.clone();
        let options = session.map(|s| PutOptions::new().with_lease(s));
        client.put(key, value, options).await.map_err(to_err)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ReError> {
        let mut client = self.client.clone();
        let resp = client.get(key, None).await.map_err(to_err)?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, ReError> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(to_err)?;
        Ok(resp
            .kvs()
            .iter()
            .map(|kv| (kv.key_str().unwrap_or_default().to_string(), kv.value().to_vec()))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), ReError> {
        let mut client = self.client.clone();
        client.delete(key, None).await.map_err(to_err)?;
        Ok(())
    }

    async fn watch(&self, key: &str) -> Result<mpsc::Receiver<Vec<u8>>, ReError> {
        let mut client = self.client.clone();
        let (_watcher, mut stream) = client.watch(key, None).await.map_err(to_err)?;
        let (tx, rx) = mpsc::channel(16);
        let owned_key = key.to_string();
        tokio::spawn(async move {
            // Holding on to `_watcher` inside the task keeps the watch alive
            // for exactly as long as something is still receiving from `rx`.
            let _watcher = _watcher;
            loop {
                match stream.message().await {
                    Ok(Some(resp)) => {
                        for event in resp.events() {
                            if let Some(kv) = event.kv() {
                                if tx.send(kv.value().to_vec()).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        warn!(error = %e, key = %owned_key, "etcd watch stream failed");
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }
}
