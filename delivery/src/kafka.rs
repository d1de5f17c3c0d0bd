use std::sync::Arc;
use std::time::Duration;

use common::config::KafkaConfig;
use common::err::ReError;
use common::model::change_record::ChangeRecord;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::warn;

use crate::group::Group;
use dispatcher::Backend;

const SEND_TIMEOUT: Duration = Duration::from_secs(3);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Single async producer mapping every change record to `(topic, key =
/// table, value = serialized record)`. There is no grouping
/// concept here — one topic, one filter list — so `agent_start`/`agent_stop`
/// are no-ops: Kafka is intrinsically leader-only, nothing to proxy.
pub struct KafkaBackend {
    producer: Option<FutureProducer>,
    topic: String,
    filter: Group,
}

impl KafkaBackend {
    pub fn new(config: &KafkaConfig) -> Result<Self, ReError> {
        let filter = Group::new("kafka", common::config::GroupMode::Broadcast, &config.filter)?;
        if !config.enable {
            return Ok(Self {
                producer: None,
                topic: config.topic.clone(),
                filter,
            });
        }
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("message.timeout.ms", SEND_TIMEOUT.as_millis().to_string())
            .create()
            .map_err(|e| ReError::ConnectionError(format!("building Kafka producer failed: {e}")))?;
        Ok(Self {
            producer: Some(producer),
            topic: config.topic.clone(),
            filter,
        })
    }
}

#[async_trait::async_trait]
impl Backend for KafkaBackend {
    async fn start(&self) -> Result<(), ReError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ReError> {
        if let Some(producer) = &self.producer {
            producer
                .flush(FLUSH_TIMEOUT)
                .map_err(|e| ReError::ConnectionError(format!("Kafka flush on close failed: {e}")))?;
        }
        Ok(())
    }

    async fn reload(&self) -> Result<(), ReError> {
        Ok(())
    }

    async fn send_all(&self, record: Arc<ChangeRecord>, serialized: Arc<str>) {
        let Some(producer) = &self.producer else { return };
        if !self.filter.matches(&record.table) {
            return;
        }
        let result = producer
            .send(
                FutureRecord::to(&self.topic).key(&record.table).payload(serialized.as_bytes()),
                SEND_TIMEOUT,
            )
            .await;
        if let Err((e, _owned_message)) = result {
            warn!(topic = %self.topic, table = %record.table, error = %e, "Kafka send failed");
        }
    }

    async fn agent_start(&self, _peer_ip: String, _peer_port: u16) {}

    async fn agent_stop(&self) {}

    fn name(&self) -> &str {
        "kafka"
    }
}
