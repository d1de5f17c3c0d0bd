//! Drives the same "bring every back-end up, then down" sequence
//! `cdc::build_backends`/`main::run` perform at process shutdown, across all four back-end families at once.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::config::{Config, GroupConfig, GroupMode, KafkaConfig, TcpServiceConfig, WebSocketServiceConfig};
use common::model::change_record::{ChangeOp, ChangeRecord};
use common::model::position::Position;
use delivery::{HttpBackend, KafkaBackend, TcpBackend, WebSocketBackend};
use dispatcher::{Backend, Dispatcher};

static NEXT_PORT: AtomicU16 = AtomicU16::new(19_300);

fn next_addr() -> String {
    format!("127.0.0.1:{}", NEXT_PORT.fetch_add(1, Ordering::SeqCst))
}

/// Every back-end type is always constructed regardless of its own
/// `enable` flag (an unconfigured back-end just never binds/produces
/// anything), matching how the running process builds its back-end set
/// once at startup.
fn build_backends(config: &Config) -> Vec<Arc<dyn Backend>> {
    vec![
        Arc::new(HttpBackend::new(&config.services.http, 2, Duration::from_secs(1)).unwrap()),
        Arc::new(TcpBackend::new(&config.services.tcp).unwrap()),
        Arc::new(WebSocketBackend::new(&config.services.websocket).unwrap()),
        Arc::new(KafkaBackend::new(&config.kafka).unwrap()),
    ]
}

#[tokio::test]
async fn every_backend_starts_dispatches_and_closes_cleanly() {
    let mut config = Config::default();
    config.services.tcp = TcpServiceConfig {
        enable: true,
        listen_addr: next_addr(),
        groups: vec![GroupConfig {
            name: "g".into(),
            mode: GroupMode::Broadcast,
            filters: vec![],
        }],
    };
    // websocket and kafka stay disabled (empty listen_addr / enable=false),
    // http has no nodes configured — each must still start and close
    // without error, exactly as an operator running with a partial config
    // expects.
    config.services.websocket = WebSocketServiceConfig::default();
    config.kafka = KafkaConfig::default();

    let backends = build_backends(&config);
    for backend in &backends {
        backend.start().await.unwrap();
    }

    let dispatcher = Dispatcher::new(backends.clone());
    let record = ChangeRecord::new(
        "db1",
        "t",
        ChangeOp::Insert,
        None,
        None,
        Position::new("mysql-bin.000001", 4, 0),
    );
    dispatcher.dispatch(record).await.unwrap();

    for backend in &backends {
        backend.close().await.unwrap();
    }
    // Closing twice must stay a no-op: shutdown can be driven by both a
    // control-channel STOP and a ctrl-c race in the running process.
    for backend in &backends {
        backend.close().await.unwrap();
    }
}

#[tokio::test]
async fn tcp_backend_stops_accepting_once_closed() {
    let addr = next_addr();
    let config = TcpServiceConfig {
        enable: true,
        listen_addr: addr.clone(),
        groups: vec![],
    };
    let backend: Arc<dyn Backend> = Arc::new(TcpBackend::new(&config).unwrap());
    backend.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    backend.close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The listening socket itself is dropped along with the accept task,
    // so a fresh bind on the same address must now succeed.
    let rebound = tokio::net::TcpListener::bind(&addr).await;
    assert!(rebound.is_ok());
}
