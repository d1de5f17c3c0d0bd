//! End-to-end offline buffering and replay for `delivery::HttpBackend`
//!. `delivery::http`'s own unit tests only exercise
//! `HttpNode`'s offline bookkeeping directly, since its fields are private
//! to that module; this drives the same behavior from outside through a
//! real loopback HTTP responder and the public `Backend` trait only.

use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::config::{GroupConfig, GroupMode, HttpGroupConfig, HttpNodeConfig};
use common::model::change_record::{ChangeOp, ChangeRecord};
use common::model::position::Position;
use delivery::HttpBackend;
use dispatcher::{Backend, Dispatcher};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

static NEXT_PORT: AtomicU16 = AtomicU16::new(19_200);

fn next_addr() -> String {
    format!("127.0.0.1:{}", NEXT_PORT.fetch_add(1, Ordering::SeqCst))
}

/// Minimal HTTP/1.1 responder: reads one request off each connection and
/// replies 500 while `failing` is true, 200 otherwise. Counts every
/// request it accepts, including probe pings, into `received`.
async fn spawn_fake_node(addr: String, failing: Arc<std::sync::atomic::AtomicBool>, received: Arc<AtomicUsize>) {
    let listener = TcpListener::bind(&addr).await.unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let failing = failing.clone();
            let received = received.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                // One read is enough for these small test payloads; real
                // HTTP framing isn't the thing under test here.
                let n = match stream.read(&mut buf).await {
                    Ok(n) if n > 0 => n,
                    _ => return,
                };
                let _ = &buf[..n];
                received.fetch_add(1, Ordering::SeqCst);
                let status_line = if failing.load(Ordering::SeqCst) {
                    "HTTP/1.1 500 Internal Server Error\r\n"
                } else {
                    "HTTP/1.1 200 OK\r\n"
                };
                let response = format!("{status_line}Content-Length: 0\r\nConnection: close\r\n\r\n");
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });
}

fn sample_record() -> ChangeRecord {
    ChangeRecord::new(
        "db1",
        "t",
        ChangeOp::Insert,
        None,
        None,
        Position::new("mysql-bin.000001", 4, 0),
    )
}

#[tokio::test]
async fn node_buffers_while_offline_and_replays_once_a_probe_sees_it_recover() {
    let addr = next_addr();
    let failing = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let received = Arc::new(AtomicUsize::new(0));
    spawn_fake_node(addr.clone(), failing.clone(), received.clone()).await;

    let config = vec![HttpGroupConfig {
        group: GroupConfig {
            name: "g".into(),
            mode: GroupMode::Broadcast,
            filters: vec![],
        },
        nodes: vec![HttpNodeConfig {
            url: format!("http://{addr}/"),
            weight: 0,
        }],
    }];
    let backend: Arc<dyn Backend> = Arc::new(HttpBackend::new(&config, 1, Duration::from_millis(30)).unwrap());
    backend.start().await.unwrap();
    let dispatcher = Dispatcher::new(vec![backend.clone()]);

    // First three dispatches each fail against the 500-returning node and
    // push it offline (CONSECUTIVE_FAILURES_BEFORE_OFFLINE = 3).
    for _ in 0..3 {
        dispatcher.dispatch(sample_record()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let before_buffering = received.load(Ordering::SeqCst);
    assert!(before_buffering >= 3);

    // Now offline: further dispatches must not reach the node at all,
    // they land in its replay cache instead.
    for _ in 0..5 {
        dispatcher.dispatch(sample_record()).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(received.load(Ordering::SeqCst), before_buffering);

    // The node recovers; the next probe should see the 200 and drain the
    // replay cache into the node's send queue.
    failing.store(false, Ordering::SeqCst);
    let recovered = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if received.load(Ordering::SeqCst) > before_buffering {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(recovered.is_ok(), "replay cache was never drained after recovery");

    backend.close().await.unwrap();
}
