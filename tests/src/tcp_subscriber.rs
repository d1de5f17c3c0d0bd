//! Drives `delivery::TcpBackend` over a real loopback socket: the piece
//! `delivery::tcp`'s own unit tests don't cover, since those only exercise
//! the frame parser and the config constructor in isolation.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::config::{GroupConfig, GroupMode, TcpServiceConfig};
use common::model::change_record::{ChangeOp, ChangeRecord};
use common::model::position::Position;
use delivery::wire::{Command, Frame};
use delivery::TcpBackend;
use dispatcher::{Backend, Dispatcher};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

// Integration tests in this module each bind their own listener, so a
// shared counter keeps them from racing over the same loopback port.
static NEXT_PORT: AtomicU16 = AtomicU16::new(19_100);

fn next_addr() -> String {
    format!("127.0.0.1:{}", NEXT_PORT.fetch_add(1, Ordering::SeqCst))
}

async fn write_frame(stream: &mut TcpStream, frame: &Frame) {
    stream.write_all(&frame.encode()).await.unwrap();
}

async fn read_frame(stream: &mut TcpStream) -> Frame {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    Frame::decode_payload(&payload).unwrap()
}

async fn try_read_frame(stream: &mut TcpStream, within: Duration) -> Option<Frame> {
    tokio::time::timeout(within, read_frame(stream)).await.ok()
}

fn sample_record(table: &str) -> ChangeRecord {
    ChangeRecord::new(
        "db1",
        table,
        ChangeOp::Insert,
        None,
        None,
        Position::new("mysql-bin.000001", 4, 0),
    )
}

#[tokio::test]
async fn broadcast_group_delivers_matching_records_and_drops_the_rest() {
    let addr = next_addr();
    let config = TcpServiceConfig {
        enable: true,
        listen_addr: addr.clone(),
        groups: vec![GroupConfig {
            name: "orders".into(),
            mode: GroupMode::Broadcast,
            filters: vec!["^orders_.*".to_string()],
        }],
    };
    let backend: Arc<dyn Backend> = Arc::new(TcpBackend::new(&config).unwrap());
    backend.start().await.unwrap();
    // accept_loop needs a beat to actually bind and start accepting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = TcpStream::connect(&addr).await.unwrap();
    write_frame(&mut client, &Frame::set_pro(0, "orders")).await;
    let reply = read_frame(&mut client).await;
    assert_eq!(reply.command, Command::Ok);

    let dispatcher = Dispatcher::new(vec![backend.clone()]);
    dispatcher.dispatch(sample_record("orders_2024")).await.unwrap();
    let event = read_frame(&mut client).await;
    assert_eq!(event.command, Command::Event);
    let body = String::from_utf8(event.body).unwrap();
    assert!(body.contains("\"orders_2024\""));

    // "users" doesn't match the group's filter, so nothing should arrive.
    dispatcher.dispatch(sample_record("users")).await.unwrap();
    assert!(try_read_frame(&mut client, Duration::from_millis(200)).await.is_none());

    backend.close().await.unwrap();
}

#[tokio::test]
async fn weighted_group_routes_each_record_to_exactly_one_member() {
    let addr = next_addr();
    let config = TcpServiceConfig {
        enable: true,
        listen_addr: addr.clone(),
        groups: vec![GroupConfig {
            name: "w".into(),
            mode: GroupMode::Weighted,
            filters: vec![],
        }],
    };
    let backend: Arc<dyn Backend> = Arc::new(TcpBackend::new(&config).unwrap());
    backend.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut heavy = TcpStream::connect(&addr).await.unwrap();
    write_frame(&mut heavy, &Frame::set_pro(75, "w")).await;
    assert_eq!(read_frame(&mut heavy).await.command, Command::Ok);

    let mut light = TcpStream::connect(&addr).await.unwrap();
    write_frame(&mut light, &Frame::set_pro(25, "w")).await;
    assert_eq!(read_frame(&mut light).await.command, Command::Ok);

    let dispatcher = Dispatcher::new(vec![backend.clone()]);
    const TOTAL: usize = 200;
    for _ in 0..TOTAL {
        dispatcher.dispatch(sample_record("t")).await.unwrap();
    }

    let mut heavy_count = 0u32;
    while try_read_frame(&mut heavy, Duration::from_millis(100)).await.is_some() {
        heavy_count += 1;
    }
    let mut light_count = 0u32;
    while try_read_frame(&mut light, Duration::from_millis(100)).await.is_some() {
        light_count += 1;
    }

    assert_eq!(heavy_count as usize + light_count as usize, TOTAL);
    // Weights were 75/25; the heavy subscriber should have received
    // noticeably more than the light one.
    assert!(heavy_count > light_count * 2);

    backend.close().await.unwrap();
}
