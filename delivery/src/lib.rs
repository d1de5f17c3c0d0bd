pub mod group;
pub mod http;
pub mod kafka;
pub mod replay_cache;
pub mod status;
pub mod subscriber;
pub mod tcp;
pub mod weighted;
pub mod websocket;
pub mod wire;

pub use http::HttpBackend;
pub use kafka::KafkaBackend;
pub use tcp::TcpBackend;
pub use websocket::WebSocketBackend;
