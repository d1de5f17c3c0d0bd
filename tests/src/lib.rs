//! Cross-crate integration tests. Each per-crate unit test suite exercises
//! its own module in isolation; these drive two or more real components
//! together (real sockets, a real `PositionStore` on a tempdir, a real
//! `Coordinator` against `MockKv`) the way the running `cdc` binary wires
//! them at startup.

#[cfg(test)]
mod binlog_position_tracking;
#[cfg(test)]
mod failover;
#[cfg(test)]
mod graceful_shutdown;
#[cfg(test)]
mod http_offline_buffering;
#[cfg(test)]
mod tcp_subscriber;
