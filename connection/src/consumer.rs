use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use binlog::change_record::rows_event_to_change_records;
use binlog::{BinlogEvent, EventStreamDecoder};
use common::err::decode_error::{ConsumerError, ReError};
use common::model::change_record::ChangeRecord;
use common::model::position::{Position, PositionUpdate};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::options::ConnectionOptions;
use crate::replica::ReplicaConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Handshaking,
    Streaming,
    Draining,
    Failed,
    Closed,
}

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Streams ROWS events from one primary, decodes them into `ChangeRecord`s,
/// and hands them to `records`. Runs until cancelled or a fatal error
/// (auth failure, unsupported format) surfaces — a fatal error means the
/// caller must release leadership rather than retry here.
pub struct Consumer {
    options: ConnectionOptions,
    state: ConsumerState,
}

impl Consumer {
    pub fn new(options: ConnectionOptions) -> Self {
        Self {
            options,
            state: ConsumerState::Disconnected,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Streams starting at `position` until `cancelled` is set. Reconnects
    /// with exponential backoff (capped at 60s) on retriable errors; returns
    /// immediately on the first fatal one.
    pub async fn run(
        &mut self,
        mut position: Position,
        records: mpsc::Sender<ChangeRecord>,
        positions: mpsc::Sender<PositionUpdate>,
        cancelled: Arc<AtomicBool>,
    ) -> Result<(), ConsumerError> {
        let mut backoff = Duration::from_millis(500);

        while !cancelled.load(Ordering::SeqCst) {
            self.state = ConsumerState::Handshaking;
            match self.stream_once(&mut position, &records, &positions, &cancelled).await {
                Ok(()) => {
                    self.state = ConsumerState::Closed;
                    return Ok(());
                }
                Err(ConsumerError::Fatal(e)) => {
                    self.state = ConsumerState::Failed;
                    return Err(ConsumerError::Fatal(e));
                }
                Err(ConsumerError::Retriable(e)) => {
                    warn!(error = %e, backoff_ms = backoff.as_millis(), "binlog stream dropped, retrying");
                    self.state = ConsumerState::Disconnected;
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
        self.state = ConsumerState::Draining;
        Ok(())
    }

    async fn stream_once(
        &mut self,
        position: &mut Position,
        records: &mpsc::Sender<ChangeRecord>,
        positions: &mpsc::Sender<PositionUpdate>,
        cancelled: &Arc<AtomicBool>,
    ) -> Result<(), ConsumerError> {
        let mut connection = ReplicaConnection::connect(&self.options).await.map_err(classify)?;
        connection
            .register_and_dump(self.options.server_id, &position.file, position.offset)
            .await
            .map_err(classify)?;

        self.state = ConsumerState::Streaming;
        let mut decoder = EventStreamDecoder::new();
        info!(file = %position.file, offset = position.offset, "streaming binlog events");

        while !cancelled.load(Ordering::SeqCst) {
            let raw = connection.next_event().await.map_err(classify)?;
            let (header, event) = decoder.decode(&raw).map_err(|e| ConsumerError::Retriable(e))?;

            match event {
                BinlogEvent::Rotate(rotate) => {
                    position.file = rotate.next_file;
                    position.offset = rotate.next_position;
                    position.event_index = 0;
                    let _ = positions.send(PositionUpdate::Rotated(position.clone())).await;
                }
                BinlogEvent::Rows(rows) => {
                    let table_map = decoder
                        .table_map(rows.table_id)
                        .ok_or_else(|| ConsumerError::Retriable(ReError::Error("rows event with no prior table map".into())))?;
                    let change_records = rows_event_to_change_records(&rows, &table_map, position);
                    position.offset = header.next_position as u64;
                    position.event_index += change_records.len() as u64;
                    for record in change_records {
                        if records.send(record).await.is_err() {
                            return Ok(());
                        }
                    }
                    let _ = positions.send(PositionUpdate::Progress(position.clone())).await;
                }
                _ => {
                    position.offset = header.next_position as u64;
                }
            }
        }
        Ok(())
    }
}

fn classify(error: ReError) -> ConsumerError {
    match error {
        ReError::AuthenticationError(_) | ReError::UnsupportedFormatError(_) => ConsumerError::Fatal(error),
        other => ConsumerError::Retriable(other),
    }
}
