use crate::format_description::FormatDescriptionEvent;
use crate::header::{EventHeader, EventType, EVENT_HEADER_LEN};
use crate::rotate::RotateEvent;
use crate::rows::{RowsEvent, RowsEventKind};
use crate::table_map::TableMapEvent;
use common::err::decode_error::ReError;
use lru::LruCache;
use std::io::Cursor;
use std::num::NonZeroUsize;
use std::sync::Mutex;

const CHECKSUM_LEN: usize = 4;

/// One decoded binlog event, stripped of everything the dispatcher doesn't
/// act on. `Other` covers QUERY/XID/GTID/HEARTBEAT and anything unrecognized
/// — the consumer still advances its position past them but emits nothing.
#[derive(Debug, Clone)]
pub enum BinlogEvent {
    FormatDescription(FormatDescriptionEvent),
    Rotate(RotateEvent),
    TableMap(TableMapEvent),
    Rows(RowsEvent),
    Other { event_type: u8 },
}

/// Tracks the format-description event and the live TABLE_MAP definitions
/// (keyed by `table_id`) needed to decode subsequent ROWS events. One
/// instance per consumer, cached across rotations since a table's id stays
/// stable until the table is altered.
pub struct EventStreamDecoder {
    format_description: Option<FormatDescriptionEvent>,
    table_cache: Mutex<LruCache<u64, TableMapEvent>>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self {
            format_description: None,
            table_cache: Mutex::new(LruCache::new(NonZeroUsize::new(4096).unwrap())),
        }
    }

    /// `raw` is one full event: 19-byte header followed by body+checksum.
    /// Returns the parsed header alongside the decoded event so the caller
    /// can advance its position from `header.next_position` — the same
    /// field MySQL's own replication stream uses for this purpose — rather
    /// than re-deriving it from `raw.len()`.
    pub fn decode(&mut self, raw: &[u8]) -> Result<(EventHeader, BinlogEvent), ReError> {
        if raw.len() < EVENT_HEADER_LEN {
            return Err(ReError::Incomplete(common::err::decode_error::Needed::NoEnoughData));
        }
        let mut header_cursor = Cursor::new(raw);
        let header = EventHeader::parse(&mut header_cursor)?;
        let body_start = EVENT_HEADER_LEN;
        let body_end = raw.len().saturating_sub(CHECKSUM_LEN);
        if body_end < body_start {
            return Err(ReError::Error("event shorter than header+checksum".into()));
        }
        let body = &raw[body_start..body_end];
        let mut body_cursor = Cursor::new(body);

        let event = match header.event_type() {
            EventType::FormatDescriptionEvent => {
                let fd = FormatDescriptionEvent::parse(&mut body_cursor, body.len())?;
                self.format_description = Some(fd.clone());
                BinlogEvent::FormatDescription(fd)
            }
            EventType::RotateEvent => {
                let rotate = RotateEvent::parse(&mut body_cursor, body.len())?;
                BinlogEvent::Rotate(rotate)
            }
            EventType::TableMapEvent => {
                let table_map = TableMapEvent::parse(&mut body_cursor, body.len())?;
                self.table_cache.lock().unwrap().put(table_map.table_id, table_map.clone());
                BinlogEvent::TableMap(table_map)
            }
            EventType::WriteRowsEventV1 | EventType::WriteRowsEvent => {
                self.decode_rows(body, RowsEventKind::Write, rows_version(header.event_type()))?
            }
            EventType::UpdateRowsEventV1 | EventType::UpdateRowsEvent => {
                self.decode_rows(body, RowsEventKind::Update, rows_version(header.event_type()))?
            }
            EventType::DeleteRowsEventV1 | EventType::DeleteRowsEvent => {
                self.decode_rows(body, RowsEventKind::Delete, rows_version(header.event_type()))?
            }
            other => BinlogEvent::Other {
                event_type: match other {
                    EventType::Unknown(code) => code,
                    _ => header.event_type,
                },
            },
        };
        Ok((header, event))
    }

    pub fn table_map(&self, table_id: u64) -> Option<TableMapEvent> {
        self.table_cache.lock().unwrap().get(&table_id).cloned()
    }

    fn decode_rows(&self, body: &[u8], kind: RowsEventKind, version: u8) -> Result<BinlogEvent, ReError> {
        // table_id is the first 6 bytes of every ROWS event body.
        let mut id_buf = [0u8; 6];
        id_buf.copy_from_slice(&body[..6]);
        let table_id = u64::from_le_bytes([id_buf[0], id_buf[1], id_buf[2], id_buf[3], id_buf[4], id_buf[5], 0, 0]);

        let mut cache = self.table_cache.lock().unwrap();
        let table_map = cache
            .get(&table_id)
            .ok_or_else(|| ReError::Error(format!("no TABLE_MAP seen for table_id {table_id}")))?
            .clone();
        drop(cache);

        let rows = RowsEvent::parse(body, kind, version, &table_map)?;
        Ok(BinlogEvent::Rows(rows))
    }
}

fn rows_version(event_type: EventType) -> u8 {
    match event_type {
        EventType::WriteRowsEventV1 | EventType::UpdateRowsEventV1 | EventType::DeleteRowsEventV1 => 1,
        _ => 2,
    }
}

impl Default for EventStreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}
