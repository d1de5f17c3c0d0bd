//! Drives the real `EventStreamDecoder` over synthetic wire bytes for a
//! TABLE_MAP followed by a WRITE_ROWS v2 event, then applies the same
//! position-advance rule `connection::consumer::Consumer::stream_once`
//! uses, to check the literal insert-fan-out scenario end to end:
//! `INSERT INTO db1.t VALUES (1,'a')` against a stream starting at
//! `("mysql-bin.000001", 4, 0)` must emit the record keyed
//! `mysql-bin.000001:4:0` and leave the saved position at
//! `("mysql-bin.000001", 4, 1)`.

use binlog::change_record::rows_event_to_change_records;
use binlog::{BinlogEvent, EventStreamDecoder};
use common::model::change_record::ChangeOp;
use common::model::position::Position;
use common::model::value::Value;

const EVENT_HEADER_LEN: usize = 19;
const CHECKSUM_LEN: usize = 4;
const TABLE_MAP_EVENT: u8 = 19;
const WRITE_ROWS_EVENT_V2: u8 = 30;

fn wrap_event(event_type: u8, next_position: u32, body: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(EVENT_HEADER_LEN + body.len() + CHECKSUM_LEN);
    raw.extend_from_slice(&0u32.to_le_bytes()); // timestamp
    raw.push(event_type);
    raw.extend_from_slice(&1u32.to_le_bytes()); // server_id
    raw.extend_from_slice(&((EVENT_HEADER_LEN + body.len() + CHECKSUM_LEN) as u32).to_le_bytes());
    raw.extend_from_slice(&next_position.to_le_bytes());
    raw.extend_from_slice(&0u16.to_le_bytes()); // flags
    raw.extend_from_slice(body);
    raw.extend_from_slice(&[0u8; CHECKSUM_LEN]);
    raw
}

fn table_map_event_bytes() -> Vec<u8> {
    let mut body = vec![];
    body.extend_from_slice(&[1, 0, 0, 0, 0, 0]); // table_id = 1
    body.extend_from_slice(&0u16.to_le_bytes()); // flags
    body.push(3);
    body.extend_from_slice(b"db1");
    body.push(0);
    body.push(1);
    body.extend_from_slice(b"t");
    body.push(0);
    body.push(2); // column_count
    body.push(3); // id: LONG
    body.push(253); // name: VARSTRING
    body.push(2); // metadata_len: LONG carries none, VARSTRING carries 2 bytes
    body.extend_from_slice(&255u16.to_le_bytes()); // VARSTRING max length
    body.push(0b0000_0000); // null_bitmap, 1 byte for 2 columns
                             // optional metadata: real column names, the way MySQL 8.0.1+ servers send them
    body.push(4); // field type: COLUMN_NAME
    body.push(8); // field length
    body.push(2);
    body.extend_from_slice(b"id");
    body.push(4);
    body.extend_from_slice(b"name");

    wrap_event(TABLE_MAP_EVENT, 4, &body)
}

fn write_rows_event_bytes() -> Vec<u8> {
    let mut body = vec![];
    body.extend_from_slice(&[1, 0, 0, 0, 0, 0]); // table_id = 1
    body.extend_from_slice(&0u16.to_le_bytes()); // flags
    body.extend_from_slice(&2u16.to_le_bytes()); // v2 extra-data block length (2 = no extra data)
    body.push(2); // column_count
    body.push(0b0000_0011); // columns-present bitmap: both columns present
    body.push(0b0000_0000); // row null bitmap: neither column null
    body.extend_from_slice(&1i32.to_le_bytes()); // id = 1
    body.push(1); // name length
    body.push(b'a'); // name = "a"

    wrap_event(WRITE_ROWS_EVENT_V2, 4, &body)
}

#[test]
fn insert_fan_out_scenario_emits_expected_event_id_and_advances_position() {
    let mut decoder = EventStreamDecoder::new();
    let mut position = Position::new("mysql-bin.000001", 4, 0);

    let (table_map_header, _) = decoder.decode(&table_map_event_bytes()).unwrap();
    position.offset = table_map_header.next_position as u64;

    let (rows_header, event) = decoder.decode(&write_rows_event_bytes()).unwrap();
    let rows = match event {
        BinlogEvent::Rows(rows) => rows,
        other => panic!("expected a ROWS event, got {other:?}"),
    };
    let table_map = decoder.table_map(rows.table_id).expect("table map cached from the prior event");

    let records = rows_event_to_change_records(&rows, &table_map, &position);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.schema, "db1");
    assert_eq!(record.table, "t");
    assert_eq!(record.op, ChangeOp::Insert);
    let after = record.after.as_ref().unwrap();
    assert_eq!(after.get("id"), Some(&Value::Int(1)));
    assert_eq!(after.get("name"), Some(&Value::String("a".to_string())));
    assert_eq!(record.position.event_id(), "mysql-bin.000001:4:0");

    position.offset = rows_header.next_position as u64;
    position.event_index += records.len() as u64;
    assert_eq!(position, Position::new("mysql-bin.000001", 4, 1));
}
