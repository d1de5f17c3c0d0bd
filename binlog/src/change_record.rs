use crate::rows::{RowsEvent, RowsEventKind};
use crate::table_map::TableMapEvent;
use common::model::change_record::{ChangeOp, ChangeRecord};
use common::model::position::Position;

/// Converts one decoded ROWS event into the `ChangeRecord`s the dispatcher
/// fans out, one per row touched. `position` is the position the *event*
/// ends at; `event_index` distinguishes rows within the same event.
pub fn rows_event_to_change_records(rows: &RowsEvent, table_map: &TableMapEvent, position: &Position) -> Vec<ChangeRecord> {
    let op = match rows.kind {
        RowsEventKind::Write => ChangeOp::Insert,
        RowsEventKind::Update => ChangeOp::Update,
        RowsEventKind::Delete => ChangeOp::Delete,
    };

    rows.rows
        .iter()
        .enumerate()
        .map(|(index, image)| {
            let row_position = Position::new(position.file.clone(), position.offset, position.event_index + index as u64);
            ChangeRecord::new(
                table_map.database_name.clone(),
                table_map.table_name.clone(),
                op,
                image.before.clone(),
                image.after.clone(),
                row_position,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;
    use crate::rows::RowImage;
    use indexmap::IndexMap;

    #[test]
    fn maps_write_rows_to_insert_records() {
        let table_map = TableMapEvent {
            table_id: 1,
            flags: 0,
            database_name: "shop".into(),
            table_name: "order".into(),
            column_types: vec![ColumnType::Long],
            column_metadata: vec![0],
            null_bitmap: vec![0],
            column_names: vec!["id".into()],
        };
        let mut after = IndexMap::new();
        after.insert("id".to_string(), common::model::value::Value::Int(7));
        let rows = RowsEvent {
            table_id: 1,
            kind: RowsEventKind::Write,
            rows: vec![RowImage { before: None, after: Some(after) }],
        };
        let position = Position::new("mysql-bin.000001".to_string(), 1000, 0);
        let records = rows_event_to_change_records(&rows, &table_map, &position);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].op, ChangeOp::Insert);
        assert_eq!(records[0].schema, "shop");
        assert_eq!(records[0].table, "order");
    }
}
