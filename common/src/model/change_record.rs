use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::model::position::Position;
use crate::model::value::Value;

/// Ordered column -> value mapping, preserving TABLE_MAP column order.
pub type Row = IndexMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// The canonical event crossing every component boundary.
///
/// `before` is present for update/delete, `after` for insert/update.
/// `event_id` is derived from `position` and doubles as the idempotency key
/// handed to at-least-once back-ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub schema: String,
    pub table: String,
    pub op: ChangeOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Row>,
    #[serde(skip)]
    pub position: Position,
    pub event_id: String,
}

impl ChangeRecord {
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        op: ChangeOp,
        before: Option<Row>,
        after: Option<Row>,
        position: Position,
    ) -> Self {
        let event_id = position.event_id();
        Self {
            schema: schema.into(),
            table: table.into(),
            op,
            before,
            after,
            position,
            event_id,
        }
    }

    /// Single JSON object `{schema, table, op, before, after, event_id}`
    ///. Called once per dispatch; the Dispatcher caches the
    /// result for the lifetime of that call.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ChangeRecord {
        let mut after = Row::new();
        after.insert("id".to_string(), Value::Int(1));
        after.insert("name".to_string(), Value::String("a".into()));
        ChangeRecord::new(
            "db1",
            "t",
            ChangeOp::Insert,
            None,
            Some(after),
            Position::new("mysql-bin.000001", 4, 0),
        )
    }

    #[test]
    fn serializes_to_documented_json_shape() {
        let record = sample();
        let json = record.to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["schema"], "db1");
        assert_eq!(parsed["table"], "t");
        assert_eq!(parsed["op"], "insert");
        assert_eq!(parsed["after"]["id"], 1);
        assert_eq!(parsed["after"]["name"], "a");
        assert_eq!(parsed["event_id"], "mysql-bin.000001:4:0");
        assert!(parsed.get("before").is_none());
    }

    #[test]
    fn json_round_trip_preserves_field_values() {
        let record = sample();
        let json = record.to_json().unwrap();
        let parsed: ChangeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.schema, record.schema);
        assert_eq!(parsed.table, record.table);
        assert_eq!(parsed.op, record.op);
        assert_eq!(parsed.after, record.after);
        assert_eq!(parsed.event_id, record.event_id);
    }
}
