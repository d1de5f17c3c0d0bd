pub mod change_record;
pub mod position;
pub mod schema;
pub mod value;

pub use change_record::{ChangeOp, ChangeRecord};
pub use position::{Position, PositionUpdate};
pub use schema::TableSchema;
pub use value::Value;
