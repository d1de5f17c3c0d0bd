use std::sync::Arc;

use common::err::ReError;
use common::model::change_record::ChangeRecord;
use tracing::debug;

use crate::backend::Backend;

/// Fans one `ChangeRecord` out to every enabled back-end.
/// Serialization happens exactly once per dispatch call; every back-end
/// receives the same `Arc<str>`, so none of them pay to re-encode it.
/// Per-table and per-group filtering is each back-end's own responsibility
/// — the Dispatcher itself is filter-agnostic, it just fans out to
/// whichever back-ends are currently enabled.
pub struct Dispatcher {
    backends: Vec<Arc<dyn Backend>>,
}

impl Dispatcher {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self { backends }
    }

    pub async fn dispatch(&self, record: ChangeRecord) -> Result<(), ReError> {
        let json = record.to_json().map_err(|e| ReError::Error(e.to_string()))?;
        let serialized: Arc<str> = Arc::from(json.into_boxed_str());
        let record = Arc::new(record);
        debug!(table = %record.table, op = ?record.op, backends = self.backends.len(), "dispatching change record");
        for backend in &self.backends {
            backend.send_all(record.clone(), serialized.clone()).await;
        }
        Ok(())
    }
}
