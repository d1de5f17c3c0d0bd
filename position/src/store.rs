use std::path::{Path, PathBuf};
use std::sync::Mutex;

use common::err::ReError;
use common::model::position::Position;
use tracing::debug;

/// Owns the authoritative binlog cursor on disk.
///
/// `save` is only ever called by the current leader and persists via
/// write-temp-then-rename so a crash mid-write never corrupts the last good
/// position. `apply_remote` is called on followers as the Coordinator's
/// position watch fires, keeping a warm on-disk copy so a newly elected
/// leader can promote without waiting on a KV round-trip.
pub struct PositionStore {
    path: PathBuf,
    last: Mutex<Option<Position>>,
}

impl PositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: Mutex::new(None),
        }
    }

    /// Reads the local file, if any. `Ok(None)` means no position has ever
    /// been persisted here — the caller falls back to the Coordinator's
    /// replicated copy, and failing that, MySQL's current master status.
    pub async fn load(&self) -> Result<Option<Position>, ReError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ReError::IoError(e)),
        };
        let position = Position::decode(&bytes)?;
        *self.last.lock().unwrap() = Some(position.clone());
        Ok(Some(position))
    }

    /// Persists `position` atomically. Only valid on the leader; the
    /// invariant that successive calls are non-decreasing in `(file,
    /// offset)` is the caller's (Binlog Consumer's) responsibility to
    /// uphold, since `PositionStore` has no way to observe MySQL's
    /// coordinate ordering on its own.
    pub async fn save(&self, position: &Position) -> Result<(), ReError> {
        write_atomic(&self.path, &position.encode()).await?;
        *self.last.lock().unwrap() = Some(position.clone());
        debug!(file = %position.file, offset = position.offset, "position saved");
        Ok(())
    }

    /// Applied by followers on `OnPositionChanged`. Mirrors the leader's
    /// persisted position onto local disk so this follower can promote to
    /// leader without an extra KV read.
    pub async fn apply_remote(&self, bytes: &[u8]) -> Result<(), ReError> {
        let position = Position::decode(bytes)?;
        write_atomic(&self.path, bytes).await?;
        *self.last.lock().unwrap() = Some(position);
        Ok(())
    }

    /// The last position this store has seen, from either `save` or
    /// `apply_remote`, without touching disk.
    pub fn cached(&self) -> Option<Position> {
        self.last.lock().unwrap().clone()
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ReError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("position"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("position"));
        let position = Position::new("mysql-bin.000001", 4, 1);
        store.save(&position).await.unwrap();

        let reloaded = PositionStore::new(dir.path().join("position"));
        assert_eq!(reloaded.load().await.unwrap(), Some(position));
    }

    #[tokio::test]
    async fn apply_remote_updates_cache_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("position"));
        let position = Position::new("mysql-bin.000002", 1024, 0);
        store.apply_remote(&position.encode()).await.unwrap();
        assert_eq!(store.cached(), Some(position.clone()));

        let reloaded = PositionStore::new(dir.path().join("position"));
        assert_eq!(reloaded.load().await.unwrap(), Some(position));
    }

    #[tokio::test]
    async fn save_is_atomic_no_partial_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("position");
        let store = PositionStore::new(&path);
        store.save(&Position::new("mysql-bin.000001", 4, 0)).await.unwrap();
        assert!(!path.with_extension("tmp").exists());
    }
}
