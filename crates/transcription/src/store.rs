//! JSON-file-per-record operation store.
//!
//! Each record is written as a whole-file overwrite through a temp
//! file and an atomic rename, so a crash mid-write leaves at most one
//! stale or missing record, never a corrupted mixed one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::{Result, TranscriptionError};
use crate::record::{OperationRecord, RECORD_SCHEMA_VERSION};

pub struct OperationStore {
    dir: PathBuf,
}

impl OperationStore {
    /// Opens (and creates if needed) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, operation_id: &str) -> PathBuf {
        self.dir.join(format!("{operation_id}.json"))
    }

    /// Persists a record, replacing any previous version atomically.
    pub fn save(&self, record: &OperationRecord) -> Result<()> {
        let path = self.path_for(&record.operation_id);
        let tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(tmp.as_file(), record).map_err(|e| {
            TranscriptionError::InvalidRecord {
                path: path.display().to_string(),
                message: e.to_string(),
            }
        })?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Loads a record by id. `Ok(None)` when no such record exists.
    pub fn load(&self, operation_id: &str) -> Result<Option<OperationRecord>> {
        let path = self.path_for(operation_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        parse_record(&raw, &path).map(Some)
    }

    /// Deletes a record. Idempotent: a missing record is not an error.
    pub fn delete(&self, operation_id: &str) -> Result<()> {
        match fs::remove_file(self.path_for(operation_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists records for one episode, sorted by chunk index with
    /// unknown indexes last, so resumption processes chunks in their
    /// original order.
    ///
    /// Unparseable files are logged and skipped: one corrupt record
    /// must never block listing the others.
    pub fn list_pending(&self, episode_id: &str) -> Result<Vec<OperationRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = match fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match parse_record(&raw, &path) {
                Ok(record) if record.episode_id == episode_id => records.push(record),
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable operation record");
                }
            }
        }
        records.sort_by_key(|r| r.chunk_index.unwrap_or(usize::MAX));
        Ok(records)
    }
}

fn parse_record(raw: &str, path: &Path) -> Result<OperationRecord> {
    let record: OperationRecord =
        serde_json::from_str(raw).map_err(|e| TranscriptionError::InvalidRecord {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    if record.schema_version != RECORD_SCHEMA_VERSION {
        return Err(TranscriptionError::InvalidRecord {
            path: path.display().to_string(),
            message: format!(
                "unsupported schema version {} (expected {})",
                record.schema_version, RECORD_SCHEMA_VERSION
            ),
        });
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkWindow;
    use crate::record::OperationState;
    use crate::remote::OperationHandle;

    fn record(episode: &str, index: usize) -> OperationRecord {
        OperationRecord::new(
            episode,
            &ChunkWindow {
                index,
                start_ms: index as u64 * 500_000,
                end_ms: index as u64 * 500_000 + 600_000,
            },
            3,
            OperationHandle(format!("remote-{index}")),
        )
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = OperationStore::new(dir.path()).unwrap();

        let rec = record("ep1", 0);
        store.save(&rec).unwrap();

        let loaded = store.load(&rec.operation_id).unwrap().unwrap();
        assert_eq!(loaded.operation_id, rec.operation_id);
        assert_eq!(loaded.state, OperationState::Pending);
        assert_eq!(loaded.chunk_index, Some(0));
        assert_eq!(loaded.remote_handle, rec.remote_handle);
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = OperationStore::new(dir.path()).unwrap();
        assert!(store.load("nope").unwrap().is_none());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = OperationStore::new(dir.path()).unwrap();

        let rec = record("ep1", 0);
        store.save(&rec).unwrap();
        store.delete(&rec.operation_id).unwrap();
        store.delete(&rec.operation_id).unwrap();
        assert!(store.load(&rec.operation_id).unwrap().is_none());
    }

    #[test]
    fn list_pending_scopes_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let store = OperationStore::new(dir.path()).unwrap();

        store.save(&record("ep1", 2)).unwrap();
        store.save(&record("ep1", 0)).unwrap();
        store.save(&record("ep2", 1)).unwrap();
        let mut unknown = record("ep1", 1);
        unknown.chunk_index = None;
        store.save(&unknown).unwrap();

        let listed = store.list_pending("ep1").unwrap();
        let indexes: Vec<Option<usize>> = listed.iter().map(|r| r.chunk_index).collect();
        assert_eq!(indexes, vec![Some(0), Some(2), None]);
    }

    #[test]
    fn corrupt_file_is_skipped_in_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = OperationStore::new(dir.path()).unwrap();

        store.save(&record("ep1", 0)).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(
            dir.path().join("bad-state.json"),
            r#"{"schema_version":1,"operation_id":"x","episode_id":"ep1","chunk_index":1,"chunk_start_ms":0,"chunk_end_ms":1,"total_chunks":1,"remote_handle":"h","state":"exploded","created_at":"2026-01-01T00:00:00Z","completed_at":null,"error":null,"result_ref":null}"#,
        )
        .unwrap();

        let listed = store.list_pending("ep1").unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn unknown_schema_version_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = OperationStore::new(dir.path()).unwrap();

        let mut rec = record("ep1", 0);
        rec.schema_version = 99;
        store.save(&rec).unwrap();

        assert!(matches!(
            store.load(&rec.operation_id),
            Err(TranscriptionError::InvalidRecord { .. })
        ));
    }
}
