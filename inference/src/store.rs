//! Alert record persistence

use crate::error::{AnomalyError, Result};
use crate::types::{AlertRecord, RecordId};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Stores alert records; every failure is `RecordPersistFailed`
pub trait AlertStore: Send + Sync {
    fn insert(&self, record: &AlertRecord) -> Result<RecordId>;
}

/// Append-only JSON-lines file, one record per line, synced after each write
pub struct JsonLinesAlertStore {
    path: PathBuf,
    state: Mutex<JsonLinesState>,
}

struct JsonLinesState {
    file: File,
    next_id: u64,
}

impl JsonLinesAlertStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                AnomalyError::record_persist(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let existing = match File::open(&path) {
            Ok(file) => BufReader::new(file)
                .lines()
                .map_while(|line| line.ok())
                .filter(|line| !line.trim().is_empty())
                .count() as u64,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(AnomalyError::record_persist(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AnomalyError::record_persist(format!("cannot open {}: {}", path.display(), e)))?;

        log::debug!("Alert store {} holds {} records", path.display(), existing);
        Ok(Self {
            path,
            state: Mutex::new(JsonLinesState {
                file,
                next_id: existing,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AlertStore for JsonLinesAlertStore {
    fn insert(&self, record: &AlertRecord) -> Result<RecordId> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| AnomalyError::record_persist(format!("cannot encode record: {}", e)))?;
        line.push('\n');

        let mut state = self
            .state
            .lock()
            .map_err(|_| AnomalyError::record_persist("alert store lock poisoned"))?;

        state
            .file
            .write_all(line.as_bytes())
            .and_then(|_| state.file.sync_data())
            .map_err(|e| AnomalyError::record_persist(format!("write to {} failed: {}", self.path.display(), e)))?;

        let id = RecordId(state.next_id);
        state.next_id += 1;
        Ok(id)
    }
}

/// In-process store for tests and embedding
#[derive(Default)]
pub struct MemoryAlertStore {
    records: Mutex<Vec<AlertRecord>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AlertRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertStore for MemoryAlertStore {
    fn insert(&self, record: &AlertRecord) -> Result<RecordId> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| AnomalyError::record_persist("memory store lock poisoned"))?;
        records.push(record.clone());
        Ok(RecordId(records.len() as u64 - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlertMetadata;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("crime_detector_store_{}_{}", std::process::id(), name))
    }

    fn record(score: f32) -> AlertRecord {
        AlertRecord::new(&AlertMetadata::default(), "local:clip".into(), false, score)
    }

    #[test]
    fn test_jsonl_ids_continue_after_reopen() {
        let path = scratch("reopen.jsonl");
        let _ = std::fs::remove_file(&path);

        {
            let store = JsonLinesAlertStore::open(&path).unwrap();
            assert_eq!(store.insert(&record(0.7)).unwrap(), RecordId(0));
            assert_eq!(store.insert(&record(0.8)).unwrap(), RecordId(1));
        }
        let store = JsonLinesAlertStore::open(&path).unwrap();
        assert_eq!(store.insert(&record(0.9)).unwrap(), RecordId(2));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<AlertRecord> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2].video_score, 0.9);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_unwritable_path_is_persist_error() {
        let dir = scratch("as_dir");
        std::fs::create_dir_all(&dir).unwrap();
        let err = JsonLinesAlertStore::open(&dir).err().unwrap();
        assert!(matches!(err, AnomalyError::RecordPersistFailed(_)));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryAlertStore::new();
        assert!(store.is_empty());
        assert_eq!(store.insert(&record(0.6)).unwrap(), RecordId(0));
        assert_eq!(store.insert(&record(0.6)).unwrap(), RecordId(1));
        assert_eq!(store.len(), 2);
    }
}
