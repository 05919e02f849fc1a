//! Overflow queue persistence.
//! The queue is saved as a JSON file — human-readable, replaced atomically.
//! Only written when the queue changes.

use std::path::{Path, PathBuf};

use tidings_core::config::TidingsConfig;
use tidings_core::error::{Result, TidingsError};

use crate::record::Record;

const QUEUE_FILE: &str = "queue.json";

/// Durable copy of the scheduler's overflow queue.
pub trait QueueStore: Send + Sync {
    /// Replace the persisted queue with `records`.
    fn save(&self, records: &[Record]) -> Result<()>;

    /// Last saved queue. Empty when nothing was saved or the copy is unreadable.
    fn load(&self) -> Vec<Record>;

    /// Delete the persisted queue.
    fn clear(&self) -> Result<()>;
}

/// File-based queue store.
pub struct JsonQueueStore {
    path: PathBuf,
}

impl JsonQueueStore {
    /// Create a queue store in the given directory.
    pub fn new(dir: &Path) -> Self {
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!("⚠️ Failed to create queue dir {}: {e}", dir.display());
        }
        Self {
            path: dir.join(QUEUE_FILE),
        }
    }

    /// Default store directory (~/.tidings).
    pub fn default_path() -> PathBuf {
        TidingsConfig::home_dir()
    }

    pub fn file_path(&self) -> &Path {
        &self.path
    }
}

impl QueueStore for JsonQueueStore {
    fn save(&self, records: &[Record]) -> Result<()> {
        let json = serde_json::to_string_pretty(records)
            .map_err(|e| TidingsError::persistence(format!("Serialize error: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)
            .map_err(|e| TidingsError::persistence(format!("Write error: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| TidingsError::persistence(format!("Rename error: {e}")))?;
        tracing::debug!("💾 Saved {} queued records to {}", records.len(), self.path.display());
        Ok(())
    }

    fn load(&self) -> Vec<Record> {
        if !self.path.exists() {
            return Vec::new();
        }
        let mut records: Vec<Record> = match std::fs::read_to_string(&self.path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("⚠️ Failed to parse {}: {e}", self.path.display());
                Vec::new()
            }),
            Err(e) => {
                tracing::warn!("⚠️ Failed to read {}: {e}", self.path.display());
                Vec::new()
            }
        };
        for record in &mut records {
            record.ensure_identifier_key();
        }
        records
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TidingsError::persistence(format!("Remove error: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn queued(body: &str, in_hours: i64) -> Record {
        let mut record = Record::new(body);
        record.fire_date = Some(Utc::now() + chrono::Duration::hours(in_hours));
        record
    }

    #[test]
    fn test_load_without_save_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonQueueStore::new(dir.path());
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonQueueStore::new(dir.path());
        let records: Vec<Record> = (1..=39).map(|i| queued(&format!("test #{i}"), i)).collect();
        store.save(&records).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.len(), 39);
        for (a, b) in records.iter().zip(&loaded) {
            assert_eq!(a.identifier(), b.identifier());
            assert_eq!(a.alert_body, b.alert_body);
            assert_eq!(a.fire_date, b.fire_date);
        }
    }

    #[test]
    fn test_save_replaces_previous_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonQueueStore::new(dir.path());
        store.save(&[queued("a", 1), queued("b", 2)]).unwrap();
        store.save(&[queued("c", 3)]).unwrap();
        let loaded = store.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].alert_body, "c");
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonQueueStore::new(dir.path());
        std::fs::write(store.file_path(), "{ not a queue").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonQueueStore::new(dir.path());
        store.save(&[queued("a", 1)]).unwrap();
        store.clear().unwrap();
        assert!(!store.file_path().exists());
        assert!(store.load().is_empty());
        // Clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_save_into_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonQueueStore::new(&dir.path().join("q"));
        std::fs::remove_dir_all(dir.path().join("q")).unwrap();
        assert!(matches!(
            store.save(&[queued("a", 1)]),
            Err(TidingsError::Persistence(_))
        ));
    }
}
