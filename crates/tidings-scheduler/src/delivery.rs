//! Delivery store adapter — the only source of truth for admitted records.
//!
//! The external store (OS notification center, local daemon, ...) holds a
//! bounded number of pending entries and fires them on its own schedule.
//! The scheduler never caches what is admitted: every decision re-queries
//! the store through this trait.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tidings_core::config::DEFAULT_STORE_CEILING;
use tidings_core::error::{Result, TidingsError};

use crate::record::{NativeEntry, Record};

/// Capacity-limited store of pending notifications.
pub trait DeliveryStore: Send + Sync {
    /// Submit a record. Capacity is the caller's concern; the store only
    /// refuses requests it cannot honor.
    fn admit(&self, record: &Record) -> Result<()>;

    /// Remove the entry with this identifier. No-op if absent.
    fn withdraw(&self, identifier: &str) -> Result<()>;

    /// Remove every pending entry.
    fn withdraw_all(&self) -> Result<()>;

    /// Every admitted record, in no guaranteed order.
    fn list(&self) -> Result<Vec<Record>>;

    /// Number of admitted records.
    fn count(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }
}

/// Rebuild records from native entries, skipping entries this scheduler
/// did not create.
pub(crate) fn records_from_native<'a>(
    entries: impl IntoIterator<Item = &'a NativeEntry>,
) -> Vec<Record> {
    entries
        .into_iter()
        .filter_map(|entry| match Record::from_native(entry) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!("Skipping foreign delivery entry: {e}");
                None
            }
        })
        .collect()
}

/// Checks shared by the local store implementations.
pub(crate) fn check_admissible(
    entry: &NativeEntry,
    occupied: usize,
    ceiling: usize,
    now: DateTime<Utc>,
) -> Result<()> {
    if entry.fire_date <= now {
        return Err(TidingsError::rejected(format!(
            "fire date {} is not in the future",
            entry.fire_date.to_rfc3339()
        )));
    }
    if occupied >= ceiling {
        return Err(TidingsError::rejected(format!(
            "store holds {occupied} entries, ceiling is {ceiling}"
        )));
    }
    Ok(())
}

/// In-process delivery store.
///
/// Behaves like a platform notification center: a hard ceiling on pending
/// entries, past fire dates refused, entries disappear when they fire.
pub struct MemoryDeliveryStore {
    entries: Mutex<Vec<NativeEntry>>,
    ceiling: usize,
    reject_past: bool,
}

impl MemoryDeliveryStore {
    pub fn new() -> Self {
        Self::with_ceiling(DEFAULT_STORE_CEILING)
    }

    pub fn with_ceiling(ceiling: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            ceiling,
            reject_past: true,
        }
    }

    /// Accept fire dates in the past (useful for replaying old data).
    pub fn allow_past(mut self) -> Self {
        self.reject_past = false;
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<NativeEntry>>> {
        self.entries
            .lock()
            .map_err(|e| TidingsError::store(format!("memory store poisoned: {e}")))
    }

    /// Insert a native entry as-is, bypassing admission checks. Models
    /// entries created by other apps or by an earlier process.
    pub fn insert_native(&self, entry: NativeEntry) -> Result<()> {
        self.lock()?.push(entry);
        Ok(())
    }

    /// Snapshot of the raw native entries.
    pub fn native_entries(&self) -> Result<Vec<NativeEntry>> {
        Ok(self.lock()?.clone())
    }

    /// Fire everything due at `now`. Non-repeating entries are removed,
    /// repeating ones move to their next occurrence. Returns what fired.
    pub fn fire_due(&self, now: DateTime<Utc>) -> Result<Vec<NativeEntry>> {
        let mut entries = self.lock()?;
        let mut fired = Vec::new();
        entries.retain_mut(|entry| {
            if entry.fire_date > now {
                return true;
            }
            fired.push(entry.clone());
            match entry.repeat_interval.advance(entry.fire_date) {
                Some(next) => {
                    entry.fire_date = next;
                    true
                }
                None => false,
            }
        });
        if !fired.is_empty() {
            tracing::debug!("🔔 Memory store fired {} entries", fired.len());
        }
        Ok(fired)
    }
}

impl Default for MemoryDeliveryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryStore for MemoryDeliveryStore {
    fn admit(&self, record: &Record) -> Result<()> {
        let entry = record.to_native()?;
        let mut entries = self.lock()?;
        let occupied = entries
            .iter()
            .filter(|e| e.identifier() != Some(record.identifier()))
            .count();
        if self.reject_past {
            check_admissible(&entry, occupied, self.ceiling, Utc::now())?;
        } else if occupied >= self.ceiling {
            return Err(TidingsError::rejected(format!(
                "store holds {occupied} entries, ceiling is {}",
                self.ceiling
            )));
        }
        entries.retain(|e| e.identifier() != Some(record.identifier()));
        entries.push(entry);
        Ok(())
    }

    fn withdraw(&self, identifier: &str) -> Result<()> {
        self.lock()?.retain(|e| e.identifier() != Some(identifier));
        Ok(())
    }

    fn withdraw_all(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    fn list(&self) -> Result<Vec<Record>> {
        let entries = self.lock()?;
        Ok(records_from_native(entries.iter()))
    }

    fn count(&self) -> Result<usize> {
        let entries = self.lock()?;
        Ok(entries.iter().filter(|e| e.identifier().is_some()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RepeatInterval;

    fn scheduled(body: &str, in_hours: i64) -> Record {
        let mut record = Record::new(body);
        record.fire_date = Some(Utc::now() + chrono::Duration::hours(in_hours));
        record
    }

    #[test]
    fn test_admit_list_withdraw() {
        let store = MemoryDeliveryStore::new();
        let a = scheduled("a", 1);
        let b = scheduled("b", 2);
        store.admit(&a).unwrap();
        store.admit(&b).unwrap();
        assert_eq!(store.count().unwrap(), 2);

        store.withdraw(a.identifier()).unwrap();
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].identifier(), b.identifier());

        // Unknown identifiers are ignored
        store.withdraw("missing").unwrap();
        assert_eq!(store.count().unwrap(), 1);

        store.withdraw_all().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_rejects_past_and_unscheduled() {
        let store = MemoryDeliveryStore::new();
        let past = scheduled("late", -1);
        assert!(matches!(store.admit(&past), Err(TidingsError::AdapterRejected(_))));
        assert!(matches!(
            store.admit(&Record::new("no date")),
            Err(TidingsError::InvalidRecord(_))
        ));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_ceiling() {
        let store = MemoryDeliveryStore::with_ceiling(2);
        store.admit(&scheduled("1", 1)).unwrap();
        store.admit(&scheduled("2", 1)).unwrap();
        assert!(matches!(
            store.admit(&scheduled("3", 1)),
            Err(TidingsError::AdapterRejected(_))
        ));
    }

    #[test]
    fn test_readmit_replaces_entry() {
        let store = MemoryDeliveryStore::with_ceiling(1);
        let mut record = scheduled("a", 1);
        store.admit(&record).unwrap();
        record.fire_date = Some(Utc::now() + chrono::Duration::hours(3));
        store.admit(&record).unwrap();
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].fire_date, record.fire_date);
    }

    #[test]
    fn test_foreign_entries_are_skipped() {
        let store = MemoryDeliveryStore::new();
        store
            .insert_native(NativeEntry {
                alert_body: "other app".into(),
                alert_action: None,
                fire_date: Utc::now() + chrono::Duration::hours(1),
                repeat_interval: RepeatInterval::None,
                user_info: serde_json::Map::new(),
            })
            .unwrap();
        store.admit(&scheduled("ours", 1)).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_fire_due() {
        let store = MemoryDeliveryStore::new().allow_past();
        let once = scheduled("once", -1);
        let daily = scheduled("daily", -1).with_repeat(RepeatInterval::Daily);
        let later = scheduled("later", 5);
        store.admit(&once).unwrap();
        store.admit(&daily).unwrap();
        store.admit(&later).unwrap();

        let fired = store.fire_due(Utc::now()).unwrap();
        assert_eq!(fired.len(), 2);

        let remaining = store.list().unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|r| r.identifier() != once.identifier()));
        let advanced = remaining
            .iter()
            .find(|r| r.identifier() == daily.identifier())
            .unwrap();
        assert_eq!(
            advanced.fire_date,
            daily.fire_date.map(|d| d + chrono::Duration::days(1))
        );
    }
}
