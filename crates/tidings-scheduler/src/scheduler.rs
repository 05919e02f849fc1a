//! Admission-controlled scheduler.
//!
//! Keeps the `capacity` nearest-due records admitted in the delivery store
//! and everything else in a fire-date ordered overflow queue. A new record
//! is admitted while there is room, displaces the farthest admitted record
//! when it is due strictly earlier, and is queued otherwise.
//!
//! Every entry point holds the queue lock for its whole decision, so the
//! read of store occupancy and the following admit/withdraw are atomic with
//! respect to other scheduler calls. Admitted state is never cached: the
//! store may fire or drop entries between calls.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tidings_core::config::SchedulerConfig;
use tidings_core::error::{Result, TidingsError};
use tokio::sync::Mutex;

use crate::delivery::DeliveryStore;
use crate::record::{NativeEntry, Record};
use crate::store::QueueStore;

/// Outcome of one admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Admitted into free capacity.
    Admitted,
    /// Admitted by evicting the farthest admitted record into the queue.
    Displaced { evicted: String },
    /// Deferred into the overflow queue.
    Queued,
}

impl Placement {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Placement::Queued)
    }
}

impl std::fmt::Display for Placement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Placement::Admitted => write!(f, "admitted"),
            Placement::Displaced { evicted } => write!(f, "admitted (evicted {evicted})"),
            Placement::Queued => write!(f, "queued"),
        }
    }
}

/// Where a record was found before it was taken out for re-placement.
enum Detached {
    Admitted(Record),
    Queued(Record),
}

/// The scheduler — owns the overflow queue and the admission policy.
pub struct Scheduler {
    capacity: usize,
    delivery: Arc<dyn DeliveryStore>,
    queue_store: Arc<dyn QueueStore>,
    queue: Mutex<VecDeque<Record>>,
}

impl Scheduler {
    /// Create a scheduler and restore the persisted overflow queue.
    ///
    /// Queued records that the store already holds are dropped, as are
    /// duplicates and records without a fire date.
    pub fn new(
        config: &SchedulerConfig,
        delivery: Arc<dyn DeliveryStore>,
        queue_store: Arc<dyn QueueStore>,
    ) -> Result<Self> {
        if config.capacity == 0 {
            return Err(TidingsError::config("scheduler capacity must be at least 1"));
        }

        let admitted: HashSet<String> = delivery
            .list()?
            .into_iter()
            .map(|r| r.identifier().to_string())
            .collect();
        let persisted = queue_store.load();
        let persisted_len = persisted.len();
        let mut seen = HashSet::new();
        let mut restored: Vec<Record> = persisted
            .into_iter()
            .filter(|r| r.fire_date.is_some())
            .filter(|r| !admitted.contains(r.identifier()))
            .filter(|r| seen.insert(r.identifier().to_string()))
            .collect();
        restored.sort_by_key(|r| r.fire_date);

        if restored.len() != persisted_len {
            tracing::info!(
                "🔄 Dropped {} stale queue entries on restore",
                persisted_len - restored.len()
            );
        }
        tracing::info!(
            "📅 Scheduler ready: capacity {}, {} admitted, {} queued",
            config.capacity,
            admitted.len(),
            restored.len()
        );

        Ok(Self {
            capacity: config.capacity,
            delivery,
            queue_store,
            queue: Mutex::new(restored.into()),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Schedule `record` at `fire_date`. Also used to re-schedule a record
    /// the scheduler already knows: its previous placement is replaced.
    pub async fn schedule(&self, mut record: Record, fire_date: DateTime<Utc>) -> Result<Placement> {
        record.fire_date = Some(fire_date);
        record.validate()?;

        let mut queue = self.queue.lock().await;
        let result = self.replace(&mut queue, record);
        self.persist(&queue);
        result
    }

    /// Cancel a record wherever it is. Unknown identifiers are ignored.
    ///
    /// Cancelling an admitted record promotes the queue head into the freed slot.
    pub async fn cancel(&self, identifier: &str) -> Result<()> {
        let mut queue = self.queue.lock().await;

        if self.is_admitted(identifier)? {
            self.delivery.withdraw(identifier)?;
            tracing::info!("🗑️ Cancelled admitted record {identifier}");
            let promoted = if self.delivery.count()? < self.capacity {
                self.promote_head(&mut queue).map(|_| ())
            } else {
                Ok(())
            };
            self.persist(&queue);
            return promoted;
        }

        match queue.iter().position(|r| r.identifier() == identifier) {
            Some(pos) => {
                queue.remove(pos);
                tracing::info!("🗑️ Cancelled queued record {identifier}");
                self.persist(&queue);
            }
            None => tracing::debug!("cancel: {identifier} is not scheduled"),
        }
        Ok(())
    }

    /// Withdraw everything from the store and drop the queue, in memory and on disk.
    pub async fn cancel_all(&self) -> Result<()> {
        let mut queue = self.queue.lock().await;
        self.delivery.withdraw_all()?;
        queue.clear();
        self.queue_store.clear()?;
        tracing::info!("🧹 Cancelled all notifications");
        Ok(())
    }

    /// Move a known record to `new_fire_date` and re-run admission.
    /// Returns `None` when the identifier is unknown.
    pub async fn reschedule(
        &self,
        identifier: &str,
        new_fire_date: DateTime<Utc>,
    ) -> Result<Option<Placement>> {
        let mut queue = self.queue.lock().await;
        let Some(mut record) = self.find(&queue, identifier)? else {
            return Ok(None);
        };
        record.fire_date = Some(new_fire_date);
        record.validate()?;
        let result = self.replace(&mut queue, record);
        self.persist(&queue);
        result.map(Some)
    }

    pub async fn snooze_for_minutes(&self, identifier: &str, minutes: i64) -> Result<Option<Placement>> {
        self.snooze(identifier, snooze_delta(TimeDelta::try_minutes(minutes), minutes, "minutes")?)
            .await
    }

    pub async fn snooze_for_hours(&self, identifier: &str, hours: i64) -> Result<Option<Placement>> {
        self.snooze(identifier, snooze_delta(TimeDelta::try_hours(hours), hours, "hours")?)
            .await
    }

    pub async fn snooze_for_days(&self, identifier: &str, days: i64) -> Result<Option<Placement>> {
        self.snooze(identifier, snooze_delta(TimeDelta::try_days(days), days, "days")?)
            .await
    }

    /// Push a record's fire date back by `delta`.
    ///
    /// A delta that moves the fire date out of range is rejected before the
    /// record's placement is touched.
    pub async fn snooze(&self, identifier: &str, delta: TimeDelta) -> Result<Option<Placement>> {
        let mut queue = self.queue.lock().await;
        let Some(mut record) = self.find(&queue, identifier)? else {
            return Ok(None);
        };
        let Some(old) = record.fire_date else {
            return Err(TidingsError::invalid_record(format!("{identifier} has no fire date")));
        };
        let Some(new_fire_date) = old.checked_add_signed(delta) else {
            return Err(TidingsError::invalid_record(format!(
                "snoozing {identifier} by {delta} overflows its fire date"
            )));
        };
        record.fire_date = Some(new_fire_date);
        let result = self.replace(&mut queue, record);
        self.persist(&queue);
        result.map(Some)
    }

    /// Backfill free capacity from the queue head. Used after the store
    /// freed slots on its own (fired or externally removed entries).
    /// Returns how many records were promoted.
    pub async fn schedule_from_queue(&self) -> Result<usize> {
        let mut queue = self.queue.lock().await;
        let mut promoted = 0;
        let outcome = loop {
            if queue.is_empty() {
                break Ok(());
            }
            match self.delivery.count() {
                Ok(count) if count < self.capacity => {}
                Ok(_) => break Ok(()),
                Err(e) => break Err(e),
            }
            match self.promote_head(&mut queue) {
                Ok(_) => promoted += 1,
                Err(e) => break Err(e),
            }
        };
        if promoted > 0 {
            tracing::info!("⬆️ Promoted {promoted} record(s) from the queue");
            self.persist(&queue);
        }
        outcome.map(|_| promoted)
    }

    /// Remove queued records whose fire date has passed; the store would
    /// refuse them. Returned so the caller can deliver them another way.
    pub async fn take_overdue(&self, now: DateTime<Utc>) -> Vec<Record> {
        let mut queue = self.queue.lock().await;
        let split = queue.partition_point(|r| r.fire_date.is_some_and(|d| d <= now));
        let overdue: Vec<Record> = queue.drain(..split).collect();
        if !overdue.is_empty() {
            tracing::info!("⏰ Took {} overdue record(s) off the queue", overdue.len());
            self.persist(&queue);
        }
        overdue
    }

    /// The admitted record with the latest fire date.
    pub async fn farthest_admitted(&self) -> Result<Option<Record>> {
        let _queue = self.queue.lock().await;
        Ok(farthest(self.delivery.list()?))
    }

    /// Find a record in the store, then in the queue.
    pub async fn lookup(&self, identifier: &str) -> Result<Option<Record>> {
        let queue = self.queue.lock().await;
        self.find(&queue, identifier)
    }

    /// Whether the record is admitted or queued.
    pub async fn is_scheduled(&self, identifier: &str) -> Result<bool> {
        Ok(self.lookup(identifier).await?.is_some())
    }

    /// Rebuild the record behind a native entry the store handed back.
    pub fn reconstruct_from_native(&self, entry: &NativeEntry) -> Result<Record> {
        Record::from_native(entry)
    }

    /// Admitted plus queued records.
    pub async fn count(&self) -> Result<usize> {
        let queue = self.queue.lock().await;
        Ok(self.delivery.count()? + queue.len())
    }

    pub async fn scheduled_count(&self) -> Result<usize> {
        let _queue = self.queue.lock().await;
        self.delivery.count()
    }

    pub async fn queued_count(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Admitted records ordered by fire date.
    pub async fn scheduled_records(&self) -> Result<Vec<Record>> {
        let _queue = self.queue.lock().await;
        let mut records = self.delivery.list()?;
        records.sort_by_key(|r| r.fire_date);
        Ok(records)
    }

    /// Snapshot of the overflow queue, nearest first.
    pub async fn queued_records(&self) -> Vec<Record> {
        self.queue.lock().await.iter().cloned().collect()
    }

    /// Persist the queue now, reporting failure to the caller.
    pub async fn save_queue(&self) -> Result<()> {
        let queue = self.queue.lock().await;
        let snapshot: Vec<Record> = queue.iter().cloned().collect();
        self.queue_store.save(&snapshot)
    }

    /// Read back the last persisted queue without touching the live one.
    pub fn load_queue(&self) -> Vec<Record> {
        self.queue_store.load()
    }

    // ─── Internals (queue lock held) ──────────────────────────

    /// Take any previous placement of `record` out, then place it. On
    /// failure the previous placement is put back.
    fn replace(&self, queue: &mut VecDeque<Record>, record: Record) -> Result<Placement> {
        let previous = self.detach(queue, record.identifier())?;
        match self.place(queue, record) {
            Ok(placement) => Ok(placement),
            Err(e) => {
                match previous {
                    Some(Detached::Admitted(old)) => {
                        if let Err(restore) = self.delivery.admit(&old) {
                            tracing::warn!(
                                "⚠️ Could not re-admit {} ({restore}), queueing it",
                                old.identifier()
                            );
                            enqueue(queue, old);
                        }
                    }
                    Some(Detached::Queued(old)) => enqueue(queue, old),
                    None => {}
                }
                Err(e)
            }
        }
    }

    /// The admission policy.
    fn place(&self, queue: &mut VecDeque<Record>, record: Record) -> Result<Placement> {
        if self.delivery.count()? < self.capacity {
            self.delivery.admit(&record)?;
            tracing::info!("📅 Admitted {} ({})", record.identifier(), fire_label(&record));
            return Ok(Placement::Admitted);
        }

        match farthest(self.delivery.list()?) {
            Some(far) if record.fire_date < far.fire_date => {
                self.delivery.withdraw(far.identifier())?;
                if let Err(e) = self.delivery.admit(&record) {
                    if let Err(restore) = self.delivery.admit(&far) {
                        tracing::warn!(
                            "⚠️ Could not re-admit evicted {} ({restore}), queueing it",
                            far.identifier()
                        );
                        enqueue(queue, far);
                    }
                    return Err(e);
                }
                let evicted = far.identifier().to_string();
                tracing::info!(
                    "🔀 Admitted {} ({}), evicted {evicted} to the queue",
                    record.identifier(),
                    fire_label(&record)
                );
                enqueue(queue, far);
                Ok(Placement::Displaced { evicted })
            }
            _ => {
                tracing::info!(
                    "📥 Queued {} ({}), queue length {}",
                    record.identifier(),
                    fire_label(&record),
                    queue.len() + 1
                );
                enqueue(queue, record);
                Ok(Placement::Queued)
            }
        }
    }

    fn detach(&self, queue: &mut VecDeque<Record>, identifier: &str) -> Result<Option<Detached>> {
        if let Some(record) = self
            .delivery
            .list()?
            .into_iter()
            .find(|r| r.identifier() == identifier)
        {
            self.delivery.withdraw(identifier)?;
            return Ok(Some(Detached::Admitted(record)));
        }
        Ok(queue
            .iter()
            .position(|r| r.identifier() == identifier)
            .and_then(|pos| queue.remove(pos))
            .map(Detached::Queued))
    }

    fn find(&self, queue: &VecDeque<Record>, identifier: &str) -> Result<Option<Record>> {
        if let Some(record) = self
            .delivery
            .list()?
            .into_iter()
            .find(|r| r.identifier() == identifier)
        {
            return Ok(Some(record));
        }
        Ok(queue.iter().find(|r| r.identifier() == identifier).cloned())
    }

    fn is_admitted(&self, identifier: &str) -> Result<bool> {
        Ok(self
            .delivery
            .list()?
            .iter()
            .any(|r| r.identifier() == identifier))
    }

    /// Admit the queue head. A refused head stays at the front.
    fn promote_head(&self, queue: &mut VecDeque<Record>) -> Result<Option<String>> {
        let Some(head) = queue.pop_front() else {
            return Ok(None);
        };
        match self.delivery.admit(&head) {
            Ok(()) => {
                tracing::info!("⬆️ Promoted {} ({})", head.identifier(), fire_label(&head));
                Ok(Some(head.identifier().to_string()))
            }
            Err(e) => {
                tracing::warn!("⚠️ Could not promote {}: {e}", head.identifier());
                queue.push_front(head);
                Err(e)
            }
        }
    }

    /// Save the queue; failure is logged, the in-memory queue stays authoritative.
    fn persist(&self, queue: &VecDeque<Record>) {
        let snapshot: Vec<Record> = queue.iter().cloned().collect();
        if let Err(e) = self.queue_store.save(&snapshot) {
            tracing::warn!("⚠️ Failed to save queue: {e}");
        }
    }
}

/// Insert after every record due at or before `record`, keeping ties in
/// insertion order.
fn enqueue(queue: &mut VecDeque<Record>, record: Record) {
    let pos = queue.partition_point(|r| r.fire_date <= record.fire_date);
    queue.insert(pos, record);
}

/// Latest fire date wins; among equal dates the last listed one.
fn snooze_delta(delta: Option<TimeDelta>, amount: i64, unit: &str) -> Result<TimeDelta> {
    delta.ok_or_else(|| TidingsError::invalid_record(format!("snooze of {amount} {unit} is out of range")))
}

fn farthest(records: Vec<Record>) -> Option<Record> {
    records.into_iter().max_by_key(|r| r.fire_date)
}

fn fire_label(record: &Record) -> String {
    record
        .fire_date
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| "unscheduled".into())
}
