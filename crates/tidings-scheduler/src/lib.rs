//! # Tidings Scheduler
//!
//! Admission-controlled scheduling of notifications into a delivery store
//! that can hold only a bounded number of pending entries.
//!
//! ## Architecture
//! ```text
//! Scheduler (one lock per instance)
//!   ├── schedule(record, at)
//!   │     ├── store has room        → admit
//!   │     ├── nearer than farthest  → evict farthest to queue, admit
//!   │     └── otherwise             → queue (sorted by fire date)
//!   ├── cancel / reschedule / snooze → re-run the policy, backfill from queue
//!   └── after every change → QueueStore.save (queue.json)
//!
//! DeliveryStore (source of truth for admitted records)
//!   ├── MemoryDeliveryStore  — in-process, tests and dry runs
//!   └── SqliteDeliveryStore  — local pending_notifications table
//! ```

pub mod delivery;
pub mod persistence;
pub mod record;
pub mod scheduler;
pub mod store;

pub use delivery::{DeliveryStore, MemoryDeliveryStore};
pub use persistence::SqliteDeliveryStore;
pub use record::{IDENTIFIER_KEY, NativeEntry, Record, RepeatInterval};
pub use scheduler::{Placement, Scheduler};
pub use store::{JsonQueueStore, QueueStore};
