//! SQLite-backed delivery store.
//! Stands in for a platform notification center on machines without one:
//! bounded pending entries, past dates refused, entries removed when fired.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tidings_core::config::DEFAULT_STORE_CEILING;
use tidings_core::error::{Result, TidingsError};

use crate::delivery::{DeliveryStore, check_admissible, records_from_native};
use crate::record::{NativeEntry, Record};

/// SQLite persistence for pending notifications.
pub struct SqliteDeliveryStore {
    conn: Mutex<Connection>,
    ceiling: usize,
}

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> TidingsError + '_ {
    move |e| TidingsError::store(format!("{context}: {e}"))
}

impl SqliteDeliveryStore {
    /// Open or create the delivery database.
    pub fn open(path: &Path, ceiling: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err("DB open"))?;
        Self::with_connection(conn, ceiling)
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("DB open"))?;
        Self::with_connection(conn, DEFAULT_STORE_CEILING)
    }

    fn with_connection(conn: Connection, ceiling: usize) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            ceiling,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS pending_notifications (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                identifier TEXT NOT NULL UNIQUE,
                alert_body TEXT NOT NULL,
                alert_action TEXT,
                fire_date TEXT NOT NULL,         -- RFC 3339, full precision
                fire_at_ms INTEGER NOT NULL,     -- for ordering and due checks
                repeat_interval TEXT NOT NULL DEFAULT 'none',
                user_info TEXT NOT NULL DEFAULT '{}'  -- JSON object
            );
            CREATE INDEX IF NOT EXISTS idx_pending_fire_at
                ON pending_notifications(fire_at_ms);
         ",
            )
            .map_err(db_err("Migration"))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TidingsError::store(format!("connection poisoned: {e}")))
    }

    fn read_entries(conn: &Connection, filter: &str, bound: Option<i64>) -> Result<Vec<NativeEntry>> {
        let sql = format!(
            "SELECT alert_body, alert_action, fire_date, repeat_interval, user_info, seq
             FROM pending_notifications {filter} ORDER BY seq"
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err("Prepare"))?;
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok::<_, rusqlite::Error>((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        };
        let rows = match bound {
            Some(b) => stmt.query_map([b], map_row),
            None => stmt.query_map([], map_row),
        }
        .map_err(db_err("Query"))?;

        let mut entries = Vec::new();
        let mut corrupt = Vec::new();
        for row in rows {
            let (alert_body, alert_action, fire_date, repeat, user_info, seq) =
                row.map_err(db_err("Row"))?;
            let fire_date = match DateTime::parse_from_rfc3339(&fire_date) {
                Ok(d) => d.with_timezone(&Utc),
                Err(e) => {
                    tracing::warn!("⚠️ Dropping row {seq} with bad fire_date '{fire_date}': {e}");
                    corrupt.push(seq);
                    continue;
                }
            };
            let user_info = serde_json::from_str(&user_info).unwrap_or_default();
            entries.push(NativeEntry {
                alert_body,
                alert_action,
                fire_date,
                repeat_interval: repeat.parse().unwrap_or_default(),
                user_info,
            });
        }
        // A row that cannot be read can never fire; remove it so it stops
        // holding a slot that `list` does not show.
        for seq in corrupt {
            conn.execute("DELETE FROM pending_notifications WHERE seq = ?1", [seq])
                .map_err(db_err("Drop corrupt row"))?;
        }
        Ok(entries)
    }

    /// Fire everything due at `now`: non-repeating entries are deleted,
    /// repeating entries advance to their next occurrence.
    pub fn fire_due(&self, now: DateTime<Utc>) -> Result<Vec<NativeEntry>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        let due = Self::read_entries(&tx, "WHERE fire_at_ms <= ?1", Some(now.timestamp_millis()))?;
        for entry in &due {
            let Some(id) = entry.identifier() else { continue };
            match entry.repeat_interval.advance(entry.fire_date) {
                Some(next) => {
                    tx.execute(
                        "UPDATE pending_notifications SET fire_date = ?1, fire_at_ms = ?2
                         WHERE identifier = ?3",
                        rusqlite::params![next.to_rfc3339(), next.timestamp_millis(), id],
                    )
                    .map_err(db_err("Advance"))?;
                }
                None => {
                    tx.execute(
                        "DELETE FROM pending_notifications WHERE identifier = ?1",
                        [id],
                    )
                    .map_err(db_err("Delete"))?;
                }
            }
        }
        tx.commit().map_err(db_err("Commit"))?;
        if !due.is_empty() {
            tracing::info!("🔔 Delivered {} notification(s)", due.len());
        }
        Ok(due)
    }
}

impl DeliveryStore for SqliteDeliveryStore {
    fn admit(&self, record: &Record) -> Result<()> {
        let entry = record.to_native()?;
        let conn = self.conn()?;
        let occupied: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pending_notifications WHERE identifier != ?1",
                [record.identifier()],
                |r| r.get(0),
            )
            .map_err(db_err("Count"))?;
        check_admissible(&entry, occupied as usize, self.ceiling, Utc::now())?;

        conn.execute(
            "INSERT OR REPLACE INTO pending_notifications
             (identifier, alert_body, alert_action, fire_date, fire_at_ms, repeat_interval, user_info)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.identifier(),
                entry.alert_body,
                entry.alert_action,
                entry.fire_date.to_rfc3339(),
                entry.fire_date.timestamp_millis(),
                entry.repeat_interval.to_string(),
                serde_json::Value::Object(entry.user_info).to_string(),
            ],
        )
        .map_err(db_err("Admit"))?;
        Ok(())
    }

    fn withdraw(&self, identifier: &str) -> Result<()> {
        self.conn()?
            .execute(
                "DELETE FROM pending_notifications WHERE identifier = ?1",
                [identifier],
            )
            .map_err(db_err("Withdraw"))?;
        Ok(())
    }

    fn withdraw_all(&self) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM pending_notifications", [])
            .map_err(db_err("Withdraw all"))?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<Record>> {
        let conn = self.conn()?;
        let entries = Self::read_entries(&conn, "", None)?;
        Ok(records_from_native(entries.iter()))
    }
}
