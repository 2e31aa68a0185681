use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{stamp_monotonic, EventStore};
use crate::DetectionEvent;

/// SQLite-backed event log: one row per event, full record as JSON.
pub struct SqliteEventLog {
    conn: Mutex<Connection>,
}

impl SqliteEventLog {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create event db directory {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("open event db {}", db_path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detection_events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp_ms INTEGER NOT NULL,
              label TEXT NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_detection_events_ts ON detection_events(timestamp_ms);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("event db lock poisoned"))
    }
}

impl EventStore for SqliteEventLog {
    fn append(&self, event: DetectionEvent) -> Result<DetectionEvent> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let last_ms: Option<i64> = tx
            .query_row(
                "SELECT timestamp_ms FROM detection_events ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let event = stamp_monotonic(event, last_ms.map(|ms| ms.max(0) as u64));
        let timestamp_ms = i64::try_from(event.timestamp_ms)
            .map_err(|_| anyhow!("event timestamp exceeds i64 range"))?;
        let payload_json = serde_json::to_string(&event)?;

        tx.execute(
            "INSERT INTO detection_events(timestamp_ms, label, payload_json) VALUES (?1, ?2, ?3)",
            params![timestamp_ms, event.label, payload_json],
        )?;
        tx.commit()?;
        Ok(event)
    }

    fn latest(&self) -> Result<Option<DetectionEvent>> {
        let conn = self.conn()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload_json FROM detection_events ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|json| serde_json::from_str(&json).context("corrupt event row"))
            .transpose()
    }

    fn events(&self) -> Result<Vec<DetectionEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT payload_json FROM detection_events ORDER BY id ASC")?;
        let payloads = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut events = Vec::with_capacity(payloads.len());
        for json in payloads {
            match serde_json::from_str(&json) {
                Ok(event) => events.push(event),
                Err(err) => log::warn!("skipping unreadable event row: {}", err),
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventOrigin, LocationInfo};

    #[test]
    fn append_and_latest_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let log = SqliteEventLog::open(dir.path().join("events.db"))?;
        assert!(log.latest()?.is_none());

        let event = DetectionEvent::new("IllegalParking", EventOrigin::Stream)?
            .with_confidence(Some(0.75))
            .with_location(LocationInfo {
                city: Some("Pune".to_string()),
                ..LocationInfo::default()
            });
        let stored = log.append(event.clone())?;
        assert_eq!(stored, event);
        assert_eq!(log.latest()?, Some(event));
        Ok(())
    }

    #[test]
    fn timestamps_stay_monotonic() -> Result<()> {
        let log = SqliteEventLog::open_in_memory()?;
        let mut first = DetectionEvent::new("A", EventOrigin::Stream)?;
        first.timestamp_ms += 10_000;
        log.append(first.clone())?;
        let second = log.append(DetectionEvent::new("B", EventOrigin::Stream)?)?;
        assert_eq!(second.timestamp_ms, first.timestamp_ms);

        let events = log.events()?;
        assert_eq!(events.len(), 2);
        assert!(events.windows(2).all(|w| w[0].timestamp_ms <= w[1].timestamp_ms));
        Ok(())
    }

    #[test]
    fn reopen_keeps_events() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("events.db");
        SqliteEventLog::open(&path)?.append(DetectionEvent::new("Garbage", EventOrigin::Stream)?)?;
        let reopened = SqliteEventLog::open(&path)?;
        assert_eq!(reopened.events()?.len(), 1);
        Ok(())
    }
}
