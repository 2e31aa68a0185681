//! Append-only event log.
//!
//! Every backend implements `EventStore` and serializes appends internally, so
//! the stream worker and foreground calls can share one store through an `Arc`.
//! Appends stamp the event so timestamps never decrease in insertion order.

mod json;
mod sqlite;

use anyhow::{anyhow, Result};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::DetectionEvent;

pub(crate) use json::write_atomic;
pub use json::JsonFileEventLog;
pub use sqlite::SqliteEventLog;

pub trait EventStore: Send + Sync {
    /// Append an event and return it as stored (with its final timestamp).
    fn append(&self, event: DetectionEvent) -> Result<DetectionEvent>;

    /// Most recently appended event.
    fn latest(&self) -> Result<Option<DetectionEvent>>;

    /// All events in insertion order.
    fn events(&self) -> Result<Vec<DetectionEvent>>;
}

/// Keep `timestamp_ms` from going backwards relative to the previous entry.
pub(crate) fn stamp_monotonic(mut event: DetectionEvent, last_ms: Option<u64>) -> DetectionEvent {
    if let Some(last_ms) = last_ms {
        event.timestamp_ms = event.timestamp_ms.max(last_ms);
    }
    event
}

/// Event log backend selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Json,
    Sqlite,
    Memory,
}

impl StoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreKind::Json => "json",
            StoreKind::Sqlite => "sqlite",
            StoreKind::Memory => "memory",
        }
    }
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(StoreKind::Json),
            "sqlite" => Ok(StoreKind::Sqlite),
            "memory" => Ok(StoreKind::Memory),
            other => Err(anyhow!(
                "unknown store kind {:?} (expected json, sqlite or memory)",
                other
            )),
        }
    }
}

/// Open the configured backend.
pub fn open_store(kind: StoreKind, path: &Path) -> Result<Arc<dyn EventStore>> {
    let store: Arc<dyn EventStore> = match kind {
        StoreKind::Json => Arc::new(JsonFileEventLog::open(path)?),
        StoreKind::Sqlite => Arc::new(SqliteEventLog::open(path)?),
        StoreKind::Memory => Arc::new(InMemoryEventLog::new()),
    };
    log::info!("event store: {} at {}", kind.as_str(), path.display());
    Ok(store)
}

/// In-memory event log for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryEventLog {
    events: Mutex<Vec<DetectionEvent>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventStore for InMemoryEventLog {
    fn append(&self, event: DetectionEvent) -> Result<DetectionEvent> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        let event = stamp_monotonic(event, events.last().map(|e| e.timestamp_ms));
        events.push(event.clone());
        Ok(event)
    }

    fn latest(&self) -> Result<Option<DetectionEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        Ok(events.last().cloned())
    }

    fn events(&self) -> Result<Vec<DetectionEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        Ok(events.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventOrigin;

    fn event_at(label: &str, timestamp_ms: u64) -> DetectionEvent {
        DetectionEvent {
            timestamp_ms,
            ..DetectionEvent::new(label, EventOrigin::Stream).unwrap()
        }
    }

    #[test]
    fn in_memory_appends_in_order_and_stamps_monotonic() -> Result<()> {
        let log = InMemoryEventLog::new();
        assert!(log.latest()?.is_none());
        log.append(event_at("A", 2_000))?;
        let stored = log.append(event_at("B", 1_000))?;
        assert_eq!(stored.timestamp_ms, 2_000);
        assert_eq!(log.latest()?.map(|e| e.label), Some("B".to_string()));
        assert_eq!(log.len(), 2);
        Ok(())
    }

    #[test]
    fn store_kind_parses() -> Result<()> {
        assert_eq!("JSON".parse::<StoreKind>()?, StoreKind::Json);
        assert_eq!(" sqlite ".parse::<StoreKind>()?, StoreKind::Sqlite);
        assert_eq!("memory".parse::<StoreKind>()?, StoreKind::Memory);
        assert!("redis".parse::<StoreKind>().is_err());
        Ok(())
    }

    #[test]
    fn open_store_builds_each_backend() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for (kind, file) in [
            (StoreKind::Json, "events.json"),
            (StoreKind::Sqlite, "events.db"),
            (StoreKind::Memory, "unused"),
        ] {
            let store = open_store(kind, &dir.path().join(file))?;
            store.append(event_at("Garbage", 5))?;
            assert_eq!(store.events()?.len(), 1, "{}", kind.as_str());
        }
        Ok(())
    }
}
