use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{stamp_monotonic, EventStore};
use crate::DetectionEvent;

/// Event log kept as a single JSON array on disk.
///
/// The file is rewritten in full on every append (temp file + rename), so a
/// crash or failed write leaves the previous contents intact. Unreadable
/// content is treated as an empty log and replaced on the next append. Array
/// entries that are not events (written by other tools) are kept but skipped.
pub struct JsonFileEventLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileEventLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create event log directory {}", parent.display()))?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<Vec<Value>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("read event log {}", self.path.display())))
            }
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        match serde_json::from_slice::<Value>(&raw) {
            Ok(Value::Array(entries)) => Ok(entries),
            Ok(_) => {
                log::warn!(
                    "event log {} is not a JSON array; reinitializing",
                    self.path.display()
                );
                Ok(Vec::new())
            }
            Err(err) => {
                log::warn!(
                    "event log {} is malformed ({}); reinitializing",
                    self.path.display(),
                    err
                );
                Ok(Vec::new())
            }
        }
    }

    fn read_events(&self) -> Result<Vec<DetectionEvent>> {
        Ok(self
            .read_entries()?
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))
    }
}

impl EventStore for JsonFileEventLog {
    fn append(&self, event: DetectionEvent) -> Result<DetectionEvent> {
        let _guard = self.lock()?;
        let mut entries = self.read_entries()?;
        let last_ms = entries
            .iter()
            .rev()
            .find_map(|entry| serde_json::from_value::<DetectionEvent>(entry.clone()).ok())
            .map(|last| last.timestamp_ms);
        let event = stamp_monotonic(event, last_ms);
        entries.push(serde_json::to_value(&event)?);

        let data = serde_json::to_vec_pretty(&entries)?;
        if let Err(err) = write_atomic(&self.path, &data) {
            log::error!("event log {} write failed: {:#}", self.path.display(), err);
            return Err(err);
        }
        Ok(event)
    }

    fn latest(&self) -> Result<Option<DetectionEvent>> {
        let _guard = self.lock()?;
        Ok(self.read_events()?.pop())
    }

    fn events(&self) -> Result<Vec<DetectionEvent>> {
        let _guard = self.lock()?;
        self.read_events()
    }
}

pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("create {}", tmp_path.display()))?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("rename {} to {}", tmp_path.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventOrigin;

    fn event(label: &str) -> DetectionEvent {
        DetectionEvent::new(label, EventOrigin::SingleShot).unwrap()
    }

    #[test]
    fn absent_file_is_empty_and_first_append_creates_it() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let log = JsonFileEventLog::open(dir.path().join("nested/events.json"))?;
        assert!(log.events()?.is_empty());
        assert!(log.latest()?.is_none());

        log.append(event("Garbage"))?;
        assert!(log.path().exists());
        let on_disk: Value = serde_json::from_slice(&fs::read(log.path())?)?;
        assert_eq!(on_disk.as_array().map(Vec::len), Some(1));
        Ok(())
    }

    #[test]
    fn malformed_and_non_array_content_self_heals() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("events.json");
        let cases: [&[u8]; 6] = [
            b"{not json",
            b"{\"label\": \"x\"}",
            b"[{\"timestamp_ms\": 1,",
            b"",
            b"  \n",
            &[0xff, 0xfe, 0x5b, 0x80, 0x5d],
        ];
        for garbage in cases {
            fs::write(&path, garbage)?;
            let log = JsonFileEventLog::open(&path)?;
            assert!(log.events()?.is_empty(), "content {garbage:?}");
            log.append(event("FallenTrees"))?;
            assert_eq!(log.events()?.len(), 1, "content {garbage:?}");
        }
        Ok(())
    }

    #[test]
    fn foreign_entries_survive_appends() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("events.json");
        fs::write(
            &path,
            r#"[{"note": "written by hand"}, {"timestamp_ms": 5, "label": "Garbage"}]"#,
        )?;
        let log = JsonFileEventLog::open(&path)?;
        assert_eq!(log.events()?.len(), 1);

        log.append(event("Graffitti"))?;
        let raw: Vec<Value> = serde_json::from_slice(&fs::read(&path)?)?;
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[0]["note"], "written by hand");
        assert_eq!(
            log.latest()?.map(|e| e.label),
            Some("Graffitti".to_string())
        );
        Ok(())
    }

    #[test]
    fn timestamps_never_go_backwards() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("events.json");
        let future_ms = crate::now_ms()? + 60_000;
        fs::write(
            &path,
            format!(r#"[{{"timestamp_ms": {future_ms}, "label": "Garbage"}}]"#),
        )?;
        let log = JsonFileEventLog::open(&path)?;
        let stored = log.append(event("Garbage"))?;
        assert_eq!(stored.timestamp_ms, future_ms);
        Ok(())
    }

    #[test]
    fn failed_write_leaves_previous_contents() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("events.json");
        let log = JsonFileEventLog::open(&path)?;
        log.append(event("Garbage"))?;

        // A directory where the temp file should go makes the write fail.
        fs::create_dir(path.with_extension("tmp"))?;
        assert!(log.append(event("FallenTrees")).is_err());
        assert_eq!(log.events()?.len(), 1);
        Ok(())
    }
}
