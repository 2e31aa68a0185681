//! Issue Sentinel
//!
//! This crate turns raw per-frame image classifications into durable,
//! de-duplicated detection events.
//!
//! # Architecture
//!
//! Two paths feed the same event log:
//!
//! 1. **Stream path**: a single background worker reads frames from a camera,
//!    classifies each one and passes the label through a stability debouncer.
//!    A label must persist for the stability window before exactly one event is
//!    recorded for that episode.
//! 2. **Single-shot path**: one uploaded image is decoded, classified and
//!    recorded immediately. The issue-routing variant also maps the label to a
//!    responsible department.
//!
//! # Module Structure
//!
//! - `frame`: decoded RGB frames, downscaling and JPEG encoding
//! - `ingest`: frame sources (synthetic camera, image replay, V4L2)
//! - `classify`: classifier seam, output normalization, routing table
//! - `debounce`: stability state machine
//! - `stream`: worker lifecycle (start/stop, single session)
//! - `store`: event log backends (JSON file, SQLite, memory)
//! - `location`, `preview`, `recorder`: best-effort enrichment and emission
//! - `service`: the operations exposed to callers
//! - Core types: DetectionEvent, LocationInfo, EventOrigin

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod classify;
pub mod config;
pub mod debounce;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod location;
pub mod preview;
pub mod recorder;
pub mod service;
pub mod store;
pub mod stream;

pub use classify::{
    route, shared, Classifier, ClassifierOutput, Prediction, SharedClassifier, StubClassifier,
    DEFAULT_LABELS, UNASSIGNED_DEPARTMENT,
};
pub use config::SentinelConfig;
pub use debounce::{EmitDecision, StabilityDebouncer, DEFAULT_STABILITY_WINDOW};
pub use error::{OperationError, Status};
pub use frame::Frame;
#[cfg(feature = "ingest-v4l2")]
pub use ingest::v4l2::V4l2Capture;
pub use ingest::{CameraConfig, CameraSource, FrameSource, FrameSourceProvider, ReplaySource};
pub use location::{DisabledLocationResolver, HttpLocationResolver, LocationResolver};
pub use preview::{PreviewConfig, PreviewStore};
pub use recorder::EventRecorder;
pub use service::{DetectionService, IssueReport, SingleShotResult};
pub use store::{open_store, EventStore, InMemoryEventLog, JsonFileEventLog, SqliteEventLog, StoreKind};
pub use stream::{
    SessionState, StartOutcome, StopOutcome, StreamManager, StreamSettings, WorkerExit,
};

// -------------------- Time --------------------

/// Milliseconds since the unix epoch.
pub fn now_ms() -> Result<u64> {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH)?;
    Ok(elapsed.as_millis() as u64)
}

// -------------------- Location --------------------

/// Approximate location attached to an event.
///
/// Every field is independently optional. A failed lookup is the all-`None` value,
/// never an error.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocationInfo {
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
}

impl LocationInfo {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_unknown(&self) -> bool {
        self.lat.is_none() && self.lon.is_none() && self.city.is_none() && self.region.is_none()
    }
}

// -------------------- Events --------------------

/// Which path produced an event.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    #[default]
    Stream,
    SingleShot,
    IssueReport,
}

/// A committed detection. Appended to the event log and never mutated afterwards.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DetectionEvent {
    pub timestamp_ms: u64,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub origin: EventOrigin,
    #[serde(default)]
    pub location: Option<LocationInfo>,
    #[serde(default)]
    pub preview_ref: Option<String>,
}

impl DetectionEvent {
    /// New event stamped with the current wall clock.
    pub fn new(label: &str, origin: EventOrigin) -> Result<Self> {
        Ok(Self {
            timestamp_ms: now_ms()?,
            label: label.to_string(),
            confidence: None,
            origin,
            location: None,
            preview_ref: None,
        })
    }

    pub fn with_confidence(mut self, confidence: Option<f32>) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_location(mut self, location: LocationInfo) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_preview(mut self, preview_ref: Option<String>) -> Self {
        self.preview_ref = preview_ref;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_builder_sets_fields() -> Result<()> {
        let ev = DetectionEvent::new("Garbage", EventOrigin::SingleShot)?
            .with_confidence(Some(0.9))
            .with_location(LocationInfo::unknown())
            .with_preview(Some("preview_1.jpg".to_string()));
        assert_eq!(ev.label, "Garbage");
        assert_eq!(ev.origin, EventOrigin::SingleShot);
        assert_eq!(ev.confidence, Some(0.9));
        assert!(ev.location.as_ref().is_some_and(LocationInfo::is_unknown));
        assert_eq!(ev.preview_ref.as_deref(), Some("preview_1.jpg"));
        assert!(ev.timestamp_ms > 0);
        Ok(())
    }

    #[test]
    fn minimal_records_deserialize_with_defaults() -> Result<()> {
        let ev: DetectionEvent =
            serde_json::from_str(r#"{"timestamp_ms": 10, "label": "FallenTrees"}"#)?;
        assert_eq!(ev.origin, EventOrigin::Stream);
        assert!(ev.confidence.is_none());
        assert!(ev.location.is_none());
        assert!(ev.preview_ref.is_none());
        Ok(())
    }

    #[test]
    fn unknown_location_serializes_as_nulls() -> Result<()> {
        let value = serde_json::to_value(LocationInfo::unknown())?;
        assert_eq!(
            value,
            serde_json::json!({"lat": null, "lon": null, "city": null, "region": null})
        );
        Ok(())
    }
}
