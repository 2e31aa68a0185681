//! Shared emission path for both the stream worker and single-shot calls.

use anyhow::Result;
use std::sync::Arc;

use crate::frame::Frame;
use crate::location::LocationResolver;
use crate::preview::PreviewStore;
use crate::store::EventStore;
use crate::{DetectionEvent, EventOrigin};

#[derive(Clone)]
pub struct EventRecorder {
    store: Arc<dyn EventStore>,
    location: Arc<dyn LocationResolver>,
    previews: Option<Arc<PreviewStore>>,
}

impl EventRecorder {
    pub fn new(
        store: Arc<dyn EventStore>,
        location: Arc<dyn LocationResolver>,
        previews: Option<Arc<PreviewStore>>,
    ) -> Self {
        Self {
            store,
            location,
            previews,
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn previews(&self) -> Option<&Arc<PreviewStore>> {
        self.previews.as_ref()
    }

    /// Persist a preview of `frame`. Failures are logged and yield `None`.
    pub fn snapshot(&self, frame: &Frame) -> Option<String> {
        let previews = self.previews.as_ref()?;
        match previews.save(frame) {
            Ok(name) => Some(name),
            Err(err) => {
                log::warn!("preview snapshot failed: {:#}", err);
                None
            }
        }
    }

    /// Resolve location and append one event.
    pub fn record(
        &self,
        label: &str,
        confidence: Option<f32>,
        origin: EventOrigin,
        preview_ref: Option<String>,
    ) -> Result<DetectionEvent> {
        let location = self.location.lookup();
        let event = DetectionEvent::new(label, origin)?
            .with_confidence(confidence)
            .with_location(location)
            .with_preview(preview_ref);
        let stored = self.store.append(event)?;
        log::info!(
            "recorded {:?} event: {} (confidence {:?})",
            stored.origin,
            stored.label,
            stored.confidence
        );
        Ok(stored)
    }
}
