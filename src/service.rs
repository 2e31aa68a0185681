//! Operations exposed to callers (CLI today, any request layer tomorrow).
//!
//! `DetectionService` wires the classifier, the event recorder and the stream
//! manager together and converts internal failures into `OperationError` so
//! every operation maps to exactly one status code.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::classify::{
    predict, route, shared, Prediction, SharedClassifier, StubClassifier, UNASSIGNED_DEPARTMENT,
};
use crate::config::SentinelConfig;
use crate::error::OperationError;
use crate::frame::Frame;
use crate::ingest::FrameSourceProvider;
use crate::location::{DisabledLocationResolver, HttpLocationResolver, LocationResolver};
use crate::preview::PreviewStore;
use crate::recorder::EventRecorder;
use crate::store::{open_store, EventStore};
use crate::stream::{SessionState, StartOutcome, StopOutcome, StreamManager, StreamSettings};
use crate::{DetectionEvent, EventOrigin};

pub const STATUS_AUTO_ROUTED: &str = "Auto-Routed";
pub const STATUS_NOT_CLASSIFIED: &str = "Could not classify";

/// Result of a single-shot classification.
#[derive(Clone, Debug, Serialize)]
pub struct SingleShotResult {
    pub label: String,
    pub confidence: Option<f32>,
    pub event: DetectionEvent,
}

/// Result of routing an uploaded issue photo.
#[derive(Clone, Debug, Serialize)]
pub struct IssueReport {
    pub issue_type: Option<String>,
    pub assigned_department: String,
    pub confidence: Option<f32>,
    pub status: String,
    pub preview_ref: Option<String>,
    pub event: Option<DetectionEvent>,
}

pub struct DetectionService {
    classifier: SharedClassifier,
    recorder: EventRecorder,
    stream: StreamManager,
}

impl DetectionService {
    pub fn new(
        classifier: SharedClassifier,
        recorder: EventRecorder,
        provider: Arc<dyn FrameSourceProvider>,
        settings: StreamSettings,
    ) -> Self {
        let stream = StreamManager::new(provider, classifier.clone(), recorder.clone(), settings);
        Self {
            classifier,
            recorder,
            stream,
        }
    }

    /// Build every collaborator from configuration.
    pub fn from_config(cfg: &SentinelConfig) -> Result<Self> {
        let store = open_store(cfg.store_kind, &cfg.store_path)?;

        let location: Arc<dyn LocationResolver> = if cfg.location.enabled {
            Arc::new(HttpLocationResolver::new(
                &cfg.location.endpoint,
                cfg.location.timeout,
            )?)
        } else {
            log::info!("location lookup disabled");
            Arc::new(DisabledLocationResolver)
        };

        let previews = if cfg.previews.enabled {
            Some(Arc::new(PreviewStore::new(cfg.preview_config())?))
        } else {
            None
        };

        let recorder = EventRecorder::new(store, location, previews);
        let classifier = build_classifier(cfg)?;
        Ok(Self::new(
            classifier,
            recorder,
            Arc::new(cfg.camera_config()),
            cfg.stream_settings(),
        ))
    }

    /// Decode, classify and record one image. No debouncing.
    pub fn classify_once(&self, image: &[u8]) -> Result<SingleShotResult, OperationError> {
        let frame = decode(image)?;
        self.classify_frame(&frame, EventOrigin::SingleShot, None)
    }

    /// Classify an issue photo and assign it to a department.
    ///
    /// An image the classifier runs on but cannot label is reported as "Could
    /// not classify". A failing model call is `Inference` and undecodable input
    /// is `Decode`; neither records anything.
    pub fn route_issue(&self, image: &[u8]) -> Result<IssueReport, OperationError> {
        let frame = decode(image)?;
        let prediction = self.predict(&frame)?;
        let preview_ref = self.recorder.snapshot(&frame);

        let Some(label) = prediction.label else {
            log::info!("issue photo produced no label; leaving unassigned");
            return Ok(IssueReport {
                issue_type: None,
                assigned_department: UNASSIGNED_DEPARTMENT.to_string(),
                confidence: None,
                status: STATUS_NOT_CLASSIFIED.to_string(),
                preview_ref,
                event: None,
            });
        };

        let event = self.recorder.record(
            &label,
            prediction.confidence,
            EventOrigin::IssueReport,
            preview_ref.clone(),
        )?;
        Ok(IssueReport {
            assigned_department: route(Some(&label)).to_string(),
            issue_type: Some(label),
            confidence: prediction.confidence,
            status: STATUS_AUTO_ROUTED.to_string(),
            preview_ref,
            event: Some(event),
        })
    }

    pub fn start_stream(&self) -> Result<StartOutcome, OperationError> {
        self.stream.start()
    }

    pub fn stop_stream(&self) -> Result<StopOutcome, OperationError> {
        self.stream.stop()
    }

    pub fn stream_state(&self) -> Result<SessionState, OperationError> {
        self.stream.state()
    }

    pub fn stream(&self) -> &StreamManager {
        &self.stream
    }

    /// Stored preview names, newest first. Empty when previews are disabled.
    pub fn list_previews(&self) -> Result<Vec<String>, OperationError> {
        match self.recorder.previews() {
            Some(previews) => Ok(previews.list()?),
            None => Ok(Vec::new()),
        }
    }

    pub fn get_preview(&self, name: &str) -> Result<Vec<u8>, OperationError> {
        match self.recorder.previews() {
            Some(previews) => previews.get(name),
            None => Err(OperationError::NotFound(format!(
                "preview {} not found (previews disabled)",
                name
            ))),
        }
    }

    pub fn latest_event(&self) -> Result<Option<DetectionEvent>, OperationError> {
        Ok(self.store().latest()?)
    }

    pub fn events(&self) -> Result<Vec<DetectionEvent>, OperationError> {
        Ok(self.store().events()?)
    }

    fn store(&self) -> &Arc<dyn EventStore> {
        self.recorder.store()
    }

    fn predict(&self, frame: &Frame) -> Result<Prediction, OperationError> {
        predict(&self.classifier, frame)
            .map_err(|err| OperationError::Inference(format!("{:#}", err)))
    }

    fn classify_frame(
        &self,
        frame: &Frame,
        origin: EventOrigin,
        preview_ref: Option<String>,
    ) -> Result<SingleShotResult, OperationError> {
        let prediction = self.predict(frame)?;
        let Some(label) = prediction.label else {
            return Err(OperationError::Inference(
                "classifier produced no label".to_string(),
            ));
        };
        let event = self
            .recorder
            .record(&label, prediction.confidence, origin, preview_ref)?;
        Ok(SingleShotResult {
            label,
            confidence: prediction.confidence,
            event,
        })
    }
}

fn decode(image: &[u8]) -> Result<Frame, OperationError> {
    Frame::decode(image).map_err(|err| OperationError::Decode(format!("{:#}", err)))
}

fn build_classifier(cfg: &SentinelConfig) -> Result<SharedClassifier> {
    let labels = cfg.classifier.labels.clone();
    match &cfg.classifier.model_path {
        #[cfg(feature = "backend-tract")]
        Some(path) => {
            let classifier =
                crate::classify::TractClassifier::new(path, labels, cfg.classifier.input_size)
                    .context("load classifier model")?;
            Ok(shared(classifier))
        }
        #[cfg(not(feature = "backend-tract"))]
        Some(path) => Err(anyhow::anyhow!(
            "classifier model {} requires the backend-tract feature",
            path.display()
        ))
        .context("load classifier model"),
        None => {
            log::info!("using stub classifier over {} labels", labels.len());
            Ok(shared(StubClassifier::new(labels)))
        }
    }
}
