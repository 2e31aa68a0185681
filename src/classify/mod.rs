//! Classifier seam.
//!
//! A `Classifier` turns a frame into a raw `ClassifierOutput`. Backends report
//! whatever shape their model produces (an explicit top label, or class names
//! plus a top-1 index, with or without a probability vector). `Prediction`
//! normalizes that into `{label, confidence}` and is the only place in the crate
//! that looks at the raw shape.

mod routing;
mod stub;
#[cfg(feature = "backend-tract")]
mod tract;

use anyhow::Result;
use std::sync::{Arc, Mutex};

use crate::frame::Frame;

pub use routing::{normalize_label, route, UNASSIGNED_DEPARTMENT};
pub use stub::StubClassifier;
#[cfg(feature = "backend-tract")]
pub use tract::TractClassifier;

/// Class names of the deployed civic-issue model, in model index order.
pub const DEFAULT_LABELS: [&str; 9] = [
    "Damaged concrete structures",
    "DamagedElectricalPoles",
    "DamagedRoadSigns",
    "DeadAnimalsPollution",
    "FallenTrees",
    "Garbage",
    "Graffitti",
    "IllegalParking",
    "Potholes and RoadCracks",
];

/// Classifier backend trait.
///
/// `infer` takes `&mut self` so backends may keep scratch buffers; callers share
/// a backend through `SharedClassifier`.
pub trait Classifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Classify one frame. Errors mean the model call itself failed.
    fn infer(&mut self, frame: &Frame) -> Result<ClassifierOutput>;
}

/// A classifier shared between the stream worker and foreground calls.
pub type SharedClassifier = Arc<Mutex<dyn Classifier>>;

/// Wrap a classifier for sharing.
pub fn shared<C: Classifier + 'static>(classifier: C) -> SharedClassifier {
    Arc::new(Mutex::new(classifier))
}

/// Raw classifier result as reported by a backend.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClassifierOutput {
    /// Label chosen by the backend, if it reports one directly.
    pub top_label: Option<String>,
    /// Class names indexed by model output position.
    pub names: Vec<String>,
    /// Index of the top-1 class.
    pub top1: Option<usize>,
    /// Per-class probabilities.
    pub probs: Option<Vec<f32>>,
    /// Confidence of the top prediction, if the backend reports one directly.
    pub confidence: Option<f32>,
}

/// Normalized classification: the label (if any) and its confidence (if known).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Prediction {
    pub label: Option<String>,
    pub confidence: Option<f32>,
}

impl Prediction {
    pub fn from_output(output: &ClassifierOutput) -> Self {
        let label = output
            .top_label
            .as_deref()
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .map(str::to_string)
            .or_else(|| {
                output
                    .top1
                    .and_then(|index| output.names.get(index))
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
            });

        let confidence = output
            .confidence
            .or_else(|| {
                let index = output.top1?;
                output.probs.as_ref()?.get(index).copied()
            })
            .filter(|value| value.is_finite());

        Self { label, confidence }
    }
}

/// Run the shared classifier on a frame and normalize the result.
///
/// A backend that panicked mid-call leaves the lock poisoned; the next caller
/// takes it over instead of failing every later frame.
pub fn predict(classifier: &SharedClassifier, frame: &Frame) -> Result<Prediction> {
    let mut guard = classifier.lock().unwrap_or_else(|poisoned| {
        log::warn!("classifier panicked during a previous call; continuing");
        classifier.clear_poison();
        poisoned.into_inner()
    });
    let output = guard.infer(frame)?;
    Ok(Prediction::from_output(&output))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["Garbage".to_string(), "FallenTrees".to_string()]
    }

    #[test]
    fn explicit_label_and_confidence_win() {
        let output = ClassifierOutput {
            top_label: Some("Graffitti".to_string()),
            names: names(),
            top1: Some(0),
            probs: Some(vec![0.2, 0.8]),
            confidence: Some(0.91),
        };
        let prediction = Prediction::from_output(&output);
        assert_eq!(prediction.label.as_deref(), Some("Graffitti"));
        assert_eq!(prediction.confidence, Some(0.91));
    }

    #[test]
    fn label_and_confidence_from_index_and_probs() {
        let output = ClassifierOutput {
            names: names(),
            top1: Some(1),
            probs: Some(vec![0.3, 0.7]),
            ..ClassifierOutput::default()
        };
        let prediction = Prediction::from_output(&output);
        assert_eq!(prediction.label.as_deref(), Some("FallenTrees"));
        assert_eq!(prediction.confidence, Some(0.7));
    }

    #[test]
    fn missing_top1_or_probs_yields_null_confidence() {
        let no_probs = ClassifierOutput {
            top_label: Some("Garbage".to_string()),
            names: names(),
            top1: Some(0),
            ..ClassifierOutput::default()
        };
        assert_eq!(Prediction::from_output(&no_probs).confidence, None);

        let no_index = ClassifierOutput {
            top_label: Some("Garbage".to_string()),
            probs: Some(vec![0.9]),
            ..ClassifierOutput::default()
        };
        let prediction = Prediction::from_output(&no_index);
        assert_eq!(prediction.label.as_deref(), Some("Garbage"));
        assert_eq!(prediction.confidence, None);
    }

    #[test]
    fn out_of_range_index_yields_no_label() {
        let output = ClassifierOutput {
            names: names(),
            top1: Some(5),
            probs: Some(vec![0.5, 0.5]),
            ..ClassifierOutput::default()
        };
        assert_eq!(Prediction::from_output(&output), Prediction::default());
    }

    struct PanicOnce {
        panicked: bool,
    }

    impl Classifier for PanicOnce {
        fn name(&self) -> &'static str {
            "panic-once"
        }

        fn infer(&mut self, _frame: &Frame) -> Result<ClassifierOutput> {
            if !self.panicked {
                self.panicked = true;
                panic!("backend blew up");
            }
            Ok(ClassifierOutput {
                top_label: Some("Garbage".to_string()),
                ..ClassifierOutput::default()
            })
        }
    }

    #[test]
    fn predict_recovers_after_backend_panic() -> Result<()> {
        let classifier = shared(PanicOnce { panicked: false });
        let frame = Frame::from_rgb(vec![0u8; 2 * 2 * 3], 2, 2)?;

        let first = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            predict(&classifier, &frame)
        }));
        assert!(first.is_err());
        assert!(classifier.is_poisoned());

        let prediction = predict(&classifier, &frame)?;
        assert_eq!(prediction.label.as_deref(), Some("Garbage"));
        assert!(!classifier.is_poisoned());
        Ok(())
    }

    #[test]
    fn blank_label_is_no_label() {
        let output = ClassifierOutput {
            top_label: Some("   ".to_string()),
            ..ClassifierOutput::default()
        };
        assert_eq!(Prediction::from_output(&output).label, None);
    }
}
