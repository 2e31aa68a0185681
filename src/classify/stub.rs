use anyhow::Result;

use super::{Classifier, ClassifierOutput, DEFAULT_LABELS};
use crate::frame::Frame;

/// Deterministic classifier for tests and demos.
///
/// Buckets the mean pixel intensity over the configured labels, so a solid frame
/// always gets the same label. Frames darker than the blank threshold get no
/// label at all.
pub struct StubClassifier {
    labels: Vec<String>,
    blank_below: u8,
}

impl StubClassifier {
    pub fn new(labels: Vec<String>) -> Self {
        Self {
            labels,
            blank_below: 8,
        }
    }

    /// Override the mean intensity under which frames are unlabeled.
    pub fn with_blank_threshold(mut self, blank_below: u8) -> Self {
        self.blank_below = blank_below;
        self
    }

    /// Label the stub assigns to a solid frame of the given intensity.
    pub fn label_for_level(&self, level: u8) -> Option<&str> {
        self.bucket(level).map(|index| self.labels[index].as_str())
    }

    fn bucket(&self, mean: u8) -> Option<usize> {
        if self.labels.is_empty() || mean < self.blank_below {
            return None;
        }
        Some(mean as usize * self.labels.len() / 256)
    }
}

impl Default for StubClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_LABELS.iter().map(|l| l.to_string()).collect())
    }
}

impl Classifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, frame: &Frame) -> Result<ClassifierOutput> {
        let pixels = frame.pixels();
        let sum: u64 = pixels.iter().map(|&p| p as u64).sum();
        let mean = (sum / pixels.len().max(1) as u64) as u8;

        let Some(top1) = self.bucket(mean) else {
            return Ok(ClassifierOutput {
                names: self.labels.clone(),
                ..ClassifierOutput::default()
            });
        };

        let others = (self.labels.len() - 1).max(1) as f32;
        let probs = (0..self.labels.len())
            .map(|index| if index == top1 { 0.9 } else { 0.1 / others })
            .collect();

        Ok(ClassifierOutput {
            top_label: None,
            names: self.labels.clone(),
            top1: Some(top1),
            probs: Some(probs),
            confidence: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Prediction;

    fn solid(level: u8) -> Frame {
        Frame::from_rgb(vec![level; 8 * 8 * 3], 8, 8).unwrap()
    }

    #[test]
    fn same_intensity_same_label() -> Result<()> {
        let mut classifier = StubClassifier::default();
        let first = Prediction::from_output(&classifier.infer(&solid(120))?);
        let second = Prediction::from_output(&classifier.infer(&solid(120))?);
        assert!(first.label.is_some());
        assert_eq!(first, second);
        assert_eq!(first.confidence, Some(0.9));
        assert_eq!(first.label.as_deref(), classifier.label_for_level(120));
        Ok(())
    }

    #[test]
    fn dark_frames_are_unlabeled() -> Result<()> {
        let mut classifier = StubClassifier::default();
        let prediction = Prediction::from_output(&classifier.infer(&solid(0))?);
        assert_eq!(prediction, Prediction::default());
        Ok(())
    }

    #[test]
    fn buckets_span_all_labels() {
        let classifier = StubClassifier::new(vec!["a".into(), "b".into()]);
        assert_eq!(classifier.label_for_level(10), Some("a"));
        assert_eq!(classifier.label_for_level(200), Some("b"));
        assert_eq!(classifier.label_for_level(255), Some("b"));
    }
}
