use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use super::{Classifier, ClassifierOutput};
use crate::frame::Frame;

/// Tract-based ONNX image classifier.
///
/// Frames are resized to the model's square input, scaled to `[0, 1]` in NCHW
/// layout, and the first output is read as one score per class. Scores that do
/// not already sum to one are softmaxed.
pub struct TractClassifier {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    labels: Vec<String>,
    input_size: u32,
}

impl TractClassifier {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, labels: Vec<String>, input_size: u32) -> Result<Self> {
        if input_size == 0 {
            return Err(anyhow!("model input size must be positive"));
        }
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "TractClassifier: loaded {} ({} classes, {}x{} input)",
            model_path.display(),
            labels.len(),
            input_size,
            input_size
        );

        Ok(Self {
            model,
            labels,
            input_size,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let resized = frame.resized(self.input_size, self.input_size)?;
        let side = self.input_size as usize;
        let pixels = resized.as_raw();
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            pixels[(y * side + x) * 3 + channel] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn extract_scores(&self, outputs: TVec<TValue>) -> Result<Vec<f32>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores: Vec<f32> = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .iter()
            .copied()
            .collect();
        if scores.is_empty() {
            return Err(anyhow!("model produced an empty score vector"));
        }
        Ok(normalize_scores(scores))
    }
}

fn normalize_scores(scores: Vec<f32>) -> Vec<f32> {
    let sum: f32 = scores.iter().sum();
    let is_distribution = scores.iter().all(|s| (0.0..=1.0).contains(s)) && (sum - 1.0).abs() < 1e-3;
    if is_distribution {
        return scores;
    }
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

fn argmax(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_finite())
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(index, _)| index)
}

impl Classifier for TractClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, frame: &Frame) -> Result<ClassifierOutput> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let probs = self.extract_scores(outputs)?;
        if probs.len() != self.labels.len() {
            log::warn!(
                "TractClassifier: model reports {} classes, {} labels configured",
                probs.len(),
                self.labels.len()
            );
        }

        Ok(ClassifierOutput {
            top_label: None,
            names: self.labels.clone(),
            top1: argmax(&probs),
            probs: Some(probs),
            confidence: None,
        })
    }
}
