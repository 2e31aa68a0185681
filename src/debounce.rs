//! Temporal-stability debouncing of per-frame labels.
//!
//! A label becomes an event only after it has been observed continuously for
//! the stability window, and then only once per episode. Any change of label,
//! including to or from "no label", starts a new episode.

use std::time::{Duration, Instant};

/// Default time a label must stay unchanged before it is emitted.
pub const DEFAULT_STABILITY_WINDOW: Duration = Duration::from_secs(3);

/// Outcome of observing one frame's label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmitDecision {
    Hold,
    Emit(String),
}

/// Per-worker debounce state machine.
#[derive(Debug)]
pub struct StabilityDebouncer {
    window: Duration,
    current_label: Option<String>,
    episode_start: Option<Instant>,
    emitted: bool,
}

impl StabilityDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            current_label: None,
            episode_start: None,
            emitted: false,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Feed the label observed at `now` (`None` when the frame has no label).
    pub fn observe(&mut self, label: Option<&str>, now: Instant) -> EmitDecision {
        let start = match self.episode_start {
            Some(start) if self.current_label.as_deref() == label => start,
            _ => {
                self.current_label = label.map(str::to_string);
                self.episode_start = Some(now);
                self.emitted = false;
                return EmitDecision::Hold;
            }
        };

        let Some(label) = label else {
            return EmitDecision::Hold;
        };
        if self.emitted || now.saturating_duration_since(start) < self.window {
            return EmitDecision::Hold;
        }
        self.emitted = true;
        EmitDecision::Emit(label.to_string())
    }

    pub fn reset(&mut self) {
        self.current_label = None;
        self.episode_start = None;
        self.emitted = false;
    }

    pub fn current_label(&self) -> Option<&str> {
        self.current_label.as_deref()
    }

    /// Time spent in the current episode, zero before the first observation.
    pub fn episode_elapsed(&self, now: Instant) -> Duration {
        self.episode_start
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    pub fn emitted_for_episode(&self) -> bool {
        self.emitted
    }
}

impl Default for StabilityDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_STABILITY_WINDOW)
    }
}
