//! Confidence-Based Alignment Gate
//!
//! Decides whether a fresh pose estimate is trustworthy enough to move
//! content, comparing its confidence against a hard floor and against the
//! recent history so a single low-confidence outlier does not cause a
//! visible jump.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Gate parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// When false every estimate is applied
    pub enabled: bool,
    /// Lowest accepted change against the previous confidence
    pub minimum_confidence_delta: f32,
    /// Confidences at or below this value are never applied
    pub absolute_minimum_confidence: f32,
    /// Number of past confidences remembered (at least 1)
    pub max_history_size: usize,
    /// Lowest accepted difference between a new confidence and the mean of
    /// the history
    pub average_deviation_tolerance: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            minimum_confidence_delta: -2.0,
            absolute_minimum_confidence: 15.0,
            max_history_size: 5,
            average_deviation_tolerance: -3.0,
        }
    }
}

impl GateConfig {
    /// Copy with out-of-range values clamped
    pub fn normalized(&self) -> Self {
        Self {
            max_history_size: self.max_history_size.max(1),
            ..self.clone()
        }
    }
}

/// Direction of the most recent confidences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTrend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone)]
pub struct ConfidenceGate {
    config: GateConfig,
    /// Newest first
    history: VecDeque<f32>,
}

impl Default for ConfidenceGate {
    fn default() -> Self {
        Self::new(GateConfig::default())
    }
}

impl ConfidenceGate {
    pub fn new(config: GateConfig) -> Self {
        let config = config.normalized();
        Self {
            history: VecDeque::with_capacity(config.max_history_size + 1),
            config,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Replace the configuration, trimming history to the new capacity
    pub fn reconfigure(&mut self, config: GateConfig) {
        self.config = config.normalized();
        self.history.truncate(self.config.max_history_size);
    }

    /// Decide whether a pose with `confidence` should be applied, then record
    /// `confidence` whatever the outcome.
    pub fn should_align(&mut self, confidence: f32) -> bool {
        let decision = self.evaluate(confidence);
        self.record(confidence);
        debug!(confidence, decision, history = self.history.len(), "alignment gate");
        decision
    }

    fn evaluate(&self, confidence: f32) -> bool {
        if !self.config.enabled {
            return true;
        }
        if confidence <= self.config.absolute_minimum_confidence {
            return false;
        }
        let Some(&latest) = self.history.front() else {
            return true;
        };

        let mean = self.history.iter().sum::<f32>() / self.history.len() as f32;
        let delta = confidence - latest;
        let average_delta = confidence - mean;

        delta >= self.config.minimum_confidence_delta
            && average_delta >= self.config.average_deviation_tolerance
    }

    fn record(&mut self, confidence: f32) {
        self.history.push_front(confidence);
        self.history.truncate(self.config.max_history_size);
    }

    /// Classify the newest three confidences by majority of the directions
    /// between consecutive entries; ties are stable.
    pub fn trend(&self) -> ConfidenceTrend {
        if self.history.len() < 2 {
            return ConfidenceTrend::InsufficientData;
        }

        let recent: Vec<f32> = self.history.iter().take(3).copied().collect();
        let (mut rising, mut falling) = (0, 0);
        // Newest first, so each pair is (newer, older)
        for pair in recent.windows(2) {
            if pair[0] > pair[1] {
                rising += 1;
            } else if pair[0] < pair[1] {
                falling += 1;
            }
        }

        match rising.cmp(&falling) {
            std::cmp::Ordering::Greater => ConfidenceTrend::Increasing,
            std::cmp::Ordering::Less => ConfidenceTrend::Decreasing,
            std::cmp::Ordering::Equal => ConfidenceTrend::Stable,
        }
    }

    /// Recorded confidences, newest first
    pub fn history(&self) -> Vec<f32> {
        self.history.iter().copied().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn latest(&self) -> Option<f32> {
        self.history.front().copied()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}
