//! Classifier configuration

use crate::{features::DEFAULT_EPSILON, FlowError, FlowResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Label for a class index in an ordered class table, `"unknown"` if out
/// of range
pub fn class_label(classes: &[String], index: usize) -> &str {
    classes.get(index).map(String::as_str).unwrap_or("unknown")
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Window duration in seconds, measured on packet timestamps
    pub window_secs: f64,
    /// Ordered class-name table; its length is the class count
    pub classes: Vec<String>,
    /// Zero-duration guard for rate features, in seconds
    pub epsilon: f64,
    /// Upper bound on one scorer call
    pub inference_timeout_ms: u64,
    /// Z-score features across each window's flows before scoring
    pub standardize: bool,
    /// Fold both directions of a conversation onto one flow key
    pub bidirectional: bool,
    /// Closed windows that may queue between ingestion and processing
    pub channel_capacity: usize,
    /// Packet-count log interval in seconds of packet time
    pub stats_interval_secs: f64,
    /// JSON weight file for the built-in linear model
    pub model_path: Option<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            window_secs: 2.0,
            classes: vec![
                "Chat".into(),
                "File Transfer".into(),
                "Streaming".into(),
                "VoIP".into(),
            ],
            epsilon: DEFAULT_EPSILON,
            inference_timeout_ms: 1000,
            standardize: false,
            bidirectional: true,
            channel_capacity: 4,
            stats_interval_secs: 10.0,
            model_path: None,
        }
    }
}

impl ClassifierConfig {
    /// Load from file
    pub fn load(path: &str) -> FlowResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to file
    pub fn save(&self, path: &str) -> FlowResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> FlowResult<()> {
        if !(self.window_secs > 0.0) {
            return Err(FlowError::Config(format!("window_secs must be positive, got {}", self.window_secs)));
        }
        if self.classes.is_empty() {
            return Err(FlowError::Config("classes must not be empty".into()));
        }
        if !(self.epsilon > 0.0) {
            return Err(FlowError::Config(format!("epsilon must be positive, got {}", self.epsilon)));
        }
        if self.channel_capacity == 0 {
            return Err(FlowError::Config("channel_capacity must be at least 1".into()));
        }
        if !(self.stats_interval_secs > 0.0) {
            return Err(FlowError::Config("stats_interval_secs must be positive".into()));
        }
        Ok(())
    }

    /// Number of classes
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Inference timeout as a duration
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }
}
