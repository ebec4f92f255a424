//! Inference seam
//!
//! [`Scorer`] is the contract with whatever turns feature vectors into class
//! probabilities. A scorer may leave a flow out of its answer; that flow is
//! simply not updated this round.
//!
//! [`LinearModel`] is the built-in scorer: softmax regression over the six
//! flow features, loaded from a JSON weight file.

use crate::{
    features::{Features, FEATURE_COUNT},
    flow::FlowKey,
    FlowError, FlowResult,
};
use async_trait::async_trait;
use ndarray::{Array1, Array2};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

/// Class probabilities per scored flow
pub type ScoreMap = HashMap<FlowKey, Vec<f64>>;

/// Turns a window's feature batch into per-flow class probabilities
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Scorer name for logs
    fn name(&self) -> &'static str;

    /// Length of every probability vector this scorer returns
    fn class_count(&self) -> usize;

    /// Score a batch. Flows absent from the result were declined.
    async fn score(&self, batch: &[(FlowKey, Features)]) -> FlowResult<ScoreMap>;
}

/// On-disk form of a [`LinearModel`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModelFile {
    /// One row of feature weights per class
    pub weights: Vec<Vec<f64>>,
    /// One bias per class
    pub bias: Vec<f64>,
}

/// Softmax-regression scorer: `p = softmax(W x + b)`
pub struct LinearModel {
    weights: Array2<f64>,
    bias: Array1<f64>,
    stats: RwLock<InferenceStats>,
}

impl LinearModel {
    /// Build from weights (`classes x FEATURE_COUNT`) and biases
    pub fn new(weights: Array2<f64>, bias: Array1<f64>) -> FlowResult<Self> {
        let (classes, inputs) = weights.dim();
        if classes == 0 {
            return Err(FlowError::Model("model has no classes".into()));
        }
        if inputs != FEATURE_COUNT {
            return Err(FlowError::Model(format!(
                "expected {} weights per class, got {}",
                FEATURE_COUNT, inputs
            )));
        }
        if bias.len() != classes {
            return Err(FlowError::Model(format!(
                "expected {} biases, got {}",
                classes,
                bias.len()
            )));
        }
        Ok(Self {
            weights,
            bias,
            stats: RwLock::new(InferenceStats::default()),
        })
    }

    /// Build from the on-disk representation
    pub fn from_file_repr(file: LinearModelFile) -> FlowResult<Self> {
        let classes = file.weights.len();
        let mut flat = Vec::with_capacity(classes * FEATURE_COUNT);
        for (i, row) in file.weights.iter().enumerate() {
            if row.len() != FEATURE_COUNT {
                return Err(FlowError::Model(format!(
                    "class {} has {} weights, expected {}",
                    i,
                    row.len(),
                    FEATURE_COUNT
                )));
            }
            flat.extend_from_slice(row);
        }
        let weights = Array2::from_shape_vec((classes, FEATURE_COUNT), flat)
            .map_err(|e| FlowError::Model(e.to_string()))?;
        Self::new(weights, Array1::from_vec(file.bias))
    }

    /// Load from a JSON model file
    pub fn load(path: impl AsRef<Path>) -> FlowResult<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "loading linear model");
        let content = std::fs::read_to_string(path)?;
        let file: LinearModelFile = serde_json::from_str(&content)?;
        Self::from_file_repr(file)
    }

    /// Class probabilities for one feature vector, or `None` if the vector
    /// is not finite and cannot be scored.
    pub fn predict(&self, features: &Features) -> Option<Vec<f64>> {
        if !features.is_finite() {
            return None;
        }
        let x = Array1::from_vec(features.to_vector().to_vec());
        let logits = self.weights.dot(&x) + &self.bias;
        Some(softmax(logits.as_slice()?))
    }

    /// Snapshot of inference statistics
    pub fn stats(&self) -> InferenceStats {
        self.stats.read().clone()
    }
}

#[async_trait]
impl Scorer for LinearModel {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn class_count(&self) -> usize {
        self.bias.len()
    }

    async fn score(&self, batch: &[(FlowKey, Features)]) -> FlowResult<ScoreMap> {
        let start = Instant::now();

        let mut scores = HashMap::with_capacity(batch.len());
        let mut declined = 0u64;
        for (key, features) in batch {
            match self.predict(features) {
                Some(p) => {
                    scores.insert(*key, p);
                }
                None => {
                    tracing::debug!(flow = %key, "declined non-finite feature vector");
                    declined += 1;
                }
            }
        }

        let elapsed = start.elapsed();
        let mut stats = self.stats.write();
        stats.total_inferences += scores.len() as u64;
        stats.declined += declined;
        stats.total_latency_us += elapsed.as_micros() as u64;

        Ok(scores)
    }
}

/// Numerically stable softmax
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&z| (z - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Inference statistics
#[derive(Debug, Clone, Default)]
pub struct InferenceStats {
    pub total_inferences: u64,
    pub declined: u64,
    pub total_latency_us: u64,
}

impl InferenceStats {
    /// Average latency per scored flow in microseconds
    pub fn avg_latency_us(&self) -> f64 {
        if self.total_inferences == 0 { 0.0 }
        else { self.total_latency_us as f64 / self.total_inferences as f64 }
    }
}
