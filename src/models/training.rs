//! Training inputs, hyper-parameters and evaluation metrics

use crate::error::ModelError;
use crate::feature_extractor::{FeatureName, FeatureVector};
use crate::models::risk_model::RiskModel;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;

/// One labelled example. `label` is 1 for fraud, 0 otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingExample {
    pub features: FeatureVector,
    pub label: u8,
}

impl TrainingExample {
    pub fn new(features: FeatureVector, is_fraud: bool) -> Self {
        Self {
            features,
            label: u8::from(is_fraud),
        }
    }

    pub fn is_fraud(&self) -> bool {
        self.label == 1
    }

    pub(crate) fn target(&self) -> f64 {
        f64::from(self.label)
    }
}

/// Hyper-parameters of one training run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingParams {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Seed of the per-epoch shuffle
    pub seed: u64,
}

impl TrainingParams {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.epochs == 0 {
            return Err(ModelError::InvalidHyperParameters(
                "epochs must be positive".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ModelError::InvalidHyperParameters(
                "batch size must be positive".to_string(),
            ));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ModelError::InvalidHyperParameters(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 32,
            learning_rate: 0.01,
            seed: 0,
        }
    }
}

/// Average loss and accuracy observed during one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
}

/// New model produced by a training run, with its per-epoch history.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: RiskModel,
    pub history: Vec<EpochStats>,
}

/// Result of a training run installed into the serving slot.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub model: Arc<RiskModel>,
    pub history: Vec<EpochStats>,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f64> {
        self.history.last().map(|stats| stats.loss)
    }
}

/// Classification quality at the 0.5 threshold.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct EvaluationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub true_positives: u64,
    pub false_positives: u64,
    pub true_negatives: u64,
    pub false_negatives: u64,
}

impl EvaluationMetrics {
    /// Derive the ratios from confusion-matrix counts.
    ///
    /// Every ratio with a zero denominator is 0.
    pub fn from_confusion(tp: u64, fp: u64, tn: u64, fn_: u64) -> Self {
        let total = tp + fp + tn + fn_;
        let accuracy = ratio(tp + tn, total);
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1_score = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            accuracy,
            precision,
            recall,
            f1_score,
            true_positives: tp,
            false_positives: fp,
            true_negatives: tn,
            false_negatives: fn_,
        }
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Fraction of fraud rows in [`synthetic_dataset`].
pub const SYNTHETIC_FRAUD_RATE: f64 = 0.2;

/// Generate labelled examples with fraud-like and normal feature ranges.
///
/// Fraud rows draw every feature from the upper part of [0, 1], normal rows
/// from the lower part, so the set is linearly separable.
pub fn synthetic_dataset(samples: usize, seed: u64) -> Vec<TrainingExample> {
    let mut rng = StdRng::seed_from_u64(seed);

    // (fraud low, fraud span, normal span) per feature, in schema order
    let ranges: [(f64, f64, f64); FeatureName::COUNT] = [
        (0.2, 0.8, 0.5),
        (0.4, 0.6, 0.3),
        (0.5, 0.5, 0.2),
        (0.6, 0.4, 0.3),
        (0.7, 0.3, 0.2),
    ];

    (0..samples)
        .map(|_| {
            let is_fraud = rng.gen_bool(SYNTHETIC_FRAUD_RATE);
            let mut values = [0.0; FeatureName::COUNT];
            for (value, &(low, fraud_span, normal_span)) in values.iter_mut().zip(ranges.iter()) {
                *value = if is_fraud {
                    low + rng.gen::<f64>() * fraud_span
                } else {
                    rng.gen::<f64>() * normal_span
                };
            }
            TrainingExample::new(FeatureVector::from_values(values), is_fraud)
        })
        .collect()
}
