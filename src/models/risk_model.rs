//! Logistic regression risk model.
//!
//! A `RiskModel` value is never modified once it serves predictions. Training
//! works on a private copy and returns a new model.

use crate::error::ModelError;
use crate::feature_extractor::{FeatureName, FeatureVector};
use crate::models::training::{
    EpochStats, EvaluationMetrics, TrainingExample, TrainingOutcome, TrainingParams,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

/// Version assigned to freshly created models.
pub const MODEL_VERSION: &str = "1.0.0";

/// Default learning rate of new models.
pub const DEFAULT_LEARNING_RATE: f64 = 0.01;

/// Probability above which a transaction is classified as fraud.
pub const CLASSIFICATION_THRESHOLD: f64 = 0.5;

/// Predictions are kept this far from 0 and 1 before taking logarithms.
const PROBABILITY_FLOOR: f64 = 1e-15;

/// Calibrated weights served when no trained model is available.
pub const PRETRAINED_WEIGHTS: [f64; FeatureName::COUNT] = [
    0.35, // amount
    0.28, // velocity
    0.18, // new_location
    0.12, // unusual_hour
    0.07, // new_device
];

/// Bias of the pretrained model.
pub const PRETRAINED_BIAS: f64 = -0.45;

/// Logistic regression over the fixed feature schema.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskModel {
    weights: [f64; FeatureName::COUNT],
    bias: f64,
    learning_rate: f64,
    trained: bool,
    version: String,
}

impl RiskModel {
    /// Untrained model with zero weights; predicts 50 for everything.
    pub fn untrained() -> Self {
        Self {
            weights: [0.0; FeatureName::COUNT],
            bias: 0.0,
            learning_rate: DEFAULT_LEARNING_RATE,
            trained: false,
            version: MODEL_VERSION.to_string(),
        }
    }

    /// Model with the calibrated default weights.
    pub fn pretrained() -> Self {
        Self {
            weights: PRETRAINED_WEIGHTS,
            bias: PRETRAINED_BIAS,
            learning_rate: DEFAULT_LEARNING_RATE,
            trained: true,
            version: MODEL_VERSION.to_string(),
        }
    }

    pub fn from_parts(
        weights: [f64; FeatureName::COUNT],
        bias: f64,
        learning_rate: f64,
        trained: bool,
        version: impl Into<String>,
    ) -> Self {
        Self {
            weights,
            bias,
            learning_rate,
            trained,
            version: version.into(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn weight(&self, feature: FeatureName) -> f64 {
        self.weights[feature.index()]
    }

    pub fn weights(&self) -> &[f64; FeatureName::COUNT] {
        &self.weights
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Fraud probability in [0, 1].
    pub fn probability(&self, features: &FeatureVector) -> f64 {
        let z = self.bias
            + self
                .weights
                .iter()
                .zip(features.as_array())
                .map(|(weight, value)| weight * value)
                .sum::<f64>();
        sigmoid(z)
    }

    /// Fraud probability scaled to [0, 100].
    pub fn predict(&self, features: &FeatureVector) -> f64 {
        self.probability(features) * 100.0
    }

    /// Mean binary cross-entropy over `examples`.
    pub fn average_loss(&self, examples: &[TrainingExample]) -> f64 {
        if examples.is_empty() {
            return 0.0;
        }
        let total: f64 = examples
            .iter()
            .map(|ex| log_loss(self.probability(&ex.features), ex.target()))
            .sum();
        total / examples.len() as f64
    }

    /// Mini-batch gradient descent on binary cross-entropy.
    ///
    /// Starts from this model's parameters and returns a new model; `self`
    /// is left untouched. The shuffle order is fully determined by `params.seed`.
    pub fn train(
        &self,
        examples: &[TrainingExample],
        params: &TrainingParams,
    ) -> Result<TrainingOutcome, ModelError> {
        params.validate()?;
        if examples.is_empty() {
            return Err(ModelError::InvalidTrainingData(
                "no training examples".to_string(),
            ));
        }
        if let Some(bad) = examples.iter().position(|ex| ex.label > 1) {
            return Err(ModelError::InvalidTrainingData(format!(
                "example {} has label {}, expected 0 or 1",
                bad, examples[bad].label
            )));
        }

        info!(
            samples = examples.len(),
            epochs = params.epochs,
            batch_size = params.batch_size,
            learning_rate = params.learning_rate,
            "Starting training"
        );

        let mut model = self.clone();
        model.learning_rate = params.learning_rate;

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut order: Vec<usize> = (0..examples.len()).collect();
        let mut history = Vec::with_capacity(params.epochs);

        for epoch in 0..params.epochs {
            order.shuffle(&mut rng);

            let mut epoch_loss = 0.0;
            let mut correct = 0usize;

            for batch in order.chunks(params.batch_size) {
                let mut gradients = [0.0; FeatureName::COUNT];
                let mut bias_gradient = 0.0;

                for &idx in batch {
                    let example = &examples[idx];
                    let actual = example.target();
                    let prediction = model.probability(&example.features);

                    epoch_loss += log_loss(prediction, actual);
                    if (prediction > CLASSIFICATION_THRESHOLD) == example.is_fraud() {
                        correct += 1;
                    }

                    let error = prediction - actual;
                    for (gradient, value) in gradients.iter_mut().zip(example.features.as_array()) {
                        *gradient += error * value;
                    }
                    bias_gradient += error;
                }

                let batch_len = batch.len() as f64;
                for (weight, gradient) in model.weights.iter_mut().zip(gradients) {
                    *weight -= params.learning_rate * gradient / batch_len;
                }
                model.bias -= params.learning_rate * bias_gradient / batch_len;
            }

            let stats = EpochStats {
                epoch,
                loss: epoch_loss / examples.len() as f64,
                accuracy: correct as f64 / examples.len() as f64,
            };
            if epoch % 10 == 0 {
                info!(
                    epoch = epoch + 1,
                    epochs = params.epochs,
                    loss = stats.loss,
                    accuracy = stats.accuracy,
                    "Training progress"
                );
            }
            history.push(stats);
        }

        model.trained = true;
        debug!(weights = ?model.weights, bias = model.bias, "Training complete");

        Ok(TrainingOutcome { model, history })
    }

    /// Confusion matrix and derived ratios at the 0.5 threshold.
    pub fn evaluate(&self, examples: &[TrainingExample]) -> EvaluationMetrics {
        let (mut tp, mut fp, mut tn, mut fn_) = (0u64, 0u64, 0u64, 0u64);

        for example in examples {
            let predicted = self.probability(&example.features) > CLASSIFICATION_THRESHOLD;
            match (predicted, example.is_fraud()) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, false) => tn += 1,
                (false, true) => fn_ += 1,
            }
        }

        EvaluationMetrics::from_confusion(tp, fp, tn, fn_)
    }
}

impl Default for RiskModel {
    fn default() -> Self {
        Self::pretrained()
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn log_loss(prediction: f64, actual: f64) -> f64 {
    let p = prediction.clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR);
    -actual * p.ln() - (1.0 - actual) * (1.0 - p).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::training::synthetic_dataset;
    use proptest::prelude::*;

    fn features(values: [f64; FeatureName::COUNT]) -> FeatureVector {
        FeatureVector::from_values(values)
    }

    #[test]
    fn test_untrained_predicts_even_odds() {
        let model = RiskModel::untrained();
        assert!(!model.is_trained());
        assert_eq!(model.predict(&features([1.0, 1.0, 0.0, 1.0, 0.0])), 50.0);
    }

    #[test]
    fn test_pretrained_prediction() {
        let model = RiskModel::pretrained();

        // bias + amount weight
        let expected = 100.0 / (1.0 + (-(-0.45_f64 + 0.35)).exp());
        let predicted = model.predict(&features([1.0, 0.0, 0.0, 0.0, 0.0]));

        assert!((predicted - expected).abs() < 1e-12);
        assert!(predicted < 50.0);
        assert!(model.predict(&features([1.0; 5])) > 50.0);
    }

    #[test]
    fn test_log_loss_is_finite_at_extremes() {
        assert!(log_loss(0.0, 1.0).is_finite());
        assert!(log_loss(1.0, 0.0).is_finite());
        assert!(log_loss(1.0, 1.0) < 1e-9);
    }

    #[test]
    fn test_training_decreases_loss() {
        let data = synthetic_dataset(500, 42);
        let params = TrainingParams {
            epochs: 30,
            batch_size: 32,
            learning_rate: 0.5,
            seed: 7,
        };

        let base = RiskModel::untrained();
        let outcome = base.train(&data, &params).unwrap();

        let first = outcome.history.first().unwrap().loss;
        let last = outcome.history.last().unwrap().loss;
        assert!(last < first, "loss {} -> {}", first, last);
        assert!(outcome.model.average_loss(&data) < base.average_loss(&data));
        assert!(outcome.model.is_trained());
        assert_eq!(outcome.model.learning_rate(), 0.5);

        // the starting model is not modified
        assert_eq!(base, RiskModel::untrained());
    }

    #[test]
    fn test_training_is_reproducible() {
        let data = synthetic_dataset(200, 1);
        let params = TrainingParams {
            epochs: 5,
            batch_size: 16,
            learning_rate: 0.1,
            seed: 99,
        };

        let a = RiskModel::untrained().train(&data, &params).unwrap();
        let b = RiskModel::untrained().train(&data, &params).unwrap();
        assert_eq!(a.model, b.model);
        assert_eq!(a.history, b.history);
    }

    #[test]
    fn test_trained_model_separates_synthetic_data() {
        let train = synthetic_dataset(1000, 3);
        let test = synthetic_dataset(300, 4);
        let params = TrainingParams {
            epochs: 100,
            batch_size: 32,
            learning_rate: 0.5,
            seed: 11,
        };

        let model = RiskModel::untrained().train(&train, &params).unwrap().model;
        let metrics = model.evaluate(&test);

        assert!(metrics.accuracy > 0.9, "accuracy {}", metrics.accuracy);
        assert!(metrics.recall > 0.5, "recall {}", metrics.recall);
        assert_eq!(
            metrics.true_positives
                + metrics.false_positives
                + metrics.true_negatives
                + metrics.false_negatives,
            300
        );
    }

    #[test]
    fn test_train_rejects_bad_input() {
        let model = RiskModel::untrained();
        let params = TrainingParams::default();

        assert!(matches!(
            model.train(&[], &params),
            Err(ModelError::InvalidTrainingData(_))
        ));

        let bad_label = TrainingExample {
            features: FeatureVector::default(),
            label: 2,
        };
        assert!(model.train(&[bad_label], &params).is_err());

        let bad_params = TrainingParams {
            batch_size: 0,
            ..params
        };
        let ok_example = TrainingExample::new(FeatureVector::default(), false);
        assert!(matches!(
            model.train(&[ok_example], &bad_params),
            Err(ModelError::InvalidHyperParameters(_))
        ));
    }

    #[test]
    fn test_evaluate_all_negative_predictions() {
        // Strong negative bias: never predicts fraud, so precision has no denominator
        let model = RiskModel::from_parts([0.0; 5], -10.0, 0.01, true, "test");
        let data = synthetic_dataset(100, 5);

        let metrics = model.evaluate(&data);
        assert_eq!(metrics.precision, 0.0);
        assert_eq!(metrics.recall, 0.0);
        assert_eq!(metrics.f1_score, 0.0);
        assert!(!metrics.accuracy.is_nan());
    }

    proptest! {
        #[test]
        fn prop_predict_is_deterministic_and_bounded(
            values in prop::array::uniform5(0.0f64..=1.0),
            weights in prop::array::uniform5(-5.0f64..5.0),
            bias in -5.0f64..5.0,
        ) {
            let model = RiskModel::from_parts(weights, bias, 0.01, true, "prop");
            let fv = features(values);

            let first = model.predict(&fv);
            for _ in 0..3 {
                prop_assert_eq!(model.predict(&fv), first);
            }
            prop_assert!((0.0..=100.0).contains(&first));
        }

        #[test]
        fn prop_metrics_are_ratios(
            tp in 0u64..1000, fp in 0u64..1000, tn in 0u64..1000, fn_ in 0u64..1000,
        ) {
            let m = EvaluationMetrics::from_confusion(tp, fp, tn, fn_);
            for value in [m.accuracy, m.precision, m.recall, m.f1_score] {
                prop_assert!((0.0..=1.0).contains(&value));
            }
        }
    }
}
