//! Feature extraction for risk model inference.
//!
//! The feature schema is closed and ordered: model weights and feature
//! vectors are both indexed by [`FeatureName`], so they always line up.
//! Normalization constants are part of the schema; the pretrained weights
//! are calibrated against them.

use crate::types::transaction::TransactionSignal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version of the feature schema below. Bump when names or scaling change.
pub const FEATURE_SCHEMA_VERSION: &str = "1";

/// Amount (in reference units) that maps to a saturated amount feature.
pub const AMOUNT_SCALE: f64 = 10_000.0;

/// Trailing-hour transaction count that maps to a saturated velocity feature.
pub const VELOCITY_SCALE: f64 = 20.0;

/// Names of the model input features, in schema order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureName {
    Amount,
    Velocity,
    NewLocation,
    UnusualHour,
    NewDevice,
}

impl FeatureName {
    pub const COUNT: usize = 5;

    pub const ALL: [FeatureName; FeatureName::COUNT] = [
        FeatureName::Amount,
        FeatureName::Velocity,
        FeatureName::NewLocation,
        FeatureName::UnusualHour,
        FeatureName::NewDevice,
    ];

    /// Position of the feature in vectors and weight arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureName::Amount => "amount",
            FeatureName::Velocity => "velocity",
            FeatureName::NewLocation => "new_location",
            FeatureName::UnusualHour => "unusual_hour",
            FeatureName::NewDevice => "new_device",
        }
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized feature values, each within [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    values: [f64; FeatureName::COUNT],
}

impl FeatureVector {
    /// Build a vector from raw values in schema order.
    ///
    /// Out-of-range values are clamped; non-finite values become 0.0.
    pub fn from_values(values: [f64; FeatureName::COUNT]) -> Self {
        Self {
            values: values.map(normalize),
        }
    }

    pub fn get(&self, name: FeatureName) -> f64 {
        self.values[name.index()]
    }

    pub fn set(&mut self, name: FeatureName, value: f64) {
        self.values[name.index()] = normalize(value);
    }

    pub fn as_array(&self) -> &[f64; FeatureName::COUNT] {
        &self.values
    }

    /// Iterate `(name, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (FeatureName, f64)> + '_ {
        FeatureName::ALL
            .iter()
            .map(move |&name| (name, self.values[name.index()]))
    }
}

/// Historical inputs gathered for one transaction.
///
/// Anything the engine could not observe stays at its neutral default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoricalCounters {
    /// Amount converted into the reference currency; falls back to the raw amount
    pub reference_amount: Option<f64>,
    /// Transactions by this customer in the trailing hour
    pub velocity_count: u32,
    pub new_location: bool,
    pub unusual_hour: bool,
    pub new_device: bool,
}

/// Feature extractor that transforms transaction signals into model input features.
pub struct FeatureExtractor;

impl FeatureExtractor {
    /// Create a new feature extractor.
    pub fn new() -> Self {
        Self
    }

    /// Extract the normalized feature vector. Never fails.
    pub fn extract(&self, tx: &TransactionSignal, counters: &HistoricalCounters) -> FeatureVector {
        let amount = counters.reference_amount.unwrap_or(tx.amount);

        // `set` saturates at 1.0 and maps NaN to 0.0
        let mut features = FeatureVector::default();
        features.set(FeatureName::Amount, amount / AMOUNT_SCALE);
        features.set(
            FeatureName::Velocity,
            counters.velocity_count as f64 / VELOCITY_SCALE,
        );
        features.set(FeatureName::NewLocation, flag(counters.new_location));
        features.set(FeatureName::UnusualHour, flag(counters.unusual_hour));
        features.set(FeatureName::NewDevice, flag(counters.new_device));
        features
    }

    /// Get the number of features produced.
    pub fn feature_count(&self) -> usize {
        FeatureName::COUNT
    }

    /// Get feature names in schema order.
    pub fn feature_names(&self) -> Vec<&'static str> {
        FeatureName::ALL.iter().map(FeatureName::as_str).collect()
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn normalize(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(amount: f64) -> TransactionSignal {
        TransactionSignal::new("test_001", amount, "USD", "alice@example.com", "US")
    }

    #[test]
    fn test_feature_extraction() {
        let extractor = FeatureExtractor::new();
        let counters = HistoricalCounters {
            velocity_count: 5,
            new_location: true,
            ..Default::default()
        };

        let features = extractor.extract(&tx(2500.0), &counters);

        assert_eq!(features.get(FeatureName::Amount), 0.25);
        assert_eq!(features.get(FeatureName::Velocity), 0.25);
        assert_eq!(features.get(FeatureName::NewLocation), 1.0);
        assert_eq!(features.get(FeatureName::UnusualHour), 0.0);
        assert_eq!(features.get(FeatureName::NewDevice), 0.0);
    }

    #[test]
    fn test_saturation() {
        let extractor = FeatureExtractor::new();
        let counters = HistoricalCounters {
            velocity_count: 45,
            ..Default::default()
        };

        let features = extractor.extract(&tx(15000.0), &counters);

        assert_eq!(features.get(FeatureName::Amount), 1.0);
        assert_eq!(features.get(FeatureName::Velocity), 1.0);
    }

    #[test]
    fn test_reference_amount_takes_precedence() {
        let extractor = FeatureExtractor::new();
        let counters = HistoricalCounters {
            reference_amount: Some(5000.0),
            ..Default::default()
        };

        let features = extractor.extract(&tx(100.0), &counters);
        assert_eq!(features.get(FeatureName::Amount), 0.5);
    }

    #[test]
    fn test_bad_amounts_are_neutral() {
        let extractor = FeatureExtractor::new();
        let counters = HistoricalCounters::default();

        for amount in [f64::NAN, f64::NEG_INFINITY, -50.0] {
            let features = extractor.extract(&tx(amount), &counters);
            assert_eq!(features.get(FeatureName::Amount), 0.0);
        }
    }

    #[test]
    fn test_feature_count() {
        let extractor = FeatureExtractor::new();
        assert_eq!(extractor.feature_count(), 5);
        assert_eq!(
            extractor.feature_names(),
            vec!["amount", "velocity", "new_location", "unusual_hour", "new_device"]
        );
    }
}
