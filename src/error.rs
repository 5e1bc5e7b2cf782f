//! Error types for the decision engine.
//!
//! Only [`EngineError`] ever reaches the caller of a fraud check. Everything
//! else degrades to a conservative decision inside the engine.

use thiserror::Error;

/// Failure of a single Signal Store lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("signal lookup `{lookup}` timed out")]
    Timeout { lookup: &'static str },

    #[error("signal lookup `{lookup}` unavailable: {reason}")]
    Unavailable { lookup: &'static str, reason: String },
}

impl SignalError {
    pub fn unavailable(lookup: &'static str, reason: impl Into<String>) -> Self {
        SignalError::Unavailable {
            lookup,
            reason: reason.into(),
        }
    }

    /// Name of the lookup that failed.
    pub fn lookup(&self) -> &'static str {
        match self {
            SignalError::Timeout { lookup } | SignalError::Unavailable { lookup, .. } => lookup,
        }
    }
}

/// Errors from training, evaluating or persisting the risk model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid training data: {0}")]
    InvalidTrainingData(String),

    #[error("invalid hyper-parameters: {0}")]
    InvalidHyperParameters(String),

    #[error("corrupt model blob: {0}")]
    Corrupt(String),

    #[error("model storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("model serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("training task failed: {0}")]
    TrainingTask(String),
}

/// Errors from the Result Sink and Alert Channel collaborators.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("publish failed: {0}")]
    Publish(String),

    #[error("sink closed")]
    Closed,

    #[error("encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failures surfaced by a fraud check.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("rule evaluator `{rule}` panicked")]
    EvaluatorPanicked { rule: &'static str },

    #[error("decisioning temporarily unavailable: {0}")]
    Unavailable(String),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
