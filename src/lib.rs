//! Fraud Decision Engine Library
//!
//! Turns one transaction's signals into a risk score, a risk level and an
//! approve/review/block decision, combining a rule pipeline with a trainable
//! logistic risk model.

pub mod config;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod feature_extractor;
pub mod metrics;
pub mod models;
pub mod producer;
pub mod rules;
pub mod signals;
pub mod sinks;
pub mod types;

pub use config::AppConfig;
pub use consumer::CheckConsumer;
pub use engine::{DecisionEngine, DecisionEngineBuilder, DecisionStage};
pub use error::{ConfigError, EngineError, ModelError, SignalError, SinkError};
pub use feature_extractor::{FeatureExtractor, FeatureName, FeatureVector};
pub use metrics::EngineMetrics;
pub use models::{BlendPolicy, ModelLoader, ModelSlot, RiskModel};
pub use producer::NatsPublisher;
pub use signals::{InMemorySignalStore, SignalStore};
pub use sinks::{AlertChannel, InMemorySink, ResultSink};
pub use types::{Decision, DecisionResult, Flag, FraudAlert, RiskLevel, RuleResult, TransactionSignal};
