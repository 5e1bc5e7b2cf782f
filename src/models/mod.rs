//! Risk model, training and score aggregation

pub mod aggregator;
pub mod inference;
pub mod loader;
pub mod risk_model;
pub mod training;

pub use aggregator::{BlendPolicy, DecisionPolicy, ScoreAggregator};
pub use inference::ModelSlot;
pub use loader::{FileModelStorage, InMemoryModelStorage, ModelLoader, ModelStorage};
pub use risk_model::RiskModel;
pub use training::{
    synthetic_dataset, EvaluationMetrics, TrainingExample, TrainingParams, TrainingReport,
};
