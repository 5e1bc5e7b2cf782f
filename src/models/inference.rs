//! Serving slot for the current risk model

use crate::error::ModelError;
use crate::feature_extractor::FeatureVector;
use crate::models::risk_model::RiskModel;
use crate::models::training::{TrainingExample, TrainingParams, TrainingReport};
use arc_swap::ArcSwap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Holds the model that serves predictions.
///
/// Readers take a snapshot and never block. Training runs at most once at a
/// time and swaps the new model in only after it completes.
pub struct ModelSlot {
    current: ArcSwap<RiskModel>,
    training: Mutex<()>,
}

impl ModelSlot {
    pub fn new(model: RiskModel) -> Self {
        info!(
            version = %model.version(),
            trained = model.is_trained(),
            "Model slot initialized"
        );
        Self {
            current: ArcSwap::from_pointee(model),
            training: Mutex::new(()),
        }
    }

    /// The model serving right now.
    pub fn snapshot(&self) -> Arc<RiskModel> {
        self.current.load_full()
    }

    /// Score in [0, 100] from the current model.
    pub fn predict(&self, features: &FeatureVector) -> f64 {
        self.current.load().predict(features)
    }

    /// Replace the serving model.
    pub fn install(&self, model: RiskModel) -> Arc<RiskModel> {
        let model = Arc::new(model);
        self.current.store(Arc::clone(&model));
        debug!(version = %model.version(), "Model installed");
        model
    }

    /// Train from the current model and install the result.
    ///
    /// Concurrent calls queue behind each other. On error the serving model
    /// is left as it was.
    pub async fn train(
        &self,
        examples: Vec<TrainingExample>,
        params: TrainingParams,
    ) -> Result<TrainingReport, ModelError> {
        let _guard = self.training.lock().await;
        let base = self.snapshot();

        let outcome = tokio::task::spawn_blocking(move || base.train(&examples, &params))
            .await
            .map_err(|e| ModelError::TrainingTask(e.to_string()))??;

        let model = self.install(outcome.model);
        info!(
            version = %model.version(),
            epochs = outcome.history.len(),
            final_loss = outcome.history.last().map(|s| s.loss).unwrap_or_default(),
            "Retrained model installed"
        );

        Ok(TrainingReport {
            model,
            history: outcome.history,
        })
    }
}

impl Default for ModelSlot {
    fn default() -> Self {
        Self::new(RiskModel::pretrained())
    }
}
