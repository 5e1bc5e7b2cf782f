//! Offline Risk Model Trainer
//!
//! Trains the logistic risk model on a seeded synthetic dataset, reports
//! held-out metrics and writes the model to the configured model storage.
//!
//! Usage: train-model [samples] [seed] [epochs]

use anyhow::{Context, Result};
use fraud_decision_engine::config::AppConfig;
use fraud_decision_engine::models::{synthetic_dataset, ModelLoader, RiskModel};
use tracing::{info, warn};

const TRAIN_FRACTION: f64 = 0.8;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("train_model=info".parse()?)
                .add_directive("fraud_decision_engine=info".parse()?),
        )
        .init();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Configuration unavailable, using defaults");
            AppConfig::default()
        }
    };

    let args: Vec<String> = std::env::args().collect();
    let samples: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(10_000);
    let seed: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(42);
    let mut params = config.model.training.to_params(seed);
    if let Some(epochs) = args.get(3).and_then(|s| s.parse().ok()) {
        params.epochs = epochs;
    }

    info!(
        samples = samples,
        seed = seed,
        epochs = params.epochs,
        batch_size = params.batch_size,
        learning_rate = params.learning_rate,
        "Generating synthetic training data"
    );

    let data = synthetic_dataset(samples, seed);
    let split = ((data.len() as f64) * TRAIN_FRACTION) as usize;
    let (train, test) = data.split_at(split);

    let baseline = RiskModel::pretrained().evaluate(test);
    info!(
        accuracy = baseline.accuracy,
        f1_score = baseline.f1_score,
        "Pretrained model on held-out data"
    );

    let outcome = RiskModel::untrained()
        .train(train, &params)
        .context("Training failed")?;
    let metrics = outcome.model.evaluate(test);

    info!(
        final_loss = outcome.history.last().map(|s| s.loss).unwrap_or_default(),
        accuracy = metrics.accuracy,
        precision = metrics.precision,
        recall = metrics.recall,
        f1_score = metrics.f1_score,
        true_positives = metrics.true_positives,
        false_positives = metrics.false_positives,
        true_negatives = metrics.true_negatives,
        false_negatives = metrics.false_negatives,
        "Trained model on held-out data"
    );
    info!(
        weights = ?outcome.model.weights(),
        bias = outcome.model.bias(),
        "Learned parameters"
    );

    let loader = ModelLoader::from_dir(config.model.storage_path());
    loader
        .save(&config.model.name, &outcome.model)
        .with_context(|| format!("Failed to save model to {}", config.model.storage_dir))?;

    info!(
        model = %config.model.name,
        dir = %config.model.storage_dir,
        "Model written"
    );
    Ok(())
}
