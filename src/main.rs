//! Fraud Decision Engine - Main Entry Point
//!
//! Consumes fraud check requests from NATS, decides each one on its own task,
//! answers the requester and publishes results and high-risk alerts.

use anyhow::{Context, Result};
use fraud_decision_engine::{
    config::{AppConfig, LoggingConfig},
    consumer::{decode_request, CheckConsumer},
    engine::DecisionEngine,
    metrics::{EngineMetrics, MetricsReporter},
    models::ModelLoader,
    producer::NatsPublisher,
    signals::InMemorySignalStore,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const UNAVAILABLE_REPLY: &str = "decisioning temporarily unavailable";

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("fraud_decision_engine={}", logging.level))?,
    };

    if logging.format == "pretty" {
        tracing_subscriber::fmt().with_env_filter(filter).pretty().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.logging)?;

    info!("Starting Fraud Decision Engine");
    info!(
        deadline_ms = config.engine.deadline_ms,
        lookup_timeout_ms = config.engine.lookup_timeout_ms,
        blend = ?config.model.blend,
        "Configuration loaded successfully"
    );

    let metrics = Arc::new(EngineMetrics::new());
    let retention = config
        .rules
        .velocity_window()
        .max(config.rules.location_window());
    let store = Arc::new(InMemorySignalStore::with_retention(retention));

    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    info!("Connected to NATS at {}", config.nats.url);

    let publisher = NatsPublisher::new(
        client.clone(),
        &config.nats.result_subject,
        &config.nats.alert_subject,
    );

    let engine = Arc::new(
        DecisionEngine::builder(&config, store.clone())
            .with_model_loader(ModelLoader::from_dir(config.model.storage_path()))
            .with_result_sink(Arc::new(publisher.clone()))
            .with_alert_channel(Arc::new(publisher.clone()))
            .with_metrics(metrics.clone())
            .build()?,
    );
    let model = engine.model_snapshot();
    info!(
        version = %model.version(),
        trained = model.is_trained(),
        "Risk model ready"
    );

    let consumer = CheckConsumer::new(client.clone(), &config.nats.check_subject);
    let mut subscription = consumer.subscribe().await?;

    let workers = config.pipeline.workers;
    info!(
        workers = workers,
        check_subject = %config.nats.check_subject,
        result_subject = %publisher.result_subject(),
        alert_subject = %publisher.alert_subject(),
        "Starting check processing loop"
    );

    let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.metrics_interval_secs);
    tokio::spawn(reporter.start());

    let semaphore = Arc::new(Semaphore::new(workers));
    let processed = Arc::new(AtomicU64::new(0));

    loop {
        let message = tokio::select! {
            message = subscription.next() => match message {
                Some(message) => message,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        };

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Worker pool closed")?;

        let engine = engine.clone();
        let store = store.clone();
        let publisher = publisher.clone();
        let metrics = metrics.clone();
        let processed = processed.clone();

        tokio::spawn(async move {
            let _permit = permit;

            let tx = match decode_request(&message.payload) {
                Ok(tx) => tx,
                Err(e) => {
                    warn!(error = %e, "Failed to deserialize check request");
                    if let Some(reply_to) = message.reply {
                        let reason = format!("{:#}", e);
                        if let Err(e) = publisher.reply_error(reply_to, &reason).await {
                            debug!(error = %e, "Failed to send error reply");
                        }
                    }
                    return;
                }
            };

            match engine.check(&tx).await {
                Ok(result) => {
                    store.record_transaction(&tx.customer_id, &tx.country, tx.timestamp);
                    if let Some(device) = tx.device() {
                        store.add_known_device(&tx.customer_id, device);
                    }

                    if let Some(reply_to) = message.reply {
                        if let Err(e) = publisher.reply(reply_to, &result).await {
                            error!(
                                transaction_id = %tx.transaction_id,
                                error = %e,
                                "Failed to reply to check request"
                            );
                        }
                    }

                    let count = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    if count % 100 == 0 {
                        info!(
                            processed = count,
                            throughput = format!("{:.1} checks/s", metrics.throughput()),
                            avg_latency_us = metrics.processing_stats().mean_us,
                            "Processing milestone"
                        );
                    }
                }
                Err(e) => {
                    error!(
                        transaction_id = %tx.transaction_id,
                        error = %e,
                        "Fraud check failed"
                    );
                    if let Some(reply_to) = message.reply {
                        if let Err(e) = publisher.reply_error(reply_to, UNAVAILABLE_REPLY).await {
                            debug!(error = %e, "Failed to send error reply");
                        }
                    }
                }
            }
        });
    }

    info!("Decision engine shutting down...");
    if let Err(e) = client.flush().await {
        warn!(error = %e, "Failed to flush NATS client");
    }
    metrics.print_summary();

    Ok(())
}
