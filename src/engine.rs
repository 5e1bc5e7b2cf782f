//! Decision engine: orchestrates one fraud check from signals to decision.
//!
//! A check moves through [`DecisionStage`]s in order. History lookups run
//! first and concurrently, bounded by the request deadline; everything after
//! that is synchronous and cannot block. Lookup failures, sink failures and
//! alert failures all degrade to a complete decision. Only a panicking
//! evaluator fails the check.

use crate::config::AppConfig;
use crate::error::{EngineError, ModelError};
use crate::feature_extractor::FeatureExtractor;
use crate::metrics::EngineMetrics;
use crate::models::aggregator::{DecisionPolicy, ScoreAggregator};
use crate::models::inference::ModelSlot;
use crate::models::loader::ModelLoader;
use crate::models::risk_model::RiskModel;
use crate::models::training::{
    EvaluationMetrics, TrainingExample, TrainingParams, TrainingReport,
};
use crate::rules::{
    default_rules, local_hour, CurrencyConverter, HourWindow, RuleContext, RuleEvaluation,
    RuleEvaluator,
};
use crate::signals::{SignalGatherer, SignalStore};
use crate::sinks::{AlertChannel, LogAlertChannel, LogResultSink, ResultSink};
use crate::types::alert::FraudAlert;
use crate::types::decision::{DecisionResult, Flag, RiskLevel, RuleResult};
use crate::types::transaction::TransactionSignal;
use chrono::{FixedOffset, Utc};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// Progress of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DecisionStage {
    Received,
    FeaturesExtracted,
    RulesEvaluated,
    Scored,
    Decided,
    Persisted,
}

impl DecisionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStage::Received => "received",
            DecisionStage::FeaturesExtracted => "features_extracted",
            DecisionStage::RulesEvaluated => "rules_evaluated",
            DecisionStage::Scored => "scored",
            DecisionStage::Decided => "decided",
            DecisionStage::Persisted => "persisted",
        }
    }
}

fn enter_stage(tx: &TransactionSignal, stage: DecisionStage) {
    debug!(
        transaction_id = %tx.transaction_id,
        stage = stage.as_str(),
        "Check stage reached"
    );
}

/// Rule results and flags of one check.
struct RuleOutcome {
    rules: Vec<RuleResult>,
    flags: Vec<Flag>,
    failed_rules: Vec<String>,
}

/// Fraud decision engine shared by all concurrent checks
pub struct DecisionEngine {
    gatherer: SignalGatherer,
    evaluators: Vec<Arc<dyn RuleEvaluator>>,
    extractor: FeatureExtractor,
    converter: CurrencyConverter,
    local_offset: FixedOffset,
    unusual_hours: HourWindow,
    model: Arc<ModelSlot>,
    aggregator: ScoreAggregator,
    loader: Option<ModelLoader>,
    model_name: String,
    result_sink: Arc<dyn ResultSink>,
    alert_channel: Arc<dyn AlertChannel>,
    metrics: Arc<EngineMetrics>,
    deadline: Duration,
    sink_timeout: Duration,
}

impl DecisionEngine {
    pub fn builder(config: &AppConfig, store: Arc<dyn SignalStore>) -> DecisionEngineBuilder {
        DecisionEngineBuilder::new(config, store)
    }

    /// Run a check within the configured deadline.
    pub async fn check(&self, tx: &TransactionSignal) -> Result<DecisionResult, EngineError> {
        self.check_with_deadline(tx, Instant::now() + self.deadline)
            .await
    }

    /// Run a check that must be decided by `deadline`.
    ///
    /// Lookups still in flight at the deadline are abandoned and their rules
    /// contribute nothing.
    pub async fn check_with_deadline(
        &self,
        tx: &TransactionSignal,
        deadline: Instant,
    ) -> Result<DecisionResult, EngineError> {
        let started = std::time::Instant::now();
        enter_stage(tx, DecisionStage::Received);

        let history = self.gatherer.gather(tx, deadline).await;
        let reference_amount = self.converter.to_reference(tx.amount, &tx.currency);
        let hour = local_hour(tx.timestamp, self.local_offset);
        let counters = history.counters(tx, reference_amount, self.unusual_hours.contains(hour));
        let features = self.extractor.extract(tx, &counters);
        enter_stage(tx, DecisionStage::FeaturesExtracted);

        let ctx = RuleContext {
            tx,
            history: &history,
            reference_amount,
            local_hour: hour,
        };
        let outcome = match self.evaluate_rules(&ctx) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.record_check_failure();
                return Err(e);
            }
        };
        enter_stage(tx, DecisionStage::RulesEvaluated);

        let model_score = Some(self.model.predict(&features)).filter(|score| score.is_finite());
        let aggregated = self
            .aggregator
            .aggregate(&outcome.rules, &outcome.flags, model_score);
        enter_stage(tx, DecisionStage::Scored);

        let (risk_level, decision) = DecisionPolicy::decide(aggregated.score);
        let elapsed = started.elapsed();
        let result = DecisionResult {
            decision_id: uuid::Uuid::new_v4().to_string(),
            transaction_id: tx.transaction_id.clone(),
            score: aggregated.score,
            risk_level,
            decision,
            flags: outcome.flags,
            rules: outcome.rules,
            model_score,
            failed_rules: outcome.failed_rules,
            timestamp: Utc::now(),
            processing_time_us: elapsed.as_micros() as u64,
        };
        enter_stage(tx, DecisionStage::Decided);

        self.metrics
            .record_decision(elapsed, result.score, risk_level, decision);
        if risk_level == RiskLevel::High {
            warn!(
                transaction_id = %result.transaction_id,
                score = result.score,
                risk_level = %risk_level,
                decision = %decision,
                flags = ?result.flags,
                "High risk transaction"
            );
        } else {
            debug!(
                transaction_id = %result.transaction_id,
                score = result.score,
                risk_level = %risk_level,
                decision = %decision,
                "Transaction decided"
            );
        }

        self.dispatch(&result, deadline).await;
        enter_stage(tx, DecisionStage::Persisted);

        Ok(result)
    }

    fn evaluate_rules(&self, ctx: &RuleContext<'_>) -> Result<RuleOutcome, EngineError> {
        let mut outcome = RuleOutcome {
            rules: Vec::with_capacity(self.evaluators.len()),
            flags: Vec::new(),
            failed_rules: Vec::new(),
        };

        for evaluator in &self.evaluators {
            let rule = evaluator.name();
            let evaluated = panic::catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(ctx)));

            let evaluation = match evaluated {
                Ok(Ok(evaluation)) => evaluation,
                Ok(Err(e)) => {
                    warn!(
                        transaction_id = %ctx.tx.transaction_id,
                        rule = rule,
                        error = %e,
                        "Rule signal unavailable, rule skipped"
                    );
                    self.metrics.record_rule_failure(rule);
                    outcome.failed_rules.push(rule.to_string());
                    RuleEvaluation::failed(rule, &e)
                }
                Err(_) => {
                    error!(
                        transaction_id = %ctx.tx.transaction_id,
                        rule = rule,
                        "Rule evaluator panicked"
                    );
                    return Err(EngineError::EvaluatorPanicked { rule });
                }
            };

            for flag in evaluation.flags {
                if !outcome.flags.contains(&flag) {
                    outcome.flags.push(flag);
                }
            }
            outcome.rules.push(evaluation.result);
        }

        Ok(outcome)
    }

    /// Hand the result to the sink and, for high risk, the alert channel.
    ///
    /// Both are cut at the sink timeout or the check deadline, whichever
    /// comes first. A sink that is ready still completes after the deadline.
    async fn dispatch(&self, result: &DecisionResult, deadline: Instant) {
        let limit = deadline.min(Instant::now() + self.sink_timeout);
        let persist = timeout_at(limit, self.result_sink.persist(result));
        let alert = async {
            if result.risk_level != RiskLevel::High {
                return None;
            }
            let alert = FraudAlert::from_decision(result);
            Some(timeout_at(limit, self.alert_channel.notify(&alert)).await)
        };

        let (persisted, alerted) = tokio::join!(persist, alert);

        match persisted {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.metrics.record_persist_failure();
                error!(
                    transaction_id = %result.transaction_id,
                    error = %e,
                    "Failed to persist decision"
                );
            }
            Err(_) => {
                self.metrics.record_persist_failure();
                error!(
                    transaction_id = %result.transaction_id,
                    sink_timeout_ms = self.sink_timeout.as_millis() as u64,
                    "Persisting decision timed out"
                );
            }
        }

        match alerted {
            None => {}
            Some(Ok(Ok(()))) => self.metrics.record_alert(),
            Some(Ok(Err(e))) => {
                self.metrics.record_alert_failure();
                error!(
                    transaction_id = %result.transaction_id,
                    error = %e,
                    "Failed to send fraud alert"
                );
            }
            Some(Err(_)) => {
                self.metrics.record_alert_failure();
                error!(
                    transaction_id = %result.transaction_id,
                    sink_timeout_ms = self.sink_timeout.as_millis() as u64,
                    "Sending fraud alert timed out"
                );
            }
        }
    }

    /// Train a new model from the serving one, install it and persist it.
    ///
    /// A persistence failure is returned after the new model is installed.
    pub async fn retrain(
        &self,
        examples: Vec<TrainingExample>,
        params: TrainingParams,
    ) -> Result<TrainingReport, ModelError> {
        let report = self.model.train(examples, params).await?;
        self.persist_model(Arc::clone(&report.model)).await?;
        Ok(report)
    }

    /// Persist the serving model, if a loader is configured.
    pub async fn save_model(&self) -> Result<(), ModelError> {
        self.persist_model(self.model.snapshot()).await
    }

    async fn persist_model(&self, model: Arc<RiskModel>) -> Result<(), ModelError> {
        let Some(loader) = self.loader.clone() else {
            debug!("No model storage configured, model kept in memory only");
            return Ok(());
        };
        let name = self.model_name.clone();

        let saved = tokio::task::spawn_blocking(move || loader.save(&name, &model))
            .await
            .map_err(|e| ModelError::TrainingTask(e.to_string()))?;
        if let Err(e) = &saved {
            error!(model = %self.model_name, error = %e, "Failed to persist model");
        }
        saved
    }

    /// Metrics of the serving model over labelled examples.
    pub fn evaluate_model(&self, examples: &[TrainingExample]) -> EvaluationMetrics {
        self.model.snapshot().evaluate(examples)
    }

    pub fn model_snapshot(&self) -> Arc<RiskModel> {
        self.model.snapshot()
    }

    pub fn model_slot(&self) -> Arc<ModelSlot> {
        Arc::clone(&self.model)
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.evaluators.iter().map(|rule| rule.name()).collect()
    }
}

/// Assembles a [`DecisionEngine`] from configuration and collaborators
pub struct DecisionEngineBuilder {
    config: AppConfig,
    store: Arc<dyn SignalStore>,
    evaluators: Option<Vec<Arc<dyn RuleEvaluator>>>,
    model: Option<RiskModel>,
    loader: Option<ModelLoader>,
    result_sink: Arc<dyn ResultSink>,
    alert_channel: Arc<dyn AlertChannel>,
    metrics: Option<Arc<EngineMetrics>>,
}

impl DecisionEngineBuilder {
    fn new(config: &AppConfig, store: Arc<dyn SignalStore>) -> Self {
        Self {
            config: config.clone(),
            store,
            evaluators: None,
            model: None,
            loader: None,
            result_sink: Arc::new(LogResultSink),
            alert_channel: Arc::new(LogAlertChannel),
            metrics: None,
        }
    }

    pub fn with_result_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.result_sink = sink;
        self
    }

    pub fn with_alert_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.alert_channel = channel;
        self
    }

    /// Serve this model instead of loading one.
    pub fn with_model(mut self, model: RiskModel) -> Self {
        self.model = Some(model);
        self
    }

    /// Load the serving model from, and persist retrained models to, this loader.
    pub fn with_model_loader(mut self, loader: ModelLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replace the standard rule set.
    pub fn with_evaluators(mut self, evaluators: Vec<Arc<dyn RuleEvaluator>>) -> Self {
        self.evaluators = Some(evaluators);
        self
    }

    pub fn build(self) -> Result<DecisionEngine, EngineError> {
        let config = self.config;
        let evaluators = self
            .evaluators
            .unwrap_or_else(|| default_rules(&config.rules));
        if evaluators.is_empty() {
            return Err(EngineError::Unavailable(
                "no rule evaluators configured".to_string(),
            ));
        }

        let model = match (self.model, &self.loader) {
            (Some(model), _) => model,
            (None, Some(loader)) => loader.load(&config.model.name),
            (None, None) => RiskModel::pretrained(),
        };

        let gatherer = SignalGatherer::new(
            self.store,
            config.rules.velocity_window(),
            config.rules.location_window(),
            config.engine.lookup_timeout(),
        );

        let engine = DecisionEngine {
            gatherer,
            extractor: FeatureExtractor::new(),
            converter: CurrencyConverter::new(
                &config.rules.reference_currency,
                config.rules.reference_rates.clone(),
            ),
            local_offset: config.rules.local_offset(),
            unusual_hours: HourWindow::new(
                config.rules.unusual_hour_start,
                config.rules.unusual_hour_end,
            ),
            model: Arc::new(ModelSlot::new(model)),
            aggregator: ScoreAggregator::new(config.model.blend),
            loader: self.loader,
            model_name: config.model.name.clone(),
            result_sink: self.result_sink,
            alert_channel: self.alert_channel,
            metrics: self.metrics.unwrap_or_default(),
            deadline: config.engine.deadline(),
            sink_timeout: config.engine.sink_timeout(),
            evaluators,
        };

        info!(
            rules = ?engine.rule_names(),
            blend = ?config.model.blend,
            deadline_ms = config.engine.deadline_ms,
            "Decision engine initialized"
        );
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SignalError, SinkError};
    use crate::signals::InMemorySignalStore;
    use crate::sinks::InMemorySink;
    use crate::types::decision::Decision;
    use chrono::TimeZone;

    struct PanickingRule;

    impl RuleEvaluator for PanickingRule {
        fn name(&self) -> &'static str {
            "panicking_rule"
        }

        fn evaluate(&self, _ctx: &RuleContext<'_>) -> Result<RuleEvaluation, SignalError> {
            panic!("evaluator bug");
        }
    }

    struct StalledSink;

    #[async_trait::async_trait]
    impl ResultSink for StalledSink {
        async fn persist(&self, _result: &DecisionResult) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }
    }

    fn noon_tx() -> TransactionSignal {
        TransactionSignal::new("tx-1", 50.0, "USD", "alice", "US")
            .at(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_empty_rule_set_is_rejected() {
        let store = Arc::new(InMemorySignalStore::new());
        let result = DecisionEngine::builder(&AppConfig::default(), store)
            .with_evaluators(Vec::new())
            .build();

        assert!(matches!(result, Err(EngineError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_panicking_evaluator_fails_check() {
        let store = Arc::new(InMemorySignalStore::new());
        let sink = Arc::new(InMemorySink::new());
        let engine = DecisionEngine::builder(&AppConfig::default(), store)
            .with_evaluators(vec![Arc::new(PanickingRule)])
            .with_result_sink(sink.clone())
            .build()
            .unwrap();

        let result = engine.check(&noon_tx()).await;

        assert!(matches!(
            result,
            Err(EngineError::EvaluatorPanicked { rule: "panicking_rule" })
        ));
        assert!(sink.results().is_empty());
        assert_eq!(
            engine
                .metrics()
                .checks_failed
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_quiet_transaction_is_approved_and_persisted() {
        let store = Arc::new(InMemorySignalStore::new());
        let sink = Arc::new(InMemorySink::new());
        let engine = DecisionEngine::builder(&AppConfig::default(), store)
            .with_result_sink(sink.clone())
            .with_alert_channel(sink.clone())
            .build()
            .unwrap();

        let result = engine.check(&noon_tx()).await.unwrap();

        assert_eq!(result.score, 0);
        assert_eq!(result.decision, Decision::Approve);
        assert!(result.flags.is_empty());
        assert_eq!(result.rules.len(), 6);
        assert!(result.model_score.is_some());
        assert_eq!(sink.results().len(), 1);
        assert!(sink.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_save_without_loader_is_noop() {
        let store = Arc::new(InMemorySignalStore::new());
        let engine = DecisionEngine::builder(&AppConfig::default(), store)
            .build()
            .unwrap();

        assert!(engine.save_model().await.is_ok());
        assert_eq!(*engine.model_snapshot(), RiskModel::pretrained());
    }

    #[tokio::test]
    async fn test_stalled_sink_does_not_hold_the_deadline() {
        let store = Arc::new(InMemorySignalStore::new());
        let engine = DecisionEngine::builder(&AppConfig::default(), store)
            .with_result_sink(Arc::new(StalledSink))
            .build()
            .unwrap();

        let started = Instant::now();
        let result = engine
            .check_with_deadline(&noon_tx(), started + Duration::from_millis(30))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(result.decision, Decision::Approve);
        assert_eq!(
            engine
                .metrics()
                .persist_failures
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }
}
