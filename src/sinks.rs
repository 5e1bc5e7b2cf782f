//! Result Sink and Alert Channel collaborators.
//!
//! The engine hands every decision to a [`ResultSink`] and high-risk decisions
//! to an [`AlertChannel`]. Both are best-effort: errors are logged by the
//! engine and never change the decision.

use crate::error::SinkError;
use crate::types::alert::FraudAlert;
use crate::types::decision::DecisionResult;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tracing::{info, warn};

/// Durable storage for decisions.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist(&self, result: &DecisionResult) -> Result<(), SinkError>;
}

/// Notification of high-risk decisions.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn notify(&self, alert: &FraudAlert) -> Result<(), SinkError>;
}

/// Writes decisions to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogResultSink;

#[async_trait]
impl ResultSink for LogResultSink {
    async fn persist(&self, result: &DecisionResult) -> Result<(), SinkError> {
        info!(
            decision_id = %result.decision_id,
            transaction_id = %result.transaction_id,
            score = result.score,
            risk_level = %result.risk_level,
            decision = %result.decision,
            "Decision recorded"
        );
        Ok(())
    }
}

/// Writes alerts to the log at `warn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertChannel;

#[async_trait]
impl AlertChannel for LogAlertChannel {
    async fn notify(&self, alert: &FraudAlert) -> Result<(), SinkError> {
        warn!(
            alert_id = %alert.alert_id,
            transaction_id = %alert.transaction_id,
            score = alert.score,
            flags = ?alert.flags,
            "FRAUD ALERT"
        );
        Ok(())
    }
}

/// Keeps decisions and alerts in memory. Can be switched to reject everything.
#[derive(Default)]
pub struct InMemorySink {
    results: RwLock<Vec<DecisionResult>>,
    alerts: RwLock<Vec<FraudAlert>>,
    failing: AtomicBool,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every call fails with [`SinkError::Closed`].
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn results(&self) -> Vec<DecisionResult> {
        self.results
            .read()
            .map(|results| results.clone())
            .unwrap_or_default()
    }

    pub fn alerts(&self) -> Vec<FraudAlert> {
        self.alerts
            .read()
            .map(|alerts| alerts.clone())
            .unwrap_or_default()
    }

    fn check_open(&self) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(SinkError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ResultSink for InMemorySink {
    async fn persist(&self, result: &DecisionResult) -> Result<(), SinkError> {
        self.check_open()?;
        self.results
            .write()
            .map_err(|_| SinkError::Publish("result store lock poisoned".to_string()))?
            .push(result.clone());
        Ok(())
    }
}

#[async_trait]
impl AlertChannel for InMemorySink {
    async fn notify(&self, alert: &FraudAlert) -> Result<(), SinkError> {
        self.check_open()?;
        self.alerts
            .write()
            .map_err(|_| SinkError::Publish("alert store lock poisoned".to_string()))?
            .push(alert.clone());
        Ok(())
    }
}
