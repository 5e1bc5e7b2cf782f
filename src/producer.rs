//! NATS publisher for decisions and fraud alerts

use crate::error::SinkError;
use crate::sinks::{AlertChannel, ResultSink};
use crate::types::alert::FraudAlert;
use crate::types::decision::DecisionResult;
use async_nats::{Client, Subject};
use async_trait::async_trait;
use tracing::debug;

/// Publishes every decision to the result subject and alerts to the alert subject
#[derive(Clone)]
pub struct NatsPublisher {
    client: Client,
    result_subject: String,
    alert_subject: String,
}

impl NatsPublisher {
    pub fn new(client: Client, result_subject: &str, alert_subject: &str) -> Self {
        Self {
            client,
            result_subject: result_subject.to_string(),
            alert_subject: alert_subject.to_string(),
        }
    }

    /// Answer a request with the decision.
    pub async fn reply(&self, reply_to: Subject, result: &DecisionResult) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(result)?;
        self.client
            .publish(reply_to, payload.into())
            .await
            .map_err(|e| SinkError::Publish(e.to_string()))
    }

    /// Answer a request with an error body.
    pub async fn reply_error(&self, reply_to: Subject, message: &str) -> Result<(), SinkError> {
        let payload = error_body(message)?;
        self.client
            .publish(reply_to, payload.into())
            .await
            .map_err(|e| SinkError::Publish(e.to_string()))
    }

    pub fn result_subject(&self) -> &str {
        &self.result_subject
    }

    pub fn alert_subject(&self) -> &str {
        &self.alert_subject
    }
}

/// JSON body of an error reply: `{"error": message}`.
pub fn error_body(message: &str) -> Result<Vec<u8>, SinkError> {
    Ok(serde_json::to_vec(&serde_json::json!({ "error": message }))?)
}

#[async_trait]
impl ResultSink for NatsPublisher {
    async fn persist(&self, result: &DecisionResult) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(result)?;
        self.client
            .publish(self.result_subject.clone(), payload.into())
            .await
            .map_err(|e| SinkError::Publish(e.to_string()))?;

        debug!(
            decision_id = %result.decision_id,
            transaction_id = %result.transaction_id,
            subject = %self.result_subject,
            "Published decision"
        );
        Ok(())
    }
}

#[async_trait]
impl AlertChannel for NatsPublisher {
    async fn notify(&self, alert: &FraudAlert) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(alert)?;
        self.client
            .publish(self.alert_subject.clone(), payload.into())
            .await
            .map_err(|e| SinkError::Publish(e.to_string()))?;

        debug!(
            alert_id = %alert.alert_id,
            transaction_id = %alert.transaction_id,
            score = alert.score,
            "Published fraud alert"
        );
        Ok(())
    }
}
