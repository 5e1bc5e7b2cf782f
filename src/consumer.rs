//! NATS consumer for incoming fraud check requests

use crate::types::transaction::TransactionSignal;
use anyhow::{Context, Result};
use async_nats::{Client, Subscriber};
use tracing::info;

/// Receives check requests from the check subject
pub struct CheckConsumer {
    client: Client,
    subject: String,
}

impl CheckConsumer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = self
            .client
            .subscribe(self.subject.clone())
            .await
            .with_context(|| format!("Failed to subscribe to {}", self.subject))?;
        info!(subject = %self.subject, "Subscribed to check subject");
        Ok(subscriber)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Parse a request payload into a transaction signal.
pub fn decode_request(payload: &[u8]) -> Result<TransactionSignal> {
    serde_json::from_slice(payload).context("Malformed fraud check request")
}
