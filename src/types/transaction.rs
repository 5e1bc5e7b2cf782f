//! Transaction signals submitted for a fraud check

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw signals of one transaction to be risk-scored.
///
/// Validated upstream; the engine never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSignal {
    /// Unique transaction identifier
    pub transaction_id: String,

    /// Amount in `currency` units
    pub amount: f64,

    /// ISO-4217 currency code
    pub currency: String,

    /// Customer identifier (email in the payment gateway)
    #[serde(alias = "customer_email")]
    pub customer_id: String,

    /// ISO country code of the transaction origin
    pub country: String,

    /// Last four digits of the card, when the payment is card-based
    #[serde(default)]
    pub card_last4: Option<String>,

    /// Device fingerprint supplied by the client
    #[serde(default)]
    pub device_fingerprint: Option<String>,

    /// Originating IP address
    #[serde(default)]
    pub ip_address: Option<String>,

    /// Time the transaction was initiated
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl TransactionSignal {
    /// Create a signal with required fields; optional fields are left empty.
    pub fn new(
        transaction_id: impl Into<String>,
        amount: f64,
        currency: impl Into<String>,
        customer_id: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            amount,
            currency: currency.into(),
            customer_id: customer_id.into(),
            country: country.into(),
            card_last4: None,
            device_fingerprint: None,
            ip_address: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_card_last4(mut self, last4: impl Into<String>) -> Self {
        self.card_last4 = Some(last4.into());
        self
    }

    pub fn with_device(mut self, fingerprint: impl Into<String>) -> Self {
        self.device_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Device fingerprint, treating an empty string as absent.
    pub fn device(&self) -> Option<&str> {
        self.device_fingerprint
            .as_deref()
            .filter(|fingerprint| !fingerprint.is_empty())
    }
}
