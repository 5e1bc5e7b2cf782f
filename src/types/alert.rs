//! Fraud alert envelope published for high-risk decisions

use crate::types::decision::{Decision, DecisionResult, Flag, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert generated when a decision lands in the high risk level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAlert {
    /// Unique alert identifier
    pub alert_id: String,

    /// Decision that raised the alert
    pub decision_id: String,

    /// Associated transaction ID
    pub transaction_id: String,

    /// Final risk score (0 - 100)
    pub score: u8,

    pub risk_level: RiskLevel,

    pub decision: Decision,

    /// Flags raised by the rule pipeline
    pub flags: Vec<Flag>,

    /// Advisory model score, when available
    pub model_score: Option<f64>,

    /// Alert generation timestamp
    pub timestamp: DateTime<Utc>,
}

impl FraudAlert {
    /// Build an alert from a decision
    pub fn from_decision(result: &DecisionResult) -> Self {
        Self {
            alert_id: uuid::Uuid::new_v4().to_string(),
            decision_id: result.decision_id.clone(),
            transaction_id: result.transaction_id.clone(),
            score: result.score,
            risk_level: result.risk_level,
            decision: result.decision,
            flags: result.flags.clone(),
            model_score: result.model_score,
            timestamp: Utc::now(),
        }
    }
}
