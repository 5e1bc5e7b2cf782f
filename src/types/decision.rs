//! Decision data structures produced by the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Score at or above which a transaction is high risk.
pub const HIGH_RISK_SCORE: u8 = 70;
/// Score at or above which a transaction is medium risk.
pub const MEDIUM_RISK_SCORE: u8 = 40;
/// High-risk score at or above which the transaction is blocked.
pub const BLOCK_SCORE: u8 = 90;
/// Upper bound of every risk score.
pub const MAX_SCORE: u8 = 100;

/// Risk level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Determine risk level from a final score.
    pub fn from_score(score: u8) -> Self {
        if score >= HIGH_RISK_SCORE {
            RiskLevel::High
        } else if score >= MEDIUM_RISK_SCORE {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final action for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Review,
    Block,
}

impl Decision {
    /// Decide from the risk level and the score that produced it.
    pub fn from_level(level: RiskLevel, score: u8) -> Self {
        match level {
            RiskLevel::High if score >= BLOCK_SCORE => Decision::Block,
            RiskLevel::High | RiskLevel::Medium => Decision::Review,
            RiskLevel::Low => Decision::Approve,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Review => "review",
            Decision::Block => "block",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags raised by rule evaluators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    HighVelocity,
    ModerateVelocity,
    LargeAmount,
    ElevatedAmount,
    NewLocation,
    HighRiskCountry,
    Blacklisted,
    UnusualHour,
    NewDevice,
}

impl Flag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::HighVelocity => "high_velocity",
            Flag::ModerateVelocity => "moderate_velocity",
            Flag::LargeAmount => "large_amount",
            Flag::ElevatedAmount => "elevated_amount",
            Flag::NewLocation => "new_location",
            Flag::HighRiskCountry => "high_risk_country",
            Flag::Blacklisted => "blacklisted",
            Flag::UnusualHour => "unusual_hour",
            Flag::NewDevice => "new_device",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one rule evaluator for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule_name: String,
    pub triggered: bool,
    /// Contributed score; never negative
    pub score: u32,
    pub description: String,
}

impl RuleResult {
    /// A rule that ran and did not trigger.
    pub fn clear(rule_name: &str, description: impl Into<String>) -> Self {
        Self {
            rule_name: rule_name.to_string(),
            triggered: false,
            score: 0,
            description: description.into(),
        }
    }

    /// A rule that triggered with the given contribution.
    pub fn triggered(rule_name: &str, score: u32, description: impl Into<String>) -> Self {
        Self {
            rule_name: rule_name.to_string(),
            triggered: true,
            score,
            description: description.into(),
        }
    }
}

/// Auditable decision for one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResult {
    /// Unique decision identifier
    pub decision_id: String,
    pub transaction_id: String,
    /// Final score, always within 0..=100
    pub score: u8,
    pub risk_level: RiskLevel,
    pub decision: Decision,
    /// Flags in evaluator order, without duplicates
    pub flags: Vec<Flag>,
    /// One entry per evaluator, in evaluator order
    pub rules: Vec<RuleResult>,
    /// Model probability scaled to 0..=100, when the model was consulted
    pub model_score: Option<f64>,
    /// Evaluators that failed open
    pub failed_rules: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub processing_time_us: u64,
}

impl DecisionResult {
    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_from_score() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(39), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(40), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(69), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(70), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(100), RiskLevel::High);
    }

    #[test]
    fn test_decision_from_level() {
        assert_eq!(Decision::from_level(RiskLevel::Low, 10), Decision::Approve);
        assert_eq!(Decision::from_level(RiskLevel::Medium, 50), Decision::Review);
        assert_eq!(Decision::from_level(RiskLevel::High, 89), Decision::Review);
        assert_eq!(Decision::from_level(RiskLevel::High, 90), Decision::Block);
    }

    #[test]
    fn test_flag_serialization_matches_name() {
        for flag in [Flag::HighVelocity, Flag::HighRiskCountry, Flag::NewDevice] {
            let json = serde_json::to_string(&flag).unwrap();
            assert_eq!(json, format!("\"{}\"", flag.as_str()));
        }
    }
}
