//! Rule evaluators.
//!
//! Every evaluator is a pure function of the transaction and its gathered
//! history. It returns its own [`RuleEvaluation`]; combining evaluations is
//! the aggregator's job, so evaluator order only affects report order.

pub mod evaluators;

pub use evaluators::{
    AmountRule, BlacklistRule, DeviceRule, GeolocationRule, TimePatternRule, VelocityRule,
};

use crate::config::RulesConfig;
use crate::error::SignalError;
use crate::signals::HistoricalSignals;
use crate::types::decision::{Flag, RuleResult};
use crate::types::transaction::TransactionSignal;
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Everything an evaluator may read.
pub struct RuleContext<'a> {
    pub tx: &'a TransactionSignal,
    pub history: &'a HistoricalSignals,
    /// Amount expressed in the reference currency
    pub reference_amount: f64,
    /// Hour of the transaction on the local clock
    pub local_hour: u32,
}

/// What one evaluator contributes to a decision.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleEvaluation {
    pub result: RuleResult,
    pub flags: Vec<Flag>,
}

impl RuleEvaluation {
    pub fn clear(rule_name: &str, description: impl Into<String>) -> Self {
        Self {
            result: RuleResult::clear(rule_name, description),
            flags: Vec::new(),
        }
    }

    /// Evaluation of a rule whose history lookup failed: no score, not triggered.
    pub fn failed(rule_name: &str, error: &SignalError) -> Self {
        Self::clear(rule_name, format!("Signal unavailable: {}", error))
    }
}

/// A named fraud check.
pub trait RuleEvaluator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Evaluate the rule. `Err` means a required lookup failed.
    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleEvaluation, SignalError>;
}

/// Inclusive range of suspicious local hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, hour: u32) -> bool {
        (self.start..=self.end).contains(&hour)
    }
}

impl Default for HourWindow {
    fn default() -> Self {
        Self::new(2, 5)
    }
}

/// Hour of `timestamp` on a clock with the given offset.
pub fn local_hour(timestamp: DateTime<Utc>, offset: FixedOffset) -> u32 {
    timestamp.with_timezone(&offset).hour()
}

/// Converts amounts into the reference currency.
#[derive(Debug, Clone)]
pub struct CurrencyConverter {
    reference_currency: String,
    rates: HashMap<String, f64>,
}

impl CurrencyConverter {
    pub fn new(reference_currency: &str, rates: HashMap<String, f64>) -> Self {
        Self {
            reference_currency: reference_currency.to_uppercase(),
            rates: rates
                .into_iter()
                .map(|(currency, rate)| (currency.to_uppercase(), rate))
                .collect(),
        }
    }

    pub fn reference_currency(&self) -> &str {
        &self.reference_currency
    }

    /// Amount in reference units. Unknown currencies convert at 1.0.
    pub fn to_reference(&self, amount: f64, currency: &str) -> f64 {
        let currency = currency.to_uppercase();
        if currency == self.reference_currency {
            return amount;
        }
        match self.rates.get(&currency) {
            Some(rate) => amount * rate,
            None => {
                debug!(currency = %currency, "No reference rate configured, using 1.0");
                amount
            }
        }
    }
}

impl Default for CurrencyConverter {
    fn default() -> Self {
        Self::new("USD", HashMap::new())
    }
}

/// The standard rule set, in report order.
pub fn default_rules(config: &RulesConfig) -> Vec<Arc<dyn RuleEvaluator>> {
    vec![
        Arc::new(VelocityRule),
        Arc::new(AmountRule::new(config.reference_currency.clone())),
        Arc::new(GeolocationRule::new(config.high_risk_countries.iter().cloned())),
        Arc::new(BlacklistRule),
        Arc::new(TimePatternRule::new(HourWindow::new(
            config.unusual_hour_start,
            config.unusual_hour_end,
        ))),
        Arc::new(DeviceRule),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hour_window() {
        let window = HourWindow::default();
        assert!(!window.contains(1));
        assert!(window.contains(2));
        assert!(window.contains(5));
        assert!(!window.contains(6));
    }

    #[test]
    fn test_local_hour_applies_offset() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 7, 30, 0).unwrap();
        assert_eq!(local_hour(ts, FixedOffset::east_opt(0).unwrap()), 7);
        assert_eq!(local_hour(ts, FixedOffset::west_opt(4 * 3600).unwrap()), 3);
    }

    #[test]
    fn test_currency_conversion() {
        let mut rates = HashMap::new();
        rates.insert("eur".to_string(), 1.1);
        let converter = CurrencyConverter::new("USD", rates);

        assert_eq!(converter.to_reference(100.0, "usd"), 100.0);
        assert!((converter.to_reference(100.0, "EUR") - 110.0).abs() < 1e-9);
        assert_eq!(converter.to_reference(100.0, "JPY"), 100.0);
    }

    #[test]
    fn test_default_rule_order() {
        let names: Vec<_> = default_rules(&RulesConfig::default())
            .iter()
            .map(|rule| rule.name())
            .collect();
        assert_eq!(
            names,
            vec![
                "velocity_check",
                "amount_threshold",
                "geolocation_check",
                "blacklist_check",
                "time_pattern",
                "device_fingerprint"
            ]
        );
    }
}
