//! The standard fraud rules

use super::{HourWindow, RuleContext, RuleEvaluation, RuleEvaluator};
use crate::error::SignalError;
use crate::signals::normalize_country;
use crate::types::decision::{Flag, RuleResult, MAX_SCORE};
use std::collections::HashSet;

/// Transaction count in the trailing hour.
pub struct VelocityRule;

impl VelocityRule {
    pub const HIGH_COUNT: u32 = 10;
    pub const MODERATE_COUNT: u32 = 5;
    pub const HIGH_SCORE: u32 = 40;
    pub const MODERATE_SCORE: u32 = 20;
}

impl RuleEvaluator for VelocityRule {
    fn name(&self) -> &'static str {
        "velocity_check"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleEvaluation, SignalError> {
        let count = ctx.history.velocity.clone()?;
        let description = format!("Transaction count in last hour: {}", count);

        let evaluation = if count > Self::HIGH_COUNT {
            triggered(self.name(), Self::HIGH_SCORE, description, vec![Flag::HighVelocity])
        } else if count > Self::MODERATE_COUNT {
            triggered(
                self.name(),
                Self::MODERATE_SCORE,
                description,
                vec![Flag::ModerateVelocity],
            )
        } else {
            RuleEvaluation::clear(self.name(), description)
        };
        Ok(evaluation)
    }
}

/// Amount in the reference currency.
pub struct AmountRule {
    reference_currency: String,
}

impl AmountRule {
    pub const LARGE_AMOUNT: f64 = 10_000.0;
    pub const ELEVATED_AMOUNT: f64 = 5_000.0;
    pub const LARGE_SCORE: u32 = 30;
    pub const ELEVATED_SCORE: u32 = 15;

    pub fn new(reference_currency: impl Into<String>) -> Self {
        Self {
            reference_currency: reference_currency.into(),
        }
    }
}

impl RuleEvaluator for AmountRule {
    fn name(&self) -> &'static str {
        "amount_threshold"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleEvaluation, SignalError> {
        let amount = ctx.reference_amount;
        let description = format!(
            "Transaction amount: {:.2} {} ({:.2} {})",
            ctx.tx.amount, ctx.tx.currency, amount, self.reference_currency
        );

        let evaluation = if amount > Self::LARGE_AMOUNT {
            triggered(self.name(), Self::LARGE_SCORE, description, vec![Flag::LargeAmount])
        } else if amount > Self::ELEVATED_AMOUNT {
            triggered(
                self.name(),
                Self::ELEVATED_SCORE,
                description,
                vec![Flag::ElevatedAmount],
            )
        } else {
            RuleEvaluation::clear(self.name(), description)
        };
        Ok(evaluation)
    }
}

/// New country for the customer, or a configured high-risk country.
///
/// Both checks belong to one evaluator, so a failed location lookup
/// suppresses the high-risk check as well.
pub struct GeolocationRule {
    high_risk_countries: HashSet<String>,
}

impl GeolocationRule {
    pub const NEW_LOCATION_SCORE: u32 = 25;
    pub const HIGH_RISK_SCORE: u32 = 35;

    pub fn new(high_risk_countries: impl IntoIterator<Item = String>) -> Self {
        Self {
            high_risk_countries: high_risk_countries
                .into_iter()
                .map(|country| normalize_country(&country))
                .collect(),
        }
    }
}

impl RuleEvaluator for GeolocationRule {
    fn name(&self) -> &'static str {
        "geolocation_check"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleEvaluation, SignalError> {
        let country = ctx.tx.country.as_str();
        let new_location = ctx.history.is_new_location(country)?;
        let high_risk = self.high_risk_countries.contains(&normalize_country(country));

        let mut score = 0;
        let mut flags = Vec::new();
        if new_location {
            score += Self::NEW_LOCATION_SCORE;
            flags.push(Flag::NewLocation);
        }
        if high_risk {
            score += Self::HIGH_RISK_SCORE;
            flags.push(Flag::HighRiskCountry);
        }

        let description = format!("Country: {}", country);
        if flags.is_empty() {
            Ok(RuleEvaluation::clear(self.name(), description))
        } else {
            Ok(triggered(self.name(), score, description, flags))
        }
    }
}

/// Customer or card suffix on the blacklist. Forces the final score to 100.
pub struct BlacklistRule;

impl RuleEvaluator for BlacklistRule {
    fn name(&self) -> &'static str {
        "blacklist_check"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleEvaluation, SignalError> {
        if ctx.history.blacklisted.clone()? {
            Ok(triggered(
                self.name(),
                u32::from(MAX_SCORE),
                "Customer or card is blacklisted",
                vec![Flag::Blacklisted],
            ))
        } else {
            Ok(RuleEvaluation::clear(self.name(), "Not blacklisted"))
        }
    }
}

/// Local hour within the suspicious window.
pub struct TimePatternRule {
    window: HourWindow,
}

impl TimePatternRule {
    pub const SCORE: u32 = 10;

    pub fn new(window: HourWindow) -> Self {
        Self { window }
    }
}

impl RuleEvaluator for TimePatternRule {
    fn name(&self) -> &'static str {
        "time_pattern"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleEvaluation, SignalError> {
        let description = format!("Transaction hour: {}", ctx.local_hour);
        if self.window.contains(ctx.local_hour) {
            Ok(triggered(
                self.name(),
                Self::SCORE,
                description,
                vec![Flag::UnusualHour],
            ))
        } else {
            Ok(RuleEvaluation::clear(self.name(), description))
        }
    }
}

/// Device fingerprint not seen before for the customer.
pub struct DeviceRule;

impl DeviceRule {
    pub const SCORE: u32 = 15;
}

impl RuleEvaluator for DeviceRule {
    fn name(&self) -> &'static str {
        "device_fingerprint"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleEvaluation, SignalError> {
        if ctx.tx.device().is_none() {
            return Ok(RuleEvaluation::clear(
                self.name(),
                "No device fingerprint supplied",
            ));
        }

        if ctx.history.is_new_device()? {
            Ok(triggered(
                self.name(),
                Self::SCORE,
                "Unrecognized device fingerprint",
                vec![Flag::NewDevice],
            ))
        } else {
            Ok(RuleEvaluation::clear(self.name(), "Known device"))
        }
    }
}

fn triggered(
    rule_name: &str,
    score: u32,
    description: impl Into<String>,
    flags: Vec<Flag>,
) -> RuleEvaluation {
    RuleEvaluation {
        result: RuleResult::triggered(rule_name, score, description),
        flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::HistoricalSignals;
    use crate::types::transaction::TransactionSignal;
    use std::collections::BTreeSet;

    fn ctx<'a>(
        tx: &'a TransactionSignal,
        history: &'a HistoricalSignals,
        reference_amount: f64,
        local_hour: u32,
    ) -> RuleContext<'a> {
        RuleContext {
            tx,
            history,
            reference_amount,
            local_hour,
        }
    }

    fn tx() -> TransactionSignal {
        TransactionSignal::new("tx_1", 100.0, "USD", "alice", "US")
    }

    #[test]
    fn test_velocity_thresholds() {
        let tx = tx();
        let cases = [
            (5, false, 0, None),
            (6, true, 20, Some(Flag::ModerateVelocity)),
            (10, true, 20, Some(Flag::ModerateVelocity)),
            (11, true, 40, Some(Flag::HighVelocity)),
        ];

        for (count, fired, score, flag) in cases {
            let mut history = HistoricalSignals::neutral();
            history.velocity = Ok(count);
            let eval = VelocityRule.evaluate(&ctx(&tx, &history, 100.0, 12)).unwrap();

            assert_eq!(eval.result.triggered, fired, "count {}", count);
            assert_eq!(eval.result.score, score, "count {}", count);
            assert_eq!(eval.flags.first().copied(), flag, "count {}", count);
        }
    }

    #[test]
    fn test_amount_thresholds() {
        let tx = tx();
        let history = HistoricalSignals::neutral();
        let rule = AmountRule::new("USD");

        let score_for = |amount: f64| {
            rule.evaluate(&ctx(&tx, &history, amount, 12))
                .unwrap()
                .result
                .score
        };

        assert_eq!(score_for(5000.0), 0);
        assert_eq!(score_for(5000.01), 15);
        assert_eq!(score_for(10000.0), 15);
        assert_eq!(score_for(15000.0), 30);
    }

    #[test]
    fn test_geolocation_new_and_high_risk() {
        let tx = TransactionSignal::new("tx_1", 100.0, "USD", "alice", "xx");
        let mut history = HistoricalSignals::neutral();
        history.locations = Ok(BTreeSet::from(["US".to_string()]));
        let rule = GeolocationRule::new(vec!["XX".to_string()]);

        let eval = rule.evaluate(&ctx(&tx, &history, 100.0, 12)).unwrap();

        assert!(eval.result.triggered);
        assert_eq!(eval.result.score, 60);
        assert_eq!(eval.flags, vec![Flag::NewLocation, Flag::HighRiskCountry]);
    }

    #[test]
    fn test_geolocation_known_country_in_other_case() {
        let tx = TransactionSignal::new("tx_1", 100.0, "USD", "alice", "us");
        let mut history = HistoricalSignals::neutral();
        history.locations = Ok(BTreeSet::from(["US".to_string()]));
        let rule = GeolocationRule::new(vec!["xx".to_string()]);

        let eval = rule.evaluate(&ctx(&tx, &history, 100.0, 12)).unwrap();
        assert!(!eval.result.triggered);
        assert!(eval.flags.is_empty());
    }

    #[test]
    fn test_geolocation_needs_history_for_new_location() {
        let tx = tx();
        let history = HistoricalSignals::neutral();
        let rule = GeolocationRule::new(Vec::new());

        let eval = rule.evaluate(&ctx(&tx, &history, 100.0, 12)).unwrap();
        assert!(!eval.result.triggered);
    }

    #[test]
    fn test_geolocation_lookup_failure() {
        let tx = tx();
        let mut history = HistoricalSignals::neutral();
        history.locations = Err(SignalError::Timeout {
            lookup: "recent_locations",
        });

        let rule = GeolocationRule::new(vec!["US".to_string()]);
        assert!(rule.evaluate(&ctx(&tx, &history, 100.0, 12)).is_err());
    }

    #[test]
    fn test_blacklist() {
        let tx = tx();
        let mut history = HistoricalSignals::neutral();
        history.blacklisted = Ok(true);

        let eval = BlacklistRule.evaluate(&ctx(&tx, &history, 100.0, 12)).unwrap();
        assert_eq!(eval.result.score, 100);
        assert_eq!(eval.flags, vec![Flag::Blacklisted]);
    }

    #[test]
    fn test_time_pattern() {
        let tx = tx();
        let history = HistoricalSignals::neutral();
        let rule = TimePatternRule::new(HourWindow::default());

        assert!(rule.evaluate(&ctx(&tx, &history, 0.0, 3)).unwrap().result.triggered);
        assert!(!rule.evaluate(&ctx(&tx, &history, 0.0, 6)).unwrap().result.triggered);
    }

    #[test]
    fn test_device_rule() {
        let history_unknown = HistoricalSignals {
            known_device: Some(Ok(false)),
            ..HistoricalSignals::neutral()
        };

        let with_device = tx().with_device("dev-2");
        let eval = DeviceRule
            .evaluate(&ctx(&with_device, &history_unknown, 0.0, 12))
            .unwrap();
        assert_eq!(eval.result.score, 15);
        assert_eq!(eval.flags, vec![Flag::NewDevice]);

        let without_device = tx();
        let eval = DeviceRule
            .evaluate(&ctx(&without_device, &HistoricalSignals::neutral(), 0.0, 12))
            .unwrap();
        assert!(!eval.result.triggered);
    }
}
