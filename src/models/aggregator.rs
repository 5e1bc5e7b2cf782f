//! Score aggregation and decision policy

use crate::types::decision::{Decision, Flag, RiskLevel, RuleResult, MAX_SCORE};
use serde::{Deserialize, Serialize};

/// How the model score is combined with the rule score.
///
/// The blacklist override applies after blending under every policy.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BlendPolicy {
    /// Rules alone decide; the model score is reported for audit only
    #[default]
    RulesOnly,
    /// The larger of rule score and model score
    Max,
    /// `(1 - model_weight) * rule score + model_weight * model score`
    Weighted { model_weight: f64 },
}

impl BlendPolicy {
    pub fn uses_model(&self) -> bool {
        !matches!(self, BlendPolicy::RulesOnly)
    }
}

/// Final score together with the parts it was built from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatedScore {
    pub score: u8,
    /// Sum of triggered rule contributions, before clamping
    pub rule_score: u32,
    pub blacklisted: bool,
}

/// Combines rule results and the model score into one bounded score.
#[derive(Debug, Clone, Default)]
pub struct ScoreAggregator {
    policy: BlendPolicy,
}

impl ScoreAggregator {
    pub fn new(policy: BlendPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> BlendPolicy {
        self.policy
    }

    /// Sum of the scores of triggered rules.
    pub fn rule_score(rules: &[RuleResult]) -> u32 {
        rules
            .iter()
            .filter(|rule| rule.triggered)
            .fold(0u32, |total, rule| total.saturating_add(rule.score))
    }

    /// Aggregate into a score within 0..=100.
    ///
    /// A `blacklisted` flag forces exactly 100. A non-finite model score is ignored.
    pub fn aggregate(
        &self,
        rules: &[RuleResult],
        flags: &[Flag],
        model_score: Option<f64>,
    ) -> AggregatedScore {
        let rule_score = Self::rule_score(rules);
        let blacklisted = flags.contains(&Flag::Blacklisted);

        let rules_only = f64::from(rule_score.min(u32::from(MAX_SCORE)));
        let model_score = model_score.filter(|score| score.is_finite());

        let blended = match (self.policy, model_score) {
            (BlendPolicy::RulesOnly, _) | (_, None) => rules_only,
            (BlendPolicy::Max, Some(model)) => rules_only.max(model),
            (BlendPolicy::Weighted { model_weight }, Some(model)) => {
                let weight = model_weight.clamp(0.0, 1.0);
                (1.0 - weight) * rules_only + weight * model
            }
        };

        let score = if blacklisted {
            MAX_SCORE
        } else {
            clamp_score(blended)
        };

        AggregatedScore {
            score,
            rule_score,
            blacklisted,
        }
    }
}

/// Round and clamp into 0..=100; non-finite values map to 0.
pub fn clamp_score(value: f64) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    value.round().clamp(0.0, f64::from(MAX_SCORE)) as u8
}

/// Fixed score thresholds mapping a score to a risk level and a decision.
pub struct DecisionPolicy;

impl DecisionPolicy {
    /// Total over all scores; values above 100 are treated as 100.
    pub fn decide(score: u8) -> (RiskLevel, Decision) {
        let score = score.min(MAX_SCORE);
        let level = RiskLevel::from_score(score);
        (level, Decision::from_level(level, score))
    }
}
