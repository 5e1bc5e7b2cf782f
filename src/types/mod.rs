//! Type definitions for the decision engine

pub mod alert;
pub mod decision;
pub mod transaction;

pub use alert::FraudAlert;
pub use decision::{Decision, DecisionResult, Flag, RiskLevel, RuleResult};
pub use transaction::TransactionSignal;
