//! Configuration management for the decision engine

use crate::error::ConfigError;
use crate::models::aggregator::BlendPolicy;
use crate::models::training::TrainingParams;
use chrono::{FixedOffset, Offset, Utc};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Environment variable overriding the configuration file location
pub const CONFIG_PATH_ENV: &str = "FRAUD_ENGINE_CONFIG";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub engine: EngineSettings,
    pub rules: RulesConfig,
    pub model: ModelConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming fraud check requests
    pub check_subject: String,
    /// Subject every decision is published to
    pub result_subject: String,
    /// Subject for high-risk alerts
    pub alert_subject: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            check_subject: "fraud.check".to_string(),
            result_subject: "fraud.results".to_string(),
            alert_subject: "fraud.alerts".to_string(),
        }
    }
}

/// Latency budget of a single check
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Deadline for a whole check, in milliseconds
    pub deadline_ms: u64,
    /// Timeout of one Signal Store lookup, in milliseconds
    pub lookup_timeout_ms: u64,
    /// Bound on awaiting the Result Sink and Alert Channel, in milliseconds
    pub sink_timeout_ms: u64,
}

impl EngineSettings {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            deadline_ms: 250,
            lookup_timeout_ms: 100,
            sink_timeout_ms: 500,
        }
    }
}

/// Rule pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Trailing window for the velocity count
    pub velocity_window_secs: u64,
    /// Trailing window for the known-country set
    pub location_window_days: u64,
    /// Countries that always add high-risk score
    pub high_risk_countries: Vec<String>,
    /// Offset from UTC used to derive the local clock hour
    pub utc_offset_hours: i32,
    /// First suspicious local hour (inclusive)
    pub unusual_hour_start: u32,
    /// Last suspicious local hour (inclusive)
    pub unusual_hour_end: u32,
    /// Currency amount thresholds are expressed in
    pub reference_currency: String,
    /// Multiplier converting each currency into the reference currency
    pub reference_rates: HashMap<String, f64>,
}

impl RulesConfig {
    pub fn velocity_window(&self) -> Duration {
        Duration::from_secs(self.velocity_window_secs)
    }

    pub fn location_window(&self) -> Duration {
        Duration::from_secs(self.location_window_days * 24 * 60 * 60)
    }

    /// Local clock offset; falls back to UTC if the configured hours are out of range.
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        let mut reference_rates = HashMap::new();
        reference_rates.insert("USD".to_string(), 1.0);

        Self {
            velocity_window_secs: 60 * 60,
            location_window_days: 30,
            high_risk_countries: vec!["XX".to_string(), "YY".to_string()],
            utc_offset_hours: 0,
            unusual_hour_start: 2,
            unusual_hour_end: 5,
            reference_currency: "USD".to_string(),
            reference_rates,
        }
    }
}

/// Risk model configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory holding persisted model blobs
    pub storage_dir: String,
    /// Blob key of the serving model
    pub name: String,
    /// How the model score is combined with the rule score
    pub blend: BlendPolicy,
    /// Default training hyper-parameters
    pub training: TrainingConfig,
}

impl ModelConfig {
    pub fn storage_path(&self) -> PathBuf {
        PathBuf::from(&self.storage_dir)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            storage_dir: "models".to_string(),
            name: "fraud_risk_model".to_string(),
            blend: BlendPolicy::default(),
            training: TrainingConfig::default(),
        }
    }
}

/// Default training hyper-parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
}

impl TrainingConfig {
    /// Hyper-parameters for one training run with an explicit shuffle seed.
    pub fn to_params(&self, seed: u64) -> TrainingParams {
        TrainingParams {
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            seed,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 32,
            learning_rate: 0.01,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of checks processed concurrently
    pub workers: usize,
    /// Interval of the metrics summary, in seconds
    pub metrics_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            metrics_interval_secs: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, or the path in `FRAUD_ENGINE_CONFIG`
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path.
    ///
    /// `FRAUD_ENGINE__<SECTION>__<KEY>` environment variables override file values.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("FRAUD_ENGINE").separator("__"))
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.deadline_ms == 0 {
            return Err(ConfigError::invalid("engine.deadline_ms", "must be positive"));
        }
        if self.engine.lookup_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "engine.lookup_timeout_ms",
                "must be positive",
            ));
        }
        if self.engine.sink_timeout_ms == 0 {
            return Err(ConfigError::invalid("engine.sink_timeout_ms", "must be positive"));
        }

        let rules = &self.rules;
        if rules.velocity_window_secs == 0 {
            return Err(ConfigError::invalid(
                "rules.velocity_window_secs",
                "must be positive",
            ));
        }
        if !(-23..=23).contains(&rules.utc_offset_hours) {
            return Err(ConfigError::invalid(
                "rules.utc_offset_hours",
                format!("{} is outside -23..=23", rules.utc_offset_hours),
            ));
        }
        if rules.unusual_hour_end > 23 || rules.unusual_hour_start > rules.unusual_hour_end {
            return Err(ConfigError::invalid(
                "rules.unusual_hour_start",
                format!(
                    "window {}..={} is not within 0..=23",
                    rules.unusual_hour_start, rules.unusual_hour_end
                ),
            ));
        }
        if let Some((currency, rate)) = rules
            .reference_rates
            .iter()
            .find(|(_, rate)| !rate.is_finite() || **rate <= 0.0)
        {
            return Err(ConfigError::invalid(
                "rules.reference_rates",
                format!("rate for {} must be positive, got {}", currency, rate),
            ));
        }

        if let BlendPolicy::Weighted { model_weight } = self.model.blend {
            if !(0.0..=1.0).contains(&model_weight) {
                return Err(ConfigError::invalid(
                    "model.blend.model_weight",
                    format!("{} is outside [0, 1]", model_weight),
                ));
            }
        }
        self.model
            .training
            .to_params(0)
            .validate()
            .map_err(|e| ConfigError::invalid("model.training", e.to_string()))?;

        if self.pipeline.workers == 0 {
            return Err(ConfigError::invalid("pipeline.workers", "must be positive"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.engine.deadline(), Duration::from_millis(250));
        assert_eq!(config.rules.velocity_window(), Duration::from_secs(3600));
        assert_eq!(config.model.blend, BlendPolicy::RulesOnly);
        assert_eq!(config.model.training.batch_size, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[engine]
deadline_ms = 400

[rules]
high_risk_countries = ["KP"]
utc_offset_hours = -5

[model]
blend = {{ policy = "weighted", model_weight = 0.25 }}
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();

        assert_eq!(config.engine.deadline_ms, 400);
        assert_eq!(config.engine.lookup_timeout_ms, 100);
        assert_eq!(config.rules.high_risk_countries, vec!["KP".to_string()]);
        assert_eq!(config.rules.local_offset().local_minus_utc(), -5 * 3600);
        assert_eq!(
            config.model.blend,
            BlendPolicy::Weighted { model_weight: 0.25 }
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.engine.lookup_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "engine.lookup_timeout_ms", .. })
        ));

        let mut config = AppConfig::default();
        config.rules.unusual_hour_start = 6;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rules.reference_rates.insert("EUR".to_string(), 0.0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.model.blend = BlendPolicy::Weighted { model_weight: 1.5 };
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.model.training.batch_size = 0;
        assert!(config.validate().is_err());
    }
}
