//! Runtime metrics and statistics for the decision engine.

use crate::types::decision::{Decision, RiskLevel};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

const MAX_SAMPLES: usize = 10_000;

/// Metrics collector shared by every check
pub struct EngineMetrics {
    /// Total checks that produced a decision
    pub checks_processed: AtomicU64,
    /// Checks that failed with an engine error
    pub checks_failed: AtomicU64,
    /// Alerts handed to the alert channel
    pub alerts_generated: AtomicU64,
    /// Results the sink failed to accept
    pub persist_failures: AtomicU64,
    /// Alerts the channel failed to accept
    pub alert_failures: AtomicU64,
    decisions: RwLock<HashMap<Decision, u64>>,
    risk_levels: RwLock<HashMap<RiskLevel, u64>>,
    /// Fail-open rule evaluations, by rule name
    rule_failures: RwLock<HashMap<String, u64>>,
    /// Processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Score distribution in buckets of ten; 90..=100 share the last one
    score_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            checks_processed: AtomicU64::new(0),
            checks_failed: AtomicU64::new(0),
            alerts_generated: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            alert_failures: AtomicU64::new(0),
            decisions: RwLock::new(HashMap::new()),
            risk_levels: RwLock::new(HashMap::new()),
            rule_failures: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a completed check
    pub fn record_decision(
        &self,
        processing_time: Duration,
        score: u8,
        risk_level: RiskLevel,
        decision: Decision,
    ) {
        self.checks_processed.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            if times.len() > MAX_SAMPLES {
                times.drain(0..MAX_SAMPLES / 2);
            }
        }

        let bucket = usize::from(score / 10).min(9);
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }
        if let Ok(mut decisions) = self.decisions.write() {
            *decisions.entry(decision).or_insert(0) += 1;
        }
        if let Ok(mut levels) = self.risk_levels.write() {
            *levels.entry(risk_level).or_insert(0) += 1;
        }
    }

    pub fn record_check_failure(&self) {
        self.checks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rule_failure(&self, rule: &str) {
        if let Ok(mut failures) = self.rule_failures.write() {
            *failures.entry(rule.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_alert(&self) {
        self.alerts_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_failure(&self) {
        self.alert_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get processing time statistics
    pub fn processing_stats(&self) -> ProcessingStats {
        let mut sorted = match self.processing_times.read() {
            Ok(times) if !times.is_empty() => times.clone(),
            _ => return ProcessingStats::default(),
        };
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let percentile = |p: f64| sorted[((count as f64 * p) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: percentile(0.50),
            p95_us: percentile(0.95),
            p99_us: percentile(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Checks per second since startup
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.checks_processed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn score_distribution(&self) -> [u64; 10] {
        self.score_buckets
            .read()
            .map(|buckets| *buckets)
            .unwrap_or_default()
    }

    pub fn decision_count(&self, decision: Decision) -> u64 {
        self.decisions
            .read()
            .ok()
            .and_then(|decisions| decisions.get(&decision).copied())
            .unwrap_or(0)
    }

    pub fn risk_level_count(&self, level: RiskLevel) -> u64 {
        self.risk_levels
            .read()
            .ok()
            .and_then(|levels| levels.get(&level).copied())
            .unwrap_or(0)
    }

    pub fn rule_failures(&self) -> HashMap<String, u64> {
        self.rule_failures
            .read()
            .map(|failures| failures.clone())
            .unwrap_or_default()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let checks = self.checks_processed.load(Ordering::Relaxed);
        let alerts = self.alerts_generated.load(Ordering::Relaxed);
        let alert_rate = if checks > 0 {
            (alerts as f64 / checks as f64) * 100.0
        } else {
            0.0
        };
        let processing = self.processing_stats();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║            FRAUD DECISION ENGINE - METRICS SUMMARY           ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Checks Processed: {:>8}  │  Throughput: {:>6.1} checks/s   ║",
            checks,
            self.throughput()
        );
        info!(
            "║ Alerts Generated: {:>8}  │  Alert Rate: {:>6.1}%           ║",
            alerts, alert_rate
        );
        info!(
            "║ Failed Checks: {:>6}  Persist Failures: {:>6}  Alert Failures: {:>6}",
            self.checks_failed.load(Ordering::Relaxed),
            self.persist_failures.load(Ordering::Relaxed),
            self.alert_failures.load(Ordering::Relaxed)
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Processing Time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Decisions:                                                   ║");
        for decision in [Decision::Approve, Decision::Review, Decision::Block] {
            let count = self.decision_count(decision);
            let pct = if checks > 0 {
                (count as f64 / checks as f64) * 100.0
            } else {
                0.0
            };
            info!("║   {:10}: {:>6} ({:>5.1}%)", decision.as_str(), count, pct);
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Risk Score Distribution:                                     ║");
        let distribution = self.score_distribution();
        let total: u64 = distribution.iter().sum();
        for (i, &count) in distribution.iter().enumerate() {
            let pct = if total > 0 {
                (count as f64 / total as f64) * 100.0
            } else {
                0.0
            };
            let bar = "█".repeat(((pct / 2.0) as usize).min(20));
            let upper = if i == 9 { 100 } else { i * 10 + 9 };
            info!(
                "║   {:>3}-{:<3}: {:>6} ({:>5.1}%) {}",
                i * 10,
                upper,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");

        let rule_failures = self.rule_failures();
        if !rule_failures.is_empty() {
            info!("Rule failures (fail-open):");
            for (rule, count) in &rule_failures {
                info!("  {}: {}", rule, count);
            }
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Prints a metrics summary on a fixed interval
pub struct MetricsReporter {
    metrics: Arc<EngineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<EngineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        // first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = EngineMetrics::new();

        metrics.record_decision(Duration::from_micros(100), 30, RiskLevel::Low, Decision::Approve);
        metrics.record_decision(Duration::from_micros(300), 100, RiskLevel::High, Decision::Block);
        metrics.record_decision(Duration::from_micros(200), 95, RiskLevel::High, Decision::Block);
        metrics.record_alert();
        metrics.record_rule_failure("geolocation_check");
        metrics.record_rule_failure("geolocation_check");

        assert_eq!(metrics.checks_processed.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.alerts_generated.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.decision_count(Decision::Block), 2);
        assert_eq!(metrics.decision_count(Decision::Review), 0);
        assert_eq!(metrics.risk_level_count(RiskLevel::High), 2);
        assert_eq!(metrics.rule_failures().get("geolocation_check"), Some(&2));

        let distribution = metrics.score_distribution();
        assert_eq!(distribution[3], 1);
        assert_eq!(distribution[9], 2);
    }

    #[test]
    fn test_processing_stats() {
        let metrics = EngineMetrics::new();
        assert_eq!(metrics.processing_stats(), ProcessingStats::default());

        for us in 1..=100 {
            metrics.record_decision(Duration::from_micros(us), 0, RiskLevel::Low, Decision::Approve);
        }

        let stats = metrics.processing_stats();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.max_us, 100);
        assert_eq!(stats.p50_us, 51);
        assert_eq!(stats.p99_us, 100);
    }
}
