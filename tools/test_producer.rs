//! Test Check Request Producer
//!
//! Publishes synthetic fraud check requests to NATS. Without a reachable
//! server it prints sample requests instead.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use fraud_decision_engine::TransactionSignal;
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

/// Request generator over a small pool of repeat customers
struct RequestGenerator {
    rng: rand::rngs::ThreadRng,
    counter: u64,
}

impl RequestGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            counter: 0,
        }
    }

    fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("tx_{:012}", self.counter)
    }

    fn customer(&mut self) -> String {
        format!("customer{}@example.com", self.rng.gen_range(1..50))
    }

    fn ip(&mut self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.rng.gen_range(1..255),
            self.rng.gen_range(0..255),
            self.rng.gen_range(0..255),
            self.rng.gen_range(1..255)
        )
    }

    /// Daytime purchase of an ordinary amount from a common country
    fn generate_legitimate(&mut self) -> TransactionSignal {
        let id = self.next_id();
        let customer = self.customer();
        let currency = self.random_choice(&["USD", "EUR", "GBP"]);
        let country = self.random_choice(&["US", "GB", "CA", "DE", "FR"]);

        TransactionSignal::new(id, self.rng.gen_range(10.0..500.0), currency, customer, country)
            .with_card_last4(format!("{:04}", self.rng.gen_range(0..10_000)))
            .with_device(format!("fp_{:04x}", self.rng.gen_range(0..64u16)))
            .with_ip(self.ip())
            .at(daytime(Utc::now()))
    }

    /// Large night-time purchase, often from a high-risk country and a fresh device
    fn generate_suspicious(&mut self) -> TransactionSignal {
        let id = self.next_id();
        let customer = self.customer();
        let country = self.random_choice(&["XX", "YY", "US"]);
        let hour = self.rng.gen_range(2..=5);
        let night = Utc::now()
            .with_hour(hour)
            .unwrap_or_else(Utc::now);

        TransactionSignal::new(id, self.rng.gen_range(5_000.0..25_000.0), "USD", customer, country)
            .with_card_last4(format!("{:04}", self.rng.gen_range(0..10_000)))
            .with_device(format!("fp_{:016x}", self.rng.gen::<u64>()))
            .with_ip(self.ip())
            .at(night)
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

/// Move a timestamp out of the suspicious night window.
fn daytime(now: DateTime<Utc>) -> DateTime<Utc> {
    if (2..=5).contains(&now.hour()) {
        now + ChronoDuration::hours(8)
    } else {
        now
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Check Request Producer");

    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("fraud.check");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let fraud_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.1);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        fraud_rate = fraud_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, fraud_rate, delay_ms).await;
        }
    };

    let mut generator = RequestGenerator::new();
    let mut rng = rand::thread_rng();
    let mut legitimate_count = 0;
    let mut suspicious_count = 0;

    info!("Starting to publish {} check requests...", count);

    for i in 0..count {
        let request = if rng.gen_bool(fraud_rate) {
            suspicious_count += 1;
            generator.generate_suspicious()
        } else {
            legitimate_count += 1;
            generator.generate_legitimate()
        };

        let payload = serde_json::to_vec(&request)?;
        client.publish(subject.to_string(), payload.into()).await?;

        if (i + 1) % 10 == 0 {
            info!(
                "Published {}/{} requests ({} legitimate, {} suspicious)",
                i + 1,
                count,
                legitimate_count,
                suspicious_count
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    client.flush().await?;
    info!(
        "Completed! Published {} requests ({} legitimate, {} suspicious)",
        count, legitimate_count, suspicious_count
    );

    Ok(())
}

async fn run_dry_mode(count: u64, fraud_rate: f64, delay_ms: u64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = RequestGenerator::new();
    let mut rng = rand::thread_rng();

    for i in 0..count {
        let request = if rng.gen_bool(fraud_rate) {
            generator.generate_suspicious()
        } else {
            generator.generate_legitimate()
        };

        if (i + 1) % 10 == 0 || i == 0 {
            info!("Sample request {}:\n{}", i + 1, serde_json::to_string_pretty(&request)?);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
