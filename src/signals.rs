//! Historical signal lookups.
//!
//! The engine reads customer history through [`SignalStore`]. All four lookups
//! of a check run concurrently, each bounded by the lookup timeout and the
//! request deadline. A lookup that fails or runs out of time is kept as an
//! `Err` in [`HistoricalSignals`]; rules that need it fail open.

use crate::error::SignalError;
use crate::feature_extractor::HistoricalCounters;
use crate::types::transaction::TransactionSignal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub const LOOKUP_RECENT_TRANSACTIONS: &str = "recent_transactions";
pub const LOOKUP_RECENT_LOCATIONS: &str = "recent_locations";
pub const LOOKUP_BLACKLIST: &str = "blacklist";
pub const LOOKUP_KNOWN_DEVICE: &str = "known_device";

/// Read-only access to customer history.
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Number of transactions by the customer within the trailing window.
    async fn count_recent_transactions(
        &self,
        customer_id: &str,
        window: Duration,
    ) -> Result<u32, SignalError>;

    /// Countries the customer transacted from within the trailing window.
    async fn recent_locations(
        &self,
        customer_id: &str,
        window: Duration,
    ) -> Result<BTreeSet<String>, SignalError>;

    /// Whether the customer or the card suffix is blacklisted.
    async fn is_blacklisted(
        &self,
        customer_id: &str,
        card_last4: Option<&str>,
    ) -> Result<bool, SignalError>;

    /// Whether the device fingerprint was seen before for this customer.
    async fn is_known_device(&self, customer_id: &str, fingerprint: &str)
        -> Result<bool, SignalError>;
}

/// Outcome of the lookups for one transaction.
#[derive(Debug, Clone)]
pub struct HistoricalSignals {
    pub velocity: Result<u32, SignalError>,
    pub locations: Result<BTreeSet<String>, SignalError>,
    pub blacklisted: Result<bool, SignalError>,
    /// `None` when the request carried no device fingerprint
    pub known_device: Option<Result<bool, SignalError>>,
}

impl HistoricalSignals {
    /// History where every lookup succeeded with a neutral answer.
    pub fn neutral() -> Self {
        Self {
            velocity: Ok(0),
            locations: Ok(BTreeSet::new()),
            blacklisted: Ok(false),
            known_device: None,
        }
    }

    /// The country is new only if the customer has history and it is absent from it.
    pub fn is_new_location(&self, country: &str) -> Result<bool, SignalError> {
        match &self.locations {
            Ok(known) => {
                let country = normalize_country(country);
                let seen = known.iter().any(|visited| normalize_country(visited) == country);
                Ok(!known.is_empty() && !seen)
            }
            Err(e) => Err(e.clone()),
        }
    }

    /// A supplied fingerprint that the store does not know.
    pub fn is_new_device(&self) -> Result<bool, SignalError> {
        match &self.known_device {
            None => Ok(false),
            Some(Ok(known)) => Ok(!known),
            Some(Err(e)) => Err(e.clone()),
        }
    }

    /// Raw model inputs; failed lookups contribute their neutral value.
    pub fn counters(
        &self,
        tx: &TransactionSignal,
        reference_amount: f64,
        unusual_hour: bool,
    ) -> HistoricalCounters {
        HistoricalCounters {
            reference_amount: Some(reference_amount),
            velocity_count: self.velocity.as_ref().copied().unwrap_or(0),
            new_location: self.is_new_location(&tx.country).unwrap_or(false),
            unusual_hour,
            new_device: self.is_new_device().unwrap_or(false),
        }
    }

    /// Lookups that failed, in lookup order.
    pub fn failures(&self) -> Vec<&SignalError> {
        let mut failures = Vec::new();
        if let Err(e) = &self.velocity {
            failures.push(e);
        }
        if let Err(e) = &self.locations {
            failures.push(e);
        }
        if let Err(e) = &self.blacklisted {
            failures.push(e);
        }
        if let Some(Err(e)) = &self.known_device {
            failures.push(e);
        }
        failures
    }
}

/// Runs the lookups of one check against a [`SignalStore`].
#[derive(Clone)]
pub struct SignalGatherer {
    store: Arc<dyn SignalStore>,
    velocity_window: Duration,
    location_window: Duration,
    lookup_timeout: Duration,
}

impl SignalGatherer {
    pub fn new(
        store: Arc<dyn SignalStore>,
        velocity_window: Duration,
        location_window: Duration,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            store,
            velocity_window,
            location_window,
            lookup_timeout,
        }
    }

    /// Gather history for `tx`. Never fails and returns no later than `deadline`.
    pub async fn gather(&self, tx: &TransactionSignal, deadline: Instant) -> HistoricalSignals {
        let limit = deadline.min(Instant::now() + self.lookup_timeout);
        let customer = tx.customer_id.as_str();

        let velocity = bounded(
            LOOKUP_RECENT_TRANSACTIONS,
            limit,
            self.store
                .count_recent_transactions(customer, self.velocity_window),
        );
        let locations = bounded(
            LOOKUP_RECENT_LOCATIONS,
            limit,
            self.store.recent_locations(customer, self.location_window),
        );
        let blacklisted = bounded(
            LOOKUP_BLACKLIST,
            limit,
            self.store.is_blacklisted(customer, tx.card_last4.as_deref()),
        );
        let known_device = async {
            match tx.device() {
                Some(fingerprint) => Some(
                    bounded(
                        LOOKUP_KNOWN_DEVICE,
                        limit,
                        self.store.is_known_device(customer, fingerprint),
                    )
                    .await,
                ),
                None => None,
            }
        };

        let (velocity, locations, blacklisted, known_device) =
            tokio::join!(velocity, locations, blacklisted, known_device);

        let signals = HistoricalSignals {
            velocity,
            locations,
            blacklisted,
            known_device,
        };
        debug!(
            transaction_id = %tx.transaction_id,
            failed_lookups = signals.failures().len(),
            "Historical signals gathered"
        );
        signals
    }
}

/// Await a lookup until `until`; running out of time is a timeout failure.
async fn bounded<T, F>(lookup: &'static str, until: Instant, lookup_future: F) -> Result<T, SignalError>
where
    F: Future<Output = Result<T, SignalError>>,
{
    match tokio::time::timeout_at(until, lookup_future).await {
        Ok(result) => result,
        Err(_) => Err(SignalError::Timeout { lookup }),
    }
}

#[derive(Default)]
struct MemoryHistory {
    transactions: HashMap<String, Vec<(DateTime<Utc>, String)>>,
    /// Device fingerprint to when it was last recorded
    devices: HashMap<String, HashMap<String, DateTime<Utc>>>,
    blacklisted_customers: HashSet<String>,
    blacklisted_cards: HashSet<String>,
    failing: HashSet<&'static str>,
    delays: HashMap<&'static str, Duration>,
}

/// Default history kept per customer, matching the default location window.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 3600);

/// In-process [`SignalStore`] backed by maps.
///
/// Recording prunes the customer's entries older than the retention period.
/// Supports injected failures and delays per lookup name for exercising the
/// fail-open paths.
pub struct InMemorySignalStore {
    history: RwLock<MemoryHistory>,
    retention: Duration,
}

impl Default for InMemorySignalStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl InMemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that keeps history for `retention`; use the largest lookup window.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            history: RwLock::new(MemoryHistory::default()),
            retention,
        }
    }

    /// Record a past transaction of the customer.
    ///
    /// Countries are stored upper-cased.
    pub fn record_transaction(&self, customer_id: &str, country: &str, at: DateTime<Utc>) {
        let cutoff = window_start(self.retention);
        if let Ok(mut history) = self.history.write() {
            let txs = history
                .transactions
                .entry(customer_id.to_string())
                .or_default();
            txs.retain(|(seen, _)| *seen >= cutoff);
            if at >= cutoff {
                txs.push((at, normalize_country(country)));
            }
            if txs.is_empty() {
                history.transactions.remove(customer_id);
            }
        }
    }

    pub fn add_known_device(&self, customer_id: &str, fingerprint: &str) {
        let now = Utc::now();
        let cutoff = window_start(self.retention);
        if let Ok(mut history) = self.history.write() {
            let devices = history.devices.entry(customer_id.to_string()).or_default();
            devices.retain(|_, seen| *seen >= cutoff);
            devices.insert(fingerprint.to_string(), now);
        }
    }

    pub fn blacklist_customer(&self, customer_id: &str) {
        if let Ok(mut history) = self.history.write() {
            history.blacklisted_customers.insert(customer_id.to_string());
        }
    }

    pub fn blacklist_card(&self, card_last4: &str) {
        if let Ok(mut history) = self.history.write() {
            history.blacklisted_cards.insert(card_last4.to_string());
        }
    }

    /// Make every call of `lookup` fail as unavailable.
    pub fn fail_lookup(&self, lookup: &'static str) {
        if let Ok(mut history) = self.history.write() {
            history.failing.insert(lookup);
        }
    }

    /// Delay every call of `lookup` before answering.
    pub fn delay_lookup(&self, lookup: &'static str, delay: Duration) {
        if let Ok(mut history) = self.history.write() {
            history.delays.insert(lookup, delay);
        }
    }

    async fn enter(&self, lookup: &'static str) -> Result<(), SignalError> {
        let (delay, failing) = {
            let history = self.read(lookup)?;
            (
                history.delays.get(lookup).copied(),
                history.failing.contains(lookup),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(SignalError::unavailable(lookup, "injected failure"));
        }
        Ok(())
    }

    fn read(
        &self,
        lookup: &'static str,
    ) -> Result<std::sync::RwLockReadGuard<'_, MemoryHistory>, SignalError> {
        self.history
            .read()
            .map_err(|_| SignalError::unavailable(lookup, "history lock poisoned"))
    }
}

/// Canonical form of a country code.
pub fn normalize_country(country: &str) -> String {
    country.trim().to_ascii_uppercase()
}

fn window_start(window: Duration) -> DateTime<Utc> {
    let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() - window
}

#[async_trait]
impl SignalStore for InMemorySignalStore {
    async fn count_recent_transactions(
        &self,
        customer_id: &str,
        window: Duration,
    ) -> Result<u32, SignalError> {
        self.enter(LOOKUP_RECENT_TRANSACTIONS).await?;
        let since = window_start(window);
        let history = self.read(LOOKUP_RECENT_TRANSACTIONS)?;
        let count = history
            .transactions
            .get(customer_id)
            .map(|txs| txs.iter().filter(|(at, _)| *at >= since).count())
            .unwrap_or(0);
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn recent_locations(
        &self,
        customer_id: &str,
        window: Duration,
    ) -> Result<BTreeSet<String>, SignalError> {
        self.enter(LOOKUP_RECENT_LOCATIONS).await?;
        let since = window_start(window);
        let history = self.read(LOOKUP_RECENT_LOCATIONS)?;
        Ok(history
            .transactions
            .get(customer_id)
            .map(|txs| {
                txs.iter()
                    .filter(|(at, _)| *at >= since)
                    .map(|(_, country)| country.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn is_blacklisted(
        &self,
        customer_id: &str,
        card_last4: Option<&str>,
    ) -> Result<bool, SignalError> {
        self.enter(LOOKUP_BLACKLIST).await?;
        let history = self.read(LOOKUP_BLACKLIST)?;
        let card_listed = card_last4
            .map(|card| history.blacklisted_cards.contains(card))
            .unwrap_or(false);
        Ok(history.blacklisted_customers.contains(customer_id) || card_listed)
    }

    async fn is_known_device(
        &self,
        customer_id: &str,
        fingerprint: &str,
    ) -> Result<bool, SignalError> {
        self.enter(LOOKUP_KNOWN_DEVICE).await?;
        let history = self.read(LOOKUP_KNOWN_DEVICE)?;
        Ok(history
            .devices
            .get(customer_id)
            .map(|devices| devices.contains_key(fingerprint))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gatherer(store: Arc<InMemorySignalStore>) -> SignalGatherer {
        SignalGatherer::new(
            store,
            Duration::from_secs(3600),
            Duration::from_secs(30 * 24 * 3600),
            Duration::from_millis(50),
        )
    }

    fn tx() -> TransactionSignal {
        TransactionSignal::new("tx_1", 100.0, "USD", "alice", "US")
    }

    #[tokio::test]
    async fn test_gather_reads_history() {
        let store = Arc::new(InMemorySignalStore::new());
        let now = Utc::now();
        store.record_transaction("alice", "US", now - chrono::Duration::minutes(5));
        store.record_transaction("alice", "CA", now - chrono::Duration::minutes(30));
        store.record_transaction("alice", "FR", now - chrono::Duration::days(3));
        store.record_transaction("alice", "DE", now - chrono::Duration::days(60));
        store.add_known_device("alice", "dev-1");

        let signals = gatherer(store)
            .gather(&tx().with_device("dev-1"), Instant::now() + Duration::from_secs(1))
            .await;

        assert_eq!(signals.velocity, Ok(2));
        let countries: Vec<_> = signals.locations.clone().unwrap().into_iter().collect();
        assert_eq!(countries, vec!["CA", "FR", "US"]);
        assert_eq!(signals.blacklisted, Ok(false));
        assert_eq!(signals.is_new_device(), Ok(false));
        assert_eq!(signals.is_new_location("US"), Ok(false));
        assert_eq!(signals.is_new_location("BR"), Ok(true));
        assert!(signals.failures().is_empty());
    }

    #[tokio::test]
    async fn test_empty_history_is_not_new_location() {
        let store = Arc::new(InMemorySignalStore::new());
        let signals = gatherer(store)
            .gather(&tx(), Instant::now() + Duration::from_secs(1))
            .await;

        assert_eq!(signals.is_new_location("BR"), Ok(false));
        assert!(signals.known_device.is_none());
    }

    #[tokio::test]
    async fn test_card_blacklist() {
        let store = Arc::new(InMemorySignalStore::new());
        store.blacklist_card("4242");

        let signals = gatherer(store)
            .gather(
                &tx().with_card_last4("4242"),
                Instant::now() + Duration::from_secs(1),
            )
            .await;

        assert_eq!(signals.blacklisted, Ok(true));
    }

    #[tokio::test]
    async fn test_slow_lookup_times_out_alone() {
        let store = Arc::new(InMemorySignalStore::new());
        store.delay_lookup(LOOKUP_RECENT_LOCATIONS, Duration::from_secs(5));
        store.fail_lookup(LOOKUP_BLACKLIST);

        let started = Instant::now();
        let signals = gatherer(store)
            .gather(&tx(), Instant::now() + Duration::from_secs(1))
            .await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(signals.velocity, Ok(0));
        assert_eq!(
            signals.locations,
            Err(SignalError::Timeout {
                lookup: LOOKUP_RECENT_LOCATIONS
            })
        );
        assert!(matches!(
            signals.blacklisted,
            Err(SignalError::Unavailable { lookup: LOOKUP_BLACKLIST, .. })
        ));
        assert_eq!(signals.failures().len(), 2);

        let counters = signals.counters(&tx(), 100.0, false);
        assert!(!counters.new_location);
    }

    #[tokio::test]
    async fn test_recording_prunes_entries_past_retention() {
        let store = InMemorySignalStore::with_retention(Duration::from_secs(24 * 3600));
        let now = Utc::now();
        store.record_transaction("alice", "DE", now - chrono::Duration::days(3));
        store.record_transaction("alice", "FR", now - chrono::Duration::days(2));
        store.record_transaction("alice", "US", now - chrono::Duration::minutes(5));
        store.record_transaction("bob", "CA", now - chrono::Duration::days(5));

        let history = store.history.read().unwrap();
        let kept: Vec<_> = history.transactions["alice"]
            .iter()
            .map(|(_, country)| country.as_str())
            .collect();
        assert_eq!(kept, vec!["US"]);
        assert!(!history.transactions.contains_key("bob"));
    }

    #[tokio::test]
    async fn test_stale_devices_are_forgotten() {
        let store = InMemorySignalStore::with_retention(Duration::from_secs(3600));
        store.add_known_device("alice", "dev-old");
        if let Ok(mut history) = store.history.write() {
            if let Some(devices) = history.devices.get_mut("alice") {
                devices.insert("dev-old".to_string(), Utc::now() - chrono::Duration::hours(2));
            }
        }
        store.add_known_device("alice", "dev-new");

        assert_eq!(store.is_known_device("alice", "dev-old").await, Ok(false));
        assert_eq!(store.is_known_device("alice", "dev-new").await, Ok(true));
    }

    #[tokio::test]
    async fn test_country_comparison_ignores_case() {
        let store = Arc::new(InMemorySignalStore::new());
        store.record_transaction("alice", "US", Utc::now() - chrono::Duration::hours(1));

        let signals = gatherer(store)
            .gather(&tx(), Instant::now() + Duration::from_secs(1))
            .await;

        assert_eq!(signals.is_new_location("us"), Ok(false));
        assert_eq!(signals.is_new_location(" Us "), Ok(false));
        assert_eq!(signals.is_new_location("br"), Ok(true));
    }
}
