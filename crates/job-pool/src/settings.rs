//! Pool tuning knobs

use std::time::Duration;

use upstream::FetchStrategy;

/// When a reservation should trigger background top-up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TopUpThreshold {
    /// Absolute number of remaining records
    Count(usize),
    /// Fraction of the target size, in (0, 1]
    Fraction(f64),
}

/// Engine settings. Validation happens in the service's config layer; the
/// accessors below clamp anything that would otherwise stall the engine.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Records an entry is refilled towards
    pub target_size: usize,
    pub top_up_threshold: TopUpThreshold,
    /// Entry lifetime from creation
    pub ttl: Duration,
    /// An issued id is not admitted into any pool again within this window
    pub recycle_window: Duration,
    /// Reissuing an id within this window is logged as an upstream anomaly
    pub duplicate_alert_window: Duration,
    /// Page budget per prime or top-up, split across strategies
    pub max_pages: u32,
    /// Upper bound on records collected by one prime (defaults to target)
    pub prime_batch_cap: Option<usize>,
    pub sweep_interval: Duration,
    /// Servers with fewer players are skipped
    pub min_players: u32,
    pub strategies: Vec<FetchStrategy>,
    pub log_throttle_interval: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            target_size: 500,
            top_up_threshold: TopUpThreshold::Fraction(0.3),
            ttl: Duration::from_secs(120),
            recycle_window: Duration::from_secs(600),
            duplicate_alert_window: Duration::from_secs(1800),
            max_pages: 100,
            prime_batch_cap: None,
            sweep_interval: Duration::from_secs(15),
            min_players: 1,
            strategies: vec![FetchStrategy::default()],
            log_throttle_interval: Duration::from_secs(60),
        }
    }
}

impl PoolSettings {
    /// Remaining-count threshold under which top-up runs, clamped to `[1, target]`.
    pub fn threshold(&self) -> usize {
        let target = self.target_size.max(1);
        let raw = match self.top_up_threshold {
            TopUpThreshold::Count(n) => n,
            TopUpThreshold::Fraction(f) => (target as f64 * f).ceil() as usize,
        };
        raw.clamp(1, target)
    }

    /// Pages each strategy may fetch per prime or top-up run.
    ///
    /// `floor(max_pages / strategies)`, at least 1, so adding strategies does
    /// not multiply the upstream load.
    pub fn pages_per_strategy(&self) -> u32 {
        let strategies = self.strategies.len().max(1) as u32;
        (self.max_pages / strategies).max(1)
    }

    /// Record count at which priming stops collecting.
    pub fn prime_cap(&self) -> usize {
        let target = self.target_size.max(1);
        self.prime_batch_cap.unwrap_or(target).clamp(1, target)
    }

    /// How long recycle-tracker entries must be retained.
    pub fn recycle_retention(&self) -> Duration {
        self.recycle_window.max(self.duplicate_alert_window)
    }
}
