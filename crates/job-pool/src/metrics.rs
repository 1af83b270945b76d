//! Pool metrics
//!
//! Recorded through the `metrics` facade; the service installs the
//! Prometheus recorder and renders them on `/metrics`.
//!
//! - `jobpool_reservations_total` (counter): label `outcome`
//! - `jobpool_upstream_fetches_total` (counter): labels `outcome`, `phase`
//! - `jobpool_filter_rejections_total` (counter): label `reason`
//! - `jobpool_entries` (gauge)

use crate::filter::FilterStats;
use upstream::FetchStrategy;

/// Record a reservation attempt; `outcome` is `reserved` or an error label.
pub fn record_reservation(outcome: &'static str) {
    metrics::counter!("jobpool_reservations_total", "outcome" => outcome).increment(1);
}

/// Record one upstream page fetch made by a prime or top-up run.
pub fn record_fetch(phase: &'static str, outcome: &'static str) {
    metrics::counter!("jobpool_upstream_fetches_total", "outcome" => outcome, "phase" => phase)
        .increment(1);
}

/// Record the rejections from one filtered page.
pub fn record_rejections(stats: &FilterStats, strategy: &FetchStrategy) {
    for (reason, count) in stats.rejections(strategy) {
        if count > 0 {
            metrics::counter!("jobpool_filter_rejections_total", "reason" => reason)
                .increment(count as u64);
        }
    }
}

pub fn set_entries(count: usize) {
    metrics::gauge!("jobpool_entries").set(count as f64);
}
