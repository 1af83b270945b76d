//! Job id pool for Roblox public servers
//!
//! Keeps, per place id, a shuffled pool of joinable server job ids drawn from
//! the paginated public listing, and hands them out one at a time while the
//! pool is replenished in the background.
//!
//! Entry lifecycle:
//! 1. First reservation for a place primes a fresh entry (single-flight: concurrent
//!    callers share one priming task and its outcome)
//! 2. Each fetched page passes the record filter (shape, duplicates, recently
//!    reserved, occupancy, capacity) before joining the entry
//! 3. Reservations pop one record, stamp it, and record it in the recycle tracker
//! 4. When an entry drops under the top-up threshold, one background fetch loop
//!    per strategy refills it without blocking the caller
//! 5. The sweep task drops expired entries, prunes the recycle tracker, and
//!    flushes throttled log summaries

pub mod entry;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod pool;
pub mod recycle;
pub mod settings;
pub mod sweep;
pub mod throttle;

#[cfg(test)]
pub(crate) mod testing;

pub use entry::{JobRecord, PoolEntry, StrategyState};
pub use error::{Error, Result};
pub use filter::{FilterOutcome, FilterStats, filter_page};
pub use pool::{JobPool, PoolSummary, Reservation};
pub use recycle::RecycleTracker;
pub use settings::{PoolSettings, TopUpThreshold};
pub use sweep::{SweepReport, SweepTask, spawn_sweep_task};
pub use throttle::{Emission, Severity, ThrottledLogger};
