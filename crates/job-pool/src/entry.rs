//! Pool entries: the per-place record collection and its fetch state

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Number;
use tokio::sync::Mutex;
use tokio::time::Instant;
use upstream::FetchStrategy;

/// One reservable server.
///
/// The numeric fields are advisory and keep the upstream's JSON number
/// representation; they are `None` when absent or non-numeric.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: String,
    pub playing: Option<Number>,
    pub max_players: Option<Number>,
    pub ping: Option<Number>,
    pub fps: Option<Number>,
    pub reserved_at: Option<DateTime<Utc>>,
}

/// Record collection plus the id set mirroring it.
///
/// Every mutation goes through these methods so `ids` always holds exactly
/// the ids present in `jobs`.
#[derive(Debug, Default)]
pub struct EntryRecords {
    jobs: Vec<JobRecord>,
    ids: HashSet<String>,
}

impl EntryRecords {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn ids(&self) -> &HashSet<String> {
        &self.ids
    }

    /// Append records until `cap` is reached, skipping ids already present.
    /// Returns the number appended.
    pub fn append(&mut self, records: Vec<JobRecord>, cap: usize) -> usize {
        let mut added = 0;
        for record in records {
            if self.jobs.len() >= cap {
                break;
            }
            if self.ids.insert(record.job_id.clone()) {
                self.jobs.push(record);
                added += 1;
            }
        }
        added
    }

    /// Remove one record. The collection is shuffled on insertion, so the
    /// tail is as good as a random draw.
    pub fn pop(&mut self) -> Option<JobRecord> {
        let record = self.jobs.pop()?;
        self.ids.remove(&record.job_id);
        Some(record)
    }

    /// Invariant check used by tests and debug assertions.
    pub fn is_consistent(&self) -> bool {
        self.ids.len() == self.jobs.len() && self.jobs.iter().all(|j| self.ids.contains(&j.job_id))
    }
}

/// Pagination state for one (place, strategy) pair.
#[derive(Debug)]
pub struct StrategyState {
    strategy: FetchStrategy,
    key: String,
    cursor: Mutex<Option<String>>,
    in_flight: AtomicBool,
}

impl StrategyState {
    fn new(strategy: FetchStrategy, cursor: Option<String>) -> Self {
        Self {
            key: strategy.key(),
            strategy,
            cursor: Mutex::new(cursor),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn strategy(&self) -> &FetchStrategy {
        &self.strategy
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Continuation token; `None` means the next walk starts at page one.
    pub async fn cursor(&self) -> Option<String> {
        self.cursor.lock().await.clone()
    }

    pub async fn set_cursor(&self, cursor: Option<String>) {
        *self.cursor.lock().await = cursor;
    }

    /// Claim the fetch loop for this strategy. Returns false if one is
    /// already running.
    pub fn try_begin(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Pool for one place id. Created fresh by every prime, never rebuilt in place.
#[derive(Debug)]
pub struct PoolEntry {
    place_id: String,
    records: Mutex<EntryRecords>,
    created_at: Instant,
    expires_at: Instant,
    expires_at_utc: DateTime<Utc>,
    strategies: Vec<StrategyState>,
}

impl PoolEntry {
    pub fn new(place_id: &str, strategies: &[FetchStrategy], ttl: Duration) -> Self {
        let cursors = vec![None; strategies.len()];
        Self::primed(place_id, strategies, ttl, EntryRecords::default(), cursors)
    }

    /// Entry holding the records a prime collected, with each strategy
    /// resuming at the cursor the prime stopped at. The TTL starts now.
    pub(crate) fn primed(
        place_id: &str,
        strategies: &[FetchStrategy],
        ttl: Duration,
        records: EntryRecords,
        cursors: Vec<Option<String>>,
    ) -> Self {
        let created_at = Instant::now();
        let expires_at_utc = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            place_id: place_id.to_string(),
            records: Mutex::new(records),
            created_at,
            expires_at: created_at + ttl,
            expires_at_utc,
            strategies: strategies
                .iter()
                .cloned()
                .zip(cursors.into_iter().chain(std::iter::repeat(None)))
                .map(|(strategy, cursor)| StrategyState::new(strategy, cursor))
                .collect(),
        }
    }

    pub fn place_id(&self) -> &str {
        &self.place_id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Wall-clock expiry, reported to callers.
    pub fn expires_at_utc(&self) -> DateTime<Utc> {
        self.expires_at_utc
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    pub fn strategies(&self) -> &[StrategyState] {
        &self.strategies
    }

    pub fn strategy(&self, key: &str) -> Option<&StrategyState> {
        self.strategies.iter().find(|s| s.key == key)
    }

    pub async fn records(&self) -> tokio::sync::MutexGuard<'_, EntryRecords> {
        self.records.lock().await
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upstream::SortOrder;

    fn record(id: &str) -> JobRecord {
        JobRecord {
            job_id: id.to_string(),
            playing: Some(3.into()),
            max_players: Some(10.into()),
            ping: None,
            fps: None,
            reserved_at: None,
        }
    }

    #[test]
    fn append_skips_present_ids_and_respects_cap() {
        let mut records = EntryRecords::default();
        assert_eq!(records.append(vec![record("a"), record("b")], 10), 2);
        assert_eq!(records.append(vec![record("a"), record("c"), record("d")], 3), 1);
        assert_eq!(records.len(), 3);
        assert!(records.ids().contains("c"));
        assert!(!records.ids().contains("d"));
        assert!(records.is_consistent());
    }

    #[test]
    fn pop_keeps_ids_in_sync() {
        let mut records = EntryRecords::default();
        records.append(vec![record("a"), record("b")], 10);
        let popped = records.pop().unwrap();
        assert!(!records.ids().contains(&popped.job_id));
        assert!(records.is_consistent());
        records.pop();
        assert!(records.pop().is_none());
        assert!(records.is_empty());
    }

    #[test]
    fn in_flight_claim_is_exclusive() {
        let state = StrategyState::new(FetchStrategy::default(), None);
        assert!(state.try_begin());
        assert!(!state.try_begin());
        assert!(state.is_in_flight());
        state.finish();
        assert!(state.try_begin());
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let entry = PoolEntry::new("1", &[FetchStrategy::default()], Duration::from_secs(120));
        assert!(!entry.is_expired(Instant::now()));
        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(entry.is_expired(Instant::now()));
    }

    #[tokio::test]
    async fn entry_tracks_one_state_per_strategy() {
        let strategies = [
            FetchStrategy::new(SortOrder::Asc, true),
            FetchStrategy::new(SortOrder::Desc, false),
        ];
        let entry = PoolEntry::new("1", &strategies, Duration::from_secs(60));
        assert_eq!(entry.strategies().len(), 2);

        let desc = entry.strategy("desc").unwrap();
        assert_eq!(desc.strategy().sort_order, SortOrder::Desc);
        assert!(desc.cursor().await.is_none());
        desc.set_cursor(Some("p2".into())).await;
        assert_eq!(desc.cursor().await.as_deref(), Some("p2"));
        assert_eq!(entry.len().await, 0);
    }

    #[tokio::test]
    async fn primed_entry_keeps_records_and_cursors() {
        let mut records = EntryRecords::default();
        records.append(vec![record("a"), record("b")], 10);
        let strategies = [
            FetchStrategy::new(SortOrder::Asc, true),
            FetchStrategy::new(SortOrder::Desc, true),
        ];
        let entry = PoolEntry::primed(
            "1",
            &strategies,
            Duration::from_secs(60),
            records,
            vec![Some("c2".into())],
        );
        assert_eq!(entry.len().await, 2);
        assert_eq!(entry.strategies()[0].cursor().await.as_deref(), Some("c2"));
        assert!(entry.strategies()[1].cursor().await.is_none());
    }

    #[test]
    fn record_serializes_camel_case() {
        let json = serde_json::to_value(record("a")).unwrap();
        assert_eq!(json["jobId"], "a");
        assert_eq!(json["maxPlayers"], 10);
        assert!(json["ping"].is_null());
    }
}
