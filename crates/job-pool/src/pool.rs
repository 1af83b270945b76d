//! Pool store, replenishment scheduler and reservation allocator
//!
//! `JobPool` owns every process-wide map: the entries by place id, the
//! single-flight priming handles, the recycle tracker and the throttled
//! logger. Tests build independent pools over scripted page sources.
//!
//! Locking: an entry's record lock is always taken before the recycle
//! tracker lock. Filtering a page and appending its survivors happen under
//! one hold of the record lock, and so does pop-and-record on reservation,
//! so no identifier can be admitted twice or re-admitted while being issued.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info};
use upstream::{FetchStrategy, PageSource, ServerPage};

use crate::entry::{EntryRecords, JobRecord, PoolEntry, StrategyState};
use crate::error::{Error, Result};
use crate::filter::{FilterStats, filter_page};
use crate::metrics;
use crate::recycle::RecycleTracker;
use crate::settings::PoolSettings;
use crate::sweep::SweepReport;
use crate::throttle::{Severity, ThrottledLogger};

type PrimeHandle = Shared<BoxFuture<'static, Result<Arc<PoolEntry>>>>;

/// One issued job record.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub place_id: String,
    pub record: JobRecord,
    pub reserved_at: DateTime<Utc>,
    /// Expiry of the entry the record came from
    pub expires_at: DateTime<Utc>,
    /// Records in the entry before this reservation
    pub pool_size: usize,
    /// Records left after it; always `pool_size - 1`
    pub remaining: usize,
}

/// Point-in-time view for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSummary {
    pub entries: usize,
    pub records: usize,
    pub priming: usize,
    pub recently_reserved: usize,
}

pub struct JobPool {
    settings: PoolSettings,
    source: Arc<dyn PageSource>,
    entries: RwLock<HashMap<String, Arc<PoolEntry>>>,
    priming: Mutex<HashMap<String, PrimeHandle>>,
    recycle: Mutex<RecycleTracker>,
    throttle: Mutex<ThrottledLogger>,
}

/// Claim on one strategy's fetch loop; released on drop so a panicking
/// loop cannot leave the strategy blocked.
struct InFlight {
    entry: Arc<PoolEntry>,
    index: usize,
}

impl InFlight {
    fn state(&self) -> &StrategyState {
        &self.entry.strategies()[self.index]
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.state().finish();
    }
}

impl JobPool {
    pub fn new(settings: PoolSettings, source: Arc<dyn PageSource>) -> Arc<Self> {
        info!(
            source = source.id(),
            target = settings.target_size,
            threshold = settings.threshold(),
            strategies = settings.strategies.len(),
            pages_per_strategy = settings.pages_per_strategy(),
            "job pool initialized"
        );
        Arc::new(Self {
            recycle: Mutex::new(RecycleTracker::new(
                settings.recycle_window,
                settings.duplicate_alert_window,
            )),
            throttle: Mutex::new(ThrottledLogger::new(settings.log_throttle_interval)),
            settings,
            source,
            entries: RwLock::new(HashMap::new()),
            priming: Mutex::new(HashMap::new()),
        })
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub async fn get(&self, place_id: &str) -> Option<Arc<PoolEntry>> {
        self.entries.read().await.get(place_id).cloned()
    }

    pub async fn put(&self, entry: Arc<PoolEntry>) {
        let count = {
            let mut entries = self.entries.write().await;
            entries.insert(entry.place_id().to_string(), entry);
            entries.len()
        };
        metrics::set_entries(count);
    }

    pub async fn delete(&self, place_id: &str) -> Option<Arc<PoolEntry>> {
        let mut entries = self.entries.write().await;
        let removed = entries.remove(place_id);
        metrics::set_entries(entries.len());
        removed
    }

    /// Remove `entry` only if it is still the stored entry for its place, so a
    /// stale handle cannot evict a freshly primed replacement.
    async fn delete_if_same(&self, entry: &Arc<PoolEntry>) {
        let mut entries = self.entries.write().await;
        if entries
            .get(entry.place_id())
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            entries.remove(entry.place_id());
            metrics::set_entries(entries.len());
        }
    }

    async fn is_current(&self, entry: &Arc<PoolEntry>) -> bool {
        self.entries
            .read()
            .await
            .get(entry.place_id())
            .is_some_and(|current| Arc::ptr_eq(current, entry))
    }

    /// Stored entry that is unexpired and holds at least one record.
    async fn live_entry(&self, place_id: &str) -> Option<Arc<PoolEntry>> {
        let entry = self.get(place_id).await?;
        if entry.is_expired(Instant::now()) || entry.len().await == 0 {
            return None;
        }
        Some(entry)
    }

    /// Issue one job record for `place_id`, priming the pool first if needed.
    pub async fn reserve(self: &Arc<Self>, place_id: &str) -> Result<Reservation> {
        let result = self.try_reserve(place_id).await;
        metrics::record_reservation(match &result {
            Ok(_) => "reserved",
            Err(e) => e.outcome(),
        });
        result
    }

    async fn try_reserve(self: &Arc<Self>, place_id: &str) -> Result<Reservation> {
        let entry = self.ensure_entry(place_id).await?;
        let now = Instant::now();

        let issued = {
            let mut records = entry.records().await;
            let mut recycle = self.recycle.lock().await;
            let mut issued = None;
            while let Some(mut record) = records.pop() {
                // Admitted by this entry before another place issued it
                if recycle.is_recent(&record.job_id, now) {
                    debug!(place_id, job_id = %record.job_id, "dropping record issued elsewhere");
                    continue;
                }
                let previous = recycle.record(&record.job_id, now);
                let reserved_at = Utc::now();
                record.reserved_at = Some(reserved_at);
                issued = Some((record, reserved_at, previous, records.len()));
                break;
            }
            debug_assert!(records.is_consistent());
            issued
        };

        let Some((record, reserved_at, previous, remaining)) = issued else {
            self.delete_if_same(&entry).await;
            return Err(Error::Absent(place_id.to_string()));
        };

        if let Some(age) = previous {
            self.report(
                format!("duplicate_reservation:{place_id}"),
                Severity::Warn,
                "job id reissued inside the duplicate-alert window",
                json!({
                    "placeId": place_id,
                    "jobId": record.job_id,
                    "ageMs": age.as_millis() as u64,
                }),
            )
            .await;
        }

        if remaining < self.settings.threshold() {
            self.schedule_top_up(&entry, false).await;
        }

        debug!(place_id, job_id = %record.job_id, remaining, "job reserved");
        Ok(Reservation {
            place_id: place_id.to_string(),
            record,
            reserved_at,
            expires_at: entry.expires_at_utc(),
            pool_size: remaining + 1,
            remaining,
        })
    }

    /// Return the live entry for `place_id`, replacing an expired or empty
    /// one through a shared prime.
    async fn ensure_entry(self: &Arc<Self>, place_id: &str) -> Result<Arc<PoolEntry>> {
        if let Some(entry) = self.get(place_id).await {
            if !entry.is_expired(Instant::now()) && entry.len().await > 0 {
                return Ok(entry);
            }
            self.delete_if_same(&entry).await;
        }
        self.prime_shared(place_id).await
    }

    /// Attach to the in-flight prime for `place_id`, or start one.
    async fn prime_shared(self: &Arc<Self>, place_id: &str) -> Result<Arc<PoolEntry>> {
        let handle = {
            let mut priming = self.priming.lock().await;
            match priming.get(place_id) {
                Some(handle) => {
                    debug!(place_id, "attaching to in-flight prime");
                    handle.clone()
                }
                None => {
                    // A prime may have settled between the store lookup and this lock
                    if let Some(entry) = self.live_entry(place_id).await {
                        return Ok(entry);
                    }
                    let handle = self.spawn_prime(place_id);
                    priming.insert(place_id.to_string(), handle.clone());
                    handle
                }
            }
        };
        handle.await
    }

    /// Run `prime` as its own task so it completes even if every waiting
    /// caller goes away. The task removes its own handle once settled.
    fn spawn_prime(self: &Arc<Self>, place_id: &str) -> PrimeHandle {
        let key = place_id.to_string();
        let pool = Arc::clone(self);
        let task = tokio::spawn({
            let pool = Arc::clone(self);
            let key = key.clone();
            async move {
                let outcome = pool.prime(&key).await;
                pool.priming.lock().await.remove(&key);
                outcome
            }
        });

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    pool.priming.lock().await.remove(&key);
                    error!(place_id = %key, error = %e, "priming task failed");
                    Err(Error::Internal(format!("priming task failed: {e}")))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Build and store a fresh entry for `place_id`.
    ///
    /// Each strategy fetches up to its page budget until the batch cap is
    /// reached. A failing strategy is reported and the next one still runs;
    /// the prime fails only when no strategy produced a record.
    async fn prime(self: &Arc<Self>, place_id: &str) -> Result<Arc<PoolEntry>> {
        let budget = self.settings.pages_per_strategy();
        let cap = self.settings.prime_cap();
        let mut records = EntryRecords::default();
        let mut cursors = Vec::with_capacity(self.settings.strategies.len());
        let mut total_pages = 0;
        let mut last_error = None;
        let mut last_stats = None;

        for strategy in &self.settings.strategies {
            let mut cursor: Option<String> = None;
            let mut pages = 0;
            while pages < budget && records.len() < cap {
                let result = self
                    .source
                    .fetch_page(place_id, cursor.as_deref(), strategy)
                    .await;
                pages += 1;
                total_pages += 1;
                let page = match result {
                    Ok(page) => {
                        metrics::record_fetch("prime", "ok");
                        page
                    }
                    Err(e) => {
                        metrics::record_fetch("prime", e.kind());
                        self.report(
                            format!("prime_failed:{place_id}:{strategy}"),
                            Severity::Error,
                            "job pool prime fetch failed",
                            json!({
                                "placeId": place_id,
                                "strategy": strategy.key(),
                                "pages": pages,
                                "error": e.to_string(),
                            }),
                        )
                        .await;
                        last_error = Some(e);
                        break;
                    }
                };

                let stats = self
                    .absorb_page(&mut records, place_id, strategy, &page, cap, "prime")
                    .await;
                last_stats = Some(stats);
                cursor = page.next_page_cursor;
                if cursor.is_none() {
                    break;
                }
            }
            cursors.push(cursor);
        }

        if records.is_empty() {
            if let Some(e) = last_error {
                return Err(Error::Upstream(e));
            }
            error!(
                place_id,
                pages = total_pages,
                last_stats = ?last_stats,
                "failed to prime job pool, no eligible servers"
            );
            return Err(Error::PoolExhausted {
                place_id: place_id.to_string(),
                pages: total_pages,
            });
        }

        let entry = Arc::new(PoolEntry::primed(
            place_id,
            &self.settings.strategies,
            self.settings.ttl,
            records,
            cursors,
        ));
        let size = entry.len().await;
        self.put(Arc::clone(&entry)).await;
        info!(place_id, records = size, pages = total_pages, "job pool primed");

        if size < self.settings.target_size {
            self.schedule_top_up(&entry, true).await;
        }
        Ok(entry)
    }

    /// Start a background fetch loop for each strategy not already running.
    ///
    /// With `resume_only`, strategies whose listing ran out during the prime
    /// are left alone.
    async fn schedule_top_up(self: &Arc<Self>, entry: &Arc<PoolEntry>, resume_only: bool) {
        if entry.is_expired(Instant::now()) || entry.len().await >= self.settings.target_size {
            return;
        }

        for (index, state) in entry.strategies().iter().enumerate() {
            if resume_only && state.cursor().await.is_none() {
                continue;
            }
            if !state.try_begin() {
                debug!(
                    place_id = entry.place_id(),
                    strategy = state.key(),
                    "top-up already running"
                );
                continue;
            }
            let claim = InFlight {
                entry: Arc::clone(entry),
                index,
            };
            let pool = Arc::clone(self);
            tokio::spawn(async move {
                pool.top_up(&claim.entry, claim.state()).await;
            });
        }
    }

    /// Fetch pages for one strategy until the entry is full, the page budget
    /// is spent, or the listing ends. Failures are logged, never surfaced.
    async fn top_up(&self, entry: &Arc<PoolEntry>, state: &StrategyState) {
        let place_id = entry.place_id();
        let strategy = state.strategy();
        let target = self.settings.target_size;
        let budget = self.settings.pages_per_strategy();
        let mut cursor = state.cursor().await;
        let mut pages = 0;

        while pages < budget {
            if entry.is_expired(Instant::now())
                || entry.len().await >= target
                || !self.is_current(entry).await
            {
                break;
            }

            let result = self
                .source
                .fetch_page(place_id, cursor.as_deref(), strategy)
                .await;
            pages += 1;
            let page = match result {
                Ok(page) => {
                    metrics::record_fetch("top_up", "ok");
                    page
                }
                Err(e) => {
                    metrics::record_fetch("top_up", e.kind());
                    self.report(
                        format!("top_up_failed:{place_id}:{strategy}"),
                        Severity::Error,
                        "job pool top-up failed",
                        json!({
                            "placeId": place_id,
                            "strategy": strategy.key(),
                            "cursor": cursor,
                            "error": e.to_string(),
                        }),
                    )
                    .await;
                    break;
                }
            };

            {
                let mut records = entry.records().await;
                self.absorb_page(&mut records, place_id, strategy, &page, target, "top_up")
                    .await;
            }
            cursor = page.next_page_cursor;
            state.set_cursor(cursor.clone()).await;
            if cursor.is_none() {
                break;
            }
        }

        let records = entry.len().await;
        debug!(place_id, strategy = %strategy, pages, records, "top-up finished");
    }

    /// Filter one page against `records` and append the survivors up to `cap`.
    async fn absorb_page(
        &self,
        records: &mut EntryRecords,
        place_id: &str,
        strategy: &FetchStrategy,
        page: &ServerPage,
        cap: usize,
        phase: &'static str,
    ) -> FilterStats {
        let outcome = {
            let recycle = self.recycle.lock().await;
            filter_page(
                &page.data,
                records.ids(),
                &recycle,
                Instant::now(),
                strategy,
                self.settings.min_players,
            )
        };
        metrics::record_rejections(&outcome.stats, strategy);

        let stats = outcome.stats;
        if stats.eligible == 0 {
            self.report(
                format!("zero_yield:{phase}:{place_id}:{strategy}"),
                Severity::Warn,
                "Roblox page yielded zero eligible servers",
                json!({
                    "placeId": place_id,
                    "phase": phase,
                    "strategy": strategy.key(),
                    "stats": stats,
                }),
            )
            .await;
            return stats;
        }

        let added = records.append(outcome.eligible, cap);
        debug!(
            place_id,
            strategy = %strategy,
            phase,
            added,
            total = records.len(),
            "page absorbed"
        );
        stats
    }

    async fn report(
        &self,
        class_key: String,
        severity: Severity,
        message: &str,
        details: serde_json::Value,
    ) {
        self.throttle
            .lock()
            .await
            .report(&class_key, severity, message, details, Instant::now());
    }

    /// Drop expired entries, prune the recycle tracker and flush due log
    /// summaries.
    pub async fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let (expired, entries) = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired(now));
            (before - entries.len(), entries.len())
        };
        metrics::set_entries(entries);
        let purged = self.recycle.lock().await.purge(now);
        let summaries = self.throttle.lock().await.flush(now);

        if expired > 0 || purged > 0 {
            debug!(expired, purged, summaries, entries, "sweep complete");
        }
        SweepReport {
            expired,
            purged,
            summaries,
            entries,
        }
    }

    pub async fn summary(&self) -> PoolSummary {
        let stored: Vec<Arc<PoolEntry>> = self.entries.read().await.values().cloned().collect();
        let mut records = 0;
        for entry in &stored {
            records += entry.len().await;
        }
        PoolSummary {
            entries: stored.len(),
            records,
            priming: self.priming.lock().await.len(),
            recently_reserved: self.recycle.lock().await.len(),
        }
    }

    #[cfg(test)]
    async fn throttled_classes(&self) -> Vec<String> {
        let throttle = self.throttle.lock().await;
        throttle.classes().map(str::to_string).collect()
    }
}

impl std::fmt::Debug for JobPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPool")
            .field("source", &self.source.id())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
