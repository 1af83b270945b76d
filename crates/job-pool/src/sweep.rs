//! Periodic expiry sweep
//!
//! Spawns a background task that runs `JobPool::sweep` on a fixed interval.
//! The task holds only a weak reference, so it ends by itself once the pool
//! is dropped; `SweepTask` stops it explicitly on shutdown or when dropped.

use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::pool::JobPool;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries dropped because their TTL passed
    pub expired: usize,
    /// Recycle tracker entries past retention
    pub purged: usize,
    /// Throttled log summaries emitted
    pub summaries: usize,
    /// Entries left in the store
    pub entries: usize,
}

/// Handle to the running sweep task.
#[derive(Debug)]
pub struct SweepTask {
    handle: Option<JoinHandle<()>>,
}

impl SweepTask {
    /// Stop the task and wait for it to wind down.
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
            info!("sweep task stopped");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for SweepTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Spawn the sweep loop for `pool`, ticking every `sweep_interval`.
///
/// The first tick is skipped: a freshly started pool has nothing to sweep.
pub fn spawn_sweep_task(pool: &Arc<JobPool>) -> SweepTask {
    let interval = pool.settings().sweep_interval;
    let weak: Weak<JobPool> = Arc::downgrade(pool);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(pool) = weak.upgrade() else {
                debug!("job pool dropped, sweep task exiting");
                break;
            };
            pool.sweep().await;
        }
    });

    info!(interval_ms = interval.as_millis() as u64, "sweep task started");
    SweepTask {
        handle: Some(handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::PoolSettings;
    use crate::testing::{ScriptedSource, page_of};
    use std::time::Duration;
    use upstream::PageSource;

    fn pool(ttl: Duration, sweep_interval: Duration) -> Arc<JobPool> {
        let source: Arc<dyn PageSource> =
            Arc::new(ScriptedSource::new(|_, _| Ok(page_of("job", 0..5, None))));
        JobPool::new(
            PoolSettings {
                target_size: 5,
                ttl,
                sweep_interval,
                ..Default::default()
            },
            source,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_task_drops_expired_entries() {
        let pool = pool(Duration::from_secs(30), Duration::from_secs(15));
        let task = spawn_sweep_task(&pool);

        pool.reserve("42").await.unwrap();
        assert!(pool.get("42").await.is_some());

        tokio::time::sleep(Duration::from_secs(46)).await;
        assert!(pool.get("42").await.is_none());
        assert!(!task.is_finished());
        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn live_entries_survive_sweeps() {
        let pool = pool(Duration::from_secs(120), Duration::from_secs(15));
        let _task = spawn_sweep_task(&pool);

        pool.reserve("42").await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(pool.get("42").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn task_exits_when_pool_dropped() {
        let pool = pool(Duration::from_secs(120), Duration::from_secs(1));
        let task = spawn_sweep_task(&pool);
        drop(pool);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(task.is_finished());
    }

    #[tokio::test]
    async fn shutdown_stops_the_task() {
        let pool = pool(Duration::from_secs(120), Duration::from_secs(15));
        let task = spawn_sweep_task(&pool);
        task.shutdown().await;
    }
}
