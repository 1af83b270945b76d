//! Recently-issued job id tracking
//!
//! Process-wide map from job id to the instant it was last handed out. The
//! record filter consults it so an issued id cannot re-enter any pool within
//! the recycle window, even after the entry that held it is discarded.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct RecycleTracker {
    window: Duration,
    alert_window: Duration,
    issued: HashMap<String, Instant>,
}

impl RecycleTracker {
    pub fn new(window: Duration, alert_window: Duration) -> Self {
        Self {
            window,
            alert_window,
            issued: HashMap::new(),
        }
    }

    /// Whether `job_id` was issued less than one recycle window before `now`.
    pub fn is_recent(&self, job_id: &str, now: Instant) -> bool {
        self.issued
            .get(job_id)
            .is_some_and(|at| now.saturating_duration_since(*at) < self.window)
    }

    /// Record an issuance.
    ///
    /// Returns the age of the previous issuance when it falls inside the
    /// duplicate-alert window; the caller reports it, the issuance itself is
    /// never refused here.
    pub fn record(&mut self, job_id: &str, now: Instant) -> Option<Duration> {
        let previous = self.issued.insert(job_id.to_string(), now)?;
        let age = now.saturating_duration_since(previous);
        (age < self.alert_window).then_some(age)
    }

    /// Drop entries older than both windows. Returns how many were removed.
    pub fn purge(&mut self, now: Instant) -> usize {
        let retention = self.window.max(self.alert_window);
        let before = self.issued.len();
        self.issued
            .retain(|_, at| now.saturating_duration_since(*at) < retention);
        before - self.issued.len()
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}
