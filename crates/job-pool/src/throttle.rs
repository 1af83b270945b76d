//! Rate-limited warning/error emission
//!
//! Sustained upstream failure (rate limiting, outages) would otherwise log
//! once per page per strategy per place. Each class key emits its first
//! occurrence immediately; later occurrences inside the interval are counted
//! and only the latest message/details are kept. The first report after the
//! interval (or a sweep `flush`) emits one summary carrying the suppressed
//! count, then the window starts over.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Error,
}

/// What `report` did with an occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
    Emitted,
    Suppressed,
    /// Emitted together with the count of occurrences suppressed before it
    Summary { suppressed: u64 },
}

#[derive(Debug)]
struct LatestOccurrence {
    severity: Severity,
    message: String,
    details: serde_json::Value,
}

#[derive(Debug)]
struct ThrottleState {
    last_emitted: Instant,
    suppressed: u64,
    latest: Option<LatestOccurrence>,
}

#[derive(Debug)]
pub struct ThrottledLogger {
    interval: Duration,
    states: HashMap<String, ThrottleState>,
}

impl ThrottledLogger {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            states: HashMap::new(),
        }
    }

    pub fn report(
        &mut self,
        class_key: &str,
        severity: Severity,
        message: &str,
        details: serde_json::Value,
        now: Instant,
    ) -> Emission {
        let Some(state) = self.states.get_mut(class_key) else {
            emit(class_key, severity, message, &details, 0);
            self.states.insert(
                class_key.to_string(),
                ThrottleState {
                    last_emitted: now,
                    suppressed: 0,
                    latest: None,
                },
            );
            return Emission::Emitted;
        };

        if now.saturating_duration_since(state.last_emitted) < self.interval {
            state.suppressed += 1;
            state.latest = Some(LatestOccurrence {
                severity,
                message: message.to_string(),
                details,
            });
            return Emission::Suppressed;
        }

        let suppressed = state.suppressed;
        emit(class_key, severity, message, &details, suppressed);
        state.last_emitted = now;
        state.suppressed = 0;
        state.latest = None;
        if suppressed > 0 {
            Emission::Summary { suppressed }
        } else {
            Emission::Emitted
        }
    }

    /// Emit summaries for windows that have elapsed with suppressed
    /// occurrences, and forget quiet classes. Returns the number of summaries.
    pub fn flush(&mut self, now: Instant) -> usize {
        let interval = self.interval;
        let mut summaries = 0;
        self.states.retain(|class_key, state| {
            if now.saturating_duration_since(state.last_emitted) < interval {
                return true;
            }
            match state.latest.take() {
                Some(latest) => {
                    emit(
                        class_key,
                        latest.severity,
                        &latest.message,
                        &latest.details,
                        state.suppressed,
                    );
                    summaries += 1;
                    state.last_emitted = now;
                    state.suppressed = 0;
                    true
                }
                None => false,
            }
        });
        summaries
    }

    /// Number of class keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    /// Class keys currently tracked, in no particular order.
    pub fn classes(&self) -> impl Iterator<Item = &str> + '_ {
        self.states.keys().map(String::as_str)
    }
}

fn emit(
    class_key: &str,
    severity: Severity,
    message: &str,
    details: &serde_json::Value,
    suppressed: u64,
) {
    match severity {
        Severity::Warn => warn!(class = class_key, suppressed, details = %details, "{message}"),
        Severity::Error => error!(class = class_key, suppressed, details = %details, "{message}"),
    }
}
