//! Per-page record screening
//!
//! Each raw server is classified by the first rule it hits, in order:
//! malformed id, duplicate (already pooled or earlier on this page), recently
//! reserved, under the occupancy floor, at capacity. At-capacity servers are
//! rejected only when the strategy excludes them; otherwise they are kept and
//! counted as `full`. Survivors come back shuffled so issue order does not
//! follow the upstream listing order.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::{Number, Value};
use tokio::time::Instant;
use upstream::FetchStrategy;

use crate::entry::JobRecord;
use crate::recycle::RecycleTracker;

/// Per-page classification counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterStats {
    pub total: usize,
    pub invalid: usize,
    pub duplicate: usize,
    pub recently_reserved: usize,
    pub low_players: usize,
    /// At-capacity servers, whether rejected or kept
    pub full: usize,
    pub eligible: usize,
}

impl FilterStats {
    /// Rejection counts keyed by metrics label.
    pub fn rejections(&self, strategy: &FetchStrategy) -> [(&'static str, usize); 5] {
        let full_rejected = if strategy.exclude_full { self.full } else { 0 };
        [
            ("invalid", self.invalid),
            ("duplicate", self.duplicate),
            ("recently_reserved", self.recently_reserved),
            ("low_players", self.low_players),
            ("full", full_rejected),
        ]
    }
}

#[derive(Debug)]
pub struct FilterOutcome {
    pub eligible: Vec<JobRecord>,
    pub stats: FilterStats,
}

/// Screen one page of raw servers against the entry's ids and the recycle tracker.
pub fn filter_page(
    servers: &[Value],
    pooled_ids: &HashSet<String>,
    recycle: &RecycleTracker,
    now: Instant,
    strategy: &FetchStrategy,
    min_players: u32,
) -> FilterOutcome {
    let mut stats = FilterStats::default();
    let mut page_ids: HashSet<&str> = HashSet::new();
    let mut eligible = Vec::new();

    for server in servers {
        stats.total += 1;

        let Some(id) = server.get("id").and_then(Value::as_str).filter(|id| !id.is_empty()) else {
            stats.invalid += 1;
            continue;
        };

        if pooled_ids.contains(id) || page_ids.contains(id) {
            stats.duplicate += 1;
            continue;
        }

        if recycle.is_recent(id, now) {
            stats.recently_reserved += 1;
            continue;
        }

        let playing = number_field(server, "playing");
        let max_players = number_field(server, "maxPlayers");
        let playing_f = playing.as_ref().and_then(Number::as_f64);
        let max_f = max_players.as_ref().and_then(Number::as_f64);

        if playing_f.is_some_and(|p| p < f64::from(min_players)) {
            stats.low_players += 1;
            continue;
        }

        if let (Some(p), Some(max)) = (playing_f, max_f)
            && p >= max
        {
            stats.full += 1;
            if strategy.exclude_full {
                continue;
            }
        }

        page_ids.insert(id);
        eligible.push(JobRecord {
            job_id: id.to_string(),
            playing,
            max_players,
            ping: number_field(server, "ping"),
            fps: number_field(server, "fps"),
            reserved_at: None,
        });
    }

    eligible.shuffle(&mut rand::rng());
    stats.eligible = eligible.len();
    FilterOutcome { eligible, stats }
}

fn number_field(server: &Value, field: &str) -> Option<Number> {
    server.get(field).and_then(Value::as_number).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use upstream::SortOrder;

    fn tracker() -> RecycleTracker {
        RecycleTracker::new(Duration::from_secs(600), Duration::from_secs(1800))
    }

    fn excluding() -> FetchStrategy {
        FetchStrategy::new(SortOrder::Asc, true)
    }

    fn keeping() -> FetchStrategy {
        FetchStrategy::new(SortOrder::Asc, false)
    }

    #[test]
    fn duplicate_and_low_occupancy_scenario() {
        let page = vec![
            json!({"id": "a", "playing": 2, "maxPlayers": 10}),
            json!({"id": "b", "playing": 0, "maxPlayers": 10}),
            json!({"id": "a", "playing": 2, "maxPlayers": 10}),
        ];
        let out = filter_page(
            &page,
            &HashSet::new(),
            &tracker(),
            Instant::now(),
            &excluding(),
            1,
        );

        assert_eq!(out.stats.total, 3);
        assert_eq!(out.stats.low_players, 1);
        assert_eq!(out.stats.duplicate, 1);
        assert_eq!(out.stats.eligible, 1);
        assert_eq!(out.eligible.len(), 1);
        assert_eq!(out.eligible[0].job_id, "a");
        assert_eq!(out.eligible[0].playing, Some(2.into()));
    }

    #[test]
    fn malformed_ids_are_invalid() {
        let page = vec![
            json!({"playing": 3}),
            json!({"id": 12345}),
            json!({"id": ""}),
            json!("not-an-object"),
            Value::Null,
        ];
        let out = filter_page(
            &page,
            &HashSet::new(),
            &tracker(),
            Instant::now(),
            &excluding(),
            1,
        );
        assert_eq!(out.stats.invalid, 5);
        assert!(out.eligible.is_empty());
    }

    #[test]
    fn pooled_ids_are_duplicates() {
        let pooled: HashSet<String> = ["a".to_string()].into_iter().collect();
        let page = vec![json!({"id": "a", "playing": 5}), json!({"id": "b", "playing": 5})];
        let out = filter_page(&page, &pooled, &tracker(), Instant::now(), &excluding(), 1);
        assert_eq!(out.stats.duplicate, 1);
        assert_eq!(out.eligible.len(), 1);
        assert_eq!(out.eligible[0].job_id, "b");
    }

    #[test]
    fn recently_reserved_ids_are_rejected() {
        let mut recycle = tracker();
        let now = Instant::now();
        recycle.record("a", now);

        let page = vec![json!({"id": "a", "playing": 5}), json!({"id": "b", "playing": 5})];
        let out = filter_page(&page, &HashSet::new(), &recycle, now, &excluding(), 1);
        assert_eq!(out.stats.recently_reserved, 1);
        assert_eq!(out.eligible.len(), 1);

        // Outside the recycle window the id is admitted again
        let later = now + Duration::from_secs(601);
        let out = filter_page(&page, &HashSet::new(), &recycle, later, &excluding(), 1);
        assert_eq!(out.stats.recently_reserved, 0);
        assert_eq!(out.eligible.len(), 2);
    }

    #[test]
    fn full_servers_rejected_only_when_strategy_excludes_them() {
        let page = vec![
            json!({"id": "full", "playing": 10, "maxPlayers": 10}),
            json!({"id": "open", "playing": 4, "maxPlayers": 10}),
        ];

        let out = filter_page(
            &page,
            &HashSet::new(),
            &tracker(),
            Instant::now(),
            &excluding(),
            1,
        );
        assert_eq!(out.stats.full, 1);
        assert_eq!(out.eligible.len(), 1);
        assert_eq!(out.eligible[0].job_id, "open");

        let out = filter_page(
            &page,
            &HashSet::new(),
            &tracker(),
            Instant::now(),
            &keeping(),
            1,
        );
        assert_eq!(out.stats.full, 1);
        assert_eq!(out.eligible.len(), 2);
    }

    #[test]
    fn missing_occupancy_fields_pass_and_are_nulled() {
        let page = vec![json!({"id": "a", "playing": "many", "ping": 42, "fps": 59.9})];
        let out = filter_page(
            &page,
            &HashSet::new(),
            &tracker(),
            Instant::now(),
            &excluding(),
            1,
        );
        assert_eq!(out.eligible.len(), 1);
        let record = &out.eligible[0];
        assert!(record.playing.is_none());
        assert!(record.max_players.is_none());
        assert_eq!(record.ping, Some(42.into()));
        assert_eq!(record.fps.as_ref().and_then(Number::as_f64), Some(59.9));
    }

    #[test]
    fn occupancy_floor_is_configurable() {
        let page = vec![json!({"id": "a", "playing": 2}), json!({"id": "b", "playing": 5})];
        let out = filter_page(
            &page,
            &HashSet::new(),
            &tracker(),
            Instant::now(),
            &excluding(),
            3,
        );
        assert_eq!(out.stats.low_players, 1);
        assert_eq!(out.eligible[0].job_id, "b");
    }

    #[test]
    fn rejected_first_occurrence_does_not_mark_page_duplicate() {
        let page = vec![
            json!({"id": "a", "playing": 0}),
            json!({"id": "a", "playing": 4}),
        ];
        let out = filter_page(
            &page,
            &HashSet::new(),
            &tracker(),
            Instant::now(),
            &excluding(),
            1,
        );
        assert_eq!(out.stats.low_players, 1);
        assert_eq!(out.stats.duplicate, 0);
        assert_eq!(out.eligible.len(), 1);
    }

    #[test]
    fn all_rejected_page_yields_nothing() {
        let pooled: HashSet<String> = ["dup".to_string()].into_iter().collect();
        let mut recycle = tracker();
        let now = Instant::now();
        recycle.record("recent", now);
        let page = vec![
            json!({"id": "dup", "playing": 4}),
            json!({"id": "low", "playing": 0}),
            json!({"id": "full", "playing": 8, "maxPlayers": 8}),
            json!({"id": "recent", "playing": 4}),
        ];
        let out = filter_page(&page, &pooled, &recycle, now, &excluding(), 1);
        assert!(out.eligible.is_empty());
        assert_eq!(out.stats.eligible, 0);
        assert_eq!(out.stats.total, 4);
    }

    #[test]
    fn eligible_order_is_shuffled() {
        let page: Vec<Value> = (0..64)
            .map(|i| json!({"id": format!("job-{i}"), "playing": 1}))
            .collect();
        let listing_order: Vec<String> = (0..64).map(|i| format!("job-{i}")).collect();

        // 64! orderings; two identity shuffles in a row would be a broken shuffle
        let shuffled_once = (0..2).any(|_| {
            let out = filter_page(
                &page,
                &HashSet::new(),
                &tracker(),
                Instant::now(),
                &excluding(),
                1,
            );
            let ids: Vec<String> = out.eligible.into_iter().map(|r| r.job_id).collect();
            ids != listing_order
        });
        assert!(shuffled_once);
    }

    #[test]
    fn rejections_report_full_only_when_excluded() {
        let stats = FilterStats {
            full: 2,
            duplicate: 1,
            ..Default::default()
        };
        let excluded = stats.rejections(&excluding());
        assert!(excluded.contains(&("full", 2)));
        let kept = stats.rejections(&keeping());
        assert!(kept.contains(&("full", 0)));
        assert!(kept.contains(&("duplicate", 1)));
    }
}
