//! Per-user trailing-window batch scheduler.
//!
//! Pure bookkeeping: every method takes the current instant, so the queue
//! drives it from the tokio clock and tests drive it with synthetic instants.
//!
//! A user's batch becomes due once both hold:
//! - no edit has arrived for `window` (trailing debounce), and
//! - `rate_limit` has passed since the user's previous dispatch.
//!
//! While a batch is in flight nothing else is dispatched for that user; new
//! arrivals accumulate and go out in the next allowed slot.

use super::types::LearningJob;

use tokio::time::Instant;

use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Default)]
struct UserBatch {
    edit_ids: Vec<String>,
    last_arrival: Option<Instant>,
    next_allowed: Option<Instant>,
    in_flight: bool,
}

impl UserBatch {
    fn due_at(&self, window: Duration) -> Option<Instant> {
        if self.in_flight || self.edit_ids.is_empty() {
            return None;
        }
        let debounced = self.last_arrival? + window;
        Some(match self.next_allowed {
            Some(allowed) => debounced.max(allowed),
            None => debounced,
        })
    }

    fn is_idle(&self, now: Instant) -> bool {
        !self.in_flight
            && self.edit_ids.is_empty()
            && self.next_allowed.is_none_or(|allowed| allowed <= now)
    }
}

#[derive(Debug)]
pub struct BatchScheduler {
    window: Duration,
    rate_limit: Duration,
    users: HashMap<String, UserBatch>,
}

impl BatchScheduler {
    pub fn new(window: Duration, rate_limit: Duration) -> Self {
        Self {
            window,
            rate_limit,
            users: HashMap::new(),
        }
    }

    /// Add edits to the user's open batch and restart its debounce window.
    pub fn record(&mut self, user_id: &str, edit_ids: &[String], now: Instant) {
        let batch = self.users.entry(user_id.to_string()).or_default();
        for id in edit_ids {
            if !batch.edit_ids.contains(id) {
                batch.edit_ids.push(id.clone());
            }
        }
        batch.last_arrival = Some(now);
    }

    /// Earliest instant at which some batch becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.users
            .values()
            .filter_map(|batch| batch.due_at(self.window))
            .min()
    }

    /// Flush every due batch. Each returned job marks its user in flight
    /// until `complete` is called.
    pub fn take_due(&mut self, now: Instant) -> Vec<LearningJob> {
        let mut jobs = Vec::new();
        for (user_id, batch) in &mut self.users {
            if batch.due_at(self.window).is_some_and(|due| due <= now) {
                batch.in_flight = true;
                batch.next_allowed = Some(now + self.rate_limit);
                jobs.push(LearningJob {
                    user_id: user_id.clone(),
                    edit_ids: std::mem::take(&mut batch.edit_ids),
                });
            }
        }
        self.users.retain(|_, batch| !batch.is_idle(now));
        jobs.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        jobs
    }

    /// The user's in-flight job finished (applied, skipped or dead-lettered).
    pub fn complete(&mut self, user_id: &str, now: Instant) {
        if let Some(batch) = self.users.get_mut(user_id) {
            batch.in_flight = false;
            if batch.is_idle(now) {
                self.users.remove(user_id);
            }
        }
    }

    /// Drop the given not-yet-dispatched edits from the user's batch. Edits
    /// recorded under other ids stay scheduled. In-flight state and the
    /// rate-limit slot are kept.
    pub fn discard(&mut self, user_id: &str, edit_ids: &[String]) -> usize {
        let Some(batch) = self.users.get_mut(user_id) else {
            return 0;
        };
        let before = batch.edit_ids.len();
        batch.edit_ids.retain(|id| !edit_ids.contains(id));
        before - batch.edit_ids.len()
    }

    pub fn is_in_flight(&self, user_id: &str) -> bool {
        self.users.get(user_id).is_some_and(|batch| batch.in_flight)
    }

    pub fn pending_count(&self, user_id: &str) -> usize {
        self.users
            .get(user_id)
            .map(|batch| batch.edit_ids.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(120);
    const RATE_LIMIT: Duration = Duration::from_secs(300);

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn window_resets_on_each_arrival() {
        let start = Instant::now();
        let mut scheduler = BatchScheduler::new(WINDOW, RATE_LIMIT);

        scheduler.record("u1", &ids(&["e1"]), start);
        scheduler.record("u1", &ids(&["e2"]), start + Duration::from_secs(90));
        assert_eq!(
            scheduler.next_deadline(),
            Some(start + Duration::from_secs(210))
        );

        assert!(scheduler.take_due(start + Duration::from_secs(150)).is_empty());
        let jobs = scheduler.take_due(start + Duration::from_secs(210));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].edit_ids, ids(&["e1", "e2"]));
        assert!(scheduler.is_in_flight("u1"));
    }

    #[test]
    fn burst_within_rate_limit_yields_one_dispatch_then_defers() {
        let start = Instant::now();
        let mut scheduler = BatchScheduler::new(WINDOW, RATE_LIMIT);

        for (second, id) in [(0, "e1"), (10, "e2"), (20, "e3")] {
            scheduler.record("u1", &ids(&[id]), start + Duration::from_secs(second));
        }
        let dispatched_at = start + Duration::from_secs(140);
        let first = scheduler.take_due(dispatched_at);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].edit_ids.len(), 3);
        scheduler.complete("u1", dispatched_at + Duration::from_secs(1));

        // A later edit debounces quickly but must wait for the rate-limit slot.
        scheduler.record("u1", &ids(&["e4"]), dispatched_at + Duration::from_secs(5));
        assert_eq!(scheduler.next_deadline(), Some(dispatched_at + RATE_LIMIT));
        assert!(scheduler.take_due(dispatched_at + Duration::from_secs(200)).is_empty());

        let second = scheduler.take_due(dispatched_at + RATE_LIMIT);
        assert_eq!(second[0].edit_ids, ids(&["e4"]));
    }

    #[test]
    fn same_user_is_never_dispatched_twice_concurrently() {
        let start = Instant::now();
        let mut scheduler = BatchScheduler::new(WINDOW, Duration::ZERO);

        scheduler.record("u1", &ids(&["e1"]), start);
        assert_eq!(scheduler.take_due(start + WINDOW).len(), 1);

        scheduler.record("u1", &ids(&["e2"]), start + WINDOW);
        let later = start + WINDOW * 3;
        assert!(scheduler.take_due(later).is_empty());
        assert_eq!(scheduler.pending_count("u1"), 1);

        scheduler.complete("u1", later);
        assert_eq!(scheduler.take_due(later)[0].edit_ids, ids(&["e2"]));
    }

    #[test]
    fn users_are_batched_independently() {
        let start = Instant::now();
        let mut scheduler = BatchScheduler::new(WINDOW, RATE_LIMIT);
        scheduler.record("u2", &ids(&["b1"]), start);
        scheduler.record("u1", &ids(&["a1"]), start + Duration::from_secs(30));

        let jobs = scheduler.take_due(start + WINDOW);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].user_id, "u2");
        let jobs = scheduler.take_due(start + WINDOW + Duration::from_secs(30));
        assert_eq!(jobs[0].user_id, "u1");
    }

    #[test]
    fn discard_drops_pending_edits_and_idle_users_are_forgotten() {
        let start = Instant::now();
        let mut scheduler = BatchScheduler::new(WINDOW, RATE_LIMIT);
        scheduler.record("u1", &ids(&["e1", "e2"]), start);
        assert_eq!(scheduler.discard("u1", &ids(&["e1", "e2"])), 2);
        assert_eq!(scheduler.next_deadline(), None);
        assert!(scheduler.take_due(start + WINDOW).is_empty());
        assert_eq!(scheduler.pending_count("u1"), 0);
    }

    #[test]
    fn discard_keeps_edits_recorded_after_the_discarded_set() {
        let start = Instant::now();
        let mut scheduler = BatchScheduler::new(WINDOW, RATE_LIMIT);
        scheduler.record("u1", &ids(&["e1"]), start);
        // e2 lands between the store discarding e1 and the queue hearing of it.
        scheduler.record("u1", &ids(&["e2"]), start + Duration::from_secs(5));

        assert_eq!(scheduler.discard("u1", &ids(&["e1"])), 1);
        assert_eq!(scheduler.pending_count("u1"), 1);
        let jobs = scheduler.take_due(start + Duration::from_secs(5) + WINDOW);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].edit_ids, ids(&["e2"]));
    }

    #[test]
    fn duplicate_edit_ids_are_coalesced() {
        let start = Instant::now();
        let mut scheduler = BatchScheduler::new(WINDOW, RATE_LIMIT);
        scheduler.record("u1", &ids(&["e1"]), start);
        scheduler.record("u1", &ids(&["e1", "e2"]), start);
        assert_eq!(scheduler.pending_count("u1"), 2);
    }
}
