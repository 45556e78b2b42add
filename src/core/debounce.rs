use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::time::Instant;

/// Per-subject scan rate limiter.
///
/// Records live as long as the debouncer; nothing is evicted, so memory
/// grows with the number of distinct badges seen in one session.
#[derive(Debug, Default)]
pub struct ScanDebouncer {
    last_accepted: DashMap<String, Instant>,
}

impl ScanDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true and records `now` for `subject` when it has never been
    /// accepted or its last acceptance is at least `cooldown` old.
    pub fn should_process(&self, subject: &str, now: Instant, cooldown: Duration) -> bool {
        match self.last_accepted.entry(subject.to_owned()) {
            Entry::Occupied(mut e) => {
                if now.saturating_duration_since(*e.get()) >= cooldown {
                    e.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(e) => {
                e.insert(now);
                true
            }
        }
    }

    /// Number of distinct subjects seen so far
    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_accepted.is_empty()
    }
}
