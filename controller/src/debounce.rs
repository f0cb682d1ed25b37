use crate::{elapsed, TimeMillis};

/// Commits a candidate value once it has been seen unchanged for its hold time.
#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    candidate: T,
    since: TimeMillis,
}

impl<T: Copy + PartialEq> Debouncer<T> {
    pub fn new(initial: T, now: TimeMillis) -> Self {
        Self {
            candidate: initial,
            since: now,
        }
    }

    /// Feeds a new observation, returning it once it has been stable for `hold`.
    pub fn update(&mut self, candidate: T, now: TimeMillis, hold: TimeMillis) -> Option<T> {
        if candidate != self.candidate {
            self.candidate = candidate;
            self.since = now;
        }

        (elapsed(now, self.since) >= hold).then_some(candidate)
    }
}
