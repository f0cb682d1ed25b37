use serde::{Deserialize, Serialize};

/// A bounded FIFO of events waiting to be collected by the remote side.
///
/// When full, the oldest event is dropped to make room; the newest state is always the one worth
/// keeping.
pub struct EventQueue<E, const N: usize> {
    events: heapless::Deque<E, N>,
    stats: EventStatistics,
}

impl<E, const N: usize> Default for EventQueue<E, N> {
    fn default() -> Self {
        Self {
            events: heapless::Deque::new(),
            stats: Default::default(),
        }
    }
}

impl<E, const N: usize> EventQueue<E, N> {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn statistics(&self) -> EventStatistics {
        self.stats.clone()
    }

    pub fn push(&mut self, event: E) {
        if self.events.is_full() {
            self.events.pop_front();
            self.stats.dropped = self.stats.dropped.wrapping_add(1);
        }

        assert!(self.events.push_back(event).is_ok());
        self.stats.pushed = self.stats.pushed.wrapping_add(1);
    }

    /// Removes and returns the oldest queued event.
    pub fn pop_oldest(&mut self) -> Option<E> {
        let event = self.events.pop_front();
        if event.is_some() {
            self.stats.delivered = self.stats.delivered.wrapping_add(1);
        }
        event
    }
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub struct EventStatistics {
    /// Events ever queued.
    pub pushed: u32,

    /// Events lost to queue overflow.
    pub dropped: u32,

    /// Events handed to the remote side.
    pub delivered: u32,
}
