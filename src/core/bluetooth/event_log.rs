//! Diagnostic event log
//! Append-only trace of state transitions and protocol traffic, bounded as a ring buffer.

use std::collections::VecDeque;

use log::info;

use crate::core::bluetooth::constants::DEFAULT_EVENT_LOG_CAPACITY;

/// `log` target every entry is mirrored to
pub const EVENT_LOG_TARGET: &str = "event_log";

/// Bounded event log; the oldest entry is evicted once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<String>,
    capacity: usize,
    dropped: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_EVENT_LOG_CAPACITY)),
            capacity,
            dropped: 0,
        }
    }

    /// Appends an entry and mirrors it to the process log.
    pub fn push(&mut self, entry: impl Into<String>) {
        let entry = entry.into();
        info!(target: EVENT_LOG_TARGET, "{}", entry);
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(entry);
    }

    /// Point-in-time copy, oldest first
    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&str> {
        self.entries.back().map(String::as_str)
    }

    /// Number of entries evicted so far
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_arrival_order() {
        let mut log = EventLog::new(10);
        log.push("one");
        log.push("two");
        assert_eq!(log.entries(), vec!["one", "two"]);
        assert_eq!(log.last(), Some("two"));
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut log = EventLog::new(2);
        log.push("a");
        log.push("b");
        log.push("c");
        assert_eq!(log.entries(), vec!["b", "c"]);
        assert_eq!(log.dropped(), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn zero_capacity_still_keeps_latest() {
        let mut log = EventLog::new(0);
        log.push("a");
        log.push("b");
        assert_eq!(log.entries(), vec!["b"]);
    }
}
