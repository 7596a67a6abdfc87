// ABOUTME: Size- and time-bounded buffering of routine log entries
// ABOUTME: Keeps chatty tasks from flooding the websocket with tiny frames

use std::time::{Duration, Instant};

use crate::events::message::LogEntry;

/// Accumulates log entries for one task until either the size cap or
/// the age cap is hit. Entries that bypass batching are not pushed
/// here; the caller flushes the buffer and sends them in one frame.
pub struct LogBatch {
    entries: Vec<LogEntry>,
    max_size: usize,
    max_age: Duration,
    oldest: Option<Instant>,
}

impl LogBatch {
    pub fn new(max_size: usize, max_age: Duration) -> Self {
        Self {
            entries: Vec::with_capacity(max_size),
            max_size,
            max_age,
            oldest: None,
        }
    }

    /// Buffer an entry. Returns the full batch when the size cap is
    /// reached, `None` while still accumulating.
    pub fn push(&mut self, entry: LogEntry) -> Option<Vec<LogEntry>> {
        if self.entries.is_empty() {
            self.oldest = Some(Instant::now());
        }
        self.entries.push(entry);

        if self.entries.len() >= self.max_size {
            self.drain()
        } else {
            None
        }
    }

    /// Take whatever is buffered, regardless of size or age.
    pub fn drain(&mut self) -> Option<Vec<LogEntry>> {
        if self.entries.is_empty() {
            return None;
        }
        self.oldest = None;
        Some(std::mem::take(&mut self.entries))
    }

    /// Take the buffer only if its oldest entry has waited long enough.
    pub fn drain_if_stale(&mut self) -> Option<Vec<LogEntry>> {
        match self.oldest {
            Some(oldest) if oldest.elapsed() >= self.max_age => self.drain(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: usize) -> LogEntry {
        LogEntry::info(format!("step {n}"), None)
    }

    #[test]
    fn test_flushes_exactly_at_size_cap() {
        let mut batch = LogBatch::new(3, Duration::from_secs(60));

        assert!(batch.push(entry(0)).is_none());
        assert!(batch.push(entry(1)).is_none());

        let flushed = batch.push(entry(2)).unwrap();
        assert_eq!(flushed.len(), 3);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_drain_returns_partial_buffer_once() {
        let mut batch = LogBatch::new(10, Duration::from_secs(60));
        batch.push(entry(0));
        batch.push(entry(1));

        assert_eq!(batch.drain().unwrap().len(), 2);
        assert!(batch.drain().is_none());
    }

    #[test]
    fn test_stale_drain_respects_age() {
        let mut batch = LogBatch::new(10, Duration::from_millis(0));
        assert!(batch.drain_if_stale().is_none());

        batch.push(entry(0));
        // Zero max age means anything buffered is already stale.
        assert_eq!(batch.drain_if_stale().unwrap().len(), 1);
    }

    #[test]
    fn test_fresh_buffer_not_drained_as_stale() {
        let mut batch = LogBatch::new(10, Duration::from_secs(60));
        batch.push(entry(0));
        assert!(batch.drain_if_stale().is_none());
        assert!(!batch.is_empty());
    }
}
