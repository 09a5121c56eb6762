//! Time-windowed history buffer for one port.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

/// Default retention window in seconds.
pub const DEFAULT_WINDOW_SECONDS: u64 = 600;

/// One timestamped line held in a [`CircularBuffer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferEntry {
    /// When the line was produced (or received, for raw lines).
    pub timestamp: DateTime<Utc>,
    /// Line text.
    pub text: String,
    /// True for synthetic connection lifecycle markers.
    pub is_marker: bool,
}

/// Bounded, time-windowed ordered store of timestamped lines.
///
/// Entries older than the retention window are dropped on every mutating
/// and reading operation, so callers never observe stale entries. Safe for
/// one writer (the owning read loop) concurrent with any number of readers.
#[derive(Debug)]
pub struct CircularBuffer {
    window_seconds: u64,
    entries: Mutex<VecDeque<BufferEntry>>,
}

impl CircularBuffer {
    /// Create a buffer retaining entries for `window_seconds`.
    #[must_use]
    pub fn new(window_seconds: u64) -> Self {
        Self {
            window_seconds,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// The configured retention window in seconds.
    #[must_use]
    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    /// Append a data line.
    pub fn add(&self, timestamp: DateTime<Utc>, text: impl Into<String>) {
        self.push(timestamp, text.into(), false);
    }

    /// Append a lifecycle marker line.
    pub fn add_marker(&self, timestamp: DateTime<Utc>, text: impl Into<String>) {
        self.push(timestamp, text.into(), true);
    }

    fn push(&self, timestamp: DateTime<Utc>, text: String, is_marker: bool) {
        let mut entries = self.lock();
        // Clamp device-supplied timestamps so ordering stays non-decreasing.
        let timestamp = match entries.back() {
            Some(last) if timestamp < last.timestamp => last.timestamp,
            _ => timestamp,
        };
        entries.push_back(BufferEntry {
            timestamp,
            text,
            is_marker,
        });
        Self::evict(&mut entries, self.window_seconds);
    }

    /// All retained entries, oldest first.
    #[must_use]
    pub fn get_all(&self) -> Vec<BufferEntry> {
        let mut entries = self.lock();
        Self::evict(&mut entries, self.window_seconds);
        entries.iter().cloned().collect()
    }

    /// Retained entries no older than `seconds`, oldest first.
    ///
    /// Equivalent to filtering [`Self::get_all`] by entry age.
    #[must_use]
    pub fn get_recent(&self, seconds: u64) -> Vec<BufferEntry> {
        let mut entries = self.lock();
        Self::evict(&mut entries, self.window_seconds);
        let cutoff = Utc::now() - seconds_to_duration(seconds);
        entries
            .iter()
            .filter(|entry| entry.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut entries = self.lock();
        Self::evict(&mut entries, self.window_seconds);
        entries.len()
    }

    /// True when no entries are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn evict(entries: &mut VecDeque<BufferEntry>, window_seconds: u64) {
        let cutoff = Utc::now() - seconds_to_duration(window_seconds);
        while entries.front().is_some_and(|e| e.timestamp < cutoff) {
            entries.pop_front();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<BufferEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn seconds_to_duration(seconds: u64) -> ChronoDuration {
    ChronoDuration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX))
}
