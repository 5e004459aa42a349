/*! Bounded, categorized log ring for the session bridge.

Every reader operation appends one entry tagged with a category
(`SYS` lifecycle, `CMD` command outcomes, `PROTO` frame hex, `TAG`
tag records) and a severity. The ring keeps the newest
[`LogRing::capacity`] entries; readers snapshot under the lock and
filter by index, category and level, which is what backs the
`/api/logs` endpoint.

Entries carry a monotonically increasing index that survives
eviction, so a poller can resume from `after=<last index seen>`
without missing or double-counting anything that is still in the
ring.
*/
use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;

/// Default ring capacity.
pub const DEFAULT_CAPACITY: usize = 2000;

/// Entry category, a closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    /// Lifecycle: connect, disconnect, inventory start/stop.
    #[serde(rename = "SYS")]
    Sys,
    /// Command outcomes.
    #[serde(rename = "CMD")]
    Cmd,
    /// Raw frame hex.
    #[serde(rename = "PROTO")]
    Proto,
    /// Tag records.
    #[serde(rename = "TAG")]
    Tag,
}

impl Category {
    fn matches(self, filter: &str) -> bool {
        let name = match self {
            Category::Sys => "SYS",
            Category::Cmd => "CMD",
            Category::Proto => "PROTO",
            Category::Tag => "TAG",
        };
        filter.split(',').any(|f| f.trim().eq_ignore_ascii_case(name))
    }
}

/// Entry severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    Info,
    /// Something odd but survivable.
    Warn,
    /// Operation failed.
    Error,
}

impl Level {
    fn matches(self, filter: &str) -> bool {
        let name = match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        };
        filter.split(',').any(|f| f.trim().eq_ignore_ascii_case(name))
    }
}

/// One ring entry.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// Monotonic index, never reused.
    pub index: u64,
    /// Wall-clock timestamp, RFC 3339.
    pub ts: String,
    /// Category tag.
    pub cat: Category,
    /// Severity.
    pub level: Level,
    /// Message text.
    pub msg: String,
}

struct Inner {
    entries: VecDeque<LogEntry>,
    next_index: u64,
}

/// The ring itself. A single writer lock covers appends; reads
/// snapshot under the same lock and filter outside it.
pub struct LogRing {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LogRing {
    /// Ring with an explicit capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity.min(256)),
                next_index: 0,
            }),
        }
    }

    /// Maximum entries retained.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an entry, evicting the oldest when full. Returns the
    /// assigned index.
    pub fn push(&self, cat: Category, level: Level, msg: impl Into<String>) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let index = inner.next_index;
        inner.next_index += 1;
        if inner.entries.len() == self.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(LogEntry {
            index,
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            cat,
            level,
            msg: msg.into(),
        });
        index
    }

    /// Total entries ever appended (not just retained).
    #[must_use]
    pub fn total(&self) -> u64 {
        self.inner.lock().unwrap().next_index
    }

    /// Snapshot entries with `index > after`, optionally filtered by
    /// comma-separated category and level sets.
    #[must_use]
    pub fn read(
        &self,
        after: Option<u64>,
        cat: Option<&str>,
        level: Option<&str>,
    ) -> Vec<LogEntry> {
        let snapshot: Vec<LogEntry> = {
            let inner = self.inner.lock().unwrap();
            inner.entries.iter().cloned().collect()
        };
        snapshot
            .into_iter()
            .filter(|e| after.is_none_or(|a| e.index > a))
            .filter(|e| cat.is_none_or(|c| e.cat.matches(c)))
            .filter(|e| level.is_none_or(|l| e.level.matches(l)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_order_and_index() {
        let ring = LogRing::new(10);
        for i in 0..5 {
            ring.push(Category::Cmd, Level::Info, format!("op {i}"));
        }
        let all = ring.read(None, None, None);
        assert_eq!(all.len(), 5);
        for (i, e) in all.iter().enumerate() {
            assert_eq!(e.index, i as u64);
        }
    }

    #[test]
    fn eviction_keeps_newest() {
        let ring = LogRing::new(3);
        for i in 0..10u32 {
            ring.push(Category::Sys, Level::Info, format!("{i}"));
        }
        let all = ring.read(None, None, None);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].msg, "7");
        assert_eq!(all[0].index, 7);
        assert_eq!(ring.total(), 10);
    }

    #[test]
    fn after_filter_resumes() {
        let ring = LogRing::new(100);
        for i in 0..10u32 {
            ring.push(Category::Tag, Level::Info, format!("{i}"));
        }
        let tail = ring.read(Some(6), None, None);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].index, 7);
    }

    #[test]
    fn category_and_level_filters() {
        let ring = LogRing::new(100);
        ring.push(Category::Sys, Level::Info, "connected");
        ring.push(Category::Cmd, Level::Error, "timeout");
        ring.push(Category::Proto, Level::Debug, "aa0106...");
        ring.push(Category::Tag, Level::Info, "epc ...");

        assert_eq!(ring.read(None, Some("CMD"), None).len(), 1);
        assert_eq!(ring.read(None, Some("cmd,tag"), None).len(), 2);
        assert_eq!(ring.read(None, None, Some("error")).len(), 1);
        assert_eq!(ring.read(None, Some("SYS"), Some("info")).len(), 1);
        assert_eq!(ring.read(None, Some("SYS"), Some("error")).len(), 0);
    }
}
