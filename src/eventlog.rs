/// Completed-event log.
///
/// Records every dispatched event into a bounded, ordered log that travels
/// with the state container. The log carries a deterministic hash for replay
/// verification and a line-oriented export/import format.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

use crate::event::Event;

/// Default number of completed events kept in the log.
pub const DEFAULT_COMPLETED_CAPACITY: usize = 10_000;

const LOG_HEADER: &str = "# TESSERA COMPLETED LOG v1";

// ── Hash utility ──────────────────────────────────────────────────────

/// Combine two u64 hashes deterministically.
pub fn hash_combine(a: u64, b: u64) -> u64 {
    let mut h = a;
    h = h.wrapping_mul(0x517cc1b727220a95);
    h = h.wrapping_add(b);
    h ^= h >> 32;
    h
}

/// Hash a byte slice deterministically (FNV-1a).
pub fn hash_bytes(data: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for &b in data {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

// ── Completed event ───────────────────────────────────────────────────

/// A dispatched event together with how it was executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedEvent {
    pub event: Event,
    /// Wall-clock time spent in the handler, in microseconds. Not part of
    /// the log hash.
    pub elapsed_micros: u64,
    /// `true` when the event's effects were replayed from the cache.
    pub from_cache: bool,
}

// ── Completed log ─────────────────────────────────────────────────────

/// Bounded, ordered log of completed events. The oldest entries are dropped
/// once `capacity` is reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedLog {
    entries: VecDeque<CompletedEvent>,
    capacity: usize,
    total: u64,
}

impl CompletedLog {
    /// Create an empty log keeping at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        CompletedLog {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            total: 0,
        }
    }

    /// Record a completed event.
    pub fn record(&mut self, completed: CompletedEvent) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(completed);
        self.total += 1;
    }

    /// Retained entries, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &CompletedEvent> {
        self.entries.iter()
    }

    /// The most recently completed event.
    pub fn last(&self) -> Option<&CompletedEvent> {
        self.entries.back()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of events ever recorded, including evicted ones.
    pub fn total_recorded(&self) -> u64 {
        self.total
    }

    /// Whether an event with this id is among the retained entries.
    pub fn contains(&self, id: crate::event::EventId) -> bool {
        self.entries.iter().any(|c| c.event.id == id)
    }

    /// Compute a deterministic hash of the retained entries.
    pub fn log_hash(&self) -> u64 {
        let mut h: u64 = 0;
        for c in &self.entries {
            let e = &c.event;
            h = hash_combine(h, e.id.raw());
            h = hash_combine(h, e.time.as_secs().to_bits());
            h = hash_combine(h, e.priority.to_bits());
            h = hash_combine(h, hash_bytes(e.module.as_bytes()));
            h = hash_combine(h, hash_bytes(e.event_type.as_bytes()));
        }
        h
    }

    // ── Export / Import ───────────────────────────────────────────

    /// Export the log as a header line followed by one JSON object per entry.
    pub fn export<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "{}", LOG_HEADER)?;
        writeln!(w, "# entries: {}", self.entries.len())?;
        for c in &self.entries {
            serde_json::to_writer(&mut *w, c)?;
            writeln!(w)?;
        }
        Ok(())
    }

    /// Import a log written by [`export`](Self::export).
    pub fn import<R: BufRead>(r: R, capacity: usize) -> io::Result<Self> {
        let mut log = CompletedLog::new(capacity);
        for line in r.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entry: CompletedEvent = serde_json::from_str(line)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            log.record(entry);
        }
        Ok(log)
    }
}

impl Default for CompletedLog {
    fn default() -> Self {
        Self::new(DEFAULT_COMPLETED_CAPACITY)
    }
}

/// Compare two logs entry by entry, ignoring wall-clock timings.
pub fn logs_match(a: &CompletedLog, b: &CompletedLog) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b.iter())
            .all(|(x, y)| x.event == y.event && x.from_cache == y.from_cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventId;
    use crate::time::SimTime;

    fn completed(id: u64, time: f64, module: &str) -> CompletedEvent {
        CompletedEvent {
            event: Event::new(EventId::new(id), SimTime::from_secs(time), module, "tick", 5.0),
            elapsed_micros: id * 3,
            from_cache: false,
        }
    }

    #[test]
    fn test_hash_determinism() {
        assert_eq!(hash_bytes(b"hello"), hash_bytes(b"hello"));
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"world"));
        assert_eq!(hash_combine(1, 2), hash_combine(1, 2));
        assert_ne!(hash_combine(1, 2), hash_combine(2, 1));
    }

    #[test]
    fn test_bounded_capacity() {
        let mut log = CompletedLog::new(3);
        for i in 0..5 {
            log.record(completed(i, i as f64, "m"));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.total_recorded(), 5);
        let ids: Vec<u64> = log.iter().map(|c| c.event.id.raw()).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        assert!(!log.contains(EventId::new(0)));
        assert_eq!(log.last().map(|c| c.event.id.raw()), Some(4));
    }

    #[test]
    fn test_log_hash_ignores_elapsed() {
        let mut a = CompletedLog::new(10);
        let mut b = CompletedLog::new(10);
        a.record(completed(0, 1.0, "gen"));
        let mut slow = completed(0, 1.0, "gen");
        slow.elapsed_micros = 999_999;
        b.record(slow);
        assert_eq!(a.log_hash(), b.log_hash());
        assert!(logs_match(&a, &b));
    }

    #[test]
    fn test_log_hash_sensitive_to_module() {
        let mut a = CompletedLog::new(10);
        let mut b = CompletedLog::new(10);
        a.record(completed(0, 1.0, "gen"));
        b.record(completed(0, 1.0, "use"));
        assert_ne!(a.log_hash(), b.log_hash());
    }

    #[test]
    fn test_export_import() {
        let mut log = CompletedLog::new(10);
        log.record(completed(0, 0.0, "gen"));
        log.record(completed(1, 2.5, "use"));

        let mut buf = Vec::new();
        log.export(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with(LOG_HEADER));

        let back = CompletedLog::import(io::Cursor::new(buf), 10).unwrap();
        assert!(logs_match(&log, &back));
        assert_eq!(back.log_hash(), log.log_hash());
    }

    #[test]
    fn test_import_rejects_garbage() {
        let input = format!("{}\nnot json\n", LOG_HEADER);
        assert!(CompletedLog::import(io::Cursor::new(input), 10).is_err());
    }
}
