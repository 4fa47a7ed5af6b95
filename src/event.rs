/// Events for the simulation engine.
///
/// Every unit of work in tessera is an `Event`: a record naming the time at
/// which it runs, the module that owns it, and the event type that module
/// dispatches on. Events are immutable once scheduled and are ordered by
/// `(time, priority, id)`, where the `id` is the insertion sequence.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::state::SimState;
use crate::time::SimTime;

/// Conventional event priorities. Lower values run earlier at the same time.
pub mod priority {
    /// Initialization and loading.
    pub const FIRST: f64 = 1.0;
    /// The default for ordinary module events.
    pub const NORMAL: f64 = 5.0;
    /// Saving and other end-of-instant work.
    pub const LAST: f64 = 10.0;
}

// ── Event ID ──────────────────────────────────────────────────────────

/// A strictly-increasing event identifier.
///
/// The id is the insertion sequence, so it breaks ties between events
/// scheduled at the same time with the same priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(u64);

impl EventId {
    /// Wrap a raw u64 into an `EventId`.
    #[inline]
    pub fn new(raw: u64) -> Self {
        EventId(raw)
    }

    /// Return the raw value.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E#{}", self.0)
    }
}

// ── Event ID Generator ───────────────────────────────────────────────

/// Deterministic, strictly-increasing event-ID generator.
///
/// Regular and conditional events draw from the same generator, so ids are
/// unique across both sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventIdGen {
    next: u64,
}

impl EventIdGen {
    /// Create a generator starting at 0.
    pub fn new() -> Self {
        EventIdGen { next: 0 }
    }

    /// Create a generator starting at a specific value.
    pub fn starting_at(start: u64) -> Self {
        EventIdGen { next: start }
    }

    /// Mint the next event ID.
    pub fn next_id(&mut self) -> EventId {
        let id = EventId(self.next);
        self.next += 1;
        id
    }

    /// Peek at the next ID without consuming it.
    pub fn peek(&self) -> EventId {
        EventId(self.next)
    }
}

impl Default for EventIdGen {
    fn default() -> Self {
        Self::new()
    }
}

// ── Event ─────────────────────────────────────────────────────────────

/// A single scheduled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Insertion sequence (monotonically increasing).
    pub id: EventId,

    /// The simulation time at which this event is dispatched.
    pub time: SimTime,

    /// Name of the module that handles the event.
    pub module: String,

    /// Event type the module dispatches on (`"init"`, `"plot"`, ...).
    pub event_type: String,

    /// Same-instant ordering; lower runs first.
    pub priority: f64,
}

impl Event {
    /// Convenience constructor.
    pub fn new(
        id: EventId,
        time: SimTime,
        module: impl Into<String>,
        event_type: impl Into<String>,
        priority: f64,
    ) -> Self {
        Event {
            id,
            time,
            module: module.into(),
            event_type: event_type.into(),
            priority,
        }
    }

    /// Natural (non-reversed) ordering over `(time, priority, id)`.
    pub fn queue_order(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.priority.total_cmp(&other.priority))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl Eq for Event {}

/// Ordering: smallest `(time, priority, id)` first.
///
/// `BinaryHeap` is a max-heap, so the natural ordering is reversed here to
/// turn it into a min-heap.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other.queue_order(self)
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}:{} (p={})",
            self.id, self.time, self.module, self.event_type, self.priority
        )
    }
}

// ── Conditional Event ─────────────────────────────────────────────────

/// Predicate gating a conditional event.
pub type Condition = Arc<dyn Fn(&SimState) -> bool + Send + Sync>;

/// An event that waits for a predicate over the state to become true.
///
/// Conditional events are inert until promoted: after each completed event
/// the engine polls every pending condition and converts the ones that hold
/// into regular events at the current time. An optional window bounds the
/// polling: the predicate is not consulted before `min_time`, and the
/// conditional is discarded once the clock passes `max_time`.
#[derive(Clone)]
pub struct ConditionalEvent {
    pub id: EventId,
    pub module: String,
    pub event_type: String,
    pub priority: f64,
    pub min_time: Option<SimTime>,
    pub max_time: Option<SimTime>,
    condition: Condition,
}

impl ConditionalEvent {
    pub fn new(
        id: EventId,
        module: impl Into<String>,
        event_type: impl Into<String>,
        priority: f64,
        condition: Condition,
    ) -> Self {
        ConditionalEvent {
            id,
            module: module.into(),
            event_type: event_type.into(),
            priority,
            min_time: None,
            max_time: None,
            condition,
        }
    }

    /// Restrict polling to `[min_time, max_time]`.
    pub fn within(mut self, min_time: Option<SimTime>, max_time: Option<SimTime>) -> Self {
        self.min_time = min_time;
        self.max_time = max_time;
        self
    }

    /// Evaluate the predicate against `state`.
    pub fn evaluate(&self, state: &SimState) -> bool {
        (self.condition)(state)
    }

    /// `true` once `now` is past the window's upper bound.
    pub fn is_expired(&self, now: SimTime) -> bool {
        self.max_time.is_some_and(|max| now > max)
    }

    /// `true` while `now` is before the window's lower bound.
    pub fn is_pending(&self, now: SimTime) -> bool {
        self.min_time.is_some_and(|min| now < min)
    }
}

impl std::fmt::Debug for ConditionalEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionalEvent")
            .field("id", &self.id)
            .field("module", &self.module)
            .field("event_type", &self.event_type)
            .field("priority", &self.priority)
            .field("min_time", &self.min_time)
            .field("max_time", &self.max_time)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(id: u64, time: f64, priority: f64) -> Event {
        Event::new(EventId::new(id), SimTime::from_secs(time), "m", "tick", priority)
    }

    #[test]
    fn test_event_id_monotonic() {
        let mut gen = EventIdGen::new();
        let a = gen.next_id();
        let b = gen.next_id();
        let c = gen.next_id();
        assert_eq!(a.raw(), 0);
        assert_eq!(b.raw(), 1);
        assert_eq!(c.raw(), 2);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(gen.peek().raw(), 3);
    }

    #[test]
    fn test_event_ordering_by_time() {
        // e1 should come first (smaller time), so in reversed ordering e1 > e2.
        assert!(ev(0, 10.0, priority::LAST) > ev(1, 20.0, priority::FIRST));
    }

    #[test]
    fn test_event_ordering_by_priority() {
        assert!(ev(1, 10.0, priority::FIRST) > ev(0, 10.0, priority::NORMAL));
    }

    #[test]
    fn test_event_ordering_tiebreak_by_id() {
        assert!(ev(0, 10.0, 5.0) > ev(1, 10.0, 5.0));
        assert_eq!(
            ev(0, 10.0, 5.0).queue_order(&ev(1, 10.0, 5.0)),
            Ordering::Less
        );
    }

    #[test]
    fn test_event_display() {
        let e = Event::new(EventId::new(42), SimTime::from_secs(100.0), "fire", "burn", 5.0);
        assert_eq!(format!("{}", e.id), "E#42");
        assert_eq!(format!("{}", e), "E#42 T=100s fire:burn (p=5)");
    }

    #[test]
    fn test_conditional_window() {
        let cond = ConditionalEvent::new(EventId::new(0), "m", "go", 5.0, Arc::new(|_| true))
            .within(Some(SimTime::from_secs(5.0)), Some(SimTime::from_secs(10.0)));
        assert!(cond.is_pending(SimTime::from_secs(4.0)));
        assert!(!cond.is_pending(SimTime::from_secs(5.0)));
        assert!(!cond.is_expired(SimTime::from_secs(10.0)));
        assert!(cond.is_expired(SimTime::from_secs(10.5)));
        assert!(format!("{:?}", cond).contains("\"go\""));
    }
}
