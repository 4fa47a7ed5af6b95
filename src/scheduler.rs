/// Deterministic event queue.
///
/// Uses a `BinaryHeap` with reversed `Ord` on `Event` to act as a min-heap
/// keyed by `(time, priority, id)`. Event ids are strictly increasing, so two
/// runs that schedule the same events in the same order always dispatch them
/// in the same order.
///
/// Conditional events live in a separate set and never enter the heap until
/// their predicate holds.

use serde::{Deserialize, Serialize};
use std::collections::BinaryHeap;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::event::{Condition, ConditionalEvent, Event, EventId, EventIdGen};
use crate::time::SimTime;

/// The simulation's queue of pending events.
///
/// Owns the heap, the conditional set and the id generator. All scheduling
/// goes through this struct to keep ids monotonic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventQueue {
    /// Min-heap (via reversed Ord on Event).
    queue: BinaryHeap<Event>,

    /// Conditional events awaiting promotion. Predicates are closures and are
    /// not serialized.
    #[serde(skip)]
    conditionals: Vec<ConditionalEvent>,

    /// Monotonic event-ID generator.
    id_gen: EventIdGen,
}

impl EventQueue {
    /// Create a new, empty queue.
    pub fn new() -> Self {
        EventQueue::default()
    }

    /// Schedule an event at `time`, given the current simulation time `now`.
    ///
    /// Fails with `InvalidScheduleTime` if `time` is before `now` or is not
    /// finite. Returns the `EventId` assigned to the event.
    pub fn schedule(
        &mut self,
        now: SimTime,
        time: SimTime,
        module: impl Into<String>,
        event_type: impl Into<String>,
        priority: f64,
    ) -> EngineResult<EventId> {
        if !time.is_finite() || time < now {
            return Err(EngineError::InvalidScheduleTime {
                requested: time,
                current: now,
            });
        }
        let id = self.id_gen.next_id();
        let event = Event::new(id, time, module, event_type, priority);
        debug!(event = %event, "scheduled");
        self.queue.push(event);
        Ok(id)
    }

    /// Add a conditional event. It is promoted to a regular event at the
    /// current time once `condition` holds.
    pub fn schedule_conditional(
        &mut self,
        module: impl Into<String>,
        event_type: impl Into<String>,
        priority: f64,
        condition: Condition,
    ) -> EventId {
        self.schedule_conditional_within(module, event_type, priority, None, None, condition)
    }

    /// Like [`schedule_conditional`](Self::schedule_conditional), restricted
    /// to the window `[min_time, max_time]`.
    pub fn schedule_conditional_within(
        &mut self,
        module: impl Into<String>,
        event_type: impl Into<String>,
        priority: f64,
        min_time: Option<SimTime>,
        max_time: Option<SimTime>,
        condition: Condition,
    ) -> EventId {
        let id = self.id_gen.next_id();
        let cond = ConditionalEvent::new(id, module, event_type, priority, condition)
            .within(min_time, max_time);
        debug!(id = %id, module = %cond.module, event_type = %cond.event_type, "conditional scheduled");
        self.conditionals.push(cond);
        id
    }

    /// Pop the next event (earliest time, lowest priority, lowest id).
    ///
    /// Returns `None` when the queue is empty.
    pub fn pop_next(&mut self) -> Option<Event> {
        self.queue.pop()
    }

    /// Peek at the next event without removing it.
    pub fn peek_next(&self) -> Option<&Event> {
        self.queue.peek()
    }

    /// Returns `true` if no regular event is pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns the number of pending regular events.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns the number of conditional events awaiting promotion.
    pub fn conditional_len(&self) -> usize {
        self.conditionals.len()
    }

    /// Pending conditional events, in insertion order.
    pub fn conditionals(&self) -> &[ConditionalEvent] {
        &self.conditionals
    }

    /// Returns the next event ID that will be assigned.
    pub fn next_event_id(&self) -> EventId {
        self.id_gen.peek()
    }

    /// All pending regular events in dispatch order, without removing them.
    pub fn pending(&self) -> Vec<Event> {
        let mut events = self.queue.clone().into_vec();
        events.sort_by(|a, b| a.queue_order(b));
        events
    }

    /// Drain all events in deterministic order into a `Vec`.
    pub fn drain_ordered(&mut self) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.queue.len());
        while let Some(e) = self.queue.pop() {
            events.push(e);
        }
        events
    }

    /// Keep only the regular events for which `keep` returns `true`.
    pub fn retain(&mut self, keep: impl FnMut(&Event) -> bool) {
        self.queue.retain(keep);
    }

    /// Remove every regular and conditional event. The id generator keeps
    /// counting so ids stay unique.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.conditionals.clear();
    }

    pub(crate) fn take_conditionals(&mut self) -> Vec<ConditionalEvent> {
        std::mem::take(&mut self.conditionals)
    }

    pub(crate) fn restore_conditionals(&mut self, mut kept: Vec<ConditionalEvent>) {
        // Anything scheduled while the set was taken goes after the survivors.
        kept.append(&mut self.conditionals);
        self.conditionals = kept;
    }

    /// Convert a fired conditional into a regular event at `now`.
    pub(crate) fn promote(&mut self, now: SimTime, cond: ConditionalEvent) -> EventId {
        let id = self.id_gen.next_id();
        let event = Event::new(id, now, cond.module, cond.event_type, cond.priority);
        debug!(event = %event, conditional = %cond.id, "conditional promoted");
        self.queue.push(event);
        id
    }
}
