// SPDX-License-Identifier: GPL-2.0
//
// Timed event queue: a strictly ordered schedule of future callbacks keyed by
// deadline. Owners re-arm a logical slot with the drop-then-reinsert pattern;
// the queue itself never mutates an event in place.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;

/// Logical slot an event belongs to. `drop_event` cancels by this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedEventType {
    PresentTimeout,
    StatisticsUpdate,
}

pub type EventAction = Box<dyn FnMut() + Send>;

/// A self-contained scheduled callback. Re-arming always constructs a fresh
/// event; an event handed out by `pop_due` is no longer known to the queue.
pub struct TimedEvent {
    pub event_type: TimedEventType,
    pub when_ns: i64,
    pub action: EventAction,
}

impl TimedEvent {
    pub fn new(event_type: TimedEventType, when_ns: i64, action: EventAction) -> Self {
        Self {
            event_type,
            when_ns,
            action,
        }
    }
}

impl std::fmt::Debug for TimedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimedEvent")
            .field("event_type", &self.event_type)
            .field("when_ns", &self.when_ns)
            .finish_non_exhaustive()
    }
}

struct QueuedEvent {
    seq: u64,
    event: TimedEvent,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.event.when_ns == other.event.when_ns && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the earliest deadline is on
        // top, with the insertion sequence as a stable tie break.
        other
            .event
            .when_ns
            .cmp(&self.event.when_ns)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueInner {
    heap: BinaryHeap<QueuedEvent>,
    next_seq: u64,
}

/// Pending-deadline schedule shared between the threads that arm events and
/// the scheduler loop that drains them. All state sits behind one lock;
/// callbacks are never run while it is held.
#[derive(Default)]
pub struct EventQueue {
    inner: Mutex<QueueInner>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `event` keyed by its deadline. Duplicate types are allowed;
    /// the owner drops stale instances before inserting a fresh one.
    pub fn schedule(&self, event: TimedEvent) {
        let mut inner = self.inner.lock().unwrap();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(QueuedEvent { seq, event });
    }

    /// Removes all pending events matching `event_type`. Idempotent. Events
    /// already removed for execution are unaffected.
    pub fn drop_event(&self, event_type: TimedEventType) {
        let mut inner = self.inner.lock().unwrap();
        inner.heap.retain(|e| e.event.event_type != event_type);
    }

    /// Removes and returns every event due at `now_ns`, in ascending deadline
    /// order (insertion order within equal deadlines). Each call drains only
    /// what is currently due.
    pub fn pop_due(&self, now_ns: i64) -> Vec<TimedEvent> {
        let mut inner = self.inner.lock().unwrap();
        let mut due = Vec::new();
        while let Some(head) = inner.heap.peek() {
            if head.event.when_ns > now_ns {
                break;
            }
            due.push(inner.heap.pop().unwrap().event);
        }
        due
    }

    /// Earliest pending deadline, if any. The scheduler loop sleeps toward
    /// this.
    pub fn next_deadline_ns(&self) -> Option<i64> {
        let inner = self.inner.lock().unwrap();
        inner.heap.peek().map(|e| e.event.when_ns)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of pending events with the given type.
    pub fn pending(&self, event_type: TimedEventType) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .heap
            .iter()
            .filter(|e| e.event.event_type == event_type)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
    use std::sync::Arc;

    fn noop_event(event_type: TimedEventType, when_ns: i64) -> TimedEvent {
        TimedEvent::new(event_type, when_ns, Box::new(|| {}))
    }

    #[test]
    fn pop_due_orders_by_deadline() {
        let queue = EventQueue::new();
        queue.schedule(noop_event(TimedEventType::PresentTimeout, 300));
        queue.schedule(noop_event(TimedEventType::StatisticsUpdate, 100));
        queue.schedule(noop_event(TimedEventType::PresentTimeout, 200));

        let due = queue.pop_due(250);
        let deadlines: Vec<i64> = due.iter().map(|e| e.when_ns).collect();
        assert_eq!(deadlines, vec![100, 200]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn equal_deadlines_pop_in_insertion_order() {
        let queue = EventQueue::new();
        let order = Arc::new(AtomicU64::new(0));
        for tag in 1..=3u64 {
            let order = order.clone();
            queue.schedule(TimedEvent::new(
                TimedEventType::StatisticsUpdate,
                500,
                Box::new(move || {
                    // Records tag as the next base-10 digit.
                    order.fetch_update(AtomicOrdering::Relaxed, AtomicOrdering::Relaxed, |v| {
                        Some(v * 10 + tag)
                    })
                    .unwrap();
                }),
            ));
        }

        for mut event in queue.pop_due(500) {
            (event.action)();
        }
        assert_eq!(order.load(AtomicOrdering::Relaxed), 123);
    }

    #[test]
    fn drop_event_removes_only_matching_type() {
        let queue = EventQueue::new();
        queue.schedule(noop_event(TimedEventType::PresentTimeout, 100));
        queue.schedule(noop_event(TimedEventType::PresentTimeout, 200));
        queue.schedule(noop_event(TimedEventType::StatisticsUpdate, 150));

        queue.drop_event(TimedEventType::PresentTimeout);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending(TimedEventType::PresentTimeout), 0);
        assert_eq!(queue.pending(TimedEventType::StatisticsUpdate), 1);
    }

    #[test]
    fn drop_event_is_idempotent() {
        let queue = EventQueue::new();
        queue.drop_event(TimedEventType::PresentTimeout);
        assert!(queue.is_empty());
        queue.drop_event(TimedEventType::PresentTimeout);
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_due_drains_only_current_set() {
        let queue = EventQueue::new();
        queue.schedule(noop_event(TimedEventType::PresentTimeout, 100));
        queue.schedule(noop_event(TimedEventType::PresentTimeout, 400));

        assert_eq!(queue.pop_due(100).len(), 1);
        assert_eq!(queue.pop_due(100).len(), 0);
        assert_eq!(queue.next_deadline_ns(), Some(400));
    }

    #[test]
    fn dropped_events_do_not_reappear() {
        let queue = EventQueue::new();
        queue.schedule(noop_event(TimedEventType::PresentTimeout, 100));
        let popped = queue.pop_due(100);
        assert_eq!(popped.len(), 1);
        // Dropping after the pop affects only the (now empty) pending set.
        queue.drop_event(TimedEventType::PresentTimeout);
        assert!(queue.is_empty());
    }
}
