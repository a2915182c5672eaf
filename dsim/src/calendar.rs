use std::any::Any;
use std::cell::Cell;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::{ElementId, Priority};

/// Payload attached to an event, delivered to the target element's handler.
///
/// Payloads are reference-counted so that a handler can retain one beyond the
/// lifetime of the event that carried it.
pub type Message = Rc<dyn Any>;

/// What the executive does when an event reaches the head of the calendar.
pub(crate) enum EventKind {
    /// Deliver a message to the target element's event handler.
    Element {
        /// The element whose handler runs.
        target: ElementId,
        /// Optional payload passed to the handler.
        message: Option<Message>,
    },
    /// Fire the warm-up notification across the whole model tree.
    WarmUp,
    /// Fire a single element's timed update.
    TimedUpdate {
        /// The element that registered the interval.
        target: ElementId,
    },
    /// End the current replication.
    EndReplication,
}

impl fmt::Debug for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Element { target, message } => f
                .debug_struct("Element")
                .field("target", target)
                .field("has_message", &message.is_some())
                .finish(),
            EventKind::WarmUp => f.write_str("WarmUp"),
            EventKind::TimedUpdate { target } => {
                f.debug_struct("TimedUpdate").field("target", target).finish()
            }
            EventKind::EndReplication => f.write_str("EndReplication"),
        }
    }
}

/// A pending event stored in the calendar.
///
/// Entries are ordered by the (time, priority, sequence) triple. The sequence
/// number is assigned by the executive at insertion and is globally unique,
/// so no two entries ever compare equal and ties at equal time and priority
/// resolve in FIFO order.
#[derive(Debug)]
pub(crate) struct EventEntry {
    time: Duration,
    priority: Priority,
    sequence: u64,
    kind: EventKind,
    canceled: Rc<Cell<bool>>,
}

impl EventEntry {
    pub(crate) fn new(time: Duration, priority: Priority, sequence: u64, kind: EventKind) -> Self {
        Self {
            time,
            priority,
            sequence,
            kind,
            canceled: Rc::new(Cell::new(false)),
        }
    }

    pub(crate) fn time(&self) -> Duration {
        self.time
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.get()
    }

    pub(crate) fn into_kind(self) -> EventKind {
        self.kind
    }

    pub(crate) fn handle(&self) -> EventHandle {
        EventHandle {
            time: self.time,
            priority: self.priority,
            sequence: self.sequence,
            canceled: Rc::clone(&self.canceled),
        }
    }

    fn key(&self) -> (Duration, Priority, u64) {
        (self.time, self.priority, self.sequence)
    }
}

impl PartialEq for EventEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for EventEntry {}

impl PartialOrd for EventEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// A handle to a scheduled event, returned by the scheduling calls.
///
/// The handle does not keep the event alive; it shares only the cancellation
/// flag. Canceling is O(1) and lazy: the entry stays in the calendar and the
/// executive skips it when it reaches the head. Canceling an event that has
/// already executed has no effect.
#[derive(Debug, Clone)]
pub struct EventHandle {
    time: Duration,
    priority: Priority,
    sequence: u64,
    canceled: Rc<Cell<bool>>,
}

impl EventHandle {
    /// The absolute simulation time the event is scheduled for.
    #[must_use]
    pub fn time(&self) -> Duration {
        self.time
    }

    /// The priority the event was scheduled with.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// The globally unique insertion sequence number.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Marks the event as canceled.
    pub fn cancel(&self) {
        self.canceled.set(true);
    }

    /// Whether the event has been canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.get()
    }
}

/// The future event list: an ordered collection of pending events.
///
/// Backed by a binary heap, so insertion and removal are both O(log n) and
/// peeking at the minimum is O(1). Owned exclusively by the executive.
#[derive(Debug, Default)]
pub(crate) struct EventCalendar {
    events: BinaryHeap<Reverse<EventEntry>>,
}

impl EventCalendar {
    pub(crate) fn insert(&mut self, entry: EventEntry) {
        self.events.push(Reverse(entry));
    }

    pub(crate) fn peek_min(&self) -> Option<&EventEntry> {
        self.events.peek().map(|Reverse(entry)| entry)
    }

    pub(crate) fn remove_min(&mut self) -> Option<EventEntry> {
        self.events.pop().map(|Reverse(entry)| entry)
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn entry(secs: u64, priority: i32, sequence: u64) -> EventEntry {
        EventEntry::new(
            Duration::from_secs(secs),
            Priority::from(priority),
            sequence,
            EventKind::WarmUp,
        )
    }

    #[test]
    fn test_orders_by_time_then_priority_then_sequence() {
        let mut calendar = EventCalendar::default();
        calendar.insert(entry(5, 10, 0));
        calendar.insert(entry(5, 5, 1));
        calendar.insert(entry(3, 0, 2));

        let first = calendar.remove_min().unwrap();
        assert_eq!(first.time(), Duration::from_secs(3));
        let second = calendar.remove_min().unwrap();
        assert_eq!(second.time(), Duration::from_secs(5));
        assert_eq!(second.priority, Priority::from(5));
        let third = calendar.remove_min().unwrap();
        assert_eq!(third.time(), Duration::from_secs(5));
        assert_eq!(third.priority, Priority::from(10));
        assert!(calendar.remove_min().is_none());
    }

    #[test]
    fn test_equal_time_and_priority_drain_fifo() {
        let mut calendar = EventCalendar::default();
        for sequence in 0..10 {
            calendar.insert(entry(1, 10, sequence));
        }
        let drained: Vec<_> = std::iter::from_fn(|| calendar.remove_min())
            .map(|e| e.sequence)
            .collect();
        assert_eq!(drained, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_peek_does_not_remove() {
        let mut calendar = EventCalendar::default();
        calendar.insert(entry(1, 10, 0));
        assert_eq!(calendar.peek_min().unwrap().sequence, 0);
        assert_eq!(calendar.len(), 1);
    }

    #[test]
    fn test_cancel_flag_is_shared_with_handle() {
        let entry = entry(1, 10, 0);
        let handle = entry.handle();
        assert!(!entry.is_canceled());
        handle.cancel();
        assert!(entry.is_canceled());
        assert!(handle.is_canceled());
    }

    #[quickcheck]
    fn prop_drains_in_nondecreasing_key_order(inserts: Vec<(u8, i8)>) -> bool {
        let mut calendar = EventCalendar::default();
        for (sequence, (secs, priority)) in inserts.into_iter().enumerate() {
            calendar.insert(entry(
                u64::from(secs),
                i32::from(priority),
                sequence as u64,
            ));
        }
        let mut previous: Option<(Duration, Priority, u64)> = None;
        while let Some(event) = calendar.remove_min() {
            let key = event.key();
            if let Some(prev) = previous {
                if key <= prev {
                    return false;
                }
            }
            previous = Some(key);
        }
        true
    }
}
