use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::calendar::{EventCalendar, EventEntry, EventKind, Message};
use crate::error::{Error, Result};
use crate::{ElementId, EventHandle, Priority};

/// Simulation clock.
pub type Clock = Rc<Cell<Duration>>;

/// Read-only handle to the simulation clock.
///
/// Collaborators that only need to know the current time hold one of these
/// instead of borrowing the executive.
#[derive(Debug, Clone)]
pub struct ClockRef {
    clock: Clock,
}

impl From<Clock> for ClockRef {
    fn from(clock: Clock) -> Self {
        Self { clock }
    }
}

impl ClockRef {
    /// Returns the current simulation time.
    #[must_use]
    pub fn time(&self) -> Duration {
        self.clock.get()
    }
}

/// Lifecycle state of the executive.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExecutiveState {
    /// Constructed or re-initialized; no event has run yet.
    Created,
    /// Inside the event loop.
    Running,
    /// The loop was interrupted with the calendar intact; it can resume.
    Paused,
    /// The run finished; the calendar is spent or discarded.
    Ended,
}

impl ExecutiveState {
    /// The state's name, used in error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ExecutiveState::Created => "created",
            ExecutiveState::Running => "running",
            ExecutiveState::Paused => "paused",
            ExecutiveState::Ended => "ended",
        }
    }
}

impl fmt::Display for ExecutiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Converts a floating-point number of seconds into a delay.
///
/// This is the boundary where sampled (possibly negative) values meet the
/// calendar: a negative or non-finite value is a programmer error and is
/// rejected here, never silently clamped.
///
/// # Errors
///
/// Returns [`Error::InvalidDelay`] if `secs` is negative, NaN, or infinite.
pub fn delay_from_secs(secs: f64) -> Result<Duration> {
    if secs.is_finite() && secs >= 0.0 {
        Ok(Duration::from_secs_f64(secs))
    } else {
        Err(Error::InvalidDelay(secs))
    }
}

/// Owns the event calendar and the simulation clock, and drives time forward
/// by removing the earliest event and handing it to the dispatcher.
///
/// The executive is exclusively owned by one experiment run at a time;
/// concurrent replications must use separate instances. All callbacks run to
/// completion on the calling thread — an action that wants to wait does so
/// only by scheduling a future event.
#[derive(Debug)]
pub struct Executive {
    state: ExecutiveState,
    clock: Clock,
    calendar: EventCalendar,
    next_sequence: u64,
    stop_request: Option<String>,
    pause_request: bool,
    stop_reason: Option<String>,
}

impl Default for Executive {
    fn default() -> Self {
        Self {
            state: ExecutiveState::Created,
            clock: Rc::new(Cell::new(Duration::default())),
            calendar: EventCalendar::default(),
            next_sequence: 0,
            stop_request: None,
            pause_request: false,
            stop_reason: None,
        }
    }
}

impl Executive {
    /// Returns the current simulation time.
    #[must_use]
    pub fn time(&self) -> Duration {
        self.clock.get()
    }

    /// Returns a read-only handle to the simulation clock.
    #[must_use]
    pub fn clock(&self) -> ClockRef {
        ClockRef {
            clock: Rc::clone(&self.clock),
        }
    }

    /// Returns the executive's lifecycle state.
    #[must_use]
    pub fn state(&self) -> ExecutiveState {
        self.state
    }

    /// The reason the last run ended, if it has ended.
    #[must_use]
    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    /// Number of events pending in the calendar, canceled ones included.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.calendar.len()
    }

    /// The time of the earliest pending event, if any; canceled entries
    /// still count until they are dequeued.
    #[must_use]
    pub fn next_event_time(&self) -> Option<Duration> {
        self.calendar.peek_min().map(EventEntry::time)
    }

    /// Resets the clock to zero and clears the calendar.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error while the event loop is running.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state == ExecutiveState::Running {
            return Err(self.illegal("initialize"));
        }
        self.clock.set(Duration::default());
        self.calendar.clear();
        self.next_sequence = 0;
        self.stop_request = None;
        self.pause_request = false;
        self.stop_reason = None;
        self.state = ExecutiveState::Created;
        Ok(())
    }

    /// Schedules an event `delay` after the current time, targeting
    /// `target`'s event handler with an optional message payload.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error if the executive has ended.
    pub fn schedule(
        &mut self,
        delay: Duration,
        priority: Priority,
        target: ElementId,
        message: Option<Message>,
    ) -> Result<EventHandle> {
        let time = self.time() + delay;
        self.schedule_kind(time, priority, EventKind::Element { target, message })
    }

    /// Schedules an event at an absolute simulation time.
    ///
    /// # Errors
    ///
    /// Returns a temporal invariant violation if `time` is earlier than the
    /// current clock, and an illegal-state error if the executive has ended.
    pub fn schedule_at(
        &mut self,
        time: Duration,
        priority: Priority,
        target: ElementId,
        message: Option<Message>,
    ) -> Result<EventHandle> {
        if time < self.time() {
            return Err(Error::TimeRegression {
                scheduled: time,
                clock: self.time(),
            });
        }
        self.schedule_kind(time, priority, EventKind::Element { target, message })
    }

    pub(crate) fn schedule_kind(
        &mut self,
        time: Duration,
        priority: Priority,
        kind: EventKind,
    ) -> Result<EventHandle> {
        if self.state == ExecutiveState::Ended {
            return Err(self.illegal("schedule an event"));
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let entry = EventEntry::new(time, priority, sequence, kind);
        let handle = entry.handle();
        log::trace!("[{:?}] scheduling {:?} at {:?}", self.time(), entry, time);
        self.calendar.insert(entry);
        Ok(handle)
    }

    /// Cancels a previously scheduled event.
    ///
    /// Lazy: the event stays in the calendar and is skipped at dequeue time.
    /// Has no effect on an event that has already executed.
    pub fn cancel(&self, handle: &EventHandle) {
        handle.cancel();
    }

    /// Requests early termination: the current action finishes, then the
    /// rest of the calendar is discarded and the state becomes `Ended`.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error unless the event loop is running.
    pub fn stop(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.state != ExecutiveState::Running {
            return Err(self.illegal("stop"));
        }
        self.stop_request = Some(reason.into());
        Ok(())
    }

    /// Requests a pause: the loop exits after the current action with the
    /// calendar intact, and a later run resumes where it left off.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error unless the event loop is running.
    pub fn pause(&mut self) -> Result<()> {
        if self.state != ExecutiveState::Running {
            return Err(self.illegal("pause"));
        }
        self.pause_request = true;
        Ok(())
    }

    pub(crate) fn begin_run(&mut self) -> Result<()> {
        match self.state {
            ExecutiveState::Created | ExecutiveState::Paused => {
                self.state = ExecutiveState::Running;
                Ok(())
            }
            ExecutiveState::Running | ExecutiveState::Ended => Err(self.illegal("run")),
        }
    }

    pub(crate) fn take_stop_request(&mut self) -> Option<String> {
        self.stop_request.take()
    }

    pub(crate) fn take_pause_request(&mut self) -> bool {
        std::mem::take(&mut self.pause_request)
    }

    pub(crate) fn end(&mut self, reason: impl Into<String>) {
        self.calendar.clear();
        self.stop_reason = Some(reason.into());
        self.state = ExecutiveState::Ended;
    }

    pub(crate) fn set_paused(&mut self) {
        self.state = ExecutiveState::Paused;
    }

    /// Removes the earliest non-canceled event and advances the clock to its
    /// time. Canceled events are dropped silently on their way out.
    pub(crate) fn next_entry(&mut self) -> Result<Option<EventEntry>> {
        while let Some(entry) = self.calendar.remove_min() {
            if entry.is_canceled() {
                log::trace!("[{:?}] skipping canceled {:?}", self.time(), entry);
                continue;
            }
            if entry.time() < self.time() {
                return Err(Error::TimeRegression {
                    scheduled: entry.time(),
                    clock: self.time(),
                });
            }
            self.clock.set(entry.time());
            return Ok(Some(entry));
        }
        Ok(None)
    }

    fn illegal(&self, operation: &'static str) -> Error {
        Error::IllegalState {
            operation,
            state: self.state.name(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;

    fn element() -> ElementId {
        ElementId::from(0)
    }

    #[test]
    fn test_clock_advances_to_event_times_monotonically() {
        let mut executive = Executive::default();
        executive
            .schedule(Duration::from_secs(5), Priority::DEFAULT, element(), None)
            .unwrap();
        executive
            .schedule(Duration::from_secs(2), Priority::DEFAULT, element(), None)
            .unwrap();
        let mut last = executive.time();
        while let Some(entry) = executive.next_entry().unwrap() {
            assert!(entry.time() >= last);
            assert_eq!(executive.time(), entry.time());
            last = entry.time();
        }
        assert_eq!(executive.time(), Duration::from_secs(5));
    }

    #[test]
    fn test_canceled_events_are_never_returned() {
        let mut executive = Executive::default();
        let handle = executive
            .schedule(Duration::from_secs(1), Priority::DEFAULT, element(), None)
            .unwrap();
        executive
            .schedule(Duration::from_secs(2), Priority::DEFAULT, element(), None)
            .unwrap();
        executive.cancel(&handle);
        let entry = executive.next_entry().unwrap().unwrap();
        assert_eq!(entry.time(), Duration::from_secs(2));
        assert!(executive.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_schedule_at_rejects_times_before_the_clock() {
        let mut executive = Executive::default();
        executive
            .schedule(Duration::from_secs(3), Priority::DEFAULT, element(), None)
            .unwrap();
        let _ = executive.next_entry().unwrap();
        let result = executive.schedule_at(
            Duration::from_secs(1),
            Priority::DEFAULT,
            element(),
            None,
        );
        assert!(matches!(result, Err(Error::TimeRegression { .. })));
    }

    #[test]
    fn test_delay_from_secs_rejects_negative_values() {
        assert!(matches!(
            delay_from_secs(-0.5),
            Err(Error::InvalidDelay(_))
        ));
        assert!(matches!(
            delay_from_secs(f64::NAN),
            Err(Error::InvalidDelay(_))
        ));
        assert_eq!(delay_from_secs(1.5).unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn test_stop_outside_run_is_an_illegal_state() {
        let mut executive = Executive::default();
        assert!(matches!(
            executive.stop("too early"),
            Err(Error::IllegalState { .. })
        ));
    }

    #[test]
    fn test_initialize_resets_clock_and_calendar() {
        let mut executive = Executive::default();
        executive
            .schedule(Duration::from_secs(3), Priority::DEFAULT, element(), None)
            .unwrap();
        let _ = executive.next_entry().unwrap();
        executive.initialize().unwrap();
        assert_eq!(executive.time(), Duration::default());
        assert_eq!(executive.pending_events(), 0);
    }

    #[test]
    fn test_run_after_end_is_an_illegal_state() {
        let mut executive = Executive::default();
        executive.begin_run().unwrap();
        executive.end("drained");
        assert!(matches!(
            executive.begin_run(),
            Err(Error::IllegalState { .. })
        ));
        assert_eq!(executive.stop_reason(), Some("drained"));
    }
}
