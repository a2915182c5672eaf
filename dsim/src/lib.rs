#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::default_trait_access)]

//! Discrete-event simulation core: a priority-ordered event calendar, an
//! executive that drives the simulation clock, a hierarchical model-element
//! tree with lifecycle notifications, reproducible random-number streams,
//! and a replication controller tying them together.
//!
//! The crate is single-threaded by design: one simulation clock advances on
//! one thread, callbacks run to completion, and no locking exists anywhere.

use derive_more::{Display, From, Into};

mod calendar;
mod element;
mod error;
mod executive;
mod experiment;
mod factory;
mod stream;

pub use calendar::{EventHandle, Message};
pub use element::{Context, Element, ElementObserver, Model, ObserverHandle, SharedObserver};
pub use error::{Error, Result};
pub use executive::{delay_from_secs, Clock, ClockRef, Executive, ExecutiveState};
pub use experiment::{Experiment, StreamResetPolicy};
pub use factory::{StreamBank, StreamFactory};
pub use stream::{RandomStream, DEFAULT_SEED};

use calendar::EventKind;
use element::Hook;

/// Model element ID.
#[derive(
    From, Into, Debug, PartialEq, PartialOrd, Eq, Ord, Copy, Clone, Hash, Display,
)]
pub struct ElementId(usize);

/// Random stream ID.
#[derive(
    From, Into, Debug, PartialEq, PartialOrd, Eq, Ord, Copy, Clone, Hash, Display,
)]
pub struct StreamId(usize);

/// Event priority; lower values fire earlier among events scheduled for the
/// same time.
///
/// Same-instant ordering between events is controlled only by priorities
/// (and, for equal priorities, insertion order); the framework infers no
/// dependencies. The `earlier`/`later` helpers derive priorities relative to
/// a baseline for callers that need an event to precede or follow another
/// one at the same instant.
#[derive(
    From, Into, Debug, PartialEq, PartialOrd, Eq, Ord, Copy, Clone, Hash, Display,
)]
pub struct Priority(i32);

impl Priority {
    /// Priority given to ordinary model events.
    pub const DEFAULT: Priority = Priority(10);
    /// The warm-up notification precedes same-time model events.
    pub const WARM_UP: Priority = Priority(5);
    /// Timed updates run between the warm-up and ordinary model events.
    pub const TIMED_UPDATE: Priority = Priority(8);
    /// The end-of-replication event follows all same-time model events.
    pub const END_REPLICATION: Priority = Priority(100_000);

    /// A priority firing `steps` earlier than this one at the same instant.
    #[must_use]
    pub fn earlier(self, steps: i32) -> Self {
        Priority(self.0 - steps)
    }

    /// A priority firing `steps` later than this one at the same instant.
    #[must_use]
    pub fn later(self, steps: i32) -> Self {
        Priority(self.0 + steps)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

/// The main simulation object: the executive, the model-element tree, and
/// the stream bank.
///
/// Build the tree through [`Model`], then either drive events manually with
/// [`step`](Self::step)/[`run`](Self::run) or hand the whole simulation to an
/// [`Experiment`] for replicated runs.
#[derive(Default)]
pub struct Simulation {
    /// Owns the event calendar and the simulation clock.
    pub executive: Executive,
    /// The model-element tree.
    pub model: Model,
    /// Random streams addressed by [`StreamId`].
    pub streams: StreamBank,
}

impl Simulation {
    /// Creates a simulation whose stream lineage starts at `seed`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the seed is invalid.
    pub fn with_seed(seed: [u64; 6]) -> Result<Self> {
        Ok(Self {
            executive: Executive::default(),
            model: Model::default(),
            streams: StreamBank::with_seed(seed)?,
        })
    }

    /// Executes the earliest pending event. Returns `false` when the
    /// calendar is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates temporal invariant violations and dispatch failures.
    pub fn step(&mut self) -> Result<bool> {
        let entry = match self.executive.next_entry()? {
            Some(entry) => entry,
            None => return Ok(false),
        };
        log::trace!("[{:?}] executing {:?}", self.executive.time(), entry);
        match entry.into_kind() {
            EventKind::Element { target, message } => {
                self.model.dispatch(
                    target,
                    &mut self.executive,
                    &mut self.streams,
                    message.as_ref(),
                )?;
            }
            EventKind::WarmUp => {
                log::debug!("[{:?}] warm-up period ended", self.executive.time());
                self.model
                    .notify(Hook::WarmUp, &mut self.executive, &mut self.streams);
            }
            EventKind::TimedUpdate { target } => {
                self.model.fire_hook(
                    Hook::TimedUpdate,
                    target,
                    &mut self.executive,
                    &mut self.streams,
                );
                if let Some(interval) = self.model.timed_interval(target) {
                    let time = self.executive.time() + interval;
                    self.executive.schedule_kind(
                        time,
                        Priority::TIMED_UPDATE,
                        EventKind::TimedUpdate { target },
                    )?;
                }
            }
            EventKind::EndReplication => {
                if self.executive.state() == ExecutiveState::Running {
                    self.executive.stop("replication length reached")?;
                } else {
                    self.executive.end("replication length reached");
                }
            }
        }
        Ok(true)
    }

    /// Runs the event loop until the calendar is exhausted, a stop is
    /// requested, or a pause is requested.
    ///
    /// Stop requests take effect after the requesting action completes; the
    /// rest of the calendar is then discarded. Pause leaves the calendar
    /// intact and a subsequent `run` resumes.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error if the executive cannot start running,
    /// and propagates event execution failures.
    pub fn run(&mut self) -> Result<()> {
        self.executive.begin_run()?;
        loop {
            if let Some(reason) = self.executive.take_stop_request() {
                log::debug!("[{:?}] stopping: {}", self.executive.time(), reason);
                self.executive.end(reason);
                return Ok(());
            }
            if self.executive.take_pause_request() {
                self.executive.set_paused();
                return Ok(());
            }
            if !self.step()? {
                self.executive.end("event calendar exhausted");
                return Ok(());
            }
        }
    }
}
