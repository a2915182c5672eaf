use std::time::Duration;

use thiserror::Error;

use crate::ElementId;

/// Errors raised by the simulation core.
///
/// Every variant is a hard stop of the current operation; there is no retry
/// anywhere in the core. Canceled events are not errors and never surface
/// here, they are simply skipped by the executive.
#[derive(Debug, Error)]
pub enum Error {
    /// A seed vector violates the generator's validity constraints.
    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    /// A floating-point delay was negative or not finite.
    #[error("invalid delay: {0}")]
    InvalidDelay(f64),

    /// An event was scheduled at, or dequeued with, a time earlier than the
    /// current clock.
    #[error("event time {scheduled:?} is earlier than the current clock {clock:?}")]
    TimeRegression {
        /// The offending event time.
        scheduled: Duration,
        /// The clock value at the time of the call.
        clock: Duration,
    },

    /// The requested operation is not supported by the component's current
    /// lifecycle state.
    #[error("cannot {operation} while the executive is {state}")]
    IllegalState {
        /// The operation that was requested.
        operation: &'static str,
        /// The name of the current state.
        state: &'static str,
    },

    /// The same observer instance is already attached to this element.
    #[error("observer is already attached to element {0}")]
    DuplicateObserver(ElementId),

    /// An element ID does not refer to any element of the model.
    #[error("unknown element: {0}")]
    UnknownElement(ElementId),

    /// An observer handle does not refer to an attached observer.
    #[error("observer handle is not attached to element {0}")]
    UnknownObserver(ElementId),

    /// The model tree cannot be mutated between the start of an experiment
    /// and its end.
    #[error("model structure is frozen during an experiment run")]
    FrozenModel,

    /// A configuration value was rejected at the call that introduced it.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
