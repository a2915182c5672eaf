//! Multi-server queueing simulation.
//!
//! Customers arrive at a station according to a Poisson process, wait in a
//! FIFO queue for one of `c` identical servers, and depart after an
//! exponential service time. Replication summaries accumulate in a shared
//! log that the binary writes out as CSV.

#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::default_trait_access,
    clippy::cast_precision_loss
)]

use std::time::Duration;

use derive_more::{Display, From, Into};

mod source;
pub use source::Source;

mod station;
pub use station::{Station, StationMsg};

mod summary;
pub use summary::{ReplicationRow, SharedSummary, SummaryLog};

/// Customer ID, unique within one replication.
#[derive(
    From, Into, Debug, PartialEq, PartialOrd, Eq, Ord, Copy, Clone, Hash, Display,
)]
pub struct CustomerId(usize);

/// A customer flowing from the source through the station.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Customer {
    id: CustomerId,
    arrived: Duration,
}

impl Customer {
    /// Creates a customer that arrived at the given simulation time.
    #[must_use]
    pub fn new(id: CustomerId, arrived: Duration) -> Self {
        Self { id, arrived }
    }

    /// The customer's ID.
    #[must_use]
    pub fn id(&self) -> CustomerId {
        self.id
    }

    /// The simulation time the customer arrived at the station.
    #[must_use]
    pub fn arrival_time(&self) -> Duration {
        self.arrived
    }
}
