//! The experiment controller: runs a configured number of replications,
//! re-initializing the model-element tree and repositioning the random
//! streams at every replication boundary.

use std::time::Duration;

use crate::calendar::EventKind;
use crate::element::Hook;
use crate::error::{Error, Result};
use crate::{Priority, Simulation};

/// How streams are repositioned at the start of every replication.
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::EnumString, strum::ToString)]
#[strum(serialize_all = "snake_case")]
pub enum StreamResetPolicy {
    /// Rewind each stream to the start of its current substream. Combined
    /// with the substream advance at the end of every replication this
    /// gives each replication an independent block of the stream.
    Substream,
    /// Rewind each stream to its very start, so every replication sees the
    /// same random numbers (common random numbers across replications).
    FullStream,
}

impl Default for StreamResetPolicy {
    fn default() -> Self {
        StreamResetPolicy::Substream
    }
}

/// Orchestrates `n` replications of a simulation.
///
/// For each replication: streams are repositioned per the configured policy,
/// `before_replication` and `initialize` fire top-down, the framework events
/// (warm-up, timed updates, end-of-replication) are scheduled, the executive
/// runs to its end, and `after_replication` fires bottom-up. Between
/// replications every bank stream advances to its next substream.
/// `before_experiment`/`after_experiment` fire once around the whole batch.
///
/// Configuration is mutable only between runs; a replication in progress
/// reads it but never writes it.
#[derive(Debug)]
pub struct Experiment {
    replications: usize,
    replication_length: Option<Duration>,
    warm_up: Option<Duration>,
    stream_reset: StreamResetPolicy,
    antithetic_pairs: bool,
    current: Option<usize>,
}

impl Experiment {
    /// Creates an experiment running `replications` replications.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `replications` is zero.
    pub fn new(replications: usize) -> Result<Self> {
        if replications == 0 {
            return Err(Error::InvalidConfig(String::from(
                "an experiment needs at least one replication",
            )));
        }
        Ok(Self {
            replications,
            replication_length: None,
            warm_up: None,
            stream_reset: StreamResetPolicy::default(),
            antithetic_pairs: false,
            current: None,
        })
    }

    /// Ends every replication at this simulation time; without it a
    /// replication runs until its calendar empties or an action stops it.
    #[must_use]
    pub fn replication_length(mut self, length: Duration) -> Self {
        self.replication_length = Some(length);
        self
    }

    /// Experiment-level warm-up length, merged with per-element requests;
    /// the earliest positive length wins.
    #[must_use]
    pub fn warm_up(mut self, length: Duration) -> Self {
        self.warm_up = Some(length);
        self
    }

    /// Sets the stream reset policy applied at every replication start.
    #[must_use]
    pub fn stream_reset(mut self, policy: StreamResetPolicy) -> Self {
        self.stream_reset = policy;
        self
    }

    /// Runs replications in antithetic pairs: even-indexed replications run
    /// a substream with the antithetic flag off, odd-indexed ones re-run the
    /// same substream with the flag on. Overrides the reset policy.
    #[must_use]
    pub fn antithetic_pairs(mut self, enabled: bool) -> Self {
        self.antithetic_pairs = enabled;
        self
    }

    /// The configured number of replications.
    #[must_use]
    pub fn replications(&self) -> usize {
        self.replications
    }

    /// Zero-based index of the replication in progress, if one is.
    #[must_use]
    pub fn current_replication(&self) -> Option<usize> {
        self.current
    }

    /// Runs the whole experiment against `sim`.
    ///
    /// The model structure is frozen for the duration of the run.
    ///
    /// # Errors
    ///
    /// Propagates executive and dispatch failures; the run stops at the
    /// first error.
    pub fn run(&mut self, sim: &mut Simulation) -> Result<()> {
        sim.model.freeze();
        let outcome = self.run_replications(sim);
        sim.model.unfreeze();
        self.current = None;
        outcome
    }

    fn run_replications(&mut self, sim: &mut Simulation) -> Result<()> {
        sim.model
            .notify(Hook::BeforeExperiment, &mut sim.executive, &mut sim.streams);
        for replication in 0..self.replications {
            self.current = Some(replication);
            log::info!(
                "starting replication {} of {}",
                replication + 1,
                self.replications
            );
            self.position_streams(sim, replication);
            sim.executive.initialize()?;
            sim.model
                .notify(Hook::BeforeReplication, &mut sim.executive, &mut sim.streams);
            sim.model
                .notify(Hook::Initialize, &mut sim.executive, &mut sim.streams);
            self.schedule_framework_events(sim)?;
            sim.run()?;
            sim.model
                .notify(Hook::AfterReplication, &mut sim.executive, &mut sim.streams);
            log::info!(
                "replication {} ended at {:?}: {}",
                replication + 1,
                sim.executive.time(),
                sim.executive.stop_reason().unwrap_or("no reason recorded"),
            );
            if !self.antithetic_pairs || replication % 2 == 1 {
                sim.streams.advance_to_next_substreams();
            }
        }
        sim.model
            .notify(Hook::AfterExperiment, &mut sim.executive, &mut sim.streams);
        Ok(())
    }

    fn position_streams(&self, sim: &mut Simulation, replication: usize) {
        if self.antithetic_pairs {
            sim.streams.set_antithetic(replication % 2 == 1);
            sim.streams.reset_start_substreams();
        } else {
            match self.stream_reset {
                StreamResetPolicy::Substream => sim.streams.reset_start_substreams(),
                StreamResetPolicy::FullStream => sim.streams.reset_start_streams(),
            }
        }
    }

    fn schedule_framework_events(&self, sim: &mut Simulation) -> Result<()> {
        if let Some(length) = sim.model.earliest_warm_up(self.warm_up) {
            sim.executive
                .schedule_kind(length, Priority::WARM_UP, EventKind::WarmUp)?;
        }
        for (target, interval) in sim.model.timed_intervals() {
            sim.executive.schedule_kind(
                interval,
                Priority::TIMED_UPDATE,
                EventKind::TimedUpdate { target },
            )?;
        }
        if let Some(length) = self.replication_length {
            sim.executive.schedule_kind(
                length,
                Priority::END_REPLICATION,
                EventKind::EndReplication,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_zero_replications_is_a_configuration_error() {
        assert!(matches!(
            Experiment::new(0),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_policy_parses_from_snake_case() {
        use std::str::FromStr;
        assert_eq!(
            StreamResetPolicy::from_str("substream").unwrap(),
            StreamResetPolicy::Substream
        );
        assert_eq!(
            StreamResetPolicy::from_str("full_stream").unwrap(),
            StreamResetPolicy::FullStream
        );
        assert!(StreamResetPolicy::from_str("bogus").is_err());
    }

    #[test]
    fn test_builder_applies_options() {
        let experiment = Experiment::new(4)
            .unwrap()
            .replication_length(Duration::from_secs(10))
            .warm_up(Duration::from_secs(2))
            .stream_reset(StreamResetPolicy::FullStream)
            .antithetic_pairs(true);
        assert_eq!(experiment.replications(), 4);
        assert_eq!(experiment.current_replication(), None);
    }
}
