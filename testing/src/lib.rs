//! Test helpers shared by the workspace crates.

#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::cell::RefCell;
use std::rc::Rc;

use rand::distributions::Distribution;

/// A distribution that always produces the same value, for tests that need
/// fully predictable samples.
pub struct ConstDistribution<T>(T);

impl<T> ConstDistribution<T> {
    /// Constructs a distribution always producing `value`.
    pub fn new(value: T) -> Self {
        Self(value)
    }
}

impl<T: Copy> Distribution<T> for ConstDistribution<T> {
    fn sample<R: rand::Rng + ?Sized>(&self, _rng: &mut R) -> T {
        self.0
    }
}

/// A shared, cloneable log of labeled calls, for asserting invocation order.
///
/// Clones share the same underlying list, so a test can hand copies to
/// several recording components and read the merged order back at the end.
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Rc<RefCell<Vec<String>>>,
}

impl CallLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a labeled call.
    pub fn record(&self, label: impl Into<String>) {
        self.calls.borrow_mut().push(label.into());
    }

    /// Returns the calls recorded so far, in order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Removes and returns all recorded calls.
    #[must_use]
    pub fn take(&self) -> Vec<String> {
        self.calls.borrow_mut().drain(..).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_const_distribution_echoes_value() {
        let mut rng = rand::thread_rng();
        let dist = ConstDistribution::new(42_u64);
        assert_eq!(dist.sample(&mut rng), 42);
    }

    #[test]
    fn test_call_log_clones_share_storage() {
        let log = CallLog::new();
        let copy = log.clone();
        log.record("a");
        copy.record("b");
        assert_eq!(log.snapshot(), vec!["a", "b"]);
        assert_eq!(log.take().len(), 2);
        assert!(log.snapshot().is_empty());
    }
}
